//! BuildRun Core Domain Types
//!
//! This crate contains pure domain types with no dependencies on:
//! - Network/protocol clients
//! - Container runtimes
//! - Async runtime specifics
//!
//! All types here represent the core business domain of BuildRun: jobs,
//! their results, worker status, build primitives and coordinate tracking.

pub mod coords;
pub mod envelope;
pub mod error;
pub mod ids;
pub mod job;
pub mod primitive;
pub mod status;

// Re-export commonly used types
pub use coords::{BoundingRegion, CoordinateTracker, Dimensions, Point3};
pub use envelope::{decode_job, Envelope, JobPayload};
pub use error::CoreError;
pub use ids::{JobId, WorkerId};
pub use job::{Job, JobResult, STRUCTURE_NAME_KEY};
pub use primitive::{
    is_valid_structure_name, structure_save_command, BlockStates, Fill, FillMode, Place, PlaceMode,
    MAX_FILL_VOLUME,
};
pub use status::{JobStatus, WorkerStatus};
