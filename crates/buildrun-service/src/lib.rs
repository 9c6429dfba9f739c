//! BuildRun job service.
//!
//! Jobs arrive on a [`JobQueue`] as envelopes carrying a build script. For
//! each job the service provisions a dedicated worker instance, waits until
//! it answers control commands, clears a build area, runs the script with
//! every primitive throttled through a [`Dispatcher`], saves the result as a
//! structure, copies the structure file out and tears the worker down.
//!
//! ```text
//! JobQueue ──> BuildService ──> BatchRunner ──> JobPipeline (one task per job)
//!                                                 │
//!                 WorkerManager <── provision / wait_ready / extract / teardown
//!                 BuildExecutor <── prepare_area / execute ──> Dispatcher ──> CommandSink
//! ```

pub mod config;
pub mod control;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod lifecycle;
pub mod pipeline;
pub mod queue;
pub mod retry;
pub mod runtime;
pub mod service;
pub mod template;

#[cfg(test)]
mod testing;

pub use config::{BuildConfig, DispatcherConfig, LifecycleConfig, ServiceConfig};
pub use control::{ControlConnector, RconConnector};
pub use dispatcher::{DispatchStats, Dispatcher, Faulted};
pub use error::{PipelineError, QueueError};
pub use executor::{dry_run, BuildExecutor, BuildOutcome, Plan};
pub use lifecycle::{Artifact, LiveWorker, Readiness, WorkerHandle, WorkerManager};
pub use pipeline::{BatchRunner, JobPipeline};
pub use queue::{dequeue_batch, JobQueue, MemoryQueue, QueuedMessage, SpoolQueue};
pub use runtime::{ComposeRuntime, ContainerRuntime, ContainerState, WorkerSpec};
pub use service::BuildService;
pub use template::WorkerTemplate;
