//! Service errors.

use std::time::Duration;

use buildrun_core::{CoreError, WorkerId};
use buildrun_rcon::RconError;
use buildrun_script::ScriptError;
use thiserror::Error;

use crate::dispatcher::Faulted;
use crate::runtime::RuntimeError;
use crate::template::TemplateError;

/// Errors that end one job's pipeline.
///
/// Every variant is converted into an `Error` job result at the pipeline
/// boundary; none of them stop the batch runner.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The worker instance never started.
    #[error("Provisioning failed: {0}")]
    Provision(String),

    #[error("Worker {worker_id} not ready after {waited:?}")]
    ReadinessTimeout { worker_id: WorkerId, waited: Duration },

    #[error("Worker {worker_id} stopped before becoming ready (container {status})")]
    WorkerExited { worker_id: WorkerId, status: String },

    #[error("Control channel error: {0}")]
    Control(#[from] RconError),

    /// The worker stopped answering mid-build.
    #[error(transparent)]
    ControlLost(#[from] Faulted),

    #[error("Build script failed: {0}")]
    Script(#[from] ScriptError),

    #[error("Build placed no blocks")]
    EmptyBuild,

    #[error("Command backlog did not drain within {0:?}")]
    DrainTimeout(Duration),

    #[error("Artifact extraction failed: {0}")]
    ArtifactExtraction(String),

    #[error("Container runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A pipeline task panicked or was cancelled.
    #[error("Pipeline task failed: {0}")]
    Task(String),
}

/// Errors from the job queue.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The message body is not a valid job envelope.
    #[error("Malformed envelope {id}: {source}")]
    Decode {
        id: String,
        #[source]
        source: CoreError,
    },

    #[error("Queue I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Queue serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Core(#[from] CoreError),
}
