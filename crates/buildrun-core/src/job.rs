//! Job and JobResult types.

use crate::coords::Dimensions;
use crate::primitive::is_valid_structure_name;
use crate::{JobId, JobStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Metadata key a producer can set to choose the structure/artifact name.
pub const STRUCTURE_NAME_KEY: &str = "structure_name";

/// A Job is one request to construct a structure from a build script.
///
/// Created when dequeued and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Identifier assigned by the producer.
    pub job_id: JobId,

    /// Source of the build procedure.
    pub script: String,

    /// Free-form producer metadata, echoed back in the result.
    pub metadata: HashMap<String, String>,

    /// When this job was taken off the queue.
    pub received_at: DateTime<Utc>,
}

impl Job {
    /// Create a new Job.
    pub fn new(job_id: impl Into<JobId>, script: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            script: script.into(),
            metadata: HashMap::new(),
            received_at: Utc::now(),
        }
    }

    /// Builder method to add a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Name under which the structure is saved and the artifact stored.
    ///
    /// Uses the `structure_name` metadata entry when it is a valid
    /// identifier, otherwise derives one from the job id.
    pub fn structure_name(&self) -> String {
        match self.metadata.get(STRUCTURE_NAME_KEY) {
            Some(name) if is_valid_structure_name(name) => name.clone(),
            _ => format!("structure_{}", self.job_id.slug()),
        }
    }
}

/// The single terminal outcome reported for a Job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: JobId,

    pub status: JobStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structure_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<Dimensions>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_path: Option<PathBuf>,

    /// Hex SHA-256 of the extracted artifact.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_sha256: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default)]
    pub metadata: HashMap<String, String>,

    pub completed_at: DateTime<Utc>,
}

impl JobResult {
    fn base(job: &Job, status: JobStatus) -> Self {
        Self {
            job_id: job.job_id.clone(),
            status,
            structure_name: None,
            dimensions: None,
            artifact_path: None,
            artifact_sha256: None,
            error: None,
            metadata: job.metadata.clone(),
            completed_at: Utc::now(),
        }
    }

    /// A successful result for `job`.
    pub fn success(job: &Job) -> Self {
        Self::base(job, JobStatus::Success)
    }

    /// A failed result for `job` carrying `error`.
    pub fn error(job: &Job, error: impl Into<String>) -> Self {
        let mut result = Self::base(job, JobStatus::Error);
        result.error = Some(error.into());
        result
    }

    pub fn with_structure_name(mut self, name: impl Into<String>) -> Self {
        self.structure_name = Some(name.into());
        self
    }

    pub fn with_dimensions(mut self, dimensions: Option<Dimensions>) -> Self {
        self.dimensions = dimensions;
        self
    }

    pub fn with_artifact(mut self, path: PathBuf, sha256: impl Into<String>) -> Self {
        self.artifact_path = Some(path);
        self.artifact_sha256 = Some(sha256.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}
