//! Status enums for Jobs and Workers.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CoreError;

/// Terminal status of a Job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// The structure was built, saved and extracted.
    Success,
    /// Some stage of the pipeline failed.
    Error,
}

impl JobStatus {
    /// Returns true for [`JobStatus::Success`].
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Lifecycle status of a provisioned worker instance.
///
/// ```text
/// Provisioning -> Ready -> Stopped
/// Provisioning -> Failed -> Stopped
/// Ready -> Failed -> Stopped
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerStatus {
    /// Instance definition rendered and start requested.
    #[default]
    Provisioning,
    /// Instance is running and answers control commands.
    Ready,
    /// Instance never became usable, or died.
    Failed,
    /// Instance has been torn down.
    Stopped,
}

impl WorkerStatus {
    /// Returns true if the worker can accept build commands.
    pub fn is_usable(&self) -> bool {
        matches!(self, Self::Ready)
    }

    /// Returns true if the worker is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped)
    }

    /// Whether `self -> next` is a legal lifecycle transition.
    pub fn can_transition_to(&self, next: WorkerStatus) -> bool {
        use WorkerStatus::*;
        matches!(
            (self, next),
            (Provisioning, Ready)
                | (Provisioning, Failed)
                | (Ready, Failed)
                | (Provisioning, Stopped)
                | (Ready, Stopped)
                | (Failed, Stopped)
        )
    }

    /// Validate and return the next status.
    pub fn transition(&self, next: WorkerStatus) -> Result<WorkerStatus, CoreError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(CoreError::InvalidStateTransition {
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Provisioning => "provisioning",
            Self::Ready => "ready",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let s = WorkerStatus::default();
        let s = s.transition(WorkerStatus::Ready).unwrap();
        assert!(s.is_usable());
        let s = s.transition(WorkerStatus::Stopped).unwrap();
        assert!(s.is_terminal());
    }

    #[test]
    fn test_failed_path_transitions() {
        let s = WorkerStatus::Provisioning
            .transition(WorkerStatus::Failed)
            .unwrap();
        assert!(!s.is_usable());
        assert_eq!(
            s.transition(WorkerStatus::Stopped).unwrap(),
            WorkerStatus::Stopped
        );
    }

    #[test]
    fn test_stopped_is_final() {
        for next in [
            WorkerStatus::Provisioning,
            WorkerStatus::Ready,
            WorkerStatus::Failed,
            WorkerStatus::Stopped,
        ] {
            assert!(!WorkerStatus::Stopped.can_transition_to(next));
        }
    }

    #[test]
    fn test_failed_cannot_become_ready() {
        let err = WorkerStatus::Failed
            .transition(WorkerStatus::Ready)
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidStateTransition { .. }));
        assert_eq!(err.to_string(), "Invalid state transition: failed -> ready");
    }

    #[test]
    fn test_job_status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&JobStatus::Success).unwrap(),
            "\"success\""
        );
        assert_eq!(serde_json::to_string(&JobStatus::Error).unwrap(), "\"error\"");
    }
}
