//! Core domain errors.

use thiserror::Error;

/// Core domain errors for BuildRun.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A build primitive received an argument outside its accepted set.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Invalid worker state transition.
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    /// A queue envelope could not be decoded into a job.
    #[error("Malformed envelope: {0}")]
    EnvelopeDecode(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl CoreError {
    /// Shorthand for building an [`CoreError::InvalidArgument`].
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }
}
