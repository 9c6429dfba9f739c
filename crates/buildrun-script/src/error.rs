//! Script errors.

use buildrun_core::CoreError;
use thiserror::Error;

/// Errors raised while parsing or running a build script.
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("syntax error at line {line}, column {column}: {message}")]
    Syntax {
        line: usize,
        column: usize,
        message: String,
    },

    #[error("runtime error at line {line}: {message}")]
    Runtime { line: usize, message: String },

    /// A primitive was called with an argument outside its accepted set.
    #[error("line {line}: {source}")]
    Primitive {
        line: usize,
        #[source]
        source: CoreError,
    },

    /// The host refused or failed to accept a valid primitive.
    #[error("line {line}: host rejected primitive: {source}")]
    Host {
        line: usize,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("script limit exceeded: {0}")]
    LimitExceeded(String),
}

impl ScriptError {
    pub(crate) fn runtime(line: usize, message: impl Into<String>) -> Self {
        Self::Runtime {
            line,
            message: message.into(),
        }
    }

    /// True when a primitive rejected one of its arguments.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(
            self,
            Self::Primitive {
                source: CoreError::InvalidArgument(_),
                ..
            }
        )
    }
}
