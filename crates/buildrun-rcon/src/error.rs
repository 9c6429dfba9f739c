//! Error types for the remote control client.

use thiserror::Error;

/// Errors that can occur while talking to a worker's control port.
#[derive(Debug, Error)]
pub enum RconError {
    /// Nothing is listening on the control port (yet).
    #[error("Connection refused by {0}")]
    ConnectionRefused(String),

    /// The worker rejected the control credential.
    #[error("Authentication failed")]
    AuthFailure,

    /// The worker sent something that is not a valid reply.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// No reply within the configured interval.
    #[error("Timeout waiting for {0}")]
    Timeout(&'static str),

    /// Command does not fit in a single request packet.
    #[error("Command too long: {len} bytes (max {max})")]
    CommandTooLong { len: usize, max: usize },

    /// Underlying socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RconError {
    /// Whether the failure is a transport fault that a retry might clear.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ConnectionRefused(_) | Self::Timeout(_) | Self::Io(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(
            RconError::Timeout("command reply").to_string(),
            "Timeout waiting for command reply"
        );
        assert_eq!(
            RconError::CommandTooLong { len: 2000, max: 1446 }.to_string(),
            "Command too long: 2000 bytes (max 1446)"
        );
    }

    #[test]
    fn test_transient_classification() {
        assert!(RconError::ConnectionRefused("127.0.0.1:1".into()).is_transient());
        assert!(RconError::Timeout("login").is_transient());
        assert!(!RconError::AuthFailure.is_transient());
        assert!(!RconError::Protocol("bad id".into()).is_transient());
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<RconError>();
    }
}
