use thiserror::Error;

use crate::hub::{ConnectionId, ConnectionState};

/// Unified error type for the relay
#[derive(Error, Debug)]
pub enum RelayError {
    // Payload errors
    #[error("Malformed payload: {0}")]
    MalformedPayload(#[from] serde_json::Error),

    // Connection errors
    #[error("Connection {id} is not open (state: {state})")]
    ConnectionNotOpen {
        id: ConnectionId,
        state: ConnectionState,
    },

    #[error("Invalid state transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: ConnectionId,
        from: ConnectionState,
        to: ConnectionState,
    },

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;

impl RelayError {
    /// Errors that are confined to a single connection and never touch hub state.
    ///
    /// The per-connection task logs these and keeps reading.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            RelayError::MalformedPayload(_)
                | RelayError::ConnectionNotOpen { .. }
                | RelayError::InvalidTransition { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_recoverable_classification() {
        let parse_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        assert!(RelayError::MalformedPayload(parse_err).is_recoverable());

        assert!(RelayError::ConnectionNotOpen {
            id: ConnectionId::new(),
            state: ConnectionState::Closing,
        }
        .is_recoverable());

        assert!(!RelayError::InvalidConfig("bad".to_string()).is_recoverable());
        assert!(!RelayError::Internal("boom".to_string()).is_recoverable());
    }

    #[test]
    fn test_error_display() {
        let err = RelayError::InvalidConfig("RELAY_HOST must not be empty".to_string());
        assert_eq!(
            err.to_string(),
            "Invalid configuration: RELAY_HOST must not be empty"
        );

        let err = RelayError::ConnectionNotOpen {
            id: ConnectionId::new(),
            state: ConnectionState::Closed,
        };
        assert!(err.to_string().ends_with("is not open (state: Closed)"));
    }
}
