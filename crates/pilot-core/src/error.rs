//! Link error taxonomy.
//!
//! None of these are fatal: the link records the message for display and,
//! for connection-level failures, degrades to the local simulator.

use thiserror::Error;

/// WebSocket close code for a normal, operator-requested closure.
pub const NORMAL_CLOSURE: u16 = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    #[error("Connection timeout. Please check if the server is running and accessible.")]
    ConnectionTimeout,

    #[error("Connection closed: {code} {reason}")]
    ConnectionClosed { code: u16, reason: String },

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Error sending command: {0}")]
    SendFailed(String),

    #[error("Error parsing message: {0}")]
    MessageParse(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Unknown command type: {0}")]
    UnknownCommand(String),
}

impl LinkError {
    /// Build a close error, substituting a placeholder for an empty reason.
    pub fn closed(code: u16, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        let reason = if reason.trim().is_empty() {
            "No reason provided".to_string()
        } else {
            reason
        };
        LinkError::ConnectionClosed { code, reason }
    }

    /// Whether this failure should push the console into fallback mode.
    pub fn triggers_fallback(&self) -> bool {
        matches!(
            self,
            LinkError::ConnectionTimeout
                | LinkError::ConnectionClosed { .. }
                | LinkError::ConnectionError(_)
                | LinkError::SendFailed(_)
        )
    }
}

impl From<serde_json::Error> for LinkError {
    fn from(err: serde_json::Error) -> Self {
        LinkError::MessageParse(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_fills_in_missing_reason() {
        let err = LinkError::closed(1006, "");
        assert_eq!(err.to_string(), "Connection closed: 1006 No reason provided");
    }

    #[test]
    fn parse_and_backend_errors_do_not_force_fallback() {
        assert!(!LinkError::MessageParse("eof".into()).triggers_fallback());
        assert!(!LinkError::Backend("busy".into()).triggers_fallback());
        assert!(LinkError::ConnectionTimeout.triggers_fallback());
        assert!(LinkError::SendFailed("broken pipe".into()).triggers_fallback());
    }
}
