//! Error types for the bus transport

use thiserror::Error;

/// Well-known error names defined by the message bus itself
pub mod names {
    pub const FAILED: &str = "org.freedesktop.DBus.Error.Failed";
    pub const UNKNOWN_METHOD: &str = "org.freedesktop.DBus.Error.UnknownMethod";
    pub const INVALID_ARGS: &str = "org.freedesktop.DBus.Error.InvalidArgs";
    pub const ACCESS_DENIED: &str = "org.freedesktop.DBus.Error.AccessDenied";
    pub const MATCH_RULE_NOT_FOUND: &str = "org.freedesktop.DBus.Error.MatchRuleNotFound";
}

/// Errors that can occur while talking over the bus
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BusError {
    /// The connection is gone or the peer could not be reached
    #[error("Bus disconnected: {0}")]
    Disconnected(String),

    /// Error reply sent by the remote peer
    #[error("{name}: {message}")]
    Remote { name: String, message: String },

    /// A reply arrived but its arguments did not have the expected shape
    #[error("Malformed reply: {0}")]
    MalformedReply(String),

    /// An outgoing value has no wire encoding
    #[error("Cannot encode value: {0}")]
    Encoding(String),
}

impl BusError {
    /// Create a remote error reply with the given name and message
    pub fn remote(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Remote {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create a generic `org.freedesktop.DBus.Error.Failed` reply
    pub fn failed(message: impl Into<String>) -> Self {
        Self::remote(names::FAILED, message)
    }

    /// Machine-readable error name, if the error came from a remote peer
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Remote { name, .. } => Some(name),
            _ => None,
        }
    }

    /// Whether this is a remote error with the given name
    pub fn is(&self, error_name: &str) -> bool {
        self.name() == Some(error_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_name() {
        let err = BusError::remote("org.freedesktop.Hal.NoSuchDevice", "no device");
        assert_eq!(err.name(), Some("org.freedesktop.Hal.NoSuchDevice"));
        assert!(err.is("org.freedesktop.Hal.NoSuchDevice"));
        assert!(!err.is(names::FAILED));
    }

    #[test]
    fn test_local_errors_have_no_name() {
        assert_eq!(BusError::Disconnected("gone".to_string()).name(), None);
        assert_eq!(BusError::MalformedReply("bad".to_string()).name(), None);
        assert_eq!(BusError::Encoding("()".to_string()).name(), None);
    }

    #[test]
    fn test_error_display() {
        let err = BusError::failed("boom");
        assert_eq!(format!("{}", err), "org.freedesktop.DBus.Error.Failed: boom");

        let err = BusError::Disconnected("socket closed".to_string());
        assert_eq!(format!("{}", err), "Bus disconnected: socket closed");
    }
}
