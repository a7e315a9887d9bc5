use hal_bus::BusError;
use thiserror::Error;

use crate::value::PropertyType;

/// Error names the HAL daemon replies with
pub mod names {
    pub const NO_SUCH_DEVICE: &str = "org.freedesktop.Hal.NoSuchDevice";
    pub const NO_SUCH_PROPERTY: &str = "org.freedesktop.Hal.NoSuchProperty";
    pub const TYPE_MISMATCH: &str = "org.freedesktop.Hal.TypeMismatch";
    pub const DEVICE_ALREADY_LOCKED: &str = "org.freedesktop.Hal.DeviceAlreadyLocked";
    pub const DEVICE_NOT_LOCKED: &str = "org.freedesktop.Hal.DeviceNotLocked";
    pub const PERMISSION_DENIED: &str = "org.freedesktop.Hal.PermissionDenied";
    pub const INTERFACE_ALREADY_LOCKED: &str = "org.freedesktop.Hal.Device.InterfaceAlreadyLocked";
    pub const INTERFACE_NOT_LOCKED: &str = "org.freedesktop.Hal.Device.InterfaceNotLocked";
}

/// Errors returned by the HAL client
///
/// Variants fall into three groups: local validation failures that never
/// reach the daemon, errors reported by the daemon, and transport failures.
/// The client never retries; every error is surfaced to the caller.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum HalError {
    /// Device identifier does not carry the registry prefix
    #[error("Invalid device identifier: {0}")]
    InvalidUdi(String),

    /// A parameter failed client-side validation
    #[error("Invalid {parameter}: {reason}")]
    InvalidArgument {
        parameter: &'static str,
        reason: String,
    },

    /// `init` was called before a transport was attached
    #[error("No transport attached to context")]
    NoTransport,

    /// A protocol call was made before `init`
    #[error("Context is not initialized")]
    NotInitialized,

    /// A protocol call was made after `shutdown`
    #[error("Context has been shut down")]
    ShutDown,

    /// Direct mode was requested but the address variable is unset
    #[error("Direct daemon address not set: environment variable {0} is missing")]
    DirectAddressMissing(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Error reply from the daemon
    #[error("{name}: {message}")]
    Daemon { name: String, message: String },

    /// Whole-device lock is held; `reason` is the holder's stated reason
    #[error("Device {udi} is already locked: {reason}")]
    DeviceAlreadyLocked { udi: String, reason: String },

    /// Property exists but holds a different type than requested
    #[error("Property {key} has type {found}, expected {expected}")]
    TypeMismatch {
        key: String,
        expected: PropertyType,
        found: PropertyType,
    },

    #[error("Transport error: {0}")]
    Transport(String),

    /// Writing a device dump failed
    #[error("I/O error: {0}")]
    Io(String),

    /// Daemon reply had an unexpected shape
    #[error("Malformed reply to {method}: {reason}")]
    MalformedReply { method: String, reason: String },
}

impl HalError {
    pub(crate) fn invalid_argument(parameter: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            parameter,
            reason: reason.into(),
        }
    }

    pub(crate) fn malformed(method: &str, reason: impl Into<String>) -> Self {
        Self::MalformedReply {
            method: method.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether the error was detected locally, before any round trip
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            Self::InvalidUdi(_)
                | Self::InvalidArgument { .. }
                | Self::NoTransport
                | Self::NotInitialized
                | Self::ShutDown
                | Self::DirectAddressMissing(_)
                | Self::Configuration(_)
        )
    }

    /// Machine-readable daemon error name, when the daemon produced this error
    pub fn daemon_error_name(&self) -> Option<&str> {
        match self {
            Self::Daemon { name, .. } => Some(name),
            Self::DeviceAlreadyLocked { .. } => Some(names::DEVICE_ALREADY_LOCKED),
            _ => None,
        }
    }

    /// Whether the daemon rejected the call with the given error name
    pub fn is_daemon_error(&self, name: &str) -> bool {
        self.daemon_error_name() == Some(name)
    }
}

impl From<BusError> for HalError {
    fn from(error: BusError) -> Self {
        match error {
            BusError::Remote { name, message } => HalError::Daemon { name, message },
            BusError::Disconnected(msg) => HalError::Transport(msg),
            BusError::MalformedReply(msg) => HalError::MalformedReply {
                method: "unknown".to_string(),
                reason: msg,
            },
            BusError::Encoding(msg) => HalError::invalid_argument("value", msg),
        }
    }
}

impl From<std::io::Error> for HalError {
    fn from(error: std::io::Error) -> Self {
        HalError::Io(error.to_string())
    }
}

/// Type alias for results that can return a HalError
pub type Result<T> = std::result::Result<T, HalError>;
