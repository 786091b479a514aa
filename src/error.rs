use crate::config::CameraPosition;
use crate::session::CaptureState;
use thiserror::Error;

/// Configuration store errors.
///
/// Validation failures always leave the previously stored value in place.
/// `Locked` is deliberately distinct from `Validation`: a locked mutation may
/// succeed after `stop_preview`, a validation failure never will.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {details}")]
    Validation { field: &'static str, details: String },

    #[error("Configuration is locked while a session is active: {field}")]
    Locked { field: &'static str },
}

/// Session state machine errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Operation '{operation}' is not valid in state {from:?}")]
    InvalidTransition {
        from: CaptureState,
        operation: &'static str,
    },

    #[error("Camera/microphone access denied; call stop_preview and re-grant before retrying")]
    PermissionDenied,

    #[error("Camera/microphone authorization still pending")]
    AuthorizationPending,

    #[error("Operation '{operation}' requires an acquired capture device")]
    NotAcquired { operation: &'static str },

    #[error("Teardown did not complete within {timeout_ms}ms during {stage}")]
    TeardownTimeout { stage: &'static str, timeout_ms: u64 },

    #[error("Another capture session instance is already alive")]
    AlreadyRunning,
}

/// Errors reported by a device provider or an acquired device.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("Failed to acquire {position:?} camera: {details}")]
    Acquisition {
        position: CameraPosition,
        details: String,
    },

    #[error("{position:?} camera cannot satisfy the requested configuration: {details}")]
    Unsupported {
        position: CameraPosition,
        details: String,
    },
}

#[derive(Error, Debug)]
pub enum StreamKitError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Streamer error: {details}")]
    Streamer { details: String },

    #[error("Filter error in '{filter}': {details}")]
    Filter { filter: String, details: String },

    #[error("Configuration loading error: {0}")]
    ConfigLoad(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("Deserialization error: {0}")]
    Deserialization(#[from] toml::de::Error),
}

impl StreamKitError {
    pub fn streamer<S: Into<String>>(details: S) -> Self {
        Self::Streamer {
            details: details.into(),
        }
    }

    pub fn filter<F: Into<String>, S: Into<String>>(filter: F, details: S) -> Self {
        Self::Filter {
            filter: filter.into(),
            details: details.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, StreamKitError>;
