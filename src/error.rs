//! Custom error types for the rig.
//!
//! This module defines the primary error type, `RigError`, shared by the device
//! layer, the session orchestrator and the storage helpers. Using the `thiserror`
//! crate, it provides a single taxonomy that callers can match on to decide
//! between local recovery and surfacing the failure.
//!
//! ## Error Hierarchy
//!
//! - **`DeviceUnavailable`**: A driver could not be initialized. The device factory
//!   recovers from this locally by moving on to the next candidate driver.
//! - **`DeviceOperationFailed`**: A specific hardware call (capture, configure,
//!   tracking) failed. Surfaced to the caller; the session loop retries a capture
//!   once before failing the session.
//! - **`InvalidSessionConfig`**: A session configuration was rejected before any
//!   state was mutated.
//! - **`SessionAlreadyRunning`** / **`NoActiveSession`**: State machine guard
//!   violations on the session orchestrator.
//! - **`StorageUnavailable`**: No writable capture directory exists. Fatal at startup.
//! - **`InvalidParameter`**: A request argument (tracking speed, folder name) is
//!   out of range.
//! - **`FeatureNotEnabled`**: The code path requires a cargo feature that was not
//!   compiled in.
//!
//! By using `#[from]`, I/O, JSON and [`ConfigError`](crate::config::ConfigError)
//! values convert with `?`.

use thiserror::Error;

/// Convenience alias for results using the rig error type.
pub type RigResult<T> = std::result::Result<T, RigError>;

/// Everything that can go wrong in the rig.
#[derive(Error, Debug)]
pub enum RigError {
    /// A driver could not be brought up
    #[error("Device unavailable ({driver}): {reason}")]
    DeviceUnavailable { driver: String, reason: String },

    #[error("Device operation '{operation}' failed: {reason}")]
    DeviceOperationFailed { operation: String, reason: String },

    #[error("Invalid session configuration: {0}")]
    InvalidSessionConfig(String),

    #[error("A session is already running")]
    SessionAlreadyRunning,

    #[error("No active session")]
    NoActiveSession,

    /// Every capture location failed its probe write
    #[error("No writable capture directory found (tried: {0})")]
    StorageUnavailable(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// The driver was compiled out
    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
}

impl RigError {
    /// Shorthand for a driver that failed to come up.
    pub fn unavailable(driver: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DeviceUnavailable {
            driver: driver.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for a failed hardware call.
    pub fn operation(operation: impl Into<String>, reason: impl ToString) -> Self {
        Self::DeviceOperationFailed {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }
}
