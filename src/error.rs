//! Custom error types for the controller.
//!
//! This module defines the primary error type, `SmurfError`, for the whole crate, and
//! `DeviceError`, the failure type of every [`DeviceCommandPort`](crate::device::DeviceCommandPort)
//! operation. Both use the `thiserror` crate.
//!
//! ## Error Hierarchy
//!
//! `SmurfError` consolidates the failure classes of a bring-up:
//!
//! - **`Options`**: Wraps errors from `figment` while layering the construction-time options
//!   (TOML file, environment variables).
//! - **`Parse`**: The instrument configuration file is not valid JSON.
//! - **`Configuration`**: A required section is absent or malformed (unparsable index,
//!   empty mapping, inverted frequency interval). Always raised at map-build time, before
//!   any hardware contact.
//! - **`Filesystem`**: A directory or logfile could not be created during session setup.
//! - **`BringUp`**: A hardware operation failed inside the bring-up sequence. The failing
//!   phase is recorded; the instrument is left partially configured and the caller must
//!   re-run the whole sequence.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::device::Register;
use crate::sequencer::Phase;

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, SmurfError>;

/// Convenience alias for device port results.
pub type DeviceResult<T> = std::result::Result<T, DeviceError>;

/// Every failure the controller reports.
#[derive(Error, Debug)]
pub enum SmurfError {
    /// Layered controller options could not be extracted.
    #[error("Options error: {0}")]
    Options(#[from] Box<figment::Error>),

    /// The configuration file is not valid JSON.
    #[error("Configuration parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// A configuration value is missing or malformed.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A file or directory could not be read or created.
    #[error("Filesystem error at {}: {source}", path.display())]
    Filesystem {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A device call failed; `phase` names the step that was running.
    #[error("Bring-up aborted during {phase}: {source}")]
    BringUp {
        /// Phase during which the call failed.
        phase: Phase,
        /// The port failure.
        #[source]
        source: DeviceError,
    },
}

impl SmurfError {
    /// Shorthand for a configuration error with a formatted message.
    pub fn config(msg: impl Into<String>) -> Self {
        SmurfError::Configuration(msg.into())
    }

    pub(crate) fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SmurfError::Filesystem {
            path: path.into(),
            source,
        }
    }
}

impl From<figment::Error> for SmurfError {
    fn from(err: figment::Error) -> Self {
        SmurfError::Options(Box::new(err))
    }
}

/// Failure of a single device operation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeviceError {
    /// The device did not accept a write.
    #[error("write to {register} failed: {message}")]
    Write {
        /// Register addressed by the write.
        register: Register,
        /// Transport-level reason.
        message: String,
    },

    /// A read returned no value.
    #[error("read of {register} failed: {message}")]
    Read {
        /// Register addressed by the read.
        register: Register,
        /// Transport-level reason.
        message: String,
    },

    /// No reply arrived in time.
    #[error("{register} timed out after {after:?}")]
    Timeout {
        /// Register the call was waiting on.
        register: Register,
        /// How long the call waited.
        after: Duration,
    },

    /// The call was well-formed on the wire but made no sense for the register.
    #[error("{register} rejected value: {message}")]
    Rejected {
        /// Register the value was meant for.
        register: Register,
        /// What was wrong with it.
        message: String,
    },
}

impl DeviceError {
    /// The register the failing operation addressed.
    pub fn register(&self) -> Register {
        match self {
            DeviceError::Write { register, .. }
            | DeviceError::Read { register, .. }
            | DeviceError::Timeout { register, .. }
            | DeviceError::Rejected { register, .. } => *register,
        }
    }
}
