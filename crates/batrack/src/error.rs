//! Error types for batrack.
//!
//! This module defines all error types used throughout the batrack crate,
//! providing detailed context for debugging and useful log messages in the
//! field.

use std::path::PathBuf;
use thiserror::Error;

use crate::unit::UnitKind;

/// The main error type for batrack operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Storage Errors ===
    /// Failed to open or create the event database.
    #[error("failed to open database at {path}: {source}")]
    DatabaseOpen {
        /// Path to the database file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: rusqlite::Error,
    },

    /// A database query failed.
    #[error("database query failed: {0}")]
    DatabaseQuery(#[from] rusqlite::Error),

    /// Failed to run database migrations.
    #[error("database migration failed: {message}")]
    DatabaseMigration {
        /// Description of what went wrong.
        message: String,
    },

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === Unit Errors ===
    /// An analysis unit failed to start.
    #[error("failed to start {kind}: {message}")]
    UnitStart {
        /// The unit that failed.
        kind: UnitKind,
        /// Description of what went wrong.
        message: String,
    },

    /// An analysis unit is expected to run but its task has ended.
    #[error("{kind} is not active, but should run")]
    UnitDied {
        /// The unit that died.
        kind: UnitKind,
    },

    /// A received signal could not be decoded.
    #[error("invalid signal payload: {0}")]
    SignalDecode(String),

    // === MQTT Errors ===
    /// The MQTT client rejected a request.
    #[error("MQTT error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    // === Platform Errors ===
    /// Platform-specific operation failed.
    #[error("platform error: {0}")]
    Platform(String),

    // === I/O Errors ===
    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Serialization Errors ===
    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Writing the trigger log failed.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Writing a wave file failed.
    #[error("wave error: {0}")]
    Wave(#[from] hound::Error),

    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for batrack operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

#[cfg(target_os = "linux")]
impl From<batrack_linux::PlatformError> for Error {
    fn from(err: batrack_linux::PlatformError) -> Self {
        Self::Platform(err.to_string())
    }
}

impl Error {
    /// Create a new platform error.
    #[must_use]
    pub fn platform(message: impl Into<String>) -> Self {
        Self::Platform(message.into())
    }

    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Create a configuration validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            message: message.into(),
        }
    }

    /// Create a unit start error.
    #[must_use]
    pub fn unit_start(kind: UnitKind, message: impl Into<String>) -> Self {
        Self::UnitStart {
            kind,
            message: message.into(),
        }
    }

    /// Create a signal decode error.
    #[must_use]
    pub fn signal_decode(message: impl Into<String>) -> Self {
        Self::SignalDecode(message.into())
    }

    /// Check if this error means a unit stopped unexpectedly.
    #[must_use]
    pub fn is_unit_died(&self) -> bool {
        matches!(self, Self::UnitDied { .. })
    }
}
