//! Unified error handling for thermalctl
//!
//! A single error type shared by the control engine and the daemon.
//! Per-sensor faults are NOT errors: they live in each sensor's fault list.
//! `ThermalError` is reserved for configuration, I/O plumbing and actuation.

use std::io;
use std::path::PathBuf;

/// Result type alias using ThermalError
pub type Result<T> = std::result::Result<T, ThermalError>;

/// Unified error type for all thermalctl operations
#[derive(thiserror::Error, Debug)]
pub enum ThermalError {
    // ============================================================================
    // I/O and File System Errors
    // ============================================================================
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: io::Error,
    },

    #[error("Failed to write file {path}: {source}")]
    FileWrite {
        path: PathBuf,
        source: io::Error,
    },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to parse {path}: {reason}")]
    Parse {
        path: PathBuf,
        reason: String,
    },

    // ============================================================================
    // Configuration Errors
    // ============================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Invalid configuration value for {field}: {reason}")]
    InvalidConfig {
        field: String,
        reason: String,
    },

    #[error("Unknown sensor type '{tag}' for sensor {sensor}")]
    UnknownSensorType {
        sensor: String,
        tag: String,
    },

    #[error("Invalid pattern '{pattern}': {reason}")]
    InvalidPattern {
        pattern: String,
        reason: String,
    },

    #[error("Platform not supported: {0}")]
    UnsupportedPlatform(String),

    // ============================================================================
    // Actuation Errors
    // ============================================================================
    #[error("Failed to write PWM to {target}: {reason}")]
    PwmWrite {
        target: String,
        reason: String,
    },

    #[error("Failed to read PWM from {target}: {reason}")]
    PwmRead {
        target: String,
        reason: String,
    },

    #[error("PWM read-back mismatch: wrote {expected}%, read {actual}%")]
    PwmMismatch {
        expected: u8,
        actual: u8,
    },

    #[error("Register access failed: {0}")]
    RegisterAccess(String),

    // ============================================================================
    // Generic Errors
    // ============================================================================
    #[error("{0}")]
    Generic(String),

    #[error("Operation not supported: {0}")]
    NotSupported(String),
}

impl ThermalError {
    /// Create a generic error from a string
    pub fn generic(msg: impl Into<String>) -> Self {
        Self::Generic(msg.into())
    }

    /// Create a config error from a string
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a parse error for a file
    pub fn parse(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid configuration error
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// True for errors caused by a missing file (absent hardware)
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::FileNotFound(_) => true,
            Self::FileRead { source, .. } => source.kind() == io::ErrorKind::NotFound,
            Self::Io(e) => e.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

// Allow converting from String to ThermalError
impl From<String> for ThermalError {
    fn from(s: String) -> Self {
        Self::Generic(s)
    }
}

// Allow converting from &str to ThermalError
impl From<&str> for ThermalError {
    fn from(s: &str) -> Self {
        Self::Generic(s.to_string())
    }
}
