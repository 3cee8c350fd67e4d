//! Error types for the HRL core library

use std::path::PathBuf;

use thiserror::Error;

/// Core error type for HRL operations
#[derive(Error, Debug)]
pub enum RLError {
    /// Environment-related errors
    #[error("Environment error: {0}")]
    Environment(String),

    /// Invalid action or action set
    #[error("Invalid action: {0}")]
    InvalidAction(String),

    /// Invalid state vector
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    /// Dimension mismatch
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Persisted matrix does not match the model it is loaded into
    #[error("Configuration mismatch in {path}: expected {expected_rows}x{expected_cols}, found {rows}x{cols}")]
    ConfigMismatch {
        path: PathBuf,
        expected_rows: usize,
        expected_cols: usize,
        rows: usize,
        cols: usize,
    },

    /// Non-numeric or ragged content in a persisted matrix
    #[error("Malformed data in {path} line {line}: {reason}")]
    MalformedData {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Other errors
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for HRL operations
pub type Result<T> = std::result::Result<T, RLError>;
