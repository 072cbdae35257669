//! Error types for log and relay backends.

use thiserror::Error;

/// Errors returned by conversation log and job relay operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store cannot be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// IO failure in a durable backend.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Encoding or decoding a record failed.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    /// A durable log file was written by a newer schema.
    #[error("unsupported schema version: {0}")]
    UnsupportedSchema(u32),
}
