//! Error types for perfalign-core

use thiserror::Error;

/// Main error type for the perfalign-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Snapshot store or sink database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error (event source, log directory, malformed event paths)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type alias for perfalign-core
pub type Result<T> = std::result::Result<T, Error>;
