//! Collector-chain error types: sink failures and summary-reporting
//! failures.

use thiserror::Error;

/// Result type alias using [`CollectorError`].
pub type Result<T> = std::result::Result<T, CollectorError>;

/// Errors a terminal sink can report to the pipeline that owns it.
#[derive(Debug, Error)]
pub enum CollectorError {
    /// The local archive directory could not be created or is not
    /// writable.
    #[error("local archive directory {path}: {message}")]
    LocalArchive {
        /// The directory that failed the writability probe.
        path: std::path::PathBuf,
        /// Underlying error message.
        message: String,
    },

    /// The remote ingest endpoint rejected a trace-resolution or upload
    /// request in a way its own retry policy gave up on.
    #[error("remote ingest error: {0}")]
    RemoteIngest(String),

    /// Serialization of an exchange into its sink-specific representation
    /// failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Underlying I/O failure writing to the local archive.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
