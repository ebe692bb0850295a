//! Analysis-stage error type.

use thiserror::Error;

/// Errors raised while assembling or writing reports.
#[derive(Debug, Error)]
pub enum Error {
    /// Artefact file could not be written.
    #[error("artefact write failed: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Analysis result type.
pub type Result<T> = std::result::Result<T, Error>;
