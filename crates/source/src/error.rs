//! Source-analysis error types.

use thiserror::Error;

/// Errors produced while interpreting compiler artefacts.
#[derive(Debug, Error)]
pub enum Error {
    /// A source-map entry contained a non-numeric position field.
    #[error("malformed source map entry #{index}: `{raw}`")]
    MalformedSrcMap {
        /// Index of the offending entry.
        index: usize,
        /// The raw entry text.
        raw: String,
    },
}

/// Source-analysis result type.
pub type Result<T> = std::result::Result<T, Error>;
