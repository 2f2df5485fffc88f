//! Error kinds shared by the engine, the directory cache and the C ABI.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MentionError {
    /// Caret (in characters) points past the end of the text.
    #[error("caret {caret} is outside the text (length {len})")]
    CaretOutOfRange { caret: usize, len: usize },

    /// Payload received at the boundary could not be decoded.
    #[error("invalid payload: {0}")]
    Validation(String),

    /// A `Directory` implementation failed to produce collaborators.
    #[error("directory lookup failed: {0}")]
    Directory(String),
}

pub type Result<T> = std::result::Result<T, MentionError>;
