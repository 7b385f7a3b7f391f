//! Crate-level errors
//!
//! Field and submission failures are values, not errors. These only cover
//! misuse of a session and broken form declarations.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FormError {
    #[error("Form not found: {0}")]
    FormNotFound(String),

    #[error("Unknown field: {0}")]
    UnknownField(String),

    #[error("Form version {0} requires engine >= {1}, current is {2}")]
    EngineVersionMismatch(String, String, String),

    #[error("Invalid version: {0}")]
    InvalidVersion(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
