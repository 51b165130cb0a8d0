//! Error types for reference resolution.

use thiserror::Error;

/// Result type alias for reference operations.
pub type RefResult<T> = Result<T, RefError>;

/// Errors that can occur while parsing or resolving references.
#[derive(Error, Debug)]
pub enum RefError {
    #[error("Malformed reference: {0}")]
    MalformedRef(String),

    #[error("Unresolved reference: {reference} (missing segment: {segment})")]
    UnresolvedRef { reference: String, segment: String },

    #[error("Reference type mismatch: attribute '{attribute}' not available on {reference}")]
    RefTypeMismatch {
        reference: String,
        attribute: String,
    },

    #[error("Circular reference detected while resolving: {0}")]
    CircularRef(String),

    #[error("Stack output not available for {stack}: {key}")]
    OutputNotAvailable { stack: String, key: String },
}
