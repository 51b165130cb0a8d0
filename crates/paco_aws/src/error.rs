//! Error types for AWS operations.

use thiserror::Error;

/// Result type alias for AWS operations.
pub type AwsResult<T> = Result<T, AwsError>;

/// Errors surfaced by the credential broker and service clients.
#[derive(Error, Debug)]
pub enum AwsError {
    #[error("Credentials unavailable: {0}")]
    CredentialsUnavailable(String),

    #[error("Stack does not exist: {0}")]
    StackNotFound(String),

    #[error("No updates are to be performed")]
    NoUpdatesToPerform,

    #[error("Request throttled: {0}")]
    Throttled(String),

    #[error("Security token expired")]
    ExpiredToken,

    #[error("Template validation rejected: {0}")]
    TemplateValidation(String),

    #[error("AWS service error {code}: {message}")]
    Service { code: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Credential cache parse error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AwsError {
    /// Transient errors are retried with bounded backoff.
    pub fn is_transient(&self) -> bool {
        match self {
            AwsError::Throttled(_) => true,
            AwsError::Service { code, .. } => {
                code == "InternalFailure"
                    || code == "ServiceUnavailable"
                    || code == "RequestTimeout"
                    || code.starts_with("5")
            }
            _ => false,
        }
    }
}
