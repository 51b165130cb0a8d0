//! Error types for the model crate.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors that can occur while loading or addressing the project model.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Project not found at path: {0}")]
    ProjectNotFound(PathBuf),

    #[error("Invalid config in file {path}: {message}")]
    InvalidConfig { path: PathBuf, message: String },

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("No AWS account id for account: {0}")]
    MissingAccountId(String),

    #[error("Model node not found: {0}")]
    NodeNotFound(String),

    #[error("Credentials file missing or unreadable: {0}")]
    CredentialsUnavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
