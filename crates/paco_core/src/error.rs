//! Error types for the orchestration engine.

use thiserror::Error;

pub type StackResult<T> = Result<T, StackError>;

#[derive(Error, Debug)]
pub enum StackError {
    #[error(transparent)]
    Aws(#[from] paco_aws::AwsError),

    #[error(transparent)]
    Model(#[from] paco_model::ModelError),

    #[error(transparent)]
    Ref(#[from] paco_refs::RefError),

    #[error("Output {key} is not available on stack {stack}")]
    OutputNotAvailable { stack: String, key: String },

    #[error("Hook {hook} failed: {message}")]
    HookFailed { hook: String, message: String },

    #[error("Stack {stack} reached terminal failure status {status}")]
    StackOperationFailed { stack: String, status: String },

    #[error("Stack {stack} timed out during {operation}")]
    Timeout { stack: String, operation: String },

    #[error("Template for stack {stack} rejected: {message}")]
    StackValidation { stack: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("State file error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
