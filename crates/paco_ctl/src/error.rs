//! Error types for controllers and the orchestrator.

use thiserror::Error;

pub type CtlResult<T> = Result<T, CtlError>;

#[derive(Error, Debug)]
pub enum CtlError {
    #[error("Invalid scope '{scope}': {message}")]
    InvalidScope { scope: String, message: String },

    #[error("Unsupported feature at {path}: {feature}")]
    UnsupportedFeature { path: String, feature: String },

    #[error("Bucket {0} is already registered")]
    BucketExists(String),

    #[error(transparent)]
    Stack(#[from] paco_core::StackError),

    #[error(transparent)]
    Model(#[from] paco_model::ModelError),

    #[error(transparent)]
    Ref(#[from] paco_refs::RefError),

    #[error(transparent)]
    Aws(#[from] paco_aws::AwsError),
}
