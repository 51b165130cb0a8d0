//! # paco_model
//!
//! The declarative project model for paco: accounts, network environments,
//! applications, global resources, and the per-project configuration files
//! (`project.yaml`, `.credentials.yaml`, `.project_context.yaml`).
//!
//! The model is loaded once, validated structurally, and frozen. Runtime
//! attributes (stack outputs, ARNs) are answered by resolvers registered
//! elsewhere; this crate only knows the declared shape of the project.

pub mod account;
pub mod credentials;
pub mod error;
pub mod models;
pub mod reader;

pub use account::{AccountContext, AccountRegistry};
pub use credentials::{write_private, CredentialsConfig};
pub use error::{ModelError, ModelResult};
pub use models::{
    Account, Application, CodeCommitRepository, CodeCommitResource, CodeCommitUser, Environment,
    EnvironmentRegion, GlobalResource, NetworkEnvironment, NodeRef, Project, ProjectContext,
    ProjectManifest, ProjectPaths, Resource, ResourceGroup, S3BucketConfig, S3Resource,
    REF_SCHEME, SUB_SCHEME,
};
pub use reader::ProjectReader;
