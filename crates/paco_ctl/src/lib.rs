//! # paco_ctl
//!
//! Controllers and command dispatch.
//!
//! A controller owns one domain of the project model and turns its
//! subtree into stack groups. The orchestrator parses a scope path,
//! initializes the controllers, and runs validate/provision/delete on
//! the controller owning the scope.

pub mod controller;
pub mod ctl_account;
pub mod ctl_codecommit;
pub mod ctl_netenv;
pub mod ctl_s3;
pub mod error;
pub mod orchestrator;
pub mod templates;

pub use controller::{account_name, Controller, CtlContext, InitGuard};
pub use ctl_account::AccountController;
pub use ctl_codecommit::CodeCommitController;
pub use ctl_netenv::NetEnvController;
pub use ctl_s3::S3Controller;
pub use error::{CtlError, CtlResult};
pub use orchestrator::{Command, Orchestrator, Scope};
pub use templates::{
    placeholder_body, ProducedTemplate, TemplateContext, TemplateProducer, TemplateRegistry,
};
