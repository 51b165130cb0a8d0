//! CLI command definitions.
//!
//! Every cloud-touching command takes a scope: a dotted model path such as
//! `netenv.mynet.dev.us-west-2` or `resource.s3` selecting the subtree the
//! command operates on.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

pub mod init;
pub mod ops;

/// paco - declarative AWS infrastructure orchestration
#[derive(Parser)]
#[command(name = "paco")]
#[command(version, about = "paco - declarative AWS infrastructure orchestration")]
#[command(long_about = r#"
paco provisions CloudFormation stacks from a declarative project of
accounts, network environments, and global resources.

COMMANDS:
  init project      → Create an empty project layout
  init credentials  → Write the .credentials.yaml bootstrap key
  validate          → Render and validate templates for a scope
  provision         → Create or update the stacks in a scope
  delete            → Delete the stacks in a scope

EXIT CODES:
  0 - Success
  1 - Operational error
  2 - Invalid arguments or scope
"#)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Project home directory
    #[arg(long, global = true, default_value = ".")]
    pub home: PathBuf,

    /// Never prompt for MFA tokens; fail instead
    #[arg(long, global = true)]
    pub no_prompt: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a project or its credentials
    #[command(subcommand)]
    Init(InitCommands),

    /// Validate the templates and configuration of a scope
    Validate(ScopeArgs),

    /// Create or update the stacks in a scope
    Provision(ScopeArgs),

    /// Delete the stacks in a scope
    Delete(DeleteArgs),
}

#[derive(Subcommand)]
pub enum InitCommands {
    /// Create an empty project layout
    Project(init::InitProjectArgs),

    /// Write the .credentials.yaml bootstrap key
    Credentials(init::InitCredentialsArgs),
}

#[derive(Args)]
pub struct ScopeArgs {
    /// Dotted model path, e.g. netenv.mynet.dev.us-west-2 or resource.s3
    pub scope: String,
}

#[derive(Args)]
pub struct DeleteArgs {
    /// Dotted model path, e.g. netenv.mynet.dev.us-west-2 or resource.s3
    pub scope: String,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}
