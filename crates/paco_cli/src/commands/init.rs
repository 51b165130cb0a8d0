//! Init commands - project layout and credentials bootstrap.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use paco_model::credentials::{DEFAULT_MFA_SESSION_EXPIRY_SECS, MAX_ASSUME_ROLE_EXPIRY_SECS};
use paco_model::{CredentialsConfig, ProjectContext, ProjectManifest};

#[derive(Args)]
pub struct InitProjectArgs {
    /// Project name, used in stack names and tags
    #[arg(long)]
    pub name: String,

    /// Force initialization even if a project already exists
    #[arg(short, long)]
    pub force: bool,
}

pub fn project(home: &Path, args: InitProjectArgs) -> Result<()> {
    let manifest_path = home.join("project.yaml");
    if manifest_path.exists() && !args.force {
        anyhow::bail!(
            "Project already initialized at {:?}. Use --force to reinitialize.",
            home
        );
    }
    info!("Initializing project {} at {:?}", args.name, home);

    for dir in ["Accounts", "NetworkEnvironments", "Resources"] {
        fs::create_dir_all(home.join(dir))?;
    }

    let manifest = ProjectManifest {
        name: args.name.clone(),
        title: None,
        active_regions: Vec::new(),
        default_account: None,
    };
    fs::write(&manifest_path, serde_yaml::to_string(&manifest)?)
        .with_context(|| format!("writing {:?}", manifest_path))?;

    let context = ProjectContext {
        project_name: args.name.clone(),
        created_at: chrono::Utc::now(),
    };
    let context_path = home.join(".project_context.yaml");
    fs::write(&context_path, serde_yaml::to_string(&context)?)
        .with_context(|| format!("writing {:?}", context_path))?;

    println!("Initialized project {} at {}", args.name, home.display());
    println!();
    println!("Next steps:");
    println!("  paco init credentials --master-account-id <id> ...");
    println!("  add accounts under Accounts/ and environments under NetworkEnvironments/");
    Ok(())
}

#[derive(Args)]
pub struct InitCredentialsArgs {
    /// Long-lived IAM access key id
    #[arg(long, env = "AWS_ACCESS_KEY_ID")]
    pub access_key_id: String,

    /// Long-lived IAM secret access key
    #[arg(long, env = "AWS_SECRET_ACCESS_KEY")]
    pub secret_access_key: String,

    /// Default region for STS calls
    #[arg(long, env = "AWS_DEFAULT_REGION")]
    pub region: String,

    /// Account id of the organization master account
    #[arg(long)]
    pub master_account_id: String,

    /// IAM username owning the access key, used to derive the MFA serial
    #[arg(long)]
    pub admin_iam_username: Option<String>,

    /// Role assumed in member accounts
    #[arg(long, default_value = "Administrator")]
    pub admin_iam_role_name: String,

    /// Explicit MFA device ARN, overriding the derived serial
    #[arg(long)]
    pub mfa_role_arn: Option<String>,

    /// Overwrite an existing credentials file
    #[arg(short, long)]
    pub force: bool,
}

pub fn credentials(home: &Path, args: InitCredentialsArgs) -> Result<()> {
    let path = home.join(".credentials.yaml");
    if path.exists() && !args.force {
        anyhow::bail!(
            "{} already exists. Use --force to overwrite.",
            path.display()
        );
    }

    let config = CredentialsConfig {
        aws_access_key_id: args.access_key_id,
        aws_secret_access_key: args.secret_access_key,
        aws_default_region: args.region,
        master_account_id: args.master_account_id,
        master_admin_iam_username: args.admin_iam_username,
        admin_iam_role_name: args.admin_iam_role_name,
        mfa_role_arn: args.mfa_role_arn,
        mfa_session_expiry_secs: DEFAULT_MFA_SESSION_EXPIRY_SECS,
        assume_role_session_expiry_secs: MAX_ASSUME_ROLE_EXPIRY_SECS,
    };
    config.save(&path)?;

    println!("Wrote {} (owner-only permissions)", path.display());
    Ok(())
}
