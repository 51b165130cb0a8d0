//! paco CLI - Main entry point.
//!
//! Exit codes:
//! - 0: Success
//! - 1: Operational error
//! - 2: Invalid arguments or scope

use std::process::ExitCode;

use clap::Parser;
use paco_ctl::CtlError;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;

use commands::{Cli, Commands, InitCommands};

/// CI-friendly exit codes
pub struct ExitCodes;

impl ExitCodes {
    pub const SUCCESS: u8 = 0;
    pub const GENERAL_ERROR: u8 = 1;
    pub const INVALID_ARGS: u8 = 2;
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "paco=debug" } else { "paco=info" };
    let log_result = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(
            EnvFilter::from_default_env()
                .add_directive(default_level.parse().unwrap())
                .add_directive("warn".parse().unwrap()),
        )
        .try_init();
    if log_result.is_err() {
        // Logging already initialized, continue
    }

    let result = match cli.command {
        Commands::Init(init) => match init {
            InitCommands::Project(args) => commands::init::project(&cli.home, args),
            InitCommands::Credentials(args) => commands::init::credentials(&cli.home, args),
        },
        Commands::Validate(args) => {
            commands::ops::execute(paco_ctl::Command::Validate, &cli.home, cli.no_prompt, args)
                .await
        }
        Commands::Provision(args) => {
            commands::ops::execute(paco_ctl::Command::Provision, &cli.home, cli.no_prompt, args)
                .await
        }
        Commands::Delete(args) => commands::ops::delete(&cli.home, cli.no_prompt, args).await,
    };

    match result {
        Ok(()) => ExitCode::from(ExitCodes::SUCCESS),
        Err(e) => {
            let exit_code = categorize_error(&e);
            eprintln!("Error: {:#}", e);
            ExitCode::from(exit_code)
        }
    }
}

/// Usage mistakes exit 2 so CI can tell them from operational failures.
fn categorize_error(e: &anyhow::Error) -> u8 {
    match e.downcast_ref::<CtlError>() {
        Some(CtlError::InvalidScope { .. }) | Some(CtlError::UnsupportedFeature { .. }) => {
            ExitCodes::INVALID_ARGS
        }
        _ => ExitCodes::GENERAL_ERROR,
    }
}
