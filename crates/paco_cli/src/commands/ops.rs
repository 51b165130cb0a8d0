//! Cloud-touching commands: validate, provision, delete.

use std::io::{BufRead, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use paco_aws::{CredentialBroker, LiveClients, LiveSts, MfaPrompt, NoPrompt, StdinPrompt};
use paco_ctl::{Command, CtlContext, Orchestrator};
use paco_model::{CredentialsConfig, ProjectReader};

use super::{DeleteArgs, ScopeArgs};

/// Load the project and wire the live credential chain.
fn orchestrator(home: &Path, no_prompt: bool) -> Result<Orchestrator> {
    let project = ProjectReader::load(home)
        .with_context(|| format!("loading project at {}", home.display()))?;
    let config = CredentialsConfig::load(&project.paths.credentials_path)?;
    let prompt: Arc<dyn MfaPrompt> = if no_prompt {
        Arc::new(NoPrompt)
    } else {
        Arc::new(StdinPrompt)
    };
    let broker = CredentialBroker::new(
        config,
        project.paths.credentials_cache_dir(),
        Arc::new(LiveSts),
        prompt,
    );
    let clients = Arc::new(LiveClients::new(Arc::new(broker)));
    let ctx = Arc::new(CtlContext::new(Arc::new(project), clients));
    Ok(Orchestrator::new(ctx))
}

pub async fn execute(command: Command, home: &Path, no_prompt: bool, args: ScopeArgs) -> Result<()> {
    let orchestrator = orchestrator(home, no_prompt)?;
    orchestrator.run(command, &args.scope).await?;
    info!("{} {} complete", command, args.scope);
    Ok(())
}

pub async fn delete(home: &Path, no_prompt: bool, args: DeleteArgs) -> Result<()> {
    if !args.yes && !confirm(&format!("Delete all stacks in scope '{}'?", args.scope))? {
        println!("Aborted.");
        return Ok(());
    }
    let orchestrator = orchestrator(home, no_prompt)?;
    orchestrator.run(Command::Delete, &args.scope).await?;
    info!("delete {} complete", args.scope);
    Ok(())
}

fn confirm(question: &str) -> Result<bool> {
    print!("{} [y/N] ", question);
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    let answer = line.trim().to_ascii_lowercase();
    Ok(answer == "y" || answer == "yes")
}
