//! Controller contract and shared context.
//!
//! A controller owns the stack groups for one domain of the model. At
//! project load one controller per domain is instantiated; `init` walks
//! the model subtree and composes groups, and must be idempotent so the
//! orchestrator can call it freely.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use paco_aws::{AwsClientFactory, RetryPolicy};
use paco_core::{PollConfig, StackStateStore};
use paco_model::account::{AccountContext, AccountRegistry};
use paco_model::Project;
use paco_refs::ResolverRegistry;

use crate::error::CtlResult;

/// Shared state handed to every controller.
pub struct CtlContext {
    pub project: Arc<Project>,
    pub clients: Arc<dyn AwsClientFactory>,
    pub accounts: AccountRegistry,
    pub resolvers: Arc<ResolverRegistry>,
    pub store: StackStateStore,
    pub poll: PollConfig,
    pub retry: RetryPolicy,
}

impl CtlContext {
    pub fn new(project: Arc<Project>, clients: Arc<dyn AwsClientFactory>) -> Self {
        let store = StackStateStore::new(project.paths.applied_dir())
            .with_outputs_dir(project.paths.outputs_path.clone());
        Self {
            project,
            clients,
            accounts: AccountRegistry::new(),
            resolvers: Arc::new(ResolverRegistry::new()),
            store,
            poll: PollConfig::default(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn account(&self, name: &str) -> CtlResult<Arc<AccountContext>> {
        Ok(self.accounts.get(&self.project, account_name(name))?)
    }
}

/// Accept both a bare account name and a full account reference.
pub fn account_name(raw: &str) -> &str {
    raw.strip_prefix("paco.ref accounts.").unwrap_or(raw)
}

#[async_trait]
pub trait Controller: Send + Sync {
    fn domain(&self) -> &str;

    /// Walk the model subtree and compose stack groups. Idempotent.
    async fn init(&self) -> CtlResult<()>;

    /// Scope subsequent operations to a model subtree.
    fn set_filter(&self, filter: Option<String>);

    async fn validate(&self) -> CtlResult<()>;

    async fn provision(&self) -> CtlResult<()>;

    async fn delete(&self) -> CtlResult<()>;
}

/// One-shot init guard shared by controller implementations.
#[derive(Default)]
pub struct InitGuard {
    done: AtomicBool,
}

impl InitGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// True exactly once; later calls report init already happened.
    pub fn begin(&self) -> bool {
        !self.done.swap(true, Ordering::SeqCst)
    }
}
