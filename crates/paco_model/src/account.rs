//! Account contexts.
//!
//! An [`AccountContext`] is the engine's view of one AWS account. Contexts
//! are created lazily on first request and cached for the process lifetime.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::{ModelError, ModelResult};
use crate::models::Project;

/// One AWS account as seen by the orchestration engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountContext {
    pub name: String,
    pub account_id: String,
    pub default_region: String,
    pub admin_delegate_role_name: String,
}

impl AccountContext {
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Process-wide cache of account contexts.
#[derive(Default)]
pub struct AccountRegistry {
    contexts: RwLock<HashMap<String, Arc<AccountContext>>>,
}

impl AccountRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the context for a named account.
    pub fn get(&self, project: &Project, name: &str) -> ModelResult<Arc<AccountContext>> {
        if let Some(ctx) = self.contexts.read().expect("account registry lock").get(name) {
            return Ok(ctx.clone());
        }
        let account = project
            .account(name)
            .ok_or_else(|| ModelError::AccountNotFound(name.to_string()))?;
        if account.account_id.is_empty() {
            return Err(ModelError::MissingAccountId(name.to_string()));
        }
        let ctx = Arc::new(AccountContext {
            name: account.name.clone(),
            account_id: account.account_id.clone(),
            default_region: account.region.clone(),
            admin_delegate_role_name: account.admin_delegate_role_name.clone(),
        });
        self.contexts
            .write()
            .expect("account registry lock")
            .insert(name.to_string(), ctx.clone());
        Ok(ctx)
    }
}
