//! Controller for the `accounts` subtree.
//!
//! Accounts are declared, not provisioned: creating AWS accounts is out of
//! scope, so `provision` only proves each account reachable by building a
//! client for it, which exercises the whole credential chain.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

use crate::controller::{Controller, CtlContext, InitGuard};
use crate::error::{CtlError, CtlResult};

const DOMAIN: &str = "accounts";

pub struct AccountController {
    ctx: Arc<CtlContext>,
    init: InitGuard,
}

impl AccountController {
    pub fn new(ctx: Arc<CtlContext>) -> Arc<Self> {
        Arc::new(Self {
            ctx,
            init: InitGuard::new(),
        })
    }
}

#[async_trait]
impl Controller for AccountController {
    fn domain(&self) -> &str {
        DOMAIN
    }

    async fn init(&self) -> CtlResult<()> {
        if !self.init.begin() {
            return Ok(());
        }
        // Warm the registry so misconfigured accounts fail here rather
        // than mid-provision.
        for name in self.ctx.project.accounts.keys() {
            self.ctx.account(name)?;
        }
        info!("Loaded {} accounts", self.ctx.project.accounts.len());
        Ok(())
    }

    fn set_filter(&self, _filter: Option<String>) {}

    async fn validate(&self) -> CtlResult<()> {
        for (name, account) in &self.ctx.project.accounts {
            if account.account_id.len() != 12 || !account.account_id.bytes().all(|b| b.is_ascii_digit())
            {
                return Err(CtlError::InvalidScope {
                    scope: format!("{}.{}", DOMAIN, name),
                    message: format!("malformed account id '{}'", account.account_id),
                });
            }
        }
        Ok(())
    }

    async fn provision(&self) -> CtlResult<()> {
        for name in self.ctx.project.accounts.keys() {
            let account = self.ctx.account(name)?;
            debug!("Checking credentials for account {}", name);
            self.ctx
                .clients
                .cfn(&account, &account.default_region)
                .await?;
        }
        Ok(())
    }

    async fn delete(&self) -> CtlResult<()> {
        Err(CtlError::UnsupportedFeature {
            path: DOMAIN.to_string(),
            feature: "account deletion".to_string(),
        })
    }
}
