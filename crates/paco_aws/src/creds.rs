//! Two-tier credential broker.
//!
//! Tier one is an MFA-derived session token with a long TTL (default 12 h),
//! bootstrapped from the access key in `.credentials.yaml`. Tier two is a
//! short-lived assume-role session (≤ 1 h) into each target account's
//! delegate role. Both tiers are persisted as owner-only JSON files under
//! the project credential cache so repeated runs reuse them without
//! prompting.
//!
//! Acquisition is serialized process-wide: an MFA prompt suspends every
//! other account's acquisition until answered.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use paco_model::account::AccountContext;
use paco_model::credentials::{write_private, CredentialsConfig};

use crate::error::{AwsError, AwsResult};
use crate::sts::{AccessKey, MfaPrompt, StsApi, TempCredentials};

pub struct CredentialBroker {
    config: CredentialsConfig,
    cache_dir: PathBuf,
    sts: Arc<dyn StsApi>,
    prompt: Arc<dyn MfaPrompt>,
    acquire: AsyncMutex<()>,
    cache: StdMutex<HashMap<String, TempCredentials>>,
}

impl CredentialBroker {
    pub fn new(
        config: CredentialsConfig,
        cache_dir: PathBuf,
        sts: Arc<dyn StsApi>,
        prompt: Arc<dyn MfaPrompt>,
    ) -> Self {
        Self {
            config,
            cache_dir,
            sts,
            prompt,
            acquire: AsyncMutex::new(()),
            cache: StdMutex::new(HashMap::new()),
        }
    }

    fn session_path(&self) -> PathBuf {
        self.cache_dir.join("master-session.json")
    }

    fn role_path(&self, account_name: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.json", account_name))
    }

    fn load_file(path: &PathBuf) -> AwsResult<Option<TempCredentials>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path)?;
        match serde_json::from_str::<TempCredentials>(&content) {
            Ok(creds) => Ok(Some(creds)),
            Err(e) => {
                warn!("Discarding unreadable credential file {:?}: {}", path, e);
                Ok(None)
            }
        }
    }

    fn store_file(path: &PathBuf, creds: &TempCredentials) -> AwsResult<()> {
        let content = serde_json::to_vec_pretty(creds)?;
        write_private(path, &content)?;
        Ok(())
    }

    /// Assume-role credentials for one account, acquiring or rotating each
    /// tier as needed. Serialized process-wide.
    pub async fn credentials_for(&self, account: &AccountContext) -> AwsResult<TempCredentials> {
        let _guard = self.acquire.lock().await;

        if let Some(creds) = self.cached(&account.name) {
            if !creds.is_expired() {
                return Ok(creds);
            }
        }

        let role_path = self.role_path(&account.name);
        if let Some(creds) = Self::load_file(&role_path)? {
            if !creds.is_expired() && self.identity_matches(&creds, account).await {
                self.remember(&account.name, &creds);
                return Ok(creds);
            }
            debug!("Assume-role credentials for {} are stale", account.name);
        }

        let session = self.session_credentials().await?;
        let creds = self.assume_into(&session, account).await?;
        Self::store_file(&role_path, &creds)?;
        self.remember(&account.name, &creds);
        Ok(creds)
    }

    /// Drop cached credentials for an account, forcing re-acquisition. Used
    /// after a service call fails with an expired security token.
    pub fn invalidate(&self, account_name: &str) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.remove(account_name);
        }
        let path = self.role_path(account_name);
        if path.exists() {
            if let Err(e) = fs::remove_file(&path) {
                warn!("Could not remove stale credential file {:?}: {}", path, e);
            }
        }
    }

    fn cached(&self, account_name: &str) -> Option<TempCredentials> {
        self.cache.lock().ok()?.get(account_name).cloned()
    }

    fn remember(&self, account_name: &str, creds: &TempCredentials) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(account_name.to_string(), creds.clone());
        }
    }

    async fn identity_matches(&self, creds: &TempCredentials, account: &AccountContext) -> bool {
        match self
            .sts
            .get_caller_identity(creds, &self.config.aws_default_region)
            .await
        {
            Ok(identity) => {
                if identity.account == account.account_id {
                    true
                } else {
                    warn!(
                        "Cached credentials for {} belong to account {}, discarding",
                        account.name, identity.account
                    );
                    false
                }
            }
            Err(e) => {
                debug!("Identity check for {} failed: {}", account.name, e);
                false
            }
        }
    }

    /// Tier one: the MFA session. Only an actual prompt writes the session
    /// file, so unattended runs never touch it.
    async fn session_credentials(&self) -> AwsResult<TempCredentials> {
        let path = self.session_path();
        if let Some(creds) = Self::load_file(&path)? {
            if !creds.is_expired() {
                return Ok(creds);
            }
            debug!("MFA session credentials expired");
        }

        let mfa_serial = self.config.mfa_role_arn.as_deref().ok_or_else(|| {
            AwsError::CredentialsUnavailable(
                "mfa_role_arn is not configured in .credentials.yaml".to_string(),
            )
        })?;
        let token_code = self.prompt.prompt(mfa_serial)?;
        let key = AccessKey {
            access_key_id: self.config.aws_access_key_id.clone(),
            secret_access_key: self.config.aws_secret_access_key.clone(),
        };
        let creds = self
            .sts
            .get_session_token(
                &key,
                &self.config.aws_default_region,
                mfa_serial,
                &token_code,
                self.config.mfa_session_expiry_secs,
            )
            .await?;
        Self::store_file(&path, &creds)?;
        info!("Acquired new MFA session, expires {}", creds.expiration);
        Ok(creds)
    }

    /// Tier two: assume the account's delegate role, falling back to the
    /// organization admin role when the delegate is not assumable.
    async fn assume_into(
        &self,
        session: &TempCredentials,
        account: &AccountContext,
    ) -> AwsResult<TempCredentials> {
        let role_arn = self
            .config
            .admin_role_arn(&account.account_id, &account.admin_delegate_role_name);
        let session_name = format!("paco-{}", account.name);
        let region = &self.config.aws_default_region;
        let ttl = self.config.assume_role_session_expiry_secs;

        match self
            .sts
            .assume_role(session, region, &role_arn, &session_name, ttl)
            .await
        {
            Ok(creds) => Ok(creds),
            Err(AwsError::CredentialsUnavailable(message)) => {
                let fallback = self.config.org_admin_role_arn();
                warn!(
                    "Cannot assume {} ({}), falling back to {}",
                    role_arn, message, fallback
                );
                self.sts
                    .assume_role(session, region, &fallback, &session_name, ttl)
                    .await
            }
            Err(other) => Err(other),
        }
    }
}
