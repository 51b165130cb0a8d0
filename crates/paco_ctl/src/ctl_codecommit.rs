//! Controller for CodeCommit repository groups.
//!
//! Each repository becomes one stack. A post-create/post-update hook
//! uploads the configured users' SSH public keys to IAM; the hook is
//! keyed on the hash of the concatenated key material, so re-runs with
//! unchanged keys skip the upload and a single changed key re-syncs.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use paco_aws::AwsClientFactory;
use paco_core::{
    HookAction, HookCacheFn, HookFn, HookTiming, StackBuilder, StackGroup, StackHooks,
    StackResult, StackTemplate,
};
use paco_model::account::AccountContext;
use paco_model::{CodeCommitRepository, GlobalResource};
use paco_refs::{RefError, RefResolver, RefResult, RefValue, Reference};

use crate::controller::{Controller, CtlContext, InitGuard};
use crate::error::CtlResult;
use crate::templates::codecommit_repository_body;

const DOMAIN: &str = "resource.codecommit";

#[derive(Clone)]
struct RepoInfo {
    repository_name: String,
    account_id: String,
    region: String,
}

type RepoInfos = Arc<Mutex<BTreeMap<String, RepoInfo>>>;

pub struct CodeCommitController {
    ctx: Arc<CtlContext>,
    init: InitGuard,
    group: Arc<StackGroup>,
    repos: RepoInfos,
}

impl CodeCommitController {
    pub fn new(ctx: Arc<CtlContext>) -> Arc<Self> {
        let state_path = ctx.project.paths.build_path.join("codecommit-group.yaml");
        Arc::new(Self {
            ctx,
            init: InitGuard::new(),
            group: Arc::new(StackGroup::new("codecommit").with_state_path(state_path)),
            repos: Arc::new(Mutex::new(BTreeMap::new())),
        })
    }

    fn add_repository(
        &self,
        group_name: &str,
        repo_key: &str,
        repo: &CodeCommitRepository,
    ) -> CtlResult<()> {
        if !repo.enabled {
            debug!("Repository {}.{} is disabled", group_name, repo_key);
            return Ok(());
        }
        let path = format!("{}.{}.{}", DOMAIN, group_name, repo_key);
        let repository_name = repo
            .repository_name
            .clone()
            .unwrap_or_else(|| repo_key.to_string());
        let account = self.ctx.account(&repo.account)?;
        self.repos.lock().expect("repo info lock").insert(
            path.clone(),
            RepoInfo {
                repository_name: repository_name.clone(),
                account_id: account.account_id.clone(),
                region: repo.region.clone(),
            },
        );

        let template = StackTemplate::new(codecommit_repository_body(
            &repository_name,
            repo.description.as_deref(),
        ));

        // SSH key sync runs after create and after update, keyed on the
        // concatenated key bodies.
        let ssh_keys: Vec<(String, String)> = repo
            .users
            .iter()
            .filter_map(|(name, user)| {
                let username = user.username.clone().unwrap_or_else(|| name.clone());
                user.public_ssh_key
                    .clone()
                    .map(|key| (username, key))
            })
            .collect();
        let mut hooks = StackHooks::new();
        if !ssh_keys.is_empty() {
            let hook = Arc::new(SshKeySyncHook {
                clients: self.ctx.clients.clone(),
                account: account.clone(),
                keys: ssh_keys.clone(),
            });
            let cache = Arc::new(SshKeyCache { keys: ssh_keys });
            for action in [HookAction::Create, HookAction::Update] {
                hooks.add(
                    "ssh-key-sync",
                    action,
                    HookTiming::Post,
                    hook.clone(),
                    Some(cache.clone()),
                );
            }
        }

        let stack = StackBuilder::new(
            account,
            repo.region.clone(),
            path,
            template,
            self.ctx.clients.clone(),
            self.ctx.store.clone(),
        )
        .hooks(hooks)
        .poll(self.ctx.poll.clone())
        .retry(self.ctx.retry.clone())
        .build();
        self.group.add_stack(stack);
        Ok(())
    }
}

#[async_trait]
impl Controller for CodeCommitController {
    fn domain(&self) -> &str {
        DOMAIN
    }

    async fn init(&self) -> CtlResult<()> {
        if !self.init.begin() {
            return Ok(());
        }
        if let Some(GlobalResource::CodeCommit(cc)) = self.ctx.project.resources.get("codecommit")
        {
            for (group_name, repos) in &cc.repository_groups {
                for (repo_key, repo) in repos {
                    self.add_repository(group_name, repo_key, repo)?;
                }
            }
        }
        self.ctx.resolvers.register(
            DOMAIN,
            Arc::new(CodeCommitResolver {
                repos: self.repos.clone(),
            }),
        );
        info!(
            "CodeCommit controller manages {} repositories",
            self.repos.lock().expect("repo info lock").len()
        );
        Ok(())
    }

    fn set_filter(&self, filter: Option<String>) {
        self.group.set_filter(filter);
    }

    async fn validate(&self) -> CtlResult<()> {
        Ok(self.group.validate().await?)
    }

    async fn provision(&self) -> CtlResult<()> {
        Ok(self.group.provision().await?)
    }

    async fn delete(&self) -> CtlResult<()> {
        Ok(self.group.delete().await?)
    }
}

struct SshKeySyncHook {
    clients: Arc<dyn AwsClientFactory>,
    account: Arc<AccountContext>,
    keys: Vec<(String, String)>,
}

#[async_trait]
impl HookFn for SshKeySyncHook {
    async fn run(&self) -> StackResult<()> {
        let iam = self.clients.iam(&self.account).await?;
        for (username, key) in &self.keys {
            let existing = iam.list_ssh_public_keys(username).await?;
            if existing.iter().any(|k| k == key) {
                debug!("SSH key for {} already uploaded", username);
                continue;
            }
            info!("Uploading SSH public key for {}", username);
            iam.upload_ssh_public_key(username, key).await?;
        }
        Ok(())
    }
}

struct SshKeyCache {
    keys: Vec<(String, String)>,
}

#[async_trait]
impl HookCacheFn for SshKeyCache {
    async fn cache_id(&self) -> StackResult<String> {
        let mut hasher = Sha256::new();
        for (username, key) in &self.keys {
            hasher.update(username.as_bytes());
            hasher.update(key.as_bytes());
        }
        Ok(hex::encode(hasher.finalize()))
    }
}

/// Answers `resource.codecommit.<group>.<repo>.{name,arn}`.
struct CodeCommitResolver {
    repos: RepoInfos,
}

#[async_trait]
impl RefResolver for CodeCommitResolver {
    async fn resolve_ref(&self, reference: &Reference) -> RefResult<RefValue> {
        let path = reference.ref_path();
        let repos = self.repos.lock().expect("repo info lock");
        if let Some(info) = repos.get(path.as_str()) {
            return Ok(RefValue::Scalar(info.repository_name.clone()));
        }
        let Some((repo_path, attribute)) = path.rsplit_once('.') else {
            return Err(RefError::UnresolvedRef {
                reference: reference.raw().to_string(),
                segment: reference.last_part().to_string(),
            });
        };
        let Some(info) = repos.get(repo_path) else {
            return Err(RefError::UnresolvedRef {
                reference: reference.raw().to_string(),
                segment: reference.last_part().to_string(),
            });
        };
        match attribute {
            "name" => Ok(RefValue::Scalar(info.repository_name.clone())),
            "arn" => Ok(RefValue::Scalar(format!(
                "arn:aws:codecommit:{}:{}:{}",
                info.region, info.account_id, info.repository_name
            ))),
            other => Err(RefError::RefTypeMismatch {
                reference: reference.raw().to_string(),
                attribute: other.to_string(),
            }),
        }
    }
}
