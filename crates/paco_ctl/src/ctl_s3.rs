//! Controller for globally managed S3 buckets.
//!
//! Each bucket in `Resources/s3.yaml` becomes one stack. A pre-delete hook
//! empties the bucket first, since CloudFormation refuses to delete a
//! non-empty bucket. The controller answers `resource.s3.buckets.*`
//! references with computed names and ARNs.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{debug, info};

use paco_core::{
    HookAction, HookFn, HookTiming, StackBuilder, StackFlags, StackGroup, StackHooks,
    StackResult, StackTemplate,
};
use paco_model::account::AccountContext;
use paco_model::{GlobalResource, S3BucketConfig};
use paco_refs::{RefError, RefResolver, RefResult, RefValue, Reference};
use paco_aws::AwsClientFactory;

use crate::controller::{account_name, Controller, CtlContext, InitGuard};
use crate::error::{CtlError, CtlResult};
use crate::templates::global_bucket_body;

const DOMAIN: &str = "resource.s3";

/// Physical bucket names per model path, shared with the resolver.
type BucketNames = Arc<Mutex<BTreeMap<String, String>>>;

pub struct S3Controller {
    ctx: Arc<CtlContext>,
    init: InitGuard,
    group: Arc<StackGroup>,
    bucket_names: BucketNames,
}

impl S3Controller {
    pub fn new(ctx: Arc<CtlContext>) -> Arc<Self> {
        let state_path = ctx.project.paths.build_path.join("s3-group.yaml");
        Arc::new(Self {
            ctx,
            init: InitGuard::new(),
            group: Arc::new(StackGroup::new("s3").with_state_path(state_path)),
            bucket_names: Arc::new(Mutex::new(BTreeMap::new())),
        })
    }

    /// Deterministic physical name: explicit override or derived from
    /// project, bucket key, and account.
    fn bucket_name(&self, key: &str, config: &S3BucketConfig) -> String {
        match &config.bucket_name {
            Some(explicit) => explicit.clone(),
            None => sanitize_bucket_name(&format!(
                "{}-{}-{}",
                self.ctx.project.name(),
                key,
                account_name(&config.account)
            )),
        }
    }

    /// Register one bucket. Registering the same bucket twice is an error
    /// so duplicate model entries surface instead of silently merging.
    fn add_bucket(&self, key: &str, config: &S3BucketConfig) -> CtlResult<()> {
        let path = format!("{}.buckets.{}", DOMAIN, key);
        let bucket_name = self.bucket_name(key, config);
        {
            let mut names = self.bucket_names.lock().expect("bucket names lock");
            if names.contains_key(&path) {
                return Err(CtlError::BucketExists(key.to_string()));
            }
            names.insert(path.clone(), bucket_name.clone());
        }

        if config.external_resource {
            debug!("Bucket {} is external, no stack created", key);
            return Ok(());
        }
        if !config.enabled {
            debug!("Bucket {} is disabled", key);
            return Ok(());
        }

        let account = self.ctx.account(&config.account)?;
        let deletion_policy = config.deletion_policy.as_deref().unwrap_or("Delete");
        let template =
            StackTemplate::new(global_bucket_body(&bucket_name, deletion_policy));

        let mut hooks = StackHooks::new();
        hooks.add(
            "empty-bucket",
            HookAction::Delete,
            HookTiming::Pre,
            Arc::new(EmptyBucketHook {
                clients: self.ctx.clients.clone(),
                account: account.clone(),
                region: config.region.clone(),
                bucket: bucket_name,
            }),
            None,
        );

        let stack = StackBuilder::new(
            account,
            config.region.clone(),
            path,
            template,
            self.ctx.clients.clone(),
            self.ctx.store.clone(),
        )
        .flags(StackFlags {
            change_protected: config.change_protected,
            ..StackFlags::default()
        })
        .hooks(hooks)
        .poll(self.ctx.poll.clone())
        .retry(self.ctx.retry.clone())
        .build();
        self.group.add_stack(stack);
        Ok(())
    }
}

#[async_trait]
impl Controller for S3Controller {
    fn domain(&self) -> &str {
        DOMAIN
    }

    async fn init(&self) -> CtlResult<()> {
        if !self.init.begin() {
            return Ok(());
        }
        if let Some(GlobalResource::S3(s3)) = self.ctx.project.resources.get("s3") {
            for (key, config) in &s3.buckets {
                self.add_bucket(key, config)?;
            }
        }
        self.ctx.resolvers.register(
            DOMAIN,
            Arc::new(S3Resolver {
                bucket_names: self.bucket_names.clone(),
            }),
        );
        info!("S3 controller manages {} buckets", self.bucket_names.lock().expect("bucket names lock").len());
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

struct EmptyBucketHook {
    clients: Arc<dyn AwsClientFactory>,
    account: Arc<AccountContext>,
    region: String,
    bucket: String,
}

#[async_trait]
impl HookFn for EmptyBucketHook {
    async fn run(&self) -> StackResult<()> {
        let s3 = self.clients.s3(&self.account, &self.region).await?;
        if s3.bucket_exists(&self.bucket).await? {
            info!("Emptying bucket {} before stack delete", self.bucket);
            s3.empty_bucket(&self.bucket).await?;
        }
        Ok(())
    }
}

/// Answers `resource.s3.buckets.<key>.{name,arn,url}`.
struct S3Resolver {
    bucket_names: BucketNames,
}

#[async_trait]
impl RefResolver for S3Resolver {
    async fn resolve_ref(&self, reference: &Reference) -> RefResult<RefValue> {
        let path = reference.ref_path();
        let names = self.bucket_names.lock().expect("bucket names lock");

        if let Some(bucket_name) = names.get(path.as_str()) {
            return Ok(RefValue::Scalar(bucket_name.clone()));
        }
        let (bucket_path, attribute) = match path.rsplit_once('.') {
            Some(split) => split,
            None => {
                return Err(RefError::UnresolvedRef {
                    reference: reference.raw().to_string(),
                    segment: reference.last_part().to_string(),
                })
            }
        };
        let Some(bucket_name) = names.get(bucket_path) else {
            return Err(RefError::UnresolvedRef {
                reference: reference.raw().to_string(),
                segment: reference.last_part().to_string(),
            });
        };
        match attribute {
            "name" => Ok(RefValue::Scalar(bucket_name.clone())),
            "arn" => Ok(RefValue::Scalar(format!("arn:aws:s3:::{}", bucket_name))),
            "url" => Ok(RefValue::Scalar(format!("s3://{}", bucket_name))),
            other => Err(RefError::RefTypeMismatch {
                reference: reference.raw().to_string(),
                attribute: other.to_string(),
            }),
        }
    }
}

/// S3 bucket names are lowercase alphanumerics and dashes.
fn sanitize_bucket_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_alphanumeric() || c == '-' {
            out.push(c);
        }
    }
    out.trim_matches('-').to_string()
}
