//! One unit of CloudFormation reconciliation.
//!
//! A [`Stack`] compares its declared template and parameters against what
//! is deployed and issues at most one mutating call per run. Provisioning
//! is split into a submit phase ([`Stack::provision`]) and a wait phase
//! ([`Stack::wait_for_complete`]) so a group can submit several stacks
//! before blocking on any of them.
//!
//! Declared identity never changes after construction; only the transient
//! deployed status and the cached outputs are interior-mutable.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use paco_aws::{
    with_backoff, AwsClientFactory, AwsError, AwsResult, CfnApi, CfnTag, DeployedStatus,
    RetryPolicy, StackDescription, StackLaunch,
};
use paco_model::account::AccountContext;
use paco_refs::{OutputSource, RefError, RefResult};

use crate::error::{StackError, StackResult};
use crate::hooks::{cache_key, HookAction, HookTiming, StackHooks};
use crate::names;
use crate::outputs::{StackStateRecord, StackStateStore};
use crate::param::{resolve_parameters, Parameter};
use crate::template::{diff_summary, StackTemplate};

/// The tag identifying a stack as engine-managed; always synthesized from
/// the stack's identity and never taken from user configuration.
pub const STACK_NAME_TAG: &str = "Paco-Stack-Name";

#[derive(Debug, Clone)]
pub struct StackFlags {
    pub change_protected: bool,
    pub enabled: bool,
    pub wait_for_delete: bool,
    pub termination_protection: bool,
}

impl Default for StackFlags {
    fn default() -> Self {
        Self {
            change_protected: false,
            enabled: true,
            wait_for_delete: true,
            termination_protection: false,
        }
    }
}

/// Polling cadence and per-stack timeouts.
#[derive(Debug, Clone)]
pub struct PollConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub provision_timeout: Duration,
    pub delete_timeout: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(30),
            provision_timeout: Duration::from_secs(3600),
            delete_timeout: Duration::from_secs(1800),
        }
    }
}

impl PollConfig {
    /// Zero delays for tests.
    pub fn immediate() -> Self {
        Self {
            initial_delay: Duration::from_millis(0),
            max_delay: Duration::from_millis(0),
            provision_timeout: Duration::from_secs(5),
            delete_timeout: Duration::from_secs(5),
        }
    }

    fn next_delay(&self, current: Duration) -> Duration {
        (current * 2).min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
struct StackState {
    deployed_status: DeployedStatus,
    outputs: BTreeMap<String, String>,
    cached: bool,
    stack_id: Option<String>,
    in_flight: Option<HookAction>,
}

impl Default for StackState {
    fn default() -> Self {
        Self {
            deployed_status: DeployedStatus::DoesNotExist,
            outputs: BTreeMap::new(),
            cached: false,
            stack_id: None,
            in_flight: None,
        }
    }
}

pub struct Stack {
    name: String,
    account: Arc<AccountContext>,
    region: String,
    resource_path: String,
    template: StackTemplate,
    parameters: Vec<Parameter>,
    tags: BTreeMap<String, String>,
    hooks: StackHooks,
    flags: StackFlags,
    clients: Arc<dyn AwsClientFactory>,
    store: StackStateStore,
    poll: PollConfig,
    retry: RetryPolicy,
    state: RwLock<StackState>,
}

pub struct StackBuilder {
    name: String,
    account: Arc<AccountContext>,
    region: String,
    resource_path: String,
    template: StackTemplate,
    parameters: Vec<Parameter>,
    tags: BTreeMap<String, String>,
    hooks: StackHooks,
    flags: StackFlags,
    clients: Arc<dyn AwsClientFactory>,
    store: StackStateStore,
    poll: PollConfig,
    retry: RetryPolicy,
}

impl StackBuilder {
    pub fn new(
        account: Arc<AccountContext>,
        region: impl Into<String>,
        resource_path: impl Into<String>,
        template: StackTemplate,
        clients: Arc<dyn AwsClientFactory>,
        store: StackStateStore,
    ) -> Self {
        let resource_path = resource_path.into();
        let segments: Vec<&str> = resource_path.split('.').collect();
        Self {
            name: names::stack_name(&segments),
            account,
            region: region.into(),
            resource_path,
            template,
            parameters: Vec::new(),
            tags: BTreeMap::new(),
            hooks: StackHooks::new(),
            flags: StackFlags::default(),
            clients,
            store,
            poll: PollConfig::default(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn parameter(mut self, parameter: Parameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn hooks(mut self, hooks: StackHooks) -> Self {
        self.hooks.merge(hooks);
        self
    }

    pub fn flags(mut self, flags: StackFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn poll(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn build(mut self) -> Arc<Stack> {
        // The identity tag wins over any user-supplied value.
        self.tags
            .insert(STACK_NAME_TAG.to_string(), self.name.clone());
        Arc::new(Stack {
            name: self.name,
            account: self.account,
            region: self.region,
            resource_path: self.resource_path,
            template: self.template,
            parameters: self.parameters,
            tags: self.tags,
            hooks: self.hooks,
            flags: self.flags,
            clients: self.clients,
            store: self.store,
            poll: self.poll,
            retry: self.retry,
            state: RwLock::new(StackState::default()),
        })
    }
}

impl Stack {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn account(&self) -> &Arc<AccountContext> {
        &self.account
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn resource_path(&self) -> &str {
        &self.resource_path
    }

    pub fn is_enabled(&self) -> bool {
        self.flags.enabled
    }

    pub fn is_change_protected(&self) -> bool {
        self.flags.change_protected
    }

    pub fn deployed_status(&self) -> DeployedStatus {
        self.read_state().deployed_status
    }

    pub fn is_cached(&self) -> bool {
        self.read_state().cached
    }

    fn read_state(&self) -> StackState {
        self.state.read().expect("stack state lock").clone()
    }

    fn update_state(&self, f: impl FnOnce(&mut StackState)) {
        let mut state = self.state.write().expect("stack state lock");
        f(&mut state);
    }

    /// A deployed output value. Fails unless the stack has reached a
    /// terminal success state this run (or was loaded as unchanged).
    pub fn get_outputs_value(&self, key: &str) -> StackResult<String> {
        let state = self.read_state();
        if !state.deployed_status.is_terminal_success() && !state.cached {
            return Err(StackError::OutputNotAvailable {
                stack: self.name.clone(),
                key: key.to_string(),
            });
        }
        state
            .outputs
            .get(key)
            .cloned()
            .ok_or_else(|| StackError::OutputNotAvailable {
                stack: self.name.clone(),
                key: key.to_string(),
            })
    }

    async fn run_cfn<T, F, Fut>(&self, what: &str, f: F) -> AwsResult<T>
    where
        F: Fn(Arc<dyn CfnApi>) -> Fut,
        Fut: Future<Output = AwsResult<T>>,
    {
        let op = || async {
            let client = self.clients.cfn(&self.account, &self.region).await?;
            f(client).await
        };
        match with_backoff(what, &self.retry, op).await {
            Err(AwsError::ExpiredToken) => {
                // Rotate credentials and retry once.
                warn!("Security token expired during {} on {}", what, self.name);
                self.clients.invalidate(&self.account.name);
                let client = self.clients.cfn(&self.account, &self.region).await?;
                f(client).await
            }
            other => other,
        }
    }

    async fn describe(&self) -> StackResult<Option<StackDescription>> {
        let name = self.name.clone();
        Ok(self
            .run_cfn("DescribeStacks", |cfn| {
                let name = name.clone();
                async move { cfn.describe_stack(&name).await }
            })
            .await?)
    }

    async fn launch(&self) -> StackResult<StackLaunch> {
        let parameters = resolve_parameters(&self.parameters).await?;
        let tags = self
            .tags
            .iter()
            .map(|(k, v)| CfnTag {
                key: k.clone(),
                value: v.clone(),
            })
            .collect();
        Ok(StackLaunch {
            name: self.name.clone(),
            template_body: self.template.body().to_string(),
            parameters,
            capabilities: self.template.capabilities().to_vec(),
            tags,
            disable_rollback: false,
        })
    }

    /// `ValidateTemplate`, plus a diff report against the deployed template
    /// when one exists. Never mutates AWS state.
    pub async fn validate(&self) -> StackResult<()> {
        let body = self.template.body().to_string();
        self.run_cfn("ValidateTemplate", |cfn| {
            let body = body.clone();
            async move { cfn.validate_template(&body).await }
        })
        .await
        .map_err(|e| match e {
            AwsError::TemplateValidation(message) => StackError::StackValidation {
                stack: self.name.clone(),
                message,
            },
            other => StackError::Aws(other),
        })?;

        if self.describe().await?.is_some() {
            let name = self.name.clone();
            let deployed = self
                .run_cfn("GetTemplate", |cfn| {
                    let name = name.clone();
                    async move { cfn.get_template(&name).await }
                })
                .await?;
            let deployed_canonical = crate::template::canonicalize(&deployed);
            let declared_canonical = self.template.canonical();
            if deployed_canonical == declared_canonical {
                info!("Stack {}: no changes", self.name);
            } else {
                info!("Stack {}: template changes:", self.name);
                for line in diff_summary(&deployed_canonical, &declared_canonical) {
                    info!("  {}", line);
                }
            }
        }
        Ok(())
    }

    /// Submit phase of reconciliation. Issues at most one CreateStack or
    /// UpdateStack, or decides nothing needs doing. Does not wait.
    pub async fn provision(&self) -> StackResult<()> {
        if !self.flags.enabled {
            debug!("Stack {} disabled, skipping", self.name);
            return Ok(());
        }
        let record = self.store.load(&self.name)?;
        match self.describe().await? {
            None => self.provision_absent(&record).await,
            Some(desc) => self.provision_present(desc, &record).await,
        }
    }

    async fn provision_absent(&self, record: &StackStateRecord) -> StackResult<()> {
        if self.flags.change_protected {
            warn!(
                "Stack {} does not exist but is change protected, not creating",
                self.name
            );
            return Ok(());
        }
        self.run_hooks(HookAction::Create, HookTiming::Pre, record)
            .await?;
        let launch = self.launch().await?;
        info!("Creating stack {}", self.name);
        let stack_id = self
            .run_cfn("CreateStack", |cfn| {
                let launch = launch.clone();
                async move { cfn.create_stack(&launch).await }
            })
            .await?;
        self.update_state(|s| {
            s.stack_id = Some(stack_id.clone());
            s.deployed_status = DeployedStatus::CreateInProgress;
            s.in_flight = Some(HookAction::Create);
        });
        Ok(())
    }

    async fn provision_present(
        &self,
        desc: StackDescription,
        record: &StackStateRecord,
    ) -> StackResult<()> {
        if desc.status.is_in_progress() {
            // A previous run was interrupted; pick up waiting where it
            // left off.
            let action = match desc.status {
                DeployedStatus::CreateInProgress => HookAction::Create,
                DeployedStatus::DeleteInProgress => HookAction::Delete,
                _ => HookAction::Update,
            };
            warn!(
                "Stack {} already has an operation in progress ({:?})",
                self.name, desc.status
            );
            self.update_state(|s| {
                s.deployed_status = desc.status;
                s.in_flight = Some(action);
            });
            return Ok(());
        }

        let name = self.name.clone();
        let deployed_body = self
            .run_cfn("GetTemplate", |cfn| {
                let name = name.clone();
                async move { cfn.get_template(&name).await }
            })
            .await?;
        let template_unchanged =
            crate::template::canonicalize(&deployed_body) == self.template.canonical();
        let params_unchanged = self.parameters_match(&desc).await?;

        if template_unchanged && params_unchanged {
            debug!("Stack {} is unchanged", self.name);
            self.mark_no_change(desc, record).await?;
            return Ok(());
        }

        if self.flags.change_protected {
            warn!(
                "Stack {} has changes but is change protected, not updating",
                self.name
            );
            self.update_state(|s| {
                s.deployed_status = desc.status;
                s.outputs = desc.outputs.clone();
                s.cached = true;
            });
            return Ok(());
        }

        self.run_hooks(HookAction::Update, HookTiming::Pre, record)
            .await?;
        let launch = self.launch().await?;
        info!("Updating stack {}", self.name);
        let result = self
            .run_cfn("UpdateStack", |cfn| {
                let launch = launch.clone();
                async move { cfn.update_stack(&launch).await }
            })
            .await;
        match result {
            Ok(()) => {
                self.update_state(|s| {
                    s.deployed_status = DeployedStatus::UpdateInProgress;
                    s.in_flight = Some(HookAction::Update);
                });
                Ok(())
            }
            Err(AwsError::NoUpdatesToPerform) => {
                debug!("Stack {}: CloudFormation reports no updates", self.name);
                self.mark_no_change(desc, record).await?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Declared parameters against the deployed set, as maps. Parameters
    /// marked use-previous match whatever is deployed.
    async fn parameters_match(&self, desc: &StackDescription) -> StackResult<bool> {
        let declared = resolve_parameters(&self.parameters).await?;
        let deployed: BTreeMap<&str, &str> = desc
            .parameters
            .iter()
            .map(|p| (p.key.as_str(), p.value.as_str()))
            .collect();
        if declared.len() != desc.parameters.len() {
            return Ok(false);
        }
        for param in &declared {
            if param.use_previous_value {
                if !deployed.contains_key(param.key.as_str()) {
                    return Ok(false);
                }
                continue;
            }
            if deployed.get(param.key.as_str()) != Some(&param.value.as_str()) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Terminal no-change: adopt deployed outputs, then run post hook
    /// pairs with skip logic so content-keyed side-effects still converge.
    async fn mark_no_change(
        &self,
        desc: StackDescription,
        record: &StackStateRecord,
    ) -> StackResult<()> {
        self.update_state(|s| {
            s.deployed_status = desc.status;
            s.outputs = desc.outputs.clone();
            s.cached = true;
            s.stack_id = Some(desc.stack_id.clone());
            s.in_flight = None;
        });
        let mut record = record.clone();
        for action in [HookAction::Create, HookAction::Update] {
            let key = cache_key(action, HookTiming::Post);
            let last = record.hook_cache_ids.get(&key).cloned();
            let id = self
                .hooks
                .run(&self.name, action, HookTiming::Post, last.as_deref())
                .await?;
            if let Some(id) = id {
                record.hook_cache_ids.insert(key, id);
            }
        }
        record.outputs = desc.outputs;
        self.store.save(&self.name, &record)?;
        Ok(())
    }

    async fn run_hooks(
        &self,
        action: HookAction,
        timing: HookTiming,
        record: &StackStateRecord,
    ) -> StackResult<Option<String>> {
        let key = cache_key(action, timing);
        let last = record.hook_cache_ids.get(&key).cloned();
        self.hooks
            .run(&self.name, action, timing, last.as_deref())
            .await
    }

    /// Wait phase: poll until the submitted operation reaches a terminal
    /// status, then run post hooks, refresh outputs, and persist state.
    pub async fn wait_for_complete(&self) -> StackResult<()> {
        let action = match self.read_state().in_flight {
            Some(action) => action,
            None => return Ok(()),
        };
        let desc = self
            .poll_until_terminal(self.poll.provision_timeout, "provision")
            .await?;

        let desc = match desc {
            Some(desc) if desc.status.is_terminal_success() => desc,
            Some(desc) => {
                self.update_state(|s| {
                    s.deployed_status = desc.status;
                    s.in_flight = None;
                });
                return Err(StackError::StackOperationFailed {
                    stack: self.name.clone(),
                    status: format!("{:?}", desc.status),
                });
            }
            None => {
                self.update_state(|s| s.in_flight = None);
                return Err(StackError::StackOperationFailed {
                    stack: self.name.clone(),
                    status: "DOES_NOT_EXIST".to_string(),
                });
            }
        };

        if self.flags.termination_protection && !desc.termination_protection {
            // Enabled only after success so a rollback is never blocked.
            let name = self.name.clone();
            self.run_cfn("UpdateTerminationProtection", |cfn| {
                let name = name.clone();
                async move { cfn.update_termination_protection(&name, true).await }
            })
            .await?;
        }

        self.update_state(|s| {
            s.deployed_status = desc.status;
            s.outputs = desc.outputs.clone();
            s.stack_id = Some(desc.stack_id.clone());
            s.in_flight = None;
        });

        let mut record = self.store.load(&self.name)?;
        let key = cache_key(action, HookTiming::Post);
        if let Some(id) = self.run_hooks(action, HookTiming::Post, &record).await? {
            record.hook_cache_ids.insert(key, id);
        }
        record.outputs = desc.outputs;
        self.store.save(&self.name, &record)?;
        info!("Stack {} complete", self.name);
        Ok(())
    }

    async fn poll_until_terminal(
        &self,
        timeout: Duration,
        operation: &str,
    ) -> StackResult<Option<StackDescription>> {
        let started = Instant::now();
        let mut delay = self.poll.initial_delay;
        loop {
            tokio::time::sleep(delay).await;
            let desc = self.describe().await?;
            match &desc {
                None => return Ok(None),
                Some(desc) if desc.status.is_terminal() => return Ok(Some(desc.clone())),
                Some(desc) => {
                    debug!("Stack {} is {:?}", self.name, desc.status);
                }
            }
            if started.elapsed() > timeout {
                return Err(StackError::Timeout {
                    stack: self.name.clone(),
                    operation: operation.to_string(),
                });
            }
            delay = self.poll.next_delay(delay);
        }
    }

    /// Delete the deployed stack after pre-delete hooks. Waits for
    /// `DELETE_COMPLETE` unless the stack opts out.
    pub async fn delete(&self) -> StackResult<()> {
        if self.flags.change_protected {
            warn!("Stack {} is change protected, not deleting", self.name);
            return Ok(());
        }
        if self.describe().await?.is_none() {
            debug!("Stack {} does not exist, nothing to delete", self.name);
            self.store.remove(&self.name)?;
            return Ok(());
        }

        let record = self.store.load(&self.name)?;
        self.run_hooks(HookAction::Delete, HookTiming::Pre, &record)
            .await?;
        info!("Deleting stack {}", self.name);
        let name = self.name.clone();
        self.run_cfn("DeleteStack", |cfn| {
            let name = name.clone();
            async move { cfn.delete_stack(&name).await }
        })
        .await?;
        self.update_state(|s| {
            s.deployed_status = DeployedStatus::DeleteInProgress;
            s.in_flight = Some(HookAction::Delete);
        });

        if !self.flags.wait_for_delete {
            return Ok(());
        }
        let desc = self
            .poll_until_terminal(self.poll.delete_timeout, "delete")
            .await?;
        match desc {
            None | Some(StackDescription { status: DeployedStatus::DeleteComplete, .. }) => {
                self.update_state(|s| {
                    s.deployed_status = DeployedStatus::DeleteComplete;
                    s.outputs.clear();
                    s.in_flight = None;
                });
                self.run_hooks(HookAction::Delete, HookTiming::Post, &record)
                    .await?;
                self.store.remove(&self.name)?;
                info!("Stack {} deleted", self.name);
                Ok(())
            }
            Some(desc) => {
                self.update_state(|s| {
                    s.deployed_status = desc.status;
                    s.in_flight = None;
                });
                Err(StackError::StackOperationFailed {
                    stack: self.name.clone(),
                    status: format!("{:?}", desc.status),
                })
            }
        }
    }
}

impl std::fmt::Debug for Stack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stack")
            .field("name", &self.name)
            .field("account", &self.account.name)
            .field("region", &self.region)
            .field("resource_path", &self.resource_path)
            .finish()
    }
}

/// Stacks answer `paco.ref` lookups for their deployed outputs.
#[async_trait]
impl OutputSource for Stack {
    fn source_id(&self) -> String {
        self.name.clone()
    }

    async fn output_value(&self, key: &str) -> RefResult<String> {
        self.get_outputs_value(key)
            .map_err(|_| RefError::OutputNotAvailable {
                stack: self.name.clone(),
                key: key.to_string(),
            })
    }
}
