//! Scripted in-memory AWS fakes.
//!
//! These drive the engine through full reconcile cycles without AWS. The
//! CloudFormation fake keeps a per-stack record and advances in-progress
//! statuses a configurable number of describes after each mutation, which
//! exercises the polling loops. Every call is appended to a log so tests
//! can assert on exactly which API calls a run performed.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use paco_aws::{
    AwsClientFactory, AwsError, AwsResult, CfnApi, CfnParameter, DeployedStatus, IamApi, S3Api,
    StackDescription, StackLaunch,
};
use paco_model::account::AccountContext;

#[derive(Debug, Clone)]
struct FakeStackRecord {
    stack_id: String,
    status: DeployedStatus,
    template_body: String,
    parameters: Vec<CfnParameter>,
    outputs: BTreeMap<String, String>,
    termination_protection: bool,
    /// Describes remaining before an in-progress status settles.
    settle_after: u32,
    settle_to: DeployedStatus,
}

#[derive(Default)]
struct FakeCfnInner {
    stacks: BTreeMap<String, FakeStackRecord>,
    /// Outputs granted to a stack when its create or update completes.
    planned_outputs: BTreeMap<String, BTreeMap<String, String>>,
    /// Force the next create/update of a named stack to roll back.
    fail_next: BTreeMap<String, DeployedStatus>,
    /// Fail this many upcoming calls with an expired security token.
    expired_calls: u32,
    /// Stacks whose next UpdateStack reports nothing to do.
    no_updates: Vec<String>,
    calls: Vec<String>,
}

#[derive(Default)]
pub struct FakeCfn {
    inner: Mutex<FakeCfnInner>,
    /// Number of describes an operation stays in progress. Zero settles
    /// on the first describe after the mutation.
    pub settle_delay: u32,
}

impl FakeCfn {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeCfnInner> {
        self.inner.lock().expect("fake cfn lock")
    }

    /// Outputs the stack will expose once created or updated.
    pub fn plan_outputs(&self, stack_name: &str, outputs: &[(&str, &str)]) {
        let map = outputs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.lock()
            .planned_outputs
            .insert(stack_name.to_string(), map);
    }

    /// Make the next create/update of this stack end in a failure status.
    pub fn fail_next_operation(&self, stack_name: &str, status: DeployedStatus) {
        self.lock().fail_next.insert(stack_name.to_string(), status);
    }

    /// Fail the next `n` calls with `ExpiredToken`.
    pub fn expire_token_for_calls(&self, n: u32) {
        self.lock().expired_calls = n;
    }

    /// Make the next UpdateStack for this stack report nothing to do.
    pub fn force_no_updates(&self, stack_name: &str) {
        self.lock().no_updates.push(stack_name.to_string());
    }

    fn check_expired(inner: &mut FakeCfnInner) -> AwsResult<()> {
        if inner.expired_calls > 0 {
            inner.expired_calls -= 1;
            return Err(AwsError::ExpiredToken);
        }
        Ok(())
    }

    /// Pre-seed a deployed stack, as if created by an earlier run.
    pub fn seed_stack(
        &self,
        name: &str,
        template_body: &str,
        parameters: Vec<CfnParameter>,
        outputs: &[(&str, &str)],
    ) {
        let mut inner = self.lock();
        inner.stacks.insert(
            name.to_string(),
            FakeStackRecord {
                stack_id: format!("arn:aws:cloudformation:::stack/{}", name),
                status: DeployedStatus::CreateComplete,
                template_body: template_body.to_string(),
                parameters,
                outputs: outputs
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                termination_protection: false,
                settle_after: 0,
                settle_to: DeployedStatus::CreateComplete,
            },
        );
    }

    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn mutating_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| {
                c.starts_with("CreateStack")
                    || c.starts_with("UpdateStack")
                    || c.starts_with("DeleteStack")
                    || c.starts_with("UpdateTerminationProtection")
            })
            .collect()
    }

    pub fn call_count(&self, prefix: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    pub fn stack_exists(&self, name: &str) -> bool {
        self.lock().stacks.contains_key(name)
    }

    pub fn stack_status(&self, name: &str) -> Option<DeployedStatus> {
        self.lock().stacks.get(name).map(|r| r.status)
    }

    pub fn created_parameters(&self, name: &str) -> Option<Vec<CfnParameter>> {
        self.lock().stacks.get(name).map(|r| r.parameters.clone())
    }

    pub fn termination_protection(&self, name: &str) -> Option<bool> {
        self.lock()
            .stacks
            .get(name)
            .map(|r| r.termination_protection)
    }

    fn describe_record(record: &FakeStackRecord) -> StackDescription {
        StackDescription {
            stack_id: record.stack_id.clone(),
            status: record.status,
            outputs: if record.status.is_terminal_success() {
                record.outputs.clone()
            } else {
                BTreeMap::new()
            },
            parameters: record.parameters.clone(),
            termination_protection: record.termination_protection,
        }
    }
}

#[async_trait]
impl CfnApi for FakeCfn {
    async fn validate_template(&self, body: &str) -> AwsResult<()> {
        let mut inner = self.lock();
        inner.calls.push("ValidateTemplate".to_string());
        if body.trim().is_empty() {
            return Err(AwsError::TemplateValidation("empty template body".to_string()));
        }
        Ok(())
    }

    async fn describe_stack(&self, name: &str) -> AwsResult<Option<StackDescription>> {
        let mut inner = self.lock();
        inner.calls.push(format!("DescribeStacks {}", name));
        Self::check_expired(&mut inner)?;
        let Some(record) = inner.stacks.get_mut(name) else {
            return Ok(None);
        };
        if record.status.is_in_progress() {
            if record.settle_after == 0 {
                record.status = record.settle_to;
                if record.status == DeployedStatus::DeleteComplete {
                    let record = record.clone();
                    inner.stacks.remove(name);
                    return Ok(Some(Self::describe_record(&record)));
                }
            } else {
                record.settle_after -= 1;
            }
        }
        let record = record.clone();
        Ok(Some(Self::describe_record(&record)))
    }

    async fn get_template(&self, name: &str) -> AwsResult<String> {
        let mut inner = self.lock();
        inner.calls.push(format!("GetTemplate {}", name));
        inner
            .stacks
            .get(name)
            .map(|r| r.template_body.clone())
            .ok_or_else(|| AwsError::StackNotFound(format!("Stack {} does not exist", name)))
    }

    async fn create_stack(&self, launch: &StackLaunch) -> AwsResult<String> {
        let settle_delay = self.settle_delay;
        let mut inner = self.lock();
        inner.calls.push(format!("CreateStack {}", launch.name));
        Self::check_expired(&mut inner)?;
        if inner.stacks.contains_key(&launch.name) {
            return Err(AwsError::Service {
                code: "AlreadyExistsException".to_string(),
                message: format!("Stack {} already exists", launch.name),
            });
        }
        let settle_to = inner
            .fail_next
            .remove(&launch.name)
            .unwrap_or(DeployedStatus::CreateComplete);
        let outputs = inner
            .planned_outputs
            .get(&launch.name)
            .cloned()
            .unwrap_or_default();
        let stack_id = format!("arn:aws:cloudformation:::stack/{}", launch.name);
        inner.stacks.insert(
            launch.name.clone(),
            FakeStackRecord {
                stack_id: stack_id.clone(),
                status: DeployedStatus::CreateInProgress,
                template_body: launch.template_body.clone(),
                parameters: launch.parameters.clone(),
                outputs,
                termination_protection: false,
                settle_after: settle_delay,
                settle_to,
            },
        );
        Ok(stack_id)
    }

    async fn update_stack(&self, launch: &StackLaunch) -> AwsResult<()> {
        let settle_delay = self.settle_delay;
        let mut inner = self.lock();
        inner.calls.push(format!("UpdateStack {}", launch.name));
        if let Some(pos) = inner.no_updates.iter().position(|n| n == &launch.name) {
            inner.no_updates.remove(pos);
            return Err(AwsError::NoUpdatesToPerform);
        }
        let settle_to = inner
            .fail_next
            .remove(&launch.name)
            .unwrap_or(DeployedStatus::UpdateComplete);
        let outputs = inner.planned_outputs.get(&launch.name).cloned();
        let Some(record) = inner.stacks.get_mut(&launch.name) else {
            return Err(AwsError::StackNotFound(format!(
                "Stack {} does not exist",
                launch.name
            )));
        };
        if record.template_body == launch.template_body && record.parameters == launch.parameters {
            return Err(AwsError::NoUpdatesToPerform);
        }
        record.template_body = launch.template_body.clone();
        record.parameters = launch.parameters.clone();
        if let Some(outputs) = outputs {
            record.outputs = outputs;
        }
        record.status = DeployedStatus::UpdateInProgress;
        record.settle_after = settle_delay;
        record.settle_to = settle_to;
        Ok(())
    }

    async fn delete_stack(&self, name: &str) -> AwsResult<()> {
        let settle_delay = self.settle_delay;
        let mut inner = self.lock();
        inner.calls.push(format!("DeleteStack {}", name));
        let Some(record) = inner.stacks.get_mut(name) else {
            return Err(AwsError::StackNotFound(format!("Stack {} does not exist", name)));
        };
        record.status = DeployedStatus::DeleteInProgress;
        record.settle_after = settle_delay;
        record.settle_to = DeployedStatus::DeleteComplete;
        Ok(())
    }

    async fn update_termination_protection(&self, name: &str, enabled: bool) -> AwsResult<()> {
        let mut inner = self.lock();
        inner
            .calls
            .push(format!("UpdateTerminationProtection {}", name));
        let Some(record) = inner.stacks.get_mut(name) else {
            return Err(AwsError::StackNotFound(format!("Stack {} does not exist", name)));
        };
        record.termination_protection = enabled;
        Ok(())
    }
}

/// In-memory S3 with named buckets holding object keys.
#[derive(Default)]
pub struct FakeS3 {
    buckets: Mutex<BTreeMap<String, Vec<String>>>,
}

impl FakeS3 {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn put_bucket(&self, name: &str, objects: &[&str]) {
        self.buckets.lock().expect("fake s3 lock").insert(
            name.to_string(),
            objects.iter().map(|o| o.to_string()).collect(),
        );
    }

    pub fn objects(&self, name: &str) -> Option<Vec<String>> {
        self.buckets.lock().expect("fake s3 lock").get(name).cloned()
    }
}

#[async_trait]
impl S3Api for FakeS3 {
    async fn bucket_exists(&self, bucket: &str) -> AwsResult<bool> {
        Ok(self
            .buckets
            .lock()
            .expect("fake s3 lock")
            .contains_key(bucket))
    }

    async fn empty_bucket(&self, bucket: &str) -> AwsResult<()> {
        if let Some(objects) = self.buckets.lock().expect("fake s3 lock").get_mut(bucket) {
            objects.clear();
        }
        Ok(())
    }
}

/// In-memory IAM holding SSH public keys per user.
#[derive(Default)]
pub struct FakeIam {
    keys: Mutex<BTreeMap<String, Vec<String>>>,
}

impl FakeIam {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn keys_for(&self, username: &str) -> Vec<String> {
        self.keys
            .lock()
            .expect("fake iam lock")
            .get(username)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl IamApi for FakeIam {
    async fn list_ssh_public_keys(&self, username: &str) -> AwsResult<Vec<String>> {
        Ok(self.keys_for(username))
    }

    async fn upload_ssh_public_key(&self, username: &str, body: &str) -> AwsResult<()> {
        self.keys
            .lock()
            .expect("fake iam lock")
            .entry(username.to_string())
            .or_default()
            .push(body.to_string());
        Ok(())
    }
}

/// Client factory wiring the fakes together.
pub struct FakeFactory {
    pub cfn: Arc<FakeCfn>,
    pub s3: Arc<FakeS3>,
    pub iam: Arc<FakeIam>,
    invalidations: Mutex<Vec<String>>,
}

impl FakeFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            cfn: FakeCfn::new(),
            s3: FakeS3::new(),
            iam: FakeIam::new(),
            invalidations: Mutex::new(Vec::new()),
        })
    }

    pub fn invalidations(&self) -> Vec<String> {
        self.invalidations
            .lock()
            .expect("invalidation lock")
            .clone()
    }
}

#[async_trait]
impl AwsClientFactory for FakeFactory {
    async fn cfn(&self, _account: &AccountContext, _region: &str) -> AwsResult<Arc<dyn CfnApi>> {
        Ok(self.cfn.clone())
    }

    async fn s3(&self, _account: &AccountContext, _region: &str) -> AwsResult<Arc<dyn S3Api>> {
        Ok(self.s3.clone())
    }

    async fn iam(&self, _account: &AccountContext) -> AwsResult<Arc<dyn IamApi>> {
        Ok(self.iam.clone())
    }

    fn invalidate(&self, account_name: &str) {
        self.invalidations
            .lock()
            .expect("invalidation lock")
            .push(account_name.to_string());
    }
}

/// An account context for tests.
pub fn test_account(name: &str) -> Arc<AccountContext> {
    Arc::new(AccountContext {
        name: name.to_string(),
        account_id: "123456789012".to_string(),
        default_region: "us-west-2".to_string(),
        admin_delegate_role_name: "Paco-Organization-Account-Delegate-Role".to_string(),
    })
}
