//! End-to-end reconciliation scenarios against scripted fakes.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use paco_aws::{DeployedStatus, RetryPolicy};
use paco_core::testing::{test_account, FakeFactory};
use paco_core::{
    HookAction, HookCacheFn, HookFn, HookTiming, Parameter, PollConfig, StackBuilder, StackError,
    StackFlags, StackGroup, StackHooks, StackOrder, StackResult, StackStateStore, StackTemplate,
};
use tempfile::TempDir;

const NET_BODY: &str = "Resources:\n  Vpc:\n    Type: AWS::EC2::VPC\nOutputs:\n  VpcId:\n    Value: !Ref Vpc\n";
const APP_BODY: &str = "Parameters:\n  VpcId:\n    Type: String\nResources:\n  App:\n    Type: AWS::EC2::Instance\n";
const BUCKET_BODY: &str = "Resources:\n  Bucket:\n    Type: AWS::S3::Bucket\nOutputs:\n  Name:\n    Value: !Ref Bucket\n";

fn builder(
    factory: &Arc<FakeFactory>,
    store: &StackStateStore,
    path: &str,
    body: &str,
) -> StackBuilder {
    StackBuilder::new(
        test_account("dev"),
        "us-west-2",
        path,
        StackTemplate::new(body),
        factory.clone(),
        store.clone(),
    )
    .poll(PollConfig::immediate())
    .retry(RetryPolicy::immediate(3))
}

struct CountingHook(Arc<AtomicU32>);

#[async_trait]
impl HookFn for CountingHook {
    async fn run(&self) -> StackResult<()> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct KeyHash(String);

#[async_trait]
impl HookCacheFn for KeyHash {
    async fn cache_id(&self) -> StackResult<String> {
        Ok(self.0.clone())
    }
}

#[tokio::test]
async fn test_fresh_provision_creates_and_caches_outputs() {
    let tmp = TempDir::new().unwrap();
    let store = StackStateStore::new(tmp.path().join("state"));
    let factory = FakeFactory::new();

    let stack = builder(
        &factory,
        &store,
        "netenv.ne.dev.us-west-2.applications.app.groups.site.resources.bucket",
        BUCKET_BODY,
    )
    .build();
    factory.cfn.plan_outputs(stack.name(), &[("Name", "my-bucket-dev")]);

    let group = StackGroup::new("site").with_state_path(tmp.path().join("group.yaml"));
    group.add_stack(stack.clone());
    group.provision().await.unwrap();

    assert_eq!(factory.cfn.call_count("CreateStack"), 1);
    assert_eq!(
        factory.cfn.stack_status(stack.name()),
        Some(DeployedStatus::CreateComplete)
    );
    assert_eq!(stack.get_outputs_value("Name").unwrap(), "my-bucket-dev");

    let managed = group.managed_stacks();
    assert_eq!(managed.len(), 1);
    assert_eq!(managed[0].stack_name, stack.name());
    assert_eq!(managed[0].account, "dev");
    assert_eq!(managed[0].region, "us-west-2");
    assert!(tmp.path().join("group.yaml").exists());
}

#[tokio::test]
async fn test_noop_rerun_performs_zero_mutations() {
    let tmp = TempDir::new().unwrap();
    let store = StackStateStore::new(tmp.path().join("state"));
    let factory = FakeFactory::new();
    let path = "netenv.ne.dev.us-west-2.applications.app.groups.site.resources.bucket";

    let post_runs = Arc::new(AtomicU32::new(0));
    let make_stack = |cache: &str| {
        let mut hooks = StackHooks::new();
        hooks.add(
            "sync",
            HookAction::Create,
            HookTiming::Post,
            Arc::new(CountingHook(post_runs.clone())),
            Some(Arc::new(KeyHash(cache.to_string()))),
        );
        builder(&factory, &store, path, BUCKET_BODY).hooks(hooks).build()
    };

    let first = make_stack("key-v1");
    first.provision().await.unwrap();
    first.wait_for_complete().await.unwrap();
    assert_eq!(post_runs.load(Ordering::SeqCst), 1);

    // Second run: fresh Stack object, identical declaration.
    let second = make_stack("key-v1");
    second.provision().await.unwrap();
    second.wait_for_complete().await.unwrap();

    assert!(factory.cfn.mutating_calls().len() == 1, "only the initial create");
    assert!(second.is_cached());
    assert_eq!(post_runs.load(Ordering::SeqCst), 1, "post hook skipped");
    assert_eq!(second.get_outputs_value("Name").is_err(), true);

    // Changing the hook's content key re-runs it even with no stack change.
    let third = make_stack("key-v2");
    third.provision().await.unwrap();
    assert_eq!(post_runs.load(Ordering::SeqCst), 2);
    assert_eq!(factory.cfn.mutating_calls().len(), 1);
}

#[tokio::test]
async fn test_output_consumer_ordering() {
    let tmp = TempDir::new().unwrap();
    let store = StackStateStore::new(tmp.path().join("state"));
    let factory = FakeFactory::new();

    let net = builder(&factory, &store, "netenv.ne.dev.us-west-2.net", NET_BODY).build();
    factory.cfn.plan_outputs(net.name(), &[("VpcId", "vpc-0a1b")]);
    let app = builder(&factory, &store, "netenv.ne.dev.us-west-2.applications.app", APP_BODY)
        .parameter(Parameter::from_output("VpcId", net.clone(), "VpcId"))
        .build();

    let group = StackGroup::new("ne");
    group.add_stack(net.clone());
    group.add_stack(app.clone());
    group.provision().await.unwrap();

    let calls = factory.cfn.calls();
    let net_create = calls
        .iter()
        .position(|c| *c == format!("CreateStack {}", net.name()))
        .unwrap();
    let app_create = calls
        .iter()
        .position(|c| *c == format!("CreateStack {}", app.name()))
        .unwrap();
    assert!(net_create < app_create);

    let params = factory.cfn.created_parameters(app.name()).unwrap();
    assert_eq!(params.len(), 1);
    assert_eq!(params[0].key, "VpcId");
    assert_eq!(params[0].value, "vpc-0a1b");
}

#[tokio::test]
async fn test_consumer_before_producer_is_an_error() {
    let tmp = TempDir::new().unwrap();
    let store = StackStateStore::new(tmp.path().join("state"));
    let factory = FakeFactory::new();

    let net = builder(&factory, &store, "netenv.ne.dev.us-west-2.net", NET_BODY).build();
    let app = builder(&factory, &store, "netenv.ne.dev.us-west-2.applications.app", APP_BODY)
        .parameter(Parameter::from_output("VpcId", net.clone(), "VpcId"))
        .build();

    // App submitted before Net has completed: a composition bug.
    let err = app.provision().await.unwrap_err();
    assert!(matches!(err, StackError::OutputNotAvailable { .. }));
}

#[tokio::test]
async fn test_waitlast_defers_blocking() {
    let tmp = TempDir::new().unwrap();
    let store = StackStateStore::new(tmp.path().join("state"));
    let factory = FakeFactory::new();

    let slow = builder(&factory, &store, "netenv.ne.dev.us-west-2.slow", NET_BODY).build();
    let fast = builder(&factory, &store, "netenv.ne.dev.us-west-2.fast", BUCKET_BODY).build();

    let group = StackGroup::new("ne");
    group.add_stack_order(slow.clone(), &[StackOrder::Provision, StackOrder::WaitLast]);
    group.add_stack_order(fast.clone(), &[StackOrder::Provision, StackOrder::Wait]);
    group.provision().await.unwrap();

    // Both creates are submitted before any wait begins.
    let calls = factory.cfn.calls();
    let slow_create = calls
        .iter()
        .position(|c| *c == format!("CreateStack {}", slow.name()))
        .unwrap();
    let fast_create = calls
        .iter()
        .position(|c| *c == format!("CreateStack {}", fast.name()))
        .unwrap();
    assert!(slow_create < fast_create);
    assert_eq!(slow.deployed_status(), DeployedStatus::CreateComplete);
    assert_eq!(fast.deployed_status(), DeployedStatus::CreateComplete);
}

#[tokio::test]
async fn test_filtered_scope_skips_other_applications() {
    let tmp = TempDir::new().unwrap();
    let store = StackStateStore::new(tmp.path().join("state"));
    let factory = FakeFactory::new();

    let a1 = builder(
        &factory,
        &store,
        "netenv.ne.dev.us-west-2.applications.A1.groups.web.resources.site",
        BUCKET_BODY,
    )
    .build();
    let a2 = builder(
        &factory,
        &store,
        "netenv.ne.dev.us-west-2.applications.A2.groups.web.resources.site",
        BUCKET_BODY,
    )
    .build();

    let group = StackGroup::new("ne").with_state_path(tmp.path().join("group.yaml"));
    group.add_stack(a1.clone());
    group.add_stack(a2.clone());
    group.set_filter(Some(
        "netenv.ne.dev.us-west-2.applications.A1".to_string(),
    ));
    group.provision().await.unwrap();

    assert!(factory.cfn.stack_exists(a1.name()));
    assert!(!factory.cfn.stack_exists(a2.name()));
    let managed = group.managed_stacks();
    assert_eq!(managed.len(), 1);
    assert_eq!(managed[0].stack_name, a1.name());
}

#[tokio::test]
async fn test_change_protected_never_mutates() {
    let tmp = TempDir::new().unwrap();
    let store = StackStateStore::new(tmp.path().join("state"));
    let factory = FakeFactory::new();
    let path = "resource.s3.buckets.audit";

    // Deployed with a different template than declared.
    let stack = builder(&factory, &store, path, BUCKET_BODY)
        .flags(StackFlags {
            change_protected: true,
            ..StackFlags::default()
        })
        .build();
    factory.cfn.seed_stack(stack.name(), NET_BODY, vec![], &[("Name", "audit-bucket")]);

    stack.provision().await.unwrap();
    stack.wait_for_complete().await.unwrap();
    assert!(factory.cfn.mutating_calls().is_empty());
    // Outputs stay readable behind the protection.
    assert_eq!(stack.get_outputs_value("Name").unwrap(), "audit-bucket");

    stack.delete().await.unwrap();
    assert!(factory.cfn.mutating_calls().is_empty());
    assert!(factory.cfn.stack_exists(stack.name()));
}

#[tokio::test]
async fn test_rollback_is_terminal_failure() {
    let tmp = TempDir::new().unwrap();
    let store = StackStateStore::new(tmp.path().join("state"));
    let factory = FakeFactory::new();

    let stack = builder(&factory, &store, "netenv.ne.dev.us-west-2.bad", NET_BODY).build();
    factory
        .cfn
        .fail_next_operation(stack.name(), DeployedStatus::RollbackComplete);

    stack.provision().await.unwrap();
    let err = stack.wait_for_complete().await.unwrap_err();
    assert!(matches!(err, StackError::StackOperationFailed { .. }));
    assert!(stack.get_outputs_value("VpcId").is_err());
}

#[tokio::test]
async fn test_no_updates_to_perform_is_no_change() {
    let tmp = TempDir::new().unwrap();
    let store = StackStateStore::new(tmp.path().join("state"));
    let factory = FakeFactory::new();
    let path = "netenv.ne.dev.us-west-2.net";

    let stack = builder(&factory, &store, path, NET_BODY).build();
    // Deployed template differs, so the engine submits an update;
    // CloudFormation then reports there is nothing to do.
    factory.cfn.seed_stack(
        stack.name(),
        "Resources:\n  Old:\n    Type: AWS::EC2::VPC\n",
        vec![],
        &[("VpcId", "vpc-1")],
    );
    factory.cfn.force_no_updates(stack.name());

    stack.provision().await.unwrap();
    stack.wait_for_complete().await.unwrap();
    assert!(stack.is_cached());
    assert_eq!(stack.get_outputs_value("VpcId").unwrap(), "vpc-1");
    assert_eq!(factory.cfn.call_count("UpdateStack"), 1);
    assert_eq!(factory.cfn.call_count("CreateStack"), 0);
}

#[tokio::test]
async fn test_expired_token_invalidates_and_retries_once() {
    let tmp = TempDir::new().unwrap();
    let store = StackStateStore::new(tmp.path().join("state"));
    let factory = FakeFactory::new();

    let stack = builder(&factory, &store, "netenv.ne.dev.us-west-2.net", NET_BODY).build();
    factory.cfn.expire_token_for_calls(1);

    stack.provision().await.unwrap();
    stack.wait_for_complete().await.unwrap();
    assert_eq!(factory.invalidations(), vec!["dev".to_string()]);
    assert!(factory.cfn.stack_exists(stack.name()));
}

#[tokio::test]
async fn test_delete_runs_pre_hooks_and_removes_state() {
    let tmp = TempDir::new().unwrap();
    let store = StackStateStore::new(tmp.path().join("state"));
    let factory = FakeFactory::new();
    let path = "resource.s3.buckets.scratch";

    let pre_delete_runs = Arc::new(AtomicU32::new(0));
    let mut hooks = StackHooks::new();
    hooks.add(
        "empty-bucket",
        HookAction::Delete,
        HookTiming::Pre,
        Arc::new(CountingHook(pre_delete_runs.clone())),
        None,
    );
    let stack = builder(&factory, &store, path, BUCKET_BODY).hooks(hooks).build();

    stack.provision().await.unwrap();
    stack.wait_for_complete().await.unwrap();
    assert!(factory.cfn.stack_exists(stack.name()));

    stack.delete().await.unwrap();
    assert_eq!(pre_delete_runs.load(Ordering::SeqCst), 1);
    assert!(!factory.cfn.stack_exists(stack.name()));
    assert_eq!(stack.deployed_status(), DeployedStatus::DeleteComplete);
}

#[tokio::test]
async fn test_termination_protection_set_after_success() {
    let tmp = TempDir::new().unwrap();
    let store = StackStateStore::new(tmp.path().join("state"));
    let factory = FakeFactory::new();

    let stack = builder(&factory, &store, "netenv.ne.dev.us-west-2.net", NET_BODY)
        .flags(StackFlags {
            termination_protection: true,
            ..StackFlags::default()
        })
        .build();

    stack.provision().await.unwrap();
    let calls_before_wait = factory.cfn.call_count("UpdateTerminationProtection");
    assert_eq!(calls_before_wait, 0);

    stack.wait_for_complete().await.unwrap();
    assert_eq!(factory.cfn.termination_protection(stack.name()), Some(true));
}

#[tokio::test]
async fn test_nested_group_runs_in_place() {
    let tmp = TempDir::new().unwrap();
    let store = StackStateStore::new(tmp.path().join("state"));
    let factory = FakeFactory::new();

    let inner_stack = builder(&factory, &store, "netenv.ne.dev.us-west-2.inner", NET_BODY).build();
    let outer_stack =
        builder(&factory, &store, "netenv.ne.dev.us-west-2.outer", BUCKET_BODY).build();

    let inner = Arc::new(StackGroup::new("inner"));
    inner.add_stack(inner_stack.clone());
    let outer = StackGroup::new("outer");
    outer.add_group(inner, &[StackOrder::Provision]);
    outer.add_stack(outer_stack.clone());
    outer.provision().await.unwrap();

    let calls = factory.cfn.calls();
    let inner_create = calls
        .iter()
        .position(|c| *c == format!("CreateStack {}", inner_stack.name()))
        .unwrap();
    let outer_create = calls
        .iter()
        .position(|c| *c == format!("CreateStack {}", outer_stack.name()))
        .unwrap();
    assert!(inner_create < outer_create);
}

#[tokio::test]
async fn test_nested_group_stacks_recorded_in_state_file() {
    let tmp = TempDir::new().unwrap();
    let store = StackStateStore::new(tmp.path().join("state"));
    let factory = FakeFactory::new();

    let stack = builder(
        &factory,
        &store,
        "netenv.ne.dev.us-west-2.applications.app.groups.site.resources.bucket",
        BUCKET_BODY,
    )
    .build();
    let app = Arc::new(StackGroup::new("app"));
    app.add_stack(stack.clone());
    let outer = StackGroup::new("ne").with_state_path(tmp.path().join("group.yaml"));
    outer.add_group(app, &[StackOrder::Provision]);
    outer.provision().await.unwrap();

    let managed = outer.managed_stacks();
    assert_eq!(managed.len(), 1);
    assert_eq!(managed[0].stack_name, stack.name());
    let raw = std::fs::read_to_string(tmp.path().join("group.yaml")).unwrap();
    assert!(raw.contains(stack.name()));
}

#[tokio::test]
async fn test_filtered_rerun_keeps_state_for_other_stacks() {
    let tmp = TempDir::new().unwrap();
    let store = StackStateStore::new(tmp.path().join("state"));
    let factory = FakeFactory::new();
    let state_path = tmp.path().join("group.yaml");
    let a1_path = "netenv.ne.dev.us-west-2.applications.A1.groups.web.resources.site";
    let a2_path = "netenv.ne.dev.us-west-2.applications.A2.groups.web.resources.site";

    let a1 = builder(&factory, &store, a1_path, BUCKET_BODY).build();
    let a2 = builder(&factory, &store, a2_path, BUCKET_BODY).build();
    let group = StackGroup::new("ne").with_state_path(state_path.clone());
    group.add_stack(a1.clone());
    group.add_stack(a2.clone());
    group.provision().await.unwrap();

    // Re-run scoped to A1: A2 is filtered, not removed from the model, so
    // its entry must survive in the state file.
    let rerun_a1 = builder(&factory, &store, a1_path, BUCKET_BODY).build();
    let rerun_a2 = builder(&factory, &store, a2_path, BUCKET_BODY).build();
    let rerun = StackGroup::new("ne").with_state_path(state_path.clone());
    rerun.add_stack(rerun_a1);
    rerun.add_stack(rerun_a2);
    rerun.set_filter(Some(
        "netenv.ne.dev.us-west-2.applications.A1".to_string(),
    ));
    rerun.provision().await.unwrap();

    let raw = std::fs::read_to_string(&state_path).unwrap();
    assert!(raw.contains(a1.name()));
    assert!(raw.contains(a2.name()));
}

#[tokio::test]
async fn test_group_delete_reverses_order() {
    let tmp = TempDir::new().unwrap();
    let store = StackStateStore::new(tmp.path().join("state"));
    let factory = FakeFactory::new();

    let first = builder(&factory, &store, "netenv.ne.dev.us-west-2.first", NET_BODY).build();
    let second = builder(&factory, &store, "netenv.ne.dev.us-west-2.second", BUCKET_BODY).build();

    let group = StackGroup::new("ne");
    group.add_stack(first.clone());
    group.add_stack(second.clone());
    group.provision().await.unwrap();

    group.delete().await.unwrap();
    let calls = factory.cfn.calls();
    let del_second = calls
        .iter()
        .position(|c| *c == format!("DeleteStack {}", second.name()))
        .unwrap();
    let del_first = calls
        .iter()
        .position(|c| *c == format!("DeleteStack {}", first.name()))
        .unwrap();
    assert!(del_second < del_first);
    assert!(!factory.cfn.stack_exists(first.name()));
    assert!(!factory.cfn.stack_exists(second.name()));
}
