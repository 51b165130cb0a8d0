//! Controller and orchestrator behavior against scripted AWS fakes.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use paco_core::names::stack_name;
use paco_core::testing::FakeFactory;
use paco_core::{PollConfig, StackStateStore};
use paco_ctl::{Command, CtlContext, CtlError, Orchestrator};
use paco_model::account::AccountRegistry;
use paco_model::{
    Account, Application, CodeCommitRepository, CodeCommitResource, CodeCommitUser, Environment,
    EnvironmentRegion, GlobalResource, NetworkEnvironment, Project, ProjectManifest, ProjectPaths,
    Resource, ResourceGroup, S3BucketConfig, S3Resource,
};
use paco_refs::ResolverRegistry;

fn account(name: &str, account_id: &str) -> Account {
    Account {
        name: name.to_string(),
        title: None,
        account_id: account_id.to_string(),
        region: "us-west-2".to_string(),
        admin_delegate_role_name: "Paco-Organization-Account-Delegate-Role".to_string(),
        organization_account: false,
        root_email: None,
    }
}

fn app_resource(resource_type: &str, order: u32) -> Resource {
    Resource {
        resource_type: resource_type.to_string(),
        enabled: true,
        change_protected: false,
        order,
        title: None,
        config: serde_yaml::Mapping::new(),
    }
}

fn sample_project(home: &Path) -> Project {
    let mut accounts = BTreeMap::new();
    accounts.insert("dev".to_string(), account("dev", "123456789012"));

    let mut resources_map = BTreeMap::new();
    resources_map.insert("bucket".to_string(), app_resource("S3Bucket", 1));
    resources_map.insert("topic".to_string(), app_resource("SNSTopic", 2));
    let mut groups = BTreeMap::new();
    groups.insert(
        "site".to_string(),
        ResourceGroup {
            enabled: true,
            title: None,
            order: 1,
            resources: resources_map,
        },
    );
    let mut applications = BTreeMap::new();
    applications.insert(
        "app".to_string(),
        Application {
            enabled: true,
            title: None,
            order: 1,
            groups,
        },
    );
    let mut regions = BTreeMap::new();
    regions.insert(
        "us-west-2".to_string(),
        EnvironmentRegion {
            enabled: true,
            account: Some("paco.ref accounts.dev".to_string()),
            applications,
        },
    );
    let mut environments = BTreeMap::new();
    environments.insert(
        "dev".to_string(),
        Environment {
            name: "dev".to_string(),
            account: None,
            regions,
        },
    );
    let mut network_environments = BTreeMap::new();
    network_environments.insert(
        "ne".to_string(),
        NetworkEnvironment {
            name: "ne".to_string(),
            title: None,
            environments,
        },
    );

    let mut buckets = BTreeMap::new();
    buckets.insert(
        "logs".to_string(),
        S3BucketConfig {
            enabled: true,
            account: "paco.ref accounts.dev".to_string(),
            region: "us-west-2".to_string(),
            bucket_name: None,
            deletion_policy: None,
            change_protected: false,
            external_resource: false,
        },
    );
    let mut users = BTreeMap::new();
    users.insert(
        "bob".to_string(),
        CodeCommitUser {
            username: Some("bob".to_string()),
            public_ssh_key: Some("ssh-rsa AAAAB3 bob".to_string()),
        },
    );
    let mut repos = BTreeMap::new();
    repos.insert(
        "tools".to_string(),
        CodeCommitRepository {
            enabled: true,
            account: "dev".to_string(),
            region: "us-west-2".to_string(),
            repository_name: None,
            description: Some("Build tooling".to_string()),
            users,
        },
    );
    let mut repository_groups = BTreeMap::new();
    repository_groups.insert("infra".to_string(), repos);

    let mut resources = BTreeMap::new();
    resources.insert(
        "s3".to_string(),
        GlobalResource::S3(S3Resource { buckets }),
    );
    resources.insert(
        "codecommit".to_string(),
        GlobalResource::CodeCommit(CodeCommitResource { repository_groups }),
    );

    Project {
        manifest: ProjectManifest {
            name: "testproj".to_string(),
            title: None,
            active_regions: vec!["us-west-2".to_string()],
            default_account: Some("dev".to_string()),
        },
        accounts,
        network_environments,
        resources,
        paths: ProjectPaths::new(home, "testproj"),
    }
}

fn context(project: Project, clients: Arc<FakeFactory>) -> Arc<CtlContext> {
    let project = Arc::new(project);
    let store = StackStateStore::new(project.paths.applied_dir());
    Arc::new(CtlContext {
        project,
        clients,
        accounts: AccountRegistry::new(),
        resolvers: Arc::new(ResolverRegistry::new()),
        store,
        poll: PollConfig::immediate(),
        retry: paco_aws::RetryPolicy::immediate(3),
    })
}

#[tokio::test]
async fn test_s3_provision_creates_bucket_stack() {
    let home = tempfile::tempdir().unwrap();
    let clients = FakeFactory::new();
    let orchestrator = Orchestrator::new(context(sample_project(home.path()), clients.clone()));

    orchestrator
        .run(Command::Provision, "resource.s3")
        .await
        .unwrap();

    let name = stack_name(&["resource", "s3", "buckets", "logs"]);
    assert!(clients.cfn.stack_exists(&name));
    assert_eq!(clients.cfn.call_count("CreateStack"), 1);
}

#[tokio::test]
async fn test_s3_delete_empties_bucket_first() {
    let home = tempfile::tempdir().unwrap();
    let clients = FakeFactory::new();
    // The derived physical bucket name exists and is non-empty.
    clients
        .s3
        .put_bucket("testproj-logs-dev", &["a.log", "b.log"]);
    let orchestrator = Orchestrator::new(context(sample_project(home.path()), clients.clone()));

    orchestrator
        .run(Command::Provision, "resource.s3")
        .await
        .unwrap();
    orchestrator
        .run(Command::Delete, "resource.s3")
        .await
        .unwrap();

    let name = stack_name(&["resource", "s3", "buckets", "logs"]);
    assert!(!clients.cfn.stack_exists(&name));
    assert_eq!(clients.s3.objects("testproj-logs-dev").unwrap().len(), 0);
}

#[tokio::test]
async fn test_codecommit_uploads_ssh_keys_once() {
    let home = tempfile::tempdir().unwrap();
    let clients = FakeFactory::new();

    let orchestrator =
        Orchestrator::new(context(sample_project(home.path()), clients.clone()));
    orchestrator
        .run(Command::Provision, "resource.codecommit")
        .await
        .unwrap();
    assert_eq!(clients.iam.keys_for("bob").len(), 1);

    // Re-run with fresh controllers over the same state directory: the
    // stack is unchanged and the hook cache id matches, so no second
    // upload attempt happens.
    let orchestrator =
        Orchestrator::new(context(sample_project(home.path()), clients.clone()));
    orchestrator
        .run(Command::Provision, "resource.codecommit")
        .await
        .unwrap();
    assert_eq!(clients.iam.keys_for("bob").len(), 1);
    assert_eq!(clients.cfn.call_count("CreateStack"), 1);
    assert_eq!(clients.cfn.call_count("UpdateStack"), 0);
}

#[tokio::test]
async fn test_codecommit_changed_key_resyncs_unchanged_stack() {
    let home = tempfile::tempdir().unwrap();
    let clients = FakeFactory::new();

    let orchestrator =
        Orchestrator::new(context(sample_project(home.path()), clients.clone()));
    orchestrator
        .run(Command::Provision, "resource.codecommit")
        .await
        .unwrap();
    assert_eq!(clients.iam.keys_for("bob").len(), 1);

    let mut project = sample_project(home.path());
    if let Some(GlobalResource::CodeCommit(cc)) = project.resources.get_mut("codecommit") {
        let repo = cc
            .repository_groups
            .get_mut("infra")
            .and_then(|g| g.get_mut("tools"))
            .unwrap();
        repo.users.get_mut("bob").unwrap().public_ssh_key =
            Some("ssh-rsa AAAAC4 bob-rotated".to_string());
    }
    let orchestrator = Orchestrator::new(context(project, clients.clone()));
    orchestrator
        .run(Command::Provision, "resource.codecommit")
        .await
        .unwrap();

    // The stack itself saw no template change, but the rotated key
    // invalidates the hook cache and the new key is uploaded.
    assert_eq!(clients.cfn.call_count("UpdateStack"), 0);
    assert_eq!(clients.iam.keys_for("bob").len(), 2);
}

#[tokio::test]
async fn test_netenv_provision_creates_resources_in_order() {
    let home = tempfile::tempdir().unwrap();
    let clients = FakeFactory::new();
    let orchestrator = Orchestrator::new(context(sample_project(home.path()), clients.clone()));

    orchestrator
        .run(Command::Provision, "netenv.ne.dev")
        .await
        .unwrap();

    let bucket = stack_name(&[
        "netenv", "ne", "dev", "us-west-2", "applications", "app", "groups", "site",
        "resources", "bucket",
    ]);
    let topic = stack_name(&[
        "netenv", "ne", "dev", "us-west-2", "applications", "app", "groups", "site",
        "resources", "topic",
    ]);
    assert!(clients.cfn.stack_exists(&bucket));
    assert!(clients.cfn.stack_exists(&topic));
    let creates: Vec<String> = clients
        .cfn
        .calls()
        .into_iter()
        .filter(|c| c.starts_with("CreateStack"))
        .collect();
    assert_eq!(
        creates,
        vec![format!("CreateStack {}", bucket), format!("CreateStack {}", topic)]
    );
}

#[tokio::test]
async fn test_netenv_scope_filters_to_one_resource() {
    let home = tempfile::tempdir().unwrap();
    let clients = FakeFactory::new();
    let orchestrator = Orchestrator::new(context(sample_project(home.path()), clients.clone()));

    orchestrator
        .run(
            Command::Provision,
            "netenv.ne.dev.us-west-2.applications.app.groups.site.resources.topic",
        )
        .await
        .unwrap();

    let bucket = stack_name(&[
        "netenv", "ne", "dev", "us-west-2", "applications", "app", "groups", "site",
        "resources", "bucket",
    ]);
    let topic = stack_name(&[
        "netenv", "ne", "dev", "us-west-2", "applications", "app", "groups", "site",
        "resources", "topic",
    ]);
    assert!(!clients.cfn.stack_exists(&bucket));
    assert!(clients.cfn.stack_exists(&topic));
}

#[tokio::test]
async fn test_scope_must_exist_in_project() {
    let home = tempfile::tempdir().unwrap();
    let clients = FakeFactory::new();
    let orchestrator = Orchestrator::new(context(sample_project(home.path()), clients));

    let err = orchestrator
        .run(Command::Provision, "netenv.bogus.dev")
        .await
        .unwrap_err();
    assert!(matches!(err, CtlError::InvalidScope { .. }));
}

#[tokio::test]
async fn test_account_validate_rejects_malformed_id() {
    let home = tempfile::tempdir().unwrap();
    let clients = FakeFactory::new();
    let mut project = sample_project(home.path());
    project
        .accounts
        .insert("broken".to_string(), account("broken", "1234"));
    let orchestrator = Orchestrator::new(context(project, clients));

    let err = orchestrator
        .run(Command::Validate, "accounts")
        .await
        .unwrap_err();
    assert!(matches!(err, CtlError::InvalidScope { .. }));
}

#[tokio::test]
async fn test_account_delete_is_unsupported() {
    let home = tempfile::tempdir().unwrap();
    let clients = FakeFactory::new();
    let orchestrator = Orchestrator::new(context(sample_project(home.path()), clients));

    let err = orchestrator
        .run(Command::Delete, "accounts")
        .await
        .unwrap_err();
    assert!(matches!(err, CtlError::UnsupportedFeature { .. }));
}
