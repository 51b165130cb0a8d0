//! Data models for the loaded project graph.
//!
//! The model is a frozen tree of typed nodes, each addressable by a dotted
//! path (its `paco_ref_parts`). Controllers and stacks answer runtime-valued
//! attribute lookups through the resolver registry; the model itself only
//! answers structural descent.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Reference scheme token used in all project files.
pub const REF_SCHEME: &str = "paco.ref";

/// Substitution scheme token for embedded references in scalar fields.
pub const SUB_SCHEME: &str = "paco.sub";

/// Filesystem locations derived from the project home directory.
#[derive(Debug, Clone)]
pub struct ProjectPaths {
    pub home: PathBuf,
    pub build_path: PathBuf,
    pub outputs_path: PathBuf,
    pub credentials_path: PathBuf,
    pub context_path: PathBuf,
}

impl ProjectPaths {
    pub fn new(home: impl Into<PathBuf>, project_name: &str) -> Self {
        let home = home.into();
        Self {
            build_path: home.join("build").join(project_name),
            outputs_path: home.join("Outputs"),
            credentials_path: home.join(".credentials.yaml"),
            context_path: home.join(".project_context.yaml"),
            home,
        }
    }

    /// Directory for cached temporary credentials.
    pub fn credentials_cache_dir(&self) -> PathBuf {
        self.build_path.join(".credentials")
    }

    /// Directory for rendered and applied CloudFormation templates.
    pub fn templates_dir(&self) -> PathBuf {
        self.build_path.join("templates")
    }

    pub fn applied_dir(&self) -> PathBuf {
        self.build_path.join("applied").join("cloudformation")
    }
}

/// Root manifest loaded from `project.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectManifest {
    pub name: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub active_regions: Vec<String>,
    #[serde(default)]
    pub default_account: Option<String>,
}

/// One AWS account, loaded from `Accounts/<name>.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub title: Option<String>,
    pub account_id: String,
    pub region: String,
    #[serde(default = "default_admin_role")]
    pub admin_delegate_role_name: String,
    #[serde(default)]
    pub organization_account: bool,
    #[serde(default)]
    pub root_email: Option<String>,
}

fn default_admin_role() -> String {
    "Paco-Organization-Account-Delegate-Role".to_string()
}

/// A network environment, loaded from `NetworkEnvironments/<name>.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkEnvironment {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub environments: BTreeMap<String, Environment>,
}

/// One environment (dev, staging, prod) inside a network environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Environment {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub account: Option<String>,
    #[serde(default)]
    pub regions: BTreeMap<String, EnvironmentRegion>,
}

/// Per-region configuration of an environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentRegion {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub account: Option<String>,
    #[serde(default)]
    pub applications: BTreeMap<String, Application>,
}

/// An application: an ordered collection of resource groups.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Application {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub order: u32,
    #[serde(default)]
    pub groups: BTreeMap<String, ResourceGroup>,
}

/// A group of resources provisioned together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceGroup {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub order: u32,
    #[serde(default)]
    pub resources: BTreeMap<String, Resource>,
}

/// A single cloud resource. The per-type configuration stays opaque to the
/// engine; template producers interpret it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    #[serde(rename = "type")]
    pub resource_type: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub change_protected: bool,
    #[serde(default)]
    pub order: u32,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(flatten)]
    pub config: serde_yaml::Mapping,
}

fn default_true() -> bool {
    true
}

/// Global resources loaded from `Resources/*.yaml`, keyed by file stem.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GlobalResource {
    S3(S3Resource),
    CodeCommit(CodeCommitResource),
    /// Resource files paco recognizes but for which no controller is
    /// registered yet. Kept addressable so references fail with a
    /// resolver error rather than a load error.
    Other(serde_yaml::Mapping),
}

/// `Resources/s3.yaml`: globally managed buckets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Resource {
    #[serde(default)]
    pub buckets: BTreeMap<String, S3BucketConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3BucketConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub account: String,
    pub region: String,
    #[serde(default)]
    pub bucket_name: Option<String>,
    #[serde(default)]
    pub deletion_policy: Option<String>,
    #[serde(default)]
    pub change_protected: bool,
    #[serde(default)]
    pub external_resource: bool,
}

/// `Resources/codecommit.yaml`: repository groups with per-user SSH keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeCommitResource {
    #[serde(default)]
    pub repository_groups: BTreeMap<String, BTreeMap<String, CodeCommitRepository>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeCommitRepository {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub account: String,
    pub region: String,
    #[serde(default)]
    pub repository_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub users: BTreeMap<String, CodeCommitUser>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeCommitUser {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub public_ssh_key: Option<String>,
}

/// The fully loaded, frozen project graph.
#[derive(Debug, Clone)]
pub struct Project {
    pub manifest: ProjectManifest,
    pub accounts: BTreeMap<String, Account>,
    pub network_environments: BTreeMap<String, NetworkEnvironment>,
    pub resources: BTreeMap<String, GlobalResource>,
    pub paths: ProjectPaths,
}

impl Project {
    pub fn name(&self) -> &str {
        &self.manifest.name
    }

    pub fn account(&self, name: &str) -> Option<&Account> {
        self.accounts.get(name)
    }

    /// Walk a dotted path against the model and return the node it names.
    ///
    /// Only structural descent happens here; runtime-valued attributes
    /// (`.arn`, `.name`, `.id`) are answered by registered resolvers.
    pub fn node_at<'a>(&'a self, parts: &[&str]) -> Option<NodeRef<'a>> {
        let mut node = NodeRef::Project(self);
        for part in parts {
            node = node.child(part)?;
        }
        Some(node)
    }
}

/// A borrowed view of one addressable model node.
#[derive(Debug, Clone, Copy)]
pub enum NodeRef<'a> {
    Project(&'a Project),
    Accounts(&'a BTreeMap<String, Account>),
    Account(&'a Account),
    NetEnvRoot(&'a BTreeMap<String, NetworkEnvironment>),
    NetEnv(&'a NetworkEnvironment),
    Environment(&'a Environment),
    EnvironmentRegion(&'a EnvironmentRegion),
    Applications(&'a BTreeMap<String, Application>),
    Application(&'a Application),
    Groups(&'a BTreeMap<String, ResourceGroup>),
    ResourceGroup(&'a ResourceGroup),
    Resources(&'a BTreeMap<String, Resource>),
    Resource(&'a Resource),
    GlobalResources(&'a BTreeMap<String, GlobalResource>),
    GlobalResource(&'a GlobalResource),
    S3Buckets(&'a BTreeMap<String, S3BucketConfig>),
    S3Bucket(&'a S3BucketConfig),
    CodeCommitRepoGroup(&'a BTreeMap<String, CodeCommitRepository>),
    CodeCommitRepo(&'a CodeCommitRepository),
    Scalar(&'a str),
}

impl<'a> NodeRef<'a> {
    /// Descend one path segment.
    pub fn child(self, seg: &str) -> Option<NodeRef<'a>> {
        match self {
            NodeRef::Project(p) => match seg {
                "accounts" => Some(NodeRef::Accounts(&p.accounts)),
                "netenv" => Some(NodeRef::NetEnvRoot(&p.network_environments)),
                "resource" => Some(NodeRef::GlobalResources(&p.resources)),
                _ => None,
            },
            NodeRef::Accounts(m) => m.get(seg).map(NodeRef::Account),
            NodeRef::Account(a) => match seg {
                "id" => Some(NodeRef::Scalar(&a.account_id)),
                "name" => Some(NodeRef::Scalar(&a.name)),
                "region" => Some(NodeRef::Scalar(&a.region)),
                _ => None,
            },
            NodeRef::NetEnvRoot(m) => m.get(seg).map(NodeRef::NetEnv),
            NodeRef::NetEnv(ne) => ne.environments.get(seg).map(NodeRef::Environment),
            NodeRef::Environment(env) => env.regions.get(seg).map(NodeRef::EnvironmentRegion),
            NodeRef::EnvironmentRegion(er) => match seg {
                "applications" => Some(NodeRef::Applications(&er.applications)),
                _ => None,
            },
            NodeRef::Applications(m) => m.get(seg).map(NodeRef::Application),
            NodeRef::Application(app) => match seg {
                "groups" => Some(NodeRef::Groups(&app.groups)),
                _ => None,
            },
            NodeRef::Groups(m) => m.get(seg).map(NodeRef::ResourceGroup),
            NodeRef::ResourceGroup(grp) => match seg {
                "resources" => Some(NodeRef::Resources(&grp.resources)),
                _ => None,
            },
            NodeRef::Resources(m) => m.get(seg).map(NodeRef::Resource),
            NodeRef::Resource(res) => res
                .config
                .get(serde_yaml::Value::String(seg.to_string()))
                .and_then(|v| v.as_str())
                .map(NodeRef::Scalar),
            NodeRef::GlobalResources(m) => m.get(seg).map(NodeRef::GlobalResource),
            NodeRef::GlobalResource(gr) => match gr {
                GlobalResource::S3(s3) => match seg {
                    "buckets" => Some(NodeRef::S3Buckets(&s3.buckets)),
                    _ => s3.buckets.get(seg).map(NodeRef::S3Bucket),
                },
                GlobalResource::CodeCommit(cc) => cc
                    .repository_groups
                    .get(seg)
                    .map(NodeRef::CodeCommitRepoGroup),
                GlobalResource::Other(_) => None,
            },
            NodeRef::S3Buckets(m) => m.get(seg).map(NodeRef::S3Bucket),
            NodeRef::CodeCommitRepoGroup(m) => m.get(seg).map(NodeRef::CodeCommitRepo),
            NodeRef::S3Bucket(_) | NodeRef::CodeCommitRepo(_) | NodeRef::Scalar(_) => None,
        }
    }

    /// A scalar value for nodes that are leaves.
    pub fn as_scalar(&self) -> Option<&'a str> {
        match self {
            NodeRef::Scalar(s) => Some(s),
            _ => None,
        }
    }
}

/// Identity file persisted by `init project`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectContext {
    pub project_name: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_project() -> Project {
        let mut accounts = BTreeMap::new();
        accounts.insert(
            "dev".to_string(),
            Account {
                name: "dev".to_string(),
                title: None,
                account_id: "123456789012".to_string(),
                region: "us-west-2".to_string(),
                admin_delegate_role_name: default_admin_role(),
                organization_account: false,
                root_email: None,
            },
        );
        Project {
            manifest: ProjectManifest {
                name: "testproj".to_string(),
                title: None,
                active_regions: vec!["us-west-2".to_string()],
                default_account: Some("dev".to_string()),
            },
            accounts,
            network_environments: BTreeMap::new(),
            resources: BTreeMap::new(),
            paths: ProjectPaths::new("/tmp/testproj", "testproj"),
        }
    }

    #[test]
    fn test_node_at_account_id() {
        let project = sample_project();
        let node = project.node_at(&["accounts", "dev", "id"]).unwrap();
        assert_eq!(node.as_scalar(), Some("123456789012"));
    }

    #[test]
    fn test_node_at_missing_segment() {
        let project = sample_project();
        assert!(project.node_at(&["accounts", "prod"]).is_none());
        assert!(project.node_at(&["bogus"]).is_none());
    }

    #[test]
    fn test_project_paths() {
        let paths = ProjectPaths::new("/home/user/proj", "proj");
        assert_eq!(paths.build_path, PathBuf::from("/home/user/proj/build/proj"));
        assert_eq!(paths.outputs_path, PathBuf::from("/home/user/proj/Outputs"));
    }
}
