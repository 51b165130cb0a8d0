//! Project file reading utilities.
//!
//! Loads the declarative project layout from disk:
//! `project.yaml`, `Accounts/<name>.yaml`, `NetworkEnvironments/<name>.yaml`
//! and `Resources/*.yaml`. The result is a frozen [`Project`] graph.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{ModelError, ModelResult};
use crate::models::{
    Account, CodeCommitResource, GlobalResource, NetworkEnvironment, Project, ProjectManifest,
    ProjectPaths, S3Resource,
};

/// Reader for a paco project directory.
pub struct ProjectReader;

impl ProjectReader {
    /// Load a full project from its home directory.
    pub fn load(home: impl AsRef<Path>) -> ModelResult<Project> {
        let home = home.as_ref();
        let manifest_path = home.join("project.yaml");
        if !manifest_path.exists() {
            return Err(ModelError::ProjectNotFound(home.to_path_buf()));
        }

        let manifest: ProjectManifest = read_yaml(&manifest_path)?;
        debug!("Loaded project manifest: {}", manifest.name);

        let accounts = Self::load_accounts(&home.join("Accounts"))?;
        let network_environments =
            Self::load_network_environments(&home.join("NetworkEnvironments"))?;
        let resources = Self::load_global_resources(&home.join("Resources"))?;

        let paths = ProjectPaths::new(home, &manifest.name);
        Ok(Project {
            manifest,
            accounts,
            network_environments,
            resources,
            paths,
        })
    }

    fn load_accounts(dir: &Path) -> ModelResult<BTreeMap<String, Account>> {
        let mut accounts = BTreeMap::new();
        for (name, path) in yaml_files(dir) {
            let mut account: Account = read_yaml(&path)?;
            account.name = name.clone();
            accounts.insert(name, account);
        }
        Ok(accounts)
    }

    fn load_network_environments(dir: &Path) -> ModelResult<BTreeMap<String, NetworkEnvironment>> {
        let mut netenvs = BTreeMap::new();
        for (name, path) in yaml_files(dir) {
            let mut netenv: NetworkEnvironment = read_yaml(&path)?;
            netenv.name = name.clone();
            for (env_name, env) in netenv.environments.iter_mut() {
                env.name = env_name.clone();
            }
            netenvs.insert(name, netenv);
        }
        Ok(netenvs)
    }

    fn load_global_resources(dir: &Path) -> ModelResult<BTreeMap<String, GlobalResource>> {
        let mut resources = BTreeMap::new();
        for (name, path) in yaml_files(dir) {
            let resource = match name.as_str() {
                "s3" => GlobalResource::S3(read_yaml::<S3Resource>(&path)?),
                "codecommit" => GlobalResource::CodeCommit(read_yaml::<CodeCommitResource>(&path)?),
                _ => {
                    warn!("No controller registered for Resources/{}.yaml", name);
                    GlobalResource::Other(read_yaml(&path)?)
                }
            };
            resources.insert(name, resource);
        }
        Ok(resources)
    }
}

/// Enumerate `<stem>.yaml` files directly under a directory.
///
/// A missing directory is not an error; projects declare only what they use.
fn yaml_files(dir: &Path) -> Vec<(String, PathBuf)> {
    let mut files = Vec::new();
    if !dir.exists() {
        return files;
    }
    for entry in WalkDir::new(dir)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if path.is_file() && path.extension().map_or(false, |e| e == "yaml" || e == "yml") {
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                files.push((stem.to_string(), path.to_path_buf()));
            }
        }
    }
    files.sort();
    files
}

fn read_yaml<T: serde::de::DeserializeOwned>(path: &Path) -> ModelResult<T> {
    let content = fs::read_to_string(path)?;
    serde_yaml::from_str(&content).map_err(|e| ModelError::InvalidConfig {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}
