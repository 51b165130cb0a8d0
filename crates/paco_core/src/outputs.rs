//! Persisted per-stack state.
//!
//! After a successful reconcile the engine records the stack's outputs and
//! the last hook cache ids under the project build directory. Records are
//! written atomically (temp file + rename) so an interrupted run never
//! leaves a half-written file.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::StackResult;
use crate::hooks::HookCacheMap;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StackStateRecord {
    #[serde(default)]
    pub outputs: BTreeMap<String, String>,
    #[serde(default)]
    pub hook_cache_ids: HookCacheMap,
}

/// Directory of per-stack YAML state records, with an optional second
/// directory receiving an outputs-only projection of each record.
#[derive(Debug, Clone)]
pub struct StackStateStore {
    dir: PathBuf,
    outputs_dir: Option<PathBuf>,
}

impl StackStateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            outputs_dir: None,
        }
    }

    /// Also project each stack's outputs into `dir` as a standalone YAML
    /// file, for consumption outside the engine.
    pub fn with_outputs_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.outputs_dir = Some(dir.into());
        self
    }

    fn path(&self, stack_name: &str) -> PathBuf {
        self.dir.join(format!("{}.yaml", stack_name))
    }

    fn outputs_path(&self, stack_name: &str) -> Option<PathBuf> {
        self.outputs_dir
            .as_ref()
            .map(|d| d.join(format!("{}.yaml", stack_name)))
    }

    pub fn load(&self, stack_name: &str) -> StackResult<StackStateRecord> {
        let path = self.path(stack_name);
        if !path.exists() {
            return Ok(StackStateRecord::default());
        }
        let content = fs::read_to_string(&path)?;
        Ok(serde_yaml::from_str(&content)?)
    }

    pub fn save(&self, stack_name: &str, record: &StackStateRecord) -> StackResult<()> {
        let content = serde_yaml::to_string(record)?;
        write_atomic(&self.path(stack_name), content.as_bytes())?;
        if let Some(path) = self.outputs_path(stack_name) {
            let projection = serde_yaml::to_string(&record.outputs)?;
            write_atomic(&path, projection.as_bytes())?;
        }
        Ok(())
    }

    /// Remove the record; deleting a stack deletes its build artefacts.
    pub fn remove(&self, stack_name: &str) -> StackResult<()> {
        let path = self.path(stack_name);
        if path.exists() {
            fs::remove_file(path)?;
        }
        if let Some(path) = self.outputs_path(stack_name) {
            if path.exists() {
                fs::remove_file(path)?;
            }
        }
        Ok(())
    }
}

/// Write a file atomically via a temp file in the same directory.
pub fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, data)?;
    fs::rename(&tmp, path)
}
