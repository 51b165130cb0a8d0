//! Per-project credential configuration (`.credentials.yaml`).
//!
//! This file holds the long-lived IAM access key paco uses to bootstrap MFA
//! sessions. It is written with owner-only permissions and never leaves the
//! project directory.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ModelError, ModelResult};

/// Assume-role sessions are restricted to 1 hour by role chaining.
pub const MAX_ASSUME_ROLE_EXPIRY_SECS: u64 = 3600;

/// Default MFA session lifetime: 12 hours.
pub const DEFAULT_MFA_SESSION_EXPIRY_SECS: u64 = 43200;

/// Contents of `.credentials.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialsConfig {
    pub aws_access_key_id: String,
    pub aws_secret_access_key: String,
    pub aws_default_region: String,
    pub master_account_id: String,
    #[serde(default)]
    pub master_admin_iam_username: Option<String>,
    #[serde(default = "default_admin_iam_role_name")]
    pub admin_iam_role_name: String,
    #[serde(default)]
    pub mfa_role_arn: Option<String>,
    #[serde(default = "default_mfa_expiry")]
    pub mfa_session_expiry_secs: u64,
    #[serde(default = "default_assume_role_expiry")]
    pub assume_role_session_expiry_secs: u64,
}

fn default_admin_iam_role_name() -> String {
    "Administrator".to_string()
}

fn default_mfa_expiry() -> u64 {
    DEFAULT_MFA_SESSION_EXPIRY_SECS
}

fn default_assume_role_expiry() -> u64 {
    MAX_ASSUME_ROLE_EXPIRY_SECS
}

impl CredentialsConfig {
    /// Load credentials config, failing with a actionable message when absent.
    pub fn load(path: &Path) -> ModelResult<Self> {
        if !path.exists() {
            return Err(ModelError::CredentialsUnavailable(format!(
                "{} does not exist. Run `paco init credentials` to create one.",
                path.display()
            )));
        }
        let content = fs::read_to_string(path)?;
        let mut config: CredentialsConfig =
            serde_yaml::from_str(&content).map_err(|e| ModelError::InvalidConfig {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        // Role chaining caps assume-role sessions at one hour.
        config.assume_role_session_expiry_secs = config
            .assume_role_session_expiry_secs
            .min(MAX_ASSUME_ROLE_EXPIRY_SECS);
        Ok(config)
    }

    /// Write credentials config with mode 0600.
    pub fn save(&self, path: &Path) -> ModelResult<()> {
        let content = serde_yaml::to_string(self)?;
        write_private(path, content.as_bytes())?;
        debug!("Wrote credentials config to {:?}", path);
        Ok(())
    }

    /// The ARN of the admin role to assume in a target account.
    pub fn admin_role_arn(&self, account_id: &str, role_name: &str) -> String {
        format!("arn:aws:iam::{}:role/{}", account_id, role_name)
    }

    /// The fallback role in the master account.
    pub fn org_admin_role_arn(&self) -> String {
        format!(
            "arn:aws:iam::{}:role/{}",
            self.master_account_id, self.admin_iam_role_name
        )
    }
}

/// Write a file atomically (temp + rename) with owner-only permissions.
pub fn write_private(path: &Path, data: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, data)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&tmp, fs::Permissions::from_mode(0o600))?;
    }
    fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> CredentialsConfig {
        CredentialsConfig {
            aws_access_key_id: "AKIAEXAMPLE".to_string(),
            aws_secret_access_key: "secret".to_string(),
            aws_default_region: "us-west-2".to_string(),
            master_account_id: "123456789012".to_string(),
            master_admin_iam_username: None,
            admin_iam_role_name: default_admin_iam_role_name(),
            mfa_role_arn: Some("arn:aws:iam::123456789012:mfa/admin".to_string()),
            mfa_session_expiry_secs: DEFAULT_MFA_SESSION_EXPIRY_SECS,
            assume_role_session_expiry_secs: MAX_ASSUME_ROLE_EXPIRY_SECS,
        }
    }

    #[test]
    fn test_round_trip_and_permissions() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(".credentials.yaml");
        sample().save(&path).unwrap();

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }

        let loaded = CredentialsConfig::load(&path).unwrap();
        assert_eq!(loaded.master_account_id, "123456789012");
    }

    #[test]
    fn test_assume_role_expiry_capped() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(".credentials.yaml");
        let mut config = sample();
        config.assume_role_session_expiry_secs = 7200;
        config.save(&path).unwrap();

        let loaded = CredentialsConfig::load(&path).unwrap();
        assert_eq!(loaded.assume_role_session_expiry_secs, MAX_ASSUME_ROLE_EXPIRY_SECS);
    }

    #[test]
    fn test_missing_credentials_file() {
        let tmp = TempDir::new().unwrap();
        let err = CredentialsConfig::load(&tmp.path().join(".credentials.yaml")).unwrap_err();
        assert!(matches!(err, ModelError::CredentialsUnavailable(_)));
    }

    #[test]
    fn test_admin_role_arn() {
        let config = sample();
        assert_eq!(
            config.admin_role_arn("999999999999", "Paco-Organization-Account-Delegate-Role"),
            "arn:aws:iam::999999999999:role/Paco-Organization-Account-Delegate-Role"
        );
    }
}
