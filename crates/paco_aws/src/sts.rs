//! STS service seam: session tokens, role assumption, identity checks.

use async_trait::async_trait;
use aws_sdk_sts::config::{BehaviorVersion, Credentials as SdkCredentials, Region};
use aws_sdk_sts::error::ProvideErrorMetadata;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AwsError, AwsResult};

/// A long-lived IAM access key pair.
#[derive(Debug, Clone)]
pub struct AccessKey {
    pub access_key_id: String,
    pub secret_access_key: String,
}

/// Temporary credentials from `GetSessionToken` or `AssumeRole`,
/// persisted as JSON in the project credential cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TempCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    pub expiration: DateTime<Utc>,
}

impl TempCredentials {
    /// Expired, with a skew margin so credentials are rotated before the
    /// service starts rejecting them mid-operation.
    pub fn is_expired(&self) -> bool {
        Utc::now() + Duration::minutes(5) >= self.expiration
    }
}

/// Caller identity as reported by `GetCallerIdentity`.
#[derive(Debug, Clone)]
pub struct CallerIdentity {
    pub account: String,
    pub arn: String,
}

/// The STS calls the credential broker depends on. Credentials are passed
/// explicitly because each tier of the broker signs with a different set.
#[async_trait]
pub trait StsApi: Send + Sync {
    async fn get_caller_identity(
        &self,
        creds: &TempCredentials,
        region: &str,
    ) -> AwsResult<CallerIdentity>;

    async fn get_session_token(
        &self,
        key: &AccessKey,
        region: &str,
        mfa_serial: &str,
        token_code: &str,
        ttl_secs: u64,
    ) -> AwsResult<TempCredentials>;

    async fn assume_role(
        &self,
        creds: &TempCredentials,
        region: &str,
        role_arn: &str,
        session_name: &str,
        ttl_secs: u64,
    ) -> AwsResult<TempCredentials>;
}

/// Asks the operator for an MFA token code.
pub trait MfaPrompt: Send + Sync {
    fn prompt(&self, mfa_serial: &str) -> AwsResult<String>;
}

/// Reads the token code from stdin.
pub struct StdinPrompt;

impl MfaPrompt for StdinPrompt {
    fn prompt(&self, mfa_serial: &str) -> AwsResult<String> {
        use std::io::{BufRead, Write};
        print!("MFA token for {}: ", mfa_serial);
        std::io::stdout().flush()?;
        let mut line = String::new();
        std::io::stdin().lock().read_line(&mut line)?;
        let code = line.trim().to_string();
        if code.is_empty() {
            return Err(AwsError::CredentialsUnavailable(
                "empty MFA token".to_string(),
            ));
        }
        Ok(code)
    }
}

/// Fails instead of prompting; selected by `--no-prompt` for CI runs.
pub struct NoPrompt;

impl MfaPrompt for NoPrompt {
    fn prompt(&self, mfa_serial: &str) -> AwsResult<String> {
        Err(AwsError::CredentialsUnavailable(format!(
            "MFA session for {} expired and prompting is disabled",
            mfa_serial
        )))
    }
}

/// Live STS implementation backed by the AWS SDK.
pub struct LiveSts;

impl LiveSts {
    fn client(
        access_key_id: &str,
        secret_access_key: &str,
        session_token: Option<String>,
        region: &str,
    ) -> aws_sdk_sts::Client {
        let provider = SdkCredentials::new(
            access_key_id,
            secret_access_key,
            session_token,
            None,
            "paco",
        );
        let config = aws_sdk_sts::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .credentials_provider(provider)
            .build();
        aws_sdk_sts::Client::from_conf(config)
    }
}

fn classify<E>(err: aws_sdk_sts::error::SdkError<E>) -> AwsError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let code = err.code().unwrap_or("Unknown").to_string();
    let message = err.message().unwrap_or("").to_string();
    match code.as_str() {
        "ExpiredToken" | "ExpiredTokenException" | "InvalidClientTokenId" => AwsError::ExpiredToken,
        "Throttling" | "ThrottlingException" => AwsError::Throttled(message),
        "AccessDenied" | "AccessDeniedException" => AwsError::CredentialsUnavailable(message),
        _ => AwsError::Service { code, message },
    }
}

fn convert(creds: Option<&aws_sdk_sts::types::Credentials>) -> AwsResult<TempCredentials> {
    let creds = creds.ok_or_else(|| AwsError::CredentialsUnavailable(
        "STS response carried no credentials".to_string(),
    ))?;
    let expiration = DateTime::<Utc>::from_timestamp(creds.expiration().secs(), 0)
        .unwrap_or_else(Utc::now);
    Ok(TempCredentials {
        access_key_id: creds.access_key_id().to_string(),
        secret_access_key: creds.secret_access_key().to_string(),
        session_token: creds.session_token().to_string(),
        expiration,
    })
}

#[async_trait]
impl StsApi for LiveSts {
    async fn get_caller_identity(
        &self,
        creds: &TempCredentials,
        region: &str,
    ) -> AwsResult<CallerIdentity> {
        let client = Self::client(
            &creds.access_key_id,
            &creds.secret_access_key,
            Some(creds.session_token.clone()),
            region,
        );
        let output = client
            .get_caller_identity()
            .send()
            .await
            .map_err(classify)?;
        Ok(CallerIdentity {
            account: output.account().unwrap_or("").to_string(),
            arn: output.arn().unwrap_or("").to_string(),
        })
    }

    async fn get_session_token(
        &self,
        key: &AccessKey,
        region: &str,
        mfa_serial: &str,
        token_code: &str,
        ttl_secs: u64,
    ) -> AwsResult<TempCredentials> {
        let client = Self::client(&key.access_key_id, &key.secret_access_key, None, region);
        let output = client
            .get_session_token()
            .serial_number(mfa_serial)
            .token_code(token_code)
            .duration_seconds(ttl_secs as i32)
            .send()
            .await
            .map_err(classify)?;
        convert(output.credentials())
    }

    async fn assume_role(
        &self,
        creds: &TempCredentials,
        region: &str,
        role_arn: &str,
        session_name: &str,
        ttl_secs: u64,
    ) -> AwsResult<TempCredentials> {
        let client = Self::client(
            &creds.access_key_id,
            &creds.secret_access_key,
            Some(creds.session_token.clone()),
            region,
        );
        let output = client
            .assume_role()
            .role_arn(role_arn)
            .role_session_name(session_name)
            .duration_seconds(ttl_secs as i32)
            .send()
            .await
            .map_err(classify)?;
        convert(output.credentials())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_includes_skew() {
        let fresh = TempCredentials {
            access_key_id: "AKIA".into(),
            secret_access_key: "secret".into(),
            session_token: "token".into(),
            expiration: Utc::now() + Duration::hours(1),
        };
        assert!(!fresh.is_expired());

        let nearly = TempCredentials {
            expiration: Utc::now() + Duration::minutes(2),
            ..fresh.clone()
        };
        assert!(nearly.is_expired());
    }

    #[test]
    fn test_no_prompt_fails() {
        let err = NoPrompt.prompt("arn:aws:iam::123456789012:mfa/admin").unwrap_err();
        assert!(matches!(err, AwsError::CredentialsUnavailable(_)));
    }
}
