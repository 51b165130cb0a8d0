//! CloudFormation service seam.
//!
//! The engine talks to CloudFormation through the [`CfnApi`] trait; the
//! live implementation wraps the AWS SDK client. Tests script the trait
//! directly, so the whole reconciliation state machine runs without AWS.

use std::collections::BTreeMap;

use async_trait::async_trait;
use aws_sdk_cloudformation::error::ProvideErrorMetadata;
use aws_sdk_cloudformation::types::{
    Capability as SdkCapability, Parameter as SdkParameter, Tag as SdkTag,
};
use aws_sdk_cloudformation::Client;
use serde::{Deserialize, Serialize};

use crate::error::{AwsError, AwsResult};

/// Deployed status of a CloudFormation stack, including the synthetic
/// `DoesNotExist` used before a stack is first created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeployedStatus {
    DoesNotExist,
    CreateInProgress,
    CreateFailed,
    CreateComplete,
    RollbackInProgress,
    RollbackFailed,
    RollbackComplete,
    DeleteInProgress,
    DeleteFailed,
    DeleteComplete,
    UpdateInProgress,
    UpdateCompleteCleanupInProgress,
    UpdateComplete,
    UpdateRollbackInProgress,
    UpdateRollbackFailed,
    UpdateRollbackCompleteCleanupInProgress,
    UpdateRollbackComplete,
    ReviewInProgress,
    Unknown,
}

impl DeployedStatus {
    pub fn from_cfn(status: &str) -> Self {
        match status {
            "CREATE_IN_PROGRESS" => Self::CreateInProgress,
            "CREATE_FAILED" => Self::CreateFailed,
            "CREATE_COMPLETE" => Self::CreateComplete,
            "ROLLBACK_IN_PROGRESS" => Self::RollbackInProgress,
            "ROLLBACK_FAILED" => Self::RollbackFailed,
            "ROLLBACK_COMPLETE" => Self::RollbackComplete,
            "DELETE_IN_PROGRESS" => Self::DeleteInProgress,
            "DELETE_FAILED" => Self::DeleteFailed,
            "DELETE_COMPLETE" => Self::DeleteComplete,
            "UPDATE_IN_PROGRESS" => Self::UpdateInProgress,
            "UPDATE_COMPLETE_CLEANUP_IN_PROGRESS" => Self::UpdateCompleteCleanupInProgress,
            "UPDATE_COMPLETE" => Self::UpdateComplete,
            "UPDATE_ROLLBACK_IN_PROGRESS" => Self::UpdateRollbackInProgress,
            "UPDATE_ROLLBACK_FAILED" => Self::UpdateRollbackFailed,
            "UPDATE_ROLLBACK_COMPLETE_CLEANUP_IN_PROGRESS" => {
                Self::UpdateRollbackCompleteCleanupInProgress
            }
            "UPDATE_ROLLBACK_COMPLETE" => Self::UpdateRollbackComplete,
            "REVIEW_IN_PROGRESS" => Self::ReviewInProgress,
            _ => Self::Unknown,
        }
    }

    /// A terminal status the engine treats as successful deployment.
    pub fn is_terminal_success(&self) -> bool {
        matches!(self, Self::CreateComplete | Self::UpdateComplete)
    }

    /// Any rollback or failed status; terminal failure for the run.
    pub fn is_failed(&self) -> bool {
        matches!(
            self,
            Self::CreateFailed
                | Self::RollbackInProgress
                | Self::RollbackFailed
                | Self::RollbackComplete
                | Self::DeleteFailed
                | Self::UpdateRollbackInProgress
                | Self::UpdateRollbackFailed
                | Self::UpdateRollbackCompleteCleanupInProgress
                | Self::UpdateRollbackComplete
        )
    }

    pub fn is_in_progress(&self) -> bool {
        matches!(
            self,
            Self::CreateInProgress
                | Self::DeleteInProgress
                | Self::UpdateInProgress
                | Self::UpdateCompleteCleanupInProgress
        )
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_in_progress() && !matches!(self, Self::Unknown)
    }
}

/// CloudFormation capabilities a template may require.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Capability {
    Iam,
    NamedIam,
}

impl Capability {
    fn to_sdk(self) -> SdkCapability {
        match self {
            Capability::Iam => SdkCapability::CapabilityIam,
            Capability::NamedIam => SdkCapability::CapabilityNamedIam,
        }
    }
}

/// A stack parameter as sent to CloudFormation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CfnParameter {
    pub key: String,
    pub value: String,
    #[serde(default)]
    pub use_previous_value: bool,
}

/// A stack tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CfnTag {
    pub key: String,
    pub value: String,
}

/// Everything needed for a CreateStack or UpdateStack call.
#[derive(Debug, Clone)]
pub struct StackLaunch {
    pub name: String,
    pub template_body: String,
    pub parameters: Vec<CfnParameter>,
    pub capabilities: Vec<Capability>,
    pub tags: Vec<CfnTag>,
    pub disable_rollback: bool,
}

/// Description of a deployed stack.
#[derive(Debug, Clone)]
pub struct StackDescription {
    pub stack_id: String,
    pub status: DeployedStatus,
    pub outputs: BTreeMap<String, String>,
    pub parameters: Vec<CfnParameter>,
    pub termination_protection: bool,
}

/// The CloudFormation calls the orchestrator depends on.
#[async_trait]
pub trait CfnApi: Send + Sync {
    /// `ValidateTemplate`. Never mutates AWS state.
    async fn validate_template(&self, body: &str) -> AwsResult<()>;

    /// `DescribeStacks` for one stack; `None` when it does not exist.
    async fn describe_stack(&self, name: &str) -> AwsResult<Option<StackDescription>>;

    /// `GetTemplate`: the deployed template body.
    async fn get_template(&self, name: &str) -> AwsResult<String>;

    /// `CreateStack`; returns the stack id.
    async fn create_stack(&self, launch: &StackLaunch) -> AwsResult<String>;

    /// `UpdateStack`; a no-op update surfaces as
    /// [`AwsError::NoUpdatesToPerform`].
    async fn update_stack(&self, launch: &StackLaunch) -> AwsResult<()>;

    /// `DeleteStack`.
    async fn delete_stack(&self, name: &str) -> AwsResult<()>;

    /// `UpdateTerminationProtection`.
    async fn update_termination_protection(&self, name: &str, enabled: bool) -> AwsResult<()>;
}

/// Live CloudFormation client backed by the AWS SDK.
pub struct LiveCfn {
    client: Client,
}

impl LiveCfn {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn classify<E>(err: aws_sdk_cloudformation::error::SdkError<E>) -> AwsError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let code = err.code().unwrap_or("Unknown").to_string();
    let message = err.message().unwrap_or("").to_string();
    if code == "Throttling" || code == "ThrottlingException" || message.contains("Rate exceeded") {
        return AwsError::Throttled(message);
    }
    if code == "ExpiredToken" || code == "ExpiredTokenException" {
        return AwsError::ExpiredToken;
    }
    if code == "ValidationError" {
        if message.ends_with("does not exist") {
            return AwsError::StackNotFound(message);
        }
        if message.ends_with("No updates are to be performed.") {
            return AwsError::NoUpdatesToPerform;
        }
        return AwsError::TemplateValidation(message);
    }
    AwsError::Service { code, message }
}

fn to_sdk_parameters(parameters: &[CfnParameter]) -> Vec<SdkParameter> {
    parameters
        .iter()
        .map(|p| {
            SdkParameter::builder()
                .parameter_key(&p.key)
                .parameter_value(&p.value)
                .use_previous_value(p.use_previous_value)
                .build()
        })
        .collect()
}

fn to_sdk_tags(tags: &[CfnTag]) -> Vec<SdkTag> {
    tags.iter()
        .map(|t| SdkTag::builder().key(&t.key).value(&t.value).build())
        .collect()
}

#[async_trait]
impl CfnApi for LiveCfn {
    async fn validate_template(&self, body: &str) -> AwsResult<()> {
        self.client
            .validate_template()
            .template_body(body)
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn describe_stack(&self, name: &str) -> AwsResult<Option<StackDescription>> {
        let result = self.client.describe_stacks().stack_name(name).send().await;
        let output = match result {
            Ok(output) => output,
            Err(err) => {
                return match classify(err) {
                    AwsError::StackNotFound(_) => Ok(None),
                    other => Err(other),
                }
            }
        };
        let stack = match output.stacks().first() {
            Some(stack) => stack,
            None => return Ok(None),
        };

        let mut outputs = BTreeMap::new();
        for out in stack.outputs() {
            if let (Some(key), Some(value)) = (out.output_key(), out.output_value()) {
                outputs.insert(key.to_string(), value.to_string());
            }
        }
        let parameters = stack
            .parameters()
            .iter()
            .filter_map(|p| {
                Some(CfnParameter {
                    key: p.parameter_key()?.to_string(),
                    value: p.parameter_value().unwrap_or("").to_string(),
                    use_previous_value: p.use_previous_value().unwrap_or(false),
                })
            })
            .collect();

        Ok(Some(StackDescription {
            stack_id: stack.stack_id().unwrap_or("").to_string(),
            status: stack
                .stack_status()
                .map(|s| DeployedStatus::from_cfn(s.as_str()))
                .unwrap_or(DeployedStatus::Unknown),
            outputs,
            parameters,
            termination_protection: stack.enable_termination_protection().unwrap_or(false),
        }))
    }

    async fn get_template(&self, name: &str) -> AwsResult<String> {
        let output = self
            .client
            .get_template()
            .stack_name(name)
            .send()
            .await
            .map_err(classify)?;
        Ok(output.template_body().unwrap_or("").to_string())
    }

    async fn create_stack(&self, launch: &StackLaunch) -> AwsResult<String> {
        let output = self
            .client
            .create_stack()
            .stack_name(&launch.name)
            .template_body(&launch.template_body)
            .set_parameters(Some(to_sdk_parameters(&launch.parameters)))
            .set_capabilities(Some(
                launch.capabilities.iter().map(|c| c.to_sdk()).collect(),
            ))
            .set_tags(Some(to_sdk_tags(&launch.tags)))
            .disable_rollback(launch.disable_rollback)
            .send()
            .await
            .map_err(classify)?;
        Ok(output.stack_id().unwrap_or("").to_string())
    }

    async fn update_stack(&self, launch: &StackLaunch) -> AwsResult<()> {
        self.client
            .update_stack()
            .stack_name(&launch.name)
            .template_body(&launch.template_body)
            .use_previous_template(false)
            .set_parameters(Some(to_sdk_parameters(&launch.parameters)))
            .set_capabilities(Some(
                launch.capabilities.iter().map(|c| c.to_sdk()).collect(),
            ))
            .set_tags(Some(to_sdk_tags(&launch.tags)))
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn delete_stack(&self, name: &str) -> AwsResult<()> {
        self.client
            .delete_stack()
            .stack_name(name)
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn update_termination_protection(&self, name: &str, enabled: bool) -> AwsResult<()> {
        self.client
            .update_termination_protection()
            .stack_name(name)
            .enable_termination_protection(enabled)
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            DeployedStatus::from_cfn("CREATE_COMPLETE"),
            DeployedStatus::CreateComplete
        );
        assert_eq!(
            DeployedStatus::from_cfn("UPDATE_ROLLBACK_COMPLETE"),
            DeployedStatus::UpdateRollbackComplete
        );
        assert_eq!(DeployedStatus::from_cfn("???"), DeployedStatus::Unknown);
    }

    #[test]
    fn test_tag_conversion() {
        let tags = vec![CfnTag {
            key: "Paco-Stack-Name".to_string(),
            value: "Ne-Dev-UsWest2".to_string(),
        }];
        let sdk = to_sdk_tags(&tags);
        assert_eq!(sdk.len(), 1);
        assert_eq!(sdk[0].key(), Some("Paco-Stack-Name"));
        assert_eq!(sdk[0].value(), Some("Ne-Dev-UsWest2"));
    }

    #[test]
    fn test_status_predicates() {
        assert!(DeployedStatus::CreateComplete.is_terminal_success());
        assert!(DeployedStatus::UpdateComplete.is_terminal_success());
        assert!(!DeployedStatus::RollbackComplete.is_terminal_success());
        assert!(DeployedStatus::RollbackComplete.is_failed());
        assert!(DeployedStatus::UpdateRollbackInProgress.is_failed());
        assert!(DeployedStatus::CreateInProgress.is_in_progress());
        assert!(DeployedStatus::DeleteComplete.is_terminal());
        assert!(!DeployedStatus::UpdateInProgress.is_terminal());
    }
}
