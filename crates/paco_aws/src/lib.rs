//! # paco_aws
//!
//! AWS service seams and the two-tier credential broker.
//!
//! Every AWS service the engine touches is behind an async trait
//! ([`CfnApi`], [`StsApi`], [`S3Api`], [`IamApi`]) with a live SDK
//! implementation. The [`CredentialBroker`] turns the project's long-lived
//! access key into MFA session credentials and per-account assume-role
//! credentials, persisting both with owner-only permissions.

pub mod cfn;
pub mod clients;
pub mod creds;
pub mod error;
pub mod iam;
pub mod retry;
pub mod s3;
pub mod sts;

pub use cfn::{
    Capability, CfnApi, CfnParameter, CfnTag, DeployedStatus, LiveCfn, StackDescription,
    StackLaunch,
};
pub use clients::{AwsClientFactory, LiveClients};
pub use creds::CredentialBroker;
pub use error::{AwsError, AwsResult};
pub use iam::{IamApi, LiveIam};
pub use retry::{with_backoff, RetryPolicy};
pub use s3::{LiveS3, S3Api};
pub use sts::{
    AccessKey, CallerIdentity, LiveSts, MfaPrompt, NoPrompt, StdinPrompt, StsApi, TempCredentials,
};
