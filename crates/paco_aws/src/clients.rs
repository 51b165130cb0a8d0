//! Per-account, per-region service client cache.
//!
//! Controllers reach AWS through [`AwsClientFactory`] so the engine can be
//! driven by scripted fakes in tests. The live factory asks the broker for
//! assume-role credentials and caches constructed clients keyed by
//! `(account, region)` per service.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, UNIX_EPOCH};

use async_trait::async_trait;
use aws_sdk_cloudformation::config::{BehaviorVersion, Region};

use paco_model::account::AccountContext;

use crate::cfn::{CfnApi, LiveCfn};
use crate::creds::CredentialBroker;
use crate::error::AwsResult;
use crate::iam::{IamApi, LiveIam};
use crate::s3::{LiveS3, S3Api};
use crate::sts::TempCredentials;

#[async_trait]
pub trait AwsClientFactory: Send + Sync {
    async fn cfn(&self, account: &AccountContext, region: &str) -> AwsResult<Arc<dyn CfnApi>>;

    async fn s3(&self, account: &AccountContext, region: &str) -> AwsResult<Arc<dyn S3Api>>;

    async fn iam(&self, account: &AccountContext) -> AwsResult<Arc<dyn IamApi>>;

    /// Drop cached clients and credentials for an account after an expired
    /// token, so the next call re-acquires.
    fn invalidate(&self, account_name: &str);
}

type ClientKey = (String, String);

pub struct LiveClients {
    broker: Arc<CredentialBroker>,
    cfn_cache: Mutex<HashMap<ClientKey, Arc<dyn CfnApi>>>,
    s3_cache: Mutex<HashMap<ClientKey, Arc<dyn S3Api>>>,
    iam_cache: Mutex<HashMap<String, Arc<dyn IamApi>>>,
}

impl LiveClients {
    pub fn new(broker: Arc<CredentialBroker>) -> Self {
        Self {
            broker,
            cfn_cache: Mutex::new(HashMap::new()),
            s3_cache: Mutex::new(HashMap::new()),
            iam_cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn broker(&self) -> &Arc<CredentialBroker> {
        &self.broker
    }

    fn provider(creds: &TempCredentials) -> aws_sdk_cloudformation::config::Credentials {
        let expiry = UNIX_EPOCH + Duration::from_secs(creds.expiration.timestamp().max(0) as u64);
        aws_sdk_cloudformation::config::Credentials::new(
            creds.access_key_id.clone(),
            creds.secret_access_key.clone(),
            Some(creds.session_token.clone()),
            Some(expiry),
            "paco",
        )
    }
}

#[async_trait]
impl AwsClientFactory for LiveClients {
    async fn cfn(&self, account: &AccountContext, region: &str) -> AwsResult<Arc<dyn CfnApi>> {
        let key = (account.name.clone(), region.to_string());
        if let Some(client) = self.cfn_cache.lock().expect("cfn cache lock").get(&key) {
            return Ok(client.clone());
        }
        let creds = self.broker.credentials_for(account).await?;
        let config = aws_sdk_cloudformation::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .credentials_provider(Self::provider(&creds))
            .build();
        let client: Arc<dyn CfnApi> =
            Arc::new(LiveCfn::new(aws_sdk_cloudformation::Client::from_conf(config)));
        self.cfn_cache
            .lock()
            .expect("cfn cache lock")
            .insert(key, client.clone());
        Ok(client)
    }

    async fn s3(&self, account: &AccountContext, region: &str) -> AwsResult<Arc<dyn S3Api>> {
        let key = (account.name.clone(), region.to_string());
        if let Some(client) = self.s3_cache.lock().expect("s3 cache lock").get(&key) {
            return Ok(client.clone());
        }
        let creds = self.broker.credentials_for(account).await?;
        let config = aws_sdk_s3::Config::builder()
            .behavior_version(aws_sdk_s3::config::BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new(region.to_string()))
            .credentials_provider(aws_sdk_s3::config::Credentials::new(
                creds.access_key_id.clone(),
                creds.secret_access_key.clone(),
                Some(creds.session_token.clone()),
                None,
                "paco",
            ))
            .build();
        let client: Arc<dyn S3Api> =
            Arc::new(LiveS3::new(aws_sdk_s3::Client::from_conf(config)));
        self.s3_cache
            .lock()
            .expect("s3 cache lock")
            .insert(key, client.clone());
        Ok(client)
    }

    async fn iam(&self, account: &AccountContext) -> AwsResult<Arc<dyn IamApi>> {
        if let Some(client) = self
            .iam_cache
            .lock()
            .expect("iam cache lock")
            .get(&account.name)
        {
            return Ok(client.clone());
        }
        let creds = self.broker.credentials_for(account).await?;
        // IAM is a global service; the account default region signs the call.
        let config = aws_sdk_iam::Config::builder()
            .behavior_version(aws_sdk_iam::config::BehaviorVersion::latest())
            .region(aws_sdk_iam::config::Region::new(
                account.default_region.clone(),
            ))
            .credentials_provider(aws_sdk_iam::config::Credentials::new(
                creds.access_key_id.clone(),
                creds.secret_access_key.clone(),
                Some(creds.session_token.clone()),
                None,
                "paco",
            ))
            .build();
        let client: Arc<dyn IamApi> =
            Arc::new(LiveIam::new(aws_sdk_iam::Client::from_conf(config)));
        self.iam_cache
            .lock()
            .expect("iam cache lock")
            .insert(account.name.clone(), client.clone());
        Ok(client)
    }

    fn invalidate(&self, account_name: &str) {
        self.cfn_cache
            .lock()
            .expect("cfn cache lock")
            .retain(|(name, _), _| name != account_name);
        self.s3_cache
            .lock()
            .expect("s3 cache lock")
            .retain(|(name, _), _| name != account_name);
        self.iam_cache
            .lock()
            .expect("iam cache lock")
            .remove(account_name);
        self.broker.invalidate(account_name);
    }
}
