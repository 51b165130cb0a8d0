//! IAM service seam for repository SSH key hooks.

use async_trait::async_trait;
use aws_sdk_iam::error::ProvideErrorMetadata;
use aws_sdk_iam::Client;

use crate::error::{AwsError, AwsResult};

/// The IAM calls repository controllers depend on.
#[async_trait]
pub trait IamApi: Send + Sync {
    /// SSH public key bodies currently registered for a user.
    async fn list_ssh_public_keys(&self, username: &str) -> AwsResult<Vec<String>>;

    async fn upload_ssh_public_key(&self, username: &str, body: &str) -> AwsResult<()>;
}

pub struct LiveIam {
    client: Client,
}

impl LiveIam {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn classify<E>(err: aws_sdk_iam::error::SdkError<E>) -> AwsError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let code = err.code().unwrap_or("Unknown").to_string();
    let message = err.message().unwrap_or("").to_string();
    match code.as_str() {
        "ExpiredToken" => AwsError::ExpiredToken,
        "Throttling" => AwsError::Throttled(message),
        _ => AwsError::Service { code, message },
    }
}

#[async_trait]
impl IamApi for LiveIam {
    async fn list_ssh_public_keys(&self, username: &str) -> AwsResult<Vec<String>> {
        let listing = self
            .client
            .list_ssh_public_keys()
            .user_name(username)
            .send()
            .await
            .map_err(classify)?;

        let mut bodies = Vec::new();
        for meta in listing.ssh_public_keys() {
            let output = self
                .client
                .get_ssh_public_key()
                .user_name(username)
                .ssh_public_key_id(meta.ssh_public_key_id())
                .encoding(aws_sdk_iam::types::EncodingType::Ssh)
                .send()
                .await
                .map_err(classify)?;
            if let Some(key) = output.ssh_public_key() {
                bodies.push(key.ssh_public_key_body().to_string());
            }
        }
        Ok(bodies)
    }

    async fn upload_ssh_public_key(&self, username: &str, body: &str) -> AwsResult<()> {
        self.client
            .upload_ssh_public_key()
            .user_name(username)
            .ssh_public_key_body(body)
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }
}
