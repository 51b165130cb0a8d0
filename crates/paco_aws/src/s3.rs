//! S3 service seam for bucket hooks.

use async_trait::async_trait;
use aws_sdk_s3::error::ProvideErrorMetadata;
use aws_sdk_s3::types::{Delete, ObjectIdentifier};
use aws_sdk_s3::Client;
use tracing::info;

use crate::error::{AwsError, AwsResult};

/// The S3 calls bucket controllers depend on.
#[async_trait]
pub trait S3Api: Send + Sync {
    async fn bucket_exists(&self, bucket: &str) -> AwsResult<bool>;

    /// Delete every object and object version so the bucket can be removed
    /// by CloudFormation.
    async fn empty_bucket(&self, bucket: &str) -> AwsResult<()>;
}

pub struct LiveS3 {
    client: Client,
}

impl LiveS3 {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn delete_batch(&self, bucket: &str, objects: Vec<ObjectIdentifier>) -> AwsResult<()> {
        if objects.is_empty() {
            return Ok(());
        }
        let delete = Delete::builder()
            .set_objects(Some(objects))
            .quiet(true)
            .build()
            .map_err(|e| AwsError::Service {
                code: "InvalidDelete".to_string(),
                message: e.to_string(),
            })?;
        self.client
            .delete_objects()
            .bucket(bucket)
            .delete(delete)
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }
}

fn classify<E>(err: aws_sdk_s3::error::SdkError<E>) -> AwsError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let code = err.code().unwrap_or("Unknown").to_string();
    let message = err.message().unwrap_or("").to_string();
    match code.as_str() {
        "ExpiredToken" => AwsError::ExpiredToken,
        "SlowDown" | "Throttling" => AwsError::Throttled(message),
        _ => AwsError::Service { code, message },
    }
}

fn identifier(key: &str, version_id: Option<&str>) -> AwsResult<ObjectIdentifier> {
    let mut builder = ObjectIdentifier::builder().key(key);
    if let Some(version) = version_id {
        builder = builder.version_id(version);
    }
    builder.build().map_err(|e| AwsError::Service {
        code: "InvalidObjectIdentifier".to_string(),
        message: e.to_string(),
    })
}

#[async_trait]
impl S3Api for LiveS3 {
    async fn bucket_exists(&self, bucket: &str) -> AwsResult<bool> {
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(true),
            Err(err) => match classify(err) {
                AwsError::Service { code, .. } if code == "NotFound" || code == "NoSuchBucket" => {
                    Ok(false)
                }
                other => Err(other),
            },
        }
    }

    async fn empty_bucket(&self, bucket: &str) -> AwsResult<()> {
        // Current objects.
        let mut continuation: Option<String> = None;
        loop {
            let output = self
                .client
                .list_objects_v2()
                .bucket(bucket)
                .set_continuation_token(continuation.clone())
                .send()
                .await
                .map_err(classify)?;
            let batch: Vec<ObjectIdentifier> = output
                .contents()
                .iter()
                .filter_map(|o| o.key())
                .map(|k| identifier(k, None))
                .collect::<AwsResult<_>>()?;
            self.delete_batch(bucket, batch).await?;
            match output.next_continuation_token() {
                Some(token) => continuation = Some(token.to_string()),
                None => break,
            }
        }

        // Versions and delete markers in versioned buckets.
        let mut key_marker: Option<String> = None;
        let mut version_marker: Option<String> = None;
        loop {
            let output = self
                .client
                .list_object_versions()
                .bucket(bucket)
                .set_key_marker(key_marker.clone())
                .set_version_id_marker(version_marker.clone())
                .send()
                .await
                .map_err(classify)?;
            let mut batch = Vec::new();
            for version in output.versions() {
                if let Some(key) = version.key() {
                    batch.push(identifier(key, version.version_id())?);
                }
            }
            for marker in output.delete_markers() {
                if let Some(key) = marker.key() {
                    batch.push(identifier(key, marker.version_id())?);
                }
            }
            self.delete_batch(bucket, batch).await?;
            if output.is_truncated().unwrap_or(false) {
                key_marker = output.next_key_marker().map(str::to_string);
                version_marker = output.next_version_id_marker().map(str::to_string);
            } else {
                break;
            }
        }

        info!("Emptied bucket {}", bucket);
        Ok(())
    }
}
