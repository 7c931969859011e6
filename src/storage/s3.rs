use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_config::meta::region::RegionProviderChain;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use tracing::{debug, info};

use super::ObjectStore;
use crate::config::StorageSettings;
use crate::utils::error::StorageError;

/// S3 bucket client. Credentials come from the standard AWS environment
/// chain; a custom endpoint switches to path-style addressing for
/// S3-compatible stores such as MinIO.
#[derive(Debug, Clone)]
pub struct S3Store {
    client: Client,
    bucket: String,
}

impl S3Store {
    pub async fn from_settings(settings: &StorageSettings) -> Self {
        let region = RegionProviderChain::first_try(Region::new(settings.region.clone()))
            .or_default_provider();
        let shared = aws_config::defaults(BehaviorVersion::latest())
            .region(region)
            .load()
            .await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(endpoint) = &settings.endpoint {
            info!("Using custom object store endpoint {endpoint}");
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        info!("Initializing S3 client for bucket: {}", settings.bucket);
        Self {
            client: Client::from_conf(builder.build()),
            bucket: settings.bucket.clone(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn put_object(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, StorageError> {
        debug!("Uploading {key} to S3 ({} bytes)", bytes.len());
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| StorageError::Upload {
                key: key.to_string(),
                reason: DisplayErrorContext(&e).to_string(),
            })?;

        Ok(format!("s3://{}/{}", self.bucket, key))
    }
}
