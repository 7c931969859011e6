use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};
use uuid::Uuid;

use super::ObjectStore;
use crate::consumer::MessageProcessor;
use crate::utils::error::ProcessingError;

const JPEG_CONTENT_TYPE: &str = "image/jpeg";
const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];

/// Uploads each queued image under a fresh key.
///
/// Keys are never derived from the message, so a redelivered image is stored
/// a second time under a new key.
pub struct ImageUploader {
    store: Arc<dyn ObjectStore>,
    key_prefix: String,
}

impl ImageUploader {
    pub fn new(store: Arc<dyn ObjectStore>, key_prefix: &str) -> Self {
        Self {
            store,
            key_prefix: key_prefix.to_string(),
        }
    }

    /// `{prefix}-{uuid}.jpg`
    pub fn generate_key(&self) -> String {
        format!("{}-{}.jpg", self.key_prefix, Uuid::new_v4())
    }

    pub async fn upload(&self, image: &[u8]) -> Result<String, ProcessingError> {
        if image.is_empty() {
            return Err(ProcessingError::EmptyPayload);
        }
        if !image.starts_with(&JPEG_SOI) {
            warn!("Payload of {} bytes does not look like a JPEG, uploading anyway", image.len());
        }

        let key = self.generate_key();
        let location = self
            .store
            .put_object(&key, image.to_vec(), JPEG_CONTENT_TYPE)
            .await?;
        info!("Successfully uploaded image to {location}");
        Ok(location)
    }
}

#[async_trait]
impl MessageProcessor for ImageUploader {
    async fn process(&self, destination: &str, payload: &[u8]) -> Result<(), ProcessingError> {
        info!("Received image from {destination} ({} bytes)", payload.len());
        self.upload(payload).await.map(|_| ())
    }
}
