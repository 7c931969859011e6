//! Object storage for captured images.
//!
//! [`ObjectStore`] is the capability the image consumer uploads through;
//! [`S3Store`] implements it on S3 or any S3-compatible service, and
//! [`ImageUploader`] is the consumer's processing step built on top of it.

pub mod s3;
pub mod uploader;

use async_trait::async_trait;

use crate::utils::error::StorageError;

pub use s3::S3Store;
pub use uploader::ImageUploader;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Stores `bytes` under `key` and returns the object's location URI.
    async fn put_object(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, StorageError>;
}
