//! Object storage collaborators
//!
//! The signing side only ever deletes objects; uploads go from the browser
//! straight to the bucket.

mod s3_client;

use async_trait::async_trait;

use crate::error::StorageError;

pub use s3_client::S3Client;

/// Minimal object storage surface
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), StorageError>;
}
