//! S3-compatible storage client
//!
//! Wraps the AWS SDK for S3-compatible storage access.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    config::{Credentials, Region},
    Client,
};

use crate::config::ObjectStoreConfig;
use crate::error::StorageError;

use super::ObjectStore;

/// S3-compatible storage client
#[derive(Clone)]
pub struct S3Client {
    client: Client,
}

impl S3Client {
    /// Create a new S3 client from configuration
    pub fn new(config: &ObjectStoreConfig) -> Self {
        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "fine-uploader-server",
        );

        let region = config
            .region
            .clone()
            .unwrap_or_else(|| "us-east-1".to_string());

        let mut builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(region))
            .credentials_provider(credentials);

        if let Some(endpoint) = &config.endpoint {
            builder = builder
                .endpoint_url(endpoint)
                .force_path_style(true); // Required for MinIO and other S3-compatible services
        }

        Self {
            client: Client::from_conf(builder.build()),
        }
    }
}

fn classify(bucket: &str, key: &str, action: &str, message: String) -> StorageError {
    if message.contains("404") || message.contains("NoSuchKey") || message.contains("NoSuchBucket") {
        StorageError::ObjectNotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        }
    } else if message.contains("403") || message.contains("AccessDenied") {
        StorageError::AccessDenied(format!("{} {}/{}", action, bucket, key))
    } else {
        StorageError::SdkError(format!("Failed to {} {}/{}: {}", action, bucket, key, message))
    }
}

#[async_trait]
impl ObjectStore for S3Client {
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), StorageError> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify(bucket, key, "delete", e.to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_sdk_errors() {
        assert!(matches!(
            classify("b", "k", "delete", "service error: NoSuchKey".into()),
            StorageError::ObjectNotFound { .. }
        ));
        assert!(matches!(
            classify("b", "k", "delete", "AccessDenied".into()),
            StorageError::AccessDenied(_)
        ));
        assert!(matches!(
            classify("b", "k", "delete", "dispatch failure".into()),
            StorageError::SdkError(msg) if msg.contains("delete b/k")
        ));
    }
}
