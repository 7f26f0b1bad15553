//! Object storage for reference assets and generated images.
//!
//! The pipeline only needs two operations: stream an object down and
//! upload a local file. [`S3ObjectStore`] implements them against any
//! S3-compatible endpoint with path-style addressing.

use std::path::Path;
use std::pin::Pin;

use async_trait::async_trait;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use tokio::io::AsyncRead;

use crate::settings::S3Settings;

/// Byte stream of an object being downloaded.
pub type ObjectReader = Pin<Box<dyn AsyncRead + Send>>;

/// Provider name reported for the static credentials.
const CREDENTIALS_PROVIDER: &str = "likeness-worker";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Failed to get s3://{bucket}/{key}: {message}")]
    Get {
        bucket: String,
        key: String,
        message: String,
    },

    #[error("Failed to put s3://{bucket}/{key}: {message}")]
    Put {
        bucket: String,
        key: String,
        message: String,
    },
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Open a streaming reader over an object.
    async fn get_object(&self, bucket: &str, key: &str) -> Result<ObjectReader, StorageError>;

    /// Upload the file at `source`, streaming it from disk.
    async fn put_object(&self, bucket: &str, key: &str, source: &Path) -> Result<(), StorageError>;
}

/// Strip leading separators so `/avatars/x` and `avatars/x` name the same object.
pub fn normalize_key(key: &str) -> &str {
    key.trim_start_matches('/')
}

fn content_type_for(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?;
    if ext.eq_ignore_ascii_case("png") {
        Some("image/png")
    } else {
        None
    }
}

/// [`ObjectStore`] on an S3-compatible service.
#[derive(Debug, Clone)]
pub struct S3ObjectStore {
    client: aws_sdk_s3::Client,
}

impl S3ObjectStore {
    /// Build a client for `settings.endpoint` with static credentials.
    pub async fn connect(settings: &S3Settings) -> Self {
        let credentials = aws_credential_types::Credentials::new(
            &settings.access_key,
            &settings.secret_key,
            None,
            None,
            CREDENTIALS_PROVIDER,
        );
        let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(settings.region.clone()))
            .endpoint_url(&settings.endpoint)
            .credentials_provider(credentials)
            .load()
            .await;
        let config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(true)
            .build();

        tracing::info!(endpoint = %settings.endpoint, region = %settings.region, "Object store configured");

        Self::from_client(aws_sdk_s3::Client::from_conf(config))
    }

    pub fn from_client(client: aws_sdk_s3::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn get_object(&self, bucket: &str, key: &str) -> Result<ObjectReader, StorageError> {
        let key = normalize_key(key);
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::Get {
                bucket: bucket.to_string(),
                key: key.to_string(),
                message: DisplayErrorContext(&e).to_string(),
            })?;

        Ok(Box::pin(output.body.into_async_read()))
    }

    async fn put_object(&self, bucket: &str, key: &str, source: &Path) -> Result<(), StorageError> {
        let key = normalize_key(key);
        let put_error = |message: String| StorageError::Put {
            bucket: bucket.to_string(),
            key: key.to_string(),
            message,
        };

        let body = ByteStream::from_path(source)
            .await
            .map_err(|e| put_error(format!("{}: {e}", source.display())))?;

        let mut request = self.client.put_object().bucket(bucket).key(key).body(body);
        if let Some(content_type) = content_type_for(source) {
            request = request.content_type(content_type);
        }
        request
            .send()
            .await
            .map_err(|e| put_error(DisplayErrorContext(&e).to_string()))?;

        tracing::debug!(bucket, key, "Uploaded object");
        Ok(())
    }
}
