// databasebackup/src/backup/s3_upload.rs
use anyhow::{Context, anyhow};
use async_trait::async_trait;
use aws_sdk_s3 as s3;
use s3::config::{BehaviorVersion, Credentials, Region};
use s3::error::DisplayErrorContext;
use s3::primitives::ByteStream;
use std::path::Path;
use tracing::info;

use super::process::StepResult;
use crate::config::credentials::StorageCredentials;
use crate::errors::{BackupError, Result, Step};

pub const DEFAULT_REGION: &str = "us-east-1";

#[async_trait]
pub trait UploadExecutor: Send + Sync {
    /// Pushes `local_archive_path` to `bucket` under `remote_key`.
    async fn upload(
        &self,
        credentials: &StorageCredentials,
        bucket: &str,
        remote_key: &str,
        local_archive_path: &Path,
    ) -> Result<StepResult>;
}

/// Uploads to S3 or any S3-compatible store.
#[derive(Debug, Default)]
pub struct S3Uploader {
    folder_prefix: Option<String>,
}

impl S3Uploader {
    pub fn new(folder_prefix: Option<String>) -> Self {
        S3Uploader { folder_prefix }
    }

    pub fn object_key(&self, remote_key: &str) -> String {
        match self.folder_prefix.as_deref().map(|p| p.trim_matches('/')) {
            Some(prefix) if !prefix.is_empty() => format!("{}/{}", prefix, remote_key),
            _ => remote_key.to_string(),
        }
    }

    async fn client(credentials: &StorageCredentials) -> s3::Client {
        let region = credentials.region.clone().unwrap_or_else(|| DEFAULT_REGION.to_string());
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region))
            .credentials_provider(Credentials::new(
                &credentials.access_key_id,
                credentials.secret_access_key(),
                credentials.session_token().map(str::to_string),
                None,
                "BackupCredentials",
            ));
        if let Some(endpoint) = &credentials.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }
        let sdk_config = loader.load().await;

        // Most S3-compatible stores only accept path-style requests.
        let s3_config = s3::config::Builder::from(&sdk_config)
            .force_path_style(credentials.endpoint_url.is_some())
            .build();
        s3::Client::from_conf(s3_config)
    }

    async fn put_archive(
        &self,
        credentials: &StorageCredentials,
        bucket: &str,
        key: &str,
        file_path: &Path,
    ) -> anyhow::Result<()> {
        let client = Self::client(credentials).await;
        let body = ByteStream::from_path(file_path)
            .await
            .with_context(|| format!("Failed to read archive {}", file_path.display()))?;

        client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .map_err(|e| anyhow!("{}", DisplayErrorContext(e)))
            .with_context(|| format!("Failed to upload {} to bucket {} with key {}", file_path.display(), bucket, key))?;
        Ok(())
    }
}

#[async_trait]
impl UploadExecutor for S3Uploader {
    async fn upload(
        &self,
        credentials: &StorageCredentials,
        bucket: &str,
        remote_key: &str,
        local_archive_path: &Path,
    ) -> Result<StepResult> {
        let key = self.object_key(remote_key);
        info!(archive = %local_archive_path.display(), bucket, key = %key, "uploading the archive");

        self.put_archive(credentials, bucket, &key, local_archive_path)
            .await
            .map_err(|e| BackupError::Upload { cause: format!("{:#}", e) })?;

        info!(bucket, key = %key, "file uploaded");
        Ok(StepResult::completed(Step::Upload))
    }
}
