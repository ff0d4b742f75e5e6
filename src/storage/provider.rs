use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use tempfile::TempPath;

use crate::error::Result;

/// Content-addressed blob storage. Keys are content digests.
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Store an in-memory blob
    async fn put(&self, key: &str, data: Bytes) -> Result<()>;

    /// Store a blob that was staged in a temporary file. The temp file is
    /// consumed either way.
    async fn put_file(&self, key: &str, local_path: TempPath) -> Result<()>;

    /// Check if a blob exists
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Delete a blob. Deleting a missing blob succeeds.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Get a short-lived signed URL for downloading (for remote storage).
    /// Local storage returns None and the file is streamed by the application.
    async fn get_download_url(
        &self,
        key: &str,
        file_name: &str,
        force_download: bool,
        expires: Duration,
    ) -> Result<Option<String>>;

    /// Get the storage type name
    fn storage_type(&self) -> &'static str;
}
