use async_trait::async_trait;
use bytes::Bytes;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempPath;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result};
use crate::storage::StorageProvider;

/// Name prefix of temp files staged in the data directory
pub const STAGING_PREFIX: &str = "upload";

/// Local file system storage provider. Blobs live directly in the data
/// directory, named by their digest.
pub struct LocalStorage {
    base_path: PathBuf,
}

impl LocalStorage {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    fn get_full_path(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || !key.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(AppError::Storage(format!("Invalid blob key: {}", key)));
        }
        Ok(self.base_path.join(key))
    }

    /// Open a blob for reading, returning the handle and its length
    pub async fn open(&self, key: &str) -> Result<(fs::File, u64)> {
        let full_path = self.get_full_path(key)?;
        let file = fs::File::open(&full_path).await.map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                AppError::NotFound(format!("Blob not found: {}", key))
            } else {
                AppError::Storage(format!("Failed to open blob: {}", e))
            }
        })?;
        let size = file.metadata().await?.len();
        Ok((file, size))
    }
}

#[async_trait]
impl StorageProvider for LocalStorage {
    async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        let full_path = self.get_full_path(key)?;

        // Write next to the target and rename, so a half-written blob is never visible
        let temp = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempfile_in(&self.base_path)?;
        let (std_file, temp_path) = temp.into_parts();
        let mut file = fs::File::from_std(std_file);
        file.write_all(&data).await?;
        file.flush().await?;
        drop(file);

        temp_path.persist(&full_path).map_err(|e| e.error)?;
        tracing::debug!("Saved blob to {:?}", full_path);
        Ok(())
    }

    async fn put_file(&self, key: &str, local_path: TempPath) -> Result<()> {
        let full_path = self.get_full_path(key)?;
        local_path.persist(&full_path).map_err(|e| e.error)?;
        tracing::debug!("Moved staged upload to {:?}", full_path);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let full_path = self.get_full_path(key)?;
        Ok(fs::try_exists(&full_path).await?)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let full_path = self.get_full_path(key)?;
        match fs::remove_file(&full_path).await {
            Ok(()) => {
                tracing::debug!("Deleted blob {:?}", full_path);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_download_url(
        &self,
        _key: &str,
        _file_name: &str,
        _force_download: bool,
        _expires: Duration,
    ) -> Result<Option<String>> {
        Ok(None)
    }

    fn storage_type(&self) -> &'static str {
        "local"
    }
}
