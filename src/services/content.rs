use bytes::{Bytes, BytesMut};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use tempfile::TempPath;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

use crate::error::{AppError, Result};
use crate::models::StorageLocation;
use crate::storage::{StorageManager, STAGING_PREFIX};

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Upload bytes that have been hashed but not yet placed
#[derive(Debug)]
pub enum StagedPayload {
    Memory(Bytes),
    TempFile(TempPath),
}

#[derive(Debug)]
pub struct StagedBlob {
    pub digest: String,
    pub size: u64,
    pub payload: StagedPayload,
}

/// Content-addressed blob placement with digest deduplication
#[derive(Clone)]
pub struct ContentStore {
    storage: StorageManager,
    staging_dir: PathBuf,
    max_memory_bytes: u64,
}

impl ContentStore {
    pub fn new(storage: StorageManager, staging_dir: impl Into<PathBuf>, max_memory_bytes: u64) -> Self {
        Self {
            storage,
            staging_dir: staging_dir.into(),
            max_memory_bytes,
        }
    }

    /// Read and hash the whole body in one pass. Small bodies stay in memory,
    /// larger ones are spooled to a temp file in the data directory so the
    /// final placement is a rename on the same filesystem.
    pub async fn stage<R>(&self, reader: R, declared_size: u64, limit: u64) -> Result<StagedBlob>
    where
        R: AsyncRead + Unpin,
    {
        if declared_size > limit {
            return Err(AppError::LimitExceeded(limit));
        }
        let mut reader = reader.take(limit.saturating_add(1));
        let mut hasher = Sha256::new();
        let mut size: u64 = 0;

        let payload = if declared_size <= self.max_memory_bytes {
            let mut data = BytesMut::with_capacity(declared_size as usize);
            loop {
                let n = reader.read_buf(&mut data).await?;
                if n == 0 {
                    break;
                }
                size += n as u64;
                if size > limit {
                    return Err(AppError::LimitExceeded(limit));
                }
            }
            hasher.update(&data);
            StagedPayload::Memory(data.freeze())
        } else {
            let temp = tempfile::Builder::new()
                .prefix(STAGING_PREFIX)
                .tempfile_in(&self.staging_dir)?;
            let (std_file, temp_path) = temp.into_parts();
            let mut file = tokio::fs::File::from_std(std_file);
            let mut buf = vec![0u8; COPY_BUFFER_SIZE];
            loop {
                let n = reader.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                size += n as u64;
                if size > limit {
                    // temp_path drops here and removes the partial file
                    return Err(AppError::LimitExceeded(limit));
                }
                hasher.update(&buf[..n]);
                file.write_all(&buf[..n]).await?;
            }
            file.flush().await?;
            StagedPayload::TempFile(temp_path)
        };

        Ok(StagedBlob {
            digest: hex::encode(hasher.finalize()),
            size,
            payload,
        })
    }

    /// Place a staged blob at `location` unless that digest is already there.
    /// Returns true if the bytes were written, false on a dedup hit.
    pub async fn commit(&self, staged: StagedBlob, location: &StorageLocation) -> Result<bool> {
        let provider = self.storage.provider(location)?;
        if provider.exists(&staged.digest).await? {
            tracing::debug!(
                "Blob {} already present in {} storage, discarding upload",
                staged.digest,
                provider.storage_type()
            );
            return Ok(false);
        }
        match staged.payload {
            StagedPayload::Memory(data) => provider.put(&staged.digest, data).await?,
            StagedPayload::TempFile(path) => provider.put_file(&staged.digest, path).await?,
        }
        tracing::info!(
            "Stored blob {} ({} bytes) in {} storage",
            staged.digest,
            staged.size,
            provider.storage_type()
        );
        Ok(true)
    }

    /// Stage and commit in one step, returning the digest
    pub async fn ingest<R>(
        &self,
        reader: R,
        declared_size: u64,
        limit: u64,
        location: &StorageLocation,
    ) -> Result<String>
    where
        R: AsyncRead + Unpin,
    {
        let staged = self.stage(reader, declared_size, limit).await?;
        let digest = staged.digest.clone();
        self.commit(staged, location).await?;
        Ok(digest)
    }

    pub async fn exists(&self, digest: &str, location: &StorageLocation) -> Result<bool> {
        self.storage.provider(location)?.exists(digest).await
    }

    /// Delete a blob; already gone counts as success
    pub async fn delete(&self, digest: &str, location: &StorageLocation) -> Result<()> {
        self.storage.provider(location)?.delete(digest).await
    }

    pub fn storage(&self) -> &StorageManager {
        &self.storage
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalStorage;
    use tempfile::TempDir;

    const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    fn store(temp: &TempDir, max_memory: u64) -> ContentStore {
        let storage = StorageManager::new(LocalStorage::new(temp.path()), None);
        ContentStore::new(storage, temp.path(), max_memory)
    }

    fn file_count(temp: &TempDir) -> usize {
        std::fs::read_dir(temp.path()).unwrap().count()
    }

    #[tokio::test]
    async fn test_ingest_in_memory() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp, 1024);
        let digest = store
            .ingest(&b"hello"[..], 5, 100, &StorageLocation::Local)
            .await
            .unwrap();
        assert_eq!(digest, HELLO_SHA256);
        assert_eq!(std::fs::read(temp.path().join(&digest)).unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_ingest_via_temp_file_dedups() {
        let temp = TempDir::new().unwrap();
        // Force the temp file path
        let store = store(&temp, 0);

        let first = store.stage(&b"hello"[..], 5, 100).await.unwrap();
        assert!(matches!(first.payload, StagedPayload::TempFile(_)));
        assert_eq!(first.digest, HELLO_SHA256);
        assert!(store.commit(first, &StorageLocation::Local).await.unwrap());

        let second = store.stage(&b"hello"[..], 5, 100).await.unwrap();
        assert!(!store.commit(second, &StorageLocation::Local).await.unwrap());

        // One blob, no leftover temp files
        assert_eq!(file_count(&temp), 1);
    }

    #[tokio::test]
    async fn test_concurrent_identical_uploads_leave_one_blob() {
        // In-memory and temp-file staging
        for max_memory in [1024, 0] {
            let temp = TempDir::new().unwrap();
            let store = store(&temp, max_memory);
            let upload = |store: ContentStore| async move {
                let staged = store.stage(&b"hello"[..], 5, 100).await.unwrap();
                store.commit(staged, &StorageLocation::Local).await.unwrap()
            };
            let (a, b) = tokio::join!(upload(store.clone()), upload(store.clone()));
            assert!(a || b);

            assert_eq!(file_count(&temp), 1);
            assert_eq!(std::fs::read(temp.path().join(HELLO_SHA256)).unwrap(), b"hello");
        }
    }

    #[tokio::test]
    async fn test_limit_exceeded_before_reading() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp, 1024);
        assert!(matches!(
            store.stage(&b"hello"[..], 500, 100).await,
            Err(AppError::LimitExceeded(100))
        ));
    }

    #[tokio::test]
    async fn test_limit_exceeded_when_body_lies() {
        let temp = TempDir::new().unwrap();
        let body = vec![7u8; 300];

        let in_memory = store(&temp, 1024);
        assert!(matches!(
            in_memory.stage(&body[..], 10, 100).await,
            Err(AppError::LimitExceeded(_))
        ));

        let spooled = store(&temp, 0);
        assert!(matches!(
            spooled.stage(&body[..], 10, 100).await,
            Err(AppError::LimitExceeded(_))
        ));
        assert_eq!(file_count(&temp), 0);
    }

    #[tokio::test]
    async fn test_exists_and_idempotent_delete() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp, 1024);
        let digest = store
            .ingest(&b"hello"[..], 5, 100, &StorageLocation::Local)
            .await
            .unwrap();
        assert!(store.exists(&digest, &StorageLocation::Local).await.unwrap());
        store.delete(&digest, &StorageLocation::Local).await.unwrap();
        store.delete(&digest, &StorageLocation::Local).await.unwrap();
        assert!(!store.exists(&digest, &StorageLocation::Local).await.unwrap());
    }
}
