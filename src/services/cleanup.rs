use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::helper::now_unix;
use crate::metadata::MetadataStore;
use crate::models::{FileRecord, StorageLocation};
use crate::services::{ContentStore, DownloadTracker};

/// Orders an upload's "blob still present, save record" step against cleanup
/// passes. Uploads take it shared, cleanup takes it exclusively. Blob
/// transfers never happen while it is held.
pub type IngestGate = Arc<RwLock<()>>;

type BlobKey = (StorageLocation, String);

/// Reaps expired and exhausted records and deletes blobs nothing refers to
#[derive(Clone)]
pub struct CleanupService {
    store: Arc<dyn MetadataStore>,
    content: ContentStore,
    tracker: DownloadTracker,
    gate: IngestGate,
}

impl CleanupService {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        content: ContentStore,
        tracker: DownloadTracker,
        gate: IngestGate,
    ) -> Self {
        Self {
            store,
            content,
            tracker,
            gate,
        }
    }

    /// Run passes until one deletes nothing. Returns the number of records removed.
    pub async fn run(&self) -> Result<usize> {
        let _exclusive = self.gate.write().await;
        let mut total = 0;
        loop {
            let removed = self.pass().await?;
            total += removed;
            if removed == 0 {
                break;
            }
        }
        if total > 0 {
            tracing::info!("Cleanup removed {} expired file records", total);
        }
        Ok(total)
    }

    async fn pass(&self) -> Result<usize> {
        let records = self.store.get_all_records().await?;
        let now = now_unix();

        let mut present: HashMap<BlobKey, bool> = HashMap::new();
        let mut references: HashMap<BlobKey, usize> = HashMap::new();
        for record in &records {
            let key = record.blob_key();
            *references.entry(key.clone()).or_default() += 1;
            if !present.contains_key(&key) {
                let exists = match self.content.exists(&record.digest, &record.storage).await {
                    Ok(exists) => exists,
                    Err(e) => {
                        // Unknown state, treat as present so the record is not reaped for it
                        tracing::warn!("Cannot check blob {}: {}", record.digest, e);
                        true
                    }
                };
                present.insert(key, exists);
            }
        }

        let mut removed = 0;
        for record in &records {
            let key = record.blob_key();
            let blob_present = present.get(&key).copied().unwrap_or(false);
            if !self.is_reapable(record, now, blob_present) {
                continue;
            }

            let remaining = references.get_mut(&key).map(|count| {
                *count -= 1;
                *count
            });
            if remaining == Some(0) && blob_present {
                if let Err(e) = self.content.delete(&record.digest, &record.storage).await {
                    tracing::warn!("Failed to delete blob {}: {}", record.digest, e);
                } else {
                    tracing::debug!("Deleted unreferenced blob {}", record.digest);
                }
            }

            if let Err(e) = self.remove_record(record).await {
                tracing::warn!("Failed to remove record {}: {}", record.id, e);
                continue;
            }
            removed += 1;
        }
        Ok(removed)
    }

    fn is_reapable(&self, record: &FileRecord, now: i64, blob_present: bool) -> bool {
        (record.is_expired(now) || record.is_exhausted() || !blob_present)
            && !self.tracker.is_active(&record.id)
    }

    async fn remove_record(&self, record: &FileRecord) -> Result<()> {
        if let Some(hotlink) = &record.hotlink_id {
            self.store.delete_hotlink(hotlink).await?;
        }
        self.store.delete_record(&record.id).await?;
        tracing::debug!("Removed file record {}", record.id);
        Ok(())
    }

    /// Run a pass every `interval` on a background task
    pub fn spawn_periodic(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let cleanup = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(e) = cleanup.run().await {
                    tracing::error!("Periodic cleanup failed: {}", e);
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::MemoryStore;
    use crate::models::fixtures::record;
    use crate::storage::{LocalStorage, StorageManager};
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        store: Arc<MemoryStore>,
        content: ContentStore,
        tracker: DownloadTracker,
        cleanup: CleanupService,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let storage = StorageManager::new(LocalStorage::new(temp.path()), None);
        let content = ContentStore::new(storage, temp.path(), 1024);
        let store = Arc::new(MemoryStore::new());
        let tracker = DownloadTracker::new();
        let cleanup = CleanupService::new(
            store.clone(),
            content.clone(),
            tracker.clone(),
            Arc::new(RwLock::new(())),
        );
        Fixture {
            _temp: temp,
            store,
            content,
            tracker,
            cleanup,
        }
    }

    async fn blob(f: &Fixture, data: &'static [u8]) -> String {
        f.content
            .ingest(data, data.len() as u64, 1024, &StorageLocation::Local)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_shared_blob_survives_until_last_reference() {
        let f = fixture();
        let digest = blob(&f, b"hello").await;

        let mut a = record("aaaaaaaaaaaaaaa", &digest);
        a.downloads_remaining = 0;
        let b = record("bbbbbbbbbbbbbbb", &digest);
        f.store.save_record(&a).await.unwrap();
        f.store.save_record(&b).await.unwrap();

        assert_eq!(f.cleanup.run().await.unwrap(), 1);
        assert!(f.store.get_record(&a.id).await.unwrap().is_none());
        assert!(f.content.exists(&digest, &StorageLocation::Local).await.unwrap());

        let mut b = b;
        b.expire_at = 0;
        f.store.save_record(&b).await.unwrap();
        assert_eq!(f.cleanup.run().await.unwrap(), 1);
        assert!(!f.content.exists(&digest, &StorageLocation::Local).await.unwrap());
    }

    #[tokio::test]
    async fn test_active_download_blocks_reaping() {
        let f = fixture();
        let digest = blob(&f, b"in flight").await;
        let mut file = record("ccccccccccccccc", &digest);
        file.downloads_remaining = 0;
        f.store.save_record(&file).await.unwrap();

        let status = f.tracker.begin(&file.id);
        assert_eq!(f.cleanup.run().await.unwrap(), 0);
        assert!(f.content.exists(&digest, &StorageLocation::Local).await.unwrap());

        f.tracker.end(&status);
        assert_eq!(f.cleanup.run().await.unwrap(), 1);
        assert!(!f.content.exists(&digest, &StorageLocation::Local).await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_blob_reaps_record_and_hotlink() {
        let f = fixture();
        let mut file = record("ddddddddddddddd", "abcdef0123");
        file.hotlink_id = Some("hot.png".to_string());
        f.store.save_record(&file).await.unwrap();
        f.store.save_hotlink("hot.png", &file.id).await.unwrap();

        assert_eq!(f.cleanup.run().await.unwrap(), 1);
        assert!(f.store.get_record(&file.id).await.unwrap().is_none());
        assert!(f.store.get_hotlink("hot.png").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unlimited_flags_keep_records_alive() {
        let f = fixture();
        let digest = blob(&f, b"forever").await;
        let mut file = record("eeeeeeeeeeeeeee", &digest);
        file.expire_at = 0;
        file.unlimited_time = true;
        file.downloads_remaining = 0;
        file.unlimited_downloads = true;
        f.store.save_record(&file).await.unwrap();

        assert_eq!(f.cleanup.run().await.unwrap(), 0);
        // Idempotent
        assert_eq!(f.cleanup.run().await.unwrap(), 0);
        assert!(f.store.get_record(&file.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_blob_deleted_when_all_references_reaped_together() {
        let f = fixture();
        let digest = blob(&f, b"twins").await;
        for id in ["fffffffffffffff", "ggggggggggggggg"] {
            let mut file = record(id, &digest);
            file.expire_at = 0;
            f.store.save_record(&file).await.unwrap();
        }
        assert_eq!(f.cleanup.run().await.unwrap(), 2);
        assert!(!f.content.exists(&digest, &StorageLocation::Local).await.unwrap());
    }
}
