use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::metadata::MetadataStore;
use crate::models::FileRecord;

/// Volatile metadata store, used by the `memory` backend and in tests
#[derive(Default)]
pub struct MemoryStore {
    files: RwLock<HashMap<String, FileRecord>>,
    hotlinks: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetadataStore for MemoryStore {
    async fn save_record(&self, record: &FileRecord) -> Result<()> {
        self.files
            .write()
            .await
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn get_record(&self, id: &str) -> Result<Option<FileRecord>> {
        Ok(self.files.read().await.get(id).cloned())
    }

    async fn get_all_records(&self) -> Result<Vec<FileRecord>> {
        Ok(self.files.read().await.values().cloned().collect())
    }

    async fn delete_record(&self, id: &str) -> Result<()> {
        self.files.write().await.remove(id);
        Ok(())
    }

    async fn save_hotlink(&self, hotlink_id: &str, file_id: &str) -> Result<()> {
        self.hotlinks
            .write()
            .await
            .insert(hotlink_id.to_string(), file_id.to_string());
        Ok(())
    }

    async fn get_hotlink(&self, hotlink_id: &str) -> Result<Option<String>> {
        Ok(self.hotlinks.read().await.get(hotlink_id).cloned())
    }

    async fn delete_hotlink(&self, hotlink_id: &str) -> Result<()> {
        self.hotlinks.write().await.remove(hotlink_id);
        Ok(())
    }
}
