//! Persistence contract for file records and hotlinks.
//!
//! Every record and hotlink is an independent key; implementations only need
//! per-key atomic reads and writes.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::FileRecord;

#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Insert or replace a record
    async fn save_record(&self, record: &FileRecord) -> Result<()>;

    async fn get_record(&self, id: &str) -> Result<Option<FileRecord>>;

    async fn get_all_records(&self) -> Result<Vec<FileRecord>>;

    /// Removing an unknown id is not an error
    async fn delete_record(&self, id: &str) -> Result<()>;

    async fn save_hotlink(&self, hotlink_id: &str, file_id: &str) -> Result<()>;

    async fn get_hotlink(&self, hotlink_id: &str) -> Result<Option<String>>;

    async fn delete_hotlink(&self, hotlink_id: &str) -> Result<()>;
}
