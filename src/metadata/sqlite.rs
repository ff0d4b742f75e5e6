use async_trait::async_trait;
use sqlx::FromRow;

use crate::db::Database;
use crate::error::Result;
use crate::metadata::MetadataStore;
use crate::models::{FileRecord, StorageLocation};

/// Row shape of the `files` table
#[derive(Debug, FromRow)]
struct FileRow {
    id: String,
    name: String,
    digest: String,
    content_type: String,
    size_human: String,
    size_bytes: i64,
    expire_at: i64,
    unlimited_time: bool,
    downloads_remaining: i64,
    unlimited_downloads: bool,
    download_count: i64,
    password_hash: Option<String>,
    hotlink_id: Option<String>,
    storage_type: String,
    bucket: Option<String>,
    uploaded_at: i64,
}

impl From<FileRow> for FileRecord {
    fn from(row: FileRow) -> Self {
        Self {
            storage: StorageLocation::from_parts(&row.storage_type, row.bucket),
            id: row.id,
            name: row.name,
            digest: row.digest,
            content_type: row.content_type,
            size_human: row.size_human,
            size_bytes: row.size_bytes,
            expire_at: row.expire_at,
            unlimited_time: row.unlimited_time,
            downloads_remaining: row.downloads_remaining,
            unlimited_downloads: row.unlimited_downloads,
            download_count: row.download_count,
            password_hash: row.password_hash,
            hotlink_id: row.hotlink_id,
            uploaded_at: row.uploaded_at,
        }
    }
}

#[async_trait]
impl MetadataStore for Database {
    async fn save_record(&self, record: &FileRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO files (
                id, name, digest, content_type, size_human, size_bytes, expire_at, unlimited_time,
                downloads_remaining, unlimited_downloads, download_count, password_hash, hotlink_id,
                storage_type, bucket, uploaded_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(&record.name)
        .bind(&record.digest)
        .bind(&record.content_type)
        .bind(&record.size_human)
        .bind(record.size_bytes)
        .bind(record.expire_at)
        .bind(record.unlimited_time)
        .bind(record.downloads_remaining)
        .bind(record.unlimited_downloads)
        .bind(record.download_count)
        .bind(&record.password_hash)
        .bind(&record.hotlink_id)
        .bind(record.storage.storage_type())
        .bind(record.storage.bucket())
        .bind(record.uploaded_at)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn get_record(&self, id: &str) -> Result<Option<FileRecord>> {
        let row: Option<FileRow> = sqlx::query_as("SELECT * FROM files WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        Ok(row.map(FileRecord::from))
    }

    async fn get_all_records(&self) -> Result<Vec<FileRecord>> {
        let rows: Vec<FileRow> = sqlx::query_as("SELECT * FROM files")
            .fetch_all(self.pool())
            .await?;
        Ok(rows.into_iter().map(FileRecord::from).collect())
    }

    async fn delete_record(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM files WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    async fn save_hotlink(&self, hotlink_id: &str, file_id: &str) -> Result<()> {
        sqlx::query("INSERT OR REPLACE INTO hotlinks (id, file_id) VALUES (?, ?)")
            .bind(hotlink_id)
            .bind(file_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    async fn get_hotlink(&self, hotlink_id: &str) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT file_id FROM hotlinks WHERE id = ?")
            .bind(hotlink_id)
            .fetch_optional(self.pool())
            .await?;
        Ok(row.map(|(file_id,)| file_id))
    }

    async fn delete_hotlink(&self, hotlink_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM hotlinks WHERE id = ?")
            .bind(hotlink_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::record;
    use tempfile::TempDir;

    async fn open_db(temp: &TempDir) -> Database {
        let path = temp.path().join("test.db");
        let db = Database::new(&path.to_string_lossy()).await.unwrap();
        db.run_migrations().await.unwrap();
        db
    }

    #[tokio::test]
    async fn test_record_round_trip() {
        let temp = TempDir::new().unwrap();
        let db = open_db(&temp).await;

        let mut file = record("abc123", "0f0f");
        file.password_hash = Some("hash".to_string());
        file.hotlink_id = Some("hot.png".to_string());
        file.storage = StorageLocation::Cloud {
            bucket: "bucket-1".to_string(),
        };
        db.save_record(&file).await.unwrap();

        assert_eq!(db.get_record("abc123").await.unwrap(), Some(file.clone()));
        assert!(db.get_record("missing").await.unwrap().is_none());

        file.downloads_remaining = 0;
        file.download_count = 1;
        db.save_record(&file).await.unwrap();
        let all = db.get_all_records().await.unwrap();
        assert_eq!(all, vec![file]);

        db.delete_record("abc123").await.unwrap();
        assert!(db.get_all_records().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_hotlink_round_trip() {
        let temp = TempDir::new().unwrap();
        let db = open_db(&temp).await;

        db.save_hotlink("hot.png", "abc123").await.unwrap();
        assert_eq!(db.get_hotlink("hot.png").await.unwrap().as_deref(), Some("abc123"));
        db.delete_hotlink("hot.png").await.unwrap();
        assert!(db.get_hotlink("hot.png").await.unwrap().is_none());
    }
}
