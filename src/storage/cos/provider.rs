use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use tempfile::TempPath;

use crate::config::CosStorageConfig;
use crate::error::Result;
use crate::helper::content_disposition;
use crate::storage::StorageProvider;

use super::client::Client;

/// Blobs are opaque digests; the original file name only appears in the
/// download disposition.
const BLOB_CONTENT_TYPE: &str = "application/octet-stream";

/// Tencent Cloud COS storage provider
pub struct CosStorage {
    config: CosStorageConfig,
    client: Client,
}

impl CosStorage {
    pub fn new(config: CosStorageConfig) -> Self {
        let client = Client::new(
            &config.secret_id,
            &config.secret_key,
            &config.bucket,
            &config.region,
        );
        Self { config, client }
    }

    pub fn bucket(&self) -> &str {
        self.client.bucket()
    }

    /// Get the full object key with base path
    fn get_object_key(&self, key: &str) -> String {
        let clean_key = key.trim_start_matches('/');
        if self.config.base_path.is_empty() {
            clean_key.to_string()
        } else {
            format!("{}/{}", self.config.base_path.trim_end_matches('/'), clean_key)
        }
    }
}

#[async_trait]
impl StorageProvider for CosStorage {
    async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        let object_key = self.get_object_key(key);
        self.client
            .put_object_bytes(&object_key, data, BLOB_CONTENT_TYPE)
            .await?;
        tracing::info!("Uploaded blob to COS: {}", object_key);
        Ok(())
    }

    async fn put_file(&self, key: &str, local_path: TempPath) -> Result<()> {
        let object_key = self.get_object_key(key);
        self.client
            .put_object_file(&object_key, &local_path, BLOB_CONTENT_TYPE)
            .await?;
        tracing::info!("Uploaded staged file to COS: {}", object_key);
        // local_path drops here and removes the staged copy
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.client.head_object(&self.get_object_key(key)).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let object_key = self.get_object_key(key);
        self.client.delete_object(&object_key).await?;
        tracing::debug!("Deleted from COS: {}", object_key);
        Ok(())
    }

    async fn get_download_url(
        &self,
        key: &str,
        file_name: &str,
        force_download: bool,
        expires: Duration,
    ) -> Result<Option<String>> {
        let object_key = self.get_object_key(key);
        let disposition = content_disposition(file_name, force_download);
        let expires_secs = expires.as_secs().max(1);
        let url = self.client.presigned_download_url(
            &object_key,
            &[("response-content-disposition", disposition.as_str())],
            expires_secs,
        )?;
        Ok(Some(url))
    }

    fn storage_type(&self) -> &'static str {
        "cloud"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(base_path: &str) -> CosStorageConfig {
        CosStorageConfig {
            secret_id: "id".to_string(),
            secret_key: "key".to_string(),
            bucket: "files-1250000000".to_string(),
            region: "ap-guangzhou".to_string(),
            base_path: base_path.to_string(),
            url_expire_seconds: 300,
        }
    }

    #[test]
    fn test_object_key_prefix() {
        assert_eq!(CosStorage::new(config("")).get_object_key("abcd"), "abcd");
        assert_eq!(CosStorage::new(config("blobs/")).get_object_key("abcd"), "blobs/abcd");
    }

    #[tokio::test]
    async fn test_download_url_is_presigned() {
        let storage = CosStorage::new(config("blobs"));
        let url = storage
            .get_download_url("abcd", "a.txt", true, Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap();
        assert!(url.contains("/blobs/abcd?"));
        assert!(url.contains("q-signature="));

        // COS echoes the disposition back as a header, so it must stay valid
        let url = storage
            .get_download_url("abcd", "a\nb.txt", true, Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap();
        let encoded = url
            .split("response-content-disposition=")
            .nth(1)
            .and_then(|rest| rest.split('&').next())
            .unwrap();
        let disposition = urlencoding::decode(encoded).unwrap();
        assert!(disposition.starts_with("attachment; filename=\"a_b.txt\""));
        assert!(axum::http::HeaderValue::from_str(&disposition).is_ok());
    }
}
