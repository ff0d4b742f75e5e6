use serde::{Deserialize, Serialize};

/// Where the blob behind a record lives. Chosen once at upload time and never
/// re-derived from configuration afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageLocation {
    Local,
    Cloud { bucket: String },
}

impl StorageLocation {
    pub fn storage_type(&self) -> &'static str {
        match self {
            StorageLocation::Local => "local",
            StorageLocation::Cloud { .. } => "cloud",
        }
    }

    pub fn bucket(&self) -> Option<&str> {
        match self {
            StorageLocation::Local => None,
            StorageLocation::Cloud { bucket } => Some(bucket),
        }
    }

    /// Rebuild from the persisted (type, bucket) column pair
    pub fn from_parts(storage_type: &str, bucket: Option<String>) -> Self {
        match (storage_type, bucket) {
            ("cloud", Some(bucket)) => StorageLocation::Cloud { bucket },
            _ => StorageLocation::Local,
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, StorageLocation::Local)
    }
}

/// Metadata for one shareable link. Several records may point at the same blob.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileRecord {
    pub id: String,
    pub name: String,
    /// Hex SHA-256 of the stored bytes, also the blob key
    pub digest: String,
    pub content_type: String,
    pub size_human: String,
    pub size_bytes: i64,
    pub expire_at: i64,
    pub unlimited_time: bool,
    pub downloads_remaining: i64,
    pub unlimited_downloads: bool,
    pub download_count: i64,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub hotlink_id: Option<String>,
    pub storage: StorageLocation,
    pub uploaded_at: i64,
}

impl FileRecord {
    pub fn is_expired(&self, now: i64) -> bool {
        !self.unlimited_time && now >= self.expire_at
    }

    pub fn is_exhausted(&self) -> bool {
        !self.unlimited_downloads && self.downloads_remaining < 1
    }

    pub fn is_password_protected(&self) -> bool {
        self.password_hash.is_some()
    }

    /// Identity of the underlying blob for reference counting
    pub fn blob_key(&self) -> (StorageLocation, String) {
        (self.storage.clone(), self.digest.clone())
    }
}

/// Information about an incoming file, known before its body is read
#[derive(Debug, Clone)]
pub struct FileHeader {
    pub name: String,
    pub content_type: Option<String>,
    pub size: u64,
}

/// Link settings chosen by the uploader
#[derive(Debug, Clone, Default)]
pub struct UploadRequest {
    pub allowed_downloads: i64,
    pub expire_at: i64,
    pub unlimited_downloads: bool,
    pub unlimited_time: bool,
    pub password: Option<String>,
}

/// Public view of a record, safe to return to anyone holding the link
#[derive(Debug, Serialize)]
pub struct FileInfo {
    pub id: String,
    pub name: String,
    pub size: String,
    pub size_bytes: i64,
    pub content_type: String,
    pub expire_at: i64,
    pub downloads_remaining: i64,
    pub download_count: i64,
    pub unlimited_downloads: bool,
    pub unlimited_time: bool,
    pub is_password_protected: bool,
    pub is_local_storage: bool,
    pub url_download: String,
    pub url_hotlink: Option<String>,
}

impl FileInfo {
    pub fn from_record(record: &FileRecord, public_url: &str) -> Self {
        let base = public_url.trim_end_matches('/');
        let url_hotlink = match (&record.hotlink_id, record.is_password_protected()) {
            (Some(hotlink), false) => Some(format!("{}/h/{}", base, hotlink)),
            _ => None,
        };
        Self {
            id: record.id.clone(),
            name: record.name.clone(),
            size: record.size_human.clone(),
            size_bytes: record.size_bytes,
            content_type: record.content_type.clone(),
            expire_at: record.expire_at,
            downloads_remaining: record.downloads_remaining,
            download_count: record.download_count,
            unlimited_downloads: record.unlimited_downloads,
            unlimited_time: record.unlimited_time,
            is_password_protected: record.is_password_protected(),
            is_local_storage: record.storage.is_local(),
            url_download: format!("{}/d/{}", base, record.id),
            url_hotlink,
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// A live local record with one download left
    pub fn record(id: &str, digest: &str) -> FileRecord {
        FileRecord {
            id: id.to_string(),
            name: "file.txt".to_string(),
            digest: digest.to_string(),
            content_type: "text/plain".to_string(),
            size_human: "5 B".to_string(),
            size_bytes: 5,
            expire_at: crate::helper::now_unix() + 3600,
            unlimited_time: false,
            downloads_remaining: 1,
            unlimited_downloads: false,
            download_count: 0,
            password_hash: None,
            hotlink_id: None,
            storage: StorageLocation::Local,
            uploaded_at: crate::helper::now_unix(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::record;
    use super::*;

    #[test]
    fn test_expiry_and_exhaustion() {
        let now = crate::helper::now_unix();
        let mut file = record("a", "d");
        assert!(!file.is_expired(now));
        assert!(!file.is_exhausted());

        file.expire_at = now;
        assert!(file.is_expired(now));
        file.unlimited_time = true;
        assert!(!file.is_expired(now));

        file.downloads_remaining = 0;
        assert!(file.is_exhausted());
        file.unlimited_downloads = true;
        assert!(!file.is_exhausted());
    }

    #[test]
    fn test_storage_location_parts() {
        let cloud = StorageLocation::from_parts("cloud", Some("bucket-1".to_string()));
        assert_eq!(cloud.bucket(), Some("bucket-1"));
        assert_eq!(cloud.storage_type(), "cloud");
        assert_eq!(StorageLocation::from_parts("local", None), StorageLocation::Local);
        // A cloud row without a bucket cannot be resolved to a provider
        assert_eq!(StorageLocation::from_parts("cloud", None), StorageLocation::Local);
    }

    #[test]
    fn test_file_info_hides_hotlink_for_protected_files() {
        let mut file = record("abc", "d");
        file.hotlink_id = Some("xyz.png".to_string());
        let info = FileInfo::from_record(&file, "https://share.example/");
        assert_eq!(info.url_download, "https://share.example/d/abc");
        assert_eq!(info.url_hotlink.as_deref(), Some("https://share.example/h/xyz.png"));

        file.password_hash = Some("hash".to_string());
        let info = FileInfo::from_record(&file, "https://share.example");
        assert!(info.is_password_protected);
        assert!(info.url_hotlink.is_none());
    }

    #[test]
    fn test_password_hash_not_serialized() {
        let mut file = record("abc", "d");
        file.password_hash = Some("secret-hash".to_string());
        let json = serde_json::to_string(&file).unwrap();
        assert!(!json.contains("secret-hash"));
    }
}
