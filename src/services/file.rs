use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, RwLock};

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::helper::{byte_count_si, now_unix, random_string, sanitize_file_name};
use crate::metadata::MetadataStore;
use crate::models::{FileHeader, FileRecord, StorageLocation, UploadRequest};
use crate::services::{
    ActiveDownload, CleanupService, ContentStore, DownloadTracker, IngestGate,
};

/// Extensions that get a hotlink for inline embedding
const HOTLINK_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "gif", "webp", "bmp"];
const HOTLINK_ID_LENGTH: usize = 40;

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub id_length: usize,
    pub max_file_size_bytes: u64,
    pub file_salt: String,
    /// Lifetime of presigned cloud download URLs
    pub download_url_expiry: Duration,
}

impl EngineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            id_length: config.storage.id_length,
            max_file_size_bytes: config.storage.max_file_size_bytes(),
            file_salt: config.storage.file_salt.clone(),
            download_url_expiry: Duration::from_secs(
                config.cos.as_ref().map(|c| c.url_expire_seconds).unwrap_or(300),
            ),
        }
    }
}

/// How a download is handed to the client
pub enum Delivery {
    /// Stream from local storage. The download stays tracked until this is dropped.
    Local {
        record: FileRecord,
        file: tokio::fs::File,
        size: u64,
        download: ActiveDownload,
    },
    /// Redirect to a short-lived cloud URL
    Redirect { record: FileRecord, url: String },
}

impl Delivery {
    pub fn record(&self) -> &FileRecord {
        match self {
            Delivery::Local { record, .. } | Delivery::Redirect { record, .. } => record,
        }
    }

    /// Write the file to `sink`. Local downloads end their tracker entry when
    /// this returns, successful or not.
    pub async fn stream_to<W>(self, sink: &mut W) -> Result<ServeOutcome>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        match self {
            Delivery::Local {
                mut file, download, ..
            } => {
                let bytes = tokio::io::copy(&mut file, sink).await?;
                sink.flush().await?;
                drop(download);
                Ok(ServeOutcome::Streamed { bytes })
            }
            Delivery::Redirect { url, .. } => Ok(ServeOutcome::Redirect(url)),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum ServeOutcome {
    Streamed { bytes: u64 },
    Redirect(String),
}

/// Public file operations: upload, lookup, serve and delete
#[derive(Clone)]
pub struct FileEngine {
    store: Arc<dyn MetadataStore>,
    content: ContentStore,
    tracker: DownloadTracker,
    cleanup: CleanupService,
    gate: IngestGate,
    /// Serializes the read-decrement-save of download counters
    serve_lock: Arc<Mutex<()>>,
    settings: EngineSettings,
}

impl FileEngine {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        content: ContentStore,
        tracker: DownloadTracker,
        settings: EngineSettings,
    ) -> Self {
        let gate: IngestGate = Arc::new(RwLock::new(()));
        let cleanup = CleanupService::new(store.clone(), content.clone(), tracker.clone(), gate.clone());
        Self {
            store,
            content,
            tracker,
            cleanup,
            gate,
            serve_lock: Arc::new(Mutex::new(())),
            settings,
        }
    }

    pub fn cleanup(&self) -> &CleanupService {
        &self.cleanup
    }

    pub fn tracker(&self) -> &DownloadTracker {
        &self.tracker
    }

    pub fn max_file_size_bytes(&self) -> u64 {
        self.settings.max_file_size_bytes
    }

    /// Ingest `reader` and create a link for it
    pub async fn new_file<R>(
        &self,
        reader: R,
        header: FileHeader,
        request: UploadRequest,
    ) -> Result<FileRecord>
    where
        R: AsyncRead + Unpin,
    {
        let limit = self.settings.max_file_size_bytes;
        if header.size > limit {
            return Err(AppError::LimitExceeded(limit));
        }

        let name = sanitize_file_name(&header.name);
        if name.is_empty() {
            return Err(AppError::BadRequest("File name is required".to_string()));
        }
        let content_type = header
            .content_type
            .as_deref()
            .and_then(valid_content_type)
            .unwrap_or_else(|| {
                mime_guess::from_path(&name)
                    .first_or_octet_stream()
                    .to_string()
            });

        let password_hash = match request.password.as_deref() {
            Some(password) if !password.is_empty() => Some(self.hash_password(password)?),
            _ => None,
        };

        // Hashing and placement run outside the gate. Only the presence
        // re-check and the record save are ordered against cleanup.
        let staged = self.content.stage(reader, header.size, limit).await?;
        let location = self.content.storage().default_location();
        let digest = staged.digest.clone();
        let size = staged.size;
        self.content.commit(staged, &location).await?;

        let _shared = self.gate.read().await;
        if !self.content.exists(&digest, &location).await? {
            // A cleanup pass reaped the last older reference in between
            tracing::warn!("Blob {} was removed while its upload was committing", digest);
            return Err(AppError::Conflict(
                "Upload raced with cleanup, please retry".to_string(),
            ));
        }

        let hotlink_id = if password_hash.is_none() {
            hotlink_extension(&name)
                .map(|ext| format!("{}.{}", random_string(HOTLINK_ID_LENGTH), ext))
        } else {
            None
        };

        let record = FileRecord {
            id: self.unused_id().await?,
            name,
            digest,
            content_type,
            size_human: byte_count_si(size),
            size_bytes: size as i64,
            expire_at: request.expire_at,
            unlimited_time: request.unlimited_time,
            downloads_remaining: request.allowed_downloads,
            unlimited_downloads: request.unlimited_downloads,
            download_count: 0,
            password_hash,
            hotlink_id,
            storage: location,
            uploaded_at: now_unix(),
        };

        if let Some(hotlink) = &record.hotlink_id {
            self.store.save_hotlink(hotlink, &record.id).await?;
        }
        self.store.save_record(&record).await?;

        tracing::info!(
            "Created file {} ({}, {}) with digest {}",
            record.id,
            record.name,
            record.size_human,
            record.digest
        );
        Ok(record)
    }

    /// Look up a live record. Unknown, expired and exhausted ids, and records
    /// whose blob has gone missing, all come back as None.
    pub async fn get_file(&self, id: &str) -> Result<Option<FileRecord>> {
        if id.is_empty() {
            return Ok(None);
        }
        let Some(record) = self.store.get_record(id).await? else {
            return Ok(None);
        };
        if record.is_expired(now_unix()) || record.is_exhausted() {
            return Ok(None);
        }
        if !self.content.exists(&record.digest, &record.storage).await? {
            tracing::warn!("Blob {} of file {} is missing", record.digest, record.id);
            return Ok(None);
        }
        Ok(Some(record))
    }

    pub async fn get_file_by_hotlink(&self, hotlink_id: &str) -> Result<Option<FileRecord>> {
        if hotlink_id.is_empty() {
            return Ok(None);
        }
        match self.store.get_hotlink(hotlink_id).await? {
            Some(file_id) => self.get_file(&file_id).await,
            None => Ok(None),
        }
    }

    /// Claim one download of `id`. The counter is decremented and saved before
    /// any byte is sent.
    pub async fn begin_serve(&self, id: &str, force_download: bool) -> Result<Delivery> {
        let (record, download) = {
            let _serial = self.serve_lock.lock().await;
            let mut record = self.get_file(id).await?.ok_or_else(AppError::link_invalid)?;

            // Tracked before the counter drops, so cleanup never sees an
            // exhausted record without its download
            let download = self.tracker.track(&record.id);
            if !record.unlimited_downloads {
                record.downloads_remaining -= 1;
            }
            record.download_count += 1;
            self.store.save_record(&record).await?;
            (record, download)
        };

        match record.storage.clone() {
            StorageLocation::Local => {
                let (file, size) = self.content.storage().local().open(&record.digest).await?;
                tracing::info!("Serving file {} ({} bytes)", record.id, size);
                Ok(Delivery::Local {
                    record,
                    file,
                    size,
                    download,
                })
            }
            location => {
                let url = self
                    .content
                    .storage()
                    .provider(&location)?
                    .get_download_url(
                        &record.digest,
                        &record.name,
                        force_download,
                        self.settings.download_url_expiry,
                    )
                    .await?
                    .ok_or_else(|| {
                        AppError::Storage(format!("No download URL for file {}", record.id))
                    })?;
                // Completion of a redirected download is never observed
                download.detach();
                tracing::info!("Redirecting download of file {} to cloud storage", record.id);
                Ok(Delivery::Redirect { record, url })
            }
        }
    }

    /// Claim a download and write it to `sink`
    pub async fn serve_file<W>(&self, id: &str, sink: &mut W, force_download: bool) -> Result<ServeOutcome>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        self.begin_serve(id, force_download).await?.stream_to(sink).await
    }

    /// Whether `candidate` opens `record`. Unprotected records accept anything.
    pub fn verify_password(&self, record: &FileRecord, candidate: &str) -> bool {
        let Some(hash) = &record.password_hash else {
            return true;
        };
        match PasswordHash::new(hash) {
            Ok(parsed) => Argon2::default()
                .verify_password(candidate.as_bytes(), &parsed)
                .is_ok(),
            Err(e) => {
                tracing::error!("Invalid password hash on file {}: {}", record.id, e);
                false
            }
        }
    }

    /// Expire `id` right away and run cleanup. Returns false for unknown ids.
    pub async fn delete_file(&self, id: &str) -> Result<bool> {
        if id.is_empty() {
            return Ok(false);
        }
        let Some(mut record) = self.store.get_record(id).await? else {
            return Ok(false);
        };
        record.expire_at = 0;
        record.unlimited_time = false;
        self.store.save_record(&record).await?;
        self.tracker.remove_for_file(id);
        tracing::info!("Deleted file {}", id);

        self.cleanup.run().await?;
        Ok(true)
    }

    /// Argon2 hash salted with the per-install salt, so one password always
    /// maps to the same hash within an install
    fn hash_password(&self, password: &str) -> Result<String> {
        let seed = Sha256::digest(self.settings.file_salt.as_bytes());
        let salt = SaltString::encode_b64(&seed[..16])
            .map_err(|e| AppError::Internal(format!("Invalid file salt: {}", e)))?;
        let hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| AppError::Internal(format!("Password hashing failed: {}", e)))?
            .to_string();
        Ok(hash)
    }

    async fn unused_id(&self) -> Result<String> {
        loop {
            let id = random_string(self.settings.id_length);
            if self.store.get_record(&id).await?.is_none() {
                return Ok(id);
            }
        }
    }
}

/// `content_type` if it parses as a MIME type and is safe to send back
fn valid_content_type(content_type: &str) -> Option<String> {
    let content_type = content_type.trim();
    if content_type.is_empty() || !content_type.chars().all(|c| c == ' ' || c.is_ascii_graphic()) {
        return None;
    }
    content_type
        .parse::<mime_guess::Mime>()
        .ok()
        .map(|mime| mime.to_string())
}

/// Lower-cased extension if `name` is an image we hotlink
fn hotlink_extension(name: &str) -> Option<String> {
    let ext = Path::new(name).extension()?.to_str()?.to_lowercase();
    HOTLINK_EXTENSIONS.contains(&ext.as_str()).then_some(ext)
}
