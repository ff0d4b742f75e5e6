use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use uuid::Uuid;

use crate::helper::now_unix;

/// A download that has not ended after this long is assumed dead
pub const DOWNLOAD_STATUS_TTL_SECS: i64 = 24 * 3600;

#[derive(Debug, Clone)]
pub struct DownloadStatus {
    pub id: String,
    pub file_id: String,
    pub expire_at: i64,
}

/// Records which files are currently being streamed, so cleanup leaves
/// their blobs alone.
#[derive(Clone, Default)]
pub struct DownloadTracker {
    statuses: Arc<RwLock<HashMap<String, DownloadStatus>>>,
}

impl DownloadTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a download of `file_id`, returning its status id
    pub fn begin(&self, file_id: &str) -> String {
        let status = DownloadStatus {
            id: Uuid::new_v4().to_string(),
            file_id: file_id.to_string(),
            expire_at: now_unix() + DOWNLOAD_STATUS_TTL_SECS,
        };
        let id = status.id.clone();
        self.write().insert(id.clone(), status);
        id
    }

    /// Like `begin`, but ends the entry when the guard is dropped
    pub fn track(&self, file_id: &str) -> ActiveDownload {
        ActiveDownload {
            tracker: self.clone(),
            status_id: self.begin(file_id),
        }
    }

    pub fn end(&self, status_id: &str) {
        self.write().remove(status_id);
    }

    pub fn is_active(&self, file_id: &str) -> bool {
        let now = now_unix();
        self.statuses
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .any(|s| s.file_id == file_id && s.expire_at > now)
    }

    /// Drop entries past their expiry
    pub fn sweep(&self) -> usize {
        let now = now_unix();
        let mut statuses = self.write();
        let before = statuses.len();
        statuses.retain(|_, s| s.expire_at > now);
        before - statuses.len()
    }

    /// Forget every entry for `file_id`
    pub fn remove_for_file(&self, file_id: &str) {
        self.write().retain(|_, s| s.file_id != file_id);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.statuses.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, DownloadStatus>> {
        self.statuses.write().unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(test)]
    pub(crate) fn set_expiry(&self, status_id: &str, expire_at: i64) {
        if let Some(s) = self.write().get_mut(status_id) {
            s.expire_at = expire_at;
        }
    }
}

/// Ends its download entry when dropped, including when the client
/// disconnects mid-stream.
pub struct ActiveDownload {
    tracker: DownloadTracker,
    status_id: String,
}

impl ActiveDownload {
    #[cfg(test)]
    pub fn status_id(&self) -> &str {
        &self.status_id
    }

    /// Leave the entry to its self-expiry. Used when the end of the transfer
    /// cannot be observed, as with cloud redirects.
    pub fn detach(mut self) -> String {
        std::mem::take(&mut self.status_id)
    }
}

impl Drop for ActiveDownload {
    fn drop(&mut self) {
        if !self.status_id.is_empty() {
            self.tracker.end(&self.status_id);
        }
    }
}
