use std::collections::HashMap;
use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::error::{AppError, Result};
use crate::models::ChunkInfo;
use crate::storage::STAGING_PREFIX;

const PLACEHOLDER_PREFIX: &str = "chunk-";

/// Byte ranges written so far, kept sorted and merged
#[derive(Debug, Default)]
struct WrittenRanges {
    total_size: u64,
    ranges: Vec<(u64, u64)>,
}

impl WrittenRanges {
    fn insert(&mut self, start: u64, end: u64) {
        if start >= end {
            return;
        }
        self.ranges.push((start, end));
        self.ranges.sort_unstable();
        let mut merged: Vec<(u64, u64)> = Vec::with_capacity(self.ranges.len());
        for &(s, e) in &self.ranges {
            match merged.last_mut() {
                Some(last) if s <= last.1 => last.1 = last.1.max(e),
                _ => merged.push((s, e)),
            }
        }
        self.ranges = merged;
    }

    /// First byte range not yet written, if any
    fn first_gap(&self) -> Option<(u64, u64)> {
        let mut cursor = 0;
        for &(s, e) in &self.ranges {
            if s > cursor {
                return Some((cursor, s));
            }
            cursor = cursor.max(e);
        }
        (cursor < self.total_size).then_some((cursor, self.total_size))
    }
}

/// Writes chunked uploads into pre-sized placeholder files in the data
/// directory. Each session owns `chunk-<session id>`.
#[derive(Clone)]
pub struct ChunkAssembler {
    data_dir: PathBuf,
    sessions: Arc<Mutex<HashMap<String, WrittenRanges>>>,
}

impl ChunkAssembler {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn placeholder_path(&self, session_id: &str) -> PathBuf {
        self.data_dir.join(format!("{}{}", PLACEHOLDER_PREFIX, session_id))
    }

    /// Write one chunk. Index 0 allocates the placeholder; any other chunk
    /// requires it to exist already.
    pub async fn new_chunk<R>(&self, chunk: &ChunkInfo, reader: R) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let path = self.placeholder_path(&chunk.session_id);

        let end = chunk
            .offset
            .checked_add(chunk.size)
            .filter(|end| *end <= chunk.total_size)
            .ok_or_else(|| {
                AppError::InvalidRange(format!(
                    "Chunk {}+{} exceeds total size {}",
                    chunk.offset, chunk.size, chunk.total_size
                ))
            })?;

        if chunk.index == 0 {
            self.allocate(&chunk.session_id, &path, chunk.total_size).await?;
        }

        let mut file = match OpenOptions::new().write(true).open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(AppError::NotAllocated(format!(
                    "No placeholder for session {}",
                    chunk.session_id
                )));
            }
            Err(e) => return Err(e.into()),
        };

        let allocated = file.metadata().await?.len();
        if end > allocated {
            return Err(AppError::InvalidRange(format!(
                "Chunk ends at {} but only {} bytes were allocated",
                end, allocated
            )));
        }

        let position = file.seek(SeekFrom::Start(chunk.offset)).await?;
        if position != chunk.offset {
            return Err(AppError::Storage(format!(
                "Seek landed at {} instead of {}",
                position, chunk.offset
            )));
        }

        let written = tokio::io::copy(&mut reader.take(chunk.size), &mut file).await?;
        if written != chunk.size {
            return Err(AppError::BadRequest(format!(
                "Chunk body had {} bytes, expected {}",
                written, chunk.size
            )));
        }
        file.flush().await?;

        self.lock()
            .entry(chunk.session_id.clone())
            .or_insert_with(|| WrittenRanges {
                total_size: allocated,
                ..Default::default()
            })
            .insert(chunk.offset, end);

        tracing::debug!(
            "Wrote chunk {} of session {} at {}..{}",
            chunk.index,
            chunk.session_id,
            chunk.offset,
            end
        );
        Ok(())
    }

    async fn allocate(&self, session_id: &str, path: &Path, total_size: u64) -> Result<()> {
        let file = match OpenOptions::new().write(true).create_new(true).open(path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(AppError::Conflict(format!(
                    "Session {} is already allocated",
                    session_id
                )));
            }
            Err(e) => return Err(e.into()),
        };
        file.set_len(total_size).await?;
        self.lock().insert(
            session_id.to_string(),
            WrittenRanges {
                total_size,
                ranges: Vec::new(),
            },
        );
        tracing::debug!("Allocated {} bytes for chunk session {}", total_size, session_id);
        Ok(())
    }

    /// Open a fully written session for reading. Fails with IncompleteUpload
    /// while any byte range is missing; the session stays intact for retries.
    pub async fn finalize(&self, session_id: &str) -> Result<(File, u64)> {
        let path = self.placeholder_path(session_id);
        let file = match File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(AppError::NotAllocated(format!(
                    "No placeholder for session {}",
                    session_id
                )));
            }
            Err(e) => return Err(e.into()),
        };
        let size = file.metadata().await?.len();

        if size > 0 {
            let sessions = self.lock();
            match sessions.get(session_id).map(WrittenRanges::first_gap) {
                Some(None) => {}
                Some(Some((start, end))) => {
                    return Err(AppError::IncompleteUpload(format!(
                        "Bytes {}..{} of session {} were never written",
                        start, end, session_id
                    )));
                }
                None => {
                    return Err(AppError::IncompleteUpload(format!(
                        "Written ranges of session {} are unknown",
                        session_id
                    )));
                }
            }
        }
        Ok((file, size))
    }

    /// Remove the placeholder and its bookkeeping
    pub async fn discard(&self, session_id: &str) -> Result<()> {
        self.lock().remove(session_id);
        match fs::remove_file(self.placeholder_path(session_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete placeholders and leftover staging files not modified for
    /// longer than `max_age`
    pub async fn sweep_stale(&self, max_age: Duration) -> Result<usize> {
        let mut removed = 0;
        let mut entries = fs::read_dir(&self.data_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let session_id = name.strip_prefix(PLACEHOLDER_PREFIX);
            if session_id.is_none() && !name.starts_with(STAGING_PREFIX) {
                continue;
            }

            let modified = match entry.metadata().await.and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(e) => {
                    tracing::warn!("Cannot stat {:?}: {}", entry.path(), e);
                    continue;
                }
            };
            let age = SystemTime::now().duration_since(modified).unwrap_or_default();
            if age <= max_age {
                continue;
            }

            match session_id {
                Some(session_id) => match self.discard(session_id).await {
                    Ok(()) => {
                        removed += 1;
                        tracing::info!("Removed stale chunk session {}", session_id);
                    }
                    Err(e) => tracing::warn!("Failed to remove stale chunk session {}: {}", session_id, e),
                },
                None => match fs::remove_file(entry.path()).await {
                    Ok(()) => {
                        removed += 1;
                        tracing::info!("Removed abandoned staging file {}", name);
                    }
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => tracing::warn!("Failed to remove staging file {}: {}", name, e),
                },
            }
        }
        Ok(removed)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, WrittenRanges>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
