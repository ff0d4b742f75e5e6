use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

pub const MIN_SESSION_ID_LEN: usize = 10;
pub const MAX_SESSION_ID_LEN: usize = 64;

/// One byte range of a chunked upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkInfo {
    /// Sanitized, safe to embed in a file name
    pub session_id: String,
    pub index: u64,
    pub offset: u64,
    pub size: u64,
    pub total_size: u64,
}

impl ChunkInfo {
    pub fn new(session_id: &str, index: u64, offset: u64, size: u64, total_size: u64) -> Result<Self> {
        Ok(Self {
            session_id: sanitize_session_id(session_id)?,
            index,
            offset,
            size,
            total_size,
        })
    }
}

/// Validate the length of a client-supplied session id and replace every
/// character outside `[A-Za-z0-9-]` with `_`.
pub fn sanitize_session_id(raw: &str) -> Result<String> {
    let len = raw.chars().count();
    if !(MIN_SESSION_ID_LEN..=MAX_SESSION_ID_LEN).contains(&len) {
        return Err(AppError::BadRequest(format!(
            "Invalid session id, needs to be {} to {} characters long",
            MIN_SESSION_ID_LEN, MAX_SESSION_ID_LEN
        )));
    }
    Ok(raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect())
}

/// Response to a chunk session reservation
#[derive(Debug, Serialize, Deserialize)]
pub struct ReservationResponse {
    pub session_id: String,
}
