use axum::{
    body::Body,
    extract::{ConnectInfo, Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Redirect, Response},
    Json,
};
use serde::Deserialize;
use std::net::SocketAddr;
use tokio_util::io::ReaderStream;

use crate::error::{ApiResponse, AppError, Result};
use crate::handlers::{body_reader, declared_size, UploadQuery};
use crate::helper::content_disposition;
use crate::models::{FileHeader, FileInfo, FileRecord};
use crate::services::rate_limit::LOGIN_ATTEMPT_COST;
use crate::services::Delivery;
use crate::AppState;

pub const PASSWORD_HEADER: &str = "X-File-Password";
const STREAM_BUFFER_SIZE: usize = 64 * 1024;
const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Default, Deserialize)]
pub struct DownloadQuery {
    /// Show in the browser instead of forcing a save dialog
    #[serde(default)]
    pub inline: bool,
}

/// Upload a file from the raw request body
/// POST /api/files?name=...
pub async fn upload_file(
    State(state): State<AppState>,
    Query(query): Query<UploadQuery>,
    headers: HeaderMap,
    body: Body,
) -> Result<Json<ApiResponse<FileInfo>>> {
    let header = FileHeader {
        name: query.file_name()?,
        content_type: query.content_type.clone(),
        size: declared_size(&headers)?,
    };
    let request = query.upload_request(&state.config)?;
    let record = state
        .engine
        .new_file(body_reader(body), header, request)
        .await?;
    Ok(Json(ApiResponse::success(FileInfo::from_record(
        &record,
        &state.config.server.public_url,
    ))))
}

/// Public info about a link
/// GET /api/files/:id
pub async fn get_file(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<FileInfo>>> {
    let record = live_record(&state, &addr, state.engine.get_file(&id).await?).await?;
    Ok(Json(ApiResponse::success(FileInfo::from_record(
        &record,
        &state.config.server.public_url,
    ))))
}

/// Expire a link immediately
/// DELETE /api/files/:id
pub async fn delete_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<()>>> {
    if !state.engine.delete_file(&id).await? {
        return Err(AppError::link_invalid());
    }
    Ok(Json(ApiResponse::<()>::success_message("File deleted")))
}

/// Download a file
/// GET /d/:id
pub async fn download_file(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(id): Path<String>,
    Query(query): Query<DownloadQuery>,
    headers: HeaderMap,
) -> Result<Response> {
    let record = live_record(&state, &addr, state.engine.get_file(&id).await?).await?;

    if record.is_password_protected() {
        let candidate = headers
            .get(PASSWORD_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if !state.engine.verify_password(&record, candidate) {
            state
                .limiters
                .login
                .wait(&addr.ip().to_string(), LOGIN_ATTEMPT_COST)
                .await;
            return Err(AppError::Forbidden("Wrong password".to_string()));
        }
    }

    let delivery = state.engine.begin_serve(&record.id, !query.inline).await?;
    Ok(delivery_response(delivery, !query.inline))
}

/// Serve an image inline through its hotlink
/// GET /h/:hotlink_id
pub async fn hotlink(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(hotlink_id): Path<String>,
) -> Result<Response> {
    let found = state.engine.get_file_by_hotlink(&hotlink_id).await?;
    let record = live_record(&state, &addr, found).await?;
    // Hotlinks are never issued for protected files, refuse stale ones anyway
    if record.is_password_protected() {
        return Err(AppError::link_invalid());
    }
    let delivery = state.engine.begin_serve(&record.id, false).await?;
    Ok(delivery_response(delivery, false))
}

/// Unwrap a lookup, throttling clients that keep guessing ids
async fn live_record(
    state: &AppState,
    addr: &SocketAddr,
    found: Option<FileRecord>,
) -> Result<FileRecord> {
    match found {
        Some(record) => Ok(record),
        None => {
            state.limiters.invalid_id.wait(&addr.ip().to_string(), 1).await;
            Err(AppError::link_invalid())
        }
    }
}

fn delivery_response(delivery: Delivery, force_download: bool) -> Response {
    let size = match &delivery {
        Delivery::Redirect { url, .. } => return Redirect::temporary(url).into_response(),
        Delivery::Local { size, .. } => *size,
    };
    let headers = download_headers(delivery.record(), size, force_download);

    // The copy runs on its own task; the download stays tracked until it
    // finishes or the client goes away
    let (reader, mut writer) = tokio::io::duplex(STREAM_BUFFER_SIZE);
    tokio::spawn(async move {
        if let Err(e) = delivery.stream_to(&mut writer).await {
            tracing::debug!("Download ended early: {}", e);
        }
    });

    (StatusCode::OK, headers, Body::from_stream(ReaderStream::new(reader))).into_response()
}

/// Headers for a streamed download. Stored values that cannot be sent fall
/// back to safe defaults instead of failing a download that was already counted.
fn download_headers(record: &FileRecord, size: u64, force_download: bool) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&record.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static(FALLBACK_CONTENT_TYPE)),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(size));
    let disposition = content_disposition(&record.name, force_download);
    match HeaderValue::from_str(&disposition) {
        Ok(value) => {
            headers.insert(header::CONTENT_DISPOSITION, value);
        }
        Err(e) => tracing::warn!("Dropping disposition of file {}: {}", record.id, e),
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures;

    #[test]
    fn test_download_headers_survive_bad_stored_values() {
        let mut record = fixtures::record("abc123", "abcd");
        record.name = "a\nb.txt".to_string();
        record.content_type = "text/plain\r\nX-Injected: 1".to_string();

        let headers = download_headers(&record, 5, true);
        assert_eq!(headers[header::CONTENT_TYPE], FALLBACK_CONTENT_TYPE);
        assert_eq!(headers[header::CONTENT_LENGTH], "5");
        assert_eq!(
            headers[header::CONTENT_DISPOSITION],
            "attachment; filename=\"a_b.txt\"; filename*=UTF-8''a%0Ab.txt"
        );
        assert!(headers.get("X-Injected").is_none());
    }

    #[test]
    fn test_download_headers_inline() {
        let mut record = fixtures::record("abc123", "abcd");
        record.name = "photo.png".to_string();
        record.content_type = "image/png".to_string();

        let headers = download_headers(&record, 9, false);
        assert_eq!(headers[header::CONTENT_TYPE], "image/png");
        assert!(headers[header::CONTENT_DISPOSITION]
            .to_str()
            .unwrap()
            .starts_with("inline;"));
    }
}
