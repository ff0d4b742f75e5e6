use axum::{
    body::Body,
    extract::{ConnectInfo, Path, Query, State},
    http::HeaderMap,
    Json,
};
use serde::Deserialize;
use std::net::SocketAddr;

use crate::error::{ApiResponse, AppError, Result};
use crate::handlers::{body_reader, declared_size, UploadQuery};
use crate::models::{sanitize_session_id, ChunkInfo, FileHeader, FileInfo, ReservationResponse};
use crate::AppState;

/// All API uploads share one reservation pool
const UPLOAD_TARGET: &str = "api";

#[derive(Debug, Deserialize)]
pub struct ChunkQuery {
    pub index: u64,
    pub offset: u64,
    pub total_size: u64,
}

/// Reserve a chunk session
/// POST /api/chunks/reserve
pub async fn reserve(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Result<Json<ApiResponse<ReservationResponse>>> {
    if !state.limiters.new_session.allow(&addr.ip().to_string()) {
        return Err(AppError::TooManyRequests(
            "Too many new upload sessions".to_string(),
        ));
    }
    if state.reservations.count(UPLOAD_TARGET) >= state.config.storage.max_parallel_uploads {
        return Err(AppError::TooManyRequests(
            "Too many uploads in progress".to_string(),
        ));
    }
    let session_id = state.reservations.reserve(UPLOAD_TARGET);
    tracing::debug!("Reserved chunk session {}", session_id);
    Ok(Json(ApiResponse::success(ReservationResponse { session_id })))
}

/// Upload one chunk
/// POST /api/chunks/:session_id?index=&offset=&total_size=
pub async fn upload_chunk(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<ChunkQuery>,
    headers: HeaderMap,
    body: Body,
) -> Result<Json<ApiResponse<()>>> {
    if query.total_size > state.engine.max_file_size_bytes() {
        return Err(AppError::LimitExceeded(state.engine.max_file_size_bytes()));
    }
    let chunk = ChunkInfo::new(
        &session_id,
        query.index,
        query.offset,
        declared_size(&headers)?,
        query.total_size,
    )?;
    if !state.reservations.set_uploading(UPLOAD_TARGET, &session_id) {
        return Err(AppError::BadRequest(
            "Unknown or expired upload session".to_string(),
        ));
    }

    state.assembler.new_chunk(&chunk, body_reader(body)).await?;
    Ok(Json(ApiResponse::<()>::success_message("Chunk saved")))
}

/// Turn a fully uploaded session into a file link
/// POST /api/chunks/:session_id/complete?name=...
pub async fn complete(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<UploadQuery>,
) -> Result<Json<ApiResponse<FileInfo>>> {
    let name = query.file_name()?;
    let request = query.upload_request(&state.config)?;
    let sanitized = sanitize_session_id(&session_id)?;
    if !state.reservations.set_uploading(UPLOAD_TARGET, &session_id) {
        return Err(AppError::BadRequest(
            "Unknown or expired upload session".to_string(),
        ));
    }

    let (reader, size) = state.assembler.finalize(&sanitized).await?;
    let header = FileHeader {
        name,
        content_type: query.content_type.clone(),
        size,
    };
    let record = state
        .engine
        .new_file(reader, header, request)
        .await?;

    if let Err(e) = state.assembler.discard(&sanitized).await {
        tracing::warn!("Failed to remove placeholder of session {}: {}", sanitized, e);
    }
    state.reservations.set_complete(UPLOAD_TARGET, &session_id);

    Ok(Json(ApiResponse::success(FileInfo::from_record(
        &record,
        &state.config.server.public_url,
    ))))
}
