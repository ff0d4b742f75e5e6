pub mod chunk;
pub mod file;

use axum::{
    body::Body,
    http::{header, HeaderMap},
};
use futures::TryStreamExt;
use serde::Deserialize;
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::helper::{now_unix, sanitize_file_name};
use crate::models::UploadRequest;

const SECONDS_PER_DAY: i64 = 24 * 3600;

/// Link settings accepted on upload and chunk completion
#[derive(Debug, Default, Deserialize)]
pub struct UploadQuery {
    pub name: String,
    pub content_type: Option<String>,
    pub downloads: Option<i64>,
    pub expiry_days: Option<i64>,
    #[serde(default)]
    pub unlimited_downloads: bool,
    #[serde(default)]
    pub unlimited_time: bool,
    pub password: Option<String>,
}

impl UploadQuery {
    pub fn file_name(&self) -> Result<String> {
        let name = sanitize_file_name(&self.name);
        if name.is_empty() {
            return Err(AppError::BadRequest("File name is required".to_string()));
        }
        Ok(name)
    }

    pub fn upload_request(&self, config: &Config) -> Result<UploadRequest> {
        let days = self
            .expiry_days
            .unwrap_or(config.storage.default_expiry_days)
            .max(1);
        let expire_at = days
            .checked_mul(SECONDS_PER_DAY)
            .and_then(|secs| now_unix().checked_add(secs))
            .ok_or_else(|| AppError::BadRequest(format!("Expiry of {} days is too long", days)))?;
        Ok(UploadRequest {
            allowed_downloads: self
                .downloads
                .unwrap_or(config.storage.default_downloads)
                .max(1),
            expire_at,
            unlimited_downloads: self.unlimited_downloads,
            unlimited_time: self.unlimited_time,
            password: self.password.clone(),
        })
    }
}

/// Size the client announced for the request body
pub fn declared_size(headers: &HeaderMap) -> Result<u64> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| AppError::BadRequest("Content-Length header is required".to_string()))
}

/// Adapt a request body into an AsyncRead
pub fn body_reader(body: Body) -> impl AsyncRead + Unpin {
    StreamReader::new(
        body.into_data_stream()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_upload_request_defaults() {
        let config = Config::default();
        let query = UploadQuery {
            name: " a.txt ".to_string(),
            ..Default::default()
        };
        assert_eq!(query.file_name().unwrap(), "a.txt");
        let request = query.upload_request(&config).unwrap();
        assert_eq!(request.allowed_downloads, 1);
        let in_14_days = now_unix() + 14 * 24 * 3600;
        assert!((request.expire_at - in_14_days).abs() <= 1);
        assert!(request.password.is_none());

        let empty = UploadQuery::default();
        assert!(empty.file_name().is_err());
        let control_only = UploadQuery {
            name: "\r\n".to_string(),
            ..Default::default()
        };
        assert!(control_only.file_name().is_err());
    }

    #[test]
    fn test_upload_request_rejects_overflowing_expiry() {
        let config = Config::default();
        let query = UploadQuery {
            name: "a.txt".to_string(),
            expiry_days: Some(i64::MAX / 1000),
            ..Default::default()
        };
        assert!(matches!(
            query.upload_request(&config),
            Err(AppError::BadRequest(_))
        ));

        let far = UploadQuery {
            expiry_days: Some(3650),
            ..query
        };
        let request = far.upload_request(&config).unwrap();
        assert!(request.expire_at > now_unix() + 3649 * SECONDS_PER_DAY);
    }

    #[test]
    fn test_declared_size() {
        let mut headers = HeaderMap::new();
        assert!(declared_size(&headers).is_err());
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("2000"));
        assert_eq!(declared_size(&headers).unwrap(), 2000);
    }
}
