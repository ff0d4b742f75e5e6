//! Minimal COS object client: upload, HEAD, delete and presigned download

use bytes::Bytes;
use chrono::Utc;
use reqwest::header::{
    HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, DATE, HOST,
};
use reqwest::{Body, StatusCode};
use std::path::Path;
use tokio_util::io::ReaderStream;

use crate::error::{AppError, Result};
use crate::storage::cos::signer::Signer;

/// Lifetime of signatures on server-side requests
const REQUEST_SIGN_SECONDS: u64 = 600;

#[derive(Debug, Clone)]
pub struct Client {
    secret_id: String,
    secret_key: String,
    bucket: String,
    region: String,
    http: reqwest::Client,
}

impl Client {
    pub fn new(
        secret_id: impl Into<String>,
        secret_key: impl Into<String>,
        bucket: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            secret_id: secret_id.into(),
            secret_key: secret_key.into(),
            bucket: bucket.into(),
            region: region.into(),
            http: reqwest::Client::new(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn host(&self) -> String {
        format!("{}.cos.{}.myqcloud.com", self.bucket, self.region)
    }

    pub fn path_from_object_key(&self, key: &str) -> String {
        if key.starts_with('/') {
            key.to_string()
        } else {
            format!("/{}", key)
        }
    }

    fn full_url(&self, url_path: &str) -> String {
        format!("https://{}{}", self.host(), url_path)
    }

    fn common_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(HOST, header_value(&self.host())?);
        let now = Utc::now().format("%a, %d %b %Y %T GMT").to_string();
        headers.insert(DATE, header_value(&now)?);
        Ok(headers)
    }

    /// Sign `headers` in place for a request on `url_path`
    fn authorize(&self, method: &str, url_path: &str, headers: &mut HeaderMap) -> Result<()> {
        let signature = Signer::new(method, url_path, headers, &[]).authorization(
            &self.secret_id,
            &self.secret_key,
            REQUEST_SIGN_SECONDS,
        );
        headers.insert(AUTHORIZATION, header_value(&signature)?);
        Ok(())
    }

    /// Upload an in-memory object
    pub async fn put_object_bytes(&self, key: &str, data: Bytes, content_type: &str) -> Result<()> {
        let url_path = self.path_from_object_key(key);
        let mut headers = self.common_headers()?;
        headers.insert(CONTENT_TYPE, header_value(content_type)?);
        headers.insert(CONTENT_LENGTH, HeaderValue::from(data.len() as u64));
        self.authorize("put", &url_path, &mut headers)?;

        let resp = self
            .http
            .put(self.full_url(&url_path))
            .headers(headers)
            .body(data)
            .send()
            .await?;
        check_status("upload", key, resp.status())
    }

    /// Upload a local file, streaming it from disk
    pub async fn put_object_file(&self, key: &str, path: &Path, content_type: &str) -> Result<()> {
        let file = tokio::fs::File::open(path).await?;
        let size = file.metadata().await?.len();

        let url_path = self.path_from_object_key(key);
        let mut headers = self.common_headers()?;
        headers.insert(CONTENT_TYPE, header_value(content_type)?);
        headers.insert(CONTENT_LENGTH, HeaderValue::from(size));
        self.authorize("put", &url_path, &mut headers)?;

        let resp = self
            .http
            .put(self.full_url(&url_path))
            .headers(headers)
            .body(Body::wrap_stream(ReaderStream::new(file)))
            .send()
            .await?;
        check_status("upload", key, resp.status())
    }

    /// HEAD the object. A 404 is reported as absent, other failures as errors.
    pub async fn head_object(&self, key: &str) -> Result<bool> {
        let url_path = self.path_from_object_key(key);
        let mut headers = self.common_headers()?;
        self.authorize("head", &url_path, &mut headers)?;

        let resp = self
            .http
            .head(self.full_url(&url_path))
            .headers(headers)
            .send()
            .await?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status => check_status("head", key, status).map(|_| true),
        }
    }

    pub async fn delete_object(&self, key: &str) -> Result<()> {
        let url_path = self.path_from_object_key(key);
        let mut headers = self.common_headers()?;
        self.authorize("delete", &url_path, &mut headers)?;

        let resp = self
            .http
            .delete(self.full_url(&url_path))
            .headers(headers)
            .send()
            .await?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(()),
            status => check_status("delete", key, status),
        }
    }

    /// Presigned GET URL. `query` parameters are signed with the request so
    /// the caller cannot alter them.
    /// Reference: https://cloud.tencent.com/document/product/436/35153
    pub fn presigned_download_url(
        &self,
        key: &str,
        query: &[(&str, &str)],
        expire_seconds: u64,
    ) -> Result<String> {
        let url_path = self.path_from_object_key(key);
        let mut headers = HeaderMap::new();
        headers.insert(HOST, header_value(&self.host())?);

        let signature = Signer::new("get", &url_path, &headers, query).authorization(
            &self.secret_id,
            &self.secret_key,
            expire_seconds,
        );

        let mut url = self.full_url(&url_path);
        url.push('?');
        for (k, v) in query {
            url.push_str(&format!("{}={}&", k, urlencoding::encode(v)));
        }
        url.push_str(&signature);
        Ok(url)
    }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| AppError::Storage(format!("Invalid COS header value: {}", e)))
}

fn check_status(op: &str, key: &str, status: StatusCode) -> Result<()> {
    if status.is_success() {
        Ok(())
    } else {
        Err(AppError::Storage(format!(
            "COS {} of {} failed with status {}",
            op, key, status
        )))
    }
}
