//! HTTP implementation of [`ChunkTransport`] using `reqwest`.
//!
//! Caller-supplied headers (typically `Authorization: Bearer ...`) are sent
//! with every request. JSON and multipart bodies set their own content type.

use std::collections::HashMap;
use std::time::Duration;

use hugeup_protocol::form as fields;
use hugeup_protocol::{
    ApiResponse, COMPLETE_UPLOAD_PATH, ChunkAck, CompleteUploadRequest, CompleteUploadResponse,
    INIT_UPLOAD_PATH, InitUploadData, InitUploadRequest, UPLOAD_CHUNK_PATH, operation_url,
};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::multipart::{Form, Part};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::trace;

use crate::error::UploadError;
use crate::transport::{ChunkTransport, TransportError, TransportFuture};
use crate::types::normalize_endpoint;

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Connection settings for [`HttpTransport`].
#[derive(Debug, Clone, PartialEq)]
pub struct HttpTransportConfig {
    pub endpoint: String,
    /// Extra headers sent with every request.
    pub headers: HashMap<String, String>,
    /// Per-request timeout; expiry surfaces as a network error.
    pub timeout: Duration,
}

impl HttpTransportConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            headers: HashMap::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Upload API client.
pub struct HttpTransport {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpTransport {
    /// Builds a client for `config.endpoint`, which must be an http(s) URL.
    pub fn new(config: &HttpTransportConfig) -> Result<Self, UploadError> {
        let endpoint = normalize_endpoint(&config.endpoint)?;

        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let header = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| UploadError::Validation(format!("invalid header name: {name}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| UploadError::Validation(format!("invalid value for header {name}")))?;
            headers.insert(header, value);
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()
            .map_err(|e| UploadError::Validation(format!("cannot build HTTP client: {e}")))?;

        Ok(Self {
            http,
            endpoint,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R, TransportError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = operation_url(&self.endpoint, path);
        trace!(%url, "POST json");
        let resp = self.http.post(&url).json(body).send().await?;
        read_json(resp).await
    }
}

/// Maps non-2xx to [`TransportError::Status`] and parses the body otherwise.
async fn read_json<R: DeserializeOwned>(resp: reqwest::Response) -> Result<R, TransportError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(TransportError::Status {
            status: status.as_u16(),
            body,
        });
    }

    let bytes = resp.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}

impl ChunkTransport for HttpTransport {
    fn init_upload<'a>(&'a self, request: &'a InitUploadRequest) -> TransportFuture<'a, String> {
        Box::pin(async move {
            let resp: ApiResponse<InitUploadData> =
                self.post_json(INIT_UPLOAD_PATH, request).await?;
            Ok(resp.data.upload_id)
        })
    }

    fn upload_chunk<'a>(
        &'a self,
        upload_id: &'a str,
        chunk_index: u64,
        data: Vec<u8>,
    ) -> TransportFuture<'a, String> {
        Box::pin(async move {
            let size = data.len();
            let part = Part::bytes(data)
                .file_name(fields::CHUNK_FILE_NAME)
                .mime_str("application/octet-stream")?;
            let form = Form::new()
                .part(fields::CHUNK_DATA, part)
                .text(fields::UPLOAD_ID, upload_id.to_string())
                .text(fields::CHUNK_SIZE, size.to_string())
                .text(fields::CHUNK_NUMBER, chunk_index.to_string());

            let url = operation_url(&self.endpoint, UPLOAD_CHUNK_PATH);
            trace!(%url, chunk = chunk_index, bytes = size, "POST multipart");
            let resp = self.http.post(&url).multipart(form).send().await?;

            let ack: ApiResponse<ChunkAck> = read_json(resp).await?;
            Ok(ack.data.etag)
        })
    }

    fn complete_upload<'a>(
        &'a self,
        request: &'a CompleteUploadRequest,
    ) -> TransportFuture<'a, CompleteUploadResponse> {
        Box::pin(async move { self.post_json(COMPLETE_UPLOAD_PATH, request).await })
    }
}
