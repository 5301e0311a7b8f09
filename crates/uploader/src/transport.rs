//! Transport seam between the session and the remote endpoint.
//!
//! [`HttpTransport`](crate::HttpTransport) is the production implementation.
//! Using a trait keeps the session state machine testable with mocks.

use std::future::Future;
use std::pin::Pin;

use hugeup_protocol::{CompleteUploadRequest, CompleteUploadResponse, InitUploadRequest};
use hugeup_transfer::{FailureClass, classify_status};

/// Boxed future returned by [`ChunkTransport`] operations.
pub type TransportFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, TransportError>> + Send + 'a>>;

/// The three operations of the upload API.
pub trait ChunkTransport: Send + Sync {
    /// Registers the file and returns the upload id.
    fn init_upload<'a>(&'a self, request: &'a InitUploadRequest) -> TransportFuture<'a, String>;

    /// Sends one chunk and returns its ack token.
    fn upload_chunk<'a>(
        &'a self,
        upload_id: &'a str,
        chunk_index: u64,
        data: Vec<u8>,
    ) -> TransportFuture<'a, String>;

    /// Finalizes the upload.
    fn complete_upload<'a>(
        &'a self,
        request: &'a CompleteUploadRequest,
    ) -> TransportFuture<'a, CompleteUploadResponse>;
}

/// Errors from a single transport operation.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The server answered with a non-2xx status.
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// No response: connection failure, reset, or request timeout.
    #[error("network error: {0}")]
    Network(String),

    /// A 2xx response whose body does not match the contract.
    #[error("unexpected response: {0}")]
    Decode(String),
}

impl TransportError {
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Retry classification of this failure.
    pub fn class(&self) -> FailureClass {
        match self {
            TransportError::Status { status, .. } => {
                classify_status(*status).unwrap_or(FailureClass::Permanent)
            }
            TransportError::Network(_) => FailureClass::Transient,
            TransportError::Decode(_) => FailureClass::Permanent,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            TransportError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            TransportError::Status {
                status: status.as_u16(),
                body: String::new(),
            }
        } else {
            TransportError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        TransportError::Decode(err.to_string())
    }
}
