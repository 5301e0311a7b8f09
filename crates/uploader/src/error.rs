//! Upload error types.

use hugeup_transfer::TransferError;

use crate::transport::TransportError;
use crate::types::Stage;

/// Errors produced by an upload session.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    /// Bad construction parameters. Never retried.
    #[error("invalid configuration: {0}")]
    Validation(String),

    /// A transient failure outlived the retry budget.
    #[error("chunk {chunk_index} failed after {retries} retries: {source}")]
    RetriesExhausted {
        chunk_index: u64,
        retries: u32,
        #[source]
        source: TransportError,
    },

    /// A failure that retrying cannot fix.
    #[error("{stage} failed: {source}")]
    Permanent {
        stage: Stage,
        #[source]
        source: TransportError,
    },

    /// Protocol misuse by the caller.
    #[error("invalid sequence: {0}")]
    InvalidSequence(String),

    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("task join error: {0}")]
    Task(String),
}

impl UploadError {
    /// HTTP status behind this error, if the server answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            UploadError::RetriesExhausted { source, .. } | UploadError::Permanent { source, .. } => {
                source.status()
            }
            _ => None,
        }
    }

    /// Chunk index the error is attributed to, if any.
    pub fn chunk_index(&self) -> Option<u64> {
        match self {
            UploadError::RetriesExhausted { chunk_index, .. } => Some(*chunk_index),
            UploadError::Permanent {
                stage: Stage::Chunk(index),
                ..
            } => Some(*index),
            _ => None,
        }
    }
}
