//! Data types for the upload session.

use std::fmt;
use std::time::Duration;

use hugeup_transfer::{DEFAULT_CHUNK_SIZE, DEFAULT_RETRIES, DEFAULT_RETRY_DELAY};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::UploadError;

/// Collaborator-facing session configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Base URI of the upload API.
    pub endpoint: String,
    /// Chunk size in bytes (default 5 MiB).
    pub chunk_size: u64,
    /// Retries per chunk (default 5).
    pub retries: u32,
    /// Fixed delay between retries (default 5 s).
    pub retry_delay: Duration,
    /// Precomputed hex MD5 of the whole file.
    pub digest: String,
    /// Extra fields merged into the init request body.
    pub extra_fields: Map<String, Value>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            retries: DEFAULT_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            digest: String::new(),
            extra_fields: Map::new(),
        }
    }
}

/// Checks that `endpoint` is an absolute http(s) URL and strips surrounding
/// whitespace and any trailing `/`.
pub fn normalize_endpoint(endpoint: &str) -> Result<String, UploadError> {
    let endpoint = endpoint.trim();
    if endpoint.is_empty() {
        return Err(UploadError::Validation("endpoint is required".into()));
    }
    if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
        return Err(UploadError::Validation(format!(
            "endpoint must be an http(s) URL: {endpoint}"
        )));
    }
    Ok(endpoint.trim_end_matches('/').to_string())
}

/// Lifecycle state of an upload session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Initializing,
    Transferring,
    /// Waiting out the delay before re-sending the current chunk.
    Retrying,
    /// The chunk loop is halted.
    Paused(PauseReason),
    Completing,
    Finished,
    Failed,
}

impl SessionState {
    /// `Finished` and `Failed` issue no further transport calls.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Finished | SessionState::Failed)
    }
}

/// Why the chunk loop is halted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseReason {
    /// [`UploadSession::pause`](crate::UploadSession::pause) was called.
    User,
    /// The collaborator reported the network as offline.
    Offline,
}

/// Network status as reported by the collaborator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NetworkState {
    #[default]
    Online,
    Offline,
}

/// Which operation of the upload an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Init,
    Chunk(u64),
    Complete,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Init => write!(f, "init"),
            Stage::Chunk(index) => write!(f, "chunk {index}"),
            Stage::Complete => write!(f, "complete"),
        }
    }
}

/// Resumable part of a session: the upload id and the acks collected so far.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub upload_id: String,
    /// Ack tokens in chunk order; its length is the next chunk index.
    pub acknowledgements: Vec<String>,
}
