//! Wire types for the chunked upload HTTP contract.
//!
//! The remote endpoint exposes three operations under a base URI:
//!
//! | Operation | Path | Body |
//! |---|---|---|
//! | init | `POST {endpoint}/init_upload` | JSON [`InitUploadRequest`] |
//! | chunk | `POST {endpoint}/upload_chunk` | multipart, see [`form`] |
//! | complete | `POST {endpoint}/complete_upload` | JSON [`CompleteUploadRequest`] |

pub mod messages;

pub use messages::{
    ApiResponse, ChunkAck, CompleteUploadRequest, CompleteUploadResponse, InitUploadData,
    InitUploadRequest,
};

/// Path of the init operation, relative to the endpoint.
pub const INIT_UPLOAD_PATH: &str = "init_upload";

/// Path of the chunk transfer operation, relative to the endpoint.
pub const UPLOAD_CHUNK_PATH: &str = "upload_chunk";

/// Path of the completion operation, relative to the endpoint.
pub const COMPLETE_UPLOAD_PATH: &str = "complete_upload";

/// Multipart field names of the chunk transfer request.
pub mod form {
    /// Binary chunk payload.
    pub const CHUNK_DATA: &str = "chunk_data";
    pub const UPLOAD_ID: &str = "upload_id";
    /// Byte length of `chunk_data`.
    pub const CHUNK_SIZE: &str = "chunk_size";
    /// Zero-based chunk index.
    pub const CHUNK_NUMBER: &str = "chunk_number";
    /// File name attached to the `chunk_data` part.
    pub const CHUNK_FILE_NAME: &str = "blob";
}

/// Joins an endpoint and an operation path, tolerating a trailing `/`.
pub fn operation_url(endpoint: &str, path: &str) -> String {
    format!("{}/{path}", endpoint.trim_end_matches('/'))
}
