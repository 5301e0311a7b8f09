//! Building blocks of a chunked, resumable upload.
//!
//! - [`FileHandle`]: read-only, range-addressable source file.
//! - [`ChunkPlan`]: partition of a file into fixed-size chunks.
//! - [`StreamingDigest`]: bounded-memory MD5 over sequential ranges.
//! - [`RetryPolicy`]: transient/permanent classification and the retry budget.

mod digest;
mod file;
mod plan;
mod retry;

pub use digest::{DIGEST_WINDOW, ProgressFn, StreamingDigest, digest_file, is_valid_digest};
pub use file::{FileHandle, InMemoryFile, LocalFile};
pub use plan::ChunkPlan;
pub use retry::{
    DEFAULT_RETRIES, DEFAULT_RETRY_DELAY, FailureClass, RetryDecision, RetryPolicy,
    classify_status,
};

/// Default chunk size: 5 MiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 5 * 1024 * 1024;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("range {start}..{end} out of bounds for file of {len} bytes")]
    OutOfBounds { start: u64, end: u64, len: u64 },

    #[error("invalid chunk plan: {0}")]
    InvalidPlan(String),

    #[error("invalid sequence: {0}")]
    InvalidSequence(String),
}
