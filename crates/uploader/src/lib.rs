//! Resumable, chunked file upload client.
//!
//! This crate drives one file to a remote endpoint speaking the
//! [`hugeup_protocol`] HTTP contract. Transport is behind the
//! [`ChunkTransport`] trait so the state machine is testable with mocks.
//!
//! # Pipeline
//!
//! 1. **Init**: register the file (name, size, MD5, chunk count) and get an upload id
//! 2. **Transfer**: send chunks strictly in order, retrying transient failures
//! 3. **Complete**: submit the ordered acknowledgement tokens
//!
//! Progress and failures are published on the session's [`EventBus`].

pub mod error;
pub mod events;
pub mod http;
pub mod session;
pub mod transport;
pub mod types;

// Re-export primary types for convenience.
pub use error::UploadError;
pub use events::{EventBus, EventKind, FailureReport, RetryNotice, SubscriptionId, UploadEvent};
pub use http::{HttpTransport, HttpTransportConfig};
pub use session::UploadSession;
pub use transport::{ChunkTransport, TransportError, TransportFuture};
pub use types::{
    Checkpoint, NetworkState, PauseReason, SessionConfig, SessionState, Stage, normalize_endpoint,
};

pub use hugeup_protocol::CompleteUploadResponse;
pub use hugeup_transfer::{FileHandle, InMemoryFile, LocalFile};
