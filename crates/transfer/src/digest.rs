use md5::{Digest, Md5};
use tracing::debug;

use crate::{FileHandle, TransferError};

/// Window size used by [`digest_file`]: 4 MiB.
pub const DIGEST_WINDOW: u64 = 4 * 1024 * 1024;

/// Callback invoked with the fraction of bytes consumed so far (0.0–1.0).
pub type ProgressFn = Box<dyn FnMut(f64) + Send>;

/// Incremental MD5 over sequential byte ranges of a file.
///
/// Memory use is independent of the file size. The digest only depends on
/// the bytes fed, not on how they were split.
pub struct StreamingDigest {
    hasher: Option<Md5>,
    consumed: u64,
    total: u64,
    progress: Option<ProgressFn>,
}

impl StreamingDigest {
    /// Creates a digest for a file of `total` bytes.
    ///
    /// `total` is only used for progress reporting.
    pub fn new(total: u64) -> Self {
        Self {
            hasher: Some(Md5::new()),
            consumed: 0,
            total,
            progress: None,
        }
    }

    /// Reports `consumed / total` after every feed.
    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Bytes consumed so far; the offset the next feed must start at.
    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    /// Consumes the next contiguous slice of the file.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<(), TransferError> {
        let hasher = self.hasher.as_mut().ok_or_else(|| {
            TransferError::InvalidSequence("digest fed after finalize".into())
        })?;
        hasher.update(bytes);
        self.consumed += bytes.len() as u64;

        if let Some(progress) = self.progress.as_mut() {
            let fraction = if self.total == 0 {
                1.0
            } else {
                (self.consumed as f64 / self.total as f64).min(1.0)
            };
            progress(fraction);
        }
        Ok(())
    }

    /// Like [`feed`](Self::feed), but checks that `offset` continues the stream.
    pub fn feed_at(&mut self, offset: u64, bytes: &[u8]) -> Result<(), TransferError> {
        if offset != self.consumed {
            return Err(TransferError::InvalidSequence(format!(
                "digest expected offset {}, got {offset}",
                self.consumed
            )));
        }
        self.feed(bytes)
    }

    /// Returns the lowercase hex digest. Fails if called twice.
    pub fn finalize(&mut self) -> Result<String, TransferError> {
        let hasher = self
            .hasher
            .take()
            .ok_or_else(|| TransferError::InvalidSequence("digest already finalized".into()))?;
        Ok(hex::encode(hasher.finalize()))
    }
}

/// Digests a whole file in `window`-sized reads.
///
/// A `window` of 0 uses [`DIGEST_WINDOW`].
pub fn digest_file(
    file: &dyn FileHandle,
    window: u64,
    progress: Option<ProgressFn>,
) -> Result<String, TransferError> {
    let window = if window == 0 { DIGEST_WINDOW } else { window };
    let len = file.len();

    let mut digest = StreamingDigest::new(len);
    if let Some(progress) = progress {
        digest = digest.with_progress(progress);
    }

    let mut offset = 0;
    while offset < len {
        let end = offset.saturating_add(window).min(len);
        let bytes = file.read_range(offset, end)?;
        digest.feed_at(offset, &bytes)?;
        offset = end;
    }

    let hex = digest.finalize()?;
    debug!(file = %file.name(), bytes = len, md5 = %hex, "digest computed");
    Ok(hex)
}

/// Returns `true` for a 32-character hex MD5 digest.
pub fn is_valid_digest(digest: &str) -> bool {
    digest.len() == 32 && digest.bytes().all(|b| b.is_ascii_hexdigit())
}
