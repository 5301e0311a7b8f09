use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Mutex;

use crate::TransferError;

/// Read-only, range-addressable view of the file being uploaded.
///
/// Sessions only hold a shared reference; the collaborator owns the handle.
pub trait FileHandle: Send + Sync {
    /// File name reported to the remote endpoint.
    fn name(&self) -> &str;

    /// Total length in bytes.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reads the contiguous byte range `[start, end)`.
    fn read_range(&self, start: u64, end: u64) -> Result<Vec<u8>, TransferError>;
}

fn check_range(start: u64, end: u64, len: u64) -> Result<(), TransferError> {
    if start > end || end > len {
        return Err(TransferError::OutOfBounds { start, end, len });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// LocalFile
// ---------------------------------------------------------------------------

/// A file on the local filesystem.
///
/// Reads seek under a mutex, so one handle can serve several readers.
pub struct LocalFile {
    file: Mutex<File>,
    name: String,
    len: u64,
}

impl LocalFile {
    /// Opens `path` for range reads.
    pub fn open(path: &Path) -> Result<Self, TransferError> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        Ok(Self {
            file: Mutex::new(file),
            name,
            len,
        })
    }
}

impl FileHandle for LocalFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn len(&self) -> u64 {
        self.len
    }

    fn read_range(&self, start: u64, end: u64) -> Result<Vec<u8>, TransferError> {
        check_range(start, end, self.len)?;
        let mut buf = vec![0u8; (end - start) as usize];
        let mut file = self
            .file
            .lock()
            .map_err(|_| std::io::Error::other("file handle lock poisoned"))?;
        file.seek(SeekFrom::Start(start))?;
        file.read_exact(&mut buf)?;
        Ok(buf)
    }
}

// ---------------------------------------------------------------------------
// InMemoryFile
// ---------------------------------------------------------------------------

/// A file held entirely in memory.
#[derive(Debug, Clone)]
pub struct InMemoryFile {
    name: String,
    data: Vec<u8>,
}

impl InMemoryFile {
    pub fn new(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }
}

impl FileHandle for InMemoryFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_range(&self, start: u64, end: u64) -> Result<Vec<u8>, TransferError> {
        check_range(start, end, self.len())?;
        Ok(self.data[start as usize..end as usize].to_vec())
    }
}
