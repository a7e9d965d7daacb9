//! Lazily-openable encoded image data.
//!
//! Stages hand encoded bytes to each other as a [`ByteSource`] rather than an
//! open stream: a disk hit points at the committed cache file, which is only
//! read once a consumer actually needs the bytes.

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use bytes::Bytes;

const READ_CHUNK: usize = 16 * 1024;

/// Encoded image data, either buffered or backed by a file.
#[derive(Debug, Clone)]
pub enum ByteSource {
    /// Bytes already held in memory.
    Memory(Bytes),
    /// A file on disk with its expected length.
    File {
        /// Location of the data.
        path: PathBuf,
        /// Length in bytes.
        len: u64,
    },
}

impl ByteSource {
    /// Creates a file-backed source.
    pub fn file(path: impl AsRef<Path>, len: u64) -> Self {
        ByteSource::File {
            path: path.as_ref().to_path_buf(),
            len,
        }
    }

    /// Returns the length of the data in bytes.
    pub fn len(&self) -> u64 {
        match self {
            ByteSource::Memory(bytes) => bytes.len() as u64,
            ByteSource::File { len, .. } => *len,
        }
    }

    /// Returns `true` if the source holds no data.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Opens a reader over the data.
    pub fn open(&self) -> io::Result<Box<dyn Read + Send>> {
        match self {
            ByteSource::Memory(bytes) => Ok(Box::new(io::Cursor::new(bytes.clone()))),
            ByteSource::File { path, .. } => Ok(Box::new(File::open(path)?)),
        }
    }

    /// Reads the whole source into memory.
    pub fn read_all(&self) -> io::Result<Bytes> {
        self.read_with_progress(|_| {})
    }

    /// Reads the whole source, reporting the fraction read after each chunk.
    ///
    /// Progress is reported in `0.0..=1.0` and only when the length is known.
    pub fn read_with_progress<F>(&self, mut progress: F) -> io::Result<Bytes>
    where
        F: FnMut(f32),
    {
        if let ByteSource::Memory(bytes) = self {
            progress(1.0);
            return Ok(bytes.clone());
        }

        let total = self.len();
        let mut reader = self.open()?;
        let mut out = Vec::with_capacity(usize::try_from(total).unwrap_or(0));
        let mut chunk = vec![0u8; READ_CHUNK];
        loop {
            let n = match reader.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            out.extend_from_slice(&chunk[..n]);
            if total > 0 {
                progress((out.len() as f64 / total as f64).min(1.0) as f32);
            }
        }
        Ok(Bytes::from(out))
    }
}

impl From<Bytes> for ByteSource {
    fn from(bytes: Bytes) -> Self {
        ByteSource::Memory(bytes)
    }
}

impl From<Vec<u8>> for ByteSource {
    fn from(bytes: Vec<u8>) -> Self {
        ByteSource::Memory(Bytes::from(bytes))
    }
}
