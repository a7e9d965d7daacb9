use pixload_core::MetadataError;
use thiserror::Error;

/// Errors that can occur when using [`DiskCache`](crate::DiskCache).
#[derive(Debug, Error)]
pub enum DiskCacheError {
    /// An I/O error occurred while accessing the cache directory.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Another editor is already open for this entry.
    #[error("entry {0} is already being edited")]
    ConcurrentEdit(String),

    /// A new entry was committed without a value for every index.
    #[error("newly created entry {key} did not write value {index}")]
    MissingValue {
        /// Hashed entry key.
        key: String,
        /// Index of the missing value.
        index: usize,
    },

    /// The value index is out of range.
    #[error("value index {0} is out of range")]
    InvalidIndex(usize),

    /// The stored metadata could not be decoded.
    #[error("Metadata error: {0}")]
    Metadata(#[from] MetadataError),

    /// The provided configuration is invalid.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
