//! Error types surfaced to image listeners.

use std::io;
use std::sync::Arc;

use pixload_core::{CacheKey, CodecError, SmolStr};
use pixload_http::NetworkError;

/// Failure of a load, delivered to every listener of an in-flight request.
///
/// Cloning is cheap: one failure is fanned out to every caller that shared
/// the request, so sources are held behind [`Arc`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum LoadError {
    /// Reading cached or local data failed.
    #[error("i/o error: {0}")]
    Io(#[source] Arc<io::Error>),

    /// The transfer failed: connect error, timeout or unexpected status.
    #[error("network error: {0}")]
    Network(#[source] Arc<NetworkError>),

    /// The codec could not decode the fetched bytes.
    #[error("failed to decode image: {0}")]
    Decode(#[source] Arc<CodecError>),

    /// A transformation returned no image.
    #[error("transformer produced no result: {0}")]
    EmptyTransform(SmolStr),

    /// Every stage delegated and none produced a result.
    #[error("no loader could satisfy {0}")]
    Exhausted(CacheKey),

    /// A stage failed unexpectedly.
    #[error("internal loader error: {0}")]
    Internal(String),

    /// The loader was dropped before the request completed.
    #[error("image loader has shut down")]
    Shutdown,
}

impl From<io::Error> for LoadError {
    fn from(error: io::Error) -> Self {
        LoadError::Io(Arc::new(error))
    }
}

impl From<NetworkError> for LoadError {
    fn from(error: NetworkError) -> Self {
        LoadError::Network(Arc::new(error))
    }
}

impl From<CodecError> for LoadError {
    fn from(error: CodecError) -> Self {
        LoadError::Decode(Arc::new(error))
    }
}

/// Recovers the original [`io::Error`] when the failure was one, wrapping
/// every other variant.
impl From<LoadError> for io::Error {
    fn from(error: LoadError) -> Self {
        match error {
            LoadError::Io(source) => unwrap_io(source),
            LoadError::Network(source) => match Arc::try_unwrap(source) {
                Ok(NetworkError::Io(inner)) => inner,
                Ok(other) => io::Error::other(LoadError::from(other)),
                Err(shared) => match shared.as_ref() {
                    NetworkError::Io(inner) => io::Error::new(inner.kind(), inner.to_string()),
                    _ => io::Error::other(LoadError::Network(shared)),
                },
            },
            LoadError::Shutdown => io::Error::new(io::ErrorKind::Interrupted, LoadError::Shutdown),
            other => io::Error::other(other),
        }
    }
}

fn unwrap_io(source: Arc<io::Error>) -> io::Error {
    Arc::try_unwrap(source)
        .unwrap_or_else(|shared| io::Error::new(shared.kind(), shared.to_string()))
}

/// Failure to build an [`ImageLoader`](crate::ImageLoader).
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// A worker pool or the callback thread could not be started.
    #[error("failed to start {name}: {source}")]
    Thread {
        /// Name of the pool or thread.
        name: &'static str,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// The network stage could not be created.
    #[error(transparent)]
    Network(#[from] NetworkError),

    /// The configuration is inconsistent.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
