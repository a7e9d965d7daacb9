use http::StatusCode;
use thiserror::Error;

/// Errors produced while fetching a resource.
#[derive(Debug, Error)]
pub enum NetworkError {
    /// No connector is registered for the URL scheme.
    #[error("no connector registered for url scheme {0:?}")]
    UnsupportedScheme(String),

    /// The server answered with a status other than success or not-modified.
    #[error("unexpected HTTP status {0}")]
    Status(StatusCode),

    /// The transport timed out while connecting or reading.
    #[error("request timed out")]
    Timeout,

    /// Reading a local resource failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The transport failed.
    #[error("transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl NetworkError {
    /// Wraps an arbitrary transport failure.
    pub fn transport<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        NetworkError::Transport(error.into())
    }
}

impl From<reqwest::Error> for NetworkError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            NetworkError::Timeout
        } else {
            NetworkError::Transport(Box::new(error))
        }
    }
}
