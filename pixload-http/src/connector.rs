//! Transport abstraction.
//!
//! A [`Connector`] performs one GET-style transfer for a URL. The fetcher
//! picks a connector by URL scheme, so hosts can plug in their own handlers
//! for custom schemes next to the built-in [`ReqwestConnector`] and
//! [`FileConnector`](crate::FileConnector).

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use http::{HeaderMap, StatusCode};
use url::Url;

use crate::NetworkError;

/// Streamed response body.
pub type Body = BoxStream<'static, Result<Bytes, NetworkError>>;

/// A request handed to a [`Connector`].
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// Resource to fetch.
    pub url: Url,
    /// Request headers, including conditional validators.
    pub headers: HeaderMap,
}

/// A connector's answer.
pub struct FetchResponse {
    /// Response status.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    /// Response body. Empty for a not-modified answer.
    pub body: Body,
}

impl FetchResponse {
    /// Creates a response with a fully buffered body.
    pub fn buffered(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        let body = if body.is_empty() {
            futures::stream::empty().boxed()
        } else {
            futures::stream::once(async move { Ok(body) }).boxed()
        };
        Self { status, headers, body }
    }
}

impl std::fmt::Debug for FetchResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Performs transfers for one or more URL schemes.
#[async_trait]
pub trait Connector: Send + Sync + Debug {
    /// Fetches `request.url`.
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, NetworkError>;
}

/// HTTP(S) connector backed by [`reqwest`].
///
/// ```
/// use std::time::Duration;
/// use pixload_http::ReqwestConnector;
///
/// let connector =
///     ReqwestConnector::new(Duration::from_secs(10), Duration::from_secs(15)).unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct ReqwestConnector {
    client: reqwest::Client,
}

impl ReqwestConnector {
    /// Builds a client with the given connect and read timeouts.
    pub fn new(connect_timeout: Duration, read_timeout: Duration) -> Result<Self, NetworkError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .read_timeout(read_timeout)
            .build()?;
        Ok(Self { client })
    }

    /// Uses an existing client.
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Connector for ReqwestConnector {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, NetworkError> {
        let response = self
            .client
            .get(request.url)
            .headers(request.headers)
            .send()
            .await?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = futures::stream::try_unfold(response, |mut response| async move {
            let chunk = response.chunk().await?;
            Ok::<_, NetworkError>(chunk.map(|chunk| (chunk, response)))
        })
        .boxed();

        Ok(FetchResponse { status, headers, body })
    }
}
