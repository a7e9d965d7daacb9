//! Network fetcher.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use chrono::Utc;
use futures::StreamExt;
use http::header::{CONTENT_LENGTH, IF_MODIFIED_SINCE, IF_NONE_MATCH};
use http::{HeaderMap, HeaderValue, StatusCode};
use pixload_core::Metadata;
use tracing::{debug, warn};
use url::Url;

use crate::connector::{Connector, FetchRequest, ReqwestConnector};
use crate::freshness::{DEFAULT_MAX_AGE, FreshnessPolicy, MaxAgeOverride, to_http_date};
use crate::{FileConnector, NetworkError};

/// Default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default read timeout.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(15);

/// Largest body size pre-allocated from `Content-Length`.
const MAX_PREALLOCATION: usize = 8 * 1024 * 1024;

/// Result of a fetch.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// The server confirmed the cached copy. Carries refreshed metadata.
    NotModified(Metadata),
    /// A full body was transferred.
    Fetched {
        /// The encoded image bytes.
        body: Bytes,
        /// Metadata computed from the response.
        metadata: Metadata,
    },
}

/// Fetches resources through per-scheme [`Connector`]s and computes their
/// [`Metadata`].
///
/// When prior metadata is supplied, the request is conditional:
/// `If-Modified-Since` is set from its last-modified time and
/// `If-None-Match` from its etag.
///
/// There is no retry at this layer. Transport failures and unexpected
/// statuses are returned to the caller.
#[derive(Debug, Clone)]
pub struct NetworkFetcher {
    connectors: HashMap<String, Arc<dyn Connector>>,
    policy: FreshnessPolicy,
}

impl NetworkFetcher {
    /// Starts building a fetcher.
    pub fn builder() -> NetworkFetcherBuilder {
        NetworkFetcherBuilder::default()
    }

    /// Returns the freshness policy.
    pub fn policy(&self) -> &FreshnessPolicy {
        &self.policy
    }

    /// Returns `true` if a connector handles `scheme`.
    pub fn supports(&self, scheme: &str) -> bool {
        self.connectors.contains_key(scheme)
    }

    /// Fetches `url`, revalidating against `prior` when given.
    ///
    /// `progress` receives the fraction of `Content-Length` received so far,
    /// when the length is known.
    pub async fn fetch(
        &self,
        url: &Url,
        prior: Option<&Metadata>,
        progress: &(dyn Fn(f32) + Send + Sync),
    ) -> Result<FetchOutcome, NetworkError> {
        let connector = self
            .connectors
            .get(url.scheme())
            .ok_or_else(|| NetworkError::UnsupportedScheme(url.scheme().to_owned()))?;

        let mut headers = HeaderMap::new();
        if let Some(prior) = prior {
            if let Some(last_modified) = prior.last_modified() {
                if let Ok(value) = HeaderValue::from_str(&to_http_date(last_modified)) {
                    headers.insert(IF_MODIFIED_SINCE, value);
                }
            }
            if let Some(etag) = prior.etag() {
                match HeaderValue::from_str(etag) {
                    Ok(value) => {
                        headers.insert(IF_NONE_MATCH, value);
                    }
                    Err(_) => warn!(%url, etag, "cached etag is not a valid header value"),
                }
            }
        }

        let response = connector
            .fetch(FetchRequest {
                url: url.clone(),
                headers,
            })
            .await?;
        let metadata = self.policy.metadata(&response.headers, Utc::now());

        if response.status == StatusCode::NOT_MODIFIED {
            debug!(%url, "not modified since last fetch");
            return Ok(FetchOutcome::NotModified(revalidated(prior, &metadata)));
        }
        if !response.status.is_success() {
            return Err(NetworkError::Status(response.status));
        }

        let total = response
            .headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|&total| total > 0);

        let capacity = total.map_or(0, |t| {
            usize::try_from(t)
                .unwrap_or(usize::MAX)
                .min(MAX_PREALLOCATION)
        });
        let mut buf = BytesMut::with_capacity(capacity);
        let mut body = response.body;
        while let Some(chunk) = body.next().await {
            buf.extend_from_slice(&chunk?);
            if let Some(total) = total {
                progress((buf.len() as f64 / total as f64).min(1.0) as f32);
            }
        }

        debug!(%url, bytes = buf.len(), "fetched from network");
        Ok(FetchOutcome::Fetched {
            body: buf.freeze(),
            metadata,
        })
    }
}

/// Metadata for a 304 answer to a request validated against `prior`.
///
/// Headers the 304 omits keep their cached values. The expiry always comes
/// from the 304.
fn revalidated(prior: Option<&Metadata>, fresh: &Metadata) -> Metadata {
    let Some(prior) = prior else {
        return fresh.clone();
    };
    let content_type = match fresh.content_type() {
        "" => prior.content_type(),
        content_type => content_type,
    };
    Metadata::new(
        content_type,
        fresh.last_modified().or(prior.last_modified()),
        fresh.expires(),
        fresh.etag().or(prior.etag()).unwrap_or_default(),
    )
}

/// Builder for [`NetworkFetcher`].
///
/// `http` and `https` are served by a [`ReqwestConnector`] and `file` by a
/// [`FileConnector`] unless a handler is registered for those schemes.
#[derive(Debug, Clone)]
pub struct NetworkFetcherBuilder {
    connect_timeout: Duration,
    read_timeout: Duration,
    policy: FreshnessPolicy,
    connectors: HashMap<String, Arc<dyn Connector>>,
}

impl Default for NetworkFetcherBuilder {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            policy: FreshnessPolicy {
                default_max_age: DEFAULT_MAX_AGE,
                forced: MaxAgeOverride::NotForced,
            },
            connectors: HashMap::new(),
        }
    }
}

impl NetworkFetcherBuilder {
    /// Sets the connect timeout of the built-in HTTP connector.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the read timeout of the built-in HTTP connector.
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Sets the max-age used when responses carry no freshness headers.
    pub fn default_max_age(mut self, max_age: Duration) -> Self {
        self.policy.default_max_age = max_age;
        self
    }

    /// Overrides response freshness.
    pub fn forced_max_age(mut self, forced: MaxAgeOverride) -> Self {
        self.policy.forced = forced;
        self
    }

    /// Registers a connector for a URL scheme, replacing any previous one.
    pub fn scheme_handler(
        mut self,
        scheme: impl Into<String>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        self.connectors.insert(scheme.into().to_ascii_lowercase(), connector);
        self
    }

    /// Builds the fetcher.
    pub fn build(mut self) -> Result<NetworkFetcher, NetworkError> {
        if !self.connectors.contains_key("http") || !self.connectors.contains_key("https") {
            let http: Arc<dyn Connector> =
                Arc::new(ReqwestConnector::new(self.connect_timeout, self.read_timeout)?);
            self.connectors.entry("http".into()).or_insert_with(|| http.clone());
            self.connectors.entry("https".into()).or_insert(http);
        }
        self.connectors
            .entry("file".into())
            .or_insert_with(|| Arc::new(FileConnector));

        Ok(NetworkFetcher {
            connectors: self.connectors,
            policy: self.policy,
        })
    }
}
