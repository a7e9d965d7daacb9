#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

pub mod connector;
mod error;
mod fetcher;
mod file;
pub mod freshness;

pub use connector::{Body, Connector, FetchRequest, FetchResponse, ReqwestConnector};
pub use error::NetworkError;
pub use fetcher::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT, FetchOutcome, NetworkFetcher,
    NetworkFetcherBuilder,
};
pub use file::FileConnector;
pub use freshness::{DEFAULT_MAX_AGE, FreshnessPolicy, MaxAgeOverride};
