//! Integration tests for NetworkFetcher using wiremock and local files.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use http::{HeaderMap, StatusCode};
use pixload_core::{Expiry, Metadata};
use pixload_http::{
    Connector, FetchOutcome, FetchRequest, FetchResponse, MaxAgeOverride, NetworkError,
    NetworkFetcher,
};
use url::Url;
use wiremock::matchers::{header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn no_progress(_: f32) {}

/// Test 1: a plain fetch returns the body and metadata from headers
#[tokio::test]
async fn test_fetch_body_and_metadata() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/cat.png"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(vec![7u8; 4096])
                .insert_header("Content-Type", "image/png")
                .insert_header("ETag", "\"v1\"")
                .insert_header("Cache-Control", "max-age=60")
                .insert_header("Expires", "Wed, 21 Oct 2015 07:28:00 GMT"),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let fetcher = NetworkFetcher::builder().build().unwrap();
    let url = Url::parse(&format!("{}/cat.png", mock_server.uri())).unwrap();

    let progress = Arc::new(Mutex::new(Vec::new()));
    let seen = progress.clone();
    let before = Utc::now();
    let outcome = fetcher
        .fetch(&url, None, &move |p| seen.lock().unwrap().push(p))
        .await
        .unwrap();

    let FetchOutcome::Fetched { body, metadata } = outcome else {
        panic!("expected a body");
    };
    assert_eq!(body.len(), 4096);
    assert_eq!(metadata.content_type(), "image/png");
    assert_eq!(metadata.etag(), Some("\"v1\""));
    match metadata.expires() {
        Expiry::At(at) => {
            assert!(at >= before + TimeDelta::seconds(60));
            assert!(at <= Utc::now() + TimeDelta::seconds(60));
        }
        Expiry::Never => panic!("max-age must produce an expiry"),
    }
    assert_eq!(progress.lock().unwrap().last().copied(), Some(1.0));
}

/// Test 2: prior metadata makes the request conditional and 304 is reported
#[tokio::test]
async fn test_conditional_request_not_modified() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/cat.png"))
        .and(header("If-None-Match", "\"v1\""))
        .and(header_exists("If-Modified-Since"))
        .respond_with(
            ResponseTemplate::new(304)
                .insert_header("ETag", "\"v1\"")
                .insert_header("Cache-Control", "max-age=120"),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let fetcher = NetworkFetcher::builder().build().unwrap();
    let url = Url::parse(&format!("{}/cat.png", mock_server.uri())).unwrap();
    let prior = Metadata::new(
        "image/png",
        DateTime::from_timestamp(1_445_412_480, 0),
        Expiry::At(Utc::now() - TimeDelta::hours(1)),
        "\"v1\"",
    );

    let outcome = fetcher.fetch(&url, Some(&prior), &no_progress).await.unwrap();

    let FetchOutcome::NotModified(metadata) = outcome else {
        panic!("expected not modified");
    };
    assert!(!metadata.is_expired(Utc::now()));
}

/// Test 3: non-success statuses are errors
#[tokio::test]
async fn test_error_status() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    let fetcher = NetworkFetcher::builder().build().unwrap();
    let url = Url::parse(&format!("{}/missing.png", mock_server.uri())).unwrap();

    let err = fetcher.fetch(&url, None, &no_progress).await.unwrap_err();
    assert!(matches!(err, NetworkError::Status(StatusCode::NOT_FOUND)));
}

/// Test 4: read timeout surfaces as a timeout error
#[tokio::test]
async fn test_read_timeout() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&mock_server)
        .await;

    let fetcher = NetworkFetcher::builder()
        .read_timeout(Duration::from_millis(100))
        .build()
        .unwrap();
    let url = Url::parse(&format!("{}/slow.png", mock_server.uri())).unwrap();

    let err = fetcher.fetch(&url, None, &no_progress).await.unwrap_err();
    assert!(matches!(err, NetworkError::Timeout), "got {err:?}");
}

/// Test 5: schemes without a connector are rejected
#[tokio::test]
async fn test_unsupported_scheme() {
    let fetcher = NetworkFetcher::builder().build().unwrap();
    let url = Url::parse("ftp://example.com/a.png").unwrap();

    let err = fetcher.fetch(&url, None, &no_progress).await.unwrap_err();
    assert!(matches!(err, NetworkError::UnsupportedScheme(ref s) if s == "ftp"));
}

#[derive(Debug)]
struct Fixed;

#[async_trait]
impl Connector for Fixed {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, NetworkError> {
        assert_eq!(request.url.scheme(), "asset");
        Ok(FetchResponse::buffered(
            StatusCode::OK,
            HeaderMap::new(),
            bytes::Bytes::from_static(b"asset bytes"),
        ))
    }
}

/// Test 6: custom scheme handlers and forced max-age
#[tokio::test]
async fn test_custom_scheme_with_forced_max_age() {
    let fetcher = NetworkFetcher::builder()
        .scheme_handler("asset", Arc::new(Fixed))
        .forced_max_age(MaxAgeOverride::Forever)
        .build()
        .unwrap();
    let url = Url::parse("asset://bundle/logo.png").unwrap();

    let outcome = fetcher.fetch(&url, None, &no_progress).await.unwrap();
    let FetchOutcome::Fetched { body, metadata } = outcome else {
        panic!("expected a body");
    };
    assert_eq!(body.as_ref(), b"asset bytes");
    assert_eq!(metadata.expires(), Expiry::Never);
}

/// Test 7: local files, revalidated through If-Modified-Since
#[tokio::test]
async fn test_file_scheme_revalidation() {
    let dir = tempfile::TempDir::new().unwrap();
    let file = dir.path().join("photo.JPG");
    std::fs::write(&file, b"jpeg bytes").unwrap();

    let fetcher = NetworkFetcher::builder().build().unwrap();
    let url = Url::from_file_path(&file).unwrap();

    let outcome = fetcher.fetch(&url, None, &no_progress).await.unwrap();
    let FetchOutcome::Fetched { body, metadata } = outcome else {
        panic!("expected a body");
    };
    assert_eq!(body.as_ref(), b"jpeg bytes");
    assert_eq!(metadata.content_type(), "image/jpeg");
    assert!(metadata.last_modified().is_some());

    let outcome = fetcher.fetch(&url, Some(&metadata), &no_progress).await.unwrap();
    assert!(matches!(outcome, FetchOutcome::NotModified(_)));

    let missing = Url::from_file_path(dir.path().join("missing.png")).unwrap();
    let err = fetcher.fetch(&missing, None, &no_progress).await.unwrap_err();
    assert!(matches!(err, NetworkError::Io(_)));
}

/// Test 8: a 304 without validators keeps the cached ones
#[tokio::test]
async fn test_not_modified_keeps_cached_validators() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/cat.png"))
        .and(header("If-None-Match", "\"v1\""))
        .respond_with(ResponseTemplate::new(304).insert_header("Cache-Control", "max-age=120"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let fetcher = NetworkFetcher::builder().build().unwrap();
    let url = Url::parse(&format!("{}/cat.png", mock_server.uri())).unwrap();
    let last_modified = DateTime::from_timestamp(1_445_412_480, 0);
    let prior = Metadata::new(
        "image/png",
        last_modified,
        Expiry::At(Utc::now() - TimeDelta::hours(1)),
        "\"v1\"",
    );

    let outcome = fetcher.fetch(&url, Some(&prior), &no_progress).await.unwrap();

    let FetchOutcome::NotModified(metadata) = outcome else {
        panic!("expected not modified");
    };
    assert_eq!(metadata.content_type(), "image/png");
    assert_eq!(metadata.etag(), Some("\"v1\""));
    assert_eq!(metadata.last_modified(), last_modified);
    assert!(!metadata.is_expired(Utc::now()));
}
