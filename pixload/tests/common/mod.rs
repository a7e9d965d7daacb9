//! Shared fixtures for the loader integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{CACHE_CONTROL, CONTENT_TYPE, IF_MODIFIED_SINCE, IF_NONE_MATCH};
use http::{HeaderMap, HeaderValue, StatusCode};
use parking_lot::Mutex;
use pixload::{
    Bitmap, ByteSource, CodecError, Image, ImageCodec, ImageFormat, ImageListener, LoadError, Tag,
    Transformation,
};
use pixload_http::{Connector, FetchRequest, FetchResponse, NetworkError};
use tokio::sync::{Semaphore, mpsc};

/// Decoded test image: the raw bytes that were fetched.
#[derive(Debug)]
pub struct TestImage(pub Bytes);

impl Bitmap for TestImage {
    fn byte_size(&self) -> usize {
        self.0.len()
    }
}

/// Returns the bytes held by a [`TestImage`].
pub fn bytes_of(image: &Image) -> Bytes {
    pixload_core::image::downcast::<TestImage>(image)
        .map(|image| image.0.clone())
        .expect("not a test image")
}

/// Codec that treats bytes as pixels. `b"corrupt"` fails to decode.
#[derive(Debug, Default)]
pub struct TestCodec;

impl ImageCodec for TestCodec {
    fn decode(&self, data: &[u8]) -> Result<Image, CodecError> {
        if data == b"corrupt" {
            return Err(CodecError::UnsupportedFormat("corrupt".to_owned()));
        }
        Ok(Arc::new(TestImage(Bytes::copy_from_slice(data))))
    }

    fn encode(
        &self,
        image: &Image,
        _format: ImageFormat,
        _quality: u8,
    ) -> Result<Vec<u8>, CodecError> {
        Ok(bytes_of(image).to_vec())
    }
}

/// Uppercases the image bytes, counting how often it ran.
#[derive(Debug, Default)]
pub struct Upper {
    pub calls: AtomicUsize,
}

impl Transformation for Upper {
    fn identifier(&self) -> &str {
        "upper"
    }

    fn transform_image(&self, image: &Image) -> Option<Image> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Some(Arc::new(TestImage(Bytes::from(bytes_of(image).to_ascii_uppercase()))))
    }
}

/// Reverses the image bytes.
#[derive(Debug, Default)]
pub struct Reverse;

impl Transformation for Reverse {
    fn identifier(&self) -> &str {
        "reverse"
    }

    fn transform_image(&self, image: &Image) -> Option<Image> {
        let mut data = bytes_of(image).to_vec();
        data.reverse();
        Some(Arc::new(TestImage(Bytes::from(data))))
    }
}

/// Keeps the first two bytes. Works on the encoded data when it gets the
/// chance and counts which entry point ran.
#[derive(Debug, Default)]
pub struct Thumbnail {
    pub source_calls: AtomicUsize,
    pub image_calls: AtomicUsize,
}

impl Thumbnail {
    fn shrink(data: &[u8]) -> Image {
        Arc::new(TestImage(Bytes::copy_from_slice(&data[..data.len().min(2)])))
    }
}

impl Transformation for Thumbnail {
    fn identifier(&self) -> &str {
        "thumbnail"
    }

    fn transform_source(
        &self,
        source: &ByteSource,
        _codec: &dyn ImageCodec,
    ) -> Result<Option<Image>, CodecError> {
        self.source_calls.fetch_add(1, Ordering::SeqCst);
        let data = source.read_all()?;
        Ok(Some(Self::shrink(&data)))
    }

    fn transform_image(&self, image: &Image) -> Option<Image> {
        self.image_calls.fetch_add(1, Ordering::SeqCst);
        Some(Self::shrink(&bytes_of(image)))
    }
}

/// Transformation that never produces an image.
#[derive(Debug, Default)]
pub struct Nothing;

impl Transformation for Nothing {
    fn identifier(&self) -> &str {
        "nothing"
    }

    fn transform_image(&self, _image: &Image) -> Option<Image> {
        None
    }
}

/// Canned answer for one URL path.
#[derive(Debug, Clone)]
pub struct Route {
    pub status: StatusCode,
    pub body: Bytes,
    pub cache_control: &'static str,
    /// Answer conditional requests with 304.
    pub not_modified: bool,
}

impl Route {
    pub fn ok(body: &'static [u8]) -> Self {
        Self {
            status: StatusCode::OK,
            body: Bytes::from_static(body),
            cache_control: "max-age=600",
            not_modified: false,
        }
    }

    pub fn status(status: StatusCode) -> Self {
        Self {
            status,
            body: Bytes::new(),
            cache_control: "no-cache",
            not_modified: false,
        }
    }

    pub fn not_modified(mut self) -> Self {
        self.not_modified = true;
        self
    }
}

/// Connector for the `mock` scheme. Transfers wait on a gate that tests
/// open with [`MockConnector::release`].
#[derive(Debug)]
pub struct MockConnector {
    routes: Mutex<HashMap<String, Route>>,
    gate: Semaphore,
    pub started: AtomicUsize,
    pub finished: AtomicUsize,
    pub conditional: AtomicUsize,
}

impl MockConnector {
    /// Transfers complete right away.
    pub fn open() -> Arc<Self> {
        Self::with_gate(Semaphore::MAX_PERMITS)
    }

    /// Transfers block until released.
    pub fn gated() -> Arc<Self> {
        Self::with_gate(0)
    }

    fn with_gate(permits: usize) -> Arc<Self> {
        Arc::new(Self {
            routes: Mutex::new(HashMap::new()),
            gate: Semaphore::new(permits),
            started: AtomicUsize::new(0),
            finished: AtomicUsize::new(0),
            conditional: AtomicUsize::new(0),
        })
    }

    pub fn route(&self, path: &str, route: Route) {
        self.routes.lock().insert(path.to_owned(), route);
    }

    pub fn release(&self, transfers: usize) {
        self.gate.add_permits(transfers);
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }

    pub fn conditional(&self) -> usize {
        self.conditional.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, NetworkError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let is_conditional = request.headers.contains_key(IF_NONE_MATCH)
            || request.headers.contains_key(IF_MODIFIED_SINCE);
        if is_conditional {
            self.conditional.fetch_add(1, Ordering::SeqCst);
        }

        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| NetworkError::Io(std::io::Error::other("gate closed")))?;

        let route = self
            .routes
            .lock()
            .get(request.url.path())
            .cloned()
            .unwrap_or_else(|| Route::status(StatusCode::NOT_FOUND));

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("image/png"));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static(route.cache_control));
        self.finished.fetch_add(1, Ordering::SeqCst);

        if is_conditional && route.not_modified {
            return Ok(FetchResponse::buffered(StatusCode::NOT_MODIFIED, headers, Bytes::new()));
        }
        Ok(FetchResponse::buffered(route.status, headers, route.body))
    }
}

/// What a [`Recorder`] saw.
#[derive(Debug)]
pub enum Event {
    Success(Option<Tag>, Bytes),
    Error(Option<Tag>, LoadError),
}

/// Listener forwarding every outcome to a channel.
pub struct Recorder {
    sender: mpsc::UnboundedSender<Event>,
}

impl Recorder {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Event>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Arc::new(Self { sender }), receiver)
    }
}

impl ImageListener for Recorder {
    fn on_success(&self, tag: Option<Tag>, image: Image) {
        let _ = self.sender.send(Event::Success(tag, bytes_of(&image)));
    }

    fn on_error(&self, tag: Option<Tag>, error: LoadError) {
        let _ = self.sender.send(Event::Error(tag, error));
    }
}

/// Receives the next event, failing the test after five seconds.
pub async fn next_event(receiver: &mut mpsc::UnboundedReceiver<Event>) -> Event {
    tokio::time::timeout(Duration::from_secs(5), receiver.recv())
        .await
        .expect("timed out waiting for a callback")
        .expect("listener dropped")
}

/// Polls `condition` until it holds, failing the test after five seconds.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "condition never held");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
