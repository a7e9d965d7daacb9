use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE, IF_MODIFIED_SINCE, LAST_MODIFIED};
use http::{HeaderMap, HeaderValue, StatusCode};
use tracing::trace;

use crate::connector::{Connector, FetchRequest, FetchResponse};
use crate::NetworkError;

/// Serves `file://` URLs from the local filesystem.
///
/// Responses carry `Last-Modified` from the file's modification time and a
/// content type guessed from the extension. A request whose
/// `If-Modified-Since` is not older than the file gets `304 Not Modified`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileConnector;

#[async_trait]
impl Connector for FileConnector {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, NetworkError> {
        let path = request.url.to_file_path().map_err(|()| {
            NetworkError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{} is not a local file path", request.url),
            ))
        })?;

        let meta = tokio::fs::metadata(&path).await?;
        let modified = meta.modified().ok().map(truncate_to_seconds);

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type(&path)));
        if let Some(modified) = modified {
            let value = httpdate::fmt_http_date(modified);
            if let Ok(value) = HeaderValue::from_str(&value) {
                headers.insert(LAST_MODIFIED, value);
            }
        }

        let since = request
            .headers
            .get(IF_MODIFIED_SINCE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| httpdate::parse_http_date(v).ok());
        if let (Some(modified), Some(since)) = (modified, since)
            && modified <= since
        {
            trace!(path = %path.display(), "file not modified");
            return Ok(FetchResponse::buffered(StatusCode::NOT_MODIFIED, headers, Bytes::new()));
        }

        let data = tokio::fs::read(&path).await?;
        headers.insert(CONTENT_LENGTH, HeaderValue::from(data.len()));
        Ok(FetchResponse::buffered(StatusCode::OK, headers, Bytes::from(data)))
    }
}

fn truncate_to_seconds(time: SystemTime) -> SystemTime {
    match time.duration_since(UNIX_EPOCH) {
        Ok(since) => UNIX_EPOCH + Duration::from_secs(since.as_secs()),
        Err(_) => time,
    }
}

fn content_type(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        Some("bmp") => "image/bmp",
        _ => "application/octet-stream",
    }
}
