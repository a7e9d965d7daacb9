//! Freshness metadata carried alongside cached image data.
//!
//! [`Metadata`] is produced by the network stage from response headers (or
//! from policy defaults) and persisted next to the image bytes in the disk
//! cache. It is never inferred at read time.
//!
//! ## Wire format
//!
//! A fixed field sequence, big-endian:
//!
//! | field          | encoding                                   |
//! |----------------|--------------------------------------------|
//! | content type   | `u16` byte length + UTF-8                  |
//! | last modified  | `i64` milliseconds since epoch, `0` unknown |
//! | expires        | `i64` milliseconds since epoch, `-1` never  |
//! | etag           | `u16` byte length + UTF-8                  |
//!
//! Empty strings are written as zero-length fields, so every value has an
//! encoding.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};
use smol_str::SmolStr;
use thiserror::Error;

const UNKNOWN_LAST_MODIFIED: i64 = 0;
const NEVER_EXPIRES: i64 = -1;

/// Errors produced while reading or writing the metadata wire format.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MetadataError {
    /// The input ended before all fields were read.
    #[error("metadata truncated while reading {0}")]
    Truncated(&'static str),

    /// A string field is not valid UTF-8.
    #[error("metadata field {0} is not valid UTF-8")]
    InvalidUtf8(&'static str),

    /// A string field does not fit into a `u16` length prefix.
    #[error("metadata field {field} is {len} bytes, the limit is 65535")]
    FieldTooLong {
        /// Name of the offending field.
        field: &'static str,
        /// Actual byte length.
        len: usize,
    },

    /// A timestamp is outside the range representable by `chrono`.
    #[error("metadata timestamp {0} is out of range")]
    TimestampOutOfRange(i64),
}

/// Point in time after which a cached entry is stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Expiry {
    /// The entry never becomes stale.
    Never,
    /// The entry becomes stale after this instant.
    At(DateTime<Utc>),
}

impl Expiry {
    /// Returns `true` if `now` is past the expiry instant.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self {
            Expiry::Never => false,
            Expiry::At(at) => now > *at,
        }
    }
}

/// Content type, validators and expiry of a cached resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    content_type: SmolStr,
    last_modified: Option<DateTime<Utc>>,
    expires: Expiry,
    etag: SmolStr,
}

impl Metadata {
    /// Creates metadata from its parts.
    ///
    /// Empty strings mean "unknown".
    pub fn new(
        content_type: impl Into<SmolStr>,
        last_modified: Option<DateTime<Utc>>,
        expires: Expiry,
        etag: impl Into<SmolStr>,
    ) -> Self {
        Self {
            content_type: content_type.into(),
            last_modified,
            expires,
            etag: etag.into(),
        }
    }

    /// Returns the content type, empty when unknown.
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// Returns the last-modified timestamp, if known.
    pub fn last_modified(&self) -> Option<DateTime<Utc>> {
        self.last_modified
    }

    /// Returns the expiry.
    pub fn expires(&self) -> Expiry {
        self.expires
    }

    /// Returns the validation token, if any.
    pub fn etag(&self) -> Option<&str> {
        if self.etag.is_empty() {
            None
        } else {
            Some(&self.etag)
        }
    }

    /// Returns `true` if the entry is stale at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires.is_expired(now)
    }

    /// Returns a copy with a different content type.
    pub fn with_content_type(&self, content_type: impl Into<SmolStr>) -> Self {
        Self {
            content_type: content_type.into(),
            ..self.clone()
        }
    }

    /// Returns a copy with a different expiry.
    pub fn with_expires(&self, expires: Expiry) -> Self {
        Self {
            expires,
            ..self.clone()
        }
    }

    /// Writes the wire representation into `buf`.
    pub fn write_to<B: BufMut>(&self, buf: &mut B) -> Result<(), MetadataError> {
        put_str(buf, "content_type", &self.content_type)?;
        buf.put_i64(
            self.last_modified
                .map_or(UNKNOWN_LAST_MODIFIED, |t| t.timestamp_millis()),
        );
        buf.put_i64(match self.expires {
            Expiry::Never => NEVER_EXPIRES,
            Expiry::At(at) => at.timestamp_millis(),
        });
        put_str(buf, "etag", &self.etag)?;
        Ok(())
    }

    /// Encodes the metadata into a new buffer.
    pub fn to_bytes(&self) -> Result<Bytes, MetadataError> {
        let capacity = 2 + self.content_type.len() + 16 + 2 + self.etag.len();
        let mut buf = BytesMut::with_capacity(capacity);
        self.write_to(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Reads metadata from its wire representation.
    pub fn read_from<B: Buf>(buf: &mut B) -> Result<Self, MetadataError> {
        let content_type = get_str(buf, "content_type")?;
        let last_modified = match get_i64(buf, "last_modified")? {
            UNKNOWN_LAST_MODIFIED => None,
            millis => Some(timestamp(millis)?),
        };
        let expires = match get_i64(buf, "expires")? {
            NEVER_EXPIRES => Expiry::Never,
            millis => Expiry::At(timestamp(millis)?),
        };
        let etag = get_str(buf, "etag")?;

        Ok(Self {
            content_type,
            last_modified,
            expires,
            etag,
        })
    }

    /// Decodes metadata from a byte slice.
    pub fn from_slice(mut bytes: &[u8]) -> Result<Self, MetadataError> {
        Self::read_from(&mut bytes)
    }
}

fn put_str<B: BufMut>(buf: &mut B, field: &'static str, value: &str) -> Result<(), MetadataError> {
    let len = u16::try_from(value.len()).map_err(|_| MetadataError::FieldTooLong {
        field,
        len: value.len(),
    })?;
    buf.put_u16(len);
    buf.put_slice(value.as_bytes());
    Ok(())
}

fn get_str<B: Buf>(buf: &mut B, field: &'static str) -> Result<SmolStr, MetadataError> {
    if buf.remaining() < 2 {
        return Err(MetadataError::Truncated(field));
    }
    let len = buf.get_u16() as usize;
    if buf.remaining() < len {
        return Err(MetadataError::Truncated(field));
    }
    let raw = buf.copy_to_bytes(len);
    std::str::from_utf8(&raw)
        .map(SmolStr::new)
        .map_err(|_| MetadataError::InvalidUtf8(field))
}

fn get_i64<B: Buf>(buf: &mut B, field: &'static str) -> Result<i64, MetadataError> {
    if buf.remaining() < 8 {
        return Err(MetadataError::Truncated(field));
    }
    Ok(buf.get_i64())
}

fn timestamp(millis: i64) -> Result<DateTime<Utc>, MetadataError> {
    DateTime::from_timestamp_millis(millis).ok_or(MetadataError::TimestampOutOfRange(millis))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use pretty_assertions::assert_eq;

    fn at(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).unwrap()
    }

    #[test]
    fn test_wire_round_trip_is_field_identical() {
        let metadata = Metadata::new(
            "image/png",
            Some(at(1_700_000_000_123)),
            Expiry::At(at(1_700_000_060_123)),
            "\"abc-123\"",
        );

        let bytes = metadata.to_bytes().unwrap();
        let decoded = Metadata::from_slice(&bytes).unwrap();

        assert_eq!(decoded, metadata);
        assert_eq!(decoded.etag(), Some("\"abc-123\""));
    }

    #[test]
    fn test_empty_fields_are_encoded() {
        let metadata = Metadata::new("", None, Expiry::Never, "");
        let bytes = metadata.to_bytes().unwrap();

        // two empty strings + two timestamps
        assert_eq!(bytes.len(), 2 + 8 + 8 + 2);
        assert_eq!(&bytes[2..10], &0i64.to_be_bytes());
        assert_eq!(&bytes[10..18], &(-1i64).to_be_bytes());

        let decoded = Metadata::from_slice(&bytes).unwrap();
        assert_eq!(decoded.last_modified(), None);
        assert_eq!(decoded.expires(), Expiry::Never);
        assert_eq!(decoded.etag(), None);
        assert_eq!(decoded.content_type(), "");
    }

    #[test]
    fn test_field_order() {
        let metadata = Metadata::new("a", Some(at(7)), Expiry::At(at(9)), "e");
        let bytes = metadata.to_bytes().unwrap();
        let expected: Vec<u8> = [
            &[0u8, 1, b'a'][..],
            &7i64.to_be_bytes(),
            &9i64.to_be_bytes(),
            &[0u8, 1, b'e'],
        ]
        .concat();
        assert_eq!(bytes.as_ref(), expected.as_slice());
    }

    #[test]
    fn test_truncated_input() {
        let metadata = Metadata::new("image/jpeg", None, Expiry::Never, "tag");
        let bytes = metadata.to_bytes().unwrap();

        let err = Metadata::from_slice(&bytes[..bytes.len() - 1]).unwrap_err();
        assert_eq!(err, MetadataError::Truncated("etag"));

        let err = Metadata::from_slice(&bytes[..5]).unwrap_err();
        assert_eq!(err, MetadataError::Truncated("content_type"));
    }

    #[test]
    fn test_oversized_field_is_rejected() {
        let long = "x".repeat(70_000);
        let metadata = Metadata::new(long.as_str(), None, Expiry::Never, "");
        assert!(matches!(
            metadata.to_bytes(),
            Err(MetadataError::FieldTooLong {
                field: "content_type",
                len: 70_000
            })
        ));
    }

    #[test]
    fn test_expiry() {
        let now = Utc::now();
        assert!(!Expiry::Never.is_expired(now));
        assert!(Expiry::At(now - TimeDelta::seconds(1)).is_expired(now));
        assert!(!Expiry::At(now + TimeDelta::seconds(1)).is_expired(now));
        assert!(!Expiry::At(now).is_expired(now));
    }
}
