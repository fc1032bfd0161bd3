//! Object references, byte ranges and part descriptors
//!
//! Value types passed between the transfer engine and the
//! [`ObjectStore`](crate::ports::ObjectStore) port.

use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use super::errors::DomainError;

/// User metadata key holding the modification time as fractional unix seconds
pub const META_MTIME: &str = "mtime";

/// User metadata key holding the base64 MD5 of the whole object
pub const META_MD5: &str = "md5chksum";

// ============================================================================
// ObjectRef
// ============================================================================

/// A bucket/key pair addressing one object in the remote store
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    bucket: String,
    key: String,
}

impl ObjectRef {
    /// Create a validated object reference
    ///
    /// # Errors
    /// Returns [`DomainError::InvalidBucket`] if the bucket is empty or contains
    /// a `/`, and [`DomainError::InvalidKey`] if the key is empty.
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Result<Self, DomainError> {
        let bucket = bucket.into();
        let key = key.into();
        if bucket.is_empty() || bucket.contains('/') {
            return Err(DomainError::InvalidBucket(bucket));
        }
        if key.is_empty() {
            return Err(DomainError::InvalidKey(key));
        }
        Ok(Self { bucket, key })
    }

    /// Bucket name
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Object key within the bucket
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Reference to a sibling object in the same bucket
    pub fn with_key(&self, key: impl Into<String>) -> Result<Self, DomainError> {
        Self::new(self.bucket.clone(), key)
    }
}

impl Display for ObjectRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

// ============================================================================
// ByteRange
// ============================================================================

/// Half-open byte range `[start, end)` within an object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ByteRange {
    start: u64,
    end: u64,
}

impl ByteRange {
    /// Create a range, rejecting `end < start`
    pub fn new(start: u64, end: u64) -> Result<Self, DomainError> {
        if end < start {
            return Err(DomainError::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// Range of `len` bytes starting at `start`
    pub fn with_len(start: u64, len: u64) -> Self {
        Self {
            start,
            end: start.saturating_add(len),
        }
    }

    /// First byte of the range
    pub fn start(&self) -> u64 {
        self.start
    }

    /// One past the last byte of the range
    pub fn end(&self) -> u64 {
        self.end
    }

    /// Number of bytes covered
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    /// Returns true if the range covers no bytes
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// HTTP `Range` / `x-amz-copy-source-range` value with an inclusive end
    ///
    /// Returns `None` for an empty range, which has no HTTP representation.
    pub fn header_value(&self) -> Option<String> {
        if self.is_empty() {
            return None;
        }
        Some(format!("bytes={}-{}", self.start, self.end - 1))
    }
}

impl Display for ByteRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

// ============================================================================
// Parts and uploads
// ============================================================================

/// A part accepted by the provider, as submitted to "complete multipart upload"
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedPart {
    /// 1-based part index
    pub part_number: u32,
    /// ETag returned by the provider for this part
    pub etag: String,
}

/// Result of "initiate multipart upload"
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitiatedUpload {
    /// Opaque provider identifier of the upload
    pub upload_id: String,
    /// When a lifecycle rule will abort the upload, if the provider says
    pub abort_date: Option<DateTime<Utc>>,
}

/// A multipart upload that was started and never completed or aborted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingUpload {
    /// Object key the upload targets
    pub key: String,
    /// Opaque provider identifier of the upload
    pub upload_id: String,
    /// When the upload was initiated
    pub initiated: DateTime<Utc>,
}

/// Outcome of a successful "create bucket" call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateBucketOutcome {
    /// The bucket was created by this call
    Created,
    /// The bucket already existed and is owned by the caller
    AlreadyOwned,
}

/// How a server-side copy treats the source's metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MetadataDirective {
    /// Keep the source's metadata
    #[default]
    Copy,
    /// Replace it with the metadata supplied in the request
    Replace,
}

impl MetadataDirective {
    /// Wire value for `x-amz-metadata-directive`
    pub fn as_str(&self) -> &'static str {
        match self {
            MetadataDirective::Copy => "COPY",
            MetadataDirective::Replace => "REPLACE",
        }
    }
}

// ============================================================================
// Metadata
// ============================================================================

/// Metadata written alongside an object
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    /// MIME type sent as `Content-Type`
    pub content_type: Option<String>,
    /// User metadata sent as `x-amz-meta-*` headers; keys are lowercase
    pub user: BTreeMap<String, String>,
}

impl ObjectMetadata {
    /// Set the content type
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Add a user metadata entry
    pub fn with_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.user.insert(key.into().to_ascii_lowercase(), value.into());
        self
    }

    /// Store a modification time under [`META_MTIME`]
    pub fn with_mtime(self, mtime: DateTime<Utc>) -> Self {
        self.with_entry(META_MTIME, format_unix_seconds(mtime))
    }

    /// Modification time stored under [`META_MTIME`], if present and parseable
    pub fn mtime(&self) -> Option<DateTime<Utc>> {
        self.user.get(META_MTIME).and_then(|s| parse_unix_seconds(s))
    }

    /// Store a base64 whole-object MD5 under [`META_MD5`]
    pub fn with_md5(self, md5_base64: impl Into<String>) -> Self {
        self.with_entry(META_MD5, md5_base64)
    }

    pub fn md5(&self) -> Option<&str> {
        self.user.get(META_MD5).map(String::as_str)
    }
}

/// Metadata returned by a HEAD request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Object size in bytes
    pub size: u64,
    /// ETag as sent by the provider (may be quoted)
    pub etag: Option<String>,
    /// Last-Modified timestamp
    pub last_modified: Option<DateTime<Utc>>,
    /// Content type and user metadata
    pub metadata: ObjectMetadata,
}

/// Format a timestamp as `seconds.nanoseconds` with trailing zeros removed
fn format_unix_seconds(t: DateTime<Utc>) -> String {
    let formatted = format!("{}.{:09}", t.timestamp(), t.timestamp_subsec_nanos());
    formatted
        .trim_end_matches('0')
        .trim_end_matches('.')
        .to_string()
}

fn parse_unix_seconds(s: &str) -> Option<DateTime<Utc>> {
    let (secs, frac) = match s.split_once('.') {
        Some((secs, frac)) => (secs, frac),
        None => (s, ""),
    };
    let secs: i64 = secs.parse().ok()?;
    if frac.len() > 9 || !frac.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let nanos: u32 = if frac.is_empty() {
        0
    } else {
        format!("{frac:0<9}").parse().ok()?
    };
    Utc.timestamp_opt(secs, nanos).single()
}
