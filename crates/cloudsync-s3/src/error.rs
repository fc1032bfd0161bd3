//! HTTP failure mapping
//!
//! Turns transport errors and non-success responses into [`StoreError`] so the
//! transfer engine can classify them without knowing about HTTP.

use std::time::Duration;

use cloudsync_core::domain::StoreError;
use reqwest::{header::RETRY_AFTER, Response, StatusCode};
use tracing::{debug, warn};

use crate::xml::{self, ErrorXml};

/// Header S3 uses to name the bucket's region on redirects and HEAD 301s
pub const BUCKET_REGION_HEADER: &str = "x-amz-bucket-region";

/// Longest server-requested delay honoured from an HTTP-date `Retry-After`
const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Map a transport failure
pub fn from_reqwest(err: reqwest::Error) -> StoreError {
    if err.is_timeout() {
        StoreError::Timeout(err.to_string())
    } else if err.is_builder() {
        StoreError::InvalidRequest(err.to_string())
    } else if err.is_decode() || err.is_body() {
        StoreError::InvalidResponse(err.to_string())
    } else {
        StoreError::Network(err.to_string())
    }
}

/// Pass a success response through; turn anything else into a [`StoreError`]
///
/// `bucket` names the bucket the request addressed, so a 301 can be reported
/// as a redirect for it. `resource` is used in not-found messages.
pub async fn check_response(
    response: Response,
    bucket: &str,
    resource: &str,
) -> Result<Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let headers = response.headers().clone();
    let retry_after = headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_retry_after);
    let region_header = headers
        .get(BUCKET_REGION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let body = response.text().await.unwrap_or_default();
    let error = xml::embedded_error(&body).unwrap_or_default();
    debug!(
        status = status.as_u16(),
        code = %error.code,
        resource,
        "s3 request failed"
    );

    Err(map_status(
        status,
        error,
        region_header,
        retry_after,
        bucket,
        resource,
    ))
}

/// Classify a failed response from its status and error document
pub fn map_status(
    status: StatusCode,
    error: ErrorXml,
    region_header: Option<String>,
    retry_after: Option<Duration>,
    bucket: &str,
    resource: &str,
) -> StoreError {
    let code = if error.code.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("Unknown")
            .replace(' ', "")
    } else {
        error.code
    };
    let message = if error.message.is_empty() {
        format!("{resource}: HTTP {}", status.as_u16())
    } else {
        error.message
    };

    match status.as_u16() {
        301 => StoreError::Redirect {
            bucket: bucket.to_string(),
            region: region_header.or(error.region).filter(|r| !r.is_empty()),
        },
        404 => StoreError::NotFound(format!("{resource}: {code}")),
        429 => StoreError::Throttled {
            status: 429,
            message,
            retry_after,
        },
        503 if code == "SlowDown" => StoreError::Throttled {
            status: 503,
            message,
            retry_after,
        },
        s @ 500..=599 => StoreError::Server {
            status: s,
            code,
            message,
        },
        400 if code == "RequestTimeout" => StoreError::Timeout(message),
        s => StoreError::Rejected {
            status: s,
            code,
            message,
        },
    }
}

/// Error carried in the body of a `200 OK` response
///
/// S3 treats these as internal failures, so they are reported as server
/// errors and retried.
pub fn from_embedded(error: ErrorXml) -> StoreError {
    StoreError::Server {
        status: 200,
        code: error.code,
        message: error.message,
    }
}

/// Parse a `Retry-After` header value
///
/// Accepts delay-seconds or an HTTP-date. Dates in the past or more than an
/// hour ahead are ignored.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    if let Ok(seconds) = value.trim().parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    if let Ok(date) = chrono::DateTime::parse_from_rfc2822(value.trim()) {
        let target = date.with_timezone(&chrono::Utc);
        let delay = (target - chrono::Utc::now()).to_std().ok()?;
        return (delay <= MAX_RETRY_AFTER).then_some(delay);
    }

    warn!(value, "Could not parse Retry-After header, ignoring it");
    None
}
