//! Domain and remote-store error types
//!
//! [`DomainError`] covers validation failures and invalid state transitions.
//! [`StoreError`] is what every [`ObjectStore`](crate::ports::ObjectStore) call
//! returns on failure; adapters map their transport and protocol failures into
//! it so that retry decisions can be made without knowing the provider.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Bucket name is empty or malformed
    #[error("Invalid bucket name: {0}")]
    InvalidBucket(String),

    /// Object key is empty or malformed
    #[error("Invalid object key: {0}")]
    InvalidKey(String),

    /// Byte range with end before start
    #[error("Invalid byte range: {start}..{end}")]
    InvalidRange {
        /// First byte of the range
        start: u64,
        /// One past the last byte of the range
        end: u64,
    },

    /// Invalid state transition attempt
    #[error("Invalid state transition from {from} to {to}")]
    InvalidState {
        /// The current state
        from: String,
        /// The attempted target state
        to: String,
    },

    /// Generic validation failure
    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}

// ============================================================================
// Error classification
// ============================================================================

/// Retry classification of a remote failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Connection reset, timeout, DNS failure
    TransientNetwork,
    /// HTTP 429, 5xx or a provider "slow down" response
    RateLimited,
    /// The bucket lives in another region than the one requests are signed for
    WrongRegion,
    /// Anything else; never retried
    Permanent,
}

impl ErrorClass {
    /// Returns true if calls failing with this class may be retried with backoff
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorClass::TransientNetwork | ErrorClass::RateLimited)
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorClass::TransientNetwork => write!(f, "transient-network"),
            ErrorClass::RateLimited => write!(f, "rate-limited"),
            ErrorClass::WrongRegion => write!(f, "wrong-region"),
            ErrorClass::Permanent => write!(f, "permanent"),
        }
    }
}

// ============================================================================
// StoreError
// ============================================================================

/// Failure of a single remote object-store call
///
/// The error is `Clone` so one classified failure can be handed to every caller
/// waiting on the same bucket creation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The connection failed before a response was received
    #[error("Network error: {0}")]
    Network(String),

    /// The request or the provider timed out
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// The provider asked us to slow down (HTTP 429 or `SlowDown`)
    #[error("Throttled (HTTP {status}): {message}")]
    Throttled {
        /// HTTP status code
        status: u16,
        /// Provider message
        message: String,
        /// Value of the `Retry-After` header, if any
        retry_after: Option<Duration>,
    },

    /// The provider failed with a 5xx status
    #[error("Server error (HTTP {status}) {code}: {message}")]
    Server {
        /// HTTP status code
        status: u16,
        /// Provider error code, e.g. `InternalError`
        code: String,
        /// Provider message
        message: String,
    },

    /// HTTP 301: the bucket must be addressed in another region
    #[error("Bucket {bucket} has moved permanently (region hint: {region:?})")]
    Redirect {
        /// Bucket the request was addressed to
        bucket: String,
        /// Region advertised by the provider, when present
        region: Option<String>,
    },

    /// HTTP 404 for the addressed resource
    #[error("Not found: {0}")]
    NotFound(String),

    /// The provider rejected the request (4xx other than the above)
    #[error("Request rejected (HTTP {status}) {code}: {message}")]
    Rejected {
        /// HTTP status code
        status: u16,
        /// Provider error code, e.g. `AccessDenied`
        code: String,
        /// Provider message
        message: String,
    },

    /// The provider sent a response we could not interpret
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The request could not be built or the operation is not permitted
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl StoreError {
    /// Classify this error for retry decisions
    pub fn class(&self) -> ErrorClass {
        match self {
            StoreError::Network(_) | StoreError::Timeout(_) => ErrorClass::TransientNetwork,
            StoreError::Throttled { .. } | StoreError::Server { .. } => ErrorClass::RateLimited,
            StoreError::Redirect { .. } => ErrorClass::WrongRegion,
            StoreError::NotFound(_)
            | StoreError::Rejected { .. }
            | StoreError::InvalidResponse(_)
            | StoreError::InvalidRequest(_) => ErrorClass::Permanent,
        }
    }

    /// Provider error code, when the provider sent one
    pub fn code(&self) -> Option<&str> {
        match self {
            StoreError::Server { code, .. } | StoreError::Rejected { code, .. } => {
                Some(code.as_str())
            }
            StoreError::Redirect { .. } => Some("PermanentRedirect"),
            _ => None,
        }
    }

    /// Server-requested delay before the next attempt
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            StoreError::Throttled { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// HTTP status code, when the failure came from a response
    pub fn status(&self) -> Option<u16> {
        match self {
            StoreError::Throttled { status, .. }
            | StoreError::Server { status, .. }
            | StoreError::Rejected { status, .. } => Some(*status),
            StoreError::Redirect { .. } => Some(301),
            StoreError::NotFound(_) => Some(404),
            _ => None,
        }
    }
}
