//! Transfer error types
//!
//! Every variant that stems from a remote call carries the classified
//! [`StoreError`] unchanged, so the original cause is always visible.

use cloudsync_core::domain::{DomainError, StoreError};
use thiserror::Error;

/// Errors returned by the transfer engine
#[derive(Debug, Error)]
pub enum TransferError {
    /// "Initiate multipart upload" failed
    #[error("failed to create multipart upload for {target}: {source}")]
    Initiate {
        target: String,
        #[source]
        source: StoreError,
    },

    /// A part upload failed definitively
    #[error("multipart upload failed to upload part {part_number}: {source}")]
    UploadPart {
        part_number: u32,
        #[source]
        source: StoreError,
    },

    /// A ranged part copy failed definitively
    #[error("multipart copy failed to copy part {part_number}: {source}")]
    CopyPart {
        part_number: u32,
        #[source]
        source: StoreError,
    },

    /// "Complete multipart upload" failed
    #[error("failed to complete multipart upload {upload_id}: {source}")]
    Complete {
        upload_id: String,
        #[source]
        source: StoreError,
    },

    /// The bucket could not be created or confirmed
    #[error("failed to ensure bucket {bucket} exists: {source}")]
    Bucket {
        bucket: String,
        #[source]
        source: StoreError,
    },

    /// Any other remote call failed
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Reading the source stream failed
    #[error("failed to read source: {0}")]
    Read(#[from] std::io::Error),

    /// The stream is larger than the part size and ceiling allow
    #[error("stream exceeds the maximum multipart size of {max_size} bytes ({max_parts} parts of {part_size} bytes)")]
    TooLarge {
        max_size: u64,
        max_parts: u32,
        part_size: u64,
    },

    /// The final checksum differs from the provider's ETag
    #[error("multipart upload corrupted: ETag differ: expecting {want} but got {got}")]
    Corrupted { want: String, got: String },

    /// Concatenated fragments are smaller than one minimum-sized part
    #[error("concatenated size {total} is smaller than the minimum part size {min_chunk_size}")]
    ConcatTooSmall { total: u64, min_chunk_size: u64 },

    /// More parts would be needed than the provider allows
    #[error("transfer needs {needed} parts but the provider allows at most {max_parts}")]
    TooManyParts { needed: u64, max_parts: u32 },

    /// The transfer was cancelled before it finished
    #[error("transfer cancelled")]
    Cancelled,

    /// A worker task panicked or was aborted
    #[error("part worker failed: {0}")]
    Worker(String),

    /// Invalid object reference or state transition
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Invalid engine configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl TransferError {
    /// The classified remote failure behind this error, if any
    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            TransferError::Initiate { source, .. }
            | TransferError::UploadPart { source, .. }
            | TransferError::CopyPart { source, .. }
            | TransferError::Complete { source, .. }
            | TransferError::Bucket { source, .. } => Some(source),
            TransferError::Store(source) => Some(source),
            _ => None,
        }
    }

    /// Returns true for errors caused by cancellation of a sibling worker
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TransferError::Cancelled)
    }
}
