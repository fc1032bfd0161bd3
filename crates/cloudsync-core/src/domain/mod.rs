//! Domain entities and value types
//!
//! This module contains the core domain types for the transfer engine:
//! - Object references, byte ranges and part descriptors
//! - Object metadata carried through puts and copies
//! - The multipart session state machine
//! - Provider quirk flags and their resolver
//! - Domain and remote-store error types

pub mod errors;
pub mod object;
pub mod quirks;
pub mod session;

// Re-export commonly used types
pub use errors::{DomainError, ErrorClass, StoreError};
pub use object::{
    ByteRange, CompletedPart, CreateBucketOutcome, InitiatedUpload, MetadataDirective,
    ObjectInfo, ObjectMetadata, ObjectRef, PendingUpload, META_MD5, META_MTIME,
};
pub use quirks::{
    ListVersion, ProviderQuirks, QuirkOverrides, MAX_UPLOAD_PARTS, MIN_CHUNK_SIZE,
};
pub use session::{MultipartSession, SessionState};
