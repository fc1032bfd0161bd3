//! CloudSync Transfer - Chunked transfer engine for S3-compatible stores
//!
//! Provides:
//! - Part planning within the provider's part-count ceiling
//! - Multipart integrity hashing matching the provider's ETag scheme
//! - A retry pacer with error classification and region redirect recovery
//! - Single-flight bucket creation
//! - Concurrent multipart upload, server-side copy and fragment concatenation
//! - Cleanup of stale multipart uploads
//!
//! ## Modules
//!
//! - [`backend`] - The [`Backend`] facade used by callers
//! - [`upload`] - Streaming multipart upload
//! - [`copy`] - Ranged server-side copy
//! - [`concat`] - Joining fragments into one object
//! - [`pacer`] - Retry and backoff around every remote call
//! - [`bucket_cache`] - Bucket existence cache

pub mod backend;
pub mod bucket_cache;
pub mod cleanup;
pub mod concat;
pub mod copy;
pub mod error;
pub mod hasher;
pub mod logging;
pub mod multipart;
pub mod pacer;
pub mod planner;
pub mod pool;
pub mod tasks;
pub mod upload;

pub use backend::{Backend, CopySummary, PutSummary};
pub use bucket_cache::BucketCache;
pub use cleanup::CleanupReport;
pub use error::TransferError;
pub use hasher::MultipartHasher;
pub use pacer::{Pacer, PacerConfig, RetryPolicy};
pub use planner::{plan_parts, PartPlan};
