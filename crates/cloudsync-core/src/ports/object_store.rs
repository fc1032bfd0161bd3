//! Object store port
//!
//! The minimal capability set the transfer engine needs from an S3-compatible
//! provider. Adapters translate each call into the provider's wire protocol
//! and map failures into [`StoreError`] so the engine can classify them.
//!
//! ## Design Notes
//!
//! - Calls are single attempts. Retrying is the caller's job.
//! - Request signing and credentials are the adapter's concern.
//! - Part bodies are borrowed; adapters copy them into the request if the
//!   transport needs ownership.

use async_trait::async_trait;
use bytes::Bytes;

use crate::domain::errors::StoreError;
use crate::domain::object::{
    ByteRange, CompletedPart, CreateBucketOutcome, InitiatedUpload, MetadataDirective,
    ObjectInfo, ObjectMetadata, ObjectRef, PendingUpload,
};
use crate::domain::quirks::ProviderQuirks;

// ============================================================================
// Listing DTOs
// ============================================================================

/// Continuation point for listing pending multipart uploads
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadMarker {
    /// Key to resume after
    pub key_marker: String,
    /// Upload id to resume after, within `key_marker`
    pub upload_id_marker: String,
}

/// One page of pending multipart uploads
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingUploadPage {
    /// Uploads on this page
    pub uploads: Vec<PendingUpload>,
    /// Marker for the next page, `None` when this was the last one
    pub next: Option<UploadMarker>,
}

// ============================================================================
// ObjectStore trait
// ============================================================================

/// Capability set of an S3-compatible object store
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Quirks resolved for this store's provider
    fn quirks(&self) -> &ProviderQuirks;

    // ---- buckets ----

    /// Returns `Ok(false)` when the bucket does not exist
    async fn head_bucket(&self, bucket: &str) -> Result<bool, StoreError>;

    /// Create a bucket
    ///
    /// `BucketAlreadyOwnedByYou` is reported as
    /// [`CreateBucketOutcome::AlreadyOwned`]; every other failure, including
    /// `BucketAlreadyExists`, is an error carrying the provider's code.
    async fn create_bucket(
        &self,
        bucket: &str,
        acl: Option<&str>,
        location_constraint: Option<&str>,
    ) -> Result<CreateBucketOutcome, StoreError>;

    /// Region the bucket lives in
    async fn get_bucket_location(&self, bucket: &str) -> Result<String, StoreError>;

    /// Re-target every later request at `region`
    fn set_region(&self, region: &str) -> Result<(), StoreError>;

    /// Look up the bucket's real region and switch to it
    ///
    /// Invoked once by the retry pacer when a bucket-scoped call is redirected.
    async fn update_region_for_bucket(&self, bucket: &str) -> Result<(), StoreError> {
        let region = self.get_bucket_location(bucket).await?;
        self.set_region(&region)
    }

    // ---- multipart ----

    async fn initiate_multipart_upload(
        &self,
        target: &ObjectRef,
        metadata: &ObjectMetadata,
    ) -> Result<InitiatedUpload, StoreError>;

    /// Upload one part and return its ETag
    async fn upload_part(
        &self,
        target: &ObjectRef,
        upload_id: &str,
        part_number: u32,
        body: &[u8],
        content_md5: Option<&str>,
    ) -> Result<String, StoreError>;

    /// Copy `range` of `source` into one part and return its ETag
    async fn upload_part_copy(
        &self,
        target: &ObjectRef,
        upload_id: &str,
        part_number: u32,
        source: &ObjectRef,
        range: ByteRange,
    ) -> Result<String, StoreError>;

    /// Finalize the upload; `parts` must be sorted by part number
    async fn complete_multipart_upload(
        &self,
        target: &ObjectRef,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<String, StoreError>;

    async fn abort_multipart_upload(
        &self,
        target: &ObjectRef,
        upload_id: &str,
    ) -> Result<(), StoreError>;

    async fn list_multipart_uploads(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        marker: Option<&UploadMarker>,
    ) -> Result<PendingUploadPage, StoreError>;

    // ---- objects ----

    /// Single-request upload; returns the ETag
    async fn put_object(
        &self,
        target: &ObjectRef,
        body: &[u8],
        content_md5: Option<&str>,
        metadata: &ObjectMetadata,
    ) -> Result<String, StoreError>;

    async fn head_object(&self, object: &ObjectRef) -> Result<ObjectInfo, StoreError>;

    /// Single-request server-side copy; returns the new ETag
    async fn copy_object(
        &self,
        source: &ObjectRef,
        target: &ObjectRef,
        directive: MetadataDirective,
        metadata: &ObjectMetadata,
    ) -> Result<String, StoreError>;

    /// Read `range` of an object
    async fn get_object_range(
        &self,
        object: &ObjectRef,
        range: ByteRange,
    ) -> Result<Bytes, StoreError>;

    async fn delete_object(&self, object: &ObjectRef) -> Result<(), StoreError>;
}
