//! Backend facade
//!
//! [`Backend`] is the entry point used by callers: it decides between
//! single-request and multipart transfers, makes sure destination buckets
//! exist, and verifies multipart integrity.

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use cloudsync_core::config::{Config, RemoteConfig, TransferConfig};
use cloudsync_core::domain::{
    CreateBucketOutcome, MetadataDirective, ObjectMetadata, ObjectRef, StoreError, META_MD5,
};
use cloudsync_core::ports::ObjectStore;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info, instrument};

use crate::bucket_cache::BucketCache;
use crate::cleanup::{cleanup_stale_uploads, CleanupReport};
use crate::concat::FragmentConcatenator;
use crate::copy::{CopyOutcome, MultipartCopier};
use crate::error::TransferError;
use crate::hasher::{md5_digest, normalize_etag};
use crate::pacer::{Pacer, PacerConfig};
use crate::upload::{MultipartUploader, UploadOptions};

/// Region that takes no `LocationConstraint` on bucket creation
const DEFAULT_REGION: &str = "us-east-1";

/// Result of [`Backend::put`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutSummary {
    /// ETag reported by the provider
    pub etag: String,
    /// Local checksum: hex MD5, or the multipart form `<hex>-<parts>`
    pub checksum: String,
    /// Bytes uploaded
    pub size: u64,
    /// Upload id when the object went up in parts
    pub upload_id: Option<String>,
    pub parts: usize,
}

/// Result of [`Backend::copy`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopySummary {
    pub etag: String,
    pub size: u64,
    /// Upload id when the object was copied in parts
    pub upload_id: Option<String>,
    pub parts: usize,
}

impl From<CopyOutcome> for CopySummary {
    fn from(outcome: CopyOutcome) -> Self {
        Self {
            etag: outcome.etag,
            size: outcome.size,
            upload_id: Some(outcome.upload_id),
            parts: outcome.parts.len(),
        }
    }
}

/// Transfers objects to and within one S3-compatible store
pub struct Backend {
    store: Arc<dyn ObjectStore>,
    pacer: Pacer,
    buckets: Arc<BucketCache>,
    remote: RemoteConfig,
    transfer: TransferConfig,
    options: UploadOptions,
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("provider", &self.store.quirks().provider)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Backend {
    /// Create a backend over `store`
    ///
    /// # Errors
    /// Returns [`TransferError::InvalidConfig`] listing every validation error.
    pub fn new(store: Arc<dyn ObjectStore>, config: &Config) -> Result<Self, TransferError> {
        let errors = config.validate();
        if !errors.is_empty() {
            let joined = errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(TransferError::InvalidConfig(joined));
        }

        let options = UploadOptions::new(&config.transfer, store.quirks());
        Ok(Self {
            pacer: Pacer::new(PacerConfig::from(&config.retry)),
            buckets: Arc::new(BucketCache::new()),
            remote: config.remote.clone(),
            transfer: config.transfer.clone(),
            options,
            store,
        })
    }

    /// Share a bucket cache with other backends on the same account
    pub fn with_bucket_cache(mut self, buckets: Arc<BucketCache>) -> Self {
        self.buckets = buckets;
        self
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    pub fn pacer(&self) -> &Pacer {
        &self.pacer
    }

    pub fn bucket_cache(&self) -> &Arc<BucketCache> {
        &self.buckets
    }

    pub fn upload_options(&self) -> &UploadOptions {
        &self.options
    }

    /// `LocationConstraint` sent when creating a bucket
    pub fn location_constraint(&self) -> Option<String> {
        match &self.remote.location_constraint {
            Some(constraint) => Some(constraint.clone()),
            None if !self.remote.region.is_empty() && self.remote.region != DEFAULT_REGION => {
                Some(self.remote.region.clone())
            }
            None => None,
        }
    }

    /// Make sure `bucket` exists, creating it if needed
    ///
    /// Concurrent callers for the same bucket share one creation attempt.
    pub async fn ensure_bucket(&self, bucket: &str) -> Result<(), TransferError> {
        if self.remote.no_check_bucket {
            return Ok(());
        }

        let store = &*self.store;
        let pacer = &self.pacer;
        let acl = self.remote.bucket_acl.as_deref();
        let constraint = self.location_constraint();
        let constraint = constraint.as_deref();
        let use_already_exists = store.quirks().use_already_exists;

        let create = move || async move {
            let created = pacer
                .call(move || store.create_bucket(bucket, acl, constraint))
                .await;
            match created {
                Ok(CreateBucketOutcome::Created) => {
                    info!(bucket, "Bucket created");
                    Ok(())
                }
                Ok(CreateBucketOutcome::AlreadyOwned) => {
                    debug!(bucket, "Bucket already owned");
                    Ok(())
                }
                Err(err) if is_name_taken(&err) && !use_already_exists => {
                    debug!(bucket, code = ?err.code(), "Treating existing bucket as usable");
                    Ok(())
                }
                Err(err) => Err(err),
            }
        };
        let exists = move || async move {
            pacer
                .call_for_bucket(store, bucket, move || store.head_bucket(bucket))
                .await
        };

        self.buckets
            .ensure_exists(bucket, create, exists)
            .await
            .map_err(|source| TransferError::Bucket {
                bucket: bucket.to_string(),
                source,
            })
    }

    /// True when an object of `size` bytes should go up in one request
    pub fn is_single_put(&self, size: Option<u64>) -> bool {
        if !self.store.quirks().use_multipart_uploads {
            return true;
        }
        matches!(size, Some(size) if size < self.transfer.upload_cutoff)
    }

    /// Upload `reader` to `target`
    ///
    /// # Arguments
    /// * `reader` - Object content
    /// * `size` - Content length when known; `None` streams in parts
    /// * `target` - Destination object
    /// * `metadata` - Content type and user metadata. A caller-supplied
    ///   whole-object MD5 ([`ObjectMetadata::with_md5`]) is kept only for
    ///   multipart uploads of known size with checksums enabled.
    ///
    /// # Errors
    /// Returns [`TransferError::Corrupted`] when the provider's multipart
    /// ETag does not match the local checksum.
    #[instrument(level = "info", skip(self, reader, target, metadata), fields(target = %target))]
    pub async fn put<R>(
        &self,
        reader: R,
        size: Option<u64>,
        target: &ObjectRef,
        mut metadata: ObjectMetadata,
    ) -> Result<PutSummary, TransferError>
    where
        R: AsyncRead + Unpin + Send,
    {
        self.ensure_bucket(target.bucket()).await?;

        if self.is_single_put(size) {
            metadata.user.remove(META_MD5);
            return self.put_single(reader, size, target, &metadata).await;
        }

        if size.is_none() || self.transfer.disable_checksum {
            metadata.user.remove(META_MD5);
        }

        let uploader = MultipartUploader::new(
            Arc::clone(&self.store),
            self.pacer.clone(),
            self.options.clone(),
        );
        let outcome = uploader.upload(reader, size, target, &metadata).await?;

        if self.store.quirks().use_multipart_etag && !self.transfer.disable_checksum {
            let got = normalize_etag(&outcome.etag);
            if got != outcome.expected_etag {
                return Err(TransferError::Corrupted {
                    want: outcome.expected_etag,
                    got,
                });
            }
        }

        Ok(PutSummary {
            etag: outcome.etag,
            checksum: outcome.checksum,
            size: outcome.size,
            upload_id: Some(outcome.upload_id),
            parts: outcome.parts.len(),
        })
    }

    async fn put_single<R>(
        &self,
        mut reader: R,
        size: Option<u64>,
        target: &ObjectRef,
        metadata: &ObjectMetadata,
    ) -> Result<PutSummary, TransferError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let capacity = size.and_then(|s| usize::try_from(s).ok()).unwrap_or(0);
        let mut body = Vec::with_capacity(capacity);
        reader.read_to_end(&mut body).await?;

        let digest = md5_digest(&body);
        let content_md5 = (!self.transfer.disable_checksum).then(|| BASE64.encode(digest));

        let store = &*self.store;
        let body_ref = body.as_slice();
        let md5 = content_md5.as_deref();
        let etag = self
            .pacer
            .call_for_bucket(store, target.bucket(), move || {
                store.put_object(target, body_ref, md5, metadata)
            })
            .await?;

        debug!(bytes = body.len(), "Object uploaded in one request");
        Ok(PutSummary {
            etag,
            checksum: hex::encode(digest),
            size: body.len() as u64,
            upload_id: None,
            parts: 1,
        })
    }

    /// Server-side copy of `source` to `target`
    ///
    /// The source's metadata is kept unless `replace` is given. Sources at
    /// or above the copy cutoff are copied in ranged parts when the provider
    /// supports it.
    #[instrument(level = "info", skip(self, source, target, replace), fields(source = %source, target = %target))]
    pub async fn copy(
        &self,
        source: &ObjectRef,
        target: &ObjectRef,
        replace: Option<ObjectMetadata>,
    ) -> Result<CopySummary, TransferError> {
        self.ensure_bucket(target.bucket()).await?;

        let copier = MultipartCopier::new(
            Arc::clone(&self.store),
            self.pacer.clone(),
            self.options.clone(),
            self.transfer.copy_cutoff,
        );
        let info = copier.head(source).await?;

        let multipart = self.store.quirks().use_multipart_copy
            && info.size >= self.transfer.copy_cutoff;
        if multipart {
            let outcome = copier
                .copy(source, target, replace.as_ref(), Some(info))
                .await?;
            return Ok(outcome.into());
        }

        let (directive, metadata) = match replace {
            Some(metadata) => (MetadataDirective::Replace, metadata),
            None => (MetadataDirective::Copy, ObjectMetadata::default()),
        };
        let store = &*self.store;
        let metadata_ref = &metadata;
        let etag = self
            .pacer
            .call_for_bucket(store, target.bucket(), move || {
                store.copy_object(source, target, directive, metadata_ref)
            })
            .await?;

        debug!(size = info.size, directive = directive.as_str(), "Object copied in one request");
        Ok(CopySummary {
            etag,
            size: info.size,
            upload_id: None,
            parts: 1,
        })
    }

    /// Join `fragments`, in order, into `target`
    ///
    /// # Errors
    /// Returns [`TransferError::ConcatTooSmall`] when the fragments together
    /// are smaller than the provider's minimum part size.
    pub async fn concat(
        &self,
        fragments: &[ObjectRef],
        target: &ObjectRef,
        metadata: &ObjectMetadata,
    ) -> Result<CopySummary, TransferError> {
        self.ensure_bucket(target.bucket()).await?;
        let concatenator = FragmentConcatenator::new(
            Arc::clone(&self.store),
            self.pacer.clone(),
            self.options.clone(),
            self.transfer.copy_cutoff,
        );
        let outcome = concatenator.concat(fragments, target, metadata).await?;
        Ok(outcome.into())
    }

    /// Abort multipart uploads in `bucket` older than `max_age`
    pub async fn cleanup(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        max_age: Duration,
    ) -> Result<CleanupReport, TransferError> {
        cleanup_stale_uploads(&self.store, &self.pacer, bucket, prefix, max_age).await
    }
}

/// The bucket name is taken, possibly by someone else
fn is_name_taken(err: &StoreError) -> bool {
    matches!(
        err.code(),
        Some("BucketAlreadyExists") | Some("BucketNameUnavailable")
    )
}
