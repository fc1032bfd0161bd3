//! Server-side multipart copy
//!
//! Copies one source object into a new multipart upload with ranged
//! "upload part copy" calls, so no object data passes through this process.

use std::sync::Arc;

use cloudsync_core::domain::{
    ByteRange, CompletedPart, DomainError, ObjectInfo, ObjectMetadata, ObjectRef,
};
use cloudsync_core::ports::ObjectStore;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, instrument};

use crate::error::TransferError;
use crate::multipart::ActiveUpload;
use crate::pacer::{Pacer, RetryPolicy};
use crate::planner::{byte_ranges, plan_parts};
use crate::tasks::PartTasks;
use crate::upload::UploadOptions;

/// Result of a finished multipart copy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyOutcome {
    pub upload_id: String,
    /// ETag returned by "complete multipart upload"
    pub etag: String,
    pub parts: Vec<CompletedPart>,
    /// Bytes copied
    pub size: u64,
    pub part_size: u64,
}

/// Copies objects server-side in ranged parts
pub struct MultipartCopier {
    store: Arc<dyn ObjectStore>,
    pacer: Pacer,
    options: UploadOptions,
    copy_cutoff: u64,
}

impl MultipartCopier {
    /// Create a copier; `copy_cutoff` is the requested part size
    pub fn new(
        store: Arc<dyn ObjectStore>,
        pacer: Pacer,
        options: UploadOptions,
        copy_cutoff: u64,
    ) -> Self {
        Self {
            store,
            pacer,
            options,
            copy_cutoff,
        }
    }

    /// HEAD `object` through the pacer
    pub async fn head(&self, object: &ObjectRef) -> Result<ObjectInfo, TransferError> {
        let store = &*self.store;
        let info = self
            .pacer
            .call_for_bucket(store, object.bucket(), move || store.head_object(object))
            .await?;
        Ok(info)
    }

    /// Copy `source` to `target`
    ///
    /// The new object keeps the source's metadata unless `replace` is given.
    /// `source_info` skips the HEAD request when the caller already has it.
    ///
    /// # Errors
    /// Returns the first part failure. The remote upload is aborted unless
    /// `leave_parts_on_error` is set.
    #[instrument(level = "info", skip(self, source, target, replace, source_info), fields(source = %source, target = %target))]
    pub async fn copy(
        &self,
        source: &ObjectRef,
        target: &ObjectRef,
        replace: Option<&ObjectMetadata>,
        source_info: Option<ObjectInfo>,
    ) -> Result<CopyOutcome, TransferError> {
        let info = match source_info {
            Some(info) => info,
            None => self.head(source).await?,
        };
        if info.size == 0 {
            return Err(DomainError::ValidationFailed(format!(
                "cannot copy empty object {source} in parts"
            ))
            .into());
        }
        let metadata = replace.cloned().unwrap_or(info.metadata);

        let plan = plan_parts(
            Some(info.size),
            self.copy_cutoff,
            self.options.max_upload_parts,
            self.options.min_chunk_size,
        );
        let ranges = byte_ranges(info.size, plan.part_size);
        debug!(
            size = info.size,
            part_size = plan.part_size,
            parts = ranges.len(),
            "Planned multipart copy"
        );

        let upload =
            ActiveUpload::initiate(Arc::clone(&self.store), self.pacer.clone(), target, &metadata)
                .await?;

        let copied = self.copy_ranges(&upload, source, &ranges).await;
        let (etag, parts) = upload
            .finish(copied, self.options.leave_parts_on_error)
            .await?;

        Ok(CopyOutcome {
            upload_id: upload.upload_id().to_string(),
            etag,
            parts,
            size: info.size,
            part_size: plan.part_size,
        })
    }

    async fn copy_ranges(
        &self,
        upload: &Arc<ActiveUpload>,
        source: &ObjectRef,
        ranges: &[ByteRange],
    ) -> Result<(), TransferError> {
        let slots = Arc::new(Semaphore::new(self.options.concurrency));
        let source = Arc::new(source.clone());
        let mut tasks = PartTasks::new();

        let mut dispatched = Ok(());
        for (index, range) in ranges.iter().enumerate() {
            let part_number = u32::try_from(index + 1).map_err(|_| TransferError::TooManyParts {
                needed: ranges.len() as u64,
                max_parts: self.options.max_upload_parts,
            })?;
            let permit = match acquire_slot(&tasks, &slots).await {
                Ok(permit) => permit,
                Err(err) => {
                    dispatched = Err(err);
                    break;
                }
            };
            tasks.spawn(copy_part(
                Arc::clone(upload),
                Arc::clone(&source),
                part_number,
                *range,
                self.options.policy_for_part(part_number),
                permit,
            ));
        }

        let finished = tasks.finish().await;
        finished.map(|_| ()).and(dispatched)
    }
}

/// Wait for a free concurrency slot unless the task set is cancelled
pub(crate) async fn acquire_slot(
    tasks: &PartTasks,
    slots: &Arc<Semaphore>,
) -> Result<OwnedSemaphorePermit, TransferError> {
    tasks
        .until_cancelled(Arc::clone(slots).acquire_owned())
        .await?
        .map_err(|_| TransferError::Cancelled)
}

/// Copy one range of `source` into part `part_number`
pub(crate) async fn copy_part(
    upload: Arc<ActiveUpload>,
    source: Arc<ObjectRef>,
    part_number: u32,
    range: ByteRange,
    policy: RetryPolicy,
    _permit: OwnedSemaphorePermit,
) -> Result<CompletedPart, TransferError> {
    let store = &**upload.store();
    let target = upload.target();
    let upload_id = upload.upload_id();
    let source_ref = &*source;

    let etag = upload
        .pacer()
        .call_with(policy, Some((store, target.bucket())), move || {
            store.upload_part_copy(target, upload_id, part_number, source_ref, range)
        })
        .await
        .map_err(|source| TransferError::CopyPart {
            part_number,
            source,
        })?;

    debug!(part_number, range = %range, "Part copied");
    let part = CompletedPart { part_number, etag };
    upload.record_part(part.clone())?;
    Ok(part)
}
