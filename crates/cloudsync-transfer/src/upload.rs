//! Concurrent multipart upload
//!
//! A single producer reads the source into pooled part buffers and hands each
//! full buffer to its own worker. Taking a buffer from the pool is what limits
//! concurrency, so at most `concurrency` parts are read ahead or in flight.
//!
//! Workers hash their part, upload it through the pacer and record the result
//! on the [`ActiveUpload`]. Parts after the first batch retry any error up
//! to the pacer's attempt ceiling, since a restart would resend everything.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use cloudsync_core::config::TransferConfig;
use cloudsync_core::domain::{CompletedPart, ObjectMetadata, ObjectRef, ProviderQuirks};
use cloudsync_core::ports::ObjectStore;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, instrument};

use crate::error::TransferError;
use crate::hasher::{md5_digest, PartDigests};
use crate::multipart::ActiveUpload;
use crate::pacer::{Pacer, RetryPolicy};
use crate::planner::{plan_parts, PartPlan};
use crate::pool::{BufferPool, PooledBuffer};
use crate::tasks::PartTasks;

/// Settings for one multipart transfer, after quirks are applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOptions {
    /// Requested part size before planning
    pub chunk_size: u64,
    /// Parts uploaded or copied at the same time
    pub concurrency: usize,
    /// Part-count ceiling
    pub max_upload_parts: u32,
    /// Smallest part the provider accepts, except the last
    pub min_chunk_size: u64,
    /// Keep uploaded parts when the transfer fails
    pub leave_parts_on_error: bool,
    /// Skip sending Content-MD5 and verifying the final ETag
    pub disable_checksum: bool,
}

impl UploadOptions {
    /// Combine transfer settings with the provider's limits
    pub fn new(transfer: &TransferConfig, quirks: &ProviderQuirks) -> Self {
        Self {
            chunk_size: transfer.chunk_size.max(quirks.chunk_size_floor),
            concurrency: transfer.upload_concurrency.max(1),
            max_upload_parts: transfer
                .max_upload_parts
                .min(quirks.max_upload_parts)
                .max(1),
            min_chunk_size: quirks.min_chunk_size,
            leave_parts_on_error: transfer.leave_parts_on_error,
            disable_checksum: transfer.disable_checksum,
        }
    }

    /// Retry policy for a part
    pub fn policy_for_part(&self, part_number: u32) -> RetryPolicy {
        if usize::try_from(part_number).map_or(false, |n| n <= self.concurrency) {
            RetryPolicy::Classified
        } else {
            RetryPolicy::RetryAny
        }
    }
}

/// Result of a finished multipart upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    /// Provider upload id
    pub upload_id: String,
    /// Locally computed checksum; a bare MD5 for a single part
    pub checksum: String,
    /// ETag the provider should report, `<hex>-<parts>`
    pub expected_etag: String,
    /// ETag returned by "complete multipart upload"
    pub etag: String,
    /// Parts as submitted to "complete"
    pub parts: Vec<CompletedPart>,
    /// Bytes read from the source
    pub size: u64,
    /// Part size used
    pub part_size: u64,
}

/// Uploads a stream as a multipart object
pub struct MultipartUploader {
    store: Arc<dyn ObjectStore>,
    pacer: Pacer,
    options: UploadOptions,
}

impl MultipartUploader {
    pub fn new(store: Arc<dyn ObjectStore>, pacer: Pacer, options: UploadOptions) -> Self {
        Self {
            store,
            pacer,
            options,
        }
    }

    pub fn options(&self) -> &UploadOptions {
        &self.options
    }

    /// Upload `reader` to `target`
    ///
    /// # Arguments
    /// * `reader` - Source stream, read to its end
    /// * `size` - Object size when known; `None` for streams
    /// * `target` - Destination object
    /// * `metadata` - Metadata sent with "initiate"
    ///
    /// # Errors
    /// Returns the first part failure, a read failure, or
    /// [`TransferError::TooLarge`] when a stream outgrows the part ceiling.
    /// The remote upload is aborted unless `leave_parts_on_error` is set.
    #[instrument(level = "info", skip(self, reader, target, metadata), fields(target = %target))]
    pub async fn upload<R>(
        &self,
        reader: R,
        size: Option<u64>,
        target: &ObjectRef,
        metadata: &ObjectMetadata,
    ) -> Result<UploadOutcome, TransferError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let plan = plan_parts(
            size,
            self.options.chunk_size,
            self.options.max_upload_parts,
            self.options.min_chunk_size,
        );
        let buf_len = usize::try_from(plan.part_size).map_err(|_| {
            TransferError::InvalidConfig(format!("part size {} does not fit in memory", plan.part_size))
        })?;
        debug!(
            part_size = plan.part_size,
            part_count = ?plan.part_count,
            "Planned multipart upload"
        );

        let upload =
            ActiveUpload::initiate(Arc::clone(&self.store), self.pacer.clone(), target, metadata)
                .await?;

        let digests = Arc::new(PartDigests::new());
        let sent = self
            .send_parts(reader, &plan, buf_len, &upload, &digests)
            .await;

        let size = sent.as_ref().map_or(0, |size| *size);
        let (etag, parts) = upload
            .finish(sent.map(|_| ()), self.options.leave_parts_on_error)
            .await?;

        Ok(UploadOutcome {
            upload_id: upload.upload_id().to_string(),
            checksum: digests.checksum(plan.part_size),
            expected_etag: digests.multipart_etag(),
            etag,
            parts,
            size,
            part_size: plan.part_size,
        })
    }

    /// Read and dispatch every part, then wait for the workers
    async fn send_parts<R>(
        &self,
        reader: R,
        plan: &PartPlan,
        buf_len: usize,
        upload: &Arc<ActiveUpload>,
        digests: &Arc<PartDigests>,
    ) -> Result<u64, TransferError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let pool = BufferPool::new(self.options.concurrency, buf_len);
        let mut tasks = PartTasks::new();

        let produced = self
            .produce(reader, plan, &pool, &mut tasks, upload, digests)
            .await;
        if produced.is_err() {
            tasks.cancel();
        }
        pool.close();
        let finished = tasks.finish().await;

        match produced {
            Ok(size) => finished.map(|_| size),
            Err(err) if !err.is_cancelled() => Err(err),
            Err(err) => finished.and(Err(err)),
        }
    }

    async fn produce<R>(
        &self,
        mut reader: R,
        plan: &PartPlan,
        pool: &Arc<BufferPool>,
        tasks: &mut PartTasks,
        upload: &Arc<ActiveUpload>,
        digests: &Arc<PartDigests>,
    ) -> Result<u64, TransferError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut part_number: u32 = 0;
        let mut total: u64 = 0;

        loop {
            let mut buf = tasks.until_cancelled(pool.acquire()).await??;
            let n = tasks
                .until_cancelled(read_full(&mut reader, buf.space_mut()))
                .await??;
            buf.set_filled(n);

            // End of stream; an empty object still goes up as one part
            if n == 0 && part_number > 0 {
                break;
            }
            if part_number >= self.options.max_upload_parts {
                return Err(TransferError::TooLarge {
                    max_size: plan.max_size,
                    max_parts: self.options.max_upload_parts,
                    part_size: plan.part_size,
                });
            }

            part_number += 1;
            total += n as u64;
            let short = n < buf.capacity();
            tasks.spawn(upload_part(
                Arc::clone(upload),
                Arc::clone(digests),
                part_number,
                buf,
                self.options.policy_for_part(part_number),
                self.options.disable_checksum,
            ));

            if short {
                break;
            }
        }

        debug!(parts = part_number, bytes = total, "Source fully read");
        Ok(total)
    }
}

/// Upload one buffered part
async fn upload_part(
    upload: Arc<ActiveUpload>,
    digests: Arc<PartDigests>,
    part_number: u32,
    buf: PooledBuffer,
    policy: RetryPolicy,
    disable_checksum: bool,
) -> Result<CompletedPart, TransferError> {
    let body = buf.filled();
    let digest = md5_digest(body);
    digests.record(part_number, digest);
    let content_md5 = (!disable_checksum).then(|| BASE64.encode(digest));

    let store = &**upload.store();
    let target = upload.target();
    let upload_id = upload.upload_id();
    let md5 = content_md5.as_deref();

    let etag = upload
        .pacer()
        .call_with(policy, Some((store, target.bucket())), move || {
            store.upload_part(target, upload_id, part_number, body, md5)
        })
        .await
        .map_err(|source| TransferError::UploadPart {
            part_number,
            source,
        })?;

    debug!(part_number, bytes = body.len(), "Part uploaded");
    let part = CompletedPart { part_number, etag };
    upload.record_part(part.clone())?;
    Ok(part)
}

/// Fill `buf` from `reader`, stopping early only at end of stream
pub async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
