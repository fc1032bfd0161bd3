//! Fragment concatenation
//!
//! Joins independently written fragments into one object with a multipart
//! upload. Fragments large enough to stand as parts are copied server-side.
//! Undersized fragments are merged with their neighbours into one part,
//! borrowing a leading range of the next fragment when that leaves the rest
//! of it large enough to stand alone.
//!
//! When the layout needs more parts than the ceiling allows, copy ranges are
//! grown first. If that is not enough, adjacent pairs are merged into
//! temporary objects, round after round. Temporary
//! objects are always deleted afterwards, whether or not the join succeeded.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use cloudsync_core::config::MAX_UPLOAD_CUTOFF;
use cloudsync_core::domain::{
    ByteRange, CompletedPart, DomainError, ObjectMetadata, ObjectRef, StoreError,
};
use cloudsync_core::ports::ObjectStore;
use futures_util::future::BoxFuture;
use futures_util::{stream, FutureExt, StreamExt, TryStreamExt};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::copy::{acquire_slot, copy_part, CopyOutcome};
use crate::error::TransferError;
use crate::hasher::md5_digest;
use crate::multipart::ActiveUpload;
use crate::pacer::{Pacer, RetryPolicy};
use crate::planner::plan_parts;
use crate::tasks::PartTasks;
use crate::upload::UploadOptions;

/// A fragment and its size
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub object: ObjectRef,
    pub size: u64,
}

/// One part of the concatenated object
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConcatPart {
    /// A range of one fragment, copied server-side
    Copy { fragment: usize, range: ByteRange },
    /// Ranges of several fragments, downloaded and uploaded as one part
    Merge { segments: Vec<(usize, ByteRange)> },
}

impl ConcatPart {
    /// Bytes in this part
    pub fn len(&self) -> u64 {
        match self {
            ConcatPart::Copy { range, .. } => range.len(),
            ConcatPart::Merge { segments } => segments.iter().map(|(_, r)| r.len()).sum(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Lay out parts for fragments of the given sizes
///
/// Every part but the last is at least `min_chunk_size` bytes. Copied ranges
/// are at most `part_size` bytes, except that a tail shorter than
/// `min_chunk_size` is folded into the range before it. Empty fragments are
/// skipped.
pub fn plan_concat(sizes: &[u64], part_size: u64, min_chunk_size: u64) -> Vec<ConcatPart> {
    let part_size = part_size.max(min_chunk_size).max(1);
    let mut parts = Vec::new();
    let mut pending: Vec<(usize, ByteRange)> = Vec::new();
    let mut pending_len: u64 = 0;

    for (index, &size) in sizes.iter().enumerate() {
        if size == 0 {
            continue;
        }
        let mut offset = 0;

        if !pending.is_empty() {
            let need = min_chunk_size.saturating_sub(pending_len);
            if size >= need && size - need >= min_chunk_size {
                // Borrow just enough of this fragment
                pending.push((index, ByteRange::with_len(0, need)));
                parts.push(ConcatPart::Merge {
                    segments: std::mem::take(&mut pending),
                });
                pending_len = 0;
                offset = need;
            } else {
                pending.push((index, ByteRange::with_len(0, size)));
                pending_len += size;
                if pending_len >= min_chunk_size {
                    parts.push(ConcatPart::Merge {
                        segments: std::mem::take(&mut pending),
                    });
                    pending_len = 0;
                }
                continue;
            }
        }

        let remaining = size - offset;
        if remaining == 0 {
            continue;
        }
        if remaining < min_chunk_size {
            pending.push((index, ByteRange::with_len(offset, remaining)));
            pending_len = remaining;
            continue;
        }

        let mut start = offset;
        while start < size {
            let mut len = part_size.min(size - start);
            let rest = size - start - len;
            if rest > 0 && rest < min_chunk_size {
                len += rest;
            }
            parts.push(ConcatPart::Copy {
                fragment: index,
                range: ByteRange::with_len(start, len),
            });
            start += len;
        }
    }

    match pending.len() {
        0 => {}
        1 => {
            let (fragment, range) = pending[0];
            parts.push(ConcatPart::Copy { fragment, range });
        }
        _ => parts.push(ConcatPart::Merge { segments: pending }),
    }
    parts
}

/// Lay out parts within `max_parts`, growing the copy range size if needed
///
/// Starts at `part_size` and doubles it up to the largest part the protocol
/// accepts. Returns the parts and the range size used, or `None` when even
/// the largest ranges need too many parts.
pub fn fit_concat(
    sizes: &[u64],
    part_size: u64,
    min_chunk_size: u64,
    max_parts: u32,
) -> Option<(Vec<ConcatPart>, u64)> {
    let mut part_size = part_size.max(min_chunk_size).max(1).min(MAX_UPLOAD_CUTOFF);
    loop {
        let parts = plan_concat(sizes, part_size, min_chunk_size);
        if parts.len() <= max_parts as usize {
            return Some((parts, part_size));
        }
        if part_size >= MAX_UPLOAD_CUTOFF {
            return None;
        }
        part_size = part_size.saturating_mul(2).min(MAX_UPLOAD_CUTOFF);
    }
}

/// Joins fragments into one object
pub struct FragmentConcatenator {
    store: Arc<dyn ObjectStore>,
    pacer: Pacer,
    options: UploadOptions,
    copy_cutoff: u64,
}

impl FragmentConcatenator {
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

    /// Concatenate `fragments`, in order, into `target`
    ///
    /// # Errors
    /// Returns [`TransferError::ConcatTooSmall`] when the fragments together
    /// are smaller than one minimum-sized part, and the first part failure
    /// otherwise.
    #[instrument(level = "info", skip(self, fragments, target, metadata), fields(target = %target, fragments = fragments.len()))]
    pub async fn concat(
        &self,
        fragments: &[ObjectRef],
        target: &ObjectRef,
        metadata: &ObjectMetadata,
    ) -> Result<CopyOutcome, TransferError> {
        if fragments.is_empty() {
            return Err(DomainError::ValidationFailed("no fragments to concatenate".to_string()).into());
        }

        let mut sized = Vec::with_capacity(fragments.len());
        for object in fragments {
            let store = &*self.store;
            let info = self
                .pacer
                .call_for_bucket(store, object.bucket(), move || store.head_object(object))
                .await?;
            sized.push(Fragment {
                object: object.clone(),
                size: info.size,
            });
        }

        let mut temps = Vec::new();
        let result = self.join(sized, target, metadata, &mut temps).await;
        self.remove_temps(&temps).await;
        result
    }

    /// Join sized fragments, recording every temporary object created
    fn join<'a>(
        &'a self,
        fragments: Vec<Fragment>,
        target: &'a ObjectRef,
        metadata: &'a ObjectMetadata,
        temps: &'a mut Vec<ObjectRef>,
    ) -> BoxFuture<'a, Result<CopyOutcome, TransferError>> {
        async move {
            let total: u64 = fragments.iter().map(|f| f.size).sum();
            let min_chunk_size = self.options.min_chunk_size;
            if total < min_chunk_size {
                return Err(TransferError::ConcatTooSmall {
                    total,
                    min_chunk_size,
                });
            }

            let max_parts = self.options.max_upload_parts;
            let plan = plan_parts(Some(total), self.copy_cutoff, max_parts, min_chunk_size);
            let mut fragments = fragments;
            let (parts, part_size) = loop {
                if fragments.len() <= max_parts as usize {
                    let sizes: Vec<u64> = fragments.iter().map(|f| f.size).collect();
                    if let Some(fitted) = fit_concat(&sizes, plan.part_size, min_chunk_size, max_parts) {
                        break fitted;
                    }
                }
                if max_parts < 2 || fragments.len() < 2 {
                    let sizes: Vec<u64> = fragments.iter().map(|f| f.size).collect();
                    return Err(TransferError::TooManyParts {
                        needed: plan_concat(&sizes, MAX_UPLOAD_CUTOFF, min_chunk_size).len() as u64,
                        max_parts,
                    });
                }
                fragments = self.merge_round(fragments, target, temps).await?;
            };
            debug!(
                total,
                fragments = fragments.len(),
                parts = parts.len(),
                "Planned concatenation"
            );

            let upload = ActiveUpload::initiate(
                Arc::clone(&self.store),
                self.pacer.clone(),
                target,
                metadata,
            )
            .await?;
            let sent = self.send_parts(&upload, &fragments, parts).await;
            let (etag, completed) = upload
                .finish(sent, self.options.leave_parts_on_error)
                .await?;

            Ok(CopyOutcome {
                upload_id: upload.upload_id().to_string(),
                etag,
                parts: completed,
                size: total,
                part_size,
            })
        }
        .boxed()
    }

    /// Merge adjacent pairs into temporary objects, halving the fragment count
    async fn merge_round(
        &self,
        fragments: Vec<Fragment>,
        target: &ObjectRef,
        temps: &mut Vec<ObjectRef>,
    ) -> Result<Vec<Fragment>, TransferError> {
        info!(fragments = fragments.len(), "Merging fragment pairs");

        let mut jobs = Vec::with_capacity(fragments.len() / 2 + 1);
        for pair in fragments.chunks(2) {
            match pair {
                [single] => jobs.push((vec![single.clone()], None)),
                _ => {
                    let temp = target.with_key(format!(
                        "{}.concat-{}",
                        target.key(),
                        Uuid::new_v4()
                    ))?;
                    temps.push(temp.clone());
                    jobs.push((pair.to_vec(), Some(temp)));
                }
            }
        }

        stream::iter(jobs)
            .map(|(pair, temp)| async move {
                match temp {
                    None => Ok(pair.into_iter().next()),
                    Some(temp) => self.merge_pair(pair, temp).await.map(Some),
                }
            })
            .buffered(self.options.concurrency)
            .try_filter_map(|fragment| async move { Ok(fragment) })
            .try_collect()
            .await
    }

    async fn merge_pair(&self, pair: Vec<Fragment>, temp: ObjectRef) -> Result<Fragment, TransferError> {
        let size: u64 = pair.iter().map(|f| f.size).sum();

        if size >= self.options.min_chunk_size {
            let metadata = ObjectMetadata::default();
            let mut nested = Vec::new();
            let outcome = self.join(pair, &temp, &metadata, &mut nested).await;
            self.remove_temps(&nested).await;
            outcome?;
        } else {
            let mut body = Vec::with_capacity(usize::try_from(size).unwrap_or(0));
            for fragment in &pair {
                if fragment.size > 0 {
                    let range = ByteRange::with_len(0, fragment.size);
                    body.extend_from_slice(&self.download(&fragment.object, range).await?);
                }
            }
            let content_md5 =
                (!self.options.disable_checksum).then(|| BASE64.encode(md5_digest(&body)));
            let store = &*self.store;
            let temp_ref = &temp;
            let body_ref = body.as_slice();
            let md5 = content_md5.as_deref();
            let metadata = ObjectMetadata::default();
            let metadata_ref = &metadata;
            self.pacer
                .call_for_bucket(store, temp.bucket(), move || {
                    store.put_object(temp_ref, body_ref, md5, metadata_ref)
                })
                .await?;
        }

        debug!(temp = %temp, size, "Fragment pair merged");
        Ok(Fragment { object: temp, size })
    }

    async fn download(&self, object: &ObjectRef, range: ByteRange) -> Result<bytes::Bytes, StoreError> {
        let store = &*self.store;
        self.pacer
            .call_for_bucket(store, object.bucket(), move || store.get_object_range(object, range))
            .await
    }

    async fn send_parts(
        &self,
        upload: &Arc<ActiveUpload>,
        fragments: &[Fragment],
        parts: Vec<ConcatPart>,
    ) -> Result<(), TransferError> {
        let slots = Arc::new(Semaphore::new(self.options.concurrency));
        let objects: Vec<Arc<ObjectRef>> = fragments
            .iter()
            .map(|f| Arc::new(f.object.clone()))
            .collect();
        let mut tasks = PartTasks::new();
        let mut dispatched = Ok(());

        for (index, part) in parts.into_iter().enumerate() {
            // Bounded by the ceiling check in `join`
            let part_number = u32::try_from(index + 1).unwrap_or(u32::MAX);
            let permit = match acquire_slot(&tasks, &slots).await {
                Ok(permit) => permit,
                Err(err) => {
                    dispatched = Err(err);
                    break;
                }
            };
            let policy = self.options.policy_for_part(part_number);

            match part {
                ConcatPart::Copy { fragment, range } => tasks.spawn(copy_part(
                    Arc::clone(upload),
                    Arc::clone(&objects[fragment]),
                    part_number,
                    range,
                    policy,
                    permit,
                )),
                ConcatPart::Merge { segments } => {
                    let segments = segments
                        .into_iter()
                        .map(|(fragment, range)| (Arc::clone(&objects[fragment]), range))
                        .collect();
                    tasks.spawn(merge_part(
                        Arc::clone(upload),
                        segments,
                        part_number,
                        policy,
                        self.options.disable_checksum,
                        permit,
                    ));
                }
            }
        }

        let finished = tasks.finish().await;
        finished.map(|_| ()).and(dispatched)
    }

    async fn remove_temps(&self, temps: &[ObjectRef]) {
        for temp in temps {
            let store = &*self.store;
            let removed = self
                .pacer
                .call_for_bucket(store, temp.bucket(), move || store.delete_object(temp))
                .await;
            match removed {
                Ok(()) | Err(StoreError::NotFound(_)) => {
                    debug!(temp = %temp, "Temporary fragment removed");
                }
                Err(err) => warn!(temp = %temp, error = %err, "Failed to remove temporary fragment"),
            }
        }
    }
}

/// Download the segments of a merged part and upload them as one part
async fn merge_part(
    upload: Arc<ActiveUpload>,
    segments: Vec<(Arc<ObjectRef>, ByteRange)>,
    part_number: u32,
    policy: RetryPolicy,
    disable_checksum: bool,
    _permit: OwnedSemaphorePermit,
) -> Result<CompletedPart, TransferError> {
    let store = &**upload.store();
    let pacer = upload.pacer();
    let to_part_error = |source| TransferError::UploadPart {
        part_number,
        source,
    };

    let len: u64 = segments.iter().map(|(_, r)| r.len()).sum();
    let mut body = Vec::with_capacity(usize::try_from(len).unwrap_or(0));
    for (object, range) in &segments {
        let object = &**object;
        let range = *range;
        let chunk = pacer
            .call_for_bucket(store, object.bucket(), move || store.get_object_range(object, range))
            .await
            .map_err(to_part_error)?;
        body.extend_from_slice(&chunk);
    }

    let content_md5 = (!disable_checksum).then(|| BASE64.encode(md5_digest(&body)));
    let target = upload.target();
    let upload_id = upload.upload_id();
    let body_ref = body.as_slice();
    let md5 = content_md5.as_deref();

    let etag = pacer
        .call_with(policy, Some((store, target.bucket())), move || {
            store.upload_part(target, upload_id, part_number, body_ref, md5)
        })
        .await
        .map_err(to_part_error)?;

    debug!(part_number, bytes = body.len(), segments = segments.len(), "Merged part uploaded");
    let part = CompletedPart { part_number, etag };
    upload.record_part(part.clone())?;
    Ok(part)
}
