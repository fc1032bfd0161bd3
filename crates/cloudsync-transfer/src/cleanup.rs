//! Stale multipart upload maintenance
//!
//! Uploads that were initiated and never completed or aborted keep their
//! parts on the provider, and are usually billed. [`cleanup_stale_uploads`]
//! aborts the ones older than a cutoff. It only runs when called.

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use cloudsync_core::domain::ObjectRef;
use cloudsync_core::ports::ObjectStore;
use tracing::{debug, info, instrument, warn};

use crate::error::TransferError;
use crate::pacer::Pacer;

/// What a cleanup run did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Pending uploads listed
    pub examined: usize,
    /// Uploads aborted
    pub aborted: usize,
    /// Uploads whose abort failed
    pub failed: usize,
}

/// Abort pending uploads in `bucket` initiated before `now - max_age`
///
/// # Errors
/// Fails only when listing fails. Abort failures are logged and counted.
#[instrument(level = "info", skip(store, pacer))]
pub async fn cleanup_stale_uploads(
    store: &Arc<dyn ObjectStore>,
    pacer: &Pacer,
    bucket: &str,
    prefix: Option<&str>,
    max_age: std::time::Duration,
) -> Result<CleanupReport, TransferError> {
    let cutoff: DateTime<Utc> = ChronoDuration::from_std(max_age)
        .ok()
        .and_then(|age| Utc::now().checked_sub_signed(age))
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    let store = &**store;
    let mut report = CleanupReport::default();
    let mut marker = None;

    loop {
        let marker_ref = marker.as_ref();
        let page = pacer
            .call_for_bucket(store, bucket, move || {
                store.list_multipart_uploads(bucket, prefix, marker_ref)
            })
            .await?;

        for pending in &page.uploads {
            report.examined += 1;
            if pending.initiated >= cutoff {
                continue;
            }
            let target = ObjectRef::new(bucket, pending.key.as_str())?;
            let target_ref = &target;
            let upload_id = pending.upload_id.as_str();
            let aborted = pacer
                .call_for_bucket(store, bucket, move || {
                    store.abort_multipart_upload(target_ref, upload_id)
                })
                .await;
            match aborted {
                Ok(()) => {
                    debug!(key = %pending.key, upload_id, initiated = %pending.initiated, "Aborted stale multipart upload");
                    report.aborted += 1;
                }
                Err(err) => {
                    warn!(key = %pending.key, upload_id, error = %err, "Failed to abort stale multipart upload");
                    report.failed += 1;
                }
            }
        }

        match page.next {
            Some(next) => marker = Some(next),
            None => break,
        }
    }

    info!(
        examined = report.examined,
        aborted = report.aborted,
        failed = report.failed,
        "Multipart cleanup finished"
    );
    Ok(report)
}
