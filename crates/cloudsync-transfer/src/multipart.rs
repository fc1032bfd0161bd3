//! Lifecycle of one remote multipart upload
//!
//! [`ActiveUpload`] wraps the upload id returned by "initiate" together with
//! the session state machine. Workers record accepted parts through it, and
//! the orchestrators finish it with either [`ActiveUpload::complete`] or
//! [`ActiveUpload::abort`].

use std::sync::{Arc, Mutex, MutexGuard};

use cloudsync_core::domain::{CompletedPart, MultipartSession, ObjectMetadata, ObjectRef};
use cloudsync_core::ports::ObjectStore;
use tracing::{debug, info, warn};

use crate::error::TransferError;
use crate::pacer::Pacer;

/// A multipart upload that has been initiated and not yet finished
pub struct ActiveUpload {
    store: Arc<dyn ObjectStore>,
    pacer: Pacer,
    target: ObjectRef,
    upload_id: String,
    session: Mutex<MultipartSession>,
}

impl std::fmt::Debug for ActiveUpload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveUpload")
            .field("target", &self.target)
            .field("upload_id", &self.upload_id)
            .finish_non_exhaustive()
    }
}

impl ActiveUpload {
    /// Call "initiate multipart upload" through the pacer
    ///
    /// # Errors
    /// Returns [`TransferError::Initiate`] carrying the classified cause.
    pub async fn initiate(
        store: Arc<dyn ObjectStore>,
        pacer: Pacer,
        target: &ObjectRef,
        metadata: &ObjectMetadata,
    ) -> Result<Arc<Self>, TransferError> {
        let initiated = {
            let store_ref = &*store;
            pacer
                .call_for_bucket(store_ref, target.bucket(), move || {
                    store_ref.initiate_multipart_upload(target, metadata)
                })
                .await
                .map_err(|source| TransferError::Initiate {
                    target: target.to_string(),
                    source,
                })?
        };

        debug!(
            bucket = target.bucket(),
            key = target.key(),
            upload_id = %initiated.upload_id,
            "Multipart upload initiated"
        );

        let session = MultipartSession::new(initiated.upload_id.clone(), target.clone())
            .with_expiry(initiated.abort_date);

        Ok(Arc::new(Self {
            store,
            pacer,
            target: target.clone(),
            upload_id: initiated.upload_id,
            session: Mutex::new(session),
        }))
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    pub fn pacer(&self) -> &Pacer {
        &self.pacer
    }

    pub fn target(&self) -> &ObjectRef {
        &self.target
    }

    pub fn upload_id(&self) -> &str {
        &self.upload_id
    }

    fn session(&self) -> MutexGuard<'_, MultipartSession> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record a part the provider accepted
    pub fn record_part(&self, part: CompletedPart) -> Result<(), TransferError> {
        self.session().record_part(part)?;
        Ok(())
    }

    /// Parts recorded so far, sorted by part number
    pub fn parts(&self) -> Vec<CompletedPart> {
        self.session().parts()
    }

    /// Submit the recorded parts in part-number order and return the final ETag
    ///
    /// # Errors
    /// Returns [`TransferError::Complete`] carrying the classified cause.
    pub async fn complete(&self) -> Result<(String, Vec<CompletedPart>), TransferError> {
        let parts = self.parts();
        let store = &*self.store;
        let target = &self.target;
        let upload_id = self.upload_id.as_str();
        let parts_ref = parts.as_slice();

        let etag = self
            .pacer
            .call_for_bucket(store, target.bucket(), move || {
                store.complete_multipart_upload(target, upload_id, parts_ref)
            })
            .await
            .map_err(|source| TransferError::Complete {
                upload_id: self.upload_id.clone(),
                source,
            })?;

        self.session().complete()?;
        info!(
            bucket = target.bucket(),
            key = target.key(),
            upload_id,
            parts = parts.len(),
            "Multipart upload completed"
        );
        Ok((etag, parts))
    }

    /// Clean up after a failure
    ///
    /// With `leave_parts` the uploaded parts stay on the provider for manual
    /// inspection. An abort failure is logged and never replaces the error
    /// that caused it.
    pub async fn abort(&self, leave_parts: bool) {
        if leave_parts {
            info!(
                bucket = self.target.bucket(),
                key = self.target.key(),
                upload_id = %self.upload_id,
                "Leaving uploaded parts in place after failure"
            );
            return;
        }

        let store = &*self.store;
        let target = &self.target;
        let upload_id = self.upload_id.as_str();
        let aborted = self
            .pacer
            .call_for_bucket(store, target.bucket(), move || {
                store.abort_multipart_upload(target, upload_id)
            })
            .await;

        match aborted {
            Ok(()) => {
                let _ = self.session().abort();
                debug!(upload_id, "Multipart upload aborted");
            }
            Err(err) => {
                warn!(
                    bucket = target.bucket(),
                    key = target.key(),
                    upload_id,
                    error = %err,
                    "Failed to abort multipart upload"
                );
            }
        }
    }

    /// Complete on success, abort on failure
    pub(crate) async fn finish(
        &self,
        parts_result: Result<(), TransferError>,
        leave_parts: bool,
    ) -> Result<(String, Vec<CompletedPart>), TransferError> {
        let completed = match parts_result {
            Ok(()) => self.complete().await,
            Err(err) => Err(err),
        };
        if completed.is_err() {
            self.abort(leave_parts).await;
        }
        completed
    }
}
