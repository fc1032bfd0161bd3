//! Part worker set
//!
//! Runs the per-part units of work of one multipart transfer. The first real
//! failure cancels every sibling and the producer; [`PartTasks::finish`] then
//! reports that failure and nothing else.

use std::future::Future;

use cloudsync_core::domain::CompletedPart;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::TransferError;

/// Set of in-flight part workers sharing one cancellation token
#[derive(Debug)]
pub struct PartTasks {
    set: JoinSet<Result<CompletedPart, TransferError>>,
    cancel: CancellationToken,
    spawned: usize,
}

impl Default for PartTasks {
    fn default() -> Self {
        Self::new()
    }
}

impl PartTasks {
    pub fn new() -> Self {
        Self {
            set: JoinSet::new(),
            cancel: CancellationToken::new(),
            spawned: 0,
        }
    }

    /// Start a part worker
    ///
    /// A worker that fails with anything but [`TransferError::Cancelled`]
    /// cancels the rest of the set.
    pub fn spawn<F>(&mut self, fut: F)
    where
        F: Future<Output = Result<CompletedPart, TransferError>> + Send + 'static,
    {
        let cancel = self.cancel.clone();
        self.spawned += 1;
        self.set.spawn(async move {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(TransferError::Cancelled),
                result = fut => result,
            };
            if let Err(err) = &result {
                if !err.is_cancelled() {
                    cancel.cancel();
                }
            }
            result
        });
    }

    /// Await `fut` unless the set is cancelled first
    pub async fn until_cancelled<T, F>(&self, fut: F) -> Result<T, TransferError>
    where
        F: Future<Output = T>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(TransferError::Cancelled),
            value = fut => Ok(value),
        }
    }

    /// Cancel every worker
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Number of workers started so far
    pub fn spawned(&self) -> usize {
        self.spawned
    }

    /// Wait for every worker
    ///
    /// # Errors
    /// Returns the first worker failure, or [`TransferError::Cancelled`] if
    /// the set was cancelled without one.
    pub async fn finish(mut self) -> Result<Vec<CompletedPart>, TransferError> {
        let mut parts = Vec::with_capacity(self.spawned);
        let mut first_error: Option<TransferError> = None;

        while let Some(joined) = self.set.join_next().await {
            let result = joined.unwrap_or_else(|join_err| {
                Err(TransferError::Worker(join_err.to_string()))
            });
            match result {
                Ok(part) => parts.push(part),
                Err(err) if err.is_cancelled() => {}
                Err(err) => {
                    self.cancel.cancel();
                    if first_error.is_none() {
                        first_error = Some(err);
                    } else {
                        debug!(error = %err, "Part failed after transfer was cancelled");
                    }
                }
            }
        }

        if let Some(err) = first_error {
            return Err(err);
        }
        if self.cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }
        parts.sort_by_key(|part| part.part_number);
        Ok(parts)
    }
}
