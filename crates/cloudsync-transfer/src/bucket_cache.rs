//! Bucket existence cache
//!
//! Remembers which buckets are known to exist and makes sure that, within one
//! process, only one "create bucket" call is in flight per bucket name. Callers
//! arriving while a creation is running wait for it and share its outcome.

use std::future::Future;

use cloudsync_core::domain::StoreError;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::watch;
use tracing::debug;

type Outcome = Option<Result<(), StoreError>>;

#[derive(Debug)]
enum BucketState {
    Creating(watch::Receiver<Outcome>),
    Exists,
}

/// What a caller of [`BucketCache::ensure_exists`] has to do next
enum Step {
    Done,
    Wait(watch::Receiver<Outcome>),
    Create(watch::Sender<Outcome>),
}

/// Concurrency-safe memo of bucket existence
#[derive(Debug, Default)]
pub struct BucketCache {
    states: DashMap<String, BucketState>,
}

impl BucketCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make sure `bucket` exists, creating it at most once concurrently
    ///
    /// `create` runs only if the bucket is not already known to exist and no
    /// other caller is creating it. If `create` fails, `exists` is consulted
    /// once before the failure is reported, which covers a bucket created by
    /// someone else in the meantime.
    ///
    /// # Errors
    /// Returns the error from `create` when the bucket could not be confirmed.
    pub async fn ensure_exists<C, CF, E, EF>(
        &self,
        bucket: &str,
        create: C,
        exists: E,
    ) -> Result<(), StoreError>
    where
        C: FnOnce() -> CF,
        CF: Future<Output = Result<(), StoreError>>,
        E: FnOnce() -> EF,
        EF: Future<Output = Result<bool, StoreError>>,
    {
        loop {
            match self.next_step(bucket) {
                Step::Done => return Ok(()),
                Step::Create(tx) => return self.create(bucket, tx, create, exists).await,
                Step::Wait(mut rx) => {
                    debug!(bucket, "Waiting for in-flight bucket creation");
                    let outcome = match rx.wait_for(Option::is_some).await {
                        Ok(outcome) => (*outcome).clone(),
                        // The creating caller was dropped; take over
                        Err(_) => None,
                    };
                    if let Some(result) = outcome {
                        return result;
                    }
                }
            }
        }
    }

    fn next_step(&self, bucket: &str) -> Step {
        match self.states.entry(bucket.to_string()) {
            Entry::Occupied(entry) => match entry.get() {
                BucketState::Exists => Step::Done,
                BucketState::Creating(rx) => Step::Wait(rx.clone()),
            },
            Entry::Vacant(entry) => {
                let (tx, rx) = watch::channel(None);
                entry.insert(BucketState::Creating(rx));
                Step::Create(tx)
            }
        }
    }

    async fn create<C, CF, E, EF>(
        &self,
        bucket: &str,
        tx: watch::Sender<Outcome>,
        create: C,
        exists: E,
    ) -> Result<(), StoreError>
    where
        C: FnOnce() -> CF,
        CF: Future<Output = Result<(), StoreError>>,
        E: FnOnce() -> EF,
        EF: Future<Output = Result<bool, StoreError>>,
    {
        let mut guard = CreatingGuard {
            cache: self,
            bucket,
            tx: Some(tx),
        };

        let result = match create().await {
            Ok(()) => Ok(()),
            Err(err) => match exists().await {
                Ok(true) => {
                    debug!(bucket, error = %err, "Bucket create failed but bucket exists");
                    Ok(())
                }
                Ok(false) => Err(err),
                Err(check_err) => {
                    debug!(bucket, error = %check_err, "Bucket existence check failed");
                    Err(err)
                }
            },
        };

        guard.finish(result.clone());
        result
    }

    /// Record that `bucket` is known to exist
    pub fn mark_exists(&self, bucket: &str) {
        self.states.insert(bucket.to_string(), BucketState::Exists);
    }

    /// Forget what is known about `bucket`, e.g. after deleting it
    pub fn forget(&self, bucket: &str) {
        self.states
            .remove_if(bucket, |_, state| matches!(state, BucketState::Exists));
    }

    /// Returns true if `bucket` is known to exist
    pub fn is_known(&self, bucket: &str) -> bool {
        self.states
            .get(bucket)
            .map(|state| matches!(*state, BucketState::Exists))
            .unwrap_or(false)
    }
}

/// Resolves a `Creating` entry exactly once, even if the creator is dropped
struct CreatingGuard<'a> {
    cache: &'a BucketCache,
    bucket: &'a str,
    tx: Option<watch::Sender<Outcome>>,
}

impl CreatingGuard<'_> {
    fn finish(&mut self, result: Result<(), StoreError>) {
        let Some(tx) = self.tx.take() else {
            return;
        };
        if result.is_ok() {
            self.cache
                .states
                .insert(self.bucket.to_string(), BucketState::Exists);
        } else {
            self.cache.states.remove(self.bucket);
        }
        tx.send_replace(Some(result));
    }
}

impl Drop for CreatingGuard<'_> {
    fn drop(&mut self) {
        if self.tx.take().is_some() {
            self.cache.states.remove_if(self.bucket, |_, state| {
                matches!(state, BucketState::Creating(_))
            });
        }
    }
}
