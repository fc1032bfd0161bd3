//! Retry pacing for remote calls
//!
//! Every remote call the engine makes goes through [`Pacer`]. It classifies
//! failures, sleeps with exponential backoff between retryable attempts,
//! follows a bucket's region redirect once, and gives up after a fixed number
//! of attempts by returning the last error as it was received.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let etag = pacer
//!     .call_for_bucket(store, bucket, || store.upload_part(target, id, 1, body, None))
//!     .await?;
//! ```

use std::future::Future;
use std::time::Duration;

use cloudsync_core::config::RetryConfig;
use cloudsync_core::domain::{ErrorClass, StoreError};
use cloudsync_core::ports::ObjectStore;
use tracing::{debug, info, warn};

/// Default attempt ceiling per call, including the first attempt
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Default backoff floor
pub const DEFAULT_MIN_SLEEP: Duration = Duration::from_millis(10);

/// Default backoff ceiling
pub const DEFAULT_MAX_SLEEP: Duration = Duration::from_secs(2);

/// Retry budget and backoff bounds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacerConfig {
    pub max_attempts: u32,
    pub min_sleep: Duration,
    pub max_sleep: Duration,
}

impl Default for PacerConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            min_sleep: DEFAULT_MIN_SLEEP,
            max_sleep: DEFAULT_MAX_SLEEP,
        }
    }
}

impl From<&RetryConfig> for PacerConfig {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            min_sleep: config.min_sleep(),
            max_sleep: config.max_sleep().max(config.min_sleep()),
        }
    }
}

/// How failures of a call are judged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryPolicy {
    /// Retry transient and rate-limited failures up to the attempt ceiling
    #[default]
    Classified,
    /// Treat any failure as transient, up to the same attempt ceiling
    RetryAny,
}

/// Outcome of judging one failed attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryDecision {
    pub should_retry: bool,
    pub delay: Duration,
    pub cause: ErrorClass,
}

/// Retry wrapper applied uniformly to remote calls
#[derive(Debug, Clone, Default)]
pub struct Pacer {
    config: PacerConfig,
}

impl Pacer {
    pub fn new(config: PacerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PacerConfig {
        &self.config
    }

    /// Sleep before retrying after failed attempt number `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        self.config
            .min_sleep
            .saturating_mul(1u32 << exponent)
            .min(self.config.max_sleep)
    }

    /// Judge failed attempt number `attempt` (1-based) under `policy`
    pub fn decide(&self, policy: RetryPolicy, error: &StoreError, attempt: u32) -> RetryDecision {
        let cause = error.class();
        let should_retry = match policy {
            RetryPolicy::Classified => cause.is_retryable() && attempt < self.config.max_attempts,
            RetryPolicy::RetryAny => attempt < self.config.max_attempts,
        };
        let delay = match error.retry_after() {
            Some(requested) => requested.max(self.backoff(attempt)),
            None => self.backoff(attempt),
        };
        RetryDecision {
            should_retry,
            delay,
            cause,
        }
    }

    /// Run a call that is not scoped to a bucket
    pub async fn call<T, F, Fut>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        self.call_with(RetryPolicy::Classified, None, f).await
    }

    /// Run a bucket-scoped call, following a region redirect once
    pub async fn call_for_bucket<T, F, Fut>(
        &self,
        store: &dyn ObjectStore,
        bucket: &str,
        f: F,
    ) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        self.call_with(RetryPolicy::Classified, Some((store, bucket)), f)
            .await
    }

    /// Run `f` until it succeeds or the policy gives up
    ///
    /// # Arguments
    /// * `policy` - How failures are judged
    /// * `redirect` - Store and bucket used to recover from a region redirect
    /// * `f` - Produces one attempt of the call
    ///
    /// # Errors
    /// Returns the error of the last attempt, unchanged.
    pub async fn call_with<T, F, Fut>(
        &self,
        policy: RetryPolicy,
        redirect: Option<(&dyn ObjectStore, &str)>,
        mut f: F,
    ) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let mut attempt: u32 = 0;
        let mut redirected = false;

        loop {
            attempt += 1;
            let err = match f().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "Remote call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if err.class() == ErrorClass::WrongRegion && !redirected {
                if let Some((store, bucket)) = redirect {
                    redirected = true;
                    if attempt >= self.config.max_attempts {
                        return Err(err);
                    }
                    match store.update_region_for_bucket(bucket).await {
                        Ok(()) => {
                            info!(bucket, "Bucket region updated after redirect, retrying");
                            continue;
                        }
                        Err(hook_err) => {
                            warn!(bucket, error = %hook_err, "Failed to update region for bucket");
                            return Err(err);
                        }
                    }
                }
            }

            let decision = self.decide(policy, &err, attempt);
            if !decision.should_retry {
                if attempt > 1 {
                    warn!(attempts = attempt, cause = %decision.cause, error = %err, "Retry budget exhausted");
                }
                return Err(err);
            }

            debug!(
                attempt,
                delay_ms = decision.delay.as_millis() as u64,
                cause = %decision.cause,
                error = %err,
                "Retrying remote call"
            );
            tokio::time::sleep(decision.delay).await;
        }
    }
}
