//! Bounded retry with exponential backoff for object-storage calls.
//!
//! Part uploads and the multipart complete call run through [`RetryExecutor`].
//! The attempt ceiling is a hard contract; the backoff shape is tunable.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::debug;

use crate::error::StorageError;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts including the first one (default: 5).
    pub max_attempts: u32,
    /// Delay before the second attempt (default: 100ms).
    pub initial_backoff: Duration,
    /// Maximum backoff duration (default: 10 seconds).
    pub max_backoff: Duration,
    /// Multiplier for exponential backoff (default: 2.0).
    pub backoff_multiplier: f64,
    /// Whether to add random jitter to backoff (default: true).
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Outcome of a retry operation.
#[derive(Debug)]
pub enum RetryOutcome<T> {
    /// Operation succeeded.
    Success(T),
    /// All attempts used up, or a permanent error was hit.
    Exhausted {
        /// The last error that occurred.
        last_error: StorageError,
        /// Total number of attempts made.
        attempts: u32,
    },
}

impl<T> RetryOutcome<T> {
    /// Collapse into a plain result, dropping the attempt count.
    pub fn into_result(self) -> Result<T, StorageError> {
        match self {
            RetryOutcome::Success(value) => Ok(value),
            RetryOutcome::Exhausted { last_error, .. } => Err(last_error),
        }
    }
}

/// Executor for retry operations.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    /// Create a new RetryExecutor with the given configuration.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// The configured attempt ceiling.
    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Execute an operation with retry logic.
    ///
    /// Only transient (retryable) errors are retried; permanent errors fail
    /// immediately. The operation runs at most `max_attempts` times.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> RetryOutcome<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, StorageError>>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            match operation().await {
                Ok(value) => return RetryOutcome::Success(value),
                Err(e) => {
                    if !is_retryable(&e) || attempt >= max_attempts {
                        return RetryOutcome::Exhausted {
                            last_error: e,
                            attempts: attempt,
                        };
                    }
                    let backoff = self.compute_backoff(attempt - 1);
                    debug!(
                        attempt,
                        max_attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "retrying object storage call"
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    /// Compute the exponential backoff duration for a given attempt.
    ///
    /// Computes: `initial_backoff * backoff_multiplier^attempt`
    /// Caps the result at `max_backoff`.
    /// If jitter is enabled, adds random jitter (0% to 50% of computed delay).
    fn compute_backoff(&self, attempt: u32) -> Duration {
        let base_delay_ms = self.config.initial_backoff.as_millis() as f64;
        let multiplier = self.config.backoff_multiplier;
        let max_delay_ms = self.config.max_backoff.as_millis() as f64;

        let computed = base_delay_ms * multiplier.powi(attempt as i32);
        let capped = computed.min(max_delay_ms) as u64;

        if self.config.jitter && capped > 1 {
            let jitter_ms = rand::thread_rng().gen_range(0..=capped / 2);
            Duration::from_millis(capped.saturating_add(jitter_ms))
        } else {
            Duration::from_millis(capped)
        }
    }
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

/// Check if an error is retryable.
///
/// Transient: network failures, local I/O hiccups, HTTP 408/429 and 5xx,
/// and error documents returned under a success status.
/// Everything else (4xx, parse errors, invalid requests) is permanent.
pub fn is_retryable(error: &StorageError) -> bool {
    match error {
        StorageError::Network { .. } => true,
        StorageError::Io(_) => true,
        StorageError::Http { status, .. } => *status == 408 || *status == 429 || *status >= 500,
        StorageError::EmbeddedError { .. } => true,
        StorageError::ResponseParse { .. } => false,
        StorageError::InvalidRequest { .. } => false,
        StorageError::FileNotFound { .. } => false,
        StorageError::PartUpload { .. } => false,
        StorageError::TaskJoin { .. } => false,
    }
}
