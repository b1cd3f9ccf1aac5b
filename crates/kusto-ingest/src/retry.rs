//! Retry primitives: exponential backoff with jitter, cancellation-aware sleep (§2,
//! §5 "Suspension / blocking points").
//!
//! Grounded directly on `journal-client::read::uncommitted::retry`'s `Retry` trait
//! and `ExponentialBackoff` wrapper around the `exponential-backoff` crate, widened
//! from "retry an `io::Error`" to "retry a `KustoError`" via `KustoError::is_retryable`.

use kusto_core::error::KustoError;
use std::fmt::Debug;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub use exponential_backoff::Backoff;

/// Determines which errors to retry and how long to wait before doing so.
pub trait Retry: Debug + Clone {
    fn reset(&mut self);

    /// `None` aborts the retry loop and surfaces `error` to the caller; `Some(d)`
    /// retries after `d` elapses.
    fn next_backoff(&mut self, error: &KustoError) -> Option<Duration>;
}

/// A `Retry` that never retries -- used for ingestion paths a caller has opted out
/// of retrying (§4.5 streaming, when wrapped in no fallback).
#[derive(Debug, Clone)]
pub struct NoRetry;

impl Retry for NoRetry {
    fn reset(&mut self) {}
    fn next_backoff(&mut self, _error: &KustoError) -> Option<Duration> {
        None
    }
}

#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    error_count: u32,
    max_retries: u32,
    backoff: Backoff,
}

impl ExponentialBackoff {
    pub fn new(max_retries: u32) -> Self {
        ExponentialBackoff {
            error_count: 0,
            max_retries,
            backoff: Backoff::new(max_retries, Duration::from_secs(1), Some(Duration::from_secs(30))),
        }
    }

    pub fn with_min(mut self, min: Duration) -> Self {
        self.backoff.set_min(min);
        self
    }

    pub fn with_max(mut self, max: Duration) -> Self {
        self.backoff.set_max(Some(max));
        self
    }

    /// Full jitter, matching §4.6's status-poll backoff defaults.
    pub fn with_jitter(mut self, jitter: f32) -> Self {
        self.backoff.set_jitter(jitter);
        self
    }

    pub fn with_factor(mut self, factor: u32) -> Self {
        self.backoff.set_factor(factor);
        self
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        ExponentialBackoff::new(3)
    }
}

impl Retry for ExponentialBackoff {
    fn reset(&mut self) {
        self.error_count = 0;
    }

    fn next_backoff(&mut self, error: &KustoError) -> Option<Duration> {
        if !error.is_retryable() || self.error_count >= self.max_retries {
            return None;
        }
        self.error_count += 1;
        self.backoff.next(self.error_count)
    }
}

/// Sleeps for `duration`, or returns early if `cancel` fires first -- every retry
/// sleep in this crate goes through here so cancellation is never missed (§5).
pub async fn cancellable_sleep(
    duration: Duration,
    cancel: &CancellationToken,
    op: kusto_core::error::Operation,
) -> Result<(), KustoError> {
    tokio::select! {
        _ = tokio::time::sleep(duration) => Ok(()),
        _ = cancel.cancelled() => Err(KustoError::cancelled(op)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kusto_core::error::Operation;

    #[test]
    fn stops_after_max_retries() {
        let mut r = ExponentialBackoff::new(2);
        let err = KustoError::HttpError { op: Operation::StreamIngest, message: "boom".into(), source: None };
        assert!(r.next_backoff(&err).is_some());
        assert!(r.next_backoff(&err).is_some());
        assert!(r.next_backoff(&err).is_none());
    }

    #[test]
    fn non_retryable_error_never_retries() {
        let mut r = ExponentialBackoff::new(5);
        let err = KustoError::client_args(Operation::StreamIngest, "bad args");
        assert!(r.next_backoff(&err).is_none());
    }
}
