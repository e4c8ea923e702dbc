//! Retry with exponential backoff and jitter.
//!
//! Only failures tagged retryable are attempted again. Every wait races the
//! run's cancellation token, so a cancelled run stops sleeping immediately.

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use vtx_models::ErrorKind;

use crate::config::BackoffConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::metrics;

/// Backoff policy for one run.
///
/// Counts the retries it performs so the run can report them.
#[derive(Debug)]
pub struct Backoff {
    config: BackoffConfig,
    retries: AtomicU32,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            retries: AtomicU32::new(0),
        }
    }

    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }

    /// Retries performed so far.
    pub fn retries(&self) -> u32 {
        self.retries.load(Ordering::Relaxed)
    }

    fn base_for(&self, kind: ErrorKind) -> Duration {
        match kind {
            ErrorKind::QuotaExceeded => self.config.quota_base_delay,
            _ => self.config.base_delay,
        }
    }

    /// Delay before retry `n` (0-based) with jitter drawn from `unit`.
    ///
    /// `unit` is clamped to `[0, 1]` and scales the jitter span.
    pub fn delay_with_jitter(&self, n: u32, kind: ErrorKind, unit: f64) -> Duration {
        let exp = self.base_for(kind).saturating_mul(2u32.saturating_pow(n));
        let jitter = exp.mul_f64(self.config.jitter_ratio * unit.clamp(0.0, 1.0));
        exp.saturating_add(jitter).min(self.config.max_delay)
    }

    /// Delay before retry `n` (0-based) with random jitter.
    pub fn delay_for(&self, n: u32, kind: ErrorKind) -> Duration {
        let unit = rand::rng().random_range(0.0..=1.0);
        self.delay_with_jitter(n, kind, unit)
    }

    /// Run `operation` until it succeeds, fails permanently, runs out of
    /// attempts, or `cancel` fires.
    ///
    /// The closure receives the 1-based attempt number.
    pub async fn retry<T, F, Fut>(
        &self,
        operation_name: &str,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> PipelineResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = PipelineResult<T>>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1u32;

        loop {
            if cancel.is_cancelled() {
                return Err(PipelineError::cancelled());
            }

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PipelineError::cancelled()),
                result = operation(attempt) => result,
            };

            let err = match result {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !err.is_retryable() {
                return Err(err);
            }
            if attempt >= max_attempts {
                warn!(
                    operation = operation_name,
                    attempts = attempt,
                    error_kind = %err.kind,
                    "Retries exhausted: {}",
                    err.message
                );
                return Err(err);
            }

            let delay = self.delay_for(attempt - 1, err.kind);
            debug!(
                operation = operation_name,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error_kind = %err.kind,
                "Attempt failed, retrying: {}",
                err.message
            );
            self.retries.fetch_add(1, Ordering::Relaxed);
            metrics::record_retry(operation_name, err.kind);

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PipelineError::cancelled()),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}
