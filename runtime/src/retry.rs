//! Caller-side retry for lock contention.
//!
//! The engine never retries internally: a `LockTimeout` is surfaced to the caller,
//! who decides whether to try again. This module is that decision for callers that
//! want one: jittered exponential backoff that retries only `LockTimeout` and
//! returns every other outcome (including `SoldOut`) immediately.
//!
//! # Example
//!
//! ```rust,no_run
//! use nearbytix_runtime::retry::{ContentionPolicy, retry_on_contention};
//! use nearbytix_runtime::ReservationEngine;
//! use nearbytix_core::{EventId, UserId};
//!
//! # async fn example(engine: ReservationEngine, event_id: EventId, user_id: UserId)
//! #     -> nearbytix_core::Result<()> {
//! let _ticket = retry_on_contention(&ContentionPolicy::default(), || {
//!     engine.reserve(event_id, user_id)
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

use crate::metrics::{RETRY_ATTEMPTS_TOTAL, counter};
use nearbytix_core::{ReservationError, Result};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Backoff for retrying a lock timeout.
///
/// Defaults: 3 retries, 50ms first delay, 1s cap, doubling.
#[derive(Debug, Clone)]
pub struct ContentionPolicy {
    /// Retries after the first attempt
    pub max_retries: usize,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Cap for the exponential delay
    pub max_delay: Duration,
    /// Growth factor between retries
    pub multiplier: f64,
}

impl Default for ContentionPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(1),
            multiplier: 2.0,
        }
    }
}

impl ContentionPolicy {
    /// Policy that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Upper bound of the delay before retry number `attempt` (zero-based):
    /// `min(initial_delay * multiplier^attempt, max_delay)`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss, clippy::cast_possible_wrap)]
    pub fn ceiling_for_attempt(&self, attempt: usize) -> Duration {
        let exponent = attempt.min(32) as i32;
        let delay_ms = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        let cap_ms = self.max_delay.as_millis() as f64;
        Duration::from_millis(delay_ms.min(cap_ms).max(0.0) as u64)
    }

    /// Jittered delay in `[ceiling / 2, ceiling]`, so contending callers spread out.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let ceiling = self.ceiling_for_attempt(attempt);
        let jitter = rand::thread_rng().gen_range(0.5..=1.0);
        ceiling.mul_f64(jitter)
    }
}

/// Runs `operation`, retrying it while it fails with `LockTimeout`.
///
/// # Errors
///
/// Returns the first non-`LockTimeout` error, or `LockTimeout` once
/// `policy.max_retries` retries are exhausted.
pub async fn retry_on_contention<F, Fut, T>(policy: &ContentionPolicy, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Err(ReservationError::LockTimeout) if attempt < policy.max_retries => {
                let delay = policy.delay_for_attempt(attempt);
                tracing::warn!(
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "Lock timeout, retrying"
                );
                counter!(RETRY_ATTEMPTS_TOTAL).increment(1);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(ReservationError::LockTimeout) => {
                tracing::error!(attempt, "Lock timeout, retries exhausted");
                return Err(ReservationError::LockTimeout);
            }
            other => return other,
        }
    }
}
