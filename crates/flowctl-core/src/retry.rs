// Copyright (c) 2026 flowctl contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bounded retry with backoff. Grounded in the teacher's `RetryConfig`/
//! `BackoffStrategy` vocabulary (referenced by its executor but never itself
//! shipped in the retrieval pack); it now backs two callers: a per-step
//! retry niceties carried over from the teacher's step config, and the
//! spec-mandated bounded exponential backoff on persistent-store "busy"
//! errors (spec §5).

use std::time::Duration;

use rand::Rng;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffStrategy {
    Constant,
    Linear,
    Exponential,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
    /// Fraction of the computed delay to randomize, in `[0.0, 1.0]`.
    pub jitter: f64,
}

impl RetryPolicy {
    pub fn exponential(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay: Duration::from_secs(30),
            strategy: BackoffStrategy::Exponential,
            jitter: 0.2,
        }
    }

    /// The policy spec §5 requires for persistent-store "busy" errors: a
    /// small fixed attempt cap with jittered exponential backoff.
    pub fn persistence_busy() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
            strategy: BackoffStrategy::Exponential,
            jitter: 0.3,
        }
    }

    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let raw = match self.strategy {
            BackoffStrategy::Constant => self.base_delay,
            BackoffStrategy::Linear => self.base_delay * attempt.max(1),
            BackoffStrategy::Exponential => self.base_delay.saturating_mul(1u32 << attempt.min(20)),
        };
        let capped = raw.min(self.max_delay);
        if self.jitter <= 0.0 {
            return capped;
        }
        let jitter_span = capped.as_secs_f64() * self.jitter;
        let delta = rand::thread_rng().gen_range(-jitter_span..=jitter_span);
        let jittered = (capped.as_secs_f64() + delta).max(0.0);
        Duration::from_secs_f64(jittered)
    }
}

/// Runs `operation` up to `policy.max_attempts` times, sleeping with backoff
/// between attempts, retrying only while `is_retryable` returns true for the
/// returned error.
pub async fn retry_with_backoff<T, E, F, Fut, R>(policy: &RetryPolicy, is_retryable: R, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                attempt += 1;
                if attempt >= policy.max_attempts || !is_retryable(&err) {
                    return Err(err);
                }
                let delay = policy.delay_for_attempt(attempt);
                warn!(attempt, ?delay, error = %err, "retrying after transient error");
                tokio::time::sleep(delay).await;
            }
        }
    }
}
