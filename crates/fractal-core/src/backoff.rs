//! Backoff policy — the one retry strategy shared by node reads, batched
//! reads and single leaf reads.
//!
//! A policy is a base delay, a multiplier, a cap and an attempt budget.
//! The delay before retry `n` (0-based) is `base * multiplier^n`, capped.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    /// Total attempts, including the first one. Must be at least 1.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::node_read()
    }
}

impl BackoffPolicy {
    /// Branch node reads during discovery: 3 attempts, 200ms doubling, 2s cap.
    pub fn node_read() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
            multiplier: 2.0,
            max_delay_ms: 2_000,
        }
    }

    /// Aggregated batch calls: 3 attempts, 300ms doubling, 3s cap.
    pub fn batch_call() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 300,
            multiplier: 2.0,
            max_delay_ms: 3_000,
        }
    }

    /// Single leaf reads, both in the fallback path and in retry rounds.
    pub fn leaf_read() -> Self {
        Self::node_read()
    }

    /// No waiting at all. For tests and local stores.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay_ms: 0,
            multiplier: 1.0,
            max_delay_ms: 0,
        }
    }

    /// Delay to wait after failed attempt `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = i32::try_from(attempt).unwrap_or(i32::MAX);
        let millis = (self.base_delay_ms as f64) * self.multiplier.powi(exp);
        let capped = millis.min(self.max_delay_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    /// Run `operation` until it succeeds or the attempt budget is spent.
    /// Returns the last error on exhaustion.
    pub async fn run<F, Fut, T, E>(&self, operation: &str, mut attempt_fn: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let budget = self.max_attempts.max(1);
        let mut attempt = 0u32;
        loop {
            match attempt_fn().await {
                Ok(value) => {
                    if attempt > 0 {
                        tracing::debug!(operation, retries = attempt, "succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) => {
                    if attempt + 1 >= budget {
                        tracing::debug!(operation, attempts = budget, error = %e, "attempts exhausted");
                        return Err(e);
                    }
                    let delay = self.delay_for(attempt);
                    tracing::debug!(
                        operation,
                        attempt = attempt + 1,
                        max_attempts = budget,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "attempt failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
