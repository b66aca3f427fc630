//! # Retry Utility
//!
//! A single injectable-sleep retry helper used by the batching and executor
//! modules around any operation that can raise [`CoreError::Transient`]
//! (§4.3.4). Sleep and the optional per-delay callback are injected so tests
//! can run the backoff schedule without real time passing.

use crate::error::CoreError;
use std::future::Future;
use std::time::Duration;

/// Backoff parameters for [`retry`].
#[derive(Debug, Clone, Copy)]
pub struct RetryOptions {
    /// Number of retries after the first attempt. Total attempts = retries + 1.
    pub retries: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    /// Apply up to ±50% jitter to each computed delay.
    pub jitter: bool,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            retries: 2,
            base_delay_ms: 200,
            multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Run `op`, retrying on [`CoreError::is_retryable`] errors per `opts`.
///
/// `sleep` is called with the computed delay between attempts; `on_delay` is
/// an optional observer invoked with `(attempt_index, delay)` before each
/// sleep, letting callers log or trace backoff without this function
/// depending on any particular observer trait.
pub async fn retry<F, Fut, T, S, SFut>(
    mut op: F,
    opts: RetryOptions,
    sleep: S,
    mut on_delay: impl FnMut(u32, Duration),
) -> Result<T, CoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CoreError>>,
    S: Fn(Duration) -> SFut,
    SFut: Future<Output = ()>,
{
    let total_attempts = opts.retries + 1;
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt + 1 < total_attempts && err.is_retryable() => {
                let delay = backoff_delay(opts, attempt);
                on_delay(attempt, delay);
                sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

fn backoff_delay(opts: RetryOptions, attempt: u32) -> Duration {
    let raw = opts.base_delay_ms as f64 * opts.multiplier.powi(attempt as i32);
    let millis = if opts.jitter {
        let jitter_factor = 1.0 + (deterministic_jitter(attempt) * 2.0 - 1.0) * 0.5;
        raw * jitter_factor
    } else {
        raw
    };
    Duration::from_millis(millis.max(0.0) as u64)
}

/// A cheap pseudo-random value in `[0, 1)` derived from the attempt index, so
/// jitter is reproducible in tests without pulling in `rand` for a single
/// scalar.
fn deterministic_jitter(attempt: u32) -> f64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    let mut hasher = DefaultHasher::new();
    attempt.hash(&mut hasher);
    (hasher.finish() % 1_000_000) as f64 / 1_000_000.0
}
