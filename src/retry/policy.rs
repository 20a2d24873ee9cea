use std::time::Duration;

use rand::Rng;

use crate::provider::ProviderError;

/// A chunk gets at most this many attempts before the worker gives up.
pub const MAX_ATTEMPTS: u32 = 5;

const BASE_DELAY_MS: u64 = 1_000;
const MAX_DELAY_MS: u64 = 30_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry(Duration),
    GiveUp,
}

/// Decide whether a failed attempt should be retried.
///
/// `attempt` is the number of attempts already made (1 after the first
/// failure). Pure apart from the jitter draw: the decision depends only on
/// the attempt count and the error's class.
pub fn decide(attempt: u32, error: &ProviderError) -> RetryDecision {
    if attempt >= MAX_ATTEMPTS || !error.is_retryable() {
        return RetryDecision::GiveUp;
    }
    RetryDecision::Retry(backoff_delay(attempt.saturating_sub(1)))
}

/// `min(30s, 1s · 2^exponent · (1 + rand[0, 0.1)))`.
pub fn backoff_delay(exponent: u32) -> Duration {
    let base = BASE_DELAY_MS.saturating_mul(1u64 << exponent.min(15));
    let jitter = 1.0 + rand::thread_rng().gen_range(0.0..0.1);
    let delayed = (base as f64 * jitter).min(MAX_DELAY_MS as f64);
    Duration::from_millis(delayed as u64)
}
