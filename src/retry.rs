//! Retry & Backoff Policy.
//!
//! Pure: classifying an error and computing a delay never touches the
//! clock or the network. Callers (the Flow Scheduler, the Task Controller)
//! own the actual `tokio::time::sleep`.

use rand::Rng;
use std::time::Duration;

use crate::errors::EngineError;

/// Tuning knobs for one retry policy instance. The engine uses two of
/// these: one for step-level retry, one for task-level retry.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 5_000,
            max_delay_ms: 300_000,
            jitter_factor: 0.1,
        }
    }
}

/// Outcome of consulting the policy after an attempt failed.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryDecision {
    pub retry: bool,
    pub delay: Duration,
    pub reason: &'static str,
}

/// Decide whether `error`, having failed after `attempts_made` attempts,
/// should be retried under `config`, and if so after how long.
///
/// `attempts_made` counts the attempt that just failed (i.e. it is `1` the
/// first time this is called for a given step/task).
pub fn decide(error: &EngineError, attempts_made: u32, config: &RetryConfig) -> RetryDecision {
    if matches!(error, EngineError::Cancelled) {
        return RetryDecision { retry: false, delay: Duration::ZERO, reason: "cancelled" };
    }

    if !error.is_retryable() {
        return RetryDecision { retry: false, delay: Duration::ZERO, reason: "terminal error" };
    }

    if attempts_made >= config.max_attempts {
        return RetryDecision { retry: false, delay: Duration::ZERO, reason: "attempts exhausted" };
    }

    let delay = compute_delay(attempts_made, config);
    RetryDecision { retry: true, delay, reason: "retryable, attempts remain" }
}

/// `delay = min(max_delay, base_delay * 2^(attempts_made - 1))`, then
/// multiplied by a uniform random factor in `[1 - jitter, 1 + jitter]`.
fn compute_delay(attempts_made: u32, config: &RetryConfig) -> Duration {
    let exp = attempts_made.saturating_sub(1).min(32);
    let unjittered = config.base_delay_ms.saturating_mul(1u64 << exp);
    let capped = unjittered.min(config.max_delay_ms);

    let jitter = config.jitter_factor.clamp(0.0, 1.0);
    let factor = if jitter == 0.0 {
        1.0
    } else {
        rand::thread_rng().gen_range((1.0 - jitter)..=(1.0 + jitter))
    };

    let jittered_ms = (capped as f64 * factor).max(0.0).round() as u64;
    Duration::from_millis(jittered_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> RetryConfig {
        RetryConfig { max_attempts: 3, base_delay_ms: 1000, max_delay_ms: 10_000, jitter_factor: 0.0 }
    }

    #[test]
    fn terminal_errors_never_retry() {
        let err = EngineError::terminal("bad input");
        let decision = decide(&err, 1, &cfg());
        assert!(!decision.retry);
        assert_eq!(decision.reason, "terminal error");
    }

    #[test]
    fn cancelled_never_retries() {
        let decision = decide(&EngineError::Cancelled, 1, &cfg());
        assert!(!decision.retry);
        assert_eq!(decision.reason, "cancelled");
    }

    #[test]
    fn retryable_error_retries_until_max_attempts() {
        let err = EngineError::retryable("timeout");
        assert!(decide(&err, 1, &cfg()).retry);
        assert!(decide(&err, 2, &cfg()).retry);
        assert!(!decide(&err, 3, &cfg()).retry);
        assert_eq!(decide(&err, 3, &cfg()).reason, "attempts exhausted");
    }

    #[test]
    fn delay_doubles_exponentially_without_jitter() {
        let err = EngineError::retryable("x");
        let c = cfg();
        assert_eq!(decide(&err, 1, &c).delay, Duration::from_millis(1000));
        assert_eq!(decide(&err, 2, &c).delay, Duration::from_millis(2000));
    }

    #[test]
    fn delay_is_capped_at_max_delay() {
        let err = EngineError::retryable("x");
        let c = RetryConfig { max_attempts: 10, base_delay_ms: 1000, max_delay_ms: 3000, jitter_factor: 0.0 };
        assert_eq!(decide(&err, 5, &c).delay, Duration::from_millis(3000));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let err = EngineError::retryable("x");
        let c = RetryConfig { max_attempts: 10, base_delay_ms: 1000, max_delay_ms: 10_000, jitter_factor: 0.2 };
        for _ in 0..200 {
            let d = decide(&err, 1, &c).delay.as_millis();
            assert!((800..=1200).contains(&d), "delay {d} out of jitter bounds");
        }
    }
}
