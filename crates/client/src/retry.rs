//! Attempt classification and backoff.

use std::time::{Duration, Instant};

use geos3_protocol::TransportError;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::ClientError;

/// Extra attempts granted to a content-verification mismatch.
pub const MISMATCH_RETRIES: u32 = 1;

/// Retry limits and backoff shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per operation, the first one included.
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Multiplier applied to the delay after each failed attempt.
    pub backoff_factor: f64,
    /// Fraction of the delay randomised in either direction (0.25 = ±25%).
    pub jitter: f64,
    /// Wall-clock limit across all attempts of one operation.
    pub max_elapsed_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_delay_ms: 250,
            max_delay_ms: 15_000,
            backoff_factor: 2.0,
            jitter: 0.25,
            max_elapsed_ms: 300_000,
        }
    }
}

impl RetryConfig {
    /// Immediate retries, for tests and latency-insensitive tooling.
    pub fn no_delay(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay_ms: 0,
            max_delay_ms: 0,
            jitter: 0.0,
            ..Self::default()
        }
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn max_elapsed(&self) -> Duration {
        Duration::from_millis(self.max_elapsed_ms)
    }
}

/// Outcome class of one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptClass {
    Success,
    RetryableTransient,
    RetryableAuth,
    NonRetryable,
    ChecksumMismatch,
}

impl AttemptClass {
    pub fn of<T>(result: &Result<T, ClientError>, retry_safe: bool) -> Self {
        match result {
            Ok(_) => Self::Success,
            Err(e) => Self::of_error(e, retry_safe),
        }
    }

    /// Classifies a failed attempt.
    ///
    /// A transport failure of a request that is not safe to repeat is only
    /// retried when it proves the request never reached the server. Throttling
    /// and 5xx responses (501 is a rejection) are retried for every request:
    /// the server answered without applying it.
    pub fn of_error(error: &ClientError, retry_safe: bool) -> Self {
        match error {
            ClientError::Transport(t) => {
                if retry_safe || matches!(t, TransportError::Connect(_)) {
                    Self::RetryableTransient
                } else {
                    Self::NonRetryable
                }
            }
            ClientError::Server(_) | ClientError::Throttled { .. } => Self::RetryableTransient,
            ClientError::AuthExpired(_) => Self::RetryableAuth,
            ClientError::ChecksumMismatch { .. } => Self::ChecksumMismatch,
            ClientError::Signing(_)
            | ClientError::Protocol(_)
            | ClientError::RemoteRejection(_)
            | ClientError::NoHealthyEndpoint
            | ClientError::SessionAborted
            | ClientError::Config(_) => Self::NonRetryable,
        }
    }

    pub fn is_retryable(self) -> bool {
        !matches!(self, Self::Success | Self::NonRetryable)
    }
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    RetryNow,
    Fail,
}

/// Attempt bookkeeping for one logical operation (a request or a part).
#[derive(Debug, Clone)]
pub struct AttemptBudget {
    attempts: u32,
    mismatches: u32,
    started: Instant,
}

impl Default for AttemptBudget {
    fn default() -> Self {
        Self::new()
    }
}

impl AttemptBudget {
    pub fn new() -> Self {
        Self {
            attempts: 0,
            mismatches: 0,
            started: Instant::now(),
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn mismatches(&self) -> u32 {
        self.mismatches
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn record_attempt(&mut self) {
        self.attempts += 1;
    }

    pub fn record_mismatch(&mut self) {
        self.mismatches += 1;
    }
}

/// Pure retry decision logic shared by the request pipeline and the
/// transfer engine's per-part loop.
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Decides the next step after `error`. `budget` must already count
    /// the failed attempt (and the mismatch, if it was one).
    pub fn decide(
        &self,
        error: &ClientError,
        retry_safe: bool,
        budget: &AttemptBudget,
    ) -> RetryDecision {
        let class = AttemptClass::of_error(error, retry_safe);
        if !class.is_retryable() {
            return RetryDecision::Fail;
        }

        match class {
            AttemptClass::ChecksumMismatch => {
                // The mismatch retry is granted on top of the attempt limit.
                if budget.mismatches() <= MISMATCH_RETRIES
                    && budget.attempts() < self.config.max_attempts + MISMATCH_RETRIES
                {
                    RetryDecision::RetryNow
                } else {
                    RetryDecision::Fail
                }
            }
            _ if budget.attempts()
                >= self.config.max_attempts + budget.mismatches().min(MISMATCH_RETRIES) =>
            {
                RetryDecision::Fail
            }
            AttemptClass::RetryableAuth => RetryDecision::RetryNow,
            _ => {
                let mut delay = self.delay_for_attempt(budget.attempts());
                if let ClientError::Throttled {
                    retry_after: Some(after),
                    ..
                } = error
                {
                    delay = delay.max(*after);
                }
                if budget.elapsed() + delay > self.config.max_elapsed() {
                    RetryDecision::Fail
                } else if delay.is_zero() {
                    RetryDecision::RetryNow
                } else {
                    RetryDecision::RetryAfter(delay)
                }
            }
        }
    }

    /// Backoff before the retry that follows failed attempt number `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let base = self.config.initial_delay().as_secs_f64()
            * self.config.backoff_factor.max(1.0).powi(exponent);
        let capped = base.min(self.config.max_delay().as_secs_f64());
        if !capped.is_finite() || capped <= 0.0 {
            return Duration::ZERO;
        }
        let spread = capped * self.config.jitter.clamp(0.0, 1.0);
        let offset = if spread > 0.0 {
            rand::thread_rng().gen_range(-spread..=spread)
        } else {
            0.0
        };
        Duration::from_secs_f64((capped + offset).max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RemoteError;

    fn remote(status: u16, code: &str) -> RemoteError {
        RemoteError {
            status,
            code: code.into(),
            message: String::new(),
            request_id: None,
        }
    }

    fn budget_after(attempts: u32) -> AttemptBudget {
        let mut budget = AttemptBudget::new();
        for _ in 0..attempts {
            budget.record_attempt();
        }
        budget
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(RetryConfig::no_delay(max_attempts))
    }

    #[test]
    fn classification() {
        let reset = ClientError::Transport(TransportError::Reset("x".into()));
        assert_eq!(
            AttemptClass::of_error(&reset, true),
            AttemptClass::RetryableTransient
        );
        assert_eq!(
            AttemptClass::of_error(&reset, false),
            AttemptClass::NonRetryable
        );

        let refused = ClientError::Transport(TransportError::Connect("x".into()));
        assert_eq!(
            AttemptClass::of_error(&refused, false),
            AttemptClass::RetryableTransient
        );

        let auth = ClientError::AuthExpired(remote(403, "RequestTimeTooSkewed"));
        assert_eq!(
            AttemptClass::of_error(&auth, false),
            AttemptClass::RetryableAuth
        );

        let denied = ClientError::RemoteRejection(remote(403, "AccessDenied"));
        assert_eq!(
            AttemptClass::of_error(&denied, true),
            AttemptClass::NonRetryable
        );

        let mismatch = ClientError::ChecksumMismatch {
            expected: "a".into(),
            actual: "b".into(),
        };
        assert_eq!(
            AttemptClass::of_error(&mismatch, true),
            AttemptClass::ChecksumMismatch
        );

        let ok: Result<(), ClientError> = Ok(());
        assert_eq!(AttemptClass::of(&ok, true), AttemptClass::Success);
    }

    #[test]
    fn server_refusals_are_retried_for_unsafe_requests() {
        let slow_down = ClientError::Throttled {
            error: remote(503, "SlowDown"),
            retry_after: None,
        };
        assert_eq!(
            AttemptClass::of_error(&slow_down, false),
            AttemptClass::RetryableTransient
        );
        let internal = ClientError::Server(remote(500, "InternalError"));
        assert_eq!(
            AttemptClass::of_error(&internal, false),
            AttemptClass::RetryableTransient
        );
        assert_eq!(
            policy(3).decide(&slow_down, false, &budget_after(1)),
            RetryDecision::RetryNow
        );

        let not_implemented = ClientError::from_status(501, &Default::default(), b"");
        assert_eq!(
            AttemptClass::of_error(&not_implemented, false),
            AttemptClass::NonRetryable
        );
    }

    #[test]
    fn transient_retries_until_limit() {
        let policy = policy(3);
        let err = ClientError::Server(remote(500, "InternalError"));
        assert_eq!(
            policy.decide(&err, true, &budget_after(1)),
            RetryDecision::RetryNow
        );
        assert_eq!(
            policy.decide(&err, true, &budget_after(2)),
            RetryDecision::RetryNow
        );
        assert_eq!(
            policy.decide(&err, true, &budget_after(3)),
            RetryDecision::Fail
        );
    }

    #[test]
    fn non_retryable_fails_immediately() {
        let err = ClientError::RemoteRejection(remote(404, "NoSuchKey"));
        assert_eq!(
            policy(5).decide(&err, true, &budget_after(1)),
            RetryDecision::Fail
        );
    }

    #[test]
    fn mismatch_gets_exactly_one_extra_attempt() {
        let policy = policy(3);
        let err = ClientError::ChecksumMismatch {
            expected: "a".into(),
            actual: "b".into(),
        };
        let mut budget = budget_after(1);
        budget.record_mismatch();
        assert_eq!(policy.decide(&err, true, &budget), RetryDecision::RetryNow);

        budget.record_attempt();
        budget.record_mismatch();
        assert_eq!(policy.decide(&err, true, &budget), RetryDecision::Fail);
    }

    #[test]
    fn mismatch_retry_survives_exhausted_transient_budget() {
        let policy = policy(1);
        let err = ClientError::ChecksumMismatch {
            expected: "a".into(),
            actual: "b".into(),
        };
        let mut budget = budget_after(1);
        budget.record_mismatch();
        assert_eq!(policy.decide(&err, true, &budget), RetryDecision::RetryNow);
    }

    #[test]
    fn throttling_honors_retry_after() {
        let policy = policy(5);
        let err = ClientError::Throttled {
            error: remote(503, "SlowDown"),
            retry_after: Some(Duration::from_secs(2)),
        };
        assert_eq!(
            policy.decide(&err, true, &budget_after(1)),
            RetryDecision::RetryAfter(Duration::from_secs(2))
        );
    }

    #[test]
    fn elapsed_limit_stops_retries() {
        let policy = RetryPolicy::new(RetryConfig {
            max_elapsed_ms: 1_000,
            ..RetryConfig::no_delay(10)
        });
        let err = ClientError::Throttled {
            error: remote(503, "SlowDown"),
            retry_after: Some(Duration::from_secs(5)),
        };
        assert_eq!(
            policy.decide(&err, true, &budget_after(1)),
            RetryDecision::Fail
        );
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy::new(RetryConfig {
            jitter: 0.0,
            ..RetryConfig::default()
        });
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(250));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(20), Duration::from_secs(15));
    }

    #[test]
    fn backoff_jitter_stays_in_range() {
        let policy = RetryPolicy::default();
        for _ in 0..100 {
            let d = policy.delay_for_attempt(2);
            assert!(
                d >= Duration::from_millis(375) && d <= Duration::from_millis(625),
                "{d:?}"
            );
        }
    }

    #[test]
    fn config_defaults_from_empty_json() {
        let config: RetryConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, RetryConfig::default());
        let config: RetryConfig = serde_json::from_str(r#"{"max_attempts": 7}"#).unwrap();
        assert_eq!(config.max_attempts, 7);
        assert_eq!(config.initial_delay(), Duration::from_millis(250));
    }
}
