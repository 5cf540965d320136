//! Retry/backoff controller with a per-subject circuit breaker
//!
//! **Backoff Strategy:**
//! - Delay for attempt `n` (0-based): `min(base * 2^n, cap)`
//! - Defaults: base 1000ms, cap 4000ms, 3 attempts
//!
//! Once a subject has used up `max_retries` attempts the breaker is open and
//! no automatic fetch happens until `reset` (explicit profile refresh or
//! sign-out). The controller only computes policy; it never touches the network.

use crate::config::RetryConfig;
use crate::model::SubjectId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Per-subject retry bookkeeping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryState {
    pub attempts: u32,
    pub last_attempt_at: Instant,
}

pub struct RetryController {
    policy: RetryConfig,
    states: Mutex<HashMap<SubjectId, RetryState>>,
}

impl RetryController {
    pub fn new(policy: RetryConfig) -> Self {
        Self {
            policy,
            states: Mutex::new(HashMap::new()),
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.policy.max_retries
    }

    /// False once the subject has used its whole retry budget
    pub fn should_retry(&self, subject: &SubjectId) -> bool {
        self.attempts(subject) < self.policy.max_retries
    }

    /// False while the backoff window after the last failed attempt is still open
    pub fn ready(&self, subject: &SubjectId) -> bool {
        match self.states.lock().get(subject) {
            None => true,
            Some(state) => {
                let window = self.backoff_delay(state.attempts.saturating_sub(1));
                Instant::now() >= state.last_attempt_at + window
            }
        }
    }

    /// Record a failed attempt, returning the 1-based attempt number
    pub fn record_attempt(&self, subject: &SubjectId) -> u32 {
        let mut states = self.states.lock();
        let state = states.entry(subject.clone()).or_insert(RetryState {
            attempts: 0,
            last_attempt_at: Instant::now(),
        });
        state.attempts = state.attempts.saturating_add(1);
        state.last_attempt_at = Instant::now();

        if state.attempts >= self.policy.max_retries {
            tracing::warn!(
                subject = %subject,
                attempts = state.attempts,
                "Profile fetch retry budget exhausted, circuit open"
            );
        } else {
            tracing::debug!(subject = %subject, attempt = state.attempts, "Profile fetch attempt failed");
        }
        state.attempts
    }

    /// Close the breaker and forget the subject's history
    pub fn reset(&self, subject: &SubjectId) {
        if self.states.lock().remove(subject).is_some() {
            tracing::debug!(subject = %subject, "Retry state reset");
        }
    }

    pub fn attempts(&self, subject: &SubjectId) -> u32 {
        self.states.lock().get(subject).map(|s| s.attempts).unwrap_or(0)
    }

    pub fn state(&self, subject: &SubjectId) -> Option<RetryState> {
        self.states.lock().get(subject).copied()
    }

    /// `min(base * 2^attempt, cap)`
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let delay_ms = self
            .policy
            .base_delay_ms
            .saturating_mul(factor)
            .min(self.policy.max_delay_ms);
        Duration::from_millis(delay_ms)
    }

    /// Delay before the next automatic attempt, if the breaker is still closed
    pub fn next_delay(&self, subject: &SubjectId) -> Option<Duration> {
        let attempts = self.attempts(subject);
        if attempts == 0 || attempts >= self.policy.max_retries {
            return None;
        }
        Some(self.backoff_delay(attempts - 1))
    }
}
