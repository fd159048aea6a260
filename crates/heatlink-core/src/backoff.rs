// ── Poll backoff ──
//
// Consecutive-failure bookkeeping for the polling loop. Separate from the
// per-chunk retry inside the device client: this decides how long to wait
// between whole cycles and when to stop polling for a while.

use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Interval between cycles while healthy.
    pub base_interval: Duration,
    /// Cap for the failure-scaled interval.
    pub max_interval: Duration,
    /// Consecutive failures that trigger extended backoff.
    pub failure_threshold: u32,
    pub extended_backoff: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_secs(30),
            max_interval: Duration::from_secs(300),
            failure_threshold: 5,
            extended_backoff: Duration::from_secs(300),
        }
    }
}

/// Failure history since the last successful cycle or write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FailureWindow {
    pub consecutive_failures: u32,
    pub last_failure_at: Option<Instant>,
    pub extended_backoff_until: Option<Instant>,
}

impl FailureWindow {
    pub fn record_success(&mut self) {
        *self = Self::default();
    }

    /// Count one failure. Returns `true` when this failure starts an
    /// extended backoff window.
    pub fn record_failure(&mut self, now: Instant, policy: &BackoffPolicy) -> bool {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_failure_at = Some(now);

        if self.consecutive_failures >= policy.failure_threshold && !self.in_extended_backoff(now) {
            self.extended_backoff_until = Some(now + policy.extended_backoff);
            return true;
        }
        false
    }

    pub fn in_extended_backoff(&self, now: Instant) -> bool {
        self.extended_backoff_until.is_some_and(|until| now < until)
    }

    /// Time left in the extended backoff window, if any.
    pub fn backoff_remaining(&self, now: Instant) -> Option<Duration> {
        self.extended_backoff_until
            .filter(|until| now < *until)
            .map(|until| until - now)
    }

    /// Delay before the next cycle: the base interval while healthy, else
    /// `min(2^(failures-1) * base, max)`.
    pub fn next_interval(&self, policy: &BackoffPolicy) -> Duration {
        if self.consecutive_failures == 0 {
            return policy.base_interval;
        }
        let exp = self.consecutive_failures.saturating_sub(1).min(31);
        policy
            .base_interval
            .saturating_mul(2u32.saturating_pow(exp))
            .min(policy.max_interval.max(policy.base_interval))
    }
}
