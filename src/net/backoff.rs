//! Reconnect delay schedule for the socket link.
//!
//! DESIGN
//! ======
//! Exponential backoff: the base delay starts at `initial`, doubles after
//! every failed attempt and is capped at `max`. Each sleep is the base delay
//! scaled by a random factor in `[1 - jitter, 1 + jitter]`, still capped at
//! `max`. A successful connect resets the schedule.

use std::time::Duration;

use rand::Rng;

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(1000);
pub const DEFAULT_RECONNECT_DELAY_MAX: Duration = Duration::from_millis(5000);
pub const DEFAULT_JITTER: f64 = 0.5;

/// Parameters of the reconnect schedule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
    /// Randomization factor in `[0, 1]`.
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: DEFAULT_RECONNECT_DELAY,
            max: DEFAULT_RECONNECT_DELAY_MAX,
            jitter: DEFAULT_JITTER,
        }
    }
}

/// Mutable position in a [`BackoffPolicy`] schedule.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    current: Duration,
    attempts: u32,
}

impl Backoff {
    #[must_use]
    pub fn new(policy: BackoffPolicy) -> Self {
        let policy = BackoffPolicy {
            max: policy.max.max(policy.initial),
            jitter: if policy.jitter.is_finite() { policy.jitter.clamp(0.0, 1.0) } else { 0.0 },
            ..policy
        };
        Self { policy, current: policy.initial, attempts: 0 }
    }

    /// Failed attempts since the last reset.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Base delay for the next attempt, advancing the schedule.
    pub fn next_base(&mut self) -> Duration {
        let base = self.current;
        self.current = self.current.saturating_mul(2).min(self.policy.max);
        self.attempts = self.attempts.saturating_add(1);
        base
    }

    /// Jittered delay for the next attempt, advancing the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let unit = rand::rng().random_range(-1.0..=1.0);
        self.next_delay_with(unit)
    }

    /// Jittered delay with an explicit random draw `unit` in `[-1, 1]`.
    pub fn next_delay_with(&mut self, unit: f64) -> Duration {
        let base = self.next_base();
        let factor = 1.0 + self.policy.jitter * unit.clamp(-1.0, 1.0);
        base.mul_f64(factor.max(0.0)).min(self.policy.max)
    }

    pub fn reset(&mut self) {
        self.current = self.policy.initial;
        self.attempts = 0;
    }
}

#[cfg(test)]
#[path = "backoff_test.rs"]
mod tests;
