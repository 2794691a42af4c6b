//! Per-target retry backoff
//!
//! Each target that fails with a transient error gets its own exponential
//! backoff sequence. A successful convergence resets it.

use crate::domain::Target;
use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use dashmap::DashMap;
use std::time::Duration;

/// Backoff parameters
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// First delay after a failure
    pub initial_delay: Duration,
    /// Upper bound for any delay
    pub max_delay: Duration,
    /// Growth factor between consecutive failures
    pub multiplier: f64,
    /// Jitter as a fraction of the delay (0.0 = deterministic)
    pub jitter: f64,
    /// Recheck delay while a dependent is still rolling out. Rollout
    /// progress is status-only and never passes the watch filters.
    pub progress_recheck: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300),
            multiplier: 2.0,
            jitter: 0.1,
            progress_recheck: Duration::from_secs(15),
        }
    }
}

impl RetryConfig {
    fn build(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_delay)
            .with_max_interval(self.max_delay)
            .with_multiplier(self.multiplier)
            .with_randomization_factor(self.jitter)
            .with_max_elapsed_time(None)
            .build()
    }
}

/// Tracks the backoff sequence of every failing target
pub struct RetryTracker {
    config: RetryConfig,
    state: DashMap<Target, ExponentialBackoff>,
}

impl RetryTracker {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            state: DashMap::new(),
        }
    }

    pub fn progress_recheck(&self) -> Duration {
        self.config.progress_recheck
    }

    /// Delay before the next attempt for `target`
    pub fn next_delay(&self, target: &Target) -> Duration {
        let mut entry = self
            .state
            .entry(target.clone())
            .or_insert_with(|| self.config.build());
        entry.next_backoff().unwrap_or(self.config.max_delay)
    }

    /// Forget the failure history of `target`
    pub fn reset(&self, target: &Target) {
        self.state.remove(target);
    }

    /// Number of targets currently backing off
    pub fn tracked(&self) -> usize {
        self.state.len()
    }
}

impl std::fmt::Debug for RetryTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryTracker")
            .field("config", &self.config)
            .field("tracked", &self.state.len())
            .finish()
    }
}

impl Default for RetryTracker {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deterministic() -> RetryTracker {
        RetryTracker::new(RetryConfig {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
            multiplier: 2.0,
            jitter: 0.0,
            ..RetryConfig::default()
        })
    }

    #[test]
    fn test_delays_grow_and_cap() {
        let tracker = deterministic();
        let t = Target::new("ns", "ocs");

        let delays: Vec<u64> = (0..6).map(|_| tracker.next_delay(&t).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 8, 8]);
    }

    #[test]
    fn test_reset_restarts_sequence() {
        let tracker = deterministic();
        let t = Target::new("ns", "ocs");

        tracker.next_delay(&t);
        tracker.next_delay(&t);
        tracker.reset(&t);
        assert_eq!(tracker.tracked(), 0);
        assert_eq!(tracker.next_delay(&t), Duration::from_secs(1));
    }

    #[test]
    fn test_targets_are_independent() {
        let tracker = deterministic();
        let a = Target::new("ns", "a");
        let b = Target::new("ns", "b");

        tracker.next_delay(&a);
        tracker.next_delay(&a);
        assert_eq!(tracker.next_delay(&b), Duration::from_secs(1));
        assert_eq!(tracker.tracked(), 2);
    }
}
