//! Bounded exponential backoff shared by the fetcher, the stream client and
//! the orchestrator's re-sync scheduling

use crate::constants::{
    FETCH_INITIAL_BACKOFF_MS, FETCH_MAX_RETRIES, RESYNC_INITIAL_BACKOFF_MS, RESYNC_MAX_BACKOFF_MS,
    STREAM_INITIAL_BACKOFF_MS, STREAM_LONG_RECONNECT_MS, STREAM_MAX_BACKOFF_MS,
    STREAM_MAX_RECONNECT_ATTEMPTS,
};
use std::time::Duration;

/// Exponential backoff: `initial_delay * multiplier^attempt`, capped at `max_delay`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts allowed after the first failure
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub multiplier: u32,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Market data requests: 2 retries, 5s then 10s
    pub fn fetch() -> Self {
        Self {
            max_retries: FETCH_MAX_RETRIES,
            initial_delay: Duration::from_millis(FETCH_INITIAL_BACKOFF_MS),
            multiplier: 2,
            max_delay: Duration::from_secs(60),
        }
    }

    /// Ticker stream reconnects: 2s, 4s, 8s
    pub fn stream_reconnect() -> Self {
        Self {
            max_retries: STREAM_MAX_RECONNECT_ATTEMPTS,
            initial_delay: Duration::from_millis(STREAM_INITIAL_BACKOFF_MS),
            multiplier: 2,
            max_delay: Duration::from_millis(STREAM_MAX_BACKOFF_MS),
        }
    }

    /// Orchestrator re-sync after a stream drop: 5s doubling up to 30s
    pub fn resync() -> Self {
        Self {
            max_retries: u32::MAX,
            initial_delay: Duration::from_millis(RESYNC_INITIAL_BACKOFF_MS),
            multiplier: 2,
            max_delay: Duration::from_millis(RESYNC_MAX_BACKOFF_MS),
        }
    }

    /// Delay before retry number `attempt`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.saturating_pow(attempt);
        self.initial_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Reconnect schedule for a long-lived connection
///
/// Walks the quick attempts of its policy, then waits `long_delay` and starts
/// over. A successful connection calls [`reset`](Self::reset).
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    policy: RetryPolicy,
    long_delay: Duration,
    attempt: u32,
}

impl ReconnectBackoff {
    pub fn new(policy: RetryPolicy, long_delay: Duration) -> Self {
        Self {
            policy,
            long_delay,
            attempt: 0,
        }
    }

    /// Delay before the next reconnect
    pub fn next_delay(&mut self) -> Duration {
        if self.attempt < self.policy.max_retries {
            self.attempt += 1;
            self.policy.delay_for(self.attempt)
        } else {
            self.attempt = 0;
            self.long_delay
        }
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self::new(
            RetryPolicy::stream_reconnect(),
            Duration::from_millis(STREAM_LONG_RECONNECT_MS),
        )
    }
}
