//! Persisted request counter that keeps us under the market data API's limits
//!
//! The state lives in the key-value store rather than in memory so restarting
//! the app does not hand us a fresh budget.

use crate::{
    constants::{RATE_LIMIT_CACHE_KEY, RATE_LIMIT_MAX_REQUESTS, RATE_LIMIT_WINDOW_SECS},
    error::StorageError,
    storage::KeyValueStore,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Persisted rate-limit window
///
/// `count` only means something while `now` is within
/// `[timestamp, timestamp + window)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitState {
    /// Window start (epoch milliseconds)
    pub timestamp: i64,
    pub count: u32,
    #[serde(rename = "isLimited")]
    pub is_limited: bool,
}

impl RateLimitState {
    fn fresh(now_ms: i64, count: u32) -> Self {
        Self {
            timestamp: now_ms,
            count,
            is_limited: false,
        }
    }
}

/// Client-side rate limiter for the market data API
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn KeyValueStore>,
    key: String,
    window: Duration,
    max_requests: u32,
}

impl RateLimiter {
    /// Creates a limiter with the default window and threshold
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_limits(
            store,
            Duration::from_secs(RATE_LIMIT_WINDOW_SECS),
            RATE_LIMIT_MAX_REQUESTS,
        )
    }

    pub fn with_limits(store: Arc<dyn KeyValueStore>, window: Duration, max_requests: u32) -> Self {
        Self {
            store,
            key: RATE_LIMIT_CACHE_KEY.to_string(),
            window,
            max_requests,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Returns true if outbound requests should be held back
    ///
    /// An expired limit is cleared as a side effect; a window that has used
    /// up its budget is flipped to limited.
    pub async fn is_limited(&self) -> bool {
        let Some(state) = self.state().await else {
            return false;
        };
        let now = now_ms();

        if state.is_limited {
            if self.in_window(&state, now) {
                return true;
            }
            tracing::info!("Rate limit window elapsed, clearing limit");
            self.reset().await;
            return false;
        }

        if self.in_window(&state, now) && state.count >= self.max_requests {
            tracing::warn!(
                count = state.count,
                max_requests = self.max_requests,
                "Request budget exhausted for this window"
            );
            self.mark_limited().await;
            return true;
        }

        false
    }

    /// Counts one outbound request, opening a new window if the last one expired
    pub async fn track_call(&self) {
        let now = now_ms();
        let next = match self.state().await {
            Some(state) if self.in_window(&state, now) => RateLimitState {
                count: state.count.saturating_add(1),
                ..state
            },
            _ => RateLimitState::fresh(now, 1),
        };
        self.write(&next).await;
    }

    /// Forces the limited state, e.g. after the API answered 429
    pub async fn mark_limited(&self) {
        let state = RateLimitState {
            timestamp: now_ms(),
            count: self.max_requests,
            is_limited: true,
        };
        self.write(&state).await;
    }

    /// Starts a fresh, unlimited window
    pub async fn reset(&self) {
        self.write(&RateLimitState::fresh(now_ms(), 0)).await;
    }

    /// Current persisted state; unreadable or corrupt state reads as `None`
    pub async fn state(&self) -> Option<RateLimitState> {
        match self.read().await {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(error = %e, key = %self.key, "Failed to read rate limit state");
                None
            }
        }
    }

    async fn read(&self) -> Result<Option<RateLimitState>, StorageError> {
        match self.store.get(&self.key).await? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn write(&self, state: &RateLimitState) {
        let result = match serde_json::to_string(state) {
            Ok(json) => self.store.set(&self.key, &json).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = result {
            tracing::warn!(error = %e, key = %self.key, "Failed to write rate limit state");
        }
    }

    fn in_window(&self, state: &RateLimitState, now_ms: i64) -> bool {
        let elapsed = now_ms - state.timestamp;
        (0..self.window.as_millis() as i64).contains(&elapsed)
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
