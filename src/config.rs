//! Runtime configuration
//!
//! Defaults come from [`constants`](crate::constants); hosts override them in
//! code with the `with_*` builders or through the environment:
//!
//! - `MARKET_SYNC_API_URL`: market data REST base URL
//! - `MARKET_SYNC_STREAM_URL`: ticker stream WebSocket URL
//! - `MARKET_SYNC_REFRESH_INTERVAL_SECS`: passive sync interval
//! - `MARKET_SYNC_CACHE_DIR`: directory for the persisted cache and rate-limit state

use crate::{
    constants::{
        CACHE_EXPIRY_SECS, COINGECKO_API_URL, FRESHNESS_WINDOW_SECS, RATE_LIMIT_MAX_REQUESTS,
        RATE_LIMIT_WINDOW_SECS, REFRESH_INTERVAL_SECS, REQUEST_TIMEOUT_SECS,
        STREAM_LIVENESS_SECS, STREAM_LONG_RECONNECT_MS, STREAM_PING_INTERVAL_SECS, STREAM_TOP_N,
        SYNC_DEBOUNCE_MS, TICKER_STREAM_URL,
    },
    retry::RetryPolicy,
};
use std::path::PathBuf;
use std::time::Duration;

/// REST fetch, cache and rate-limit settings
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub api_url: String,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    pub cache_expiry: Duration,
    pub rate_limit_window: Duration,
    pub rate_limit_max_requests: u32,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            api_url: COINGECKO_API_URL.to_string(),
            request_timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
            retry: RetryPolicy::fetch(),
            cache_expiry: Duration::from_secs(CACHE_EXPIRY_SECS),
            rate_limit_window: Duration::from_secs(RATE_LIMIT_WINDOW_SECS),
            rate_limit_max_requests: RATE_LIMIT_MAX_REQUESTS,
        }
    }
}

/// Ticker stream settings
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub url: String,
    /// Interval between client heartbeats
    pub ping_interval: Duration,
    /// Silence longer than this forces a reconnect
    pub liveness_timeout: Duration,
    /// Bound on the WebSocket handshake
    pub connect_timeout: Duration,
    /// Quick reconnect attempts
    pub reconnect: RetryPolicy,
    /// Wait once the quick attempts are used up
    pub long_reconnect_delay: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            url: TICKER_STREAM_URL.to_string(),
            ping_interval: Duration::from_secs(STREAM_PING_INTERVAL_SECS),
            liveness_timeout: Duration::from_secs(STREAM_LIVENESS_SECS),
            connect_timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
            reconnect: RetryPolicy::stream_reconnect(),
            long_reconnect_delay: Duration::from_millis(STREAM_LONG_RECONNECT_MS),
        }
    }
}

/// Orchestrator settings
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Passive sync cadence while active
    pub refresh_interval: Duration,
    /// Newest quote younger than this makes a passive sync a no-op
    pub freshness_window: Duration,
    /// Quiet period coalescing passive sync triggers
    pub debounce: Duration,
    /// Re-sync schedule after the stream drops
    pub resync: RetryPolicy,
    /// Number of top quotes to stream live
    pub top_n: usize,
    /// Whether the host is in the foreground when the orchestrator starts
    pub start_active: bool,
    /// Where to persist cache and rate-limit state; `None` keeps them in memory
    pub cache_dir: Option<PathBuf>,
    pub fetch: FetchConfig,
    pub stream: StreamConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(REFRESH_INTERVAL_SECS),
            freshness_window: Duration::from_secs(FRESHNESS_WINDOW_SECS),
            debounce: Duration::from_millis(SYNC_DEBOUNCE_MS),
            resync: RetryPolicy::resync(),
            top_n: STREAM_TOP_N,
            start_active: true,
            cache_dir: None,
            fetch: FetchConfig::default(),
            stream: StreamConfig::default(),
        }
    }
}

impl SyncConfig {
    /// Defaults with environment overrides applied
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("MARKET_SYNC_API_URL") {
            config.fetch.api_url = url;
        }
        if let Ok(url) = std::env::var("MARKET_SYNC_STREAM_URL") {
            config.stream.url = url;
        }
        if let Ok(raw) = std::env::var("MARKET_SYNC_REFRESH_INTERVAL_SECS") {
            match raw.parse::<u64>() {
                Ok(secs) if secs > 0 => config.refresh_interval = Duration::from_secs(secs),
                _ => tracing::warn!(
                    value = %raw,
                    "Ignoring invalid MARKET_SYNC_REFRESH_INTERVAL_SECS"
                ),
            }
        }
        if let Ok(dir) = std::env::var("MARKET_SYNC_CACHE_DIR") {
            config.cache_dir = Some(PathBuf::from(dir));
        }

        config
    }

    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn with_top_n(mut self, top_n: usize) -> Self {
        self.top_n = top_n;
        self
    }

    pub fn with_start_active(mut self, active: bool) -> Self {
        self.start_active = active;
        self
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    pub fn with_fetch(mut self, fetch: FetchConfig) -> Self {
        self.fetch = fetch;
        self
    }

    pub fn with_stream(mut self, stream: StreamConfig) -> Self {
        self.stream = stream;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.refresh_interval, Duration::from_secs(60));
        assert_eq!(config.debounce, Duration::from_millis(500));
        assert_eq!(config.top_n, 10);
        assert!(config.start_active);
        assert_eq!(config.fetch.request_timeout, Duration::from_secs(10));
        assert_eq!(config.fetch.rate_limit_max_requests, 5);
        assert_eq!(config.stream.liveness_timeout, Duration::from_secs(15));
        assert_eq!(config.stream.ping_interval, Duration::from_secs(10));
    }

    #[test]
    fn test_builders() {
        let config = SyncConfig::default()
            .with_refresh_interval(Duration::from_secs(5))
            .with_top_n(3)
            .with_start_active(false)
            .with_cache_dir("/tmp/market-sync");
        assert_eq!(config.refresh_interval, Duration::from_secs(5));
        assert_eq!(config.top_n, 3);
        assert!(!config.start_active);
        assert_eq!(config.cache_dir, Some(PathBuf::from("/tmp/market-sync")));
    }
}
