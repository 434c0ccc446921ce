//! Market data fetcher: cache, rate limit, retry and fallback in one call
//!
//! ```text
//! fetch_market_data(force)
//!     ├─ !force && fresh cache ─────────────► Cache
//!     ├─ rate limited ──► stale cache ──────► StaleCache
//!     │                   └─ none ──────────► Fallback
//!     └─ track call ─► provider (timeout, retry w/ backoff)
//!             ├─ ok ─► save cache ──────────► Live
//!             └─ err ─► (429? mark limited) ─► stale cache / Fallback
//! ```

use crate::{
    cache::QuoteCache,
    constants::REQUEST_TIMEOUT_SECS,
    error::ProviderError,
    fallback::demo_quotes,
    provider::MarketDataProvider,
    rate_limit::RateLimiter,
    retry::RetryPolicy,
    storage::KeyValueStore,
    types::{DataSource, Quote},
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;

/// Result of a fetch, tagged with where the quotes came from
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOutcome {
    pub quotes: Vec<Quote>,
    pub source: DataSource,
}

impl FetchOutcome {
    fn new(quotes: Vec<Quote>, source: DataSource) -> Self {
        Self { quotes, source }
    }
}

/// Fetches the market listing without ever failing
pub struct MarketDataFetcher {
    provider: Arc<dyn MarketDataProvider>,
    cache: QuoteCache,
    rate_limiter: RateLimiter,
    retry: RetryPolicy,
    request_timeout: Duration,
    fallback: Vec<Quote>,
}

impl MarketDataFetcher {
    /// Creates a fetcher with default cache, limiter and retry settings on `store`
    pub fn new(provider: Arc<dyn MarketDataProvider>, store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_parts(
            provider,
            QuoteCache::new(store.clone()),
            RateLimiter::new(store),
            RetryPolicy::fetch(),
        )
    }

    pub fn with_parts(
        provider: Arc<dyn MarketDataProvider>,
        cache: QuoteCache,
        rate_limiter: RateLimiter,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            provider,
            cache,
            rate_limiter,
            retry,
            request_timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
            fallback: demo_quotes(),
        }
    }

    /// Upper bound for a single provider request
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Replaces the demo dataset served as a last resort
    pub fn with_fallback(mut self, quotes: Vec<Quote>) -> Self {
        self.fallback = quotes;
        self
    }

    pub fn cache(&self) -> &QuoteCache {
        &self.cache
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.provider_name()
    }

    /// Fetches the market listing
    ///
    /// Unless `force_refresh` is set an unexpired cache entry is returned
    /// without touching the network. Always resolves: live, cached, stale or
    /// demo data.
    pub async fn fetch_market_data(&self, force_refresh: bool) -> FetchOutcome {
        if !force_refresh {
            if let Some(quotes) = self.cache.load(false).await {
                tracing::debug!(count = quotes.len(), "Using cached market data");
                return FetchOutcome::new(quotes, DataSource::Cache);
            }
        }

        if self.rate_limiter.is_limited().await {
            tracing::info!("Rate limited, using fallback data");
            return self.degrade().await;
        }

        self.rate_limiter.track_call().await;

        match self.fetch_with_retry().await {
            Ok(quotes) => {
                self.cache.save(&quotes).await;
                FetchOutcome::new(quotes, DataSource::Live)
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    provider = self.provider.provider_name(),
                    "Error fetching market data"
                );
                if e.is_rate_limit() {
                    tracing::warn!("Rate limit exceeded - marking as limited");
                    self.rate_limiter.mark_limited().await;
                }
                self.degrade().await
            }
        }
    }

    /// Stale cache if we have one, demo data otherwise
    async fn degrade(&self) -> FetchOutcome {
        match self.cache.load(true).await {
            Some(quotes) => FetchOutcome::new(quotes, DataSource::StaleCache),
            None => FetchOutcome::new(self.fallback.clone(), DataSource::Fallback),
        }
    }

    /// Calls the provider with a timeout, retrying with exponential backoff
    ///
    /// A rate-limit answer ends the loop immediately; retrying into a 429
    /// only extends the ban.
    async fn fetch_with_retry(&self) -> Result<Vec<Quote>, ProviderError> {
        let start = Instant::now();
        let mut attempt = 0;

        loop {
            let result = match tokio::time::timeout(
                self.request_timeout,
                self.provider.fetch_markets(),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout),
            };

            match result {
                Ok(quotes) => {
                    tracing::debug!(
                        count = quotes.len(),
                        provider = self.provider.provider_name(),
                        latency_ms = start.elapsed().as_millis() as u64,
                        "Successfully fetched market data"
                    );
                    return Ok(quotes);
                }
                Err(e) if e.is_rate_limit() || attempt >= self.retry.max_retries => {
                    return Err(e);
                }
                Err(e) => {
                    let delay = self.retry.delay_for(attempt);
                    attempt += 1;
                    tracing::warn!(
                        attempt = attempt,
                        max_retries = self.retry.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Failed to fetch market data, retrying"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}
