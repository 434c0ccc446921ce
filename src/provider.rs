//! Provider abstraction for fetching market listings from external APIs

use crate::{error::ProviderError, types::Quote};
use async_trait::async_trait;

/// Trait for market data providers
///
/// Implementations fetch the current top-of-market listing from a REST source
/// (CoinGecko in production). Retries, caching and rate limiting are layered
/// on top by [`MarketDataFetcher`](crate::fetcher::MarketDataFetcher); a
/// provider makes exactly one request per call.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Fetches the market listing, ordered by market cap
    ///
    /// # Returns
    /// The quotes in rank order, or an error if the request fails. A 429
    /// answer must be reported as [`ProviderError::RateLimitExceeded`].
    async fn fetch_markets(&self) -> Result<Vec<Quote>, ProviderError>;

    /// Returns the name of this provider
    fn provider_name(&self) -> &'static str;
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Mock provider for testing
    ///
    /// Scripted responses are served first, in order; after that every call
    /// gets the standing quotes, or an error if none are set.
    #[derive(Clone, Default)]
    pub struct MockProvider {
        scripted: Arc<Mutex<VecDeque<Result<Vec<Quote>, ProviderError>>>>,
        standing: Arc<Mutex<Option<Vec<Quote>>>>,
        latency: Arc<Mutex<Option<Duration>>>,
        call_count: Arc<Mutex<usize>>,
    }

    impl MockProvider {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_quotes(quotes: Vec<Quote>) -> Self {
            let provider = Self::new();
            provider.set_quotes(quotes);
            provider
        }

        pub fn set_quotes(&self, quotes: Vec<Quote>) {
            *self.standing.lock().unwrap() = Some(quotes);
        }

        pub fn push_response(&self, response: Result<Vec<Quote>, ProviderError>) {
            self.scripted.lock().unwrap().push_back(response);
        }

        pub fn set_latency(&self, latency: Duration) {
            *self.latency.lock().unwrap() = Some(latency);
        }

        pub fn call_count(&self) -> usize {
            *self.call_count.lock().unwrap()
        }
    }

    #[async_trait]
    impl MarketDataProvider for MockProvider {
        async fn fetch_markets(&self) -> Result<Vec<Quote>, ProviderError> {
            *self.call_count.lock().unwrap() += 1;

            let latency = *self.latency.lock().unwrap();
            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }

            if let Some(response) = self.scripted.lock().unwrap().pop_front() {
                return response;
            }
            match self.standing.lock().unwrap().as_ref() {
                Some(quotes) => Ok(quotes.clone()),
                None => Err(ProviderError::InvalidResponse(
                    "No markets available".to_string(),
                )),
            }
        }

        fn provider_name(&self) -> &'static str {
            "mock"
        }
    }
}
