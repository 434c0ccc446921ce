//! CoinGecko market data provider implementation

use crate::{
    constants::{
        COINGECKO_API_URL, COINGECKO_MARKETS_ENDPOINT, MARKETS_PER_PAGE, REQUEST_TIMEOUT_SECS,
        USER_AGENT,
    },
    error::ProviderError,
    provider::MarketDataProvider,
    types::Quote,
};
use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use std::time::Duration;

/// CoinGecko `/coins/markets` provider
pub struct CoinGeckoProvider {
    client: Client,
    base_url: String,
    per_page: u32,
}

impl CoinGeckoProvider {
    /// Creates a new CoinGecko provider against the public API
    pub fn new() -> Result<Self, ProviderError> {
        Self::with_options(
            COINGECKO_API_URL,
            Duration::from_secs(REQUEST_TIMEOUT_SECS),
        )
    }

    /// Creates a provider with a custom base URL and request timeout
    pub fn with_options(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(ProviderError::NetworkError)?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            per_page: MARKETS_PER_PAGE,
        })
    }

    /// Builds the markets URL: top coins by market cap, priced in USD
    fn build_url(&self) -> String {
        format!(
            "{}{}?vs_currency=usd&order=market_cap_desc&per_page={}&page=1&sparkline=false&price_change_percentage=24h",
            self.base_url, COINGECKO_MARKETS_ENDPOINT, self.per_page
        )
    }

    /// Parses the markets response body
    fn parse_response(body: &str) -> Result<Vec<Quote>, ProviderError> {
        serde_json::from_str(body).map_err(|e| {
            ProviderError::InvalidResponse(format!(
                "Failed to parse CoinGecko response: {}. Response: {}",
                e, body
            ))
        })
    }
}

#[async_trait]
impl MarketDataProvider for CoinGeckoProvider {
    async fn fetch_markets(&self) -> Result<Vec<Quote>, ProviderError> {
        let url = self.build_url();
        tracing::debug!(url = %url, "Fetching markets from CoinGecko");

        let response = self
            .client
            .get(&url)
            .header(header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(ProviderError::from_transport)?;

        // Check for rate limiting
        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::RateLimitExceeded);
        }

        // Check for other errors
        if !response.status().is_success() {
            return Err(ProviderError::HttpStatus {
                status: response.status().as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(ProviderError::from_transport)?;
        let quotes = Self::parse_response(&body)?;

        tracing::debug!(count = quotes.len(), "Successfully fetched markets from CoinGecko");

        Ok(quotes)
    }

    fn provider_name(&self) -> &'static str {
        "coingecko"
    }
}
