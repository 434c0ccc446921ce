//! Error types for the market data sync pipeline
//!
//! None of these reach the consumer of [`MarketSync`](crate::sync::MarketSync):
//! the fetcher degrades to cached or demo data and the stream client turns
//! failures into connection status changes. They exist so the inner layers
//! can use `?` and so the logs say what went wrong.

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur when fetching market data from a provider
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Network request failed
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    /// Invalid response from provider
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Rate limit exceeded (HTTP 429)
    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    /// Non-success HTTP status other than 429
    #[error("API request failed with status {status}: {body}")]
    HttpStatus { status: u16, body: String },

    /// Timeout waiting for response
    #[error("Request timeout")]
    Timeout,
}

impl ProviderError {
    /// True when the provider told us to back off
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, ProviderError::RateLimitExceeded)
    }

    /// Classifies a transport error, separating timeouts from other failures
    pub fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout
        } else {
            ProviderError::NetworkError(err)
        }
    }
}

/// Errors raised by a persisted key-value store
#[derive(Debug, Error)]
pub enum StorageError {
    /// Reading or writing the backing medium failed
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stored value could not be encoded or decoded
    #[error("Storage serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors that end a single ticker stream connection
#[derive(Debug, Error)]
pub enum StreamError {
    /// WebSocket transport failure
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The handshake did not complete in time
    #[error("Connection timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// No frame arrived within the liveness window
    #[error("No messages received for {0:?}")]
    Stale(Duration),

    /// The server closed the connection or the stream ended
    #[error("Connection closed by server")]
    Closed,

    /// An outbound frame could not be encoded
    #[error("Failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),
}
