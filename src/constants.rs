//! Constants for the market data sync pipeline
//!
//! These are the compile-time defaults. Everything a host may want to tune is
//! also exposed through [`SyncConfig`](crate::config::SyncConfig).

/// How often the orchestrator triggers a passive sync (in seconds)
pub const REFRESH_INTERVAL_SECS: u64 = 60;

/// Quotes updated more recently than this make a passive sync a no-op (in seconds)
pub const FRESHNESS_WINDOW_SECS: u64 = 60;

/// Quiet period that coalesces bursts of passive sync triggers (in milliseconds)
pub const SYNC_DEBOUNCE_MS: u64 = 500;

/// How long a cached quote snapshot stays valid (in seconds)
pub const CACHE_EXPIRY_SECS: u64 = 30 * 60;

/// Rate-limit tracking window (in seconds)
pub const RATE_LIMIT_WINDOW_SECS: u64 = 5 * 60;

/// Requests allowed per rate-limit window before we stop calling the API
pub const RATE_LIMIT_MAX_REQUESTS: u32 = 5;

/// HTTP request timeout when fetching market data (in seconds)
pub const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Retries after the first failed market data request
pub const FETCH_MAX_RETRIES: u32 = 2;

/// Initial backoff delay between market data retries (in milliseconds)
pub const FETCH_INITIAL_BACKOFF_MS: u64 = 5000;

/// Quotes requested per page from the markets endpoint
pub const MARKETS_PER_PAGE: u32 = 20;

/// How many of the top quotes are streamed live
pub const STREAM_TOP_N: usize = 10;

/// Heartbeat interval on the ticker stream (in seconds)
pub const STREAM_PING_INTERVAL_SECS: u64 = 10;

/// Silence on the ticker stream longer than this forces a reconnect (in seconds)
pub const STREAM_LIVENESS_SECS: u64 = 15;

/// Quick reconnect attempts before falling back to the long delay
pub const STREAM_MAX_RECONNECT_ATTEMPTS: u32 = 3;

/// Base reconnect delay, doubled per attempt (in milliseconds)
pub const STREAM_INITIAL_BACKOFF_MS: u64 = 1000;

/// Upper bound for a single quick reconnect delay (in milliseconds)
pub const STREAM_MAX_BACKOFF_MS: u64 = 30_000;

/// Delay after the quick attempts are exhausted (in milliseconds)
pub const STREAM_LONG_RECONNECT_MS: u64 = 30_000;

/// Base delay for the orchestrator's re-sync after a stream drop (in milliseconds)
pub const RESYNC_INITIAL_BACKOFF_MS: u64 = 5000;

/// Upper bound for the orchestrator's re-sync delay (in milliseconds)
pub const RESYNC_MAX_BACKOFF_MS: u64 = 30_000;

/// CoinGecko API base URL
pub const COINGECKO_API_URL: &str = "https://api.coingecko.com/api/v3";

/// CoinGecko endpoint for market listings
pub const COINGECKO_MARKETS_ENDPOINT: &str = "/coins/markets";

/// Public ticker stream endpoint
pub const TICKER_STREAM_URL: &str = "wss://stream.binance.com:9443/ws";

/// Quote currency suffix on stream symbols
pub const STREAM_QUOTE_SUFFIX: &str = "usdt";

/// Storage key of the cached quote snapshot
pub const MARKET_DATA_CACHE_KEY: &str = "@crypto_market_data";

/// Storage key of the persisted rate-limit state
pub const RATE_LIMIT_CACHE_KEY: &str = "@crypto_rate_limit";

/// User agent for HTTP requests
pub const USER_AGENT: &str = "market-sync/0.1.0";
