//! # Market Sync
//!
//! Keeps a ranked list of crypto market quotes current on the client side:
//! REST polling against CoinGecko with a persisted cache, a client-side rate
//! limit and demo data as a last resort, plus live price ticks from a public
//! exchange WebSocket for the top coins.
//!
//! ## Data sources
//!
//! Every fetch resolves to quotes tagged with where they came from:
//!
//! - `Live`: fresh from the provider
//! - `Cache`: persisted copy younger than the cache expiry
//! - `StaleCache`: expired copy, served while rate limited or offline
//! - `Fallback`: bundled demo quotes
//!
//! ## Usage
//!
//! ```no_run
//! use market_sync::{MarketSync, SyncConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let sync = MarketSync::start(SyncConfig::from_env())?;
//!
//! // Host went to the background: timers stop, the socket closes
//! sync.set_active(false);
//!
//! // Back in the foreground: stream resumes, stale data is re-synced
//! sync.set_active(true);
//!
//! // Pull-to-refresh
//! sync.refresh();
//!
//! let view = sync.view();
//! println!("{} quotes, stream {}", view.quotes.len(), view.connection_status);
//!
//! sync.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod constants;
pub mod error;
pub mod fallback;
pub mod fetcher;
pub mod provider;
pub mod providers;
pub mod rate_limit;
pub mod retry;
pub mod storage;
pub mod stream;
pub mod symbols;
pub mod sync;
pub mod types;

// Re-export commonly used types
pub use config::{FetchConfig, StreamConfig, SyncConfig};
pub use error::{ProviderError, StorageError, StreamError};
pub use fetcher::{FetchOutcome, MarketDataFetcher};
pub use provider::MarketDataProvider;
pub use storage::{FileStore, KeyValueStore, MemoryStore};
pub use stream::{PriceStream, StreamEvent, TickerStreamClient};
pub use symbols::SymbolMap;
pub use sync::{MarketSync, MarketView};
pub use types::{ConnectionStatus, DataSource, PriceTick, Quote};
