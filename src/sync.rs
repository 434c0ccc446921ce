//! Market sync orchestrator
//!
//! Owns the quote list the UI shows and decides when to fetch, when to
//! (re)point the ticker stream and when to let everything rest.
//!
//! ```text
//! MarketSync (handle) ──commands──► SyncWorker task ──watch──► MarketView
//!                                     │    ▲
//!                         fetch tasks │    │ StreamEvent (status, ticks)
//!                                     ▼    │
//!                          MarketDataFetcher   PriceStream
//! ```
//!
//! The worker is the only writer of the quote list. Fetches run as child
//! tasks and report back, so a stream tick and a REST result are applied in
//! whatever order they complete.

use crate::{
    cache::QuoteCache,
    config::SyncConfig,
    error::ProviderError,
    fetcher::{FetchOutcome, MarketDataFetcher},
    providers::CoinGeckoProvider,
    rate_limit::RateLimiter,
    storage::{FileStore, KeyValueStore, MemoryStore},
    stream::{PriceStream, StreamEvent, TickerStreamClient},
    symbols::SymbolMap,
    types::{apply_tick, filter_quotes, merge_quotes, newest_update, ConnectionStatus, Quote},
};
use chrono::Utc;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::{interval_at, sleep_until, Instant, Interval, MissedTickBehavior};

/// Shown when every source, demo data included, came back empty
pub const NO_DATA_ERROR: &str = "No market data available. Pull down to retry.";

/// What the presentation layer renders
#[derive(Debug, Clone, PartialEq)]
pub struct MarketView {
    /// Quotes matching the search query, in rank order
    pub quotes: Vec<Quote>,
    /// True only while the very first load is pending
    pub is_loading: bool,
    /// True while a user-triggered refresh is in flight
    pub is_refreshing: bool,
    /// Banner text: missing, stale or demo data
    pub error: Option<String>,
    pub search_query: String,
    pub connection_status: ConnectionStatus,
}

impl Default for MarketView {
    fn default() -> Self {
        Self {
            quotes: Vec::new(),
            is_loading: true,
            is_refreshing: false,
            error: None,
            search_query: String::new(),
            connection_status: ConnectionStatus::Disconnected,
        }
    }
}

#[derive(Debug)]
enum Command {
    Refresh,
    Sync,
    SetSearchQuery(String),
    SetActive(bool),
    Shutdown,
}

/// Handle to a running market sync
///
/// Dropping the handle stops the worker: timers are cancelled, in-flight
/// fetches aborted and the stream disconnected.
///
/// # Example
/// ```no_run
/// use market_sync::{MarketSync, SyncConfig};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let sync = MarketSync::start(SyncConfig::from_env())?;
/// let mut updates = sync.subscribe();
///
/// while updates.changed().await.is_ok() {
///     let view = updates.borrow().clone();
///     for quote in &view.quotes {
///         println!("{:<6} ${:.2}", quote.symbol, quote.current_price);
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub struct MarketSync {
    commands: mpsc::UnboundedSender<Command>,
    view: watch::Receiver<MarketView>,
    task: Option<JoinHandle<()>>,
}

impl MarketSync {
    /// Starts the production stack: CoinGecko, the public ticker stream and
    /// a file-backed store when `cache_dir` is set
    pub fn start(config: SyncConfig) -> Result<Self, ProviderError> {
        Self::start_with_symbols(config, SymbolMap::default())
    }

    pub fn start_with_symbols(
        config: SyncConfig,
        symbol_map: SymbolMap,
    ) -> Result<Self, ProviderError> {
        let store: Arc<dyn KeyValueStore> = match &config.cache_dir {
            Some(dir) => Arc::new(FileStore::new(dir)),
            None => Arc::new(MemoryStore::new()),
        };

        let fetch = &config.fetch;
        let provider =
            CoinGeckoProvider::with_options(fetch.api_url.clone(), fetch.request_timeout)?;
        let fetcher = MarketDataFetcher::with_parts(
            Arc::new(provider),
            QuoteCache::with_expiry(store.clone(), fetch.cache_expiry),
            RateLimiter::with_limits(store, fetch.rate_limit_window, fetch.rate_limit_max_requests),
            fetch.retry,
        )
        .with_request_timeout(fetch.request_timeout);

        let symbol_map = Arc::new(symbol_map);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let stream = TickerStreamClient::new(config.stream.clone(), symbol_map.clone(), events_tx);

        Ok(Self::spawn(
            config,
            Arc::new(fetcher),
            Arc::new(stream),
            events_rx,
            symbol_map,
        ))
    }

    /// Starts a worker on caller-supplied parts
    ///
    /// `events` must be the receiving end of the channel `stream` reports to.
    pub fn spawn(
        config: SyncConfig,
        fetcher: Arc<MarketDataFetcher>,
        stream: Arc<dyn PriceStream>,
        events: mpsc::UnboundedReceiver<StreamEvent>,
        symbol_map: Arc<SymbolMap>,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (view_tx, view_rx) = watch::channel(MarketView::default());

        let worker = SyncWorker {
            active: config.start_active,
            config,
            fetcher,
            stream,
            symbol_map,
            view_tx,
            quotes: Vec::new(),
            is_loading: true,
            forced_in_flight: 0,
            error: None,
            search_query: String::new(),
            connection_status: ConnectionStatus::Disconnected,
            activated: false,
            poll: None,
            debounce_at: None,
            resync_at: None,
            resync_attempt: 0,
            fetches: JoinSet::new(),
        };
        let task = tokio::spawn(worker.run(commands_rx, events));

        Self {
            commands: commands_tx,
            view: view_rx,
            task: Some(task),
        }
    }

    /// Fetches now, bypassing the cache and the debounce
    pub fn refresh(&self) {
        self.send(Command::Refresh);
    }

    /// Requests a passive sync: skipped when quotes are fresh, debounced otherwise
    pub fn sync(&self) {
        self.send(Command::Sync);
    }

    /// Filters the published quotes; does not trigger a fetch
    pub fn set_search_query(&self, query: impl Into<String>) {
        self.send(Command::SetSearchQuery(query.into()));
    }

    /// Host lifecycle signal: `true` in the foreground, `false` in the background
    pub fn set_active(&self, active: bool) {
        self.send(Command::SetActive(active));
    }

    /// Latest published view
    pub fn view(&self) -> MarketView {
        self.view.borrow().clone()
    }

    /// Receiver notified on every published view
    pub fn subscribe(&self) -> watch::Receiver<MarketView> {
        self.view.clone()
    }

    /// Stops the worker and waits for it to release its resources
    pub async fn shutdown(mut self) {
        self.send(Command::Shutdown);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Market sync worker failed during shutdown");
            }
        }
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            tracing::debug!("Market sync worker already stopped");
        }
    }
}

impl Drop for MarketSync {
    fn drop(&mut self) {
        if self.task.is_some() {
            let _ = self.commands.send(Command::Shutdown);
        }
    }
}

struct SyncWorker {
    config: SyncConfig,
    fetcher: Arc<MarketDataFetcher>,
    stream: Arc<dyn PriceStream>,
    symbol_map: Arc<SymbolMap>,
    view_tx: watch::Sender<MarketView>,

    quotes: Vec<Quote>,
    is_loading: bool,
    forced_in_flight: usize,
    error: Option<String>,
    search_query: String,
    connection_status: ConnectionStatus,

    active: bool,
    activated: bool,
    poll: Option<Interval>,
    debounce_at: Option<Instant>,
    resync_at: Option<Instant>,
    resync_attempt: u32,
    fetches: JoinSet<(bool, Option<FetchOutcome>)>,
}

impl SyncWorker {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<StreamEvent>,
    ) {
        tracing::info!(
            refresh_interval_secs = self.config.refresh_interval.as_secs(),
            provider = self.fetcher.provider_name(),
            "Starting market sync"
        );

        if self.active {
            self.activate().await;
        }
        self.publish();

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Refresh) => self.refresh(),
                    Some(Command::Sync) => self.request_sync(),
                    Some(Command::SetSearchQuery(query)) => {
                        self.search_query = query;
                        self.publish();
                    }
                    Some(Command::SetActive(active)) => self.set_active(active).await,
                    Some(Command::Shutdown) | None => break,
                },

                Some(event) = events.recv() => self.on_stream_event(event),

                _ = next_tick(&mut self.poll) => {
                    tracing::debug!("Periodic sync");
                    self.request_sync();
                }

                _ = wait_until(self.debounce_at) => {
                    self.debounce_at = None;
                    self.start_fetch(false);
                }

                _ = wait_until(self.resync_at) => {
                    self.resync_at = None;
                    if self.active {
                        tracing::debug!("Re-syncing after stream drop");
                        self.request_sync();
                    }
                }

                Some(joined) = self.fetches.join_next(), if !self.fetches.is_empty() => {
                    self.on_fetch_done(joined).await;
                }
            }
        }

        self.teardown().await;
    }

    fn refresh(&mut self) {
        // A forced fetch supersedes any pending passive one
        self.debounce_at = None;
        self.start_fetch(true);
    }

    /// Passive sync: no-op while fresh, otherwise (re)arm the debounce
    fn request_sync(&mut self) {
        if self.is_fresh() {
            tracing::debug!("Quotes are fresh, skipping sync");
            if self.is_loading {
                self.is_loading = false;
                self.publish();
            }
            return;
        }
        self.debounce_at = Some(Instant::now() + self.config.debounce);
    }

    fn is_fresh(&self) -> bool {
        match newest_update(&self.quotes) {
            Some(updated) => {
                let age_ms = (Utc::now() - updated).num_milliseconds();
                age_ms < self.config.freshness_window.as_millis() as i64
            }
            None => false,
        }
    }

    fn start_fetch(&mut self, force: bool) {
        if force {
            self.forced_in_flight += 1;
        }
        self.is_loading = !force && self.quotes.is_empty();
        self.publish();

        let fetcher = self.fetcher.clone();
        self.fetches.spawn(async move {
            // A panicking fetch still reports its `force` flag back
            let outcome = AssertUnwindSafe(fetcher.fetch_market_data(force))
                .catch_unwind()
                .await
                .ok();
            (force, outcome)
        });
    }

    async fn on_fetch_done(&mut self, joined: Result<(bool, Option<FetchOutcome>), JoinError>) {
        let (force, outcome) = match joined {
            Ok(result) => result,
            Err(e) => {
                // Aborted by teardown, which resets the counters itself
                if !e.is_cancelled() {
                    tracing::error!(error = %e, "Market data fetch task failed");
                }
                return;
            }
        };

        if force {
            self.forced_in_flight = self.forced_in_flight.saturating_sub(1);
        }
        self.is_loading = false;

        let Some(FetchOutcome { quotes, source }) = outcome else {
            tracing::error!(force, "Market data fetch panicked");
            self.publish();
            return;
        };
        if quotes.is_empty() {
            tracing::warn!("No market data received");
            self.quotes.clear();
            self.error = Some(NO_DATA_ERROR.to_string());
            self.stream.disconnect().await;
            self.connection_status = ConnectionStatus::Disconnected;
            self.publish();
            return;
        }

        tracing::info!(count = quotes.len(), source = ?source, force, "Market data updated");
        self.quotes = merge_quotes(&self.quotes, quotes);
        self.error = source.warning().map(str::to_string);
        self.publish();

        if self.active {
            self.connect_stream().await;
        }
    }

    async fn connect_stream(&mut self) {
        let symbols = self.symbol_map.stream_symbols(&self.quotes, self.config.top_n);
        if symbols.is_empty() {
            tracing::debug!("No streamable symbols among the top quotes");
            return;
        }
        self.stream.connect(symbols).await;
    }

    fn on_stream_event(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::Tick(tick) => {
                if apply_tick(&mut self.quotes, &tick, Utc::now()) {
                    self.publish();
                }
            }
            StreamEvent::Status(status) => {
                // Late events from a stream we already shut down
                if !self.active {
                    return;
                }
                self.connection_status = status;
                match status {
                    ConnectionStatus::Disconnected => {
                        let delay = self.config.resync.delay_for(self.resync_attempt);
                        self.resync_attempt = self.resync_attempt.saturating_add(1);
                        // Repeated drops never push a pending re-sync further out
                        let deadline = Instant::now() + delay;
                        self.resync_at =
                            Some(self.resync_at.map_or(deadline, |pending| pending.min(deadline)));
                        tracing::debug!(
                            delay_ms = delay.as_millis() as u64,
                            attempt = self.resync_attempt,
                            "Stream disconnected, scheduling re-sync"
                        );
                    }
                    ConnectionStatus::Connected => self.resync_attempt = 0,
                    ConnectionStatus::Connecting => {}
                }
                self.publish();
            }
        }
    }

    async fn set_active(&mut self, active: bool) {
        if active == self.active {
            return;
        }
        self.active = active;

        if active {
            self.activate().await;
        } else {
            tracing::info!("Pausing market sync");
            self.poll = None;
            self.debounce_at = None;
            self.resync_at = None;
            self.resync_attempt = 0;
            self.stream.disconnect().await;
            self.connection_status = ConnectionStatus::Disconnected;
            self.publish();
        }
    }

    /// Foreground entry: immediate fetch the first time, resync afterwards
    async fn activate(&mut self) {
        if !self.activated {
            self.activated = true;
            self.start_fetch(false);
        } else {
            tracing::info!("Resuming market sync");
            if self.is_fresh() {
                // No fetch will follow, so the stream has to come back on its own
                self.connect_stream().await;
            }
            self.request_sync();
        }
        self.start_timer();
    }

    fn start_timer(&mut self) {
        let period = self.config.refresh_interval;
        let mut poll = interval_at(Instant::now() + period, period);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.poll = Some(poll);
    }

    async fn teardown(&mut self) {
        self.fetches.abort_all();
        self.poll = None;
        self.debounce_at = None;
        self.resync_at = None;
        self.stream.disconnect().await;
        self.connection_status = ConnectionStatus::Disconnected;
        self.forced_in_flight = 0;
        self.publish();
        tracing::info!("Market sync stopped");
    }

    fn publish(&self) {
        self.view_tx.send_replace(MarketView {
            quotes: filter_quotes(&self.quotes, &self.search_query),
            is_loading: self.is_loading,
            is_refreshing: self.forced_in_flight > 0,
            error: self.error.clone(),
            search_query: self.search_query.clone(),
            connection_status: self.connection_status,
        });
    }
}

async fn next_tick(poll: &mut Option<Interval>) {
    match poll {
        Some(poll) => {
            poll.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
