//! Live ticker stream client
//!
//! Keeps one WebSocket subscribed to a set of `<symbol>@ticker` channels and
//! reports what happens on an event channel: connection status transitions
//! and decoded price ticks. Failures never reach the caller; they turn into a
//! `Disconnected` status and a scheduled reconnect.
//!
//! ```text
//! connect(symbols)
//!     ↓
//! Connecting ─► handshake ─► Connected ─► SUBSCRIBE ─► read / ping / liveness
//!     ▲                                                     │ error, close, silence
//!     └──────── backoff (2s, 4s, 8s, then 30s) ◄─ Disconnected
//! ```

use crate::{
    config::StreamConfig,
    error::StreamError,
    retry::ReconnectBackoff,
    symbols::SymbolMap,
    types::{ConnectionStatus, PriceTick},
};
use async_trait::async_trait;
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, timeout, Instant};
use tokio_tungstenite::{connect_async, tungstenite::Message};

/// Something the stream client wants its owner to know
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Status(ConnectionStatus),
    Tick(PriceTick),
}

/// A live price feed that can be pointed at a set of stream symbols
///
/// Events go to the channel the implementation was built with.
#[async_trait]
pub trait PriceStream: Send + Sync {
    /// Tears down any existing connection, then connects and subscribes to `symbols`
    async fn connect(&self, symbols: Vec<String>);

    /// Closes the connection and stops reconnecting; safe to call at any time
    async fn disconnect(&self);
}

#[derive(Debug, Serialize)]
struct SubscribeRequest<'a> {
    method: &'a str,
    params: Vec<String>,
    id: u32,
}

#[derive(Debug, Serialize)]
struct Heartbeat {
    ping: i64,
}

/// 24h rolling ticker frame; only the fields we use
#[derive(Debug, Deserialize)]
struct TickerFrame {
    #[serde(rename = "s")]
    symbol: String,
    /// Last price
    #[serde(rename = "c")]
    last_price: String,
    #[serde(rename = "P")]
    change_percent: String,
}

/// Decodes an inbound text frame into a tick, if it is one
///
/// Pongs, subscription acks and any other non-ticker frames yield `None`.
pub fn parse_frame(text: &str, symbol_map: &SymbolMap) -> Option<PriceTick> {
    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => {
            tracing::debug!(error = %e, "Ignoring undecodable stream frame");
            return None;
        }
    };

    if value.get("pong").is_some() {
        return None;
    }
    if !matches!(
        value.get("e").and_then(|e| e.as_str()),
        Some("ticker" | "24hrTicker")
    ) {
        return None;
    }

    let frame: TickerFrame = match serde_json::from_value(value) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!(error = %e, "Malformed ticker frame");
            return None;
        }
    };

    let (Ok(price), Ok(change)) = (
        frame.last_price.parse::<f64>(),
        frame.change_percent.parse::<f64>(),
    ) else {
        tracing::warn!(symbol = %frame.symbol, "Ticker frame with non-numeric price");
        return None;
    };

    Some(PriceTick {
        id: symbol_map.id_for(&frame.symbol),
        price,
        price_change_percentage_24h: change,
    })
}

/// WebSocket ticker client with heartbeat, liveness check and reconnect backoff
pub struct TickerStreamClient {
    config: StreamConfig,
    symbol_map: Arc<SymbolMap>,
    events: mpsc::UnboundedSender<StreamEvent>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl TickerStreamClient {
    pub fn new(
        config: StreamConfig,
        symbol_map: Arc<SymbolMap>,
        events: mpsc::UnboundedSender<StreamEvent>,
    ) -> Self {
        Self {
            config,
            symbol_map,
            events,
            task: Mutex::new(None),
        }
    }

    /// Whether a connection task is currently running
    pub async fn is_running(&self) -> bool {
        self.task
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Aborts the running task and waits for it, so its socket is gone on return
    async fn stop(slot: &mut Option<JoinHandle<()>>) -> bool {
        match slot.take() {
            Some(handle) => {
                handle.abort();
                let _ = handle.await;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl PriceStream for TickerStreamClient {
    async fn connect(&self, symbols: Vec<String>) {
        let mut slot = self.task.lock().await;
        Self::stop(&mut slot).await;

        tracing::info!(
            url = %self.config.url,
            symbols = symbols.len(),
            "Starting ticker stream"
        );

        let worker = StreamWorker {
            config: self.config.clone(),
            symbol_map: self.symbol_map.clone(),
            symbols,
            events: self.events.clone(),
            backoff: ReconnectBackoff::new(
                self.config.reconnect,
                self.config.long_reconnect_delay,
            ),
        };
        *slot = Some(tokio::spawn(worker.run()));
    }

    async fn disconnect(&self) {
        let mut slot = self.task.lock().await;
        if Self::stop(&mut slot).await {
            tracing::info!("Ticker stream disconnected");
        }
    }
}

impl Drop for TickerStreamClient {
    fn drop(&mut self) {
        if let Some(handle) = self.task.get_mut().take() {
            handle.abort();
        }
    }
}

/// Owns one connection lifecycle loop
struct StreamWorker {
    config: StreamConfig,
    symbol_map: Arc<SymbolMap>,
    symbols: Vec<String>,
    events: mpsc::UnboundedSender<StreamEvent>,
    backoff: ReconnectBackoff,
}

impl StreamWorker {
    fn emit(&self, event: StreamEvent) -> bool {
        self.events.send(event).is_ok()
    }

    async fn run(mut self) {
        loop {
            if !self.emit(StreamEvent::Status(ConnectionStatus::Connecting)) {
                // Nobody is listening any more
                return;
            }

            if let Err(e) = self.session().await {
                tracing::warn!(error = %e, "Ticker stream connection lost");
            }

            if !self.emit(StreamEvent::Status(ConnectionStatus::Disconnected)) {
                return;
            }

            let delay = self.backoff.next_delay();
            tracing::info!(
                delay_ms = delay.as_millis() as u64,
                attempt = self.backoff.attempt(),
                "Reconnecting ticker stream"
            );
            sleep(delay).await;
        }
    }

    /// Runs a single connection until it fails
    async fn session(&mut self) -> Result<(), StreamError> {
        let (ws, _response) = timeout(
            self.config.connect_timeout,
            connect_async(self.config.url.as_str()),
        )
        .await
        .map_err(|_| StreamError::ConnectTimeout(self.config.connect_timeout))??;

        self.backoff.reset();
        self.emit(StreamEvent::Status(ConnectionStatus::Connected));

        let (mut write, mut read) = ws.split();

        let subscribe = SubscribeRequest {
            method: "SUBSCRIBE",
            params: self.symbols.iter().map(|s| format!("{s}@ticker")).collect(),
            id: 1,
        };
        write
            .send(Message::Text(serde_json::to_string(&subscribe)?))
            .await?;
        tracing::debug!(channels = ?subscribe.params, "Subscribed to tickers");

        let ping_every = self.config.ping_interval;
        let silence_limit = self.config.liveness_timeout;
        let mut ping = interval_at(Instant::now() + ping_every, ping_every);
        let mut liveness = interval_at(Instant::now() + silence_limit, silence_limit);
        let mut last_message = Instant::now();

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            last_message = Instant::now();
                            if let Some(tick) = parse_frame(&text, &self.symbol_map) {
                                tracing::trace!(id = %tick.id, price = tick.price, "Ticker update");
                                self.emit(StreamEvent::Tick(tick));
                            }
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            last_message = Instant::now();
                            write.send(Message::Pong(payload)).await?;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            tracing::info!(?frame, "Ticker stream closed by server");
                            return Err(StreamError::Closed);
                        }
                        Some(Ok(_)) => {
                            last_message = Instant::now();
                        }
                        Some(Err(e)) => return Err(e.into()),
                        None => return Err(StreamError::Closed),
                    }
                }

                _ = ping.tick() => {
                    let heartbeat = Heartbeat { ping: Utc::now().timestamp_millis() };
                    write.send(Message::Text(serde_json::to_string(&heartbeat)?)).await?;
                }

                _ = liveness.tick() => {
                    if last_message.elapsed() > silence_limit {
                        tracing::warn!(
                            silent_ms = last_message.elapsed().as_millis() as u64,
                            "No messages received recently, reconnecting"
                        );
                        return Err(StreamError::Stale(silence_limit));
                    }
                }
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryPolicy;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    const WAIT: Duration = Duration::from_secs(5);

    fn fast_config(url: String) -> StreamConfig {
        StreamConfig {
            url,
            ping_interval: Duration::from_secs(10),
            liveness_timeout: Duration::from_secs(15),
            connect_timeout: Duration::from_secs(2),
            reconnect: RetryPolicy {
                max_retries: 3,
                initial_delay: Duration::from_millis(20),
                multiplier: 2,
                max_delay: Duration::from_millis(200),
            },
            long_reconnect_delay: Duration::from_millis(300),
        }
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<StreamEvent>) -> StreamEvent {
        timeout(WAIT, rx.recv())
            .await
            .expect("timed out waiting for stream event")
            .expect("event channel closed")
    }

    async fn listener() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        (listener, url)
    }

    #[test]
    fn test_parse_ticker_frame() {
        let map = SymbolMap::default();
        let frame = r#"{"e":"kline","E":1,"s":"BTCUSDT","c":"1.0","P":"0.1"}"#;
        assert_eq!(parse_frame(frame, &map), None);

        let frame = r#"{"e":"24hrTicker","E":1,"s":"SOLUSDT","c":"150.25","P":"3.5"}"#;
        assert_eq!(
            parse_frame(frame, &map).map(|tick| (tick.id, tick.price)),
            Some(("solana".to_string(), 150.25))
        );

        let frame = r#"{"e":"ticker","E":1700000000000,"s":"BTCUSDT","p":"-120.5","P":"-0.19","c":"64123.45"}"#;
        assert_eq!(
            parse_frame(frame, &map),
            Some(PriceTick {
                id: "bitcoin".to_string(),
                price: 64123.45,
                price_change_percentage_24h: -0.19,
            })
        );
    }

    #[test]
    fn test_parse_ignores_pong_acks_and_garbage() {
        let map = SymbolMap::default();
        assert_eq!(parse_frame(r#"{"pong":1700000000000}"#, &map), None);
        assert_eq!(parse_frame(r#"{"result":null,"id":1}"#, &map), None);
        assert_eq!(parse_frame("not json", &map), None);
        assert_eq!(
            parse_frame(r#"{"e":"ticker","s":"ETHUSDT","c":"n/a","P":"1"}"#, &map),
            None
        );
        assert_eq!(parse_frame(r#"{"e":"ticker","s":"ETHUSDT"}"#, &map), None);
    }

    #[tokio::test]
    async fn test_disconnect_before_connect_is_safe() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let client = TickerStreamClient::new(
            fast_config("ws://127.0.0.1:9".to_string()),
            Arc::new(SymbolMap::default()),
            tx,
        );
        client.disconnect().await;
        client.disconnect().await;
        assert!(!client.is_running().await);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_subscribes_and_forwards_ticks() {
        let (listener, url) = listener().await;
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(socket).await.unwrap();

            let subscribe = ws.next().await.unwrap().unwrap();
            let subscribe: serde_json::Value =
                serde_json::from_str(subscribe.to_text().unwrap()).unwrap();

            ws.send(Message::Text(r#"{"result":null,"id":1}"#.to_string()))
                .await
                .unwrap();
            ws.send(Message::Text(
                r#"{"e":"ticker","s":"ETHUSDT","c":"3210.50","P":"4.20"}"#.to_string(),
            ))
            .await
            .unwrap();

            // Hold the socket open until the client goes away
            while let Some(Ok(_)) = ws.next().await {}
            subscribe
        });

        let (tx, mut rx) = mpsc::unbounded_channel();
        let client = TickerStreamClient::new(fast_config(url), Arc::new(SymbolMap::default()), tx);
        client
            .connect(vec!["btcusdt".to_string(), "ethusdt".to_string()])
            .await;

        assert_eq!(
            next_event(&mut rx).await,
            StreamEvent::Status(ConnectionStatus::Connecting)
        );
        assert_eq!(
            next_event(&mut rx).await,
            StreamEvent::Status(ConnectionStatus::Connected)
        );
        assert_eq!(
            next_event(&mut rx).await,
            StreamEvent::Tick(PriceTick {
                id: "ethereum".to_string(),
                price: 3210.5,
                price_change_percentage_24h: 4.2,
            })
        );

        client.disconnect().await;
        assert!(!client.is_running().await);

        let subscribe = timeout(WAIT, server).await.unwrap().unwrap();
        assert_eq!(subscribe["method"], "SUBSCRIBE");
        assert_eq!(
            subscribe["params"],
            serde_json::json!(["btcusdt@ticker", "ethusdt@ticker"])
        );
        assert_eq!(subscribe["id"], 1);
    }

    #[tokio::test]
    async fn test_reconnects_after_server_drop() {
        let (listener, url) = listener().await;
        tokio::spawn(async move {
            // First connection is dropped right after the handshake
            let (socket, _) = listener.accept().await.unwrap();
            let ws = accept_async(socket).await.unwrap();
            drop(ws);

            let (socket, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(socket).await.unwrap();
            while let Some(Ok(_)) = ws.next().await {}
        });

        let (tx, mut rx) = mpsc::unbounded_channel();
        let client = TickerStreamClient::new(fast_config(url), Arc::new(SymbolMap::default()), tx);
        client.connect(vec!["btcusdt".to_string()]).await;

        let expected = [
            ConnectionStatus::Connecting,
            ConnectionStatus::Connected,
            ConnectionStatus::Disconnected,
            ConnectionStatus::Connecting,
            ConnectionStatus::Connected,
        ];
        for status in expected {
            assert_eq!(next_event(&mut rx).await, StreamEvent::Status(status));
        }

        client.disconnect().await;
    }

    #[tokio::test]
    async fn test_silent_server_forces_reconnect() {
        let (listener, url) = listener().await;
        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(async move {
                    if let Ok(mut ws) = accept_async(socket).await {
                        // Read everything, never answer
                        while let Some(Ok(_)) = ws.next().await {}
                    }
                });
            }
        });

        let mut config = fast_config(url);
        config.liveness_timeout = Duration::from_millis(150);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let client = TickerStreamClient::new(config, Arc::new(SymbolMap::default()), tx);
        client.connect(vec!["btcusdt".to_string()]).await;

        assert_eq!(
            next_event(&mut rx).await,
            StreamEvent::Status(ConnectionStatus::Connecting)
        );
        assert_eq!(
            next_event(&mut rx).await,
            StreamEvent::Status(ConnectionStatus::Connected)
        );
        assert_eq!(
            next_event(&mut rx).await,
            StreamEvent::Status(ConnectionStatus::Disconnected)
        );

        client.disconnect().await;
    }

    #[tokio::test]
    async fn test_successful_handshake_resets_backoff() {
        let (listener, url) = listener().await;
        tokio::spawn(async move {
            // Two refused handshakes walk the backoff up to its second step
            for _ in 0..2 {
                let (socket, _) = listener.accept().await.unwrap();
                drop(socket);
            }
            // One good handshake, then the server hangs up
            let (socket, _) = listener.accept().await.unwrap();
            drop(accept_async(socket).await.unwrap());

            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(async move {
                    if let Ok(mut ws) = accept_async(socket).await {
                        while let Some(Ok(_)) = ws.next().await {}
                    }
                });
            }
        });

        // 80ms, 320ms, 1280ms
        let mut config = fast_config(url);
        config.reconnect = RetryPolicy {
            max_retries: 3,
            initial_delay: Duration::from_millis(20),
            multiplier: 4,
            max_delay: Duration::from_secs(5),
        };
        config.long_reconnect_delay = Duration::from_secs(5);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let client = TickerStreamClient::new(config, Arc::new(SymbolMap::default()), tx);
        client.connect(vec!["btcusdt".to_string()]).await;

        let expected = [
            ConnectionStatus::Connecting,
            ConnectionStatus::Disconnected,
            ConnectionStatus::Connecting,
            ConnectionStatus::Disconnected,
            ConnectionStatus::Connecting,
            ConnectionStatus::Connected,
            ConnectionStatus::Disconnected,
        ];
        for status in expected {
            assert_eq!(next_event(&mut rx).await, StreamEvent::Status(status));
        }

        // Back at the first step, not the third
        let dropped_at = Instant::now();
        assert_eq!(
            next_event(&mut rx).await,
            StreamEvent::Status(ConnectionStatus::Connecting)
        );
        let waited = dropped_at.elapsed();
        assert!(waited < Duration::from_millis(600), "waited {waited:?}");

        client.disconnect().await;
    }

    #[tokio::test]
    async fn test_reconnect_replaces_previous_socket() {
        let (listener, url) = listener().await;
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut first = accept_async(socket).await.unwrap();
            first.next().await.unwrap().unwrap();

            let (socket, _) = listener.accept().await.unwrap();
            let mut second = accept_async(socket).await.unwrap();
            let subscribe = second.next().await.unwrap().unwrap();

            // By the time the second subscription arrives the first socket is gone
            let first_closed = loop {
                match first.next().await {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break true,
                    Some(Ok(_)) => continue,
                }
            };
            (first_closed, subscribe.into_text().unwrap())
        });

        let (tx, _rx) = mpsc::unbounded_channel();
        let client = TickerStreamClient::new(fast_config(url), Arc::new(SymbolMap::default()), tx);
        client.connect(vec!["btcusdt".to_string()]).await;
        // Let the first subscription land before replacing it
        sleep(Duration::from_millis(100)).await;
        client.connect(vec!["ethusdt".to_string()]).await;

        let (first_closed, subscribe) = timeout(WAIT, server).await.unwrap().unwrap();
        assert!(first_closed);
        assert!(subscribe.contains("ethusdt@ticker"));

        client.disconnect().await;
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_reports_disconnected() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let client = TickerStreamClient::new(
            fast_config("ws://127.0.0.1:9".to_string()),
            Arc::new(SymbolMap::default()),
            tx,
        );
        client.connect(vec!["btcusdt".to_string()]).await;

        assert_eq!(
            next_event(&mut rx).await,
            StreamEvent::Status(ConnectionStatus::Connecting)
        );
        assert_eq!(
            next_event(&mut rx).await,
            StreamEvent::Status(ConnectionStatus::Disconnected)
        );
        // And it keeps trying
        assert_eq!(
            next_event(&mut rx).await,
            StreamEvent::Status(ConnectionStatus::Connecting)
        );

        client.disconnect().await;
    }
}
