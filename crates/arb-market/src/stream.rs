//! Multiplexed depth-stream ingestion.
//!
//! Subscribed symbols are partitioned into chunks (a combined-stream URL
//! with too many symbols is rejected by the venue), and each chunk drives
//! one long-lived WebSocket connection requesting depth-at-20-levels at
//! 100 ms cadence. One worker task per connection parses payloads, replaces
//! the symbol's book in the store, and notifies the scanner.
//!
//! A symbol is handled by exactly one connection for the process lifetime.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{protocol::Message, Error as WsError},
};
use tracing::{debug, error, info, warn};

use arb_common::{OrderBook, PriceLevel};

use crate::store::OrderBookStore;

/// Errors that can occur on a depth-stream connection.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("WebSocket connection failed: {0}")]
    Connection(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    #[error("Connection timeout")]
    Timeout,

    #[error("Stream ended unexpectedly")]
    StreamEnded,

    #[error("No update within the idle window, forcing reconnect")]
    IdleTimeout,
}

/// Configuration for the depth-stream plane.
#[derive(Debug, Clone)]
pub struct DepthStreamConfig {
    /// WebSocket base URL, e.g. "wss://stream.binance.com:9443".
    pub ws_base_url: String,
    /// Maximum symbols multiplexed onto one connection.
    pub max_symbols_per_stream: usize,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Initial reconnect delay.
    pub initial_reconnect_delay: Duration,
    /// Maximum reconnect delay.
    pub max_reconnect_delay: Duration,
    /// Force a reconnect when a symbol goes silent for this long.
    pub idle_reconnect: Duration,
}

impl Default for DepthStreamConfig {
    fn default() -> Self {
        Self {
            ws_base_url: "wss://stream.binance.com:9443".to_string(),
            max_symbols_per_stream: 50,
            connect_timeout: Duration::from_secs(10),
            initial_reconnect_delay: Duration::from_secs(2),
            max_reconnect_delay: Duration::from_secs(300),
            idle_reconnect: Duration::from_secs(30),
        }
    }
}

/// Combined-stream envelope: `{"stream": "<sym>@depth20@100ms", "data": {...}}`.
#[derive(Debug, Deserialize)]
struct CombinedMessage {
    stream: String,
    data: DepthPayload,
}

/// Depth payload: price/quantity pairs as strings.
#[derive(Debug, Deserialize)]
struct DepthPayload {
    #[serde(default)]
    bids: Vec<[String; 2]>,
    #[serde(default)]
    asks: Vec<[String; 2]>,
}

/// The market-data plane: owns the ingest workers and the idle watchdog.
pub struct DepthStreamPlane {
    config: DepthStreamConfig,
    store: Arc<OrderBookStore>,
    updates: mpsc::UnboundedSender<String>,
}

impl DepthStreamPlane {
    /// Create a plane publishing into `store` and notifying `updates` with
    /// each symbol whose book was replaced.
    pub fn new(
        config: DepthStreamConfig,
        store: Arc<OrderBookStore>,
        updates: mpsc::UnboundedSender<String>,
    ) -> Self {
        Self {
            config,
            store,
            updates,
        }
    }

    /// Spawn one worker per symbol chunk plus the idle watchdog.
    ///
    /// The symbol-to-connection mapping fixed here holds for the process
    /// lifetime. Workers exit when `shutdown` fires.
    pub fn spawn(
        self: Arc<Self>,
        symbols: Vec<String>,
        shutdown: &broadcast::Sender<()>,
    ) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();
        let mut chunk_nudges: Vec<(Arc<Notify>, Vec<String>)> = Vec::new();

        for (chunk_id, chunk) in symbols.chunks(self.config.max_symbols_per_stream).enumerate() {
            let url = combined_stream_url(&self.config.ws_base_url, chunk);
            let owned: HashSet<String> = chunk.iter().cloned().collect();
            let nudge = Arc::new(Notify::new());
            chunk_nudges.push((nudge.clone(), chunk.to_vec()));

            let plane = self.clone();
            let rx = shutdown.subscribe();
            handles.push(tokio::spawn(async move {
                plane.run_chunk(chunk_id, url, owned, rx, nudge).await;
            }));
        }

        info!(
            connections = handles.len(),
            symbols = symbols.len(),
            "Depth-stream plane started"
        );

        let plane = self.clone();
        let rx = shutdown.subscribe();
        handles.push(tokio::spawn(async move {
            plane.run_watchdog(chunk_nudges, rx).await;
        }));

        handles
    }

    /// Connection loop for one chunk, reconnecting with exponential backoff.
    async fn run_chunk(
        &self,
        chunk_id: usize,
        url: String,
        owned: HashSet<String>,
        mut shutdown: broadcast::Receiver<()>,
        nudge: Arc<Notify>,
    ) {
        let mut delay = self.config.initial_reconnect_delay;

        loop {
            if shutdown.try_recv().is_ok() {
                info!(chunk_id, "Depth worker: shutdown signal received");
                return;
            }

            match self
                .run_connection(chunk_id, &url, &owned, &mut shutdown, &nudge)
                .await
            {
                Ok(()) => {
                    info!(chunk_id, "Depth worker: clean shutdown");
                    return;
                }
                Err(e) => {
                    warn!(chunk_id, "Depth worker error: {e}, reconnecting in {delay:?}");

                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.recv() => {
                            info!(chunk_id, "Depth worker: shutdown during reconnect delay");
                            return;
                        }
                    }

                    delay = (delay * 2).min(self.config.max_reconnect_delay);
                }
            }
        }
    }

    /// Run a single WebSocket connection until error, idle nudge, or shutdown.
    async fn run_connection(
        &self,
        chunk_id: usize,
        url: &str,
        owned: &HashSet<String>,
        shutdown: &mut broadcast::Receiver<()>,
        nudge: &Notify,
    ) -> Result<(), StreamError> {
        info!(chunk_id, symbols = owned.len(), "Connecting depth stream");

        let connect_result = timeout(self.config.connect_timeout, connect_async(url)).await;
        let (ws_stream, _response) = match connect_result {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => return Err(StreamError::Connection(e.to_string())),
            Err(_) => return Err(StreamError::Timeout),
        };

        info!(chunk_id, "Depth stream connected");
        let (mut write, mut read) = ws_stream.split();

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            let _ = self.handle_payload(&text, owned);
                        }
                        Some(Ok(Message::Ping(data))) => {
                            debug!(chunk_id, "Received ping, sending pong");
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Pong(_))) => {
                            debug!(chunk_id, "Received pong");
                        }
                        Some(Ok(Message::Close(frame))) => {
                            info!(chunk_id, "Depth stream closed by server: {:?}", frame);
                            return Err(StreamError::StreamEnded);
                        }
                        Some(Err(e)) => {
                            error!(chunk_id, "WebSocket error: {e}");
                            return Err(StreamError::WebSocket(e));
                        }
                        None => {
                            warn!(chunk_id, "Depth stream ended");
                            return Err(StreamError::StreamEnded);
                        }
                        _ => {
                            // Binary or other message types, ignore.
                        }
                    }
                }

                _ = nudge.notified() => {
                    warn!(chunk_id, "Idle watchdog nudge, cycling connection");
                    return Err(StreamError::IdleTimeout);
                }

                _ = shutdown.recv() => {
                    info!(chunk_id, "Depth worker: shutdown signal received");
                    return Ok(());
                }
            }
        }
    }

    /// Parse one combined-stream payload, publish the book, notify the
    /// scanner. Malformed payloads and foreign symbols are dropped.
    fn handle_payload(&self, text: &str, owned: &HashSet<String>) -> Option<String> {
        let t0 = Instant::now();

        let msg: CombinedMessage = match serde_json::from_str(text) {
            Ok(m) => m,
            Err(e) => {
                debug!("Dropping malformed depth payload: {e}");
                return None;
            }
        };

        let symbol = symbol_from_stream(&msg.stream)?;
        if !owned.contains(&symbol) {
            debug!(symbol = %symbol, "Dropping payload for foreign symbol");
            return None;
        }

        let bids = parse_levels(&msg.data.bids);
        let asks = parse_levels(&msg.data.asks);

        let mut book = OrderBook::new();
        book.apply_snapshot(bids, asks, Utc::now().timestamp_millis());
        self.store.publish(&symbol, book);

        // The scanner side may be gone during shutdown; nothing to do then.
        let _ = self.updates.send(symbol.clone());

        debug!(
            symbol = %symbol,
            latency_us = t0.elapsed().as_micros() as u64,
            "Depth update published"
        );
        Some(symbol)
    }

    /// Periodically inspect per-symbol update times and nudge the owning
    /// connection when any of its symbols has gone silent.
    async fn run_watchdog(
        &self,
        chunks: Vec<(Arc<Notify>, Vec<String>)>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let idle_ms = self.config.idle_reconnect.as_millis() as i64;
        let start = Instant::now();
        let mut last_nudge: Vec<Option<Instant>> = vec![None; chunks.len()];
        let mut tick = tokio::time::interval(self.config.idle_reconnect / 3);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    // Give connections a full idle window after startup
                    // before judging symbols that have never updated.
                    if start.elapsed() < self.config.idle_reconnect {
                        continue;
                    }
                    for (i, (nudge, symbols)) in chunks.iter().enumerate() {
                        if let Some(at) = last_nudge[i] {
                            if at.elapsed() < self.config.idle_reconnect {
                                continue;
                            }
                        }
                        let silent = symbols
                            .iter()
                            .find(|s| self.store.is_stale(s, idle_ms));
                        if let Some(symbol) = silent {
                            warn!(chunk = i, symbol = %symbol, "Symbol silent, nudging connection");
                            nudge.notify_one();
                            last_nudge[i] = Some(Instant::now());
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("Idle watchdog: shutdown signal received");
                    return;
                }
            }
        }
    }
}

/// Build the combined-stream URL for one chunk of symbols.
fn combined_stream_url(ws_base_url: &str, symbols: &[String]) -> String {
    let streams: Vec<String> = symbols
        .iter()
        .map(|s| format!("{}@depth20@100ms", s.to_lowercase()))
        .collect();
    format!("{}/stream?streams={}", ws_base_url, streams.join("/"))
}

/// Extract the upper-cased symbol from a stream name like
/// "btcusdt@depth20@100ms".
fn symbol_from_stream(stream: &str) -> Option<String> {
    let prefix = stream.split('@').next()?;
    if prefix.is_empty() {
        return None;
    }
    Some(prefix.to_uppercase())
}

/// Parse string price/quantity pairs, dropping zero-quantity levels and
/// anything that fails decimal parsing.
fn parse_levels(raw: &[[String; 2]]) -> Vec<PriceLevel> {
    raw.iter()
        .filter_map(|pair| {
            let price: Decimal = pair[0].parse().ok()?;
            let qty: Decimal = pair[1].parse().ok()?;
            (qty > Decimal::ZERO).then_some(PriceLevel::new(price, qty))
        })
        .collect()
}
