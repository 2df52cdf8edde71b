//! Real-time candle feed over the exchange WebSocket.
//!
//! Streams kline events for one symbol/interval and keeps the latest
//! *closed* candle per symbol in a shared snapshot map. In-progress
//! candles are ignored: downstream stages only ever see finalized bars,
//! the same shape the historical store holds. Several feeds can share
//! one snapshot, one symbol each.
//!
//! ```text
//! Exchange WebSocket (kline stream)
//!         │
//!         ▼
//! KlineFeed::run()            reconnects with delay on error
//!         │
//!         ▼
//! CandleSnapshot              latest closed candle per symbol
//! ```

use candlelab_core::Bar;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

const BINANCE_SPOT_WS: &str = "wss://stream.binance.com:9443/ws/";

/// Latest closed candle per uppercase symbol.
pub type CandleSnapshot = Arc<RwLock<HashMap<String, Bar>>>;

/// Errors from the live candle feed.
#[derive(Debug, Error)]
pub enum LiveFeedError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("connection closed: {0}")]
    Closed(String),

    #[error("max reconnect attempts ({0}) exceeded")]
    MaxReconnects(u32),
}

/// Configuration for the live candle feed.
#[derive(Debug, Clone)]
pub struct KlineFeedConfig {
    /// Lowercase stream symbol, e.g. "btcusdt".
    pub symbol: String,
    /// Candle interval, e.g. "5m".
    pub interval: String,
    /// Delay before reconnecting after a dropped connection.
    pub reconnect_delay: Duration,
    /// Maximum reconnect attempts (0 = unlimited).
    pub max_reconnect_attempts: u32,
}

impl Default for KlineFeedConfig {
    fn default() -> Self {
        Self {
            symbol: "btcusdt".to_string(),
            interval: "5m".to_string(),
            reconnect_delay: Duration::from_secs(1),
            max_reconnect_attempts: 10,
        }
    }
}

/// Exchange kline event envelope.
#[derive(Debug, Deserialize)]
struct KlineEvent {
    #[serde(rename = "e")]
    event_type: String,
    #[serde(rename = "k")]
    kline: KlinePayload,
}

/// Inner kline payload; prices and volumes arrive as decimal strings.
#[derive(Debug, Deserialize)]
struct KlinePayload {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "t")]
    open_time: i64,
    #[serde(rename = "o")]
    open: String,
    #[serde(rename = "h")]
    high: String,
    #[serde(rename = "l")]
    low: String,
    #[serde(rename = "c")]
    close: String,
    #[serde(rename = "v")]
    volume: String,
    #[serde(rename = "n")]
    number_of_trades: u32,
    #[serde(rename = "V")]
    taker_buy_base: String,
    /// True once the candle is closed.
    #[serde(rename = "x")]
    is_closed: bool,
}

impl KlinePayload {
    fn to_bar(&self) -> Option<Bar> {
        let timestamp = DateTime::from_timestamp_millis(self.open_time)?.naive_utc();
        Some(Bar {
            timestamp,
            open: self.open.parse().ok()?,
            high: self.high.parse().ok()?,
            low: self.low.parse().ok()?,
            close: self.close.parse().ok()?,
            volume: self.volume.parse().ok()?,
            number_of_trades: self.number_of_trades,
            taker_buy_base: self.taker_buy_base.parse().ok()?,
        })
    }
}

/// Feed statistics.
#[derive(Debug, Clone, Default)]
pub struct KlineFeedStats {
    pub messages_received: u64,
    pub closed_candles: u64,
    pub parse_errors: u64,
    pub reconnects: u32,
    pub last_update: Option<DateTime<Utc>>,
}

/// Live candle feed keeping the latest closed bar per symbol in a
/// shared snapshot.
pub struct KlineFeed {
    config: KlineFeedConfig,
    snapshot: CandleSnapshot,
    stats: KlineFeedStats,
    should_stop: Arc<AtomicBool>,
}

impl KlineFeed {
    pub fn new(config: KlineFeedConfig, snapshot: CandleSnapshot) -> Self {
        Self {
            config,
            snapshot,
            stats: KlineFeedStats::default(),
            should_stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle to signal the feed to stop.
    #[must_use]
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.should_stop.clone()
    }

    #[must_use]
    pub fn stats(&self) -> &KlineFeedStats {
        &self.stats
    }

    fn build_url(&self) -> String {
        format!(
            "{}{}@kline_{}",
            BINANCE_SPOT_WS, self.config.symbol, self.config.interval
        )
    }

    /// Run the feed with automatic reconnection.
    pub async fn run(&mut self) -> Result<(), LiveFeedError> {
        let mut reconnect_attempts = 0u32;

        loop {
            if self.should_stop.load(Ordering::SeqCst) {
                info!("kline feed stopping on request");
                return Ok(());
            }

            match self.connect_and_stream().await {
                Ok(()) => {
                    info!("kline feed exiting cleanly");
                    return Ok(());
                }
                Err(e) => {
                    error!("kline feed error: {e}");
                    self.stats.reconnects += 1;
                    reconnect_attempts += 1;

                    if self.config.max_reconnect_attempts > 0
                        && reconnect_attempts >= self.config.max_reconnect_attempts
                    {
                        return Err(LiveFeedError::MaxReconnects(reconnect_attempts));
                    }

                    warn!(
                        "reconnecting in {:?} (attempt {reconnect_attempts})",
                        self.config.reconnect_delay
                    );
                    tokio::time::sleep(self.config.reconnect_delay).await;
                }
            }
        }
    }

    async fn connect_and_stream(&mut self) -> Result<(), LiveFeedError> {
        let url = self.build_url();
        info!("connecting to kline stream: {url}");

        let (ws_stream, _) = tokio_tungstenite::connect_async(&url).await?;
        info!("connected to kline stream");

        let (_, mut read) = ws_stream.split();

        while let Some(msg) = read.next().await {
            if self.should_stop.load(Ordering::SeqCst) {
                info!("kline feed stopping on request");
                return Ok(());
            }

            match msg {
                Ok(Message::Text(text)) => {
                    self.handle_message(&text).await;
                }
                Ok(Message::Ping(_)) => {
                    // tungstenite answers with a pong automatically
                    debug!("received ping");
                }
                Ok(Message::Close(frame)) => {
                    let reason = frame
                        .map(|f| f.reason.to_string())
                        .unwrap_or_else(|| "unknown".to_string());
                    warn!("WebSocket closed: {reason}");
                    return Err(LiveFeedError::Closed(reason));
                }
                Err(e) => {
                    error!("WebSocket error: {e}");
                    return Err(LiveFeedError::WebSocket(e));
                }
                _ => {}
            }
        }

        Err(LiveFeedError::Closed("stream ended".to_string()))
    }

    /// Handle one stream message; only a closed candle touches the
    /// snapshot.
    async fn handle_message(&mut self, text: &str) {
        self.stats.messages_received += 1;

        let event: KlineEvent = match serde_json::from_str(text) {
            Ok(event) => event,
            Err(e) => {
                self.stats.parse_errors += 1;
                if self.stats.parse_errors <= 5 {
                    warn!("failed to parse kline message: {e}");
                }
                return;
            }
        };

        if event.event_type != "kline" || !event.kline.is_closed {
            return;
        }

        let Some(bar) = event.kline.to_bar() else {
            self.stats.parse_errors += 1;
            return;
        };

        debug!(
            close = bar.close,
            volume = bar.volume,
            timestamp_ms = bar.timestamp_ms(),
            "closed candle received"
        );

        self.stats.closed_candles += 1;
        self.stats.last_update = Some(Utc::now());
        self.snapshot
            .write()
            .await
            .insert(event.kline.symbol.clone(), bar);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kline_json(is_closed: bool) -> String {
        format!(
            r#"{{"e":"kline","E":1704153899000,"s":"BTCUSDT","k":{{
                "t":1704153600000,"T":1704153899999,"s":"BTCUSDT","i":"5m",
                "f":100,"L":200,"o":"42000.50","c":"42050.75","h":"42100.00",
                "l":"41900.25","v":"123.456","n":3456,"x":{is_closed},
                "q":"5190000.00","V":"70.5","Q":"2965000.00","B":"0"}}}}"#
        )
    }

    fn empty_snapshot() -> CandleSnapshot {
        Arc::new(RwLock::new(HashMap::new()))
    }

    #[test]
    fn build_url_includes_symbol_and_interval() {
        let feed = KlineFeed::new(KlineFeedConfig::default(), empty_snapshot());
        let url = feed.build_url();
        assert!(url.starts_with("wss://stream.binance.com"));
        assert!(url.ends_with("btcusdt@kline_5m"));
    }

    #[tokio::test]
    async fn closed_candle_updates_snapshot() {
        let snapshot = empty_snapshot();
        let mut feed = KlineFeed::new(KlineFeedConfig::default(), snapshot.clone());

        feed.handle_message(&kline_json(true)).await;

        let map = snapshot.read().await;
        let bar = map.get("BTCUSDT").unwrap();
        assert_eq!(bar.timestamp_ms(), 1704153600000);
        assert_eq!(bar.close, 42050.75);
        assert_eq!(bar.number_of_trades, 3456);
        assert_eq!(bar.taker_buy_base, 70.5);
        assert_eq!(feed.stats().closed_candles, 1);
    }

    #[tokio::test]
    async fn open_candle_is_ignored() {
        let snapshot = empty_snapshot();
        let mut feed = KlineFeed::new(KlineFeedConfig::default(), snapshot.clone());

        feed.handle_message(&kline_json(false)).await;

        assert!(snapshot.read().await.is_empty());
        assert_eq!(feed.stats().messages_received, 1);
        assert_eq!(feed.stats().closed_candles, 0);
    }

    #[tokio::test]
    async fn invalid_json_counts_a_parse_error() {
        let snapshot = empty_snapshot();
        let mut feed = KlineFeed::new(KlineFeedConfig::default(), snapshot.clone());

        feed.handle_message("not json").await;

        assert_eq!(feed.stats().parse_errors, 1);
        assert!(snapshot.read().await.is_empty());
    }

    #[tokio::test]
    async fn later_candle_replaces_earlier_snapshot() {
        let snapshot = empty_snapshot();
        let mut feed = KlineFeed::new(KlineFeedConfig::default(), snapshot.clone());

        feed.handle_message(&kline_json(true)).await;
        let newer = kline_json(true).replace("1704153600000", "1704153900000");
        feed.handle_message(&newer).await;

        let map = snapshot.read().await;
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("BTCUSDT").unwrap().timestamp_ms(), 1704153900000);
        assert_eq!(feed.stats().closed_candles, 2);
    }

    #[test]
    fn stop_handle_signals() {
        let feed = KlineFeed::new(KlineFeedConfig::default(), empty_snapshot());
        let stop = feed.stop_handle();
        assert!(!stop.load(Ordering::SeqCst));
        stop.store(true, Ordering::SeqCst);
        assert!(stop.load(Ordering::SeqCst));
    }
}
