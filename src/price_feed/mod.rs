pub mod rate_limiter;

use crate::asset::Asset;
use crate::errors::{EngineError, EngineResult};
use crate::events::Emitter;
use rate_limiter::TokenBucket;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

const MAX_URL_LEN: usize = 2048;
const BASE_URL: &str = "wss://stream.binance.com:9443/stream?streams=";
const CLOCK_SKEW_MS: i64 = 60_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PriceTick {
    pub asset: Asset,
    pub price: f64,
    pub timestamp: i64,
}

/// Named events emitted by the price-feed client, per spec 4.D/4.I.
#[derive(Debug, Clone)]
pub enum PriceFeedEvent {
    Connected,
    Disconnected,
    Price(PriceTick),
    Error(String),
    RateLimitExceeded,
}

#[derive(Debug, Clone)]
pub struct PriceFeedConfig {
    pub symbols: Vec<Asset>,
    pub auto_reconnect: bool,
    pub reconnect_delay_ms: u64,
    pub ping_interval_ms: u64,
    pub max_reconnect_attempts: Option<u32>,
    pub max_messages_per_second: u32,
    pub max_burst_messages: u32,
}

impl Default for PriceFeedConfig {
    fn default() -> Self {
        Self {
            symbols: Vec::new(),
            auto_reconnect: true,
            reconnect_delay_ms: 5_000,
            ping_interval_ms: 30_000,
            max_reconnect_attempts: Some(100),
            max_messages_per_second: 500,
            max_burst_messages: 1000,
        }
    }
}

/// Symbols must be `[a-z0-9]+` once lowercased; any other character is rejected.
fn validate_symbol(symbol: &str) -> EngineResult<String> {
    let lower = symbol.to_ascii_lowercase();
    if lower.is_empty() || !lower.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()) {
        return Err(EngineError::StreamValidation(format!("invalid stream symbol: {symbol}")));
    }
    Ok(lower)
}

/// Build the combined-streams URL for `symbols`. Empty input means "connect
/// is a no-op" and returns `Ok(None)`.
pub fn build_stream_url(symbols: &[Asset]) -> EngineResult<Option<String>> {
    if symbols.is_empty() {
        return Ok(None);
    }
    let mut topics = Vec::with_capacity(symbols.len());
    for asset in symbols {
        let sym = validate_symbol(asset.exchange_symbol())?;
        topics.push(format!("{sym}@aggTrade"));
    }
    let url = format!("{BASE_URL}{}", topics.join("/"));
    if url.len() > MAX_URL_LEN {
        return Err(EngineError::StreamValidation(format!(
            "stream URL exceeds {MAX_URL_LEN} bytes ({} bytes)",
            url.len()
        )));
    }
    Ok(Some(url))
}

/// Precomputed canonical-case symbol lookup, built once at client construction.
fn build_symbol_map(symbols: &[Asset]) -> HashMap<String, Asset> {
    symbols
        .iter()
        .map(|a| (a.exchange_symbol().to_string(), *a))
        .collect()
}

#[derive(Debug, Deserialize)]
struct AggTradeFrame {
    #[allow(dead_code)]
    stream: String,
    data: AggTradeData,
}

#[derive(Debug, Deserialize)]
struct AggTradeData {
    e: String,
    s: String,
    p: String,
    #[serde(rename = "T")]
    t: i64,
}

/// Parse one raw text frame into a `PriceTick`, applying the full
/// parse/validate/replay-check/symbol-lookup pipeline from spec 4.D steps 2-6.
fn parse_frame(text: &str, now_ms: i64, symbol_map: &HashMap<String, Asset>) -> EngineResult<PriceTick> {
    let frame: AggTradeFrame =
        serde_json::from_str(text).map_err(|e| EngineError::StreamParse(e.to_string()))?;

    if frame.data.e != "aggTrade" {
        return Err(EngineError::StreamValidation(format!(
            "unexpected event type: {}",
            frame.data.e
        )));
    }

    let price: f64 = frame
        .data
        .p
        .parse()
        .map_err(|_| EngineError::StreamValidation(format!("unparseable price: {}", frame.data.p)))?;
    if !price.is_finite() || price <= 0.0 {
        return Err(EngineError::StreamValidation(format!("non-positive or non-finite price: {price}")));
    }

    if (frame.data.t - now_ms).abs() > CLOCK_SKEW_MS {
        return Err(EngineError::StreamReplay(format!(
            "frame timestamp {} outside ±{CLOCK_SKEW_MS}ms of now {now_ms}",
            frame.data.t
        )));
    }

    let asset = symbol_map
        .get(&frame.data.s.to_ascii_lowercase())
        .copied()
        .ok_or_else(|| EngineError::StreamValidation(format!("unknown symbol: {}", frame.data.s)))?;

    Ok(PriceTick { asset, price, timestamp: frame.data.t })
}

fn now_ms() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as i64
}

/// Reconnecting WebSocket client for the Binance combined aggTrade stream.
/// The handler set (`events`) is constructed once and reused across
/// reconnects; only the socket itself is recreated.
pub struct PriceFeedClient {
    config: PriceFeedConfig,
    symbol_map: HashMap<String, Asset>,
    pub events: Emitter<PriceFeedEvent>,
    state: ConnectionState,
    reconnect_attempts: u32,
    bucket: TokenBucket,
}

impl PriceFeedClient {
    pub fn new(config: PriceFeedConfig) -> Self {
        let symbol_map = build_symbol_map(&config.symbols);
        let bucket = TokenBucket::new(config.max_messages_per_second, config.max_burst_messages, now_ms());
        Self {
            config,
            symbol_map,
            events: Emitter::new(),
            state: ConnectionState::Disconnected,
            reconnect_attempts: 0,
            bucket,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    /// One inbound text frame: rate-limit, parse/validate, and emit the
    /// appropriate named event. Never returns an error -- all failure paths
    /// are observable-only per spec 4.D/4.I (StreamError never disconnects).
    fn handle_frame(&mut self, text: &str) {
        let now = now_ms();
        if !self.bucket.try_consume(now) {
            self.events.emit(&PriceFeedEvent::RateLimitExceeded, |_| {});
            return;
        }
        match parse_frame(text, now, &self.symbol_map) {
            Ok(tick) => self.events.emit(&PriceFeedEvent::Price(tick), |_| {}),
            Err(e) => self.events.emit(&PriceFeedEvent::Error(e.to_string()), |_| {}),
        }
    }

    fn on_connected(&mut self) {
        self.state = ConnectionState::Connected;
        self.reconnect_attempts = 0;
        self.events.emit(&PriceFeedEvent::Connected, |_| {});
    }

    fn on_disconnected(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.events.emit(&PriceFeedEvent::Disconnected, |_| {});
    }

    /// Drive the connect/reconnect loop until the config disables
    /// reconnection or the attempt cap is hit. Runs until cancelled by the
    /// caller dropping the returned future (e.g. via `tokio::select!`).
    pub async fn run(&mut self) {
        let url = match build_stream_url(&self.config.symbols) {
            Ok(None) => return,
            Ok(Some(url)) => url,
            Err(e) => {
                self.events.emit(&PriceFeedEvent::Error(e.to_string()), |_| {});
                return;
            }
        };

        loop {
            self.state = ConnectionState::Connecting;
            match self.connect_once(&url).await {
                Ok(()) => {
                    // connect_once only returns Ok after a clean, intentional close.
                }
                Err(e) => {
                    self.events.emit(&PriceFeedEvent::Error(e.to_string()), |_| {});
                }
            }
            self.on_disconnected();

            if !self.config.auto_reconnect {
                return;
            }
            if let Some(max) = self.config.max_reconnect_attempts {
                if self.reconnect_attempts >= max {
                    self.events.emit(
                        &PriceFeedEvent::Error("max reconnect attempts reached".into()),
                        |_| {},
                    );
                    return;
                }
            }
            self.reconnect_attempts += 1;
            self.state = ConnectionState::Reconnecting;
            tokio::time::sleep(std::time::Duration::from_millis(self.config.reconnect_delay_ms)).await;
        }
    }

    async fn connect_once(&mut self, url: &str) -> EngineResult<()> {
        use futures_util::{SinkExt, StreamExt};
        use tokio_tungstenite::tungstenite::Message;

        let (ws_stream, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| EngineError::ConnectionTransient(e.to_string()))?;
        self.on_connected();

        let (mut write, mut read) = ws_stream.split();
        let mut ping_timer = tokio::time::interval(std::time::Duration::from_millis(self.config.ping_interval_ms));
        let mut last_pong = now_ms();

        loop {
            tokio::select! {
                _ = ping_timer.tick() => {
                    if write.send(Message::Ping(Vec::new())).await.is_err() {
                        return Err(EngineError::ConnectionTransient("ping send failed".into()));
                    }
                    if now_ms() - last_pong > 2 * self.config.ping_interval_ms as i64 {
                        return Err(EngineError::ConnectionTransient("heartbeat timeout".into()));
                    }
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => self.handle_frame(&text),
                        Some(Ok(Message::Pong(_))) => last_pong = now_ms(),
                        Some(Ok(Message::Close(_))) | None => return Ok(()),
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(EngineError::ConnectionTransient(e.to_string())),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_symbol_list_is_connect_noop() {
        assert_eq!(build_stream_url(&[]).unwrap(), None);
    }

    #[test]
    fn stream_url_joins_lowercased_topics() {
        let url = build_stream_url(&[Asset::Btc, Asset::Eth]).unwrap().unwrap();
        assert!(url.contains("btcusdt@aggTrade"));
        assert!(url.contains("ethusdt@aggTrade"));
        assert!(url.contains('/'));
    }

    #[test]
    fn rejects_invalid_symbol_characters() {
        assert!(validate_symbol("BTC-USD").is_err());
        assert!(validate_symbol("").is_err());
        assert!(validate_symbol("btcusdt").is_ok());
    }

    fn map() -> HashMap<String, Asset> {
        build_symbol_map(&[Asset::Btc])
    }

    #[test]
    fn parses_valid_agg_trade_frame() {
        let now = 1_700_000_000_000i64;
        let text = format!(
            r#"{{"stream":"btcusdt@aggTrade","data":{{"e":"aggTrade","E":1,"s":"BTCUSDT","p":"98500.12","T":{now}}}}}"#
        );
        let tick = parse_frame(&text, now, &map()).unwrap();
        assert_eq!(tick.asset, Asset::Btc);
        assert!((tick.price - 98500.12).abs() < 1e-9);
    }

    #[test]
    fn rejects_wrong_event_type() {
        let now = 1_700_000_000_000i64;
        let text = format!(
            r#"{{"stream":"btcusdt@depth","data":{{"e":"depthUpdate","E":1,"s":"BTCUSDT","p":"1","T":{now}}}}}"#
        );
        assert!(parse_frame(&text, now, &map()).is_err());
    }

    #[test]
    fn rejects_clock_skew_beyond_60s() {
        let now = 1_700_000_000_000i64;
        let stale = now - 120_000;
        let text = format!(
            r#"{{"stream":"btcusdt@aggTrade","data":{{"e":"aggTrade","E":1,"s":"BTCUSDT","p":"98500","T":{stale}}}}}"#
        );
        match parse_frame(&text, now, &map()) {
            Err(EngineError::StreamReplay(_)) => {}
            other => panic!("expected StreamReplay, got {other:?}"),
        }
    }

    #[test]
    fn rejects_non_positive_price() {
        let now = 1_700_000_000_000i64;
        let text = format!(
            r#"{{"stream":"btcusdt@aggTrade","data":{{"e":"aggTrade","E":1,"s":"BTCUSDT","p":"0","T":{now}}}}}"#
        );
        assert!(parse_frame(&text, now, &map()).is_err());
    }

    #[test]
    fn unknown_symbol_rejected() {
        let now = 1_700_000_000_000i64;
        let text = format!(
            r#"{{"stream":"ethusdt@aggTrade","data":{{"e":"aggTrade","E":1,"s":"ETHUSDT","p":"100","T":{now}}}}}"#
        );
        assert!(parse_frame(&text, now, &map()).is_err());
    }

    #[test]
    fn reconnect_counter_resets_after_second_connect() {
        let mut client = PriceFeedClient::new(PriceFeedConfig {
            symbols: vec![Asset::Btc],
            ..Default::default()
        });
        client.reconnect_attempts = 3;
        client.on_connected();
        assert_eq!(client.reconnect_attempts(), 0);
        client.reconnect_attempts = 5;
        client.on_connected();
        assert_eq!(client.reconnect_attempts(), 0);
    }
}
