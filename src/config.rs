use crate::asset::Asset;
use crate::decision::DecisionConfig;
use crate::persistence::{PersistenceConfig, SyncMode};
use crate::price_feed::PriceFeedConfig;
use crate::errors::{EngineError, EngineResult};
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub model_path: PathBuf,
    pub imputations_path: PathBuf,
    pub order_sink_base_url: String,
    pub market_query_base_url: String,
    pub resolution_base_url: String,
    pub service_name: String,
    pub app_name: String,
    pub env_name: String,
    pub strategy_name: String,
    pub lookahead_minutes: u32,
    pub decision: DecisionConfig,
    pub price_feed: PriceFeedConfig,
    pub persistence: PersistenceConfig,
}

impl AppConfig {
    pub fn from_env() -> EngineResult<Self> {
        dotenvy::dotenv().ok();

        let symbols = parse_symbol_list(&env_var_or("ASSETS", "BTC,ETH,SOL,XRP"))?;

        let mut threshold_bps = HashMap::new();
        for asset in &symbols {
            let key = format!("THRESHOLD_BPS_{asset}");
            let default = asset.default_threshold_bps().to_string();
            let value = env_var_or(&key, &default)
                .parse::<f64>()
                .map_err(|e| EngineError::Config(format!("{key}: {e}")))?;
            threshold_bps.insert(*asset, value);
        }

        let position_size_usd = env_var_or("POSITION_SIZE_USD", "100")
            .parse::<f64>()
            .map_err(|e| EngineError::Config(format!("POSITION_SIZE_USD: {e}")))?;
        let no_threshold = env_var_or("NO_THRESHOLD", "0.30")
            .parse::<f64>()
            .map_err(|e| EngineError::Config(format!("NO_THRESHOLD: {e}")))?;
        let yes_threshold = env_var_or("YES_THRESHOLD", "0.70")
            .parse::<f64>()
            .map_err(|e| EngineError::Config(format!("YES_THRESHOLD: {e}")))?;
        let entry_price_cap = env_var_or("ENTRY_PRICE_CAP", "0.70")
            .parse::<f64>()
            .map_err(|e| EngineError::Config(format!("ENTRY_PRICE_CAP: {e}")))?;
        let state_minutes = parse_state_minutes(&env_var_or("STATE_MINUTES", "0,1,2,3,4,5,6,7,8,9,10,11,12,13,14"))?;
        let dry_run = env_var_or("DRY_RUN", "true")
            .parse::<bool>()
            .map_err(|e| EngineError::Config(format!("DRY_RUN: {e}")))?;

        let decision = DecisionConfig {
            position_size_usd,
            no_threshold,
            yes_threshold,
            entry_price_cap,
            symbols: symbols.clone(),
            threshold_bps: threshold_bps.clone(),
            state_minutes,
            horizon_minutes: 15,
            dry_run,
        };
        decision.validate()?;

        let price_feed = PriceFeedConfig {
            symbols: symbols.clone(),
            auto_reconnect: env_var_or("PRICE_FEED_AUTO_RECONNECT", "true")
                .parse::<bool>()
                .map_err(|e| EngineError::Config(format!("PRICE_FEED_AUTO_RECONNECT: {e}")))?,
            reconnect_delay_ms: env_var_or("PRICE_FEED_RECONNECT_DELAY_MS", "5000")
                .parse::<u64>()
                .map_err(|e| EngineError::Config(format!("PRICE_FEED_RECONNECT_DELAY_MS: {e}")))?,
            ping_interval_ms: env_var_or("PRICE_FEED_PING_INTERVAL_MS", "30000")
                .parse::<u64>()
                .map_err(|e| EngineError::Config(format!("PRICE_FEED_PING_INTERVAL_MS: {e}")))?,
            max_reconnect_attempts: Some(
                env_var_or("PRICE_FEED_MAX_RECONNECT_ATTEMPTS", "100")
                    .parse::<u32>()
                    .map_err(|e| EngineError::Config(format!("PRICE_FEED_MAX_RECONNECT_ATTEMPTS: {e}")))?,
            ),
            max_messages_per_second: env_var_or("PRICE_FEED_MAX_MSGS_PER_SEC", "500")
                .parse::<u32>()
                .map_err(|e| EngineError::Config(format!("PRICE_FEED_MAX_MSGS_PER_SEC: {e}")))?,
            max_burst_messages: env_var_or("PRICE_FEED_MAX_BURST", "1000")
                .parse::<u32>()
                .map_err(|e| EngineError::Config(format!("PRICE_FEED_MAX_BURST: {e}")))?,
        };

        let persistence = PersistenceConfig {
            enabled: env_var_or("PERSISTENCE_ENABLED", "true")
                .parse::<bool>()
                .map_err(|e| EngineError::Config(format!("PERSISTENCE_ENABLED: {e}")))?,
            db_path: PathBuf::from(env_var_or("DB_PATH", "data/engine.db")),
            sync_mode: match env_var_or("DB_SYNC_MODE", "async").as_str() {
                "sync" => SyncMode::Sync,
                "async" => SyncMode::Async,
                other => return Err(EngineError::Config(format!("DB_SYNC_MODE: unknown mode {other}"))),
            },
            vacuum_interval_hours: env_var_or("VACUUM_INTERVAL_HOURS", "24")
                .parse::<u64>()
                .map_err(|e| EngineError::Config(format!("VACUUM_INTERVAL_HOURS: {e}")))?,
            allowed_roots: vec!["data".into(), "test-data".into()],
        };

        Ok(Self {
            model_path: PathBuf::from(env_var_or("MODEL_PATH", "models/model.json")),
            imputations_path: PathBuf::from(env_var_or("IMPUTATIONS_PATH", "models/imputations.json")),
            order_sink_base_url: env_var_or("ORDER_SINK_BASE_URL", "https://example-exchange.invalid"),
            market_query_base_url: env_var_or("MARKET_QUERY_BASE_URL", "https://example-exchange.invalid"),
            resolution_base_url: env_var_or("RESOLUTION_BASE_URL", "https://example-exchange.invalid"),
            service_name: env_var_or("LOG_SERVICE", "updown-engine"),
            app_name: env_var_or("LOG_APP", "updown-engine"),
            env_name: env_var_or("LOG_ENV", "development"),
            strategy_name: env_var_or("STRATEGY_NAME", "crypto-updown-15m"),
            lookahead_minutes: env_var_or("LOOKAHEAD_MINUTES", "30")
                .parse::<u32>()
                .map_err(|e| EngineError::Config(format!("LOOKAHEAD_MINUTES: {e}")))?,
            decision,
            price_feed,
            persistence,
        })
    }
}

fn parse_symbol_list(raw: &str) -> EngineResult<Vec<Asset>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| Asset::parse(s).ok_or_else(|| EngineError::Config(format!("unknown asset: {s}"))))
        .collect()
}

fn parse_state_minutes(raw: &str) -> EngineResult<Vec<u8>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            let m: u8 = s.parse().map_err(|_| EngineError::Config(format!("invalid state minute: {s}")))?;
            if m > 14 {
                return Err(EngineError::Config(format!("state minute {m} out of range [0,14]")));
            }
            Ok(m)
        })
        .collect()
}

fn env_var_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_symbol_list_rejects_unknown_asset() {
        assert!(parse_symbol_list("BTC,DOGE").is_err());
    }

    #[test]
    fn parse_symbol_list_accepts_known_assets() {
        let parsed = parse_symbol_list(" btc , eth ").unwrap();
        assert_eq!(parsed, vec![Asset::Btc, Asset::Eth]);
    }

    #[test]
    fn parse_state_minutes_rejects_out_of_range() {
        assert!(parse_state_minutes("0,1,15").is_err());
    }
}
