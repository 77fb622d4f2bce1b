use crate::asset::VolRegime;
use crate::feature::FeatureVector;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Yes,
    No,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Outcome {
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Decision {
    Yes,
    No,
    Skip,
}

/// Row to insert into `trades` (+ the paired `trade_features` row).
#[derive(Debug, Clone)]
pub struct TradeRecord {
    pub id: Option<i64>,
    pub condition_id: String,
    pub slug: String,
    pub symbol: String,
    pub side: Side,
    pub entry_price: f64,
    pub position_size: f64,
    pub signal_ts: i64,
    pub probability: f64,
    pub linear_combination: f64,
    pub imputed_count: i64,
    pub features: FeatureVector,
    pub state_minute: u8,
    pub hour_of_day: u8,
    pub day_of_week: u8,
    pub volatility_regime: Option<VolRegime>,
    pub volatility_5m: f64,
    pub window_open_price: f64,
}

/// Fields applied exactly once per trade via `update_outcome`.
#[derive(Debug, Clone)]
pub struct TradeOutcome {
    pub outcome: Outcome,
    pub is_win: bool,
    pub pnl: f64,
    pub resolution_ts: i64,
    pub window_close_price: f64,
    pub max_favorable_excursion: f64,
    pub max_adverse_excursion: f64,
    pub time_to_up_threshold: Option<f64>,
    pub time_to_down_threshold: Option<f64>,
}

#[derive(Debug, Clone, Copy)]
pub struct MinutePrice {
    pub trade_id: i64,
    pub minute_offset: u8,
    pub price: f64,
    pub ts: i64,
}

/// One (market, stateMinute) evaluation record, whether or not a trade was emitted.
#[derive(Debug, Clone)]
pub struct EvaluationRecord {
    pub id: Option<i64>,
    pub condition_id: String,
    pub slug: String,
    pub symbol: String,
    pub ts: i64,
    pub state_minute: u8,
    pub model_probability: f64,
    pub linear_combination: f64,
    pub imputed_count: i64,
    pub market_price_yes: f64,
    pub market_price_no: f64,
    pub decision: Decision,
    pub reason: String,
    pub features: FeatureVector,
}

#[derive(Debug, Clone, Serialize)]
pub struct TradeRow {
    pub id: i64,
    pub condition_id: String,
    pub slug: String,
    pub symbol: String,
    pub side: String,
    pub entry_price: f64,
    pub position_size: f64,
    pub signal_ts: i64,
    pub probability: f64,
    pub outcome: Option<String>,
    pub is_win: Option<bool>,
    pub pnl: Option<f64>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreStats {
    pub total_trades: i64,
    pub pending_trades: i64,
    pub resolved_trades: i64,
    pub db_size_bytes: i64,
    pub oldest_trade: Option<i64>,
    pub newest_trade: Option<i64>,
}
