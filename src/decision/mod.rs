use crate::asset::{Asset, VolRegime};
use crate::errors::{EngineError, EngineResult};
use crate::feature::FeatureVector;
use crate::market::{Market, MarketTracker};
use crate::models::Model;
use crate::persistence::records::{Decision, EvaluationRecord, Outcome, Side, TradeOutcome, TradeRecord};
use crate::persistence::Store;
use std::collections::HashMap;
use std::sync::Arc;

/// Top-level observable events, emitted in registration order per spec 4.I.
/// Forwards from the registry and price-feed client are translated into
/// this same enum at the wiring layer (main.rs) so operators subscribe once.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    Started,
    Stopped,
    MarketAdded { condition_id: String, slug: String, asset: Asset },
    MarketRemoved { condition_id: String },
    Signal(Signal),
    Execution { success: bool, order_id: Option<String> },
    PaperPosition { condition_id: String },
    PaperSettlement { condition_id: String, outcome: Outcome, won: bool, pnl: f64 },
    Error(String),
}

#[derive(Debug, Clone)]
pub struct Signal {
    pub condition_id: String,
    pub slug: String,
    pub asset: Asset,
    pub side: Side,
    pub token_id: String,
    pub size: f64,
    pub probability: f64,
    pub linear_combination: f64,
    pub state_minute: u8,
    pub features: FeatureVector,
    pub entry_price: f64,
    pub timestamp: i64,
    pub imputed_count: i64,
}

#[derive(Debug, Clone)]
pub struct DecisionConfig {
    pub position_size_usd: f64,
    pub no_threshold: f64,
    pub yes_threshold: f64,
    pub entry_price_cap: f64,
    pub symbols: Vec<Asset>,
    pub threshold_bps: HashMap<Asset, f64>,
    pub state_minutes: Vec<u8>,
    pub horizon_minutes: u8,
    pub dry_run: bool,
}

impl DecisionConfig {
    /// Fail-fast construction-time validation, per spec 4.G.
    pub fn validate(&self) -> EngineResult<()> {
        if self.position_size_usd <= 0.0 {
            return Err(EngineError::Config("positionSizeUsd must be > 0".into()));
        }
        if !(0.0 < self.no_threshold && self.no_threshold < self.yes_threshold && self.yes_threshold < 1.0) {
            return Err(EngineError::Config("require 0 < noThreshold < yesThreshold < 1".into()));
        }
        if !(0.0 < self.entry_price_cap && self.entry_price_cap <= 1.0) {
            return Err(EngineError::Config("require 0 < entryPriceCap <= 1".into()));
        }
        if self.symbols.is_empty() {
            return Err(EngineError::Config("symbols must be non-empty".into()));
        }
        for asset in &self.symbols {
            if !self.threshold_bps.contains_key(asset) {
                return Err(EngineError::Config(format!("thresholdBps missing entry for {asset}")));
            }
        }
        for m in &self.state_minutes {
            if *m > 14 {
                return Err(EngineError::Config(format!("stateMinutes entry {m} out of range [0,14]")));
            }
        }
        if self.horizon_minutes != 15 {
            return Err(EngineError::Config("horizonMinutes must be 15".into()));
        }
        Ok(())
    }
}

pub struct DecisionOutput {
    pub evaluation: EvaluationRecord,
    pub signal: Option<Signal>,
}

/// Live-resolved market token prices for one tracker at evaluation time.
pub struct MarketPrices {
    pub up_token_id: String,
    pub down_token_id: String,
    pub yes_price: f64,
    pub no_price: f64,
}

impl From<&Market> for MarketPrices {
    fn from(m: &Market) -> Self {
        Self {
            up_token_id: m.up_token_id.clone(),
            down_token_id: m.down_token_id.clone(),
            yes_price: m.yes_price,
            no_price: m.no_price,
        }
    }
}

/// One resident paper position, mirroring an in-flight `TradeRecord` in
/// memory until a resolution event settles it.
#[derive(Debug, Clone)]
pub struct PaperPosition {
    pub condition_id: String,
    pub side: Side,
    pub entry_price: f64,
    pub size: f64,
}

/// Pure gating + dispatch core, mirroring spec 4.G verbatim. I/O (order
/// submission, persistence) is performed by the caller using the returned
/// `Signal`/`DecisionOutput`; this keeps the evaluation step itself
/// synchronous and testable without a runtime.
pub struct DecisionEngine {
    config: DecisionConfig,
    models: HashMap<Asset, Arc<Model>>,
}

impl DecisionEngine {
    pub fn new(config: DecisionConfig, models: HashMap<Asset, Arc<Model>>) -> EngineResult<Self> {
        config.validate()?;
        Ok(Self { config, models })
    }

    /// Evaluate one tracker at a minute boundary. Returns `None` if the
    /// tracker is already traded or the state minute is not gated.
    pub fn evaluate(
        &self,
        tracker: &mut MarketTracker,
        prices: &MarketPrices,
        features: FeatureVector,
    ) -> EngineResult<Option<DecisionOutput>> {
        if tracker.traded || !self.config.state_minutes.contains(&features.state_minute) {
            return Ok(None);
        }

        let model = self
            .models
            .get(&tracker.asset)
            .ok_or_else(|| EngineError::ModelLoad(format!("no model registered for {}", tracker.asset)))?;
        let prediction = model.predict(&tracker.asset.to_string(), &features.to_map())?;

        let (mut decision, mut reason, entry_price, side, token_id) =
            if prediction.probability >= self.config.yes_threshold {
                (
                    Decision::Yes,
                    "probability \u{2265} YES threshold".to_string(),
                    prices.yes_price,
                    Side::Yes,
                    prices.up_token_id.clone(),
                )
            } else if prediction.probability <= self.config.no_threshold {
                (
                    Decision::No,
                    "probability \u{2264} NO threshold".to_string(),
                    prices.no_price,
                    Side::No,
                    prices.down_token_id.clone(),
                )
            } else {
                (Decision::Skip, "in uncertain range".to_string(), 0.0, Side::Yes, String::new())
            };

        if decision != Decision::Skip && entry_price > self.config.entry_price_cap {
            decision = Decision::Skip;
            reason = format!("entry price > cap ({entry_price:.4} > {:.4})", self.config.entry_price_cap);
        }

        let evaluation = EvaluationRecord {
            id: None,
            condition_id: tracker.condition_id.clone(),
            slug: tracker.slug.clone(),
            symbol: tracker.asset.to_string(),
            ts: features.timestamp,
            state_minute: features.state_minute,
            model_probability: prediction.probability,
            linear_combination: prediction.linear_combination,
            imputed_count: prediction.imputed_count as i64,
            market_price_yes: prices.yes_price,
            market_price_no: prices.no_price,
            decision,
            reason,
            features,
        };

        if decision == Decision::Skip {
            return Ok(Some(DecisionOutput { evaluation, signal: None }));
        }

        // Marking traded before any async side effect prevents duplicate
        // signals on subsequent ticks in the same window.
        tracker.traded = true;

        let signal = Signal {
            condition_id: tracker.condition_id.clone(),
            slug: tracker.slug.clone(),
            asset: tracker.asset,
            side,
            token_id,
            size: self.config.position_size_usd,
            probability: prediction.probability,
            linear_combination: prediction.linear_combination,
            state_minute: evaluation.state_minute,
            features: evaluation.features,
            entry_price,
            timestamp: evaluation.ts,
            imputed_count: prediction.imputed_count as i64,
        };

        Ok(Some(DecisionOutput { evaluation, signal: Some(signal) }))
    }

    pub fn dry_run(&self) -> bool {
        self.config.dry_run
    }

    /// Build the `TradeRecord` persisted alongside a non-SKIP signal
    /// (identical contract whether the signal was live or paper).
    pub fn build_trade_record(
        &self,
        signal: &Signal,
        window_open_price: f64,
        volatility_regime: Option<VolRegime>,
    ) -> TradeRecord {
        TradeRecord {
            id: None,
            condition_id: signal.condition_id.clone(),
            slug: signal.slug.clone(),
            symbol: signal.asset.to_string(),
            side: signal.side,
            entry_price: signal.entry_price,
            position_size: signal.size,
            signal_ts: signal.timestamp,
            probability: signal.probability,
            linear_combination: signal.linear_combination,
            imputed_count: signal.imputed_count,
            features: signal.features,
            state_minute: signal.state_minute,
            hour_of_day: signal.features.hour_of_day,
            day_of_week: signal.features.day_of_week,
            volatility_regime,
            volatility_5m: signal.features.volatility_5m,
            window_open_price,
        }
    }
}

/// In-memory book of open paper positions, settled by resolution events.
#[derive(Default)]
pub struct PaperBook {
    positions: HashMap<String, PaperPosition>,
    pub cumulative_pnl: f64,
}

pub struct Settlement {
    pub condition_id: String,
    pub outcome: Outcome,
    pub won: bool,
    pub pnl: f64,
}

impl PaperBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&mut self, position: PaperPosition) {
        self.positions.insert(position.condition_id.clone(), position);
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// conditionIds currently open, for a caller polling window-end status.
    pub fn condition_ids(&self) -> Vec<String> {
        self.positions.keys().cloned().collect()
    }

    /// Settle a resolution event against an open paper position. Returns
    /// `None` if no position is open for this conditionId (already settled,
    /// or a market this process never traded).
    pub fn settle(&mut self, condition_id: &str, winner_is_up: bool) -> Option<Settlement> {
        let position = self.positions.remove(condition_id)?;
        let outcome = if winner_is_up { Outcome::Up } else { Outcome::Down };
        let won = (position.side == Side::Yes && outcome == Outcome::Up)
            || (position.side == Side::No && outcome == Outcome::Down);
        let pnl = if won {
            (1.0 - position.entry_price) * position.size
        } else {
            -position.entry_price * position.size
        };
        self.cumulative_pnl += pnl;
        Some(Settlement { condition_id: condition_id.to_string(), outcome, won, pnl })
    }

    /// Settle a resolution event, also converting the window's raw
    /// run-up/run-down into max-favorable/max-adverse excursion in the
    /// position's own direction (a No position's favorable move is the
    /// window trading down, so its sign is mirrored).
    pub fn settle_with_excursion(
        &mut self,
        condition_id: &str,
        winner_is_up: bool,
        window_max_run_up: f64,
        window_max_run_down: f64,
    ) -> Option<(Settlement, f64, f64)> {
        let side = self.positions.get(condition_id)?.side;
        let (mfe, mae) = match side {
            Side::Yes => (window_max_run_up, window_max_run_down),
            Side::No => (-window_max_run_down, -window_max_run_up),
        };
        let settlement = self.settle(condition_id, winner_is_up)?;
        Some((settlement, mfe, mae))
    }
}

/// Apply a `Settlement` to the store: update the trade outcome row exactly once.
pub fn persist_settlement(
    store: &Store,
    settlement: &Settlement,
    window_close_price: f64,
    resolution_ts: i64,
    max_favorable_excursion: f64,
    max_adverse_excursion: f64,
    time_to_up_threshold: Option<f64>,
    time_to_down_threshold: Option<f64>,
) -> EngineResult<()> {
    store.update_outcome(
        &settlement.condition_id,
        TradeOutcome {
            outcome: settlement.outcome,
            is_win: settlement.won,
            pnl: settlement.pnl,
            resolution_ts,
            window_close_price,
            max_favorable_excursion,
            max_adverse_excursion,
            time_to_up_threshold,
            time_to_down_threshold,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::logistic::ModelLoader;

    fn sample_config() -> DecisionConfig {
        let mut threshold_bps = HashMap::new();
        threshold_bps.insert(Asset::Btc, 10.0);
        DecisionConfig {
            position_size_usd: 100.0,
            no_threshold: 0.3,
            yes_threshold: 0.7,
            entry_price_cap: 0.70,
            symbols: vec![Asset::Btc],
            threshold_bps,
            state_minutes: (0..=14).collect(),
            horizon_minutes: 15,
            dry_run: true,
        }
    }

    fn sample_model() -> Arc<Model> {
        let raw_model = serde_json::json!({
            "symbols": [{
                "symbol": "BTC",
                "coefficients": [0.0],
                "intercept": 3.0,
                "feature_columns": ["return_1m"]
            }]
        });
        let raw_imputations = serde_json::json!({"BTC": {"return_1m": 0.0}});
        let dir = tempfile::tempdir().unwrap();
        let model_path = dir.path().join("model.json");
        let imp_path = dir.path().join("imputations.json");
        std::fs::write(&model_path, raw_model.to_string()).unwrap();
        std::fs::write(&imp_path, raw_imputations.to_string()).unwrap();
        Arc::new(ModelLoader::load(&model_path, &imp_path).unwrap())
    }

    fn sample_tracker() -> MarketTracker {
        MarketTracker {
            condition_id: "c1".into(),
            slug: "btc-updown-15m-1700000000".into(),
            asset: Asset::Btc,
            window_start: 1_700_000_000_000,
            end_time: 1_700_000_900_000,
            traded: false,
            feature_engine: crate::feature::FeatureEngine::new(Asset::Btc, 10.0),
        }
    }

    fn sample_features(state_minute: u8) -> FeatureVector {
        FeatureVector {
            state_minute,
            minutes_remaining: 15 - state_minute,
            hour_of_day: 0,
            day_of_week: 0,
            return_since_open: 0.0,
            max_run_up: 0.0,
            max_run_down: 0.0,
            return_1m: 0.0,
            return_3m: f64::NAN,
            return_5m: f64::NAN,
            volatility_5m: f64::NAN,
            has_up_hit: false,
            has_down_hit: false,
            first_up_hit_minute: f64::NAN,
            first_down_hit_minute: f64::NAN,
            asset: Asset::Btc,
            timestamp: 1_700_000_000_000,
        }
    }

    fn engine() -> DecisionEngine {
        let mut models = HashMap::new();
        models.insert(Asset::Btc, sample_model());
        DecisionEngine::new(sample_config(), models).unwrap()
    }

    #[test]
    fn config_rejects_invalid_thresholds() {
        let mut config = sample_config();
        config.yes_threshold = 0.2;
        config.no_threshold = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn s1_happy_path_yes_signal() {
        let engine = engine();
        let mut tracker = sample_tracker();
        let prices = MarketPrices {
            up_token_id: "up".into(),
            down_token_id: "down".into(),
            yes_price: 0.50,
            no_price: 0.50,
        };
        let out = engine.evaluate(&mut tracker, &prices, sample_features(0)).unwrap().unwrap();
        assert_eq!(out.evaluation.decision, Decision::Yes);
        let signal = out.signal.unwrap();
        assert_eq!(signal.side, Side::Yes);
        assert_eq!(signal.entry_price, 0.50);
        assert!(signal.probability >= 0.70);
        assert!(tracker.traded);

        // Further ticks in the same window must not re-signal.
        let out2 = engine.evaluate(&mut tracker, &prices, sample_features(1)).unwrap();
        assert!(out2.is_none());
    }

    #[test]
    fn s2_entry_cap_skip() {
        let mut config = sample_config();
        config.entry_price_cap = 0.60;
        let mut models = HashMap::new();
        models.insert(Asset::Btc, sample_model());
        let engine = DecisionEngine::new(config, models).unwrap();
        let mut tracker = sample_tracker();
        let prices = MarketPrices {
            up_token_id: "up".into(),
            down_token_id: "down".into(),
            yes_price: 0.75,
            no_price: 0.25,
        };
        let out = engine.evaluate(&mut tracker, &prices, sample_features(0)).unwrap().unwrap();
        assert_eq!(out.evaluation.decision, Decision::Skip);
        assert!(out.evaluation.reason.contains("entry price > cap"));
        assert!(out.signal.is_none());
        assert!(!tracker.traded);
    }

    #[test]
    fn s3_paper_settlement_win() {
        let mut book = PaperBook::new();
        book.open(PaperPosition { condition_id: "c1".into(), side: Side::Yes, entry_price: 0.50, size: 100.0 });
        let settlement = book.settle("c1", true).unwrap();
        assert!(settlement.won);
        assert_eq!(settlement.pnl, 50.0);
        assert_eq!(book.cumulative_pnl, 50.0);
        assert!(book.is_empty());
    }

    #[test]
    fn settle_loss_pnl_is_negative_entry_times_size() {
        let mut book = PaperBook::new();
        book.open(PaperPosition { condition_id: "c2".into(), side: Side::No, entry_price: 0.40, size: 100.0 });
        let settlement = book.settle("c2", true).unwrap();
        assert!(!settlement.won);
        assert_eq!(settlement.pnl, -40.0);
    }

    #[test]
    fn settle_unknown_condition_id_returns_none() {
        let mut book = PaperBook::new();
        assert!(book.settle("missing", true).is_none());
    }

    #[test]
    fn traded_tracker_is_never_reevaluated() {
        let engine = engine();
        let mut tracker = sample_tracker();
        tracker.traded = true;
        let prices = MarketPrices {
            up_token_id: "up".into(),
            down_token_id: "down".into(),
            yes_price: 0.50,
            no_price: 0.50,
        };
        assert!(engine.evaluate(&mut tracker, &prices, sample_features(3)).unwrap().is_none());
    }
}
