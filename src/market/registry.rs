use super::query::{Market, MarketQuery, ScanParams};
use crate::asset::Asset;
use crate::events::Emitter;
use crate::feature::{FeatureEngine, FeatureVector};
use crate::price_feed::PriceTick;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanKind {
    Predictive,
    Reactive,
}

#[derive(Debug, Clone)]
pub enum RegistryEvent {
    MarketAdded { condition_id: String, slug: String, asset: Asset, kind: ScanKind },
    MarketRemoved { condition_id: String },
    Error(String),
}

/// Per-active-market state. Exactly one tracker exists per conditionId at a
/// time; the tracker must exist before state-minute 0 fires or the window
/// is permanently lost.
pub struct MarketTracker {
    pub condition_id: String,
    pub slug: String,
    pub asset: Asset,
    pub window_start: i64,
    pub end_time: i64,
    pub traded: bool,
    pub feature_engine: FeatureEngine,
}

/// Owns all market trackers. The decision engine borrows trackers read-only
/// per tick and mutates only the `traded` flag.
pub struct MarketRegistry {
    trackers: HashMap<String, MarketTracker>,
    threshold_bps: HashMap<Asset, f64>,
    pub events: Emitter<RegistryEvent>,
}

impl MarketRegistry {
    pub fn new(threshold_bps: HashMap<Asset, f64>) -> Self {
        Self {
            trackers: HashMap::new(),
            threshold_bps,
            events: Emitter::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.trackers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trackers.is_empty()
    }

    pub fn get(&self, condition_id: &str) -> Option<&MarketTracker> {
        self.trackers.get(condition_id)
    }

    pub fn get_mut(&mut self, condition_id: &str) -> Option<&mut MarketTracker> {
        self.trackers.get_mut(condition_id)
    }

    fn threshold_for(&self, asset: Asset) -> f64 {
        self.threshold_bps.get(&asset).copied().unwrap_or_else(|| asset.default_threshold_bps())
    }

    fn try_add(&mut self, market: &Market, kind: ScanKind) {
        if self.trackers.contains_key(&market.condition_id) {
            return;
        }
        let Some(window_start) = market.window_start() else {
            self.events.emit(
                &RegistryEvent::Error(format!("market {} has unparseable slug", market.slug)),
                |_| {},
            );
            return;
        };
        let tracker = MarketTracker {
            condition_id: market.condition_id.clone(),
            slug: market.slug.clone(),
            asset: market.asset,
            window_start,
            end_time: market.end_date,
            traded: false,
            feature_engine: FeatureEngine::new(market.asset, self.threshold_for(market.asset)),
        };
        self.trackers.insert(market.condition_id.clone(), tracker);
        self.events.emit(
            &RegistryEvent::MarketAdded {
                condition_id: market.condition_id.clone(),
                slug: market.slug.clone(),
                asset: market.asset,
                kind,
            },
            |_| {},
        );
    }

    /// Slug-schedule lookup: create trackers before a market activates.
    pub async fn predictive_scan(
        &mut self,
        query: &dyn MarketQuery,
        assets: &[Asset],
        lookahead_minutes: u32,
        now_sec: i64,
    ) {
        for slug in super::query::next_slugs(assets, now_sec, lookahead_minutes) {
            match query.get_market(&slug).await {
                Ok(Some(market)) if market.active && market.end_date > now_sec * 1000 => {
                    self.try_add(&market, ScanKind::Predictive);
                }
                Ok(_) => {}
                Err(e) => self.events.emit(&RegistryEvent::Error(e.to_string()), |_| {}),
            }
        }
    }

    /// Safety-net query of currently active markets.
    pub async fn reactive_scan(&mut self, query: &dyn MarketQuery) {
        let params = ScanParams { min_minutes_until_end: 1.0, max_minutes_until_end: 30.0, limit: 100 };
        match query.scan_crypto_short_term_markets(params).await {
            Ok(markets) => {
                for market in markets {
                    self.try_add(&market, ScanKind::Reactive);
                }
            }
            Err(e) => self.events.emit(&RegistryEvent::Error(e.to_string()), |_| {}),
        }
    }

    /// Remove trackers whose market end has passed. Returns number removed.
    pub fn cleanup(&mut self, now_ms: i64) -> usize {
        let expired: Vec<String> = self
            .trackers
            .iter()
            .filter(|(_, t)| t.end_time < now_ms)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            self.trackers.remove(id);
            self.events.emit(&RegistryEvent::MarketRemoved { condition_id: id.clone() }, |_| {});
        }
        expired.len()
    }

    /// Forward one price tick to every tracker whose asset matches. Returns
    /// `(condition_id, FeatureVector)` for each tracker that crossed a new
    /// minute boundary. Iteration order is deterministic within a process
    /// but unspecified across runs (HashMap iteration) -- callers must not
    /// depend on ordering.
    pub fn route_price(&mut self, tick: PriceTick) -> Vec<(String, FeatureVector)> {
        let mut out = Vec::new();
        for (condition_id, tracker) in self.trackers.iter_mut() {
            if tracker.asset != tick.asset {
                continue;
            }
            if let Some(fv) = tracker.feature_engine.ingest_price(tick.price, tick.timestamp) {
                out.push((condition_id.clone(), fv));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::EngineResult;
    use async_trait::async_trait;

    struct FakeQuery {
        markets: Vec<Market>,
    }

    #[async_trait]
    impl MarketQuery for FakeQuery {
        async fn get_market(&self, id_or_slug: &str) -> EngineResult<Option<Market>> {
            Ok(self.markets.iter().find(|m| m.slug == id_or_slug || m.condition_id == id_or_slug).cloned())
        }
        async fn scan_crypto_short_term_markets(&self, _params: ScanParams) -> EngineResult<Vec<Market>> {
            Ok(self.markets.clone())
        }
    }

    fn sample_market(condition_id: &str, window_start_sec: i64) -> Market {
        Market {
            condition_id: condition_id.into(),
            slug: format!("btc-updown-15m-{window_start_sec}"),
            asset: Asset::Btc,
            up_token_id: "u".into(),
            down_token_id: "d".into(),
            yes_price: 0.5,
            no_price: 0.5,
            end_date: window_start_sec * 1000 + 900_000,
            active: true,
        }
    }

    fn registry() -> MarketRegistry {
        MarketRegistry::new(HashMap::new())
    }

    #[tokio::test]
    async fn predictive_scan_adds_tracker_once() {
        let query = FakeQuery { markets: vec![sample_market("c1", 1_700_000_100)] };
        let mut reg = registry();
        reg.predictive_scan(&query, &[Asset::Btc], 0, 1_700_000_000).await;
        reg.predictive_scan(&query, &[Asset::Btc], 0, 1_700_000_000).await;
        assert_eq!(reg.len(), 1);
    }

    #[tokio::test]
    async fn reactive_scan_adds_untracked_markets() {
        let query = FakeQuery { markets: vec![sample_market("c2", 1_700_000_200)] };
        let mut reg = registry();
        reg.reactive_scan(&query).await;
        assert_eq!(reg.len(), 1);
        assert!(reg.get("c2").is_some());
    }

    #[test]
    fn cleanup_removes_expired_trackers() {
        let mut reg = registry();
        reg.try_add(&sample_market("c3", 0), ScanKind::Reactive);
        assert_eq!(reg.len(), 1);
        let removed = reg.cleanup(10_000_000);
        assert_eq!(removed, 1);
        assert!(reg.is_empty());
    }

    #[test]
    fn route_price_only_matches_tracker_asset() {
        let mut reg = registry();
        reg.try_add(&sample_market("c4", 0), ScanKind::Reactive);
        let eth_tick = PriceTick { asset: Asset::Eth, price: 100.0, timestamp: 1000 };
        assert!(reg.route_price(eth_tick).is_empty());

        let btc_tick = PriceTick { asset: Asset::Btc, price: 100.0, timestamp: 1000 };
        let hits = reg.route_price(btc_tick);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, "c4");
    }
}
