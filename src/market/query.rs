use crate::asset::Asset;
use crate::errors::EngineResult;
use crate::feature::WINDOW_MS;
use async_trait::async_trait;
use serde::Deserialize;

/// A binary up/down market as returned by the external market-query interface.
#[derive(Debug, Clone, Deserialize)]
pub struct Market {
    pub condition_id: String,
    pub slug: String,
    pub asset: Asset,
    pub up_token_id: String,
    pub down_token_id: String,
    pub yes_price: f64,
    pub no_price: f64,
    /// Window end, ms since epoch.
    pub end_date: i64,
    pub active: bool,
}

impl Market {
    /// Window start in ms, derived from the slug's trailing unix-seconds component.
    pub fn window_start(&self) -> Option<i64> {
        let secs: i64 = self.slug.rsplit('-').next()?.parse().ok()?;
        Some(secs * 1000)
    }

    pub fn window_end(&self) -> Option<i64> {
        self.window_start().map(|start| start + WINDOW_MS)
    }

    pub fn minutes_until_end(&self, now_ms: i64) -> f64 {
        (self.end_date - now_ms) as f64 / 60_000.0
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ScanParams {
    pub min_minutes_until_end: f64,
    pub max_minutes_until_end: f64,
    pub limit: usize,
}

/// Abstraction over the external market-query backend, so a paper/test
/// double can stand in for the real REST client.
#[async_trait]
pub trait MarketQuery: Send + Sync {
    async fn get_market(&self, id_or_slug: &str) -> EngineResult<Option<Market>>;
    async fn scan_crypto_short_term_markets(&self, params: ScanParams) -> EngineResult<Vec<Market>>;
}

/// Live implementer backed by a REST market-query endpoint.
pub struct HttpMarketQuery {
    client: reqwest::Client,
    base_url: String,
}

impl HttpMarketQuery {
    pub fn new(base_url: String) -> Self {
        Self { client: reqwest::Client::new(), base_url }
    }
}

#[async_trait]
impl MarketQuery for HttpMarketQuery {
    async fn get_market(&self, id_or_slug: &str) -> EngineResult<Option<Market>> {
        let resp = self
            .client
            .get(format!("{}/markets/{id_or_slug}", self.base_url))
            .send()
            .await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let market: Market = resp.error_for_status()?.json().await?;
        Ok(Some(market))
    }

    async fn scan_crypto_short_term_markets(&self, params: ScanParams) -> EngineResult<Vec<Market>> {
        let resp = self
            .client
            .get(format!("{}/markets", self.base_url))
            .query(&[
                ("min_minutes_until_end", params.min_minutes_until_end.to_string()),
                ("max_minutes_until_end", params.max_minutes_until_end.to_string()),
                ("limit", params.limit.to_string()),
            ])
            .send()
            .await?
            .error_for_status()?;
        let markets: Vec<Market> = resp.json().await?;
        Ok(markets)
    }
}

/// Build the predictive slug for `asset` at a given window-start unix-second slot.
pub fn slug_for(asset: Asset, window_start_unix_sec: i64) -> String {
    format!("{}-updown-15m-{window_start_unix_sec}", asset.slug_coin())
}

/// `nextSlot = ceil(now_sec / 900) * 900`, plus `lookahead_minutes/15 + 1` slots.
pub fn next_slugs(assets: &[Asset], now_sec: i64, lookahead_minutes: u32) -> Vec<String> {
    let next_slot = ((now_sec + 899) / 900) * 900;
    let count = lookahead_minutes / 15 + 1;
    let mut slugs = Vec::with_capacity(assets.len() * count as usize);
    for i in 0..count {
        let slot = next_slot + i as i64 * 900;
        for asset in assets {
            slugs.push(slug_for(*asset, slot));
        }
    }
    slugs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_format_matches_spec() {
        assert_eq!(slug_for(Asset::Btc, 1_700_000_100), "btc-updown-15m-1700000100");
    }

    #[test]
    fn next_slot_rounds_up_to_900s_boundary() {
        let slugs = next_slugs(&[Asset::Btc], 1_700_000_000, 0);
        assert_eq!(slugs.len(), 1);
        let slot: i64 = slugs[0].rsplit('-').next().unwrap().parse().unwrap();
        assert_eq!(slot % 900, 0);
        assert!(slot >= 1_700_000_000);
    }

    #[test]
    fn lookahead_expands_slot_count() {
        let slugs = next_slugs(&[Asset::Btc, Asset::Eth], 1_700_000_000, 30);
        // lookahead/15 + 1 = 3 slots * 2 assets
        assert_eq!(slugs.len(), 6);
    }

    #[test]
    fn window_start_parsed_from_slug() {
        let m = Market {
            condition_id: "c1".into(),
            slug: "btc-updown-15m-1700000100".into(),
            asset: Asset::Btc,
            up_token_id: "u".into(),
            down_token_id: "d".into(),
            yes_price: 0.5,
            no_price: 0.5,
            end_date: 1_700_001_000_000,
            active: true,
        };
        assert_eq!(m.window_start(), Some(1_700_000_100_000));
        assert_eq!(m.window_end(), Some(1_700_000_100_000 + WINDOW_MS));
    }
}
