use crate::asset::Asset;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

pub const WINDOW_MS: i64 = 15 * 60 * 1000;
pub const MINUTE_MS: i64 = 60 * 1000;
pub const HOUR_MS: i64 = 60 * MINUTE_MS;
pub const DAY_MS: i64 = 24 * HOUR_MS;

/// Fixed capacity of the continuous per-asset price ring. Preserved across
/// window transitions -- never cleared on a new window.
const RING_CAPACITY: usize = 32;

/// 17-field feature vector computed at a minute boundary.
/// `NaN` is the intentional "absent feature" sentinel; the model runtime
/// performs imputation downstream.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FeatureVector {
    pub state_minute: u8,
    pub minutes_remaining: u8,
    pub hour_of_day: u8,
    pub day_of_week: u8,
    pub return_since_open: f64,
    pub max_run_up: f64,
    pub max_run_down: f64,
    pub return_1m: f64,
    pub return_3m: f64,
    pub return_5m: f64,
    pub volatility_5m: f64,
    pub has_up_hit: bool,
    pub has_down_hit: bool,
    pub first_up_hit_minute: f64,
    pub first_down_hit_minute: f64,
    pub asset: Asset,
    pub timestamp: i64,
}

impl FeatureVector {
    /// Column-name -> value map the model runtime consumes. Booleans map to
    /// 1.0/0.0 (a present `false` is never imputed because it is finite).
    pub fn to_map(&self) -> std::collections::HashMap<String, f64> {
        let mut m = std::collections::HashMap::with_capacity(13);
        m.insert("state_minute".into(), self.state_minute as f64);
        m.insert("minutes_remaining".into(), self.minutes_remaining as f64);
        m.insert("hour_of_day".into(), self.hour_of_day as f64);
        m.insert("day_of_week".into(), self.day_of_week as f64);
        m.insert("return_since_open".into(), self.return_since_open);
        m.insert("max_run_up".into(), self.max_run_up);
        m.insert("max_run_down".into(), self.max_run_down);
        m.insert("return_1m".into(), self.return_1m);
        m.insert("return_3m".into(), self.return_3m);
        m.insert("return_5m".into(), self.return_5m);
        m.insert("volatility_5m".into(), self.volatility_5m);
        m.insert("has_up_hit".into(), if self.has_up_hit { 1.0 } else { 0.0 });
        m.insert("has_down_hit".into(), if self.has_down_hit { 1.0 } else { 0.0 });
        m
    }
}

#[derive(Debug, Clone, Copy)]
struct RingSlot {
    minute_close_ts: i64,
    price: f64,
}

#[derive(Debug, Clone, Copy)]
struct WindowState {
    window_start: i64,
    open_price: f64,
    max_run_up: f64,
    max_run_down: f64,
    first_up_hit_minute: Option<u8>,
    first_down_hit_minute: Option<u8>,
}

/// Per-asset rolling feature state: a continuous 32-slot price ring
/// (preserved across window transitions) plus the current window's
/// open/run-up/run-down/hit-minute bookkeeping.
pub struct FeatureEngine {
    asset: Asset,
    threshold_bps: f64,
    ring: VecDeque<RingSlot>,
    window: Option<WindowState>,
    last_computed_minute_ts: Option<i64>,
}

impl FeatureEngine {
    pub fn new(asset: Asset, threshold_bps: f64) -> Self {
        Self {
            asset,
            threshold_bps,
            ring: VecDeque::with_capacity(RING_CAPACITY),
            window: None,
            last_computed_minute_ts: None,
        }
    }

    /// Open price of the current window, or `None` before the first tick.
    pub fn window_open_price(&self) -> Option<f64> {
        self.window.map(|w| w.open_price)
    }

    /// Most recent ring price observed, or `None` if no tick has arrived yet.
    pub fn last_price(&self) -> Option<f64> {
        self.ring.back().map(|s| s.price)
    }

    /// Best return-since-open observed this window (≥0), or `None` before the first tick.
    pub fn max_run_up(&self) -> Option<f64> {
        self.window.map(|w| w.max_run_up)
    }

    /// Worst return-since-open observed this window (≤0), or `None` before the first tick.
    pub fn max_run_down(&self) -> Option<f64> {
        self.window.map(|w| w.max_run_down)
    }

    /// State minute the up-hit threshold first latched, if it has.
    pub fn first_up_hit_minute(&self) -> Option<u8> {
        self.window.and_then(|w| w.first_up_hit_minute)
    }

    /// State minute the down-hit threshold first latched, if it has.
    pub fn first_down_hit_minute(&self) -> Option<u8> {
        self.window.and_then(|w| w.first_down_hit_minute)
    }

    fn push_ring(&mut self, minute_close_ts: i64, price: f64) {
        if self.ring.len() >= RING_CAPACITY {
            self.ring.pop_front();
        }
        self.ring.push_back(RingSlot { minute_close_ts, price });
    }

    /// Ingest one price tick. Returns `Some(FeatureVector)` exactly when the
    /// tick crosses into a new floored minute (i.e. is the first tick of
    /// that minute observed by this engine); returns `None` for a
    /// sub-minute duplicate tick, or if the input is rejected.
    pub fn ingest_price(&mut self, price: f64, timestamp: i64) -> Option<FeatureVector> {
        if !price.is_finite() || price <= 0.0 {
            return None;
        }
        if timestamp <= 0 {
            return None;
        }

        let window_start = floor_div(timestamp, WINDOW_MS) * WINDOW_MS;
        let minute_floor_ts = floor_div(timestamp, MINUTE_MS) * MINUTE_MS;
        let state_minute = (((timestamp / MINUTE_MS) % 15 + 15) % 15) as u8;

        let is_new_window = match self.window {
            None => true,
            Some(w) => w.window_start != window_start,
        };

        if is_new_window {
            self.window = Some(WindowState {
                window_start,
                open_price: price,
                max_run_up: 0.0,
                max_run_down: 0.0,
                first_up_hit_minute: None,
                first_down_hit_minute: None,
            });
            self.push_ring(minute_floor_ts, price);
        }

        let w = self.window.as_mut().expect("window just ensured");
        let ret = price / w.open_price - 1.0;
        if ret > w.max_run_up {
            w.max_run_up = ret;
        }
        if ret < w.max_run_down {
            w.max_run_down = ret;
        }

        let threshold = self.threshold_bps / 10_000.0;
        if w.first_up_hit_minute.is_none() && ret >= threshold {
            w.first_up_hit_minute = Some(state_minute);
        }
        if w.first_down_hit_minute.is_none() && ret <= -threshold {
            w.first_down_hit_minute = Some(state_minute);
        }

        if self.last_computed_minute_ts == Some(minute_floor_ts) {
            return None;
        }

        if !is_new_window {
            self.push_ring(minute_floor_ts, price);
        }
        self.last_computed_minute_ts = Some(minute_floor_ts);

        let w = self.window.expect("window just ensured");
        Some(FeatureVector {
            state_minute,
            minutes_remaining: 15 - state_minute,
            hour_of_day: ((timestamp.rem_euclid(DAY_MS)) / HOUR_MS) as u8,
            day_of_week: day_of_week(timestamp),
            return_since_open: ret,
            max_run_up: w.max_run_up,
            max_run_down: w.max_run_down,
            return_1m: self.return_n(1),
            return_3m: self.return_n(3),
            return_5m: self.return_n(5),
            volatility_5m: self.volatility_5m(),
            has_up_hit: w.first_up_hit_minute.is_some(),
            has_down_hit: w.first_down_hit_minute.is_some(),
            first_up_hit_minute: w.first_up_hit_minute.map(|m| m as f64).unwrap_or(f64::NAN),
            first_down_hit_minute: w.first_down_hit_minute.map(|m| m as f64).unwrap_or(f64::NAN),
            asset: self.asset,
            timestamp,
        })
    }

    /// `closes[-1]/closes[-1-n] - 1`, or NaN if the ring has fewer than `n+1` entries.
    fn return_n(&self, n: usize) -> f64 {
        let len = self.ring.len();
        if len < n + 1 {
            return f64::NAN;
        }
        let last = self.ring[len - 1].price;
        let prior = self.ring[len - 1 - n].price;
        last / prior - 1.0
    }

    /// Sample standard deviation (n-1) of the last 5 one-minute returns,
    /// computed from the last 6 ring entries. NaN if fewer than 2 valid
    /// returns are available; negative round-off variance clamps to 0.
    fn volatility_5m(&self) -> f64 {
        let len = self.ring.len();
        if len < 2 {
            return f64::NAN;
        }
        let take = 6.min(len);
        let start = len - take;
        let mut returns = Vec::with_capacity(take.saturating_sub(1));
        for i in (start + 1)..len {
            let prev = self.ring[i - 1].price;
            let cur = self.ring[i].price;
            if prev > 0.0 {
                returns.push(cur / prev - 1.0);
            }
        }
        if returns.len() < 2 {
            return f64::NAN;
        }
        let n = returns.len() as f64;
        let mean = returns.iter().sum::<f64>() / n;
        let var = returns.iter().map(|r| (r - mean) * (r - mean)).sum::<f64>() / (n - 1.0);
        var.max(0.0).sqrt()
    }
}

#[inline]
fn floor_div(a: i64, b: i64) -> i64 {
    a.div_euclid(b)
}

/// Epoch (1970-01-01) was a Thursday; day_of_week 0=Sunday matches the
/// spec's `(floor(t/DAY_MS)+4) mod 7` convention.
#[inline]
fn day_of_week(timestamp: i64) -> u8 {
    let days = floor_div(timestamp, DAY_MS);
    (((days + 4) % 7 + 7) % 7) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> FeatureEngine {
        FeatureEngine::new(Asset::Btc, Asset::Btc.default_threshold_bps())
    }

    #[test]
    fn first_tick_of_window_produces_state_minute_zero() {
        let mut e = engine();
        let w_start = 1_700_000_000_000i64 / WINDOW_MS * WINDOW_MS;
        let fv = e.ingest_price(50_000.0, w_start).unwrap();
        assert_eq!(fv.state_minute, 0);
        assert_eq!(fv.minutes_remaining, 15);
    }

    #[test]
    fn sub_minute_duplicate_returns_none() {
        let mut e = engine();
        let w_start = 1_700_000_000_000i64 / WINDOW_MS * WINDOW_MS;
        assert!(e.ingest_price(50_000.0, w_start).is_some());
        assert!(e.ingest_price(50_010.0, w_start + 1000).is_none());
    }

    #[test]
    fn minute_boundary_crossing_returns_feature_vector() {
        let mut e = engine();
        let w_start = 1_700_000_000_000i64 / WINDOW_MS * WINDOW_MS;
        e.ingest_price(50_000.0, w_start).unwrap();
        let fv = e.ingest_price(50_100.0, w_start + MINUTE_MS).unwrap();
        assert_eq!(fv.state_minute, 1);
    }

    #[test]
    fn ring_never_exceeds_capacity() {
        let mut e = engine();
        let w_start = 1_700_000_000_000i64 / WINDOW_MS * WINDOW_MS;
        for i in 0..200 {
            e.ingest_price(50_000.0 + i as f64, w_start + i as i64 * MINUTE_MS);
        }
        assert!(e.ring.len() <= RING_CAPACITY);
    }

    #[test]
    fn ring_preserved_across_window_transition() {
        let mut e = engine();
        let w_start = 0i64;
        for m in 0..20 {
            e.ingest_price(50_000.0 + m as f64, w_start + m as i64 * MINUTE_MS);
        }
        assert!(e.ring.len() > 15, "ring should retain entries from prior window");
    }

    #[test]
    fn return_n_nan_when_insufficient_history() {
        let e = engine();
        assert!(e.return_n(1).is_nan());
    }

    #[test]
    fn up_hit_minute_latches_once() {
        let mut e = engine();
        let w_start = 0i64;
        e.ingest_price(100.0, w_start).unwrap();
        let fv = e.ingest_price(100.2, w_start + MINUTE_MS).unwrap();
        assert!(fv.has_up_hit);
        assert_eq!(fv.first_up_hit_minute, 1.0);
        // Further ticks must not move the latched hit minute.
        let fv2 = e.ingest_price(101.0, w_start + 2 * MINUTE_MS).unwrap();
        assert_eq!(fv2.first_up_hit_minute, 1.0);
    }

    #[test]
    fn rejects_non_positive_or_nonfinite_price() {
        let mut e = engine();
        assert!(e.ingest_price(0.0, 1000).is_none());
        assert!(e.ingest_price(-5.0, 1000).is_none());
        assert!(e.ingest_price(f64::NAN, 1000).is_none());
        assert!(e.ingest_price(f64::INFINITY, 1000).is_none());
    }

    #[test]
    fn day_of_week_epoch_is_thursday() {
        assert_eq!(day_of_week(0), 4);
    }
}
