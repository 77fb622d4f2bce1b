use serde::{Deserialize, Serialize};
use std::fmt;

/// Supported crypto assets. Static 1:1 mapping to exchange symbol form
/// (e.g. `BTC` <-> `BTCUSDT`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Asset {
    Btc,
    Eth,
    Sol,
    Xrp,
}

impl Asset {
    pub const ALL: [Asset; 4] = [Asset::Btc, Asset::Eth, Asset::Sol, Asset::Xrp];

    /// Parse from the leading coin component of a slug, or a bare ticker
    /// ("btc", "BTC", "Btc" all accepted).
    pub fn parse(s: &str) -> Option<Asset> {
        match s.to_ascii_uppercase().as_str() {
            "BTC" => Some(Asset::Btc),
            "ETH" => Some(Asset::Eth),
            "SOL" => Some(Asset::Sol),
            "XRP" => Some(Asset::Xrp),
            _ => None,
        }
    }

    /// Parse from an exchange symbol of the form `<COIN>USDT` (case-insensitive).
    pub fn from_exchange_symbol(symbol: &str) -> Option<Asset> {
        let upper = symbol.to_ascii_uppercase();
        let coin = upper.strip_suffix("USDT")?;
        Asset::parse(coin)
    }

    /// Lowercase exchange symbol form used in stream URLs, e.g. `btcusdt`.
    pub fn exchange_symbol(&self) -> &'static str {
        match self {
            Asset::Btc => "btcusdt",
            Asset::Eth => "ethusdt",
            Asset::Sol => "solusdt",
            Asset::Xrp => "xrpusdt",
        }
    }

    /// Lowercase coin component used in market slugs, e.g. `btc`.
    pub fn slug_coin(&self) -> &'static str {
        match self {
            Asset::Btc => "btc",
            Asset::Eth => "eth",
            Asset::Sol => "sol",
            Asset::Xrp => "xrp",
        }
    }

    /// Default directional hit threshold in basis points (used by the
    /// feature engine's first-hit-minute tracking when no per-asset
    /// override is configured).
    pub fn default_threshold_bps(&self) -> f64 {
        match self {
            Asset::Btc => 10.0,
            Asset::Eth => 15.0,
            Asset::Sol => 25.0,
            Asset::Xrp => 20.0,
        }
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.slug_coin().to_ascii_uppercase())
    }
}

/// Volatility-regime bucket. See `classify` below (spec 4.A).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolRegime {
    Low,
    Mid,
    High,
}

impl fmt::Display for VolRegime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VolRegime::Low => write!(f, "low"),
            VolRegime::Mid => write!(f, "mid"),
            VolRegime::High => write!(f, "high"),
        }
    }
}

struct RegimeCutoffs {
    low: f64,
    high: f64,
}

const DEFAULT_CUTOFFS: RegimeCutoffs = RegimeCutoffs {
    low: 0.001,
    high: 0.003,
};

fn cutoffs_for(symbol: &str) -> RegimeCutoffs {
    match symbol.to_ascii_uppercase().as_str() {
        "BTC" => RegimeCutoffs { low: 0.0005, high: 0.0015 },
        "ETH" => RegimeCutoffs { low: 0.0007, high: 0.0020 },
        "SOL" => RegimeCutoffs { low: 0.0015, high: 0.0040 },
        "XRP" => RegimeCutoffs { low: 0.0010, high: 0.0030 },
        _ => DEFAULT_CUTOFFS,
    }
}

/// Bucket a 5-minute volatility reading into low/mid/high per asset.
/// Inclusive at both boundaries: `vol <= low => low`, `vol >= high => high`.
/// Total over all finite, non-negative `vol5m` and any `symbol` string.
#[inline]
pub fn classify(vol5m: f64, symbol: &str) -> VolRegime {
    let cutoffs = cutoffs_for(symbol);
    if vol5m <= cutoffs.low {
        VolRegime::Low
    } else if vol5m >= cutoffs.high {
        VolRegime::High
    } else {
        VolRegime::Mid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn btc_boundaries() {
        assert_eq!(classify(0.0005, "BTC"), VolRegime::Low);
        assert_eq!(classify(0.0015, "BTC"), VolRegime::High);
        assert_eq!(classify(0.0010, "BTC"), VolRegime::Mid);
    }

    #[test]
    fn unknown_symbol_uses_default_cutoffs() {
        assert_eq!(classify(0.003, "UNKNOWN"), VolRegime::High);
        assert_eq!(classify(0.0005, "UNKNOWN"), VolRegime::Low);
        assert_eq!(classify(0.002, "UNKNOWN"), VolRegime::Mid);
    }

    #[test]
    fn classify_is_total_and_exhaustive() {
        for vol in [0.0, 0.0001, 0.0007, 0.0015, 0.01, 1.0] {
            for sym in ["BTC", "ETH", "SOL", "XRP", "DOGE"] {
                let r = classify(vol, sym);
                assert!(matches!(r, VolRegime::Low | VolRegime::Mid | VolRegime::High));
            }
        }
    }

    #[test]
    fn asset_parse_roundtrip() {
        for a in Asset::ALL {
            let sym = a.exchange_symbol();
            assert_eq!(Asset::from_exchange_symbol(&sym.to_ascii_uppercase()), Some(a));
        }
    }
}
