use crate::errors::EngineResult;
use rusqlite::{params, Connection};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct SymbolStats {
    pub symbol: String,
    pub total_trades: i64,
    pub wins: i64,
    pub losses: i64,
    pub total_pnl: f64,
    pub avg_probability: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegimeStats {
    pub volatility_regime: Option<String>,
    pub total_trades: i64,
    pub wins: i64,
    pub win_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CalibrationBucket {
    /// e.g. "0.50-0.55", terminal bucket is "0.75+".
    pub bucket: String,
    pub count: i64,
    pub avg_probability: f64,
    pub actual_win_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProbabilityBucket {
    pub bucket_start: f64,
    pub bucket_end: f64,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DecisionBreakdown {
    pub symbol: String,
    pub decision: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ThresholdCounterfactual {
    pub yes_threshold: f64,
    pub no_threshold: f64,
    pub trades_that_would_fire: i64,
    pub wins_that_would_win: i64,
}

/// Per-symbol trade aggregates over resolved trades.
pub fn symbol_stats(conn: &Connection) -> EngineResult<Vec<SymbolStats>> {
    let mut stmt = conn.prepare(
        "SELECT symbol, COUNT(*), SUM(CASE WHEN is_win=1 THEN 1 ELSE 0 END), \
         SUM(CASE WHEN is_win=0 THEN 1 ELSE 0 END), COALESCE(SUM(pnl),0.0), AVG(probability) \
         FROM trades WHERE outcome IS NOT NULL GROUP BY symbol",
    )?;
    let rows = stmt.query_map([], |r| {
        Ok(SymbolStats {
            symbol: r.get(0)?,
            total_trades: r.get(1)?,
            wins: r.get(2)?,
            losses: r.get(3)?,
            total_pnl: r.get(4)?,
            avg_probability: r.get(5)?,
        })
    })?;
    rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
}

/// Win-rate grouped by volatility regime (NULL regime is its own bucket).
pub fn regime_stats(conn: &Connection) -> EngineResult<Vec<RegimeStats>> {
    let mut stmt = conn.prepare(
        "SELECT volatility_regime, COUNT(*), SUM(CASE WHEN is_win=1 THEN 1 ELSE 0 END) \
         FROM trades WHERE outcome IS NOT NULL GROUP BY volatility_regime",
    )?;
    let rows = stmt.query_map([], |r| {
        let total: i64 = r.get(1)?;
        let wins: i64 = r.get(2)?;
        Ok(RegimeStats {
            volatility_regime: r.get(0)?,
            total_trades: total,
            wins,
            win_rate: if total > 0 { wins as f64 / total as f64 } else { 0.0 },
        })
    })?;
    rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
}

/// Fixed bucket width of 0.05 below 0.75, with a terminal "0.75+" bucket
/// absorbing everything at or above it (the store's internal bucket contract).
const CALIBRATION_BUCKET_WIDTH: f64 = 0.05;
const CALIBRATION_TERMINAL_START: f64 = 0.75;

fn calibration_bucket_label(p: f64) -> String {
    if p >= CALIBRATION_TERMINAL_START {
        "0.75+".to_string()
    } else {
        let lower = (p / CALIBRATION_BUCKET_WIDTH).floor() * CALIBRATION_BUCKET_WIDTH;
        let upper = lower + CALIBRATION_BUCKET_WIDTH;
        format!("{lower:.2}-{upper:.2}")
    }
}

pub fn calibration_buckets(conn: &Connection) -> EngineResult<Vec<CalibrationBucket>> {
    let mut stmt =
        conn.prepare("SELECT probability, is_win FROM trades WHERE outcome IS NOT NULL ORDER BY probability ASC")?;
    let rows: Vec<(f64, Option<bool>)> = stmt
        .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;

    use std::collections::BTreeMap;
    let mut buckets: BTreeMap<String, (i64, f64, i64)> = BTreeMap::new();
    for (p, is_win) in rows {
        let label = calibration_bucket_label(p);
        let entry = buckets.entry(label).or_insert((0, 0.0, 0));
        entry.0 += 1;
        entry.1 += p;
        if is_win == Some(true) {
            entry.2 += 1;
        }
    }
    Ok(buckets
        .into_iter()
        .map(|(bucket, (count, sum_p, wins))| CalibrationBucket {
            bucket,
            count,
            avg_probability: sum_p / count as f64,
            actual_win_rate: wins as f64 / count as f64,
        })
        .collect())
}

/// Probability histogram with a caller-supplied bucket width in (0,1).
pub fn probability_distribution(conn: &Connection, bucket_width: f64) -> EngineResult<Vec<ProbabilityBucket>> {
    if !(0.0..1.0).contains(&bucket_width) {
        return Ok(Vec::new());
    }
    let mut stmt = conn.prepare("SELECT probability FROM evaluations")?;
    let probabilities: Vec<f64> = stmt.query_map([], |r| r.get(0))?.collect::<Result<Vec<_>, _>>()?;

    let bucket_count = (1.0 / bucket_width).ceil() as usize;
    let mut counts = vec![0i64; bucket_count];
    for p in probabilities {
        let idx = ((p / bucket_width).floor() as usize).min(bucket_count - 1);
        counts[idx] += 1;
    }
    Ok(counts
        .into_iter()
        .enumerate()
        .map(|(i, count)| ProbabilityBucket {
            bucket_start: i as f64 * bucket_width,
            bucket_end: (i as f64 + 1.0) * bucket_width,
            count,
        })
        .collect())
}

pub fn decision_breakdown(conn: &Connection) -> EngineResult<Vec<DecisionBreakdown>> {
    let mut stmt =
        conn.prepare("SELECT symbol, decision, COUNT(*) FROM evaluations GROUP BY symbol, decision")?;
    let rows = stmt.query_map([], |r| {
        Ok(DecisionBreakdown { symbol: r.get(0)?, decision: r.get(1)?, count: r.get(2)? })
    })?;
    rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
}

/// What-if: how many resolved trades would have fired, and how many of
/// those would have won, under a different threshold pair. Evaluated
/// directly against stored evaluation rows, not against replayed ticks.
pub fn threshold_counterfactual(
    conn: &Connection,
    yes_threshold: f64,
    no_threshold: f64,
) -> EngineResult<ThresholdCounterfactual> {
    let fires: i64 = conn.query_row(
        "SELECT COUNT(*) FROM evaluations WHERE model_probability >= ?1 OR model_probability <= ?2",
        params![yes_threshold, no_threshold],
        |r| r.get(0),
    )?;
    let wins: i64 = conn.query_row(
        "SELECT COUNT(*) FROM trades t JOIN evaluations e ON t.condition_id = e.condition_id \
         WHERE t.is_win = 1 AND (e.model_probability >= ?1 OR e.model_probability <= ?2)",
        params![yes_threshold, no_threshold],
        |r| r.get(0),
    )?;
    Ok(ThresholdCounterfactual {
        yes_threshold,
        no_threshold,
        trades_that_would_fire: fires,
        wins_that_would_win: wins,
    })
}

/// Pearson correlation between model probability and market YES price,
/// computed per symbol from resolved trades; 0 when n<2.
pub fn probability_yes_price_correlation(conn: &Connection, symbol: &str) -> EngineResult<f64> {
    let mut stmt =
        conn.prepare("SELECT probability, entry_price FROM trades WHERE symbol=?1 AND side='YES'")?;
    let pairs: Vec<(f64, f64)> = stmt
        .query_map(params![symbol], |r| Ok((r.get(0)?, r.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(pearson(&pairs))
}

fn pearson(pairs: &[(f64, f64)]) -> f64 {
    let n = pairs.len();
    if n < 2 {
        return 0.0;
    }
    let n_f = n as f64;
    let mean_x = pairs.iter().map(|(x, _)| x).sum::<f64>() / n_f;
    let mean_y = pairs.iter().map(|(_, y)| y).sum::<f64>() / n_f;
    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (x, y) in pairs {
        let dx = x - mean_x;
        let dy = y - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }
    if var_x == 0.0 || var_y == 0.0 {
        return 0.0;
    }
    cov / (var_x.sqrt() * var_y.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calibration_bucket_labels() {
        assert_eq!(calibration_bucket_label(0.52), "0.50-0.55");
        assert_eq!(calibration_bucket_label(0.75), "0.75+");
        assert_eq!(calibration_bucket_label(0.99), "0.75+");
        assert_eq!(calibration_bucket_label(0.0), "0.00-0.05");
    }

    #[test]
    fn pearson_zero_for_fewer_than_two_points() {
        assert_eq!(pearson(&[]), 0.0);
        assert_eq!(pearson(&[(0.5, 0.5)]), 0.0);
    }

    #[test]
    fn pearson_perfect_positive_correlation() {
        let pairs = vec![(0.1, 0.1), (0.2, 0.2), (0.3, 0.3), (0.4, 0.4)];
        assert!((pearson(&pairs) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn pearson_zero_when_no_variance() {
        let pairs = vec![(0.5, 0.2), (0.5, 0.3), (0.5, 0.4)];
        assert_eq!(pearson(&pairs), 0.0);
    }
}
