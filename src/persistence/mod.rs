pub mod analytics;
pub mod records;

use crate::errors::{EngineError, EngineResult};
use crate::feature::FeatureVector;
use records::{Decision, EvaluationRecord, MinutePrice, Outcome, Side, StoreStats, TradeOutcome, TradeRecord, TradeRow};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::VecDeque;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    Sync,
    Async,
}

#[derive(Debug, Clone)]
pub struct PersistenceConfig {
    pub enabled: bool,
    pub db_path: PathBuf,
    pub sync_mode: SyncMode,
    pub vacuum_interval_hours: u64,
    pub allowed_roots: Vec<String>,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            db_path: PathBuf::from("data/engine.db"),
            sync_mode: SyncMode::Sync,
            vacuum_interval_hours: 24,
            allowed_roots: vec!["data".into(), "test-data".into()],
        }
    }
}

/// Collapse `.`/`..` lexically without touching the filesystem (the db file
/// may not exist yet). Any root/prefix component (absolute path) or a `..`
/// that would escape above the path's own start is rejected.
fn lexical_normalize(path: &Path) -> EngineResult<PathBuf> {
    let mut out = PathBuf::new();
    let mut depth: i32 = 0;
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                depth -= 1;
                if depth < 0 {
                    return Err(EngineError::PathTraversal("Invalid database path".into()));
                }
                out.pop();
            }
            Component::Normal(s) => {
                depth += 1;
                out.push(s);
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(EngineError::PathTraversal("Invalid database path".into()));
            }
        }
    }
    Ok(out)
}

fn validate_db_path(path: &Path, allowed_roots: &[String]) -> EngineResult<PathBuf> {
    let normalized = lexical_normalize(path)?;
    for root in allowed_roots {
        let root_normalized = lexical_normalize(Path::new(root))?;
        if normalized.starts_with(&root_normalized) {
            return Ok(normalized);
        }
    }
    Err(EngineError::PathTraversal("Invalid database path".into()))
}

enum WriteJob {
    Trade { id: i64, record: TradeRecord },
    Outcome { condition_id: String, outcome: TradeOutcome },
    MinutePrice(MinutePrice),
    MinutePrices(Vec<MinutePrice>),
    Evaluation { id: i64, record: EvaluationRecord },
    Evaluations { ids: Vec<i64>, records: Vec<EvaluationRecord> },
}

/// Embedded single-writer SQLite store. In `Sync` mode every write awaits
/// the commit; in `Async` mode writes are appended to an in-process FIFO
/// (this `queue`) and applied in order by `flush`, with ids issued
/// synchronously up front so dependent writes can reference them immediately.
pub struct Store {
    config: PersistenceConfig,
    conn: Option<Arc<Mutex<Connection>>>,
    next_trade_id: AtomicI64,
    next_eval_id: AtomicI64,
    queue: Mutex<VecDeque<WriteJob>>,
}

impl Store {
    pub fn new(config: PersistenceConfig) -> Self {
        Self {
            config,
            conn: None,
            next_trade_id: AtomicI64::new(1),
            next_eval_id: AtomicI64::new(1),
            queue: Mutex::new(VecDeque::new()),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.conn.is_some() || !self.config.enabled
    }

    fn conn_locked(&self) -> EngineResult<std::sync::MutexGuard<'_, Connection>> {
        let conn = self.conn.as_ref().ok_or(EngineError::NotInitialized)?;
        Ok(conn.lock().expect("db mutex poisoned"))
    }

    /// Validate the path, open the connection, run the schema, and (in
    /// Async mode) prime the next-id counters from existing rows.
    pub fn initialize(&mut self) -> EngineResult<()> {
        if !self.config.enabled {
            return Ok(());
        }
        let validated = validate_db_path(&self.config.db_path, &self.config.allowed_roots)?;
        if let Some(parent) = validated.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&validated)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        conn.execute_batch(include_str!("../../migrations/001_init.sql"))?;

        let max_trade_id: i64 = conn
            .query_row("SELECT COALESCE(MAX(id), 0) FROM trades", [], |r| r.get(0))
            .unwrap_or(0);
        let max_eval_id: i64 = conn
            .query_row("SELECT COALESCE(MAX(id), 0) FROM evaluations", [], |r| r.get(0))
            .unwrap_or(0);
        self.next_trade_id.store(max_trade_id + 1, Ordering::SeqCst);
        self.next_eval_id.store(max_eval_id + 1, Ordering::SeqCst);

        self.conn = Some(Arc::new(Mutex::new(conn)));
        Ok(())
    }

    fn enqueue_or_apply(&self, job: WriteJob) -> EngineResult<()> {
        if self.config.sync_mode == SyncMode::Async {
            self.queue.lock().expect("queue mutex poisoned").push_back(job);
            Ok(())
        } else {
            self.apply(job)
        }
    }

    fn apply(&self, job: WriteJob) -> EngineResult<()> {
        match job {
            WriteJob::Trade { id, record } => self.apply_insert_trade(id, &record),
            WriteJob::Outcome { condition_id, outcome } => self.apply_update_outcome(&condition_id, &outcome),
            WriteJob::MinutePrice(mp) => self.apply_minute_price(&mp),
            WriteJob::MinutePrices(mps) => self.apply_minute_prices(&mps),
            WriteJob::Evaluation { id, record } => self.apply_insert_evaluation(id, &record),
            WriteJob::Evaluations { ids, records } => self.apply_insert_evaluations(&ids, &records),
        }
    }

    /// Drain the async write queue in FIFO order. No-op in Sync mode.
    pub fn flush(&self) -> EngineResult<()> {
        loop {
            let job = self.queue.lock().expect("queue mutex poisoned").pop_front();
            match job {
                Some(job) => self.apply(job)?,
                None => return Ok(()),
            }
        }
    }

    pub fn close(&self) -> EngineResult<()> {
        self.flush()
    }

    // -- writes -----------------------------------------------------------

    pub fn record_trade(&self, record: TradeRecord) -> EngineResult<i64> {
        if !self.config.enabled {
            return Ok(0);
        }
        let id = self.next_trade_id.fetch_add(1, Ordering::SeqCst);
        self.enqueue_or_apply(WriteJob::Trade { id, record })?;
        Ok(id)
    }

    fn apply_insert_trade(&self, id: i64, record: &TradeRecord) -> EngineResult<()> {
        let conn = self.conn_locked()?;
        let now = record.signal_ts;
        let result = conn.execute(
            "INSERT INTO trades (id, condition_id, slug, symbol, side, entry_price, position_size, \
             signal_ts, probability, linear_combination, imputed_count, state_minute, hour_of_day, \
             day_of_week, volatility_regime, volatility_5m, window_open_price, created_at) \
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18)",
            params![
                id,
                record.condition_id,
                record.slug,
                record.symbol,
                side_str(record.side),
                record.entry_price,
                record.position_size,
                record.signal_ts,
                record.probability,
                record.linear_combination,
                record.imputed_count,
                record.state_minute,
                record.hour_of_day,
                record.day_of_week,
                record.volatility_regime.map(|r| r.to_string()),
                record.volatility_5m,
                record.window_open_price,
                now,
            ],
        );
        match result {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == rusqlite::ErrorCode::ConstraintViolation => {
                return Err(EngineError::ConstraintViolation(format!(
                    "duplicate condition_id {}",
                    record.condition_id
                )));
            }
            Err(e) => return Err(e.into()),
        }
        conn.execute(
            "INSERT INTO trade_features (trade_id, feature_json) VALUES (?1, ?2)",
            params![id, feature_vector_to_json(&record.features)?],
        )?;
        Ok(())
    }

    /// Unknown conditionId is a silent no-op (the implementer's documented
    /// choice -- see DESIGN.md).
    pub fn update_outcome(&self, condition_id: &str, outcome: TradeOutcome) -> EngineResult<()> {
        if !self.config.enabled {
            return Ok(());
        }
        self.enqueue_or_apply(WriteJob::Outcome { condition_id: condition_id.to_string(), outcome })
    }

    fn apply_update_outcome(&self, condition_id: &str, outcome: &TradeOutcome) -> EngineResult<()> {
        let conn = self.conn_locked()?;
        conn.execute(
            "UPDATE trades SET outcome=?1, is_win=?2, pnl=?3, resolution_ts=?4, window_close_price=?5, \
             max_favorable=?6, max_adverse=?7, time_to_up=?8, time_to_down=?9, updated_at=?10 \
             WHERE condition_id=?11",
            params![
                outcome_str(outcome.outcome),
                outcome.is_win,
                outcome.pnl,
                outcome.resolution_ts,
                outcome.window_close_price,
                outcome.max_favorable_excursion,
                outcome.max_adverse_excursion,
                outcome.time_to_up_threshold,
                outcome.time_to_down_threshold,
                outcome.resolution_ts,
                condition_id,
            ],
        )?;
        Ok(())
    }

    pub fn record_minute_price(&self, mp: MinutePrice) -> EngineResult<()> {
        if !self.config.enabled {
            return Ok(());
        }
        self.enqueue_or_apply(WriteJob::MinutePrice(mp))
    }

    fn apply_minute_price(&self, mp: &MinutePrice) -> EngineResult<()> {
        let conn = self.conn_locked()?;
        conn.execute(
            "INSERT INTO minute_prices (trade_id, minute_offset, price, ts) VALUES (?1,?2,?3,?4) \
             ON CONFLICT(trade_id, minute_offset) DO UPDATE SET price=excluded.price, ts=excluded.ts",
            params![mp.trade_id, mp.minute_offset, mp.price, mp.ts],
        )?;
        Ok(())
    }

    pub fn record_minute_prices(&self, prices: Vec<MinutePrice>) -> EngineResult<()> {
        if !self.config.enabled {
            return Ok(());
        }
        self.enqueue_or_apply(WriteJob::MinutePrices(prices))
    }

    fn apply_minute_prices(&self, prices: &[MinutePrice]) -> EngineResult<()> {
        let mut conn = self.conn_locked()?;
        let tx = conn.transaction()?;
        for mp in prices {
            tx.execute(
                "INSERT INTO minute_prices (trade_id, minute_offset, price, ts) VALUES (?1,?2,?3,?4) \
                 ON CONFLICT(trade_id, minute_offset) DO UPDATE SET price=excluded.price, ts=excluded.ts",
                params![mp.trade_id, mp.minute_offset, mp.price, mp.ts],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn record_evaluation(&self, record: EvaluationRecord) -> EngineResult<i64> {
        if !self.config.enabled {
            return Ok(0);
        }
        let id = self.next_eval_id.fetch_add(1, Ordering::SeqCst);
        self.enqueue_or_apply(WriteJob::Evaluation { id, record })?;
        Ok(id)
    }

    fn apply_insert_evaluation(&self, id: i64, record: &EvaluationRecord) -> EngineResult<()> {
        let conn = self.conn_locked()?;
        conn.execute(
            "INSERT INTO evaluations (id, condition_id, slug, symbol, ts, state_minute, \
             model_probability, linear_combination, imputed_count, market_price_yes, market_price_no, \
             decision, reason, features_json) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14)",
            params![
                id,
                record.condition_id,
                record.slug,
                record.symbol,
                record.ts,
                record.state_minute,
                record.model_probability,
                record.linear_combination,
                record.imputed_count,
                record.market_price_yes,
                record.market_price_no,
                decision_str(record.decision),
                record.reason,
                feature_vector_to_json(&record.features)?,
            ],
        )?;
        Ok(())
    }

    /// Transactional batch insert: all-or-nothing. An empty batch returns an
    /// empty id list without touching the counter or the database.
    pub fn record_evaluations(&self, records: Vec<EvaluationRecord>) -> EngineResult<Vec<i64>> {
        if !self.config.enabled || records.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<i64> = (0..records.len())
            .map(|_| self.next_eval_id.fetch_add(1, Ordering::SeqCst))
            .collect();
        self.enqueue_or_apply(WriteJob::Evaluations { ids: ids.clone(), records })?;
        Ok(ids)
    }

    fn apply_insert_evaluations(&self, ids: &[i64], records: &[EvaluationRecord]) -> EngineResult<()> {
        let mut conn = self.conn_locked()?;
        let tx = conn.transaction()?;
        for (id, record) in ids.iter().zip(records.iter()) {
            tx.execute(
                "INSERT INTO evaluations (id, condition_id, slug, symbol, ts, state_minute, \
                 model_probability, linear_combination, imputed_count, market_price_yes, market_price_no, \
                 decision, reason, features_json) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14)",
                params![
                    id,
                    record.condition_id,
                    record.slug,
                    record.symbol,
                    record.ts,
                    record.state_minute,
                    record.model_probability,
                    record.linear_combination,
                    record.imputed_count,
                    record.market_price_yes,
                    record.market_price_no,
                    decision_str(record.decision),
                    record.reason,
                    feature_vector_to_json(&record.features)?,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    // -- reads --------------------------------------------------------------

    pub fn get_trades_by_date_range(
        &self,
        start_ts: i64,
        end_ts: i64,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> EngineResult<Vec<TradeRow>> {
        if !self.config.enabled {
            return Ok(Vec::new());
        }
        let conn = self.conn_locked()?;
        let mut stmt = conn.prepare(
            "SELECT id, condition_id, slug, symbol, side, entry_price, position_size, signal_ts, \
             probability, outcome, is_win, pnl, created_at FROM trades \
             WHERE signal_ts >= ?1 AND signal_ts < ?2 ORDER BY signal_ts ASC LIMIT ?3 OFFSET ?4",
        )?;
        let rows = stmt.query_map(
            params![start_ts, end_ts, limit.unwrap_or(i64::MAX), offset.unwrap_or(0)],
            row_to_trade,
        )?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn get_trades_by_symbol(&self, symbol: &str) -> EngineResult<Vec<TradeRow>> {
        if !self.config.enabled {
            return Ok(Vec::new());
        }
        let conn = self.conn_locked()?;
        let mut stmt = conn.prepare(
            "SELECT id, condition_id, slug, symbol, side, entry_price, position_size, signal_ts, \
             probability, outcome, is_win, pnl, created_at FROM trades WHERE symbol=?1 ORDER BY signal_ts ASC",
        )?;
        let rows = stmt.query_map(params![symbol], row_to_trade)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn get_trade_by_condition_id(&self, condition_id: &str) -> EngineResult<Option<TradeRow>> {
        if !self.config.enabled {
            return Ok(None);
        }
        let conn = self.conn_locked()?;
        conn.query_row(
            "SELECT id, condition_id, slug, symbol, side, entry_price, position_size, signal_ts, \
             probability, outcome, is_win, pnl, created_at FROM trades WHERE condition_id=?1",
            params![condition_id],
            row_to_trade,
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn get_pending_trades(&self) -> EngineResult<Vec<TradeRow>> {
        if !self.config.enabled {
            return Ok(Vec::new());
        }
        let conn = self.conn_locked()?;
        let mut stmt = conn.prepare(
            "SELECT id, condition_id, slug, symbol, side, entry_price, position_size, signal_ts, \
             probability, outcome, is_win, pnl, created_at FROM trades WHERE outcome IS NULL ORDER BY signal_ts ASC",
        )?;
        let rows = stmt.query_map([], row_to_trade)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn get_stats(&self) -> EngineResult<StoreStats> {
        if !self.config.enabled {
            return Ok(StoreStats::default());
        }
        let conn = self.conn_locked()?;
        let total: i64 = conn.query_row("SELECT COUNT(*) FROM trades", [], |r| r.get(0))?;
        let resolved: i64 =
            conn.query_row("SELECT COUNT(*) FROM trades WHERE outcome IS NOT NULL", [], |r| r.get(0))?;
        let oldest: Option<i64> =
            conn.query_row("SELECT MIN(signal_ts) FROM trades", [], |r| r.get(0)).ok().flatten();
        let newest: Option<i64> =
            conn.query_row("SELECT MAX(signal_ts) FROM trades", [], |r| r.get(0)).ok().flatten();
        let db_size_bytes: i64 = conn
            .query_row("SELECT page_count * page_size FROM pragma_page_count(), pragma_page_size()", [], |r| {
                r.get(0)
            })
            .unwrap_or(0);
        Ok(StoreStats {
            total_trades: total,
            pending_trades: total - resolved,
            resolved_trades: resolved,
            db_size_bytes,
            oldest_trade: oldest,
            newest_trade: newest,
        })
    }

    /// Compacts storage without affecting row count.
    pub fn vacuum(&self) -> EngineResult<()> {
        if !self.config.enabled {
            return Ok(());
        }
        self.conn_locked()?.execute_batch("VACUUM;")?;
        Ok(())
    }

    pub fn conn_for_analytics(&self) -> EngineResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn_locked()
    }
}

fn side_str(s: Side) -> &'static str {
    match s {
        Side::Yes => "YES",
        Side::No => "NO",
    }
}

fn outcome_str(o: Outcome) -> &'static str {
    match o {
        Outcome::Up => "UP",
        Outcome::Down => "DOWN",
    }
}

fn decision_str(d: Decision) -> &'static str {
    match d {
        Decision::Yes => "YES",
        Decision::No => "NO",
        Decision::Skip => "SKIP",
    }
}

/// NaN survives this round trip because it is serialized as the JSON string
/// `"NaN"` rather than a numeric literal (serde_json rejects NaN as a number).
fn feature_vector_to_json(fv: &FeatureVector) -> EngineResult<String> {
    let mut value = serde_json::to_value(fv)?;
    nan_to_sentinel(&mut value);
    Ok(serde_json::to_string(&value)?)
}

fn nan_to_sentinel(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            for v in map.values_mut() {
                nan_to_sentinel(v);
            }
        }
        serde_json::Value::Null => {
            *value = serde_json::Value::String("NaN".to_string());
        }
        _ => {}
    }
}

fn row_to_trade(row: &rusqlite::Row) -> rusqlite::Result<TradeRow> {
    Ok(TradeRow {
        id: row.get(0)?,
        condition_id: row.get(1)?,
        slug: row.get(2)?,
        symbol: row.get(3)?,
        side: row.get(4)?,
        entry_price: row.get(5)?,
        position_size: row.get(6)?,
        signal_ts: row.get(7)?,
        probability: row.get(8)?,
        outcome: row.get(9)?,
        is_win: row.get(10)?,
        pnl: row.get(11)?,
        created_at: row.get(12)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::Asset;

    fn sample_features(asset: Asset) -> FeatureVector {
        FeatureVector {
            state_minute: 0,
            minutes_remaining: 15,
            hour_of_day: 12,
            day_of_week: 2,
            return_since_open: 0.0,
            max_run_up: 0.0,
            max_run_down: 0.0,
            return_1m: f64::NAN,
            return_3m: f64::NAN,
            return_5m: f64::NAN,
            volatility_5m: f64::NAN,
            has_up_hit: false,
            has_down_hit: false,
            first_up_hit_minute: f64::NAN,
            first_down_hit_minute: f64::NAN,
            asset,
            timestamp: 1_700_000_000_000,
        }
    }

    fn sample_trade(condition_id: &str) -> TradeRecord {
        TradeRecord {
            id: None,
            condition_id: condition_id.into(),
            slug: "btc-updown-15m-1700000000".into(),
            symbol: "BTC".into(),
            side: Side::Yes,
            entry_price: 0.5,
            position_size: 100.0,
            signal_ts: 1_700_000_000_000,
            probability: 0.8,
            linear_combination: 2.0,
            imputed_count: 1,
            features: sample_features(Asset::Btc),
            state_minute: 0,
            hour_of_day: 12,
            day_of_week: 2,
            volatility_regime: None,
            volatility_5m: 0.001,
            window_open_price: 98_000.0,
        }
    }

    fn temp_store(sync_mode: SyncMode) -> (Store, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db_path = PathBuf::from("data").join(dir.path().file_name().unwrap()).join("engine.db");
        let mut store = Store::new(PersistenceConfig { db_path, sync_mode, ..Default::default() });
        store.initialize().unwrap();
        (store, dir)
    }

    #[test]
    fn rejects_absolute_path_outside_allowlist() {
        let mut store = Store::new(PersistenceConfig {
            db_path: PathBuf::from("/tmp/x.db"),
            ..Default::default()
        });
        assert!(store.initialize().is_err());
    }

    #[test]
    fn rejects_parent_dir_escape() {
        let mut store = Store::new(PersistenceConfig {
            db_path: PathBuf::from("data/../../etc/evil.db"),
            ..Default::default()
        });
        assert!(store.initialize().is_err());
    }

    #[test]
    fn disabled_store_is_noop() {
        let mut store = Store::new(PersistenceConfig { enabled: false, ..Default::default() });
        store.initialize().unwrap();
        assert_eq!(store.record_trade(sample_trade("c1")).unwrap(), 0);
        assert!(store.get_pending_trades().unwrap().is_empty());
    }

    #[test]
    fn uninitialized_store_errors() {
        let store = Store::new(PersistenceConfig::default());
        assert!(matches!(store.get_stats(), Err(EngineError::NotInitialized)));
    }

    #[test]
    fn sync_mode_record_and_read_trade() {
        let (store, _dir) = temp_store(SyncMode::Sync);
        let id = store.record_trade(sample_trade("c-sync-1")).unwrap();
        assert_eq!(id, 1);
        let row = store.get_trade_by_condition_id("c-sync-1").unwrap().unwrap();
        assert_eq!(row.id, 1);
        assert_eq!(row.outcome, None);
    }

    #[test]
    fn duplicate_condition_id_is_constraint_violation() {
        let (store, _dir) = temp_store(SyncMode::Sync);
        store.record_trade(sample_trade("dup")).unwrap();
        let err = store.record_trade(sample_trade("dup")).unwrap_err();
        assert!(matches!(err, EngineError::ConstraintViolation(_)));
    }

    #[test]
    fn async_mode_write_is_pending_until_flush() {
        let (store, _dir) = temp_store(SyncMode::Async);
        let id = store.record_trade(sample_trade("c-async-1")).unwrap();
        assert_eq!(id, 1);
        // Read-before-flush may legitimately observe nothing yet.
        assert!(store.get_trade_by_condition_id("c-async-1").unwrap().is_none());
        store.flush().unwrap();
        assert!(store.get_trade_by_condition_id("c-async-1").unwrap().is_some());
    }

    #[test]
    fn empty_evaluation_batch_returns_empty_ids() {
        let (store, _dir) = temp_store(SyncMode::Sync);
        let ids = store.record_evaluations(Vec::new()).unwrap();
        assert!(ids.is_empty());
    }

    #[test]
    fn vacuum_preserves_trade_counts() {
        let (store, _dir) = temp_store(SyncMode::Sync);
        store.record_trade(sample_trade("c-vac-1")).unwrap();
        let before = store.get_stats().unwrap();
        store.vacuum().unwrap();
        let after = store.get_stats().unwrap();
        assert_eq!(before.total_trades, after.total_trades);
        assert_eq!(before.pending_trades, after.pending_trades);
        assert_eq!(before.resolved_trades, after.resolved_trades);
    }

    #[test]
    fn update_outcome_unknown_condition_id_is_silent_noop() {
        let (store, _dir) = temp_store(SyncMode::Sync);
        let outcome = TradeOutcome {
            outcome: Outcome::Up,
            is_win: true,
            pnl: 50.0,
            resolution_ts: 1,
            window_close_price: 99_000.0,
            max_favorable_excursion: 0.01,
            max_adverse_excursion: -0.01,
            time_to_up_threshold: None,
            time_to_down_threshold: None,
        };
        assert!(store.update_outcome("does-not-exist", outcome).is_ok());
    }

    #[test]
    fn nan_feature_serializes_to_sentinel_string() {
        let json = feature_vector_to_json(&sample_features(Asset::Btc)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["return_1m"], serde_json::Value::String("NaN".into()));
        assert_eq!(value["volatility_5m"], serde_json::Value::String("NaN".into()));
    }
}
