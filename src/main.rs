mod asset;
mod config;
mod decision;
mod errors;
mod events;
mod execution;
mod feature;
mod logging;
mod market;
mod models;
mod persistence;
mod price_feed;
mod resolution;

use crate::asset::classify;
use crate::config::AppConfig;
use crate::decision::{DecisionEngine, MarketPrices, PaperBook, PaperPosition};
use crate::errors::EngineError;
use crate::execution::{HttpOrderSink, MarketOrderRequest, OrderSink};
use crate::market::{HttpMarketQuery, MarketQuery, MarketRegistry, RegistryEvent};
use crate::models::ModelLoader;
use crate::persistence::records::MinutePrice;
use crate::persistence::Store;
use crate::price_feed::{PriceFeedClient, PriceFeedEvent};
use crate::resolution::{HttpResolutionSource, ResolutionSource};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tracing_subscriber::fmt::format::DefaultFields;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

fn now_ms() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as i64
}

fn init_logging(cfg: &AppConfig) {
    let formatter = logging::JsonEventFormatter {
        service: cfg.service_name.clone(),
        app: cfg.app_name.clone(),
        env: cfg.env_name.clone(),
        strategy: cfg.strategy_name.clone(),
    };
    let fmt_layer = tracing_subscriber::fmt::layer()
        .event_format(formatter)
        .fmt_fields(DefaultFields::new())
        .with_writer(std::io::stderr);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
}

#[tokio::main]
async fn main() {
    eprintln!("updown-engine binary started, setting up logging...");

    let cfg = match AppConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("config error: {e}");
            std::process::exit(1);
        }
    };
    init_logging(&cfg);
    tracing::info!(event = "started", "updown engine starting");

    let model = match ModelLoader::load(&cfg.model_path, &cfg.imputations_path) {
        Ok(m) => Arc::new(m),
        Err(e) => {
            tracing::error!(event = "error", error = %e, errorCode = "modelLoad", "model load failed, halting");
            std::process::exit(1);
        }
    };
    let mut models = HashMap::new();
    for asset in &cfg.decision.symbols {
        models.insert(*asset, model.clone());
    }
    tracing::info!(event = "modelsLoaded", modelCount = models.len() as i64, "models loaded");

    let mut store = Store::new(cfg.persistence.clone());
    if let Err(e) = store.initialize() {
        tracing::error!(event = "error", error = %e, errorCode = "persistence", "persistence init failed, halting");
        std::process::exit(1);
    }

    let decision_engine = match DecisionEngine::new(cfg.decision.clone(), models) {
        Ok(e) => e,
        Err(e) => {
            tracing::error!(event = "error", error = %e, errorCode = "config", "decision config invalid, halting");
            std::process::exit(1);
        }
    };

    let mut registry = MarketRegistry::new(cfg.decision.threshold_bps.clone());
    registry.events.on(|e| {
        match e {
            RegistryEvent::MarketAdded { condition_id, slug, asset, .. } => {
                tracing::info!(event = "marketAdded", marketId = %condition_id, slug = %slug, symbol = %asset, "market tracker added");
            }
            RegistryEvent::MarketRemoved { condition_id } => {
                tracing::info!(event = "marketRemoved", marketId = %condition_id, "market tracker removed");
            }
            RegistryEvent::Error(msg) => {
                tracing::warn!(event = "error", error = %msg, errorCode = "scan", "market scan error");
            }
        }
        Ok(())
    });

    let market_query: Arc<dyn MarketQuery> = Arc::new(HttpMarketQuery::new(cfg.market_query_base_url.clone()));
    let order_sink: Arc<dyn OrderSink> = Arc::new(HttpOrderSink::new(cfg.order_sink_base_url.clone()));
    let resolution_source: Arc<dyn ResolutionSource> =
        Arc::new(HttpResolutionSource::new(cfg.resolution_base_url.clone()));
    let mut paper_book = PaperBook::new();
    let mut trade_ids: HashMap<String, i64> = HashMap::new();

    let (price_tx, mut price_rx) = mpsc::unbounded_channel::<PriceFeedEvent>();
    let mut price_feed_client = PriceFeedClient::new(cfg.price_feed.clone());
    price_feed_client.events.on(move |e| {
        price_tx.send(e.clone()).map_err(|_| EngineError::Network("price feed channel closed".into()))
    });
    tokio::spawn(async move {
        price_feed_client.run().await;
    });

    let mut predictive_timer = tokio::time::interval(std::time::Duration::from_secs(600));
    let mut reactive_timer = tokio::time::interval(std::time::Duration::from_secs(60));
    let mut cleanup_timer = tokio::time::interval(std::time::Duration::from_secs(30));
    let mut flush_timer = tokio::time::interval(std::time::Duration::from_millis(500));
    let mut vacuum_timer =
        tokio::time::interval(std::time::Duration::from_secs(cfg.persistence.vacuum_interval_hours * 3600));

    loop {
        tokio::select! {
            maybe_event = price_rx.recv() => {
                match maybe_event {
                    Some(event) => handle_price_feed_event(
                        event,
                        &mut registry,
                        &decision_engine,
                        &store,
                        &mut paper_book,
                        &mut trade_ids,
                        market_query.as_ref(),
                        order_sink.as_ref(),
                    ).await,
                    None => break,
                }
            }
            _ = predictive_timer.tick() => {
                let now_sec = now_ms() / 1000;
                registry.predictive_scan(market_query.as_ref(), &cfg.decision.symbols, cfg.lookahead_minutes, now_sec).await;
            }
            _ = reactive_timer.tick() => {
                registry.reactive_scan(market_query.as_ref()).await;
            }
            _ = cleanup_timer.tick() => {
                settle_resolved_positions(&registry, &mut paper_book, &store, resolution_source.as_ref()).await;
                let removed = registry.cleanup(now_ms());
                if removed > 0 {
                    tracing::info!(event = "cleanup", removedCount = removed as i64, remainingCount = registry.len() as i64, "expired trackers removed");
                }
            }
            _ = flush_timer.tick() => {
                if let Err(e) = store.flush() {
                    tracing::warn!(event = "error", error = %e.to_string(), errorCode = "persistence", "periodic flush failed");
                }
            }
            _ = vacuum_timer.tick() => {
                if let Err(e) = store.vacuum() {
                    tracing::warn!(event = "error", error = %e, errorCode = "persistence", "vacuum failed");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!(event = "stopped", "shutdown signal received");
                break;
            }
        }
    }

    if let Err(e) = store.close() {
        tracing::error!(event = "error", error = %e, errorCode = "persistence", "persistence flush on shutdown failed");
    }
    tracing::info!(event = "stopped", "updown engine stopped");
}

/// Translate one price-feed event into decision-engine actions. Connection
/// lifecycle events are observable-only; `Price` ticks are the hot path.
async fn handle_price_feed_event(
    event: PriceFeedEvent,
    registry: &mut MarketRegistry,
    decision_engine: &DecisionEngine,
    store: &Store,
    paper_book: &mut PaperBook,
    trade_ids: &mut HashMap<String, i64>,
    market_query: &dyn MarketQuery,
    order_sink: &dyn OrderSink,
) {
    match event {
        PriceFeedEvent::Connected => tracing::info!(event = "connected", "price feed connected"),
        PriceFeedEvent::Disconnected => tracing::warn!(event = "disconnected", "price feed disconnected"),
        PriceFeedEvent::Error(msg) => {
            tracing::warn!(event = "error", error = %msg, errorCode = "stream", "price feed error")
        }
        PriceFeedEvent::RateLimitExceeded => {
            tracing::warn!(event = "rateLimitExceeded", "price feed rate limit exceeded, frame dropped")
        }
        PriceFeedEvent::Price(tick) => {
            for (condition_id, features) in registry.route_price(tick) {
                if let Some(&trade_id) = trade_ids.get(&condition_id) {
                    if let Some(price) = registry.get(&condition_id).and_then(|t| t.feature_engine.last_price()) {
                        let mp = MinutePrice {
                            trade_id,
                            minute_offset: features.state_minute,
                            price,
                            ts: features.timestamp,
                        };
                        if let Err(e) = store.record_minute_price(mp) {
                            tracing::warn!(event = "error", error = %e.to_string(), errorCode = "persistence", marketId = %condition_id, "minute price persist failed");
                        }
                    }
                }

                let market = match market_query.get_market(&condition_id).await {
                    Ok(Some(m)) => m,
                    Ok(None) => continue,
                    Err(e) => {
                        tracing::warn!(event = "error", error = %e.to_string(), errorCode = "marketQuery", marketId = %condition_id, "market query failed");
                        continue;
                    }
                };
                let prices = MarketPrices::from(&market);
                let Some(tracker) = registry.get_mut(&condition_id) else { continue };

                let outcome = match decision_engine.evaluate(tracker, &prices, features) {
                    Ok(o) => o,
                    Err(e) => {
                        tracing::warn!(event = "error", error = %e.to_string(), errorCode = "decision", marketId = %condition_id, "evaluation failed");
                        continue;
                    }
                };
                let Some(output) = outcome else { continue };

                if let Err(e) = store.record_evaluation(output.evaluation.clone()) {
                    tracing::warn!(event = "error", error = %e.to_string(), errorCode = "persistence", marketId = %condition_id, "evaluation persist failed");
                }

                let Some(signal) = output.signal else { continue };
                tracing::info!(
                    event = "signal",
                    marketId = %signal.condition_id,
                    symbol = %signal.asset,
                    side = %format!("{:?}", signal.side).to_uppercase(),
                    confidence = signal.probability,
                    entryPrice = signal.entry_price,
                    stateMinute = signal.state_minute as i64,
                    linearCombination = signal.linear_combination,
                    "signal generated"
                );

                let tracker_ref = registry.get(&condition_id);
                let window_open_price = tracker_ref
                    .and_then(|t| t.feature_engine.window_open_price())
                    .unwrap_or(signal.entry_price);
                let regime = if signal.features.volatility_5m.is_finite() {
                    Some(classify(signal.features.volatility_5m, &signal.asset.to_string()))
                } else {
                    None
                };
                let trade_record = decision_engine.build_trade_record(&signal, window_open_price, regime);
                match store.record_trade(trade_record) {
                    Ok(trade_id) => {
                        trade_ids.insert(signal.condition_id.clone(), trade_id);
                    }
                    Err(e) => {
                        tracing::warn!(event = "error", error = %e.to_string(), errorCode = "persistence", marketId = %condition_id, "trade persist failed");
                    }
                }

                if decision_engine.dry_run() {
                    paper_book.open(PaperPosition {
                        condition_id: signal.condition_id.clone(),
                        side: signal.side,
                        entry_price: signal.entry_price,
                        size: signal.size,
                    });
                    tracing::info!(event = "paperPosition", marketId = %signal.condition_id, dryRun = true, "paper position opened");
                } else {
                    let request = MarketOrderRequest::new(signal.token_id.clone(), signal.size);
                    match order_sink.create_market_order(request).await {
                        Ok(result) => tracing::info!(
                            event = "execution",
                            marketId = %signal.condition_id,
                            success = result.success,
                            orderId = result.order_id.clone().unwrap_or_default(),
                            "order submitted"
                        ),
                        Err(e) => tracing::warn!(event = "error", error = %e.to_string(), errorCode = "execution", marketId = %signal.condition_id, "order submission failed"),
                    }
                }
            }
        }
    }
}

/// Drive dry-run settlement from inbound resolution events (spec 6), one
/// poll per open paper position per cleanup tick. An event referencing a
/// conditionId this process has no open position for is logged and dropped
/// (ResolutionError, spec 7).
async fn settle_resolved_positions(
    registry: &MarketRegistry,
    paper_book: &mut PaperBook,
    store: &Store,
    resolution_source: &dyn ResolutionSource,
) {
    let open_ids = paper_book.condition_ids();
    if open_ids.is_empty() {
        return;
    }
    let events = match resolution_source.poll_resolutions(&open_ids).await {
        Ok(events) => events,
        Err(e) => {
            tracing::warn!(event = "error", error = %e.to_string(), errorCode = "resolution", "resolution poll failed");
            return;
        }
    };

    for event in events {
        let (max_up, max_down, close_price, time_to_up, time_to_down) = match registry.get(&event.condition_id) {
            Some(tracker) => (
                tracker.feature_engine.max_run_up().unwrap_or(0.0),
                tracker.feature_engine.max_run_down().unwrap_or(0.0),
                tracker.feature_engine.last_price().unwrap_or(0.0),
                tracker.feature_engine.first_up_hit_minute().map(|m| m as f64),
                tracker.feature_engine.first_down_hit_minute().map(|m| m as f64),
            ),
            None => (0.0, 0.0, 0.0, None, None),
        };
        let winner_is_up = event.outcome == crate::persistence::records::Outcome::Up;

        let Some((settlement, mfe, mae)) =
            paper_book.settle_with_excursion(&event.condition_id, winner_is_up, max_up, max_down)
        else {
            tracing::warn!(event = "error", errorCode = "resolution", marketId = %event.condition_id, "resolution event for unknown conditionId");
            continue;
        };

        if let Err(e) = crate::decision::persist_settlement(
            store,
            &settlement,
            close_price,
            event.timestamp,
            mfe,
            mae,
            time_to_up,
            time_to_down,
        ) {
            tracing::warn!(event = "error", error = %e.to_string(), errorCode = "persistence", marketId = %event.condition_id, "settlement persist failed");
        }
        tracing::info!(
            event = "paperSettlement",
            marketId = %settlement.condition_id,
            outcome = %format!("{:?}", settlement.outcome).to_uppercase(),
            isWin = settlement.won,
            pnl = settlement.pnl,
            "paper position settled"
        );
    }
}
