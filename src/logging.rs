use crate::errors::truncate_message;
use serde_json::{Map, Value};
use std::fmt;
use tracing::field::{Field, Visit};
use tracing::Level;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent};
use tracing_subscriber::registry::LookupSpan;

/// Closed enumeration of context fields. Anything outside this set is
/// dropped rather than silently widening the log schema.
const CONTEXT_FIELDS: &[&str] = &[
    "marketId",
    "symbol",
    "slug",
    "stateMinute",
    "side",
    "confidence",
    "entryPrice",
    "imputedFeatures",
    "orderId",
    "error",
    "errorCode",
    "message",
    "modelCount",
    "trackerCount",
    "positionCount",
    "removedCount",
    "remainingCount",
    "success",
    "pnl",
    "size",
    "dryRun",
    "linearCombination",
    "tradeId",
    "dbPath",
    "outcome",
    "isWin",
];

const MAX_ERROR_LEN: usize = 200;

#[derive(Default)]
struct FieldCollector {
    event_name: Option<String>,
    context: Map<String, Value>,
}

impl FieldCollector {
    fn record(&mut self, name: &str, value: Value) {
        if name == "event" {
            self.event_name = value.as_str().map(str::to_string);
            return;
        }
        if name == "message" && self.event_name.is_none() {
            if let Some(s) = value.as_str() {
                self.event_name = Some(s.to_string());
            }
        }
        let value = if name == "error" {
            match value.as_str() {
                Some(s) => Value::String(truncate_message(s, MAX_ERROR_LEN)),
                None => value,
            }
        } else {
            value
        };
        if CONTEXT_FIELDS.contains(&name) {
            self.context.insert(name.to_string(), value);
        }
    }
}

impl Visit for FieldCollector {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.record(field.name(), Value::String(value.to_string()));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.record(field.name(), Value::Bool(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.record(field.name(), Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.record(field.name(), Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        let json_value = match serde_json::Number::from_f64(value) {
            Some(n) => Value::Number(n),
            None => Value::String("NaN".to_string()),
        };
        self.record(field.name(), json_value);
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.record(field.name(), Value::String(format!("{value:?}")));
    }
}

fn level_str(level: &Level) -> &'static str {
    match *level {
        Level::ERROR => "ERROR",
        Level::WARN => "WARN",
        _ => "INFO",
    }
}

/// Emits one single-line JSON object per event: context fields from the
/// closed enumeration are inserted first, then the fixed base fields --
/// so a context field can never shadow a base field of the same name.
pub struct JsonEventFormatter {
    pub service: String,
    pub app: String,
    pub env: String,
    pub strategy: String,
}

impl<S, N> FormatEvent<S, N> for JsonEventFormatter
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> tracing_subscriber::fmt::FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> fmt::Result {
        let mut collector = FieldCollector::default();
        event.record(&mut collector);

        let mut out = collector.context;
        out.insert(
            "timestamp".to_string(),
            Value::String(chrono::Utc::now().to_rfc3339()),
        );
        out.insert("level".to_string(), Value::String(level_str(event.metadata().level()).to_string()));
        out.insert("strategy".to_string(), Value::String(self.strategy.clone()));
        out.insert(
            "event".to_string(),
            Value::String(collector.event_name.unwrap_or_else(|| event.metadata().name().to_string())),
        );
        out.insert("_service".to_string(), Value::String(self.service.clone()));
        out.insert("_app".to_string(), Value::String(self.app.clone()));
        out.insert("_env".to_string(), Value::String(self.env.clone()));

        let line = serde_json::to_string(&Value::Object(out)).map_err(|_| fmt::Error)?;
        writer.write_str(&line)?;
        writer.write_char('\n')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_fields_outside_closed_enumeration() {
        let mut collector = FieldCollector::default();
        collector.record("notAKnownField", Value::String("x".into()));
        assert!(collector.context.is_empty());
    }

    #[test]
    fn keeps_allow_listed_field() {
        let mut collector = FieldCollector::default();
        collector.record("symbol", Value::String("BTC".into()));
        assert_eq!(collector.context.get("symbol"), Some(&Value::String("BTC".into())));
    }

    #[test]
    fn error_field_is_truncated() {
        let mut collector = FieldCollector::default();
        let long = "x".repeat(300);
        collector.record("error", Value::String(long));
        let stored = collector.context.get("error").unwrap().as_str().unwrap();
        assert_eq!(stored.chars().count(), 201);
    }

    #[test]
    fn explicit_event_field_wins_over_message() {
        let mut collector = FieldCollector::default();
        collector.record("message", Value::String("fallback text".into()));
        collector.record("event", Value::String("signal".into()));
        assert_eq!(collector.event_name.as_deref(), Some("signal"));
    }
}
