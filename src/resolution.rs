use crate::errors::{EngineError, EngineResult};
use crate::persistence::records::Outcome;
use async_trait::async_trait;
use serde::Deserialize;

/// One inbound market-resolution notification (spec 6, dry-run settlement driver).
#[derive(Debug, Clone)]
pub struct ResolutionEvent {
    pub condition_id: String,
    pub outcome: Outcome,
    pub timestamp: i64,
}

#[derive(Deserialize)]
struct RawResolutionEvent {
    #[serde(rename = "conditionId")]
    condition_id: String,
    #[serde(rename = "type")]
    kind: String,
    data: RawResolutionData,
    timestamp: i64,
}

#[derive(Deserialize)]
struct RawResolutionData {
    winner: Option<String>,
    outcome: Option<String>,
}

/// Parse one inbound resolution notification. `winner` and `outcome` are
/// case-insensitive aliases of each other; anything else is a resolution
/// error (caller logs it at warn level and drops it, per the ResolutionError
/// propagation policy).
pub fn parse_resolution_event(raw: &str) -> EngineResult<ResolutionEvent> {
    let parsed: RawResolutionEvent =
        serde_json::from_str(raw).map_err(|e| EngineError::Resolution(e.to_string()))?;
    if parsed.kind != "resolved" {
        return Err(EngineError::Resolution(format!("unexpected event type {}", parsed.kind)));
    }
    let label = parsed
        .data
        .winner
        .or(parsed.data.outcome)
        .ok_or_else(|| EngineError::Resolution("missing winner/outcome".into()))?;
    let outcome = match label.to_ascii_uppercase().as_str() {
        "UP" => Outcome::Up,
        "DOWN" => Outcome::Down,
        other => return Err(EngineError::Resolution(format!("unknown outcome {other}"))),
    };
    Ok(ResolutionEvent { condition_id: parsed.condition_id, outcome, timestamp: parsed.timestamp })
}

/// Abstracted resolution-events interface (spec 6): the engine polls this
/// once per cleanup tick for every conditionId it still has an open paper
/// position against.
#[async_trait]
pub trait ResolutionSource: Send + Sync {
    async fn poll_resolutions(&self, condition_ids: &[String]) -> EngineResult<Vec<ResolutionEvent>>;
}

/// Live implementer backed by a REST resolution-feed endpoint.
pub struct HttpResolutionSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpResolutionSource {
    pub fn new(base_url: String) -> Self {
        Self { client: reqwest::Client::new(), base_url }
    }
}

#[async_trait]
impl ResolutionSource for HttpResolutionSource {
    async fn poll_resolutions(&self, condition_ids: &[String]) -> EngineResult<Vec<ResolutionEvent>> {
        if condition_ids.is_empty() {
            return Ok(Vec::new());
        }
        let resp = self
            .client
            .get(format!("{}/resolutions", self.base_url))
            .query(&[("conditionIds", condition_ids.join(","))])
            .send()
            .await?
            .error_for_status()?;
        let raw_events: Vec<serde_json::Value> = resp.json().await?;
        let mut events = Vec::with_capacity(raw_events.len());
        for raw in raw_events {
            events.push(parse_resolution_event(&raw.to_string())?);
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_winner_field_case_insensitively() {
        let event =
            parse_resolution_event(r#"{"conditionId":"c1","type":"resolved","data":{"winner":"up"},"timestamp":1}"#)
                .unwrap();
        assert_eq!(event.condition_id, "c1");
        assert_eq!(event.outcome, Outcome::Up);
    }

    #[test]
    fn parses_outcome_alias() {
        let event = parse_resolution_event(
            r#"{"conditionId":"c2","type":"resolved","data":{"outcome":"DOWN"},"timestamp":2}"#,
        )
        .unwrap();
        assert_eq!(event.outcome, Outcome::Down);
    }

    #[test]
    fn rejects_non_resolved_type() {
        let result = parse_resolution_event(
            r#"{"conditionId":"c3","type":"created","data":{"winner":"Up"},"timestamp":3}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn rejects_missing_winner_and_outcome() {
        let result =
            parse_resolution_event(r#"{"conditionId":"c4","type":"resolved","data":{},"timestamp":4}"#);
        assert!(result.is_err());
    }

    #[test]
    fn rejects_unknown_outcome_label() {
        let result = parse_resolution_event(
            r#"{"conditionId":"c5","type":"resolved","data":{"winner":"sideways"},"timestamp":5}"#,
        );
        assert!(result.is_err());
    }
}
