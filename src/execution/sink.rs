use crate::errors::EngineResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
pub struct MarketOrderRequest {
    pub token_id: String,
    pub side: &'static str,
    pub amount: f64,
    pub order_type: &'static str,
}

impl MarketOrderRequest {
    pub fn new(token_id: String, amount: f64) -> Self {
        Self { token_id, side: "BUY", amount, order_type: "FOK" }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrderResult {
    pub success: bool,
    pub order_id: Option<String>,
}

/// Outbound execution boundary. A concrete implementer talks to the real
/// order-placement network; tests and dry-run callers never need one since
/// dry-run records a `PaperPosition` instead of calling through this trait.
#[async_trait]
pub trait OrderSink: Send + Sync {
    async fn create_market_order(&self, request: MarketOrderRequest) -> EngineResult<OrderResult>;
}

/// Live implementer backed by a REST order-placement endpoint.
pub struct HttpOrderSink {
    client: reqwest::Client,
    base_url: String,
}

impl HttpOrderSink {
    pub fn new(base_url: String) -> Self {
        Self { client: reqwest::Client::new(), base_url }
    }
}

#[async_trait]
impl OrderSink for HttpOrderSink {
    async fn create_market_order(&self, request: MarketOrderRequest) -> EngineResult<OrderResult> {
        let resp = self
            .client
            .post(format!("{}/orders", self.base_url))
            .json(&request)
            .send()
            .await?;
        let result: OrderResult = resp.json().await?;
        Ok(result)
    }
}
