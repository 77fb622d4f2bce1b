pub mod sink;

pub use sink::{HttpOrderSink, MarketOrderRequest, OrderResult, OrderSink};
