use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{QuantdeskError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
        }
    }
}

impl FromStr for OrderSide {
    type Err = &'static str;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "buy" => Ok(Self::Buy),
            "sell" => Ok(Self::Sell),
            _ => Err("invalid side; expected buy|sell"),
        }
    }
}

pub fn parse_order_side(raw: &str) -> Result<OrderSide> {
    OrderSide::from_str(raw).map_err(|_| QuantdeskError::InvalidSide(raw.to_string()))
}

/// Uniform order result across venues.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveOrderResult {
    pub exchange_id: String,
    pub exchange_order_id: String,
    pub filled: f64,
    pub avg_price: f64,
    pub status: String,
    pub raw: Value,
}

impl LiveOrderResult {
    pub fn submitted(exchange_id: &str, order_id: String, raw: Value) -> Self {
        Self {
            exchange_id: exchange_id.to_string(),
            exchange_order_id: order_id,
            filled: 0.0,
            avg_price: 0.0,
            status: "submitted".to_string(),
            raw,
        }
    }
}

/// Outcome of polling an order until fill or deadline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FillReport {
    pub filled: f64,
    pub avg_price: f64,
    pub fee: f64,
    pub fee_ccy: String,
    pub status: String,
    pub raw: Value,
}

impl Default for FillReport {
    fn default() -> Self {
        Self {
            filled: 0.0,
            avg_price: 0.0,
            fee: 0.0,
            fee_ccy: String::new(),
            status: String::new(),
            raw: Value::Null,
        }
    }
}

fn unsupported(feature: &str, exchange: &str) -> QuantdeskError {
    QuantdeskError::UnsupportedOperation(format!(
        "{} is not implemented for exchange '{}'",
        feature, exchange
    ))
}

/// Common surface of every live venue client.
///
/// Quantities and prices are accepted as f64 at the boundary; each client
/// floors them to the venue's step/tick before anything touches the wire.
#[async_trait]
pub trait LiveExchangeClient: Send + Sync + std::fmt::Debug {
    fn exchange_id(&self) -> &'static str;

    /// Public connectivity check; never signs.
    async fn ping(&self) -> bool;

    async fn place_limit_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
        price: f64,
        client_order_id: Option<&str>,
    ) -> Result<LiveOrderResult>;

    async fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
        reduce_only: bool,
        client_order_id: Option<&str>,
    ) -> Result<LiveOrderResult>;

    async fn cancel_order(
        &self,
        symbol: &str,
        order_id: &str,
        client_order_id: &str,
    ) -> Result<Value>;

    async fn get_order(
        &self,
        symbol: &str,
        order_id: &str,
        client_order_id: &str,
    ) -> Result<Value>;

    /// Poll `get_order` until filled, terminal, or deadline.
    async fn wait_for_fill(
        &self,
        symbol: &str,
        order_id: &str,
        client_order_id: &str,
        max_wait: Duration,
        poll_interval: Duration,
    ) -> Result<FillReport>;

    /// Last traded price, used for USDT-to-base sizing.
    async fn get_ticker_price(&self, _symbol: &str) -> Result<f64> {
        Err(unsupported("get_ticker_price", self.exchange_id()))
    }

    /// Raw venue balance payload; shape differs per venue, parsed upstream.
    async fn get_balance(&self) -> Result<Value> {
        Err(unsupported("get_balance", self.exchange_id()))
    }

    /// Raw venue positions payload; shape differs per venue, parsed upstream.
    async fn get_positions(&self, _symbol: Option<&str>) -> Result<Value> {
        Err(unsupported("get_positions", self.exchange_id()))
    }

    /// Set leverage for a swap symbol. Ok(false) where not applicable.
    async fn set_leverage(&self, _symbol: &str, _leverage: u32) -> Result<bool> {
        Ok(false)
    }

    /// Best-effort realized fee for a filled order: `(0, "")` when unknown.
    async fn get_order_fee(&self, _symbol: &str, _order_id: &str) -> (f64, String) {
        (0.0, String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_side_parsing() {
        assert_eq!(parse_order_side("buy").unwrap(), OrderSide::Buy);
        assert_eq!(parse_order_side(" SELL ").unwrap(), OrderSide::Sell);
        assert!(matches!(
            parse_order_side("long"),
            Err(QuantdeskError::InvalidSide(_))
        ));
    }

    #[test]
    fn submitted_result_has_zero_fill() {
        let r = LiveOrderResult::submitted("bybit", "abc".to_string(), Value::Null);
        assert_eq!(r.filled, 0.0);
        assert_eq!(r.status, "submitted");
    }
}
