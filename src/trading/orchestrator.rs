//! Quick-trade orchestrator: discretionary orders from analysis surfaces,
//! sized in USDT, executed against a live venue and recorded in the ledger.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::postgres::PgPool;
use sqlx::Row;
use std::str::FromStr;
use std::time::Duration;
use tracing::{error, info, warn};

use super::parsers::{parse_balance, parse_positions, symbol_matches, ParsedBalance, ParsedPosition};
use crate::domain::MarketType;
use crate::error::{QuantdeskError, Result};
use crate::exchange::{
    create_client, ExchangeCredentials, LiveExchangeClient, LiveOrderResult, OrderSide,
};

const FILL_WAIT: Duration = Duration::from_secs(10);
const FILL_POLL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Deserialize)]
pub struct PlaceOrderRequest {
    pub credential_id: i64,
    pub symbol: String,
    pub side: String,
    #[serde(default = "default_order_type")]
    pub order_type: String,
    /// USDT notional; always converted to base quantity before dispatch
    pub amount: f64,
    #[serde(default)]
    pub price: f64,
    #[serde(default = "default_leverage")]
    pub leverage: u32,
    #[serde(default)]
    pub market_type: Option<String>,
    #[serde(default)]
    pub tp_price: f64,
    #[serde(default)]
    pub sl_price: f64,
    #[serde(default = "default_source")]
    pub source: String,
}

fn default_order_type() -> String {
    "market".to_string()
}

fn default_leverage() -> u32 {
    1
}

fn default_source() -> String {
    "manual".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClosePositionRequest {
    pub credential_id: i64,
    pub symbol: String,
    #[serde(default)]
    pub market_type: Option<String>,
    /// 0 closes the full position
    #[serde(default)]
    pub size: f64,
    #[serde(default = "default_source")]
    pub source: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderOutcome {
    pub trade_id: Option<i64>,
    pub exchange_order_id: String,
    pub filled: f64,
    pub avg_price: f64,
    pub status: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CloseOutcome {
    #[serde(flatten)]
    pub order: OrderOutcome,
    pub closed_size: f64,
    pub position_side: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TradeRow {
    pub id: i64,
    pub exchange_id: String,
    pub symbol: String,
    pub side: String,
    pub order_type: String,
    pub amount: f64,
    pub price: f64,
    pub leverage: i32,
    pub market_type: String,
    pub tp_price: f64,
    pub sl_price: f64,
    pub status: String,
    pub exchange_order_id: String,
    pub filled_amount: f64,
    pub avg_fill_price: f64,
    pub error_msg: String,
    pub source: String,
    pub created_at: String,
}

pub struct QuickTradeService {
    pool: PgPool,
}

impl QuickTradeService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Place a quick market or limit order; every attempt leaves a ledger row.
    pub async fn place_order(&self, user_id: i64, req: PlaceOrderRequest) -> Result<OrderOutcome> {
        match self.place_order_inner(user_id, &req).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                let market_type = resolved_market_type(req.market_type.as_deref(), req.leverage);
                self.record_trade(LedgerEntry {
                    user_id,
                    credential_id: req.credential_id,
                    exchange_id: String::new(),
                    symbol: req.symbol.clone(),
                    side: req.side.clone(),
                    order_type: req.order_type.clone(),
                    amount: req.amount,
                    price: 0.0,
                    leverage: req.leverage,
                    market_type: market_type.as_str().to_string(),
                    tp_price: req.tp_price,
                    sl_price: req.sl_price,
                    status: "failed".to_string(),
                    exchange_order_id: String::new(),
                    filled: 0.0,
                    avg_price: 0.0,
                    error_msg: truncate(&e.to_string(), 500),
                    source: req.source.clone(),
                    raw_result: Value::Null,
                })
                .await;
                Err(e)
            }
        }
    }

    async fn place_order_inner(
        &self,
        user_id: i64,
        req: &PlaceOrderRequest,
    ) -> Result<OrderOutcome> {
        if req.symbol.trim().is_empty() {
            return Err(QuantdeskError::Validation("missing symbol".to_string()));
        }
        if req.amount <= 0.0 {
            return Err(QuantdeskError::Validation("amount must be > 0".to_string()));
        }
        let side =
            OrderSide::from_str(&req.side).map_err(|_| QuantdeskError::InvalidSide(req.side.clone()))?;
        let is_limit = req.order_type.eq_ignore_ascii_case("limit");
        if is_limit && req.price <= 0.0 {
            return Err(QuantdeskError::InvalidPrice(
                "price required for limit orders".to_string(),
            ));
        }

        // Leverage wins over user input: 1 means spot, above 1 means swap
        let market_type = resolved_market_type(req.market_type.as_deref(), req.leverage);

        let credentials = self.load_credential(req.credential_id, user_id).await?;
        let exchange_id = credentials.exchange_id.to_ascii_lowercase();
        let client = create_client(&credentials, market_type)?;

        let base_qty = self
            .convert_usdt_to_base(
                client.as_ref(),
                &req.symbol,
                req.amount,
                if is_limit { req.price } else { 0.0 },
            )
            .await;

        // Leverage setup is best-effort; a venue rejection must not kill the order
        if market_type == MarketType::Swap && req.leverage > 1 {
            match client.set_leverage(&req.symbol, req.leverage).await {
                Ok(true) => {}
                Ok(false) => info!("set_leverage not applicable for {}", exchange_id),
                Err(e) => warn!("set_leverage failed (non-fatal): {}", e),
            }
        }

        let client_order_id = generate_client_order_id("qt");

        let result = if is_limit {
            client
                .place_limit_order(&req.symbol, side, base_qty, req.price, Some(&client_order_id))
                .await?
        } else {
            // Spot sell maps to close_long; everything else opens a position
            let reduce_only = market_type == MarketType::Spot && side == OrderSide::Sell;
            client
                .place_market_order(&req.symbol, side, base_qty, reduce_only, Some(&client_order_id))
                .await?
        };

        let result = self
            .reconcile_fill(client.as_ref(), &req.symbol, result, &client_order_id)
            .await;

        let status = if result.filled > 0.0 { "filled" } else { "submitted" };
        let trade_id = self
            .record_trade(LedgerEntry {
                user_id,
                credential_id: req.credential_id,
                exchange_id,
                symbol: req.symbol.clone(),
                side: req.side.clone(),
                order_type: req.order_type.clone(),
                // The ledger keeps the original USDT notional, not base qty
                amount: req.amount,
                price: if is_limit { req.price } else { result.avg_price },
                leverage: req.leverage,
                market_type: market_type.as_str().to_string(),
                tp_price: req.tp_price,
                sl_price: req.sl_price,
                status: status.to_string(),
                exchange_order_id: result.exchange_order_id.clone(),
                filled: result.filled,
                avg_price: result.avg_price,
                error_msg: String::new(),
                source: req.source.clone(),
                raw_result: result.raw.clone(),
            })
            .await;

        Ok(OrderOutcome {
            trade_id,
            exchange_order_id: result.exchange_order_id,
            filled: result.filled,
            avg_price: result.avg_price,
            status: status.to_string(),
        })
    }

    /// Close an existing position (full or partial).
    pub async fn close_position(
        &self,
        user_id: i64,
        req: ClosePositionRequest,
    ) -> Result<CloseOutcome> {
        if req.symbol.trim().is_empty() {
            return Err(QuantdeskError::Validation("missing symbol".to_string()));
        }
        let market_type = req
            .market_type
            .as_deref()
            .map(|m| MarketType::from_str(m).unwrap_or(MarketType::Swap))
            .unwrap_or(MarketType::Swap);

        let credentials = self.load_credential(req.credential_id, user_id).await?;
        let exchange_id = credentials.exchange_id.to_ascii_lowercase();
        let client = create_client(&credentials, market_type)?;

        let positions_raw = client.get_positions(Some(&req.symbol)).await?;
        let positions = parse_positions(&positions_raw);
        let position = positions
            .iter()
            .find(|p| symbol_matches(&req.symbol, &p.symbol))
            .cloned()
            .ok_or_else(|| {
                QuantdeskError::OrderNotFound(format!("no position found for {}", req.symbol))
            })?;

        if position.size <= 0.0 {
            return Err(QuantdeskError::Validation(
                "position size is zero or invalid".to_string(),
            ));
        }
        if market_type == MarketType::Spot && position.side != "long" {
            return Err(QuantdeskError::UnsupportedOperation(
                "spot market only supports closing long positions".to_string(),
            ));
        }

        let close_size = if req.size > 0.0 {
            req.size.min(position.size)
        } else {
            position.size
        };
        // Closing a long sells; closing a short buys it back
        let side = if position.side == "long" {
            OrderSide::Sell
        } else {
            OrderSide::Buy
        };
        let reduce_only = market_type == MarketType::Swap;
        let client_order_id = generate_client_order_id("qtc");

        let result = client
            .place_market_order(&req.symbol, side, close_size, reduce_only, Some(&client_order_id))
            .await?;
        let result = self
            .reconcile_fill(client.as_ref(), &req.symbol, result, &client_order_id)
            .await;

        // Ledger keeps USDT equivalents; fall back to mark/entry price when
        // the fill price is not yet known
        let mut usdt_amount = close_size * result.avg_price;
        if usdt_amount <= 0.0 {
            let fallback = if position.mark_price > 0.0 {
                position.mark_price
            } else {
                position.entry_price
            };
            usdt_amount = close_size * fallback;
        }

        let status = if result.filled > 0.0 { "filled" } else { "submitted" };
        let trade_id = self
            .record_trade(LedgerEntry {
                user_id,
                credential_id: req.credential_id,
                exchange_id,
                symbol: req.symbol.clone(),
                side: side.as_str().to_string(),
                order_type: "market".to_string(),
                amount: usdt_amount,
                price: result.avg_price,
                leverage: position.leverage as u32,
                market_type: market_type.as_str().to_string(),
                tp_price: 0.0,
                sl_price: 0.0,
                status: status.to_string(),
                exchange_order_id: result.exchange_order_id.clone(),
                filled: result.filled,
                avg_price: result.avg_price,
                error_msg: String::new(),
                source: req.source.clone(),
                raw_result: result.raw.clone(),
            })
            .await;

        Ok(CloseOutcome {
            order: OrderOutcome {
                trade_id,
                exchange_order_id: result.exchange_order_id,
                filled: result.filled,
                avg_price: result.avg_price,
                status: status.to_string(),
            },
            closed_size: close_size,
            position_side: position.side,
        })
    }

    pub async fn get_balance(
        &self,
        user_id: i64,
        credential_id: i64,
        market_type: MarketType,
    ) -> Result<ParsedBalance> {
        let credentials = self.load_credential(credential_id, user_id).await?;
        let client = create_client(&credentials, market_type)?;
        match client.get_balance().await {
            Ok(raw) => Ok(parse_balance(&raw)),
            Err(e) => {
                warn!("balance fetch failed: {}", e);
                Ok(ParsedBalance {
                    error: Some(e.to_string()),
                    ..ParsedBalance::default()
                })
            }
        }
    }

    pub async fn get_positions(
        &self,
        user_id: i64,
        credential_id: i64,
        symbol: &str,
        market_type: MarketType,
    ) -> Result<Vec<ParsedPosition>> {
        let credentials = self.load_credential(credential_id, user_id).await?;
        let client = create_client(&credentials, market_type)?;
        match client.get_positions(Some(symbol)).await {
            Ok(raw) => Ok(parse_positions(&raw)),
            Err(e) => {
                warn!("position fetch failed: {}", e);
                Ok(Vec::new())
            }
        }
    }

    pub async fn get_history(&self, user_id: i64, limit: i64, offset: i64) -> Result<Vec<TradeRow>> {
        let limit = limit.clamp(1, 200);
        let rows = sqlx::query(
            r#"
            SELECT id, exchange_id, symbol, side, order_type, amount, price,
                   leverage, market_type, tp_price, sl_price, status,
                   exchange_order_id, filled_amount, avg_fill_price,
                   error_msg, source, created_at
            FROM qd_quick_trades
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .bind(offset.max(0))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|r| TradeRow {
                id: r.get("id"),
                exchange_id: r.get::<Option<String>, _>("exchange_id").unwrap_or_default(),
                symbol: r.get::<Option<String>, _>("symbol").unwrap_or_default(),
                side: r.get::<Option<String>, _>("side").unwrap_or_default(),
                order_type: r.get::<Option<String>, _>("order_type").unwrap_or_default(),
                amount: r.get::<Option<f64>, _>("amount").unwrap_or(0.0),
                price: r.get::<Option<f64>, _>("price").unwrap_or(0.0),
                leverage: r.get::<Option<i32>, _>("leverage").unwrap_or(1),
                market_type: r.get::<Option<String>, _>("market_type").unwrap_or_default(),
                tp_price: r.get::<Option<f64>, _>("tp_price").unwrap_or(0.0),
                sl_price: r.get::<Option<f64>, _>("sl_price").unwrap_or(0.0),
                status: r.get::<Option<String>, _>("status").unwrap_or_default(),
                exchange_order_id: r
                    .get::<Option<String>, _>("exchange_order_id")
                    .unwrap_or_default(),
                filled_amount: r.get::<Option<f64>, _>("filled_amount").unwrap_or(0.0),
                avg_fill_price: r.get::<Option<f64>, _>("avg_fill_price").unwrap_or(0.0),
                error_msg: r.get::<Option<String>, _>("error_msg").unwrap_or_default(),
                source: r.get::<Option<String>, _>("source").unwrap_or_default(),
                created_at: r
                    .get::<Option<chrono::DateTime<chrono::Utc>>, _>("created_at")
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_default(),
            })
            .collect())
    }

    /// USDT to base quantity. Limit orders use the given price; market orders
    /// fetch a live ticker. When neither yields a price, the original USDT
    /// magnitude is submitted after a CRITICAL log: the venue will reject it,
    /// which is the intended loud failure rather than a silent mis-size.
    async fn convert_usdt_to_base(
        &self,
        client: &dyn LiveExchangeClient,
        symbol: &str,
        usdt_amount: f64,
        limit_price: f64,
    ) -> f64 {
        if usdt_amount <= 0.0 {
            return usdt_amount;
        }
        let price = if limit_price > 0.0 {
            limit_price
        } else {
            match client.get_ticker_price(symbol).await {
                Ok(p) if p > 0.0 => p,
                _ => 0.0,
            }
        };
        if price > 0.0 {
            let base = usdt_amount / price;
            info!(
                "converted {} USDT to {:.8} base at price {} for {}",
                usdt_amount, base, price, symbol
            );
            base
        } else {
            error!(
                "CRITICAL: could not get price for {} on {} to convert {} USDT; \
                 submitting the raw magnitude, the venue will almost certainly reject it",
                symbol,
                client.exchange_id(),
                usdt_amount
            );
            usdt_amount
        }
    }

    /// Enrich a submitted order with fill data where the venue allows it.
    async fn reconcile_fill(
        &self,
        client: &dyn LiveExchangeClient,
        symbol: &str,
        mut result: LiveOrderResult,
        client_order_id: &str,
    ) -> LiveOrderResult {
        if result.filled > 0.0 && result.avg_price > 0.0 {
            return result;
        }
        match client
            .wait_for_fill(
                symbol,
                &result.exchange_order_id,
                client_order_id,
                FILL_WAIT,
                FILL_POLL,
            )
            .await
        {
            Ok(report) => {
                if report.filled > 0.0 {
                    result.filled = report.filled;
                    result.avg_price = report.avg_price;
                }
                if !report.status.is_empty() {
                    result.status = report.status;
                }
                if report.fee > 0.0 {
                    result.raw["realized_fee"] = json!(report.fee);
                    result.raw["realized_fee_ccy"] = json!(report.fee_ccy);
                }
                result
            }
            Err(e) => {
                warn!("fill reconciliation failed: {}", e);
                result
            }
        }
    }

    async fn load_credential(
        &self,
        credential_id: i64,
        user_id: i64,
    ) -> Result<ExchangeCredentials> {
        let row = sqlx::query(
            "SELECT encrypted_config FROM qd_exchange_credentials WHERE id = $1 AND user_id = $2",
        )
        .bind(credential_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| {
            QuantdeskError::MissingCredential(format!(
                "credential {} not found or access denied",
                credential_id
            ))
        })?;

        let config: Value = row.get("encrypted_config");
        ExchangeCredentials::from_config_json(&config)
    }

    async fn record_trade(&self, entry: LedgerEntry) -> Option<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO qd_quick_trades
                (user_id, credential_id, exchange_id, symbol, side, order_type,
                 amount, price, leverage, market_type, tp_price, sl_price,
                 status, exchange_order_id, filled_amount, avg_fill_price,
                 error_msg, source, raw_result, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12,
                    $13, $14, $15, $16, $17, $18, $19, NOW())
            RETURNING id
            "#,
        )
        .bind(entry.user_id)
        .bind(entry.credential_id)
        .bind(&entry.exchange_id)
        .bind(&entry.symbol)
        .bind(&entry.side)
        .bind(&entry.order_type)
        .bind(entry.amount)
        .bind(entry.price)
        .bind(entry.leverage as i32)
        .bind(&entry.market_type)
        .bind(entry.tp_price)
        .bind(entry.sl_price)
        .bind(&entry.status)
        .bind(&entry.exchange_order_id)
        .bind(entry.filled)
        .bind(entry.avg_price)
        .bind(&entry.error_msg)
        .bind(&entry.source)
        .bind(&entry.raw_result)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(row) => Some(row.get("id")),
            Err(e) => {
                error!("failed to record quick trade: {}", e);
                None
            }
        }
    }
}

struct LedgerEntry {
    user_id: i64,
    credential_id: i64,
    exchange_id: String,
    symbol: String,
    side: String,
    order_type: String,
    amount: f64,
    price: f64,
    leverage: u32,
    market_type: String,
    tp_price: f64,
    sl_price: f64,
    status: String,
    exchange_order_id: String,
    filled: f64,
    avg_price: f64,
    error_msg: String,
    source: String,
    raw_result: Value,
}

/// Leverage overrides the requested market type: 1x is spot, above 1x swap.
pub fn resolved_market_type(requested: Option<&str>, leverage: u32) -> MarketType {
    if leverage > 1 {
        return MarketType::Swap;
    }
    if leverage == 1 {
        return MarketType::Spot;
    }
    requested
        .and_then(|m| MarketType::from_str(m).ok())
        .unwrap_or(MarketType::Swap)
}

/// Venue-safe client order id: prefix + last 6 epoch-second digits + 8 hex
/// chars. Alphanumeric and at most 32 chars everywhere.
pub fn generate_client_order_id(prefix: &str) -> String {
    let ts = chrono::Utc::now().timestamp().to_string();
    let ts_suffix = &ts[ts.len().saturating_sub(6)..];
    let uuid_suffix = &uuid::Uuid::new_v4().simple().to_string()[..8];
    format!("{}{}{}", prefix, ts_suffix, uuid_suffix)
}

fn truncate(s: &str, n: usize) -> String {
    s.chars().take(n).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leverage_overrides_market_type() {
        assert_eq!(resolved_market_type(Some("spot"), 10), MarketType::Swap);
        assert_eq!(resolved_market_type(Some("swap"), 1), MarketType::Spot);
        assert_eq!(resolved_market_type(None, 1), MarketType::Spot);
        assert_eq!(resolved_market_type(None, 5), MarketType::Swap);
    }

    #[test]
    fn client_order_id_is_short_and_alphanumeric() {
        let id = generate_client_order_id("qt");
        assert!(id.len() <= 32);
        assert!(id.starts_with("qt"));
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));

        let close_id = generate_client_order_id("qtc");
        assert!(close_id.starts_with("qtc"));
        assert!(close_id.len() <= 32);
    }

    #[test]
    fn client_order_ids_are_unique() {
        let a = generate_client_order_id("qt");
        let b = generate_client_order_id("qt");
        assert_ne!(a, b);
    }

    #[test]
    fn error_messages_truncate_at_500() {
        let long = "e".repeat(1000);
        assert_eq!(truncate(&long, 500).len(), 500);
    }
}
