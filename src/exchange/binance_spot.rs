//! Binance Spot REST client (v3).
//!
//! Signing: HMAC-SHA256 hex over the exact urlencoded query string sent on
//! the wire, `signature` appended last.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Method;
use rust_decimal::Decimal;
use serde_json::Value;
use sha2::Sha256;
use std::time::Duration;

use super::precision::{floor_to_step, format_amount, scale_of_step, to_dec};
use super::symbols::to_binance_symbol;
use super::traits::{FillReport, LiveExchangeClient, LiveOrderResult, OrderSide};
use super::transport::{query_string, RestTransport};
use crate::cache::TtlCache;
use crate::error::{QuantdeskError, Result};

type HmacSha256 = Hmac<Sha256>;

const VENUE: &str = "binance";
const DEFAULT_BASE_URL: &str = "https://api.binance.com";
const DEMO_BASE_URL: &str = "https://testnet.binance.vision";
const FILTER_CACHE_TTL: Duration = Duration::from_secs(300);

#[derive(Debug)]
pub struct BinanceSpotClient {
    transport: RestTransport,
    api_key: String,
    secret_key: String,
    filter_cache: TtlCache<String, Value>,
}

impl BinanceSpotClient {
    pub fn new(
        api_key: &str,
        secret_key: &str,
        base_url: Option<&str>,
        enable_demo_trading: bool,
    ) -> Result<Self> {
        let api_key = api_key.trim().to_string();
        let secret_key = secret_key.trim().to_string();
        if api_key.is_empty() || secret_key.is_empty() {
            return Err(QuantdeskError::MissingCredential(
                "Binance api_key/secret_key".to_string(),
            ));
        }
        let base = base_url.unwrap_or(if enable_demo_trading {
            DEMO_BASE_URL
        } else {
            DEFAULT_BASE_URL
        });
        Ok(Self {
            transport: RestTransport::new(VENUE, base, Duration::from_secs(15))?,
            api_key,
            secret_key,
            filter_cache: TtlCache::new(FILTER_CACHE_TTL),
        })
    }

    fn sign(&self, payload: &str) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(self.secret_key.as_bytes())
            .map_err(|e| QuantdeskError::Signature(format!("HMAC init failed: {}", e)))?;
        mac.update(payload.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn key_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(v) = HeaderValue::from_str(&self.api_key) {
            headers.insert("X-MBX-APIKEY", v);
        }
        headers
    }

    async fn signed_request(
        &self,
        method: Method,
        path: &str,
        mut params: Vec<(String, String)>,
    ) -> Result<Value> {
        params.push((
            "timestamp".to_string(),
            chrono::Utc::now().timestamp_millis().to_string(),
        ));
        let qs = query_string(&params);
        let signature = self.sign(&qs)?;
        params.push(("signature".to_string(), signature));

        let data = self
            .transport
            .send(method, path, Some(&params), None, self.key_headers())
            .await?;
        check_business_error(&data)?;
        Ok(data)
    }

    async fn public_request(&self, path: &str, params: &[(String, String)]) -> Result<Value> {
        let data = self
            .transport
            .send(Method::GET, path, Some(params), None, HeaderMap::new())
            .await?;
        check_business_error(&data)?;
        Ok(data)
    }

    /// Spot symbol filters from exchangeInfo, cached 300 s per wire symbol.
    pub async fn get_symbol_filters(&self, symbol: &str) -> Result<Value> {
        let wire = to_binance_symbol(symbol);
        if wire.is_empty() {
            return Err(QuantdeskError::SymbolNotFound(symbol.to_string()));
        }
        if let Some(cached) = self.filter_cache.get(&wire) {
            return Ok(cached);
        }

        let raw = self
            .public_request(
                "/api/v3/exchangeInfo",
                &[("symbol".to_string(), wire.clone())],
            )
            .await?;
        // Some gateways strip the query and return the full listing
        let entry = raw["symbols"]
            .as_array()
            .and_then(|symbols| {
                symbols
                    .iter()
                    .find(|s| s["symbol"].as_str() == Some(wire.as_str()))
                    .or_else(|| symbols.first())
            })
            .cloned()
            .unwrap_or(Value::Null);

        let mut filters = serde_json::Map::new();
        if let Some(list) = entry["filters"].as_array() {
            for f in list {
                if let Some(kind) = f["filterType"].as_str() {
                    filters.insert(kind.to_string(), f.clone());
                }
            }
        }
        let value = Value::Object(filters);
        if !value.as_object().map(|o| o.is_empty()).unwrap_or(true) {
            self.filter_cache.insert(wire, value.clone());
        }
        Ok(value)
    }

    /// Floor quantity to the LOT_SIZE step; returns the serialized string.
    async fn normalize_quantity(
        &self,
        symbol: &str,
        quantity: f64,
        for_market: bool,
    ) -> Result<String> {
        let q = to_dec(quantity);
        if q <= Decimal::ZERO {
            return Err(QuantdeskError::InvalidQuantity(format!(
                "requested={}",
                quantity
            )));
        }
        let filters = self.get_symbol_filters(symbol).await.unwrap_or(Value::Null);
        let key = if for_market { "MARKET_LOT_SIZE" } else { "LOT_SIZE" };
        let filter = if filters[key].is_object() {
            &filters[key]
        } else {
            &filters["LOT_SIZE"]
        };
        let step = dec_field(filter, "stepSize");
        let min_qty = dec_field(filter, "minQty");

        let floored = floor_to_step(q, step);
        if floored <= Decimal::ZERO || (min_qty > Decimal::ZERO && floored < min_qty) {
            return Err(QuantdeskError::InvalidQuantity(format!(
                "below step/minQty: requested={} step={} minQty={}",
                quantity, step, min_qty
            )));
        }
        Ok(format_amount(floored, scale_of_step(step)))
    }

    /// Floor price to the PRICE_FILTER tick; returns the serialized string.
    async fn normalize_price(&self, symbol: &str, price: f64) -> Result<String> {
        let px = to_dec(price);
        if px <= Decimal::ZERO {
            return Err(QuantdeskError::InvalidPrice(format!("requested={}", price)));
        }
        let filters = self.get_symbol_filters(symbol).await.unwrap_or(Value::Null);
        let filter = &filters["PRICE_FILTER"];
        let tick = dec_field(filter, "tickSize");
        let min_price = dec_field(filter, "minPrice");

        let floored = floor_to_step(px, tick);
        if floored <= Decimal::ZERO || (min_price > Decimal::ZERO && floored < min_price) {
            return Err(QuantdeskError::InvalidPrice(format!(
                "bad tick/minPrice: requested={} tick={} minPrice={}",
                price, tick, min_price
            )));
        }
        Ok(format_amount(floored, scale_of_step(tick)))
    }

    fn order_result(raw: Value) -> LiveOrderResult {
        let executed = field_f64(&raw, "executedQty");
        let quote = field_f64(&raw, "cummulativeQuoteQty");
        LiveOrderResult {
            exchange_id: VENUE.to_string(),
            exchange_order_id: raw["orderId"]
                .as_i64()
                .map(|v| v.to_string())
                .or_else(|| raw["clientOrderId"].as_str().map(str::to_string))
                .unwrap_or_default(),
            filled: executed,
            avg_price: if executed > 0.0 { quote / executed } else { 0.0 },
            status: raw["status"].as_str().unwrap_or("submitted").to_string(),
            raw,
        }
    }
}

#[async_trait]
impl LiveExchangeClient for BinanceSpotClient {
    fn exchange_id(&self) -> &'static str {
        VENUE
    }

    async fn ping(&self) -> bool {
        self.public_request("/api/v3/time", &[]).await.is_ok()
    }

    async fn place_limit_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
        price: f64,
        client_order_id: Option<&str>,
    ) -> Result<LiveOrderResult> {
        let wire = to_binance_symbol(symbol);
        let qty = self.normalize_quantity(symbol, quantity, false).await?;
        let px = self.normalize_price(symbol, price).await?;

        let mut params = vec![
            ("symbol".to_string(), wire.clone()),
            ("side".to_string(), side.as_str().to_uppercase()),
            ("type".to_string(), "LIMIT".to_string()),
            ("timeInForce".to_string(), "GTC".to_string()),
            ("quantity".to_string(), qty.clone()),
            ("price".to_string(), px.clone()),
        ];
        if let Some(id) = client_order_id {
            params.push(("newClientOrderId".to_string(), id.to_string()));
        }
        let raw = self
            .signed_request(Method::POST, "/api/v3/order", params)
            .await
            .map_err(|e| with_debug_context(e, &wire, side, quantity, &qty, Some((price, &px))))?;
        Ok(Self::order_result(raw))
    }

    async fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
        _reduce_only: bool,
        client_order_id: Option<&str>,
    ) -> Result<LiveOrderResult> {
        let wire = to_binance_symbol(symbol);
        let qty = self.normalize_quantity(symbol, quantity, true).await?;

        let mut params = vec![
            ("symbol".to_string(), wire.clone()),
            ("side".to_string(), side.as_str().to_uppercase()),
            ("type".to_string(), "MARKET".to_string()),
            ("quantity".to_string(), qty.clone()),
        ];
        if let Some(id) = client_order_id {
            params.push(("newClientOrderId".to_string(), id.to_string()));
        }
        let raw = self
            .signed_request(Method::POST, "/api/v3/order", params)
            .await
            .map_err(|e| with_debug_context(e, &wire, side, quantity, &qty, None))?;
        Ok(Self::order_result(raw))
    }

    async fn cancel_order(
        &self,
        symbol: &str,
        order_id: &str,
        client_order_id: &str,
    ) -> Result<Value> {
        let mut params = vec![("symbol".to_string(), to_binance_symbol(symbol))];
        if !order_id.is_empty() {
            params.push(("orderId".to_string(), order_id.to_string()));
        } else if !client_order_id.is_empty() {
            params.push(("origClientOrderId".to_string(), client_order_id.to_string()));
        } else {
            return Err(QuantdeskError::Validation(
                "cancel_order requires order_id or client_order_id".to_string(),
            ));
        }
        self.signed_request(Method::DELETE, "/api/v3/order", params)
            .await
    }

    async fn get_order(
        &self,
        symbol: &str,
        order_id: &str,
        client_order_id: &str,
    ) -> Result<Value> {
        let mut params = vec![("symbol".to_string(), to_binance_symbol(symbol))];
        if !order_id.is_empty() {
            params.push(("orderId".to_string(), order_id.to_string()));
        } else if !client_order_id.is_empty() {
            params.push(("origClientOrderId".to_string(), client_order_id.to_string()));
        } else {
            return Err(QuantdeskError::OrderNotFound(
                "get_order requires order_id or client_order_id".to_string(),
            ));
        }
        self.signed_request(Method::GET, "/api/v3/order", params)
            .await
    }

    async fn wait_for_fill(
        &self,
        symbol: &str,
        order_id: &str,
        client_order_id: &str,
        max_wait: Duration,
        poll_interval: Duration,
    ) -> Result<FillReport> {
        let deadline = tokio::time::Instant::now() + max_wait;
        let mut last = Value::Null;
        loop {
            if let Ok(order) = self.get_order(symbol, order_id, client_order_id).await {
                last = order;
            }
            let status = last["status"].as_str().unwrap_or("").to_string();
            let filled = field_f64(&last, "executedQty");
            let quote = field_f64(&last, "cummulativeQuoteQty");
            let avg_price = if filled > 0.0 && quote > 0.0 {
                quote / filled
            } else {
                0.0
            };

            let terminal = matches!(status.as_str(), "FILLED" | "CANCELED" | "EXPIRED" | "REJECTED");
            if (filled > 0.0 && avg_price > 0.0)
                || terminal
                || tokio::time::Instant::now() >= deadline
            {
                let (fee, fee_ccy) = if filled > 0.0 {
                    let oid = last["orderId"]
                        .as_i64()
                        .map(|v| v.to_string())
                        .unwrap_or_else(|| order_id.to_string());
                    self.get_order_fee(symbol, &oid).await
                } else {
                    (0.0, String::new())
                };
                return Ok(FillReport {
                    filled,
                    avg_price,
                    fee,
                    fee_ccy,
                    status,
                    raw: last,
                });
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    async fn get_ticker_price(&self, symbol: &str) -> Result<f64> {
        let raw = self
            .public_request(
                "/api/v3/ticker/price",
                &[("symbol".to_string(), to_binance_symbol(symbol))],
            )
            .await?;
        let price = field_f64(&raw, "price");
        if price > 0.0 {
            Ok(price)
        } else {
            Err(QuantdeskError::PriceUnavailable(symbol.to_string()))
        }
    }

    async fn get_balance(&self) -> Result<Value> {
        self.signed_request(Method::GET, "/api/v3/account", Vec::new())
            .await
    }

    /// Sum commissions from the per-order fills.
    async fn get_order_fee(&self, symbol: &str, order_id: &str) -> (f64, String) {
        let params = vec![
            ("symbol".to_string(), to_binance_symbol(symbol)),
            ("orderId".to_string(), order_id.to_string()),
            ("limit".to_string(), "200".to_string()),
        ];
        let trades = match self.signed_request(Method::GET, "/api/v3/myTrades", params).await {
            Ok(v) => v,
            Err(_) => return (0.0, String::new()),
        };
        sum_commissions(&trades)
    }
}

fn check_business_error(data: &Value) -> Result<()> {
    if let Some(code) = data["code"].as_i64() {
        if code < 0 {
            return Err(QuantdeskError::venue_business(VENUE, &data.to_string()));
        }
    }
    Ok(())
}

pub(crate) fn sum_commissions(trades: &Value) -> (f64, String) {
    let Some(list) = trades.as_array() else {
        return (0.0, String::new());
    };
    let mut total = 0.0;
    let mut ccy = String::new();
    for t in list {
        let fee = field_f64(t, "commission");
        if fee != 0.0 {
            total += fee.abs();
            if ccy.is_empty() {
                if let Some(asset) = t["commissionAsset"].as_str() {
                    ccy = asset.to_string();
                }
            }
        }
    }
    (total, ccy)
}

pub(crate) fn field_f64(v: &Value, key: &str) -> f64 {
    v[key]
        .as_f64()
        .or_else(|| v[key].as_str().and_then(|s| s.parse().ok()))
        .unwrap_or(0.0)
}

fn dec_field(v: &Value, key: &str) -> Decimal {
    v[key]
        .as_str()
        .and_then(|s| s.parse().ok())
        .or_else(|| v[key].as_f64().map(to_dec))
        .unwrap_or(Decimal::ZERO)
}

fn with_debug_context(
    err: QuantdeskError,
    wire: &str,
    side: OrderSide,
    qty_req: f64,
    qty_norm: &str,
    price: Option<(f64, &str)>,
) -> QuantdeskError {
    let price_part = price
        .map(|(req, norm)| format!(" price_req={} price_norm={}", req, norm))
        .unwrap_or_default();
    QuantdeskError::Internal(format!(
        "{} | debug: symbol={} side={} qty_req={} qty_norm={}{}",
        err,
        wire,
        side.as_str(),
        qty_req,
        qty_norm,
        price_part
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn commissions_are_summed_with_first_asset() {
        let trades = json!([
            {"commission": "0.001", "commissionAsset": "BNB"},
            {"commission": "0.002", "commissionAsset": "BNB"},
            {"commission": "0", "commissionAsset": ""}
        ]);
        let (fee, ccy) = sum_commissions(&trades);
        assert!((fee - 0.003).abs() < 1e-12);
        assert_eq!(ccy, "BNB");
    }

    #[test]
    fn missing_fees_are_zero_not_error() {
        assert_eq!(sum_commissions(&Value::Null), (0.0, String::new()));
    }

    #[test]
    fn field_f64_reads_strings_and_numbers() {
        let v = json!({"a": "1.5", "b": 2.5});
        assert_eq!(field_f64(&v, "a"), 1.5);
        assert_eq!(field_f64(&v, "b"), 2.5);
        assert_eq!(field_f64(&v, "missing"), 0.0);
    }

    #[test]
    fn new_rejects_empty_credentials() {
        assert!(BinanceSpotClient::new("", "s", None, false).is_err());
        assert!(BinanceSpotClient::new("k", "", None, false).is_err());
    }

    #[test]
    fn order_result_extracts_avg_price() {
        let raw = json!({
            "orderId": 12345,
            "status": "FILLED",
            "executedQty": "2",
            "cummulativeQuoteQty": "200"
        });
        let r = BinanceSpotClient::order_result(raw);
        assert_eq!(r.exchange_order_id, "12345");
        assert_eq!(r.filled, 2.0);
        assert_eq!(r.avg_price, 100.0);
    }
}
