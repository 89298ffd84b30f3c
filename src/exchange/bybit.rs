//! Bybit v5 REST client for spot and USDT-linear perpetuals.
//!
//! Signing: `X-BAPI-SIGN = hex(hmac_sha256(secret, timestamp + api_key +
//! recv_window + payload))`, where payload is the sorted query string for
//! GET and the raw body string for POST.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::Method;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use sha2::Sha256;
use std::time::Duration;

use super::binance_spot::field_f64;
use super::precision::{floor_to_step, format_amount, scale_of_step, to_dec};
use super::symbols::to_bybit_symbol;
use super::traits::{FillReport, LiveExchangeClient, LiveOrderResult, OrderSide};
use super::transport::{sorted_query_string, RestTransport};
use crate::cache::TtlCache;
use crate::error::{QuantdeskError, Result};

type HmacSha256 = Hmac<Sha256>;

const VENUE: &str = "bybit";
const DEFAULT_BASE_URL: &str = "https://api.bybit.com";
const INSTRUMENT_CACHE_TTL: Duration = Duration::from_secs(300);
const DEFAULT_RECV_WINDOW_MS: u32 = 5000;

/// Bybit product category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BybitCategory {
    Spot,
    Linear,
}

impl BybitCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Spot => "spot",
            Self::Linear => "linear",
        }
    }
}

#[derive(Debug)]
pub struct BybitClient {
    transport: RestTransport,
    api_key: String,
    secret_key: String,
    category: BybitCategory,
    recv_window_ms: u32,
    instrument_cache: TtlCache<String, Value>,
}

impl BybitClient {
    pub fn new(
        api_key: &str,
        secret_key: &str,
        base_url: Option<&str>,
        category: BybitCategory,
    ) -> Result<Self> {
        let api_key = api_key.trim().to_string();
        let secret_key = secret_key.trim().to_string();
        if api_key.is_empty() || secret_key.is_empty() {
            return Err(QuantdeskError::MissingCredential(
                "Bybit api_key/secret_key".to_string(),
            ));
        }
        Ok(Self {
            transport: RestTransport::new(
                VENUE,
                base_url.unwrap_or(DEFAULT_BASE_URL),
                Duration::from_secs(15),
            )?,
            api_key,
            secret_key,
            category,
            recv_window_ms: DEFAULT_RECV_WINDOW_MS,
            instrument_cache: TtlCache::new(INSTRUMENT_CACHE_TTL),
        })
    }

    fn sign(&self, prehash: &str) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(self.secret_key.as_bytes())
            .map_err(|e| QuantdeskError::Signature(format!("HMAC init failed: {}", e)))?;
        mac.update(prehash.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn headers(&self, ts_ms: &str, sign: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let mut put = |name: &'static str, value: &str| {
            if let Ok(v) = HeaderValue::from_str(value) {
                headers.insert(name, v);
            }
        };
        put("X-BAPI-API-KEY", &self.api_key);
        put("X-BAPI-SIGN", sign);
        put("X-BAPI-TIMESTAMP", ts_ms);
        put("X-BAPI-RECV-WINDOW", &self.recv_window_ms.to_string());
        put("X-BAPI-SIGN-TYPE", "2");
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers
    }

    async fn signed_request(
        &self,
        method: Method,
        path: &str,
        params: Option<Vec<(String, String)>>,
        json_body: Option<Value>,
    ) -> Result<Value> {
        let ts_ms = chrono::Utc::now().timestamp_millis().to_string();
        // The signed body must be byte-identical to the wire body
        let body_str = json_body.as_ref().map(|b| b.to_string()).unwrap_or_default();
        let qs = params
            .as_ref()
            .map(|p| sorted_query_string(p))
            .unwrap_or_default();

        let payload = if method == Method::GET { &qs } else { &body_str };
        let prehash = format!("{}{}{}{}", ts_ms, self.api_key, self.recv_window_ms, payload);
        let sign = self.sign(&prehash)?;

        let data = self
            .transport
            .send(
                method,
                path,
                params.as_deref(),
                (!body_str.is_empty()).then_some(body_str),
                self.headers(&ts_ms, &sign),
            )
            .await?;
        check_ret_code(&data)?;
        Ok(data)
    }

    async fn public_request(&self, path: &str, params: &[(String, String)]) -> Result<Value> {
        let data = self
            .transport
            .send(Method::GET, path, Some(params), None, HeaderMap::new())
            .await?;
        check_ret_code(&data)?;
        Ok(data)
    }

    /// Instrument metadata (lot filter etc.), cached per category:symbol.
    pub async fn get_instrument_info(&self, symbol: &str) -> Result<Value> {
        let wire = to_bybit_symbol(symbol);
        if wire.is_empty() {
            return Err(QuantdeskError::SymbolNotFound(symbol.to_string()));
        }
        let key = format!("{}:{}", self.category.as_str(), wire);
        if let Some(cached) = self.instrument_cache.get(&key) {
            return Ok(cached);
        }
        let raw = self
            .public_request(
                "/v5/market/instruments-info",
                &[
                    ("category".to_string(), self.category.as_str().to_string()),
                    ("symbol".to_string(), wire),
                ],
            )
            .await?;
        let first = raw["result"]["list"]
            .as_array()
            .and_then(|l| l.first())
            .cloned()
            .unwrap_or(Value::Null);
        if !first.is_null() {
            self.instrument_cache.insert(key, first.clone());
        }
        Ok(first)
    }

    /// Floor quantity to `lotSizeFilter.qtyStep`; serialized under the
    /// step's scale.
    async fn normalize_qty(&self, symbol: &str, qty: f64) -> Result<String> {
        let q = to_dec(qty);
        if q <= Decimal::ZERO {
            return Err(QuantdeskError::InvalidQuantity(format!("requested={}", qty)));
        }
        let info = self.get_instrument_info(symbol).await.unwrap_or(Value::Null);
        let lot = &info["lotSizeFilter"];
        let step = dec_field(lot, "qtyStep");
        let min_qty = dec_field(lot, "minOrderQty");

        let floored = floor_to_step(q, step);
        if floored <= Decimal::ZERO || (min_qty > Decimal::ZERO && floored < min_qty) {
            return Err(QuantdeskError::InvalidQuantity(format!(
                "below step/min: requested={} qtyStep={} minOrderQty={}",
                qty, step, min_qty
            )));
        }
        Ok(format_amount(floored, scale_of_step(step)))
    }

    fn side_str(side: OrderSide) -> &'static str {
        match side {
            OrderSide::Buy => "Buy",
            OrderSide::Sell => "Sell",
        }
    }

    #[cfg(test)]
    fn seed_instrument_cache(&self, symbol: &str, info: Value) {
        let key = format!("{}:{}", self.category.as_str(), to_bybit_symbol(symbol));
        self.instrument_cache.insert(key, info);
    }
}

#[async_trait]
impl LiveExchangeClient for BybitClient {
    fn exchange_id(&self) -> &'static str {
        VENUE
    }

    async fn ping(&self) -> bool {
        self.public_request("/v5/market/time", &[]).await.is_ok()
    }

    async fn place_limit_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
        price: f64,
        client_order_id: Option<&str>,
    ) -> Result<LiveOrderResult> {
        if price <= 0.0 {
            return Err(QuantdeskError::InvalidPrice(format!("requested={}", price)));
        }
        let wire = to_bybit_symbol(symbol);
        let qty = self.normalize_qty(symbol, quantity).await?;

        let mut body = json!({
            "category": self.category.as_str(),
            "symbol": wire,
            "side": Self::side_str(side),
            "orderType": "Limit",
            "qty": qty,
            "price": price.to_string(),
            "timeInForce": "GTC",
        });
        if let Some(id) = client_order_id {
            body["orderLinkId"] = json!(id);
        }
        let raw = self
            .signed_request(Method::POST, "/v5/order/create", None, Some(body))
            .await?;
        let order_id = raw["result"]["orderId"]
            .as_str()
            .or_else(|| raw["result"]["orderLinkId"].as_str())
            .unwrap_or_default()
            .to_string();
        Ok(LiveOrderResult::submitted(VENUE, order_id, raw))
    }

    async fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
        reduce_only: bool,
        client_order_id: Option<&str>,
    ) -> Result<LiveOrderResult> {
        let wire = to_bybit_symbol(symbol);
        let qty = self.normalize_qty(symbol, quantity).await?;

        let mut body = json!({
            "category": self.category.as_str(),
            "symbol": wire,
            "side": Self::side_str(side),
            "orderType": "Market",
            "qty": qty,
            "timeInForce": "GTC",
        });
        if reduce_only && self.category == BybitCategory::Linear {
            body["reduceOnly"] = json!(true);
        }
        if let Some(id) = client_order_id {
            body["orderLinkId"] = json!(id);
        }
        let raw = self
            .signed_request(Method::POST, "/v5/order/create", None, Some(body))
            .await?;
        let order_id = raw["result"]["orderId"]
            .as_str()
            .or_else(|| raw["result"]["orderLinkId"].as_str())
            .unwrap_or_default()
            .to_string();
        Ok(LiveOrderResult::submitted(VENUE, order_id, raw))
    }

    async fn cancel_order(
        &self,
        symbol: &str,
        order_id: &str,
        client_order_id: &str,
    ) -> Result<Value> {
        let mut body = json!({
            "category": self.category.as_str(),
            "symbol": to_bybit_symbol(symbol),
        });
        if !order_id.is_empty() {
            body["orderId"] = json!(order_id);
        } else if !client_order_id.is_empty() {
            body["orderLinkId"] = json!(client_order_id);
        } else {
            return Err(QuantdeskError::Validation(
                "cancel_order requires order_id or client_order_id".to_string(),
            ));
        }
        self.signed_request(Method::POST, "/v5/order/cancel", None, Some(body))
            .await
    }

    async fn get_order(
        &self,
        symbol: &str,
        order_id: &str,
        client_order_id: &str,
    ) -> Result<Value> {
        let mut params = vec![
            ("category".to_string(), self.category.as_str().to_string()),
            ("symbol".to_string(), to_bybit_symbol(symbol)),
        ];
        if !order_id.is_empty() {
            params.push(("orderId".to_string(), order_id.to_string()));
        } else if !client_order_id.is_empty() {
            params.push(("orderLinkId".to_string(), client_order_id.to_string()));
        } else {
            return Err(QuantdeskError::OrderNotFound(
                "get_order requires order_id or client_order_id".to_string(),
            ));
        }
        let raw = self
            .signed_request(Method::GET, "/v5/order/realtime", Some(params), None)
            .await?;
        Ok(raw["result"]["list"]
            .as_array()
            .and_then(|l| l.first())
            .cloned()
            .unwrap_or(Value::Null))
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
            let status = last["orderStatus"].as_str().unwrap_or("").to_string();
            let filled = field_f64(&last, "cumExecQty");
            let avg_price = field_f64(&last, "avgPrice");
            // Linear contracts settle fees in USDT; cumExecFee is cumulative
            let fee = field_f64(&last, "cumExecFee").abs();
            let fee_ccy = if fee > 0.0 { "USDT".to_string() } else { String::new() };

            let terminal = matches!(
                status.to_lowercase().as_str(),
                "filled" | "cancelled" | "canceled" | "rejected"
            );
            if (filled > 0.0 && avg_price > 0.0)
                || terminal
                || tokio::time::Instant::now() >= deadline
            {
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
                "/v5/market/tickers",
                &[
                    ("category".to_string(), self.category.as_str().to_string()),
                    ("symbol".to_string(), to_bybit_symbol(symbol)),
                ],
            )
            .await?;
        let price = raw["result"]["list"]
            .as_array()
            .and_then(|l| l.first())
            .map(|t| field_f64(t, "lastPrice"))
            .unwrap_or(0.0);
        if price > 0.0 {
            Ok(price)
        } else {
            Err(QuantdeskError::PriceUnavailable(symbol.to_string()))
        }
    }

    async fn get_balance(&self) -> Result<Value> {
        self.signed_request(
            Method::GET,
            "/v5/account/wallet-balance",
            Some(vec![("accountType".to_string(), "UNIFIED".to_string())]),
            None,
        )
        .await
    }

    async fn get_positions(&self, symbol: Option<&str>) -> Result<Value> {
        if self.category != BybitCategory::Linear {
            return Err(QuantdeskError::UnsupportedOperation(
                "Bybit positions are only available for the linear category".to_string(),
            ));
        }
        let mut params = vec![("category".to_string(), "linear".to_string())];
        match symbol {
            Some(s) => params.push(("symbol".to_string(), to_bybit_symbol(s))),
            None => params.push(("settleCoin".to_string(), "USDT".to_string())),
        }
        self.signed_request(Method::GET, "/v5/position/list", Some(params), None)
            .await
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<bool> {
        if self.category != BybitCategory::Linear {
            return Ok(false);
        }
        let lv = leverage.max(1).to_string();
        let body = json!({
            "category": "linear",
            "symbol": to_bybit_symbol(symbol),
            "buyLeverage": lv,
            "sellLeverage": lv,
        });
        match self
            .signed_request(Method::POST, "/v5/position/set-leverage", None, Some(body))
            .await
        {
            Ok(_) => Ok(true),
            Err(_) => Ok(false),
        }
    }
}

fn check_ret_code(data: &Value) -> Result<()> {
    match &data["retCode"] {
        Value::Null => Ok(()),
        code => {
            let ok = code.as_i64() == Some(0) || code.as_str() == Some("0");
            if ok {
                Ok(())
            } else {
                Err(QuantdeskError::venue_business(VENUE, &data.to_string()))
            }
        }
    }
}

fn dec_field(v: &Value, key: &str) -> Decimal {
    v[key]
        .as_str()
        .and_then(|s| s.parse().ok())
        .or_else(|| v[key].as_f64().map(to_dec))
        .unwrap_or(Decimal::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ret_code_zero_passes() {
        assert!(check_ret_code(&json!({"retCode": 0})).is_ok());
        assert!(check_ret_code(&json!({"retCode": "0"})).is_ok());
        assert!(check_ret_code(&json!({})).is_ok());
    }

    #[test]
    fn ret_code_nonzero_is_business_error() {
        let err = check_ret_code(&json!({"retCode": 10001, "retMsg": "params error"}))
            .unwrap_err();
        assert!(err.to_string().contains("params error"));
    }

    #[test]
    fn category_strings() {
        assert_eq!(BybitCategory::Spot.as_str(), "spot");
        assert_eq!(BybitCategory::Linear.as_str(), "linear");
    }

    #[test]
    fn rejects_missing_credentials() {
        assert!(BybitClient::new("", "s", None, BybitCategory::Linear).is_err());
    }

    #[tokio::test]
    async fn sub_step_quantity_fails_before_any_order_call() {
        let client = BybitClient::new("k", "s", None, BybitCategory::Linear).unwrap();
        client.seed_instrument_cache(
            "BTC/USDT",
            json!({
                "symbol": "BTCUSDT",
                "lotSizeFilter": {"qtyStep": "0.001", "minOrderQty": "0.001"}
            }),
        );
        // 0.0001 floors to zero against a 0.001 step: the client must fail
        // with invalid_quantity and never build an order request
        let err = client
            .place_market_order("BTC/USDT", OrderSide::Buy, 0.0001, false, None)
            .await
            .unwrap_err();
        match err {
            crate::error::QuantdeskError::InvalidQuantity(msg) => {
                assert!(msg.contains("qtyStep"), "message should cite the step: {msg}");
            }
            other => panic!("expected InvalidQuantity, got {other}"),
        }
    }

    #[tokio::test]
    async fn valid_quantity_is_floored_to_step() {
        let client = BybitClient::new("k", "s", None, BybitCategory::Linear).unwrap();
        client.seed_instrument_cache(
            "BTC/USDT",
            json!({
                "symbol": "BTCUSDT",
                "lotSizeFilter": {"qtyStep": "0.001", "minOrderQty": "0.001"}
            }),
        );
        let qty = client.normalize_qty("BTC/USDT", 1.23456).await.unwrap();
        assert_eq!(qty, "1.234");
    }
}
