//! Gate.io v4 USDT-futures REST client.
//!
//! Signing: HMAC-SHA512 over `METHOD\npath\nquery\nsha512_hex(body)\nts`,
//! hex-encoded. Futures size is in contracts; the base quantity is divided
//! by `quanto_multiplier` and the sign of `size` carries direction.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::Method;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use sha2::{Digest, Sha512};
use std::time::Duration;

use super::binance_spot::field_f64;
use super::precision::to_dec;
use super::symbols::to_gate_currency_pair;
use super::traits::{FillReport, LiveExchangeClient, LiveOrderResult, OrderSide};
use super::transport::{sorted_query_string, RestTransport};
use crate::cache::TtlCache;
use crate::error::{QuantdeskError, Result};

type HmacSha512 = Hmac<Sha512>;

const VENUE: &str = "gate";
const DEFAULT_BASE_URL: &str = "https://api.gateio.ws";
const API_PREFIX: &str = "/api/v4";
const CONTRACT_CACHE_TTL: Duration = Duration::from_secs(300);

#[derive(Debug)]
pub struct GateFuturesClient {
    transport: RestTransport,
    api_key: String,
    secret_key: String,
    contract_cache: TtlCache<String, Value>,
}

impl GateFuturesClient {
    pub fn new(api_key: &str, secret_key: &str, base_url: Option<&str>) -> Result<Self> {
        let api_key = api_key.trim().to_string();
        let secret_key = secret_key.trim().to_string();
        if api_key.is_empty() || secret_key.is_empty() {
            return Err(QuantdeskError::MissingCredential(
                "Gate api_key/secret_key".to_string(),
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
            contract_cache: TtlCache::new(CONTRACT_CACHE_TTL),
        })
    }

    fn sign(&self, method: &str, path: &str, query: &str, body: &str, ts: &str) -> Result<String> {
        let body_hash = hex::encode(Sha512::digest(body.as_bytes()));
        let payload = format!(
            "{}\n{}\n{}\n{}\n{}",
            method.to_uppercase(),
            path,
            query,
            body_hash,
            ts
        );
        let mut mac = HmacSha512::new_from_slice(self.secret_key.as_bytes())
            .map_err(|e| QuantdeskError::Signature(format!("HMAC init failed: {}", e)))?;
        mac.update(payload.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    async fn signed_request(
        &self,
        method: Method,
        path: &str,
        params: Option<Vec<(String, String)>>,
        json_body: Option<Value>,
    ) -> Result<Value> {
        let ts = chrono::Utc::now().timestamp().to_string();
        let body_str = json_body.as_ref().map(|b| b.to_string()).unwrap_or_default();
        let qs = params
            .as_ref()
            .map(|p| sorted_query_string(p))
            .unwrap_or_default();
        let full_path = format!("{}{}", API_PREFIX, path);
        let sign = self.sign(method.as_str(), &full_path, &qs, &body_str, &ts)?;

        let mut headers = HeaderMap::new();
        let mut put = |name: &'static str, value: &str| {
            if let Ok(v) = HeaderValue::from_str(value) {
                headers.insert(name, v);
            }
        };
        put("KEY", &self.api_key);
        put("Timestamp", &ts);
        put("SIGN", &sign);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        self.transport
            .send(
                method,
                &full_path,
                params.as_deref(),
                (!body_str.is_empty()).then_some(body_str),
                headers,
            )
            .await
    }

    async fn public_request(&self, path: &str, params: &[(String, String)]) -> Result<Value> {
        self.transport
            .send(
                Method::GET,
                &format!("{}{}", API_PREFIX, path),
                Some(params),
                None,
                HeaderMap::new(),
            )
            .await
    }

    /// Contract metadata (quanto_multiplier, order_size_min), cached.
    pub async fn get_contract(&self, symbol: &str) -> Result<Value> {
        let contract = to_gate_currency_pair(symbol);
        if contract.is_empty() {
            return Err(QuantdeskError::SymbolNotFound(symbol.to_string()));
        }
        if let Some(cached) = self.contract_cache.get(&contract) {
            return Ok(cached);
        }
        let raw = self
            .public_request(&format!("/futures/usdt/contracts/{}", contract), &[])
            .await?;
        if !raw.is_null() {
            self.contract_cache.insert(contract, raw.clone());
        }
        Ok(raw)
    }

    /// Convert a base-asset quantity to a signed contract count. Floors the
    /// count; below one contract is an invalid quantity.
    async fn to_contract_size(&self, symbol: &str, quantity: f64, side: OrderSide) -> Result<i64> {
        if quantity <= 0.0 {
            return Err(QuantdeskError::InvalidQuantity(format!(
                "requested={}",
                quantity
            )));
        }
        let contract = self.get_contract(symbol).await.unwrap_or(Value::Null);
        let multiplier = contract["quanto_multiplier"]
            .as_str()
            .and_then(|s| s.parse::<Decimal>().ok())
            .filter(|m| *m > Decimal::ZERO)
            .unwrap_or(Decimal::ONE);
        let min_size = contract["order_size_min"].as_i64().unwrap_or(1).max(1);

        let count = (to_dec(quantity) / multiplier)
            .trunc()
            .to_i64()
            .unwrap_or(0);
        if count < min_size {
            return Err(QuantdeskError::InvalidQuantity(format!(
                "below contract min: requested={} multiplier={} min_contracts={}",
                quantity, multiplier, min_size
            )));
        }
        Ok(match side {
            OrderSide::Buy => count,
            OrderSide::Sell => -count,
        })
    }

    fn order_result(raw: Value) -> LiveOrderResult {
        let size = field_f64(&raw, "size").abs();
        let left = field_f64(&raw, "left").abs();
        LiveOrderResult {
            exchange_id: VENUE.to_string(),
            exchange_order_id: raw["id"]
                .as_i64()
                .map(|v| v.to_string())
                .or_else(|| raw["id"].as_str().map(str::to_string))
                .unwrap_or_default(),
            filled: (size - left).max(0.0),
            avg_price: field_f64(&raw, "fill_price"),
            status: raw["status"].as_str().unwrap_or("submitted").to_string(),
            raw,
        }
    }
}

#[async_trait]
impl LiveExchangeClient for GateFuturesClient {
    fn exchange_id(&self) -> &'static str {
        VENUE
    }

    async fn ping(&self) -> bool {
        self.public_request("/futures/usdt/contracts/BTC_USDT", &[])
            .await
            .is_ok()
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
        let size = self.to_contract_size(symbol, quantity, side).await?;
        let mut body = json!({
            "contract": to_gate_currency_pair(symbol),
            "size": size,
            "price": price.to_string(),
            "tif": "gtc",
        });
        if let Some(id) = client_order_id {
            // Gate text labels must be prefixed with t-
            body["text"] = json!(format!("t-{}", id));
        }
        let raw = self
            .signed_request(Method::POST, "/futures/usdt/orders", None, Some(body))
            .await?;
        Ok(Self::order_result(raw))
    }

    async fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
        reduce_only: bool,
        client_order_id: Option<&str>,
    ) -> Result<LiveOrderResult> {
        let size = self.to_contract_size(symbol, quantity, side).await?;
        let mut body = json!({
            "contract": to_gate_currency_pair(symbol),
            "size": size,
            "price": "0",
            "tif": "ioc",
        });
        if reduce_only {
            body["reduce_only"] = json!(true);
        }
        if let Some(id) = client_order_id {
            body["text"] = json!(format!("t-{}", id));
        }
        let raw = self
            .signed_request(Method::POST, "/futures/usdt/orders", None, Some(body))
            .await?;
        Ok(Self::order_result(raw))
    }

    async fn cancel_order(
        &self,
        _symbol: &str,
        order_id: &str,
        _client_order_id: &str,
    ) -> Result<Value> {
        if order_id.is_empty() {
            return Err(QuantdeskError::Validation(
                "cancel_order requires order_id".to_string(),
            ));
        }
        self.signed_request(
            Method::DELETE,
            &format!("/futures/usdt/orders/{}", order_id),
            None,
            None,
        )
        .await
    }

    async fn get_order(
        &self,
        _symbol: &str,
        order_id: &str,
        _client_order_id: &str,
    ) -> Result<Value> {
        if order_id.is_empty() {
            return Err(QuantdeskError::OrderNotFound(
                "get_order requires order_id".to_string(),
            ));
        }
        self.signed_request(
            Method::GET,
            &format!("/futures/usdt/orders/{}", order_id),
            None,
            None,
        )
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
            let size = field_f64(&last, "size").abs();
            let left = field_f64(&last, "left").abs();
            let filled = (size - left).max(0.0);
            let avg_price = field_f64(&last, "fill_price");

            let terminal = status == "finished" || status == "cancelled";
            if (filled > 0.0 && avg_price > 0.0)
                || terminal
                || tokio::time::Instant::now() >= deadline
            {
                let (fee, fee_ccy) = if filled > 0.0 {
                    self.get_order_fee(symbol, order_id).await
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
                "/futures/usdt/tickers",
                &[("contract".to_string(), to_gate_currency_pair(symbol))],
            )
            .await?;
        let price = raw
            .as_array()
            .and_then(|l| l.first())
            .map(|t| field_f64(t, "last"))
            .unwrap_or(0.0);
        if price > 0.0 {
            Ok(price)
        } else {
            Err(QuantdeskError::PriceUnavailable(symbol.to_string()))
        }
    }

    async fn get_balance(&self) -> Result<Value> {
        self.signed_request(Method::GET, "/futures/usdt/accounts", None, None)
            .await
    }

    async fn get_positions(&self, symbol: Option<&str>) -> Result<Value> {
        match symbol {
            Some(s) => {
                self.signed_request(
                    Method::GET,
                    &format!("/futures/usdt/positions/{}", to_gate_currency_pair(s)),
                    None,
                    None,
                )
                .await
            }
            None => {
                self.signed_request(Method::GET, "/futures/usdt/positions", None, None)
                    .await
            }
        }
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<bool> {
        let contract = to_gate_currency_pair(symbol);
        let params = vec![("leverage".to_string(), leverage.max(1).to_string())];
        match self
            .signed_request(
                Method::POST,
                &format!("/futures/usdt/positions/{}/leverage", contract),
                Some(params),
                None,
            )
            .await
        {
            Ok(_) => Ok(true),
            Err(_) => Ok(false),
        }
    }

    async fn get_order_fee(&self, symbol: &str, order_id: &str) -> (f64, String) {
        let params = vec![
            ("contract".to_string(), to_gate_currency_pair(symbol)),
            ("order".to_string(), order_id.to_string()),
        ];
        let raw = match self
            .signed_request(Method::GET, "/futures/usdt/my_trades", Some(params), None)
            .await
        {
            Ok(v) => v,
            Err(_) => return (0.0, String::new()),
        };
        let Some(trades) = raw.as_array() else {
            return (0.0, String::new());
        };
        let total: f64 = trades.iter().map(|t| field_f64(t, "fee").abs()).sum();
        if total > 0.0 {
            (total, "USDT".to_string())
        } else {
            (0.0, String::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_hex_sha512_sized() {
        let client = GateFuturesClient::new("k", "s", None).unwrap();
        let sig = client
            .sign("POST", "/api/v4/futures/usdt/orders", "", "{}", "1700000000")
            .unwrap();
        assert_eq!(sig.len(), 128);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn order_result_derives_filled_from_size_minus_left() {
        let raw = json!({
            "id": 42,
            "status": "finished",
            "size": -10,
            "left": -4,
            "fill_price": "2500.5"
        });
        let r = GateFuturesClient::order_result(raw);
        assert_eq!(r.exchange_order_id, "42");
        assert_eq!(r.filled, 6.0);
        assert!((r.avg_price - 2500.5).abs() < 1e-9);
    }

    #[test]
    fn rejects_missing_credentials() {
        assert!(GateFuturesClient::new("", "s", None).is_err());
    }
}
