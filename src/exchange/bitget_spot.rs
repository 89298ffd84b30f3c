//! Bitget Spot REST client (v2).
//!
//! Signing: `ACCESS-SIGN = base64(hmac_sha256(secret, timestamp + METHOD +
//! signed_path + body))` where signed_path includes the sorted query string
//! and the body is the exact wire string.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::Method;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use sha2::Sha256;
use std::time::Duration;

use super::binance_spot::field_f64;
use super::precision::{floor_to_step, format_amount, scale_of_step, to_dec};
use super::symbols::to_bitget_v2_symbol;
use super::traits::{FillReport, LiveExchangeClient, LiveOrderResult, OrderSide};
use super::transport::{sorted_query_string, RestTransport};
use crate::cache::TtlCache;
use crate::error::{QuantdeskError, Result};

type HmacSha256 = Hmac<Sha256>;

const VENUE: &str = "bitget";
const DEFAULT_BASE_URL: &str = "https://api.bitget.com";
const META_CACHE_TTL: Duration = Duration::from_secs(300);

#[derive(Debug)]
pub struct BitgetSpotClient {
    transport: RestTransport,
    api_key: String,
    secret_key: String,
    passphrase: String,
    meta_cache: TtlCache<String, Value>,
}

impl BitgetSpotClient {
    pub fn new(
        api_key: &str,
        secret_key: &str,
        passphrase: &str,
        base_url: Option<&str>,
    ) -> Result<Self> {
        let api_key = api_key.trim().to_string();
        let secret_key = secret_key.trim().to_string();
        let passphrase = passphrase.trim().to_string();
        if api_key.is_empty() || secret_key.is_empty() || passphrase.is_empty() {
            return Err(QuantdeskError::MissingCredential(
                "Bitget api_key/secret_key/passphrase".to_string(),
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
            passphrase,
            meta_cache: TtlCache::new(META_CACHE_TTL),
        })
    }

    pub(crate) fn sign_prehash(
        secret: &str,
        ts_ms: &str,
        method: &str,
        signed_path: &str,
        body: &str,
    ) -> Result<String> {
        let prehash = format!("{}{}{}{}", ts_ms, method.to_uppercase(), signed_path, body);
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| QuantdeskError::Signature(format!("HMAC init failed: {}", e)))?;
        mac.update(prehash.as_bytes());
        Ok(BASE64.encode(mac.finalize().into_bytes()))
    }

    fn headers(&self, ts_ms: &str, sign: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let mut put = |name: &'static str, value: &str| {
            if let Ok(v) = HeaderValue::from_str(value) {
                headers.insert(name, v);
            }
        };
        put("ACCESS-KEY", &self.api_key);
        put("ACCESS-SIGN", sign);
        put("ACCESS-TIMESTAMP", ts_ms);
        put("ACCESS-PASSPHRASE", &self.passphrase);
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
        let body_str = json_body.as_ref().map(|b| b.to_string()).unwrap_or_default();
        let qs = params
            .as_ref()
            .map(|p| sorted_query_string(p))
            .unwrap_or_default();
        let signed_path = if qs.is_empty() {
            path.to_string()
        } else {
            format!("{}?{}", path, qs)
        };
        let sign =
            Self::sign_prehash(&self.secret_key, &ts_ms, method.as_str(), &signed_path, &body_str)?;

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
        check_code(&data)?;
        Ok(data)
    }

    async fn public_request(&self, path: &str, params: &[(String, String)]) -> Result<Value> {
        let data = self
            .transport
            .send(Method::GET, path, Some(params), None, HeaderMap::new())
            .await?;
        check_code(&data)?;
        Ok(data)
    }

    /// Spot symbol metadata from the public listing, cached per symbol.
    pub async fn get_symbol_meta(&self, symbol: &str) -> Result<Value> {
        let wire = to_bitget_v2_symbol(symbol);
        if wire.is_empty() {
            return Err(QuantdeskError::SymbolNotFound(symbol.to_string()));
        }
        if let Some(cached) = self.meta_cache.get(&wire) {
            return Ok(cached);
        }
        let raw = self
            .public_request("/api/v2/spot/public/symbols", &[])
            .await?;
        let found = raw["data"]
            .as_array()
            .and_then(|items| {
                items.iter().find(|it| {
                    it["symbol"]
                        .as_str()
                        .map(|s| s.eq_ignore_ascii_case(&wire))
                        .unwrap_or(false)
                })
            })
            .cloned()
            .unwrap_or(Value::Null);
        if !found.is_null() {
            self.meta_cache.insert(wire, found.clone());
        }
        Ok(found)
    }

    /// Floor base size using `quantityPrecision` (decimal places) or the
    /// step-shaped fields, whichever the listing exposes.
    async fn normalize_base_size(&self, symbol: &str, size: f64) -> Result<String> {
        let req = to_dec(size);
        if req <= Decimal::ZERO {
            return Err(QuantdeskError::InvalidQuantity(format!("requested={}", size)));
        }
        let meta = self.get_symbol_meta(symbol).await.unwrap_or(Value::Null);

        let mut step = dec_any(&meta, &["quantityStep", "sizeStep", "minTradeIncrement"]);
        if step <= Decimal::ZERO {
            // Listing may expose decimal places instead of a step
            let places = meta["quantityPrecision"]
                .as_str()
                .and_then(|s| s.parse::<u32>().ok())
                .or_else(|| meta["quantityPrecision"].as_u64().map(|v| v as u32))
                .unwrap_or(0)
                .min(18);
            step = Decimal::new(1, places);
        }

        let floored = floor_to_step(req, step);
        let min_qty = dec_any(&meta, &["minTradeAmount", "minTradeNum", "minQty", "minSize"]);
        if floored <= Decimal::ZERO || (min_qty > Decimal::ZERO && floored < min_qty) {
            return Err(QuantdeskError::InvalidQuantity(format!(
                "below step/min: requested={} step={} min={}",
                size, step, min_qty
            )));
        }
        Ok(format_amount(floored, scale_of_step(step)))
    }
}

#[async_trait]
impl LiveExchangeClient for BitgetSpotClient {
    fn exchange_id(&self) -> &'static str {
        VENUE
    }

    async fn ping(&self) -> bool {
        self.public_request("/api/v2/public/time", &[]).await.is_ok()
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
        let size = self.normalize_base_size(symbol, quantity).await?;
        let mut body = json!({
            "symbol": to_bitget_v2_symbol(symbol),
            "side": side.as_str(),
            "orderType": "limit",
            "force": "gtc",
            "price": price.to_string(),
            "size": size,
        });
        if let Some(id) = client_order_id {
            body["clientOid"] = json!(id);
        }
        let raw = self
            .signed_request(Method::POST, "/api/v2/spot/trade/place-order", None, Some(body))
            .await?;
        let order_id = raw["data"]["orderId"].as_str().unwrap_or_default().to_string();
        Ok(LiveOrderResult::submitted(VENUE, order_id, raw))
    }

    async fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
        _reduce_only: bool,
        client_order_id: Option<&str>,
    ) -> Result<LiveOrderResult> {
        let size = self.normalize_base_size(symbol, quantity).await?;
        let mut body = json!({
            "symbol": to_bitget_v2_symbol(symbol),
            "side": side.as_str(),
            "orderType": "market",
            "force": "gtc",
            "size": size,
        });
        if let Some(id) = client_order_id {
            body["clientOid"] = json!(id);
        }
        let raw = self
            .signed_request(Method::POST, "/api/v2/spot/trade/place-order", None, Some(body))
            .await?;
        let order_id = raw["data"]["orderId"].as_str().unwrap_or_default().to_string();
        Ok(LiveOrderResult::submitted(VENUE, order_id, raw))
    }

    async fn cancel_order(
        &self,
        symbol: &str,
        order_id: &str,
        client_order_id: &str,
    ) -> Result<Value> {
        let mut body = json!({"symbol": to_bitget_v2_symbol(symbol)});
        if !order_id.is_empty() {
            body["orderId"] = json!(order_id);
        } else if !client_order_id.is_empty() {
            body["clientOid"] = json!(client_order_id);
        } else {
            return Err(QuantdeskError::Validation(
                "cancel_order requires order_id or client_order_id".to_string(),
            ));
        }
        self.signed_request(Method::POST, "/api/v2/spot/trade/cancel-order", None, Some(body))
            .await
    }

    async fn get_order(
        &self,
        _symbol: &str,
        order_id: &str,
        client_order_id: &str,
    ) -> Result<Value> {
        let mut params = Vec::new();
        if !order_id.is_empty() {
            params.push(("orderId".to_string(), order_id.to_string()));
        } else if !client_order_id.is_empty() {
            params.push(("clientOid".to_string(), client_order_id.to_string()));
        } else {
            return Err(QuantdeskError::OrderNotFound(
                "get_order requires order_id or client_order_id".to_string(),
            ));
        }
        let raw = self
            .signed_request(Method::GET, "/api/v2/spot/trade/orderInfo", Some(params), None)
            .await?;
        Ok(raw["data"]
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
            let status = last["status"].as_str().unwrap_or("").to_string();
            let filled = field_f64(&last, "baseVolume");
            let avg_price = field_f64(&last, "priceAvg");

            let terminal = matches!(status.as_str(), "filled" | "cancelled" | "canceled");
            if (filled > 0.0 && avg_price > 0.0)
                || terminal
                || tokio::time::Instant::now() >= deadline
            {
                let (fee, fee_ccy) = if filled > 0.0 {
                    let oid = last["orderId"]
                        .as_str()
                        .unwrap_or(order_id)
                        .to_string();
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
                "/api/v2/spot/market/tickers",
                &[("symbol".to_string(), to_bitget_v2_symbol(symbol))],
            )
            .await?;
        let price = raw["data"]
            .as_array()
            .and_then(|l| l.first())
            .map(|t| field_f64(t, "lastPr"))
            .unwrap_or(0.0);
        if price > 0.0 {
            Ok(price)
        } else {
            Err(QuantdeskError::PriceUnavailable(symbol.to_string()))
        }
    }

    async fn get_balance(&self) -> Result<Value> {
        self.signed_request(Method::GET, "/api/v2/spot/account/assets", None, None)
            .await
    }

    /// Sum fees from the per-order fills endpoint.
    async fn get_order_fee(&self, symbol: &str, order_id: &str) -> (f64, String) {
        let params = vec![
            ("symbol".to_string(), to_bitget_v2_symbol(symbol)),
            ("orderId".to_string(), order_id.to_string()),
        ];
        let raw = match self
            .signed_request(Method::GET, "/api/v2/spot/trade/fills", Some(params), None)
            .await
        {
            Ok(v) => v,
            Err(_) => return (0.0, String::new()),
        };
        let Some(fills) = raw["data"].as_array() else {
            return (0.0, String::new());
        };
        let mut total = 0.0;
        let mut ccy = String::new();
        for fill in fills {
            let detail = &fill["feeDetail"];
            let fee = field_f64(detail, "totalFee").abs();
            if fee > 0.0 {
                total += fee;
                if ccy.is_empty() {
                    if let Some(c) = detail["feeCoin"].as_str() {
                        ccy = c.to_string();
                    }
                }
            }
        }
        (total, ccy)
    }
}

pub(crate) fn check_code(data: &Value) -> Result<()> {
    if let Some(code) = data["code"].as_str() {
        if !code.is_empty() && code != "00000" && code != "0" {
            return Err(QuantdeskError::venue_business("bitget", &data.to_string()));
        }
    }
    Ok(())
}

pub(crate) fn dec_any(v: &Value, keys: &[&str]) -> Decimal {
    for key in keys {
        let d = v[*key]
            .as_str()
            .and_then(|s| s.parse().ok())
            .or_else(|| v[*key].as_f64().map(to_dec))
            .unwrap_or(Decimal::ZERO);
        if d > Decimal::ZERO {
            return d;
        }
    }
    Decimal::ZERO
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prehash_matches_contract() {
        // timestamp + METHOD + signed_path + body, HMAC-SHA256, base64
        let sign = BitgetSpotClient::sign_prehash(
            "secret",
            "1704067200000",
            "post",
            "/api/v2/spot/trade/place-order",
            r#"{"symbol":"BTCUSDT"}"#,
        )
        .unwrap();
        assert!(BASE64.decode(&sign).is_ok());
        // Deterministic for fixed inputs
        let again = BitgetSpotClient::sign_prehash(
            "secret",
            "1704067200000",
            "POST",
            "/api/v2/spot/trade/place-order",
            r#"{"symbol":"BTCUSDT"}"#,
        )
        .unwrap();
        assert_eq!(sign, again);
    }

    #[test]
    fn code_check_accepts_success_codes() {
        assert!(check_code(&json!({"code": "00000"})).is_ok());
        assert!(check_code(&json!({"code": ""})).is_ok());
        assert!(check_code(&json!({})).is_ok());
        assert!(check_code(&json!({"code": "40034", "msg": "not exist"})).is_err());
    }

    #[test]
    fn dec_any_walks_field_priority() {
        let v = json!({"quantityStep": "0", "sizeStep": "0.01"});
        assert_eq!(dec_any(&v, &["quantityStep", "sizeStep"]).to_string(), "0.01");
    }

    #[test]
    fn rejects_missing_passphrase() {
        assert!(BitgetSpotClient::new("k", "s", "", None).is_err());
    }
}
