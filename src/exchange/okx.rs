//! OKX v5 REST client for spot and perpetual swaps.
//!
//! Signing: `OK-ACCESS-SIGN = base64(hmac_sha256(secret, iso_timestamp +
//! METHOD + request_path_with_query + body))`, passphrase in its own header.
//! Swap orders need `posSide` when the account runs long/short mode; the
//! account config is fetched once and cached.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{SecondsFormat, Utc};
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::Method;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use sha2::Sha256;
use std::time::Duration;

use super::binance_spot::field_f64;
use super::precision::{floor_to_step, format_amount, scale_of_step, to_dec};
use super::symbols::{to_okx_spot_inst_id, to_okx_swap_inst_id};
use super::traits::{FillReport, LiveExchangeClient, LiveOrderResult, OrderSide};
use super::transport::{sorted_query_string, RestTransport};
use crate::cache::TtlCache;
use crate::domain::MarketType;
use crate::error::{QuantdeskError, Result};

type HmacSha256 = Hmac<Sha256>;

const VENUE: &str = "okx";
const DEFAULT_BASE_URL: &str = "https://www.okx.com";
const INSTRUMENT_CACHE_TTL: Duration = Duration::from_secs(300);

#[derive(Debug)]
pub struct OkxClient {
    transport: RestTransport,
    api_key: String,
    secret_key: String,
    passphrase: String,
    market_type: MarketType,
    instrument_cache: TtlCache<String, Value>,
    /// posMode from account config ("net_mode" | "long_short_mode")
    pos_mode_cache: TtlCache<String, String>,
}

impl OkxClient {
    pub fn new(
        api_key: &str,
        secret_key: &str,
        passphrase: &str,
        base_url: Option<&str>,
        market_type: MarketType,
    ) -> Result<Self> {
        let api_key = api_key.trim().to_string();
        let secret_key = secret_key.trim().to_string();
        let passphrase = passphrase.trim().to_string();
        if api_key.is_empty() || secret_key.is_empty() || passphrase.is_empty() {
            return Err(QuantdeskError::MissingCredential(
                "OKX api_key/secret_key/passphrase".to_string(),
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
            market_type,
            instrument_cache: TtlCache::new(INSTRUMENT_CACHE_TTL),
            pos_mode_cache: TtlCache::new(INSTRUMENT_CACHE_TTL),
        })
    }

    fn inst_id(&self, symbol: &str) -> String {
        match self.market_type {
            MarketType::Spot => to_okx_spot_inst_id(symbol),
            MarketType::Swap => to_okx_swap_inst_id(symbol),
        }
    }

    fn inst_type(&self) -> &'static str {
        match self.market_type {
            MarketType::Spot => "SPOT",
            MarketType::Swap => "SWAP",
        }
    }

    fn sign(&self, timestamp: &str, method: &str, request_path: &str, body: &str) -> Result<String> {
        let prehash = format!("{}{}{}{}", timestamp, method.to_uppercase(), request_path, body);
        let mut mac = HmacSha256::new_from_slice(self.secret_key.as_bytes())
            .map_err(|e| QuantdeskError::Signature(format!("HMAC init failed: {}", e)))?;
        mac.update(prehash.as_bytes());
        Ok(BASE64.encode(mac.finalize().into_bytes()))
    }

    fn headers(&self, timestamp: &str, sign: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let mut put = |name: &'static str, value: &str| {
            if let Ok(v) = HeaderValue::from_str(value) {
                headers.insert(name, v);
            }
        };
        put("OK-ACCESS-KEY", &self.api_key);
        put("OK-ACCESS-SIGN", sign);
        put("OK-ACCESS-TIMESTAMP", timestamp);
        put("OK-ACCESS-PASSPHRASE", &self.passphrase);
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
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let body_str = json_body.as_ref().map(|b| b.to_string()).unwrap_or_default();
        let qs = params
            .as_ref()
            .map(|p| sorted_query_string(p))
            .unwrap_or_default();
        let request_path = if qs.is_empty() {
            path.to_string()
        } else {
            format!("{}?{}", path, qs)
        };
        let sign = self.sign(&timestamp, method.as_str(), &request_path, &body_str)?;

        let data = self
            .transport
            .send(
                method,
                path,
                params.as_deref(),
                (!body_str.is_empty()).then_some(body_str),
                self.headers(&timestamp, &sign),
            )
            .await?;
        check_okx_code(&data)?;
        Ok(data)
    }

    async fn public_request(&self, path: &str, params: &[(String, String)]) -> Result<Value> {
        let data = self
            .transport
            .send(Method::GET, path, Some(params), None, HeaderMap::new())
            .await?;
        check_okx_code(&data)?;
        Ok(data)
    }

    /// Instrument metadata (lotSz, tickSz, minSz), cached per instId.
    pub async fn get_instrument(&self, symbol: &str) -> Result<Value> {
        let inst_id = self.inst_id(symbol);
        if inst_id.is_empty() {
            return Err(QuantdeskError::SymbolNotFound(symbol.to_string()));
        }
        if let Some(cached) = self.instrument_cache.get(&inst_id) {
            return Ok(cached);
        }
        let raw = self
            .public_request(
                "/api/v5/public/instruments",
                &[
                    ("instType".to_string(), self.inst_type().to_string()),
                    ("instId".to_string(), inst_id.clone()),
                ],
            )
            .await?;
        let first = raw["data"]
            .as_array()
            .and_then(|l| l.first())
            .cloned()
            .unwrap_or(Value::Null);
        if !first.is_null() {
            self.instrument_cache.insert(inst_id, first.clone());
        }
        Ok(first)
    }

    async fn normalize_size(&self, symbol: &str, size: f64) -> Result<String> {
        let q = to_dec(size);
        if q <= Decimal::ZERO {
            return Err(QuantdeskError::InvalidQuantity(format!("requested={}", size)));
        }
        let inst = self.get_instrument(symbol).await.unwrap_or(Value::Null);
        let lot = dec_field(&inst, "lotSz");
        let min_sz = dec_field(&inst, "minSz");

        let floored = floor_to_step(q, lot);
        if floored <= Decimal::ZERO || (min_sz > Decimal::ZERO && floored < min_sz) {
            return Err(QuantdeskError::InvalidQuantity(format!(
                "below lotSz/minSz: requested={} lotSz={} minSz={}",
                size, lot, min_sz
            )));
        }
        Ok(format_amount(floored, scale_of_step(lot)))
    }

    async fn normalize_price(&self, symbol: &str, price: f64) -> Result<String> {
        let px = to_dec(price);
        if px <= Decimal::ZERO {
            return Err(QuantdeskError::InvalidPrice(format!("requested={}", price)));
        }
        let inst = self.get_instrument(symbol).await.unwrap_or(Value::Null);
        let tick = dec_field(&inst, "tickSz");
        let floored = floor_to_step(px, tick);
        if floored <= Decimal::ZERO {
            return Err(QuantdeskError::InvalidPrice(format!(
                "bad tickSz: requested={} tickSz={}",
                price, tick
            )));
        }
        Ok(format_amount(floored, scale_of_step(tick)))
    }

    /// Account position mode, cached; defaults to net mode when unknown.
    async fn pos_mode(&self) -> String {
        let key = "posMode".to_string();
        if let Some(mode) = self.pos_mode_cache.get(&key) {
            return mode;
        }
        let mode = match self
            .signed_request(Method::GET, "/api/v5/account/config", None, None)
            .await
        {
            Ok(raw) => raw["data"]
                .as_array()
                .and_then(|l| l.first())
                .and_then(|c| c["posMode"].as_str())
                .unwrap_or("net_mode")
                .to_string(),
            Err(_) => "net_mode".to_string(),
        };
        self.pos_mode_cache.insert(key, mode.clone());
        mode
    }

    /// posSide required only in long/short mode; derived from trade side.
    async fn resolve_pos_side(&self, side: OrderSide, reduce_only: bool) -> Option<&'static str> {
        if self.market_type == MarketType::Spot {
            return None;
        }
        if self.pos_mode().await != "long_short_mode" {
            return None;
        }
        Some(match (side, reduce_only) {
            (OrderSide::Buy, false) => "long",
            (OrderSide::Sell, false) => "short",
            // Reducing: a sell closes the long side, a buy closes the short
            (OrderSide::Sell, true) => "long",
            (OrderSide::Buy, true) => "short",
        })
    }

    fn td_mode(&self) -> &'static str {
        match self.market_type {
            MarketType::Spot => "cash",
            MarketType::Swap => "cross",
        }
    }

    async fn order_body(
        &self,
        symbol: &str,
        side: OrderSide,
        size: &str,
        reduce_only: bool,
        client_order_id: Option<&str>,
    ) -> Value {
        let mut body = json!({
            "instId": self.inst_id(symbol),
            "tdMode": self.td_mode(),
            "side": side.as_str(),
            "sz": size,
        });
        if let Some(pos_side) = self.resolve_pos_side(side, reduce_only).await {
            body["posSide"] = json!(pos_side);
        }
        if let Some(id) = client_order_id {
            body["clOrdId"] = json!(id);
        }
        body
    }
}

#[async_trait]
impl LiveExchangeClient for OkxClient {
    fn exchange_id(&self) -> &'static str {
        VENUE
    }

    async fn ping(&self) -> bool {
        self.public_request("/api/v5/public/time", &[]).await.is_ok()
    }

    async fn place_limit_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
        price: f64,
        client_order_id: Option<&str>,
    ) -> Result<LiveOrderResult> {
        let size = self.normalize_size(symbol, quantity).await?;
        let px = self.normalize_price(symbol, price).await?;
        let mut body = self.order_body(symbol, side, &size, false, client_order_id).await;
        body["ordType"] = json!("limit");
        body["px"] = json!(px);

        let raw = self
            .signed_request(Method::POST, "/api/v5/trade/order", None, Some(body))
            .await?;
        let order_id = first_data_field(&raw, "ordId");
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
        let size = self.normalize_size(symbol, quantity).await?;
        let mut body = self
            .order_body(symbol, side, &size, reduce_only, client_order_id)
            .await;
        body["ordType"] = json!("market");
        if self.market_type == MarketType::Spot {
            // Size is base quantity, not quote notional
            body["tgtCcy"] = json!("base_ccy");
        }

        let raw = self
            .signed_request(Method::POST, "/api/v5/trade/order", None, Some(body))
            .await?;
        let order_id = first_data_field(&raw, "ordId");
        Ok(LiveOrderResult::submitted(VENUE, order_id, raw))
    }

    async fn cancel_order(
        &self,
        symbol: &str,
        order_id: &str,
        client_order_id: &str,
    ) -> Result<Value> {
        let mut body = json!({"instId": self.inst_id(symbol)});
        if !order_id.is_empty() {
            body["ordId"] = json!(order_id);
        } else if !client_order_id.is_empty() {
            body["clOrdId"] = json!(client_order_id);
        } else {
            return Err(QuantdeskError::Validation(
                "cancel_order requires order_id or client_order_id".to_string(),
            ));
        }
        self.signed_request(Method::POST, "/api/v5/trade/cancel-order", None, Some(body))
            .await
    }

    async fn get_order(
        &self,
        symbol: &str,
        order_id: &str,
        client_order_id: &str,
    ) -> Result<Value> {
        let mut params = vec![("instId".to_string(), self.inst_id(symbol))];
        if !order_id.is_empty() {
            params.push(("ordId".to_string(), order_id.to_string()));
        } else if !client_order_id.is_empty() {
            params.push(("clOrdId".to_string(), client_order_id.to_string()));
        } else {
            return Err(QuantdeskError::OrderNotFound(
                "get_order requires order_id or client_order_id".to_string(),
            ));
        }
        let raw = self
            .signed_request(Method::GET, "/api/v5/trade/order", Some(params), None)
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
            let status = last["state"].as_str().unwrap_or("").to_string();
            let filled = field_f64(&last, "accFillSz");
            let avg_price = field_f64(&last, "avgPx");
            // Fee on the order record is negative for charges
            let fee = field_f64(&last, "fee").abs();
            let fee_ccy = last["feeCcy"].as_str().unwrap_or_default().to_string();

            let terminal = matches!(status.as_str(), "filled" | "canceled" | "mmp_canceled");
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
                "/api/v5/market/ticker",
                &[("instId".to_string(), self.inst_id(symbol))],
            )
            .await?;
        let price = raw["data"]
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
        self.signed_request(Method::GET, "/api/v5/account/balance", None, None)
            .await
    }

    async fn get_positions(&self, symbol: Option<&str>) -> Result<Value> {
        let mut params = vec![("instType".to_string(), self.inst_type().to_string())];
        if let Some(s) = symbol {
            params.push(("instId".to_string(), self.inst_id(s)));
        }
        self.signed_request(Method::GET, "/api/v5/account/positions", Some(params), None)
            .await
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<bool> {
        if self.market_type == MarketType::Spot {
            return Ok(false);
        }
        let body = json!({
            "instId": self.inst_id(symbol),
            "lever": leverage.max(1).to_string(),
            "mgnMode": "cross",
        });
        match self
            .signed_request(Method::POST, "/api/v5/account/set-leverage", None, Some(body))
            .await
        {
            Ok(_) => Ok(true),
            Err(_) => Ok(false),
        }
    }

    async fn get_order_fee(&self, symbol: &str, order_id: &str) -> (f64, String) {
        let params = vec![
            ("instType".to_string(), self.inst_type().to_string()),
            ("instId".to_string(), self.inst_id(symbol)),
            ("ordId".to_string(), order_id.to_string()),
        ];
        let raw = match self
            .signed_request(Method::GET, "/api/v5/trade/fills", Some(params), None)
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
            let fee = field_f64(fill, "fee").abs();
            if fee > 0.0 {
                total += fee;
                if ccy.is_empty() {
                    ccy = fill["feeCcy"].as_str().unwrap_or_default().to_string();
                }
            }
        }
        (total, ccy)
    }
}

fn check_okx_code(data: &Value) -> Result<()> {
    if let Some(code) = data["code"].as_str() {
        if !code.is_empty() && code != "0" {
            return Err(QuantdeskError::venue_business(VENUE, &data.to_string()));
        }
    }
    Ok(())
}

fn first_data_field(raw: &Value, key: &str) -> String {
    raw["data"]
        .as_array()
        .and_then(|l| l.first())
        .and_then(|d| d[key].as_str())
        .unwrap_or_default()
        .to_string()
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
    fn okx_code_check() {
        assert!(check_okx_code(&json!({"code": "0"})).is_ok());
        assert!(check_okx_code(&json!({"code": "51000", "msg": "param error"})).is_err());
        assert!(check_okx_code(&json!({})).is_ok());
    }

    #[test]
    fn inst_ids_per_market_type() {
        let spot = OkxClient::new("k", "s", "p", None, MarketType::Spot).unwrap();
        let swap = OkxClient::new("k", "s", "p", None, MarketType::Swap).unwrap();
        assert_eq!(spot.inst_id("BTC/USDT"), "BTC-USDT");
        assert_eq!(swap.inst_id("BTC/USDT"), "BTC-USDT-SWAP");
        assert_eq!(spot.td_mode(), "cash");
        assert_eq!(swap.td_mode(), "cross");
    }

    #[test]
    fn first_data_field_reads_order_id() {
        let raw = json!({"data": [{"ordId": "abc123"}]});
        assert_eq!(first_data_field(&raw, "ordId"), "abc123");
        assert_eq!(first_data_field(&json!({}), "ordId"), "");
    }

    #[test]
    fn requires_passphrase() {
        assert!(OkxClient::new("k", "s", "", None, MarketType::Swap).is_err());
    }
}
