//! Bitget USDT-margined futures (mix, v2). Shares the spot signing contract;
//! order sizing comes from the contracts listing (`sizeMultiplier`,
//! `minTradeNum`, `volumePlace`).

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::Method;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::time::Duration;

use super::binance_spot::field_f64;
use super::bitget_spot::{check_code, dec_any, BitgetSpotClient};
use super::precision::{floor_to_step, format_amount, scale_of_step, to_dec};
use super::symbols::to_bitget_v2_symbol;
use super::traits::{FillReport, LiveExchangeClient, LiveOrderResult, OrderSide};
use super::transport::{sorted_query_string, RestTransport};
use crate::cache::TtlCache;
use crate::error::{QuantdeskError, Result};

const VENUE: &str = "bitget_mix";
const DEFAULT_BASE_URL: &str = "https://api.bitget.com";
const PRODUCT_TYPE: &str = "USDT-FUTURES";
const META_CACHE_TTL: Duration = Duration::from_secs(300);

#[derive(Debug)]
pub struct BitgetMixClient {
    transport: RestTransport,
    api_key: String,
    secret_key: String,
    passphrase: String,
    meta_cache: TtlCache<String, Value>,
}

impl BitgetMixClient {
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
                "Bitget mix api_key/secret_key/passphrase".to_string(),
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
        let sign = BitgetSpotClient::sign_prehash(
            &self.secret_key,
            &ts_ms,
            method.as_str(),
            &signed_path,
            &body_str,
        )?;

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

    async fn get_contract_meta(&self, symbol: &str) -> Result<Value> {
        let wire = to_bitget_v2_symbol(symbol);
        if wire.is_empty() {
            return Err(QuantdeskError::SymbolNotFound(symbol.to_string()));
        }
        if let Some(cached) = self.meta_cache.get(&wire) {
            return Ok(cached);
        }
        let raw = self
            .public_request(
                "/api/v2/mix/market/contracts",
                &[("productType".to_string(), PRODUCT_TYPE.to_string())],
            )
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

    async fn normalize_size(&self, symbol: &str, size: f64) -> Result<String> {
        let req = to_dec(size);
        if req <= Decimal::ZERO {
            return Err(QuantdeskError::InvalidQuantity(format!("requested={}", size)));
        }
        let meta = self.get_contract_meta(symbol).await.unwrap_or(Value::Null);

        let mut step = dec_any(&meta, &["sizeMultiplier", "minTradeIncrement"]);
        if step <= Decimal::ZERO {
            let places = meta["volumePlace"]
                .as_str()
                .and_then(|s| s.parse::<u32>().ok())
                .or_else(|| meta["volumePlace"].as_u64().map(|v| v as u32))
                .unwrap_or(0)
                .min(18);
            step = Decimal::new(1, places);
        }

        let floored = floor_to_step(req, step);
        let min_qty = dec_any(&meta, &["minTradeNum", "minTradeAmount"]);
        if floored <= Decimal::ZERO || (min_qty > Decimal::ZERO && floored < min_qty) {
            return Err(QuantdeskError::InvalidQuantity(format!(
                "below step/min: requested={} step={} min={}",
                size, step, min_qty
            )));
        }
        Ok(format_amount(floored, scale_of_step(step)))
    }

    fn base_order_body(&self, symbol: &str, side: OrderSide, size: &str, reduce_only: bool) -> Value {
        json!({
            "symbol": to_bitget_v2_symbol(symbol),
            "productType": PRODUCT_TYPE,
            "marginMode": "crossed",
            "marginCoin": "USDT",
            "side": side.as_str(),
            "size": size,
            "reduceOnly": if reduce_only { "YES" } else { "NO" },
        })
    }
}

#[async_trait]
impl LiveExchangeClient for BitgetMixClient {
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
        let size = self.normalize_size(symbol, quantity).await?;
        let mut body = self.base_order_body(symbol, side, &size, false);
        body["orderType"] = json!("limit");
        body["force"] = json!("gtc");
        body["price"] = json!(price.to_string());
        if let Some(id) = client_order_id {
            body["clientOid"] = json!(id);
        }
        let raw = self
            .signed_request(Method::POST, "/api/v2/mix/order/place-order", None, Some(body))
            .await?;
        let order_id = raw["data"]["orderId"].as_str().unwrap_or_default().to_string();
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
        let mut body = self.base_order_body(symbol, side, &size, reduce_only);
        body["orderType"] = json!("market");
        if let Some(id) = client_order_id {
            body["clientOid"] = json!(id);
        }
        let raw = self
            .signed_request(Method::POST, "/api/v2/mix/order/place-order", None, Some(body))
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
        let mut body = json!({
            "symbol": to_bitget_v2_symbol(symbol),
            "productType": PRODUCT_TYPE,
        });
        if !order_id.is_empty() {
            body["orderId"] = json!(order_id);
        } else if !client_order_id.is_empty() {
            body["clientOid"] = json!(client_order_id);
        } else {
            return Err(QuantdeskError::Validation(
                "cancel_order requires order_id or client_order_id".to_string(),
            ));
        }
        self.signed_request(Method::POST, "/api/v2/mix/order/cancel-order", None, Some(body))
            .await
    }

    async fn get_order(
        &self,
        symbol: &str,
        order_id: &str,
        client_order_id: &str,
    ) -> Result<Value> {
        let mut params = vec![
            ("symbol".to_string(), to_bitget_v2_symbol(symbol)),
            ("productType".to_string(), PRODUCT_TYPE.to_string()),
        ];
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
            .signed_request(Method::GET, "/api/v2/mix/order/detail", Some(params), None)
            .await?;
        Ok(raw["data"].clone())
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
            let status = last["state"]
                .as_str()
                .or_else(|| last["status"].as_str())
                .unwrap_or("")
                .to_string();
            let filled = field_f64(&last, "baseVolume");
            let avg_price = field_f64(&last, "priceAvg");

            let terminal = matches!(status.as_str(), "filled" | "cancelled" | "canceled");
            if (filled > 0.0 && avg_price > 0.0)
                || terminal
                || tokio::time::Instant::now() >= deadline
            {
                let (fee, fee_ccy) = if filled > 0.0 {
                    let oid = last["orderId"].as_str().unwrap_or(order_id).to_string();
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
                "/api/v2/mix/market/ticker",
                &[
                    ("symbol".to_string(), to_bitget_v2_symbol(symbol)),
                    ("productType".to_string(), PRODUCT_TYPE.to_string()),
                ],
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
        self.signed_request(
            Method::GET,
            "/api/v2/mix/account/accounts",
            Some(vec![("productType".to_string(), PRODUCT_TYPE.to_string())]),
            None,
        )
        .await
    }

    async fn get_positions(&self, symbol: Option<&str>) -> Result<Value> {
        match symbol {
            Some(s) => {
                self.signed_request(
                    Method::GET,
                    "/api/v2/mix/position/single-position",
                    Some(vec![
                        ("symbol".to_string(), to_bitget_v2_symbol(s)),
                        ("productType".to_string(), PRODUCT_TYPE.to_string()),
                        ("marginCoin".to_string(), "USDT".to_string()),
                    ]),
                    None,
                )
                .await
            }
            None => {
                self.signed_request(
                    Method::GET,
                    "/api/v2/mix/position/all-position",
                    Some(vec![
                        ("productType".to_string(), PRODUCT_TYPE.to_string()),
                        ("marginCoin".to_string(), "USDT".to_string()),
                    ]),
                    None,
                )
                .await
            }
        }
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<bool> {
        let body = json!({
            "symbol": to_bitget_v2_symbol(symbol),
            "productType": PRODUCT_TYPE,
            "marginCoin": "USDT",
            "leverage": leverage.max(1).to_string(),
        });
        match self
            .signed_request(Method::POST, "/api/v2/mix/account/set-leverage", None, Some(body))
            .await
        {
            Ok(_) => Ok(true),
            Err(_) => Ok(false),
        }
    }

    async fn get_order_fee(&self, symbol: &str, order_id: &str) -> (f64, String) {
        let params = vec![
            ("symbol".to_string(), to_bitget_v2_symbol(symbol)),
            ("productType".to_string(), PRODUCT_TYPE.to_string()),
            ("orderId".to_string(), order_id.to_string()),
        ];
        let raw = match self
            .signed_request(Method::GET, "/api/v2/mix/order/fills", Some(params), None)
            .await
        {
            Ok(v) => v,
            Err(_) => return (0.0, String::new()),
        };
        let fills = raw["data"]["fillList"]
            .as_array()
            .or_else(|| raw["data"].as_array())
            .cloned()
            .unwrap_or_default();
        let mut total = 0.0;
        let mut ccy = String::new();
        for fill in &fills {
            let detail = &fill["feeDetail"];
            let fee = field_f64(detail, "totalFee")
                .abs()
                .max(field_f64(fill, "fee").abs());
            if fee > 0.0 {
                total += fee;
                if ccy.is_empty() {
                    ccy = detail["feeCoin"]
                        .as_str()
                        .or_else(|| fill["feeCcy"].as_str())
                        .unwrap_or("USDT")
                        .to_string();
                }
            }
        }
        (total, ccy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_body_carries_product_and_margin() {
        let client = BitgetMixClient::new("k", "s", "p", None).unwrap();
        let body = client.base_order_body("BTC/USDT", OrderSide::Buy, "0.01", true);
        assert_eq!(body["symbol"], "BTCUSDT");
        assert_eq!(body["productType"], "USDT-FUTURES");
        assert_eq!(body["marginCoin"], "USDT");
        assert_eq!(body["reduceOnly"], "YES");
    }

    #[test]
    fn rejects_missing_credentials() {
        assert!(BitgetMixClient::new("", "s", "p", None).is_err());
    }
}
