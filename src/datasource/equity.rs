//! Equity / forex / futures source over the public quote-chart API, with
//! optional structured-quote enrichment from Finnhub.

use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

use super::{filter_and_limit, Ticker};
use crate::config::DataSourceConfig;
use crate::domain::{Bar, Market, Timeframe};
use crate::error::{QuantdeskError, Result};

pub struct EquitySource {
    http: Client,
    base_url: String,
    finnhub_api_key: String,
}

impl EquitySource {
    pub fn new(config: &DataSourceConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .user_agent("Mozilla/5.0 (compatible; quantdesk/0.1)")
            .build()
            .map_err(|e| QuantdeskError::Internal(format!("failed to build equity HTTP client: {}", e)))?;
        Ok(Self {
            http,
            base_url: config.equity_base_url.trim_end_matches('/').to_string(),
            finnhub_api_key: config.finnhub_api_key.clone(),
        })
    }

    /// Map a canonical symbol onto the chart API's naming.
    pub fn chart_symbol(market: Market, symbol: &str) -> String {
        match market {
            Market::Forex => {
                let glued = symbol.replace('/', "");
                format!("{}=X", glued)
            }
            Market::Futures => match symbol.to_uppercase().as_str() {
                "GOLD" | "XAU" | "XAUUSD" => "GC=F".to_string(),
                "SILVER" | "XAG" | "XAGUSD" => "SI=F".to_string(),
                "OIL" | "WTI" | "CL" => "CL=F".to_string(),
                "NATGAS" | "NG" => "NG=F".to_string(),
                other => other.to_string(),
            },
            _ => symbol.to_uppercase(),
        }
    }

    fn chart_interval(timeframe: Timeframe) -> &'static str {
        match timeframe {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 | Timeframe::H4 => "60m",
            Timeframe::D1 => "1d",
            Timeframe::W1 => "1wk",
        }
    }

    async fn fetch_chart(
        &self,
        market: Market,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
        before_time: Option<i64>,
    ) -> Result<Value> {
        let chart_symbol = Self::chart_symbol(market, symbol);
        let url = format!("{}/v8/finance/chart/{}", self.base_url, chart_symbol);
        let span = timeframe.seconds() * limit as i64;
        let end = before_time.unwrap_or_else(|| chrono::Utc::now().timestamp());
        // Pad the window so market closures do not starve the request
        let start = end - span * 2;

        let resp = self
            .http
            .get(&url)
            .query(&[
                ("period1", start.to_string()),
                ("period2", end.to_string()),
                ("interval", Self::chart_interval(timeframe).to_string()),
                ("includePrePost", "false".to_string()),
            ])
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(QuantdeskError::venue_http("equity", status.as_u16(), &body));
        }
        Ok(resp.json().await?)
    }

    pub async fn get_kline(
        &self,
        market: Market,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
        before_time: Option<i64>,
    ) -> Result<Vec<Bar>> {
        let raw = self
            .fetch_chart(market, symbol, timeframe, limit, before_time)
            .await?;
        let bars = parse_chart(&raw);
        if bars.is_empty() {
            return Err(QuantdeskError::MarketDataUnavailable(format!(
                "no chart data for {}:{}",
                market, symbol
            )));
        }
        Ok(filter_and_limit(bars, limit, before_time))
    }

    pub async fn get_ticker(&self, market: Market, symbol: &str) -> Result<Ticker> {
        // Finnhub quote first for US stocks when a key is configured
        if market == Market::UsStock && !self.finnhub_api_key.is_empty() {
            if let Ok(t) = self.finnhub_quote(symbol).await {
                if t.last > 0.0 {
                    return Ok(t);
                }
            }
        }

        let raw = self
            .fetch_chart(market, symbol, Timeframe::D1, 2, None)
            .await?;
        let meta = &raw["chart"]["result"][0]["meta"];
        let last = meta["regularMarketPrice"].as_f64().unwrap_or(0.0);
        if last <= 0.0 {
            return Err(QuantdeskError::PriceUnavailable(symbol.to_string()));
        }
        let prev = meta["chartPreviousClose"]
            .as_f64()
            .or_else(|| meta["previousClose"].as_f64())
            .unwrap_or(last);
        let change = last - prev;
        Ok(Ticker {
            last,
            change,
            change_percent: if prev > 0.0 { change / prev * 100.0 } else { 0.0 },
            high: meta["regularMarketDayHigh"].as_f64().unwrap_or(last),
            low: meta["regularMarketDayLow"].as_f64().unwrap_or(last),
            open: last - change,
            previous_close: prev,
            source: "chart_meta".to_string(),
        })
    }

    async fn finnhub_quote(&self, symbol: &str) -> Result<Ticker> {
        let resp = self
            .http
            .get("https://finnhub.io/api/v1/quote")
            .query(&[("symbol", symbol), ("token", self.finnhub_api_key.as_str())])
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(QuantdeskError::venue_http("finnhub", status.as_u16(), &body));
        }
        let raw: Value = resp.json().await?;
        Ok(Ticker {
            last: raw["c"].as_f64().unwrap_or(0.0),
            change: raw["d"].as_f64().unwrap_or(0.0),
            change_percent: raw["dp"].as_f64().unwrap_or(0.0),
            high: raw["h"].as_f64().unwrap_or(0.0),
            low: raw["l"].as_f64().unwrap_or(0.0),
            open: raw["o"].as_f64().unwrap_or(0.0),
            previous_close: raw["pc"].as_f64().unwrap_or(0.0),
            source: "finnhub".to_string(),
        })
    }
}

fn parse_chart(raw: &Value) -> Vec<Bar> {
    let result = &raw["chart"]["result"][0];
    let timestamps = match result["timestamp"].as_array() {
        Some(t) => t,
        None => return Vec::new(),
    };
    let quote = &result["indicators"]["quote"][0];
    let opens = quote["open"].as_array();
    let highs = quote["high"].as_array();
    let lows = quote["low"].as_array();
    let closes = quote["close"].as_array();
    let volumes = quote["volume"].as_array();

    let at = |arr: Option<&Vec<Value>>, i: usize| -> Option<f64> {
        arr.and_then(|a| a.get(i)).and_then(Value::as_f64)
    };

    timestamps
        .iter()
        .enumerate()
        .filter_map(|(i, ts)| {
            let time = ts.as_i64()?;
            let close = at(closes, i)?;
            Some(Bar::new(
                time,
                at(opens, i).unwrap_or(close),
                at(highs, i).unwrap_or(close),
                at(lows, i).unwrap_or(close),
                close,
                at(volumes, i).unwrap_or(0.0),
            ))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn chart_symbol_projection() {
        assert_eq!(
            EquitySource::chart_symbol(Market::Forex, "EUR/USD"),
            "EURUSD=X"
        );
        assert_eq!(EquitySource::chart_symbol(Market::Futures, "GOLD"), "GC=F");
        assert_eq!(EquitySource::chart_symbol(Market::UsStock, "aapl"), "AAPL");
    }

    #[test]
    fn parse_chart_skips_null_closes() {
        let raw = json!({
            "chart": {"result": [{
                "timestamp": [1700000000i64, 1700086400i64],
                "indicators": {"quote": [{
                    "open": [100.0, null],
                    "high": [101.0, null],
                    "low": [99.0, null],
                    "close": [100.5, null],
                    "volume": [5000.0, null]
                }]}
            }]}
        });
        let bars = parse_chart(&raw);
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].time, 1700000000);
    }

    #[test]
    fn parse_chart_handles_missing_result() {
        assert!(parse_chart(&json!({"chart": {"error": "not found"}})).is_empty());
    }
}
