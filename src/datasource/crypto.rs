//! Crypto kline/ticker source over exchange public REST.

use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use super::{filter_and_limit, Ticker};
use crate::cache::TtlCache;
use crate::config::DataSourceConfig;
use crate::domain::{normalize, Bar, Timeframe, COMMON_QUOTES};
use crate::error::{QuantdeskError, Result};

/// Upstream batches are capped conservatively; some venues reject >300.
const BATCH_LIMIT: usize = 300;
const LISTING_CACHE_TTL: Duration = Duration::from_secs(300);

pub struct CryptoSource {
    http: Client,
    base_url: String,
    /// Wire symbols currently listed, used for alternative-quote scans
    listing_cache: TtlCache<String, Vec<String>>,
}

impl CryptoSource {
    pub fn new(config: &DataSourceConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()
            .map_err(|e| QuantdeskError::Internal(format!("failed to build crypto HTTP client: {}", e)))?;
        Ok(Self {
            http,
            base_url: config.crypto_base_url.trim_end_matches('/').to_string(),
            listing_cache: TtlCache::new(LISTING_CACHE_TTL),
        })
    }

    fn interval(timeframe: Timeframe) -> &'static str {
        match timeframe {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
            Timeframe::W1 => "1w",
        }
    }

    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self.http.get(&url).query(query).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(QuantdeskError::venue_http("crypto", status.as_u16(), &body));
        }
        Ok(resp.json().await?)
    }

    /// Wire symbols listed on the venue, cached for five minutes.
    async fn listed_symbols(&self) -> Result<Vec<String>> {
        let key = "listing".to_string();
        if let Some(cached) = self.listing_cache.get(&key) {
            return Ok(cached);
        }
        let raw = self.get_json("/api/v3/exchangeInfo", &[]).await?;
        let symbols: Vec<String> = raw["symbols"]
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter(|s| s["status"].as_str().unwrap_or("TRADING") == "TRADING")
                    .filter_map(|s| s["symbol"].as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        if !symbols.is_empty() {
            self.listing_cache.insert(key, symbols.clone());
        }
        Ok(symbols)
    }

    /// Resolve a raw symbol to a listed wire symbol, scanning the common
    /// quote list when the normalized pair is not listed.
    async fn resolve_wire_symbol(&self, symbol: &str) -> Result<String> {
        let (pair, base) = normalize(symbol);
        if pair.is_empty() {
            return Err(QuantdeskError::SymbolNotFound(symbol.to_string()));
        }
        let wire = pair.replace('/', "");

        let listed = match self.listed_symbols().await {
            Ok(l) if !l.is_empty() => l,
            // Listing unavailable: optimistically use the direct projection
            _ => return Ok(wire),
        };

        if listed.iter().any(|s| s == &wire) {
            return Ok(wire);
        }

        for quote in COMMON_QUOTES {
            let candidate = format!("{}{}", base, quote);
            if listed.iter().any(|s| s == &candidate) {
                debug!("symbol {} resolved to alternative {}", symbol, candidate);
                return Ok(candidate);
            }
        }

        Err(QuantdeskError::SymbolNotFound(symbol.to_string()))
    }

    pub async fn get_ticker(&self, symbol: &str) -> Result<Ticker> {
        let wire = self.resolve_wire_symbol(symbol).await?;
        let raw = self
            .get_json("/api/v3/ticker/24hr", &[("symbol", wire.clone())])
            .await?;
        let last = field_f64(&raw, "lastPrice");
        if last <= 0.0 {
            return Err(QuantdeskError::PriceUnavailable(symbol.to_string()));
        }
        Ok(Ticker {
            last,
            change: field_f64(&raw, "priceChange"),
            change_percent: field_f64(&raw, "priceChangePercent"),
            high: field_f64(&raw, "highPrice"),
            low: field_f64(&raw, "lowPrice"),
            open: field_f64(&raw, "openPrice"),
            previous_close: field_f64(&raw, "prevClosePrice"),
            source: "crypto_rest".to_string(),
        })
    }

    pub async fn get_kline(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
        before_time: Option<i64>,
    ) -> Result<Vec<Bar>> {
        let wire = self.resolve_wire_symbol(symbol).await?;
        let interval = Self::interval(timeframe);

        let bars = match before_time {
            Some(end) => {
                match self
                    .fetch_paginated(&wire, interval, timeframe, limit, end)
                    .await
                {
                    Ok(b) if !b.is_empty() => b,
                    other => {
                        if let Err(e) = other {
                            warn!("paginated kline fetch failed: {}, trying single fetch", e);
                        }
                        self.fetch_single(&wire, interval, limit, Some(end)).await?
                    }
                }
            }
            None => self.fetch_single(&wire, interval, limit, None).await?,
        };

        if bars.is_empty() {
            return Err(QuantdeskError::MarketDataUnavailable(format!(
                "no klines for {} ({})",
                symbol, wire
            )));
        }
        Ok(filter_and_limit(bars, limit, before_time))
    }

    /// Walk forward in <=300-bar batches until the window end is covered or
    /// the venue returns an empty batch.
    async fn fetch_paginated(
        &self,
        wire: &str,
        interval: &str,
        timeframe: Timeframe,
        limit: usize,
        end_time: i64,
    ) -> Result<Vec<Bar>> {
        let timeframe_ms = timeframe.seconds() * 1000;
        let end_ms = end_time * 1000;
        let mut since = end_ms - timeframe_ms * limit as i64;
        let mut all = Vec::new();

        while since < end_ms {
            let batch = self
                .fetch_batch(wire, interval, since, BATCH_LIMIT)
                .await?;
            if batch.is_empty() {
                break;
            }
            let last_ms = batch.last().map(|b| b.time * 1000).unwrap_or(end_ms);
            all.extend(batch);
            if last_ms >= end_ms {
                break;
            }
            since = last_ms + timeframe_ms;
        }
        Ok(all)
    }

    async fn fetch_single(
        &self,
        wire: &str,
        interval: &str,
        limit: usize,
        before_time: Option<i64>,
    ) -> Result<Vec<Bar>> {
        let mut query = vec![
            ("symbol", wire.to_string()),
            ("interval", interval.to_string()),
            ("limit", limit.min(1000).to_string()),
        ];
        if let Some(end) = before_time {
            query.push(("endTime", (end * 1000).to_string()));
        }
        let raw = self.get_json("/api/v3/klines", &query).await?;
        Ok(parse_klines(&raw))
    }

    async fn fetch_batch(
        &self,
        wire: &str,
        interval: &str,
        start_ms: i64,
        limit: usize,
    ) -> Result<Vec<Bar>> {
        let query = vec![
            ("symbol", wire.to_string()),
            ("interval", interval.to_string()),
            ("startTime", start_ms.to_string()),
            ("limit", limit.to_string()),
        ];
        let raw = self.get_json("/api/v3/klines", &query).await?;
        Ok(parse_klines(&raw))
    }
}

fn parse_klines(raw: &Value) -> Vec<Bar> {
    raw.as_array()
        .map(|rows| {
            rows.iter()
                .filter_map(|row| {
                    let cells = row.as_array()?;
                    if cells.len() < 6 {
                        return None;
                    }
                    Some(Bar::new(
                        cells[0].as_i64()? / 1000,
                        cell_f64(&cells[1]),
                        cell_f64(&cells[2]),
                        cell_f64(&cells[3]),
                        cell_f64(&cells[4]),
                        cell_f64(&cells[5]),
                    ))
                })
                .collect()
        })
        .unwrap_or_default()
}

fn cell_f64(v: &Value) -> f64 {
    v.as_str()
        .and_then(|s| s.parse().ok())
        .or_else(|| v.as_f64())
        .unwrap_or(0.0)
}

fn field_f64(v: &Value, key: &str) -> f64 {
    cell_f64(&v[key])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_klines_reads_string_cells() {
        let raw = json!([
            [1700000000000i64, "100.5", "101.0", "99.0", "100.8", "1234.5", 0, "0", 0, "0", "0", "0"],
            [1700000060000i64, "100.8", "102.0", "100.0", "101.2", "2000.0", 0, "0", 0, "0", "0", "0"]
        ]);
        let bars = parse_klines(&raw);
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].time, 1700000000);
        assert!((bars[0].open - 100.5).abs() < 1e-9);
        assert!((bars[1].volume - 2000.0).abs() < 1e-9);
    }

    #[test]
    fn parse_klines_skips_short_rows() {
        let raw = json!([[1700000000000i64, "1", "2"]]);
        assert!(parse_klines(&raw).is_empty());
    }

    #[test]
    fn interval_mapping_is_lowercase() {
        assert_eq!(CryptoSource::interval(Timeframe::H1), "1h");
        assert_eq!(CryptoSource::interval(Timeframe::D1), "1d");
        assert_eq!(CryptoSource::interval(Timeframe::W1), "1w");
    }
}
