//! Fundamentals and company-profile fetchers.
//!
//! US stocks use the structured Finnhub endpoints; crypto "fundamentals" are
//! a fixed descriptor table keyed by base asset.

use reqwest::Client;
use serde_json::{json, Map, Value};
use std::time::Duration;

use crate::config::DataSourceConfig;
use crate::domain::normalize;
use crate::error::{QuantdeskError, Result};

pub struct FundamentalsSource {
    http: Client,
    finnhub_api_key: String,
}

impl FundamentalsSource {
    pub fn new(config: &DataSourceConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()
            .map_err(|e| {
                QuantdeskError::Internal(format!("failed to build fundamentals HTTP client: {}", e))
            })?;
        Ok(Self {
            http,
            finnhub_api_key: config.finnhub_api_key.clone(),
        })
    }

    pub fn has_finnhub(&self) -> bool {
        !self.finnhub_api_key.is_empty()
    }

    /// Basic financial metrics for a US stock.
    pub async fn us_fundamental(&self, symbol: &str) -> Result<Value> {
        if !self.has_finnhub() {
            return Ok(Value::Null);
        }
        let raw: Value = self
            .http
            .get("https://finnhub.io/api/v1/stock/metric")
            .query(&[
                ("symbol", symbol),
                ("metric", "all"),
                ("token", self.finnhub_api_key.as_str()),
            ])
            .send()
            .await?
            .json()
            .await?;

        let m = &raw["metric"];
        if m.is_null() {
            return Ok(Value::Null);
        }

        let mut out = Map::new();
        let mut put = |key: &str, src: &str| {
            if let Some(v) = m.get(src).filter(|v| !v.is_null()) {
                out.insert(key.to_string(), v.clone());
            }
        };
        put("pe_ratio", "peBasicExclExtraTTM");
        put("pb_ratio", "pbQuarterly");
        put("ps_ratio", "psTTM");
        put("market_cap", "marketCapitalization");
        put("dividend_yield", "dividendYieldIndicatedAnnual");
        put("beta", "beta");
        put("52w_high", "52WeekHigh");
        put("52w_low", "52WeekLow");
        put("roe", "roeTTM");
        put("eps", "epsBasicExclExtraItemsTTM");
        put("revenue_growth", "revenueGrowthTTMYoy");
        put("profit_margin", "netProfitMarginTTM");
        put("debt_to_equity", "totalDebtToEquityQuarterly");
        put("current_ratio", "currentRatioQuarterly");
        put("quick_ratio", "quickRatioQuarterly");

        Ok(Value::Object(out))
    }

    /// Company profile for a US stock.
    pub async fn company_profile(&self, symbol: &str) -> Result<Value> {
        if !self.has_finnhub() {
            return Ok(Value::Null);
        }
        let raw: Value = self
            .http
            .get("https://finnhub.io/api/v1/stock/profile2")
            .query(&[("symbol", symbol), ("token", self.finnhub_api_key.as_str())])
            .send()
            .await?
            .json()
            .await?;
        if raw["name"].is_null() {
            return Ok(Value::Null);
        }
        Ok(json!({
            "name": raw["name"],
            "industry": raw["finnhubIndustry"],
            "country": raw["country"],
            "exchange": raw["exchange"],
            "ipo_date": raw["ipo"],
            "market_cap": raw["marketCapitalization"],
            "website": raw["weburl"],
        }))
    }
}

/// Fixed descriptors standing in for crypto fundamentals.
pub fn crypto_info(symbol: &str) -> Value {
    let (_, base) = normalize(symbol);
    let base = if base.is_empty() {
        symbol.to_uppercase()
    } else {
        base
    };
    let (name, description, category) = match base.as_str() {
        "BTC" => (
            "Bitcoin",
            "Digital gold; the largest cryptocurrency by market cap, held as a store of value and macro hedge",
            "Store of Value",
        ),
        "ETH" => (
            "Ethereum",
            "Smart-contract platform underpinning DeFi and NFT ecosystems",
            "Smart Contract Platform",
        ),
        "BNB" => (
            "Binance Coin",
            "Exchange token of the largest global trading venue",
            "Exchange Token",
        ),
        "SOL" => (
            "Solana",
            "High-throughput L1 chain optimized for low fees",
            "Smart Contract Platform",
        ),
        "XRP" => (
            "Ripple",
            "Cross-border payments and settlement network token",
            "Payment",
        ),
        "DOGE" => (
            "Dogecoin",
            "Community-driven meme asset with high retail participation",
            "Meme",
        ),
        _ => {
            return json!({
                "name": base,
                "description": format!("{} is a cryptocurrency", base),
                "category": "Unknown",
            })
        }
    };
    json!({
        "name": name,
        "description": description,
        "category": category,
    })
}

/// Keywords used to find prediction-market events related to an asset.
pub fn polymarket_keywords(symbol: &str, is_crypto: bool) -> Vec<String> {
    let (_, base) = normalize(symbol);
    let base = if base.is_empty() {
        symbol.to_uppercase()
    } else {
        base
    };
    let mut keywords = vec![base.clone()];

    let names: &[&str] = match base.as_str() {
        "BTC" => &["Bitcoin"],
        "ETH" => &["Ethereum"],
        "SOL" => &["Solana"],
        "BNB" => &["Binance"],
        "XRP" => &["Ripple"],
        "ADA" => &["Cardano"],
        "DOGE" => &["Dogecoin"],
        "AVAX" => &["Avalanche"],
        "DOT" => &["Polkadot"],
        "MATIC" => &["Polygon"],
        _ => &[],
    };
    keywords.extend(names.iter().map(|s| s.to_string()));

    if is_crypto {
        keywords.push("$100k".to_string());
        keywords.push("ETF".to_string());
    }
    keywords
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_crypto_has_descriptor() {
        let info = crypto_info("BTC/USDT");
        assert_eq!(info["name"], "Bitcoin");
        assert_eq!(info["category"], "Store of Value");
    }

    #[test]
    fn unknown_crypto_gets_generic_descriptor() {
        let info = crypto_info("PEPE");
        assert_eq!(info["name"], "PEPE");
        assert_eq!(info["category"], "Unknown");
    }

    #[test]
    fn keywords_include_full_name_and_hints() {
        let kw = polymarket_keywords("BTC/USDT", true);
        assert!(kw.contains(&"BTC".to_string()));
        assert!(kw.contains(&"Bitcoin".to_string()));
        assert!(kw.contains(&"ETF".to_string()));
    }

    #[test]
    fn keywords_for_stock_skip_price_hints() {
        let kw = polymarket_keywords("AAPL", false);
        assert_eq!(kw, vec!["AAPL".to_string()]);
    }
}
