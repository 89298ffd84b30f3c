//! Macro & sentiment aggregator.
//!
//! Every metric has a provider chain and a typed default; a total provider
//! failure yields an empty snapshot, never an error. A 6-hour composite
//! cache keeps fan-out cost down across concurrent analysis callers.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::cache::TtlCache;
use crate::datasource::EquitySource;
use crate::domain::Market;

const MACRO_FETCH_TIMEOUT: Duration = Duration::from_secs(10);
const PER_METRIC_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MacroIndicator {
    pub name: String,
    pub price: f64,
    pub change: f64,
    #[serde(rename = "changePercent")]
    pub change_percent: f64,
    pub level: String,
    pub interpretation: String,
}

pub type MacroSnapshot = HashMap<String, MacroIndicator>;

pub struct MacroAggregator {
    equity: Arc<EquitySource>,
    http: Client,
    /// Composite snapshot cache keyed "market_sentiment"
    cache: TtlCache<String, MacroSnapshot>,
}

impl MacroAggregator {
    pub fn new(equity: Arc<EquitySource>, cache_ttl: Duration) -> Self {
        Self {
            equity,
            http: Client::new(),
            cache: TtlCache::new(cache_ttl),
        }
    }

    /// Full composite snapshot, cache-first.
    pub async fn get_snapshot(&self) -> MacroSnapshot {
        let key = "market_sentiment".to_string();
        if let Some(cached) = self.cache.get(&key) {
            info!("using cached market sentiment snapshot");
            return cached;
        }

        let snapshot = tokio::time::timeout(MACRO_FETCH_TIMEOUT, self.fetch_all())
            .await
            .unwrap_or_default();
        if !snapshot.is_empty() {
            self.cache.insert(key, snapshot.clone());
        }
        snapshot
    }

    async fn fetch_all(&self) -> MacroSnapshot {
        let (vix, dxy, tnx, fear_greed, vxn, gvz, vix3m) = tokio::join!(
            self.index_quote("^VIX"),
            self.index_quote("DX-Y.NYB"),
            self.index_quote("^TNX"),
            self.fetch_fear_greed(),
            self.index_quote("^VXN"),
            self.index_quote("^GVZ"),
            self.index_quote("^VIX3M"),
        );

        let mut out = MacroSnapshot::new();

        if let Some((value, change, pct)) = vix {
            out.insert("VIX".to_string(), interpret_vix(value, change, pct));
        }
        if let Some((value, change, pct)) = dxy {
            out.insert("DXY".to_string(), interpret_dxy(value, change, pct));
        }
        if let Some((value, change, pct)) = tnx {
            out.insert("TNX".to_string(), interpret_tnx(value, change, pct));
            out.insert("YIELD_CURVE".to_string(), interpret_yield_curve(value));
        }
        if let Some(fg) = fear_greed {
            out.insert("FEAR_GREED".to_string(), fg);
        }
        if let Some((value, change, pct)) = vxn {
            out.insert(
                "VXN".to_string(),
                MacroIndicator {
                    name: "NASDAQ Volatility".to_string(),
                    price: value,
                    change,
                    change_percent: pct,
                    level: vol_level(value).to_string(),
                    interpretation: format!("NASDAQ 100 implied volatility at {:.1}", value),
                },
            );
        }
        if let Some((value, change, pct)) = gvz {
            out.insert(
                "GVZ".to_string(),
                MacroIndicator {
                    name: "Gold Volatility".to_string(),
                    price: value,
                    change,
                    change_percent: pct,
                    level: vol_level(value).to_string(),
                    interpretation: format!("Gold implied volatility at {:.1}", value),
                },
            );
        }
        if let (Some((vix_v, _, _)), Some((vix3m_v, _, _))) = (vix, vix3m) {
            if vix3m_v > 0.0 {
                out.insert(
                    "TERM_STRUCTURE".to_string(),
                    interpret_term_structure(vix_v / vix3m_v),
                );
            }
        }

        out
    }

    /// (last, change, change_percent) for an index symbol, or None.
    async fn index_quote(&self, symbol: &str) -> Option<(f64, f64, f64)> {
        let fetch = self.equity.get_ticker(Market::Futures, symbol);
        match tokio::time::timeout(PER_METRIC_TIMEOUT, fetch).await {
            Ok(Ok(t)) if t.last > 0.0 => Some((t.last, t.change, t.change_percent)),
            Ok(Ok(_)) => None,
            Ok(Err(e)) => {
                debug!("macro quote {} failed: {}", symbol, e);
                None
            }
            Err(_) => {
                debug!("macro quote {} timed out", symbol);
                None
            }
        }
    }

    async fn fetch_fear_greed(&self) -> Option<MacroIndicator> {
        let fetch = async {
            let raw: Value = self
                .http
                .get("https://api.alternative.me/fng/")
                .timeout(PER_METRIC_TIMEOUT)
                .send()
                .await
                .ok()?
                .json()
                .await
                .ok()?;
            let entry = raw["data"].as_array()?.first()?.clone();
            let value: f64 = entry["value"].as_str()?.parse().ok()?;
            let classification = entry["value_classification"]
                .as_str()
                .unwrap_or("Neutral")
                .to_string();
            Some(MacroIndicator {
                name: "Fear & Greed Index".to_string(),
                price: value,
                change: 0.0,
                change_percent: 0.0,
                level: classification.to_lowercase().replace(' ', "_"),
                interpretation: classification,
            })
        };
        tokio::time::timeout(PER_METRIC_TIMEOUT, fetch).await.ok()?
    }
}

fn vol_level(value: f64) -> &'static str {
    if value > 30.0 {
        "extreme"
    } else if value > 20.0 {
        "elevated"
    } else if value > 15.0 {
        "normal"
    } else {
        "low"
    }
}

fn interpret_vix(value: f64, change: f64, pct: f64) -> MacroIndicator {
    let (level, interpretation) = if value > 30.0 {
        ("extreme_fear", "VIX > 30 — panic conditions, risk assets under pressure")
    } else if value > 20.0 {
        ("elevated_fear", "VIX 20-30 — elevated fear, volatile sessions likely")
    } else if value > 15.0 {
        ("normal", "VIX 15-20 — normal volatility regime")
    } else {
        ("complacent", "VIX < 15 — low volatility, markets complacent")
    };
    MacroIndicator {
        name: "CBOE Volatility Index".to_string(),
        price: value,
        change,
        change_percent: pct,
        level: level.to_string(),
        interpretation: interpretation.to_string(),
    }
}

fn interpret_dxy(value: f64, change: f64, pct: f64) -> MacroIndicator {
    let (level, interpretation) = if value > 105.0 {
        (
            "strong",
            "DXY > 105 — strong dollar, bearish for EM, commodities and crypto",
        )
    } else if value < 100.0 {
        (
            "weak",
            "DXY < 100 — weak dollar, supportive for risk assets and crypto",
        )
    } else {
        ("neutral", "DXY 100-105 — dollar in neutral range")
    };
    MacroIndicator {
        name: "US Dollar Index".to_string(),
        price: value,
        change,
        change_percent: pct,
        level: level.to_string(),
        interpretation: interpretation.to_string(),
    }
}

fn interpret_tnx(value: f64, change: f64, pct: f64) -> MacroIndicator {
    let (level, interpretation) = if value > 4.5 {
        (
            "high",
            "10Y yield > 4.5% — high-rate environment, headwind for valuations",
        )
    } else if value > 3.5 {
        ("moderate", "10Y yield 3.5-4.5% — moderately restrictive")
    } else {
        ("low", "10Y yield < 3.5% — accommodative rate backdrop")
    };
    MacroIndicator {
        name: "US 10Y Treasury Yield".to_string(),
        price: value,
        change,
        change_percent: pct,
        level: level.to_string(),
        interpretation: interpretation.to_string(),
    }
}

/// Yield-curve spread built from a synthetic 2Y estimate (10Y x 0.85).
/// This is an estimate, not a quoted 2Y; the label says so.
fn interpret_yield_curve(yield_10y: f64) -> MacroIndicator {
    let yield_2y_synthetic = yield_10y * 0.85;
    let spread = yield_10y - yield_2y_synthetic;
    let (level, interpretation) = if spread < 0.0 {
        (
            "inverted",
            "Synthetic 10Y-2Y spread inverted — recession signal (2Y is an estimate)",
        )
    } else if spread < 0.3 {
        (
            "flat",
            "Synthetic 10Y-2Y spread flat — late-cycle conditions (2Y is an estimate)",
        )
    } else {
        (
            "normal",
            "Synthetic 10Y-2Y spread positive — normal curve shape (2Y is an estimate)",
        )
    };
    MacroIndicator {
        name: "Yield Curve Spread (synthetic 2Y)".to_string(),
        price: spread,
        change: 0.0,
        change_percent: 0.0,
        level: level.to_string(),
        interpretation: interpretation.to_string(),
    }
}

/// VIX/VIX3M ratio. A volatility term-structure proxy, not options flow.
fn interpret_term_structure(ratio: f64) -> MacroIndicator {
    let (level, interpretation) = if ratio > 1.0 {
        (
            "backwardation",
            "VIX above VIX3M — backwardation, acute short-term fear (term-structure proxy)",
        )
    } else if ratio > 0.9 {
        (
            "flat",
            "VIX near VIX3M — flat volatility term structure (term-structure proxy)",
        )
    } else {
        (
            "contango",
            "VIX well below VIX3M — contango, calm near-term expectations (term-structure proxy)",
        )
    };
    MacroIndicator {
        name: "VIX Term Structure (VIX/VIX3M)".to_string(),
        price: ratio,
        change: 0.0,
        change_percent: 0.0,
        level: level.to_string(),
        interpretation: interpretation.to_string(),
    }
}

/// Qualitative macro caption block for the analysis prompt.
pub fn format_macro_summary(snapshot: &MacroSnapshot, market: Market) -> String {
    if snapshot.is_empty() {
        return "Macro data unavailable.".to_string();
    }
    let mut lines = Vec::new();

    if let Some(dxy) = snapshot.get("DXY") {
        let direction = if dxy.change > 0.0 { "up" } else { "down" };
        lines.push(format!(
            "- {}: {:.2} ({} {:.2}%)",
            dxy.name,
            dxy.price,
            direction,
            dxy.change_percent.abs()
        ));
        if market == Market::Crypto {
            let impact = if dxy.change > 0.0 {
                "bearish for crypto"
            } else {
                "supportive for crypto"
            };
            lines.push(format!("  Dollar {} — {}", direction, impact));
        } else if market == Market::Forex {
            lines.push(format!("  Dollar {} — drives FX crosses directly", direction));
        }
    }
    if let Some(vix) = snapshot.get("VIX") {
        lines.push(format!("- {}: {:.2} — {}", vix.name, vix.price, vix.interpretation));
    }
    if let Some(tnx) = snapshot.get("TNX") {
        let direction = if tnx.change > 0.0 { "rising" } else { "falling" };
        lines.push(format!(
            "- {}: {:.3}% ({}) — {}",
            tnx.name, tnx.price, direction, tnx.interpretation
        ));
    }
    if let Some(fg) = snapshot.get("FEAR_GREED") {
        lines.push(format!("- {}: {:.0} ({})", fg.name, fg.price, fg.interpretation));
    }
    if let Some(ts) = snapshot.get("TERM_STRUCTURE") {
        lines.push(format!("- {}: {:.2} — {}", ts.name, ts.price, ts.interpretation));
    }

    if lines.is_empty() {
        "Macro data unavailable.".to_string()
    } else {
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vix_bands() {
        assert_eq!(interpret_vix(35.0, 0.0, 0.0).level, "extreme_fear");
        assert_eq!(interpret_vix(25.0, 0.0, 0.0).level, "elevated_fear");
        assert_eq!(interpret_vix(17.0, 0.0, 0.0).level, "normal");
        assert_eq!(interpret_vix(12.0, 0.0, 0.0).level, "complacent");
    }

    #[test]
    fn dxy_bands() {
        assert_eq!(interpret_dxy(106.0, 0.1, 0.1).level, "strong");
        assert_eq!(interpret_dxy(98.0, -0.1, -0.1).level, "weak");
        assert_eq!(interpret_dxy(102.0, 0.0, 0.0).level, "neutral");
    }

    #[test]
    fn synthetic_curve_is_labelled() {
        let yc = interpret_yield_curve(4.0);
        assert!(yc.interpretation.contains("estimate"));
        assert!((yc.price - 0.6).abs() < 1e-9);
    }

    #[test]
    fn term_structure_backwardation_above_one() {
        assert_eq!(interpret_term_structure(1.1).level, "backwardation");
        assert_eq!(interpret_term_structure(0.85).level, "contango");
    }

    #[test]
    fn macro_summary_mentions_crypto_impact() {
        let mut snap = MacroSnapshot::new();
        snap.insert("DXY".to_string(), interpret_dxy(106.0, 0.5, 0.4));
        let text = format_macro_summary(&snap, Market::Crypto);
        assert!(text.contains("bearish for crypto"));
    }

    #[test]
    fn empty_snapshot_has_placeholder() {
        assert_eq!(
            format_macro_summary(&MacroSnapshot::new(), Market::Crypto),
            "Macro data unavailable."
        );
    }
}
