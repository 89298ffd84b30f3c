use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Trading decision emitted by the analysis engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    #[serde(rename = "BUY")]
    Buy,
    #[serde(rename = "SELL")]
    Sell,
    #[serde(rename = "HOLD")]
    Hold,
}

impl Default for Decision {
    fn default() -> Self {
        Self::Hold
    }
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
            Self::Hold => "HOLD",
        }
    }

    /// Lenient normalization: uppercased, anything unknown collapses to HOLD.
    pub fn normalize(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "BUY" => Self::Buy,
            "SELL" => Self::Sell,
            _ => Self::Hold,
        }
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Decision {
    type Err = &'static str;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "BUY" => Ok(Self::Buy),
            "SELL" => Ok(Self::Sell),
            "HOLD" => Ok(Self::Hold),
            _ => Err("invalid decision; expected BUY|SELL|HOLD"),
        }
    }
}

/// Suggested holding horizon for the trading plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanHorizon {
    Short,
    Medium,
    Long,
}

impl Default for PlanHorizon {
    fn default() -> Self {
        Self::Medium
    }
}

impl PlanHorizon {
    pub fn normalize(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "short" => Self::Short,
            "long" => Self::Long,
            _ => Self::Medium,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetailedAnalysis {
    pub technical: String,
    pub fundamental: String,
    pub sentiment: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingPlan {
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    /// Percent of capital to commit, 1..=100
    pub position_size_pct: i32,
    pub timeframe: PlanHorizon,
}

impl Default for TradingPlan {
    fn default() -> Self {
        Self {
            entry_price: 0.0,
            stop_loss: 0.0,
            take_profit: 0.0,
            position_size_pct: 10,
            timeframe: PlanHorizon::Medium,
        }
    }
}

/// Per-pillar scores, each clamped to [0, 100].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scores {
    pub technical: i32,
    pub fundamental: i32,
    pub sentiment: i32,
    pub overall: i32,
}

impl Default for Scores {
    fn default() -> Self {
        Self {
            technical: 50,
            fundamental: 50,
            sentiment: 50,
            overall: 50,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub current_price: f64,
    pub change_24h: f64,
    pub support: Option<f64>,
    pub resistance: Option<f64>,
}

/// Full output of one fast-analysis run, persisted as a memory record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub market: String,
    pub symbol: String,
    pub language: String,
    pub timeframe: String,
    pub decision: Decision,
    pub confidence: i32,
    pub summary: String,
    pub detailed_analysis: DetailedAnalysis,
    pub trading_plan: TradingPlan,
    pub reasons: Vec<String>,
    pub risks: Vec<String>,
    pub scores: Scores,
    pub market_data: MarketSnapshot,
    pub indicators: serde_json::Value,
    pub analysis_time_ms: i64,
    pub llm_time_ms: i64,
    pub data_collection_time_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AnalysisResult {
    /// Placeholder result used when analysis cannot proceed; decision is HOLD
    /// and the error field carries the cause.
    pub fn failed(market: &str, symbol: &str, language: &str, timeframe: &str, error: String) -> Self {
        Self {
            market: market.to_string(),
            symbol: symbol.to_string(),
            language: language.to_string(),
            timeframe: timeframe.to_string(),
            decision: Decision::Hold,
            confidence: 50,
            summary: String::new(),
            detailed_analysis: DetailedAnalysis::default(),
            trading_plan: TradingPlan::default(),
            reasons: Vec::new(),
            risks: Vec::new(),
            scores: Scores::default(),
            market_data: MarketSnapshot::default(),
            indicators: serde_json::Value::Null,
            analysis_time_ms: 0,
            llm_time_ms: 0,
            data_collection_time_ms: 0,
            memory_id: None,
            error: Some(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_normalize_collapses_unknown_to_hold() {
        assert_eq!(Decision::normalize("buy"), Decision::Buy);
        assert_eq!(Decision::normalize(" SELL "), Decision::Sell);
        assert_eq!(Decision::normalize("ACCUMULATE"), Decision::Hold);
        assert_eq!(Decision::normalize(""), Decision::Hold);
    }

    #[test]
    fn plan_horizon_defaults_to_medium() {
        assert_eq!(PlanHorizon::normalize("short"), PlanHorizon::Short);
        assert_eq!(PlanHorizon::normalize("weird"), PlanHorizon::Medium);
    }

    #[test]
    fn failed_result_is_hold_with_error() {
        let r = AnalysisResult::failed("Crypto", "BTC/USDT", "en-US", "1D", "no price".into());
        assert_eq!(r.decision, Decision::Hold);
        assert_eq!(r.error.as_deref(), Some("no price"));
    }
}
