use serde::{Deserialize, Serialize};

/// Side of a prediction-market opportunity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recommendation {
    #[serde(rename = "YES")]
    Yes,
    #[serde(rename = "NO")]
    No,
    #[serde(rename = "HOLD")]
    Hold,
}

impl Default for Recommendation {
    fn default() -> Self {
        Self::Hold
    }
}

impl Recommendation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Yes => "YES",
            Self::No => "NO",
            Self::Hold => "HOLD",
        }
    }

    /// Decision rule: take a side only when the AI view diverges by more than
    /// 5 points and confidence clears 60.
    pub fn from_divergence(divergence: f64, confidence: f64) -> Self {
        if divergence > 5.0 && confidence > 60.0 {
            Self::Yes
        } else if divergence < -5.0 && confidence > 60.0 {
            Self::No
        } else {
            Self::Hold
        }
    }
}

impl std::fmt::Display for Recommendation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Recommendation {
    type Err = &'static str;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "YES" => Ok(Self::Yes),
            "NO" => Ok(Self::No),
            "HOLD" => Ok(Self::Hold),
            _ => Err("invalid recommendation; expected YES|NO|HOLD"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    /// Low confidence or a very large divergence both read as elevated risk.
    pub fn assess(confidence: f64, divergence_abs: f64) -> Self {
        if confidence < 50.0 || divergence_abs > 30.0 {
            Self::High
        } else if confidence < 70.0 || divergence_abs > 15.0 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

/// One event market as listed by the prediction-market venue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionMarket {
    pub market_id: String,
    pub question: String,
    pub category: String,
    /// Implied YES probability, 0..=100
    pub current_probability: f64,
    pub volume_24h: f64,
    pub liquidity: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date_iso: Option<String>,
    pub status: String,
    #[serde(default)]
    pub outcome_tokens: serde_json::Value,
    /// Human slug; never a bare numeric id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    pub polymarket_url: String,
}

/// AI divergence record for one event market.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionAnalysis {
    pub market_id: String,
    pub ai_predicted_probability: f64,
    pub market_probability: f64,
    /// ai_predicted_probability - market_probability
    pub divergence: f64,
    pub recommendation: Recommendation,
    pub confidence_score: f64,
    pub opportunity_score: f64,
    pub reasoning: String,
    pub key_factors: Vec<String>,
    pub risk_factors: Vec<String>,
    pub related_assets: Vec<String>,
    pub risk_level: RiskLevel,
}

/// Opportunity score: divergence contributes up to 40 points, confidence up
/// to 60, both clamped into [0, 100].
pub fn opportunity_score(ai_prob: f64, market_prob: f64, confidence: f64) -> f64 {
    let divergence_score = ((ai_prob - market_prob).abs() * 2.0).min(40.0);
    let confidence_score = confidence * 0.6;
    ((divergence_score + confidence_score) * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recommendation_rule_thresholds() {
        assert_eq!(
            Recommendation::from_divergence(10.0, 75.0),
            Recommendation::Yes
        );
        assert_eq!(
            Recommendation::from_divergence(-8.0, 65.0),
            Recommendation::No
        );
        // divergence too small
        assert_eq!(
            Recommendation::from_divergence(4.0, 90.0),
            Recommendation::Hold
        );
        // confidence too low
        assert_eq!(
            Recommendation::from_divergence(20.0, 55.0),
            Recommendation::Hold
        );
    }

    #[test]
    fn opportunity_score_caps_divergence_at_40() {
        // |div| = 30 -> 60 capped to 40; confidence 75 -> 45
        assert_eq!(opportunity_score(80.0, 50.0, 75.0), 85.0);
        // small divergence contributes linearly: |div|=10 -> 20
        assert_eq!(opportunity_score(60.0, 50.0, 50.0), 50.0);
    }

    #[test]
    fn risk_level_assessment() {
        assert_eq!(RiskLevel::assess(45.0, 10.0), RiskLevel::High);
        assert_eq!(RiskLevel::assess(80.0, 35.0), RiskLevel::High);
        assert_eq!(RiskLevel::assess(65.0, 10.0), RiskLevel::Medium);
        assert_eq!(RiskLevel::assess(80.0, 20.0), RiskLevel::Medium);
        assert_eq!(RiskLevel::assess(80.0, 10.0), RiskLevel::Low);
    }
}
