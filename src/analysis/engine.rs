//! Fast analysis engine: one data collection, one LLM call, hard validation.

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

use super::memory::AnalysisMemory;
use super::prompt::build_analysis_prompt;
use crate::collector::{CollectOptions, MarketDataCollector};
use crate::domain::{
    AnalysisResult, Decision, DetailedAnalysis, Language, Market, MarketSnapshot, PlanHorizon,
    Scores, Timeframe, TradingPlan,
};
use crate::error::Result;
use crate::llm::{ChatMessage, LlmClient};

pub struct FastAnalysisEngine {
    collector: Arc<MarketDataCollector>,
    llm: Arc<LlmClient>,
    memory: Arc<AnalysisMemory>,
}

impl FastAnalysisEngine {
    pub fn new(
        collector: Arc<MarketDataCollector>,
        llm: Arc<LlmClient>,
        memory: Arc<AnalysisMemory>,
    ) -> Self {
        Self {
            collector,
            llm,
            memory,
        }
    }

    /// Run one full analysis. Failures degrade into a HOLD result with the
    /// `error` field set rather than an Err; callers always get a record.
    pub async fn analyze(
        &self,
        market: Market,
        symbol: &str,
        language: Language,
        model: Option<&str>,
        timeframe: Timeframe,
    ) -> Result<AnalysisResult> {
        let started = Instant::now();
        info!("fast analysis starting: {}:{}", market, symbol);

        // Phase 1: data collection
        let collect_started = Instant::now();
        let data = self
            .collector
            .collect_all(market, symbol, timeframe, CollectOptions::default())
            .await;
        let collection_ms = collect_started.elapsed().as_millis() as i64;

        let Some(current_price) = data.effective_price() else {
            error!("price fetch failed for {}:{}, all sources exhausted", market, symbol);
            return Ok(AnalysisResult::failed(
                market.as_str(),
                symbol,
                language.as_str(),
                timeframe.as_str(),
                "Failed to fetch current price from all sources".to_string(),
            ));
        };

        // Phase 2: prompt construction, with similar historical patterns
        // appended when memory has validated precedents
        let (system_prompt, mut user_prompt) =
            build_analysis_prompt(&data, language, market, current_price);
        match self
            .memory
            .get_similar_patterns(market.as_str(), symbol, data.indicators.as_ref(), 3)
            .await
        {
            Ok(patterns) if !patterns.is_empty() => {
                user_prompt.push_str("\n\nHISTORICAL PATTERNS (similar conditions):\n");
                user_prompt.push_str(&format_memory_context(&patterns));
            }
            Ok(_) => {}
            Err(e) => error!("memory retrieval failed: {}", e),
        }

        // Phase 3: the single LLM call, degrading to a safe default
        let llm_started = Instant::now();
        let default = default_structure(current_price);
        let raw = self
            .llm
            .safe_chat_json(
                vec![
                    ChatMessage::system(system_prompt),
                    ChatMessage::user(user_prompt),
                ],
                model,
                default,
            )
            .await;
        let llm_ms = llm_started.elapsed().as_millis() as i64;
        info!("LLM call completed in {}ms", llm_ms);

        // Phase 4: validation and clamping
        let constrained = validate_and_constrain(raw, current_price);

        let change_24h = data.price.as_ref().map(|p| p.change_percent).unwrap_or(0.0);
        let support = data.indicators.as_ref().map(|i| i.levels.support);
        let resistance = data.indicators.as_ref().map(|i| i.levels.resistance);

        let mut result = AnalysisResult {
            market: market.as_str().to_string(),
            symbol: symbol.to_string(),
            language: language.as_str().to_string(),
            timeframe: timeframe.as_str().to_string(),
            decision: constrained.decision,
            confidence: constrained.confidence,
            summary: constrained.summary,
            detailed_analysis: constrained.detailed_analysis,
            trading_plan: constrained.trading_plan,
            reasons: constrained.reasons,
            risks: constrained.risks,
            scores: Scores {
                technical: constrained.technical_score,
                fundamental: constrained.fundamental_score,
                sentiment: constrained.sentiment_score,
                overall: overall_score(
                    constrained.technical_score,
                    constrained.fundamental_score,
                    constrained.sentiment_score,
                    constrained.decision,
                    constrained.confidence,
                ),
            },
            market_data: MarketSnapshot {
                current_price,
                change_24h,
                support,
                resistance,
            },
            indicators: serde_json::to_value(&data.indicators).unwrap_or(Value::Null),
            analysis_time_ms: started.elapsed().as_millis() as i64,
            llm_time_ms: llm_ms,
            data_collection_time_ms: collection_ms,
            memory_id: None,
            error: None,
        };

        // Persist before returning so feedback can reference the record
        match self.memory.store(&result).await {
            Ok(id) => result.memory_id = Some(id),
            Err(e) => error!("memory storage failed: {}", e),
        }
        if let Err(e) = self.memory.log_task(&result, model).await {
            error!("task log write failed: {}", e);
        }

        info!(
            "fast analysis completed in {}ms: {}:{} -> {} (memory_id={:?})",
            result.analysis_time_ms, market, symbol, result.decision, result.memory_id
        );
        Ok(result)
    }
}

/// Render similar validated decisions for the prompt.
fn format_memory_context(patterns: &[super::memory::SimilarPattern]) -> String {
    patterns
        .iter()
        .map(|p| {
            let outcome = match p.was_correct {
                Some(true) => {
                    let ret = p
                        .actual_return_pct
                        .map(|r| format!(", return {:.2}%", r))
                        .unwrap_or_default();
                    format!(" (outcome: correct{})", ret)
                }
                Some(false) => {
                    let ret = p
                        .actual_return_pct
                        .map(|r| format!(", return {:.2}%", r))
                        .unwrap_or_default();
                    format!(" (outcome: incorrect{})", ret)
                }
                None => String::new(),
            };
            let price = p
                .price
                .map(|x| format!("${:.4}", x))
                .unwrap_or_else(|| "N/A".to_string());
            format!("- Decision: {} at {}{}", p.decision, price, outcome)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Safe fallback structure when the LLM call fails outright.
fn default_structure(current_price: f64) -> Value {
    json!({
        "decision": "HOLD",
        "confidence": 50,
        "summary": "Analysis failed",
        "entry_price": current_price,
        "stop_loss": current_price * 0.95,
        "take_profit": current_price * 1.05,
        "position_size_pct": 10,
        "timeframe": "medium",
        "key_reasons": ["Unable to analyze"],
        "risks": ["Analysis error"],
        "technical_score": 50,
        "fundamental_score": 50,
        "sentiment_score": 50,
    })
}

#[derive(Debug)]
pub struct ConstrainedAnalysis {
    pub decision: Decision,
    pub confidence: i32,
    pub summary: String,
    pub detailed_analysis: DetailedAnalysis,
    pub trading_plan: TradingPlan,
    pub reasons: Vec<String>,
    pub risks: Vec<String>,
    pub technical_score: i32,
    pub fundamental_score: i32,
    pub sentiment_score: i32,
}

/// Validate LLM output and constrain prices to sane ranges. Keeps an absurd
/// model suggestion ("BTC at 95000, buy at 75000") from reaching a user.
pub fn validate_and_constrain(raw: Value, current_price: f64) -> ConstrainedAnalysis {
    let min_price = current_price * 0.90;
    let max_price = current_price * 1.10;

    let mut entry = raw["entry_price"].as_f64().unwrap_or(current_price);
    if !(min_price..=max_price).contains(&entry) || entry <= 0.0 {
        entry = current_price;
    }

    let mut stop_loss = raw["stop_loss"].as_f64().unwrap_or(current_price * 0.95);
    if stop_loss < min_price || stop_loss > current_price || stop_loss <= 0.0 {
        stop_loss = current_price * 0.95;
    }

    let mut take_profit = raw["take_profit"].as_f64().unwrap_or(current_price * 1.05);
    if take_profit < current_price || take_profit > max_price || take_profit <= 0.0 {
        take_profit = current_price * 1.05;
    }

    let confidence = clamp_score(raw["confidence"].as_f64().unwrap_or(50.0));
    let technical_score = clamp_score(raw["technical_score"].as_f64().unwrap_or(50.0));
    let fundamental_score = clamp_score(raw["fundamental_score"].as_f64().unwrap_or(50.0));
    let sentiment_score = clamp_score(raw["sentiment_score"].as_f64().unwrap_or(50.0));

    let decision = Decision::normalize(raw["decision"].as_str().unwrap_or("HOLD"));

    let position_size_pct = raw["position_size_pct"]
        .as_f64()
        .unwrap_or(10.0)
        .clamp(1.0, 100.0) as i32;

    // The analysis block may come back as a plain string; keep it as the
    // technical section in that case.
    let detailed_analysis = match &raw["analysis"] {
        Value::String(s) => DetailedAnalysis {
            technical: s.clone(),
            ..DetailedAnalysis::default()
        },
        obj => DetailedAnalysis {
            technical: obj["technical"].as_str().unwrap_or_default().to_string(),
            fundamental: obj["fundamental"].as_str().unwrap_or_default().to_string(),
            sentiment: obj["sentiment"].as_str().unwrap_or_default().to_string(),
        },
    };

    ConstrainedAnalysis {
        decision,
        confidence,
        summary: raw["summary"].as_str().unwrap_or_default().to_string(),
        detailed_analysis,
        trading_plan: TradingPlan {
            entry_price: entry,
            stop_loss,
            take_profit,
            position_size_pct,
            timeframe: PlanHorizon::normalize(raw["timeframe"].as_str().unwrap_or("medium")),
        },
        reasons: string_array(&raw["key_reasons"]),
        risks: string_array(&raw["risks"]),
        technical_score,
        fundamental_score,
        sentiment_score,
    }
}

fn string_array(v: &Value) -> Vec<String> {
    v.as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|x| x.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

fn clamp_score(x: f64) -> i32 {
    (x as i32).clamp(0, 100)
}

/// Weighted overall score: pillar blend tilted by decision and confidence.
pub fn overall_score(
    technical: i32,
    fundamental: i32,
    sentiment: i32,
    decision: Decision,
    confidence: i32,
) -> i32 {
    let pillars =
        technical as f64 * 0.40 + fundamental as f64 * 0.35 + sentiment as f64 * 0.25;
    let overall = match decision {
        Decision::Buy => pillars * 0.6 + (50.0 + confidence as f64 * 0.5) * 0.4,
        Decision::Sell => pillars * 0.6 + (50.0 - confidence as f64 * 0.5) * 0.4,
        Decision::Hold => pillars,
    };
    (overall as i32).clamp(0, 100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_corridor_entry_is_recentered() {
        let raw = json!({
            "decision": "BUY",
            "entry_price": 75000.0,
            "stop_loss": 70000.0,
            "take_profit": 120000.0,
        });
        let c = validate_and_constrain(raw, 95000.0);
        assert_eq!(c.trading_plan.entry_price, 95000.0);
        assert_eq!(c.trading_plan.stop_loss, 95000.0 * 0.95);
        assert_eq!(c.trading_plan.take_profit, 95000.0 * 1.05);
    }

    #[test]
    fn stop_above_current_is_reset() {
        let raw = json!({"stop_loss": 96000.0, "take_profit": 97000.0});
        let c = validate_and_constrain(raw, 95000.0);
        assert!(c.trading_plan.stop_loss <= 95000.0);
        assert!(c.trading_plan.take_profit >= 95000.0);
    }

    #[test]
    fn in_corridor_values_pass_through() {
        let raw = json!({
            "decision": "SELL",
            "entry_price": 95500.0,
            "stop_loss": 93000.0,
            "take_profit": 99000.0,
            "confidence": 72,
        });
        let c = validate_and_constrain(raw, 95000.0);
        assert_eq!(c.trading_plan.entry_price, 95500.0);
        assert_eq!(c.trading_plan.stop_loss, 93000.0);
        assert_eq!(c.trading_plan.take_profit, 99000.0);
        assert_eq!(c.decision, Decision::Sell);
        assert_eq!(c.confidence, 72);
    }

    #[test]
    fn scores_and_confidence_clamped() {
        let raw = json!({
            "confidence": 250,
            "technical_score": -10,
            "fundamental_score": 130,
            "sentiment_score": 55,
        });
        let c = validate_and_constrain(raw, 100.0);
        assert_eq!(c.confidence, 100);
        assert_eq!(c.technical_score, 0);
        assert_eq!(c.fundamental_score, 100);
        assert_eq!(c.sentiment_score, 55);
    }

    #[test]
    fn unknown_decision_collapses_to_hold() {
        let c = validate_and_constrain(json!({"decision": "ACCUMULATE"}), 100.0);
        assert_eq!(c.decision, Decision::Hold);
    }

    #[test]
    fn string_analysis_block_becomes_technical() {
        let c = validate_and_constrain(
            json!({"analysis": "pure text analysis"}),
            100.0,
        );
        assert_eq!(c.detailed_analysis.technical, "pure text analysis");
        assert!(c.detailed_analysis.fundamental.is_empty());
    }

    #[test]
    fn overall_score_tilts_by_decision() {
        let buy = overall_score(60, 60, 60, Decision::Buy, 80);
        let hold = overall_score(60, 60, 60, Decision::Hold, 80);
        let sell = overall_score(60, 60, 60, Decision::Sell, 80);
        assert!(buy > hold);
        assert!(sell < hold);
        // pillars = 60; buy = 60*0.6 + 90*0.4 = 72
        assert_eq!(buy, 72);
        assert_eq!(hold, 60);
        assert_eq!(sell, 36 + 4); // 60*0.6 + 10*0.4
    }

    #[test]
    fn overall_score_clamped_to_bounds() {
        assert_eq!(overall_score(100, 100, 100, Decision::Buy, 100), 100);
        assert!(overall_score(0, 0, 0, Decision::Sell, 100) >= 0);
    }

    #[test]
    fn memory_context_renders_outcomes() {
        let patterns = vec![
            crate::analysis::SimilarPattern {
                id: 1,
                decision: "BUY".to_string(),
                confidence: 70,
                price: Some(95000.0),
                summary: None,
                was_correct: Some(true),
                actual_return_pct: Some(3.2),
                rsi_match: true,
                macd_match: false,
            },
            crate::analysis::SimilarPattern {
                id: 2,
                decision: "SELL".to_string(),
                confidence: 60,
                price: None,
                summary: None,
                was_correct: None,
                actual_return_pct: None,
                rsi_match: false,
                macd_match: true,
            },
        ];
        let text = format_memory_context(&patterns);
        assert!(text.contains("Decision: BUY at $95000.0000 (outcome: correct, return 3.20%)"));
        assert!(text.contains("Decision: SELL at N/A"));
    }
}
