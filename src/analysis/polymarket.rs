//! Prediction-market analyzer: AI probability vs market-implied probability,
//! single-market and batch paths.

use serde_json::{json, Value};
use sqlx::postgres::PgPool;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::cache::TtlCache;
use crate::collector::{CollectOptions, MarketDataCollector};
use crate::datasource::PolymarketSource;
use crate::domain::{
    opportunity_score, Language, Market, PredictionAnalysis, PredictionMarket, Recommendation,
    RiskLevel, Timeframe,
};
use crate::error::{QuantdeskError, Result};
use crate::llm::{ChatMessage, LlmClient};

const ANALYSIS_CACHE_TTL: Duration = Duration::from_secs(30 * 60);
const BATCH_PROMPT_CAP: usize = 50;

/// Result of one LLM probability estimate, already clamped.
#[derive(Debug, Clone)]
struct AiProbability {
    predicted_probability: f64,
    confidence: f64,
    reasoning: String,
    key_factors: Vec<String>,
    risk_factors: Vec<String>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct BatchOpportunity {
    #[serde(flatten)]
    pub market: PredictionMarket,
    pub ai_analysis: BatchAnalysis,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct BatchAnalysis {
    pub predicted_probability: f64,
    pub recommendation: Recommendation,
    pub confidence_score: f64,
    pub opportunity_score: f64,
    pub divergence: f64,
    pub reasoning: String,
    pub key_factors: Vec<String>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AssetOpportunity {
    pub asset: String,
    pub market: String,
    pub signal: String,
    pub confidence: f64,
    pub reasoning: String,
}

pub struct PolymarketAnalyzer {
    llm: Arc<LlmClient>,
    collector: Arc<MarketDataCollector>,
    source: Arc<PolymarketSource>,
    pool: PgPool,
    /// AI analyses keyed (market_id, user_id-or-none), 30-minute TTL
    analysis_cache: TtlCache<(String, Option<i64>), PredictionAnalysis>,
}

impl PolymarketAnalyzer {
    pub fn new(
        llm: Arc<LlmClient>,
        collector: Arc<MarketDataCollector>,
        source: Arc<PolymarketSource>,
        pool: PgPool,
    ) -> Self {
        Self {
            llm,
            collector,
            source,
            pool,
            analysis_cache: TtlCache::new(ANALYSIS_CACHE_TTL),
        }
    }

    /// Analyze one event market. With `use_cache`, a recent analysis (under
    /// 30 minutes) for the same `(market_id, user)` is reused.
    pub async fn analyze_market(
        &self,
        market_id: &str,
        user_id: Option<i64>,
        use_cache: bool,
        language: Language,
        model: Option<&str>,
    ) -> Result<PredictionAnalysis> {
        let market = self
            .source
            .get_market_details(market_id)
            .await?
            .ok_or_else(|| {
                QuantdeskError::MarketDataUnavailable(format!("market {} not found", market_id))
            })?;

        let cache_key = (market_id.to_string(), user_id);
        if use_cache {
            if let Some(cached) = self.analysis_cache.get(&cache_key) {
                debug!("using cached analysis for market {}", market_id);
                return Ok(cached);
            }
            if let Some(cached) = self.cached_analysis_from_db(market_id, user_id).await {
                self.analysis_cache.insert(cache_key.clone(), cached.clone());
                return Ok(cached);
            }
        }

        // Related-asset context. Collections from inside a prediction-market
        // analysis must not include prediction markets again.
        let related_assets = identify_related_assets(&market.question);
        let asset_data = self.collect_first_asset(&related_assets).await;

        let ai = self
            .predict_probability(&market, asset_data.as_ref(), language, model)
            .await;

        let divergence = ai.predicted_probability - market.current_probability;
        let analysis = PredictionAnalysis {
            market_id: market_id.to_string(),
            ai_predicted_probability: ai.predicted_probability,
            market_probability: market.current_probability,
            divergence,
            recommendation: Recommendation::from_divergence(divergence, ai.confidence),
            confidence_score: ai.confidence,
            opportunity_score: opportunity_score(
                ai.predicted_probability,
                market.current_probability,
                ai.confidence,
            ),
            reasoning: ai.reasoning,
            key_factors: ai.key_factors,
            risk_factors: ai.risk_factors,
            related_assets,
            risk_level: RiskLevel::assess(ai.confidence, divergence.abs()),
        };

        self.save_analysis(&analysis, &market, user_id, language, model)
            .await;
        self.analysis_cache.insert(cache_key, analysis.clone());
        Ok(analysis)
    }

    /// Batch path: ship a compact summary of up to 50 markets in one prompt
    /// and let the model pick; fall back to the volume/deviation rule when
    /// the output is malformed.
    pub async fn batch_analyze_markets(
        &self,
        markets: Vec<PredictionMarket>,
        max_opportunities: usize,
    ) -> Vec<BatchOpportunity> {
        if markets.is_empty() {
            return Vec::new();
        }

        let summary = build_markets_summary(&markets);
        let prompt = format!(
            r#"You are a professional prediction-market analyst. Review the
market list below and select the ones with genuine trading opportunity.

Market list:
{summary}

Evaluate each market on:
1. Activity: is volume and liquidity sufficient
2. Probability deviation: how far the implied probability sits from a
   reasonable expectation (further from 50% can mean more opportunity)
3. Event importance and market impact
4. Settlement window: neither too close nor too far
5. Information asymmetry or apparent mispricing

Return JSON:
{{
    "opportunities": [
        {{
            "market_id": "id",
            "predicted_probability": 62.5,
            "opportunity_score": 85,
            "reason": "one-line rationale",
            "recommendation": "YES" | "NO" | "HOLD",
            "confidence": 75,
            "key_factors": ["factor 1", "factor 2"]
        }}
    ]
}}

Rules:
- Return at most {max_opportunities} opportunities
- Only include opportunity_score >= 60
- Prefer high volume plus a clear probability deviation plus high confidence
- Keep reasons short"#,
        );

        info!(
            "batch analyzing {} markets, requesting {} opportunities",
            markets.len(),
            max_opportunities
        );
        let raw = self
            .llm
            .chat_json(
                vec![
                    ChatMessage::system(
                        "You are a professional prediction-market analyst skilled at quickly \
                         sifting large market lists for real edge. Be objective; only recommend \
                         genuine opportunities.",
                    ),
                    ChatMessage::user(prompt),
                ],
                None,
            )
            .await;

        let opportunities = match raw {
            Ok(v) => v["opportunities"].as_array().cloned().unwrap_or_default(),
            Err(e) => {
                warn!("batch LLM analysis failed: {}, using fallback rule", e);
                return fallback_batch_analysis(markets, max_opportunities);
            }
        };
        if opportunities.is_empty() {
            warn!("LLM returned no opportunities, using fallback rule");
            return fallback_batch_analysis(markets, max_opportunities);
        }

        let by_id: std::collections::HashMap<String, &Value> = opportunities
            .iter()
            .filter_map(|o| o["market_id"].as_str().map(|id| (id.to_string(), o)))
            .collect();

        let mut out = Vec::new();
        for market in markets {
            let Some(opp) = by_id.get(&market.market_id) else {
                continue;
            };
            let predicted = opp["predicted_probability"]
                .as_f64()
                .unwrap_or(market.current_probability)
                .clamp(0.0, 100.0);
            let divergence = predicted - market.current_probability;
            out.push(BatchOpportunity {
                ai_analysis: BatchAnalysis {
                    predicted_probability: predicted,
                    recommendation: Recommendation::from_str(
                        opp["recommendation"].as_str().unwrap_or("HOLD"),
                    )
                    .unwrap_or(Recommendation::Hold),
                    confidence_score: opp["confidence"].as_f64().unwrap_or(0.0).clamp(0.0, 100.0),
                    opportunity_score: opp["opportunity_score"]
                        .as_f64()
                        .unwrap_or(0.0)
                        .clamp(0.0, 100.0),
                    divergence,
                    reasoning: opp["reason"].as_str().unwrap_or_default().to_string(),
                    key_factors: string_array(&opp["key_factors"]),
                },
                market,
            });
        }

        out.sort_by(|a, b| {
            b.ai_analysis
                .opportunity_score
                .partial_cmp(&a.ai_analysis.opportunity_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        out.truncate(max_opportunities);
        info!("batch analysis completed: {} opportunities identified", out.len());
        out
    }

    /// Persist batch results, replacing earlier user-agnostic rows.
    pub async fn save_batch_analysis(&self, opportunities: &[BatchOpportunity]) {
        for opp in opportunities {
            if let Err(e) = sqlx::query(
                "DELETE FROM qd_polymarket_ai_analysis WHERE market_id = $1 AND user_id IS NULL",
            )
            .bind(&opp.market.market_id)
            .execute(&self.pool)
            .await
            {
                warn!("failed to clear old batch analysis: {}", e);
                continue;
            }
            let insert = sqlx::query(
                r#"
                INSERT INTO qd_polymarket_ai_analysis
                    (market_id, user_id, ai_predicted_probability, market_probability,
                     divergence, recommendation, confidence_score, opportunity_score,
                     reasoning, key_factors, related_assets, created_at)
                VALUES ($1, NULL, $2, $3, $4, $5, $6, $7, $8, $9, $10, NOW())
                "#,
            )
            .bind(&opp.market.market_id)
            .bind(opp.ai_analysis.predicted_probability)
            .bind(opp.market.current_probability)
            .bind(opp.ai_analysis.divergence)
            .bind(opp.ai_analysis.recommendation.as_str())
            .bind(opp.ai_analysis.confidence_score)
            .bind(opp.ai_analysis.opportunity_score)
            .bind(&opp.ai_analysis.reasoning)
            .bind(serde_json::to_value(&opp.ai_analysis.key_factors).unwrap_or(Value::Null))
            .bind(Value::Array(Vec::new()))
            .execute(&self.pool)
            .await;
            if let Err(e) = insert {
                warn!(
                    "failed to save batch analysis for {}: {}",
                    opp.market.market_id, e
                );
            }
        }
    }

    /// Asset-side opportunities derived from an event analysis: blend the
    /// event recommendation with each related asset's technical trend.
    pub async fn generate_asset_opportunities(
        &self,
        market_id: &str,
        language: Language,
    ) -> Result<Vec<AssetOpportunity>> {
        let analysis = self
            .analyze_market(market_id, None, true, language, None)
            .await?;
        if analysis.related_assets.is_empty() {
            return Ok(Vec::new());
        }

        let mut opportunities = Vec::new();
        for asset in &analysis.related_assets {
            let market_type = infer_market(asset);
            let data = self
                .collector
                .collect_all(
                    market_type,
                    asset,
                    Timeframe::D1,
                    CollectOptions {
                        include_polymarket: false,
                        ..CollectOptions::default()
                    },
                )
                .await;

            let (trend, tech_confidence, tech_summary) = technical_trend(&data.indicators);
            let signal = match analysis.recommendation {
                Recommendation::Yes if trend == "bullish" => "BUY",
                Recommendation::No if trend == "bearish" => "SELL",
                _ => "HOLD",
            };
            let confidence = analysis.confidence_score * 0.6 + tech_confidence * 0.4;

            if signal != "HOLD" && confidence > 60.0 {
                opportunities.push(AssetOpportunity {
                    asset: asset.clone(),
                    market: market_type.as_str().to_string(),
                    signal: signal.to_string(),
                    confidence: (confidence * 100.0).round() / 100.0,
                    reasoning: format!(
                        "Event view: {}. Technicals: {}",
                        truncate(&analysis.reasoning, 200),
                        tech_summary
                    ),
                });
            }
        }

        if !opportunities.is_empty() {
            self.save_opportunities(market_id, &opportunities).await;
        }
        Ok(opportunities)
    }

    async fn collect_first_asset(
        &self,
        assets: &[String],
    ) -> Option<crate::collector::CollectedMarketData> {
        let asset = assets.first()?;
        let market = infer_market(asset);
        Some(
            self.collector
                .collect_all(
                    market,
                    asset,
                    Timeframe::D1,
                    CollectOptions {
                        include_polymarket: false,
                        ..CollectOptions::default()
                    },
                )
                .await,
        )
    }

    async fn predict_probability(
        &self,
        market: &PredictionMarket,
        asset_data: Option<&crate::collector::CollectedMarketData>,
        language: Language,
        model: Option<&str>,
    ) -> AiProbability {
        let is_english = matches!(language, Language::EnUs | Language::JaJp);

        let news_text = asset_data
            .map(|d| {
                d.news
                    .iter()
                    .take(5)
                    .map(|n| format!("- {}", truncate(&n.headline, 100)))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "No related news available".to_string());

        let asset_text = asset_data
            .and_then(|d| {
                let price = d.effective_price()?;
                let rsi = d
                    .indicators
                    .as_ref()
                    .and_then(|i| i.rsi.as_ref())
                    .map(|r| r.value.to_string())
                    .unwrap_or_else(|| "N/A".to_string());
                let macd = d
                    .indicators
                    .as_ref()
                    .and_then(|i| i.macd.as_ref())
                    .map(|m| m.signal.clone())
                    .unwrap_or_else(|| "N/A".to_string());
                let change = d.price.as_ref().map(|p| p.change_percent).unwrap_or(0.0);
                Some(format!(
                    "Related asset data:\n- Current price: {}\n- 24h change: {:.2}%\n- RSI: {}\n- MACD: {}",
                    price, change, rsi, macd
                ))
            })
            .unwrap_or_default();

        let language_note = if is_english {
            "All text in the JSON response (reasoning, key_factors, risk_factors) must be in English."
        } else {
            "All text in the JSON response (reasoning, key_factors, risk_factors) must be in Chinese."
        };

        let prompt = format!(
            r#"Analyze the following prediction-market event and assess its probability of occurring:

Question: {question}
Current market probability: {prob:.1}%

Related news:
{news}

{asset}

Analyze along these dimensions:
1. Base rates of similar historical events
2. Current news and trends
3. Related asset price action and technical indicators
4. Macro environment (VIX, DXY, rates)
5. Market sentiment

Output JSON:
{{
    "predicted_probability": 72.5,
    "confidence": 75.0,
    "reasoning": "Detailed analysis...",
    "key_factors": ["factor 1", "factor 2"],
    "risk_factors": ["risk 1", "risk 2"]
}}

{language_note}"#,
            question = market.question,
            prob = market.current_probability,
            news = news_text,
            asset = asset_text,
        );

        let system = if is_english {
            "You are a professional market analyst specializing in prediction markets. \
             Objectively assess event probabilities from the provided data. Respond in English."
        } else {
            "You are a professional market analyst specializing in prediction markets. \
             Objectively assess event probabilities from the provided data. Respond in Chinese."
        };

        match self
            .llm
            .chat_json(
                vec![ChatMessage::system(system), ChatMessage::user(prompt)],
                model,
            )
            .await
        {
            Ok(v) => AiProbability {
                predicted_probability: v["predicted_probability"]
                    .as_f64()
                    .unwrap_or(market.current_probability)
                    .clamp(0.0, 100.0),
                confidence: v["confidence"].as_f64().unwrap_or(70.0).clamp(0.0, 100.0),
                reasoning: v["reasoning"].as_str().unwrap_or_default().to_string(),
                key_factors: string_array(&v["key_factors"]),
                risk_factors: string_array(&v["risk_factors"]),
            },
            Err(e) => {
                warn!("AI probability prediction failed: {}", e);
                AiProbability {
                    predicted_probability: market.current_probability,
                    confidence: 50.0,
                    reasoning: format!("Analysis failed: {}", e),
                    key_factors: Vec::new(),
                    risk_factors: Vec::new(),
                }
            }
        }
    }

    async fn cached_analysis_from_db(
        &self,
        market_id: &str,
        user_id: Option<i64>,
    ) -> Option<PredictionAnalysis> {
        let sql = if user_id.is_some() {
            r#"
            SELECT ai_predicted_probability, market_probability, divergence,
                   recommendation, confidence_score, opportunity_score,
                   reasoning, key_factors, related_assets
            FROM qd_polymarket_ai_analysis
            WHERE market_id = $1 AND user_id = $2
              AND created_at > NOW() - INTERVAL '30 minutes'
            ORDER BY created_at DESC LIMIT 1
            "#
        } else {
            r#"
            SELECT ai_predicted_probability, market_probability, divergence,
                   recommendation, confidence_score, opportunity_score,
                   reasoning, key_factors, related_assets
            FROM qd_polymarket_ai_analysis
            WHERE market_id = $1 AND user_id IS NULL
              AND created_at > NOW() - INTERVAL '30 minutes'
            ORDER BY created_at DESC LIMIT 1
            "#
        };
        let mut query = sqlx::query(sql).bind(market_id);
        if let Some(uid) = user_id {
            query = query.bind(uid);
        }
        let row = query.fetch_optional(&self.pool).await.ok()??;

        use sqlx::Row;
        let confidence: f64 = row.get("confidence_score");
        let divergence: f64 = row.get("divergence");
        Some(PredictionAnalysis {
            market_id: market_id.to_string(),
            ai_predicted_probability: row.get("ai_predicted_probability"),
            market_probability: row.get("market_probability"),
            divergence,
            recommendation: Recommendation::from_str(row.get::<String, _>("recommendation").as_str())
                .unwrap_or(Recommendation::Hold),
            confidence_score: confidence,
            opportunity_score: row.get("opportunity_score"),
            reasoning: row.get::<Option<String>, _>("reasoning").unwrap_or_default(),
            key_factors: row
                .get::<Option<Value>, _>("key_factors")
                .map(|v| string_array(&v))
                .unwrap_or_default(),
            risk_factors: Vec::new(),
            related_assets: row
                .get::<Option<Value>, _>("related_assets")
                .map(|v| string_array(&v))
                .unwrap_or_default(),
            risk_level: RiskLevel::assess(confidence, divergence.abs()),
        })
    }

    /// Persist to the prediction-specific table and the unified task table.
    async fn save_analysis(
        &self,
        analysis: &PredictionAnalysis,
        market: &PredictionMarket,
        user_id: Option<i64>,
        language: Language,
        model: Option<&str>,
    ) {
        let insert = sqlx::query(
            r#"
            INSERT INTO qd_polymarket_ai_analysis
                (market_id, user_id, ai_predicted_probability, market_probability,
                 divergence, recommendation, confidence_score, opportunity_score,
                 reasoning, key_factors, related_assets, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, NOW())
            "#,
        )
        .bind(&analysis.market_id)
        .bind(user_id)
        .bind(analysis.ai_predicted_probability)
        .bind(analysis.market_probability)
        .bind(analysis.divergence)
        .bind(analysis.recommendation.as_str())
        .bind(analysis.confidence_score)
        .bind(analysis.opportunity_score)
        .bind(&analysis.reasoning)
        .bind(serde_json::to_value(&analysis.key_factors).unwrap_or(Value::Null))
        .bind(serde_json::to_value(&analysis.related_assets).unwrap_or(Value::Null))
        .execute(&self.pool)
        .await;
        if let Err(e) = insert {
            warn!("failed to save analysis to prediction table: {}", e);
        }

        let result_json = json!({
            "market_id": analysis.market_id,
            "market_title": market.question,
            "analysis": analysis,
            "market": market,
            "type": "polymarket",
        });
        let task = sqlx::query(
            r#"
            INSERT INTO qd_analysis_tasks
                (user_id, market, symbol, model, language, status, result_json,
                 error_message, created_at, completed_at)
            VALUES ($1, 'Polymarket', $2, $3, $4, 'completed', $5, '', NOW(), NOW())
            "#,
        )
        .bind(user_id.unwrap_or(1))
        .bind(&analysis.market_id)
        .bind(model.unwrap_or_default())
        .bind(language.as_str())
        .bind(result_json)
        .execute(&self.pool)
        .await;
        if let Err(e) = task {
            warn!("failed to save analysis task row: {}", e);
        }
    }

    async fn save_opportunities(&self, market_id: &str, opportunities: &[AssetOpportunity]) {
        for opp in opportunities {
            let insert = sqlx::query(
                r#"
                INSERT INTO qd_polymarket_asset_opportunities
                    (market_id, asset_symbol, asset_market, signal, confidence,
                     reasoning, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, NOW())
                "#,
            )
            .bind(market_id)
            .bind(&opp.asset)
            .bind(&opp.market)
            .bind(&opp.signal)
            .bind(opp.confidence)
            .bind(&opp.reasoning)
            .execute(&self.pool)
            .await;
            if let Err(e) = insert {
                warn!("failed to save asset opportunity: {}", e);
            }
        }
    }
}

/// Assets the event question refers to, as canonical pairs.
pub fn identify_related_assets(question: &str) -> Vec<String> {
    const CRYPTO_KEYWORDS: [(&str, &[&str]); 10] = [
        ("BTC", &["BTC", "BITCOIN"]),
        ("ETH", &["ETH", "ETHEREUM"]),
        ("SOL", &["SOL", "SOLANA"]),
        ("BNB", &["BNB", "BINANCE"]),
        ("XRP", &["XRP", "RIPPLE"]),
        ("ADA", &["ADA", "CARDANO"]),
        ("DOGE", &["DOGE", "DOGECOIN"]),
        ("AVAX", &["AVAX", "AVALANCHE"]),
        ("DOT", &["POLKADOT"]),
        ("MATIC", &["MATIC", "POLYGON"]),
    ];
    let question_upper = question.to_uppercase();
    let mut assets = Vec::new();
    for (symbol, keywords) in CRYPTO_KEYWORDS {
        if keywords.iter().any(|k| question_upper.contains(k)) {
            let pair = format!("{}/USDT", symbol);
            if !assets.contains(&pair) {
                assets.push(pair);
            }
        }
    }
    assets
}

/// Heuristic market classification for a related-asset symbol.
pub fn infer_market(symbol: &str) -> Market {
    if symbol.contains('/') {
        Market::Crypto
    } else if symbol.len() <= 5 && symbol.chars().all(|c| c.is_ascii_uppercase()) {
        Market::UsStock
    } else {
        Market::Crypto
    }
}

/// Simple trend read: RSI plus MACD signal direction.
fn technical_trend(
    indicators: &Option<crate::indicators::IndicatorSnapshot>,
) -> (&'static str, f64, String) {
    let Some(ind) = indicators else {
        return ("neutral", 50.0, "insufficient data".to_string());
    };
    let rsi = ind.rsi.as_ref().map(|r| r.value).unwrap_or(50.0);
    let macd_signal = ind
        .macd
        .as_ref()
        .map(|m| m.signal.as_str())
        .unwrap_or("neutral");

    let trend = if rsi > 60.0 && macd_signal == "bullish" {
        "bullish"
    } else if rsi < 40.0 && macd_signal == "bearish" {
        "bearish"
    } else {
        "neutral"
    };
    let confidence = if (rsi - 50.0).abs() > 15.0 { 60.0 } else { 50.0 };
    (trend, confidence, format!("RSI: {:.1}, MACD: {}", rsi, macd_signal))
}

/// Rule fallback when the batch LLM output is unusable: high volume plus an
/// implied probability well away from 50 reads as an opportunity.
pub fn fallback_batch_analysis(
    markets: Vec<PredictionMarket>,
    max_opportunities: usize,
) -> Vec<BatchOpportunity> {
    let mut out: Vec<BatchOpportunity> = markets
        .into_iter()
        .filter(|m| m.volume_24h > 10_000.0 && (m.current_probability - 50.0).abs() > 10.0)
        .map(|m| {
            let deviation = (m.current_probability - 50.0).abs();
            let score = (60.0 + deviation * 0.5).min(90.0);
            BatchOpportunity {
                ai_analysis: BatchAnalysis {
                    predicted_probability: m.current_probability,
                    recommendation: if m.current_probability > 50.0 {
                        Recommendation::Yes
                    } else {
                        Recommendation::No
                    },
                    confidence_score: 60.0,
                    opportunity_score: score,
                    divergence: 0.0,
                    reasoning: format!(
                        "High volume ({:.0}) with clear probability deviation ({:.1}%)",
                        m.volume_24h, m.current_probability
                    ),
                    key_factors: vec![
                        "high volume".to_string(),
                        "probability deviation".to_string(),
                    ],
                },
                market: m,
            }
        })
        .collect();

    out.sort_by(|a, b| {
        b.ai_analysis
            .opportunity_score
            .partial_cmp(&a.ai_analysis.opportunity_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    out.truncate(max_opportunities);
    out
}

/// Compact one-prompt summary of up to 50 markets.
fn build_markets_summary(markets: &[PredictionMarket]) -> String {
    markets
        .iter()
        .take(BATCH_PROMPT_CAP)
        .enumerate()
        .map(|(i, m)| {
            format!(
                "{}. ID: {}\n   Question: {}\n   Probability: {:.1}%\n   24h volume: ${:.0}\n   Category: {}",
                i + 1,
                m.market_id,
                truncate(&m.question, 100),
                m.current_probability,
                m.volume_24h,
                m.category
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
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

fn truncate(s: &str, n: usize) -> String {
    s.chars().take(n).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn market(id: &str, prob: f64, volume: f64) -> PredictionMarket {
        PredictionMarket {
            market_id: id.to_string(),
            question: format!("market {}", id),
            category: "other".to_string(),
            current_probability: prob,
            volume_24h: volume,
            liquidity: 0.0,
            end_date_iso: None,
            status: "active".to_string(),
            outcome_tokens: Value::Null,
            slug: None,
            polymarket_url: String::new(),
        }
    }

    #[test]
    fn related_assets_from_question() {
        let assets = identify_related_assets("Will Bitcoin and Ethereum both hit ATH in 2026?");
        assert!(assets.contains(&"BTC/USDT".to_string()));
        assert!(assets.contains(&"ETH/USDT".to_string()));
        assert!(identify_related_assets("Will it rain in Paris?").is_empty());
    }

    #[test]
    fn infer_market_heuristics() {
        assert_eq!(infer_market("BTC/USDT"), Market::Crypto);
        assert_eq!(infer_market("AAPL"), Market::UsStock);
        assert_eq!(infer_market("longsymbol"), Market::Crypto);
    }

    #[test]
    fn fallback_keeps_deviant_high_volume_markets() {
        let markets = vec![
            market("a", 75.0, 50_000.0), // qualifies
            market("b", 52.0, 50_000.0), // deviation too small
            market("c", 80.0, 500.0),    // volume too low
            market("d", 20.0, 60_000.0), // qualifies, NO side
        ];
        let out = fallback_batch_analysis(markets, 10);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].ai_analysis.recommendation, Recommendation::Yes);
        assert_eq!(out[1].ai_analysis.recommendation, Recommendation::No);
        // deviation 30 -> 60 + 15 = 75
        assert_eq!(out[1].ai_analysis.opportunity_score, 75.0);
    }

    #[test]
    fn fallback_score_is_capped_at_90() {
        let markets = vec![market("a", 99.0, 1_000_000.0)];
        let out = fallback_batch_analysis(markets, 10);
        assert_eq!(out[0].ai_analysis.opportunity_score, 84.5);
        let markets = vec![market("b", 0.5, 1_000_000.0)];
        let out = fallback_batch_analysis(markets, 10);
        assert!(out[0].ai_analysis.opportunity_score <= 90.0);
    }

    #[test]
    fn fallback_respects_max_and_sorting() {
        let markets: Vec<PredictionMarket> = (0..20)
            .map(|i| market(&format!("m{}", i), 65.0 + i as f64, 20_000.0))
            .collect();
        let out = fallback_batch_analysis(markets, 5);
        assert_eq!(out.len(), 5);
        for pair in out.windows(2) {
            assert!(
                pair[0].ai_analysis.opportunity_score >= pair[1].ai_analysis.opportunity_score
            );
        }
    }

    #[test]
    fn batch_summary_caps_at_fifty() {
        let markets: Vec<PredictionMarket> =
            (0..80).map(|i| market(&format!("m{}", i), 50.0, 0.0)).collect();
        let summary = build_markets_summary(&markets);
        assert!(summary.contains("50. ID: m49"));
        assert!(!summary.contains("51. ID: m50"));
    }
}
