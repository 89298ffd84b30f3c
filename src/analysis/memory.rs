//! Analysis memory: every analysis is persisted, later validated against the
//! realized price move, and retrievable by similarity for future prompts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::postgres::PgPool;
use sqlx::Row;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

use crate::collector::MarketDataCollector;
use crate::domain::{AnalysisResult, Decision, Market};
use crate::error::{QuantdeskError, Result};
use crate::indicators::IndicatorSnapshot;

const VALIDATION_BATCH_LIMIT: i64 = 50;
const FEEDBACK_VALUES: [&str; 4] = ["helpful", "not_helpful", "accurate", "inaccurate"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: i64,
    pub market: String,
    pub symbol: String,
    pub decision: String,
    pub confidence: i32,
    pub price: Option<f64>,
    pub summary: Option<String>,
    pub reasons: Value,
    pub scores: Value,
    pub indicators: Value,
    pub full_result: Value,
    pub created_at: Option<DateTime<Utc>>,
    pub was_correct: Option<bool>,
    pub actual_return_pct: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryPage {
    pub items: Vec<MemoryRecord>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarPattern {
    pub id: i64,
    pub decision: String,
    pub confidence: i32,
    pub price: Option<f64>,
    pub summary: Option<String>,
    pub was_correct: Option<bool>,
    pub actual_return_pct: Option<f64>,
    pub rsi_match: bool,
    pub macd_match: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationStats {
    pub validated: u32,
    pub correct: u32,
    pub incorrect: u32,
    pub errors: u32,
    pub accuracy_pct: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceStats {
    pub total_analyses: i64,
    pub accuracy_pct: f64,
    pub avg_return_pct: f64,
    pub decision_distribution: DecisionDistribution,
    pub user_satisfaction_pct: f64,
    pub period_days: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecisionDistribution {
    pub buy: i64,
    pub sell: i64,
    pub hold: i64,
}

pub struct AnalysisMemory {
    pool: PgPool,
}

impl AnalysisMemory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Persist an analysis; returns the memory id.
    pub async fn store(&self, result: &AnalysisResult) -> Result<i64> {
        let row = sqlx::query(
            r#"
            INSERT INTO qd_analysis_memory (
                market, symbol, decision, confidence,
                price_at_analysis, entry_price, stop_loss, take_profit,
                summary, reasons, risks, scores, indicators_snapshot, raw_result
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            RETURNING id
            "#,
        )
        .bind(&result.market)
        .bind(&result.symbol)
        .bind(result.decision.as_str())
        .bind(result.confidence)
        .bind(result.market_data.current_price)
        .bind(result.trading_plan.entry_price)
        .bind(result.trading_plan.stop_loss)
        .bind(result.trading_plan.take_profit)
        .bind(&result.summary)
        .bind(serde_json::to_value(&result.reasons)?)
        .bind(serde_json::to_value(&result.risks)?)
        .bind(serde_json::to_value(&result.scores)?)
        .bind(&result.indicators)
        .bind(serde_json::to_value(result)?)
        .fetch_one(&self.pool)
        .await?;

        let id: i64 = row.get("id");
        info!("stored analysis memory #{} for {}", id, result.symbol);
        Ok(id)
    }

    /// Append the analysis to the unified task log shared with the
    /// prediction-market analyzer.
    pub async fn log_task(&self, result: &AnalysisResult, model: Option<&str>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO qd_analysis_tasks
                (user_id, market, symbol, model, language, status, result_json,
                 error_message, created_at, completed_at)
            VALUES (1, $1, $2, $3, $4, $5, $6, $7, NOW(), NOW())
            "#,
        )
        .bind(&result.market)
        .bind(&result.symbol)
        .bind(model.unwrap_or_default())
        .bind(&result.language)
        .bind(if result.error.is_some() {
            "failed"
        } else {
            "completed"
        })
        .bind(serde_json::to_value(result)?)
        .bind(result.error.clone().unwrap_or_default())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_recent(
        &self,
        market: &str,
        symbol: &str,
        days: i64,
        limit: i64,
    ) -> Result<Vec<MemoryRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, market, symbol, decision, confidence, price_at_analysis,
                   summary, reasons, scores, indicators_snapshot, raw_result,
                   created_at, was_correct, actual_return_pct
            FROM qd_analysis_memory
            WHERE market = $1 AND symbol = $2
              AND created_at > NOW() - make_interval(days => $3)
            ORDER BY created_at DESC
            LIMIT $4
            "#,
        )
        .bind(market)
        .bind(symbol)
        .bind(days as i32)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(row_to_record).collect())
    }

    pub async fn get_all_history(&self, page: i64, page_size: i64) -> Result<HistoryPage> {
        let page = page.max(1);
        let page_size = page_size.clamp(1, 100);
        let offset = (page - 1) * page_size;

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM qd_analysis_memory")
            .fetch_one(&self.pool)
            .await?;

        let rows = sqlx::query(
            r#"
            SELECT id, market, symbol, decision, confidence, price_at_analysis,
                   summary, reasons, scores, indicators_snapshot, raw_result,
                   created_at, was_correct, actual_return_pct
            FROM qd_analysis_memory
            ORDER BY created_at DESC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(page_size)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(HistoryPage {
            items: rows.iter().map(row_to_record).collect(),
            total,
            page,
            page_size,
        })
    }

    pub async fn delete(&self, memory_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM qd_analysis_memory WHERE id = $1")
            .bind(memory_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Cheap pattern similarity: same symbol, RSI within +-15 or matching
    /// MACD signal, validated-and-correct records first.
    pub async fn get_similar_patterns(
        &self,
        market: &str,
        symbol: &str,
        current: Option<&IndicatorSnapshot>,
        limit: usize,
    ) -> Result<Vec<SimilarPattern>> {
        let current_rsi = current
            .and_then(|i| i.rsi.as_ref())
            .map(|r| r.value)
            .unwrap_or(50.0);
        let current_macd = current
            .and_then(|i| i.macd.as_ref())
            .map(|m| m.signal.clone())
            .unwrap_or_else(|| "neutral".to_string());

        let rows = sqlx::query(
            r#"
            SELECT id, decision, confidence, price_at_analysis, summary,
                   indicators_snapshot, was_correct, actual_return_pct
            FROM qd_analysis_memory
            WHERE market = $1 AND symbol = $2
              AND validated_at IS NOT NULL
              AND was_correct IS NOT NULL
            ORDER BY CASE WHEN was_correct THEN 0 ELSE 1 END, created_at DESC
            LIMIT $3
            "#,
        )
        .bind(market)
        .bind(symbol)
        .bind((limit * 2) as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::new();
        for row in &rows {
            let snapshot: Value = row
                .get::<Option<Value>, _>("indicators_snapshot")
                .unwrap_or(Value::Null);
            let hist_rsi = snapshot["rsi"]["value"].as_f64().unwrap_or(50.0);
            let hist_macd = snapshot["macd"]["signal"].as_str().unwrap_or("neutral");

            let rsi_match = (hist_rsi - current_rsi).abs() <= 15.0;
            let macd_match = hist_macd == current_macd;
            if !(rsi_match || macd_match) {
                continue;
            }

            out.push(SimilarPattern {
                id: row.get("id"),
                decision: row.get("decision"),
                confidence: row.get("confidence"),
                price: row.get("price_at_analysis"),
                summary: row.get("summary"),
                was_correct: row.get("was_correct"),
                actual_return_pct: row.get("actual_return_pct"),
                rsi_match,
                macd_match,
            });
            if out.len() >= limit {
                break;
            }
        }
        Ok(out)
    }

    pub async fn record_feedback(&self, memory_id: i64, feedback: &str) -> Result<bool> {
        if !FEEDBACK_VALUES.contains(&feedback) {
            return Err(QuantdeskError::Validation(format!(
                "feedback must be one of {:?}, got \"{}\"",
                FEEDBACK_VALUES, feedback
            )));
        }
        let result = sqlx::query(
            "UPDATE qd_analysis_memory SET user_feedback = $1, feedback_at = NOW() WHERE id = $2",
        )
        .bind(feedback)
        .bind(memory_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Score decisions made `days_ago` days back against today's price.
    /// Window is [now - (days_ago + 1), now - days_ago]; batch-limited.
    pub async fn validate_past_decisions(
        &self,
        days_ago: i64,
        collector: Arc<MarketDataCollector>,
    ) -> Result<ValidationStats> {
        let mut stats = ValidationStats::default();

        let rows = sqlx::query(
            r#"
            SELECT id, market, symbol, decision, price_at_analysis
            FROM qd_analysis_memory
            WHERE validated_at IS NULL
              AND created_at < NOW() - make_interval(days => $1)
              AND created_at > NOW() - make_interval(days => $2)
            LIMIT $3
            "#,
        )
        .bind(days_ago as i32)
        .bind((days_ago + 1) as i32)
        .bind(VALIDATION_BATCH_LIMIT)
        .fetch_all(&self.pool)
        .await?;

        for row in &rows {
            let id: i64 = row.get("id");
            let market_str: String = row.get("market");
            let symbol: String = row.get("symbol");
            let decision_str: String = row.get("decision");
            let analysis_price: Option<f64> = row.get("price_at_analysis");

            let Some(analysis_price) = analysis_price.filter(|p| *p > 0.0) else {
                continue;
            };
            let Ok(market) = Market::from_str(&market_str) else {
                stats.errors += 1;
                continue;
            };
            let current_price = match collector.get_price(market, &symbol).await {
                Ok(p) if p > 0.0 => p,
                _ => {
                    warn!("validation skipped for memory {}: price unavailable", id);
                    stats.errors += 1;
                    continue;
                }
            };

            let return_pct = (current_price - analysis_price) / analysis_price * 100.0;
            let decision = Decision::normalize(&decision_str);
            let was_correct = decision_was_correct(decision, return_pct);

            let update = sqlx::query(
                r#"
                UPDATE qd_analysis_memory
                SET validated_at = NOW(), actual_return_pct = $1, was_correct = $2
                WHERE id = $3
                "#,
            )
            .bind(return_pct)
            .bind(was_correct)
            .bind(id)
            .execute(&self.pool)
            .await;

            match update {
                Ok(_) => {
                    stats.validated += 1;
                    if was_correct {
                        stats.correct += 1;
                    } else {
                        stats.incorrect += 1;
                    }
                }
                Err(e) => {
                    warn!("failed to validate memory {}: {}", id, e);
                    stats.errors += 1;
                }
            }
        }

        stats.accuracy_pct = if stats.validated > 0 {
            (stats.correct as f64 / stats.validated as f64 * 10000.0).round() / 100.0
        } else {
            0.0
        };
        info!("validation completed: {:?}", stats);
        Ok(stats)
    }

    pub async fn get_performance_stats(
        &self,
        market: Option<&str>,
        symbol: Option<&str>,
        days: i64,
    ) -> Result<PerformanceStats> {
        let mut sql = String::from(
            r#"
            SELECT
                COUNT(*) AS total,
                COUNT(*) FILTER (WHERE was_correct) AS correct,
                COALESCE(AVG(actual_return_pct), 0) AS avg_return,
                COUNT(*) FILTER (WHERE decision = 'BUY') AS buy_count,
                COUNT(*) FILTER (WHERE decision = 'SELL') AS sell_count,
                COUNT(*) FILTER (WHERE decision = 'HOLD') AS hold_count,
                COUNT(*) FILTER (WHERE user_feedback = 'helpful') AS helpful_count,
                COUNT(*) FILTER (WHERE user_feedback IS NOT NULL) AS feedback_count
            FROM qd_analysis_memory
            WHERE validated_at IS NOT NULL
              AND created_at > NOW() - make_interval(days => $1)
            "#,
        );
        if market.is_some() {
            sql.push_str(" AND market = $2");
        }
        if symbol.is_some() {
            sql.push_str(if market.is_some() {
                " AND symbol = $3"
            } else {
                " AND symbol = $2"
            });
        }

        let mut query = sqlx::query(&sql).bind(days as i32);
        if let Some(m) = market {
            query = query.bind(m.to_string());
        }
        if let Some(s) = symbol {
            query = query.bind(s.to_string());
        }
        let row = query.fetch_one(&self.pool).await?;

        let total: i64 = row.get("total");
        if total == 0 {
            return Ok(PerformanceStats {
                period_days: days,
                ..PerformanceStats::default()
            });
        }
        let correct: i64 = row.get("correct");
        let feedback_count: i64 = row.get("feedback_count");
        let helpful_count: i64 = row.get("helpful_count");

        Ok(PerformanceStats {
            total_analyses: total,
            accuracy_pct: round2(correct as f64 / total as f64 * 100.0),
            avg_return_pct: round2(row.get::<f64, _>("avg_return")),
            decision_distribution: DecisionDistribution {
                buy: row.get("buy_count"),
                sell: row.get("sell_count"),
                hold: row.get("hold_count"),
            },
            user_satisfaction_pct: if feedback_count > 0 {
                round2(helpful_count as f64 / feedback_count as f64 * 100.0)
            } else {
                0.0
            },
            period_days: days,
        })
    }
}

/// BUY is right when the move exceeds +2%, SELL below -2%, HOLD inside +-5%.
pub fn decision_was_correct(decision: Decision, return_pct: f64) -> bool {
    match decision {
        Decision::Buy => return_pct > 2.0,
        Decision::Sell => return_pct < -2.0,
        Decision::Hold => return_pct.abs() <= 5.0,
    }
}

fn row_to_record(row: &sqlx::postgres::PgRow) -> MemoryRecord {
    MemoryRecord {
        id: row.get("id"),
        market: row.get("market"),
        symbol: row.get("symbol"),
        decision: row.get("decision"),
        confidence: row.get("confidence"),
        price: row.get("price_at_analysis"),
        summary: row.get("summary"),
        reasons: row.get::<Option<Value>, _>("reasons").unwrap_or(Value::Null),
        scores: row.get::<Option<Value>, _>("scores").unwrap_or(Value::Null),
        indicators: row
            .get::<Option<Value>, _>("indicators_snapshot")
            .unwrap_or(Value::Null),
        full_result: row
            .get::<Option<Value>, _>("raw_result")
            .unwrap_or(Value::Null),
        created_at: row.get("created_at"),
        was_correct: row.get("was_correct"),
        actual_return_pct: row.get("actual_return_pct"),
    }
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buy_needs_more_than_two_percent() {
        assert!(decision_was_correct(Decision::Buy, 4.0));
        assert!(!decision_was_correct(Decision::Buy, 2.0));
        assert!(!decision_was_correct(Decision::Buy, -1.0));
    }

    #[test]
    fn sell_needs_drop_below_minus_two() {
        assert!(decision_was_correct(Decision::Sell, -3.0));
        // price rose five percent: sell was wrong
        assert!(!decision_was_correct(Decision::Sell, 5.0));
    }

    #[test]
    fn hold_tolerates_five_percent_band() {
        assert!(decision_was_correct(Decision::Hold, 4.0));
        assert!(decision_was_correct(Decision::Hold, -5.0));
        assert!(!decision_was_correct(Decision::Hold, 5.1));
    }

    #[test]
    fn scenario_buy_hold_correct_sell_wrong() {
        // BUY at 100 now 104 (+4%), SELL at 200 now 210 (+5%), HOLD at 50 now 52 (+4%)
        assert!(decision_was_correct(Decision::Buy, 4.0));
        assert!(!decision_was_correct(Decision::Sell, 5.0));
        assert!(decision_was_correct(Decision::Hold, 4.0));
    }
}
