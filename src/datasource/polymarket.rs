//! Prediction-market data source over the Polymarket Gamma API with a
//! database cache of the event list.

use reqwest::Client;
use serde_json::Value;
use sqlx::postgres::PgPool;
use sqlx::Row;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::DataSourceConfig;
use crate::domain::PredictionMarket;
use crate::error::{QuantdeskError, Result};

/// Raw market-list cache window (database `updated_at` freshness)
const LIST_CACHE_SECS: i64 = 300;

pub struct PolymarketSource {
    http: Client,
    base_url: String,
    pool: Option<PgPool>,
}

impl PolymarketSource {
    pub fn new(config: &DataSourceConfig, pool: Option<PgPool>) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()
            .map_err(|e| {
                QuantdeskError::Internal(format!("failed to build gamma HTTP client: {}", e))
            })?;
        Ok(Self {
            http,
            base_url: config.gamma_base_url.trim_end_matches('/').to_string(),
            pool,
        })
    }

    /// Trending markets: database cache first (5-minute window), then the
    /// Gamma API across categories, deduped and sorted by 24h volume.
    pub async fn get_trending_markets(
        &self,
        category: Option<&str>,
        limit: usize,
    ) -> Result<Vec<PredictionMarket>> {
        if let Some(cached) = self.cached_markets(category, limit).await {
            if !cached.is_empty() {
                return Ok(cached);
            }
        }

        let mut all = Vec::new();
        match category {
            Some(cat) if cat != "all" => {
                all.extend(self.fetch_from_gamma(Some(cat), limit * 2).await?);
            }
            _ => {
                for cat in ["crypto", "politics", "economics", "sports"] {
                    match self.fetch_from_gamma(Some(cat), limit / 4 + 10).await {
                        Ok(markets) => all.extend(markets),
                        Err(e) => debug!("gamma fetch for {} failed: {}", cat, e),
                    }
                }
            }
        }

        let mut unique = dedup_by_id(all);
        unique.sort_by(|a, b| {
            b.volume_24h
                .partial_cmp(&a.volume_24h)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        if !unique.is_empty() {
            self.save_markets(&unique).await;
        } else {
            warn!("Polymarket API unavailable, returning empty list");
        }
        unique.truncate(limit);
        Ok(unique)
    }

    /// Single-market detail: database first, API fallback (persisted back).
    pub async fn get_market_details(&self, market_id: &str) -> Result<Option<PredictionMarket>> {
        let market_id = market_id.trim();
        if market_id.is_empty() {
            return Ok(None);
        }

        if let Some(pool) = &self.pool {
            let row = sqlx::query(
                r#"
                SELECT market_id, question, category, current_probability, volume_24h,
                       liquidity, end_date_iso, status, outcome_tokens, slug
                FROM qd_polymarket_markets
                WHERE market_id = $1
                "#,
            )
            .bind(market_id)
            .fetch_optional(pool)
            .await;
            match row {
                Ok(Some(row)) => return Ok(Some(row_to_market(&row))),
                Ok(None) => {}
                Err(e) => warn!("market detail query failed for {}: {}", market_id, e),
            }
        }

        info!("market {} not in database, fetching from API", market_id);
        let market = self.fetch_market_from_api(market_id).await?;
        if let Some(m) = &market {
            self.save_markets(std::slice::from_ref(m)).await;
        }
        Ok(market)
    }

    /// Keyword search. With `use_cache` the database is consulted first;
    /// AI-analysis callers pass `use_cache = false` to force fresh data.
    pub async fn search_markets(
        &self,
        keyword: &str,
        limit: usize,
        use_cache: bool,
    ) -> Result<Vec<PredictionMarket>> {
        if use_cache {
            if let Some(pool) = &self.pool {
                let rows = sqlx::query(
                    r#"
                    SELECT market_id, question, category, current_probability, volume_24h,
                           liquidity, end_date_iso, status, outcome_tokens, slug
                    FROM qd_polymarket_markets
                    WHERE question ILIKE $1 AND status = 'active'
                    ORDER BY volume_24h DESC
                    LIMIT $2
                    "#,
                )
                .bind(format!("%{}%", keyword))
                .bind(limit as i64)
                .fetch_all(pool)
                .await;
                if let Ok(rows) = rows {
                    if !rows.is_empty() {
                        return Ok(rows.iter().map(row_to_market).collect());
                    }
                }
            }
        }

        let all = self.fetch_from_gamma(None, limit * 5).await?;
        let keyword_lower = keyword.to_lowercase();
        Ok(all
            .into_iter()
            .filter(|m| m.question.to_lowercase().contains(&keyword_lower))
            .take(limit)
            .collect())
    }

    async fn cached_markets(
        &self,
        category: Option<&str>,
        limit: usize,
    ) -> Option<Vec<PredictionMarket>> {
        let pool = self.pool.as_ref()?;
        let mut sql = String::from(
            "SELECT market_id, question, category, current_probability, volume_24h, \
             liquidity, end_date_iso, status, outcome_tokens, slug \
             FROM qd_polymarket_markets \
             WHERE status = 'active' AND updated_at > NOW() - make_interval(secs => $1)",
        );
        if category.filter(|c| *c != "all").is_some() {
            sql.push_str(" AND category = $3");
        }
        sql.push_str(" ORDER BY volume_24h DESC LIMIT $2");

        let mut query = sqlx::query(&sql)
            .bind(LIST_CACHE_SECS as f64)
            .bind(limit as i64);
        if let Some(cat) = category.filter(|c| *c != "all") {
            query = query.bind(cat.to_string());
        }
        match query.fetch_all(pool).await {
            Ok(rows) if !rows.is_empty() => Some(rows.iter().map(row_to_market).collect()),
            Ok(_) => None,
            Err(e) => {
                debug!("cached market read failed: {}", e);
                None
            }
        }
    }

    async fn save_markets(&self, markets: &[PredictionMarket]) {
        let Some(pool) = &self.pool else { return };
        for m in markets {
            let result = sqlx::query(
                r#"
                INSERT INTO qd_polymarket_markets
                    (market_id, question, category, current_probability, volume_24h,
                     liquidity, end_date_iso, status, outcome_tokens, slug, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, NOW())
                ON CONFLICT (market_id) DO UPDATE SET
                    question = EXCLUDED.question,
                    category = EXCLUDED.category,
                    current_probability = EXCLUDED.current_probability,
                    volume_24h = EXCLUDED.volume_24h,
                    liquidity = EXCLUDED.liquidity,
                    end_date_iso = EXCLUDED.end_date_iso,
                    status = EXCLUDED.status,
                    outcome_tokens = EXCLUDED.outcome_tokens,
                    slug = EXCLUDED.slug,
                    updated_at = NOW()
                "#,
            )
            .bind(&m.market_id)
            .bind(&m.question)
            .bind(&m.category)
            .bind(m.current_probability)
            .bind(m.volume_24h)
            .bind(m.liquidity)
            .bind(&m.end_date_iso)
            .bind(&m.status)
            .bind(&m.outcome_tokens)
            .bind(&m.slug)
            .execute(pool)
            .await;
            if let Err(e) = result {
                warn!("failed to cache market {}: {}", m.market_id, e);
            }
        }
    }

    async fn fetch_from_gamma(
        &self,
        category: Option<&str>,
        limit: usize,
    ) -> Result<Vec<PredictionMarket>> {
        let url = format!("{}/events", self.base_url);
        let mut query = vec![
            ("closed", "false".to_string()),
            ("active", "true".to_string()),
            ("limit", limit.min(200).to_string()),
            ("order", "volume24hr".to_string()),
            ("ascending", "false".to_string()),
        ];
        if let Some(cat) = category.filter(|c| *c != "all") {
            query.push(("tag_slug", cat.to_string()));
        }

        let resp = self.http.get(&url).query(&query).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(QuantdeskError::venue_http(
                "polymarket",
                status.as_u16(),
                &body,
            ));
        }
        let raw: Value = resp.json().await?;
        Ok(parse_gamma_events(&raw, category))
    }

    async fn fetch_market_from_api(&self, market_id: &str) -> Result<Option<PredictionMarket>> {
        let url = format!("{}/markets/{}", self.base_url, market_id);
        let resp = self.http.get(&url).send().await?;
        if resp.status().as_u16() == 404 {
            return Ok(None);
        }
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(QuantdeskError::venue_http(
                "polymarket",
                status.as_u16(),
                &body,
            ));
        }
        let raw: Value = resp.json().await?;
        Ok(parse_gamma_market(&raw))
    }
}

fn dedup_by_id(markets: Vec<PredictionMarket>) -> Vec<PredictionMarket> {
    let mut seen = std::collections::HashSet::new();
    markets
        .into_iter()
        .filter(|m| !m.market_id.is_empty() && seen.insert(m.market_id.clone()))
        .collect()
}

fn row_to_market(row: &sqlx::postgres::PgRow) -> PredictionMarket {
    let market_id: String = row.get("market_id");
    let slug: Option<String> = row.get("slug");
    let slug = slug.filter(|s| !s.is_empty() && !s.chars().all(|c| c.is_ascii_digit()));
    PredictionMarket {
        polymarket_url: build_url(slug.as_deref(), &market_id),
        market_id,
        question: row.get("question"),
        category: row.get("category"),
        current_probability: row.get("current_probability"),
        volume_24h: row.get("volume_24h"),
        liquidity: row.get("liquidity"),
        end_date_iso: row.get("end_date_iso"),
        status: row.get("status"),
        outcome_tokens: row
            .get::<Option<Value>, _>("outcome_tokens")
            .unwrap_or(Value::Null),
        slug,
    }
}

/// Build the public URL. A usable slug links the event page; otherwise fall
/// back to the markets listing by id.
pub fn build_url(slug: Option<&str>, market_id: &str) -> String {
    match slug {
        Some(s) if !s.is_empty() && !s.chars().all(|c| c.is_ascii_digit()) => {
            format!("https://polymarket.com/event/{}", s)
        }
        _ => format!("https://polymarket.com/markets/{}", market_id),
    }
}

/// Infer a coarse category from the question text.
pub fn infer_category(question: &str) -> &'static str {
    let q = question.to_lowercase();
    const CRYPTO: [&str; 8] = [
        "bitcoin", "btc", "ethereum", "eth", "crypto", "solana", "dogecoin", "xrp",
    ];
    const POLITICS: [&str; 7] = [
        "election", "president", "senate", "congress", "trump", "biden", "governor",
    ];
    const ECONOMICS: [&str; 7] = [
        "fed", "rate", "inflation", "gdp", "recession", "cpi", "tariff",
    ];
    const SPORTS: [&str; 8] = [
        "nba", "nfl", "mlb", "nhl", "super bowl", "world cup", "championship", "olympics",
    ];
    if CRYPTO.iter().any(|k| q.contains(k)) {
        "crypto"
    } else if POLITICS.iter().any(|k| q.contains(k)) {
        "politics"
    } else if ECONOMICS.iter().any(|k| q.contains(k)) {
        "economics"
    } else if SPORTS.iter().any(|k| q.contains(k)) {
        "sports"
    } else {
        "other"
    }
}

fn parse_gamma_events(raw: &Value, category_filter: Option<&str>) -> Vec<PredictionMarket> {
    let events = match raw.as_array() {
        Some(e) => e,
        None => return Vec::new(),
    };
    let mut out = Vec::new();
    for event in events {
        let markets = match event["markets"].as_array() {
            Some(m) => m,
            None => continue,
        };
        for market in markets {
            if let Some(parsed) = parse_gamma_market(market) {
                if let Some(filter) = category_filter.filter(|c| *c != "all") {
                    if parsed.category != *filter {
                        continue;
                    }
                }
                out.push(parsed);
            }
        }
    }
    out
}

fn parse_gamma_market(market: &Value) -> Option<PredictionMarket> {
    let market_id = market["id"]
        .as_str()
        .map(str::to_string)
        .or_else(|| market["id"].as_i64().map(|v| v.to_string()))?;
    let question = market["question"].as_str().unwrap_or_default().to_string();
    if question.is_empty() {
        return None;
    }

    // outcomePrices arrives as a JSON-encoded string array
    let yes_price = market["outcomePrices"]
        .as_str()
        .and_then(|s| serde_json::from_str::<Vec<String>>(s).ok())
        .and_then(|prices| prices.first().and_then(|p| p.parse::<f64>().ok()))
        .or_else(|| market["outcomePrices"][0].as_f64())
        .unwrap_or(0.5);
    let no_price = (1.0 - yes_price).max(0.0);

    let slug = market["slug"]
        .as_str()
        .map(str::to_string)
        .filter(|s| !s.is_empty() && !s.chars().all(|c| c.is_ascii_digit()));
    let volume_24h = json_f64(&market["volume24hr"]).or_else(|| json_f64(&market["volume"]));
    let category = infer_category(&question).to_string();

    Some(PredictionMarket {
        polymarket_url: build_url(slug.as_deref(), &market_id),
        market_id,
        question,
        category,
        current_probability: (yes_price * 100.0 * 100.0).round() / 100.0,
        volume_24h: volume_24h.unwrap_or(0.0),
        liquidity: json_f64(&market["liquidity"]).unwrap_or(0.0),
        end_date_iso: market["endDate"]
            .as_str()
            .or_else(|| market["endDateIso"].as_str())
            .map(str::to_string),
        status: if market["closed"].as_bool().unwrap_or(false) {
            "closed".to_string()
        } else {
            "active".to_string()
        },
        outcome_tokens: serde_json::json!({
            "YES": {"price": yes_price, "volume": volume_24h.unwrap_or(0.0)},
            "NO": {"price": no_price, "volume": volume_24h.unwrap_or(0.0)},
        }),
        slug,
    })
}

fn json_f64(v: &Value) -> Option<f64> {
    v.as_f64()
        .or_else(|| v.as_str().and_then(|s| s.parse().ok()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn url_falls_back_without_valid_slug() {
        assert_eq!(
            build_url(Some("will-btc-hit-100k"), "123"),
            "https://polymarket.com/event/will-btc-hit-100k"
        );
        assert_eq!(
            build_url(Some("456789"), "123"),
            "https://polymarket.com/markets/123"
        );
        assert_eq!(build_url(None, "123"), "https://polymarket.com/markets/123");
    }

    #[test]
    fn category_inference() {
        assert_eq!(infer_category("Will Bitcoin reach $100k?"), "crypto");
        assert_eq!(infer_category("Who wins the election?"), "politics");
        assert_eq!(infer_category("Will the Fed cut rates in June?"), "economics");
        assert_eq!(infer_category("Super Bowl winner 2026"), "sports");
        assert_eq!(infer_category("Will it rain tomorrow?"), "other");
    }

    #[test]
    fn parses_gamma_market_with_string_prices() {
        let raw = json!({
            "id": "42",
            "question": "Will Bitcoin reach $150k by December?",
            "outcomePrices": "[\"0.65\", \"0.35\"]",
            "volume24hr": 125000.5,
            "liquidity": "50000",
            "endDate": "2026-12-31T00:00:00Z",
            "slug": "will-bitcoin-reach-150k",
            "closed": false
        });
        let m = parse_gamma_market(&raw).unwrap();
        assert_eq!(m.market_id, "42");
        assert_eq!(m.current_probability, 65.0);
        assert_eq!(m.category, "crypto");
        assert_eq!(m.status, "active");
        assert_eq!(m.slug.as_deref(), Some("will-bitcoin-reach-150k"));
        assert!((m.liquidity - 50000.0).abs() < 1e-9);
    }

    #[test]
    fn skips_markets_without_question() {
        assert!(parse_gamma_market(&json!({"id": "1"})).is_none());
    }

    #[test]
    fn dedup_drops_repeat_ids() {
        let mk = |id: &str| PredictionMarket {
            market_id: id.to_string(),
            question: "q".into(),
            category: "other".into(),
            current_probability: 50.0,
            volume_24h: 0.0,
            liquidity: 0.0,
            end_date_iso: None,
            status: "active".into(),
            outcome_tokens: Value::Null,
            slug: None,
            polymarket_url: String::new(),
        };
        let out = dedup_by_id(vec![mk("a"), mk("b"), mk("a")]);
        assert_eq!(out.len(), 2);
    }
}
