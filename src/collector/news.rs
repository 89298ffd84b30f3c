//! News and sentiment collection: structured Finnhub endpoints first, then a
//! search-engine fallback, plus a global major-events sweep that matters for
//! risk assets regardless of the analyzed symbol.

use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::DataSourceConfig;
use crate::domain::Market;
use crate::error::{QuantdeskError, Result};

const MAX_NEWS_ITEMS: usize = 15;

/// Keywords marking global macro-relevant events (wars, sanctions, crises).
const MAJOR_EVENT_KEYWORDS: [&str; 16] = [
    "war",
    "conflict",
    "military",
    "attack",
    "strike",
    "sanctions",
    "geopolitical",
    "crisis",
    "tension",
    "iran",
    "israel",
    "russia",
    "ukraine",
    "middle east",
    "nato",
    "united states",
];

const NEGATIVE_EVENT_KEYWORDS: [&str; 4] = ["war", "conflict", "attack", "strike"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsItem {
    pub datetime: String,
    pub headline: String,
    pub summary: String,
    pub source: String,
    pub url: String,
    pub sentiment: String,
    #[serde(default)]
    pub is_global_event: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewsBundle {
    pub news: Vec<NewsItem>,
    pub sentiment: Value,
}

pub struct NewsCollector {
    http: Client,
    finnhub_api_key: String,
    tavily_api_key: String,
}

impl NewsCollector {
    pub fn new(config: &DataSourceConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()
            .map_err(|e| QuantdeskError::Internal(format!("failed to build news HTTP client: {}", e)))?;
        Ok(Self {
            http,
            finnhub_api_key: config.finnhub_api_key.clone(),
            tavily_api_key: config.tavily_api_key.clone(),
        })
    }

    /// Collect, dedup by headline, newest first, capped at 15 items.
    pub async fn get_news(
        &self,
        market: Market,
        symbol: &str,
        company_name: Option<&str>,
    ) -> NewsBundle {
        let mut items = Vec::new();
        let mut sentiment = Value::Null;

        if !self.finnhub_api_key.is_empty() {
            match self.finnhub_news(market, symbol).await {
                Ok(news) => {
                    info!("finnhub news fetched: {} items", news.len());
                    items.extend(news);
                }
                Err(e) => debug!("finnhub news failed: {}", e),
            }
            if market == Market::UsStock {
                if let Ok(s) = self.finnhub_social_sentiment(symbol).await {
                    sentiment = s;
                }
            }
        }

        if items.len() < 5 {
            let query_name = company_name.unwrap_or(symbol);
            match self
                .search_news(&format!("{} {} stock market news", symbol, query_name), 5, 7)
                .await
            {
                Ok(extra) => items.extend(extra),
                Err(e) => debug!("search news fallback failed: {}", e),
            }
        }

        items.extend(self.global_major_events().await);

        // Dedup by headline, newest first
        let mut seen = std::collections::HashSet::new();
        items.retain(|item| !item.headline.is_empty() && seen.insert(item.headline.clone()));
        items.sort_by(|a, b| b.datetime.cmp(&a.datetime));
        items.truncate(MAX_NEWS_ITEMS);

        NewsBundle {
            news: items,
            sentiment,
        }
    }

    async fn finnhub_news(&self, market: Market, symbol: &str) -> Result<Vec<NewsItem>> {
        let to = Utc::now().format("%Y-%m-%d").to_string();
        let from = (Utc::now() - ChronoDuration::days(7))
            .format("%Y-%m-%d")
            .to_string();

        let raw: Value = match market {
            Market::UsStock => {
                self.http
                    .get("https://finnhub.io/api/v1/company-news")
                    .query(&[
                        ("symbol", symbol),
                        ("from", from.as_str()),
                        ("to", to.as_str()),
                        ("token", self.finnhub_api_key.as_str()),
                    ])
                    .send()
                    .await?
                    .json()
                    .await?
            }
            Market::Crypto => {
                self.http
                    .get("https://finnhub.io/api/v1/news")
                    .query(&[("category", "crypto"), ("token", self.finnhub_api_key.as_str())])
                    .send()
                    .await?
                    .json()
                    .await?
            }
            _ => {
                self.http
                    .get("https://finnhub.io/api/v1/news")
                    .query(&[("category", "general"), ("token", self.finnhub_api_key.as_str())])
                    .send()
                    .await?
                    .json()
                    .await?
            }
        };

        let items = raw
            .as_array()
            .map(|arr| {
                arr.iter()
                    .take(10)
                    .filter_map(|item| {
                        let headline = item["headline"].as_str()?.to_string();
                        let ts = item["datetime"].as_i64().unwrap_or(0);
                        let datetime = Utc
                            .timestamp_opt(ts, 0)
                            .single()
                            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                            .unwrap_or_default();
                        Some(NewsItem {
                            datetime,
                            headline,
                            summary: item["summary"]
                                .as_str()
                                .unwrap_or_default()
                                .chars()
                                .take(300)
                                .collect(),
                            source: item["source"].as_str().unwrap_or("Finnhub").to_string(),
                            url: item["url"].as_str().unwrap_or_default().to_string(),
                            sentiment: item["sentiment"].as_str().unwrap_or("neutral").to_string(),
                            is_global_event: false,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(items)
    }

    async fn finnhub_social_sentiment(&self, symbol: &str) -> Result<Value> {
        let raw: Value = self
            .http
            .get("https://finnhub.io/api/v1/stock/social-sentiment")
            .query(&[("symbol", symbol), ("token", self.finnhub_api_key.as_str())])
            .send()
            .await?
            .json()
            .await?;
        Ok(json!({
            "reddit": raw.get("reddit").cloned().unwrap_or(Value::Null),
            "twitter": raw.get("twitter").cloned().unwrap_or(Value::Null),
        }))
    }

    /// Search-engine fallback (Tavily-compatible POST /search).
    async fn search_news(&self, query: &str, max_results: usize, days: u32) -> Result<Vec<NewsItem>> {
        if self.tavily_api_key.is_empty() {
            return Ok(Vec::new());
        }
        let raw: Value = self
            .http
            .post("https://api.tavily.com/search")
            .json(&json!({
                "api_key": self.tavily_api_key,
                "query": query,
                "topic": "news",
                "max_results": max_results,
                "days": days,
            }))
            .send()
            .await?
            .json()
            .await?;

        let items = raw["results"]
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|r| {
                        let title = r["title"].as_str()?.to_string();
                        Some(NewsItem {
                            datetime: r["published_date"]
                                .as_str()
                                .map(str::to_string)
                                .unwrap_or_else(|| Utc::now().format("%Y-%m-%d").to_string()),
                            headline: title,
                            summary: r["content"]
                                .as_str()
                                .unwrap_or_default()
                                .chars()
                                .take(200)
                                .collect(),
                            source: format!("search:{}", r["url"].as_str().unwrap_or("web")),
                            url: r["url"].as_str().unwrap_or_default().to_string(),
                            sentiment: "neutral".to_string(),
                            is_global_event: false,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(items)
    }

    /// Geopolitical sweep: a fixed query set filtered by the keyword list.
    async fn global_major_events(&self) -> Vec<NewsItem> {
        if self.tavily_api_key.is_empty() {
            return Vec::new();
        }
        let queries = [
            "war conflict breaking news today",
            "geopolitical crisis latest",
            "US sanctions military news",
        ];
        let mut events = Vec::new();
        for query in queries {
            match self.search_news(query, 2, 1).await {
                Ok(results) => {
                    for mut item in results {
                        if is_major_event(&item) {
                            info!("found global major event: {}", truncate(&item.headline, 60));
                            item.is_global_event = true;
                            item.sentiment =
                                event_sentiment(&item.headline, &item.summary).to_string();
                            item.source = format!("global:{}", item.source);
                            events.push(item);
                        }
                    }
                }
                Err(e) => debug!("global event query '{}' failed: {}", query, e),
            }
        }

        let mut seen = std::collections::HashSet::new();
        events.retain(|e| seen.insert(e.headline.clone()));
        events.truncate(5);
        events
    }
}

fn is_major_event(item: &NewsItem) -> bool {
    let text = format!(
        "{} {}",
        item.headline.to_lowercase(),
        item.summary.to_lowercase()
    );
    MAJOR_EVENT_KEYWORDS.iter().any(|k| text.contains(k))
}

/// Sentiment for a matched event: hard-conflict words read negative.
pub fn event_sentiment(headline: &str, summary: &str) -> &'static str {
    let text = format!("{} {}", headline.to_lowercase(), summary.to_lowercase());
    if NEGATIVE_EVENT_KEYWORDS.iter().any(|k| text.contains(k)) {
        "negative"
    } else {
        "neutral"
    }
}

fn truncate(s: &str, n: usize) -> String {
    s.chars().take(n).collect()
}

/// Compact news digest for the analysis prompt, capped at `max_items`.
pub fn format_news_summary(news: &[NewsItem], max_items: usize) -> String {
    if news.is_empty() {
        return "No recent news available.".to_string();
    }
    let lines: Vec<String> = news
        .iter()
        .take(max_items)
        .filter(|item| !item.headline.is_empty())
        .map(|item| {
            let date: String = item.datetime.chars().take(10).collect();
            format!("- [{}] {} ({})", item.sentiment, item.headline, date)
        })
        .collect();
    if lines.is_empty() {
        "No recent news available.".to_string()
    } else {
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(headline: &str, summary: &str) -> NewsItem {
        NewsItem {
            datetime: "2026-01-01 10:00".to_string(),
            headline: headline.to_string(),
            summary: summary.to_string(),
            source: "test".to_string(),
            url: String::new(),
            sentiment: "neutral".to_string(),
            is_global_event: false,
        }
    }

    #[test]
    fn major_event_keyword_filter() {
        assert!(is_major_event(&item("Sanctions package announced", "")));
        assert!(is_major_event(&item("Markets rally", "tension in the middle east eases")));
        assert!(!is_major_event(&item("Quarterly earnings beat estimates", "")));
    }

    #[test]
    fn conflict_words_read_negative() {
        assert_eq!(event_sentiment("War escalates", ""), "negative");
        assert_eq!(event_sentiment("Sanctions review scheduled", ""), "neutral");
    }

    #[test]
    fn news_summary_caps_items() {
        let news: Vec<NewsItem> = (0..10).map(|i| item(&format!("headline {}", i), "")).collect();
        let text = format_news_summary(&news, 5);
        assert_eq!(text.lines().count(), 5);
        assert!(text.contains("headline 0"));
    }

    #[test]
    fn empty_news_summary_placeholder() {
        assert_eq!(format_news_summary(&[], 5), "No recent news available.");
    }
}
