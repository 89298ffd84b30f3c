//! Global market dashboard: aggregated indices, crypto heatmap, news,
//! calendar, sentiment and a simple opportunity scanner. Every endpoint is
//! cache-first; TTLs are tiered per data velocity.

use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};

use crate::api::state::AppState;
use crate::api::types::*;
use crate::collector::format_news_summary;
use crate::domain::{Market, Timeframe};

const HEATMAP_SYMBOLS: [&str; 8] = [
    "BTC/USDT",
    "ETH/USDT",
    "BNB/USDT",
    "SOL/USDT",
    "XRP/USDT",
    "DOGE/USDT",
    "ADA/USDT",
    "AVAX/USDT",
];

const INDEX_SYMBOLS: [(&str, &str); 6] = [
    ("^GSPC", "S&P 500"),
    ("^IXIC", "NASDAQ"),
    ("^DJI", "Dow Jones"),
    ("^N225", "Nikkei 225"),
    ("^HSI", "Hang Seng"),
    ("^FTSE", "FTSE 100"),
];

/// GET /api/global-market/overview
pub async fn global_overview(State(state): State<AppState>) -> Response {
    let key = "overview".to_string();
    if let Some(cached) = state.global_caches.overview.get(&key) {
        return Json(ApiResponse::ok(cached)).into_response();
    }

    let mut indices = Vec::new();
    for (symbol, name) in INDEX_SYMBOLS {
        if let Ok(t) = state.factory.get_ticker(Market::Futures, symbol).await {
            indices.push(json!({
                "symbol": symbol,
                "name": name,
                "price": t.last,
                "change": t.change,
                "changePercent": t.change_percent,
            }));
        }
    }

    let mut crypto = Vec::new();
    for symbol in ["BTC/USDT", "ETH/USDT"] {
        if let Ok(t) = state.factory.get_ticker(Market::Crypto, symbol).await {
            crypto.push(json!({
                "symbol": symbol,
                "price": t.last,
                "changePercent": t.change_percent,
            }));
        }
    }

    let data = json!({"indices": indices, "crypto": crypto});
    state.global_caches.overview.insert(key, data.clone());
    Json(ApiResponse::ok(data)).into_response()
}

/// GET /api/global-market/heatmap
pub async fn global_heatmap(State(state): State<AppState>) -> Response {
    let key = "heatmap".to_string();
    if let Some(cached) = state.global_caches.heatmap.get(&key) {
        return Json(ApiResponse::ok(cached)).into_response();
    }

    let mut tiles = Vec::new();
    for symbol in HEATMAP_SYMBOLS {
        if let Ok(t) = state.factory.get_ticker(Market::Crypto, symbol).await {
            tiles.push(json!({
                "symbol": symbol,
                "price": t.last,
                "changePercent": t.change_percent,
                "high": t.high,
                "low": t.low,
            }));
        }
    }

    let data = json!({"crypto": tiles});
    state.global_caches.heatmap.insert(key, data.clone());
    Json(ApiResponse::ok(data)).into_response()
}

/// GET /api/global-market/news?lang
pub async fn global_news(
    State(state): State<AppState>,
    Query(query): Query<NewsQuery>,
) -> Response {
    let key = format!("news:{}", query.lang.as_deref().unwrap_or("en"));
    if let Some(cached) = state.global_caches.news.get(&key) {
        return Json(ApiResponse::ok(cached)).into_response();
    }

    let bundle = state.news.get_news(Market::Crypto, "market", None).await;
    let summary = format_news_summary(&bundle.news, 10);
    let data = json!({
        "news": bundle.news,
        "summary": summary,
    });
    state.global_caches.news.insert(key, data.clone());
    Json(ApiResponse::ok(data)).into_response()
}

/// GET /api/global-market/calendar
///
/// Economic calendar via the structured provider; degrades to an empty list
/// when the provider is not configured.
pub async fn global_calendar(State(state): State<AppState>) -> Response {
    let key = "calendar".to_string();
    if let Some(cached) = state.global_caches.calendar.get(&key) {
        return Json(ApiResponse::ok(cached)).into_response();
    }

    let events = fetch_economic_calendar().await.unwrap_or_default();
    let data = json!({"events": events});
    state.global_caches.calendar.insert(key, data.clone());
    Json(ApiResponse::ok(data)).into_response()
}

/// Structured economic calendar; degrades to None without the provider key.
async fn fetch_economic_calendar() -> Option<Vec<Value>> {
    let api_key = std::env::var("FINNHUB_API_KEY")
        .ok()
        .or_else(|| std::env::var("QUANTDESK_FINNHUB_API_KEY").ok())?;
    let raw: Value = reqwest::Client::new()
        .get("https://finnhub.io/api/v1/calendar/economic")
        .query(&[("token", api_key.as_str())])
        .send()
        .await
        .ok()?
        .json()
        .await
        .ok()?;
    let events = raw["economicCalendar"].as_array()?.clone();
    Some(
        events
            .into_iter()
            .take(50)
            .map(|e| {
                json!({
                    "time": e["time"],
                    "country": e["country"],
                    "event": e["event"],
                    "impact": e["impact"],
                    "actual": e["actual"],
                    "estimate": e["estimate"],
                    "prev": e["prev"],
                })
            })
            .collect(),
    )
}

/// GET /api/global-market/sentiment
pub async fn global_sentiment(State(state): State<AppState>) -> Response {
    // The aggregator already runs its own six-hour composite cache
    let snapshot = state.macro_agg.get_snapshot().await;
    Json(ApiResponse::ok(json!({ "sentiment": snapshot }))).into_response()
}

/// GET /api/global-market/opportunities
///
/// Cheap rule scan over the liquid crypto set: RSI extremes plus a MACD
/// signal read as mean-reversion or continuation candidates.
pub async fn global_opportunities(State(state): State<AppState>) -> Response {
    let key = "opportunities".to_string();
    if let Some(cached) = state.global_caches.opportunities.get(&key) {
        return Json(ApiResponse::ok(cached)).into_response();
    }

    let mut opportunities = Vec::new();
    for symbol in HEATMAP_SYMBOLS {
        let Ok(bars) = state
            .factory
            .get_kline(Market::Crypto, symbol, Timeframe::D1, 60, None)
            .await
        else {
            continue;
        };
        let Some(snapshot) = crate::indicators::compute(&bars) else {
            continue;
        };
        let rsi = snapshot.rsi.as_ref().map(|r| r.value).unwrap_or(50.0);
        let macd_signal = snapshot
            .macd
            .as_ref()
            .map(|m| m.signal.clone())
            .unwrap_or_else(|| "neutral".to_string());

        let (signal, reason) = if rsi < 30.0 {
            ("oversold_bounce", format!("RSI {:.1} oversold", rsi))
        } else if rsi > 70.0 && macd_signal == "bearish" {
            (
                "overbought_reversal",
                format!("RSI {:.1} overbought with bearish MACD", rsi),
            )
        } else if snapshot.trend == "strong_uptrend" && macd_signal == "bullish" {
            ("trend_continuation", "strong uptrend with bullish MACD".to_string())
        } else {
            continue;
        };

        opportunities.push(json!({
            "symbol": symbol,
            "signal": signal,
            "reason": reason,
            "rsi": rsi,
            "trend": snapshot.trend,
            "price": snapshot.current_price,
        }));
    }

    let data = json!({"opportunities": opportunities});
    state.global_caches.opportunities.insert(key, data.clone());
    Json(ApiResponse::ok(data)).into_response()
}
