use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;

use super::user_id_from_headers;
use crate::api::state::AppState;
use crate::api::types::*;
use crate::domain::{Language, PredictionMarket};

fn sort_markets(markets: &mut [PredictionMarket], sort_by: Option<&str>) {
    let cmp_f64 = |a: f64, b: f64| b.partial_cmp(&a).unwrap_or(std::cmp::Ordering::Equal);
    match sort_by.unwrap_or("volume") {
        "probability" => {
            markets.sort_by(|a, b| cmp_f64(a.current_probability, b.current_probability))
        }
        "liquidity" => markets.sort_by(|a, b| cmp_f64(a.liquidity, b.liquidity)),
        "end_date" => markets.sort_by(|a, b| a.end_date_iso.cmp(&b.end_date_iso)),
        _ => markets.sort_by(|a, b| cmp_f64(a.volume_24h, b.volume_24h)),
    }
}

/// GET /api/polymarket/markets?category&sort_by&limit
pub async fn polymarket_markets(
    State(state): State<AppState>,
    Query(query): Query<MarketsQuery>,
) -> Response {
    match state
        .polymarket_source
        .get_trending_markets(query.category.as_deref(), query.limit)
        .await
    {
        Ok(mut markets) => {
            sort_markets(&mut markets, query.sort_by.as_deref());
            let total = markets.len();
            Json(ApiResponse::ok(serde_json::json!({
                "markets": markets,
                "total": total,
            })))
            .into_response()
        }
        Err(e) => error_response(e),
    }
}

/// GET /api/polymarket/markets/:id
pub async fn polymarket_market_detail(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    match state.polymarket_source.get_market_details(&id).await {
        Ok(Some(market)) => Json(ApiResponse::ok(market)).into_response(),
        Ok(None) => Json(ApiResponse::<serde_json::Value>::failure(format!(
            "market {} not found",
            id
        )))
        .into_response(),
        Err(e) => error_response(e),
    }
}

/// GET /api/polymarket/search?q&limit
pub async fn polymarket_search(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Response {
    match state
        .polymarket_source
        .search_markets(&query.q, query.limit, true)
        .await
    {
        Ok(markets) => {
            let total = markets.len();
            Json(ApiResponse::ok(serde_json::json!({
                "markets": markets,
                "total": total,
            })))
            .into_response()
        }
        Err(e) => error_response(e),
    }
}

/// GET /api/polymarket/recommendations?limit
///
/// Batch path: trending markets through one LLM pass, persisted as the
/// shared (user-agnostic) analysis set.
pub async fn polymarket_recommendations(
    State(state): State<AppState>,
    Query(query): Query<RecommendationsQuery>,
) -> Response {
    let markets = match state.polymarket_source.get_trending_markets(None, 50).await {
        Ok(m) => m,
        Err(e) => return error_response(e),
    };
    let opportunities = state
        .polymarket_analyzer
        .batch_analyze_markets(markets, query.limit)
        .await;
    state
        .polymarket_analyzer
        .save_batch_analysis(&opportunities)
        .await;
    let total = opportunities.len();
    Json(ApiResponse::ok(serde_json::json!({
        "opportunities": opportunities,
        "total": total,
    })))
    .into_response()
}

/// POST /api/polymarket/analyze
pub async fn polymarket_analyze(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<AnalyzeMarketRequest>,
) -> Response {
    let user_id = user_id_from_headers(&headers);
    let language = req
        .language
        .as_deref()
        .and_then(|l| Language::parse(l).ok())
        .unwrap_or_default();
    match state
        .polymarket_analyzer
        .analyze_market(
            &req.market_id,
            Some(user_id),
            req.use_cache,
            language,
            req.model.as_deref(),
        )
        .await
    {
        Ok(analysis) => Json(ApiResponse::ok(analysis)).into_response(),
        Err(e) => error_response(e),
    }
}
