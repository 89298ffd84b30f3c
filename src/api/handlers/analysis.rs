use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::str::FromStr;

use crate::api::state::AppState;
use crate::api::types::*;
use crate::domain::{parse_market, Language, Timeframe};

/// POST /api/analysis/fast
pub async fn fast_analysis(
    State(state): State<AppState>,
    Json(req): Json<FastAnalysisRequest>,
) -> Response {
    let market = match parse_market(&req.market) {
        Ok(m) => m,
        Err(e) => return error_response(e),
    };
    let language = match req.language.as_deref() {
        Some(raw) => match Language::parse(raw) {
            Ok(l) => l,
            Err(e) => return error_response(e),
        },
        None => Language::default(),
    };
    let timeframe = req
        .timeframe
        .as_deref()
        .and_then(|t| Timeframe::from_str(t).ok())
        .unwrap_or_default();

    match state
        .engine
        .analyze(market, &req.symbol, language, req.model.as_deref(), timeframe)
        .await
    {
        Ok(result) => {
            if let Some(err) = result.error.clone() {
                Json(ApiResponse::failure_with_data(err, result)).into_response()
            } else {
                Json(ApiResponse::ok(result)).into_response()
            }
        }
        Err(e) => error_response(e),
    }
}

/// POST /api/analysis/feedback
pub async fn analysis_feedback(
    State(state): State<AppState>,
    Json(req): Json<FeedbackRequest>,
) -> Response {
    match state.memory.record_feedback(req.memory_id, &req.feedback).await {
        Ok(updated) => {
            if updated {
                Json(ApiResponse::ok(serde_json::json!({"ok": true}))).into_response()
            } else {
                Json(ApiResponse::<serde_json::Value>::failure(format!(
                    "memory {} not found",
                    req.memory_id
                )))
                .into_response()
            }
        }
        Err(e) => error_response(e),
    }
}

/// GET /api/analysis/history?page&page_size
pub async fn analysis_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Response {
    match state.memory.get_all_history(query.page, query.page_size).await {
        Ok(page) => Json(ApiResponse::ok(page)).into_response(),
        Err(e) => error_response(e),
    }
}

/// DELETE /api/analysis/history/:id
pub async fn delete_analysis_history(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Response {
    match state.memory.delete(id).await {
        Ok(true) => Json(ApiResponse::ok(serde_json::json!({"deleted": true}))).into_response(),
        Ok(false) => Json(ApiResponse::<serde_json::Value>::failure(format!(
            "memory {} not found",
            id
        )))
        .into_response(),
        Err(e) => error_response(e),
    }
}

/// GET /api/analysis/performance?market&symbol&days
pub async fn analysis_performance(
    State(state): State<AppState>,
    Query(query): Query<PerformanceQuery>,
) -> Response {
    match state
        .memory
        .get_performance_stats(query.market.as_deref(), query.symbol.as_deref(), query.days)
        .await
    {
        Ok(stats) => Json(ApiResponse::ok(stats)).into_response(),
        Err(e) => error_response(e),
    }
}
