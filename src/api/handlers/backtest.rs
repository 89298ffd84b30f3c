use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::warn;

use super::user_id_from_headers;
use crate::api::state::AppState;
use crate::api::types::ApiResponse;
use crate::backtest::BacktestRequest;

/// POST /api/backtest/run
pub async fn run_backtest(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<BacktestRequest>,
) -> Response {
    let user_id = user_id_from_headers(&headers);
    match state.backtest.run(&req).await {
        Ok(report) => {
            if let Err(e) = state.store.record_backtest_run(user_id, &req, &report).await {
                warn!("failed to record backtest run: {}", e);
            }
            Json(ApiResponse::ok(report)).into_response()
        }
        // Backtest failures are client-visible as non-2xx with the first
        // failing stage named in the message
        Err(e) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ApiResponse::<serde_json::Value>::failure(e.to_string())),
        )
            .into_response(),
    }
}

/// POST /api/backtest/run-mtf
pub async fn run_backtest_mtf(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<BacktestRequest>,
) -> Response {
    let user_id = user_id_from_headers(&headers);
    match state.backtest.run_multi_timeframe(&req).await {
        Ok(report) => {
            if let Err(e) = state.store.record_backtest_run(user_id, &req, &report).await {
                warn!("failed to record backtest run: {}", e);
            }
            Json(ApiResponse::ok(report)).into_response()
        }
        Err(e) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ApiResponse::<serde_json::Value>::failure(e.to_string())),
        )
            .into_response(),
    }
}
