use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::str::FromStr;

use super::user_id_from_headers;
use crate::api::state::AppState;
use crate::api::types::*;
use crate::domain::MarketType;
use crate::trading::{ClosePositionRequest, PlaceOrderRequest};

/// POST /api/quick-trade/place-order
pub async fn place_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<PlaceOrderRequest>,
) -> Response {
    let user_id = user_id_from_headers(&headers);
    match state.quick_trade.place_order(user_id, req).await {
        Ok(outcome) => {
            Json(ApiResponse::ok_with_msg("Order placed successfully", outcome)).into_response()
        }
        Err(e) => error_response(e),
    }
}

/// POST /api/quick-trade/close-position
pub async fn close_position(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ClosePositionRequest>,
) -> Response {
    let user_id = user_id_from_headers(&headers);
    match state.quick_trade.close_position(user_id, req).await {
        Ok(outcome) => {
            Json(ApiResponse::ok_with_msg("Position closed successfully", outcome)).into_response()
        }
        Err(e) => error_response(e),
    }
}

/// GET /api/quick-trade/balance?credential_id&market_type
pub async fn quick_trade_balance(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<BalanceQuery>,
) -> Response {
    let user_id = user_id_from_headers(&headers);
    let market_type = query
        .market_type
        .as_deref()
        .and_then(|m| MarketType::from_str(m).ok())
        .unwrap_or_default();
    match state
        .quick_trade
        .get_balance(user_id, query.credential_id, market_type)
        .await
    {
        Ok(balance) => Json(ApiResponse::ok(balance)).into_response(),
        Err(e) => error_response(e),
    }
}

/// GET /api/quick-trade/position?credential_id&symbol&market_type
pub async fn quick_trade_position(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<PositionQuery>,
) -> Response {
    let user_id = user_id_from_headers(&headers);
    let market_type = query
        .market_type
        .as_deref()
        .and_then(|m| MarketType::from_str(m).ok())
        .unwrap_or_default();
    match state
        .quick_trade
        .get_positions(user_id, query.credential_id, &query.symbol, market_type)
        .await
    {
        Ok(positions) => {
            Json(ApiResponse::ok(serde_json::json!({ "positions": positions }))).into_response()
        }
        Err(e) => error_response(e),
    }
}

/// GET /api/quick-trade/history?limit&offset
pub async fn quick_trade_history(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<TradeHistoryQuery>,
) -> Response {
    let user_id = user_id_from_headers(&headers);
    match state
        .quick_trade
        .get_history(user_id, query.limit, query.offset)
        .await
    {
        Ok(trades) => {
            Json(ApiResponse::ok(serde_json::json!({ "trades": trades }))).into_response()
        }
        Err(e) => error_response(e),
    }
}
