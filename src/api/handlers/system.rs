use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::api::state::AppState;
use crate::api::types::ApiResponse;

/// GET /health — readiness probe for deploy scripts.
pub async fn health_handler(State(state): State<AppState>) -> Response {
    let database_ok = sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(state.store.pool())
        .await
        .is_ok();

    Json(ApiResponse::ok(json!({
        "status": if database_ok { "ok" } else { "degraded" },
        "database": database_ok,
        "uptime_seconds": state.uptime_seconds(),
    })))
    .into_response()
}
