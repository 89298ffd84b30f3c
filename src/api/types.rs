use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::QuantdeskError;

/// Uniform response envelope: `code = 1` success, `code = 0` failure.
/// Business failures still ship HTTP 200; 401/404/500 are reserved for
/// auth, missing entities and unhandled errors.
#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub code: i32,
    pub msg: String,
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            code: 1,
            msg: "success".to_string(),
            data: Some(data),
        }
    }

    pub fn ok_with_msg(msg: impl Into<String>, data: T) -> Self {
        Self {
            code: 1,
            msg: msg.into(),
            data: Some(data),
        }
    }

    pub fn failure(msg: impl Into<String>) -> Self {
        Self {
            code: 0,
            msg: msg.into(),
            data: None,
        }
    }

    pub fn failure_with_data(msg: impl Into<String>, data: T) -> Self {
        Self {
            code: 0,
            msg: msg.into(),
            data: Some(data),
        }
    }
}

/// Map a service error onto the envelope + status policy.
pub fn error_response(err: QuantdeskError) -> Response {
    let status = match &err {
        QuantdeskError::OrderNotFound(_) => StatusCode::NOT_FOUND,
        QuantdeskError::Internal(_) | QuantdeskError::Database(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        _ => StatusCode::OK,
    };
    (
        status,
        Json(ApiResponse::<serde_json::Value>::failure(err.to_string())),
    )
        .into_response()
}

// ============================================================================
// Request types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct FastAnalysisRequest {
    pub market: String,
    pub symbol: String,
    #[serde(default)]
    pub timeframe: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    pub memory_id: i64,
    pub feedback: String,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_page_size")]
    pub page_size: i64,
}

fn default_page() -> i64 {
    1
}

fn default_page_size() -> i64 {
    20
}

#[derive(Debug, Deserialize)]
pub struct PerformanceQuery {
    #[serde(default)]
    pub market: Option<String>,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default = "default_perf_days")]
    pub days: i64,
}

fn default_perf_days() -> i64 {
    30
}

#[derive(Debug, Deserialize)]
pub struct BalanceQuery {
    pub credential_id: i64,
    #[serde(default)]
    pub market_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PositionQuery {
    pub credential_id: i64,
    pub symbol: String,
    #[serde(default)]
    pub market_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TradeHistoryQuery {
    #[serde(default = "default_trade_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_trade_limit() -> i64 {
    50
}

#[derive(Debug, Deserialize)]
pub struct MarketsQuery {
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub sort_by: Option<String>,
    #[serde(default = "default_markets_limit")]
    pub limit: usize,
}

fn default_markets_limit() -> usize {
    50
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: String,
    #[serde(default = "default_search_limit")]
    pub limit: usize,
}

fn default_search_limit() -> usize {
    20
}

#[derive(Debug, Deserialize)]
pub struct RecommendationsQuery {
    #[serde(default = "default_recommendations_limit")]
    pub limit: usize,
}

fn default_recommendations_limit() -> usize {
    10
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeMarketRequest {
    pub market_id: String,
    #[serde(default = "default_true")]
    pub use_cache: bool,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct NewsQuery {
    #[serde(default)]
    pub lang: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_codes() {
        let ok = ApiResponse::ok(42);
        assert_eq!(ok.code, 1);
        assert_eq!(ok.data, Some(42));

        let err = ApiResponse::<i32>::failure("nope");
        assert_eq!(err.code, 0);
        assert!(err.data.is_none());
    }

    #[test]
    fn envelope_serializes_expected_shape() {
        let ok = ApiResponse::ok(serde_json::json!({"x": 1}));
        let text = serde_json::to_string(&ok).unwrap();
        assert!(text.contains("\"code\":1"));
        assert!(text.contains("\"msg\":\"success\""));
    }
}
