use axum::{
    http::{header, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;

use crate::api::{handlers, state::AppState};

fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let mut parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|v| HeaderValue::from_str(v.trim()).ok())
        .collect();
    if parsed.is_empty() {
        parsed.push(HeaderValue::from_static("http://localhost:5173"));
        parsed.push(HeaderValue::from_static("http://127.0.0.1:5173"));
    }

    CorsLayer::new()
        .allow_origin(parsed)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::HeaderName::from_static("x-user-id"),
        ])
}

pub fn create_router(state: AppState, cors_origins: &[String]) -> Router {
    let cors = build_cors_layer(cors_origins);

    Router::new()
        // Readiness probe
        .route("/health", get(handlers::health_handler))
        // Fast analysis
        .route("/api/analysis/fast", post(handlers::fast_analysis))
        .route("/api/analysis/feedback", post(handlers::analysis_feedback))
        .route("/api/analysis/history", get(handlers::analysis_history))
        .route(
            "/api/analysis/history/:id",
            axum::routing::delete(handlers::delete_analysis_history),
        )
        .route(
            "/api/analysis/performance",
            get(handlers::analysis_performance),
        )
        // Quick trade
        .route("/api/quick-trade/place-order", post(handlers::place_order))
        .route(
            "/api/quick-trade/close-position",
            post(handlers::close_position),
        )
        .route("/api/quick-trade/balance", get(handlers::quick_trade_balance))
        .route(
            "/api/quick-trade/position",
            get(handlers::quick_trade_position),
        )
        .route("/api/quick-trade/history", get(handlers::quick_trade_history))
        // Prediction markets
        .route("/api/polymarket/markets", get(handlers::polymarket_markets))
        .route(
            "/api/polymarket/markets/:id",
            get(handlers::polymarket_market_detail),
        )
        .route("/api/polymarket/search", get(handlers::polymarket_search))
        .route(
            "/api/polymarket/recommendations",
            get(handlers::polymarket_recommendations),
        )
        .route("/api/polymarket/analyze", post(handlers::polymarket_analyze))
        // Global market dashboard
        .route("/api/global-market/overview", get(handlers::global_overview))
        .route("/api/global-market/heatmap", get(handlers::global_heatmap))
        .route("/api/global-market/news", get(handlers::global_news))
        .route("/api/global-market/calendar", get(handlers::global_calendar))
        .route("/api/global-market/sentiment", get(handlers::global_sentiment))
        .route(
            "/api/global-market/opportunities",
            get(handlers::global_opportunities),
        )
        // Backtest
        .route("/api/backtest/run", post(handlers::run_backtest))
        .route("/api/backtest/run-mtf", post(handlers::run_backtest_mtf))
        .with_state(state)
        .layer(cors)
}
