//! HTTP surface: axum router over the analysis, trading, prediction-market,
//! dashboard and backtest services, with the `{code, msg, data}` envelope.

pub mod handlers;
pub mod routes;
pub mod state;
pub mod types;

use std::sync::Arc;
use tracing::info;

use crate::config::AppConfig;
use crate::error::{QuantdeskError, Result};
use crate::persistence::PgStore;

pub use routes::create_router;
pub use state::AppState;
pub use types::ApiResponse;

/// Bind and serve the API until the process is stopped.
pub async fn start_api_server(config: &AppConfig, store: Arc<PgStore>) -> Result<()> {
    let state = AppState::build(config, store)?;
    let router = create_router(state, &config.server.cors_origins);

    let addr = format!("0.0.0.0:{}", config.server.port);
    info!("API server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| QuantdeskError::Internal(format!("failed to bind {}: {}", addr, e)))?;
    axum::serve(listener, router)
        .await
        .map_err(|e| QuantdeskError::Internal(format!("API server error: {}", e)))?;
    Ok(())
}
