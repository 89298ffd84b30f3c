mod analysis;
mod backtest;
mod global_market;
mod polymarket;
mod quick_trade;
mod system;

pub use analysis::*;
pub use backtest::*;
pub use global_market::*;
pub use polymarket::*;
pub use quick_trade::*;
pub use system::*;

use axum::http::HeaderMap;

/// Caller identity comes from the auth layer upstream of this core; the
/// header carries it through, defaulting to the primary operator.
pub(crate) fn user_id_from_headers(headers: &HeaderMap) -> i64 {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .unwrap_or(1)
}
