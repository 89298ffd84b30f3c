use thiserror::Error;

/// Main error type for the QuantDesk backend
#[derive(Error, Debug)]
pub enum QuantdeskError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Market data errors
    #[error("Market data unavailable: {0}")]
    MarketDataUnavailable(String),

    #[error("Symbol not found: {0}")]
    SymbolNotFound(String),

    #[error("Price unavailable: {0}")]
    PriceUnavailable(String),

    // Analysis errors
    #[error("LLM invocation failed: {0}")]
    LlmInvocationFailed(String),

    #[error("Invalid language: {0}")]
    InvalidLanguage(String),

    // Order execution errors
    #[error("Missing credential: {0}")]
    MissingCredential(String),

    #[error("Invalid side: {0}")]
    InvalidSide(String),

    #[error("Invalid quantity: {0}")]
    InvalidQuantity(String),

    #[error("Invalid price: {0}")]
    InvalidPrice(String),

    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    // Crypto/signing errors
    #[error("Signature error: {0}")]
    Signature(String),

    // Venue errors carry the remote response trimmed for debuggability
    #[error("{venue} HTTP {status}: {body}")]
    VenueHttp {
        venue: &'static str,
        status: u16,
        body: String,
    },

    #[error("{venue} error: {body}")]
    VenueBusiness { venue: &'static str, body: String },

    // Backtest errors
    #[error("Liquidated: {0}")]
    Liquidated(String),

    #[error("Strategy script error: {0}")]
    StrategyScript(String),

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    // Timeouts
    #[error("Timeout: {0}")]
    Timeout(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for QuantdeskError
pub type Result<T> = std::result::Result<T, QuantdeskError>;

impl QuantdeskError {
    /// Build a venue HTTP error with the remote body trimmed to 500 chars.
    pub fn venue_http(venue: &'static str, status: u16, body: &str) -> Self {
        Self::VenueHttp {
            venue,
            status,
            body: trim_body(body),
        }
    }

    /// Build a venue business error with the envelope trimmed to 500 chars.
    pub fn venue_business(venue: &'static str, body: &str) -> Self {
        Self::VenueBusiness {
            venue,
            body: trim_body(body),
        }
    }
}

fn trim_body(body: &str) -> String {
    body.chars().take(500).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn venue_http_trims_body_to_500_chars() {
        let long = "x".repeat(2000);
        let err = QuantdeskError::venue_http("bybit", 502, &long);
        match err {
            QuantdeskError::VenueHttp { status, body, .. } => {
                assert_eq!(status, 502);
                assert_eq!(body.chars().count(), 500);
            }
            _ => panic!("unexpected variant"),
        }
    }

    #[test]
    fn venue_business_keeps_short_body() {
        let err = QuantdeskError::venue_business("okx", "{\"code\":\"51000\"}");
        assert!(err.to_string().contains("51000"));
    }
}
