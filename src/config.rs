use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::Path;

use crate::error::Result;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub datasource: DataSourceConfig,
    #[serde(default)]
    pub collector: CollectorConfig,
    #[serde(default)]
    pub backtest: BacktestLimitsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// API server port
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Comma-separated CORS origins; empty means localhost dev defaults
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_api_port(),
            cors_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    /// OpenAI-compatible chat-completions base URL
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_llm_temperature")]
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            api_key: String::new(),
            model: default_llm_model(),
            timeout_secs: default_llm_timeout_secs(),
            temperature: default_llm_temperature(),
        }
    }
}

impl LlmConfig {
    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DataSourceConfig {
    /// Public REST base for crypto klines/tickers
    #[serde(default = "default_crypto_base_url")]
    pub crypto_base_url: String,
    /// Yahoo Finance chart API base for equities/forex/metals
    #[serde(default = "default_equity_base_url")]
    pub equity_base_url: String,
    /// Polymarket Gamma API base
    #[serde(default = "default_gamma_base_url")]
    pub gamma_base_url: String,
    #[serde(default)]
    pub finnhub_api_key: String,
    /// Search-engine fallback for news (Tavily-compatible)
    #[serde(default)]
    pub tavily_api_key: String,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
}

impl Default for DataSourceConfig {
    fn default() -> Self {
        Self {
            crypto_base_url: default_crypto_base_url(),
            equity_base_url: default_equity_base_url(),
            gamma_base_url: default_gamma_base_url(),
            finnhub_api_key: String::new(),
            tavily_api_key: String::new(),
            http_timeout_secs: default_http_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CollectorConfig {
    /// Overall collection budget in seconds
    #[serde(default = "default_collector_timeout_secs")]
    pub timeout_secs: u64,
    /// Macro composite cache TTL in seconds (6 hours)
    #[serde(default = "default_macro_cache_ttl_secs")]
    pub macro_cache_ttl_secs: u64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_collector_timeout_secs(),
            macro_cache_ttl_secs: default_macro_cache_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BacktestLimitsConfig {
    /// Wall-clock budget for a full simulation run, seconds
    #[serde(default = "default_backtest_budget_secs")]
    pub run_budget_secs: u64,
    /// Wall-clock budget for indicator-script evaluation, seconds
    #[serde(default = "default_indicator_budget_secs")]
    pub indicator_budget_secs: u64,
}

impl Default for BacktestLimitsConfig {
    fn default() -> Self {
        Self {
            run_budget_secs: default_backtest_budget_secs(),
            indicator_budget_secs: default_indicator_budget_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_filter")]
    pub filter: String,
    /// Optional directory for daily-rotated log files
    #[serde(default)]
    pub dir: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            dir: None,
        }
    }
}

impl AppConfig {
    /// Load from an optional TOML file layered under `QUANTDESK_*` env vars.
    pub fn load_from(path: &str) -> Result<Self> {
        let mut builder = Config::builder();
        if Path::new(path).exists() {
            builder = builder.add_source(File::with_name(path));
        }
        let cfg = builder
            .add_source(Environment::with_prefix("QUANTDESK").separator("__"))
            .build()?;
        let mut parsed: AppConfig = cfg.try_deserialize()?;
        parsed.apply_env_overrides();
        Ok(parsed)
    }

    /// Minimal default config for tests and offline tooling.
    pub fn default_config() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig {
                url: "postgres://localhost/quantdesk".to_string(),
                max_connections: default_max_connections(),
            },
            llm: LlmConfig::default(),
            datasource: DataSourceConfig::default(),
            collector: CollectorConfig::default(),
            backtest: BacktestLimitsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Validate config invariants. Returns list of problems (empty = valid).
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.database.url.is_empty() {
            errors.push("database.url must not be empty".to_string());
        }
        if self.database.max_connections == 0 {
            errors.push("database.max_connections must be > 0".to_string());
        }
        if self.collector.timeout_secs == 0 {
            errors.push("collector.timeout_secs must be > 0".to_string());
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            errors.push(format!(
                "llm.temperature must be in [0, 2], got {}",
                self.llm.temperature
            ));
        }
        errors
    }

    /// Direct env overrides for the few knobs operators set most often.
    fn apply_env_overrides(&mut self) {
        if let Some(v) = env_string(&["QUANTDESK_DATABASE_URL", "DATABASE_URL"]) {
            self.database.url = v;
        }
        if let Some(v) = env_u16(&["QUANTDESK_API_PORT", "API_PORT"]) {
            self.server.port = v;
        }
        if let Some(v) = env_string(&["QUANTDESK_LLM_API_KEY", "LLM_API_KEY", "OPENAI_API_KEY"]) {
            self.llm.api_key = v;
        }
        if let Some(v) = env_string(&["QUANTDESK_LLM_MODEL", "LLM_MODEL"]) {
            self.llm.model = v;
        }
        if let Some(v) = env_string(&["QUANTDESK_FINNHUB_API_KEY", "FINNHUB_API_KEY"]) {
            self.datasource.finnhub_api_key = v;
        }
    }
}

fn env_string(keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Ok(v) = std::env::var(key) {
            if !v.trim().is_empty() {
                return Some(v);
            }
        }
    }
    None
}

fn env_u16(keys: &[&str]) -> Option<u16> {
    env_string(keys).and_then(|v| v.parse::<u16>().ok())
}

fn default_api_port() -> u16 {
    8081
}

fn default_max_connections() -> u32 {
    10
}

fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_llm_timeout_secs() -> u64 {
    60
}

fn default_llm_temperature() -> f32 {
    0.3
}

fn default_crypto_base_url() -> String {
    "https://api.binance.com".to_string()
}

fn default_equity_base_url() -> String {
    "https://query1.finance.yahoo.com".to_string()
}

fn default_gamma_base_url() -> String {
    "https://gamma-api.polymarket.com".to_string()
}

fn default_http_timeout_secs() -> u64 {
    15
}

fn default_collector_timeout_secs() -> u64 {
    30
}

fn default_macro_cache_ttl_secs() -> u64 {
    21600
}

fn default_backtest_budget_secs() -> u64 {
    60
}

fn default_indicator_budget_secs() -> u64 {
    15
}

fn default_log_filter() -> String {
    "info,quantdesk=debug,sqlx=warn".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let cfg = AppConfig::default_config();
        assert!(cfg.validate().is_empty(), "{:?}", cfg.validate());
    }

    #[test]
    fn validate_flags_bad_temperature() {
        let mut cfg = AppConfig::default_config();
        cfg.llm.temperature = 9.0;
        let errors = cfg.validate();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("temperature"));
    }

    #[test]
    fn validate_flags_empty_database_url() {
        let mut cfg = AppConfig::default_config();
        cfg.database.url.clear();
        assert!(!cfg.validate().is_empty());
    }
}
