pub mod analysis;
pub mod api;
pub mod backtest;
pub mod cache;
pub mod collector;
pub mod config;
pub mod datasource;
pub mod domain;
pub mod error;
pub mod exchange;
pub mod indicators;
pub mod llm;
pub mod persistence;
pub mod trading;

pub use analysis::{AnalysisMemory, FastAnalysisEngine, PolymarketAnalyzer};
pub use backtest::{BacktestEngine, BacktestReport, BacktestRequest};
pub use cache::TtlCache;
pub use collector::{CollectOptions, CollectedMarketData, MarketDataCollector};
pub use config::AppConfig;
pub use datasource::{DataSourceFactory, PolymarketSource, Ticker};
pub use domain::{
    AnalysisResult, Bar, CanonicalSymbol, Decision, Language, Market, MarketType,
    PredictionAnalysis, PredictionMarket, Recommendation, Timeframe,
};
pub use error::{QuantdeskError, Result};
pub use exchange::{
    create_client, ExchangeCredentials, FillReport, LiveExchangeClient, LiveOrderResult, OrderSide,
};
pub use indicators::IndicatorSnapshot;
pub use llm::LlmClient;
pub use persistence::PgStore;
pub use trading::QuickTradeService;
