use std::sync::Arc;
use std::time::Duration;

use crate::analysis::{AnalysisMemory, FastAnalysisEngine, PolymarketAnalyzer};
use crate::backtest::BacktestEngine;
use crate::cache::TtlCache;
use crate::collector::{FundamentalsSource, MacroAggregator, MarketDataCollector, NewsCollector};
use crate::config::AppConfig;
use crate::datasource::{DataSourceFactory, PolymarketSource};
use crate::error::Result;
use crate::llm::LlmClient;
use crate::persistence::PgStore;
use crate::trading::QuickTradeService;

/// Endpoint caches for the global-market dashboard, TTLs fixed at startup.
pub struct GlobalMarketCaches {
    pub overview: TtlCache<String, serde_json::Value>,
    pub heatmap: TtlCache<String, serde_json::Value>,
    pub news: TtlCache<String, serde_json::Value>,
    pub calendar: TtlCache<String, serde_json::Value>,
    pub opportunities: TtlCache<String, serde_json::Value>,
}

impl GlobalMarketCaches {
    fn new() -> Self {
        Self {
            overview: TtlCache::new(Duration::from_secs(120)),
            heatmap: TtlCache::new(Duration::from_secs(120)),
            news: TtlCache::new(Duration::from_secs(180)),
            calendar: TtlCache::new(Duration::from_secs(3600)),
            opportunities: TtlCache::new(Duration::from_secs(60)),
        }
    }
}

/// Shared application state for API handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<PgStore>,
    pub factory: Arc<DataSourceFactory>,
    pub collector: Arc<MarketDataCollector>,
    pub macro_agg: Arc<MacroAggregator>,
    pub news: Arc<NewsCollector>,
    pub engine: Arc<FastAnalysisEngine>,
    pub memory: Arc<AnalysisMemory>,
    pub polymarket_source: Arc<PolymarketSource>,
    pub polymarket_analyzer: Arc<PolymarketAnalyzer>,
    pub quick_trade: Arc<QuickTradeService>,
    pub backtest: Arc<BacktestEngine>,
    pub global_caches: Arc<GlobalMarketCaches>,
    pub start_time: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    /// Wire every service from config + store. Caches and clients are built
    /// once here and shared.
    pub fn build(config: &AppConfig, store: Arc<PgStore>) -> Result<Self> {
        let factory = Arc::new(DataSourceFactory::new(&config.datasource)?);
        let fundamentals = Arc::new(FundamentalsSource::new(&config.datasource)?);
        let news = Arc::new(NewsCollector::new(&config.datasource)?);
        let macro_agg = Arc::new(MacroAggregator::new(
            factory.equity(),
            Duration::from_secs(config.collector.macro_cache_ttl_secs),
        ));
        let polymarket_source = Arc::new(PolymarketSource::new(
            &config.datasource,
            Some(store.pool().clone()),
        )?);
        let collector = Arc::new(MarketDataCollector::new(
            Arc::clone(&factory),
            fundamentals,
            Arc::clone(&news),
            Arc::clone(&macro_agg),
            Arc::clone(&polymarket_source),
        ));
        let llm = Arc::new(LlmClient::new(config.llm.clone())?);
        let memory = Arc::new(AnalysisMemory::new(store.pool().clone()));
        let engine = Arc::new(FastAnalysisEngine::new(
            Arc::clone(&collector),
            Arc::clone(&llm),
            Arc::clone(&memory),
        ));
        let polymarket_analyzer = Arc::new(PolymarketAnalyzer::new(
            Arc::clone(&llm),
            Arc::clone(&collector),
            Arc::clone(&polymarket_source),
            store.pool().clone(),
        ));
        let quick_trade = Arc::new(QuickTradeService::new(store.pool().clone()));
        let backtest = Arc::new(BacktestEngine::new(
            Arc::clone(&factory),
            config.backtest.clone(),
        ));

        Ok(Self {
            store,
            factory,
            collector,
            macro_agg,
            news,
            engine,
            memory,
            polymarket_source,
            polymarket_analyzer,
            quick_trade,
            backtest,
            global_caches: Arc::new(GlobalMarketCaches::new()),
            start_time: chrono::Utc::now(),
        })
    }

    pub fn uptime_seconds(&self) -> i64 {
        (chrono::Utc::now() - self.start_time).num_seconds()
    }
}
