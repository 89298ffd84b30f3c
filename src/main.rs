use clap::{Parser, Subcommand};
use quantdesk::analysis::AnalysisMemory;
use quantdesk::api::start_api_server;
use quantdesk::backtest::{BacktestEngine, BacktestRequest};
use quantdesk::collector::{FundamentalsSource, MacroAggregator, MarketDataCollector, NewsCollector};
use quantdesk::config::AppConfig;
use quantdesk::datasource::{DataSourceFactory, PolymarketSource};
use quantdesk::error::{QuantdeskError, Result};
use quantdesk::persistence::PgStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "quantdesk", about = "Market-intelligence and decision-support backend")]
struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "quantdesk.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the API server
    Serve {
        /// Override the configured port
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Validate past analysis decisions against realized prices
    ValidateMemory {
        /// Validate decisions made this many days ago
        #[arg(short, long, default_value_t = 7)]
        days: i64,
    },
    /// Run a backtest from a request file (TOML or JSON)
    Backtest {
        /// Request file path
        #[arg(short, long)]
        request: String,
        /// Use multi-timeframe refinement
        #[arg(long, default_value_t = false)]
        mtf: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load_from(&cli.config).unwrap_or_else(|e| {
        warn!("failed to load config: {}, using defaults", e);
        AppConfig::default_config()
    });
    init_logging(&config);

    let problems = config.validate();
    if !problems.is_empty() {
        for p in &problems {
            error!("config: {}", p);
        }
        return Err(QuantdeskError::Validation(problems.join("; ")));
    }

    match cli.command {
        Commands::Serve { port } => {
            let mut config = config;
            if let Some(p) = port {
                config.server.port = p;
            }
            let store = Arc::new(
                PgStore::new(&config.database.url, config.database.max_connections).await?,
            );
            store.migrate().await?;
            start_api_server(&config, store).await?;
        }
        Commands::ValidateMemory { days } => {
            let store =
                PgStore::new(&config.database.url, config.database.max_connections).await?;
            store.migrate().await?;

            let factory = Arc::new(DataSourceFactory::new(&config.datasource)?);
            let collector = Arc::new(MarketDataCollector::new(
                Arc::clone(&factory),
                Arc::new(FundamentalsSource::new(&config.datasource)?),
                Arc::new(NewsCollector::new(&config.datasource)?),
                Arc::new(MacroAggregator::new(
                    factory.equity(),
                    Duration::from_secs(config.collector.macro_cache_ttl_secs),
                )),
                Arc::new(PolymarketSource::new(&config.datasource, Some(store.pool().clone()))?),
            ));
            let memory = AnalysisMemory::new(store.pool().clone());
            let stats = memory.validate_past_decisions(days, collector).await?;
            info!(
                "validated {} decisions: {} correct, {} incorrect, {} errors ({}% accuracy)",
                stats.validated, stats.correct, stats.incorrect, stats.errors, stats.accuracy_pct
            );
        }
        Commands::Backtest { request, mtf } => {
            let raw = std::fs::read_to_string(&request)?;
            let req: BacktestRequest = if request.ends_with(".json") {
                serde_json::from_str(&raw)?
            } else {
                toml::from_str(&raw)
                    .map_err(|e| QuantdeskError::Validation(format!("bad request file: {}", e)))?
            };

            let factory = Arc::new(DataSourceFactory::new(&config.datasource)?);
            let engine = BacktestEngine::new(factory, config.backtest.clone());
            let report = if mtf {
                engine.run_multi_timeframe(&req).await?
            } else {
                engine.run(&req).await?
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(())
}

fn init_logging(config: &AppConfig) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.filter.clone()));

    // The rolling appender aborts if it cannot create its first file, so
    // writability is preflighted before attaching the file layer.
    let file_layer = config.logging.dir.as_deref().and_then(|dir| {
        if std::fs::create_dir_all(dir).is_err() {
            return None;
        }
        let probe = std::path::Path::new(dir).join(".quantdesk_write_test");
        let writable = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&probe)
            .is_ok();
        let _ = std::fs::remove_file(&probe);
        if !writable {
            eprintln!("log dir {} not writable, file logging disabled", dir);
            return None;
        }
        let appender = tracing_appender::rolling::daily(dir, "quantdesk.log");
        Some(tracing_subscriber::fmt::layer().with_writer(appender).with_ansi(false))
    });

    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer());
    match file_layer {
        Some(layer) => registry.with(layer).init(),
        None => registry.init(),
    }
}
