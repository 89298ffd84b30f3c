//! Backtest engine: candle fetch, indicator-script signals, simulation and
//! metrics, with optional multi-timeframe execution refinement.

mod config;
mod dsl;
mod engine;
mod metrics;
mod mtf;
mod signals;

pub use config::{
    EffectiveStrategy, ExecutionConfig, PositionConfig, RiskConfig, ScaleConfig, ScaleRuleConfig,
    SignalTiming, StrategyConfig, TradeDirection, TrailingConfig,
};
pub use dsl::{run_script, ScriptSignals};
pub use engine::{candle_path, simulate, EquityPoint, SimParams, SimResult, Trade};
pub use metrics::{calculate_metrics, downsample_equity, max_drawdown, sharpe, BacktestMetrics};
pub use mtf::{expand_signals, get_execution_timeframe, PrecisionInfo};
pub use signals::SignalSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::config::BacktestLimitsConfig;
use crate::datasource::DataSourceFactory;
use crate::domain::{Bar, Market, Timeframe};
use crate::error::{QuantdeskError, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct BacktestRequest {
    pub indicator_code: String,
    pub market: Market,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default = "default_capital")]
    pub initial_capital: f64,
    #[serde(default = "default_commission")]
    pub commission: f64,
    #[serde(default)]
    pub slippage: f64,
    #[serde(default = "default_leverage")]
    pub leverage: u32,
    #[serde(default)]
    pub trade_direction: TradeDirection,
    #[serde(default)]
    pub strategy_config: StrategyConfig,
    #[serde(default = "default_true")]
    pub enable_mtf: bool,
}

fn default_capital() -> f64 {
    10_000.0
}

fn default_commission() -> f64 {
    0.001
}

fn default_leverage() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize)]
pub struct BacktestReport {
    #[serde(flatten)]
    pub metrics: BacktestMetrics,
    #[serde(rename = "equityCurve")]
    pub equity_curve: Vec<EquityPoint>,
    pub trades: Vec<Trade>,
    pub is_liquidated: bool,
    pub precision_info: PrecisionInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_timeframe: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal_candles: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_candles: Option<usize>,
}

pub struct BacktestEngine {
    factory: Arc<DataSourceFactory>,
    limits: BacktestLimitsConfig,
}

impl BacktestEngine {
    pub fn new(factory: Arc<DataSourceFactory>, limits: BacktestLimitsConfig) -> Self {
        Self { factory, limits }
    }

    /// Standard single-timeframe backtest.
    pub async fn run(&self, req: &BacktestRequest) -> Result<BacktestReport> {
        validate_request(req)?;
        let bars = self
            .fetch_kline_range(req.market, &req.symbol, req.timeframe, req.start, req.end)
            .await
            .map_err(|e| stage_error("data fetch", e))?;

        let signal_set = self
            .build_signals(&req.indicator_code, &bars, req.trade_direction, &req.strategy_config, req.leverage, true)
            .map_err(|e| stage_error("signal generation", e))?;

        let strategy = EffectiveStrategy::resolve(&req.strategy_config, req.leverage);
        let params = SimParams {
            initial_capital: req.initial_capital,
            commission: req.commission,
            slippage: req.slippage,
            leverage: req.leverage,
            exec_at_open: strategy.signal_timing == SignalTiming::NextBarOpen,
            strategy,
        };
        let deadline = Instant::now() + Duration::from_secs(self.limits.run_budget_secs);
        let result = simulate(&bars, &signal_set, &params, Some(deadline))
            .map_err(|e| stage_error("simulation", e))?;

        let metrics = calculate_metrics(
            &result.equity_curve,
            &result.trades,
            req.initial_capital,
            req.timeframe,
            req.start,
            req.end,
            result.total_commission,
        );
        Ok(BacktestReport {
            metrics,
            equity_curve: downsample_equity(result.equity_curve),
            trades: result.trades,
            is_liquidated: result.is_liquidated,
            precision_info: PrecisionInfo {
                enabled: false,
                timeframe: Some(req.timeframe.as_str().to_string()),
                precision: "standard".to_string(),
                message: "Using standard candle backtest".to_string(),
                ..PrecisionInfo::default()
            },
            execution_timeframe: None,
            signal_candles: Some(bars.len()),
            execution_candles: None,
        })
    }

    /// Multi-timeframe backtest: strategy timeframe for signals, 1m/5m for
    /// execution. Falls back to the standard path when refinement is
    /// unavailable.
    pub async fn run_multi_timeframe(&self, req: &BacktestRequest) -> Result<BacktestReport> {
        validate_request(req)?;
        let (exec_tf, precision_info) = get_execution_timeframe(req.start, req.end, req.market);
        let Some(exec_tf) = exec_tf.filter(|_| req.enable_mtf) else {
            let mut report = self.run(req).await?;
            report.precision_info = precision_info;
            return Ok(report);
        };

        info!(
            "multi-timeframe backtest: strategy_tf={}, exec_tf={}, range={} ~ {}",
            req.timeframe, exec_tf, req.start, req.end
        );

        let signal_bars = self
            .fetch_kline_range(req.market, &req.symbol, req.timeframe, req.start, req.end)
            .await
            .map_err(|e| stage_error("data fetch", e))?;

        // Signals stay un-shifted here: expansion places each one on the
        // first execution bar after its strategy bar closes
        let signals = self
            .build_signals(&req.indicator_code, &signal_bars, req.trade_direction, &req.strategy_config, req.leverage, false)
            .map_err(|e| stage_error("signal generation", e))?;

        let exec_bars = match self
            .fetch_kline_range(req.market, &req.symbol, exec_tf, req.start, req.end)
            .await
        {
            Ok(bars) if !bars.is_empty() => bars,
            other => {
                if let Err(e) = other {
                    warn!("cannot fetch {} candles ({}), falling back", exec_tf, e);
                }
                let mut report = self.run(req).await?;
                report.precision_info = PrecisionInfo {
                    enabled: false,
                    precision: "standard".to_string(),
                    message: format!("Cannot fetch {} data, using standard backtest", exec_tf),
                    reason: Some("data_unavailable".to_string()),
                    ..PrecisionInfo::default()
                };
                return Ok(report);
            }
        };

        let expanded = expand_signals(&signals, &signal_bars, req.timeframe, &exec_bars);
        let strategy = EffectiveStrategy::resolve(&req.strategy_config, req.leverage);
        let params = SimParams {
            initial_capital: req.initial_capital,
            commission: req.commission,
            slippage: req.slippage,
            leverage: req.leverage,
            // Expanded signals are already effective at their bar: act at open
            exec_at_open: true,
            strategy,
        };
        let deadline = Instant::now() + Duration::from_secs(self.limits.run_budget_secs);
        let result = simulate(&exec_bars, &expanded, &params, Some(deadline))
            .map_err(|e| stage_error("simulation", e))?;
        info!("MTF simulation completed: {} trades executed", result.trades.len());

        let metrics = calculate_metrics(
            &result.equity_curve,
            &result.trades,
            req.initial_capital,
            req.timeframe,
            req.start,
            req.end,
            result.total_commission,
        );
        Ok(BacktestReport {
            metrics,
            equity_curve: downsample_equity(result.equity_curve),
            trades: result.trades,
            is_liquidated: result.is_liquidated,
            precision_info,
            execution_timeframe: Some(exec_tf.as_str().to_string()),
            signal_candles: Some(signal_bars.len()),
            execution_candles: Some(exec_bars.len()),
        })
    }

    fn build_signals(
        &self,
        code: &str,
        bars: &[Bar],
        direction: TradeDirection,
        strategy_config: &StrategyConfig,
        leverage: u32,
        apply_timing: bool,
    ) -> Result<SignalSet> {
        let budget = Duration::from_secs(self.limits.indicator_budget_secs);
        let script_signals = run_script(code, bars, budget)?;
        let mut set = match script_signals {
            ScriptSignals::FourWay {
                open_long,
                close_long,
                open_short,
                close_short,
            } => SignalSet::from_four_way(open_long, close_long, open_short, close_short),
            ScriptSignals::BuySell { buy, sell } => {
                SignalSet::from_buy_sell(buy, sell, direction)
            }
        };
        set.filter_direction(direction);
        if apply_timing {
            let strategy = EffectiveStrategy::resolve(strategy_config, leverage);
            set.apply_timing(strategy.signal_timing);
        }
        Ok(set)
    }

    async fn fetch_kline_range(
        &self,
        market: Market,
        symbol: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>> {
        let span_secs = (end - start).num_seconds().max(0);
        let limit = (span_secs / timeframe.seconds() + 2) as usize;
        let mut bars = self
            .factory
            .get_kline(market, symbol, timeframe, limit.max(10), Some(end.timestamp()))
            .await?;
        bars.retain(|b| b.time >= start.timestamp() && b.time <= end.timestamp());
        if bars.is_empty() {
            return Err(QuantdeskError::MarketDataUnavailable(
                "no candle data available in the backtest date range".to_string(),
            ));
        }
        Ok(bars)
    }
}

fn validate_request(req: &BacktestRequest) -> Result<()> {
    if req.indicator_code.trim().is_empty() {
        return Err(QuantdeskError::Validation(
            "indicator_code must not be empty".to_string(),
        ));
    }
    if req.start >= req.end {
        return Err(QuantdeskError::Validation(
            "start must precede end".to_string(),
        ));
    }
    if req.initial_capital <= 0.0 {
        return Err(QuantdeskError::Validation(
            "initial_capital must be > 0".to_string(),
        ));
    }
    if req.leverage == 0 {
        return Err(QuantdeskError::Validation(
            "leverage must be >= 1".to_string(),
        ));
    }
    Ok(())
}

fn stage_error(stage: &str, err: QuantdeskError) -> QuantdeskError {
    QuantdeskError::Validation(format!("{} failed: {}", stage, err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_validation_rules() {
        let raw = serde_json::json!({
            "indicator_code": "buy = close > 0\nsell = close < 0",
            "market": "Crypto",
            "symbol": "BTC/USDT",
            "timeframe": "1D",
            "start": "2026-01-01T00:00:00Z",
            "end": "2026-02-01T00:00:00Z",
        });
        let req: BacktestRequest = serde_json::from_value(raw).unwrap();
        assert!(validate_request(&req).is_ok());

        let mut bad = req.clone();
        bad.indicator_code = String::new();
        assert!(validate_request(&bad).is_err());

        let mut bad = req.clone();
        bad.leverage = 0;
        assert!(validate_request(&bad).is_err());

        let mut bad = req;
        bad.end = bad.start;
        assert!(validate_request(&bad).is_err());
    }

    #[test]
    fn stage_errors_name_the_stage() {
        let err = stage_error(
            "data fetch",
            QuantdeskError::MarketDataUnavailable("nothing".to_string()),
        );
        assert!(err.to_string().contains("data fetch failed"));
    }
}
