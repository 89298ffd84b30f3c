//! Backtest performance metrics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::engine::{EquityPoint, Trade};
use crate::domain::Timeframe;

const RISK_FREE_RATE: f64 = 0.02;
const MAX_EQUITY_POINTS: usize = 500;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BacktestMetrics {
    #[serde(rename = "totalReturn")]
    pub total_return: f64,
    #[serde(rename = "annualReturn")]
    pub annual_return: f64,
    #[serde(rename = "maxDrawdown")]
    pub max_drawdown: f64,
    #[serde(rename = "sharpeRatio")]
    pub sharpe_ratio: f64,
    #[serde(rename = "winRate")]
    pub win_rate: f64,
    #[serde(rename = "profitFactor")]
    pub profit_factor: f64,
    #[serde(rename = "totalTrades")]
    pub total_trades: usize,
    #[serde(rename = "totalProfit")]
    pub total_profit: f64,
    #[serde(rename = "totalCommission")]
    pub total_commission: f64,
}

pub fn calculate_metrics(
    equity_curve: &[EquityPoint],
    trades: &[Trade],
    initial_capital: f64,
    timeframe: Timeframe,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    total_commission: f64,
) -> BacktestMetrics {
    let Some(final_point) = equity_curve.last() else {
        return BacktestMetrics::default();
    };
    let final_value = final_point.value;
    let total_return = if initial_capital > 0.0 {
        (final_value - initial_capital) / initial_capital * 100.0
    } else {
        0.0
    };

    // Simple annualization: compound numbers on a high-return strategy read
    // as nonsense, so annual = total / years
    let years = (end - start).num_seconds() as f64 / 86_400.0 / 365.0;
    let annual_return = if years > 0.0 { total_return / years } else { 0.0 };

    let values: Vec<f64> = equity_curve.iter().map(|p| p.value).collect();

    // Closed trades carry non-zero PnL; entries and adds carry zero
    let closing: Vec<&Trade> = trades.iter().filter(|t| t.profit != 0.0).collect();
    let wins: Vec<&&Trade> = closing.iter().filter(|t| t.profit > 0.0).collect();
    let total_trades = closing.len();
    let win_rate = if total_trades > 0 {
        wins.len() as f64 / total_trades as f64 * 100.0
    } else {
        0.0
    };
    let total_wins: f64 = wins.iter().map(|t| t.profit).sum();
    let total_losses: f64 = closing
        .iter()
        .filter(|t| t.profit < 0.0)
        .map(|t| -t.profit)
        .sum();
    let profit_factor = if total_losses > 0.0 {
        total_wins / total_losses
    } else if total_wins > 0.0 {
        total_wins
    } else {
        0.0
    };

    let metrics = BacktestMetrics {
        total_return: round2(total_return),
        annual_return: round2(annual_return),
        max_drawdown: round2(max_drawdown(&values)),
        sharpe_ratio: round2(sharpe(&values, timeframe)),
        win_rate: round2(win_rate),
        profit_factor: round2(profit_factor),
        total_trades,
        total_profit: round2(final_value - initial_capital),
        total_commission: round2(total_commission),
    };
    scrub(metrics)
}

/// Peak-to-trough drawdown over the equity curve, as a negative percent.
pub fn max_drawdown(values: &[f64]) -> f64 {
    let mut peak = match values.first() {
        Some(v) => *v,
        None => return 0.0,
    };
    let mut max_dd: f64 = 0.0;
    for &value in values {
        if value > peak {
            peak = value;
        }
        if peak > 0.0 {
            let dd = (peak - value) / peak * 100.0;
            max_dd = max_dd.max(dd);
        }
    }
    -max_dd
}

/// Sharpe with a timeframe-aware annualization factor. Post-liquidation
/// zero values are excluded so period returns stay finite.
pub fn sharpe(values: &[f64], timeframe: Timeframe) -> f64 {
    let valid: Vec<f64> = values.iter().copied().filter(|v| *v > 0.0).collect();
    if valid.len() < 2 {
        return 0.0;
    }
    let factor = timeframe.annualization_factor();
    let returns: Vec<f64> = valid
        .windows(2)
        .map(|w| (w[1] - w[0]) / w[0])
        .filter(|r| r.is_finite())
        .collect();
    if returns.is_empty() {
        return 0.0;
    }
    let avg = returns.iter().sum::<f64>() / returns.len() as f64 * factor;
    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / returns.len() as f64;
    let std = variance.sqrt() * factor.sqrt();
    if std == 0.0 || !std.is_finite() {
        return 0.0;
    }
    let value = (avg - RISK_FREE_RATE) / std;
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

/// Keep the equity curve presentable: at most 500 points.
pub fn downsample_equity(curve: Vec<EquityPoint>) -> Vec<EquityPoint> {
    if curve.len() <= MAX_EQUITY_POINTS {
        return curve;
    }
    let step = curve.len() / MAX_EQUITY_POINTS;
    curve
        .into_iter()
        .step_by(step.max(1))
        .collect()
}

/// NaN/Inf never reach serialization.
fn scrub(mut m: BacktestMetrics) -> BacktestMetrics {
    for v in [
        &mut m.total_return,
        &mut m.annual_return,
        &mut m.max_drawdown,
        &mut m.sharpe_ratio,
        &mut m.win_rate,
        &mut m.profit_factor,
        &mut m.total_profit,
        &mut m.total_commission,
    ] {
        if !v.is_finite() {
            *v = 0.0;
        }
    }
    m
}

fn round2(x: f64) -> f64 {
    if x.is_finite() {
        (x * 100.0).round() / 100.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(value: f64) -> EquityPoint {
        EquityPoint {
            time: String::new(),
            value,
        }
    }

    fn trade(profit: f64) -> Trade {
        Trade {
            time: String::new(),
            trade_type: if profit == 0.0 {
                "open_long".to_string()
            } else {
                "close_long".to_string()
            },
            price: 0.0,
            amount: 0.0,
            profit,
            balance: 0.0,
        }
    }

    #[test]
    fn max_drawdown_peak_to_trough() {
        // Peak 120, trough 60: 50% drawdown, reported negative
        let dd = max_drawdown(&[100.0, 120.0, 60.0, 90.0]);
        assert!((dd + 50.0).abs() < 1e-9);
        assert_eq!(max_drawdown(&[]), 0.0);
        assert_eq!(max_drawdown(&[100.0, 110.0, 120.0]), 0.0);
    }

    #[test]
    fn win_rate_over_nonzero_pnl_trades() {
        let trades = vec![trade(0.0), trade(10.0), trade(-5.0), trade(0.0), trade(20.0)];
        let curve = vec![point(10_000.0), point(10_025.0)];
        let m = calculate_metrics(
            &curve,
            &trades,
            10_000.0,
            Timeframe::D1,
            Utc::now() - chrono::Duration::days(365),
            Utc::now(),
            3.0,
        );
        assert_eq!(m.total_trades, 3);
        assert!((m.win_rate - 66.67).abs() < 0.01);
        assert!((m.profit_factor - 6.0).abs() < 1e-9);
        assert!((m.total_commission - 3.0).abs() < 1e-9);
    }

    #[test]
    fn simple_annualization() {
        let curve = vec![point(10_000.0), point(12_000.0)];
        let m = calculate_metrics(
            &curve,
            &[],
            10_000.0,
            Timeframe::D1,
            Utc::now() - chrono::Duration::days(730),
            Utc::now(),
            0.0,
        );
        assert!((m.total_return - 20.0).abs() < 1e-9);
        assert!((m.annual_return - 10.0).abs() < 0.1);
    }

    #[test]
    fn sharpe_ignores_post_liquidation_zeros() {
        let values = vec![100.0, 101.0, 102.0, 0.0, 0.0];
        let s = sharpe(&values, Timeframe::D1);
        assert!(s.is_finite());
    }

    #[test]
    fn downsampling_bounds_points() {
        let curve: Vec<EquityPoint> = (0..2000).map(|i| point(i as f64)).collect();
        let out = downsample_equity(curve);
        assert!(out.len() <= 501);
    }

    #[test]
    fn flat_curve_has_zero_sharpe() {
        assert_eq!(sharpe(&[100.0, 100.0, 100.0], Timeframe::D1), 0.0);
    }
}
