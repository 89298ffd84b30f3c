//! Multi-timeframe refinement: signals are generated on the strategy
//! timeframe and executed on a finer timeframe for intra-bar fidelity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::signals::SignalSet;
use crate::domain::{Bar, Market, Timeframe};

/// 1-minute candles stay bounded for performance; 5-minute covers a year.
pub const MAX_1M_DAYS: i64 = 15;
pub const MAX_5M_DAYS: i64 = 365;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PrecisionInfo {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeframe: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub days: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_candles: Option<i64>,
    pub precision: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Pick the execution timeframe for a range, or explain why refinement is
/// unavailable.
pub fn get_execution_timeframe(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    market: Market,
) -> (Option<Timeframe>, PrecisionInfo) {
    let days = (end - start).num_days();

    if market != Market::Crypto {
        return (
            None,
            PrecisionInfo {
                enabled: false,
                precision: "standard".to_string(),
                message: "High-precision backtest only supports the crypto market".to_string(),
                reason: Some("only_crypto".to_string()),
                ..PrecisionInfo::default()
            },
        );
    }

    if days <= MAX_1M_DAYS {
        let estimated = days.max(1) * 24 * 60;
        (
            Some(Timeframe::M1),
            PrecisionInfo {
                enabled: true,
                timeframe: Some("1m".to_string()),
                days: Some(days),
                estimated_candles: Some(estimated),
                precision: "high".to_string(),
                message: format!("Using 1-minute precision (~{} candles)", estimated),
                reason: None,
            },
        )
    } else if days <= MAX_5M_DAYS {
        let estimated = days * 24 * 12;
        (
            Some(Timeframe::M5),
            PrecisionInfo {
                enabled: true,
                timeframe: Some("5m".to_string()),
                days: Some(days),
                estimated_candles: Some(estimated),
                precision: "medium".to_string(),
                message: format!(
                    "Range exceeds {} days, using 5-minute precision (~{} candles)",
                    MAX_1M_DAYS, estimated
                ),
                reason: None,
            },
        )
    } else {
        (
            None,
            PrecisionInfo {
                enabled: false,
                timeframe: None,
                days: Some(days),
                estimated_candles: None,
                precision: "standard".to_string(),
                message: format!(
                    "Backtest range {} days exceeds the {}-day refinement limit",
                    days, MAX_5M_DAYS
                ),
                reason: Some("too_long".to_string()),
            },
        )
    }
}

/// Project strategy-bar signals onto execution bars: a signal confirmed on a
/// closed strategy bar becomes effective at the first execution bar opening
/// at or after the strategy bar's end.
pub fn expand_signals(
    signals: &SignalSet,
    signal_bars: &[Bar],
    signal_timeframe: Timeframe,
    exec_bars: &[Bar],
) -> SignalSet {
    let mut out = SignalSet::empty(exec_bars.len());
    out.both_mode = signals.both_mode;
    if exec_bars.is_empty() {
        return out;
    }

    for (i, signal_bar) in signal_bars.iter().enumerate() {
        if i >= signals.len() {
            break;
        }
        let fires = signals.open_long[i]
            || signals.close_long[i]
            || signals.open_short[i]
            || signals.close_short[i];
        if !fires {
            continue;
        }
        let effective_from = signal_bar.time + signal_timeframe.seconds();
        let Some(target) = exec_bars.iter().position(|b| b.time >= effective_from) else {
            continue;
        };
        out.open_long[target] |= signals.open_long[i];
        out.close_long[target] |= signals.close_long[i];
        out.open_short[target] |= signals.open_short[i];
        out.close_short[target] |= signals.close_short[i];
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn timeframe_selection_thresholds() {
        let now = Utc::now();
        let (tf, info) = get_execution_timeframe(now - Duration::days(10), now, Market::Crypto);
        assert_eq!(tf, Some(Timeframe::M1));
        assert!(info.enabled);
        assert_eq!(info.precision, "high");

        let (tf, info) = get_execution_timeframe(now - Duration::days(100), now, Market::Crypto);
        assert_eq!(tf, Some(Timeframe::M5));
        assert_eq!(info.precision, "medium");

        let (tf, info) = get_execution_timeframe(now - Duration::days(400), now, Market::Crypto);
        assert_eq!(tf, None);
        assert_eq!(info.reason.as_deref(), Some("too_long"));
    }

    #[test]
    fn non_crypto_market_is_excluded() {
        let now = Utc::now();
        let (tf, info) = get_execution_timeframe(now - Duration::days(5), now, Market::UsStock);
        assert_eq!(tf, None);
        assert_eq!(info.reason.as_deref(), Some("only_crypto"));
    }

    #[test]
    fn signals_land_on_first_exec_bar_after_strategy_close() {
        // One 1-hour strategy bar starting at t=0, closing at t=3600
        let signal_bars = vec![Bar::new(0, 1.0, 1.0, 1.0, 1.0, 1.0)];
        let mut signals = SignalSet::empty(1);
        signals.open_long[0] = true;

        // 5m execution bars across two hours
        let exec_bars: Vec<Bar> = (0..24)
            .map(|i| Bar::new(i * 300, 1.0, 1.0, 1.0, 1.0, 1.0))
            .collect();

        let expanded = expand_signals(&signals, &signal_bars, Timeframe::H1, &exec_bars);
        // 3600 / 300 = exec bar 12
        assert!(expanded.open_long[12]);
        assert_eq!(expanded.open_long.iter().filter(|x| **x).count(), 1);
    }

    #[test]
    fn signals_past_the_exec_range_are_dropped() {
        let signal_bars = vec![Bar::new(100_000, 1.0, 1.0, 1.0, 1.0, 1.0)];
        let mut signals = SignalSet::empty(1);
        signals.close_long[0] = true;
        let exec_bars: Vec<Bar> = (0..10)
            .map(|i| Bar::new(i * 300, 1.0, 1.0, 1.0, 1.0, 1.0))
            .collect();
        let expanded = expand_signals(&signals, &signal_bars, Timeframe::H1, &exec_bars);
        assert!(expanded.close_long.iter().all(|x| !x));
    }
}
