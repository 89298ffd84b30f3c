//! Technical indicator computer.
//!
//! Pure, local computation over a candle window; never suspends. The
//! snapshot feeds both the analysis prompt and the similarity heuristic in
//! analysis memory, so field names are part of the persisted contract.

use serde::{Deserialize, Serialize};

use crate::domain::Bar;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RsiReading {
    pub value: f64,
    /// oversold | overbought | neutral
    pub signal: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MacdReading {
    pub value: f64,
    pub signal_line: f64,
    pub histogram: f64,
    /// bullish | bearish | neutral
    pub signal: String,
    /// golden_cross | death_cross | consolidating
    pub trend: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MovingAverages {
    pub ma5: f64,
    pub ma10: f64,
    pub ma20: f64,
    pub trend: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BollingerBands {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
    /// Band width as percent of the middle band
    pub width: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceLevels {
    pub support: f64,
    pub resistance: f64,
    pub pivot: f64,
    pub s1: f64,
    pub r1: f64,
    pub s2: f64,
    pub r2: f64,
    pub swing_high: f64,
    pub swing_low: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Volatility {
    /// high | medium | low | unknown
    pub level: String,
    pub pct: f64,
    pub atr: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingLevels {
    pub suggested_stop_loss: f64,
    pub suggested_take_profit: f64,
    pub risk_reward_ratio: f64,
}

/// Snapshot of all computed indicators for one candle window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub current_price: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rsi: Option<RsiReading>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub macd: Option<MacdReading>,
    pub moving_averages: MovingAverages,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bollinger: Option<BollingerBands>,
    pub levels: PriceLevels,
    pub volatility: Volatility,
    pub trading_levels: TradingLevels,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_ratio: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_position: Option<f64>,
    pub trend: String,
}

/// Compute the full snapshot. Returns `None` below 5 bars.
pub fn compute(klines: &[Bar]) -> Option<IndicatorSnapshot> {
    if klines.len() < 5 {
        return None;
    }

    let closes: Vec<f64> = klines.iter().map(|k| k.close).collect();
    let highs: Vec<f64> = klines.iter().map(|k| k.high).collect();
    let lows: Vec<f64> = klines.iter().map(|k| k.low).collect();
    let volumes: Vec<f64> = klines.iter().map(|k| k.volume).collect();
    let current_price = *closes.last()?;

    let rsi = (closes.len() >= 15).then(|| {
        let value = wilder_rsi(&closes, 14);
        let signal = if value < 30.0 {
            "oversold"
        } else if value > 70.0 {
            "overbought"
        } else {
            "neutral"
        };
        RsiReading {
            value: round2(value),
            signal: signal.to_string(),
        }
    });

    let macd = (closes.len() >= 26).then(|| {
        let (line, signal_line, histogram) = macd_12_26_9(&closes);
        let (signal, trend) = if line > signal_line && histogram > 0.0 {
            ("bullish", "golden_cross")
        } else if line < signal_line && histogram < 0.0 {
            ("bearish", "death_cross")
        } else {
            ("neutral", "consolidating")
        };
        MacdReading {
            value: round6(line),
            signal_line: round6(signal_line),
            histogram: round6(histogram),
            signal: signal.to_string(),
            trend: trend.to_string(),
        }
    });

    let ma5 = mean(&closes[closes.len() - 5..]);
    let ma10 = if closes.len() >= 10 {
        mean(&closes[closes.len() - 10..])
    } else {
        current_price
    };
    let ma20 = if closes.len() >= 20 {
        mean(&closes[closes.len() - 20..])
    } else {
        current_price
    };

    let ma_trend = if current_price > ma5 && ma5 > ma10 && ma10 > ma20 {
        "strong_uptrend"
    } else if current_price > ma20 {
        "uptrend"
    } else if current_price < ma5 && ma5 < ma10 && ma10 < ma20 {
        "strong_downtrend"
    } else if current_price < ma20 {
        "downtrend"
    } else {
        "sideways"
    };

    let bollinger = (closes.len() >= 20).then(|| bollinger_20_2(&closes));

    // Pivot S/R from the prior bar
    let (pivot, r1, s1, r2, s2) = if klines.len() >= 2 {
        let prev = &klines[klines.len() - 2];
        let pivot = (prev.high + prev.low + prev.close) / 3.0;
        (
            pivot,
            2.0 * pivot - prev.low,
            2.0 * pivot - prev.high,
            pivot + (prev.high - prev.low),
            pivot - (prev.high - prev.low),
        )
    } else {
        (
            current_price,
            current_price * 1.02,
            current_price * 0.98,
            current_price * 1.02,
            current_price * 0.98,
        )
    };

    let swing_window = 20.min(klines.len());
    let swing_high = highs[highs.len() - swing_window..]
        .iter()
        .cloned()
        .fold(f64::MIN, f64::max);
    let swing_low = lows[lows.len() - swing_window..]
        .iter()
        .cloned()
        .fold(f64::MAX, f64::min);

    // Composite S/R: average pivot level, swing extreme and band when present
    let (resistance, support) = match &bollinger {
        Some(bb) => (
            (r1 + swing_high + bb.upper) / 3.0,
            (s1 + swing_low + bb.lower) / 3.0,
        ),
        None => ((r1 + swing_high) / 2.0, (s1 + swing_low) / 2.0),
    };

    let levels = PriceLevels {
        support: round6(support),
        resistance: round6(resistance),
        pivot: round6(pivot),
        s1: round6(s1),
        r1: round6(r1),
        s2: round6(s2),
        r2: round6(r2),
        swing_high: round6(swing_high),
        swing_low: round6(swing_low),
    };

    let (atr, volatility_pct, volatility_level) = if klines.len() >= 14 {
        let atr = average_true_range(klines, 14);
        let pct = if current_price > 0.0 {
            atr / current_price * 100.0
        } else {
            0.0
        };
        let level = if pct > 5.0 {
            "high"
        } else if pct > 2.0 {
            "medium"
        } else {
            "low"
        };
        (atr, pct, level)
    } else {
        (0.0, 0.0, "unknown")
    };

    let volatility = Volatility {
        level: volatility_level.to_string(),
        pct: round2(volatility_pct),
        atr: round6(atr),
    };

    // Stop below support, take below resistance, both tempered by ATR
    let atr_stop = if atr > 0.0 {
        current_price - 2.0 * atr
    } else {
        current_price * 0.95
    };
    let suggested_stop_loss = atr_stop.max(levels.support * 0.99);
    let atr_take = if atr > 0.0 {
        current_price + 3.0 * atr
    } else {
        current_price * 1.05
    };
    let suggested_take_profit = atr_take.min(levels.resistance * 1.01);
    let risk = current_price - suggested_stop_loss;
    let reward = suggested_take_profit - current_price;
    let risk_reward_ratio = if risk > 0.0 {
        round2(reward / risk)
    } else {
        0.0
    };

    let trading_levels = TradingLevels {
        suggested_stop_loss: round6(suggested_stop_loss),
        suggested_take_profit: round6(suggested_take_profit),
        risk_reward_ratio,
    };

    let volume_ratio = (volumes.len() >= 20).then(|| {
        let avg = mean(&volumes[volumes.len() - 20..]);
        if avg > 0.0 {
            round2(volumes[volumes.len() - 1] / avg)
        } else {
            1.0
        }
    });

    let price_position = (closes.len() >= 20).then(|| {
        let high_20 = highs[highs.len() - 20..]
            .iter()
            .cloned()
            .fold(f64::MIN, f64::max);
        let low_20 = lows[lows.len() - 20..]
            .iter()
            .cloned()
            .fold(f64::MAX, f64::min);
        if high_20 > low_20 {
            round1((current_price - low_20) / (high_20 - low_20) * 100.0)
        } else {
            50.0
        }
    });

    Some(IndicatorSnapshot {
        current_price: round6(current_price),
        rsi,
        macd,
        moving_averages: MovingAverages {
            ma5: round6(ma5),
            ma10: round6(ma10),
            ma20: round6(ma20),
            trend: ma_trend.to_string(),
        },
        bollinger,
        levels,
        volatility,
        trading_levels,
        volume_ratio,
        price_position,
        trend: ma_trend.to_string(),
    })
}

/// Wilder RSI over the last `period` gains/losses.
pub fn wilder_rsi(closes: &[f64], period: usize) -> f64 {
    if closes.len() < period + 1 {
        return 50.0;
    }
    let deltas: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();
    let tail = &deltas[deltas.len() - period..];
    let avg_gain: f64 = tail.iter().filter(|d| **d > 0.0).sum::<f64>() / period as f64;
    let avg_loss: f64 = tail.iter().filter(|d| **d < 0.0).map(|d| -d).sum::<f64>() / period as f64;
    if avg_loss == 0.0 {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    100.0 - 100.0 / (1.0 + rs)
}

/// MACD(12, 26, 9) with seeded EMAs; returns (line, signal, histogram).
pub fn macd_12_26_9(closes: &[f64]) -> (f64, f64, f64) {
    let ema12 = ema_series(closes, 12);
    let ema26 = ema_series(closes, 26);
    let macd_line: Vec<f64> = ema12.iter().zip(&ema26).map(|(a, b)| a - b).collect();
    let signal = ema_series(&macd_line, 9);
    let line = *macd_line.last().unwrap_or(&0.0);
    let sig = *signal.last().unwrap_or(&0.0);
    (line, sig, line - sig)
}

fn ema_series(data: &[f64], period: usize) -> Vec<f64> {
    if data.is_empty() {
        return Vec::new();
    }
    let multiplier = 2.0 / (period as f64 + 1.0);
    let mut out = Vec::with_capacity(data.len());
    out.push(data[0]);
    for &x in &data[1..] {
        let prev = *out.last().unwrap();
        out.push((x - prev) * multiplier + prev);
    }
    out
}

fn bollinger_20_2(closes: &[f64]) -> BollingerBands {
    let recent = &closes[closes.len() - 20..];
    let middle = mean(recent);
    let variance = recent.iter().map(|x| (x - middle).powi(2)).sum::<f64>() / 20.0;
    let std = variance.sqrt();
    BollingerBands {
        upper: round6(middle + 2.0 * std),
        middle: round6(middle),
        lower: round6(middle - 2.0 * std),
        width: if middle > 0.0 {
            round2(4.0 * std / middle * 100.0)
        } else {
            0.0
        },
    }
}

/// Arithmetic mean of the last `period` true ranges.
pub fn average_true_range(klines: &[Bar], period: usize) -> f64 {
    if klines.len() < period {
        return 0.0;
    }
    let start = klines.len() - period;
    let mut ranges = Vec::with_capacity(period);
    for i in start..klines.len() {
        let bar = &klines[i];
        if bar.high <= 0.0 || bar.low <= 0.0 {
            continue;
        }
        let prev_close = if i > start {
            klines[i - 1].close
        } else {
            bar.high
        };
        let tr = (bar.high - bar.low)
            .max((bar.high - prev_close).abs())
            .max((bar.low - prev_close).abs());
        ranges.push(tr);
    }
    if ranges.is_empty() {
        0.0
    } else {
        mean(&ranges)
    }
}

fn mean(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    data.iter().sum::<f64>() / data.len() as f64
}

fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

fn round6(x: f64) -> f64 {
    (x * 1_000_000.0).round() / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_bars(n: usize, price: f64) -> Vec<Bar> {
        (0..n)
            .map(|i| Bar::new(i as i64 * 86400, price, price, price, price, 100.0))
            .collect()
    }

    fn trending_bars(n: usize, start: f64, step: f64) -> Vec<Bar> {
        (0..n)
            .map(|i| {
                let close = start + step * i as f64;
                let open = close - step;
                Bar::new(
                    i as i64 * 86400,
                    open,
                    close.max(open) * 1.01,
                    open.min(close) * 0.99,
                    close,
                    100.0 + i as f64,
                )
            })
            .collect()
    }

    #[test]
    fn too_few_bars_yield_none() {
        assert!(compute(&flat_bars(4, 100.0)).is_none());
        assert!(compute(&flat_bars(5, 100.0)).is_some());
    }

    #[test]
    fn rsi_is_100_on_pure_uptrend() {
        let closes: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        assert_eq!(wilder_rsi(&closes, 14), 100.0);
    }

    #[test]
    fn rsi_is_50_on_insufficient_data() {
        assert_eq!(wilder_rsi(&[1.0, 2.0], 14), 50.0);
    }

    #[test]
    fn uptrend_classification() {
        let bars = trending_bars(40, 100.0, 1.0);
        let snap = compute(&bars).unwrap();
        assert!(snap.trend == "strong_uptrend" || snap.trend == "uptrend");
        assert!(snap.macd.as_ref().unwrap().signal == "bullish");
        assert!(snap.rsi.as_ref().unwrap().value > 70.0);
    }

    #[test]
    fn downtrend_classification() {
        let bars = trending_bars(40, 200.0, -1.0);
        let snap = compute(&bars).unwrap();
        assert!(snap.trend == "strong_downtrend" || snap.trend == "downtrend");
    }

    #[test]
    fn trading_levels_bracket_current_price() {
        let bars = trending_bars(40, 100.0, 0.5);
        let snap = compute(&bars).unwrap();
        let c = snap.current_price;
        assert!(snap.trading_levels.suggested_stop_loss < c);
        assert!(snap.trading_levels.suggested_take_profit > c);
        assert!(snap.trading_levels.risk_reward_ratio > 0.0);
    }

    #[test]
    fn stop_uses_two_atr_floor_against_support() {
        let bars = trending_bars(40, 100.0, 0.5);
        let snap = compute(&bars).unwrap();
        let c = snap.current_price;
        let atr = snap.volatility.atr;
        let expected = (c - 2.0 * atr).max(snap.levels.support * 0.99);
        assert!((snap.trading_levels.suggested_stop_loss - expected).abs() < 1e-6);
    }

    #[test]
    fn pivot_levels_match_formula() {
        let bars = trending_bars(10, 100.0, 1.0);
        let snap = compute(&bars).unwrap();
        let prev = &bars[bars.len() - 2];
        let pivot = (prev.high + prev.low + prev.close) / 3.0;
        assert!((snap.levels.pivot - pivot).abs() < 1e-6);
        assert!((snap.levels.r1 - (2.0 * pivot - prev.low)).abs() < 1e-6);
        assert!((snap.levels.s1 - (2.0 * pivot - prev.high)).abs() < 1e-6);
    }

    #[test]
    fn price_position_tops_out_in_uptrend() {
        let bars = trending_bars(40, 100.0, 1.0);
        let snap = compute(&bars).unwrap();
        assert!(snap.price_position.unwrap() > 90.0);
    }

    #[test]
    fn flat_market_is_sideways_with_low_volatility() {
        let bars = flat_bars(30, 100.0);
        let snap = compute(&bars).unwrap();
        assert_eq!(snap.trend, "sideways");
        assert_eq!(snap.volatility.level, "low");
        assert_eq!(snap.volatility.atr, 0.0);
    }
}
