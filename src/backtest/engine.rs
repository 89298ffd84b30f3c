//! Candle-level trading simulator with margin-defined liquidation, risk
//! controls and parameterized scaling ladders.

use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::time::Instant;

use super::config::EffectiveStrategy;
use super::signals::SignalSet;
use crate::domain::Bar;
use crate::error::{QuantdeskError, Result};

/// Below this balance the account is considered wiped out.
const MIN_CAPITAL_TO_TRADE: f64 = 1.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub time: String,
    #[serde(rename = "type")]
    pub trade_type: String,
    pub price: f64,
    pub amount: f64,
    pub profit: f64,
    pub balance: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquityPoint {
    pub time: String,
    pub value: f64,
}

#[derive(Debug, Clone)]
pub struct SimParams {
    pub initial_capital: f64,
    pub commission: f64,
    pub slippage: f64,
    pub leverage: u32,
    /// Execute at bar open (next-bar-open timing or MTF refinement) instead
    /// of bar close
    pub exec_at_open: bool,
    pub strategy: EffectiveStrategy,
}

#[derive(Debug, Clone, Default)]
pub struct SimResult {
    pub equity_curve: Vec<EquityPoint>,
    pub trades: Vec<Trade>,
    pub total_commission: f64,
    pub is_liquidated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PositionType {
    Long,
    Short,
    None,
}

/// Infer the intra-bar price path. Bullish candles dip before they rally;
/// bearish candles rally before they dip.
pub fn candle_path(bar: &Bar) -> [f64; 4] {
    if bar.close >= bar.open {
        [bar.open, bar.low, bar.high, bar.close]
    } else {
        [bar.open, bar.high, bar.low, bar.close]
    }
}

struct Simulator<'a> {
    params: &'a SimParams,
    lev: f64,
    capital: f64,
    position: f64,
    entry_price: f64,
    position_type: PositionType,
    liquidation_price: f64,
    highest_since_entry: Option<f64>,
    lowest_since_entry: Option<f64>,
    trend_add_times: u32,
    dca_add_times: u32,
    trend_reduce_times: u32,
    adverse_reduce_times: u32,
    trend_add_anchor: Option<f64>,
    dca_add_anchor: Option<f64>,
    trend_reduce_anchor: Option<f64>,
    adverse_reduce_anchor: Option<f64>,
    is_liquidated: bool,
    total_commission: f64,
    trades: Vec<Trade>,
    equity_curve: Vec<EquityPoint>,
}

impl<'a> Simulator<'a> {
    fn new(params: &'a SimParams) -> Self {
        Self {
            params,
            lev: params.leverage.max(1) as f64,
            capital: params.initial_capital,
            position: 0.0,
            entry_price: 0.0,
            position_type: PositionType::None,
            liquidation_price: 0.0,
            highest_since_entry: None,
            lowest_since_entry: None,
            trend_add_times: 0,
            dca_add_times: 0,
            trend_reduce_times: 0,
            adverse_reduce_times: 0,
            trend_add_anchor: None,
            dca_add_anchor: None,
            trend_reduce_anchor: None,
            adverse_reduce_anchor: None,
            is_liquidated: false,
            total_commission: 0.0,
            trades: Vec::new(),
            equity_curve: Vec::new(),
        }
    }

    fn record(&mut self, time: &str, trade_type: &str, price: f64, amount: f64, profit: f64) {
        self.trades.push(Trade {
            time: time.to_string(),
            trade_type: trade_type.to_string(),
            price: round4(price),
            amount: round4(amount),
            profit: round2(profit),
            balance: round2(self.capital.max(0.0)),
        });
    }

    fn record_equity(&mut self, time: &str, value: f64) {
        self.equity_curve.push(EquityPoint {
            time: time.to_string(),
            value: round2(value.max(0.0)),
        });
    }

    fn reset_position_state(&mut self) {
        self.position = 0.0;
        self.position_type = PositionType::None;
        self.liquidation_price = 0.0;
        self.highest_since_entry = None;
        self.lowest_since_entry = None;
        self.trend_add_times = 0;
        self.dca_add_times = 0;
        self.trend_reduce_times = 0;
        self.adverse_reduce_times = 0;
        self.trend_add_anchor = None;
        self.dca_add_anchor = None;
        self.trend_reduce_anchor = None;
        self.adverse_reduce_anchor = None;
    }

    fn liquidate(&mut self, time: &str, price: f64, amount: f64) {
        self.capital = 0.0;
        self.is_liquidated = true;
        self.trades.push(Trade {
            time: time.to_string(),
            trade_type: "liquidation".to_string(),
            price: round4(price),
            amount: round4(amount),
            profit: round2(-self.params.initial_capital),
            balance: 0.0,
        });
        self.reset_position_state();
    }
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}

fn bar_time(bar: &Bar) -> String {
    Utc.timestamp_opt(bar.time, 0)
        .single()
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| bar.time.to_string())
}

/// Run the simulation. `deadline` bounds wall-clock; exceeding it fails the
/// run rather than returning partial numbers.
pub fn simulate(
    bars: &[Bar],
    signals: &SignalSet,
    params: &SimParams,
    deadline: Option<Instant>,
) -> Result<SimResult> {
    if bars.is_empty() {
        return Err(QuantdeskError::Validation(
            "no candle data to simulate".to_string(),
        ));
    }
    if signals.len() != bars.len() {
        return Err(QuantdeskError::Validation(format!(
            "signal length {} does not match candle count {}",
            signals.len(),
            bars.len()
        )));
    }

    let st = &params.strategy;
    let mut sim = Simulator::new(params);
    let commission = params.commission;
    let slippage = params.slippage;

    for (i, bar) in bars.iter().enumerate() {
        if sim.is_liquidated {
            break;
        }
        if let Some(deadline) = deadline {
            if Instant::now() > deadline {
                return Err(QuantdeskError::Timeout(
                    "backtest exceeded execution budget".to_string(),
                ));
            }
        }
        let time = bar_time(bar);

        // Wiped out with no position: stop trading
        if sim.position == 0.0 && sim.capital < MIN_CAPITAL_TO_TRADE {
            let price = bar.close;
            sim.liquidate(&time, price, 0.0);
            sim.record_equity(&time, 0.0);
            break;
        }

        let (open, high, low, close) = (bar.open, bar.high, bar.low, bar.close);
        let exec_base = if params.exec_at_open { open } else { close };

        // --- Risk controls: SL / trailing / TP, highest priority ---
        if sim.position != 0.0 {
            match sim.position_type {
                PositionType::Long => {
                    let entry = sim.entry_price;
                    let highest = sim.highest_since_entry.get_or_insert(entry);
                    *highest = highest.max(high);
                    let highest = *highest;
                    let lowest = sim.lowest_since_entry.get_or_insert(entry);
                    *lowest = lowest.min(low);

                    // (priority, type, trigger)
                    let mut candidates: Vec<(u8, &str, f64)> = Vec::new();
                    let sl_price = (st.stop_loss_pct > 0.0).then(|| entry * (1.0 - st.stop_loss_pct));
                    if let Some(sl) = sl_price {
                        if low <= sl {
                            candidates.push((0, "close_long_stop", sl));
                        }
                    }
                    if st.trailing_enabled && st.trailing_pct > 0.0 {
                        let armed = st.trailing_activation_pct <= 0.0
                            || highest >= entry * (1.0 + st.trailing_activation_pct);
                        if armed {
                            let tr = highest * (1.0 - st.trailing_pct);
                            if low <= tr {
                                candidates.push((1, "close_long_trailing", tr));
                            }
                        }
                    }
                    if !st.trailing_enabled && st.take_profit_pct > 0.0 {
                        let tp = entry * (1.0 + st.take_profit_pct);
                        if high >= tp {
                            candidates.push((2, "close_long_profit", tp));
                        }
                    }

                    if let Some((_, trade_type, trigger)) = candidates
                        .into_iter()
                        .min_by(|a, b| a.0.cmp(&b.0).then(a.2.total_cmp(&b.2)))
                    {
                        // Stop vs liquidation in the same bar: the stop only
                        // fires when it is the less adverse price
                        let hit_liq = sim.liquidation_price > 0.0 && low <= sim.liquidation_price;
                        if trade_type == "close_long_stop"
                            && hit_liq
                            && trigger <= sim.liquidation_price
                        {
                            let price = sim.liquidation_price;
                            let amount = sim.position;
                            sim.liquidate(&time, price, amount);
                            sim.record_equity(&time, 0.0);
                            continue;
                        }
                        let exec = trigger * (1.0 - slippage);
                        let fee = sim.position * exec * commission;
                        let profit = (exec - entry) * sim.position - fee;
                        sim.capital += profit;
                        sim.total_commission += fee;
                        let amount = sim.position;
                        sim.record(&time, trade_type, exec, amount, profit);
                        sim.reset_position_state();
                        let capital = sim.capital;
                        sim.record_equity(&time, capital);
                        continue;
                    }
                }
                PositionType::Short => {
                    let entry = sim.entry_price;
                    let lowest = sim.lowest_since_entry.get_or_insert(entry);
                    *lowest = lowest.min(low);
                    let lowest = *lowest;
                    let highest = sim.highest_since_entry.get_or_insert(entry);
                    *highest = highest.max(high);

                    let mut candidates: Vec<(u8, &str, f64)> = Vec::new();
                    let sl_price = (st.stop_loss_pct > 0.0).then(|| entry * (1.0 + st.stop_loss_pct));
                    if let Some(sl) = sl_price {
                        if high >= sl {
                            candidates.push((0, "close_short_stop", sl));
                        }
                    }
                    if st.trailing_enabled && st.trailing_pct > 0.0 {
                        let armed = st.trailing_activation_pct <= 0.0
                            || lowest <= entry * (1.0 - st.trailing_activation_pct);
                        if armed {
                            let tr = lowest * (1.0 + st.trailing_pct);
                            if high >= tr {
                                candidates.push((1, "close_short_trailing", tr));
                            }
                        }
                    }
                    if !st.trailing_enabled && st.take_profit_pct > 0.0 {
                        let tp = entry * (1.0 - st.take_profit_pct);
                        if low <= tp {
                            candidates.push((2, "close_short_profit", tp));
                        }
                    }

                    if let Some((_, trade_type, trigger)) = candidates
                        .into_iter()
                        .min_by(|a, b| a.0.cmp(&b.0).then(b.2.total_cmp(&a.2)))
                    {
                        let hit_liq = sim.liquidation_price > 0.0 && high >= sim.liquidation_price;
                        if trade_type == "close_short_stop"
                            && hit_liq
                            && trigger >= sim.liquidation_price
                        {
                            let price = sim.liquidation_price;
                            let amount = sim.position.abs();
                            sim.liquidate(&time, price, amount);
                            sim.record_equity(&time, 0.0);
                            continue;
                        }
                        let shares = sim.position.abs();
                        let exec = trigger * (1.0 + slippage);
                        let fee = shares * exec * commission;
                        let profit = (entry - exec) * shares - fee;
                        if sim.capital + profit <= 0.0 {
                            sim.liquidate(&time, exec, shares);
                            sim.record_equity(&time, 0.0);
                            continue;
                        }
                        sim.capital += profit;
                        sim.total_commission += fee;
                        sim.record(&time, trade_type, exec, shares, profit);
                        sim.reset_position_state();
                        let capital = sim.capital;
                        sim.record_equity(&time, capital);
                        continue;
                    }
                }
                PositionType::None => {}
            }
        }

        // --- Signal exits ---
        if sim.position > 0.0 && signals.close_long[i] {
            let exec = exec_base * (1.0 - slippage);
            let fee = sim.position * exec * commission;
            let profit = (exec - sim.entry_price) * sim.position - fee;
            sim.capital += profit;
            sim.total_commission += fee;
            let amount = sim.position;
            // A signal close, never labelled as a stop or profit exit
            sim.record(&time, "close_long", exec, amount, profit);
            sim.reset_position_state();
            if sim.capital < MIN_CAPITAL_TO_TRADE {
                sim.liquidate(&time, exec, 0.0);
            }
        } else if sim.position < 0.0 && signals.close_short[i] {
            let shares = sim.position.abs();
            let exec = exec_base * (1.0 + slippage);
            let fee = shares * exec * commission;
            let profit = (sim.entry_price - exec) * shares - fee;
            if sim.capital + profit <= 0.0 {
                sim.liquidate(&time, exec, shares);
                sim.record_equity(&time, 0.0);
                continue;
            }
            sim.capital += profit;
            sim.total_commission += fee;
            sim.record(&time, "close_short", exec, shares, profit);
            sim.reset_position_state();
            if sim.capital < MIN_CAPITAL_TO_TRADE {
                sim.liquidate(&time, exec, 0.0);
            }
        }

        let main_signal_on_bar = signals.open_long[i]
            || signals.open_short[i]
            || signals.close_long[i]
            || signals.close_short[i];

        // --- Scaling ladders; never on a bar that carries a main signal ---
        if !main_signal_on_bar
            && sim.position != 0.0
            && sim.capital >= MIN_CAPITAL_TO_TRADE
            && !sim.is_liquidated
        {
            apply_scaling(&mut sim, st, &time, high, low, commission, slippage);
        }

        // --- Entries ---
        if signals.open_long[i]
            && (sim.position == 0.0 || (signals.both_mode && sim.position < 0.0))
            && sim.capital >= MIN_CAPITAL_TO_TRADE
            && !sim.is_liquidated
        {
            // In both mode an open-long flips any short first
            if signals.both_mode && sim.position < 0.0 {
                let shares = sim.position.abs();
                let exec = open * (1.0 + slippage);
                let fee = shares * exec * commission;
                let profit = (sim.entry_price - exec) * shares - fee;
                sim.capital = (sim.capital + profit).max(0.0);
                sim.total_commission += fee;
                sim.record(&time, "close_short", exec, shares, profit);
                sim.reset_position_state();
                if sim.capital < MIN_CAPITAL_TO_TRADE {
                    sim.liquidate(&time, exec, 0.0);
                    sim.record_equity(&time, 0.0);
                    continue;
                }
            }
            if enter_position(&mut sim, st, &time, bar, exec_base, true, commission, slippage) {
                continue;
            }
        } else if signals.open_short[i]
            && (sim.position == 0.0 || (signals.both_mode && sim.position > 0.0))
            && sim.capital >= MIN_CAPITAL_TO_TRADE
            && !sim.is_liquidated
        {
            if signals.both_mode && sim.position > 0.0 {
                let exec = open * (1.0 - slippage);
                let fee = sim.position * exec * commission;
                let profit = (exec - sim.entry_price) * sim.position - fee;
                sim.capital = (sim.capital + profit).max(0.0);
                sim.total_commission += fee;
                let amount = sim.position;
                sim.record(&time, "close_long", exec, amount, profit);
                sim.reset_position_state();
                if sim.capital < MIN_CAPITAL_TO_TRADE {
                    sim.liquidate(&time, exec, 0.0);
                    sim.record_equity(&time, 0.0);
                    continue;
                }
            }
            if enter_position(&mut sim, st, &time, bar, exec_base, false, commission, slippage) {
                continue;
            }
        }

        // --- Liquidation safety net ---
        if sim.position != 0.0 && !sim.is_liquidated && sim.liquidation_price > 0.0 {
            let hit = match sim.position_type {
                PositionType::Long => low <= sim.liquidation_price,
                PositionType::Short => high >= sim.liquidation_price,
                PositionType::None => false,
            };
            if hit {
                let price = sim.liquidation_price;
                let amount = sim.position.abs();
                sim.liquidate(&time, price, amount);
                sim.record_equity(&time, 0.0);
                continue;
            }
        }

        // --- Mark equity at close ---
        let total_value = match sim.position_type {
            PositionType::Long => sim.capital + (close - sim.entry_price) * sim.position,
            PositionType::Short => {
                sim.capital + (sim.entry_price - close) * sim.position.abs()
            }
            PositionType::None => sim.capital,
        };
        sim.record_equity(&time, total_value);
    }

    // Force exit at range end
    if sim.position != 0.0 && !sim.is_liquidated {
        let last = bars.last().expect("bars checked non-empty");
        let time = bar_time(last);
        if sim.position > 0.0 {
            let exec = last.close * (1.0 - slippage);
            let fee = sim.position * exec * commission;
            let profit = (exec - sim.entry_price) * sim.position - fee;
            sim.capital += profit;
            sim.total_commission += fee;
            let amount = sim.position;
            sim.record(&time, "close_long", exec, amount, profit);
        } else {
            let shares = sim.position.abs();
            let exec = last.close * (1.0 + slippage);
            let fee = shares * exec * commission;
            let profit = (sim.entry_price - exec) * shares - fee;
            if sim.capital + profit <= 0.0 {
                sim.liquidate(&time, exec, shares);
            } else {
                sim.capital += profit;
                sim.total_commission += fee;
                sim.record(&time, "close_short", exec, shares, profit);
            }
        }
        sim.reset_position_state();
        if let Some(point) = sim.equity_curve.last_mut() {
            point.value = round2(sim.capital.max(0.0));
        }
    }

    Ok(SimResult {
        equity_curve: sim.equity_curve,
        trades: sim.trades,
        total_commission: sim.total_commission,
        is_liquidated: sim.is_liquidated,
    })
}

/// Open a position; returns true when the bar also forced an immediate exit
/// (stop or liquidation touched right after entry).
#[allow(clippy::too_many_arguments)]
fn enter_position(
    sim: &mut Simulator,
    st: &EffectiveStrategy,
    time: &str,
    bar: &Bar,
    exec_base: f64,
    long: bool,
    commission: f64,
    slippage: f64,
) -> bool {
    let exec = if long {
        exec_base * (1.0 + slippage)
    } else {
        exec_base * (1.0 - slippage)
    };
    if exec <= 0.0 {
        return false;
    }

    let use_capital = if st.entry_pct > 0.0 && st.entry_pct < 1.0 {
        sim.capital * st.entry_pct
    } else {
        sim.capital
    };
    let shares = (use_capital * sim.lev) / exec;
    let fee = shares * exec * commission;

    sim.position = if long { shares } else { -shares };
    sim.entry_price = exec;
    sim.position_type = if long {
        PositionType::Long
    } else {
        PositionType::Short
    };
    sim.capital -= fee;
    sim.total_commission += fee;
    sim.liquidation_price = if sim.lev > 1.0 {
        if long {
            exec * (1.0 - 1.0 / sim.lev)
        } else {
            exec * (1.0 + 1.0 / sim.lev)
        }
    } else if long {
        0.0
    } else {
        exec * 2.0
    };
    sim.highest_since_entry = Some(exec);
    sim.lowest_since_entry = Some(exec);
    sim.trend_add_anchor = Some(exec);
    sim.dca_add_anchor = Some(exec);
    sim.trend_reduce_anchor = Some(exec);
    sim.adverse_reduce_anchor = Some(exec);
    sim.record(
        time,
        if long { "open_long" } else { "open_short" },
        exec,
        shares,
        0.0,
    );

    // Strict intra-bar stop/liquidation check right after entry: if the bar
    // touches both, the stop fires only when it is the less adverse price.
    let sl_price = (st.stop_loss_pct > 0.0).then(|| {
        if long {
            exec * (1.0 - st.stop_loss_pct)
        } else {
            exec * (1.0 + st.stop_loss_pct)
        }
    });
    let hit_sl = sl_price
        .map(|sl| if long { bar.low <= sl } else { bar.high >= sl })
        .unwrap_or(false);
    let hit_liq = sim.liquidation_price > 0.0
        && if long {
            bar.low <= sim.liquidation_price
        } else {
            bar.high >= sim.liquidation_price
        };
    if !(hit_sl || hit_liq) {
        return false;
    }

    let liq_wins = hit_liq
        && match sl_price {
            None => true,
            Some(sl) => {
                if long {
                    sl <= sim.liquidation_price
                } else {
                    sl >= sim.liquidation_price
                }
            }
        };
    if liq_wins {
        let price = sim.liquidation_price;
        let amount = sim.position.abs();
        sim.liquidate(time, price, amount);
        sim.record_equity(time, 0.0);
        return true;
    }

    let sl = sl_price.expect("stop must exist when liquidation does not win");
    let shares = sim.position.abs();
    let (exec_close, profit) = if long {
        let px = sl * (1.0 - slippage);
        let fee = shares * px * commission;
        sim.total_commission += fee;
        (px, (px - sim.entry_price) * shares - fee)
    } else {
        let px = sl * (1.0 + slippage);
        let fee = shares * px * commission;
        sim.total_commission += fee;
        (px, (sim.entry_price - px) * shares - fee)
    };
    sim.capital += profit;
    if sim.capital <= 0.0 {
        sim.capital = 0.0;
        sim.is_liquidated = true;
    }
    sim.record(
        time,
        if long { "close_long_stop" } else { "close_short_stop" },
        exec_close,
        shares,
        profit,
    );
    sim.reset_position_state();
    let capital = sim.capital;
    sim.record_equity(time, capital);
    true
}

/// Trend-add, DCA-add, trend-reduce and adverse-reduce ladders. Add sizes
/// are a fraction of current capital; reduce sizes a fraction of the
/// position. Anchors advance to the trigger on each fire.
fn apply_scaling(
    sim: &mut Simulator,
    st: &EffectiveStrategy,
    time: &str,
    high: f64,
    low: f64,
    commission: f64,
    slippage: f64,
) {
    let long = sim.position > 0.0;
    let entry = sim.entry_price;

    // Scale in
    let add_rules = [
        (st.trend_add, true),  // trend: with the move
        (st.dca_add, false),   // dca: against the move
    ];
    for (rule, with_trend) in add_rules {
        let times = if with_trend {
            sim.trend_add_times
        } else {
            sim.dca_add_times
        };
        if !rule.allows_more(times) {
            continue;
        }
        let anchor = if with_trend {
            sim.trend_add_anchor.unwrap_or(entry)
        } else {
            sim.dca_add_anchor.unwrap_or(entry)
        };
        // Long trend-add triggers above the anchor, long DCA below; short
        // mirrors both
        let trigger_up = anchor * (1.0 + rule.step_pct);
        let trigger_down = anchor * (1.0 - rule.step_pct);
        let (hit, trigger) = match (long, with_trend) {
            (true, true) => (high >= trigger_up, trigger_up),
            (true, false) => (low <= trigger_down, trigger_down),
            (false, true) => (low <= trigger_down, trigger_down),
            (false, false) => (high >= trigger_up, trigger_up),
        };
        if !hit {
            continue;
        }

        let exec = if long {
            trigger * (1.0 + slippage)
        } else {
            trigger * (1.0 - slippage)
        };
        let use_capital = sim.capital * rule.size_pct;
        if use_capital <= 0.0 || exec <= 0.0 {
            continue;
        }
        let shares_add = (use_capital * sim.lev) / exec;
        let fee = shares_add * exec * commission;

        let old_abs = sim.position.abs();
        let total_cost = old_abs * sim.entry_price + shares_add * exec;
        let new_abs = old_abs + shares_add;
        sim.entry_price = total_cost / new_abs;
        sim.position = if long { new_abs } else { -new_abs };
        sim.capital -= fee;
        sim.total_commission += fee;
        sim.liquidation_price = if sim.lev > 1.0 {
            if long {
                sim.entry_price * (1.0 - 1.0 / sim.lev)
            } else {
                sim.entry_price * (1.0 + 1.0 / sim.lev)
            }
        } else {
            sim.liquidation_price
        };

        let label = if long { "add_long" } else { "add_short" };
        sim.record(time, label, exec, shares_add, 0.0);
        if with_trend {
            sim.trend_add_times += 1;
            sim.trend_add_anchor = Some(trigger);
        } else {
            sim.dca_add_times += 1;
            sim.dca_add_anchor = Some(trigger);
        }
    }

    // Scale out
    let reduce_rules = [
        (st.trend_reduce, true),   // lock in with the move
        (st.adverse_reduce, false), // cut as it goes against
    ];
    for (rule, with_trend) in reduce_rules {
        if sim.position == 0.0 {
            break;
        }
        let times = if with_trend {
            sim.trend_reduce_times
        } else {
            sim.adverse_reduce_times
        };
        if !rule.allows_more(times) {
            continue;
        }
        let anchor = if with_trend {
            sim.trend_reduce_anchor.unwrap_or(entry)
        } else {
            sim.adverse_reduce_anchor.unwrap_or(entry)
        };
        let trigger_up = anchor * (1.0 + rule.step_pct);
        let trigger_down = anchor * (1.0 - rule.step_pct);
        let (hit, trigger) = match (long, with_trend) {
            (true, true) => (high >= trigger_up, trigger_up),
            (true, false) => (low <= trigger_down, trigger_down),
            (false, true) => (low <= trigger_down, trigger_down),
            (false, false) => (high >= trigger_up, trigger_up),
        };
        if !hit {
            continue;
        }

        let shares_reduce = sim.position.abs() * rule.size_pct;
        if shares_reduce <= 0.0 {
            continue;
        }
        let exec = if long {
            trigger * (1.0 - slippage)
        } else {
            trigger * (1.0 + slippage)
        };
        let fee = shares_reduce * exec * commission;
        let profit = if long {
            (exec - sim.entry_price) * shares_reduce - fee
        } else {
            (sim.entry_price - exec) * shares_reduce - fee
        };
        sim.capital += profit;
        sim.total_commission += fee;
        let new_abs = sim.position.abs() - shares_reduce;
        sim.position = if long { new_abs } else { -new_abs };

        let label = if long { "reduce_long" } else { "reduce_short" };
        sim.record(time, label, exec, shares_reduce, profit);
        if with_trend {
            sim.trend_reduce_times += 1;
            sim.trend_reduce_anchor = Some(trigger);
        } else {
            sim.adverse_reduce_times += 1;
            sim.adverse_reduce_anchor = Some(trigger);
        }
        if new_abs <= 0.0 {
            sim.reset_position_state();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::config::{RiskConfig, StrategyConfig, TradeDirection};
    use crate::backtest::signals::SignalSet;

    fn params(leverage: u32, stop_loss_pct: f64) -> SimParams {
        let config = StrategyConfig {
            risk: RiskConfig {
                stop_loss_pct,
                ..RiskConfig::default()
            },
            ..StrategyConfig::default()
        };
        SimParams {
            initial_capital: 10_000.0,
            commission: 0.0,
            slippage: 0.0,
            leverage,
            exec_at_open: false,
            strategy: EffectiveStrategy::resolve(&config, leverage),
        }
    }

    fn flat_bar(t: i64, price: f64) -> Bar {
        Bar::new(t, price, price, price, price, 1.0)
    }

    #[test]
    fn candle_path_by_direction() {
        let bullish = Bar::new(0, 10.0, 12.0, 9.0, 11.0, 1.0);
        assert_eq!(candle_path(&bullish), [10.0, 9.0, 12.0, 11.0]);
        let bearish = Bar::new(0, 11.0, 12.0, 9.0, 10.0, 1.0);
        assert_eq!(candle_path(&bearish), [11.0, 12.0, 9.0, 10.0]);
    }

    #[test]
    fn simple_long_round_trip() {
        let bars = vec![
            flat_bar(0, 100.0),
            flat_bar(60, 100.0),
            flat_bar(120, 110.0),
            flat_bar(180, 110.0),
        ];
        let mut signals = SignalSet::empty(4);
        signals.open_long[1] = true;
        signals.close_long[3] = true;

        let result = simulate(&bars, &signals, &params(1, 0.0), None).unwrap();
        assert!(!result.is_liquidated);
        assert_eq!(result.trades.len(), 2);
        assert_eq!(result.trades[0].trade_type, "open_long");
        assert_eq!(result.trades[1].trade_type, "close_long");
        // 10000/100 = 100 shares, +10 each = +1000
        assert!((result.trades[1].profit - 1000.0).abs() < 1.0);
    }

    #[test]
    fn stop_loss_fires_before_signal_exit() {
        // Entry at 100, margin SL 5% at 10x => price stop at 99.5
        let bars = vec![
            flat_bar(0, 100.0),
            flat_bar(60, 100.0),
            Bar::new(120, 100.0, 100.0, 99.0, 99.2, 1.0),
            flat_bar(180, 99.0),
        ];
        let mut signals = SignalSet::empty(4);
        signals.open_long[1] = true;
        signals.close_long[3] = true;

        let result = simulate(&bars, &signals, &params(10, 5.0), None).unwrap();
        let stop = result
            .trades
            .iter()
            .find(|t| t.trade_type == "close_long_stop")
            .expect("stop exit expected");
        assert!((stop.price - 99.5).abs() < 1e-6);
    }

    #[test]
    fn liquidation_halts_simulation() {
        // 10x long at 100 -> liquidation at 90; bar 2 crashes through it
        let bars = vec![
            flat_bar(0, 100.0),
            flat_bar(60, 100.0),
            Bar::new(120, 95.0, 95.0, 80.0, 85.0, 1.0),
            flat_bar(180, 120.0),
            flat_bar(240, 130.0),
        ];
        let mut signals = SignalSet::empty(5);
        signals.open_long[1] = true;
        signals.open_long[3] = true; // must never execute

        let result = simulate(&bars, &signals, &params(10, 0.0), None).unwrap();
        assert!(result.is_liquidated);
        let last = result.trades.last().unwrap();
        assert_eq!(last.trade_type, "liquidation");
        assert_eq!(last.balance, 0.0);
        // Nothing recorded after the liquidation
        assert_eq!(
            result
                .trades
                .iter()
                .filter(|t| t.trade_type == "open_long")
                .count(),
            1
        );
        // Equity curve never negative
        assert!(result.equity_curve.iter().all(|p| p.value >= 0.0));
    }

    #[test]
    fn stop_wins_over_liquidation_when_less_adverse() {
        // 10x, SL margin 50% => price stop 95 > liquidation 90: stop fires
        let bars = vec![
            flat_bar(0, 100.0),
            flat_bar(60, 100.0),
            Bar::new(120, 100.0, 100.0, 85.0, 88.0, 1.0),
        ];
        let mut signals = SignalSet::empty(3);
        signals.open_long[1] = true;

        let result = simulate(&bars, &signals, &params(10, 50.0), None).unwrap();
        let types: Vec<&str> = result.trades.iter().map(|t| t.trade_type.as_str()).collect();
        assert!(types.contains(&"close_long_stop"));
        assert!(!types.contains(&"liquidation"));
    }

    #[test]
    fn liquidation_wins_when_stop_is_more_adverse() {
        // SL margin 200% at 10x => price stop 80 < liquidation 90
        let bars = vec![
            flat_bar(0, 100.0),
            flat_bar(60, 100.0),
            Bar::new(120, 100.0, 100.0, 75.0, 78.0, 1.0),
        ];
        let mut signals = SignalSet::empty(3);
        signals.open_long[1] = true;

        let result = simulate(&bars, &signals, &params(10, 200.0), None).unwrap();
        let types: Vec<&str> = result.trades.iter().map(|t| t.trade_type.as_str()).collect();
        assert!(types.contains(&"liquidation"));
        assert!(!types.contains(&"close_long_stop"));
    }

    #[test]
    fn both_mode_flips_short_into_long() {
        let bars = vec![
            flat_bar(0, 100.0),
            flat_bar(60, 100.0),
            flat_bar(120, 95.0),
            flat_bar(180, 96.0),
        ];
        let mut signals = SignalSet::from_buy_sell(
            vec![false, false, true, false],
            vec![false, true, false, false],
            TradeDirection::Both,
        );
        signals.filter_direction(TradeDirection::Both);

        let result = simulate(&bars, &signals, &params(1, 0.0), None).unwrap();
        let types: Vec<&str> = result.trades.iter().map(|t| t.trade_type.as_str()).collect();
        // open_short, then close_short + open_long, final forced close_long
        assert_eq!(
            types,
            vec!["open_short", "close_short", "open_long", "close_long"]
        );
    }

    #[test]
    fn forced_exit_at_range_end() {
        let bars = vec![flat_bar(0, 100.0), flat_bar(60, 100.0), flat_bar(120, 104.0)];
        let mut signals = SignalSet::empty(3);
        signals.open_long[1] = true;

        let result = simulate(&bars, &signals, &params(1, 0.0), None).unwrap();
        assert_eq!(result.trades.last().unwrap().trade_type, "close_long");
    }

    #[test]
    fn trailing_stop_locks_in_profit() {
        let config = StrategyConfig {
            risk: RiskConfig {
                stop_loss_pct: 0.0,
                take_profit_pct: 0.0,
                trailing: crate::backtest::config::TrailingConfig {
                    enabled: true,
                    pct: 2.0,
                    activation_pct: 1.0,
                },
            },
            ..StrategyConfig::default()
        };
        let params = SimParams {
            initial_capital: 10_000.0,
            commission: 0.0,
            slippage: 0.0,
            leverage: 1,
            exec_at_open: false,
            strategy: EffectiveStrategy::resolve(&config, 1),
        };
        let bars = vec![
            flat_bar(0, 100.0),
            flat_bar(60, 100.0),
            Bar::new(120, 100.0, 110.0, 100.0, 110.0, 1.0), // run up, arms trail
            Bar::new(180, 110.0, 110.0, 104.0, 104.0, 1.0), // pulls back through trail
        ];
        let mut signals = SignalSet::empty(4);
        signals.open_long[1] = true;

        let result = simulate(&bars, &signals, &params, None).unwrap();
        let trail = result
            .trades
            .iter()
            .find(|t| t.trade_type == "close_long_trailing")
            .expect("trailing exit expected");
        // Trail at highest 110 * 0.98 = 107.8
        assert!((trail.price - 107.8).abs() < 1e-6);
        assert!(trail.profit > 0.0);
    }

    #[test]
    fn scaling_never_runs_on_main_signal_bar() {
        let mut config = StrategyConfig::default();
        config.scale.trend_add = crate::backtest::config::ScaleRuleConfig {
            enabled: true,
            step_pct: 1.0,
            size_pct: 10.0,
            max_times: 5,
        };
        let params = SimParams {
            initial_capital: 10_000.0,
            commission: 0.0,
            slippage: 0.0,
            leverage: 1,
            exec_at_open: false,
            strategy: EffectiveStrategy::resolve(&config, 1),
        };
        // Bar 2 would trigger trend-add but carries the close signal
        let bars = vec![
            flat_bar(0, 100.0),
            flat_bar(60, 100.0),
            Bar::new(120, 100.0, 105.0, 100.0, 105.0, 1.0),
        ];
        let mut signals = SignalSet::empty(3);
        signals.open_long[1] = true;
        signals.close_long[2] = true;

        let result = simulate(&bars, &signals, &params, None).unwrap();
        assert!(result.trades.iter().all(|t| t.trade_type != "add_long"));
    }

    #[test]
    fn trend_add_accumulates_and_reprices_entry() {
        let mut config = StrategyConfig::default();
        config.scale.trend_add = crate::backtest::config::ScaleRuleConfig {
            enabled: true,
            step_pct: 1.0,
            size_pct: 10.0,
            max_times: 1,
        };
        let params = SimParams {
            initial_capital: 10_000.0,
            commission: 0.0,
            slippage: 0.0,
            leverage: 1,
            exec_at_open: false,
            strategy: EffectiveStrategy::resolve(&config, 1),
        };
        let bars = vec![
            flat_bar(0, 100.0),
            flat_bar(60, 100.0),
            Bar::new(120, 100.0, 102.0, 100.0, 102.0, 1.0), // no signal: add fires
            flat_bar(180, 102.0),
        ];
        let mut signals = SignalSet::empty(4);
        signals.open_long[1] = true;

        let result = simulate(&bars, &signals, &params, None).unwrap();
        let adds: Vec<&Trade> = result
            .trades
            .iter()
            .filter(|t| t.trade_type == "add_long")
            .collect();
        assert_eq!(adds.len(), 1);
        assert!((adds[0].price - 101.0).abs() < 1e-6);
    }

    #[test]
    fn alternating_signals_with_stop_never_exit_above_cap() {
        // Spec scenario: buy/sell alternating, 10x, stopLossPct 5% => every
        // closed long exits at a stop (price <= entry * 0.995) or a signal
        let mut bars = Vec::new();
        let mut price = 1000.0;
        for i in 0..300 {
            let drift = if (i / 5) % 2 == 0 { 1.0 } else { -1.2 };
            price += drift;
            bars.push(Bar::new(
                i as i64 * 60,
                price,
                price + 2.0,
                price - 2.0,
                price + drift / 2.0,
                1.0,
            ));
        }
        let len = bars.len();
        let mut buy = vec![false; len];
        let mut sell = vec![false; len];
        for i in (0..len).step_by(10) {
            buy[i] = true;
        }
        for i in (5..len).step_by(10) {
            sell[i] = true;
        }
        let signals = SignalSet::from_buy_sell(buy, sell, TradeDirection::Long);

        let result = simulate(&bars, &signals, &params(10, 5.0), None).unwrap();
        let mut entry = 0.0;
        for t in &result.trades {
            match t.trade_type.as_str() {
                "open_long" => entry = t.price,
                "close_long_stop" => {
                    assert!(t.price <= entry * 0.995 + 1e-6, "stop above threshold");
                }
                "close_long" | "liquidation" => {
                    assert!(t.price <= entry * 1.10 + 1e-6, "exit above 10% of entry");
                }
                _ => {}
            }
        }
    }
}
