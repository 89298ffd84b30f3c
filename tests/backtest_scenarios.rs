//! End-to-end backtest properties: signal-to-trade mapping, risk-control
//! bounds, liquidation semantics and equity-curve invariants.

use quantdesk::backtest::{
    run_script, simulate, EffectiveStrategy, ScriptSignals, SignalSet, SignalTiming, SimParams,
    StrategyConfig, TradeDirection,
};
use quantdesk::domain::Bar;
use std::time::Duration;

fn make_params(leverage: u32, stop_loss_pct: f64, timing_next_open: bool) -> SimParams {
    let mut config = StrategyConfig::default();
    config.risk.stop_loss_pct = stop_loss_pct;
    config.execution.signal_timing = Some(
        if timing_next_open {
            "next_bar_open"
        } else {
            "bar_close"
        }
        .to_string(),
    );
    let strategy = EffectiveStrategy::resolve(&config, leverage);
    SimParams {
        initial_capital: 10_000.0,
        commission: 0.001,
        slippage: 0.0,
        leverage,
        exec_at_open: strategy.signal_timing == SignalTiming::NextBarOpen,
        strategy,
    }
}

/// Gently oscillating candles: drift up 5 bars, down 5 bars.
fn oscillating_bars(count: usize, base: f64) -> Vec<Bar> {
    let mut bars = Vec::with_capacity(count);
    let mut price = base;
    for i in 0..count {
        let drift = if (i / 5) % 2 == 0 { 0.8 } else { -0.8 };
        let open = price;
        price += drift;
        let close = price;
        bars.push(Bar::new(
            i as i64 * 3600,
            open,
            open.max(close) + 0.5,
            open.min(close) - 0.5,
            close,
            1_000.0,
        ));
    }
    bars
}

#[test]
fn alternating_signals_with_margin_stop_exit_within_bounds() {
    // 30k bars would exercise the same loop; a few thousand keep the test
    // quick while preserving the property being checked
    let bars = oscillating_bars(3_000, 1_000.0);
    let len = bars.len();
    let mut buy = vec![false; len];
    let mut sell = vec![false; len];
    for i in (0..len).step_by(10) {
        buy[i] = true;
    }
    for i in (5..len).step_by(10) {
        sell[i] = true;
    }
    let mut signals = SignalSet::from_buy_sell(buy, sell, TradeDirection::Long);
    let params = make_params(10, 5.0, true);
    signals.apply_timing(params.strategy.signal_timing);

    let result = simulate(&bars, &signals, &params, None).unwrap();
    assert!(!result.trades.is_empty());

    let mut entry = 0.0;
    for trade in &result.trades {
        match trade.trade_type.as_str() {
            "open_long" => entry = trade.price,
            // Margin stop 5% at 10x leverage is a 0.5% price stop
            "close_long_stop" => {
                assert!(
                    trade.price <= entry * 0.995 + 1e-6,
                    "stop exit {} above stop threshold for entry {}",
                    trade.price,
                    entry
                );
            }
            "close_long" => {
                assert!(
                    trade.price <= entry * 1.10 + 1e-6,
                    "signal exit {} more than 10% above entry {}",
                    trade.price,
                    entry
                );
            }
            _ => {}
        }
    }
}

#[test]
fn equity_curve_is_non_negative_and_time_ordered() {
    let bars = oscillating_bars(500, 100.0);
    let len = bars.len();
    let mut buy = vec![false; len];
    let mut sell = vec![false; len];
    for i in (0..len).step_by(7) {
        buy[i] = true;
    }
    for i in (3..len).step_by(7) {
        sell[i] = true;
    }
    let signals = SignalSet::from_buy_sell(buy, sell, TradeDirection::Both);
    let params = make_params(5, 10.0, false);

    let result = simulate(&bars, &signals, &params, None).unwrap();
    for point in &result.equity_curve {
        assert!(point.value >= 0.0, "negative equity at {}", point.time);
    }
    for pair in result.equity_curve.windows(2) {
        assert!(pair[0].time <= pair[1].time, "equity timestamps regressed");
    }
}

#[test]
fn no_trades_recorded_after_liquidation() {
    // One long entry, then a crash through the liquidation price, then a
    // recovery with more entry signals that must never fire
    let mut bars = vec![
        Bar::new(0, 100.0, 100.5, 99.5, 100.0, 1.0),
        Bar::new(3600, 100.0, 100.5, 99.5, 100.0, 1.0),
        Bar::new(7200, 99.0, 99.0, 70.0, 75.0, 1.0),
    ];
    for i in 3..20 {
        let p = 75.0 + i as f64;
        bars.push(Bar::new(i * 3600, p, p + 1.0, p - 1.0, p, 1.0));
    }
    let len = bars.len();
    let mut signals = SignalSet::empty(len);
    signals.open_long[1] = true;
    for i in 5..len {
        signals.open_long[i] = true;
    }
    let params = make_params(10, 0.0, false);

    let result = simulate(&bars, &signals, &params, None).unwrap();
    assert!(result.is_liquidated);

    let liquidation_index = result
        .trades
        .iter()
        .position(|t| t.trade_type == "liquidation")
        .expect("liquidation trade expected");
    assert_eq!(
        liquidation_index,
        result.trades.len() - 1,
        "trades recorded after liquidation"
    );
    // The whole margin is gone
    assert_eq!(result.trades[liquidation_index].balance, 0.0);
}

#[test]
fn dsl_to_simulation_pipeline_runs_end_to_end() {
    let bars = oscillating_bars(200, 500.0);
    let code = r#"
        fast = SMA(close, 3)
        slow = SMA(close, 8)
        buy = CROSSOVER(fast, slow)
        sell = CROSSUNDER(fast, slow)
    "#;
    let script_signals = run_script(code, &bars, Duration::from_secs(15)).unwrap();
    let mut signals = match script_signals {
        ScriptSignals::BuySell { buy, sell } => {
            SignalSet::from_buy_sell(buy, sell, TradeDirection::Long)
        }
        ScriptSignals::FourWay {
            open_long,
            close_long,
            open_short,
            close_short,
        } => SignalSet::from_four_way(open_long, close_long, open_short, close_short),
    };
    let params = make_params(1, 0.0, true);
    signals.apply_timing(params.strategy.signal_timing);

    let result = simulate(&bars, &signals, &params, None).unwrap();
    // Oscillating closes force both crossovers and crossunders
    assert!(result.trades.iter().any(|t| t.trade_type == "open_long"));
    assert!(!result.is_liquidated);
}

#[test]
fn short_liquidation_price_is_above_entry() {
    // Short at 100 with 4x leverage liquidates at 125; spike to 130 wipes it
    let bars = vec![
        Bar::new(0, 100.0, 100.5, 99.5, 100.0, 1.0),
        Bar::new(3600, 100.0, 100.5, 99.5, 100.0, 1.0),
        Bar::new(7200, 101.0, 130.0, 100.0, 128.0, 1.0),
    ];
    let mut signals = SignalSet::empty(3);
    signals.open_short[1] = true;
    let params = make_params(4, 0.0, false);

    let result = simulate(&bars, &signals, &params, None).unwrap();
    assert!(result.is_liquidated);
    let liq = result
        .trades
        .iter()
        .find(|t| t.trade_type == "liquidation")
        .unwrap();
    // entry * (1 + 1/leverage) = 100 * 1.25
    assert!((liq.price - 125.0).abs() < 0.5);
}
