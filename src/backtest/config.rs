//! Strategy configuration: signals + parameters = strategy.
//!
//! All percentage knobs are margin-PnL percentages; price thresholds are
//! derived by dividing by leverage (10x with 5% stop means a 0.5% move).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalTiming {
    BarClose,
    NextBarOpen,
}

impl Default for SignalTiming {
    fn default() -> Self {
        Self::NextBarOpen
    }
}

impl SignalTiming {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "bar_close" | "barclose" | "close" => Self::BarClose,
            _ => Self::NextBarOpen,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeDirection {
    Long,
    Short,
    Both,
}

impl Default for TradeDirection {
    fn default() -> Self {
        Self::Long
    }
}

impl TradeDirection {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "short" => Self::Short,
            "both" | "all" => Self::Both,
            _ => Self::Long,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    #[serde(rename = "signalTiming")]
    pub signal_timing: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PositionConfig {
    /// Fraction of capital per entry; accepts 0..1 or 0..100
    #[serde(rename = "entryPct")]
    pub entry_pct: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrailingConfig {
    pub enabled: bool,
    pub pct: f64,
    #[serde(rename = "activationPct")]
    pub activation_pct: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    #[serde(rename = "stopLossPct")]
    pub stop_loss_pct: f64,
    #[serde(rename = "takeProfitPct")]
    pub take_profit_pct: f64,
    pub trailing: TrailingConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScaleRuleConfig {
    pub enabled: bool,
    #[serde(rename = "stepPct")]
    pub step_pct: f64,
    #[serde(rename = "sizePct")]
    pub size_pct: f64,
    #[serde(rename = "maxTimes")]
    pub max_times: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScaleConfig {
    #[serde(rename = "trendAdd")]
    pub trend_add: ScaleRuleConfig,
    #[serde(rename = "dcaAdd")]
    pub dca_add: ScaleRuleConfig,
    #[serde(rename = "trendReduce")]
    pub trend_reduce: ScaleRuleConfig,
    #[serde(rename = "adverseReduce")]
    pub adverse_reduce: ScaleRuleConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    pub execution: ExecutionConfig,
    pub position: PositionConfig,
    pub risk: RiskConfig,
    pub scale: ScaleConfig,
}

/// One scaling ladder with thresholds already divided by leverage.
#[derive(Debug, Clone, Copy, Default)]
pub struct EffectiveScaleRule {
    pub enabled: bool,
    pub step_pct: f64,
    pub size_pct: f64,
    pub max_times: u32,
}

impl EffectiveScaleRule {
    fn from(rule: &ScaleRuleConfig, leverage: f64) -> Self {
        Self {
            enabled: rule.enabled && rule.step_pct > 0.0 && rule.size_pct > 0.0,
            step_pct: rule.step_pct / 100.0 / leverage,
            size_pct: rule.size_pct / 100.0,
            max_times: rule.max_times,
        }
    }

    pub fn allows_more(&self, times: u32) -> bool {
        self.enabled && (self.max_times == 0 || times < self.max_times)
    }
}

/// Strategy config resolved into price-space thresholds.
#[derive(Debug, Clone, Copy)]
pub struct EffectiveStrategy {
    pub signal_timing: SignalTiming,
    pub entry_pct: f64,
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
    pub trailing_enabled: bool,
    pub trailing_pct: f64,
    pub trailing_activation_pct: f64,
    pub trend_add: EffectiveScaleRule,
    pub dca_add: EffectiveScaleRule,
    pub trend_reduce: EffectiveScaleRule,
    pub adverse_reduce: EffectiveScaleRule,
}

impl EffectiveStrategy {
    pub fn resolve(config: &StrategyConfig, leverage: u32) -> Self {
        let lev = leverage.max(1) as f64;

        let signal_timing = config
            .execution
            .signal_timing
            .as_deref()
            .map(SignalTiming::parse)
            .unwrap_or_default();

        // entryPct accepts 0..1 or 0..100; normalize and clamp
        let mut entry_pct = config.position.entry_pct.unwrap_or(1.0);
        if entry_pct > 1.0 {
            entry_pct /= 100.0;
        }
        entry_pct = entry_pct.clamp(0.0, 1.0);

        let stop_loss_pct = (config.risk.stop_loss_pct / 100.0 / lev).max(0.0);
        let mut take_profit_pct = (config.risk.take_profit_pct / 100.0 / lev).max(0.0);
        let trailing = &config.risk.trailing;
        let trailing_enabled = trailing.enabled && trailing.pct > 0.0;
        let trailing_pct = (trailing.pct / 100.0 / lev).max(0.0);
        let mut trailing_activation_pct = (trailing.activation_pct / 100.0 / lev).max(0.0);

        // Conflict rule: trailing wins over the fixed take-profit. When
        // activation is unset, the take-profit threshold arms the trail.
        if trailing_enabled {
            if trailing_activation_pct <= 0.0 && take_profit_pct > 0.0 {
                trailing_activation_pct = take_profit_pct;
            }
            take_profit_pct = 0.0;
        }

        Self {
            signal_timing,
            entry_pct,
            stop_loss_pct,
            take_profit_pct,
            trailing_enabled,
            trailing_pct,
            trailing_activation_pct,
            trend_add: EffectiveScaleRule::from(&config.scale.trend_add, lev),
            dca_add: {
                let mut dca = EffectiveScaleRule::from(&config.scale.dca_add, lev);
                // Trend and DCA scale-in would double-trigger inside one
                // candle where both high and low are hit; trend wins.
                if config.scale.trend_add.enabled && dca.enabled {
                    dca.enabled = false;
                }
                dca
            },
            trend_reduce: EffectiveScaleRule::from(&config.scale.trend_reduce, lev),
            adverse_reduce: EffectiveScaleRule::from(&config.scale.adverse_reduce, lev),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn margin_pct_divided_by_leverage() {
        let config = StrategyConfig {
            risk: RiskConfig {
                stop_loss_pct: 5.0,
                take_profit_pct: 10.0,
                ..RiskConfig::default()
            },
            ..StrategyConfig::default()
        };
        let eff = EffectiveStrategy::resolve(&config, 10);
        assert!((eff.stop_loss_pct - 0.005).abs() < 1e-12);
        assert!((eff.take_profit_pct - 0.01).abs() < 1e-12);
    }

    #[test]
    fn trailing_disables_fixed_take_profit_and_borrows_activation() {
        let config = StrategyConfig {
            risk: RiskConfig {
                stop_loss_pct: 5.0,
                take_profit_pct: 10.0,
                trailing: TrailingConfig {
                    enabled: true,
                    pct: 3.0,
                    activation_pct: 0.0,
                },
            },
            ..StrategyConfig::default()
        };
        let eff = EffectiveStrategy::resolve(&config, 1);
        assert!(eff.trailing_enabled);
        assert_eq!(eff.take_profit_pct, 0.0);
        assert!((eff.trailing_activation_pct - 0.10).abs() < 1e-12);
    }

    #[test]
    fn entry_pct_accepts_percent_units() {
        let mut config = StrategyConfig::default();
        config.position.entry_pct = Some(50.0);
        assert!((EffectiveStrategy::resolve(&config, 1).entry_pct - 0.5).abs() < 1e-12);
        config.position.entry_pct = Some(0.25);
        assert!((EffectiveStrategy::resolve(&config, 1).entry_pct - 0.25).abs() < 1e-12);
    }

    #[test]
    fn trend_add_disables_dca_add() {
        let mut config = StrategyConfig::default();
        config.scale.trend_add = ScaleRuleConfig {
            enabled: true,
            step_pct: 2.0,
            size_pct: 10.0,
            max_times: 3,
        };
        config.scale.dca_add = ScaleRuleConfig {
            enabled: true,
            step_pct: 2.0,
            size_pct: 10.0,
            max_times: 3,
        };
        let eff = EffectiveStrategy::resolve(&config, 1);
        assert!(eff.trend_add.enabled);
        assert!(!eff.dca_add.enabled);
    }

    #[test]
    fn max_times_zero_means_unlimited() {
        let rule = EffectiveScaleRule {
            enabled: true,
            step_pct: 0.01,
            size_pct: 0.1,
            max_times: 0,
        };
        assert!(rule.allows_more(999));
        let capped = EffectiveScaleRule {
            max_times: 2,
            ..rule
        };
        assert!(capped.allows_more(1));
        assert!(!capped.allows_more(2));
    }

    #[test]
    fn config_parses_wire_schema() {
        let raw = serde_json::json!({
            "execution": {"signalTiming": "bar_close"},
            "position": {"entryPct": 0.5},
            "risk": {
                "stopLossPct": 5, "takeProfitPct": 10,
                "trailing": {"enabled": true, "pct": 2, "activationPct": 4}
            },
            "scale": {
                "trendAdd": {"enabled": true, "stepPct": 3, "sizePct": 20, "maxTimes": 2}
            }
        });
        let config: StrategyConfig = serde_json::from_value(raw).unwrap();
        assert_eq!(config.execution.signal_timing.as_deref(), Some("bar_close"));
        assert_eq!(config.scale.trend_add.max_times, 2);
        let eff = EffectiveStrategy::resolve(&config, 2);
        assert_eq!(eff.signal_timing, SignalTiming::BarClose);
        assert!((eff.trailing_activation_pct - 0.02).abs() < 1e-12);
    }
}
