//! Signal normalization: indicator scripts may emit 4-way booleans or a
//! simple buy/sell pair; the simulator always consumes the 4-way form.

use super::config::{SignalTiming, TradeDirection};

/// Normalized per-bar entry/exit signals.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalSet {
    pub open_long: Vec<bool>,
    pub close_long: Vec<bool>,
    pub open_short: Vec<bool>,
    pub close_short: Vec<bool>,
    /// In both mode an open signal auto-closes the opposing position first
    pub both_mode: bool,
}

impl SignalSet {
    pub fn empty(len: usize) -> Self {
        Self {
            open_long: vec![false; len],
            close_long: vec![false; len],
            open_short: vec![false; len],
            close_short: vec![false; len],
            both_mode: false,
        }
    }

    pub fn len(&self) -> usize {
        self.open_long.len()
    }

    pub fn is_empty(&self) -> bool {
        self.open_long.is_empty()
    }

    pub fn from_four_way(
        open_long: Vec<bool>,
        close_long: Vec<bool>,
        open_short: Vec<bool>,
        close_short: Vec<bool>,
    ) -> Self {
        Self {
            open_long,
            close_long,
            open_short,
            close_short,
            both_mode: false,
        }
    }

    /// Map buy/sell onto the 4-way form per trade direction. In both mode a
    /// buy flips a short into a long (and symmetrically), handled by the
    /// simulator through `both_mode`.
    pub fn from_buy_sell(buy: Vec<bool>, sell: Vec<bool>, direction: TradeDirection) -> Self {
        let len = buy.len().min(sell.len());
        let mut set = Self::empty(len);
        match direction {
            TradeDirection::Long => {
                set.open_long = buy[..len].to_vec();
                set.close_long = sell[..len].to_vec();
            }
            TradeDirection::Short => {
                set.open_short = sell[..len].to_vec();
                set.close_short = buy[..len].to_vec();
            }
            TradeDirection::Both => {
                set.open_long = buy[..len].to_vec();
                set.open_short = sell[..len].to_vec();
                set.both_mode = true;
            }
        }
        set
    }

    /// Disable the signal sides excluded by the trade direction.
    pub fn filter_direction(&mut self, direction: TradeDirection) {
        match direction {
            TradeDirection::Long => {
                self.open_short.iter_mut().for_each(|x| *x = false);
                self.close_short.iter_mut().for_each(|x| *x = false);
            }
            TradeDirection::Short => {
                self.open_long.iter_mut().for_each(|x| *x = false);
                self.close_long.iter_mut().for_each(|x| *x = false);
            }
            TradeDirection::Both => {}
        }
    }

    /// Shift all signals one bar forward for next-bar-open execution,
    /// removing look-ahead bias: a signal confirmed on bar close acts on
    /// the following bar.
    pub fn apply_timing(&mut self, timing: SignalTiming) {
        if timing != SignalTiming::NextBarOpen {
            return;
        }
        shift_forward(&mut self.open_long);
        shift_forward(&mut self.close_long);
        shift_forward(&mut self.open_short);
        shift_forward(&mut self.close_short);
    }
}

fn shift_forward(signals: &mut [bool]) {
    if signals.is_empty() {
        return;
    }
    for i in (1..signals.len()).rev() {
        signals[i] = signals[i - 1];
    }
    signals[0] = false;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buy_sell_long_mode_maps_to_long_signals() {
        let set = SignalSet::from_buy_sell(
            vec![true, false, false],
            vec![false, false, true],
            TradeDirection::Long,
        );
        assert_eq!(set.open_long, vec![true, false, false]);
        assert_eq!(set.close_long, vec![false, false, true]);
        assert!(!set.both_mode);
        assert!(set.open_short.iter().all(|x| !x));
    }

    #[test]
    fn buy_sell_both_mode_sets_flag() {
        let set = SignalSet::from_buy_sell(
            vec![true, false],
            vec![false, true],
            TradeDirection::Both,
        );
        assert!(set.both_mode);
        assert_eq!(set.open_long, vec![true, false]);
        assert_eq!(set.open_short, vec![false, true]);
    }

    #[test]
    fn direction_filter_silences_opposite_side() {
        let mut set = SignalSet::from_four_way(
            vec![true, false],
            vec![false, true],
            vec![true, true],
            vec![true, false],
        );
        set.filter_direction(TradeDirection::Long);
        assert!(set.open_short.iter().all(|x| !x));
        assert!(set.close_short.iter().all(|x| !x));
        assert_eq!(set.open_long, vec![true, false]);
    }

    #[test]
    fn next_bar_open_shifts_signals() {
        let mut set = SignalSet::from_four_way(
            vec![true, false, false],
            vec![false, true, false],
            vec![false; 3],
            vec![false; 3],
        );
        set.apply_timing(SignalTiming::NextBarOpen);
        assert_eq!(set.open_long, vec![false, true, false]);
        assert_eq!(set.close_long, vec![false, false, true]);
    }

    #[test]
    fn bar_close_leaves_signals_in_place() {
        let mut set = SignalSet::from_four_way(
            vec![true, false],
            vec![false; 2],
            vec![false; 2],
            vec![false; 2],
        );
        set.apply_timing(SignalTiming::BarClose);
        assert_eq!(set.open_long, vec![true, false]);
    }
}
