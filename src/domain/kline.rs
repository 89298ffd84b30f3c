use serde::{Deserialize, Serialize};

/// A single OHLCV candle. `time` is UTC seconds at bar open.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    pub fn new(time: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            time,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Well-formedness: low <= {open, close} <= high and volume >= 0.
    pub fn is_well_formed(&self) -> bool {
        self.low <= self.open
            && self.low <= self.close
            && self.open <= self.high
            && self.close <= self.high
            && self.volume >= 0.0
    }

    pub fn is_bullish(&self) -> bool {
        self.close >= self.open
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_formed_checks_ohlc_ordering() {
        let ok = Bar::new(0, 10.0, 12.0, 9.0, 11.0, 100.0);
        assert!(ok.is_well_formed());

        let bad_high = Bar::new(0, 10.0, 9.5, 9.0, 11.0, 100.0);
        assert!(!bad_high.is_well_formed());

        let bad_volume = Bar::new(0, 10.0, 12.0, 9.0, 11.0, -1.0);
        assert!(!bad_volume.is_well_formed());
    }

    #[test]
    fn bullish_when_close_at_or_above_open() {
        assert!(Bar::new(0, 10.0, 11.0, 9.0, 10.0, 1.0).is_bullish());
        assert!(!Bar::new(0, 10.0, 11.0, 9.0, 9.5, 1.0).is_bullish());
    }
}
