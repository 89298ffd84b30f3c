//! Market data sources behind a uniform `get_kline` / `get_ticker` surface.
//!
//! The factory dispatches on market segment: crypto goes to exchange public
//! REST, equities/forex/futures go to the quote-chart API. Prediction-market
//! data has its own source with a database cache.

mod crypto;
mod equity;
mod polymarket;

pub use crypto::CryptoSource;
pub use equity::EquitySource;
pub use polymarket::PolymarketSource;

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::DataSourceConfig;
use crate::domain::{Bar, Market, Timeframe};
use crate::error::Result;

/// Realtime quote in the shape the collector and orchestrator expect.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Ticker {
    pub last: f64,
    pub change: f64,
    pub change_percent: f64,
    pub high: f64,
    pub low: f64,
    pub open: f64,
    pub previous_close: f64,
    pub source: String,
}

/// Dispatches kline/ticker requests to the concrete source for a market.
pub struct DataSourceFactory {
    crypto: Arc<CryptoSource>,
    equity: Arc<EquitySource>,
}

impl DataSourceFactory {
    pub fn new(config: &DataSourceConfig) -> Result<Self> {
        Ok(Self {
            crypto: Arc::new(CryptoSource::new(config)?),
            equity: Arc::new(EquitySource::new(config)?),
        })
    }

    pub fn equity(&self) -> Arc<EquitySource> {
        Arc::clone(&self.equity)
    }

    pub fn crypto(&self) -> Arc<CryptoSource> {
        Arc::clone(&self.crypto)
    }

    pub async fn get_kline(
        &self,
        market: Market,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
        before_time: Option<i64>,
    ) -> Result<Vec<Bar>> {
        match market {
            Market::Crypto => {
                self.crypto
                    .get_kline(symbol, timeframe, limit, before_time)
                    .await
            }
            Market::UsStock | Market::Forex | Market::Futures => {
                self.equity
                    .get_kline(market, symbol, timeframe, limit, before_time)
                    .await
            }
        }
    }

    pub async fn get_ticker(&self, market: Market, symbol: &str) -> Result<Ticker> {
        match market {
            Market::Crypto => self.crypto.get_ticker(symbol).await,
            Market::UsStock | Market::Forex | Market::Futures => {
                self.equity.get_ticker(market, symbol).await
            }
        }
    }
}

/// Keep bars strictly ascending, clipped to `before_time` and the last `limit`.
pub(crate) fn filter_and_limit(mut bars: Vec<Bar>, limit: usize, before_time: Option<i64>) -> Vec<Bar> {
    bars.sort_by_key(|b| b.time);
    bars.dedup_by_key(|b| b.time);
    if let Some(end) = before_time {
        bars.retain(|b| b.time <= end);
    }
    if bars.len() > limit {
        bars.split_off(bars.len() - limit)
    } else {
        bars
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_and_limit_sorts_dedups_and_clips() {
        let bars = vec![
            Bar::new(300, 1.0, 1.0, 1.0, 1.0, 1.0),
            Bar::new(100, 1.0, 1.0, 1.0, 1.0, 1.0),
            Bar::new(200, 1.0, 1.0, 1.0, 1.0, 1.0),
            Bar::new(200, 2.0, 2.0, 2.0, 2.0, 2.0),
            Bar::new(400, 1.0, 1.0, 1.0, 1.0, 1.0),
        ];
        let out = filter_and_limit(bars, 2, Some(300));
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].time, 200);
        assert_eq!(out[1].time, 300);
    }
}
