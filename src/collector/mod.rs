//! Market data collector: fan-out over price, kline, fundamentals, macro,
//! news and prediction-market events with staged timeouts and graceful
//! degradation. A single failed leg never fails the collection; it lands in
//! `_meta.failed_items` and the record ships without it.

mod fundamentals;
mod macro_data;
mod news;

pub use fundamentals::{crypto_info, polymarket_keywords, FundamentalsSource};
pub use macro_data::{format_macro_summary, MacroAggregator, MacroIndicator, MacroSnapshot};
pub use news::{event_sentiment, format_news_summary, NewsBundle, NewsCollector, NewsItem};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::datasource::{DataSourceFactory, PolymarketSource, Ticker};
use crate::domain::{Bar, Market, PredictionMarket, Timeframe};
use crate::error::{QuantdeskError, Result};
use crate::indicators::{self, IndicatorSnapshot};

const LEG_TIMEOUT: Duration = Duration::from_secs(3);
const MACRO_PHASE_TIMEOUT: Duration = Duration::from_secs(10);
const NEWS_PHASE_TIMEOUT: Duration = Duration::from_secs(8);
const KLINE_WINDOW: usize = 60;

#[derive(Debug, Clone)]
pub struct CollectOptions {
    pub include_macro: bool,
    pub include_news: bool,
    pub include_polymarket: bool,
    pub timeout: Duration,
}

impl Default for CollectOptions {
    fn default() -> Self {
        Self {
            include_macro: true,
            include_news: true,
            include_polymarket: true,
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectionMeta {
    pub success_items: Vec<String>,
    pub failed_items: Vec<String>,
    pub duration_ms: u64,
}

/// Everything one analysis run needs about a symbol, in one record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectedMarketData {
    pub market: String,
    pub symbol: String,
    pub timeframe: String,
    pub collected_at: String,
    pub price: Option<Ticker>,
    pub kline: Vec<Bar>,
    pub indicators: Option<IndicatorSnapshot>,
    pub fundamental: Value,
    pub company: Value,
    #[serde(rename = "macro")]
    pub macro_data: MacroSnapshot,
    pub news: Vec<NewsItem>,
    pub sentiment: Value,
    pub polymarket: Vec<PredictionMarket>,
    #[serde(rename = "_meta")]
    pub meta: CollectionMeta,
}

impl CollectedMarketData {
    fn empty(market: Market, symbol: &str, timeframe: Timeframe) -> Self {
        Self {
            market: market.as_str().to_string(),
            symbol: symbol.to_string(),
            timeframe: timeframe.as_str().to_string(),
            collected_at: chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            price: None,
            kline: Vec::new(),
            indicators: None,
            fundamental: Value::Null,
            company: Value::Null,
            macro_data: MacroSnapshot::new(),
            news: Vec::new(),
            sentiment: Value::Null,
            polymarket: Vec::new(),
            meta: CollectionMeta::default(),
        }
    }

    /// Price fallback ladder: price service, then indicator close, then the
    /// last kline close. None means the caller must reject the record.
    pub fn effective_price(&self) -> Option<f64> {
        if let Some(p) = &self.price {
            if p.last > 0.0 {
                return Some(p.last);
            }
        }
        if let Some(ind) = &self.indicators {
            if ind.current_price > 0.0 {
                return Some(ind.current_price);
            }
        }
        self.kline.last().map(|b| b.close).filter(|c| *c > 0.0)
    }
}

pub struct MarketDataCollector {
    factory: Arc<DataSourceFactory>,
    fundamentals: Arc<FundamentalsSource>,
    news: Arc<NewsCollector>,
    macro_agg: Arc<MacroAggregator>,
    polymarket: Arc<PolymarketSource>,
}

impl MarketDataCollector {
    pub fn new(
        factory: Arc<DataSourceFactory>,
        fundamentals: Arc<FundamentalsSource>,
        news: Arc<NewsCollector>,
        macro_agg: Arc<MacroAggregator>,
        polymarket: Arc<PolymarketSource>,
    ) -> Self {
        Self {
            factory,
            fundamentals,
            news,
            macro_agg,
            polymarket,
        }
    }

    /// Collect all configured legs for `(market, symbol, timeframe)`.
    pub async fn collect_all(
        &self,
        market: Market,
        symbol: &str,
        timeframe: Timeframe,
        options: CollectOptions,
    ) -> CollectedMarketData {
        let started = Instant::now();
        let deadline = started + options.timeout;
        let mut data = CollectedMarketData::empty(market, symbol, timeframe);

        // Phase 1: core fan-out with a join barrier; each leg sub-bounded
        let price_leg = timeout(LEG_TIMEOUT, self.fetch_price(market, symbol));
        let kline_leg = timeout(
            LEG_TIMEOUT,
            self.factory
                .get_kline(market, symbol, timeframe, KLINE_WINDOW, None),
        );
        let fundamental_leg = timeout(LEG_TIMEOUT, self.fetch_fundamental(market, symbol));
        let company_leg = timeout(LEG_TIMEOUT, self.fetch_company(market, symbol));

        let (price_res, kline_res, fundamental_res, company_res) =
            tokio::join!(price_leg, kline_leg, fundamental_leg, company_leg);

        match flatten(price_res) {
            Ok(ticker) => {
                data.price = Some(ticker);
                data.meta.success_items.push("price".to_string());
            }
            Err(e) => {
                debug!("price fetch failed for {}:{}: {}", market, symbol, e);
                data.meta.failed_items.push("price".to_string());
            }
        }
        match flatten(kline_res) {
            Ok(bars) => {
                data.kline = bars;
                data.meta.success_items.push("kline".to_string());
            }
            Err(e) => {
                warn!("kline fetch failed for {}:{}: {}", market, symbol, e);
                data.meta.failed_items.push("kline".to_string());
            }
        }
        match flatten(fundamental_res) {
            Ok(Some(v)) => {
                data.fundamental = v;
                data.meta.success_items.push("fundamental".to_string());
            }
            Ok(None) => {}
            Err(e) => {
                debug!("fundamental fetch failed: {}", e);
                data.meta.failed_items.push("fundamental".to_string());
            }
        }
        match flatten(company_res) {
            Ok(Some(v)) => {
                data.company = v;
                data.meta.success_items.push("company".to_string());
            }
            Ok(None) => {}
            Err(e) => {
                debug!("company fetch failed: {}", e);
                data.meta.failed_items.push("company".to_string());
            }
        }

        // Phase 2: local indicator snapshot
        if !data.kline.is_empty() {
            data.indicators = indicators::compute(&data.kline);
            if data.indicators.is_some() {
                data.meta.success_items.push("indicators".to_string());
            }
        }

        // Price ladder backstop from the kline when the ticker leg lost
        if data.price.is_none() {
            if let Some(fallback) = price_from_kline(&data.kline) {
                info!(
                    "price for {}:{} recovered from kline fallback: {}",
                    market, symbol, fallback.last
                );
                data.price = Some(fallback);
            }
        }

        // Phase 3: macro composite (cache-first inside the aggregator)
        if options.include_macro {
            if Instant::now() < deadline {
                match timeout(MACRO_PHASE_TIMEOUT, self.macro_agg.get_snapshot()).await {
                    Ok(snapshot) if !snapshot.is_empty() => {
                        data.macro_data = snapshot;
                        data.meta.success_items.push("macro".to_string());
                    }
                    _ => data.meta.failed_items.push("macro".to_string()),
                }
            } else {
                data.meta.failed_items.push("macro".to_string());
            }
        }

        // Phase 4: news and sentiment
        if options.include_news {
            if Instant::now() < deadline {
                let company_name = data.company["name"].as_str().map(str::to_string);
                match timeout(
                    NEWS_PHASE_TIMEOUT,
                    self.news.get_news(market, symbol, company_name.as_deref()),
                )
                .await
                {
                    Ok(bundle) => {
                        data.sentiment = bundle.sentiment;
                        if bundle.news.is_empty() {
                            data.meta.failed_items.push("news".to_string());
                        } else {
                            data.news = bundle.news;
                            data.meta.success_items.push("news".to_string());
                        }
                    }
                    Err(_) => data.meta.failed_items.push("news".to_string()),
                }
            } else {
                data.meta.failed_items.push("news".to_string());
            }
        }

        // Phase 5: prediction-market events, best-effort
        if options.include_polymarket && Instant::now() < deadline {
            match self.fetch_polymarket_events(market, symbol).await {
                Ok(events) if !events.is_empty() => {
                    info!("{} prediction-market events found for {}", events.len(), symbol);
                    data.polymarket = events;
                    data.meta.success_items.push("polymarket".to_string());
                }
                Ok(_) => {}
                Err(e) => {
                    debug!("polymarket events fetch failed for {}: {}", symbol, e);
                    data.meta.failed_items.push("polymarket".to_string());
                }
            }
        }

        data.meta.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            "market data collection for {}:{} done in {}ms (ok: {:?}, failed: {:?})",
            market, symbol, data.meta.duration_ms, data.meta.success_items, data.meta.failed_items
        );
        data
    }

    /// Current price via the same fallback ladder the collector uses.
    pub async fn get_price(&self, market: Market, symbol: &str) -> Result<f64> {
        match self.fetch_price(market, symbol).await {
            Ok(t) if t.last > 0.0 => Ok(t.last),
            _ => {
                let bars = self
                    .factory
                    .get_kline(market, symbol, Timeframe::D1, 2, None)
                    .await?;
                price_from_kline(&bars)
                    .map(|t| t.last)
                    .ok_or_else(|| QuantdeskError::PriceUnavailable(symbol.to_string()))
            }
        }
    }

    async fn fetch_price(&self, market: Market, symbol: &str) -> Result<Ticker> {
        let ticker = self.factory.get_ticker(market, symbol).await?;
        if ticker.last <= 0.0 {
            return Err(QuantdeskError::PriceUnavailable(symbol.to_string()));
        }
        Ok(ticker)
    }

    async fn fetch_fundamental(&self, market: Market, symbol: &str) -> Result<Option<Value>> {
        match market {
            Market::UsStock => {
                let v = self.fundamentals.us_fundamental(symbol).await?;
                Ok((!v.is_null()).then_some(v))
            }
            Market::Crypto => Ok(Some(crypto_info(symbol))),
            _ => Ok(None),
        }
    }

    async fn fetch_company(&self, market: Market, symbol: &str) -> Result<Option<Value>> {
        match market {
            Market::UsStock => {
                let v = self.fundamentals.company_profile(symbol).await?;
                Ok((!v.is_null()).then_some(v))
            }
            _ => Ok(None),
        }
    }

    /// Keyword-driven event search with the list cache disabled: analysis
    /// wants current markets, not yesterday's cached set.
    async fn fetch_polymarket_events(
        &self,
        market: Market,
        symbol: &str,
    ) -> Result<Vec<PredictionMarket>> {
        let keywords = polymarket_keywords(symbol, market == Market::Crypto);
        debug!("polymarket keywords for {}: {:?}", symbol, keywords);

        let searches = keywords
            .iter()
            .map(|keyword| self.polymarket.search_markets(keyword, 5, false));
        let mut all = Vec::new();
        for (keyword, result) in keywords.iter().zip(futures::future::join_all(searches).await) {
            match result {
                Ok(markets) => all.extend(markets),
                Err(e) => debug!("search for '{}' failed: {}", keyword, e),
            }
        }

        let mut seen = std::collections::HashSet::new();
        all.retain(|m| seen.insert(m.market_id.clone()));
        Ok(all)
    }
}

fn flatten<T>(res: std::result::Result<Result<T>, tokio::time::error::Elapsed>) -> Result<T> {
    match res {
        Ok(inner) => inner,
        Err(_) => Err(QuantdeskError::Timeout("collector leg".to_string())),
    }
}

fn price_from_kline(bars: &[Bar]) -> Option<Ticker> {
    let latest = bars.last()?;
    if latest.close <= 0.0 {
        return None;
    }
    let prev_close = if bars.len() > 1 {
        bars[bars.len() - 2].close
    } else {
        latest.close
    };
    let change = latest.close - prev_close;
    Some(Ticker {
        last: latest.close,
        change,
        change_percent: if prev_close > 0.0 {
            (change / prev_close * 10000.0).round() / 100.0
        } else {
            0.0
        },
        high: latest.high,
        low: latest.low,
        open: latest.open,
        previous_close: prev_close,
        source: "kline_fallback".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(close: f64) -> Bar {
        Bar::new(0, close, close, close, close, 1.0)
    }

    #[test]
    fn effective_price_walks_the_ladder() {
        let mut data = CollectedMarketData::empty(Market::Crypto, "BTC/USDT", Timeframe::D1);
        assert_eq!(data.effective_price(), None);

        data.kline = vec![bar(100.0), bar(101.0)];
        assert_eq!(data.effective_price(), Some(101.0));

        data.indicators = indicators::compute(&vec![bar(50.0); 10]);
        assert_eq!(data.effective_price(), Some(50.0));

        data.price = Some(Ticker {
            last: 99.0,
            ..Ticker::default()
        });
        assert_eq!(data.effective_price(), Some(99.0));
    }

    #[test]
    fn price_from_kline_computes_change() {
        let t = price_from_kline(&[bar(100.0), bar(104.0)]).unwrap();
        assert_eq!(t.last, 104.0);
        assert!((t.change - 4.0).abs() < 1e-9);
        assert!((t.change_percent - 4.0).abs() < 1e-9);
        assert_eq!(t.source, "kline_fallback");
    }

    #[test]
    fn price_from_kline_rejects_empty_and_zero() {
        assert!(price_from_kline(&[]).is_none());
        assert!(price_from_kline(&[bar(0.0)]).is_none());
    }
}
