mod analysis;
mod kline;
mod market;
mod prediction;
mod symbol;

pub use analysis::{
    AnalysisResult, Decision, DetailedAnalysis, MarketSnapshot, PlanHorizon, Scores, TradingPlan,
};
pub use kline::Bar;
pub use market::{Language, Market, MarketType, Timeframe};
pub use market::parse_market;
pub use prediction::{
    opportunity_score, PredictionAnalysis, PredictionMarket, Recommendation, RiskLevel,
};
pub use symbol::{normalize, CanonicalSymbol, COMMON_QUOTES};
