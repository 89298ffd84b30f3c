mod engine;
mod memory;
mod polymarket;
mod prompt;

pub use engine::{overall_score, validate_and_constrain, ConstrainedAnalysis, FastAnalysisEngine};
pub use memory::{
    decision_was_correct, AnalysisMemory, DecisionDistribution, HistoryPage, MemoryRecord,
    PerformanceStats, SimilarPattern, ValidationStats,
};
pub use polymarket::{
    fallback_batch_analysis, identify_related_assets, infer_market, AssetOpportunity,
    BatchAnalysis, BatchOpportunity, PolymarketAnalyzer,
};
pub use prompt::{build_analysis_prompt, PromptLevels};
