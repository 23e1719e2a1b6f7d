//! Clearing engine: deterministic pre-filter, MCDA scoring, LLM feature
//! alignment, pricing, and two-tier match production.

pub mod engine;
pub mod pricing;
pub mod scorer;
pub mod store;
pub mod use_type;

pub use engine::{ClearingEngine, ClearingResult, Tier2Candidate};
pub use pricing::{buyer_rate_from_supplier, monthly_totals};
pub use scorer::{
    apply_budget_context, compute_composite_score, recompute_with_feature_score, ScoreBreakdown,
};
pub use use_type::compute_use_type_score;
