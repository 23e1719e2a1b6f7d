//! Deterministic MCDA match scorer.
//!
//! Six weighted dimensions, each in [0, 100]. The feature dimension is a
//! neutral placeholder until the LLM alignment pass overrides it; an LLM
//! failure leaves it neutral and matching proceeds.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::clearing::pricing::buyer_rate_from_supplier;
use crate::clearing::use_type::compute_use_type_score;
use crate::domain::{BuyerNeed, TruthCore, Warehouse};

pub const W_LOCATION: f64 = 0.20;
pub const W_SIZE: f64 = 0.15;
pub const W_USE_TYPE: f64 = 0.15;
pub const W_FEATURE: f64 = 0.20;
pub const W_TIMING: f64 = 0.10;
pub const W_BUDGET: f64 = 0.20;

/// Neutral score used when a dimension has no signal.
pub const NEUTRAL: f64 = 50.0;

/// Denominator for matches beyond the buyer radius (KNN fallback branch).
pub const KNN_MAX_CAP: f64 = 100.0;

/// Days-late cap for the timing dimension.
const MAX_DAYS_LATE: i64 = 200;

const EARTH_RADIUS_MILES: f64 = 3958.8;

/// Great-circle distance in miles.
pub fn haversine_miles(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let dlat = (lat2 - lat1).to_radians();
    let dlng = (lng2 - lng1).to_radians();
    let a = (dlat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (dlng / 2.0).sin().powi(2);
    EARTH_RADIUS_MILES * 2.0 * a.sqrt().atan2((1.0 - a).sqrt())
}

/// Per-dimension breakdown plus the weighted composite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub composite_score: f64,
    pub location_score: f64,
    pub size_score: f64,
    pub use_type_score: f64,
    pub feature_score: f64,
    pub timing_score: f64,
    pub budget_score: f64,
    pub distance_miles: Option<f64>,
    pub within_budget: bool,
    pub budget_stretch_pct: f64,
    pub use_type_callouts: Vec<String>,
    pub reasoning: String,
    pub instant_book_eligible: bool,
}

fn weighted_composite(b: &ScoreBreakdown) -> f64 {
    let raw = b.location_score * W_LOCATION
        + b.size_score * W_SIZE
        + b.use_type_score * W_USE_TYPE
        + b.feature_score * W_FEATURE
        + b.timing_score * W_TIMING
        + b.budget_score * W_BUDGET;
    (raw * 10.0).round() / 10.0
}

fn compute_location_score(need: &BuyerNeed, warehouse: &Warehouse) -> (f64, Option<f64>) {
    let (blat, blng) = match (need.lat, need.lng) {
        (Some(a), Some(b)) => (a, b),
        _ => return (NEUTRAL, None),
    };
    let (wlat, wlng) = match (warehouse.lat, warehouse.lng) {
        (Some(a), Some(b)) => (a, b),
        _ => return (NEUTRAL, None),
    };

    let dist = haversine_miles(blat, blng, wlat, wlng);
    let radius = if need.radius_miles > 0.0 { need.radius_miles } else { 25.0 };

    let score = if dist <= radius {
        100.0 * (1.0 - dist / radius)
    } else {
        // KNN-fallback match: decay against the hard 100-mile cap instead
        (100.0 * (1.0 - dist / KNN_MAX_CAP)).max(0.0)
    };
    (score.clamp(0.0, 100.0), Some(dist))
}

fn compute_size_score(need: &BuyerNeed, core: &TruthCore) -> f64 {
    let buyer_target = match (need.min_sqft, need.max_sqft) {
        (Some(min), Some(max)) if min != max => (min + max) as f64 / 2.0,
        (Some(min), _) => min as f64,
        (None, Some(max)) => max as f64,
        (None, None) => return NEUTRAL,
    };
    if buyer_target <= 0.0 {
        return NEUTRAL;
    }

    let wh_min = core.min_sqft.unwrap_or(0) as f64;
    let wh_max = core.max_sqft.map(|v| v as f64).unwrap_or(buyer_target.max(wh_min));
    let best_fit = buyer_target.clamp(wh_min, wh_max.max(wh_min));
    let ratio = best_fit / buyer_target;

    if (0.8..=1.2).contains(&ratio) {
        100.0
    } else if ratio < 0.8 {
        // Undersized hurts hard: the buyer physically cannot fit
        (100.0 - (0.8 - ratio) * 250.0).max(0.0)
    } else {
        (100.0 - (ratio - 1.2) * 100.0).max(0.0)
    }
}

/// Timing: available on or before the buyer's need date is perfect; each
/// day late costs a point, floored at zero. Missing dates on either side
/// mean "now".
pub fn compute_timing_score(needed_from: Option<NaiveDate>, available_from: Option<NaiveDate>) -> f64 {
    let today = Utc::now().date_naive();
    let need = needed_from.unwrap_or(today);
    let avail = available_from.unwrap_or(today);

    if avail <= need {
        return 100.0;
    }
    let days_late = (avail - need).num_days().min(MAX_DAYS_LATE);
    (100.0 - days_late as f64).max(0.0)
}

/// Budget: returns (score, within_budget, stretch_pct).
pub fn compute_budget_score(max_budget: Option<f64>, supplier_rate: f64) -> (f64, bool, f64) {
    let max_budget = match max_budget {
        Some(b) if b > 0.0 => b,
        _ => return (NEUTRAL, true, 0.0),
    };

    let buyer_rate = buyer_rate_from_supplier(supplier_rate);
    if buyer_rate <= max_budget {
        return (100.0, true, 0.0);
    }

    let percent_over = (buyer_rate - max_budget) / max_budget * 100.0;
    let score = (100.0 - percent_over * 3.33).max(0.0);
    (score, false, percent_over)
}

/// Compute all six dimensions and the weighted composite for one candidate.
/// The feature dimension starts neutral; see [`recompute_with_feature_score`].
pub fn compute_composite_score(
    need: &BuyerNeed,
    warehouse: &Warehouse,
    core: &TruthCore,
) -> ScoreBreakdown {
    let (location_score, distance_miles) = compute_location_score(need, warehouse);
    let size_score = compute_size_score(need, core);

    let (use_type_raw, callouts) = match need.use_type.as_deref() {
        Some(use_type) => compute_use_type_score(
            core.activity_tier.as_deref().unwrap_or("storage_only"),
            use_type,
            core.has_office_space,
        ),
        None => (NEUTRAL as i64, Vec::new()),
    };

    let timing_score = compute_timing_score(need.needed_from, core.available_from);
    let (budget_score, within_budget, budget_stretch_pct) =
        compute_budget_score(need.max_budget_per_sqft, core.supplier_rate_per_sqft);

    let mut breakdown = ScoreBreakdown {
        composite_score: 0.0,
        location_score,
        size_score,
        use_type_score: use_type_raw as f64,
        feature_score: NEUTRAL,
        timing_score,
        budget_score,
        distance_miles,
        within_budget,
        budget_stretch_pct,
        use_type_callouts: callouts,
        reasoning: String::new(),
        instant_book_eligible: false,
    };
    breakdown.composite_score = weighted_composite(&breakdown);
    breakdown
}

/// Replace the neutral feature placeholder with the LLM's score and
/// recompute the composite. Returns a fresh breakdown.
pub fn recompute_with_feature_score(breakdown: &ScoreBreakdown, feature_score: i64) -> ScoreBreakdown {
    let mut updated = breakdown.clone();
    updated.feature_score = (feature_score.clamp(0, 100)) as f64;
    updated.composite_score = weighted_composite(&updated);
    updated
}

/// Tag the results with buyer-budget context: when a budget was given and
/// every match is over it, the top match is flagged as the best available
/// budget alternative. With no budget, every match is within budget by
/// definition.
pub fn apply_budget_context<T: BudgetTagged>(results: &mut [T], max_budget: Option<f64>) {
    if max_budget.is_none() {
        for r in results.iter_mut() {
            r.set_within_budget(true);
            r.set_budget_stretch_pct(0.0);
        }
        return;
    }
    let any_within = results.iter().any(|r| r.within_budget());
    if !any_within {
        if let Some(first) = results.first_mut() {
            first.set_budget_alternative_available(true);
        }
    }
}

/// Minimal surface the budget-context pass needs from a result row.
pub trait BudgetTagged {
    fn within_budget(&self) -> bool;
    fn set_within_budget(&mut self, v: bool);
    fn set_budget_stretch_pct(&mut self, v: f64);
    fn set_budget_alternative_available(&mut self, v: bool);
}
