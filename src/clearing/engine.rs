//! Two-tier clearing pipeline.
//!
//! Load and pre-filter active supply, MCDA-score survivors, run the LLM
//! feature-alignment pass over the top candidates, persist priced Tier-1
//! matches, and surface limited-disclosure Tier-2 candidates. When Tier 1
//! comes up thin, Demand-Led Activation outreach fires for the best Tier-2
//! candidates.

use anyhow::{bail, Context, Result};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration as StdDuration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::clearing::pricing::{buyer_rate_from_supplier, spread_pct};
use crate::clearing::scorer::{
    apply_budget_context, compute_composite_score, haversine_miles, recompute_with_feature_score,
    BudgetTagged, ScoreBreakdown,
};
use crate::clearing::store::{self, Listing};
use crate::clearing::use_type::compute_use_type_score;
use crate::db::Db;
use crate::dla::generate_token_string;
use crate::domain::*;
use crate::llm::LlmClient;

/// Minimum Tier 1 matches before DLA outreach is triggered.
const DLA_TRIGGER_THRESHOLD: usize = 3;

/// How many Tier 2 candidates to surface / activate per clearing run.
const DLA_MAX_CANDIDATES: usize = 5;

/// Tier 1 matches returned and persisted per run.
const TIER1_RESULT_LIMIT: usize = 3;

/// Candidates handed to the LLM feature pass.
const LLM_CANDIDATE_LIMIT: usize = 6;

/// Per-warehouse outreach cooldown.
const OUTREACH_COOLDOWN_DAYS: i64 = 30;

const DLA_TOKEN_EXPIRY_HOURS: i64 = 48;

const KNN_FALLBACK_K: usize = 5;
const KNN_FALLBACK_MAX_MILES: f64 = 100.0;

/// Fully scored and priced Tier-1 match, ready for presentation.
#[derive(Debug, Clone, Serialize)]
pub struct Tier1Match {
    pub match_id: String,
    pub warehouse_id: String,
    pub match_score: f64,
    pub scoring_breakdown: ScoreBreakdown,
    pub reasoning: String,
    pub instant_book_eligible: bool,
    pub buyer_rate: f64,
    /// Internal only — stripped by buyer-facing views.
    pub supplier_rate: f64,
    /// Internal only — stripped by buyer-facing views.
    pub spread_pct: f64,
    pub distance_miles: Option<f64>,
    pub within_budget: bool,
    pub budget_stretch_pct: f64,
    pub budget_alternative_available: bool,
    pub use_type_callouts: Vec<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub address: Option<String>,
    pub available_sqft: Option<i64>,
    pub description: Option<String>,
}

impl BudgetTagged for Tier1Match {
    fn within_budget(&self) -> bool {
        self.within_budget
    }
    fn set_within_budget(&mut self, v: bool) {
        self.within_budget = v;
    }
    fn set_budget_stretch_pct(&mut self, v: f64) {
        self.budget_stretch_pct = v;
    }
    fn set_budget_alternative_available(&mut self, v: bool) {
        self.budget_alternative_available = v;
    }
}

/// Limited-disclosure Tier-2 candidate: neighborhood and approximate size
/// only — never the address, rate, or owner.
#[derive(Debug, Clone, Serialize)]
pub struct Tier2Candidate {
    pub warehouse_id: String,
    pub neighborhood: String,
    pub match_score: f64,
    pub sqft: Option<i64>,
    pub building_type: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClearingResult {
    pub tier1: Vec<Tier1Match>,
    pub tier2: Vec<Tier2Candidate>,
    pub dla_triggered: bool,
    pub total_matches: usize,
}

/// One candidate evaluation from the feature-alignment LLM pass.
#[derive(Debug, Deserialize)]
struct FeatureEval {
    warehouse_id: String,
    feature_score: i64,
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    instant_book_eligible: bool,
}

#[derive(Debug, Deserialize)]
struct FeatureEvalResponse {
    evaluations: Vec<FeatureEval>,
}

pub struct ClearingEngine {
    db: Db,
    llm: LlmClient,
}

impl ClearingEngine {
    pub fn new(db: Db, llm: LlmClient) -> Self {
        Self { db, llm }
    }

    /// Run the full two-tier clearing pipeline for a buyer need.
    ///
    /// DB errors abort the run with nothing persisted; LLM failures degrade
    /// to the neutral feature score. An empty Tier 1 is a valid result.
    pub async fn run_clearing(&self, buyer_need_id: &str) -> Result<ClearingResult> {
        // Phase 1: load + pre-filter under one lock, no writes yet.
        let (need, tier1_survivors, tier2_survivors) = {
            let conn = self.db.lock().await;
            let need = store::get_buyer_need(&conn, buyer_need_id)?
                .with_context(|| format!("buyer need {buyer_need_id} not found"))?;

            let tier1_supply = store::load_active_listings(&conn, &[SupplierStatus::InNetwork])?;
            let tier2_supply = store::load_active_listings(
                &conn,
                &[
                    SupplierStatus::ThirdParty,
                    SupplierStatus::EarncheckOnly,
                    SupplierStatus::Interested,
                ],
            )?;

            let tier1_survivors = pre_filter(&need, tier1_supply);
            let tier2_survivors = pre_filter(&need, tier2_supply);
            (need, tier1_survivors, tier2_survivors)
        };

        info!(
            buyer_need = buyer_need_id,
            tier1 = tier1_survivors.len(),
            tier2 = tier2_survivors.len(),
            "Pre-filter complete"
        );

        // Phase 2: deterministic MCDA over survivors, keep the LLM shortlist.
        let mut scored: Vec<(Listing, ScoreBreakdown)> = tier1_survivors
            .into_iter()
            .map(|listing| {
                let breakdown = compute_composite_score(&need, &listing.warehouse, &listing.core);
                (listing, breakdown)
            })
            .collect();
        scored.sort_by(|a, b| b.1.composite_score.total_cmp(&a.1.composite_score));
        scored.truncate(LLM_CANDIDATE_LIMIT);

        // Phase 3: LLM feature alignment. Failure leaves the neutral 50.
        if !scored.is_empty() {
            match self.evaluate_features(&need, &scored).await {
                Ok(evals) => {
                    for eval in evals {
                        if let Some(entry) =
                            scored.iter_mut().find(|(l, _)| l.warehouse.id == eval.warehouse_id)
                        {
                            entry.1 = recompute_with_feature_score(&entry.1, eval.feature_score);
                            entry.1.reasoning = eval.reasoning;
                            entry.1.instant_book_eligible = eval.instant_book_eligible;
                        }
                    }
                }
                Err(err) => {
                    warn!(error = %err, "LLM feature eval failed, using base scores");
                }
            }
            scored.sort_by(|a, b| b.1.composite_score.total_cmp(&a.1.composite_score));
            scored.truncate(TIER1_RESULT_LIMIT);
        }

        // Tier 2: same deterministic scoring, limited disclosure, no rows.
        let mut tier2_scored: Vec<(Listing, ScoreBreakdown)> = tier2_survivors
            .into_iter()
            .map(|listing| {
                let breakdown = compute_composite_score(&need, &listing.warehouse, &listing.core);
                (listing, breakdown)
            })
            .collect();
        tier2_scored.sort_by(|a, b| b.1.composite_score.total_cmp(&a.1.composite_score));
        tier2_scored.truncate(DLA_MAX_CANDIDATES);

        let tier2: Vec<Tier2Candidate> = tier2_scored
            .iter()
            .map(|(listing, breakdown)| Tier2Candidate {
                warehouse_id: listing.warehouse.id.clone(),
                neighborhood: listing
                    .warehouse
                    .neighborhood
                    .clone()
                    .or_else(|| listing.warehouse.city.clone())
                    .unwrap_or_else(|| "Unknown".to_string()),
                match_score: breakdown.composite_score,
                sqft: listing.warehouse.building_size_sqft,
                building_type: listing
                    .warehouse
                    .property_type
                    .clone()
                    .unwrap_or_else(|| "warehouse".to_string()),
            })
            .collect();

        // Phase 4: persist matches + instant-book scores + DLA outreach in
        // one transaction.
        let mut tier1 = Vec::with_capacity(scored.len());
        let dla_triggered;
        {
            let mut conn = self.db.lock().await;
            let tx = conn.transaction().context("begin clearing transaction")?;
            let now = Utc::now();

            for (listing, breakdown) in &scored {
                let supplier_rate = listing.core.supplier_rate_per_sqft;
                let buyer_rate = buyer_rate_from_supplier(supplier_rate);
                let match_id = Uuid::new_v4().to_string();

                let record = Match {
                    id: match_id.clone(),
                    buyer_need_id: need.id.clone(),
                    warehouse_id: listing.warehouse.id.clone(),
                    match_score: breakdown.composite_score,
                    confidence: breakdown.composite_score,
                    instant_book_eligible: breakdown.instant_book_eligible,
                    reasoning: breakdown.reasoning.clone(),
                    scoring_breakdown: json!({
                        "location_score": breakdown.location_score,
                        "size_score": breakdown.size_score,
                        "use_type_score": breakdown.use_type_score,
                        "feature_score": breakdown.feature_score,
                        "timing_score": breakdown.timing_score,
                        "budget_score": breakdown.budget_score,
                    }),
                    status: MatchStatus::Pending,
                    created_at: now,
                };
                store::insert_match(&tx, &record)?;

                let ib = build_instant_book_score(&match_id, listing, breakdown, now);
                store::insert_instant_book_score(&tx, &ib)?;

                tier1.push(Tier1Match {
                    match_id,
                    warehouse_id: listing.warehouse.id.clone(),
                    match_score: breakdown.composite_score,
                    scoring_breakdown: breakdown.clone(),
                    reasoning: breakdown.reasoning.clone(),
                    instant_book_eligible: breakdown.instant_book_eligible,
                    buyer_rate,
                    supplier_rate,
                    spread_pct: (spread_pct(buyer_rate, supplier_rate) * 10.0).round() / 10.0,
                    distance_miles: breakdown.distance_miles,
                    within_budget: breakdown.within_budget,
                    budget_stretch_pct: breakdown.budget_stretch_pct,
                    budget_alternative_available: false,
                    use_type_callouts: breakdown.use_type_callouts.clone(),
                    city: listing.warehouse.city.clone(),
                    state: listing.warehouse.state.clone(),
                    address: Some(listing.warehouse.address.clone()),
                    available_sqft: listing.core.max_sqft,
                    description: listing.warehouse.description.clone(),
                });
            }

            dla_triggered = if tier1.len() < DLA_TRIGGER_THRESHOLD && !tier2_scored.is_empty() {
                trigger_dla(&tx, &need.id, &tier2_scored)?
            } else {
                false
            };

            tx.commit().context("commit clearing transaction")?;
        }

        apply_budget_context(&mut tier1, need.max_budget_per_sqft);

        let total = tier1.len() + tier2.len();
        info!(
            buyer_need = buyer_need_id,
            tier1 = tier1.len(),
            tier2 = tier2.len(),
            dla = dla_triggered,
            "Clearing complete"
        );

        Ok(ClearingResult {
            tier1,
            tier2,
            dla_triggered,
            total_matches: total,
        })
    }

    /// Feature-alignment LLM pass over the shortlisted candidate bundle.
    async fn evaluate_features(
        &self,
        need: &BuyerNeed,
        candidates: &[(Listing, ScoreBreakdown)],
    ) -> Result<Vec<FeatureEval>> {
        if !self.llm.is_configured() {
            bail!("LLM not configured");
        }

        let candidate_blocks: Vec<serde_json::Value> = candidates
            .iter()
            .map(|(listing, breakdown)| {
                json!({
                    "warehouse_id": listing.warehouse.id,
                    "city": listing.warehouse.city,
                    "state": listing.warehouse.state,
                    "activity_tier": listing.core.activity_tier,
                    "clear_height_ft": listing.core.clear_height_ft,
                    "dock_doors_receiving": listing.core.dock_doors_receiving,
                    "dock_doors_shipping": listing.core.dock_doors_shipping,
                    "drive_in_bays": listing.core.drive_in_bays,
                    "has_office_space": listing.core.has_office_space,
                    "has_sprinkler": listing.core.has_sprinkler,
                    "power_supply": listing.core.power_supply,
                    "parking_spaces": listing.core.parking_spaces,
                    "trust_level": listing.core.trust_level,
                    "base_composite": breakdown.composite_score,
                    "memories": listing
                        .memories
                        .iter()
                        .map(|m| json!({"type": m.memory_type, "content": m.content}))
                        .collect::<Vec<_>>(),
                })
            })
            .collect();

        let prompt = format!(
            "You score how well each warehouse's physical features align with a buyer's \
             stated requirements.\n\n\
             Buyer requirement:\n{}\n\n\
             Candidates:\n{}\n\n\
             For EACH candidate return an integer feature_score 0-100, one short sentence \
             of reasoning, and instant_book_eligible (true only when the listing data is \
             complete and trustworthy enough to book sight unseen).\n\
             Return ONLY JSON: {{\"evaluations\": [{{\"warehouse_id\": \"...\", \
             \"feature_score\": 0, \"reasoning\": \"...\", \"instant_book_eligible\": false}}]}}",
            json!({
                "use_type": need.use_type,
                "min_sqft": need.min_sqft,
                "max_sqft": need.max_sqft,
                "requirements": need.requirements,
                "duration_months": need.duration_months,
            }),
            serde_json::to_string_pretty(&candidate_blocks).unwrap_or_default(),
        );

        let response: FeatureEvalResponse = self
            .llm
            .generate_json(&prompt, 0.2, StdDuration::from_secs(45))
            .await?;
        Ok(response.evaluations)
    }
}

/// Co-primary deterministic gate: geo AND requirements must both pass.
/// When the strict pass leaves nothing and the buyer has coordinates, fall
/// back to the nearest K warehouses passing the requirements gate within
/// 100 miles.
pub fn pre_filter(need: &BuyerNeed, supply: Vec<Listing>) -> Vec<Listing> {
    let buyer_radius = if need.radius_miles > 0.0 { need.radius_miles } else { 25.0 };
    let max_radius = buyer_radius.min(50.0);
    let buyer_coords = match (need.lat, need.lng) {
        (Some(lat), Some(lng)) => Some((lat, lng)),
        _ => None,
    };

    let mut survivors = Vec::new();
    for listing in &supply {
        if !passes_requirements_gate(need, &listing.core) {
            continue;
        }

        let wh = &listing.warehouse;
        let wh_coords = match (wh.lat, wh.lng) {
            (Some(lat), Some(lng)) => Some((lat, lng)),
            _ => None,
        };

        match (buyer_coords, wh_coords) {
            (Some((blat, blng)), Some((wlat, wlng))) => {
                if haversine_miles(blat, blng, wlat, wlng) > max_radius {
                    continue;
                }
            }
            _ => {
                // Coordinate gap on either side: exact state match or reject
                match (need.state.as_deref(), wh.state.as_deref()) {
                    (Some(ns), Some(ws)) if ns.eq_ignore_ascii_case(ws) => {}
                    _ => continue,
                }
            }
        }
        survivors.push(listing.clone());
    }

    if survivors.is_empty() {
        if let Some((blat, blng)) = buyer_coords {
            return knn_fallback(need, supply, blat, blng);
        }
    }
    survivors
}

fn knn_fallback(need: &BuyerNeed, supply: Vec<Listing>, blat: f64, blng: f64) -> Vec<Listing> {
    let mut scored: Vec<(f64, Listing)> = supply
        .into_iter()
        .filter(|l| passes_requirements_gate(need, &l.core))
        .filter_map(|l| {
            let (lat, lng) = match (l.warehouse.lat, l.warehouse.lng) {
                (Some(a), Some(b)) => (a, b),
                _ => return None,
            };
            let dist = haversine_miles(blat, blng, lat, lng);
            (dist <= KNN_FALLBACK_MAX_MILES).then_some((dist, l))
        })
        .collect();
    scored.sort_by(|a, b| a.0.total_cmp(&b.0));
    scored.into_iter().take(KNN_FALLBACK_K).map(|(_, l)| l).collect()
}

fn passes_requirements_gate(need: &BuyerNeed, core: &TruthCore) -> bool {
    // Size ranges must overlap
    if let (Some(buyer_min), Some(wh_max)) = (need.min_sqft, core.max_sqft) {
        if wh_max < buyer_min {
            return false;
        }
    }
    if let (Some(buyer_max), Some(wh_min)) = (need.max_sqft, core.min_sqft) {
        if wh_min > buyer_max {
            return false;
        }
    }

    if let Some(use_type) = need.use_type.as_deref() {
        let (score, _) = compute_use_type_score(
            core.activity_tier.as_deref().unwrap_or("storage_only"),
            use_type,
            core.has_office_space,
        );
        if score == 0 {
            return false;
        }
    }
    true
}

/// Create DLA tokens for the top Tier-2 candidates and mark their
/// warehouses as in-outreach. Runs inside the clearing transaction.
fn trigger_dla(
    conn: &rusqlite::Connection,
    buyer_need_id: &str,
    candidates: &[(Listing, ScoreBreakdown)],
) -> Result<bool> {
    let now = Utc::now();
    let expires = now + Duration::hours(DLA_TOKEN_EXPIRY_HOURS);
    let mut created = 0usize;

    for (listing, _) in candidates.iter().take(DLA_MAX_CANDIDATES) {
        let wh = &listing.warehouse;

        if wh.owner_phone.is_none() {
            continue;
        }
        if let Some(last) = wh.last_outreach_at {
            if (now - last).num_days() < OUTREACH_COOLDOWN_DAYS {
                continue;
            }
        }
        if store::dla_token_pending(conn, &wh.id, buyer_need_id)? {
            continue;
        }

        conn.execute(
            "INSERT INTO dla_tokens
             (id, token, warehouse_id, buyer_need_id, status, expires_at,
              outreach_channel, created_at)
             VALUES (?1, ?2, ?3, ?4, 'pending', ?5, 'sms', ?6)",
            rusqlite::params![
                Uuid::new_v4().to_string(),
                generate_token_string(&wh.id, buyer_need_id),
                wh.id,
                buyer_need_id,
                crate::db::ts(expires),
                crate::db::ts(now),
            ],
        )?;

        conn.execute(
            "UPDATE warehouses
             SET supplier_status = CASE WHEN supplier_status = 'third_party'
                                        THEN 'interested' ELSE supplier_status END,
                 last_outreach_at = ?1,
                 outreach_count = outreach_count + 1,
                 updated_at = ?1
             WHERE id = ?2",
            rusqlite::params![crate::db::ts(now), wh.id],
        )?;

        created += 1;
        info!(warehouse = %wh.id, buyer_need = buyer_need_id, "DLA token created");
    }

    Ok(created > 0)
}

fn build_instant_book_score(
    match_id: &str,
    listing: &Listing,
    breakdown: &ScoreBreakdown,
    now: chrono::DateTime<Utc>,
) -> InstantBookScore {
    let core = &listing.core;

    // Truth core completeness over the key listing fields
    let populated = [
        core.min_sqft.map(|v| v != 0).unwrap_or(false),
        core.max_sqft.map(|v| v != 0).unwrap_or(false),
        core.activity_tier.is_some(),
        core.clear_height_ft.map(|v| v != 0.0).unwrap_or(false),
        core.dock_doors_receiving != 0,
        core.supplier_rate_per_sqft != 0.0,
        !core.tour_readiness.is_empty(),
        core.trust_level != 0,
    ]
    .iter()
    .filter(|&&p| p)
    .count();
    let truth_core_completeness = ((populated as f64 / 8.0) * 100.0) as i64;

    InstantBookScore {
        id: Uuid::new_v4().to_string(),
        match_id: match_id.to_string(),
        truth_core_completeness: truth_core_completeness.min(100),
        contextual_memory_depth: ((listing.memories.len() as i64) * 25).min(100),
        supplier_trust_level: core.trust_level,
        match_specificity: breakdown.composite_score as i64,
        feature_alignment: breakdown.use_type_score as i64,
        composite_score: breakdown.composite_score as i64,
        instant_book_eligible: breakdown.instant_book_eligible,
        threshold_used: 75,
        created_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clearing::scorer::NEUTRAL;
    use serde_json::json;

    fn need(lat: f64, lng: f64) -> BuyerNeed {
        BuyerNeed {
            id: "need-1".into(),
            buyer_id: None,
            city: Some("Testville".into()),
            state: Some("TS".into()),
            lat: Some(lat),
            lng: Some(lng),
            radius_miles: 25.0,
            min_sqft: Some(8_000),
            max_sqft: Some(12_000),
            use_type: Some("general".into()),
            needed_from: None,
            duration_months: Some(6),
            max_budget_per_sqft: None,
            requirements: json!({}),
            status: "active".into(),
            created_at: Utc::now(),
        }
    }

    fn listing(id: &str, lat: f64, lng: f64, tier: &str) -> Listing {
        let now = Utc::now();
        Listing {
            warehouse: Warehouse {
                id: id.into(),
                company_id: None,
                created_by: None,
                owner_name: Some("Owner".into()),
                owner_email: None,
                owner_phone: Some("+12025551234".into()),
                address: "1 Dock Way".into(),
                city: Some("Testville".into()),
                state: Some("TS".into()),
                zip: Some("00001".into()),
                lat: Some(lat),
                lng: Some(lng),
                neighborhood: None,
                building_size_sqft: Some(30_000),
                year_built: None,
                construction_type: None,
                property_type: Some("warehouse".into()),
                primary_image_url: None,
                description: None,
                supplier_status: SupplierStatus::InNetwork,
                onboarded_at: None,
                last_outreach_at: None,
                outreach_count: 0,
                created_at: now,
                updated_at: now,
            },
            core: TruthCore {
                id: format!("tc-{id}"),
                warehouse_id: id.into(),
                min_sqft: Some(5_000),
                max_sqft: Some(20_000),
                activity_tier: Some(tier.into()),
                available_from: None,
                available_to: None,
                min_term_months: 1,
                max_term_months: 12,
                supplier_rate_per_sqft: 5.0,
                buyer_rate_per_sqft: None,
                activation_status: "on".into(),
                toggled_at: None,
                toggle_reason: None,
                tour_readiness: "48_hours".into(),
                dock_doors_receiving: 4,
                dock_doors_shipping: 2,
                drive_in_bays: 0,
                parking_spaces: 10,
                clear_height_ft: Some(24.0),
                has_office_space: false,
                has_sprinkler: true,
                power_supply: None,
                trust_level: 2,
                created_at: now,
                updated_at: now,
            },
            memories: Vec::new(),
        }
    }

    #[test]
    fn test_pre_filter_in_radius_passes() {
        let survivors = pre_filter(&need(40.0, -74.0), vec![listing("wh-1", 40.0, -74.0, "storage_only")]);
        assert_eq!(survivors.len(), 1);
    }

    #[test]
    fn test_pre_filter_use_type_incompatibility_rejects() {
        let mut n = need(40.0, -74.0);
        n.use_type = Some("cold_storage".into());
        let survivors = pre_filter(&n, vec![listing("wh-1", 40.0, -74.0, "storage_only")]);
        assert!(survivors.is_empty());
    }

    #[test]
    fn test_pre_filter_size_overlap_rejects() {
        let mut l = listing("wh-1", 40.0, -74.0, "storage_only");
        l.core.min_sqft = Some(50_000);
        l.core.max_sqft = Some(80_000);
        let survivors = pre_filter(&need(40.0, -74.0), vec![l]);
        assert!(survivors.is_empty());
    }

    #[test]
    fn test_pre_filter_knn_fallback_catches_out_of_radius() {
        // ~45 miles north, outside a 25 mile radius but within the 100 mile cap
        let wh_lat = 40.0 + 45.0 / 69.05;
        let survivors = pre_filter(&need(40.0, -74.0), vec![listing("wh-1", wh_lat, -74.0, "storage_only")]);
        assert_eq!(survivors.len(), 1);
    }

    #[test]
    fn test_pre_filter_knn_fallback_respects_hard_cap() {
        let wh_lat = 40.0 + 150.0 / 69.05;
        let survivors = pre_filter(&need(40.0, -74.0), vec![listing("wh-1", wh_lat, -74.0, "storage_only")]);
        assert!(survivors.is_empty());
    }

    #[test]
    fn test_pre_filter_state_fallback_without_coords() {
        let mut n = need(40.0, -74.0);
        n.lat = None;
        n.lng = None;
        let mut l = listing("wh-1", 40.0, -74.0, "storage_only");
        l.warehouse.state = Some("ts".into()); // case-insensitive match
        assert_eq!(pre_filter(&n, vec![l.clone()]).len(), 1);

        l.warehouse.state = Some("ZZ".into());
        assert!(pre_filter(&n, vec![l]).is_empty());
    }

    #[test]
    fn test_pre_filter_no_geo_info_rejects() {
        let mut n = need(40.0, -74.0);
        n.lat = None;
        n.lng = None;
        n.state = None;
        let l = listing("wh-1", 40.0, -74.0, "storage_only");
        assert!(pre_filter(&n, vec![l]).is_empty());
    }

    #[test]
    fn test_instant_book_score_completeness() {
        let l = listing("wh-1", 40.0, -74.0, "storage_only");
        let breakdown = compute_composite_score(&need(40.0, -74.0), &l.warehouse, &l.core);
        let ib = build_instant_book_score("m-1", &l, &breakdown, Utc::now());
        // All 8 key fields populated in the fixture
        assert_eq!(ib.truth_core_completeness, 100);
        assert_eq!(ib.contextual_memory_depth, 0);
        assert_eq!(ib.supplier_trust_level, 2);
        assert_eq!(ib.threshold_used, 75);
    }

    #[test]
    fn test_budget_context_flags_first_when_all_over() {
        fn m(within: bool) -> Tier1Match {
            Tier1Match {
                match_id: "m".into(),
                warehouse_id: "w".into(),
                match_score: 80.0,
                scoring_breakdown: ScoreBreakdown {
                    composite_score: 80.0,
                    location_score: 80.0,
                    size_score: 80.0,
                    use_type_score: 80.0,
                    feature_score: NEUTRAL,
                    timing_score: 100.0,
                    budget_score: 50.0,
                    distance_miles: None,
                    within_budget: within,
                    budget_stretch_pct: 0.0,
                    use_type_callouts: vec![],
                    reasoning: String::new(),
                    instant_book_eligible: false,
                },
                reasoning: String::new(),
                instant_book_eligible: false,
                buyer_rate: 6.36,
                supplier_rate: 5.0,
                spread_pct: 21.4,
                distance_miles: None,
                within_budget: within,
                budget_stretch_pct: 0.0,
                budget_alternative_available: false,
                use_type_callouts: vec![],
                city: None,
                state: None,
                address: None,
                available_sqft: None,
                description: None,
            }
        }

        let mut all_over = vec![m(false), m(false), m(false)];
        apply_budget_context(&mut all_over, Some(10.0));
        assert!(all_over[0].budget_alternative_available);
        assert!(!all_over[1].budget_alternative_available);

        let mut some_within = vec![m(true), m(false)];
        apply_budget_context(&mut some_within, Some(10.0));
        assert!(!some_within[0].budget_alternative_available);

        let mut no_budget = vec![m(false)];
        apply_budget_context(&mut no_budget, None);
        assert!(no_budget[0].within_budget);
        assert_eq!(no_budget[0].budget_stretch_pct, 0.0);
        assert!(!no_budget[0].budget_alternative_available);
    }
}
