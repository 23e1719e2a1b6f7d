//! Buyer endpoints: the web search wizard entry into the clearing engine
//! and the live match-count badge.

use axum::{extract::State, Extension, Json};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::api::{role_of, AppState};
use crate::auth::Claims;
use crate::clearing::store as clearing_store;
use crate::domain::BuyerNeed;

#[derive(Debug, Deserialize)]
pub struct SearchBody {
    pub city: Option<String>,
    pub state: Option<String>,
    pub radius_miles: Option<f64>,
    pub min_sqft: Option<i64>,
    pub max_sqft: Option<i64>,
    pub use_type: Option<String>,
    pub needed_from: Option<String>,
    pub duration_months: Option<i64>,
    pub max_budget_per_sqft: Option<f64>,
    #[serde(default)]
    pub requirements: Value,
}

#[derive(Debug, Deserialize)]
pub struct MatchCountBody {
    pub location: Option<String>,
    pub min_sqft: Option<i64>,
    pub max_sqft: Option<i64>,
    pub use_type: Option<String>,
}

/// Run a clearing search for a buyer. The response is the buyer view:
/// tier-1 matches carry the buyer rate only, tier-2 candidates carry
/// neighborhood-level disclosure.
pub async fn search(
    State(state): State<AppState>,
    claims: Option<Extension<Claims>>,
    Json(body): Json<SearchBody>,
) -> Result<Json<Value>, ApiError> {
    if body.city.is_none() && body.state.is_none() {
        return Err(ApiError::validation("a city or state is required"));
    }

    // Global search throttle
    if !state.search_guard.try_acquire() {
        return Err(ApiError::RateLimited("search capacity exceeded, retry shortly".into()));
    }

    // Geocode for the geo gate; state-level fallback on failure
    let location = match (&body.city, &body.state) {
        (Some(city), Some(st)) => format!("{city}, {st}"),
        (Some(city), None) => city.clone(),
        (None, Some(st)) => st.clone(),
        _ => unreachable!(),
    };
    let geo = if state.search_guard.is_negative_cached(&location) {
        None
    } else {
        let result = state.geocode.geocode(&location).await;
        if result.is_none() {
            state
                .search_guard
                .cache_negative(&location, crate::middleware::rate_limit::NOT_FOUND_TTL);
        }
        result
    };

    let need = BuyerNeed {
        id: Uuid::new_v4().to_string(),
        buyer_id: claims.as_deref().map(|c| c.sub.clone()),
        city: body.city.clone(),
        state: body.state.clone().or_else(|| {
            geo.as_ref().map(|g| g.state.clone()).filter(|s| !s.is_empty())
        }),
        lat: geo.as_ref().map(|g| g.lat),
        lng: geo.as_ref().map(|g| g.lng),
        radius_miles: body.radius_miles.unwrap_or(25.0),
        min_sqft: body.min_sqft,
        max_sqft: body.max_sqft,
        use_type: body.use_type.clone(),
        needed_from: body
            .needed_from
            .as_deref()
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok()),
        duration_months: body.duration_months,
        max_budget_per_sqft: body.max_budget_per_sqft,
        requirements: if body.requirements.is_null() { json!({}) } else { body.requirements.clone() },
        status: "active".into(),
        created_at: Utc::now(),
    };

    {
        let conn = state.db.lock().await;
        clearing_store::insert_buyer_need(&conn, &need).map_err(ApiError::internal)?;
    }

    let result = state.clearing.run_clearing(&need.id).await.map_err(ApiError::internal)?;
    let admin = role_of(claims.as_deref()) == "admin";

    // Buyer-facing projection: supplier economics never leave the core
    let tier1: Vec<Value> = result
        .tier1
        .iter()
        .map(|m| {
            let mut entry = json!({
                "match_id": m.match_id,
                "warehouse_id": m.warehouse_id,
                "match_score": m.match_score,
                "city": m.city,
                "state": m.state,
                "available_sqft": m.available_sqft,
                "buyer_rate": m.buyer_rate,
                "reasoning": m.reasoning,
                "instant_book_eligible": m.instant_book_eligible,
                "distance_miles": m.distance_miles,
                "within_budget": m.within_budget,
                "budget_stretch_pct": m.budget_stretch_pct,
                "budget_alternative_available": m.budget_alternative_available,
                "use_type_callouts": m.use_type_callouts,
            });
            if admin {
                entry["supplier_rate"] = json!(m.supplier_rate);
                entry["spread_pct"] = json!(m.spread_pct);
            }
            entry
        })
        .collect();

    Ok(Json(json!({
        "buyer_need_id": need.id,
        "tier1_matches": tier1,
        "tier2_matches": result.tier2,
        "dla_triggered": result.dla_triggered,
        "total_matches": result.total_matches,
    })))
}

/// Fast count badge for the search wizard.
pub async fn match_count(
    State(state): State<AppState>,
    Json(body): Json<MatchCountBody>,
) -> Result<Json<Value>, ApiError> {
    let conn = state.db.lock().await;
    let (count, approximate) = clearing_store::quick_match_count(
        &conn,
        body.location.as_deref().unwrap_or(""),
        body.min_sqft.unwrap_or(0),
        body.max_sqft.unwrap_or(100_000),
        body.use_type.as_deref(),
    )
    .map_err(ApiError::internal)?;
    Ok(Json(json!({"count": count, "approximate": approximate})))
}
