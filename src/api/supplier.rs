//! Supplier endpoints: the instant rate estimator, warehouse listing,
//! activation, and the availability toggle with its grace window.

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use chrono::{Duration, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::api::AppState;
use crate::auth::Claims;
use crate::clearing::pricing::buyer_rate_from_supplier;
use crate::clearing::store as clearing_store;
use crate::db::ts;

/// Activation toggles honor in-flight matches for this long.
const TOGGLE_GRACE_HOURS: i64 = 48;

/// Regional fallback NNN rates ($/sqft/month) when no cached market data
/// covers the zipcode.
const REGION_RATES: &[(&str, f64, f64)] = &[
    ("CA", 0.85, 1.10),
    ("TX", 0.65, 0.85),
    ("AZ", 0.60, 0.80),
    ("SC", 0.55, 0.75),
    ("MD", 0.70, 0.90),
    ("GA", 0.65, 0.85),
    ("MI", 0.60, 0.80),
    ("FL", 0.70, 0.90),
    ("IL", 0.65, 0.85),
    ("NY", 0.80, 1.05),
    ("NJ", 0.75, 1.00),
    ("PA", 0.65, 0.85),
    ("OH", 0.55, 0.75),
    ("WA", 0.75, 0.95),
    ("OR", 0.70, 0.90),
];
const DEFAULT_RATES: (f64, f64) = (0.65, 0.90);

/// Cached market rates stay fresh for 30 days.
const MARKET_RATE_TTL_DAYS: i64 = 30;

#[derive(Debug, Deserialize)]
pub struct EstimateBody {
    pub sqft: i64,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ActivateBody {
    pub min_sqft: i64,
    pub max_sqft: i64,
    pub activity_tier: String,
    pub supplier_rate_per_sqft: f64,
    pub available_from: Option<String>,
    pub available_to: Option<String>,
    pub min_term_months: Option<i64>,
    pub max_term_months: Option<i64>,
    pub clear_height_ft: Option<f64>,
    pub dock_doors_receiving: Option<i64>,
    pub dock_doors_shipping: Option<i64>,
    pub drive_in_bays: Option<i64>,
    pub parking_spaces: Option<i64>,
    pub has_office_space: Option<bool>,
    pub has_sprinkler: Option<bool>,
    pub power_supply: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ToggleBody {
    pub status: String, // on | off
    pub reason: Option<String>,
}

/// Market rate JSON the grounded-search LLM returns for a zipcode.
#[derive(Debug, Deserialize)]
struct NnnRange {
    nnn_low: f64,
    nnn_high: f64,
    #[serde(default)]
    source_context: String,
}

/// Synchronous rate estimator: MarketRateCache first (30-day TTL), then a
/// grounded-search LLM fetch, then the regional fallback table.
pub async fn estimate(
    State(state): State<AppState>,
    Json(body): Json<EstimateBody>,
) -> Result<Json<Value>, ApiError> {
    if body.sqft <= 0 {
        return Err(ApiError::validation("sqft must be positive"));
    }

    let mut low_rate = None;
    let mut high_rate = None;
    let mut rate_location = None;

    if let Some(zip) = body.zip.as_deref().filter(|z| !z.is_empty()) {
        let cached = {
            let conn = state.db.lock().await;
            let cutoff = ts(Utc::now() - Duration::days(MARKET_RATE_TTL_DAYS));
            conn.query_row(
                "SELECT nnn_low, nnn_high FROM market_rate_cache
                 WHERE zipcode = ?1 AND fetched_at >= ?2",
                rusqlite::params![zip, cutoff],
                |row| Ok((row.get::<_, f64>(0)?, row.get::<_, f64>(1)?)),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                e => Err(e),
            })
            .map_err(ApiError::internal)?
        };
        if let Some((low, high)) = cached {
            low_rate = Some(low);
            high_rate = Some(high);
            rate_location = Some(format!("zip {zip}"));
        } else if state.llm.is_configured() {
            // Grounded-search fetch; failure just falls through to the table
            match fetch_market_rates(&state, zip).await {
                Ok(Some((low, high))) => {
                    low_rate = Some(low);
                    high_rate = Some(high);
                    rate_location = Some(format!("zip {zip}"));
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(zip, error = %err, "Market rate fetch failed");
                }
            }
        }
    }

    if low_rate.is_none() {
        let (low, high) = body
            .state
            .as_deref()
            .and_then(|st| {
                REGION_RATES
                    .iter()
                    .find(|(abbr, _, _)| *abbr == st.to_uppercase())
                    .map(|(_, low, high)| (*low, *high))
            })
            .unwrap_or(DEFAULT_RATES);
        low_rate = Some(low);
        high_rate = Some(high);
        rate_location = Some(body.state.clone().unwrap_or_else(|| "your area".into()));
    }

    let (low, high) = (low_rate.unwrap(), high_rate.unwrap());
    let low_monthly = (body.sqft as f64 * low).round();
    let high_monthly = (body.sqft as f64 * high).round();

    Ok(Json(json!({
        "sqft": body.sqft,
        "city": body.city,
        "state": body.state,
        "low_rate": low,
        "high_rate": high,
        "low_monthly": low_monthly,
        "high_monthly": high_monthly,
        "low_annual": low_monthly * 12.0,
        "high_annual": high_monthly * 12.0,
        "rate_location": rate_location,
    })))
}

/// Warehouses owned by the caller's company.
pub async fn list_warehouses(
    State(state): State<AppState>,
    claims: Option<Extension<Claims>>,
) -> Result<Json<Value>, ApiError> {
    let claims = claims.ok_or_else(|| ApiError::authorization("login required"))?;
    let company_id = claims
        .company_id
        .clone()
        .ok_or_else(|| ApiError::authorization("no company on account"))?;

    let conn = state.db.lock().await;
    let mut stmt = conn
        .prepare(
            "SELECT w.id, w.address, w.city, w.state, w.building_size_sqft, w.supplier_status,
                    t.activation_status, t.supplier_rate_per_sqft
             FROM warehouses w
             LEFT JOIN truth_cores t ON t.warehouse_id = w.id
             WHERE w.company_id = ?1
             ORDER BY w.created_at",
        )
        .map_err(ApiError::internal)?;
    let rows: Vec<Value> = stmt
        .query_map(rusqlite::params![company_id], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "address": row.get::<_, String>(1)?,
                "city": row.get::<_, Option<String>>(2)?,
                "state": row.get::<_, Option<String>>(3)?,
                "building_size_sqft": row.get::<_, Option<i64>>(4)?,
                "supplier_status": row.get::<_, String>(5)?,
                "activation_status": row.get::<_, Option<String>>(6)?,
                "supplier_rate_per_sqft": row.get::<_, Option<f64>>(7)?,
            }))
        })
        .map_err(ApiError::internal)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(ApiError::internal)?;

    Ok(Json(json!(rows)))
}

fn check_warehouse_company(
    conn: &rusqlite::Connection,
    warehouse_id: &str,
    claims: &Claims,
) -> Result<(), ApiError> {
    if claims.role.as_str() == "admin" {
        return Ok(());
    }
    let company_id: Option<String> = conn
        .query_row(
            "SELECT company_id FROM warehouses WHERE id = ?1",
            rusqlite::params![warehouse_id],
            |row| row.get(0),
        )
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Err(ApiError::not_found("warehouse")),
            e => Err(ApiError::internal(e)),
        })?;
    if company_id.is_some() && company_id == claims.company_id {
        return Ok(());
    }
    Err(ApiError::authorization("warehouse belongs to another company"))
}

/// Create or update the truth core, activate the listing, put the supplier
/// in-network, and record the toggle + network agreement.
pub async fn activate(
    State(state): State<AppState>,
    claims: Option<Extension<Claims>>,
    Path(warehouse_id): Path<String>,
    Json(body): Json<ActivateBody>,
) -> Result<Json<Value>, ApiError> {
    let claims = claims.ok_or_else(|| ApiError::authorization("login required"))?;
    if body.min_sqft <= 0 || body.max_sqft < body.min_sqft {
        return Err(ApiError::validation("invalid sqft range"));
    }
    if body.supplier_rate_per_sqft <= 0.0 {
        return Err(ApiError::validation("supplier rate must be positive"));
    }

    let mut conn = state.db.lock().await;
    let tx = conn.transaction().map_err(ApiError::internal)?;
    check_warehouse_company(&tx, &warehouse_id, &claims)?;

    let now = Utc::now();
    let existing = clearing_store::get_truth_core(&tx, &warehouse_id).map_err(ApiError::internal)?;
    let previous_activation = existing
        .as_ref()
        .map(|c| c.activation_status.clone())
        .unwrap_or_else(|| "off".into());

    let core_id = existing
        .as_ref()
        .map(|c| c.id.clone())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let buyer_rate = buyer_rate_from_supplier(body.supplier_rate_per_sqft);
    let available_from = body
        .available_from
        .as_deref()
        .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok());
    let available_to = body
        .available_to
        .as_deref()
        .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok());

    tx.execute(
        "INSERT INTO truth_cores
         (id, warehouse_id, min_sqft, max_sqft, activity_tier, available_from, available_to,
          min_term_months, max_term_months, supplier_rate_per_sqft, buyer_rate_per_sqft,
          activation_status, toggled_at, clear_height_ft, dock_doors_receiving,
          dock_doors_shipping, drive_in_bays, parking_spaces, has_office_space, has_sprinkler,
          power_supply, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 'on', ?12, ?13, ?14, ?15, ?16,
                 ?17, ?18, ?19, ?20, ?12, ?12)
         ON CONFLICT(warehouse_id) DO UPDATE SET
            min_sqft = excluded.min_sqft,
            max_sqft = excluded.max_sqft,
            activity_tier = excluded.activity_tier,
            available_from = excluded.available_from,
            available_to = excluded.available_to,
            min_term_months = excluded.min_term_months,
            max_term_months = excluded.max_term_months,
            supplier_rate_per_sqft = excluded.supplier_rate_per_sqft,
            buyer_rate_per_sqft = excluded.buyer_rate_per_sqft,
            activation_status = 'on',
            toggled_at = excluded.toggled_at,
            clear_height_ft = excluded.clear_height_ft,
            dock_doors_receiving = excluded.dock_doors_receiving,
            dock_doors_shipping = excluded.dock_doors_shipping,
            drive_in_bays = excluded.drive_in_bays,
            parking_spaces = excluded.parking_spaces,
            has_office_space = excluded.has_office_space,
            has_sprinkler = excluded.has_sprinkler,
            power_supply = excluded.power_supply,
            updated_at = excluded.updated_at",
        rusqlite::params![
            core_id,
            warehouse_id,
            body.min_sqft,
            body.max_sqft,
            body.activity_tier,
            available_from.map(|d| d.to_string()),
            available_to.map(|d| d.to_string()),
            body.min_term_months.unwrap_or(1),
            body.max_term_months.unwrap_or(12),
            body.supplier_rate_per_sqft,
            buyer_rate,
            ts(now),
            body.clear_height_ft,
            body.dock_doors_receiving.unwrap_or(0),
            body.dock_doors_shipping.unwrap_or(0),
            body.drive_in_bays.unwrap_or(0),
            body.parking_spaces.unwrap_or(0),
            body.has_office_space.unwrap_or(false),
            body.has_sprinkler.unwrap_or(false),
            body.power_supply,
        ],
    )
    .map_err(ApiError::internal)?;

    tx.execute(
        "UPDATE warehouses SET supplier_status = 'in_network', onboarded_at = ?1, updated_at = ?1
         WHERE id = ?2",
        rusqlite::params![ts(now), warehouse_id],
    )
    .map_err(ApiError::internal)?;

    tx.execute(
        "INSERT INTO toggle_history
         (id, warehouse_id, previous_status, new_status, reason, in_flight_matches, created_at)
         VALUES (?1, ?2, ?3, 'on', 'Listing activated', 0, ?4)",
        rusqlite::params![Uuid::new_v4().to_string(), warehouse_id, previous_activation, ts(now)],
    )
    .map_err(ApiError::internal)?;

    tx.execute(
        "INSERT INTO supplier_agreements
         (id, warehouse_id, truth_core_id, agreement_type, agreement_version, status, terms,
          signed_at, created_at)
         VALUES (?1, ?2, ?3, 'network_agreement', '1.0', 'active', ?4, ?5, ?5)",
        rusqlite::params![
            Uuid::new_v4().to_string(),
            warehouse_id,
            core_id,
            json!({"supplier_rate_per_sqft": body.supplier_rate_per_sqft}).to_string(),
            ts(now),
        ],
    )
    .map_err(ApiError::internal)?;

    tx.commit().map_err(ApiError::internal)?;

    Ok(Json(json!({
        "warehouse_id": warehouse_id,
        "truth_core_id": core_id,
        "activation_status": "on",
        "supplier_status": "in_network",
        "supplier_rate_per_sqft": body.supplier_rate_per_sqft,
        "buyer_rate_per_sqft": buyer_rate,
    })))
}

/// Flip activation with a 48-hour grace window; the in-flight match count
/// is recorded in the toggle history for ops follow-up.
pub async fn toggle(
    State(state): State<AppState>,
    claims: Option<Extension<Claims>>,
    Path(warehouse_id): Path<String>,
    Json(body): Json<ToggleBody>,
) -> Result<Json<Value>, ApiError> {
    let claims = claims.ok_or_else(|| ApiError::authorization("login required"))?;
    if body.status != "on" && body.status != "off" {
        return Err(ApiError::validation("status must be on or off"));
    }

    let mut conn = state.db.lock().await;
    let tx = conn.transaction().map_err(ApiError::internal)?;
    check_warehouse_company(&tx, &warehouse_id, &claims)?;

    let core = clearing_store::get_truth_core(&tx, &warehouse_id)
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::not_found("truth core"))?;

    let in_flight: i64 = tx
        .query_row(
            "SELECT COUNT(*) FROM matches WHERE warehouse_id = ?1 AND status IN ('pending', 'presented')",
            rusqlite::params![warehouse_id],
            |row| row.get(0),
        )
        .map_err(ApiError::internal)?;

    let now = Utc::now();
    let grace_until = (body.status == "off").then(|| now + Duration::hours(TOGGLE_GRACE_HOURS));

    tx.execute(
        "UPDATE truth_cores SET activation_status = ?1, toggled_at = ?2, toggle_reason = ?3,
                updated_at = ?2
         WHERE warehouse_id = ?4",
        rusqlite::params![body.status, ts(now), body.reason, warehouse_id],
    )
    .map_err(ApiError::internal)?;

    tx.execute(
        "INSERT INTO toggle_history
         (id, warehouse_id, previous_status, new_status, reason, in_flight_matches,
          grace_period_until, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        rusqlite::params![
            Uuid::new_v4().to_string(),
            warehouse_id,
            core.activation_status,
            body.status,
            body.reason,
            in_flight,
            grace_until.map(ts),
            ts(now),
        ],
    )
    .map_err(ApiError::internal)?;

    tx.commit().map_err(ApiError::internal)?;

    Ok(Json(json!({
        "warehouse_id": warehouse_id,
        "activation_status": body.status,
        "in_flight_matches": in_flight,
        "grace_period_until": grace_until,
    })))
}

/// Grounded-search LLM fetch of the NNN lease rate band for a zipcode,
/// cached for 30 days on success.
async fn fetch_market_rates(state: &AppState, zip: &str) -> anyhow::Result<Option<(f64, f64)>> {
    let prompt = format!(
        "What is the current NNN industrial warehouse lease rate range in US zipcode {zip}, \
         in dollars per sqft per month? Return ONLY JSON: \
         {{\"nnn_low\": 0.00, \"nnn_high\": 0.00, \"source_context\": \"...\"}}"
    );
    let range: NnnRange = state
        .llm
        .generate_json(&prompt, 0.1, std::time::Duration::from_secs(30))
        .await?;
    if range.nnn_low <= 0.0 || range.nnn_high < range.nnn_low {
        return Ok(None);
    }

    let conn = state.db.lock().await;
    conn.execute(
        "INSERT INTO market_rate_cache (zipcode, nnn_low, nnn_high, source_context, fetched_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(zipcode) DO UPDATE SET
            nnn_low = excluded.nnn_low,
            nnn_high = excluded.nnn_high,
            source_context = excluded.source_context,
            fetched_at = excluded.fetched_at",
        rusqlite::params![zip, range.nnn_low, range.nnn_high, range.source_context, ts(Utc::now())],
    )?;
    Ok(Some((range.nnn_low, range.nnn_high)))
}

#[derive(Debug, Deserialize)]
pub struct AnswerBody {
    pub answer: String,
}

/// Supplier answers an escalated buyer question. Marks the question
/// answered and resumes the buyer's paused post-tour timer; the knowledge
/// backfill job promotes the answer into the property knowledge base.
pub async fn answer_question(
    State(state): State<AppState>,
    claims: Option<Extension<Claims>>,
    Path(question_id): Path<String>,
    Json(body): Json<AnswerBody>,
) -> Result<Json<Value>, ApiError> {
    let claims = claims.ok_or_else(|| ApiError::authorization("login required"))?;
    if body.answer.trim().is_empty() {
        return Err(ApiError::validation("answer is required"));
    }

    let mut conn = state.db.lock().await;
    let tx = conn.transaction().map_err(ApiError::internal)?;

    let (warehouse_id, status): (String, String) = tx
        .query_row(
            "SELECT warehouse_id, status FROM property_questions WHERE id = ?1",
            rusqlite::params![question_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Err(ApiError::not_found("question")),
            e => Err(ApiError::internal(e)),
        })?;
    check_warehouse_company(&tx, &warehouse_id, &claims)?;

    if status != "routed_to_supplier" && status != "submitted" {
        return Err(ApiError::Conflict(format!("question is already {status}")));
    }

    let now = Utc::now();
    tx.execute(
        "UPDATE property_questions
         SET status = 'answered', supplier_answer = ?2, final_answer = ?2,
             final_answer_source = 'supplier',
             timer_resumed_at = CASE WHEN timer_paused_at IS NOT NULL AND timer_resumed_at IS NULL
                                     THEN ?3 ELSE timer_resumed_at END
         WHERE id = ?1",
        rusqlite::params![question_id, body.answer.trim(), ts(now)],
    )
    .map_err(ApiError::internal)?;

    tx.commit().map_err(ApiError::internal)?;
    Ok(Json(json!({"question_id": question_id, "status": "answered"})))
}

/// Mint a single-use tokenized upload link for property photos (1 h TTL).
pub async fn create_upload_token(
    State(state): State<AppState>,
    claims: Option<Extension<Claims>>,
    Path(warehouse_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let claims = claims.ok_or_else(|| ApiError::authorization("login required"))?;

    let conn = state.db.lock().await;
    check_warehouse_company(&conn, &warehouse_id, &claims)?;

    let token = {
        use base64::engine::general_purpose::URL_SAFE_NO_PAD;
        use base64::Engine as _;
        use rand::RngCore;
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    };
    let now = Utc::now();
    let expires = now + Duration::hours(1);

    conn.execute(
        "INSERT INTO upload_tokens (token, warehouse_id, expires_at, is_used, created_at)
         VALUES (?1, ?2, ?3, 0, ?4)",
        rusqlite::params![token, warehouse_id, ts(expires), ts(now)],
    )
    .map_err(ApiError::internal)?;

    Ok(Json(json!({
        "token": token,
        "warehouse_id": warehouse_id,
        "expires_at": expires,
    })))
}

/// Redeem an upload token: valid exactly once, within its TTL.
pub fn consume_upload_token(
    conn: &rusqlite::Connection,
    token: &str,
) -> Result<String, ApiError> {
    let (warehouse_id, expires_at, is_used): (String, String, bool) = conn
        .query_row(
            "SELECT warehouse_id, expires_at, is_used FROM upload_tokens WHERE token = ?1",
            rusqlite::params![token],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Err(ApiError::not_found("upload token")),
            e => Err(ApiError::internal(e)),
        })?;

    if is_used {
        return Err(ApiError::validation("upload token already used"));
    }
    let expired = crate::db::parse_ts(&expires_at)
        .map(|at| at < Utc::now())
        .unwrap_or(true);
    if expired {
        return Err(ApiError::validation("upload token expired"));
    }

    conn.execute(
        "UPDATE upload_tokens SET is_used = 1 WHERE token = ?1",
        rusqlite::params![token],
    )
    .map_err(ApiError::internal)?;
    Ok(warehouse_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;

    #[tokio::test]
    async fn test_upload_token_single_use() {
        let db = Db::open_in_memory().unwrap();
        let conn = db.lock().await;
        conn.execute(
            "INSERT INTO warehouses (id, address, created_at, updated_at)
             VALUES ('wh-1', '1 St', ?1, ?1)",
            rusqlite::params![ts(Utc::now())],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO upload_tokens (token, warehouse_id, expires_at, is_used, created_at)
             VALUES ('tok-1', 'wh-1', ?1, 0, ?2)",
            rusqlite::params![ts(Utc::now() + Duration::hours(1)), ts(Utc::now())],
        )
        .unwrap();

        assert_eq!(consume_upload_token(&conn, "tok-1").unwrap(), "wh-1");
        // Second redemption fails: single use
        assert!(consume_upload_token(&conn, "tok-1").is_err());
        assert!(consume_upload_token(&conn, "missing").is_err());
    }

    #[tokio::test]
    async fn test_expired_upload_token_rejected() {
        let db = Db::open_in_memory().unwrap();
        let conn = db.lock().await;
        conn.execute(
            "INSERT INTO warehouses (id, address, created_at, updated_at)
             VALUES ('wh-1', '1 St', ?1, ?1)",
            rusqlite::params![ts(Utc::now())],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO upload_tokens (token, warehouse_id, expires_at, is_used, created_at)
             VALUES ('tok-2', 'wh-1', ?1, 0, ?2)",
            rusqlite::params![ts(Utc::now() - Duration::hours(1)), ts(Utc::now())],
        )
        .unwrap();
        assert!(consume_upload_token(&conn, "tok-2").is_err());
    }

    #[test]
    fn test_region_rate_table_lookup() {
        let (low, high) = REGION_RATES
            .iter()
            .find(|(abbr, _, _)| *abbr == "TX")
            .map(|(_, l, h)| (*l, *h))
            .unwrap();
        assert!(low < high);
        assert!(low > 0.0);
    }
}
