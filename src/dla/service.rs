//! DLA flow: mint tokens, resolve them to property + anonymized buyer data,
//! run the rate decision, flip the supplier in-network on agreement, and
//! learn from every non-conversion outcome.

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use rand::RngCore;
use rusqlite::{params, Connection};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::info;
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::clearing::store;
use crate::db::{parse_opt_ts, parse_ts, ts, Db};
use crate::domain::*;

/// Default supplier response window.
pub const RESPONSE_WINDOW_HOURS: i64 = 48;

/// Match score seeded for a DLA-activated warehouse.
const DLA_SEED_SCORE: f64 = 85.0;

/// 32-char hex token binding one warehouse to one buyer need.
pub fn generate_token_string(warehouse_id: &str, buyer_need_id: &str) -> String {
    let mut nonce = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut nonce);
    let raw = format!("{warehouse_id}:{buyer_need_id}:{}", hex::encode(nonce));
    let digest = Sha256::digest(raw.as_bytes());
    hex::encode(digest)[..32].to_string()
}

pub struct DlaService {
    db: Db,
}

impl DlaService {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Mint a token for (warehouse, buyer need) with the suggested rate
    /// computed up front. Updates the warehouse outreach counters.
    pub async fn generate_token(&self, warehouse_id: &str, buyer_need_id: &str) -> Result<String, ApiError> {
        let mut conn = self.db.lock().await;
        let tx = conn.transaction().map_err(ApiError::internal)?;

        let warehouse = store::get_warehouse(&tx, warehouse_id)
            .map_err(ApiError::internal)?
            .ok_or_else(|| ApiError::not_found("warehouse"))?;
        store::get_buyer_need(&tx, buyer_need_id)
            .map_err(ApiError::internal)?
            .ok_or_else(|| ApiError::not_found("buyer need"))?;

        let rate = suggested_rate(&tx, warehouse_id, buyer_need_id).map_err(ApiError::internal)?;
        let token = generate_token_string(warehouse_id, buyer_need_id);
        let now = Utc::now();
        let expires = now + Duration::hours(RESPONSE_WINDOW_HOURS);

        tx.execute(
            "INSERT INTO dla_tokens
             (id, token, warehouse_id, buyer_need_id, suggested_rate, status,
              expires_at, outreach_channel, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 'pending', ?6, 'sms', ?7)",
            params![
                Uuid::new_v4().to_string(),
                token,
                warehouse_id,
                buyer_need_id,
                rate.suggested,
                ts(expires),
                ts(now),
            ],
        )
        .map_err(ApiError::internal)?;

        tx.execute(
            "UPDATE warehouses
             SET last_outreach_at = ?1, outreach_count = outreach_count + 1, updated_at = ?1
             WHERE id = ?2",
            params![ts(now), warehouse.id],
        )
        .map_err(ApiError::internal)?;

        tx.commit().map_err(ApiError::internal)?;
        info!(warehouse = warehouse_id, buyer_need = buyer_need_id, "DLA token generated");
        Ok(token)
    }

    /// Step 1: resolve the token into the supplier-facing landing payload.
    /// The token itself is the only credential. First open marks the
    /// supplier interested.
    pub async fn resolve_token(&self, token: &str) -> Result<Value, ApiError> {
        let mut conn = self.db.lock().await;
        let tx = conn.transaction().map_err(ApiError::internal)?;
        let dla = get_valid_token(&tx, token, None)?;

        let warehouse = store::get_warehouse(&tx, &dla.warehouse_id)
            .map_err(ApiError::internal)?
            .ok_or_else(|| ApiError::not_found("property"))?;
        let core = store::get_truth_core(&tx, &dla.warehouse_id).map_err(ApiError::internal)?;
        let need = store::get_buyer_need(&tx, &dla.buyer_need_id)
            .map_err(ApiError::internal)?
            .ok_or_else(|| ApiError::not_found("buyer requirement"))?;

        let mut property_data = json!({
            "warehouse_id": warehouse.id,
            "address": warehouse.address,
            "city": warehouse.city,
            "state": warehouse.state,
            "zip": warehouse.zip,
            "building_size_sqft": warehouse.building_size_sqft,
            "year_built": warehouse.year_built,
            "construction_type": warehouse.construction_type,
            "property_type": warehouse.property_type,
            "primary_image_url": warehouse.primary_image_url,
            "owner_name": warehouse.owner_name,
        });
        if let Some(core) = &core {
            let extra = json!({
                "clear_height_ft": core.clear_height_ft,
                "dock_doors_receiving": core.dock_doors_receiving,
                "dock_doors_shipping": core.dock_doors_shipping,
                "drive_in_bays": core.drive_in_bays,
                "parking_spaces": core.parking_spaces,
                "has_office_space": core.has_office_space,
                "has_sprinkler": core.has_sprinkler,
                "power_supply": core.power_supply,
            });
            merge_json(&mut property_data, extra);
        }

        // Anonymized buyer requirement: never name, email, or company
        let buyer_requirement = json!({
            "sqft_needed": need.max_sqft.or(need.min_sqft),
            "min_sqft": need.min_sqft,
            "max_sqft": need.max_sqft,
            "use_type": need.use_type,
            "needed_from": need.needed_from.map(|d| d.format("%B %Y").to_string())
                .unwrap_or_else(|| "ASAP".to_string()),
            "duration_months": need.duration_months,
            "city": need.city,
            "state": need.state,
        });

        let market = market_range(&tx, warehouse.zip.as_deref().unwrap_or("")).map_err(ApiError::internal)?;

        let mut status = dla.status;
        if status == DlaStatus::Pending {
            status = DlaStatus::Interested;
            tx.execute(
                "UPDATE dla_tokens SET status = 'interested',
                        last_step_reached = 'property_confirm' WHERE token = ?1",
                params![token],
            )
            .map_err(ApiError::internal)?;
            tx.execute(
                "UPDATE warehouses SET supplier_status = 'interested', updated_at = ?1 WHERE id = ?2",
                params![ts(Utc::now()), warehouse.id],
            )
            .map_err(ApiError::internal)?;
        }

        tx.commit().map_err(ApiError::internal)?;

        Ok(json!({
            "token": token,
            "status": status.as_str(),
            "property_data": property_data,
            "buyer_requirement": buyer_requirement,
            "suggested_rate": dla.suggested_rate.unwrap_or(0.0),
            "market_range": {"low": market.0, "high": market.1},
            "expires_at": dla.expires_at.to_rfc3339(),
        }))
    }

    /// Step 2: supplier accepts the suggested rate or counters.
    pub async fn handle_rate_decision(
        &self,
        token: &str,
        accepted: bool,
        proposed_rate: Option<f64>,
    ) -> Result<Value, ApiError> {
        let mut conn = self.db.lock().await;
        let tx = conn.transaction().map_err(ApiError::internal)?;
        let dla = get_valid_token(&tx, token, None)?;

        let need = store::get_buyer_need(&tx, &dla.buyer_need_id).map_err(ApiError::internal)?;
        let warehouse = store::get_warehouse(&tx, &dla.warehouse_id).map_err(ApiError::internal)?;
        let now = Utc::now();

        let (rate, response) = if accepted {
            let rate = dla.suggested_rate.unwrap_or(0.0);
            (
                rate,
                json!({
                    "status": "rate_decided",
                    "next_step": "agreement",
                    "message": "Rate accepted. Proceed to agreement.",
                    "rate": rate,
                }),
            )
        } else {
            let proposed = proposed_rate
                .ok_or_else(|| ApiError::validation("proposed_rate is required when not accepting"))?;

            let buyer_budget = need.as_ref().and_then(|n| n.max_budget_per_sqft).unwrap_or(0.0);
            let competing = match &warehouse {
                Some(wh) if buyer_budget > 0.0 => {
                    competing_spaces(&tx, wh.state.as_deref(), buyer_budget).map_err(ApiError::internal)?
                }
                _ => 0,
            };

            let message = if buyer_budget > 0.0 && proposed > buyer_budget {
                format!(
                    "Got it, we've noted your rate of ${proposed:.2}/sqft. The buyer's current \
                     budget is closer to ${buyer_budget:.2}, so we'll present your space but want \
                     to be upfront: there are already {competing} spaces within their budget \
                     range. We'll let you know what they decide."
                )
            } else {
                format!(
                    "Your rate of ${proposed:.2}/sqft has been noted. We'll present your space \
                     to the buyer."
                )
            };

            (
                proposed,
                json!({
                    "status": "rate_decided",
                    "next_step": "agreement",
                    "message": message,
                    "rate": proposed,
                    "competing_spaces": competing,
                    "within_budget": buyer_budget <= 0.0 || proposed <= buyer_budget,
                }),
            )
        };

        tx.execute(
            "UPDATE dla_tokens
             SET rate_accepted = ?1, supplier_rate = ?2, status = 'rate_decided',
                 responded_at = ?3, last_step_reached = 'rate_decision'
             WHERE token = ?4",
            params![accepted, rate, ts(now), token],
        )
        .map_err(ApiError::internal)?;
        tx.commit().map_err(ApiError::internal)?;

        Ok(response)
    }

    /// Step 3: agreement signed. Flips the supplier in-network, activates
    /// the truth core at the agreed rate, seeds a Match, and records a
    /// conversion memory. Returns the buyer notification payload.
    pub async fn confirm_agreement(&self, token: &str, agreement_ref: Option<String>) -> Result<Value, ApiError> {
        let mut conn = self.db.lock().await;
        let tx = conn.transaction().map_err(ApiError::internal)?;
        let dla = get_valid_token(&tx, token, Some(&[DlaStatus::RateDecided]))?;

        let warehouse = store::get_warehouse(&tx, &dla.warehouse_id)
            .map_err(ApiError::internal)?
            .ok_or_else(|| ApiError::not_found("property"))?;
        let need = store::get_buyer_need(&tx, &dla.buyer_need_id).map_err(ApiError::internal)?;
        let now = Utc::now();
        let agreed_rate = dla.supplier_rate.unwrap_or(dla.suggested_rate.unwrap_or(0.0));

        tx.execute(
            "UPDATE warehouses SET supplier_status = 'in_network', onboarded_at = ?1, updated_at = ?1
             WHERE id = ?2",
            params![ts(now), warehouse.id],
        )
        .map_err(ApiError::internal)?;

        tx.execute(
            "UPDATE truth_cores
             SET activation_status = 'on', toggled_at = ?1,
                 toggle_reason = 'DLA agreement confirmed',
                 supplier_rate_per_sqft = CASE WHEN ?2 > 0 THEN ?2 ELSE supplier_rate_per_sqft END,
                 updated_at = ?1
             WHERE warehouse_id = ?3",
            params![ts(now), agreed_rate, warehouse.id],
        )
        .map_err(ApiError::internal)?;

        tx.execute(
            "UPDATE dla_tokens
             SET status = 'confirmed', agreement_ref = ?1,
                 last_step_reached = 'agreement', responded_at = ?2
             WHERE token = ?3",
            params![agreement_ref, ts(now), token],
        )
        .map_err(ApiError::internal)?;

        // Seed a pre-qualified match linking the warehouse to the need
        if need.is_some() {
            let seeded = Match {
                id: Uuid::new_v4().to_string(),
                buyer_need_id: dla.buyer_need_id.clone(),
                warehouse_id: dla.warehouse_id.clone(),
                match_score: DLA_SEED_SCORE,
                confidence: DLA_SEED_SCORE,
                instant_book_eligible: false,
                reasoning: "Activated via Demand-Led Activation flow".into(),
                scoring_breakdown: json!({"source": "dla", "rate_accepted": dla.rate_accepted}),
                status: MatchStatus::Pending,
                created_at: now,
            };
            store::insert_match(&tx, &seeded).map_err(ApiError::internal)?;
        }

        let rate_note = if dla.rate_accepted == Some(true) {
            "accepted as suggested"
        } else {
            "counter-proposed"
        };
        let memory = ContextualMemory {
            id: Uuid::new_v4().to_string(),
            warehouse_id: warehouse.id.clone(),
            memory_type: "deal_outcome".into(),
            content: format!(
                "Supplier converted via DLA. Agreed rate: ${agreed_rate:.2}/sqft. Rate {rate_note}. \
                 Buyer need: {} in {}.",
                need.as_ref()
                    .and_then(|n| n.use_type.clone())
                    .unwrap_or_else(|| "general".into()),
                need.as_ref()
                    .and_then(|n| n.city.clone())
                    .unwrap_or_else(|| "area".into()),
            ),
            source: "dla_flow".into(),
            confidence: 1.0,
            metadata: json!({}),
            created_at: now,
        };
        store::insert_memory(&tx, &memory).map_err(ApiError::internal)?;

        tx.commit().map_err(ApiError::internal)?;
        info!(warehouse = %warehouse.id, token, "DLA confirmed: supplier now in_network");

        // Buyer notification payload with anonymized property details
        let buyer_notification = json!({
            "message": format!(
                "Good news: a new space just confirmed availability for your requirements. {}, {} sqft, ${:.2}/sqft.",
                warehouse.city.clone().unwrap_or_default(),
                warehouse.building_size_sqft.map(|v| v.to_string()).unwrap_or_else(|| "N/A".into()),
                agreed_rate,
            ),
        });

        Ok(json!({
            "status": "confirmed",
            "warehouse_id": warehouse.id,
            "supplier_status": "in_network",
            "rate_agreed": agreed_rate,
            "buyer_notification": buyer_notification,
        }))
    }

    /// Step 4 alternative: persist a non-conversion outcome so future
    /// routing can learn from it.
    pub async fn store_outcome(
        &self,
        token: &str,
        outcome: &str,
        reason: Option<String>,
        rate_floor: Option<f64>,
    ) -> Result<Value, ApiError> {
        let outcome_status = DlaStatus::from_str(outcome)
            .filter(|s| {
                matches!(
                    s,
                    DlaStatus::Declined | DlaStatus::NoResponse | DlaStatus::DroppedOff | DlaStatus::Expired
                )
            })
            .ok_or_else(|| ApiError::validation("unknown DLA outcome"))?;

        let mut conn = self.db.lock().await;
        let tx = conn.transaction().map_err(ApiError::internal)?;

        let dla = load_token(&tx, token)
            .map_err(ApiError::internal)?
            .ok_or_else(|| ApiError::not_found("token"))?;
        let warehouse = store::get_warehouse(&tx, &dla.warehouse_id).map_err(ApiError::internal)?;
        let now = Utc::now();

        tx.execute(
            "UPDATE dla_tokens SET status = ?1, decline_reason = ?2, responded_at = ?3
             WHERE token = ?4",
            params![outcome_status.as_str(), reason, ts(now), token],
        )
        .map_err(ApiError::internal)?;

        if let Some(warehouse) = warehouse {
            let new_status = match outcome_status {
                DlaStatus::Declined => SupplierStatus::Declined,
                DlaStatus::NoResponse | DlaStatus::Expired => SupplierStatus::Unresponsive,
                // They showed some intent — keep them warm
                DlaStatus::DroppedOff => SupplierStatus::Interested,
                _ => warehouse.supplier_status,
            };
            tx.execute(
                "UPDATE warehouses SET supplier_status = ?1, updated_at = ?2 WHERE id = ?3",
                params![new_status.as_str(), ts(now), warehouse.id],
            )
            .map_err(ApiError::internal)?;

            let mut content = format!("DLA outcome: {}.", outcome_status.as_str());
            if let Some(reason) = &reason {
                content.push_str(&format!(" Reason: {reason}."));
            }
            if let Some(floor) = rate_floor {
                content.push_str(&format!(" Rate floor indicated: ${floor:.2}/sqft."));
            }
            if let Some(step) = &dla.last_step_reached {
                content.push_str(&format!(" Last step reached: {step}."));
            }

            let memory = ContextualMemory {
                id: Uuid::new_v4().to_string(),
                warehouse_id: warehouse.id.clone(),
                memory_type: "outreach_response".into(),
                content,
                source: "dla_flow".into(),
                confidence: 1.0,
                metadata: json!({
                    "outcome": outcome_status.as_str(),
                    "reason": reason,
                    "rate_floor": rate_floor,
                    "buyer_need_id": dla.buyer_need_id,
                }),
                created_at: now,
            };
            store::insert_memory(&tx, &memory).map_err(ApiError::internal)?;
        }

        tx.commit().map_err(ApiError::internal)?;
        info!(warehouse = %dla.warehouse_id, outcome = outcome_status.as_str(), "DLA outcome stored");

        Ok(json!({
            "status": outcome_status.as_str(),
            "warehouse_id": dla.warehouse_id,
            "acknowledged": true,
        }))
    }
}

/// Suggested-rate blend: 60% buyer budget ceiling + 40% in-state Tier 1
/// average, clamped into the cached market NNN range.
pub struct SuggestedRate {
    pub suggested: f64,
    pub market_low: f64,
    pub market_high: f64,
    pub tier1_avg: Option<f64>,
}

pub fn suggested_rate(conn: &Connection, warehouse_id: &str, buyer_need_id: &str) -> Result<SuggestedRate> {
    let warehouse = store::get_warehouse(conn, warehouse_id)?;
    let need = store::get_buyer_need(conn, buyer_need_id)?;
    let (warehouse, need) = match (warehouse, need) {
        (Some(w), Some(n)) => (w, n),
        _ => {
            return Ok(SuggestedRate {
                suggested: 0.0,
                market_low: 0.0,
                market_high: 0.0,
                tier1_avg: None,
            })
        }
    };

    let (market_low, market_high) = market_range(conn, warehouse.zip.as_deref().unwrap_or(""))?;

    let mut stmt = conn.prepare(
        "SELECT t.supplier_rate_per_sqft FROM truth_cores t
         JOIN warehouses w ON w.id = t.warehouse_id
         WHERE w.supplier_status = 'in_network' AND t.activation_status = 'on'
           AND IFNULL(w.state, '') = IFNULL(?1, '')",
    )?;
    let rates: Vec<f64> = stmt
        .query_map(params![warehouse.state], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<f64>>>()?;

    let tier1_avg = if rates.is_empty() {
        if market_high > 0.0 {
            (market_low + market_high) / 2.0
        } else {
            0.0
        }
    } else {
        rates.iter().sum::<f64>() / rates.len() as f64
    };

    let buyer_ceiling = need.max_budget_per_sqft.unwrap_or(0.0);

    let mut suggested = if buyer_ceiling > 0.0 && tier1_avg > 0.0 {
        buyer_ceiling * 0.6 + tier1_avg * 0.4
    } else if buyer_ceiling > 0.0 {
        buyer_ceiling * 0.9
    } else if tier1_avg > 0.0 {
        tier1_avg
    } else if market_high > 0.0 {
        (market_low + market_high) / 2.0
    } else {
        0.0
    };

    if market_low > 0.0 && suggested < market_low {
        suggested = market_low;
    }
    if market_high > 0.0 && suggested > market_high {
        suggested = market_high * 0.95;
    }

    Ok(SuggestedRate {
        suggested: (suggested * 100.0).round() / 100.0,
        market_low,
        market_high,
        tier1_avg: (tier1_avg > 0.0).then_some((tier1_avg * 100.0).round() / 100.0),
    })
}

fn competing_spaces(conn: &Connection, state: Option<&str>, max_budget: f64) -> Result<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM truth_cores t
         JOIN warehouses w ON w.id = t.warehouse_id
         WHERE w.supplier_status = 'in_network' AND t.activation_status = 'on'
           AND IFNULL(w.state, '') = IFNULL(?1, '')
           AND t.supplier_rate_per_sqft <= ?2",
        params![state, max_budget],
        |row| row.get(0),
    )?;
    Ok(count)
}

fn market_range(conn: &Connection, zipcode: &str) -> Result<(f64, f64)> {
    if zipcode.is_empty() {
        return Ok((0.0, 0.0));
    }
    let row = conn
        .query_row(
            "SELECT nnn_low, nnn_high FROM market_rate_cache WHERE zipcode = ?1",
            params![zipcode],
            |row| Ok((row.get::<_, f64>(0)?, row.get::<_, f64>(1)?)),
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            e => Err(e),
        })?;
    Ok(row.unwrap_or((0.0, 0.0)))
}

fn merge_json(base: &mut Value, extra: Value) {
    if let (Value::Object(base_map), Value::Object(extra_map)) = (base, extra) {
        for (k, v) in extra_map {
            base_map.insert(k, v);
        }
    }
}

fn load_token(conn: &Connection, token: &str) -> Result<Option<DlaToken>> {
    let mut stmt = conn.prepare("SELECT * FROM dla_tokens WHERE token = ?1")?;
    let mut rows = stmt.query_map(params![token], |row| {
        Ok(DlaToken {
            id: row.get("id")?,
            token: row.get("token")?,
            warehouse_id: row.get("warehouse_id")?,
            buyer_need_id: row.get("buyer_need_id")?,
            suggested_rate: row.get("suggested_rate")?,
            supplier_rate: row.get("supplier_rate")?,
            rate_accepted: row.get("rate_accepted")?,
            status: DlaStatus::from_str(&row.get::<_, String>("status")?).unwrap_or(DlaStatus::Pending),
            expires_at: parse_ts(&row.get::<_, String>("expires_at")?).unwrap_or_else(Utc::now),
            responded_at: parse_opt_ts(row.get("responded_at")?),
            outreach_channel: row.get("outreach_channel")?,
            agreement_ref: row.get("agreement_ref")?,
            decline_reason: row.get("decline_reason")?,
            last_step_reached: row.get("last_step_reached")?,
            created_at: parse_ts(&row.get::<_, String>("created_at")?).unwrap_or_else(Utc::now),
        })
    })?;
    match rows.next() {
        Some(row) => Ok(Some(row?)),
        None => Ok(None),
    }
}

/// Look up and validate a token: it must exist, be unexpired, and (when
/// `allow_statuses` is given) sit in one of the expected statuses.
/// Expired tokens self-mark on access.
fn get_valid_token(
    conn: &Connection,
    token: &str,
    allow_statuses: Option<&[DlaStatus]>,
) -> Result<DlaToken, ApiError> {
    let dla = load_token(conn, token)
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::validation("Invalid token"))?;

    let now = Utc::now();
    if dla.expires_at < now {
        if !matches!(dla.status, DlaStatus::Confirmed | DlaStatus::Declined | DlaStatus::Expired) {
            conn.execute(
                "UPDATE dla_tokens SET status = 'expired' WHERE token = ?1",
                params![token],
            )
            .map_err(ApiError::internal)?;
        }
        return Err(ApiError::validation("Token has expired"));
    }

    if let Some(allowed) = allow_statuses {
        if !allowed.contains(&dla.status) {
            return Err(ApiError::validation(format!(
                "Token status is '{}', expected one of {:?}",
                dla.status.as_str(),
                allowed.iter().map(|s| s.as_str()).collect::<Vec<_>>()
            )));
        }
    } else if matches!(dla.status, DlaStatus::Confirmed | DlaStatus::Expired) {
        return Err(ApiError::validation(format!(
            "Token is already {}",
            dla.status.as_str()
        )));
    }

    Ok(dla)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_shape() {
        let token = generate_token_string("wh-1", "need-1");
        assert_eq!(token.len(), 32);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        // Nonce makes tokens unique per mint
        assert_ne!(token, generate_token_string("wh-1", "need-1"));
    }

    async fn seeded_db(buyer_budget: f64, market: (f64, f64), with_tier1: bool) -> Db {
        let db = Db::open_in_memory().unwrap();
        let conn = db.lock().await;
        let now = ts(Utc::now());
        conn.execute(
            "INSERT INTO warehouses (id, address, state, zip, supplier_status, created_at, updated_at)
             VALUES ('wh-t', '1 St', 'TX', '75201', 'third_party', ?1, ?1)",
            params![now],
        )
        .unwrap();
        if with_tier1 {
            conn.execute(
                "INSERT INTO warehouses (id, address, state, supplier_status, created_at, updated_at)
                 VALUES ('wh-n', '2 St', 'TX', 'in_network', ?1, ?1)",
                params![now],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO truth_cores (id, warehouse_id, supplier_rate_per_sqft, activation_status, created_at, updated_at)
                 VALUES ('tc-n', 'wh-n', 4.0, 'on', ?1, ?1)",
                params![now],
            )
            .unwrap();
        }
        conn.execute(
            "INSERT INTO buyer_needs (id, max_budget_per_sqft, created_at) VALUES ('bn-t', ?1, ?2)",
            params![buyer_budget, now],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO market_rate_cache (zipcode, nnn_low, nnn_high, fetched_at)
             VALUES ('75201', ?1, ?2, ?3)",
            params![market.0, market.1, now],
        )
        .unwrap();
        drop(conn);
        db
    }

    #[tokio::test]
    async fn test_suggested_rate_blend() {
        let db = seeded_db(6.0, (1.0, 10.0), true).await;
        let conn = db.lock().await;
        let rate = suggested_rate(&conn, "wh-t", "bn-t").unwrap();
        // 0.6 * 6.0 + 0.4 * 4.0 = 5.2, inside the 1..10 market band
        assert_eq!(rate.suggested, 5.2);
        assert_eq!(rate.tier1_avg, Some(4.0));
    }

    #[tokio::test]
    async fn test_suggested_rate_clamps_to_market_high() {
        let db = seeded_db(50.0, (1.0, 2.0), false).await;
        let conn = db.lock().await;
        let rate = suggested_rate(&conn, "wh-t", "bn-t").unwrap();
        // Ceiling blend lands way above market; clamps to high * 0.95
        assert_eq!(rate.suggested, 1.9);
    }
}
