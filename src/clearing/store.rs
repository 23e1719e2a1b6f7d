//! SQL access for the clearing pipeline: warehouses with truth cores,
//! buyer needs, matches, instant-book scores, and search sessions.
//!
//! Functions take a `&Connection` so callers control transaction scope: the
//! engine runs its whole persist phase inside one transaction and a DB error
//! aborts the entire clearing with nothing written.

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, Row};
use serde_json::Value;

use crate::db::{parse_opt_date, parse_opt_ts, parse_ts, ts};
use crate::domain::*;

pub fn warehouse_from_row(row: &Row) -> rusqlite::Result<Warehouse> {
    Ok(Warehouse {
        id: row.get("id")?,
        company_id: row.get("company_id")?,
        created_by: row.get("created_by")?,
        owner_name: row.get("owner_name")?,
        owner_email: row.get("owner_email")?,
        owner_phone: row.get("owner_phone")?,
        address: row.get("address")?,
        city: row.get("city")?,
        state: row.get("state")?,
        zip: row.get("zip")?,
        lat: row.get("lat")?,
        lng: row.get("lng")?,
        neighborhood: row.get("neighborhood")?,
        building_size_sqft: row.get("building_size_sqft")?,
        year_built: row.get("year_built")?,
        construction_type: row.get("construction_type")?,
        property_type: row.get("property_type")?,
        primary_image_url: row.get("primary_image_url")?,
        description: row.get("description")?,
        supplier_status: SupplierStatus::from_str(&row.get::<_, String>("supplier_status")?)
            .unwrap_or(SupplierStatus::ThirdParty),
        onboarded_at: parse_opt_ts(row.get("onboarded_at")?),
        last_outreach_at: parse_opt_ts(row.get("last_outreach_at")?),
        outreach_count: row.get("outreach_count")?,
        created_at: parse_ts(&row.get::<_, String>("created_at")?).unwrap_or_else(Utc::now),
        updated_at: parse_ts(&row.get::<_, String>("updated_at")?).unwrap_or_else(Utc::now),
    })
}

pub fn truth_core_from_row(row: &Row) -> rusqlite::Result<TruthCore> {
    Ok(TruthCore {
        id: row.get("id")?,
        warehouse_id: row.get("warehouse_id")?,
        min_sqft: row.get("min_sqft")?,
        max_sqft: row.get("max_sqft")?,
        activity_tier: row.get("activity_tier")?,
        available_from: parse_opt_date(row.get("available_from")?),
        available_to: parse_opt_date(row.get("available_to")?),
        min_term_months: row.get("min_term_months")?,
        max_term_months: row.get("max_term_months")?,
        supplier_rate_per_sqft: row.get("supplier_rate_per_sqft")?,
        buyer_rate_per_sqft: row.get("buyer_rate_per_sqft")?,
        activation_status: row.get("activation_status")?,
        toggled_at: parse_opt_ts(row.get("toggled_at")?),
        toggle_reason: row.get("toggle_reason")?,
        tour_readiness: row.get("tour_readiness")?,
        dock_doors_receiving: row.get("dock_doors_receiving")?,
        dock_doors_shipping: row.get("dock_doors_shipping")?,
        drive_in_bays: row.get("drive_in_bays")?,
        parking_spaces: row.get("parking_spaces")?,
        clear_height_ft: row.get("clear_height_ft")?,
        has_office_space: row.get("has_office_space")?,
        has_sprinkler: row.get("has_sprinkler")?,
        power_supply: row.get("power_supply")?,
        trust_level: row.get("trust_level")?,
        created_at: parse_ts(&row.get::<_, String>("created_at")?).unwrap_or_else(Utc::now),
        updated_at: parse_ts(&row.get::<_, String>("updated_at")?).unwrap_or_else(Utc::now),
    })
}

pub fn buyer_need_from_row(row: &Row) -> rusqlite::Result<BuyerNeed> {
    let requirements: String = row.get("requirements")?;
    Ok(BuyerNeed {
        id: row.get("id")?,
        buyer_id: row.get("buyer_id")?,
        city: row.get("city")?,
        state: row.get("state")?,
        lat: row.get("lat")?,
        lng: row.get("lng")?,
        radius_miles: row.get("radius_miles")?,
        min_sqft: row.get("min_sqft")?,
        max_sqft: row.get("max_sqft")?,
        use_type: row.get("use_type")?,
        needed_from: parse_opt_date(row.get("needed_from")?),
        duration_months: row.get("duration_months")?,
        max_budget_per_sqft: row.get("max_budget_per_sqft")?,
        requirements: serde_json::from_str(&requirements).unwrap_or(Value::Null),
        status: row.get("status")?,
        created_at: parse_ts(&row.get::<_, String>("created_at")?).unwrap_or_else(Utc::now),
    })
}

/// A warehouse with its truth core and contextual memories eager-loaded.
#[derive(Debug, Clone)]
pub struct Listing {
    pub warehouse: Warehouse,
    pub core: TruthCore,
    pub memories: Vec<ContextualMemory>,
}

pub fn get_buyer_need(conn: &Connection, id: &str) -> Result<Option<BuyerNeed>> {
    let mut stmt = conn.prepare("SELECT * FROM buyer_needs WHERE id = ?1")?;
    let mut rows = stmt.query_map(params![id], buyer_need_from_row)?;
    match rows.next() {
        Some(row) => Ok(Some(row?)),
        None => Ok(None),
    }
}

pub fn insert_buyer_need(conn: &Connection, need: &BuyerNeed) -> Result<()> {
    conn.execute(
        "INSERT INTO buyer_needs
         (id, buyer_id, city, state, lat, lng, radius_miles, min_sqft, max_sqft,
          use_type, needed_from, duration_months, max_budget_per_sqft,
          requirements, status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
        params![
            need.id,
            need.buyer_id,
            need.city,
            need.state,
            need.lat,
            need.lng,
            need.radius_miles,
            need.min_sqft,
            need.max_sqft,
            need.use_type,
            need.needed_from.map(|d| d.to_string()),
            need.duration_months,
            need.max_budget_per_sqft,
            need.requirements.to_string(),
            need.status,
            ts(need.created_at),
        ],
    )
    .context("insert buyer need")?;
    Ok(())
}

pub fn set_buyer_need_coords(conn: &Connection, id: &str, lat: f64, lng: f64) -> Result<()> {
    conn.execute(
        "UPDATE buyer_needs SET lat = ?1, lng = ?2 WHERE id = ?3",
        params![lat, lng, id],
    )?;
    Ok(())
}

/// Load all activated listings with a supplier status filter, truth cores
/// and memories attached.
pub fn load_active_listings(
    conn: &Connection,
    statuses: &[SupplierStatus],
) -> Result<Vec<Listing>> {
    let placeholders: Vec<String> = (1..=statuses.len()).map(|i| format!("?{i}")).collect();
    let sql = format!(
        "SELECT w.* FROM warehouses w
         JOIN truth_cores t ON t.warehouse_id = w.id
         WHERE t.activation_status = 'on' AND w.supplier_status IN ({})",
        placeholders.join(", ")
    );
    let mut stmt = conn.prepare(&sql)?;
    let status_strs: Vec<&str> = statuses.iter().map(|s| s.as_str()).collect();
    let warehouses: Vec<Warehouse> = stmt
        .query_map(rusqlite::params_from_iter(status_strs), warehouse_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut listings = Vec::with_capacity(warehouses.len());
    for warehouse in warehouses {
        let core = match get_truth_core(conn, &warehouse.id)? {
            Some(c) => c,
            None => continue,
        };
        let memories = load_memories(conn, &warehouse.id)?;
        listings.push(Listing {
            warehouse,
            core,
            memories,
        });
    }
    Ok(listings)
}

pub fn get_warehouse(conn: &Connection, id: &str) -> Result<Option<Warehouse>> {
    let mut stmt = conn.prepare("SELECT * FROM warehouses WHERE id = ?1")?;
    let mut rows = stmt.query_map(params![id], warehouse_from_row)?;
    match rows.next() {
        Some(row) => Ok(Some(row?)),
        None => Ok(None),
    }
}

pub fn get_truth_core(conn: &Connection, warehouse_id: &str) -> Result<Option<TruthCore>> {
    let mut stmt = conn.prepare("SELECT * FROM truth_cores WHERE warehouse_id = ?1")?;
    let mut rows = stmt.query_map(params![warehouse_id], truth_core_from_row)?;
    match rows.next() {
        Some(row) => Ok(Some(row?)),
        None => Ok(None),
    }
}

pub fn load_memories(conn: &Connection, warehouse_id: &str) -> Result<Vec<ContextualMemory>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM contextual_memories WHERE warehouse_id = ?1 ORDER BY created_at",
    )?;
    let memories = stmt
        .query_map(params![warehouse_id], |row| {
            let metadata: String = row.get("metadata")?;
            Ok(ContextualMemory {
                id: row.get("id")?,
                warehouse_id: row.get("warehouse_id")?,
                memory_type: row.get("memory_type")?,
                content: row.get("content")?,
                source: row.get("source")?,
                confidence: row.get("confidence")?,
                metadata: serde_json::from_str(&metadata).unwrap_or(Value::Null),
                created_at: parse_ts(&row.get::<_, String>("created_at")?).unwrap_or_else(Utc::now),
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(memories)
}

pub fn insert_memory(conn: &Connection, memory: &ContextualMemory) -> Result<()> {
    conn.execute(
        "INSERT INTO contextual_memories
         (id, warehouse_id, memory_type, content, source, confidence, metadata, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            memory.id,
            memory.warehouse_id,
            memory.memory_type,
            memory.content,
            memory.source,
            memory.confidence,
            memory.metadata.to_string(),
            ts(memory.created_at),
        ],
    )
    .context("insert contextual memory")?;
    Ok(())
}

pub fn insert_match(conn: &Connection, m: &Match) -> Result<()> {
    conn.execute(
        "INSERT INTO matches
         (id, buyer_need_id, warehouse_id, match_score, confidence,
          instant_book_eligible, reasoning, scoring_breakdown, status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            m.id,
            m.buyer_need_id,
            m.warehouse_id,
            m.match_score,
            m.confidence,
            m.instant_book_eligible,
            m.reasoning,
            m.scoring_breakdown.to_string(),
            m.status.as_str(),
            ts(m.created_at),
        ],
    )
    .context("insert match")?;
    Ok(())
}

pub fn get_match(conn: &Connection, id: &str) -> Result<Option<Match>> {
    let mut stmt = conn.prepare("SELECT * FROM matches WHERE id = ?1")?;
    let mut rows = stmt.query_map(params![id], |row| {
        let breakdown: String = row.get("scoring_breakdown")?;
        let status: String = row.get("status")?;
        Ok(Match {
            id: row.get("id")?,
            buyer_need_id: row.get("buyer_need_id")?,
            warehouse_id: row.get("warehouse_id")?,
            match_score: row.get("match_score")?,
            confidence: row.get("confidence")?,
            instant_book_eligible: row.get("instant_book_eligible")?,
            reasoning: row.get("reasoning")?,
            scoring_breakdown: serde_json::from_str(&breakdown).unwrap_or(Value::Null),
            status: match status.as_str() {
                "presented" => MatchStatus::Presented,
                "accepted" => MatchStatus::Accepted,
                "declined" => MatchStatus::Declined,
                _ => MatchStatus::Pending,
            },
            created_at: parse_ts(&row.get::<_, String>("created_at")?).unwrap_or_else(Utc::now),
        })
    })?;
    match rows.next() {
        Some(row) => Ok(Some(row?)),
        None => Ok(None),
    }
}

pub fn insert_instant_book_score(conn: &Connection, score: &InstantBookScore) -> Result<()> {
    conn.execute(
        "INSERT INTO instant_book_scores
         (id, match_id, truth_core_completeness, contextual_memory_depth,
          supplier_trust_level, match_specificity, feature_alignment,
          composite_score, instant_book_eligible, threshold_used, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            score.id,
            score.match_id,
            score.truth_core_completeness,
            score.contextual_memory_depth,
            score.supplier_trust_level,
            score.match_specificity,
            score.feature_alignment,
            score.composite_score,
            score.instant_book_eligible,
            score.threshold_used,
            ts(score.created_at),
        ],
    )
    .context("insert instant book score")?;
    Ok(())
}

/// Existing non-terminal DLA token for (warehouse, need) — the outreach
/// dedupe predicate.
pub fn dla_token_pending(conn: &Connection, warehouse_id: &str, buyer_need_id: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM dla_tokens
         WHERE warehouse_id = ?1 AND buyer_need_id = ?2
           AND status IN ('pending', 'interested')",
        params![warehouse_id, buyer_need_id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub fn insert_search_session(conn: &Connection, session: &SearchSession) -> Result<()> {
    conn.execute(
        "INSERT INTO search_sessions
         (id, token, requirements, results, buyer_need_id, status, expires_at, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            session.id,
            session.token,
            session.requirements.to_string(),
            session.results.to_string(),
            session.buyer_need_id,
            session.status,
            ts(session.expires_at),
            ts(session.created_at),
        ],
    )
    .context("insert search session")?;
    Ok(())
}

/// Fast count of in-network activated warehouses matching basic criteria —
/// powers the buyer wizard's live badge.
pub fn quick_match_count(
    conn: &Connection,
    location: &str,
    min_sqft: i64,
    max_sqft: i64,
    use_type: Option<&str>,
) -> Result<(i64, bool)> {
    let mut sql = String::from(
        "SELECT COUNT(w.id) FROM warehouses w
         JOIN truth_cores t ON t.warehouse_id = w.id
         WHERE w.supplier_status = 'in_network' AND t.activation_status = 'on'",
    );
    let mut args: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

    if !location.trim().is_empty() {
        sql.push_str(
            " AND (UPPER(IFNULL(w.city, '')) LIKE ?1 OR UPPER(IFNULL(w.state, '')) LIKE ?1)",
        );
        args.push(Box::new(format!("%{}%", location.trim().to_uppercase())));
    }
    if min_sqft > 0 {
        sql.push_str(&format!(
            " AND (t.max_sqft >= ?{} OR t.max_sqft IS NULL)",
            args.len() + 1
        ));
        args.push(Box::new(min_sqft));
    }
    if max_sqft < 100_000 {
        sql.push_str(&format!(
            " AND (t.min_sqft <= ?{} OR t.min_sqft IS NULL)",
            args.len() + 1
        ));
        args.push(Box::new(max_sqft));
    }
    if let Some(use_type) = use_type {
        sql.push_str(&format!(" AND t.activity_tier = ?{}", args.len() + 1));
        args.push(Box::new(use_type.to_string()));
    }

    let count: i64 = conn.query_row(
        &sql,
        rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())),
        |row| row.get(0),
    )?;
    Ok((count, count > 50))
}
