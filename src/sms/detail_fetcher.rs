//! Property detail lookup for facility questions.
//!
//! Resolves field keys against the truth core, the warehouse record, and
//! the per-warehouse knowledge base, formatting each value for SMS. Fields
//! with no answer escalate to the supplier as a PropertyQuestion with a
//! 24-hour deadline.

use anyhow::Result;
use chrono::{Duration, Utc};
use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::clearing::store;
use crate::db::ts;
use crate::domain::{PropertyQuestion, QuestionStatus, TruthCore, Warehouse};
use crate::sms::contracts::{DetailFetchResult, FetchStatus};

/// Supplier answer window for escalated questions.
pub const SUPPLIER_ANSWER_HOURS: i64 = 24;

/// Human label for a field key, for prompts and escalation text.
pub fn field_label(field_key: &str) -> &'static str {
    match field_key {
        "clear_height_ft" => "Clear height",
        "dock_doors_receiving" => "Receiving docks",
        "dock_doors_shipping" => "Shipping docks",
        "power_supply" => "Power",
        "has_office" => "Office space",
        "has_sprinkler" => "Sprinkler system",
        "parking_spaces" => "Parking spaces",
        "building_size_sqft" => "Building size",
        "year_built" => "Year built",
        "construction_type" => "Construction",
        "zoning" => "Zoning",
        "supplier_rate_per_sqft" => "Rate",
        "available_sqft" => "Available space",
        "available_from" => "Available from",
        "activity_tier" => "Activity level",
        _ => "Detail",
    }
}

fn yes_no(v: bool) -> &'static str {
    if v {
        "Yes"
    } else {
        "No"
    }
}

/// Format one field from the listing data. `None` means the value is not
/// on file and the question should escalate.
fn format_field(field_key: &str, warehouse: &Warehouse, core: &TruthCore) -> Option<String> {
    match field_key {
        "clear_height_ft" => core.clear_height_ft.map(|v| format!("{v} ft clear")),
        "dock_doors_receiving" => {
            (core.dock_doors_receiving > 0).then(|| format!("{} receiving docks", core.dock_doors_receiving))
        }
        "dock_doors_shipping" => {
            (core.dock_doors_shipping > 0).then(|| format!("{} shipping docks", core.dock_doors_shipping))
        }
        "power_supply" => core.power_supply.clone(),
        "has_office" => Some(yes_no(core.has_office_space).to_string()),
        "has_sprinkler" => Some(yes_no(core.has_sprinkler).to_string()),
        "parking_spaces" => (core.parking_spaces > 0).then(|| format!("{} parking spaces", core.parking_spaces)),
        "building_size_sqft" => warehouse.building_size_sqft.map(|v| format!("{v} sqft")),
        "year_built" => warehouse.year_built.map(|v| v.to_string()),
        "construction_type" => warehouse.construction_type.clone(),
        "zoning" => None, // Zoning is never on file — always escalates
        "supplier_rate_per_sqft" => None, // Internal rate; buyer pricing comes from summaries
        "available_sqft" => core.max_sqft.map(|v| format!("{v} sqft available")),
        "available_from" => Some(
            core.available_from
                .map(|d| d.format("%B %Y").to_string())
                .unwrap_or_else(|| "Now".to_string()),
        ),
        "activity_tier" => core.activity_tier.as_ref().map(|t| t.replace('_', " ")),
        _ => None,
    }
}

pub struct DetailFetcher;

impl DetailFetcher {
    /// Fetch field values, consulting the knowledge base for anything the
    /// listing itself does not answer.
    pub fn fetch_fields(
        conn: &Connection,
        warehouse_id: &str,
        field_keys: &[String],
    ) -> Result<Vec<DetailFetchResult>> {
        let warehouse = store::get_warehouse(conn, warehouse_id)?;
        let core = store::get_truth_core(conn, warehouse_id)?;

        let mut results = Vec::with_capacity(field_keys.len());
        for key in field_keys {
            let from_listing = match (&warehouse, &core) {
                (Some(w), Some(c)) => format_field(key, w, c),
                _ => None,
            };

            if let Some(formatted) = from_listing {
                results.push(DetailFetchResult {
                    field_key: key.clone(),
                    status: FetchStatus::Found,
                    formatted: Some(formatted),
                });
                continue;
            }

            if let Some(answer) = knowledge_answer(conn, warehouse_id, key)? {
                results.push(DetailFetchResult {
                    field_key: key.clone(),
                    status: FetchStatus::CacheHit,
                    formatted: Some(answer),
                });
                continue;
            }

            results.push(DetailFetchResult {
                field_key: key.clone(),
                status: FetchStatus::Missing,
                formatted: None,
            });
        }
        Ok(results)
    }

    /// Route an unanswered question to the supplier. Dedupes on an open
    /// question for the same field.
    pub fn escalate(
        conn: &Connection,
        engagement_id: &str,
        warehouse_id: &str,
        question_text: &str,
        field_key: &str,
    ) -> Result<Option<PropertyQuestion>> {
        let open: i64 = conn.query_row(
            "SELECT COUNT(*) FROM property_questions
             WHERE warehouse_id = ?1 AND IFNULL(field_key, '') = ?2
               AND status IN ('submitted', 'routed_to_supplier')",
            params![warehouse_id, field_key],
            |row| row.get(0),
        )?;
        if open > 0 {
            return Ok(None);
        }

        let now = Utc::now();
        let question = PropertyQuestion {
            id: Uuid::new_v4().to_string(),
            engagement_id: engagement_id.to_string(),
            warehouse_id: warehouse_id.to_string(),
            question_text: question_text.to_string(),
            field_key: Some(field_key.to_string()),
            status: QuestionStatus::RoutedToSupplier,
            supplier_answer: None,
            final_answer: None,
            final_answer_source: None,
            routed_to_supplier_at: Some(now),
            supplier_deadline_at: Some(now + Duration::hours(SUPPLIER_ANSWER_HOURS)),
            timer_paused_at: Some(now),
            timer_resumed_at: None,
            created_at: now,
        };

        conn.execute(
            "INSERT INTO property_questions
             (id, engagement_id, warehouse_id, question_text, field_key, status,
              routed_to_supplier_at, supplier_deadline_at, timer_paused_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                question.id,
                question.engagement_id,
                question.warehouse_id,
                question.question_text,
                question.field_key,
                question.status.as_str(),
                question.routed_to_supplier_at.map(ts),
                question.supplier_deadline_at.map(ts),
                question.timer_paused_at.map(ts),
                ts(question.created_at),
            ],
        )?;

        Ok(Some(question))
    }
}

fn knowledge_answer(conn: &Connection, warehouse_id: &str, field_key: &str) -> Result<Option<String>> {
    let label = field_label(field_key);
    let answer = conn
        .query_row(
            "SELECT answer FROM property_knowledge_entries
             WHERE warehouse_id = ?1 AND question LIKE ?2
             ORDER BY created_at DESC LIMIT 1",
            params![warehouse_id, format!("%{label}%")],
            |row| row.get::<_, String>(0),
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            e => Err(e),
        })?;
    Ok(answer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;

    async fn seeded() -> Db {
        let db = Db::open_in_memory().unwrap();
        {
            let conn = db.lock().await;
            let now = ts(Utc::now());
            conn.execute(
                "INSERT INTO warehouses (id, address, city, building_size_sqft, year_built, created_at, updated_at)
                 VALUES ('wh-1', '1 Dock Way', 'Dallas', 30000, 1995, ?1, ?1)",
                params![now],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO truth_cores (id, warehouse_id, min_sqft, max_sqft, clear_height_ft,
                                          dock_doors_receiving, has_office_space, supplier_rate_per_sqft,
                                          activation_status, created_at, updated_at)
                 VALUES ('tc-1', 'wh-1', 5000, 20000, 24.0, 4, 1, 5.0, 'on', ?1, ?1)",
                params![now],
            )
            .unwrap();
        }
        db
    }

    #[tokio::test]
    async fn test_fetch_answers_from_truth_core() {
        let db = seeded().await;
        let conn = db.lock().await;
        let results = DetailFetcher::fetch_fields(
            &conn,
            "wh-1",
            &["clear_height_ft".into(), "dock_doors_receiving".into(), "has_office".into()],
        )
        .unwrap();

        assert!(results.iter().all(|r| r.answered()));
        assert_eq!(results[0].formatted.as_deref(), Some("24 ft clear"));
        assert_eq!(results[1].formatted.as_deref(), Some("4 receiving docks"));
        assert_eq!(results[2].formatted.as_deref(), Some("Yes"));
    }

    #[tokio::test]
    async fn test_missing_field_needs_escalation() {
        let db = seeded().await;
        let conn = db.lock().await;
        let results =
            DetailFetcher::fetch_fields(&conn, "wh-1", &["zoning".into()]).unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].needs_escalation());
    }

    #[tokio::test]
    async fn test_knowledge_base_answers_unlisted_fields() {
        let db = seeded().await;
        let conn = db.lock().await;
        conn.execute(
            "INSERT INTO property_knowledge_entries
             (id, warehouse_id, question, answer, source, confidence, created_at)
             VALUES ('k-1', 'wh-1', 'What is the Zoning here?', 'M-1 light industrial', 'supplier', 0.9, ?1)",
            params![ts(Utc::now())],
        )
        .unwrap();

        let results =
            DetailFetcher::fetch_fields(&conn, "wh-1", &["zoning".into()]).unwrap();
        assert_eq!(results[0].status, FetchStatus::CacheHit);
        assert_eq!(results[0].formatted.as_deref(), Some("M-1 light industrial"));
    }

    #[tokio::test]
    async fn test_escalation_creates_question_once() {
        let db = seeded().await;
        let conn = db.lock().await;

        let q = DetailFetcher::escalate(&conn, "e-1", "wh-1", "is it zoned for food?", "zoning")
            .unwrap()
            .unwrap();
        assert_eq!(q.status, QuestionStatus::RoutedToSupplier);
        assert!(q.supplier_deadline_at.is_some());

        // Second escalation for the same open field dedupes
        let again = DetailFetcher::escalate(&conn, "e-1", "wh-1", "zoning again?", "zoning").unwrap();
        assert!(again.is_none());
    }
}
