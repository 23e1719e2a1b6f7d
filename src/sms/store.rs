//! Conversation state persistence and per-phone serialization.
//!
//! One message is processed at a time for a given phone number; the rest of
//! the pipeline runs concurrently across phones.

use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::db::{opt_ts, parse_opt_ts, parse_ts, ts};
use crate::domain::{ConversationPhase, SmsConversation};

/// Registry of per-phone locks. Lock acquisition order is phone-local, so
/// pipelines for different phones never contend.
#[derive(Clone, Default)]
pub struct PhoneLocks {
    locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl PhoneLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_phone(&self, phone: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock();
        locks
            .entry(phone.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

pub fn load_or_create(conn: &Connection, phone: &str) -> Result<SmsConversation> {
    if let Some(existing) = load(conn, phone)? {
        return Ok(existing);
    }

    let now = Utc::now();
    let state = SmsConversation {
        id: Uuid::new_v4().to_string(),
        phone: phone.to_string(),
        phase: ConversationPhase::Intake,
        turn: 0,
        criteria_snapshot: Value::Object(Default::default()),
        presented_match_ids: Vec::new(),
        focused_match_id: None,
        renter_first_name: None,
        renter_last_name: None,
        buyer_email: None,
        buyer_need_id: None,
        engagement_id: None,
        guarantee_link_token: None,
        search_session_token: None,
        name_status: "unknown".into(),
        name_requested_at_turn: None,
        criteria_readiness: 0.0,
        next_reengagement_at: None,
        created_at: now,
        updated_at: now,
    };
    conn.execute(
        "INSERT INTO sms_conversations (id, phone, phase, turn, criteria_snapshot,
            presented_match_ids, name_status, criteria_readiness, created_at, updated_at)
         VALUES (?1, ?2, ?3, 0, '{}', '[]', 'unknown', 0, ?4, ?4)",
        params![state.id, state.phone, state.phase.as_str(), ts(now)],
    )
    .context("insert sms conversation")?;
    Ok(state)
}

pub fn load(conn: &Connection, phone: &str) -> Result<Option<SmsConversation>> {
    let mut stmt = conn.prepare("SELECT * FROM sms_conversations WHERE phone = ?1")?;
    let mut rows = stmt.query_map(params![phone], |row| {
        let snapshot: String = row.get("criteria_snapshot")?;
        let presented: String = row.get("presented_match_ids")?;
        Ok(SmsConversation {
            id: row.get("id")?,
            phone: row.get("phone")?,
            phase: ConversationPhase::from_str(&row.get::<_, String>("phase")?)
                .unwrap_or(ConversationPhase::Intake),
            turn: row.get("turn")?,
            criteria_snapshot: serde_json::from_str(&snapshot)
                .unwrap_or(Value::Object(Default::default())),
            presented_match_ids: serde_json::from_str(&presented).unwrap_or_default(),
            focused_match_id: row.get("focused_match_id")?,
            renter_first_name: row.get("renter_first_name")?,
            renter_last_name: row.get("renter_last_name")?,
            buyer_email: row.get("buyer_email")?,
            buyer_need_id: row.get("buyer_need_id")?,
            engagement_id: row.get("engagement_id")?,
            guarantee_link_token: row.get("guarantee_link_token")?,
            search_session_token: row.get("search_session_token")?,
            name_status: row.get("name_status")?,
            name_requested_at_turn: row.get("name_requested_at_turn")?,
            criteria_readiness: row.get("criteria_readiness")?,
            next_reengagement_at: parse_opt_ts(row.get("next_reengagement_at")?),
            created_at: parse_ts(&row.get::<_, String>("created_at")?).unwrap_or_else(Utc::now),
            updated_at: parse_ts(&row.get::<_, String>("updated_at")?).unwrap_or_else(Utc::now),
        })
    })?;
    match rows.next() {
        Some(row) => Ok(Some(row?)),
        None => Ok(None),
    }
}

pub fn save(conn: &Connection, state: &SmsConversation) -> Result<()> {
    conn.execute(
        "UPDATE sms_conversations SET
            phase = ?2, turn = ?3, criteria_snapshot = ?4, presented_match_ids = ?5,
            focused_match_id = ?6, renter_first_name = ?7, renter_last_name = ?8,
            buyer_email = ?9, buyer_need_id = ?10, engagement_id = ?11,
            guarantee_link_token = ?12, search_session_token = ?13,
            name_status = ?14, name_requested_at_turn = ?15, criteria_readiness = ?16,
            next_reengagement_at = ?17, updated_at = ?18
         WHERE id = ?1",
        params![
            state.id,
            state.phase.as_str(),
            state.turn,
            state.criteria_snapshot.to_string(),
            serde_json::to_string(&state.presented_match_ids).unwrap_or_else(|_| "[]".into()),
            state.focused_match_id,
            state.renter_first_name,
            state.renter_last_name,
            state.buyer_email,
            state.buyer_need_id,
            state.engagement_id,
            state.guarantee_link_token,
            state.search_session_token,
            state.name_status,
            state.name_requested_at_turn,
            state.criteria_readiness,
            opt_ts(state.next_reengagement_at),
            ts(state.updated_at),
        ],
    )
    .context("update sms conversation")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;

    #[tokio::test]
    async fn test_load_or_create_round_trip() {
        let db = Db::open_in_memory().unwrap();
        let conn = db.lock().await;

        let mut state = load_or_create(&conn, "+12025550001").unwrap();
        assert_eq!(state.phase, ConversationPhase::Intake);
        assert_eq!(state.turn, 0);

        state.phase = ConversationPhase::Presenting;
        state.turn = 3;
        state.presented_match_ids = vec!["m-1".into(), "m-2".into()];
        state.renter_first_name = Some("Jane".into());
        state.criteria_snapshot = serde_json::json!({"location": "Dallas", "sqft": 10000});
        state.updated_at = Utc::now();
        save(&conn, &state).unwrap();

        let reloaded = load(&conn, "+12025550001").unwrap().unwrap();
        assert_eq!(reloaded.phase, ConversationPhase::Presenting);
        assert_eq!(reloaded.turn, 3);
        assert_eq!(reloaded.presented_match_ids, vec!["m-1", "m-2"]);
        assert_eq!(reloaded.renter_first_name.as_deref(), Some("Jane"));
        assert_eq!(reloaded.criteria_snapshot["location"], "Dallas");

        // Same phone returns the same conversation
        let again = load_or_create(&conn, "+12025550001").unwrap();
        assert_eq!(again.id, reloaded.id);
    }

    #[tokio::test]
    async fn test_phone_locks_serialize_per_phone() {
        let locks = PhoneLocks::new();
        let a1 = locks.for_phone("+1111");
        let a2 = locks.for_phone("+1111");
        let b = locks.for_phone("+2222");

        // Same phone shares a lock; different phones do not
        assert!(Arc::ptr_eq(&a1, &a2));
        assert!(!Arc::ptr_eq(&a1, &b));

        let guard = a1.lock().await;
        assert!(a2.try_lock().is_err());
        assert!(b.try_lock().is_ok());
        drop(guard);
    }
}
