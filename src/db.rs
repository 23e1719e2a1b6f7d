//! Shared SQLite handle and schema bootstrap.
//!
//! One connection behind a tokio mutex; every state-machine transition,
//! scheduler job, and orchestrator turn runs inside a single transaction on
//! this connection.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::Connection;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Clone)]
pub struct Db {
    conn: Arc<Mutex<Connection>>,
}

impl Db {
    pub fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).context("open database")?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();
        conn.pragma_update(None, "foreign_keys", "ON").ok();

        init_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory database")?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub async fn lock(&self) -> tokio::sync::MutexGuard<'_, Connection> {
        self.conn.lock().await
    }
}

/// RFC 3339 string for a timestamp column.
pub fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

pub fn opt_ts(dt: Option<DateTime<Utc>>) -> Option<String> {
    dt.map(ts)
}

pub fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

pub fn parse_opt_ts(s: Option<String>) -> Option<DateTime<Utc>> {
    s.as_deref().and_then(parse_ts)
}

pub fn parse_opt_date(s: Option<String>) -> Option<NaiveDate> {
    s.as_deref()
        .and_then(|v| NaiveDate::parse_from_str(v, "%Y-%m-%d").ok())
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS companies (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            company_type TEXT NOT NULL DEFAULT 'individual',
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            email TEXT UNIQUE NOT NULL,
            password_hash TEXT NOT NULL,
            name TEXT NOT NULL,
            phone TEXT,
            role TEXT NOT NULL DEFAULT 'supplier',
            is_active INTEGER NOT NULL DEFAULT 1,
            company_id TEXT REFERENCES companies(id),
            company_role TEXT DEFAULT 'admin',
            created_at TEXT NOT NULL,
            last_login_at TEXT
        );

        CREATE TABLE IF NOT EXISTS buyers (
            id TEXT PRIMARY KEY,
            name TEXT,
            company TEXT,
            email TEXT,
            phone TEXT,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS warehouses (
            id TEXT PRIMARY KEY,
            company_id TEXT REFERENCES companies(id),
            created_by TEXT,
            owner_name TEXT,
            owner_email TEXT,
            owner_phone TEXT,
            address TEXT NOT NULL,
            city TEXT,
            state TEXT,
            zip TEXT,
            lat REAL,
            lng REAL,
            neighborhood TEXT,
            building_size_sqft INTEGER,
            year_built INTEGER,
            construction_type TEXT,
            property_type TEXT,
            primary_image_url TEXT,
            description TEXT,
            supplier_status TEXT NOT NULL DEFAULT 'third_party',
            onboarded_at TEXT,
            last_outreach_at TEXT,
            outreach_count INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_warehouses_supplier_status
            ON warehouses(supplier_status);

        CREATE TABLE IF NOT EXISTS truth_cores (
            id TEXT PRIMARY KEY,
            warehouse_id TEXT UNIQUE NOT NULL REFERENCES warehouses(id),
            min_sqft INTEGER,
            max_sqft INTEGER,
            activity_tier TEXT,
            available_from TEXT,
            available_to TEXT,
            min_term_months INTEGER NOT NULL DEFAULT 1,
            max_term_months INTEGER NOT NULL DEFAULT 12,
            supplier_rate_per_sqft REAL NOT NULL DEFAULT 0,
            buyer_rate_per_sqft REAL,
            activation_status TEXT NOT NULL DEFAULT 'off',
            toggled_at TEXT,
            toggle_reason TEXT,
            tour_readiness TEXT NOT NULL DEFAULT '48_hours',
            dock_doors_receiving INTEGER NOT NULL DEFAULT 0,
            dock_doors_shipping INTEGER NOT NULL DEFAULT 0,
            drive_in_bays INTEGER NOT NULL DEFAULT 0,
            parking_spaces INTEGER NOT NULL DEFAULT 0,
            clear_height_ft REAL,
            has_office_space INTEGER NOT NULL DEFAULT 0,
            has_sprinkler INTEGER NOT NULL DEFAULT 0,
            power_supply TEXT,
            trust_level INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS contextual_memories (
            id TEXT PRIMARY KEY,
            warehouse_id TEXT NOT NULL REFERENCES warehouses(id),
            memory_type TEXT NOT NULL,
            content TEXT NOT NULL,
            source TEXT NOT NULL DEFAULT '',
            confidence REAL NOT NULL DEFAULT 1.0,
            metadata TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_memories_warehouse
            ON contextual_memories(warehouse_id);

        CREATE TABLE IF NOT EXISTS supplier_agreements (
            id TEXT PRIMARY KEY,
            warehouse_id TEXT NOT NULL REFERENCES warehouses(id),
            truth_core_id TEXT NOT NULL,
            agreement_type TEXT NOT NULL DEFAULT 'network_agreement',
            agreement_version TEXT NOT NULL DEFAULT '1.0',
            status TEXT NOT NULL DEFAULT 'draft',
            terms TEXT NOT NULL DEFAULT '{}',
            signed_at TEXT,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS toggle_history (
            id TEXT PRIMARY KEY,
            warehouse_id TEXT NOT NULL REFERENCES warehouses(id),
            previous_status TEXT NOT NULL,
            new_status TEXT NOT NULL,
            reason TEXT,
            in_flight_matches INTEGER NOT NULL DEFAULT 0,
            grace_period_until TEXT,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS buyer_needs (
            id TEXT PRIMARY KEY,
            buyer_id TEXT REFERENCES buyers(id),
            city TEXT,
            state TEXT,
            lat REAL,
            lng REAL,
            radius_miles REAL NOT NULL DEFAULT 25,
            min_sqft INTEGER,
            max_sqft INTEGER,
            use_type TEXT,
            needed_from TEXT,
            duration_months INTEGER,
            max_budget_per_sqft REAL,
            requirements TEXT NOT NULL DEFAULT '{}',
            status TEXT NOT NULL DEFAULT 'active',
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS matches (
            id TEXT PRIMARY KEY,
            buyer_need_id TEXT NOT NULL REFERENCES buyer_needs(id),
            warehouse_id TEXT NOT NULL REFERENCES warehouses(id),
            match_score REAL NOT NULL,
            confidence REAL NOT NULL,
            instant_book_eligible INTEGER NOT NULL DEFAULT 0,
            reasoning TEXT NOT NULL DEFAULT '',
            scoring_breakdown TEXT NOT NULL DEFAULT '{}',
            status TEXT NOT NULL DEFAULT 'pending',
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_matches_buyer_need
            ON matches(buyer_need_id);

        CREATE TABLE IF NOT EXISTS instant_book_scores (
            id TEXT PRIMARY KEY,
            match_id TEXT NOT NULL REFERENCES matches(id),
            truth_core_completeness INTEGER NOT NULL,
            contextual_memory_depth INTEGER NOT NULL,
            supplier_trust_level INTEGER NOT NULL,
            match_specificity INTEGER NOT NULL,
            feature_alignment INTEGER NOT NULL,
            composite_score INTEGER NOT NULL,
            instant_book_eligible INTEGER NOT NULL DEFAULT 0,
            threshold_used INTEGER NOT NULL DEFAULT 75,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS engagements (
            id TEXT PRIMARY KEY,
            warehouse_id TEXT NOT NULL REFERENCES warehouses(id),
            buyer_need_id TEXT NOT NULL REFERENCES buyer_needs(id),
            buyer_id TEXT,
            supplier_id TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'deal_ping_sent',
            tier TEXT NOT NULL,
            path TEXT,
            match_score REAL,
            match_rank INTEGER,
            supplier_rate_sqft REAL,
            buyer_rate_sqft REAL,
            monthly_supplier_payout REAL,
            monthly_buyer_total REAL,
            sqft INTEGER,
            deal_ping_sent_at TEXT,
            deal_ping_expires_at TEXT,
            deal_ping_responded_at TEXT,
            supplier_terms_accepted INTEGER NOT NULL DEFAULT 0,
            buyer_email TEXT,
            buyer_phone TEXT,
            buyer_company_name TEXT,
            account_created_at TEXT,
            guarantee_signed_at TEXT,
            guarantee_ip_address TEXT,
            tour_requested_at TEXT,
            tour_requested_date TEXT,
            tour_requested_time TEXT,
            tour_confirmed_at TEXT,
            tour_scheduled_date TEXT,
            tour_completed_at TEXT,
            tour_reschedule_count INTEGER NOT NULL DEFAULT 0,
            tour_rescheduled_by TEXT,
            instant_book_requested_at TEXT,
            instant_book_confirmed_at TEXT,
            agreement_sent_at TEXT,
            agreement_signed_at TEXT,
            onboarding_started_at TEXT,
            onboarding_completed_at TEXT,
            insurance_uploaded INTEGER NOT NULL DEFAULT 0,
            company_docs_uploaded INTEGER NOT NULL DEFAULT 0,
            payment_method_added INTEGER NOT NULL DEFAULT 0,
            term_months INTEGER,
            lease_start_date TEXT,
            lease_end_date TEXT,
            declined_by TEXT,
            decline_reason TEXT,
            declined_at TEXT,
            cancelled_by TEXT,
            cancel_reason TEXT,
            cancelled_at TEXT,
            admin_flagged INTEGER NOT NULL DEFAULT 0,
            admin_flag_reason TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_engagements_status ON engagements(status);

        CREATE TABLE IF NOT EXISTS engagement_events (
            id TEXT PRIMARY KEY,
            engagement_id TEXT NOT NULL REFERENCES engagements(id),
            event_type TEXT NOT NULL,
            actor TEXT NOT NULL,
            actor_id TEXT,
            from_status TEXT,
            to_status TEXT,
            data TEXT,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_events_engagement
            ON engagement_events(engagement_id, created_at);

        CREATE TABLE IF NOT EXISTS engagement_agreements (
            id TEXT PRIMARY KEY,
            engagement_id TEXT NOT NULL REFERENCES engagements(id),
            version INTEGER NOT NULL DEFAULT 1,
            status TEXT NOT NULL DEFAULT 'pending',
            terms_text TEXT NOT NULL,
            buyer_rate_sqft REAL,
            supplier_rate_sqft REAL,
            monthly_buyer_total REAL,
            monthly_supplier_payout REAL,
            sent_at TEXT NOT NULL,
            buyer_signed_at TEXT,
            supplier_signed_at TEXT,
            expires_at TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS payment_records (
            id TEXT PRIMARY KEY,
            engagement_id TEXT NOT NULL REFERENCES engagements(id),
            period_start TEXT NOT NULL,
            period_end TEXT NOT NULL,
            buyer_amount REAL NOT NULL,
            supplier_amount REAL NOT NULL,
            wex_amount REAL NOT NULL,
            buyer_status TEXT NOT NULL DEFAULT 'upcoming',
            supplier_status TEXT NOT NULL DEFAULT 'upcoming',
            created_at TEXT NOT NULL,
            UNIQUE(engagement_id, period_start)
        );

        CREATE TABLE IF NOT EXISTS property_questions (
            id TEXT PRIMARY KEY,
            engagement_id TEXT NOT NULL,
            warehouse_id TEXT NOT NULL REFERENCES warehouses(id),
            question_text TEXT NOT NULL,
            field_key TEXT,
            status TEXT NOT NULL DEFAULT 'submitted',
            supplier_answer TEXT,
            final_answer TEXT,
            final_answer_source TEXT,
            routed_to_supplier_at TEXT,
            supplier_deadline_at TEXT,
            timer_paused_at TEXT,
            timer_resumed_at TEXT,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS property_knowledge_entries (
            id TEXT PRIMARY KEY,
            warehouse_id TEXT NOT NULL REFERENCES warehouses(id),
            question TEXT NOT NULL,
            answer TEXT NOT NULL,
            source TEXT NOT NULL,
            source_question_id TEXT,
            confidence REAL NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS sms_conversations (
            id TEXT PRIMARY KEY,
            phone TEXT UNIQUE NOT NULL,
            phase TEXT NOT NULL DEFAULT 'INTAKE',
            turn INTEGER NOT NULL DEFAULT 0,
            criteria_snapshot TEXT NOT NULL DEFAULT '{}',
            presented_match_ids TEXT NOT NULL DEFAULT '[]',
            focused_match_id TEXT,
            renter_first_name TEXT,
            renter_last_name TEXT,
            buyer_email TEXT,
            buyer_need_id TEXT,
            engagement_id TEXT,
            guarantee_link_token TEXT,
            search_session_token TEXT,
            name_status TEXT NOT NULL DEFAULT 'unknown',
            name_requested_at_turn INTEGER,
            criteria_readiness REAL NOT NULL DEFAULT 0,
            next_reengagement_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS sms_messages (
            id TEXT PRIMARY KEY,
            phone TEXT NOT NULL,
            role TEXT NOT NULL,
            content TEXT NOT NULL,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_sms_messages_phone
            ON sms_messages(phone, created_at);

        CREATE TABLE IF NOT EXISTS dla_tokens (
            id TEXT PRIMARY KEY,
            token TEXT UNIQUE NOT NULL,
            warehouse_id TEXT NOT NULL REFERENCES warehouses(id),
            buyer_need_id TEXT NOT NULL REFERENCES buyer_needs(id),
            suggested_rate REAL,
            supplier_rate REAL,
            rate_accepted INTEGER,
            status TEXT NOT NULL DEFAULT 'pending',
            expires_at TEXT NOT NULL,
            responded_at TEXT,
            outreach_channel TEXT NOT NULL DEFAULT 'sms',
            agreement_ref TEXT,
            decline_reason TEXT,
            last_step_reached TEXT,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_dla_tokens_token ON dla_tokens(token);

        CREATE TABLE IF NOT EXISTS market_rate_cache (
            zipcode TEXT PRIMARY KEY,
            nnn_low REAL NOT NULL,
            nnn_high REAL NOT NULL,
            source_context TEXT NOT NULL DEFAULT '',
            fetched_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS search_sessions (
            id TEXT PRIMARY KEY,
            token TEXT UNIQUE NOT NULL,
            requirements TEXT NOT NULL,
            results TEXT NOT NULL DEFAULT '{}',
            buyer_need_id TEXT,
            status TEXT NOT NULL DEFAULT 'active',
            expires_at TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS upload_tokens (
            token TEXT PRIMARY KEY,
            warehouse_id TEXT NOT NULL REFERENCES warehouses(id),
            expires_at TEXT NOT NULL,
            is_used INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        );
        ",
    )
    .context("initialize schema")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_initializes_twice() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        // Idempotent re-run
        init_schema(&conn).unwrap();

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert!(count >= 20);
    }

    #[test]
    fn test_ts_round_trip() {
        let now = Utc::now();
        let parsed = parse_ts(&ts(now)).unwrap();
        assert_eq!(parsed.timestamp(), now.timestamp());
    }

    #[test]
    fn test_payment_period_unique() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn.execute(
            "INSERT INTO buyer_needs (id, created_at) VALUES ('bn', '2026-01-01T00:00:00Z')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO warehouses (id, address, created_at, updated_at)
             VALUES ('wh', '1 Test St', '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO engagements (id, warehouse_id, buyer_need_id, supplier_id, tier, created_at, updated_at)
             VALUES ('e1', 'wh', 'bn', 'sup', 'tier1', '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
            [],
        )
        .unwrap();

        let insert = "INSERT INTO payment_records
             (id, engagement_id, period_start, period_end, buyer_amount, supplier_amount, wex_amount, created_at)
             VALUES (?1, 'e1', '2026-02-01', '2026-02-28', 100.0, 80.0, 20.0, '2026-02-01T00:00:00Z')";
        conn.execute(insert, ["p1"]).unwrap();
        // Second record for the same period must violate the uniqueness predicate
        assert!(conn.execute(insert, ["p2"]).is_err());
    }
}
