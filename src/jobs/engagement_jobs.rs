//! The eleven engagement lifecycle jobs.
//!
//! Every job is idempotent: re-running it after a partial failure produces
//! no duplicate events, payments, or notifications. Idempotency is enforced
//! by probing for an existing event of the same type and day, or by the
//! (engagement_id, period_start) uniqueness predicate on payment records.
//! Each job commits per run and returns how much work it did.

use anyhow::{Context, Result};
use chrono::{Datelike, Duration, NaiveDate, Utc};
use rusqlite::{params, Connection};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::db::{ts, Db};
use crate::domain::*;
use crate::engagement::state_machine::{GuardContext, StateMachine};
use crate::engagement::store;

const TERMINAL_STATUSES: &str =
    "'deal_ping_declined', 'deal_ping_expired', 'declined_by_buyer', \
     'declined_by_supplier', 'expired', 'cancelled', 'completed'";

/// Write a system event with no status change.
fn log_event(
    conn: &Connection,
    engagement_id: &str,
    event_type: EngagementEventType,
    data: serde_json::Value,
) -> Result<()> {
    let event = EngagementEvent {
        id: Uuid::new_v4().to_string(),
        engagement_id: engagement_id.to_string(),
        event_type: event_type.as_str().to_string(),
        actor: EngagementActor::System.as_str().to_string(),
        actor_id: Some("system".into()),
        from_status: None,
        to_status: None,
        data: Some(data),
        created_at: Utc::now(),
    };
    store::insert_event(conn, &event)
}

/// Transition an engagement to its expiry state with a system event.
fn expire_engagement(
    conn: &Connection,
    machine: &StateMachine,
    engagement: &mut Engagement,
    reason: &str,
) -> Result<bool> {
    let (target, event_type) = if engagement.status == EngagementStatus::DealPingSent {
        (EngagementStatus::DealPingExpired, EngagementEventType::DealPingExpired)
    } else {
        (EngagementStatus::Expired, EngagementEventType::Expired)
    };

    if machine
        .validate_transition(
            engagement.status,
            target,
            EngagementActor::System,
            engagement,
            GuardContext::default(),
        )
        .is_err()
    {
        return Ok(false);
    }

    let from = engagement.status;
    let now = Utc::now();
    engagement.status = target;
    engagement.updated_at = now;
    store::update_engagement(conn, engagement)?;

    let event = EngagementEvent {
        id: Uuid::new_v4().to_string(),
        engagement_id: engagement.id.clone(),
        event_type: event_type.as_str().to_string(),
        actor: EngagementActor::System.as_str().to_string(),
        actor_id: Some("system".into()),
        from_status: Some(from.as_str().to_string()),
        to_status: Some(target.as_str().to_string()),
        data: Some(json!({"reason": reason})),
        created_at: now,
    };
    store::insert_event(conn, &event)?;
    Ok(true)
}

fn load_by_status(conn: &Connection, status: EngagementStatus) -> Result<Vec<Engagement>> {
    let mut stmt = conn.prepare("SELECT * FROM engagements WHERE status = ?1")?;
    let rows = stmt
        .query_map(params![status.as_str()], store::engagement_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// True when an event of this type with the given data fragment already
/// exists for the engagement, optionally restricted to today.
fn event_exists(
    conn: &Connection,
    engagement_id: &str,
    event_type: EngagementEventType,
    data_fragment: Option<&str>,
    today_only: bool,
) -> Result<bool> {
    let mut sql = String::from(
        "SELECT COUNT(*) FROM engagement_events WHERE engagement_id = ?1 AND event_type = ?2",
    );
    let mut args: Vec<Box<dyn rusqlite::types::ToSql>> = vec![
        Box::new(engagement_id.to_string()),
        Box::new(event_type.as_str().to_string()),
    ];
    if let Some(fragment) = data_fragment {
        sql.push_str(&format!(" AND data LIKE ?{}", args.len() + 1));
        args.push(Box::new(format!("%{fragment}%")));
    }
    if today_only {
        sql.push_str(&format!(
            " AND substr(created_at, 1, 10) = substr(?{}, 1, 10)",
            args.len() + 1
        ));
        args.push(Box::new(ts(Utc::now())));
    }
    let count: i64 = conn.query_row(
        &sql,
        rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())),
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

// ---------------------------------------------------------------------------
// Job 1: deal-ping deadline check (every 15 min)
// ---------------------------------------------------------------------------

pub async fn check_deal_ping_deadlines(db: &Db) -> Result<usize> {
    let machine = StateMachine::new();
    let mut conn = db.lock().await;
    let tx = conn.transaction()?;
    let now = ts(Utc::now());

    let mut stmt = tx.prepare(
        "SELECT * FROM engagements
         WHERE status = 'deal_ping_sent'
           AND deal_ping_expires_at IS NOT NULL
           AND deal_ping_expires_at < ?1",
    )?;
    let expired: Vec<Engagement> = stmt
        .query_map(params![now], store::engagement_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    drop(stmt);

    let mut count = 0;
    for mut engagement in expired {
        if expire_engagement(&tx, &machine, &mut engagement, "Deal ping deadline expired")? {
            count += 1;
            info!(engagement = %engagement.id, "Deal ping expired");
        }
    }

    if count > 0 {
        tx.commit().context("commit deal ping expiry")?;
    }
    Ok(count)
}

// ---------------------------------------------------------------------------
// Job 2: general deadline check (every 15 min)
// ---------------------------------------------------------------------------

/// Status → (timestamp column, max hours, reason)
const DEADLINE_CHECKS: &[(EngagementStatus, &str, i64, &str)] = &[
    (
        EngagementStatus::TourRequested,
        "tour_requested_at",
        12,
        "Tour request expired, supplier didn't confirm within 12 hours",
    ),
    (
        EngagementStatus::TourCompleted,
        "tour_completed_at",
        72,
        "Post-tour decision expired, buyer didn't respond within 72 hours",
    ),
    (
        EngagementStatus::AddressRevealed,
        "updated_at",
        168,
        "Address revealed but no action taken within 7 days",
    ),
];

pub async fn check_deadlines(db: &Db) -> Result<usize> {
    let machine = StateMachine::new();
    let mut conn = db.lock().await;
    let tx = conn.transaction()?;
    let now = Utc::now();

    let mut count = 0;
    for (status, field, hours, reason) in DEADLINE_CHECKS {
        let cutoff = ts(now - Duration::hours(*hours));
        let sql = format!(
            "SELECT * FROM engagements WHERE status = ?1 AND {field} IS NOT NULL AND {field} < ?2"
        );
        let mut stmt = tx.prepare(&sql)?;
        let stale: Vec<Engagement> = stmt
            .query_map(params![status.as_str(), cutoff], store::engagement_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        drop(stmt);

        for mut engagement in stale {
            if expire_engagement(&tx, &machine, &mut engagement, reason)? {
                count += 1;
                info!(engagement = %engagement.id, status = status.as_str(), "Deadline expired");
            }
        }
    }

    if count > 0 {
        tx.commit().context("commit deadline expiry")?;
    }
    Ok(count)
}

// ---------------------------------------------------------------------------
// Job 3: tour reminders (daily 06:00)
// ---------------------------------------------------------------------------

pub async fn send_tour_reminders(db: &Db) -> Result<usize> {
    let mut conn = db.lock().await;
    let tx = conn.transaction()?;
    let tomorrow = Utc::now().date_naive() + Duration::days(1);

    let mut stmt = tx.prepare(
        "SELECT * FROM engagements
         WHERE status IN ('tour_confirmed', 'tour_rescheduled')
           AND tour_scheduled_date IS NOT NULL
           AND substr(tour_scheduled_date, 1, 10) = ?1",
    )?;
    let engagements: Vec<Engagement> = stmt
        .query_map(params![tomorrow.to_string()], store::engagement_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    drop(stmt);

    let mut count = 0;
    for engagement in engagements {
        // One reminder per day
        if event_exists(&tx, &engagement.id, EngagementEventType::ReminderSent, Some("tour_reminder"), true)? {
            continue;
        }
        log_event(
            &tx,
            &engagement.id,
            EngagementEventType::ReminderSent,
            json!({
                "type": "tour_reminder",
                "tour_date": engagement.tour_scheduled_date.map(|d| d.to_rfc3339()),
            }),
        )?;
        count += 1;
        info!(engagement = %engagement.id, "Tour reminder sent");
    }

    if count > 0 {
        tx.commit().context("commit tour reminders")?;
    }
    Ok(count)
}

// ---------------------------------------------------------------------------
// Job 4: post-tour follow-up (hourly)
// ---------------------------------------------------------------------------

pub async fn send_post_tour_followup(db: &Db) -> Result<usize> {
    let mut conn = db.lock().await;
    let tx = conn.transaction()?;
    let cutoff = ts(Utc::now() - Duration::hours(24));

    let mut stmt = tx.prepare(
        "SELECT * FROM engagements
         WHERE status = 'tour_completed'
           AND tour_completed_at IS NOT NULL
           AND tour_completed_at <= ?1",
    )?;
    let engagements: Vec<Engagement> = stmt
        .query_map(params![cutoff], store::engagement_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    drop(stmt);

    let mut count = 0;
    for engagement in engagements {
        if event_exists(&tx, &engagement.id, EngagementEventType::ReminderSent, Some("post_tour_followup"), false)? {
            continue;
        }
        log_event(
            &tx,
            &engagement.id,
            EngagementEventType::ReminderSent,
            json!({"type": "post_tour_followup", "hours_since_tour": 24}),
        )?;
        count += 1;
        info!(engagement = %engagement.id, "Post-tour follow-up sent");
    }

    if count > 0 {
        tx.commit().context("commit post-tour follow-ups")?;
    }
    Ok(count)
}

// ---------------------------------------------------------------------------
// Job 5: Q&A supplier deadline (hourly)
// ---------------------------------------------------------------------------

pub async fn check_qa_supplier_deadline(db: &Db) -> Result<usize> {
    let mut conn = db.lock().await;
    let tx = conn.transaction()?;
    let now = Utc::now();

    struct ExpiredQuestion {
        id: String,
        engagement_id: String,
        timer_paused: bool,
    }

    let mut stmt = tx.prepare(
        "SELECT id, engagement_id,
                (timer_paused_at IS NOT NULL AND timer_resumed_at IS NULL) AS paused
         FROM property_questions
         WHERE status = 'routed_to_supplier'
           AND supplier_deadline_at IS NOT NULL
           AND supplier_deadline_at < ?1",
    )?;
    let questions: Vec<ExpiredQuestion> = stmt
        .query_map(params![ts(now)], |row| {
            Ok(ExpiredQuestion {
                id: row.get(0)?,
                engagement_id: row.get(1)?,
                timer_paused: row.get(2)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    drop(stmt);

    let mut count = 0;
    for q in questions {
        tx.execute(
            "UPDATE property_questions SET status = 'expired',
                    timer_resumed_at = CASE WHEN ?2 THEN ?3 ELSE timer_resumed_at END
             WHERE id = ?1",
            params![q.id, q.timer_paused, ts(now)],
        )?;
        log_event(
            &tx,
            &q.engagement_id,
            EngagementEventType::QuestionAnswered,
            json!({
                "question_id": q.id,
                "expired": true,
                "reason": "Supplier did not answer within 24 hours",
            }),
        )?;
        count += 1;
        info!(question = %q.id, engagement = %q.engagement_id, "Q&A supplier deadline expired");
    }

    if count > 0 {
        tx.commit().context("commit Q&A expiry")?;
    }
    Ok(count)
}

// ---------------------------------------------------------------------------
// Job 6: Q&A → knowledge backfill (periodic)
// ---------------------------------------------------------------------------

pub async fn backfill_property_knowledge(db: &Db) -> Result<usize> {
    let mut conn = db.lock().await;
    let tx = conn.transaction()?;

    struct AnsweredQuestion {
        id: String,
        warehouse_id: String,
        question_text: String,
        final_answer: String,
        source: Option<String>,
    }

    let mut stmt = tx.prepare(
        "SELECT q.id, q.warehouse_id, q.question_text, q.final_answer, q.final_answer_source
         FROM property_questions q
         LEFT JOIN property_knowledge_entries k ON k.source_question_id = q.id
         WHERE q.status = 'answered' AND q.final_answer IS NOT NULL AND k.id IS NULL",
    )?;
    let questions: Vec<AnsweredQuestion> = stmt
        .query_map([], |row| {
            Ok(AnsweredQuestion {
                id: row.get(0)?,
                warehouse_id: row.get(1)?,
                question_text: row.get(2)?,
                final_answer: row.get(3)?,
                source: row.get(4)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    drop(stmt);

    let mut count = 0;
    for q in questions {
        tx.execute(
            "INSERT INTO property_knowledge_entries
             (id, warehouse_id, question, answer, source, source_question_id, confidence, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0.9, ?7)",
            params![
                Uuid::new_v4().to_string(),
                q.warehouse_id,
                q.question_text,
                q.final_answer,
                q.source.unwrap_or_else(|| "unknown".into()),
                q.id,
                ts(Utc::now()),
            ],
        )?;
        count += 1;
    }

    if count > 0 {
        tx.commit().context("commit knowledge backfill")?;
        info!(count, "Knowledge backfill created entries");
    }
    Ok(count)
}

// ---------------------------------------------------------------------------
// Job 7: payment record generation (daily 00:00)
// ---------------------------------------------------------------------------

/// First and last day of the month containing `today`.
pub fn billing_period(today: NaiveDate) -> (NaiveDate, NaiveDate) {
    let period_start = today.with_day(1).expect("day 1 always valid");
    let period_end = if today.month() == 12 {
        NaiveDate::from_ymd_opt(today.year() + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(today.year(), today.month() + 1, 1)
    }
    .expect("first of next month always valid")
        - Duration::days(1);
    (period_start, period_end)
}

pub async fn generate_payment_records(db: &Db) -> Result<usize> {
    let mut conn = db.lock().await;
    let tx = conn.transaction()?;
    let (period_start, period_end) = billing_period(Utc::now().date_naive());

    let active = load_by_status(&tx, EngagementStatus::Active)?;

    let mut count = 0;
    for engagement in active {
        let existing: i64 = tx.query_row(
            "SELECT COUNT(*) FROM payment_records WHERE engagement_id = ?1 AND period_start = ?2",
            params![engagement.id, period_start.to_string()],
            |row| row.get(0),
        )?;
        if existing > 0 {
            continue;
        }

        let buyer_amount = engagement.monthly_buyer_total.unwrap_or(0.0);
        let supplier_amount = engagement.monthly_supplier_payout.unwrap_or(0.0);
        let payment = PaymentRecord {
            id: Uuid::new_v4().to_string(),
            engagement_id: engagement.id.clone(),
            period_start,
            period_end,
            buyer_amount,
            supplier_amount,
            wex_amount: buyer_amount - supplier_amount,
            buyer_status: "upcoming".into(),
            supplier_status: "upcoming".into(),
            created_at: Utc::now(),
        };
        store::insert_payment_record(&tx, &payment)?;

        log_event(
            &tx,
            &engagement.id,
            EngagementEventType::PaymentRecorded,
            json!({
                "payment_id": payment.id,
                "period": format!("{period_start} to {period_end}"),
                "buyer_amount": buyer_amount,
            }),
        )?;
        count += 1;
        info!(engagement = %engagement.id, %period_start, "Payment record created");
    }

    if count > 0 {
        tx.commit().context("commit payment records")?;
    }
    Ok(count)
}

// ---------------------------------------------------------------------------
// Job 8: payment reminders (daily 09:00)
// ---------------------------------------------------------------------------

pub async fn send_payment_reminders(db: &Db) -> Result<usize> {
    let mut conn = db.lock().await;
    let tx = conn.transaction()?;
    let due_cutoff = Utc::now().date_naive() + Duration::days(3);

    struct InvoicedPayment {
        id: String,
        engagement_id: String,
        period_start: String,
    }

    let mut stmt = tx.prepare(
        "SELECT id, engagement_id, period_start FROM payment_records
         WHERE buyer_status = 'invoiced' AND period_start <= ?1",
    )?;
    let payments: Vec<InvoicedPayment> = stmt
        .query_map(params![due_cutoff.to_string()], |row| {
            Ok(InvoicedPayment {
                id: row.get(0)?,
                engagement_id: row.get(1)?,
                period_start: row.get(2)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    drop(stmt);

    let mut count = 0;
    for payment in payments {
        if event_exists(&tx, &payment.engagement_id, EngagementEventType::ReminderSent, Some(&payment.id), true)? {
            continue;
        }
        log_event(
            &tx,
            &payment.engagement_id,
            EngagementEventType::ReminderSent,
            json!({
                "type": "payment_reminder",
                "payment_id": payment.id,
                "period_start": payment.period_start,
            }),
        )?;
        count += 1;
    }

    if count > 0 {
        tx.commit().context("commit payment reminders")?;
        info!(count, "Payment reminders sent");
    }
    Ok(count)
}

// ---------------------------------------------------------------------------
// Job 9: stale-engagement flag (daily 08:00)
// ---------------------------------------------------------------------------

pub async fn flag_stale_engagements(db: &Db) -> Result<usize> {
    let mut conn = db.lock().await;
    let tx = conn.transaction()?;
    let now = Utc::now();
    let cutoff = ts(now - Duration::days(3));

    let sql = format!(
        "SELECT * FROM engagements
         WHERE status NOT IN ({TERMINAL_STATUSES})
           AND status != 'active'
           AND updated_at < ?1
           AND admin_flagged = 0"
    );
    let mut stmt = tx.prepare(&sql)?;
    let engagements: Vec<Engagement> = stmt
        .query_map(params![cutoff], store::engagement_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    drop(stmt);

    let mut count = 0;
    for engagement in engagements {
        tx.execute(
            "UPDATE engagements SET admin_flagged = 1, admin_flag_reason = ?2, updated_at = ?3
             WHERE id = ?1",
            params![
                engagement.id,
                format!("Stale: in {} for >3 days", engagement.status.as_str()),
                ts(now),
            ],
        )?;
        log_event(
            &tx,
            &engagement.id,
            EngagementEventType::AdminNote,
            json!({"flag": "stale", "status": engagement.status.as_str(), "days_stale": 3}),
        )?;
        count += 1;
        info!(engagement = %engagement.id, status = engagement.status.as_str(), "Flagged stale engagement");
    }

    if count > 0 {
        tx.commit().context("commit stale flags")?;
    }
    Ok(count)
}

// ---------------------------------------------------------------------------
// Job 10: auto-activate leases (daily 00:00)
// ---------------------------------------------------------------------------

pub async fn auto_activate_leases(db: &Db) -> Result<usize> {
    let machine = StateMachine::new();
    let mut conn = db.lock().await;
    let tx = conn.transaction()?;
    let today = Utc::now().date_naive();

    let mut stmt = tx.prepare(
        "SELECT * FROM engagements
         WHERE status = 'onboarding'
           AND insurance_uploaded = 1
           AND company_docs_uploaded = 1
           AND payment_method_added = 1
           AND (lease_start_date IS NULL OR lease_start_date <= ?1)",
    )?;
    let ready: Vec<Engagement> = stmt
        .query_map(params![today.to_string()], store::engagement_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    drop(stmt);

    let mut count = 0;
    for mut engagement in ready {
        if machine
            .validate_transition(
                engagement.status,
                EngagementStatus::Active,
                EngagementActor::System,
                &engagement,
                GuardContext::default(),
            )
            .is_err()
        {
            continue;
        }

        let from = engagement.status;
        let now = Utc::now();
        engagement.status = EngagementStatus::Active;
        engagement.onboarding_completed_at = Some(now);
        if engagement.lease_start_date.is_none() {
            engagement.lease_start_date = Some(today);
        }
        engagement.updated_at = now;
        store::update_engagement(&tx, &engagement)?;

        let event = EngagementEvent {
            id: Uuid::new_v4().to_string(),
            engagement_id: engagement.id.clone(),
            event_type: EngagementEventType::LeaseActivated.as_str().to_string(),
            actor: EngagementActor::System.as_str().to_string(),
            actor_id: Some("system".into()),
            from_status: Some(from.as_str().to_string()),
            to_status: Some(EngagementStatus::Active.as_str().to_string()),
            data: Some(json!({"lease_start_date": engagement.lease_start_date.map(|d| d.to_string())})),
            created_at: now,
        };
        store::insert_event(&tx, &event)?;
        count += 1;
        info!(engagement = %engagement.id, "Auto-activated lease");
    }

    if count > 0 {
        tx.commit().context("commit lease activations")?;
    }
    Ok(count)
}

// ---------------------------------------------------------------------------
// Job 11: renewal prompts (daily 09:00)
// ---------------------------------------------------------------------------

pub async fn send_renewal_prompts(db: &Db) -> Result<usize> {
    let mut conn = db.lock().await;
    let tx = conn.transaction()?;
    let today = Utc::now().date_naive();
    let cutoff = today + Duration::days(30);

    let mut stmt = tx.prepare(
        "SELECT * FROM engagements
         WHERE status = 'active'
           AND lease_end_date IS NOT NULL
           AND lease_end_date <= ?1
           AND lease_end_date > ?2",
    )?;
    let ending: Vec<Engagement> = stmt
        .query_map(params![cutoff.to_string(), today.to_string()], store::engagement_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    drop(stmt);

    let mut count = 0;
    for engagement in ending {
        if event_exists(&tx, &engagement.id, EngagementEventType::ReminderSent, Some("renewal_prompt"), false)? {
            continue;
        }
        let days_remaining = engagement
            .lease_end_date
            .map(|end| (end - today).num_days())
            .unwrap_or(0);
        log_event(
            &tx,
            &engagement.id,
            EngagementEventType::ReminderSent,
            json!({
                "type": "renewal_prompt",
                "lease_end_date": engagement.lease_end_date.map(|d| d.to_string()),
                "days_remaining": days_remaining,
            }),
        )?;
        count += 1;
        info!(engagement = %engagement.id, "Renewal prompt sent");
    }

    if count > 0 {
        tx.commit().context("commit renewal prompts")?;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clearing::pricing::monthly_totals;

    async fn seeded_db() -> Db {
        let db = Db::open_in_memory().unwrap();
        {
            let conn = db.lock().await;
            let now = ts(Utc::now());
            conn.execute(
                "INSERT INTO warehouses (id, address, supplier_status, created_at, updated_at)
                 VALUES ('wh-1', '1 Dock Way', 'in_network', ?1, ?1)",
                params![now],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO buyer_needs (id, created_at) VALUES ('bn-1', ?1)",
                params![now],
            )
            .unwrap();
        }
        db
    }

    #[tokio::test]
    async fn test_deal_ping_expiry_is_idempotent() {
        let db = seeded_db().await;
        {
            let conn = db.lock().await;
            let past = ts(Utc::now() - Duration::hours(2));
            let now = ts(Utc::now());
            conn.execute(
                "INSERT INTO engagements
                 (id, warehouse_id, buyer_need_id, supplier_id, status, tier,
                  deal_ping_expires_at, created_at, updated_at)
                 VALUES ('e-1', 'wh-1', 'bn-1', 'sup-1', 'deal_ping_sent', 'tier1', ?1, ?2, ?2)",
                params![past, now],
            )
            .unwrap();
        }

        assert_eq!(check_deal_ping_deadlines(&db).await.unwrap(), 1);
        // Second run finds nothing: the engagement left deal_ping_sent
        assert_eq!(check_deal_ping_deadlines(&db).await.unwrap(), 0);

        let conn = db.lock().await;
        let status: String = conn
            .query_row("SELECT status FROM engagements WHERE id = 'e-1'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(status, "deal_ping_expired");
        let events: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM engagement_events WHERE engagement_id = 'e-1'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(events, 1);
    }

    #[tokio::test]
    async fn test_general_deadline_expiry() {
        let db = seeded_db().await;
        {
            let conn = db.lock().await;
            let old = ts(Utc::now() - Duration::hours(13));
            let now = ts(Utc::now());
            conn.execute(
                "INSERT INTO engagements
                 (id, warehouse_id, buyer_need_id, supplier_id, status, tier,
                  tour_requested_at, created_at, updated_at)
                 VALUES ('e-2', 'wh-1', 'bn-1', 'sup-1', 'tour_requested', 'tier1', ?1, ?2, ?2)",
                params![old, now],
            )
            .unwrap();
        }
        assert_eq!(check_deadlines(&db).await.unwrap(), 1);

        let conn = db.lock().await;
        let status: String = conn
            .query_row("SELECT status FROM engagements WHERE id = 'e-2'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(status, "expired");
    }

    #[tokio::test]
    async fn test_payment_generation_idempotent() {
        let db = seeded_db().await;
        {
            let conn = db.lock().await;
            let now = ts(Utc::now());
            let (buyer_total, supplier_payout) = monthly_totals(10_000, 5.0);
            conn.execute(
                "INSERT INTO engagements
                 (id, warehouse_id, buyer_need_id, supplier_id, status, tier,
                  monthly_buyer_total, monthly_supplier_payout, created_at, updated_at)
                 VALUES ('e-3', 'wh-1', 'bn-1', 'sup-1', 'active', 'tier1', ?1, ?2, ?3, ?3)",
                params![buyer_total, supplier_payout, now],
            )
            .unwrap();
        }

        assert_eq!(generate_payment_records(&db).await.unwrap(), 1);
        // Re-run in the same period: zero new records
        assert_eq!(generate_payment_records(&db).await.unwrap(), 0);

        let conn = db.lock().await;
        let (buyer, supplier, wex): (f64, f64, f64) = conn
            .query_row(
                "SELECT buyer_amount, supplier_amount, wex_amount FROM payment_records
                 WHERE engagement_id = 'e-3'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .unwrap();
        assert_eq!(wex, buyer - supplier);
        assert!(buyer >= 0.0 && supplier >= 0.0);
    }

    #[tokio::test]
    async fn test_auto_activation_requires_all_flags() {
        let db = seeded_db().await;
        {
            let conn = db.lock().await;
            let now = ts(Utc::now());
            conn.execute(
                "INSERT INTO engagements
                 (id, warehouse_id, buyer_need_id, supplier_id, status, tier,
                  insurance_uploaded, company_docs_uploaded, payment_method_added,
                  created_at, updated_at)
                 VALUES ('e-4', 'wh-1', 'bn-1', 'sup-1', 'onboarding', 'tier1', 1, 1, 0, ?1, ?1)",
                params![now],
            )
            .unwrap();
        }
        // Missing payment method — not activated
        assert_eq!(auto_activate_leases(&db).await.unwrap(), 0);

        {
            let conn = db.lock().await;
            conn.execute(
                "UPDATE engagements SET payment_method_added = 1 WHERE id = 'e-4'",
                [],
            )
            .unwrap();
        }
        assert_eq!(auto_activate_leases(&db).await.unwrap(), 1);
        // Idempotent: already active
        assert_eq!(auto_activate_leases(&db).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_stale_flagging_once() {
        let db = seeded_db().await;
        {
            let conn = db.lock().await;
            let old = ts(Utc::now() - Duration::days(4));
            conn.execute(
                "INSERT INTO engagements
                 (id, warehouse_id, buyer_need_id, supplier_id, status, tier, created_at, updated_at)
                 VALUES ('e-5', 'wh-1', 'bn-1', 'sup-1', 'matched', 'tier1', ?1, ?1)",
                params![old],
            )
            .unwrap();
        }
        assert_eq!(flag_stale_engagements(&db).await.unwrap(), 1);
        // Flag set and updated_at bumped — second run is a no-op
        assert_eq!(flag_stale_engagements(&db).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_renewal_prompt_once() {
        let db = seeded_db().await;
        {
            let conn = db.lock().await;
            let now = ts(Utc::now());
            let end = (Utc::now().date_naive() + Duration::days(20)).to_string();
            conn.execute(
                "INSERT INTO engagements
                 (id, warehouse_id, buyer_need_id, supplier_id, status, tier,
                  lease_end_date, created_at, updated_at)
                 VALUES ('e-6', 'wh-1', 'bn-1', 'sup-1', 'active', 'tier1', ?1, ?2, ?2)",
                params![end, now],
            )
            .unwrap();
        }
        assert_eq!(send_renewal_prompts(&db).await.unwrap(), 1);
        assert_eq!(send_renewal_prompts(&db).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_qa_deadline_resumes_timer() {
        let db = seeded_db().await;
        {
            let conn = db.lock().await;
            let now = Utc::now();
            conn.execute(
                "INSERT INTO property_questions
                 (id, engagement_id, warehouse_id, question_text, field_key, status,
                  routed_to_supplier_at, supplier_deadline_at, timer_paused_at, created_at)
                 VALUES ('q-1', 'e-x', 'wh-1', 'zoned for food?', 'zoning', 'routed_to_supplier',
                         ?1, ?2, ?1, ?1)",
                params![ts(now - Duration::hours(30)), ts(now - Duration::hours(6))],
            )
            .unwrap();
        }
        assert_eq!(check_qa_supplier_deadline(&db).await.unwrap(), 1);
        assert_eq!(check_qa_supplier_deadline(&db).await.unwrap(), 0);

        let conn = db.lock().await;
        let (status, resumed): (String, Option<String>) = conn
            .query_row(
                "SELECT status, timer_resumed_at FROM property_questions WHERE id = 'q-1'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(status, "expired");
        assert!(resumed.is_some());
    }

    #[tokio::test]
    async fn test_knowledge_backfill_idempotent() {
        let db = seeded_db().await;
        {
            let conn = db.lock().await;
            let now = ts(Utc::now());
            conn.execute(
                "INSERT INTO property_questions
                 (id, engagement_id, warehouse_id, question_text, status, final_answer,
                  final_answer_source, created_at)
                 VALUES ('q-2', 'e-x', 'wh-1', 'rail served?', 'answered', 'Yes, one siding',
                         'supplier', ?1)",
                params![now],
            )
            .unwrap();
        }
        assert_eq!(backfill_property_knowledge(&db).await.unwrap(), 1);
        assert_eq!(backfill_property_knowledge(&db).await.unwrap(), 0);
    }

    #[test]
    fn test_billing_period_boundaries() {
        let mid = NaiveDate::from_ymd_opt(2026, 2, 14).unwrap();
        let (start, end) = billing_period(mid);
        assert_eq!(start, NaiveDate::from_ymd_opt(2026, 2, 1).unwrap());
        assert_eq!(end, NaiveDate::from_ymd_opt(2026, 2, 28).unwrap());

        let december = NaiveDate::from_ymd_opt(2026, 12, 31).unwrap();
        let (start, end) = billing_period(december);
        assert_eq!(start, NaiveDate::from_ymd_opt(2026, 12, 1).unwrap());
        assert_eq!(end, NaiveDate::from_ymd_opt(2026, 12, 31).unwrap());
    }
}
