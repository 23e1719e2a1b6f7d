//! SQL access for engagements, events, agreements, and payment records.
//!
//! Like the clearing store, functions take `&Connection` so the transition
//! service can keep a transition and all of its side effects inside one
//! transaction.

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, Row};
use serde_json::Value;

use crate::db::{opt_ts, parse_opt_date, parse_opt_ts, parse_ts, ts};
use crate::domain::*;

pub fn engagement_from_row(row: &Row) -> rusqlite::Result<Engagement> {
    Ok(Engagement {
        id: row.get("id")?,
        warehouse_id: row.get("warehouse_id")?,
        buyer_need_id: row.get("buyer_need_id")?,
        buyer_id: row.get("buyer_id")?,
        supplier_id: row.get("supplier_id")?,
        status: EngagementStatus::from_str(&row.get::<_, String>("status")?)
            .unwrap_or(EngagementStatus::DealPingSent),
        tier: EngagementTier::from_str(&row.get::<_, String>("tier")?)
            .unwrap_or(EngagementTier::Tier1),
        path: row
            .get::<_, Option<String>>("path")?
            .as_deref()
            .and_then(EngagementPath::from_str),
        match_score: row.get("match_score")?,
        match_rank: row.get("match_rank")?,
        supplier_rate_sqft: row.get("supplier_rate_sqft")?,
        buyer_rate_sqft: row.get("buyer_rate_sqft")?,
        monthly_supplier_payout: row.get("monthly_supplier_payout")?,
        monthly_buyer_total: row.get("monthly_buyer_total")?,
        sqft: row.get("sqft")?,
        deal_ping_sent_at: parse_opt_ts(row.get("deal_ping_sent_at")?),
        deal_ping_expires_at: parse_opt_ts(row.get("deal_ping_expires_at")?),
        deal_ping_responded_at: parse_opt_ts(row.get("deal_ping_responded_at")?),
        supplier_terms_accepted: row.get("supplier_terms_accepted")?,
        buyer_email: row.get("buyer_email")?,
        buyer_phone: row.get("buyer_phone")?,
        buyer_company_name: row.get("buyer_company_name")?,
        account_created_at: parse_opt_ts(row.get("account_created_at")?),
        guarantee_signed_at: parse_opt_ts(row.get("guarantee_signed_at")?),
        guarantee_ip_address: row.get("guarantee_ip_address")?,
        tour_requested_at: parse_opt_ts(row.get("tour_requested_at")?),
        tour_requested_date: parse_opt_date(row.get("tour_requested_date")?),
        tour_requested_time: row.get("tour_requested_time")?,
        tour_confirmed_at: parse_opt_ts(row.get("tour_confirmed_at")?),
        tour_scheduled_date: parse_opt_ts(row.get("tour_scheduled_date")?),
        tour_completed_at: parse_opt_ts(row.get("tour_completed_at")?),
        tour_reschedule_count: row.get("tour_reschedule_count")?,
        tour_rescheduled_by: row.get("tour_rescheduled_by")?,
        instant_book_requested_at: parse_opt_ts(row.get("instant_book_requested_at")?),
        instant_book_confirmed_at: parse_opt_ts(row.get("instant_book_confirmed_at")?),
        agreement_sent_at: parse_opt_ts(row.get("agreement_sent_at")?),
        agreement_signed_at: parse_opt_ts(row.get("agreement_signed_at")?),
        onboarding_started_at: parse_opt_ts(row.get("onboarding_started_at")?),
        onboarding_completed_at: parse_opt_ts(row.get("onboarding_completed_at")?),
        insurance_uploaded: row.get("insurance_uploaded")?,
        company_docs_uploaded: row.get("company_docs_uploaded")?,
        payment_method_added: row.get("payment_method_added")?,
        term_months: row.get("term_months")?,
        lease_start_date: parse_opt_date(row.get("lease_start_date")?),
        lease_end_date: parse_opt_date(row.get("lease_end_date")?),
        declined_by: row.get("declined_by")?,
        decline_reason: row.get("decline_reason")?,
        declined_at: parse_opt_ts(row.get("declined_at")?),
        cancelled_by: row.get("cancelled_by")?,
        cancel_reason: row.get("cancel_reason")?,
        cancelled_at: parse_opt_ts(row.get("cancelled_at")?),
        admin_flagged: row.get("admin_flagged")?,
        admin_flag_reason: row.get("admin_flag_reason")?,
        created_at: parse_ts(&row.get::<_, String>("created_at")?).unwrap_or_else(Utc::now),
        updated_at: parse_ts(&row.get::<_, String>("updated_at")?).unwrap_or_else(Utc::now),
    })
}

pub fn get_engagement(conn: &Connection, id: &str) -> Result<Option<Engagement>> {
    let mut stmt = conn.prepare("SELECT * FROM engagements WHERE id = ?1")?;
    let mut rows = stmt.query_map(params![id], engagement_from_row)?;
    match rows.next() {
        Some(row) => Ok(Some(row?)),
        None => Ok(None),
    }
}

pub fn insert_engagement(conn: &Connection, e: &Engagement) -> Result<()> {
    conn.execute(
        "INSERT INTO engagements
         (id, warehouse_id, buyer_need_id, buyer_id, supplier_id, status, tier, path,
          match_score, match_rank, supplier_rate_sqft, buyer_rate_sqft,
          monthly_supplier_payout, monthly_buyer_total, sqft,
          deal_ping_sent_at, deal_ping_expires_at,
          buyer_email, buyer_phone, buyer_company_name,
          term_months, lease_start_date, lease_end_date,
          created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                 ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25)",
        params![
            e.id,
            e.warehouse_id,
            e.buyer_need_id,
            e.buyer_id,
            e.supplier_id,
            e.status.as_str(),
            e.tier.as_str(),
            e.path.map(|p| p.as_str()),
            e.match_score,
            e.match_rank,
            e.supplier_rate_sqft,
            e.buyer_rate_sqft,
            e.monthly_supplier_payout,
            e.monthly_buyer_total,
            e.sqft,
            opt_ts(e.deal_ping_sent_at),
            opt_ts(e.deal_ping_expires_at),
            e.buyer_email,
            e.buyer_phone,
            e.buyer_company_name,
            e.term_months,
            e.lease_start_date.map(|d| d.to_string()),
            e.lease_end_date.map(|d| d.to_string()),
            ts(e.created_at),
            ts(e.updated_at),
        ],
    )
    .context("insert engagement")?;
    Ok(())
}

/// Write back every mutable column. Called exactly once per transition,
/// inside the transition's transaction.
pub fn update_engagement(conn: &Connection, e: &Engagement) -> Result<()> {
    let affected = conn
        .execute(
            "UPDATE engagements SET
                buyer_id = ?2, status = ?3, path = ?4,
                supplier_rate_sqft = ?5, buyer_rate_sqft = ?6,
                monthly_supplier_payout = ?7, monthly_buyer_total = ?8, sqft = ?9,
                deal_ping_sent_at = ?10, deal_ping_expires_at = ?11, deal_ping_responded_at = ?12,
                supplier_terms_accepted = ?13,
                buyer_email = ?14, buyer_phone = ?15, buyer_company_name = ?16,
                account_created_at = ?17,
                guarantee_signed_at = ?18, guarantee_ip_address = ?19,
                tour_requested_at = ?20, tour_requested_date = ?21, tour_requested_time = ?22,
                tour_confirmed_at = ?23, tour_scheduled_date = ?24, tour_completed_at = ?25,
                tour_reschedule_count = ?26, tour_rescheduled_by = ?27,
                instant_book_requested_at = ?28, instant_book_confirmed_at = ?29,
                agreement_sent_at = ?30, agreement_signed_at = ?31,
                onboarding_started_at = ?32, onboarding_completed_at = ?33,
                insurance_uploaded = ?34, company_docs_uploaded = ?35, payment_method_added = ?36,
                term_months = ?37, lease_start_date = ?38, lease_end_date = ?39,
                declined_by = ?40, decline_reason = ?41, declined_at = ?42,
                cancelled_by = ?43, cancel_reason = ?44, cancelled_at = ?45,
                admin_flagged = ?46, admin_flag_reason = ?47,
                updated_at = ?48
             WHERE id = ?1",
            params![
                e.id,
                e.buyer_id,
                e.status.as_str(),
                e.path.map(|p| p.as_str()),
                e.supplier_rate_sqft,
                e.buyer_rate_sqft,
                e.monthly_supplier_payout,
                e.monthly_buyer_total,
                e.sqft,
                opt_ts(e.deal_ping_sent_at),
                opt_ts(e.deal_ping_expires_at),
                opt_ts(e.deal_ping_responded_at),
                e.supplier_terms_accepted,
                e.buyer_email,
                e.buyer_phone,
                e.buyer_company_name,
                opt_ts(e.account_created_at),
                opt_ts(e.guarantee_signed_at),
                e.guarantee_ip_address,
                opt_ts(e.tour_requested_at),
                e.tour_requested_date.map(|d| d.to_string()),
                e.tour_requested_time,
                opt_ts(e.tour_confirmed_at),
                opt_ts(e.tour_scheduled_date),
                opt_ts(e.tour_completed_at),
                e.tour_reschedule_count,
                e.tour_rescheduled_by,
                opt_ts(e.instant_book_requested_at),
                opt_ts(e.instant_book_confirmed_at),
                opt_ts(e.agreement_sent_at),
                opt_ts(e.agreement_signed_at),
                opt_ts(e.onboarding_started_at),
                opt_ts(e.onboarding_completed_at),
                e.insurance_uploaded,
                e.company_docs_uploaded,
                e.payment_method_added,
                e.term_months,
                e.lease_start_date.map(|d| d.to_string()),
                e.lease_end_date.map(|d| d.to_string()),
                e.declined_by,
                e.decline_reason,
                opt_ts(e.declined_at),
                e.cancelled_by,
                e.cancel_reason,
                opt_ts(e.cancelled_at),
                e.admin_flagged,
                e.admin_flag_reason,
                ts(e.updated_at),
            ],
        )
        .context("update engagement")?;
    if affected == 0 {
        anyhow::bail!("engagement {} vanished during update", e.id);
    }
    Ok(())
}

pub fn list_engagements(
    conn: &Connection,
    status: Option<&str>,
    supplier_id: Option<&str>,
    buyer_id: Option<&str>,
    limit: usize,
    offset: usize,
) -> Result<Vec<Engagement>> {
    let mut sql = String::from("SELECT * FROM engagements WHERE 1=1");
    let mut args: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

    if let Some(status) = status {
        sql.push_str(&format!(" AND status = ?{}", args.len() + 1));
        args.push(Box::new(status.to_string()));
    }
    if let Some(supplier_id) = supplier_id {
        sql.push_str(&format!(" AND supplier_id = ?{}", args.len() + 1));
        args.push(Box::new(supplier_id.to_string()));
    }
    if let Some(buyer_id) = buyer_id {
        sql.push_str(&format!(" AND buyer_id = ?{}", args.len() + 1));
        args.push(Box::new(buyer_id.to_string()));
    }
    sql.push_str(&format!(
        " ORDER BY created_at DESC LIMIT {limit} OFFSET {offset}"
    ));

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(
            rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())),
            engagement_from_row,
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn insert_event(conn: &Connection, event: &EngagementEvent) -> Result<()> {
    conn.execute(
        "INSERT INTO engagement_events
         (id, engagement_id, event_type, actor, actor_id, from_status, to_status, data, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            event.id,
            event.engagement_id,
            event.event_type,
            event.actor,
            event.actor_id,
            event.from_status,
            event.to_status,
            event.data.as_ref().map(|d| d.to_string()),
            ts(event.created_at),
        ],
    )
    .context("insert engagement event")?;
    Ok(())
}

pub fn list_events(conn: &Connection, engagement_id: &str) -> Result<Vec<EngagementEvent>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM engagement_events WHERE engagement_id = ?1 ORDER BY created_at ASC, id ASC",
    )?;
    let rows = stmt
        .query_map(params![engagement_id], |row| {
            let data: Option<String> = row.get("data")?;
            Ok(EngagementEvent {
                id: row.get("id")?,
                engagement_id: row.get("engagement_id")?,
                event_type: row.get("event_type")?,
                actor: row.get("actor")?,
                actor_id: row.get("actor_id")?,
                from_status: row.get("from_status")?,
                to_status: row.get("to_status")?,
                data: data.and_then(|d| serde_json::from_str(&d).ok()),
                created_at: parse_ts(&row.get::<_, String>("created_at")?).unwrap_or_else(Utc::now),
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

fn agreement_from_row(row: &Row) -> rusqlite::Result<EngagementAgreement> {
    Ok(EngagementAgreement {
        id: row.get("id")?,
        engagement_id: row.get("engagement_id")?,
        version: row.get("version")?,
        status: row.get("status")?,
        terms_text: row.get("terms_text")?,
        buyer_rate_sqft: row.get("buyer_rate_sqft")?,
        supplier_rate_sqft: row.get("supplier_rate_sqft")?,
        monthly_buyer_total: row.get("monthly_buyer_total")?,
        monthly_supplier_payout: row.get("monthly_supplier_payout")?,
        sent_at: parse_ts(&row.get::<_, String>("sent_at")?).unwrap_or_else(Utc::now),
        buyer_signed_at: parse_opt_ts(row.get("buyer_signed_at")?),
        supplier_signed_at: parse_opt_ts(row.get("supplier_signed_at")?),
        expires_at: parse_ts(&row.get::<_, String>("expires_at")?).unwrap_or_else(Utc::now),
        created_at: parse_ts(&row.get::<_, String>("created_at")?).unwrap_or_else(Utc::now),
    })
}

pub fn insert_agreement(conn: &Connection, a: &EngagementAgreement) -> Result<()> {
    conn.execute(
        "INSERT INTO engagement_agreements
         (id, engagement_id, version, status, terms_text,
          buyer_rate_sqft, supplier_rate_sqft, monthly_buyer_total, monthly_supplier_payout,
          sent_at, buyer_signed_at, supplier_signed_at, expires_at, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            a.id,
            a.engagement_id,
            a.version,
            a.status,
            a.terms_text,
            a.buyer_rate_sqft,
            a.supplier_rate_sqft,
            a.monthly_buyer_total,
            a.monthly_supplier_payout,
            ts(a.sent_at),
            opt_ts(a.buyer_signed_at),
            opt_ts(a.supplier_signed_at),
            ts(a.expires_at),
            ts(a.created_at),
        ],
    )
    .context("insert engagement agreement")?;
    Ok(())
}

/// The highest-version agreement for an engagement.
pub fn latest_agreement(conn: &Connection, engagement_id: &str) -> Result<Option<EngagementAgreement>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM engagement_agreements WHERE engagement_id = ?1
         ORDER BY version DESC LIMIT 1",
    )?;
    let mut rows = stmt.query_map(params![engagement_id], agreement_from_row)?;
    match rows.next() {
        Some(row) => Ok(Some(row?)),
        None => Ok(None),
    }
}

pub fn update_agreement_signatures(conn: &Connection, a: &EngagementAgreement) -> Result<()> {
    conn.execute(
        "UPDATE engagement_agreements
         SET status = ?2, buyer_signed_at = ?3, supplier_signed_at = ?4
         WHERE id = ?1",
        params![
            a.id,
            a.status,
            opt_ts(a.buyer_signed_at),
            opt_ts(a.supplier_signed_at),
        ],
    )
    .context("update agreement signatures")?;
    Ok(())
}

pub fn insert_payment_record(conn: &Connection, p: &PaymentRecord) -> Result<()> {
    conn.execute(
        "INSERT INTO payment_records
         (id, engagement_id, period_start, period_end, buyer_amount, supplier_amount,
          wex_amount, buyer_status, supplier_status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            p.id,
            p.engagement_id,
            p.period_start.to_string(),
            p.period_end.to_string(),
            p.buyer_amount,
            p.supplier_amount,
            p.wex_amount,
            p.buyer_status,
            p.supplier_status,
            ts(p.created_at),
        ],
    )
    .context("insert payment record")?;
    Ok(())
}

pub fn list_payment_records(conn: &Connection, engagement_id: &str) -> Result<Vec<PaymentRecord>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM payment_records WHERE engagement_id = ?1 ORDER BY period_start",
    )?;
    let rows = stmt
        .query_map(params![engagement_id], |row| {
            Ok(PaymentRecord {
                id: row.get("id")?,
                engagement_id: row.get("engagement_id")?,
                period_start: parse_opt_date(row.get("period_start")?).unwrap_or_default(),
                period_end: parse_opt_date(row.get("period_end")?).unwrap_or_default(),
                buyer_amount: row.get("buyer_amount")?,
                supplier_amount: row.get("supplier_amount")?,
                wex_amount: row.get("wex_amount")?,
                buyer_status: row.get("buyer_status")?,
                supplier_status: row.get("supplier_status")?,
                created_at: parse_ts(&row.get::<_, String>("created_at")?).unwrap_or_else(Utc::now),
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// JSON payload helper for event data columns.
pub fn event_data(value: Value) -> Option<Value> {
    if value.is_null() {
        None
    } else {
        Some(value)
    }
}
