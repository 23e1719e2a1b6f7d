//! Table-driven scheduler for the background jobs.
//!
//! One cooperative loop per job; a single in-process runner is sufficient.
//! The durability contract is the jobs' idempotency, not scheduling
//! precision: a crash between ticks loses nothing, and a double-fire
//! changes nothing.

use anyhow::Result;
use chrono::Utc;
use std::time::Duration;
use tracing::{error, info};

use crate::db::Db;
use crate::jobs::engagement_jobs;

#[derive(Debug, Clone, Copy)]
pub enum Cadence {
    /// Fixed interval from startup.
    Every(Duration),
    /// Once a day at the given UTC hour.
    DailyAt(u32),
}

/// The eleven jobs and their cadences.
pub const JOB_TABLE: &[(&str, Cadence)] = &[
    ("deal_ping_deadlines", Cadence::Every(Duration::from_secs(15 * 60))),
    ("general_deadlines", Cadence::Every(Duration::from_secs(15 * 60))),
    ("tour_reminders", Cadence::DailyAt(6)),
    ("post_tour_followup", Cadence::Every(Duration::from_secs(60 * 60))),
    ("qa_supplier_deadline", Cadence::Every(Duration::from_secs(60 * 60))),
    ("knowledge_backfill", Cadence::Every(Duration::from_secs(6 * 60 * 60))),
    ("payment_records", Cadence::DailyAt(0)),
    ("payment_reminders", Cadence::DailyAt(9)),
    ("stale_engagements", Cadence::DailyAt(8)),
    ("auto_activate_leases", Cadence::DailyAt(0)),
    ("renewal_prompts", Cadence::DailyAt(9)),
];

/// Run a single job by name. Returns the amount of work done.
pub async fn run_job(db: &Db, name: &str) -> Result<usize> {
    match name {
        "deal_ping_deadlines" => engagement_jobs::check_deal_ping_deadlines(db).await,
        "general_deadlines" => engagement_jobs::check_deadlines(db).await,
        "tour_reminders" => engagement_jobs::send_tour_reminders(db).await,
        "post_tour_followup" => engagement_jobs::send_post_tour_followup(db).await,
        "qa_supplier_deadline" => engagement_jobs::check_qa_supplier_deadline(db).await,
        "knowledge_backfill" => engagement_jobs::backfill_property_knowledge(db).await,
        "payment_records" => engagement_jobs::generate_payment_records(db).await,
        "payment_reminders" => engagement_jobs::send_payment_reminders(db).await,
        "stale_engagements" => engagement_jobs::flag_stale_engagements(db).await,
        "auto_activate_leases" => engagement_jobs::auto_activate_leases(db).await,
        "renewal_prompts" => engagement_jobs::send_renewal_prompts(db).await,
        other => anyhow::bail!("unknown job: {other}"),
    }
}

/// Seconds until the next occurrence of the given UTC hour.
fn seconds_until_hour(hour: u32) -> u64 {
    let now = Utc::now();
    let today_target = now
        .date_naive()
        .and_hms_opt(hour, 0, 0)
        .expect("valid hour")
        .and_utc();
    let target = if today_target > now {
        today_target
    } else {
        today_target + chrono::Duration::days(1)
    };
    (target - now).num_seconds().max(1) as u64
}

/// Spawn one loop per job in the table.
pub fn spawn_all(db: Db) {
    for (name, cadence) in JOB_TABLE {
        let db = db.clone();
        let name = *name;
        let cadence = *cadence;
        tokio::spawn(async move {
            loop {
                let sleep = match cadence {
                    Cadence::Every(interval) => interval,
                    Cadence::DailyAt(hour) => Duration::from_secs(seconds_until_hour(hour)),
                };
                tokio::time::sleep(sleep).await;

                match run_job(&db, name).await {
                    Ok(0) => {}
                    Ok(count) => info!(job = name, count, "Background job did work"),
                    Err(err) => error!(job = name, error = %err, "Background job failed"),
                }
            }
        });
    }
    info!(jobs = JOB_TABLE.len(), "Background scheduler started");
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn test_job_table_has_eleven_jobs() {
        assert_eq!(JOB_TABLE.len(), 11);
        // Names are unique
        let mut names: Vec<&str> = JOB_TABLE.iter().map(|(n, _)| *n).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 11);
    }

    #[tokio::test]
    async fn test_every_job_runs_clean_on_empty_db() {
        let db = Db::open_in_memory().unwrap();
        for (name, _) in JOB_TABLE {
            let count = run_job(&db, name).await.unwrap();
            assert_eq!(count, 0, "{name} did phantom work on an empty database");
        }
    }

    #[tokio::test]
    async fn test_unknown_job_errors() {
        let db = Db::open_in_memory().unwrap();
        assert!(run_job(&db, "nope").await.is_err());
    }

    #[test]
    fn test_seconds_until_hour_bounds() {
        let now_hour = Utc::now().hour();
        let secs = seconds_until_hour((now_hour + 1) % 24);
        assert!(secs >= 1);
        assert!(secs <= 24 * 60 * 60);
    }
}
