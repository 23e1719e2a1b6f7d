//! Engagement transition service.
//!
//! Every command validates against the state machine, mutates the
//! engagement, appends exactly one immutable event, and commits — all
//! inside one transaction per command. The guarantee-sign command is the
//! sanctioned exception: two transitions, two events, one transaction.

use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate, Utc};
use rusqlite::Connection;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::clearing::pricing::{buyer_rate_from_supplier, monthly_totals};
use crate::clearing::store as clearing_store;
use crate::db::Db;
use crate::domain::*;
use crate::engagement::state_machine::{GuardContext, StateMachine, TransitionError};
use crate::engagement::store;

/// Deal pings expire after this window if the supplier stays silent.
const DEAL_PING_WINDOW_HOURS: i64 = 24;

/// Agreements expire unsigned after this window.
const AGREEMENT_WINDOW_DAYS: i64 = 7;

pub struct EngagementService {
    db: Db,
    machine: StateMachine,
}

impl From<TransitionError> for ApiError {
    fn from(err: TransitionError) -> Self {
        match err {
            TransitionError::GuardFailed(msg) => ApiError::GuardFailed(msg),
            other => ApiError::InvalidTransition(other.to_string()),
        }
    }
}

impl EngagementService {
    pub fn new(db: Db) -> Self {
        Self {
            db,
            machine: StateMachine::new(),
        }
    }

    pub fn machine(&self) -> &StateMachine {
        &self.machine
    }

    /// Validate and execute one transition on an already-loaded engagement.
    /// Mutates status + updated_at, persists the full row, and appends the
    /// audit event. Caller owns the transaction.
    fn execute_transition(
        &self,
        conn: &Connection,
        engagement: &mut Engagement,
        target: EngagementStatus,
        actor: EngagementActor,
        actor_id: &str,
        event_type: EngagementEventType,
        data: Value,
    ) -> Result<(), ApiError> {
        let guard_ctx = GuardContext {
            agreement_fully_signed: store::latest_agreement(conn, &engagement.id)
                .map_err(ApiError::internal)?
                .map(|a| a.fully_signed())
                .unwrap_or(false),
        };

        let from = engagement.status;
        self.machine
            .validate_transition(from, target, actor, engagement, guard_ctx)?;

        let now = Utc::now();
        engagement.status = target;
        engagement.updated_at = now;
        store::update_engagement(conn, engagement).map_err(ApiError::internal)?;

        let event = EngagementEvent {
            id: Uuid::new_v4().to_string(),
            engagement_id: engagement.id.clone(),
            event_type: event_type.as_str().to_string(),
            actor: actor.as_str().to_string(),
            actor_id: Some(actor_id.to_string()),
            from_status: Some(from.as_str().to_string()),
            to_status: Some(target.as_str().to_string()),
            data: store::event_data(data),
            created_at: now,
        };
        store::insert_event(conn, &event).map_err(ApiError::internal)?;

        info!(
            engagement = %engagement.id,
            from = from.as_str(),
            to = target.as_str(),
            actor = actor.as_str(),
            "Engagement transition"
        );
        Ok(())
    }

    async fn with_engagement<F>(&self, engagement_id: &str, f: F) -> Result<Engagement, ApiError>
    where
        F: FnOnce(&Connection, &mut Engagement) -> Result<(), ApiError>,
    {
        let mut conn = self.db.lock().await;
        let tx = conn.transaction().map_err(ApiError::internal)?;
        let mut engagement = store::get_engagement(&tx, engagement_id)
            .map_err(ApiError::internal)?
            .ok_or_else(|| ApiError::not_found("engagement"))?;
        f(&tx, &mut engagement)?;
        tx.commit().map_err(ApiError::internal)?;
        Ok(engagement)
    }

    // ------------------------------------------------------------------
    // Deal ping
    // ------------------------------------------------------------------

    pub async fn accept_deal_ping(
        &self,
        engagement_id: &str,
        actor_id: &str,
        terms_accepted: bool,
        counter_rate: Option<f64>,
    ) -> Result<Engagement, ApiError> {
        self.with_engagement(engagement_id, |conn, e| {
            let now = Utc::now();
            e.deal_ping_responded_at = Some(now);
            e.supplier_terms_accepted = terms_accepted;
            if let Some(rate) = counter_rate {
                e.supplier_rate_sqft = Some(rate);
            }
            self.execute_transition(
                conn,
                e,
                EngagementStatus::DealPingAccepted,
                EngagementActor::Supplier,
                actor_id,
                EngagementEventType::DealPingAccepted,
                json!({"terms_accepted": terms_accepted, "counter_rate": counter_rate}),
            )
        })
        .await
    }

    pub async fn decline_deal_ping(
        &self,
        engagement_id: &str,
        actor_id: &str,
        reason: Option<String>,
    ) -> Result<Engagement, ApiError> {
        self.with_engagement(engagement_id, |conn, e| {
            let now = Utc::now();
            e.deal_ping_responded_at = Some(now);
            e.declined_by = Some("supplier".into());
            e.decline_reason = reason.clone();
            e.declined_at = Some(now);
            self.execute_transition(
                conn,
                e,
                EngagementStatus::DealPingDeclined,
                EngagementActor::Supplier,
                actor_id,
                EngagementEventType::DealPingDeclined,
                json!({"reason": reason}),
            )
        })
        .await
    }

    // ------------------------------------------------------------------
    // Buyer accept / account linking
    // ------------------------------------------------------------------

    /// Buyer accepts the match and chooses tour or instant_book.
    pub async fn accept_match(
        &self,
        engagement_id: &str,
        actor_id: &str,
        path: EngagementPath,
    ) -> Result<Engagement, ApiError> {
        self.with_engagement(engagement_id, |conn, e| {
            e.path = Some(path);
            self.execute_transition(
                conn,
                e,
                EngagementStatus::BuyerAccepted,
                EngagementActor::Buyer,
                actor_id,
                EngagementEventType::BuyerAccepted,
                json!({"path": path.as_str()}),
            )
        })
        .await
    }

    /// Returning buyer logs in and gets linked to an in-progress engagement.
    pub async fn link_buyer(&self, engagement_id: &str, user_id: &str) -> Result<Engagement, ApiError> {
        self.with_engagement(engagement_id, |conn, e| {
            e.buyer_id = Some(user_id.to_string());
            e.account_created_at = Some(Utc::now());
            self.execute_transition(
                conn,
                e,
                EngagementStatus::AccountCreated,
                EngagementActor::Buyer,
                user_id,
                EngagementEventType::AccountCreated,
                json!({"method": "login"}),
            )
        })
        .await
    }

    // ------------------------------------------------------------------
    // Guarantee — atomic two-step: sign, then system reveals the address
    // ------------------------------------------------------------------

    pub async fn sign_guarantee(
        &self,
        engagement_id: &str,
        actor_id: &str,
        ip_address: Option<String>,
    ) -> Result<Engagement, ApiError> {
        self.with_engagement(engagement_id, |conn, e| {
            let now = Utc::now();
            e.guarantee_signed_at = Some(now);
            e.guarantee_ip_address = ip_address.clone();
            self.execute_transition(
                conn,
                e,
                EngagementStatus::GuaranteeSigned,
                EngagementActor::Buyer,
                actor_id,
                EngagementEventType::GuaranteeSigned,
                json!({"ip": ip_address}),
            )?;
            // System auto-reveals the address in the same transaction
            self.execute_transition(
                conn,
                e,
                EngagementStatus::AddressRevealed,
                EngagementActor::System,
                "system",
                EngagementEventType::AddressRevealed,
                Value::Null,
            )
        })
        .await
    }

    // ------------------------------------------------------------------
    // Tour lifecycle
    // ------------------------------------------------------------------

    pub async fn request_tour(
        &self,
        engagement_id: &str,
        actor_id: &str,
        preferred_date: Option<NaiveDate>,
        preferred_time: Option<String>,
    ) -> Result<Engagement, ApiError> {
        self.with_engagement(engagement_id, |conn, e| {
            e.tour_requested_at = Some(Utc::now());
            e.path = Some(EngagementPath::Tour);
            e.tour_requested_date = preferred_date;
            e.tour_requested_time = preferred_time.clone();
            self.execute_transition(
                conn,
                e,
                EngagementStatus::TourRequested,
                EngagementActor::Buyer,
                actor_id,
                EngagementEventType::TourRequested,
                json!({
                    "preferred_date": preferred_date.map(|d| d.to_string()),
                    "preferred_time": preferred_time,
                }),
            )
        })
        .await
    }

    pub async fn confirm_tour(
        &self,
        engagement_id: &str,
        actor_id: &str,
        scheduled_date: chrono::DateTime<Utc>,
    ) -> Result<Engagement, ApiError> {
        self.with_engagement(engagement_id, |conn, e| {
            e.tour_confirmed_at = Some(Utc::now());
            e.tour_scheduled_date = Some(scheduled_date);
            self.execute_transition(
                conn,
                e,
                EngagementStatus::TourConfirmed,
                EngagementActor::Supplier,
                actor_id,
                EngagementEventType::TourConfirmed,
                json!({"scheduled_date": scheduled_date.to_rfc3339()}),
            )
        })
        .await
    }

    pub async fn reschedule_tour(
        &self,
        engagement_id: &str,
        actor: EngagementActor,
        actor_id: &str,
        new_date: chrono::DateTime<Utc>,
        reason: String,
    ) -> Result<Engagement, ApiError> {
        self.with_engagement(engagement_id, |conn, e| {
            e.tour_reschedule_count += 1;
            e.tour_scheduled_date = Some(new_date);
            e.tour_rescheduled_by = Some(actor.as_str().to_string());
            self.execute_transition(
                conn,
                e,
                EngagementStatus::TourRescheduled,
                actor,
                actor_id,
                EngagementEventType::TourRescheduled,
                json!({"new_date": new_date.to_rfc3339(), "reason": reason}),
            )
        })
        .await
    }

    pub async fn complete_tour(
        &self,
        engagement_id: &str,
        actor: EngagementActor,
        actor_id: &str,
    ) -> Result<Engagement, ApiError> {
        self.with_engagement(engagement_id, |conn, e| {
            e.tour_completed_at = Some(Utc::now());
            self.execute_transition(
                conn,
                e,
                EngagementStatus::TourCompleted,
                actor,
                actor_id,
                EngagementEventType::TourCompleted,
                Value::Null,
            )
        })
        .await
    }

    // ------------------------------------------------------------------
    // Instant book
    // ------------------------------------------------------------------

    pub async fn request_instant_book(
        &self,
        engagement_id: &str,
        actor_id: &str,
    ) -> Result<Engagement, ApiError> {
        self.with_engagement(engagement_id, |conn, e| {
            e.instant_book_requested_at = Some(Utc::now());
            e.path = Some(EngagementPath::InstantBook);
            self.execute_transition(
                conn,
                e,
                EngagementStatus::InstantBookRequested,
                EngagementActor::Buyer,
                actor_id,
                EngagementEventType::InstantBookRequested,
                Value::Null,
            )
        })
        .await
    }

    pub async fn confirm_instant_book(
        &self,
        engagement_id: &str,
        actor: EngagementActor,
        actor_id: &str,
    ) -> Result<Engagement, ApiError> {
        self.with_engagement(engagement_id, |conn, e| {
            e.instant_book_confirmed_at = Some(Utc::now());
            self.execute_transition(
                conn,
                e,
                EngagementStatus::InstantBookConfirmed,
                actor,
                actor_id,
                EngagementEventType::InstantBookConfirmed,
                Value::Null,
            )
        })
        .await
    }

    pub async fn buyer_confirm(&self, engagement_id: &str, actor_id: &str) -> Result<Engagement, ApiError> {
        self.with_engagement(engagement_id, |conn, e| {
            self.execute_transition(
                conn,
                e,
                EngagementStatus::BuyerConfirmed,
                EngagementActor::Buyer,
                actor_id,
                EngagementEventType::BuyerConfirmed,
                Value::Null,
            )
        })
        .await
    }

    // ------------------------------------------------------------------
    // Agreement — dual-sign workflow
    // ------------------------------------------------------------------

    /// Create a versioned agreement snapshotting current pricing and move
    /// the engagement to agreement_sent.
    pub async fn send_agreement(
        &self,
        engagement_id: &str,
        actor: EngagementActor,
        actor_id: &str,
        terms_text: String,
    ) -> Result<Engagement, ApiError> {
        self.with_engagement(engagement_id, |conn, e| {
            let now = Utc::now();
            let version = store::latest_agreement(conn, &e.id)
                .map_err(ApiError::internal)?
                .map(|a| a.version + 1)
                .unwrap_or(1);

            let agreement = EngagementAgreement {
                id: Uuid::new_v4().to_string(),
                engagement_id: e.id.clone(),
                version,
                status: "pending".into(),
                terms_text,
                buyer_rate_sqft: e.buyer_rate_sqft,
                supplier_rate_sqft: e.supplier_rate_sqft,
                monthly_buyer_total: e.monthly_buyer_total,
                monthly_supplier_payout: e.monthly_supplier_payout,
                sent_at: now,
                buyer_signed_at: None,
                supplier_signed_at: None,
                expires_at: now + Duration::days(AGREEMENT_WINDOW_DAYS),
                created_at: now,
            };
            store::insert_agreement(conn, &agreement).map_err(ApiError::internal)?;

            e.agreement_sent_at = Some(now);
            self.execute_transition(
                conn,
                e,
                EngagementStatus::AgreementSent,
                actor,
                actor_id,
                EngagementEventType::AgreementSent,
                json!({"version": version}),
            )
        })
        .await
    }

    /// One party signs. The first signature is recorded without a state
    /// change; the signature that completes the pair executes the
    /// agreement_signed transition — exactly one such event regardless of
    /// signing order.
    pub async fn sign_agreement(
        &self,
        engagement_id: &str,
        actor: EngagementActor,
        actor_id: &str,
    ) -> Result<Engagement, ApiError> {
        if !matches!(actor, EngagementActor::Buyer | EngagementActor::Supplier) {
            return Err(ApiError::authorization("only buyer or supplier can sign"));
        }

        self.with_engagement(engagement_id, |conn, e| {
            let mut agreement = store::latest_agreement(conn, &e.id)
                .map_err(ApiError::internal)?
                .ok_or_else(|| ApiError::not_found("agreement"))?;

            let now = Utc::now();
            if agreement.expires_at < now {
                return Err(ApiError::validation("agreement has expired"));
            }

            match actor {
                EngagementActor::Buyer => {
                    if agreement.buyer_signed_at.is_some() {
                        return Err(ApiError::Conflict("buyer already signed".into()));
                    }
                    agreement.buyer_signed_at = Some(now);
                }
                EngagementActor::Supplier => {
                    if agreement.supplier_signed_at.is_some() {
                        return Err(ApiError::Conflict("supplier already signed".into()));
                    }
                    agreement.supplier_signed_at = Some(now);
                }
                _ => unreachable!(),
            }

            if agreement.fully_signed() {
                agreement.status = "signed".into();
                store::update_agreement_signatures(conn, &agreement).map_err(ApiError::internal)?;

                e.agreement_signed_at = Some(now);
                self.execute_transition(
                    conn,
                    e,
                    EngagementStatus::AgreementSigned,
                    actor,
                    actor_id,
                    EngagementEventType::AgreementSigned,
                    json!({"version": agreement.version}),
                )?;

                // Agreement fully executed — onboarding begins immediately
                e.onboarding_started_at = Some(now);
                self.execute_transition(
                    conn,
                    e,
                    EngagementStatus::Onboarding,
                    EngagementActor::System,
                    "system",
                    EngagementEventType::OnboardingStarted,
                    Value::Null,
                )
            } else {
                agreement.status = "partially_signed".into();
                store::update_agreement_signatures(conn, &agreement).map_err(ApiError::internal)?;

                // Partial signature: audit event only, no state change
                let event = EngagementEvent {
                    id: Uuid::new_v4().to_string(),
                    engagement_id: e.id.clone(),
                    event_type: EngagementEventType::AgreementPartiallySigned.as_str().to_string(),
                    actor: actor.as_str().to_string(),
                    actor_id: Some(actor_id.to_string()),
                    from_status: Some(e.status.as_str().to_string()),
                    to_status: Some(e.status.as_str().to_string()),
                    data: Some(json!({"version": agreement.version, "signed_by": actor.as_str()})),
                    created_at: now,
                };
                store::insert_event(conn, &event).map_err(ApiError::internal)?;
                e.updated_at = now;
                store::update_engagement(conn, e).map_err(ApiError::internal)?;
                Ok(())
            }
        })
        .await
    }

    // ------------------------------------------------------------------
    // Onboarding
    // ------------------------------------------------------------------

    /// Record onboarding document/payment flags. No transition — job 10 or
    /// an admin activates the lease once all three are set.
    pub async fn update_onboarding(
        &self,
        engagement_id: &str,
        insurance: Option<bool>,
        company_docs: Option<bool>,
        payment_method: Option<bool>,
    ) -> Result<Engagement, ApiError> {
        self.with_engagement(engagement_id, |conn, e| {
            if let Some(v) = insurance {
                e.insurance_uploaded = v;
            }
            if let Some(v) = company_docs {
                e.company_docs_uploaded = v;
            }
            if let Some(v) = payment_method {
                e.payment_method_added = v;
            }
            e.updated_at = Utc::now();
            store::update_engagement(conn, e).map_err(ApiError::internal)
        })
        .await
    }

    pub async fn activate(
        &self,
        engagement_id: &str,
        actor: EngagementActor,
        actor_id: &str,
    ) -> Result<Engagement, ApiError> {
        self.with_engagement(engagement_id, |conn, e| {
            let today = Utc::now().date_naive();
            e.onboarding_completed_at = Some(Utc::now());
            if e.lease_start_date.is_none() {
                e.lease_start_date = Some(today);
            }
            self.execute_transition(
                conn,
                e,
                EngagementStatus::Active,
                actor,
                actor_id,
                EngagementEventType::LeaseActivated,
                json!({"lease_start_date": e.lease_start_date.map(|d| d.to_string())}),
            )
        })
        .await
    }

    // ------------------------------------------------------------------
    // Decline / cancel
    // ------------------------------------------------------------------

    pub async fn decline(
        &self,
        engagement_id: &str,
        actor: EngagementActor,
        actor_id: &str,
        reason: Option<String>,
    ) -> Result<Engagement, ApiError> {
        let (target, event_type, party) = match actor {
            EngagementActor::Supplier => (
                EngagementStatus::DeclinedBySupplier,
                EngagementEventType::DeclinedBySupplier,
                "supplier",
            ),
            _ => (
                EngagementStatus::DeclinedByBuyer,
                EngagementEventType::DeclinedByBuyer,
                "buyer",
            ),
        };

        self.with_engagement(engagement_id, |conn, e| {
            let now = Utc::now();
            e.declined_by = Some(party.into());
            e.decline_reason = reason.clone();
            e.declined_at = Some(now);
            self.execute_transition(conn, e, target, actor, actor_id, event_type, json!({"reason": reason}))
        })
        .await
    }

    /// Admin-only cancellation from any non-terminal state.
    pub async fn cancel(
        &self,
        engagement_id: &str,
        actor_id: &str,
        cancelled_by: &str,
        reason: Option<String>,
    ) -> Result<Engagement, ApiError> {
        self.with_engagement(engagement_id, |conn, e| {
            let now = Utc::now();
            e.cancelled_by = Some(cancelled_by.to_string());
            e.cancel_reason = reason.clone();
            e.cancelled_at = Some(now);
            self.execute_transition(
                conn,
                e,
                EngagementStatus::Cancelled,
                EngagementActor::Admin,
                actor_id,
                EngagementEventType::Cancelled,
                json!({"reason": reason, "cancelled_by": cancelled_by}),
            )
        })
        .await
    }

    // ------------------------------------------------------------------
    // Bridges from the clearing engine
    // ------------------------------------------------------------------

    /// Settlement bridge: turn an accepted Match into an engagement with a
    /// live deal ping to the supplier.
    pub async fn create_from_match(&self, match_id: &str) -> Result<Engagement, ApiError> {
        let mut conn = self.db.lock().await;
        let tx = conn.transaction().map_err(ApiError::internal)?;

        let record = clearing_store::get_match(&tx, match_id)
            .map_err(ApiError::internal)?
            .ok_or_else(|| ApiError::not_found("match"))?;
        let warehouse = clearing_store::get_warehouse(&tx, &record.warehouse_id)
            .map_err(ApiError::internal)?
            .ok_or_else(|| ApiError::not_found("warehouse"))?;
        let core = clearing_store::get_truth_core(&tx, &record.warehouse_id)
            .map_err(ApiError::internal)?
            .ok_or_else(|| ApiError::not_found("truth core"))?;
        let need = clearing_store::get_buyer_need(&tx, &record.buyer_need_id)
            .map_err(ApiError::internal)?
            .ok_or_else(|| ApiError::not_found("buyer need"))?;

        let engagement = build_engagement(&record, &warehouse, &core, &need);
        store::insert_engagement(&tx, &engagement).map_err(ApiError::internal)?;

        let event = EngagementEvent {
            id: Uuid::new_v4().to_string(),
            engagement_id: engagement.id.clone(),
            event_type: EngagementEventType::DealPingSent.as_str().to_string(),
            actor: EngagementActor::System.as_str().to_string(),
            actor_id: Some("system".into()),
            from_status: None,
            to_status: Some(EngagementStatus::DealPingSent.as_str().to_string()),
            data: Some(json!({"match_id": match_id})),
            created_at: engagement.created_at,
        };
        store::insert_event(&tx, &event).map_err(ApiError::internal)?;

        tx.execute(
            "UPDATE matches SET status = 'accepted' WHERE id = ?1",
            rusqlite::params![match_id],
        )
        .map_err(ApiError::internal)?;

        tx.commit().map_err(ApiError::internal)?;
        info!(engagement = %engagement.id, match_id, "Deal ping sent from settlement accept");
        Ok(engagement)
    }

    /// SMS commitment bridge: the buyer has already chosen the space in
    /// conversation, so the engagement starts at buyer_accepted.
    pub async fn initiate_booking(
        &self,
        match_id: &str,
        buyer_name: &str,
        buyer_email: &str,
        buyer_phone: &str,
    ) -> Result<Engagement, ApiError> {
        let mut conn = self.db.lock().await;
        let tx = conn.transaction().map_err(ApiError::internal)?;

        let record = clearing_store::get_match(&tx, match_id)
            .map_err(ApiError::internal)?
            .ok_or_else(|| ApiError::not_found("match"))?;
        let warehouse = clearing_store::get_warehouse(&tx, &record.warehouse_id)
            .map_err(ApiError::internal)?
            .ok_or_else(|| ApiError::not_found("warehouse"))?;
        let core = clearing_store::get_truth_core(&tx, &record.warehouse_id)
            .map_err(ApiError::internal)?
            .ok_or_else(|| ApiError::not_found("truth core"))?;
        let need = clearing_store::get_buyer_need(&tx, &record.buyer_need_id)
            .map_err(ApiError::internal)?
            .ok_or_else(|| ApiError::not_found("buyer need"))?;

        let mut engagement = build_engagement(&record, &warehouse, &core, &need);
        engagement.status = EngagementStatus::BuyerAccepted;
        engagement.deal_ping_sent_at = None;
        engagement.deal_ping_expires_at = None;
        engagement.buyer_email = Some(buyer_email.to_string());
        engagement.buyer_phone = Some(buyer_phone.to_string());
        engagement.buyer_company_name = Some(buyer_name.to_string());
        store::insert_engagement(&tx, &engagement).map_err(ApiError::internal)?;

        let event = EngagementEvent {
            id: Uuid::new_v4().to_string(),
            engagement_id: engagement.id.clone(),
            event_type: EngagementEventType::BuyerAccepted.as_str().to_string(),
            actor: EngagementActor::Buyer.as_str().to_string(),
            actor_id: Some(buyer_phone.to_string()),
            from_status: None,
            to_status: Some(EngagementStatus::BuyerAccepted.as_str().to_string()),
            data: Some(json!({"match_id": match_id, "channel": "sms"})),
            created_at: engagement.created_at,
        };
        store::insert_event(&tx, &event).map_err(ApiError::internal)?;

        tx.execute(
            "UPDATE matches SET status = 'accepted' WHERE id = ?1",
            rusqlite::params![match_id],
        )
        .map_err(ApiError::internal)?;

        tx.commit().map_err(ApiError::internal)?;
        info!(engagement = %engagement.id, match_id, "Engagement created from SMS commitment");
        Ok(engagement)
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub async fn get(&self, engagement_id: &str) -> Result<Engagement, ApiError> {
        let conn = self.db.lock().await;
        store::get_engagement(&conn, engagement_id)
            .map_err(ApiError::internal)?
            .ok_or_else(|| ApiError::not_found("engagement"))
    }

    pub async fn timeline(&self, engagement_id: &str) -> Result<Vec<EngagementEvent>, ApiError> {
        let conn = self.db.lock().await;
        store::get_engagement(&conn, engagement_id)
            .map_err(ApiError::internal)?
            .ok_or_else(|| ApiError::not_found("engagement"))?;
        store::list_events(&conn, engagement_id).map_err(ApiError::internal)
    }

    pub async fn list(
        &self,
        status: Option<&str>,
        supplier_id: Option<&str>,
        buyer_id: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Engagement>, ApiError> {
        let conn = self.db.lock().await;
        store::list_engagements(&conn, status, supplier_id, buyer_id, limit, offset)
            .map_err(ApiError::internal)
    }
}

/// Snapshot pricing and lease framing from the match at creation time.
fn build_engagement(record: &Match, warehouse: &Warehouse, core: &TruthCore, need: &BuyerNeed) -> Engagement {
    let now = Utc::now();

    // Allocate the buyer's target footprint, clamped into the listed range
    let target = match (need.min_sqft, need.max_sqft) {
        (Some(min), Some(max)) => (min + max) / 2,
        (Some(min), None) => min,
        (None, Some(max)) => max,
        (None, None) => core.max_sqft.unwrap_or(0),
    };
    let sqft = target
        .max(core.min_sqft.unwrap_or(target))
        .min(core.max_sqft.unwrap_or(target));

    let supplier_rate = core.supplier_rate_per_sqft;
    let buyer_rate = buyer_rate_from_supplier(supplier_rate);
    let (monthly_buyer_total, monthly_supplier_payout) = monthly_totals(sqft, supplier_rate);

    let lease_start = need.needed_from;
    let lease_end = match (lease_start, need.duration_months) {
        (Some(start), Some(months)) => start.checked_add_months(chrono::Months::new(months as u32)),
        _ => None,
    };

    Engagement {
        id: Uuid::new_v4().to_string(),
        warehouse_id: warehouse.id.clone(),
        buyer_need_id: need.id.clone(),
        buyer_id: need.buyer_id.clone(),
        supplier_id: warehouse
            .created_by
            .clone()
            .or_else(|| warehouse.company_id.clone())
            .unwrap_or_else(|| "unassigned".into()),
        status: EngagementStatus::DealPingSent,
        tier: if warehouse.supplier_status == SupplierStatus::InNetwork {
            EngagementTier::Tier1
        } else {
            EngagementTier::Tier2
        },
        path: None,
        match_score: Some(record.match_score),
        match_rank: None,
        supplier_rate_sqft: Some(supplier_rate),
        buyer_rate_sqft: Some(buyer_rate),
        monthly_supplier_payout: Some(monthly_supplier_payout),
        monthly_buyer_total: Some(monthly_buyer_total),
        sqft: Some(sqft),
        deal_ping_sent_at: Some(now),
        deal_ping_expires_at: Some(now + Duration::hours(DEAL_PING_WINDOW_HOURS)),
        deal_ping_responded_at: None,
        supplier_terms_accepted: false,
        buyer_email: None,
        buyer_phone: None,
        buyer_company_name: None,
        account_created_at: None,
        guarantee_signed_at: None,
        guarantee_ip_address: None,
        tour_requested_at: None,
        tour_requested_date: None,
        tour_requested_time: None,
        tour_confirmed_at: None,
        tour_scheduled_date: None,
        tour_completed_at: None,
        tour_reschedule_count: 0,
        tour_rescheduled_by: None,
        instant_book_requested_at: None,
        instant_book_confirmed_at: None,
        agreement_sent_at: None,
        agreement_signed_at: None,
        onboarding_started_at: None,
        onboarding_completed_at: None,
        insurance_uploaded: false,
        company_docs_uploaded: false,
        payment_method_added: false,
        term_months: need.duration_months,
        lease_start_date: lease_start,
        lease_end_date: lease_end,
        declined_by: None,
        decline_reason: None,
        declined_at: None,
        cancelled_by: None,
        cancel_reason: None,
        cancelled_at: None,
        admin_flagged: false,
        admin_flag_reason: None,
        created_at: now,
        updated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded_service() -> (EngagementService, String) {
        let db = Db::open_in_memory().unwrap();
        let match_id;
        {
            let conn = db.lock().await;
            let now = crate::db::ts(Utc::now());
            conn.execute(
                "INSERT INTO warehouses (id, address, city, state, supplier_status, created_by, created_at, updated_at)
                 VALUES ('wh-1', '1 Dock Way', 'Testville', 'TS', 'in_network', 'sup-1', ?1, ?1)",
                rusqlite::params![now],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO truth_cores (id, warehouse_id, min_sqft, max_sqft, activity_tier,
                                          supplier_rate_per_sqft, activation_status, created_at, updated_at)
                 VALUES ('tc-1', 'wh-1', 5000, 20000, 'storage_only', 5.0, 'on', ?1, ?1)",
                rusqlite::params![now],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO buyer_needs (id, city, state, min_sqft, max_sqft, use_type, duration_months, created_at)
                 VALUES ('bn-1', 'Testville', 'TS', 8000, 12000, 'general', 6, ?1)",
                rusqlite::params![now],
            )
            .unwrap();
            match_id = "m-1".to_string();
            conn.execute(
                "INSERT INTO matches (id, buyer_need_id, warehouse_id, match_score, confidence, created_at)
                 VALUES ('m-1', 'bn-1', 'wh-1', 90.0, 90.0, ?1)",
                rusqlite::params![now],
            )
            .unwrap();
        }
        (EngagementService::new(db), match_id)
    }

    #[tokio::test]
    async fn test_create_from_match_snapshots_pricing() {
        let (service, match_id) = seeded_service().await;
        let e = service.create_from_match(&match_id).await.unwrap();

        assert_eq!(e.status, EngagementStatus::DealPingSent);
        assert_eq!(e.tier, EngagementTier::Tier1);
        assert_eq!(e.sqft, Some(10_000));
        assert_eq!(e.supplier_rate_sqft, Some(5.0));
        assert_eq!(e.buyer_rate_sqft, Some(6.36));
        assert_eq!(e.monthly_buyer_total, Some(63_600.0));
        assert_eq!(e.monthly_supplier_payout, Some(50_000.0));
        assert!(e.deal_ping_expires_at.is_some());

        let events = service.timeline(&e.id).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "deal_ping_sent");
        assert_eq!(events[0].from_status, None);
    }

    #[tokio::test]
    async fn test_deal_ping_accept_writes_event() {
        let (service, match_id) = seeded_service().await;
        let e = service.create_from_match(&match_id).await.unwrap();

        let e = service
            .accept_deal_ping(&e.id, "sup-1", true, None)
            .await
            .unwrap();
        assert_eq!(e.status, EngagementStatus::DealPingAccepted);
        assert!(e.deal_ping_responded_at.is_some());

        let events = service.timeline(&e.id).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].from_status.as_deref(), Some("deal_ping_sent"));
        assert_eq!(events[1].to_status.as_deref(), Some("deal_ping_accepted"));
    }

    #[tokio::test]
    async fn test_invalid_transition_writes_nothing() {
        let (service, match_id) = seeded_service().await;
        let e = service.create_from_match(&match_id).await.unwrap();

        // Buyer cannot accept the supplier's deal ping
        let err = service.accept_match(&e.id, "buyer-1", EngagementPath::Tour).await;
        assert!(err.is_err());

        let reloaded = service.get(&e.id).await.unwrap();
        assert_eq!(reloaded.status, EngagementStatus::DealPingSent);
        assert_eq!(service.timeline(&e.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_guarantee_sign_emits_two_events_atomically() {
        let (service, match_id) = seeded_service().await;
        let e = service.create_from_match(&match_id).await.unwrap();
        service.accept_deal_ping(&e.id, "sup-1", true, None).await.unwrap();
        // Walk to buyer_accepted via admin override for test setup brevity
        let db_e = service
            .with_engagement(&e.id, |conn, eng| {
                service.execute_transition(
                    conn,
                    eng,
                    EngagementStatus::BuyerAccepted,
                    EngagementActor::Admin,
                    "admin-1",
                    EngagementEventType::BuyerAccepted,
                    Value::Null,
                )
            })
            .await
            .unwrap();
        assert_eq!(db_e.status, EngagementStatus::BuyerAccepted);

        let e = service
            .sign_guarantee(&e.id, "buyer-1", Some("10.0.0.1".into()))
            .await
            .unwrap();
        assert_eq!(e.status, EngagementStatus::AddressRevealed);
        assert!(e.guarantee_signed_at.is_some());

        let events = service.timeline(&e.id).await.unwrap();
        let tail: Vec<&str> = events.iter().rev().take(2).map(|ev| ev.event_type.as_str()).collect();
        assert_eq!(tail, vec!["address_revealed", "guarantee_signed"]);
    }

    #[tokio::test]
    async fn test_dual_sign_exactly_one_signed_event() {
        for buyer_first in [true, false] {
            let (service, match_id) = seeded_service().await;
            let e = service.create_from_match(&match_id).await.unwrap();
            // Admin-walk to buyer_confirmed
            service
                .with_engagement(&e.id, |conn, eng| {
                    service.execute_transition(
                        conn,
                        eng,
                        EngagementStatus::BuyerConfirmed,
                        EngagementActor::Admin,
                        "admin-1",
                        EngagementEventType::BuyerConfirmed,
                        Value::Null,
                    )
                })
                .await
                .unwrap();

            service
                .send_agreement(&e.id, EngagementActor::System, "system", "terms".into())
                .await
                .unwrap();

            let order = if buyer_first {
                [EngagementActor::Buyer, EngagementActor::Supplier]
            } else {
                [EngagementActor::Supplier, EngagementActor::Buyer]
            };

            let partial = service.sign_agreement(&e.id, order[0], "first").await.unwrap();
            assert_eq!(partial.status, EngagementStatus::AgreementSent);

            let done = service.sign_agreement(&e.id, order[1], "second").await.unwrap();
            assert_eq!(done.status, EngagementStatus::Onboarding);
            assert!(done.agreement_signed_at.is_some());

            let events = service.timeline(&e.id).await.unwrap();
            let signed_count = events
                .iter()
                .filter(|ev| ev.event_type == "agreement_signed")
                .count();
            assert_eq!(signed_count, 1, "buyer_first={buyer_first}");
        }
    }

    #[tokio::test]
    async fn test_onboarding_guard_blocks_activation() {
        let (service, match_id) = seeded_service().await;
        let e = service.create_from_match(&match_id).await.unwrap();
        service
            .with_engagement(&e.id, |conn, eng| {
                service.execute_transition(
                    conn,
                    eng,
                    EngagementStatus::Onboarding,
                    EngagementActor::Admin,
                    "admin-1",
                    EngagementEventType::OnboardingStarted,
                    Value::Null,
                )
            })
            .await
            .unwrap();

        let err = service
            .activate(&e.id, EngagementActor::System, "system")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::GuardFailed(_)));

        service
            .update_onboarding(&e.id, Some(true), Some(true), Some(true))
            .await
            .unwrap();
        let e = service.activate(&e.id, EngagementActor::System, "system").await.unwrap();
        assert_eq!(e.status, EngagementStatus::Active);
        assert!(e.lease_start_date.is_some());
    }

    #[tokio::test]
    async fn test_admin_cancel_and_terminal_lock() {
        let (service, match_id) = seeded_service().await;
        let e = service.create_from_match(&match_id).await.unwrap();

        let e = service
            .cancel(&e.id, "admin-1", "admin", Some("duplicate".into()))
            .await
            .unwrap();
        assert_eq!(e.status, EngagementStatus::Cancelled);

        // Terminal: nothing moves it again
        let err = service.accept_deal_ping(&e.id, "sup-1", true, None).await;
        assert!(err.is_err());
    }
}
