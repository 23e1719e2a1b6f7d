//! Role-filtered engagement serialization.
//!
//! Economic isolation lives here: buyers never see supplier economics
//! (supplier_rate, payout, spread), suppliers never see buyer economics,
//! and suppliers see buyer contact info only once the buyer has an
//! account. Every view carries `allowed_actions` computed from the state
//! machine for the viewing actor.

use serde_json::{json, Value};

use crate::domain::{Engagement, EngagementActor, EngagementStatus};
use crate::engagement::state_machine::StateMachine;

/// Statuses from which buyer contact info becomes visible to suppliers.
fn contact_visible(status: EngagementStatus) -> bool {
    use EngagementStatus::*;
    matches!(
        status,
        AccountCreated
            | GuaranteeSigned
            | AddressRevealed
            | TourRequested
            | TourConfirmed
            | TourRescheduled
            | TourCompleted
            | InstantBookRequested
            | InstantBookConfirmed
            | BuyerConfirmed
            | AgreementSent
            | AgreementSigned
            | Onboarding
            | Active
            | Completed
            | DeclinedByBuyer
            | DeclinedBySupplier
    )
}

fn allowed_actions(machine: &StateMachine, e: &Engagement, actor: EngagementActor) -> Vec<String> {
    machine
        .allowed_transitions(e.status, actor)
        .into_iter()
        .map(|s| s.as_str().to_string())
        .collect()
}

fn common_fields(e: &Engagement) -> Value {
    json!({
        "id": e.id,
        "warehouse_id": e.warehouse_id,
        "status": e.status.as_str(),
        "tier": e.tier.as_str(),
        "path": e.path.map(|p| p.as_str()),
        "match_score": e.match_score,
        "sqft": e.sqft,
        "deal_ping_sent_at": e.deal_ping_sent_at,
        "deal_ping_expires_at": e.deal_ping_expires_at,
        "tour_requested_at": e.tour_requested_at,
        "tour_requested_date": e.tour_requested_date,
        "tour_requested_time": e.tour_requested_time,
        "tour_confirmed_at": e.tour_confirmed_at,
        "tour_scheduled_date": e.tour_scheduled_date,
        "tour_completed_at": e.tour_completed_at,
        "tour_reschedule_count": e.tour_reschedule_count,
        "tour_rescheduled_by": e.tour_rescheduled_by,
        "instant_book_requested_at": e.instant_book_requested_at,
        "instant_book_confirmed_at": e.instant_book_confirmed_at,
        "agreement_sent_at": e.agreement_sent_at,
        "agreement_signed_at": e.agreement_signed_at,
        "onboarding_started_at": e.onboarding_started_at,
        "onboarding_completed_at": e.onboarding_completed_at,
        "term_months": e.term_months,
        "lease_start_date": e.lease_start_date,
        "lease_end_date": e.lease_end_date,
        "declined_by": e.declined_by,
        "decline_reason": e.decline_reason,
        "declined_at": e.declined_at,
        "cancelled_by": e.cancelled_by,
        "cancel_reason": e.cancel_reason,
        "cancelled_at": e.cancelled_at,
        "created_at": e.created_at,
        "updated_at": e.updated_at,
    })
}

fn merge(base: Value, extra: Value) -> Value {
    let (Value::Object(mut base_map), Value::Object(extra_map)) = (base, extra) else {
        return Value::Null;
    };
    for (k, v) in extra_map {
        base_map.insert(k, v);
    }
    Value::Object(base_map)
}

/// Serialize with role-based field filtering.
pub fn serialize_engagement(machine: &StateMachine, e: &Engagement, role: &str) -> Value {
    let actor = EngagementActor::from_role(role);
    let actions = allowed_actions(machine, e, actor);

    match role {
        "admin" | "broker" => merge(
            common_fields(e),
            json!({
                "buyer_need_id": e.buyer_need_id,
                "buyer_id": e.buyer_id,
                "supplier_id": e.supplier_id,
                "match_rank": e.match_rank,
                "supplier_rate_sqft": e.supplier_rate_sqft,
                "buyer_rate_sqft": e.buyer_rate_sqft,
                "monthly_supplier_payout": e.monthly_supplier_payout,
                "monthly_buyer_total": e.monthly_buyer_total,
                "deal_ping_responded_at": e.deal_ping_responded_at,
                "supplier_terms_accepted": e.supplier_terms_accepted,
                "buyer_email": e.buyer_email,
                "buyer_phone": e.buyer_phone,
                "buyer_company_name": e.buyer_company_name,
                "account_created_at": e.account_created_at,
                "guarantee_signed_at": e.guarantee_signed_at,
                "guarantee_ip_address": e.guarantee_ip_address,
                "insurance_uploaded": e.insurance_uploaded,
                "company_docs_uploaded": e.company_docs_uploaded,
                "payment_method_added": e.payment_method_added,
                "admin_flagged": e.admin_flagged,
                "admin_flag_reason": e.admin_flag_reason,
                "allowed_actions": actions,
            }),
        ),
        "supplier" => {
            let show_contact = contact_visible(e.status);
            merge(
                common_fields(e),
                json!({
                    "supplier_rate_sqft": e.supplier_rate_sqft,
                    "monthly_supplier_payout": e.monthly_supplier_payout,
                    "deal_ping_responded_at": e.deal_ping_responded_at,
                    "supplier_terms_accepted": e.supplier_terms_accepted,
                    "buyer_company_name": if show_contact { e.buyer_company_name.clone() } else { None },
                    "allowed_actions": actions,
                }),
            )
        }
        _ => merge(
            common_fields(e),
            json!({
                "buyer_need_id": e.buyer_need_id,
                "match_rank": e.match_rank,
                "buyer_rate_sqft": e.buyer_rate_sqft,
                "monthly_buyer_total": e.monthly_buyer_total,
                "buyer_company_name": e.buyer_company_name,
                "guarantee_signed_at": e.guarantee_signed_at,
                "insurance_uploaded": e.insurance_uploaded,
                "company_docs_uploaded": e.company_docs_uploaded,
                "payment_method_added": e.payment_method_added,
                "allowed_actions": actions,
            }),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crate::domain::{EngagementPath, EngagementTier};

    fn engagement(status: EngagementStatus) -> Engagement {
        Engagement {
            id: "e-1".into(),
            warehouse_id: "wh-1".into(),
            buyer_need_id: "bn-1".into(),
            buyer_id: Some("buyer-1".into()),
            supplier_id: "sup-1".into(),
            status,
            tier: EngagementTier::Tier1,
            path: Some(EngagementPath::Tour),
            match_score: Some(91.5),
            match_rank: Some(1),
            supplier_rate_sqft: Some(5.0),
            buyer_rate_sqft: Some(6.36),
            monthly_supplier_payout: Some(50_000.0),
            monthly_buyer_total: Some(63_600.0),
            sqft: Some(10_000),
            deal_ping_sent_at: None,
            deal_ping_expires_at: None,
            deal_ping_responded_at: None,
            supplier_terms_accepted: true,
            buyer_email: Some("b@example.com".into()),
            buyer_phone: Some("+12025550000".into()),
            buyer_company_name: Some("Acme Logistics".into()),
            account_created_at: None,
            guarantee_signed_at: None,
            guarantee_ip_address: Some("10.0.0.1".into()),
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
            term_months: Some(6),
            lease_start_date: None,
            lease_end_date: None,
            declined_by: None,
            decline_reason: None,
            declined_at: None,
            cancelled_by: None,
            cancel_reason: None,
            cancelled_at: None,
            admin_flagged: false,
            admin_flag_reason: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_buyer_view_never_leaks_supplier_economics() {
        let machine = StateMachine::new();
        let view = serialize_engagement(&machine, &engagement(EngagementStatus::Matched), "buyer");
        let obj = view.as_object().unwrap();
        assert!(!obj.contains_key("supplier_rate_sqft"));
        assert!(!obj.contains_key("monthly_supplier_payout"));
        assert!(!obj.contains_key("spread_pct"));
        assert!(!obj.contains_key("wex_amount"));
        assert_eq!(obj["buyer_rate_sqft"], 6.36);
    }

    #[test]
    fn test_supplier_view_never_leaks_buyer_economics() {
        let machine = StateMachine::new();
        let view =
            serialize_engagement(&machine, &engagement(EngagementStatus::DealPingSent), "supplier");
        let obj = view.as_object().unwrap();
        assert!(!obj.contains_key("buyer_rate_sqft"));
        assert!(!obj.contains_key("monthly_buyer_total"));
        assert!(!obj.contains_key("buyer_email"));
        assert!(!obj.contains_key("buyer_phone"));
        assert_eq!(obj["supplier_rate_sqft"], 5.0);
    }

    #[test]
    fn test_supplier_contact_gating() {
        let machine = StateMachine::new();

        // Pre-account: no contact
        let early =
            serialize_engagement(&machine, &engagement(EngagementStatus::BuyerAccepted), "supplier");
        assert!(early["buyer_company_name"].is_null());

        // From account_created onward: visible
        let later =
            serialize_engagement(&machine, &engagement(EngagementStatus::AccountCreated), "supplier");
        assert_eq!(later["buyer_company_name"], "Acme Logistics");
    }

    #[test]
    fn test_admin_sees_everything() {
        let machine = StateMachine::new();
        let view = serialize_engagement(&machine, &engagement(EngagementStatus::Active), "admin");
        let obj = view.as_object().unwrap();
        assert_eq!(obj["supplier_rate_sqft"], 5.0);
        assert_eq!(obj["buyer_rate_sqft"], 6.36);
        assert_eq!(obj["buyer_email"], "b@example.com");
        assert_eq!(obj["monthly_supplier_payout"], 50_000.0);
    }

    #[test]
    fn test_allowed_actions_follow_state_machine() {
        let machine = StateMachine::new();
        let view =
            serialize_engagement(&machine, &engagement(EngagementStatus::DealPingSent), "supplier");
        let actions: Vec<String> = view["allowed_actions"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap().to_string())
            .collect();
        assert!(actions.contains(&"deal_ping_accepted".to_string()));
        assert!(actions.contains(&"deal_ping_declined".to_string()));

        // Terminal: empty
        let done = serialize_engagement(&machine, &engagement(EngagementStatus::Completed), "buyer");
        assert!(done["allowed_actions"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_role_view_round_trip_preserves_fields() {
        let machine = StateMachine::new();
        let e = engagement(EngagementStatus::Active);
        let view = serialize_engagement(&machine, &e, "buyer");
        let reparsed: Value = serde_json::from_str(&view.to_string()).unwrap();
        assert_eq!(reparsed["id"], e.id);
        assert_eq!(reparsed["status"], "active");
        assert_eq!(reparsed["buyer_rate_sqft"], 6.36);
    }
}
