//! The engagement state machine.
//!
//! A fixed table of (from, target, authorized actors) triples loaded once at
//! startup, plus guard predicates on a handful of transitions. Admin gets a
//! blanket override between non-terminal states, and admin-only
//! cancellation from any non-terminal state. Terminal states are never
//! left, and `tour_rescheduled` is the only state an engagement may visit
//! more than once.

use lazy_static::lazy_static;
use std::collections::HashMap;
use thiserror::Error;

use crate::domain::{Engagement, EngagementActor, EngagementStatus};

use EngagementActor::*;
use EngagementStatus::*;

#[derive(Debug, Error)]
pub enum TransitionError {
    #[error("cannot transition from terminal state {0}")]
    TerminalState(&'static str),

    #[error("no transition from {from} to {target}")]
    Unreachable {
        from: &'static str,
        target: &'static str,
    },

    #[error("actor {actor} is not permitted to move {from} to {target}")]
    ActorNotPermitted {
        actor: &'static str,
        from: &'static str,
        target: &'static str,
    },

    #[error("guard failed: {0}")]
    GuardFailed(String),
}

/// Static transition table: (from, target, authorized actors).
const TRANSITIONS: &[(EngagementStatus, EngagementStatus, &[EngagementActor])] = &[
    (DealPingSent, DealPingAccepted, &[Supplier]),
    (DealPingSent, DealPingDeclined, &[Supplier]),
    (DealPingSent, DealPingExpired, &[System]),
    (DealPingAccepted, Matched, &[System, Admin]),
    (Matched, BuyerReviewing, &[Buyer, System]),
    (Matched, BuyerAccepted, &[Buyer]),
    (Matched, DeclinedByBuyer, &[Buyer]),
    (BuyerReviewing, BuyerAccepted, &[Buyer]),
    (BuyerReviewing, DeclinedByBuyer, &[Buyer]),
    (BuyerReviewing, Expired, &[System]),
    (BuyerAccepted, ContactCaptured, &[Buyer, System]),
    (BuyerAccepted, AccountCreated, &[Buyer]),
    (BuyerAccepted, GuaranteeSigned, &[Buyer]),
    (ContactCaptured, AccountCreated, &[Buyer, System]),
    (ContactCaptured, GuaranteeSigned, &[Buyer]),
    (AccountCreated, GuaranteeSigned, &[Buyer]),
    (GuaranteeSigned, AddressRevealed, &[System]),
    (AddressRevealed, TourRequested, &[Buyer]),
    (AddressRevealed, InstantBookRequested, &[Buyer]),
    (AddressRevealed, DeclinedByBuyer, &[Buyer]),
    (AddressRevealed, Expired, &[System]),
    (TourRequested, TourConfirmed, &[Supplier]),
    (TourRequested, DeclinedBySupplier, &[Supplier]),
    (TourRequested, Expired, &[System]),
    (TourConfirmed, TourRescheduled, &[Buyer, Supplier]),
    (TourConfirmed, TourCompleted, &[Supplier, System]),
    (TourConfirmed, DeclinedByBuyer, &[Buyer]),
    (TourRescheduled, TourConfirmed, &[Supplier]),
    (TourRescheduled, TourCompleted, &[Supplier, System]),
    (TourRescheduled, TourRescheduled, &[Buyer, Supplier]),
    (TourCompleted, BuyerConfirmed, &[Buyer]),
    (TourCompleted, DeclinedByBuyer, &[Buyer]),
    (TourCompleted, Expired, &[System]),
    (InstantBookRequested, InstantBookConfirmed, &[Supplier, Admin]),
    (InstantBookRequested, DeclinedBySupplier, &[Supplier]),
    (InstantBookConfirmed, BuyerConfirmed, &[Buyer, System]),
    (BuyerConfirmed, AgreementSent, &[System, Admin]),
    (AgreementSent, AgreementSigned, &[Buyer, Supplier]),
    (AgreementSent, DeclinedByBuyer, &[Buyer]),
    (AgreementSent, DeclinedBySupplier, &[Supplier]),
    (AgreementSent, Expired, &[System]),
    (AgreementSigned, Onboarding, &[System, Admin]),
    (Onboarding, Active, &[System, Admin]),
    (Active, Completed, &[System, Admin]),
];

lazy_static! {
    static ref TABLE: HashMap<(EngagementStatus, EngagementStatus), &'static [EngagementActor]> = {
        let mut map = HashMap::new();
        for (from, target, actors) in TRANSITIONS {
            map.insert((*from, *target), *actors);
        }
        map
    };
}

/// Context a guard sees when deciding whether a transition may proceed.
/// Pre-loaded by the service so guards stay pure.
#[derive(Debug, Default, Clone, Copy)]
pub struct GuardContext {
    /// Latest agreement carries both signatures.
    pub agreement_fully_signed: bool,
}

#[derive(Default)]
pub struct StateMachine;

impl StateMachine {
    pub fn new() -> Self {
        Self
    }

    /// Validate a (from, actor, target) triple against reachability, actor
    /// permission, and guards. No mutation happens here.
    pub fn validate_transition(
        &self,
        from: EngagementStatus,
        target: EngagementStatus,
        actor: EngagementActor,
        engagement: &Engagement,
        guard_ctx: GuardContext,
    ) -> Result<(), TransitionError> {
        if from.is_terminal() {
            return Err(TransitionError::TerminalState(from.as_str()));
        }

        // Admin-only cancellation from every non-terminal state
        let reachable = if target == Cancelled {
            actor == Admin
        } else if let Some(actors) = TABLE.get(&(from, target)) {
            actors.contains(&actor) || (actor == Admin && !target.is_terminal())
        } else {
            // Admin override between non-terminal states
            actor == Admin && !target.is_terminal()
        };

        if !reachable {
            // Distinguish "no such edge" from "wrong actor" for error clarity
            if target != Cancelled && !TABLE.contains_key(&(from, target)) && actor == Admin {
                return Err(TransitionError::Unreachable {
                    from: from.as_str(),
                    target: target.as_str(),
                });
            }
            if TABLE.contains_key(&(from, target)) || target == Cancelled {
                return Err(TransitionError::ActorNotPermitted {
                    actor: actor.as_str(),
                    from: from.as_str(),
                    target: target.as_str(),
                });
            }
            return Err(TransitionError::Unreachable {
                from: from.as_str(),
                target: target.as_str(),
            });
        }

        self.check_guards(target, engagement, guard_ctx)
    }

    fn check_guards(
        &self,
        target: EngagementStatus,
        engagement: &Engagement,
        guard_ctx: GuardContext,
    ) -> Result<(), TransitionError> {
        match target {
            AgreementSigned => {
                if !guard_ctx.agreement_fully_signed {
                    return Err(TransitionError::GuardFailed(
                        "agreement requires both buyer and supplier signatures".into(),
                    ));
                }
            }
            Active => {
                if !(engagement.insurance_uploaded
                    && engagement.company_docs_uploaded
                    && engagement.payment_method_added)
                {
                    return Err(TransitionError::GuardFailed(
                        "onboarding requires insurance, company docs, and a payment method".into(),
                    ));
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Target statuses the given actor may reach from `from`. Drives the
    /// `allowed_actions` field of every role view.
    pub fn allowed_transitions(
        &self,
        from: EngagementStatus,
        actor: EngagementActor,
    ) -> Vec<EngagementStatus> {
        if from.is_terminal() {
            return Vec::new();
        }
        let mut targets: Vec<EngagementStatus> = TRANSITIONS
            .iter()
            .filter(|(f, _, actors)| *f == from && actors.contains(&actor))
            .map(|(_, t, _)| *t)
            .collect();
        if actor == Admin {
            targets.push(Cancelled);
        }
        targets.dedup();
        targets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn engagement(status: EngagementStatus) -> Engagement {
        Engagement {
            id: "e-1".into(),
            warehouse_id: "wh-1".into(),
            buyer_need_id: "bn-1".into(),
            buyer_id: None,
            supplier_id: "sup-1".into(),
            status,
            tier: crate::domain::EngagementTier::Tier1,
            path: None,
            match_score: None,
            match_rank: None,
            supplier_rate_sqft: None,
            buyer_rate_sqft: None,
            monthly_supplier_payout: None,
            monthly_buyer_total: None,
            sqft: None,
            deal_ping_sent_at: None,
            deal_ping_expires_at: None,
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
            term_months: None,
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
    fn test_supplier_accepts_deal_ping() {
        let sm = StateMachine::new();
        let e = engagement(DealPingSent);
        assert!(sm
            .validate_transition(DealPingSent, DealPingAccepted, Supplier, &e, GuardContext::default())
            .is_ok());
    }

    #[test]
    fn test_buyer_cannot_accept_deal_ping() {
        let sm = StateMachine::new();
        let e = engagement(DealPingSent);
        let err = sm
            .validate_transition(DealPingSent, DealPingAccepted, Buyer, &e, GuardContext::default())
            .unwrap_err();
        assert!(matches!(err, TransitionError::ActorNotPermitted { .. }));
    }

    #[test]
    fn test_terminal_states_are_final() {
        let sm = StateMachine::new();
        for terminal in [
            Completed,
            Cancelled,
            Expired,
            DeclinedByBuyer,
            DeclinedBySupplier,
            DealPingExpired,
            DealPingDeclined,
        ] {
            let e = engagement(terminal);
            let err = sm
                .validate_transition(terminal, Active, Admin, &e, GuardContext::default())
                .unwrap_err();
            assert!(matches!(err, TransitionError::TerminalState(_)));
            assert!(sm.allowed_transitions(terminal, Admin).is_empty());
        }
    }

    #[test]
    fn test_unreachable_transition() {
        let sm = StateMachine::new();
        let e = engagement(DealPingSent);
        let err = sm
            .validate_transition(DealPingSent, Active, Buyer, &e, GuardContext::default())
            .unwrap_err();
        assert!(matches!(err, TransitionError::Unreachable { .. }));
    }

    #[test]
    fn test_admin_override_skips_states() {
        let sm = StateMachine::new();
        let mut e = engagement(Matched);
        e.insurance_uploaded = true;
        e.company_docs_uploaded = true;
        e.payment_method_added = true;
        // Not in the table, but admin may override to a non-terminal target
        assert!(sm
            .validate_transition(Matched, Onboarding, Admin, &e, GuardContext::default())
            .is_ok());
        // Never to a terminal target (except cancelled)
        assert!(sm
            .validate_transition(Matched, Completed, Admin, &e, GuardContext::default())
            .is_err());
    }

    #[test]
    fn test_admin_cancel_from_any_non_terminal() {
        let sm = StateMachine::new();
        for status in [DealPingSent, Matched, TourConfirmed, Onboarding, Active] {
            let e = engagement(status);
            assert!(sm
                .validate_transition(status, Cancelled, Admin, &e, GuardContext::default())
                .is_ok());
            assert!(sm
                .validate_transition(status, Cancelled, Buyer, &e, GuardContext::default())
                .is_err());
        }
    }

    #[test]
    fn test_agreement_dual_sign_guard() {
        let sm = StateMachine::new();
        let e = engagement(AgreementSent);

        let err = sm
            .validate_transition(
                AgreementSent,
                AgreementSigned,
                Buyer,
                &e,
                GuardContext { agreement_fully_signed: false },
            )
            .unwrap_err();
        assert!(matches!(err, TransitionError::GuardFailed(_)));

        assert!(sm
            .validate_transition(
                AgreementSent,
                AgreementSigned,
                Buyer,
                &e,
                GuardContext { agreement_fully_signed: true },
            )
            .is_ok());
    }

    #[test]
    fn test_onboarding_guard_requires_all_three_flags() {
        let sm = StateMachine::new();
        let mut e = engagement(Onboarding);
        e.insurance_uploaded = true;
        e.company_docs_uploaded = true;
        // payment method still missing
        assert!(sm
            .validate_transition(Onboarding, Active, System, &e, GuardContext::default())
            .is_err());

        e.payment_method_added = true;
        assert!(sm
            .validate_transition(Onboarding, Active, System, &e, GuardContext::default())
            .is_ok());
    }

    #[test]
    fn test_tour_reschedule_is_the_only_revisit() {
        let sm = StateMachine::new();
        let e = engagement(TourRescheduled);
        assert!(sm
            .validate_transition(TourRescheduled, TourRescheduled, Buyer, &e, GuardContext::default())
            .is_ok());
        // No other self-loop exists in the table
        for (from, target, _) in TRANSITIONS {
            if from == target {
                assert_eq!(*from, TourRescheduled);
            }
        }
    }

    #[test]
    fn test_allowed_transitions_by_actor() {
        let sm = StateMachine::new();
        let buyer_moves = sm.allowed_transitions(AddressRevealed, Buyer);
        assert!(buyer_moves.contains(&TourRequested));
        assert!(buyer_moves.contains(&InstantBookRequested));
        assert!(buyer_moves.contains(&DeclinedByBuyer));
        assert!(!buyer_moves.contains(&Expired));

        let supplier_moves = sm.allowed_transitions(TourRequested, Supplier);
        assert!(supplier_moves.contains(&TourConfirmed));
        assert!(supplier_moves.contains(&DeclinedBySupplier));

        let admin_moves = sm.allowed_transitions(Active, Admin);
        assert!(admin_moves.contains(&Completed));
        assert!(admin_moves.contains(&Cancelled));
    }

    #[test]
    fn test_guarantee_flow_edges_exist() {
        let sm = StateMachine::new();
        let e = engagement(GuaranteeSigned);
        assert!(sm
            .validate_transition(GuaranteeSigned, AddressRevealed, System, &e, GuardContext::default())
            .is_ok());
        // Buyer cannot force the reveal — it is a system step
        assert!(sm
            .validate_transition(GuaranteeSigned, AddressRevealed, Buyer, &e, GuardContext::default())
            .is_err());
    }
}
