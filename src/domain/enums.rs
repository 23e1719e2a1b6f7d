//! Status enums shared across the clearing engine, engagement lifecycle,
//! DLA flow, and SMS orchestrator. Stored as snake_case strings in SQLite.

use serde::{Deserialize, Serialize};

/// Where a warehouse sits in the supplier funnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupplierStatus {
    ThirdParty,
    EarncheckOnly,
    Interested,
    InNetwork,
    Declined,
    Unresponsive,
}

impl SupplierStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SupplierStatus::ThirdParty => "third_party",
            SupplierStatus::EarncheckOnly => "earncheck_only",
            SupplierStatus::Interested => "interested",
            SupplierStatus::InNetwork => "in_network",
            SupplierStatus::Declined => "declined",
            SupplierStatus::Unresponsive => "unresponsive",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "third_party" => Some(SupplierStatus::ThirdParty),
            "earncheck_only" => Some(SupplierStatus::EarncheckOnly),
            "interested" => Some(SupplierStatus::Interested),
            "in_network" => Some(SupplierStatus::InNetwork),
            "declined" => Some(SupplierStatus::Declined),
            "unresponsive" => Some(SupplierStatus::Unresponsive),
            _ => None,
        }
    }

    /// Off-network statuses eligible for Tier 2 / DLA outreach.
    pub fn is_tier2(&self) -> bool {
        matches!(
            self,
            SupplierStatus::ThirdParty | SupplierStatus::EarncheckOnly | SupplierStatus::Interested
        )
    }
}

/// Engagement lifecycle status. Terminal states are never left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngagementStatus {
    DealPingSent,
    DealPingAccepted,
    DealPingDeclined,
    DealPingExpired,
    Matched,
    BuyerReviewing,
    BuyerAccepted,
    ContactCaptured,
    AccountCreated,
    GuaranteeSigned,
    AddressRevealed,
    TourRequested,
    TourConfirmed,
    TourRescheduled,
    TourCompleted,
    InstantBookRequested,
    InstantBookConfirmed,
    BuyerConfirmed,
    AgreementSent,
    AgreementSigned,
    Onboarding,
    Active,
    Completed,
    DeclinedByBuyer,
    DeclinedBySupplier,
    Expired,
    Cancelled,
}

impl EngagementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngagementStatus::DealPingSent => "deal_ping_sent",
            EngagementStatus::DealPingAccepted => "deal_ping_accepted",
            EngagementStatus::DealPingDeclined => "deal_ping_declined",
            EngagementStatus::DealPingExpired => "deal_ping_expired",
            EngagementStatus::Matched => "matched",
            EngagementStatus::BuyerReviewing => "buyer_reviewing",
            EngagementStatus::BuyerAccepted => "buyer_accepted",
            EngagementStatus::ContactCaptured => "contact_captured",
            EngagementStatus::AccountCreated => "account_created",
            EngagementStatus::GuaranteeSigned => "guarantee_signed",
            EngagementStatus::AddressRevealed => "address_revealed",
            EngagementStatus::TourRequested => "tour_requested",
            EngagementStatus::TourConfirmed => "tour_confirmed",
            EngagementStatus::TourRescheduled => "tour_rescheduled",
            EngagementStatus::TourCompleted => "tour_completed",
            EngagementStatus::InstantBookRequested => "instant_book_requested",
            EngagementStatus::InstantBookConfirmed => "instant_book_confirmed",
            EngagementStatus::BuyerConfirmed => "buyer_confirmed",
            EngagementStatus::AgreementSent => "agreement_sent",
            EngagementStatus::AgreementSigned => "agreement_signed",
            EngagementStatus::Onboarding => "onboarding",
            EngagementStatus::Active => "active",
            EngagementStatus::Completed => "completed",
            EngagementStatus::DeclinedByBuyer => "declined_by_buyer",
            EngagementStatus::DeclinedBySupplier => "declined_by_supplier",
            EngagementStatus::Expired => "expired",
            EngagementStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "deal_ping_sent" => EngagementStatus::DealPingSent,
            "deal_ping_accepted" => EngagementStatus::DealPingAccepted,
            "deal_ping_declined" => EngagementStatus::DealPingDeclined,
            "deal_ping_expired" => EngagementStatus::DealPingExpired,
            "matched" => EngagementStatus::Matched,
            "buyer_reviewing" => EngagementStatus::BuyerReviewing,
            "buyer_accepted" => EngagementStatus::BuyerAccepted,
            "contact_captured" => EngagementStatus::ContactCaptured,
            "account_created" => EngagementStatus::AccountCreated,
            "guarantee_signed" => EngagementStatus::GuaranteeSigned,
            "address_revealed" => EngagementStatus::AddressRevealed,
            "tour_requested" => EngagementStatus::TourRequested,
            "tour_confirmed" => EngagementStatus::TourConfirmed,
            "tour_rescheduled" => EngagementStatus::TourRescheduled,
            "tour_completed" => EngagementStatus::TourCompleted,
            "instant_book_requested" => EngagementStatus::InstantBookRequested,
            "instant_book_confirmed" => EngagementStatus::InstantBookConfirmed,
            "buyer_confirmed" => EngagementStatus::BuyerConfirmed,
            "agreement_sent" => EngagementStatus::AgreementSent,
            "agreement_signed" => EngagementStatus::AgreementSigned,
            "onboarding" => EngagementStatus::Onboarding,
            "active" => EngagementStatus::Active,
            "completed" => EngagementStatus::Completed,
            "declined_by_buyer" => EngagementStatus::DeclinedByBuyer,
            "declined_by_supplier" => EngagementStatus::DeclinedBySupplier,
            "expired" => EngagementStatus::Expired,
            "cancelled" => EngagementStatus::Cancelled,
            _ => return None,
        })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EngagementStatus::DealPingDeclined
                | EngagementStatus::DealPingExpired
                | EngagementStatus::DeclinedByBuyer
                | EngagementStatus::DeclinedBySupplier
                | EngagementStatus::Expired
                | EngagementStatus::Cancelled
                | EngagementStatus::Completed
        )
    }
}

/// Who issued an engagement command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngagementActor {
    Buyer,
    Supplier,
    System,
    Admin,
}

impl EngagementActor {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngagementActor::Buyer => "buyer",
            EngagementActor::Supplier => "supplier",
            EngagementActor::System => "system",
            EngagementActor::Admin => "admin",
        }
    }

    pub fn from_role(role: &str) -> Self {
        match role {
            "supplier" => EngagementActor::Supplier,
            "admin" | "broker" => EngagementActor::Admin,
            _ => EngagementActor::Buyer,
        }
    }
}

/// Audit event types. Transition events mirror their target status; the
/// rest are side-channel events written by services and background jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngagementEventType {
    DealPingSent,
    DealPingAccepted,
    DealPingDeclined,
    DealPingExpired,
    Matched,
    BuyerReviewing,
    BuyerAccepted,
    ContactCaptured,
    AccountCreated,
    GuaranteeSigned,
    AddressRevealed,
    TourRequested,
    TourConfirmed,
    TourRescheduled,
    TourCompleted,
    InstantBookRequested,
    InstantBookConfirmed,
    BuyerConfirmed,
    AgreementSent,
    AgreementPartiallySigned,
    AgreementSigned,
    OnboardingStarted,
    LeaseActivated,
    Completed,
    DeclinedByBuyer,
    DeclinedBySupplier,
    Expired,
    Cancelled,
    ReminderSent,
    PaymentRecorded,
    QuestionAnswered,
    AdminNote,
}

impl EngagementEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngagementEventType::DealPingSent => "deal_ping_sent",
            EngagementEventType::DealPingAccepted => "deal_ping_accepted",
            EngagementEventType::DealPingDeclined => "deal_ping_declined",
            EngagementEventType::DealPingExpired => "deal_ping_expired",
            EngagementEventType::Matched => "matched",
            EngagementEventType::BuyerReviewing => "buyer_reviewing",
            EngagementEventType::BuyerAccepted => "buyer_accepted",
            EngagementEventType::ContactCaptured => "contact_captured",
            EngagementEventType::AccountCreated => "account_created",
            EngagementEventType::GuaranteeSigned => "guarantee_signed",
            EngagementEventType::AddressRevealed => "address_revealed",
            EngagementEventType::TourRequested => "tour_requested",
            EngagementEventType::TourConfirmed => "tour_confirmed",
            EngagementEventType::TourRescheduled => "tour_rescheduled",
            EngagementEventType::TourCompleted => "tour_completed",
            EngagementEventType::InstantBookRequested => "instant_book_requested",
            EngagementEventType::InstantBookConfirmed => "instant_book_confirmed",
            EngagementEventType::BuyerConfirmed => "buyer_confirmed",
            EngagementEventType::AgreementSent => "agreement_sent",
            EngagementEventType::AgreementPartiallySigned => "agreement_partially_signed",
            EngagementEventType::AgreementSigned => "agreement_signed",
            EngagementEventType::OnboardingStarted => "onboarding_started",
            EngagementEventType::LeaseActivated => "lease_activated",
            EngagementEventType::Completed => "completed",
            EngagementEventType::DeclinedByBuyer => "declined_by_buyer",
            EngagementEventType::DeclinedBySupplier => "declined_by_supplier",
            EngagementEventType::Expired => "expired",
            EngagementEventType::Cancelled => "cancelled",
            EngagementEventType::ReminderSent => "reminder_sent",
            EngagementEventType::PaymentRecorded => "payment_recorded",
            EngagementEventType::QuestionAnswered => "question_answered",
            EngagementEventType::AdminNote => "admin_note",
        }
    }

    /// Default transition event for a given target status.
    pub fn for_target(target: EngagementStatus) -> Self {
        match target {
            EngagementStatus::DealPingSent => EngagementEventType::DealPingSent,
            EngagementStatus::DealPingAccepted => EngagementEventType::DealPingAccepted,
            EngagementStatus::DealPingDeclined => EngagementEventType::DealPingDeclined,
            EngagementStatus::DealPingExpired => EngagementEventType::DealPingExpired,
            EngagementStatus::Matched => EngagementEventType::Matched,
            EngagementStatus::BuyerReviewing => EngagementEventType::BuyerReviewing,
            EngagementStatus::BuyerAccepted => EngagementEventType::BuyerAccepted,
            EngagementStatus::ContactCaptured => EngagementEventType::ContactCaptured,
            EngagementStatus::AccountCreated => EngagementEventType::AccountCreated,
            EngagementStatus::GuaranteeSigned => EngagementEventType::GuaranteeSigned,
            EngagementStatus::AddressRevealed => EngagementEventType::AddressRevealed,
            EngagementStatus::TourRequested => EngagementEventType::TourRequested,
            EngagementStatus::TourConfirmed => EngagementEventType::TourConfirmed,
            EngagementStatus::TourRescheduled => EngagementEventType::TourRescheduled,
            EngagementStatus::TourCompleted => EngagementEventType::TourCompleted,
            EngagementStatus::InstantBookRequested => EngagementEventType::InstantBookRequested,
            EngagementStatus::InstantBookConfirmed => EngagementEventType::InstantBookConfirmed,
            EngagementStatus::BuyerConfirmed => EngagementEventType::BuyerConfirmed,
            EngagementStatus::AgreementSent => EngagementEventType::AgreementSent,
            EngagementStatus::AgreementSigned => EngagementEventType::AgreementSigned,
            EngagementStatus::Onboarding => EngagementEventType::OnboardingStarted,
            EngagementStatus::Active => EngagementEventType::LeaseActivated,
            EngagementStatus::Completed => EngagementEventType::Completed,
            EngagementStatus::DeclinedByBuyer => EngagementEventType::DeclinedByBuyer,
            EngagementStatus::DeclinedBySupplier => EngagementEventType::DeclinedBySupplier,
            EngagementStatus::Expired => EngagementEventType::Expired,
            EngagementStatus::Cancelled => EngagementEventType::Cancelled,
        }
    }
}

/// Tier the engagement was sourced from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngagementTier {
    Tier1,
    Tier2,
}

impl EngagementTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngagementTier::Tier1 => "tier1",
            EngagementTier::Tier2 => "tier2",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "tier1" => Some(EngagementTier::Tier1),
            "tier2" => Some(EngagementTier::Tier2),
            _ => None,
        }
    }
}

/// Path the buyer chose after accepting a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngagementPath {
    Tour,
    InstantBook,
}

impl EngagementPath {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngagementPath::Tour => "tour",
            EngagementPath::InstantBook => "instant_book",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "tour" => Some(EngagementPath::Tour),
            "instant_book" => Some(EngagementPath::InstantBook),
            _ => None,
        }
    }
}

/// Match presentation status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Pending,
    Presented,
    Accepted,
    Declined,
}

impl MatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStatus::Pending => "pending",
            MatchStatus::Presented => "presented",
            MatchStatus::Accepted => "accepted",
            MatchStatus::Declined => "declined",
        }
    }
}

/// DLA token lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DlaStatus {
    Pending,
    Interested,
    RateDecided,
    Confirmed,
    Declined,
    Expired,
    NoResponse,
    DroppedOff,
}

impl DlaStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DlaStatus::Pending => "pending",
            DlaStatus::Interested => "interested",
            DlaStatus::RateDecided => "rate_decided",
            DlaStatus::Confirmed => "confirmed",
            DlaStatus::Declined => "declined",
            DlaStatus::Expired => "expired",
            DlaStatus::NoResponse => "no_response",
            DlaStatus::DroppedOff => "dropped_off",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(DlaStatus::Pending),
            "interested" => Some(DlaStatus::Interested),
            "rate_decided" => Some(DlaStatus::RateDecided),
            "confirmed" => Some(DlaStatus::Confirmed),
            "declined" => Some(DlaStatus::Declined),
            "expired" => Some(DlaStatus::Expired),
            "no_response" => Some(DlaStatus::NoResponse),
            "dropped_off" => Some(DlaStatus::DroppedOff),
            _ => None,
        }
    }
}

/// Per-phone SMS conversation phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConversationPhase {
    Intake,
    Qualifying,
    Presenting,
    PropertyFocused,
    AwaitingAnswer,
    CollectingInfo,
    Commitment,
    GuaranteePending,
    TourScheduling,
}

impl ConversationPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationPhase::Intake => "INTAKE",
            ConversationPhase::Qualifying => "QUALIFYING",
            ConversationPhase::Presenting => "PRESENTING",
            ConversationPhase::PropertyFocused => "PROPERTY_FOCUSED",
            ConversationPhase::AwaitingAnswer => "AWAITING_ANSWER",
            ConversationPhase::CollectingInfo => "COLLECTING_INFO",
            ConversationPhase::Commitment => "COMMITMENT",
            ConversationPhase::GuaranteePending => "GUARANTEE_PENDING",
            ConversationPhase::TourScheduling => "TOUR_SCHEDULING",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "INTAKE" => Some(ConversationPhase::Intake),
            "QUALIFYING" => Some(ConversationPhase::Qualifying),
            "PRESENTING" => Some(ConversationPhase::Presenting),
            "PROPERTY_FOCUSED" => Some(ConversationPhase::PropertyFocused),
            "AWAITING_ANSWER" => Some(ConversationPhase::AwaitingAnswer),
            "COLLECTING_INFO" => Some(ConversationPhase::CollectingInfo),
            "COMMITMENT" => Some(ConversationPhase::Commitment),
            "GUARANTEE_PENDING" => Some(ConversationPhase::GuaranteePending),
            "TOUR_SCHEDULING" => Some(ConversationPhase::TourScheduling),
            _ => None,
        }
    }
}

/// Buyer-to-supplier Q&A escalation status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionStatus {
    Submitted,
    RoutedToSupplier,
    Answered,
    Expired,
}

impl QuestionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionStatus::Submitted => "submitted",
            QuestionStatus::RoutedToSupplier => "routed_to_supplier",
            QuestionStatus::Answered => "answered",
            QuestionStatus::Expired => "expired",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "submitted" => Some(QuestionStatus::Submitted),
            "routed_to_supplier" => Some(QuestionStatus::RoutedToSupplier),
            "answered" => Some(QuestionStatus::Answered),
            "expired" => Some(QuestionStatus::Expired),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_string_round_trip() {
        let all = [
            EngagementStatus::DealPingSent,
            EngagementStatus::TourRescheduled,
            EngagementStatus::AgreementSigned,
            EngagementStatus::Active,
            EngagementStatus::Cancelled,
        ];
        for s in all {
            assert_eq!(EngagementStatus::from_str(s.as_str()), Some(s));
        }
        assert_eq!(EngagementStatus::from_str("bogus"), None);
    }

    #[test]
    fn test_terminal_states() {
        assert!(EngagementStatus::Completed.is_terminal());
        assert!(EngagementStatus::Cancelled.is_terminal());
        assert!(EngagementStatus::DealPingExpired.is_terminal());
        assert!(!EngagementStatus::Active.is_terminal());
        assert!(!EngagementStatus::DealPingSent.is_terminal());
    }

    #[test]
    fn test_tier2_statuses() {
        assert!(SupplierStatus::ThirdParty.is_tier2());
        assert!(SupplierStatus::EarncheckOnly.is_tier2());
        assert!(SupplierStatus::Interested.is_tier2());
        assert!(!SupplierStatus::InNetwork.is_tier2());
        assert!(!SupplierStatus::Declined.is_tier2());
    }

    #[test]
    fn test_actor_from_role() {
        assert_eq!(EngagementActor::from_role("supplier"), EngagementActor::Supplier);
        assert_eq!(EngagementActor::from_role("admin"), EngagementActor::Admin);
        assert_eq!(EngagementActor::from_role("broker"), EngagementActor::Admin);
        assert_eq!(EngagementActor::from_role("buyer"), EngagementActor::Buyer);
    }
}
