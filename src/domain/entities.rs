//! Entity structs mirroring the SQLite tables.
//!
//! Timestamps are stored as RFC 3339 TEXT, calendar dates as ISO `YYYY-MM-DD`
//! TEXT, and open-ended data (requirements, event payloads, scoring
//! breakdowns) as JSON TEXT columns.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::enums::*;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Company {
    pub id: String,
    pub name: String,
    pub company_type: String, // individual | business
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub name: String,
    pub phone: Option<String>,
    pub role: String, // buyer | supplier | admin
    pub is_active: bool,
    pub company_id: Option<String>,
    pub company_role: Option<String>, // admin | member
    pub created_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Buyer {
    pub id: String,
    pub name: Option<String>,
    pub company: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Physical warehouse building. Identity immutable; authorization always
/// goes through `company_id` — `created_by` is audit only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Warehouse {
    pub id: String,
    pub company_id: Option<String>,
    pub created_by: Option<String>,
    pub owner_name: Option<String>,
    pub owner_email: Option<String>,
    pub owner_phone: Option<String>,
    pub address: String,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip: Option<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub neighborhood: Option<String>,
    pub building_size_sqft: Option<i64>,
    pub year_built: Option<i64>,
    pub construction_type: Option<String>,
    pub property_type: Option<String>,
    pub primary_image_url: Option<String>,
    pub description: Option<String>,
    pub supplier_status: SupplierStatus,
    pub onboarded_at: Option<DateTime<Utc>>,
    pub last_outreach_at: Option<DateTime<Utc>>,
    pub outreach_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Mutable listing parameters, 1:1 with a warehouse once activated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TruthCore {
    pub id: String,
    pub warehouse_id: String,
    pub min_sqft: Option<i64>,
    pub max_sqft: Option<i64>,
    pub activity_tier: Option<String>,
    pub available_from: Option<NaiveDate>,
    pub available_to: Option<NaiveDate>,
    pub min_term_months: i64,
    pub max_term_months: i64,
    pub supplier_rate_per_sqft: f64,
    pub buyer_rate_per_sqft: Option<f64>,
    pub activation_status: String, // on | off
    pub toggled_at: Option<DateTime<Utc>>,
    pub toggle_reason: Option<String>,
    pub tour_readiness: String,
    pub dock_doors_receiving: i64,
    pub dock_doors_shipping: i64,
    pub drive_in_bays: i64,
    pub parking_spaces: i64,
    pub clear_height_ft: Option<f64>,
    pub has_office_space: bool,
    pub has_sprinkler: bool,
    pub power_supply: Option<String>,
    pub trust_level: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// AI-curated memory fragment attached to a warehouse.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextualMemory {
    pub id: String,
    pub warehouse_id: String,
    pub memory_type: String,
    pub content: String,
    pub source: String,
    pub confidence: f64,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuyerNeed {
    pub id: String,
    pub buyer_id: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub radius_miles: f64,
    pub min_sqft: Option<i64>,
    pub max_sqft: Option<i64>,
    pub use_type: Option<String>,
    pub needed_from: Option<NaiveDate>,
    pub duration_months: Option<i64>,
    pub max_budget_per_sqft: Option<f64>,
    pub requirements: Value,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// Scored (BuyerNeed x Warehouse) pair. `match_score` is always in [0, 100].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Match {
    pub id: String,
    pub buyer_need_id: String,
    pub warehouse_id: String,
    pub match_score: f64,
    pub confidence: f64,
    pub instant_book_eligible: bool,
    pub reasoning: String,
    pub scoring_breakdown: Value,
    pub status: MatchStatus,
    pub created_at: DateTime<Utc>,
}

/// 5-factor instant-book sub-score row persisted alongside each match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstantBookScore {
    pub id: String,
    pub match_id: String,
    pub truth_core_completeness: i64,
    pub contextual_memory_depth: i64,
    pub supplier_trust_level: i64,
    pub match_specificity: i64,
    pub feature_alignment: i64,
    pub composite_score: i64,
    pub instant_book_eligible: bool,
    pub threshold_used: i64,
    pub created_at: DateTime<Utc>,
}

/// Central lifecycle object from deal ping through active lease.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Engagement {
    pub id: String,
    pub warehouse_id: String,
    pub buyer_need_id: String,
    pub buyer_id: Option<String>,
    /// Audit only — records who actioned the deal ping. Authorization goes
    /// through the warehouse's company.
    pub supplier_id: String,
    pub status: EngagementStatus,
    pub tier: EngagementTier,
    pub path: Option<EngagementPath>,

    pub match_score: Option<f64>,
    pub match_rank: Option<i64>,

    pub supplier_rate_sqft: Option<f64>,
    pub buyer_rate_sqft: Option<f64>,
    pub monthly_supplier_payout: Option<f64>,
    pub monthly_buyer_total: Option<f64>,
    pub sqft: Option<i64>,

    pub deal_ping_sent_at: Option<DateTime<Utc>>,
    pub deal_ping_expires_at: Option<DateTime<Utc>>,
    pub deal_ping_responded_at: Option<DateTime<Utc>>,

    pub supplier_terms_accepted: bool,

    pub buyer_email: Option<String>,
    pub buyer_phone: Option<String>,
    pub buyer_company_name: Option<String>,
    pub account_created_at: Option<DateTime<Utc>>,

    pub guarantee_signed_at: Option<DateTime<Utc>>,
    pub guarantee_ip_address: Option<String>,

    pub tour_requested_at: Option<DateTime<Utc>>,
    pub tour_requested_date: Option<NaiveDate>,
    pub tour_requested_time: Option<String>,
    pub tour_confirmed_at: Option<DateTime<Utc>>,
    pub tour_scheduled_date: Option<DateTime<Utc>>,
    pub tour_completed_at: Option<DateTime<Utc>>,
    pub tour_reschedule_count: i64,
    pub tour_rescheduled_by: Option<String>,

    pub instant_book_requested_at: Option<DateTime<Utc>>,
    pub instant_book_confirmed_at: Option<DateTime<Utc>>,

    pub agreement_sent_at: Option<DateTime<Utc>>,
    pub agreement_signed_at: Option<DateTime<Utc>>,

    pub onboarding_started_at: Option<DateTime<Utc>>,
    pub onboarding_completed_at: Option<DateTime<Utc>>,
    pub insurance_uploaded: bool,
    pub company_docs_uploaded: bool,
    pub payment_method_added: bool,

    pub term_months: Option<i64>,
    pub lease_start_date: Option<NaiveDate>,
    pub lease_end_date: Option<NaiveDate>,

    pub declined_by: Option<String>,
    pub decline_reason: Option<String>,
    pub declined_at: Option<DateTime<Utc>>,

    pub cancelled_by: Option<String>,
    pub cancel_reason: Option<String>,
    pub cancelled_at: Option<DateTime<Utc>>,

    pub admin_flagged: bool,
    pub admin_flag_reason: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Append-only audit record. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngagementEvent {
    pub id: String,
    pub engagement_id: String,
    pub event_type: String,
    pub actor: String,
    pub actor_id: Option<String>,
    pub from_status: Option<String>,
    pub to_status: Option<String>,
    pub data: Option<Value>,
    pub created_at: DateTime<Utc>,
}

/// Per-engagement lease agreement with a dual-sign workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngagementAgreement {
    pub id: String,
    pub engagement_id: String,
    pub version: i64,
    pub status: String, // pending | partially_signed | signed | expired
    pub terms_text: String,
    pub buyer_rate_sqft: Option<f64>,
    pub supplier_rate_sqft: Option<f64>,
    pub monthly_buyer_total: Option<f64>,
    pub monthly_supplier_payout: Option<f64>,
    pub sent_at: DateTime<Utc>,
    pub buyer_signed_at: Option<DateTime<Utc>>,
    pub supplier_signed_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl EngagementAgreement {
    pub fn fully_signed(&self) -> bool {
        self.buyer_signed_at.is_some() && self.supplier_signed_at.is_some()
    }
}

/// One payment record per engagement per billing period.
/// Invariant: `wex_amount = buyer_amount - supplier_amount`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub id: String,
    pub engagement_id: String,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub buyer_amount: f64,
    pub supplier_amount: f64,
    pub wex_amount: f64,
    pub buyer_status: String,    // upcoming | invoiced | paid
    pub supplier_status: String, // upcoming | scheduled | deposited
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyQuestion {
    pub id: String,
    pub engagement_id: String,
    pub warehouse_id: String,
    pub question_text: String,
    pub field_key: Option<String>,
    pub status: QuestionStatus,
    pub supplier_answer: Option<String>,
    pub final_answer: Option<String>,
    pub final_answer_source: Option<String>,
    pub routed_to_supplier_at: Option<DateTime<Utc>>,
    pub supplier_deadline_at: Option<DateTime<Utc>>,
    pub timer_paused_at: Option<DateTime<Utc>>,
    pub timer_resumed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyKnowledgeEntry {
    pub id: String,
    pub warehouse_id: String,
    pub question: String,
    pub answer: String,
    pub source: String,
    pub source_question_id: Option<String>,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
}

/// Per-phone SMS conversation record. One writer per phone at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmsConversation {
    pub id: String,
    pub phone: String,
    pub phase: ConversationPhase,
    pub turn: i64,
    pub criteria_snapshot: Value,
    pub presented_match_ids: Vec<String>,
    pub focused_match_id: Option<String>,
    pub renter_first_name: Option<String>,
    pub renter_last_name: Option<String>,
    pub buyer_email: Option<String>,
    pub buyer_need_id: Option<String>,
    pub engagement_id: Option<String>,
    pub guarantee_link_token: Option<String>,
    pub search_session_token: Option<String>,
    pub name_status: String, // unknown | first_only | full
    pub name_requested_at_turn: Option<i64>,
    pub criteria_readiness: f64,
    pub next_reengagement_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Opaque capability binding one off-network warehouse to one buyer need.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlaToken {
    pub id: String,
    pub token: String,
    pub warehouse_id: String,
    pub buyer_need_id: String,
    pub suggested_rate: Option<f64>,
    pub supplier_rate: Option<f64>,
    pub rate_accepted: Option<bool>,
    pub status: DlaStatus,
    pub expires_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
    pub outreach_channel: String,
    pub agreement_ref: Option<String>,
    pub decline_reason: Option<String>,
    pub last_step_reached: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Cached NNN lease rate range per zipcode (30-day TTL).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketRate {
    pub zipcode: String,
    pub nnn_low: f64,
    pub nnn_high: f64,
    pub source_context: String,
    pub fetched_at: DateTime<Utc>,
}

/// Anonymous buyer search session — requirements + cached results before
/// the buyer registers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSession {
    pub id: String,
    pub token: String,
    pub requirements: Value,
    pub results: Value,
    pub buyer_need_id: Option<String>,
    pub status: String, // active | promoted | expired
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Tokenized single-use upload access (1 h TTL).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadToken {
    pub token: String,
    pub warehouse_id: String,
    pub expires_at: DateTime<Utc>,
    pub is_used: bool,
    pub created_at: DateTime<Utc>,
}

/// Audit row for activation toggles, including the 48-hour grace window and
/// the in-flight match count at toggle time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToggleHistory {
    pub id: String,
    pub warehouse_id: String,
    pub previous_status: String,
    pub new_status: String,
    pub reason: Option<String>,
    pub in_flight_matches: i64,
    pub grace_period_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Network agreement created when a supplier activates a warehouse.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupplierAgreement {
    pub id: String,
    pub warehouse_id: String,
    pub truth_core_id: String,
    pub agreement_type: String,
    pub agreement_version: String,
    pub status: String,
    pub terms: Value,
    pub signed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}
