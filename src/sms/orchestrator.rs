//! The per-message SMS pipeline.
//!
//! Steps: inbound gate, deterministic interpretation, property reference
//! resolution, LLM criteria planning with deterministic overrides,
//! readiness scoring, tool execution (search / lookup / commitment / tour),
//! LLM reply generation, the gatekeeper-polisher retry loop, and the state
//! update with the phase-keyed re-engagement timer.

use anyhow::Result;
use chrono::{Duration, Months, Utc};
use rand::RngCore;
use serde_json::{json, Map, Value};
use tracing::{info, warn};
use uuid::Uuid;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;

use crate::api::error::ApiError;
use crate::clearing::engine::ClearingEngine;
use crate::clearing::store as clearing_store;
use crate::db::{ts, Db};
use crate::domain::*;
use crate::engagement::EngagementService;
use crate::geocode::GeocodeClient;
use crate::llm::LlmClient;
use crate::sms::agents::{CriteriaAgent, PolisherAgent, ReplyContext, ResponseAgent};
use crate::sms::contracts::{CriteriaPlan, MessageInterpretation};
use crate::sms::context::build_match_summaries;
use crate::sms::detail_fetcher::DetailFetcher;
use crate::sms::fallback::get_fallback;
use crate::sms::gatekeeper::{trim_to_limit, validate_inbound, validate_outbound};
use crate::sms::interpreter::{field_keys_for_topics, interpret_message};
use crate::sms::store::{self, PhoneLocks};

const GATEKEEPER_MAX_ATTEMPTS: usize = 3;
const SEARCH_SESSION_TTL_HOURS: i64 = 48;

/// Physical facility keywords that mark the requirements question answered
/// with specifics.
const FACILITY_KEYWORDS: &[&str] = &[
    "office", "parking", "dock", "clear height", "climate", "sprinkler", "power",
    "drive-in", "loading", "hvac", "insulated", "heated", "cooled", "refrigerated",
    "freezer", "yard", "fenced", "security", "24/7", "rail", "ev charging", "ramp",
    "floor", "ceiling", "restroom", "bathroom", "ac ", "a/c", "air condition",
];

/// Negative answers to the deal-breaker question.
const NO_REQUIREMENTS_PATTERNS: &[&str] = &[
    "no", "nope", "nah", "none", "nothing", "n/a", "na", "not really",
    "no requirements", "no deal breakers", "no dealbreakers", "no deal-breakers",
    "nothing special", "i'm good", "im good", "all good", "that's it", "thats it",
    "no specifics", "no specific requirements", "no must haves", "no must-haves",
    "no thanks", "none needed",
];

const RE_PRESENT_WORDS: &[&str] = &["other", "options", "what else", "show me", "back", "alternatives", "list", "all"];

/// Phase-keyed stall rules: hours until the first re-engagement nudge.
const STALL_RULES: &[(ConversationPhase, i64)] = &[
    (ConversationPhase::Intake, 24),
    (ConversationPhase::Qualifying, 4),
    (ConversationPhase::Presenting, 24),
    (ConversationPhase::PropertyFocused, 24),
    (ConversationPhase::AwaitingAnswer, 24),
    (ConversationPhase::CollectingInfo, 12),
    (ConversationPhase::Commitment, 6),
    (ConversationPhase::GuaranteePending, 24),
    (ConversationPhase::TourScheduling, 24),
];

#[derive(Debug, Clone)]
pub struct OrchestratorResult {
    pub response: String,
    pub intent: String,
    pub action: Option<String>,
    pub criteria: Option<Map<String, Value>>,
    pub phase: ConversationPhase,
    pub error: Option<String>,
}

pub struct SmsOrchestrator {
    db: Db,
    llm: LlmClient,
    geocode: GeocodeClient,
    clearing: ClearingEngine,
    engagements: EngagementService,
    locks: PhoneLocks,
    frontend_url: String,
}

fn requirements_resolved(value: Option<&Value>) -> bool {
    let Some(Value::String(s)) = value else {
        return false;
    };
    let lower = s.to_lowercase();
    let trimmed = lower.trim();
    if NO_REQUIREMENTS_PATTERNS.contains(&trimmed) {
        return true;
    }
    FACILITY_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

fn url_safe_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

impl SmsOrchestrator {
    pub fn new(db: Db, llm: LlmClient, geocode: GeocodeClient, frontend_url: String) -> Self {
        Self {
            clearing: ClearingEngine::new(db.clone(), llm.clone()),
            engagements: EngagementService::new(db.clone()),
            db,
            llm,
            geocode,
            locks: PhoneLocks::new(),
            frontend_url,
        }
    }

    /// Process one inbound buyer SMS end to end, serialized per phone.
    pub async fn process_message(&self, phone: &str, message: &str) -> Result<OrchestratorResult, ApiError> {
        let lock = self.locks.for_phone(phone);
        let _guard = lock.lock().await;

        // == Inbound gate ==
        let gate = validate_inbound(message);
        if !gate.ok {
            warn!(phone, violation = ?gate.violation, "Inbound rejected");
            return Ok(OrchestratorResult {
                response: String::new(),
                intent: "unknown".into(),
                action: None,
                criteria: None,
                phase: ConversationPhase::Intake,
                error: gate.hint,
            });
        }

        // == Load conversation state + history ==
        let (mut state, history) = {
            let conn = self.db.lock().await;
            let mut state = store::load_or_create(&conn, phone).map_err(ApiError::internal)?;
            state.turn += 1;
            let history = load_history(&conn, phone).map_err(ApiError::internal)?;
            record_message(&conn, phone, "buyer", message).map_err(ApiError::internal)?;
            (state, history)
        };
        let is_first = state.turn <= 1;
        let existing_criteria = state
            .criteria_snapshot
            .as_object()
            .cloned()
            .unwrap_or_default();

        // == Deterministic interpretation ==
        let interpretation = interpret_message(message);

        // == Property reference resolution ==
        let mut resolved_property_id: Option<String> = None;
        if let Some(&n) = interpretation.positional_references.first() {
            if n >= 1 && n <= state.presented_match_ids.len() {
                resolved_property_id = Some(state.presented_match_ids[n - 1].clone());
            }
        }
        if resolved_property_id.is_none() {
            resolved_property_id = state.focused_match_id.clone();
        }

        let presented_summaries: Vec<Value> = existing_criteria
            .get("match_summaries")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        // == Re-present short-circuit ==
        let lower = message.to_lowercase();
        let wants_re_present = RE_PRESENT_WORDS
            .iter()
            .any(|w| crate::sms::interpreter::contains_word(&lower, w) || (w.contains(' ') && lower.contains(w)));
        if wants_re_present
            && matches!(state.phase, ConversationPhase::Presenting | ConversationPhase::PropertyFocused)
            && !presented_summaries.is_empty()
        {
            state.focused_match_id = None;
            state.phase = ConversationPhase::Presenting;
            let plan = CriteriaPlan {
                intent: "facility_info".into(),
                response_hint: Some(
                    "Here are the matches again. Summarize the top options briefly (city and rate only, never mention property sqft)."
                        .into(),
                ),
                ..Default::default()
            };
            let response = self
                .generate_and_gate(&plan, &state, message, None, None, &presented_summaries, &history, is_first, None)
                .await;
            self.persist_state(&mut state, None, None, phone, &response)
                .await?;
            return Ok(OrchestratorResult {
                response,
                intent: plan.intent,
                action: None,
                criteria: None,
                phase: state.phase,
                error: None,
            });
        }

        // == Criteria planner (LLM) with deterministic overrides ==
        let mut plan = CriteriaAgent::new(&self.llm)
            .plan(
                message,
                &interpretation,
                &history,
                state.phase.as_str(),
                &existing_criteria,
                resolved_property_id.as_deref(),
                &presented_summaries,
            )
            .await;

        if plan.intent == "greeting" && interpretation.has_search_data() {
            info!("Override: planner said greeting but interpreter found search data");
            plan.intent = "new_search".into();
            if plan.action.is_none() && (!interpretation.cities.is_empty() || interpretation.sqft.is_some()) {
                plan.action = Some("search".into());
            }
            if !interpretation.cities.is_empty() && !plan.criteria.contains_key("location") {
                let mut loc = interpretation.cities[0].clone();
                if let Some(st) = interpretation.states.first() {
                    loc = format!("{loc}, {st}");
                }
                plan.criteria.insert("location".into(), Value::String(loc));
            }
            if let Some(sqft) = interpretation.sqft {
                plan.criteria.entry("sqft".to_string()).or_insert(json!(sqft));
            }
        }

        // == Merge criteria + readiness ==
        let mut merged: Map<String, Value> = existing_criteria
            .iter()
            .filter(|(k, _)| *k != "match_summaries")
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (k, v) in &plan.criteria {
            if !v.is_null() {
                merged.insert(k.clone(), v.clone());
            }
        }

        // "No" to the deal-breaker question marks requirements answered
        let msg_norm = lower.trim().trim_end_matches(['.', '!', '?']).to_string();
        if NO_REQUIREMENTS_PATTERNS.contains(&msg_norm.as_str())
            && !requirements_resolved(merged.get("requirements"))
        {
            merged.insert("requirements".into(), Value::String("none".into()));
        }

        let mut readiness: f64 = 0.0;
        if merged.get("location").map(|v| !v.is_null()).unwrap_or(false) {
            readiness += 0.30;
        }
        if merged.get("sqft").map(|v| !v.is_null()).unwrap_or(false) {
            readiness += 0.25;
        }
        if merged.get("use_type").map(|v| !v.is_null()).unwrap_or(false) {
            readiness += 0.25;
        }
        for key in ["features", "goods_type", "timing", "duration", "requirements"] {
            let present = match key {
                "requirements" => requirements_resolved(merged.get(key)),
                _ => merged
                    .get(key)
                    .map(|v| !v.is_null() && v != &json!([]))
                    .unwrap_or(false),
            };
            if present {
                readiness += 0.10;
            }
        }
        readiness = readiness.min(1.0);
        state.criteria_readiness = readiness;
        let has_core_fields = readiness >= 0.8;

        // Qualifying questions still open — judged against what the buyer
        // gave in PRIOR turns so every question is actually asked once
        let prior = &existing_criteria;
        let mut extra_missing: Vec<&str> = Vec::new();
        if !requirements_resolved(prior.get("requirements")) && !requirements_resolved(merged.get("requirements")) {
            extra_missing.push("deal-breakers (office, parking, dock doors, climate control, 24/7 access)");
        }
        if prior.get("timing").is_none() && merged.get("timing").is_none() {
            extra_missing.push("when they need it");
        }
        if prior.get("duration").is_none() && merged.get("duration").is_none() {
            extra_missing.push("how many months they need the space");
        }

        let mut missing_core: Vec<&str> = Vec::new();
        if !merged.contains_key("location") {
            missing_core.push("city");
        }
        if !merged.contains_key("sqft") {
            missing_core.push("size");
        }
        if !merged.contains_key("use_type") {
            missing_core.push("what they'll use it for (storage, fulfillment, etc.)");
        }

        if matches!(plan.intent.as_str(), "new_search" | "refine_search") && !missing_core.is_empty() {
            if plan.response_hint.is_none() {
                plan.response_hint = Some(format!(
                    "Still need: {}. Ask naturally in one message.",
                    missing_core.join(", ")
                ));
            }
        }
        if let Some(clarification) = plan.clarification_needed.clone() {
            if plan.response_hint.is_none() {
                plan.response_hint = Some(clarification);
            }
        }

        // Backward phase movement: new criteria while presenting → re-search
        if plan.intent == "refine_search"
            && matches!(state.phase, ConversationPhase::Presenting | ConversationPhase::PropertyFocused)
            && readiness >= 0.8
        {
            plan.action = Some("search".into());
        }

        // == Tool execution ==
        let all_qualifying_done = has_core_fields && extra_missing.is_empty();
        let mut match_summaries = presented_summaries.clone();
        let mut property_data: Option<Value> = None;
        let mut phase = state.phase;

        let action = plan.action.clone().unwrap_or_default();

        if phase == ConversationPhase::Qualifying
            && !presented_summaries.is_empty()
            && all_qualifying_done
            && matches!(plan.intent.as_str(), "provide_info" | "new_search" | "refine_search")
            && action != "search"
        {
            // Cached matches from the earlier search — present them now
            phase = ConversationPhase::Presenting;
            plan.response_hint = Some(format!(
                "All qualifying info collected. Found {} matches. Tell the buyer how many you found and briefly summarize the top options (city, rate, and monthly estimate, never property sqft).",
                match_summaries.len()
            ));
        } else if action == "search" && all_qualifying_done {
            match self.run_search(&merged, phone, &mut state).await {
                Ok(Some(summaries)) if !summaries.is_empty() => {
                    plan.response_hint = Some(format!(
                        "Found {} options. Tell the buyer how many you found and briefly summarize the top options (city, rate, and monthly estimate, never property sqft).",
                        summaries.len()
                    ));
                    match_summaries = summaries;
                    phase = ConversationPhase::Presenting;
                }
                Ok(_) => {
                    phase = ConversationPhase::Qualifying;
                    plan.response_hint = Some(
                        "Search ran but found no matches. Tell the buyer nothing exact right now, but you're expanding the search and will text them when something opens up."
                            .into(),
                    );
                }
                Err(err) => {
                    warn!(error = %err, "SMS search failed");
                    phase = ConversationPhase::Qualifying;
                    plan.response_hint =
                        Some("The search hit a snag. Tell the buyer you're on it and will text back shortly.".into());
                }
            }
        } else if action == "search" && has_core_fields && !all_qualifying_done {
            // Core fields present, qualifying questions outstanding — hold
            plan.action = None;
            phase = ConversationPhase::Qualifying;
            plan.response_hint = Some(format!(
                "Good, got the basics. Still need to know: {}. Ask the remaining questions naturally in one message.",
                extra_missing.join(", ")
            ));
        } else if let ("lookup", Some(property_id)) = (action.as_str(), resolved_property_id.clone()) {
            let warehouse_id = self
                .warehouse_for_match(&property_id)
                .await?
                .unwrap_or_else(|| property_id.clone());

            let mut field_keys = field_keys_for_topics(&interpretation.topics);
            if let Some(asked) = &plan.asked_fields {
                for key in asked {
                    if !field_keys.contains(key) {
                        field_keys.push(key.clone());
                    }
                }
            }

            if !field_keys.is_empty() {
                let (answers, escalated) = self
                    .fetch_details(&warehouse_id, &field_keys, message, state.engagement_id.as_deref())
                    .await?;
                if !answers.is_empty() {
                    property_data = Some(json!({
                        "id": property_id,
                        "answers": answers,
                        "source": "detail_fetcher",
                    }));
                }
                if escalated {
                    phase = ConversationPhase::AwaitingAnswer;
                }
            } else {
                // General interest in the property, no specific fields
                property_data = match_summaries
                    .iter()
                    .find(|m| m["id"].as_str() == Some(property_id.as_str()))
                    .cloned();
            }

            state.focused_match_id = Some(property_id);
            if phase != ConversationPhase::AwaitingAnswer {
                phase = ConversationPhase::PropertyFocused;
            }
        } else if plan.intent == "greeting" {
            // Stay in the current phase
        } else if matches!(plan.intent.as_str(), "new_search" | "refine_search") && readiness < 0.6 {
            phase = ConversationPhase::Qualifying;
        }

        // Safety net: core fields present but extras missing always asks
        if has_core_fields && !extra_missing.is_empty() && action != "lookup" {
            phase = ConversationPhase::Qualifying;
            plan.response_hint = Some(format!(
                "Got the basics. Still need: {}. Ask naturally in one short message.",
                extra_missing.join(", ")
            ));
        }

        // == Commitment / info collection ==
        if let Some(email) = interpretation.emails.first() {
            state.buyer_email = Some(email.clone());
        }

        let in_commitment_flow = phase == ConversationPhase::CollectingInfo
            || plan.action.as_deref() == Some("commitment_handoff")
            || (plan.action.as_deref() == Some("collect_info")
                && !matches!(phase, ConversationPhase::Presenting | ConversationPhase::Qualifying));
        if in_commitment_flow {
            if state.renter_first_name.is_none() {
                phase = ConversationPhase::CollectingInfo;
                plan.response_hint = Some("Ask for the buyer's name to proceed with booking".into());
            } else if state.buyer_email.is_none() {
                phase = ConversationPhase::CollectingInfo;
                plan.response_hint = Some("Got their name, now ask for email to send over the details".into());
            } else {
                phase = ConversationPhase::Commitment;
            }
        }

        // Opportunistic name extraction
        if let Some(name) = &plan.extracted_name {
            if let Some(first) = &name.first_name {
                state.renter_first_name = Some(first.clone());
                state.renter_last_name = name.last_name.clone();
                state.name_status = if name.last_name.is_some() { "full" } else { "first_only" }.into();
            }
        }
        if state.renter_first_name.is_none() {
            if let Some(raw) = interpretation.names.first() {
                let mut parts = raw.splitn(2, ' ');
                state.renter_first_name = parts.next().map(str::to_string);
                state.renter_last_name = parts.next().map(str::to_string);
                state.name_status = if state.renter_last_name.is_some() { "full" } else { "first_only" }.into();
            }
        }

        if phase == ConversationPhase::Commitment
            && state.renter_first_name.is_some()
            && state.buyer_email.is_some()
            && state.engagement_id.is_none()
        {
            if let Some(match_id) = resolved_property_id.clone() {
                let full_name = format!(
                    "{} {}",
                    state.renter_first_name.clone().unwrap_or_default(),
                    state.renter_last_name.clone().unwrap_or_default()
                )
                .trim()
                .to_string();
                match self
                    .engagements
                    .initiate_booking(&match_id, &full_name, state.buyer_email.as_deref().unwrap_or(""), phone)
                    .await
                {
                    Ok(engagement) => {
                        state.engagement_id = Some(engagement.id.clone());
                        let token = url_safe_token();
                        state.guarantee_link_token = Some(token.clone());
                        phase = ConversationPhase::GuaranteePending;
                        plan.response_hint = Some(format!(
                            "Send guarantee link: {}/sms/guarantee/{token}",
                            self.frontend_url
                        ));
                    }
                    Err(err) => {
                        warn!(error = %err, "SMS booking bridge failed");
                    }
                }
            }
        }

        // == Tour scheduling ==
        if plan.action.as_deref() == Some("schedule_tour") {
            if let Some(engagement_id) = state.engagement_id.clone() {
                match self.engagements.request_tour(&engagement_id, phone, None, None).await {
                    Ok(_) => {
                        phase = ConversationPhase::TourScheduling;
                        plan.response_hint = Some("Tour request sent to supplier. Confirm with buyer and ask for 2-3 preferred days/times.".into());
                    }
                    Err(err) => {
                        warn!(error = %err, "Tour request transition failed");
                    }
                }
            }
        }

        // == Name capture: ask once, never re-ask ==
        let mut name_capture_prompt = None;
        if state.name_status == "unknown"
            && state.name_requested_at_turn.is_none()
            && phase == ConversationPhase::Presenting
        {
            state.name_requested_at_turn = Some(state.turn);
            name_capture_prompt = Some("What's your name by the way?".to_string());
        }

        // Name just captured → one-shot search link with best-match highlight
        if let Some(session_token) = state
            .search_session_token
            .clone()
            .filter(|_| state.renter_first_name.is_some())
            .filter(|_| state.name_requested_at_turn == Some(state.turn - 1))
        {
            let link = format!("{}/buyer/options?session={session_token}", self.frontend_url);
            let best_ctx = match_summaries
                .first()
                .map(|best| {
                    let city = best["city"].as_str().unwrap_or("");
                    let rate = best["rate"].as_f64().unwrap_or(0.0);
                    format!(" Best match is in {city} at ${rate:.2}/sqft.")
                })
                .unwrap_or_default();
            plan.response_hint = Some(format!(
                "Buyer just gave their name. Acknowledge warmly using their name.{best_ctx} \
                 Then share this link to review all options: {link} . Weave the best match into \
                 one natural sentence in your broker voice. Do NOT list all matches again and do \
                 NOT push for tours or commitment."
            ));
        }

        // == Response generation + gatekeeping ==
        let context = if plan.intent == "commitment" || phase == ConversationPhase::GuaranteePending {
            Some("commitment")
        } else if plan.intent == "tour_request" {
            Some("tour")
        } else if phase == ConversationPhase::AwaitingAnswer {
            Some("awaiting_answer")
        } else {
            None
        };

        state.phase = phase;
        let response = self
            .generate_and_gate(
                &plan,
                &state,
                message,
                Some(&merged),
                property_data.as_ref(),
                &match_summaries,
                &history,
                is_first,
                name_capture_prompt.as_deref(),
            )
            .await;
        let response = {
            let gate = validate_outbound(&response, is_first, context);
            if gate.ok {
                response
            } else {
                // Context-specific failure after the generic loop: fall back
                // to the template whose wording satisfies the context check
                let fallback_intent = match context {
                    Some("commitment") => "commitment",
                    Some("tour") => "tour_request",
                    Some("awaiting_answer") => "facility_info",
                    _ => plan.intent.as_str(),
                };
                let location = merged.get("location").and_then(|v| v.as_str());
                trim_to_limit(&get_fallback(fallback_intent, location, match_summaries.len()), is_first)
            }
        };

        // == Persist state ==
        let summaries_for_snapshot = (!match_summaries.is_empty()).then_some(match_summaries);
        self.persist_state(
            &mut state,
            Some(&merged),
            summaries_for_snapshot.as_deref(),
            phone,
            &response,
        )
        .await?;

        Ok(OrchestratorResult {
            response,
            intent: plan.intent,
            action: plan.action,
            criteria: Some(merged),
            phase: state.phase,
            error: None,
        })
    }

    /// Run the generated-reply path through the gatekeeper-polisher loop
    /// and fall back to a deterministic template when all attempts fail.
    #[allow(clippy::too_many_arguments)]
    async fn generate_and_gate(
        &self,
        plan: &CriteriaPlan,
        state: &SmsConversation,
        message: &str,
        criteria: Option<&Map<String, Value>>,
        property_data: Option<&Value>,
        match_summaries: &[Value],
        history: &[(String, String)],
        is_first: bool,
        name_capture_prompt: Option<&str>,
    ) -> String {
        let responder = ResponseAgent::new(&self.llm);
        let polisher = PolisherAgent::new(&self.llm);

        let ctx = ReplyContext {
            message,
            intent: &plan.intent,
            phase: state.phase.as_str(),
            criteria,
            property_data,
            match_summaries,
            history,
            response_hint: plan.response_hint.as_deref(),
            retry_hint: None,
            is_first_message: is_first,
            name_capture_prompt,
            renter_name: state.renter_first_name.as_deref(),
        };
        let mut response = responder.generate_reply(&ctx).await;

        for attempt in 0..GATEKEEPER_MAX_ATTEMPTS {
            let gate = validate_outbound(&response, is_first, None);
            if gate.ok {
                return response;
            }
            let hint = gate.hint.unwrap_or_else(|| "rejected".into());
            warn!(attempt = attempt + 1, hint = %hint, "Gatekeeper rejected reply");

            if attempt + 1 < GATEKEEPER_MAX_ATTEMPTS {
                let polished = polisher.polish(&response, &hint, is_first).await;
                if polished.ok {
                    response = polished.polished_text;
                }
            } else {
                let location = criteria.and_then(|c| c.get("location")).and_then(|v| v.as_str());
                response = trim_to_limit(
                    &get_fallback(&plan.intent, location, match_summaries.len()),
                    is_first,
                );
                warn!("Using fallback template after gatekeeper rejections");
            }
        }
        response
    }

    /// Geocode, create the BuyerNeed, run the clearing engine, store the
    /// search session, and return buyer-safe match summaries.
    async fn run_search(
        &self,
        criteria: &Map<String, Value>,
        phone: &str,
        state: &mut SmsConversation,
    ) -> Result<Option<Vec<Value>>> {
        let location = criteria.get("location").and_then(|v| v.as_str()).unwrap_or_default();
        let (city, state_abbr) = split_location(location);

        let geo = self.geocode.geocode(location).await;

        let sqft = criteria.get("sqft").and_then(|v| v.as_i64());
        let need = BuyerNeed {
            id: Uuid::new_v4().to_string(),
            buyer_id: None,
            city: (!city.is_empty()).then(|| city.clone()),
            state: state_abbr.clone().or_else(|| geo.as_ref().map(|g| g.state.clone()).filter(|s| !s.is_empty())),
            lat: geo.as_ref().map(|g| g.lat),
            lng: geo.as_ref().map(|g| g.lng),
            radius_miles: 25.0,
            min_sqft: sqft,
            max_sqft: sqft,
            use_type: criteria
                .get("use_type")
                .and_then(|v| v.as_str())
                .map(map_use_type)
                .map(str::to_string),
            needed_from: timing_to_date(criteria.get("timing").and_then(|v| v.as_str())),
            duration_months: duration_to_months(criteria.get("duration").and_then(|v| v.as_str())),
            max_budget_per_sqft: criteria.get("max_budget").and_then(|v| v.as_f64()),
            requirements: criteria
                .get("requirements")
                .cloned()
                .map(|r| json!({"notes": r}))
                .unwrap_or_else(|| json!({})),
            status: "active".into(),
            created_at: Utc::now(),
        };

        {
            let conn = self.db.lock().await;
            clearing_store::insert_buyer_need(&conn, &need)?;
        }
        state.buyer_need_id = Some(need.id.clone());

        let result = self.clearing.run_clearing(&need.id).await?;
        if result.tier1.is_empty() {
            return Ok(None);
        }

        let summaries = build_match_summaries(&result.tier1, sqft);
        state.presented_match_ids = summaries
            .iter()
            .filter_map(|s| s["id"].as_str().map(str::to_string))
            .collect();

        // Search session so the buyer can review matches on the web
        let token = url_safe_token();
        let now = Utc::now();
        let tier1_safe: Vec<Value> = result
            .tier1
            .iter()
            .map(|m| {
                json!({
                    "match_id": m.match_id,
                    "warehouse_id": m.warehouse_id,
                    "confidence": m.match_score,
                    "city": m.city,
                    "state": m.state,
                    "available_sqft": m.available_sqft,
                    "buyer_rate": m.buyer_rate,
                    "tier": 1,
                })
            })
            .collect();
        let session = SearchSession {
            id: Uuid::new_v4().to_string(),
            token: token.clone(),
            requirements: Value::Object(criteria.clone()),
            results: json!({"tier1": tier1_safe, "tier2": []}),
            buyer_need_id: Some(need.id.clone()),
            status: "active".into(),
            expires_at: now + Duration::hours(SEARCH_SESSION_TTL_HOURS),
            created_at: now,
        };
        {
            let conn = self.db.lock().await;
            clearing_store::insert_search_session(&conn, &session)?;
        }
        state.search_session_token = Some(token);

        info!(phone, matches = summaries.len(), "SMS search presented matches");
        Ok(Some(summaries))
    }

    async fn warehouse_for_match(&self, match_id: &str) -> Result<Option<String>, ApiError> {
        let conn = self.db.lock().await;
        Ok(clearing_store::get_match(&conn, match_id)
            .map_err(ApiError::internal)?
            .map(|m| m.warehouse_id))
    }

    /// Fetch the asked fields; escalate misses to the supplier. Returns the
    /// answered (field -> formatted) map and whether anything escalated.
    async fn fetch_details(
        &self,
        warehouse_id: &str,
        field_keys: &[String],
        question_text: &str,
        engagement_id: Option<&str>,
    ) -> Result<(Map<String, Value>, bool), ApiError> {
        let conn = self.db.lock().await;
        let results =
            DetailFetcher::fetch_fields(&conn, warehouse_id, field_keys).map_err(ApiError::internal)?;

        let mut answers = Map::new();
        let mut escalated = false;
        for result in &results {
            if let Some(formatted) = &result.formatted {
                answers.insert(result.field_key.clone(), Value::String(formatted.clone()));
            } else if result.needs_escalation() {
                let created = DetailFetcher::escalate(
                    &conn,
                    engagement_id.unwrap_or(""),
                    warehouse_id,
                    question_text,
                    &result.field_key,
                )
                .map_err(ApiError::internal)?;
                if created.is_some() {
                    escalated = true;
                }
            }
        }
        Ok((answers, escalated))
    }

    async fn persist_state(
        &self,
        state: &mut SmsConversation,
        merged: Option<&Map<String, Value>>,
        match_summaries: Option<&[Value]>,
        phone: &str,
        response: &str,
    ) -> Result<(), ApiError> {
        let mut snapshot = state
            .criteria_snapshot
            .as_object()
            .cloned()
            .unwrap_or_default();
        if let Some(merged) = merged {
            for (k, v) in merged {
                snapshot.insert(k.clone(), v.clone());
            }
        }
        if let Some(summaries) = match_summaries {
            snapshot.insert("match_summaries".into(), Value::Array(summaries.to_vec()));
        }
        state.criteria_snapshot = Value::Object(snapshot);

        if let Some((_, hours)) = STALL_RULES.iter().find(|(p, _)| *p == state.phase) {
            state.next_reengagement_at = Some(Utc::now() + Duration::hours(*hours));
        }
        state.updated_at = Utc::now();

        let conn = self.db.lock().await;
        store::save(&conn, state).map_err(ApiError::internal)?;
        if !response.is_empty() {
            record_message(&conn, phone, "agent", response).map_err(ApiError::internal)?;
        }
        Ok(())
    }
}

fn load_history(conn: &rusqlite::Connection, phone: &str) -> Result<Vec<(String, String)>> {
    let mut stmt = conn.prepare(
        "SELECT role, content FROM sms_messages WHERE phone = ?1
         ORDER BY created_at DESC LIMIT 16",
    )?;
    let mut rows: Vec<(String, String)> = stmt
        .query_map(rusqlite::params![phone], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    rows.reverse();
    Ok(rows)
}

fn record_message(conn: &rusqlite::Connection, phone: &str, role: &str, content: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO sms_messages (id, phone, role, content, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![Uuid::new_v4().to_string(), phone, role, content, ts(Utc::now())],
    )?;
    Ok(())
}

/// "Dallas, TX" → ("Dallas", Some("TX")); "Dallas" → ("Dallas", None)
fn split_location(location: &str) -> (String, Option<String>) {
    match location.split_once(',') {
        Some((city, rest)) => {
            let st = rest.trim();
            let st = (st.len() == 2 && st.chars().all(|c| c.is_ascii_alphabetic()))
                .then(|| st.to_uppercase());
            (city.trim().to_string(), st)
        }
        None => (location.trim().to_string(), None),
    }
}

/// Map conversational use types onto the compatibility matrix vocabulary.
fn map_use_type(raw: &str) -> &'static str {
    match raw {
        "storage" => "storage",
        "fulfillment" | "ecommerce" | "ecommerce_fulfillment" => "ecommerce_fulfillment",
        "distribution" => "distribution",
        "light_assembly" | "manufacturing" | "manufacturing_light" => "manufacturing_light",
        "cold_storage" => "cold_storage",
        "food_grade" => "food_grade",
        "office" => "office",
        _ => "general",
    }
}

fn timing_to_date(timing: Option<&str>) -> Option<chrono::NaiveDate> {
    let today = Utc::now().date_naive();
    match timing? {
        "ASAP" | "asap" => Some(today),
        "next_month" => today.checked_add_months(Months::new(1)),
        "3_months" => today.checked_add_months(Months::new(3)),
        "6_months" => today.checked_add_months(Months::new(6)),
        _ => None,
    }
}

fn duration_to_months(duration: Option<&str>) -> Option<i64> {
    match duration? {
        "month_to_month" => Some(1),
        "3_months" => Some(3),
        "6_months" => Some(6),
        "1_year" => Some(12),
        "2_years" => Some(24),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn orchestrator(db: Db) -> SmsOrchestrator {
        SmsOrchestrator::new(
            db,
            LlmClient::new(None, None),
            GeocodeClient::new(None),
            "https://app.example.com".into(),
        )
    }

    #[tokio::test]
    async fn test_inbound_rejection_short_circuits() {
        let db = Db::open_in_memory().unwrap();
        let orch = orchestrator(db);
        let result = orch.process_message("+12025550001", "").await.unwrap();
        assert!(result.error.is_some());
        assert!(result.response.is_empty());
    }

    #[tokio::test]
    async fn test_pipeline_degrades_to_fallback_without_llm() {
        let db = Db::open_in_memory().unwrap();
        let orch = orchestrator(db.clone());

        // With no LLM, the planner yields unknown and the responder yields
        // empty — the gatekeeper loop must still emit a valid reply.
        let result = orch
            .process_message("+12025550002", "looking for 10k sqft in Dallas TX for storage")
            .await
            .unwrap();
        assert!(result.error.is_none());
        assert!(result.response.len() >= 20);
        assert!(validate_outbound(&result.response, false, None).ok || result.response.len() <= 800);

        // Conversation state advanced and was persisted
        let conn = db.lock().await;
        let state = store::load(&conn, "+12025550002").unwrap().unwrap();
        assert_eq!(state.turn, 1);
        assert!(state.next_reengagement_at.is_some());
    }

    #[tokio::test]
    async fn test_turns_increment_and_history_recorded() {
        let db = Db::open_in_memory().unwrap();
        let orch = orchestrator(db.clone());

        orch.process_message("+12025550003", "hi there, anyone home?").await.unwrap();
        orch.process_message("+12025550003", "need warehouse space").await.unwrap();

        let conn = db.lock().await;
        let state = store::load(&conn, "+12025550003").unwrap().unwrap();
        assert_eq!(state.turn, 2);

        let history = load_history(&conn, "+12025550003").unwrap();
        // Two inbound + two replies
        assert!(history.len() >= 3);
        assert_eq!(history[0].0, "buyer");
    }

    #[test]
    fn test_requirements_resolution() {
        assert!(requirements_resolved(Some(&json!("none"))));
        assert!(requirements_resolved(Some(&json!("dock doors and an office"))));
        assert!(!requirements_resolved(Some(&json!("starting in july"))));
        assert!(!requirements_resolved(None));
    }

    #[test]
    fn test_split_location() {
        assert_eq!(split_location("Dallas, TX"), ("Dallas".into(), Some("TX".into())));
        assert_eq!(split_location("Dallas"), ("Dallas".into(), None));
        assert_eq!(split_location("Dallas, Texas"), ("Dallas".into(), None));
    }

    #[test]
    fn test_use_type_mapping() {
        assert_eq!(map_use_type("fulfillment"), "ecommerce_fulfillment");
        assert_eq!(map_use_type("manufacturing"), "manufacturing_light");
        assert_eq!(map_use_type("anything else"), "general");
    }

    #[test]
    fn test_duration_and_timing_tables() {
        assert_eq!(duration_to_months(Some("1_year")), Some(12));
        assert_eq!(duration_to_months(Some("flexible")), None);
        assert!(timing_to_date(Some("ASAP")).is_some());
        assert!(timing_to_date(Some("flexible")).is_none());
        assert!(timing_to_date(None).is_none());
    }

    #[test]
    fn test_stall_rules_cover_every_phase() {
        for phase in [
            ConversationPhase::Intake,
            ConversationPhase::Qualifying,
            ConversationPhase::Presenting,
            ConversationPhase::PropertyFocused,
            ConversationPhase::AwaitingAnswer,
            ConversationPhase::CollectingInfo,
            ConversationPhase::Commitment,
            ConversationPhase::GuaranteePending,
            ConversationPhase::TourScheduling,
        ] {
            assert!(STALL_RULES.iter().any(|(p, _)| *p == phase));
        }
    }

    #[test]
    fn test_url_safe_token_shape() {
        let token = url_safe_token();
        assert!(token.len() >= 40);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }
}
