//! The three LLM-backed agents in the SMS pipeline: the criteria planner,
//! the response generator, and the polisher. Each builds its own prompt,
//! calls the shared client with a per-step timeout, and degrades on any
//! failure.

use serde_json::Value;
use std::time::Duration;
use tracing::warn;

use crate::llm::LlmClient;
use crate::sms::contracts::{CriteriaPlan, MessageInterpretation, PolishResult};
use crate::sms::context::{format_interpretation, format_match_options, format_recent_messages};
use crate::sms::gatekeeper::{MAX_FIRST_MESSAGE, MAX_FOLLOWUP};

const PLANNER_TIMEOUT: Duration = Duration::from_secs(30);
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(60);
const POLISH_TIMEOUT: Duration = Duration::from_secs(30);

pub struct CriteriaAgent<'a> {
    llm: &'a LlmClient,
}

impl<'a> CriteriaAgent<'a> {
    pub fn new(llm: &'a LlmClient) -> Self {
        Self { llm }
    }

    /// Classify intent and plan the next action. Any failure collapses to
    /// an unknown-intent plan the orchestrator can still act on.
    #[allow(clippy::too_many_arguments)]
    pub async fn plan(
        &self,
        message: &str,
        interpretation: &MessageInterpretation,
        history: &[(String, String)],
        phase: &str,
        existing_criteria: &serde_json::Map<String, Value>,
        resolved_property_id: Option<&str>,
        match_summaries: &[Value],
    ) -> CriteriaPlan {
        let prompt = self.build_prompt(
            message,
            interpretation,
            history,
            phase,
            existing_criteria,
            resolved_property_id,
            match_summaries,
        );

        match self
            .llm
            .generate_json::<CriteriaPlan>(&prompt, 0.2, PLANNER_TIMEOUT)
            .await
        {
            Ok(mut plan) => {
                if plan.resolved_property_id.is_none() {
                    plan.resolved_property_id = resolved_property_id.map(str::to_string);
                }
                plan
            }
            Err(err) => {
                warn!(error = %err, "Criteria agent failed");
                CriteriaPlan {
                    resolved_property_id: resolved_property_id.map(str::to_string),
                    ..Default::default()
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn build_prompt(
        &self,
        message: &str,
        interpretation: &MessageInterpretation,
        history: &[(String, String)],
        phase: &str,
        existing_criteria: &serde_json::Map<String, Value>,
        resolved_property_id: Option<&str>,
        match_summaries: &[Value],
    ) -> String {
        let interp_ctx = format_interpretation(interpretation);
        let history_ctx = format_recent_messages(history);
        let existing_ctx = if existing_criteria.is_empty() {
            String::new()
        } else {
            format!(
                "Existing criteria: {}",
                Value::Object(existing_criteria.clone())
            )
        };
        let property_ctx = resolved_property_id
            .map(|id| format!("Resolved property ID: {id}"))
            .unwrap_or_default();
        let matches_ctx = format_match_options(match_summaries);

        format!(
            "You are the Search Architect for Warehouse Exchange (WEx).\n\
             Your job: convert the customer's SMS message into a structured search plan.\n\
             You NEVER run the search yourself; you ONLY return JSON describing what to \
             search for and what action to take.\n\n\
             ## CRITICAL OUTPUT RULES\n\
             1. Return ONLY valid JSON, no explanation text before or after\n\
             2. Do NOT wrap in markdown code fences\n\
             3. If unsure, still return valid JSON with intent: \"unknown\"\n\n\
             ## CONTEXT\n\
             Current phase: {phase}\n\
             Buyer message: \"{message}\"\n\
             {interp_ctx}\n{history_ctx}\n{existing_ctx}\n{property_ctx}\n{matches_ctx}\n\n\
             ## INTENT (choose exactly one)\n\
             new_search | refine_search | facility_info | tour_request | commitment | \
             provide_info | greeting | unknown\n\n\
             ## ACTION (choose one or null)\n\
             search | lookup | schedule_tour | commitment_handoff | collect_info | null\n\n\
             ## RULES\n\
             - Tour language (\"can I see it\", \"schedule a tour\", \"walk through\") plus a \
               property reference means intent tour_request, action schedule_tour\n\
             - \"book it\" / \"I'll take it\" / \"sign me up\" means intent commitment, action \
               commitment_handoff\n\
             - To trigger action search you need AT LEAST location + sqft + use_type; if any \
               is missing, action null and set clarification_needed\n\
             - Resolve positional and descriptive references (\"option 2\", \"the Dallas one\", \
               \"the cheaper one\") against the presented matches; set resolved_property_id to \
               the matched id\n\
             - When the buyer asks about a property detail, set asked_fields to the matching \
               field keys: clear_height_ft, dock_doors_receiving, has_office, has_sprinkler, \
               parking_spaces, power_supply, year_built, construction_type, zoning, \
               available_sqft, supplier_rate_per_sqft, available_from\n\
             - The criteria \"requirements\" field is ONLY for physical facility deal-breakers \
               (office, dock doors, parking, climate control, clear height, sprinkler, 24/7 \
               access, high power). NEVER put timing, duration, dates, or budget there. If the \
               buyer answers \"no\"/\"none\"/\"nothing special\" to deal-breakers, set \
               requirements to \"none\"\n\
             - Merge new criteria with existing; new values override. Do NOT infer or default \
               ANY field the buyer did not mention\n\
             - On the first message NEVER use tour_request or commitment intents\n\n\
             ## REQUIRED JSON SCHEMA\n\
             {{\"intent\": \"...\", \"action\": \"...\" or null,\n\
              \"criteria\": {{\"location\": str|null, \"sqft\": number|null, \"use_type\": \
             str|null, \"timing\": str|null, \"duration\": str|null, \"goods_type\": str|null, \
             \"features\": [..], \"requirements\": str|null}},\n\
              \"resolved_property_id\": str|null,\n\
              \"extracted_name\": {{\"first_name\": str, \"last_name\": str|null}} or null,\n\
              \"asked_fields\": [str, ..] or null,\n\
              \"clarification_needed\": str|null,\n\
              \"response_hint\": str|null,\n\
              \"confidence\": 0.0 to 1.0}}"
        )
    }
}

pub struct ResponseAgent<'a> {
    llm: &'a LlmClient,
}

pub struct ReplyContext<'a> {
    pub message: &'a str,
    pub intent: &'a str,
    pub phase: &'a str,
    pub criteria: Option<&'a serde_json::Map<String, Value>>,
    pub property_data: Option<&'a Value>,
    pub match_summaries: &'a [Value],
    pub history: &'a [(String, String)],
    pub response_hint: Option<&'a str>,
    pub retry_hint: Option<&'a str>,
    pub is_first_message: bool,
    pub name_capture_prompt: Option<&'a str>,
    pub renter_name: Option<&'a str>,
}

impl<'a> ResponseAgent<'a> {
    pub fn new(llm: &'a LlmClient) -> Self {
        Self { llm }
    }

    /// Generate the reply text. Greeting intents short-circuit to a
    /// deterministic line; LLM failure returns an empty string that the
    /// gatekeeper loop turns into a fallback template.
    pub async fn generate_reply(&self, ctx: &ReplyContext<'_>) -> String {
        if ctx.intent == "greeting" {
            return "This is Warehouse Exchange. Looking for warehouse space? What city, state and how much space?"
                .to_string();
        }

        let prompt = self.build_prompt(ctx);
        match self.llm.generate_text(&prompt, 0.7, RESPONSE_TIMEOUT).await {
            Ok(text) => text.trim_matches(['"', '\'']).trim().to_string(),
            Err(err) => {
                warn!(error = %err, "Response agent failed");
                String::new()
            }
        }
    }

    fn build_prompt(&self, ctx: &ReplyContext<'_>) -> String {
        let max_len = if ctx.is_first_message { MAX_FIRST_MESSAGE } else { MAX_FOLLOWUP };
        let history_ctx = format_recent_messages(ctx.history);
        let criteria_ctx = ctx
            .criteria
            .filter(|c| !c.is_empty())
            .map(|c| format!("Search criteria: {}", Value::Object((*c).clone())))
            .unwrap_or_default();
        let property_ctx = ctx
            .property_data
            .map(|p| format!("Property details: {p}"))
            .unwrap_or_default();
        let matches_ctx = format_match_options(ctx.match_summaries);
        let hint_ctx = ctx
            .response_hint
            .map(|h| format!("Response hint: {h}"))
            .unwrap_or_default();
        let retry_ctx = ctx
            .retry_hint
            .map(|h| format!("PREVIOUS ATTEMPT REJECTED: {h}. Fix the issue."))
            .unwrap_or_default();
        let mut name_ctx = ctx
            .renter_name
            .map(|n| format!("Buyer's name: {n} (use naturally if appropriate, don't overuse)"))
            .unwrap_or_default();
        if let Some(prompt) = ctx.name_capture_prompt {
            name_ctx.push_str(&format!(
                "\nNAME_CAPTURE: Append this question naturally at the END of your response: \"{prompt}\""
            ));
        }
        let length_note = if ctx.is_first_message {
            "First message, include links and alternatives if multiple matches."
        } else {
            "Follow-up, be concise, no links needed."
        };

        format!(
            "You are a warehouse leasing broker replying via text message. Be professional \
             but warm, like a helpful colleague, not a chatbot.\n\n\
             ## TONE\n\
             - Write like a real person texting, not a template\n\
             - Vary your openers; good ones: \"Yes,\", \"That one's\", \"Good news -\", \
               \"Here's what I found\", \"Looks like\", \"Got a few options\"\n\
             - AVOID: \"Yep\", \"Sure thing\", \"Absolutely!\", \"Great question!\", \
               \"I'd be happy to\"\n\
             - Use contractions. No emojis. Never reveal you are AI.\n\
             - Say \"sqft\" not \"square feet\". Keep it short like a real broker.\n\n\
             ## INFORMATION RULES\n\
             - Only state facts present in the data provided, NEVER invent details\n\
             - If a detail isn't in the data, say you'll look into it\n\
             - NEVER mention owners or landlords. You ARE the service.\n\
             - No full addresses, city/area only until a tour is booked\n\n\
             ## LENGTH\n\
             Keep the reply under {max_len} characters. {length_note}\n\n\
             Phase: {phase}\nIntent: {intent}\n\
             Buyer's message: \"{message}\"\n\
             {history_ctx}\n{criteria_ctx}\n{property_ctx}\n{matches_ctx}\n{hint_ctx}\n{name_ctx}\n{retry_ctx}\n\n\
             When presenting matches, give a brief count and a summary of the top options \
             (city and rate per sqft). Do NOT list each match individually and do NOT \
             volunteer property sqft figures.\n\
             Respond with ONLY the SMS text, nothing else.",
            max_len = max_len,
            length_note = length_note,
            phase = ctx.phase,
            intent = ctx.intent,
            message = ctx.message,
        )
    }
}

pub struct PolisherAgent<'a> {
    llm: &'a LlmClient,
}

impl<'a> PolisherAgent<'a> {
    pub fn new(llm: &'a LlmClient) -> Self {
        Self { llm }
    }

    /// Compress or fix a rejected reply. Keeps the meaning, fixes the
    /// violation named in `hint`.
    pub async fn polish(&self, text: &str, hint: &str, is_first_message: bool) -> PolishResult {
        if text.trim().is_empty() {
            return PolishResult {
                ok: false,
                polished_text: String::new(),
                error_code: Some("EMPTY_OUTPUT"),
            };
        }
        let max_len = if is_first_message { MAX_FIRST_MESSAGE } else { MAX_FOLLOWUP };

        let prompt = format!(
            "You are a message polisher for Warehouse Exchange (WEX), a warehouse leasing \
             platform.\n\n\
             Your job: take this rejected SMS and fix it so it passes validation.\n\
             Rejection reason: {hint}\n\
             Maximum length: {max_len} characters\n\n\
             Original:\n{text}\n\n\
             ## STRICT RULES\n\
             1. DO NOT INVENT FACTS, only include information from the original\n\
             2. DO NOT CHANGE MEANING, same info, just compressed or fixed\n\
             3. FIX TYPOS AND GRAMMAR\n\
             4. WEX BROKER TONE: professional, friendly, helpful\n\
             5. No emojis. Never reveal you are AI. Plain text only.\n\
             6. Must be under {max_len} characters\n\n\
             Output ONLY the fixed message text, nothing else.\n\
             If the text is completely unusable, output exactly: [CANNOT_POLISH]"
        );

        let polished = match self.llm.generate_text(&prompt, 0.3, POLISH_TIMEOUT).await {
            Ok(text) => text.trim_matches(['"', '\'']).trim().to_string(),
            Err(err) => {
                warn!(error = %err, "Polisher failed");
                return PolishResult {
                    ok: false,
                    polished_text: String::new(),
                    error_code: Some("LLM_FAILED"),
                };
            }
        };

        if polished.contains("[CANNOT_POLISH]") {
            return PolishResult {
                ok: false,
                polished_text: String::new(),
                error_code: Some("CANNOT_POLISH"),
            };
        }
        if polished.is_empty() {
            return PolishResult {
                ok: false,
                polished_text: String::new(),
                error_code: Some("EMPTY_OUTPUT"),
            };
        }
        if polished.len() > max_len {
            return PolishResult {
                ok: false,
                polished_text: polished,
                error_code: Some("TOO_LONG"),
            };
        }

        PolishResult {
            ok: true,
            polished_text: polished,
            error_code: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sms::interpreter::interpret_message;

    #[tokio::test]
    async fn test_greeting_short_circuits_without_llm() {
        let llm = LlmClient::new(None, None);
        let agent = ResponseAgent::new(&llm);
        let ctx = ReplyContext {
            message: "hi",
            intent: "greeting",
            phase: "INTAKE",
            criteria: None,
            property_data: None,
            match_summaries: &[],
            history: &[],
            response_hint: None,
            retry_hint: None,
            is_first_message: true,
            name_capture_prompt: None,
            renter_name: None,
        };
        let reply = agent.generate_reply(&ctx).await;
        assert!(reply.contains("Warehouse Exchange"));
    }

    #[tokio::test]
    async fn test_planner_degrades_when_llm_unavailable() {
        let llm = LlmClient::new(None, None);
        let agent = CriteriaAgent::new(&llm);
        let interp = interpret_message("10k sqft in Dallas");
        let plan = agent
            .plan("10k sqft in Dallas", &interp, &[], "INTAKE", &Default::default(), Some("m-1"), &[])
            .await;
        assert_eq!(plan.intent, "unknown");
        // The resolved property id survives the degrade path
        assert_eq!(plan.resolved_property_id.as_deref(), Some("m-1"));
    }

    #[tokio::test]
    async fn test_polisher_rejects_empty_input() {
        let llm = LlmClient::new(None, None);
        let polisher = PolisherAgent::new(&llm);
        let result = polisher.polish("  ", "too long", false).await;
        assert!(!result.ok);
        assert_eq!(result.error_code, Some("EMPTY_OUTPUT"));
    }

    #[test]
    fn test_planner_prompt_carries_context() {
        let llm = LlmClient::new(None, None);
        let agent = CriteriaAgent::new(&llm);
        let interp = interpret_message("option 2 works, does it have dock doors?");
        let summaries = vec![serde_json::json!({"id": "m-1", "city": "Dallas", "sqft": 10000, "rate": 6.36})];
        let prompt = agent.build_prompt(
            "option 2 works",
            &interp,
            &[("buyer".into(), "earlier message".into())],
            "PRESENTING",
            &Default::default(),
            None,
            &summaries,
        );
        assert!(prompt.contains("Current phase: PRESENTING"));
        assert!(prompt.contains("Option 1 (id=m-1)"));
        assert!(prompt.contains("RECENT CONVERSATION"));
    }
}
