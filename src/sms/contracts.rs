//! Typed I/O contracts between the SMS pipeline stages.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Output of the deterministic message interpreter.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MessageInterpretation {
    pub cities: Vec<String>,
    pub states: Vec<String>,
    pub sqft: Option<i64>,
    pub topics: Vec<String>,
    pub features: Vec<String>,
    pub positional_references: Vec<usize>,
    pub action_keywords: Vec<String>,
    pub emails: Vec<String>,
    pub names: Vec<String>,
    pub raw_text: String,
}

impl MessageInterpretation {
    /// Anything the planner would treat as search signal.
    pub fn has_search_data(&self) -> bool {
        !self.cities.is_empty()
            || !self.states.is_empty()
            || self.sqft.is_some()
            || !self.features.is_empty()
            || !self.action_keywords.is_empty()
    }
}

/// Output of the criteria planner LLM, post-deserialization.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CriteriaPlan {
    #[serde(default = "default_intent")]
    pub intent: String,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub criteria: Map<String, Value>,
    #[serde(default)]
    pub resolved_property_id: Option<String>,
    #[serde(default)]
    pub extracted_name: Option<ExtractedName>,
    #[serde(default)]
    pub asked_fields: Option<Vec<String>>,
    #[serde(default)]
    pub clarification_needed: Option<String>,
    #[serde(default)]
    pub response_hint: Option<String>,
    #[serde(default)]
    pub confidence: f64,
}

fn default_intent() -> String {
    "unknown".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractedName {
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
}

/// Result of inbound/outbound SMS validation.
#[derive(Debug, Clone)]
pub struct GatekeeperResult {
    pub ok: bool,
    pub hint: Option<String>,
    pub violation: Option<&'static str>,
}

impl GatekeeperResult {
    pub fn pass() -> Self {
        Self {
            ok: true,
            hint: None,
            violation: None,
        }
    }

    pub fn fail(hint: impl Into<String>, violation: &'static str) -> Self {
        Self {
            ok: false,
            hint: Some(hint.into()),
            violation: Some(violation),
        }
    }
}

/// One field lookup outcome from the detail fetcher.
#[derive(Debug, Clone)]
pub struct DetailFetchResult {
    pub field_key: String,
    pub status: FetchStatus,
    pub formatted: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    Found,
    CacheHit,
    Missing,
}

impl DetailFetchResult {
    pub fn answered(&self) -> bool {
        matches!(self.status, FetchStatus::Found | FetchStatus::CacheHit)
    }

    pub fn needs_escalation(&self) -> bool {
        self.status == FetchStatus::Missing
    }
}

/// Polisher output.
#[derive(Debug, Clone)]
pub struct PolishResult {
    pub ok: bool,
    pub polished_text: String,
    pub error_code: Option<&'static str>,
}
