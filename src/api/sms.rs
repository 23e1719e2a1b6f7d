//! Inbound SMS webhook — the transport driver posts here; the reply text
//! is returned for the driver to deliver.

use axum::{extract::State, Json};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::api::error::ApiError;
use crate::api::AppState;

#[derive(Debug, Deserialize)]
pub struct InboundSms {
    pub from: String,
    pub body: String,
}

pub async fn inbound(
    State(state): State<AppState>,
    Json(payload): Json<InboundSms>,
) -> Result<Json<Value>, ApiError> {
    let phone = payload.from.trim();
    if phone.is_empty() {
        return Err(ApiError::validation("from is required"));
    }

    // Flood control before the pipeline (and its LLM calls) runs
    if !state.sms_throttle.allow(phone) {
        return Err(ApiError::RateLimited(format!(
            "too many messages from {phone}, retry shortly"
        )));
    }

    let result = state.sms.process_message(phone, &payload.body).await?;

    Ok(Json(json!({
        "reply": result.response,
        "intent": result.intent,
        "action": result.action,
        "phase": result.phase.as_str(),
        "error": result.error,
    })))
}
