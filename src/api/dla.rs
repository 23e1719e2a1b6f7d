//! DLA endpoints. Every call authenticates by token alone — the token is
//! the capability.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use serde_json::Value;

use crate::api::error::ApiError;
use crate::api::AppState;

#[derive(Debug, Deserialize)]
pub struct RateDecisionBody {
    pub accepted: bool,
    pub proposed_rate: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct AgreeBody {
    pub agreement_ref: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OutcomeBody {
    pub outcome: String,
    pub reason: Option<String>,
    pub rate_floor: Option<f64>,
}

/// Step 1: resolve the token to property + anonymized buyer requirement.
pub async fn resolve(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<Value>, ApiError> {
    Ok(Json(state.dla.resolve_token(&token).await?))
}

/// POST variant of step 1 (the landing page's confirm button).
pub async fn resolve_post(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<Value>, ApiError> {
    Ok(Json(state.dla.resolve_token(&token).await?))
}

/// Step 2: accept the suggested rate or counter.
pub async fn rate_decision(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(body): Json<RateDecisionBody>,
) -> Result<Json<Value>, ApiError> {
    Ok(Json(
        state
            .dla
            .handle_rate_decision(&token, body.accepted, body.proposed_rate)
            .await?,
    ))
}

/// Step 3: agreement signed — supplier goes in-network.
pub async fn agree(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(body): Json<AgreeBody>,
) -> Result<Json<Value>, ApiError> {
    Ok(Json(state.dla.confirm_agreement(&token, body.agreement_ref).await?))
}

/// Step 4 alternative: record a non-conversion outcome.
pub async fn outcome(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(body): Json<OutcomeBody>,
) -> Result<Json<Value>, ApiError> {
    Ok(Json(
        state
            .dla
            .store_outcome(&token, &body.outcome, body.reason, body.rate_floor)
            .await?,
    ))
}
