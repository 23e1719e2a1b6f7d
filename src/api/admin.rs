//! Admin endpoints: the clearing-to-engagement settlement bridge.

use axum::{extract::State, Extension, Json};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::api::error::ApiError;
use crate::api::{role_of, AppState};
use crate::auth::Claims;
use crate::engagement::views::serialize_engagement;

#[derive(Debug, Deserialize)]
pub struct SettlementAcceptBody {
    pub match_id: String,
    #[serde(default)]
    pub deal_type: Option<String>,
}

/// Turn an accepted match into an engagement with a live deal ping.
pub async fn settlement_accept(
    State(state): State<AppState>,
    claims: Option<Extension<Claims>>,
    Json(body): Json<SettlementAcceptBody>,
) -> Result<Json<Value>, ApiError> {
    let role = role_of(claims.as_deref());
    if role != "admin" {
        return Err(ApiError::authorization("admin only"));
    }

    let engagement = state.engagements.create_from_match(&body.match_id).await?;
    Ok(Json(json!({
        "engagement": serialize_engagement(state.engagements.machine(), &engagement, "admin"),
        "deal_type": body.deal_type.unwrap_or_else(|| "standard".into()),
    })))
}
