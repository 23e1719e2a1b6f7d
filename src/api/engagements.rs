//! Engagement lifecycle endpoints. Thin adapters: access check, command
//! dispatch, role-filtered serialization.

use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::api::error::ApiError;
use crate::api::{actor_id_of, role_of, AppState};
use crate::auth::Claims;
use crate::domain::{Engagement, EngagementActor, EngagementPath};
use crate::engagement::views::serialize_engagement;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    #[serde(default = "default_page")]
    pub page: usize,
    #[serde(default = "default_per_page")]
    pub per_page: usize,
}

fn default_page() -> usize {
    1
}

fn default_per_page() -> usize {
    50
}

#[derive(Debug, Deserialize)]
pub struct DealPingAcceptBody {
    #[serde(default = "default_true")]
    pub terms_accepted: bool,
    pub counter_rate: Option<f64>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct ReasonBody {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AcceptMatchBody {
    pub path: String,
}

#[derive(Debug, Deserialize)]
pub struct TourRequestBody {
    pub preferred_date: Option<String>,
    pub preferred_time: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TourConfirmBody {
    pub scheduled_date: String,
}

#[derive(Debug, Deserialize)]
pub struct TourRescheduleBody {
    pub new_date: String,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct AgreementSendBody {
    pub terms_text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OnboardingBody {
    pub insurance_uploaded: Option<bool>,
    pub company_docs_uploaded: Option<bool>,
    pub payment_method_added: Option<bool>,
}

/// Raise 403 unless the caller may touch this engagement.
fn check_access(engagement: &Engagement, claims: Option<&Claims>) -> Result<(), ApiError> {
    let Some(claims) = claims else {
        // Anonymous buyers may act until the engagement is account-bound
        if engagement.buyer_id.is_none() {
            return Ok(());
        }
        return Err(ApiError::authorization("Access denied"));
    };
    match claims.role.as_str() {
        "admin" => Ok(()),
        "supplier" if engagement.supplier_id == claims.sub => Ok(()),
        "buyer" if engagement.buyer_id.as_deref() == Some(&claims.sub) => Ok(()),
        "buyer" if engagement.buyer_id.is_none() => Ok(()),
        _ => Err(ApiError::authorization("Access denied")),
    }
}

fn view(state: &AppState, engagement: &Engagement, role: &str) -> Value {
    serialize_engagement(state.engagements.machine(), engagement, role)
}

fn parse_dt(raw: &str) -> Result<DateTime<Utc>, ApiError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .or_else(|_| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .map(|d| d.and_hms_opt(0, 0, 0).unwrap().and_utc())
        })
        .map_err(|_| ApiError::validation(format!("invalid date: {raw}")))
}

pub async fn list(
    State(state): State<AppState>,
    claims: Option<Extension<Claims>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>, ApiError> {
    let claims = claims.as_deref();
    let role = role_of(claims);

    let (supplier_filter, buyer_filter) = match role {
        "supplier" => (claims.map(|c| c.sub.clone()), None),
        "buyer" => (None, claims.map(|c| c.sub.clone())),
        _ => (None, None), // admin sees all
    };

    let per_page = query.per_page.min(100);
    let offset = (query.page.max(1) - 1) * per_page;
    let engagements = state
        .engagements
        .list(
            query.status.as_deref(),
            supplier_filter.as_deref(),
            buyer_filter.as_deref(),
            per_page,
            offset,
        )
        .await?;

    let views: Vec<Value> = engagements.iter().map(|e| view(&state, e, role)).collect();
    Ok(Json(json!(views)))
}

pub async fn get_one(
    State(state): State<AppState>,
    claims: Option<Extension<Claims>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let engagement = state.engagements.get(&id).await?;
    check_access(&engagement, claims.as_deref())?;
    Ok(Json(view(&state, &engagement, role_of(claims.as_deref()))))
}

pub async fn timeline(
    State(state): State<AppState>,
    claims: Option<Extension<Claims>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let engagement = state.engagements.get(&id).await?;
    check_access(&engagement, claims.as_deref())?;
    let events = state.engagements.timeline(&id).await?;
    Ok(Json(json!(events)))
}

pub async fn payments(
    State(state): State<AppState>,
    claims: Option<Extension<Claims>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let engagement = state.engagements.get(&id).await?;
    check_access(&engagement, claims.as_deref())?;
    let role = role_of(claims.as_deref());

    let conn = state.db.lock().await;
    let records =
        crate::engagement::store::list_payment_records(&conn, &id).map_err(ApiError::internal)?;

    // Economic isolation applies to payments too
    let views: Vec<Value> = records
        .iter()
        .map(|p| match role {
            "admin" => json!(p),
            "supplier" => json!({
                "id": p.id,
                "period_start": p.period_start,
                "period_end": p.period_end,
                "supplier_amount": p.supplier_amount,
                "supplier_status": p.supplier_status,
            }),
            _ => json!({
                "id": p.id,
                "period_start": p.period_start,
                "period_end": p.period_end,
                "buyer_amount": p.buyer_amount,
                "buyer_status": p.buyer_status,
            }),
        })
        .collect();
    Ok(Json(json!(views)))
}

pub async fn accept_deal_ping(
    State(state): State<AppState>,
    claims: Option<Extension<Claims>>,
    Path(id): Path<String>,
    Json(body): Json<DealPingAcceptBody>,
) -> Result<Json<Value>, ApiError> {
    let engagement = state.engagements.get(&id).await?;
    check_access(&engagement, claims.as_deref())?;
    let actor_id = actor_id_of(claims.as_deref());
    let engagement = state
        .engagements
        .accept_deal_ping(&id, &actor_id, body.terms_accepted, body.counter_rate)
        .await?;
    Ok(Json(view(&state, &engagement, role_of(claims.as_deref()))))
}

pub async fn decline_deal_ping(
    State(state): State<AppState>,
    claims: Option<Extension<Claims>>,
    Path(id): Path<String>,
    Json(body): Json<ReasonBody>,
) -> Result<Json<Value>, ApiError> {
    let engagement = state.engagements.get(&id).await?;
    check_access(&engagement, claims.as_deref())?;
    let actor_id = actor_id_of(claims.as_deref());
    let engagement = state.engagements.decline_deal_ping(&id, &actor_id, body.reason).await?;
    Ok(Json(view(&state, &engagement, role_of(claims.as_deref()))))
}

pub async fn accept_match(
    State(state): State<AppState>,
    claims: Option<Extension<Claims>>,
    Path(id): Path<String>,
    Json(body): Json<AcceptMatchBody>,
) -> Result<Json<Value>, ApiError> {
    let engagement = state.engagements.get(&id).await?;
    check_access(&engagement, claims.as_deref())?;
    let path = EngagementPath::from_str(&body.path)
        .ok_or_else(|| ApiError::validation("path must be tour or instant_book"))?;
    let actor_id = actor_id_of(claims.as_deref());
    let engagement = state.engagements.accept_match(&id, &actor_id, path).await?;
    Ok(Json(view(&state, &engagement, role_of(claims.as_deref()))))
}

pub async fn link_buyer(
    State(state): State<AppState>,
    claims: Option<Extension<Claims>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let claims = claims.ok_or_else(|| ApiError::authorization("login required"))?;
    let engagement = state.engagements.link_buyer(&id, &claims.sub).await?;
    Ok(Json(view(&state, &engagement, "buyer")))
}

pub async fn sign_guarantee(
    State(state): State<AppState>,
    claims: Option<Extension<Claims>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let engagement = state.engagements.get(&id).await?;
    check_access(&engagement, claims.as_deref())?;
    let actor_id = actor_id_of(claims.as_deref());
    let engagement = state.engagements.sign_guarantee(&id, &actor_id, None).await?;
    Ok(Json(view(&state, &engagement, role_of(claims.as_deref()))))
}

pub async fn request_tour(
    State(state): State<AppState>,
    claims: Option<Extension<Claims>>,
    Path(id): Path<String>,
    Json(body): Json<TourRequestBody>,
) -> Result<Json<Value>, ApiError> {
    let engagement = state.engagements.get(&id).await?;
    check_access(&engagement, claims.as_deref())?;
    let preferred_date = body
        .preferred_date
        .as_deref()
        .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok());
    let actor_id = actor_id_of(claims.as_deref());
    let engagement = state
        .engagements
        .request_tour(&id, &actor_id, preferred_date, body.preferred_time)
        .await?;
    Ok(Json(view(&state, &engagement, role_of(claims.as_deref()))))
}

pub async fn confirm_tour(
    State(state): State<AppState>,
    claims: Option<Extension<Claims>>,
    Path(id): Path<String>,
    Json(body): Json<TourConfirmBody>,
) -> Result<Json<Value>, ApiError> {
    let engagement = state.engagements.get(&id).await?;
    check_access(&engagement, claims.as_deref())?;
    let scheduled = parse_dt(&body.scheduled_date)?;
    let actor_id = actor_id_of(claims.as_deref());
    let engagement = state.engagements.confirm_tour(&id, &actor_id, scheduled).await?;
    Ok(Json(view(&state, &engagement, role_of(claims.as_deref()))))
}

pub async fn reschedule_tour(
    State(state): State<AppState>,
    claims: Option<Extension<Claims>>,
    Path(id): Path<String>,
    Json(body): Json<TourRescheduleBody>,
) -> Result<Json<Value>, ApiError> {
    let engagement = state.engagements.get(&id).await?;
    check_access(&engagement, claims.as_deref())?;
    let new_date = parse_dt(&body.new_date)?;
    let role = role_of(claims.as_deref());
    let actor = EngagementActor::from_role(role);
    let actor_id = actor_id_of(claims.as_deref());
    let engagement = state
        .engagements
        .reschedule_tour(&id, actor, &actor_id, new_date, body.reason)
        .await?;
    Ok(Json(view(&state, &engagement, role)))
}

pub async fn complete_tour(
    State(state): State<AppState>,
    claims: Option<Extension<Claims>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let engagement = state.engagements.get(&id).await?;
    check_access(&engagement, claims.as_deref())?;
    let role = role_of(claims.as_deref());
    let actor = EngagementActor::from_role(role);
    let actor_id = actor_id_of(claims.as_deref());
    let engagement = state.engagements.complete_tour(&id, actor, &actor_id).await?;
    Ok(Json(view(&state, &engagement, role)))
}

pub async fn request_instant_book(
    State(state): State<AppState>,
    claims: Option<Extension<Claims>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let engagement = state.engagements.get(&id).await?;
    check_access(&engagement, claims.as_deref())?;
    let actor_id = actor_id_of(claims.as_deref());
    let engagement = state.engagements.request_instant_book(&id, &actor_id).await?;
    Ok(Json(view(&state, &engagement, role_of(claims.as_deref()))))
}

pub async fn confirm_instant_book(
    State(state): State<AppState>,
    claims: Option<Extension<Claims>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let engagement = state.engagements.get(&id).await?;
    check_access(&engagement, claims.as_deref())?;
    let role = role_of(claims.as_deref());
    let actor = EngagementActor::from_role(role);
    let actor_id = actor_id_of(claims.as_deref());
    let engagement = state.engagements.confirm_instant_book(&id, actor, &actor_id).await?;
    Ok(Json(view(&state, &engagement, role)))
}

pub async fn buyer_confirm(
    State(state): State<AppState>,
    claims: Option<Extension<Claims>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let engagement = state.engagements.get(&id).await?;
    check_access(&engagement, claims.as_deref())?;
    let actor_id = actor_id_of(claims.as_deref());
    let engagement = state.engagements.buyer_confirm(&id, &actor_id).await?;
    Ok(Json(view(&state, &engagement, role_of(claims.as_deref()))))
}

pub async fn send_agreement(
    State(state): State<AppState>,
    claims: Option<Extension<Claims>>,
    Path(id): Path<String>,
    Json(body): Json<AgreementSendBody>,
) -> Result<Json<Value>, ApiError> {
    let role = role_of(claims.as_deref());
    if role != "admin" {
        return Err(ApiError::authorization("only admins send agreements directly"));
    }
    let actor_id = actor_id_of(claims.as_deref());
    let terms = body
        .terms_text
        .unwrap_or_else(|| "Standard WEx occupancy agreement".to_string());
    let engagement = state
        .engagements
        .send_agreement(&id, EngagementActor::Admin, &actor_id, terms)
        .await?;
    Ok(Json(view(&state, &engagement, role)))
}

pub async fn sign_agreement(
    State(state): State<AppState>,
    claims: Option<Extension<Claims>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let engagement = state.engagements.get(&id).await?;
    check_access(&engagement, claims.as_deref())?;
    let role = role_of(claims.as_deref());
    let actor = EngagementActor::from_role(role);
    let actor_id = actor_id_of(claims.as_deref());
    let engagement = state.engagements.sign_agreement(&id, actor, &actor_id).await?;
    Ok(Json(view(&state, &engagement, role)))
}

pub async fn update_onboarding(
    State(state): State<AppState>,
    claims: Option<Extension<Claims>>,
    Path(id): Path<String>,
    Json(body): Json<OnboardingBody>,
) -> Result<Json<Value>, ApiError> {
    let engagement = state.engagements.get(&id).await?;
    check_access(&engagement, claims.as_deref())?;
    let engagement = state
        .engagements
        .update_onboarding(
            &id,
            body.insurance_uploaded,
            body.company_docs_uploaded,
            body.payment_method_added,
        )
        .await?;
    Ok(Json(view(&state, &engagement, role_of(claims.as_deref()))))
}

pub async fn decline(
    State(state): State<AppState>,
    claims: Option<Extension<Claims>>,
    Path(id): Path<String>,
    Json(body): Json<ReasonBody>,
) -> Result<Json<Value>, ApiError> {
    let engagement = state.engagements.get(&id).await?;
    check_access(&engagement, claims.as_deref())?;
    let role = role_of(claims.as_deref());
    let actor = EngagementActor::from_role(role);
    let actor_id = actor_id_of(claims.as_deref());
    let engagement = state.engagements.decline(&id, actor, &actor_id, body.reason).await?;
    Ok(Json(view(&state, &engagement, role)))
}

pub async fn cancel(
    State(state): State<AppState>,
    claims: Option<Extension<Claims>>,
    Path(id): Path<String>,
    Json(body): Json<ReasonBody>,
) -> Result<Json<Value>, ApiError> {
    let role = role_of(claims.as_deref());
    if role != "admin" {
        return Err(ApiError::authorization("Only admins can cancel engagements"));
    }
    let actor_id = actor_id_of(claims.as_deref());
    let engagement = state.engagements.cancel(&id, &actor_id, role, body.reason).await?;
    Ok(Json(view(&state, &engagement, role)))
}
