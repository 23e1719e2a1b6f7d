//! HTTP surface: thin axum adapters over the core services.
//!
//! Authorization is role-based with role-filtered response views; errors
//! map onto JSON `{ "error", "code" }` bodies via [`error::ApiError`].

pub mod admin;
pub mod buyer;
pub mod dla;
pub mod engagements;
pub mod error;
pub mod sms;
pub mod supplier;

use axum::{
    extract::State,
    middleware as axum_mw,
    routing::{get, patch, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::auth::{
    api as auth_api, auth_middleware, optional_auth_middleware, Claims, JwtHandler, UserStore,
};
use crate::clearing::engine::ClearingEngine;
use crate::db::Db;
use crate::dla::DlaService;
use crate::engagement::EngagementService;
use crate::geocode::GeocodeClient;
use crate::llm::LlmClient;
use crate::middleware::{request_logging, PhoneThrottle, SearchGuard};
use crate::sms::SmsOrchestrator;

/// Inbound SMS cap per phone per minute.
const SMS_MESSAGES_PER_MINUTE: usize = 6;

#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    pub jwt: Arc<JwtHandler>,
    pub users: Arc<UserStore>,
    pub engagements: Arc<EngagementService>,
    pub clearing: Arc<ClearingEngine>,
    pub dla: Arc<DlaService>,
    pub sms: Arc<SmsOrchestrator>,
    pub llm: LlmClient,
    pub geocode: GeocodeClient,
    pub search_guard: SearchGuard,
    pub sms_throttle: PhoneThrottle,
    pub frontend_url: String,
}

impl AppState {
    pub fn new(db: Db, llm: LlmClient, geocode: GeocodeClient, jwt_secret: String, frontend_url: String) -> Self {
        Self {
            jwt: Arc::new(JwtHandler::new(jwt_secret)),
            users: Arc::new(UserStore::new(db.clone())),
            engagements: Arc::new(EngagementService::new(db.clone())),
            clearing: Arc::new(ClearingEngine::new(db.clone(), llm.clone())),
            dla: Arc::new(DlaService::new(db.clone())),
            sms: Arc::new(SmsOrchestrator::new(
                db.clone(),
                llm.clone(),
                geocode.clone(),
                frontend_url.clone(),
            )),
            llm,
            geocode,
            search_guard: SearchGuard::new(10),
            sms_throttle: PhoneThrottle::new(
                SMS_MESSAGES_PER_MINUTE,
                std::time::Duration::from_secs(60),
            ),
            db,
            frontend_url,
        }
    }
}

/// Resolve the acting role from optional claims; anonymous callers act as
/// buyers (the SMS and pre-account web flows).
pub fn role_of(claims: Option<&Claims>) -> &str {
    claims.map(|c| c.role.as_str()).unwrap_or("buyer")
}

pub fn actor_id_of(claims: Option<&Claims>) -> String {
    claims.map(|c| c.sub.clone()).unwrap_or_else(|| "anonymous".into())
}

async fn healthz(State(_state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

/// Assemble the full application router.
pub fn build_router(state: AppState) -> Router {
    let jwt = state.jwt.clone();

    // Routes that reject unauthenticated callers outright. Handlers still
    // do their own role checks; the layer guarantees a validated token.
    let authed = Router::new()
        .route("/api/auth/me", get(auth_api::me))
        .route("/api/engagements/:id/link-buyer", post(engagements::link_buyer))
        .route("/api/engagements/:id/agreement/send", post(engagements::send_agreement))
        .route("/api/engagements/:id/cancel", post(engagements::cancel))
        .route("/api/admin/settlement/accept", post(admin::settlement_accept))
        .route("/api/supplier/warehouses", get(supplier::list_warehouses))
        .route("/api/supplier/warehouse/:id/activate", post(supplier::activate))
        .route("/api/supplier/warehouse/:id/toggle", patch(supplier::toggle))
        .route("/api/supplier/warehouse/:id/upload-token", post(supplier::create_upload_token))
        .route("/api/supplier/questions/:id/answer", post(supplier::answer_question))
        .route_layer(axum_mw::from_fn_with_state(jwt.clone(), auth_middleware));

    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/auth/register", post(auth_api::register))
        .route("/api/auth/login", post(auth_api::login))
        // Engagement lifecycle — anonymous buyers act until account-bound
        .route("/api/engagements", get(engagements::list))
        .route("/api/engagements/:id", get(engagements::get_one))
        .route("/api/engagements/:id/timeline", get(engagements::timeline))
        .route("/api/engagements/:id/payments", get(engagements::payments))
        .route("/api/engagements/:id/deal-ping/accept", post(engagements::accept_deal_ping))
        .route("/api/engagements/:id/deal-ping/decline", post(engagements::decline_deal_ping))
        .route("/api/engagements/:id/accept", post(engagements::accept_match))
        .route("/api/engagements/:id/guarantee/sign", post(engagements::sign_guarantee))
        .route("/api/engagements/:id/tour/request", post(engagements::request_tour))
        .route("/api/engagements/:id/tour/confirm", post(engagements::confirm_tour))
        .route("/api/engagements/:id/tour/reschedule", post(engagements::reschedule_tour))
        .route("/api/engagements/:id/tour/complete", post(engagements::complete_tour))
        .route("/api/engagements/:id/instant-book", post(engagements::request_instant_book))
        .route("/api/engagements/:id/instant-book/confirm", post(engagements::confirm_instant_book))
        .route("/api/engagements/:id/confirm", post(engagements::buyer_confirm))
        .route("/api/engagements/:id/agreement/sign", post(engagements::sign_agreement))
        .route("/api/engagements/:id/onboarding", post(engagements::update_onboarding))
        .route("/api/engagements/:id/decline", post(engagements::decline))
        // DLA token flow — the token is the only credential
        .route("/api/dla/:token", get(dla::resolve))
        .route("/api/dla/:token/confirm", post(dla::resolve_post))
        .route("/api/dla/:token/rate", post(dla::rate_decision))
        .route("/api/dla/:token/agree", post(dla::agree))
        .route("/api/dla/:token/outcome", post(dla::outcome))
        // Supplier surface
        .route("/api/supplier/estimate", post(supplier::estimate))
        // Buyer surface
        .route("/api/buyer/search", post(buyer::search))
        .route("/api/buyer/match-count", post(buyer::match_count))
        // SMS webhook
        .route("/api/sms/inbound", post(sms::inbound))
        .merge(authed)
        .layer(axum_mw::from_fn_with_state(jwt, optional_auth_middleware))
        .layer(axum_mw::from_fn(request_logging))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
