//! Authentication endpoints: register, login, and whoami.

use axum::{extract::State, Extension, Json};
use serde_json::{json, Value};

use crate::api::error::ApiError;
use crate::api::AppState;
use crate::auth::models::{Claims, LoginRequest, LoginResponse, RegisterRequest, Role, UserResponse};

pub async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    if body.email.trim().is_empty() || !body.email.contains('@') {
        return Err(ApiError::validation("a valid email is required"));
    }
    if body.password.len() < 8 {
        return Err(ApiError::validation("password must be at least 8 characters"));
    }

    let role = match body.role.as_deref() {
        None | Some("buyer") => Role::Buyer,
        Some("supplier") => Role::Supplier,
        // Admin accounts are seeded, never self-registered
        Some(other) => return Err(ApiError::validation(format!("unknown role: {other}"))),
    };

    let user = state
        .users
        .register(
            body.email.trim(),
            &body.password,
            body.name.trim(),
            role.as_str(),
            body.company_name.as_deref(),
            body.phone.as_deref(),
        )
        .await
        .map_err(|e| ApiError::validation(e.to_string()))?;

    let (token, expires_in) = state.jwt.generate_token(&user).map_err(ApiError::internal)?;
    Ok(Json(LoginResponse {
        token,
        expires_in,
        role,
        user: UserResponse::from_user(&user),
    }))
}

pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let user = state
        .users
        .verify_login(body.email.trim(), &body.password)
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::authorization("invalid email or password"))?;

    let role = Role::from_str(&user.role).unwrap_or(Role::Buyer);
    let (token, expires_in) = state.jwt.generate_token(&user).map_err(ApiError::internal)?;
    Ok(Json(LoginResponse {
        token,
        expires_in,
        role,
        user: UserResponse::from_user(&user),
    }))
}

pub async fn me(
    State(state): State<AppState>,
    claims: Option<Extension<Claims>>,
) -> Result<Json<Value>, ApiError> {
    let claims = claims.ok_or_else(|| ApiError::authorization("not authenticated"))?;
    let user = state
        .users
        .get_by_id(&claims.sub)
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::not_found("user"))?;
    Ok(Json(json!(UserResponse::from_user(&user))))
}
