//! JWT validation middleware.
//!
//! The strict variant rejects unauthenticated requests; the optional
//! variant attaches claims when a valid token is present and lets the
//! request through either way (buyer flows work anonymously until the
//! account-created stage).

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use crate::auth::jwt::JwtHandler;
use crate::auth::models::Claims;

pub async fn auth_middleware(
    State(jwt_handler): State<Arc<JwtHandler>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let token = req
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(str::to_string)
        .ok_or(AuthError::MissingToken)?;

    let claims = jwt_handler
        .validate_token(&token)
        .map_err(|_| AuthError::InvalidToken)?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

pub async fn optional_auth_middleware(
    State(jwt_handler): State<Arc<JwtHandler>>,
    mut req: Request,
    next: Next,
) -> Response {
    if let Some(token) = req
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
    {
        if let Ok(claims) = jwt_handler.validate_token(token) {
            req.extensions_mut().insert(claims);
        }
    }
    next.run(req).await
}

pub fn extract_claims(req: &Request) -> Option<&Claims> {
    req.extensions().get::<Claims>()
}

#[derive(Debug)]
pub enum AuthError {
    MissingToken,
    InvalidToken,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthError::MissingToken => (StatusCode::UNAUTHORIZED, "Missing authorization token"),
            AuthError::InvalidToken => (StatusCode::UNAUTHORIZED, "Invalid or expired token"),
        };
        (status, axum::Json(serde_json::json!({"error": message, "code": "unauthorized"})))
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::models::Role;
    use axum::body::Body;
    use axum::http::Request as HttpRequest;

    #[test]
    fn test_auth_error_responses() {
        assert_eq!(AuthError::MissingToken.into_response().status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AuthError::InvalidToken.into_response().status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_extract_claims_from_request() {
        let mut req = HttpRequest::new(Body::empty());
        assert!(extract_claims(&req).is_none());

        let claims = Claims {
            sub: "u-1".into(),
            email: "x@example.com".into(),
            role: Role::Supplier,
            company_id: None,
            exp: 4102444800,
        };
        req.extensions_mut().insert(claims);

        let extracted = extract_claims(&req).unwrap();
        assert_eq!(extracted.sub, "u-1");
        assert_eq!(extracted.role, Role::Supplier);
    }
}
