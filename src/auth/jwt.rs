//! JWT issue and validation.

use anyhow::{Context, Result};
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use tracing::debug;

use crate::auth::models::{Claims, Role};
use crate::domain::User;

pub struct JwtHandler {
    secret: String,
    expiration_hours: i64,
}

impl JwtHandler {
    pub fn new(secret: String) -> Self {
        Self {
            secret,
            expiration_hours: 24,
        }
    }

    /// Generate a token for a user. Returns (token, seconds-to-expiry).
    pub fn generate_token(&self, user: &User) -> Result<(String, usize)> {
        let expiration = Utc::now()
            .checked_add_signed(chrono::Duration::hours(self.expiration_hours))
            .context("Invalid timestamp")?
            .timestamp() as usize;
        let expires_in = (self.expiration_hours * 3600) as usize;

        let claims = Claims {
            sub: user.id.clone(),
            email: user.email.clone(),
            role: Role::from_str(&user.role).unwrap_or(Role::Buyer),
            company_id: user.company_id.clone(),
            exp: expiration,
        };

        debug!(user = %user.id, "Generating JWT");

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .context("Failed to generate JWT")?;

        Ok((token, expires_in))
    }

    pub fn validate_token(&self, token: &str) -> Result<Claims> {
        let decoded = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )
        .context("Invalid or expired token")?;
        Ok(decoded.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_user(role: &str) -> User {
        User {
            id: "u-1".into(),
            email: "owner@example.com".into(),
            password_hash: "hash".into(),
            name: "Owner".into(),
            phone: None,
            role: role.into(),
            is_active: true,
            company_id: Some("c-1".into()),
            company_role: Some("admin".into()),
            created_at: Utc::now(),
            last_login_at: None,
        }
    }

    #[test]
    fn test_jwt_round_trip() {
        let handler = JwtHandler::new("test-secret-key-12345".to_string());
        let user = test_user("supplier");

        let (token, expires_in) = handler.generate_token(&user).unwrap();
        assert!(!token.is_empty());
        assert_eq!(expires_in, 24 * 3600);

        let claims = handler.validate_token(&token).unwrap();
        assert_eq!(claims.sub, "u-1");
        assert_eq!(claims.role, Role::Supplier);
        assert_eq!(claims.company_id.as_deref(), Some("c-1"));
    }

    #[test]
    fn test_invalid_token_rejected() {
        let handler = JwtHandler::new("test-secret-key-12345".to_string());
        assert!(handler.validate_token("invalid.token.here").is_err());
    }

    #[test]
    fn test_different_secrets_reject() {
        let handler1 = JwtHandler::new("secret1".to_string());
        let handler2 = JwtHandler::new("secret2".to_string());
        let (token, _) = handler1.generate_token(&test_user("buyer")).unwrap();
        assert!(handler2.validate_token(&token).is_err());
    }
}
