//! Authentication data structures.

use serde::{Deserialize, Serialize};

use crate::domain::User;

/// Platform roles. Every route's response view is filtered by this.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Buyer,
    Supplier,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Buyer => "buyer",
            Role::Supplier => "supplier",
            Role::Admin => "admin",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "buyer" => Some(Role::Buyer),
            "supplier" => Some(Role::Supplier),
            "admin" | "broker" => Some(Role::Admin),
            _ => None,
        }
    }
}

/// JWT claims payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user id)
    pub sub: String,
    pub email: String,
    pub role: Role,
    pub company_id: Option<String>,
    /// Expiration timestamp
    pub exp: usize,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub name: String,
    pub role: Option<String>,
    pub company_name: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    /// Seconds until expiration
    pub expires_in: usize,
    pub role: Role,
    pub user: UserResponse,
}

/// Sanitized user payload — never carries the password hash.
#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: String,
    pub email: String,
    pub name: String,
    pub role: String,
    pub company_id: Option<String>,
    pub created_at: String,
}

impl UserResponse {
    pub fn from_user(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            email: user.email.clone(),
            name: user.name.clone(),
            role: user.role.clone(),
            company_id: user.company_id.clone(),
            created_at: user.created_at.to_rfc3339(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_serialization() {
        assert_eq!(serde_json::to_string(&Role::Supplier).unwrap(), r#""supplier""#);
        let role: Role = serde_json::from_str(r#""buyer""#).unwrap();
        assert_eq!(role, Role::Buyer);
    }

    #[test]
    fn test_role_string_conversion() {
        assert_eq!(Role::Admin.as_str(), "admin");
        assert_eq!(Role::from_str("SUPPLIER"), Some(Role::Supplier));
        // Brokers act with admin privileges
        assert_eq!(Role::from_str("broker"), Some(Role::Admin));
        assert_eq!(Role::from_str("invalid"), None);
    }
}
