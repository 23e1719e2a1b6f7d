//! Authentication & authorization: bcrypt-hashed users, JWT sessions, and
//! company-scoped ownership with buyer / supplier / admin roles.

pub mod api;
pub mod jwt;
pub mod middleware;
pub mod models;
pub mod user_store;

pub use jwt::JwtHandler;
pub use middleware::{auth_middleware, optional_auth_middleware};
pub use models::{Claims, LoginRequest, LoginResponse, RegisterRequest, Role, UserResponse};
pub use user_store::UserStore;
