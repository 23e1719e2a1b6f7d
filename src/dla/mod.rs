//! Demand-Led Activation: token-driven onboarding of off-network suppliers
//! in response to a specific buyer need.

pub mod service;

pub use service::{generate_token_string, DlaService};
