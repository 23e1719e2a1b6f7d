//! WEx Backend Library
//!
//! Core of the warehouse-space clearinghouse: the clearing engine, the
//! engagement state machine, the SMS orchestrator, and the background
//! scheduler, plus the HTTP surface over them.

pub mod api;
pub mod auth;
pub mod clearing;
pub mod db;
pub mod dla;
pub mod domain;
pub mod engagement;
pub mod geocode;
pub mod jobs;
pub mod llm;
pub mod middleware;
pub mod models;
pub mod sms;

pub use api::{build_router, AppState};
pub use db::Db;
pub use models::Config;
