//! Engagement lifecycle: state machine, transition service, role-filtered
//! views, and the clearing-to-engagement bridge.

pub mod service;
pub mod state_machine;
pub mod store;
pub mod views;

pub use service::EngagementService;
pub use state_machine::{StateMachine, TransitionError};
pub use views::serialize_engagement;
