//! HTTP middleware and inbound throttles: request logging, the
//! property-search guardrails, and the per-phone SMS throttle.

pub mod logging;
pub mod rate_limit;

pub use logging::request_logging;
pub use rate_limit::{PhoneThrottle, SearchGuard};
