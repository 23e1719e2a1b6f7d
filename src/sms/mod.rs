//! SMS orchestrator: a per-phone pipeline of deterministic interpretation,
//! LLM planning, tool execution, reply generation, and outbound gatekeeping
//! with a polisher retry loop.

pub mod agents;
pub mod contracts;
pub mod context;
pub mod detail_fetcher;
pub mod fallback;
pub mod gatekeeper;
pub mod interpreter;
pub mod orchestrator;
pub mod store;

pub use contracts::{CriteriaPlan, GatekeeperResult, MessageInterpretation};
pub use orchestrator::{OrchestratorResult, SmsOrchestrator};
