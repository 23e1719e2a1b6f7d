//! LLM access layer. The model is treated as a black-box text/JSON
//! generator with a defined failure mode: timeouts, transport errors, and
//! schema mismatches all surface as `Err` and every caller has a
//! deterministic degrade path.

pub mod client;

pub use client::LlmClient;
