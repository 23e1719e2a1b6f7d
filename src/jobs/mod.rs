//! Background automation: eleven idempotent periodic jobs and the
//! table-driven scheduler that runs them.

pub mod engagement_jobs;
pub mod scheduler;

pub use scheduler::{run_job, spawn_all, Cadence, JOB_TABLE};
