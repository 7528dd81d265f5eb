//! Top-level orchestration driver.

pub mod driver;

pub use driver::{Dependencies, Orchestrator, RunOutcome, RunSummary, StepResult};
