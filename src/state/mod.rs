//! Orchestration state: the pure state machine, the mutable context and
//! its durable persistence.

pub mod context;
pub mod machine;
pub mod persistence;

pub use context::OrchestrationContext;
pub use machine::{
    transition, AcceptedTransition, Event, State, TransitionOutcome, TransitionRecord,
};
pub use persistence::{
    find_latest_resumable_run, load_run_state, save_run_state, ResumableRun, RunState,
};
