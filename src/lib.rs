//! Tenacious-C: a command-line orchestrator that drives external AI
//! coding engines through a repeatable plan -> execute -> audit ->
//! gap-close loop until a quality threshold is met or the iteration
//! budget runs out.
//!
//! The orchestrator never modifies source code itself. It feeds prompts
//! to engines, consumes the structured artifacts they produce, and
//! decides what to do next; every decision is driven by metadata JSON,
//! never by parsing markdown.

pub mod artifacts;
pub mod config;
pub mod engines;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod policy;
pub mod ports;
pub mod state;

// Re-export main types
pub use artifacts::{
    ArtifactStore, ExecuteMetadata, GapAuditMetadata, HardBlocker, PlanMetadata, SCHEMA_VERSION,
};
pub use config::{EffectiveConfig, TenaciousConfig, ToolName, UNLIMITED};
pub use error::{
    EngineInvocationError, ErrorRecord, FsError, FsErrorKind, OrchestratorError, PrompterError,
    SchemaViolation, ValidationError,
};
pub use orchestrator::{Dependencies, Orchestrator, RunOutcome, RunSummary, StepResult};
pub use policy::{IterationProgress, StopDecision};
pub use state::{Event, OrchestrationContext, RunState, State, TransitionRecord};
