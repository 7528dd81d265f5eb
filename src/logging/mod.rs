//! Structured, event-typed logging for orchestration runs.
//!
//! Every record carries the run id, phase, iteration and mode so that log
//! aggregation can slice a run without parsing message text. Payload text
//! passes through secret redaction before it reaches a subscriber.

pub mod redaction;

use serde::Serialize;

use crate::state::State;

/// Event types emitted over the lifetime of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    RunStarted,
    PhaseStarted,
    PhaseCompleted,
    IterationStarted,
    IterationCompleted,
    EngineInvocationStarted,
    EngineInvocationCompleted,
    EngineInvocationFailed,
    ArtifactWritten,
    ArtifactValidated,
    ArtifactValidationFailed,
    StateTransition,
    StopConditionMet,
    LimitExceeded,
    RunCompleted,
    RunFailed,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RunStarted => "run_started",
            Self::PhaseStarted => "phase_started",
            Self::PhaseCompleted => "phase_completed",
            Self::IterationStarted => "iteration_started",
            Self::IterationCompleted => "iteration_completed",
            Self::EngineInvocationStarted => "engine_invocation_started",
            Self::EngineInvocationCompleted => "engine_invocation_completed",
            Self::EngineInvocationFailed => "engine_invocation_failed",
            Self::ArtifactWritten => "artifact_written",
            Self::ArtifactValidated => "artifact_validated",
            Self::ArtifactValidationFailed => "artifact_validation_failed",
            Self::StateTransition => "state_transition",
            Self::StopConditionMet => "stop_condition_met",
            Self::LimitExceeded => "limit_exceeded",
            Self::RunCompleted => "run_completed",
            Self::RunFailed => "run_failed",
        }
    }
}

/// Per-run logger binding the identity fields onto every record.
#[derive(Debug, Clone)]
pub struct RunLogger {
    run_id: String,
    mode: &'static str,
}

impl RunLogger {
    pub fn new(run_id: impl Into<String>, mode: &'static str) -> Self {
        Self {
            run_id: run_id.into(),
            mode,
        }
    }

    /// Emit a typed event. `phase` is the state owning the event and
    /// `iteration` the current execution iteration (0 before execution).
    pub fn event(&self, kind: EventKind, phase: State, iteration: u32, detail: &str) {
        tracing::info!(
            target: "tenacious_c::event",
            event = kind.as_str(),
            run_id = %self.run_id,
            phase = %phase,
            iteration,
            mode = self.mode,
            "{}",
            redaction::redact(detail)
        );
    }

    pub fn debug(&self, message: &str) {
        tracing::debug!(run_id = %self.run_id, mode = self.mode, "{}", redaction::redact(message));
    }

    pub fn info(&self, message: &str) {
        tracing::info!(run_id = %self.run_id, mode = self.mode, "{}", redaction::redact(message));
    }

    pub fn warn(&self, message: &str) {
        tracing::warn!(run_id = %self.run_id, mode = self.mode, "{}", redaction::redact(message));
    }

    pub fn error(&self, message: &str) {
        tracing::error!(run_id = %self.run_id, mode = self.mode, "{}", redaction::redact(message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_names_are_snake_case() {
        assert_eq!(EventKind::RunStarted.as_str(), "run_started");
        assert_eq!(
            EventKind::ArtifactValidationFailed.as_str(),
            "artifact_validation_failed"
        );
        assert_eq!(EventKind::StateTransition.as_str(), "state_transition");
    }
}
