//! The mutable orchestration context: one per run, owned by the
//! orchestrator, mutated only through accepted state-machine transitions.

use serde::{Deserialize, Serialize};

use crate::error::ErrorRecord;

use super::machine::State;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestrationContext {
    pub current_state: State,
    /// Accepted plan revisions.
    pub plan_revision_count: u32,
    /// 1-indexed; 0 until the first entry into EXECUTION.
    pub exec_iteration_count: u32,
    /// 0-indexed within the current execution iteration.
    pub follow_up_iteration_count: u32,
    /// The hard-blocker-resolution pass completed for the current
    /// execution iteration (or was never needed).
    pub has_done_iteration0: bool,
    /// Last reported plan confidence in [0, 100].
    pub last_confidence: u8,
    pub last_error: Option<ErrorRecord>,
    pub started_at: String,
    pub last_transition_at: String,
}

impl OrchestrationContext {
    pub fn new(started_at: String) -> Self {
        Self {
            current_state: State::Idle,
            plan_revision_count: 0,
            exec_iteration_count: 0,
            follow_up_iteration_count: 0,
            has_done_iteration0: false,
            last_confidence: 0,
            last_error: None,
            last_transition_at: started_at.clone(),
            started_at,
        }
    }

    /// Check the structural invariants that must hold after every
    /// accepted transition. Used by tests and the resume re-scan.
    pub fn invariants_hold(&self) -> bool {
        let pre_execution = matches!(
            self.current_state,
            State::Idle | State::PlanGeneration | State::PlanRevision
        );
        if pre_execution != (self.exec_iteration_count == 0) {
            return false;
        }
        if self.follow_up_iteration_count > 0 && !self.has_done_iteration0 {
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_context_is_idle_and_zeroed() {
        let ctx = OrchestrationContext::new("2026-08-01T00:00:00.000Z".to_string());
        assert_eq!(ctx.current_state, State::Idle);
        assert_eq!(ctx.exec_iteration_count, 0);
        assert_eq!(ctx.plan_revision_count, 0);
        assert!(ctx.invariants_hold());
    }

    #[test]
    fn test_invariant_exec_count_matches_state() {
        let mut ctx = OrchestrationContext::new("t0".to_string());
        ctx.current_state = State::Execution;
        assert!(!ctx.invariants_hold(), "execution with count 0 is invalid");

        ctx.exec_iteration_count = 1;
        assert!(ctx.invariants_hold());

        ctx.current_state = State::PlanRevision;
        assert!(!ctx.invariants_hold(), "plan revision with count 1 is invalid");
    }
}
