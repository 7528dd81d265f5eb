//! The orchestration state machine.
//!
//! `transition` is a pure function from `(context, event)` to a new
//! context; the orchestrator holds the only mutable copy and commits the
//! result after artifact validation and persistence succeed. Illegal
//! destinations leave the context untouched and report `Invalid`.

use serde::{Deserialize, Serialize};

use crate::error::ErrorRecord;

use super::context::OrchestrationContext;

// ============================================================================
// States
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum State {
    Idle,
    PlanGeneration,
    PlanRevision,
    Execution,
    FollowUps,
    GapAudit,
    GapPlan,
    SummaryGeneration,
    Complete,
    Failed,
}

impl State {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }

    pub fn is_resumable(&self) -> bool {
        !self.is_terminal() && *self != Self::Idle
    }

    /// The transition table. Only these destinations are legal; `FAILED`
    /// may only restart into `IDLE`.
    pub fn legal_targets(&self) -> &'static [State] {
        match self {
            Self::Idle => &[State::PlanGeneration],
            Self::PlanGeneration => &[State::PlanRevision, State::Execution, State::Failed],
            Self::PlanRevision => &[
                State::PlanRevision,
                State::Execution,
                State::SummaryGeneration,
                State::Failed,
            ],
            Self::Execution => &[State::FollowUps, State::GapAudit, State::Failed],
            Self::FollowUps => &[State::FollowUps, State::GapAudit, State::Failed],
            Self::GapAudit => &[State::GapPlan, State::SummaryGeneration, State::Failed],
            Self::GapPlan => &[State::Execution, State::SummaryGeneration, State::Failed],
            Self::SummaryGeneration => &[State::Complete, State::Failed],
            Self::Complete => &[],
            Self::Failed => &[State::Idle],
        }
    }

    pub fn can_transition_to(&self, target: State) -> bool {
        self.legal_targets().contains(&target)
    }

    /// Legacy lowercase phase names accepted when loading old state files.
    /// Nothing ever writes these; the canonical names are the serialized
    /// enum variants.
    pub fn from_legacy_phase(phase: &str) -> Option<State> {
        match phase {
            "idle" => Some(Self::Idle),
            "plan-generation" | "planning" => Some(Self::PlanGeneration),
            "plan-revision" => Some(Self::PlanRevision),
            "execution" | "executing" => Some(Self::Execution),
            "follow-ups" => Some(Self::FollowUps),
            "gap-audit" => Some(Self::GapAudit),
            "gap-plan" => Some(Self::GapPlan),
            "summary-generation" => Some(Self::SummaryGeneration),
            "complete" => Some(Self::Complete),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "IDLE",
            Self::PlanGeneration => "PLAN_GENERATION",
            Self::PlanRevision => "PLAN_REVISION",
            Self::Execution => "EXECUTION",
            Self::FollowUps => "FOLLOW_UPS",
            Self::GapAudit => "GAP_AUDIT",
            Self::GapPlan => "GAP_PLAN",
            Self::SummaryGeneration => "SUMMARY_GENERATION",
            Self::Complete => "COMPLETE",
            Self::Failed => "FAILED",
        };
        write!(f, "{name}")
    }
}

// ============================================================================
// Events
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    StartPlan { requirements: String },
    PlanGenerated,
    OpenQuestionsFound { count: u32 },
    QuestionsAnswered,
    ConfidenceLow { confidence: u8, threshold: u8 },
    PlanImproved,
    PlanComplete { confidence: u8 },
    ExecutionComplete { has_follow_ups: bool, has_hard_blockers: bool },
    HardBlockersResolved,
    FollowUpsComplete { has_follow_ups: bool },
    MaxFollowUpsReached,
    GapAuditComplete { gaps_identified: bool },
    GapPlanComplete,
    MaxExecIterationsReached,
    GenerateSummary,
    SummaryComplete,
    Resume { from_state: State },
    Error { record: ErrorRecord },
}

impl Event {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StartPlan { .. } => "START_PLAN",
            Self::PlanGenerated => "PLAN_GENERATED",
            Self::OpenQuestionsFound { .. } => "OPEN_QUESTIONS_FOUND",
            Self::QuestionsAnswered => "QUESTIONS_ANSWERED",
            Self::ConfidenceLow { .. } => "CONFIDENCE_LOW",
            Self::PlanImproved => "PLAN_IMPROVED",
            Self::PlanComplete { .. } => "PLAN_COMPLETE",
            Self::ExecutionComplete { .. } => "EXECUTION_COMPLETE",
            Self::HardBlockersResolved => "HARD_BLOCKERS_RESOLVED",
            Self::FollowUpsComplete { .. } => "FOLLOW_UPS_COMPLETE",
            Self::MaxFollowUpsReached => "MAX_FOLLOW_UPS_REACHED",
            Self::GapAuditComplete { .. } => "GAP_AUDIT_COMPLETE",
            Self::GapPlanComplete => "GAP_PLAN_COMPLETE",
            Self::MaxExecIterationsReached => "MAX_EXEC_ITERATIONS_REACHED",
            Self::GenerateSummary => "GENERATE_SUMMARY",
            Self::SummaryComplete => "SUMMARY_COMPLETE",
            Self::Resume { .. } => "RESUME",
            Self::Error { .. } => "ERROR",
        }
    }
}

// ============================================================================
// Transition result
// ============================================================================

/// Record of one accepted transition, kept in the in-memory history (not
/// persisted; resume starts with an empty log).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionRecord {
    pub from: State,
    pub to: State,
    pub event: String,
    pub at: String,
}

#[derive(Debug, Clone)]
pub struct AcceptedTransition {
    pub from: State,
    pub to: State,
    pub event: &'static str,
    pub context: OrchestrationContext,
}

#[derive(Debug, Clone)]
pub enum TransitionOutcome {
    Accepted(Box<AcceptedTransition>),
    /// The event has no legal destination from the current state; the
    /// context is unchanged.
    Invalid {
        state: State,
        event: &'static str,
        reason: String,
    },
}

impl TransitionOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }
}

// ============================================================================
// Transition function
// ============================================================================

/// Apply `event` to `context`, producing the successor context without
/// mutating the input.
pub fn transition(
    context: &OrchestrationContext,
    event: &Event,
    now_iso: &str,
) -> TransitionOutcome {
    let current = context.current_state;
    let invalid = |reason: String| TransitionOutcome::Invalid {
        state: current,
        event: event.kind(),
        reason,
    };

    // Resume has its own legality rule: a legal transition to the saved
    // state, or the crash-recovery bypass from IDLE into any non-terminal,
    // non-IDLE state.
    if let Event::Resume { from_state } = event {
        let legal = current.can_transition_to(*from_state)
            || (current == State::Idle && from_state.is_resumable());
        if !legal {
            return invalid(format!("cannot resume from {current} into {from_state}"));
        }
        let mut next = context.clone();
        next.current_state = *from_state;
        next.last_transition_at = now_iso.to_string();
        if *from_state == State::Idle {
            // Restart after FAILED: counters reset, the error is cleared.
            next.plan_revision_count = 0;
            next.exec_iteration_count = 0;
            next.follow_up_iteration_count = 0;
            next.has_done_iteration0 = false;
            next.last_confidence = 0;
            next.last_error = None;
        }
        return TransitionOutcome::Accepted(Box::new(AcceptedTransition {
            from: current,
            to: *from_state,
            event: event.kind(),
            context: next,
        }));
    }

    let mut next = context.clone();
    let target = match event {
        Event::StartPlan { .. } => State::PlanGeneration,
        Event::PlanGenerated => State::PlanRevision,
        Event::OpenQuestionsFound { .. }
        | Event::QuestionsAnswered
        | Event::ConfidenceLow { .. } => State::PlanRevision,
        Event::PlanImproved => {
            next.plan_revision_count += 1;
            State::PlanRevision
        }
        Event::PlanComplete { confidence } => {
            next.last_confidence = *confidence;
            next.exec_iteration_count = 1;
            next.follow_up_iteration_count = 0;
            next.has_done_iteration0 = false;
            State::Execution
        }
        Event::ExecutionComplete {
            has_follow_ups,
            has_hard_blockers,
        } => {
            // Hard blockers strictly beat follow-ups: iteration 0 runs the
            // blocker-resolution pass before any ordinary follow-up work.
            if *has_hard_blockers {
                next.follow_up_iteration_count = 0;
                next.has_done_iteration0 = false;
                State::FollowUps
            } else if *has_follow_ups {
                next.follow_up_iteration_count = 0;
                next.has_done_iteration0 = true;
                State::FollowUps
            } else {
                State::GapAudit
            }
        }
        Event::HardBlockersResolved => {
            next.has_done_iteration0 = true;
            next.follow_up_iteration_count += 1;
            State::FollowUps
        }
        Event::FollowUpsComplete { has_follow_ups } => {
            if *has_follow_ups {
                next.follow_up_iteration_count += 1;
                State::FollowUps
            } else {
                State::GapAudit
            }
        }
        Event::MaxFollowUpsReached => State::GapAudit,
        Event::GapAuditComplete { gaps_identified } => {
            if *gaps_identified {
                State::GapPlan
            } else {
                State::SummaryGeneration
            }
        }
        Event::GapPlanComplete => {
            next.exec_iteration_count += 1;
            next.follow_up_iteration_count = 0;
            next.has_done_iteration0 = false;
            State::Execution
        }
        Event::MaxExecIterationsReached => State::SummaryGeneration,
        Event::GenerateSummary => State::SummaryGeneration,
        Event::SummaryComplete => State::Complete,
        Event::Error { record } => {
            if current.is_terminal() {
                return invalid("terminal states have no outgoing transitions".to_string());
            }
            next.last_error = Some(record.clone());
            State::Failed
        }
        Event::Resume { .. } => unreachable!("resume handled above"),
    };

    if !current.can_transition_to(target) {
        return invalid(format!("{current} cannot transition to {target}"));
    }

    next.current_state = target;
    next.last_transition_at = now_iso.to_string();
    TransitionOutcome::Accepted(Box::new(AcceptedTransition {
        from: current,
        to: target,
        event: event.kind(),
        context: next,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: &str = "2026-08-01T00:00:00.000Z";

    fn ctx() -> OrchestrationContext {
        OrchestrationContext::new(T.to_string())
    }

    fn accept(context: &OrchestrationContext, event: Event) -> OrchestrationContext {
        match transition(context, &event, T) {
            TransitionOutcome::Accepted(acc) => {
                assert!(
                    acc.context.invariants_hold(),
                    "invariants broken after {}",
                    event.kind()
                );
                acc.context
            }
            TransitionOutcome::Invalid { reason, .. } => {
                panic!("expected accepted {}: {reason}", event.kind())
            }
        }
    }

    #[test]
    fn test_start_plan_only_from_idle() {
        let started = accept(
            &ctx(),
            Event::StartPlan {
                requirements: "X".to_string(),
            },
        );
        assert_eq!(started.current_state, State::PlanGeneration);

        let again = transition(
            &started,
            &Event::StartPlan {
                requirements: "X".to_string(),
            },
            T,
        );
        assert!(!again.is_accepted(), "START_PLAN is only legal from IDLE");
    }

    #[test]
    fn test_plan_complete_enters_execution_at_iteration_one() {
        let mut c = accept(&ctx(), Event::StartPlan { requirements: "X".to_string() });
        c = accept(&c, Event::PlanGenerated);
        c = accept(&c, Event::PlanComplete { confidence: 90 });
        assert_eq!(c.current_state, State::Execution);
        assert_eq!(c.exec_iteration_count, 1);
        assert_eq!(c.last_confidence, 90);
    }

    #[test]
    fn test_plan_improved_increments_revisions() {
        let mut c = accept(&ctx(), Event::StartPlan { requirements: "X".to_string() });
        c = accept(&c, Event::PlanGenerated);
        c = accept(&c, Event::PlanImproved);
        c = accept(&c, Event::PlanImproved);
        assert_eq!(c.plan_revision_count, 2);
        c = accept(&c, Event::PlanComplete { confidence: 87 });
        assert_eq!(c.current_state, State::Execution);
        assert_eq!(c.exec_iteration_count, 1);
    }

    #[test]
    fn test_hard_blockers_beat_follow_ups() {
        let mut c = accept(&ctx(), Event::StartPlan { requirements: "X".to_string() });
        c = accept(&c, Event::PlanGenerated);
        c = accept(&c, Event::PlanComplete { confidence: 90 });
        c = accept(
            &c,
            Event::ExecutionComplete {
                has_follow_ups: true,
                has_hard_blockers: true,
            },
        );
        assert_eq!(c.current_state, State::FollowUps);
        assert_eq!(c.follow_up_iteration_count, 0);
        assert!(!c.has_done_iteration0, "iteration 0 still has to run");
    }

    #[test]
    fn test_follow_ups_without_blockers_skip_iteration_zero() {
        let mut c = accept(&ctx(), Event::StartPlan { requirements: "X".to_string() });
        c = accept(&c, Event::PlanGenerated);
        c = accept(&c, Event::PlanComplete { confidence: 90 });
        c = accept(
            &c,
            Event::ExecutionComplete {
                has_follow_ups: true,
                has_hard_blockers: false,
            },
        );
        assert_eq!(c.current_state, State::FollowUps);
        assert!(c.has_done_iteration0);
    }

    #[test]
    fn test_follow_up_self_transition_increments() {
        let mut c = accept(&ctx(), Event::StartPlan { requirements: "X".to_string() });
        c = accept(&c, Event::PlanGenerated);
        c = accept(&c, Event::PlanComplete { confidence: 90 });
        c = accept(
            &c,
            Event::ExecutionComplete {
                has_follow_ups: true,
                has_hard_blockers: false,
            },
        );
        c = accept(&c, Event::FollowUpsComplete { has_follow_ups: true });
        c = accept(&c, Event::FollowUpsComplete { has_follow_ups: true });
        assert_eq!(c.follow_up_iteration_count, 2);
        c = accept(&c, Event::FollowUpsComplete { has_follow_ups: false });
        assert_eq!(c.current_state, State::GapAudit);
    }

    #[test]
    fn test_gap_closure_loop_increments_execution() {
        let mut c = accept(&ctx(), Event::StartPlan { requirements: "X".to_string() });
        c = accept(&c, Event::PlanGenerated);
        c = accept(&c, Event::PlanComplete { confidence: 90 });
        c = accept(
            &c,
            Event::ExecutionComplete {
                has_follow_ups: false,
                has_hard_blockers: false,
            },
        );
        c = accept(&c, Event::GapAuditComplete { gaps_identified: true });
        assert_eq!(c.current_state, State::GapPlan);
        c = accept(&c, Event::GapPlanComplete);
        assert_eq!(c.current_state, State::Execution);
        assert_eq!(c.exec_iteration_count, 2);
        assert_eq!(c.follow_up_iteration_count, 0);
        assert!(!c.has_done_iteration0);
    }

    #[test]
    fn test_happy_path_reaches_complete() {
        let mut c = accept(&ctx(), Event::StartPlan { requirements: "X".to_string() });
        c = accept(&c, Event::PlanGenerated);
        c = accept(&c, Event::PlanComplete { confidence: 90 });
        c = accept(
            &c,
            Event::ExecutionComplete {
                has_follow_ups: false,
                has_hard_blockers: false,
            },
        );
        c = accept(&c, Event::GapAuditComplete { gaps_identified: false });
        assert_eq!(c.current_state, State::SummaryGeneration);
        c = accept(&c, Event::SummaryComplete);
        assert_eq!(c.current_state, State::Complete);
        assert_eq!(c.exec_iteration_count, 1);
        assert_eq!(c.plan_revision_count, 0);
    }

    #[test]
    fn test_error_forces_failed_and_records() {
        let mut c = accept(&ctx(), Event::StartPlan { requirements: "X".to_string() });
        c = accept(
            &c,
            Event::Error {
                record: ErrorRecord::new("engine-invocation", "codex exited 1", T),
            },
        );
        assert_eq!(c.current_state, State::Failed);
        assert_eq!(c.last_error.as_ref().unwrap().kind, "engine-invocation");
    }

    #[test]
    fn test_terminal_states_reject_events() {
        let mut c = ctx();
        c.current_state = State::Complete;
        let out = transition(
            &c,
            &Event::Error {
                record: ErrorRecord::new("x", "y", T),
            },
            T,
        );
        assert!(!out.is_accepted());
        let out = transition(&c, &Event::GenerateSummary, T);
        assert!(!out.is_accepted());
    }

    #[test]
    fn test_failed_can_restart_to_idle_via_resume() {
        let mut c = ctx();
        c.current_state = State::Failed;
        c.exec_iteration_count = 2;
        c.last_error = Some(ErrorRecord::new("x", "y", T));

        let restarted = accept(&c, Event::Resume { from_state: State::Idle });
        assert_eq!(restarted.current_state, State::Idle);
        assert_eq!(restarted.exec_iteration_count, 0);
        assert!(restarted.last_error.is_none());
    }

    #[test]
    fn test_resume_bypass_from_idle() {
        let mut saved = ctx();
        saved.exec_iteration_count = 1;
        saved.follow_up_iteration_count = 3;
        saved.has_done_iteration0 = true;

        // IDLE cannot legally reach FOLLOW_UPS, but the bypass rule allows
        // resuming into any non-terminal, non-IDLE state.
        let resumed = accept(&saved, Event::Resume { from_state: State::FollowUps });
        assert_eq!(resumed.current_state, State::FollowUps);
        assert_eq!(resumed.follow_up_iteration_count, 3);
    }

    #[test]
    fn test_resume_rejects_terminal_targets() {
        let c = ctx();
        let out = transition(&c, &Event::Resume { from_state: State::Complete }, T);
        assert!(!out.is_accepted());
        let out = transition(&c, &Event::Resume { from_state: State::Idle }, T);
        assert!(!out.is_accepted(), "IDLE to IDLE resume is meaningless");
    }

    #[test]
    fn test_invalid_leaves_context_unchanged() {
        let c = ctx();
        let before = c.clone();
        let out = transition(&c, &Event::GapPlanComplete, T);
        assert!(!out.is_accepted());
        assert_eq!(c, before);
    }

    #[test]
    fn test_legacy_phase_names_map_to_states() {
        assert_eq!(
            State::from_legacy_phase("follow-ups"),
            Some(State::FollowUps)
        );
        assert_eq!(
            State::from_legacy_phase("summary-generation"),
            Some(State::SummaryGeneration)
        );
        assert_eq!(State::from_legacy_phase("bogus"), None);
    }

    #[test]
    fn test_serialized_state_names_are_canonical() {
        let json = serde_json::to_string(&State::PlanGeneration).unwrap();
        assert_eq!(json, "\"PLAN_GENERATION\"");
    }
}
