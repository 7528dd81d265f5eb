//! Iteration policy: pure stop-condition predicates over the effective
//! config, the live counters and the signals read from artifact metadata.
//!
//! These functions never touch the filesystem or the state machine; the
//! orchestrator queries them at decision points and turns the verdict
//! into events.

use serde::Serialize;

use crate::config::EffectiveConfig;

/// Verdict of a stop-condition check.
#[derive(Debug, Clone, PartialEq)]
pub enum StopDecision {
    /// The quality condition is satisfied; move on.
    ConditionMet { message: String },
    /// Nothing left to do (follow-up checks only).
    NoMoreWork { message: String },
    /// The bounded budget ran out before convergence.
    LimitReached {
        message: String,
        /// Ordered, actionable remediation hints shown to the user.
        next_steps: Vec<String>,
    },
    /// Keep iterating.
    Continue {
        reason: &'static str,
        message: String,
    },
}

impl StopDecision {
    pub fn should_stop(&self) -> bool {
        !matches!(self, Self::Continue { .. })
    }

    pub fn is_limit(&self) -> bool {
        matches!(self, Self::LimitReached { .. })
    }

    pub fn message(&self) -> &str {
        match self {
            Self::ConditionMet { message }
            | Self::NoMoreWork { message }
            | Self::LimitReached { message, .. }
            | Self::Continue { message, .. } => message,
        }
    }
}

/// Plan revision loop: converged when there are no open questions and the
/// confidence clears the threshold.
pub fn check_plan_revision_stop(
    cfg: &EffectiveConfig,
    revision_count: u32,
    has_open_questions: bool,
    last_confidence: u8,
) -> StopDecision {
    let threshold = cfg.thresholds.plan_confidence;
    if !has_open_questions && last_confidence >= threshold {
        return StopDecision::ConditionMet {
            message: format!(
                "plan converged: confidence {last_confidence} >= {threshold}, no open questions"
            ),
        };
    }

    let limit = cfg.limits.max_plan_iterations;
    if !cfg.is_unlimited(limit) && revision_count >= limit {
        return StopDecision::LimitReached {
            message: format!("plan revision limit reached ({revision_count}/{limit})"),
            next_steps: vec![
                "Answer the remaining open questions manually or resume with --resume".to_string(),
                "Increase maxPlanIterations or run with --unlimited".to_string(),
                format!("Lower the confidence threshold (currently {threshold})"),
            ],
        };
    }

    if has_open_questions {
        StopDecision::Continue {
            reason: "open-questions",
            message: "open questions remain; revising the plan".to_string(),
        }
    } else {
        StopDecision::Continue {
            reason: "below-threshold",
            message: format!("confidence {last_confidence} below threshold {threshold}; revising"),
        }
    }
}

/// Follow-up loop within one execution iteration.
pub fn check_follow_up_stop(
    cfg: &EffectiveConfig,
    iteration_count: u32,
    has_follow_ups: bool,
    has_hard_blockers: bool,
) -> StopDecision {
    if !has_follow_ups && !has_hard_blockers {
        return StopDecision::NoMoreWork {
            message: "no follow-ups or hard blockers remain".to_string(),
        };
    }

    let limit = cfg.limits.max_follow_up_iterations;
    if !cfg.is_unlimited(limit) && iteration_count >= limit {
        let mut next_steps = vec![
            "Increase maxFollowUpIterations or run with --unlimited".to_string(),
            "Resume the run with --resume to continue follow-up work".to_string(),
        ];
        if has_hard_blockers {
            next_steps.insert(
                0,
                "Hard blockers remain and must be resolved manually".to_string(),
            );
        }
        return StopDecision::LimitReached {
            message: format!("follow-up limit reached ({iteration_count}/{limit})"),
            next_steps,
        };
    }

    StopDecision::Continue {
        reason: if has_hard_blockers {
            "hard-blockers"
        } else {
            "follow-ups"
        },
        message: "engine reported outstanding work; continuing follow-ups".to_string(),
    }
}

/// Gap-closure loop across execution iterations.
pub fn check_execution_iteration_stop(
    cfg: &EffectiveConfig,
    exec_count: u32,
    gaps_identified: bool,
) -> StopDecision {
    if !gaps_identified {
        return StopDecision::ConditionMet {
            message: "gap audit found no gaps".to_string(),
        };
    }

    let limit = cfg.limits.max_exec_iterations;
    if !cfg.is_unlimited(limit) && exec_count >= limit {
        return StopDecision::LimitReached {
            message: format!("execution iteration limit reached ({exec_count}/{limit})"),
            next_steps: vec![
                "Review the last gap-audit summary for what is still missing".to_string(),
                "Increase maxExecIterations or run with --unlimited".to_string(),
                "Resume the run with --resume to continue gap closure".to_string(),
            ],
        };
    }

    StopDecision::Continue {
        reason: "gaps-identified",
        message: "gap audit identified gaps; planning another execution iteration".to_string(),
    }
}

// ============================================================================
// Progress display
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IterationProgress {
    pub current: u32,
    /// `None` in unlimited mode.
    pub max: Option<u32>,
    pub unlimited: bool,
    /// `"2/5"` or `"2/∞"`.
    pub display: String,
}

fn progress(cfg: &EffectiveConfig, current: u32, limit: u32) -> IterationProgress {
    let unlimited = cfg.is_unlimited(limit);
    IterationProgress {
        current,
        max: (!unlimited).then_some(limit),
        unlimited,
        display: if unlimited {
            format!("{current}/∞")
        } else {
            format!("{current}/{limit}")
        },
    }
}

pub fn plan_revision_progress(cfg: &EffectiveConfig, current: u32) -> IterationProgress {
    progress(cfg, current, cfg.limits.max_plan_iterations)
}

pub fn follow_up_progress(cfg: &EffectiveConfig, current: u32) -> IterationProgress {
    progress(cfg, current, cfg.limits.max_follow_up_iterations)
}

pub fn execution_progress(cfg: &EffectiveConfig, current: u32) -> IterationProgress {
    progress(cfg, current, cfg.limits.max_exec_iterations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TenaciousConfig;
    use std::path::PathBuf;

    fn cfg_with(layered: TenaciousConfig) -> EffectiveConfig {
        EffectiveConfig::resolve(
            "task".to_string(),
            "run-1".to_string(),
            "2026-08-01T00:00:00.000Z".to_string(),
            PathBuf::from("/work"),
            layered,
        )
    }

    fn cfg() -> EffectiveConfig {
        cfg_with(TenaciousConfig::default())
    }

    #[test]
    fn test_plan_stop_condition_met() {
        let decision = check_plan_revision_stop(&cfg(), 1, false, 90);
        assert!(matches!(decision, StopDecision::ConditionMet { .. }));
    }

    #[test]
    fn test_plan_continue_reasons() {
        match check_plan_revision_stop(&cfg(), 0, true, 95) {
            StopDecision::Continue { reason, .. } => assert_eq!(reason, "open-questions"),
            other => panic!("expected continue, got {other:?}"),
        }
        match check_plan_revision_stop(&cfg(), 0, false, 50) {
            StopDecision::Continue { reason, .. } => assert_eq!(reason, "below-threshold"),
            other => panic!("expected continue, got {other:?}"),
        }
    }

    #[test]
    fn test_plan_limit_reached_with_next_steps() {
        match check_plan_revision_stop(&cfg(), 5, true, 50) {
            StopDecision::LimitReached { next_steps, .. } => {
                assert!(!next_steps.is_empty());
                assert!(next_steps[0].contains("open questions"));
            }
            other => panic!("expected limit, got {other:?}"),
        }
    }

    #[test]
    fn test_plan_unlimited_never_hits_limit() {
        let cfg = cfg_with(TenaciousConfig {
            run_mode: crate::config::RunModeConfig {
                unlimited_iterations: true,
                ..Default::default()
            },
            ..Default::default()
        });
        let decision = check_plan_revision_stop(&cfg, 10_000, true, 10);
        assert!(matches!(decision, StopDecision::Continue { .. }));
    }

    #[test]
    fn test_follow_up_no_more_work() {
        let decision = check_follow_up_stop(&cfg(), 0, false, false);
        assert!(matches!(decision, StopDecision::NoMoreWork { .. }));
    }

    #[test]
    fn test_follow_up_limit_mentions_blockers() {
        match check_follow_up_stop(&cfg(), 5, true, true) {
            StopDecision::LimitReached { next_steps, .. } => {
                assert!(next_steps[0].contains("Hard blockers"));
            }
            other => panic!("expected limit, got {other:?}"),
        }
    }

    #[test]
    fn test_execution_stop_scenarios() {
        // No gaps: condition met regardless of counters
        assert!(check_execution_iteration_stop(&cfg(), 3, false).should_stop());

        // Gaps below the limit: continue
        assert!(!check_execution_iteration_stop(&cfg(), 1, true).should_stop());

        // At the limit with gaps: limit reached
        let cfg2 = cfg_with(TenaciousConfig {
            limits: crate::config::LimitsConfig {
                max_exec_iterations: 2,
                ..Default::default()
            },
            ..Default::default()
        });
        let decision = check_execution_iteration_stop(&cfg2, 2, true);
        assert!(decision.is_limit(), "got {decision:?}");
    }

    #[test]
    fn test_progress_display() {
        let p = execution_progress(&cfg(), 2);
        assert_eq!(p.display, "2/3");
        assert_eq!(p.max, Some(3));

        let unlimited = cfg_with(TenaciousConfig {
            run_mode: crate::config::RunModeConfig {
                unlimited_iterations: true,
                ..Default::default()
            },
            ..Default::default()
        });
        let p = follow_up_progress(&unlimited, 7);
        assert_eq!(p.display, "7/∞");
        assert_eq!(p.max, None);
        assert!(p.unlimited);
    }
}
