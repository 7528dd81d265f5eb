//! Engine invocation seam.
//!
//! The orchestrator never knows how a given tool is spelled on the command
//! line; it describes the phase it needs and this module produces the
//! argv vector and the instructions handed to the engine. Dispatch is a
//! match over `ToolName` — no dynamic trait objects in the core.
//!
//! Engines communicate back exclusively through the artifact files they
//! are instructed to write; stdout is captured to transcripts only.

use std::path::Path;

use crate::artifacts::naming;
use crate::artifacts::schemas::{
    ExecuteMetadata, GapAuditMetadata, HardBlocker, PlanMetadata, SCHEMA_VERSION,
};
use crate::artifacts::store::ArtifactStore;
use crate::config::{EffectiveConfig, ToolName};
use crate::error::OrchestratorError;

/// What the orchestrator wants an engine to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnginePhase {
    Plan,
    /// Revise the existing plan (revision counter included for prompts).
    RevisePlan { revision: u32 },
    Execute { iteration: u32 },
    /// Follow-up iteration 0: resolve declared hard blockers first.
    ResolveBlockers { iteration: u32, follow_up: u32 },
    FollowUp { iteration: u32, follow_up: u32 },
    GapAudit { iteration: u32 },
    GapPlan { iteration: u32 },
}

impl EnginePhase {
    /// Which configured tool drives this phase.
    pub fn tool(&self, cfg: &EffectiveConfig) -> ToolName {
        match self {
            Self::Plan | Self::RevisePlan { .. } | Self::GapPlan { .. } => cfg.tools.plan,
            Self::Execute { .. } | Self::ResolveBlockers { .. } | Self::FollowUp { .. } => {
                cfg.tools.execute
            }
            Self::GapAudit { .. } => cfg.tools.audit,
        }
    }

    pub fn model<'a>(&self, cfg: &'a EffectiveConfig) -> Option<&'a str> {
        match self {
            Self::Plan | Self::RevisePlan { .. } | Self::GapPlan { .. } => {
                cfg.models.plan.as_deref()
            }
            Self::Execute { .. } | Self::ResolveBlockers { .. } | Self::FollowUp { .. } => {
                cfg.models.execute.as_deref()
            }
            Self::GapAudit { .. } => cfg.models.audit.as_deref(),
        }
    }

    /// Short tag used for logs and transcript prefixes.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Plan => "plan",
            Self::RevisePlan { .. } => "plan-revise",
            Self::Execute { .. } => "execute",
            Self::ResolveBlockers { .. } => "resolve-blockers",
            Self::FollowUp { .. } => "follow-up",
            Self::GapAudit { .. } => "gap-audit",
            Self::GapPlan { .. } => "gap-plan",
        }
    }

    /// Execution iteration this phase belongs to (0 for plan phases).
    pub fn iteration(&self) -> u32 {
        match self {
            Self::Plan | Self::RevisePlan { .. } => 0,
            Self::Execute { iteration }
            | Self::ResolveBlockers { iteration, .. }
            | Self::FollowUp { iteration, .. }
            | Self::GapAudit { iteration }
            | Self::GapPlan { iteration } => *iteration,
        }
    }
}

/// A ready-to-spawn engine command line.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineCommand {
    pub program: String,
    pub args: Vec<String>,
}

/// Map a tool and prompt to its argv vector. Every adapter runs the tool
/// in non-interactive, prompt-driven mode.
pub fn build_command(
    tool: ToolName,
    model: Option<&str>,
    prompt: &str,
) -> EngineCommand {
    let mut args: Vec<String> = Vec::new();
    match tool {
        ToolName::Codex => {
            args.push("exec".to_string());
            if let Some(m) = model {
                args.push("--model".to_string());
                args.push(m.to_string());
            }
            args.push(prompt.to_string());
        }
        ToolName::Claude => {
            args.push("-p".to_string());
            args.push(prompt.to_string());
            if let Some(m) = model {
                args.push("--model".to_string());
                args.push(m.to_string());
            }
        }
        ToolName::Copilot => {
            args.push("-p".to_string());
            args.push(prompt.to_string());
            if let Some(m) = model {
                args.push("--model".to_string());
                args.push(m.to_string());
            }
        }
        ToolName::Cursor => {
            args.push("-p".to_string());
            args.push(prompt.to_string());
            if let Some(m) = model {
                args.push("--model".to_string());
                args.push(m.to_string());
            }
        }
        ToolName::Mock => {
            args.push(prompt.to_string());
        }
    }
    EngineCommand {
        program: tool.command().to_string(),
        args,
    }
}

// ============================================================================
// Prompt assembly
// ============================================================================

const METADATA_RULES: &str = "Set schemaVersion to \"1.0.0\". Emit strict JSON with no markdown fences.";

/// Build the instructions for a phase. The prompt names the exact artifact
/// paths the engine must write; the orchestrator validates them afterwards.
pub fn build_prompt(cfg: &EffectiveConfig, phase: &EnginePhase) -> String {
    let run_root = &cfg.paths.run_directory;
    match phase {
        EnginePhase::Plan => {
            let dir = naming::plan_dir(run_root);
            format!(
                "You are the planning engine for an iterative development run.\n\
                 Requirements:\n{}\n\n\
                 Study the codebase at {} and produce an implementation plan.\n\
                 Write the plan as markdown to {} and its metadata JSON to {}.\n\
                 The metadata must contain: schemaVersion, confidence (integer 0-100), \
                 openQuestions (array of strings), summary (1-3000 chars). {}",
                cfg.input,
                cfg.paths.working_directory.display(),
                dir.join(naming::PLAN_MD).display(),
                dir.join(naming::PLAN_METADATA).display(),
                METADATA_RULES,
            )
        }
        EnginePhase::RevisePlan { revision } => {
            let dir = naming::plan_dir(run_root);
            format!(
                "Revise the implementation plan at {} (revision {}).\n\
                 Resolve the open questions listed in {} and raise confidence where \
                 the revised plan warrants it. Rewrite both files in place with the \
                 same schema as before. {}",
                dir.join(naming::PLAN_MD).display(),
                revision + 1,
                dir.join(naming::PLAN_METADATA).display(),
                METADATA_RULES,
            )
        }
        EnginePhase::Execute { iteration } => {
            let dir = naming::execute_dir(run_root, *iteration);
            let plan = if *iteration == 1 {
                naming::plan_dir(run_root).join(naming::PLAN_MD)
            } else {
                naming::gap_plan_dir(run_root, *iteration - 1)
                    .join(naming::gap_plan_file(*iteration - 1))
            };
            format!(
                "Execute the plan at {} against the codebase at {} (iteration {}).\n\
                 Write a human-readable summary to {} and metadata JSON to {}.\n\
                 The metadata must contain: schemaVersion, hasFollowUps (bool), \
                 hardBlockers (array of {{description, reason}}), summary. \
                 Declare a hard blocker only for work you cannot do without user input. {}",
                plan.display(),
                cfg.paths.working_directory.display(),
                iteration,
                dir.join(naming::execution_summary_file(*iteration, None)).display(),
                dir.join(naming::EXECUTE_METADATA).display(),
                METADATA_RULES,
            )
        }
        EnginePhase::ResolveBlockers { iteration, follow_up } => {
            let dir = naming::execute_dir(run_root, *iteration);
            format!(
                "Hard blockers were declared in {}. They have now been resolved by \
                 the user; apply the resolutions and finish the blocked work.\n\
                 Write a summary to {} and rewrite {} with the remaining state \
                 (clear hardBlockers you completed, set hasFollowUps accordingly). {}",
                dir.join(naming::EXECUTE_METADATA).display(),
                dir.join(naming::execution_summary_file(*iteration, Some(*follow_up)))
                    .display(),
                dir.join(naming::EXECUTE_METADATA).display(),
                METADATA_RULES,
            )
        }
        EnginePhase::FollowUp { iteration, follow_up } => {
            let dir = naming::execute_dir(run_root, *iteration);
            format!(
                "Continue the follow-up work declared in {} (follow-up {}).\n\
                 Write a summary to {} and rewrite {} reflecting what remains. {}",
                dir.join(naming::EXECUTE_METADATA).display(),
                follow_up,
                dir.join(naming::execution_summary_file(*iteration, Some(*follow_up)))
                    .display(),
                dir.join(naming::EXECUTE_METADATA).display(),
                METADATA_RULES,
            )
        }
        EnginePhase::GapAudit { iteration } => {
            let dir = naming::gap_audit_dir(run_root, *iteration);
            format!(
                "Audit the implementation in {} against the plan at {} (iteration {}).\n\
                 Write your findings to {} and metadata JSON to {}.\n\
                 The metadata must contain: schemaVersion, gapsIdentified (bool), summary. {}",
                cfg.paths.working_directory.display(),
                naming::plan_dir(run_root).join(naming::PLAN_MD).display(),
                iteration,
                dir.join(naming::gap_audit_summary_file(*iteration)).display(),
                dir.join(naming::GAP_AUDIT_METADATA).display(),
                METADATA_RULES,
            )
        }
        EnginePhase::GapPlan { iteration } => {
            let dir = naming::gap_plan_dir(run_root, *iteration);
            format!(
                "The gap audit at {} identified gaps. Write a focused plan that \
                 closes every gap to {}. Markdown only; no metadata file is needed.",
                naming::gap_audit_dir(run_root, *iteration)
                    .join(naming::gap_audit_summary_file(*iteration))
                    .display(),
                dir.join(naming::gap_plan_file(*iteration)).display(),
            )
        }
    }
}

// ============================================================================
// Mock engine
// ============================================================================

/// Deterministic in-process engine used by `--mock` runs and tests.
///
/// Behavior: the first plan comes back at confidence 70 with one open
/// question, the revision converges at 90; execution iteration 1 declares
/// one follow-up round; the first gap audit finds gaps (driving exactly
/// one gap-closure loop), the second is clean.
pub struct MockEngine;

impl MockEngine {
    pub fn produce(
        store: &ArtifactStore,
        cfg: &EffectiveConfig,
        phase: &EnginePhase,
    ) -> Result<(), OrchestratorError> {
        let run_root = cfg.paths.run_directory.clone();
        match phase {
            EnginePhase::Plan => {
                Self::write_plan(store, &run_root, 70, vec![
                    "Should the cache layer be write-through or write-back?".to_string(),
                ])
            }
            EnginePhase::RevisePlan { .. } => Self::write_plan(store, &run_root, 90, vec![]),
            EnginePhase::Execute { iteration } => {
                let dir = naming::execute_dir(&run_root, *iteration);
                store.write_text(
                    &dir.join(naming::execution_summary_file(*iteration, None)),
                    &format!("# Execution summary (iteration {iteration})\n\nMock engine applied the plan.\n"),
                )?;
                let metadata = ExecuteMetadata {
                    schema_version: SCHEMA_VERSION.to_string(),
                    has_follow_ups: *iteration == 1,
                    hard_blockers: vec![],
                    summary: format!("mock execution for iteration {iteration}"),
                };
                store.write_json(&dir.join(naming::EXECUTE_METADATA), &metadata)?;
                Ok(())
            }
            EnginePhase::ResolveBlockers { iteration, follow_up }
            | EnginePhase::FollowUp { iteration, follow_up } => {
                let dir = naming::execute_dir(&run_root, *iteration);
                store.write_text(
                    &dir.join(naming::execution_summary_file(*iteration, Some(*follow_up))),
                    &format!("# Follow-up {follow_up} (iteration {iteration})\n\nMock follow-up work.\n"),
                )?;
                let metadata = ExecuteMetadata {
                    schema_version: SCHEMA_VERSION.to_string(),
                    has_follow_ups: false,
                    hard_blockers: vec![],
                    summary: format!("mock follow-up {follow_up} for iteration {iteration}"),
                };
                store.write_json(&dir.join(naming::EXECUTE_METADATA), &metadata)?;
                Ok(())
            }
            EnginePhase::GapAudit { iteration } => {
                let dir = naming::gap_audit_dir(&run_root, *iteration);
                let gaps = *iteration == 1;
                store.write_text(
                    &dir.join(naming::gap_audit_summary_file(*iteration)),
                    &format!(
                        "# Gap audit (iteration {iteration})\n\n{}\n",
                        if gaps { "One gap found." } else { "No gaps found." }
                    ),
                )?;
                let metadata = GapAuditMetadata {
                    schema_version: SCHEMA_VERSION.to_string(),
                    gaps_identified: gaps,
                    summary: format!("mock gap audit for iteration {iteration}"),
                };
                store.write_json(&dir.join(naming::GAP_AUDIT_METADATA), &metadata)?;
                Ok(())
            }
            EnginePhase::GapPlan { iteration } => {
                let dir = naming::gap_plan_dir(&run_root, *iteration);
                store.write_text(
                    &dir.join(naming::gap_plan_file(*iteration)),
                    &format!("# Gap plan (iteration {iteration})\n\nClose the remaining gap.\n"),
                )?;
                Ok(())
            }
        }
    }

    fn write_plan(
        store: &ArtifactStore,
        run_root: &Path,
        confidence: u8,
        open_questions: Vec<String>,
    ) -> Result<(), OrchestratorError> {
        let dir = naming::plan_dir(run_root);
        store.write_text(
            &dir.join(naming::PLAN_MD),
            "# Plan\n\nMock implementation plan.\n",
        )?;
        let metadata = PlanMetadata {
            schema_version: SCHEMA_VERSION.to_string(),
            confidence,
            open_questions,
            summary: "mock plan".to_string(),
        };
        store.write_json(&dir.join(naming::PLAN_METADATA), &metadata)?;
        Ok(())
    }
}

/// Used by the mock engine when asked about blockers, kept for parity with
/// real engine output in tests that need a populated blocker list.
pub fn sample_hard_blocker() -> HardBlocker {
    HardBlocker {
        description: "Database migration requires production approval".to_string(),
        reason: "cannot apply schema changes without a maintenance window".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TenaciousConfig;
    use std::path::PathBuf;

    fn cfg() -> EffectiveConfig {
        EffectiveConfig::resolve(
            "build it".to_string(),
            "run-1".to_string(),
            "2026-08-01T00:00:00.000Z".to_string(),
            PathBuf::from("/work"),
            TenaciousConfig {
                artifact_base_dir: Some(PathBuf::from("/runs")),
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_phase_tool_routing() {
        let cfg = cfg();
        assert_eq!(EnginePhase::Plan.tool(&cfg), cfg.tools.plan);
        assert_eq!(
            EnginePhase::Execute { iteration: 1 }.tool(&cfg),
            cfg.tools.execute
        );
        assert_eq!(
            EnginePhase::GapAudit { iteration: 1 }.tool(&cfg),
            cfg.tools.audit
        );
        assert_eq!(
            EnginePhase::GapPlan { iteration: 1 }.tool(&cfg),
            cfg.tools.plan,
            "gap planning is a planning concern"
        );
    }

    #[test]
    fn test_build_command_is_argv_only() {
        let cmd = build_command(ToolName::Codex, Some("gpt-5"), "do the thing");
        assert_eq!(cmd.program, "codex");
        assert_eq!(
            cmd.args,
            vec!["exec", "--model", "gpt-5", "do the thing"]
        );

        let cmd = build_command(ToolName::Claude, None, "prompt text");
        assert_eq!(cmd.program, "claude");
        assert_eq!(cmd.args, vec!["-p", "prompt text"]);
    }

    #[test]
    fn test_prompts_name_the_artifact_paths() {
        let cfg = cfg();
        let prompt = build_prompt(&cfg, &EnginePhase::Plan);
        assert!(prompt.contains("plan-metadata.json"));
        assert!(prompt.contains("plan.md"));
        assert!(prompt.contains(&cfg.input));

        let prompt = build_prompt(&cfg, &EnginePhase::Execute { iteration: 2 });
        assert!(prompt.contains("execution-summary-2.md"));
        assert!(prompt.contains("execute-metadata.json"));

        let prompt = build_prompt(
            &cfg,
            &EnginePhase::FollowUp { iteration: 1, follow_up: 3 },
        );
        assert!(prompt.contains("execution-summary-1-followup-3.md"));
    }

    #[test]
    fn test_execute_prompt_points_to_gap_plan_on_later_iterations() {
        let cfg = cfg();
        let prompt = build_prompt(&cfg, &EnginePhase::Execute { iteration: 2 });
        assert!(prompt.contains("gap-plan-1.md"));
    }
}
