//! The orchestrator: owns the single mutable context, sequences engine
//! invocations, validates artifacts, enforces the iteration policy and
//! checkpoints durable state after every accepted transition.
//!
//! The event loop is single-threaded cooperative: exactly one engine
//! invocation is in flight at a time, and the only suspension points are
//! subprocess execution, filesystem I/O and user prompts.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::artifacts::naming;
use crate::artifacts::store::ArtifactStore;
use crate::artifacts::validation::{
    self, scan_execution_artifacts, validate_execution_artifacts, validate_gap_audit_artifacts,
    validate_gap_plan_artifacts, validate_plan_artifacts,
};
use crate::config::{EffectiveConfig, ToolName};
use crate::engines::{self, EnginePhase, MockEngine};
use crate::error::{EngineInvocationError, ErrorRecord, OrchestratorError, ValidationError};
use crate::logging::{EventKind, RunLogger};
use crate::policy::{self, StopDecision};
use crate::ports::clock::Clock;
use crate::ports::filesystem::FileSystem;
use crate::ports::process::{ProcessRunner, SpawnOptions};
use crate::ports::prompter::Prompter;
use crate::state::context::OrchestrationContext;
use crate::state::machine::{transition, Event, State, TransitionOutcome, TransitionRecord};
use crate::state::persistence::{save_run_state, RunState};

/// Dependency bundle injected into the orchestrator. No process-wide
/// singletons: everything the core touches arrives here.
#[derive(Clone)]
pub struct Dependencies {
    pub fs: Arc<dyn FileSystem>,
    pub runner: Arc<dyn ProcessRunner>,
    pub prompter: Arc<dyn Prompter>,
    pub clock: Arc<dyn Clock>,
}

/// Outcome of processing one event.
#[derive(Debug, Clone)]
pub struct StepResult {
    pub success: bool,
    pub state: State,
    pub is_complete: bool,
    pub error: Option<ErrorRecord>,
}

/// Outcome of a whole run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub final_state: State,
    /// A plan or execution iteration limit fired before convergence.
    pub limit_hit: bool,
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        match self.final_state {
            State::Complete if self.limit_hit => crate::error::EXIT_LIMIT,
            State::Complete => crate::error::EXIT_SUCCESS,
            _ => crate::error::EXIT_UNEXPECTED,
        }
    }
}

/// Condensed view of a run for `run-summary.md` and the CLI.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub run_id: String,
    pub state: State,
    pub plan_revision_count: u32,
    pub exec_iteration_count: u32,
    pub follow_up_iteration_count: u32,
    pub last_confidence: u8,
    pub started_at: String,
    pub last_transition_at: String,
    pub last_error: Option<ErrorRecord>,
}

pub struct Orchestrator {
    config: EffectiveConfig,
    deps: Dependencies,
    store: ArtifactStore,
    logger: RunLogger,
    context: OrchestrationContext,
    history: Vec<TransitionRecord>,
    cancel: CancellationToken,
    limit_hit: bool,
}

impl Orchestrator {
    pub fn new(config: EffectiveConfig, deps: Dependencies, cancel: CancellationToken) -> Self {
        let store = ArtifactStore::new(deps.fs.clone(), config.paths.artifact_base_dir.clone());
        let logger = RunLogger::new(config.run_id.clone(), config.mode_tag());
        let context = OrchestrationContext::new(config.resolved_at.clone());
        Self {
            config,
            deps,
            store,
            logger,
            context,
            history: Vec::new(),
            cancel,
            limit_hit: false,
        }
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    pub fn current_state(&self) -> State {
        self.context.current_state
    }

    pub fn context(&self) -> &OrchestrationContext {
        &self.context
    }

    pub fn config(&self) -> &EffectiveConfig {
        &self.config
    }

    pub fn transition_history(&self) -> &[TransitionRecord] {
        &self.history
    }

    pub fn is_complete(&self) -> bool {
        self.context.current_state == State::Complete
    }

    /// Snapshot for tests and persistence: context + config + save stamp.
    pub fn run_state(&self) -> RunState {
        RunState {
            context: self.context.clone(),
            config: self.config.clone(),
            last_saved: self.deps.clock.iso_now(),
        }
    }

    pub fn run_summary(&self) -> RunSummary {
        RunSummary {
            run_id: self.config.run_id.clone(),
            state: self.context.current_state,
            plan_revision_count: self.context.plan_revision_count,
            exec_iteration_count: self.context.exec_iteration_count,
            follow_up_iteration_count: self.context.follow_up_iteration_count,
            last_confidence: self.context.last_confidence,
            started_at: self.context.started_at.clone(),
            last_transition_at: self.context.last_transition_at.clone(),
            last_error: self.context.last_error.clone(),
        }
    }

    // ========================================================================
    // Policy shortcuts
    // ========================================================================

    pub fn check_plan_revision_stop(&self, has_open_questions: bool) -> StopDecision {
        policy::check_plan_revision_stop(
            &self.config,
            self.context.plan_revision_count,
            has_open_questions,
            self.context.last_confidence,
        )
    }

    pub fn check_follow_up_stop(&self, has_follow_ups: bool, has_hard_blockers: bool) -> StopDecision {
        policy::check_follow_up_stop(
            &self.config,
            self.context.follow_up_iteration_count,
            has_follow_ups,
            has_hard_blockers,
        )
    }

    pub fn check_execution_iteration_stop(&self, gaps_identified: bool) -> StopDecision {
        policy::check_execution_iteration_stop(
            &self.config,
            self.context.exec_iteration_count,
            gaps_identified,
        )
    }

    // ========================================================================
    // Run lifecycle
    // ========================================================================

    /// Begin a fresh run: create the run directory, persist the initial
    /// snapshot files, and emit `START_PLAN`.
    pub fn start(&mut self, requirements: &str) -> Result<StepResult, OrchestratorError> {
        let run_dir = self.config.paths.run_directory.clone();
        self.store.create_dir_all(&run_dir)?;
        self.store
            .write_text(&run_dir.join(naming::REQUIREMENTS_FILE), requirements)?;
        self.store.write_json(
            &run_dir.join(naming::EFFECTIVE_CONFIG_FILE),
            &self.config.redacted_value(),
        )?;
        self.write_lock()?;

        self.logger.event(
            EventKind::RunStarted,
            State::Idle,
            0,
            &format!("run {} started", self.config.run_id),
        );
        self.apply(Event::StartPlan {
            requirements: requirements.to_string(),
        })
    }

    /// Restore a saved context and re-enter its state via `RESUME`, then
    /// reconcile the counters against what actually exists on disk.
    pub fn resume(&mut self, saved: RunState) -> Result<StepResult, OrchestratorError> {
        let target = saved.context.current_state;
        self.context = OrchestrationContext {
            current_state: State::Idle,
            ..saved.context
        };
        self.write_lock()?;

        let step = self.apply(Event::Resume { from_state: target })?;
        if step.success {
            self.rescan_disk()?;
            self.persist()?;
        }
        Ok(step)
    }

    // ========================================================================
    // Event entry points
    // ========================================================================

    pub fn on_plan_generated(&mut self) -> Result<StepResult, OrchestratorError> {
        self.apply(Event::PlanGenerated)
    }

    pub fn on_plan_improved(&mut self) -> Result<StepResult, OrchestratorError> {
        self.apply(Event::PlanImproved)
    }

    pub fn on_plan_complete(&mut self, confidence: u8) -> Result<StepResult, OrchestratorError> {
        self.apply(Event::PlanComplete { confidence })
    }

    pub fn on_execution_complete(
        &mut self,
        has_follow_ups: bool,
        has_hard_blockers: bool,
    ) -> Result<StepResult, OrchestratorError> {
        self.apply(Event::ExecutionComplete {
            has_follow_ups,
            has_hard_blockers,
        })
    }

    pub fn on_hard_blockers_resolved(&mut self) -> Result<StepResult, OrchestratorError> {
        self.apply(Event::HardBlockersResolved)
    }

    pub fn on_follow_ups_complete(
        &mut self,
        has_follow_ups: bool,
    ) -> Result<StepResult, OrchestratorError> {
        self.apply(Event::FollowUpsComplete { has_follow_ups })
    }

    pub fn on_max_follow_ups_reached(&mut self) -> Result<StepResult, OrchestratorError> {
        self.apply(Event::MaxFollowUpsReached)
    }

    pub fn on_gap_audit_complete(
        &mut self,
        gaps_identified: bool,
    ) -> Result<StepResult, OrchestratorError> {
        self.apply(Event::GapAuditComplete { gaps_identified })
    }

    pub fn on_gap_plan_complete(&mut self) -> Result<StepResult, OrchestratorError> {
        self.apply(Event::GapPlanComplete)
    }

    pub fn on_max_exec_iterations_reached(&mut self) -> Result<StepResult, OrchestratorError> {
        self.apply(Event::MaxExecIterationsReached)
    }

    pub fn on_generate_summary(&mut self) -> Result<StepResult, OrchestratorError> {
        self.apply(Event::GenerateSummary)
    }

    pub fn on_summary_complete(&mut self) -> Result<StepResult, OrchestratorError> {
        self.apply(Event::SummaryComplete)
    }

    pub fn on_error(&mut self, record: ErrorRecord) -> Result<StepResult, OrchestratorError> {
        self.apply(Event::Error { record })
    }

    // ========================================================================
    // Transition processing
    // ========================================================================

    /// Process one event: transition, validate the artifacts the departed
    /// state should have produced, persist, log, answer.
    fn apply(&mut self, event: Event) -> Result<StepResult, OrchestratorError> {
        let now = self.deps.clock.iso_now();
        let outcome = transition(&self.context, &event, &now);

        let accepted = match outcome {
            TransitionOutcome::Invalid { state, event, reason } => {
                self.logger
                    .warn(&format!("rejected {event} in {state}: {reason}"));
                return Ok(StepResult {
                    success: false,
                    state: self.context.current_state,
                    is_complete: self.is_complete(),
                    error: Some(ErrorRecord::new("invalid-transition", reason, now)),
                });
            }
            TransitionOutcome::Accepted(acc) => acc,
        };

        // Error and resume transitions carry no freshly produced artifacts.
        let skip_validation = matches!(event, Event::Error { .. } | Event::Resume { .. });
        if !skip_validation
            && let Err(validation) = self.validate_departed(accepted.from)
        {
            self.logger.event(
                EventKind::ArtifactValidationFailed,
                accepted.from,
                self.context.exec_iteration_count,
                &validation.to_string(),
            );
            let record = OrchestratorError::Validation(validation.clone()).to_record(&now);
            self.force_failed(record);
            return Err(validation.into());
        }

        let from = accepted.from;
        let to = accepted.to;
        self.context = accepted.context;
        self.history.push(TransitionRecord {
            from,
            to,
            event: accepted.event.to_string(),
            at: now,
        });
        self.persist()?;

        self.logger.event(
            EventKind::StateTransition,
            to,
            self.context.exec_iteration_count,
            &format!(
                "{from} -> {to} on {} (revisions={}, exec={}, followUps={})",
                accepted.event,
                self.context.plan_revision_count,
                self.context.exec_iteration_count,
                self.context.follow_up_iteration_count,
            ),
        );

        Ok(StepResult {
            success: true,
            state: to,
            is_complete: to == State::Complete,
            error: None,
        })
    }

    /// Validate what the state we are leaving should have left on disk.
    fn validate_departed(&self, departed: State) -> Result<(), ValidationError> {
        let run_root = &self.config.paths.run_directory;
        let iteration = self.context.exec_iteration_count;
        let check = match departed {
            State::PlanGeneration | State::PlanRevision => {
                validate_plan_artifacts(&self.store, &naming::plan_dir(run_root))
            }
            State::Execution | State::FollowUps => validate_execution_artifacts(
                &self.store,
                &naming::execute_dir(run_root, iteration),
                iteration,
            ),
            State::GapAudit => validate_gap_audit_artifacts(
                &self.store,
                &naming::gap_audit_dir(run_root, iteration),
                iteration,
            ),
            State::GapPlan => validate_gap_plan_artifacts(
                &self.store,
                &naming::gap_plan_dir(run_root, iteration),
                iteration,
            ),
            State::SummaryGeneration => {
                let mut check = crate::artifacts::validation::ArtifactCheck::default();
                if !self.store.exists(&run_root.join(naming::RUN_SUMMARY_FILE)) {
                    check.missing.push(naming::RUN_SUMMARY_FILE.to_string());
                } else {
                    check.valid = true;
                }
                check
            }
            State::Idle | State::Complete | State::Failed => return Ok(()),
        };

        if check.valid {
            self.logger.event(
                EventKind::ArtifactValidated,
                departed,
                iteration,
                &format!("{departed} artifacts complete"),
            );
            return Ok(());
        }
        match check.into_validation_error(&format!("{departed} artifacts")) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Transition to FAILED recording the error; best-effort persistence.
    fn force_failed(&mut self, record: ErrorRecord) {
        let now = self.deps.clock.iso_now();
        if let TransitionOutcome::Accepted(acc) = transition(
            &self.context,
            &Event::Error {
                record: record.clone(),
            },
            &now,
        ) {
            let from = acc.from;
            self.context = acc.context;
            self.history.push(TransitionRecord {
                from,
                to: State::Failed,
                event: "ERROR".to_string(),
                at: now,
            });
            if let Err(e) = self.persist() {
                self.logger
                    .error(&format!("could not persist failed state: {e}"));
            }
            self.logger.event(
                EventKind::RunFailed,
                State::Failed,
                self.context.exec_iteration_count,
                &record.message,
            );
        }
    }

    fn persist(&self) -> Result<(), OrchestratorError> {
        let state = RunState {
            context: self.context.clone(),
            config: self.config.clone(),
            last_saved: self.deps.clock.iso_now(),
        };
        save_run_state(self.deps.fs.as_ref(), &self.config.paths.run_directory, &state)
    }

    // ========================================================================
    // Resume re-scan
    // ========================================================================

    /// Reconcile the restored counters with the artifacts actually on
    /// disk. Discrepancies resolve in favour of the disk: the summary
    /// files are the truth about what completed before the crash.
    fn rescan_disk(&mut self) -> Result<(), OrchestratorError> {
        let run_root = self.config.paths.run_directory.clone();

        // Highest execute-N directory that exists wins over the counter.
        let mut disk_exec = 0u32;
        for entry in self.store.list(&run_root, Some("execute*"))? {
            let Some(name) = entry.file_name().map(|n| n.to_string_lossy().to_string()) else {
                continue;
            };
            let n = if name == "execute" {
                1
            } else if let Some(suffix) = name.strip_prefix("execute-") {
                suffix.parse::<u32>().unwrap_or(0)
            } else {
                0
            };
            disk_exec = disk_exec.max(n);
        }
        if disk_exec > self.context.exec_iteration_count {
            self.logger.warn(&format!(
                "disk shows execution iteration {disk_exec}, saved state had {}; trusting disk",
                self.context.exec_iteration_count
            ));
            self.context.exec_iteration_count = disk_exec;
        }

        let iteration = self.context.exec_iteration_count;
        if iteration == 0 {
            return Ok(());
        }

        let scan = scan_execution_artifacts(
            &self.store,
            &naming::execute_dir(&run_root, iteration),
            iteration,
        )?;
        let disk_follow_ups = scan.all_follow_up_iterations.len() as u32;
        if disk_follow_ups != self.context.follow_up_iteration_count {
            self.logger.warn(&format!(
                "disk shows {disk_follow_ups} follow-ups, saved state had {}; trusting disk",
                self.context.follow_up_iteration_count
            ));
            self.context.follow_up_iteration_count = disk_follow_ups;
        }
        if scan.has_done_iteration0 {
            self.context.has_done_iteration0 = true;
        }
        Ok(())
    }

    // ========================================================================
    // Engine invocation
    // ========================================================================

    /// Invoke the engine for a phase, retrying with the configured
    /// fallback tools. The only retried operation in the system.
    async fn invoke_engine(&mut self, phase: EnginePhase) -> Result<(), OrchestratorError> {
        let primary = phase.tool(&self.config);
        if self.config.run_mode.mock_mode || primary == ToolName::Mock {
            self.logger.event(
                EventKind::EngineInvocationStarted,
                self.context.current_state,
                phase.iteration(),
                &format!("mock engine for {}", phase.tag()),
            );
            return MockEngine::produce(&self.store, &self.config, &phase);
        }

        let mut candidates: Vec<ToolName> = vec![primary];
        for tool in &self.config.fallback.fallback_tools {
            if !candidates.contains(tool) {
                candidates.push(*tool);
            }
        }

        let attempts = self.config.fallback.max_retries + 1;
        let mut last_error: Option<EngineInvocationError> = None;

        for attempt in 0..attempts {
            if self.cancel.is_cancelled() {
                return Err(OrchestratorError::Interrupted);
            }
            let tool = candidates[(attempt as usize).min(candidates.len() - 1)];
            if tool == ToolName::Mock {
                return MockEngine::produce(&self.store, &self.config, &phase);
            }

            if attempt > 0 {
                self.deps
                    .clock
                    .sleep(Duration::from_millis(self.config.fallback.retry_delay_ms))
                    .await;
            }

            let prompt = engines::build_prompt(&self.config, &phase);
            let command = engines::build_command(tool, phase.model(&self.config), &prompt);
            self.logger.event(
                EventKind::EngineInvocationStarted,
                self.context.current_state,
                phase.iteration(),
                &format!("{tool} {} (attempt {})", phase.tag(), attempt + 1),
            );

            let options = SpawnOptions {
                args: command.args.clone(),
                cwd: Some(self.config.paths.working_directory.clone()),
                env: Vec::new(),
                timeout_ms: Some(self.config.timeouts.engine_ms),
                transcript_dir: Some(naming::transcripts_dir(&self.config.paths.run_directory)),
                transcript_prefix: tool.to_string(),
                ..Default::default()
            };

            let spawned = self.deps.runner.spawn(&command.program, options).await;
            let error = match spawned {
                Err(spawn_error) => EngineInvocationError::SpawnFailed {
                    tool,
                    source: spawn_error,
                },
                Ok(result) if result.interrupted => {
                    return Err(OrchestratorError::Interrupted);
                }
                Ok(result) if result.timed_out => EngineInvocationError::TimedOut {
                    tool,
                    timeout_ms: self.config.timeouts.engine_ms,
                },
                Ok(result) if result.success() => {
                    self.logger.event(
                        EventKind::EngineInvocationCompleted,
                        self.context.current_state,
                        phase.iteration(),
                        &format!("{tool} {} in {}ms", phase.tag(), result.duration_ms),
                    );
                    return Ok(());
                }
                Ok(result) => match (result.exit_code, result.signal) {
                    (Some(code), _) => EngineInvocationError::NonZeroExit {
                        tool,
                        code,
                        stderr_tail: result.stderr_tail.join("\n"),
                    },
                    (None, Some(signal)) => EngineInvocationError::Signaled { tool, signal },
                    (None, None) => EngineInvocationError::Interrupted { tool },
                },
            };

            self.logger.event(
                EventKind::EngineInvocationFailed,
                self.context.current_state,
                phase.iteration(),
                &error.to_string(),
            );
            last_error = Some(error);
        }

        Err(OrchestratorError::Engine(last_error.unwrap_or(
            EngineInvocationError::Interrupted { tool: primary },
        )))
    }

    // ========================================================================
    // Top-level drive loop
    // ========================================================================

    /// Run a fresh requirement end to end.
    pub async fn run(&mut self, requirements: &str) -> Result<RunOutcome, OrchestratorError> {
        self.start(requirements)?;
        self.drive().await
    }

    /// Resume a crashed or interrupted run and drive it to completion.
    pub async fn resume_and_run(&mut self, saved: RunState) -> Result<RunOutcome, OrchestratorError> {
        let step = self.resume(saved)?;
        if !step.success {
            let reason = step
                .error
                .map(|e| e.message)
                .unwrap_or_else(|| "resume rejected".to_string());
            return Err(OrchestratorError::Unexpected(reason));
        }
        self.drive().await
    }

    /// Drive the state machine until a terminal state, an error or an
    /// interrupt. Always releases the advisory lock on the way out.
    pub async fn drive(&mut self) -> Result<RunOutcome, OrchestratorError> {
        let result = self.drive_inner().await;
        self.release_lock();
        match &result {
            Ok(outcome) => {
                self.logger.event(
                    EventKind::RunCompleted,
                    outcome.final_state,
                    self.context.exec_iteration_count,
                    &format!("run finished in {}", outcome.final_state),
                );
            }
            Err(OrchestratorError::Interrupted) => {
                // State stays resumable; persist the final observation.
                let _ = self.persist();
                self.logger.warn("run interrupted; state persisted for resume");
            }
            Err(OrchestratorError::Validation(_)) => {
                // apply() already forced FAILED and logged.
            }
            Err(e) => {
                let record = e.to_record(&self.deps.clock.iso_now());
                self.force_failed(record);
            }
        }
        result
    }

    async fn drive_inner(&mut self) -> Result<RunOutcome, OrchestratorError> {
        loop {
            if self.cancel.is_cancelled() {
                return Err(OrchestratorError::Interrupted);
            }

            match self.context.current_state {
                State::Idle => {
                    return Err(OrchestratorError::Unexpected(
                        "drive() called before start()".to_string(),
                    ));
                }

                State::PlanGeneration => {
                    self.invoke_engine(EnginePhase::Plan).await?;
                    Self::expect(self.on_plan_generated())?;
                }

                State::PlanRevision => {
                    let meta = validation::load_plan_metadata(
                        &self.store,
                        &self.config.paths.run_directory,
                    )?;
                    let decision = policy::check_plan_revision_stop(
                        &self.config,
                        self.context.plan_revision_count,
                        meta.has_open_questions(),
                        meta.confidence,
                    );
                    match decision {
                        StopDecision::ConditionMet { message } => {
                            self.logger.event(
                                EventKind::StopConditionMet,
                                State::PlanRevision,
                                0,
                                &message,
                            );
                            if self.config.run_mode.plan_only {
                                Self::expect(self.on_generate_summary())?;
                            } else {
                                Self::expect(self.on_plan_complete(meta.confidence))?;
                            }
                        }
                        StopDecision::LimitReached { message, next_steps } => {
                            self.report_limit(State::PlanRevision, &message, &next_steps);
                            Self::expect(self.on_generate_summary())?;
                        }
                        StopDecision::Continue { message, .. } => {
                            self.logger.info(&message);
                            let revision = self.context.plan_revision_count;
                            self.invoke_engine(EnginePhase::RevisePlan { revision }).await?;
                            Self::expect(self.on_plan_improved())?;
                        }
                        StopDecision::NoMoreWork { .. } => {
                            return Err(OrchestratorError::Unexpected(
                                "no-more-work is not a plan revision verdict".to_string(),
                            ));
                        }
                    }
                }

                State::Execution => {
                    let iteration = self.context.exec_iteration_count;
                    self.logger.event(
                        EventKind::IterationStarted,
                        State::Execution,
                        iteration,
                        &policy::execution_progress(&self.config, iteration).display,
                    );
                    self.invoke_engine(EnginePhase::Execute { iteration }).await?;
                    let meta = validation::load_execute_metadata(
                        &self.store,
                        &self.config.paths.run_directory,
                        iteration,
                    )?;
                    Self::expect(
                        self.on_execution_complete(meta.has_follow_ups, meta.has_hard_blockers()),
                    )?;
                }

                State::FollowUps => {
                    let iteration = self.context.exec_iteration_count;
                    if !self.context.has_done_iteration0 {
                        // Iteration 0: the hard-blocker-resolution pass.
                        let follow_up = self.context.follow_up_iteration_count;
                        self.invoke_engine(EnginePhase::ResolveBlockers { iteration, follow_up })
                            .await?;
                        Self::expect(self.on_hard_blockers_resolved())?;
                        continue;
                    }

                    let meta = validation::load_execute_metadata(
                        &self.store,
                        &self.config.paths.run_directory,
                        iteration,
                    )?;
                    let decision = policy::check_follow_up_stop(
                        &self.config,
                        self.context.follow_up_iteration_count,
                        meta.has_follow_ups,
                        meta.has_hard_blockers(),
                    );
                    match decision {
                        StopDecision::NoMoreWork { message } => {
                            self.logger.event(
                                EventKind::StopConditionMet,
                                State::FollowUps,
                                iteration,
                                &message,
                            );
                            Self::expect(self.on_follow_ups_complete(false))?;
                        }
                        StopDecision::LimitReached { message, next_steps } => {
                            // Not fatal: the run proceeds to the gap audit,
                            // which may still converge.
                            self.logger.event(
                                EventKind::LimitExceeded,
                                State::FollowUps,
                                iteration,
                                &message,
                            );
                            for step in &next_steps {
                                self.logger.info(&format!("next step: {step}"));
                            }
                            Self::expect(self.on_max_follow_ups_reached())?;
                        }
                        StopDecision::Continue { .. } => {
                            let follow_up = self.context.follow_up_iteration_count;
                            self.invoke_engine(EnginePhase::FollowUp { iteration, follow_up })
                                .await?;
                            Self::expect(self.on_follow_ups_complete(true))?;
                        }
                        StopDecision::ConditionMet { .. } => {
                            return Err(OrchestratorError::Unexpected(
                                "condition-met is not a follow-up verdict".to_string(),
                            ));
                        }
                    }
                }

                State::GapAudit => {
                    let iteration = self.context.exec_iteration_count;
                    self.invoke_engine(EnginePhase::GapAudit { iteration }).await?;
                    let meta = validation::load_gap_audit_metadata(
                        &self.store,
                        &self.config.paths.run_directory,
                        iteration,
                    )?;
                    if !meta.gaps_identified {
                        self.logger.event(
                            EventKind::StopConditionMet,
                            State::GapAudit,
                            iteration,
                            "gap audit found no gaps",
                        );
                        Self::expect(self.on_gap_audit_complete(false))?;
                        continue;
                    }
                    match policy::check_execution_iteration_stop(&self.config, iteration, true) {
                        StopDecision::LimitReached { message, next_steps } => {
                            self.report_limit(State::GapAudit, &message, &next_steps);
                            Self::expect(self.on_max_exec_iterations_reached())?;
                        }
                        _ => {
                            Self::expect(self.on_gap_audit_complete(true))?;
                        }
                    }
                }

                State::GapPlan => {
                    let iteration = self.context.exec_iteration_count;
                    self.invoke_engine(EnginePhase::GapPlan { iteration }).await?;
                    Self::expect(self.on_gap_plan_complete())?;
                }

                State::SummaryGeneration => {
                    let summary = self.compose_run_summary();
                    let path = self
                        .config
                        .paths
                        .run_directory
                        .join(naming::RUN_SUMMARY_FILE);
                    self.store.write_text(&path, &summary)?;
                    self.logger.event(
                        EventKind::ArtifactWritten,
                        State::SummaryGeneration,
                        self.context.exec_iteration_count,
                        naming::RUN_SUMMARY_FILE,
                    );
                    Self::expect(self.on_summary_complete())?;
                }

                State::Complete => {
                    return Ok(RunOutcome {
                        final_state: State::Complete,
                        limit_hit: self.limit_hit,
                    });
                }

                State::Failed => {
                    return Ok(RunOutcome {
                        final_state: State::Failed,
                        limit_hit: self.limit_hit,
                    });
                }
            }
        }
    }

    fn expect(step: Result<StepResult, OrchestratorError>) -> Result<(), OrchestratorError> {
        let step = step?;
        if step.success {
            return Ok(());
        }
        Err(OrchestratorError::Unexpected(
            step.error
                .map(|e| e.message)
                .unwrap_or_else(|| "transition rejected".to_string()),
        ))
    }

    fn report_limit(&mut self, phase: State, message: &str, next_steps: &[String]) {
        self.limit_hit = true;
        self.logger.event(
            EventKind::LimitExceeded,
            phase,
            self.context.exec_iteration_count,
            message,
        );
        for step in next_steps {
            self.logger.info(&format!("next step: {step}"));
        }
    }

    // ========================================================================
    // Run summary + lock
    // ========================================================================

    fn compose_run_summary(&self) -> String {
        let ctx = &self.context;
        let mut md = String::new();
        md.push_str(&format!("# Run summary: {}\n\n", self.config.run_id));
        md.push_str(&format!(
            "**Requirement**: {}\n\n",
            crate::logging::redaction::redact(&self.config.input)
        ));
        md.push_str(&format!("**Mode**: {}\n", self.config.mode_tag()));
        md.push_str(&format!("**Started**: {}\n", ctx.started_at));
        md.push_str(&format!("**Last transition**: {}\n\n", ctx.last_transition_at));

        md.push_str("## Progress\n\n");
        md.push_str(&format!(
            "- Plan revisions: {}\n",
            policy::plan_revision_progress(&self.config, ctx.plan_revision_count).display
        ));
        md.push_str(&format!(
            "- Execution iterations: {}\n",
            policy::execution_progress(&self.config, ctx.exec_iteration_count).display
        ));
        md.push_str(&format!(
            "- Follow-ups in last iteration: {}\n",
            policy::follow_up_progress(&self.config, ctx.follow_up_iteration_count).display
        ));
        md.push_str(&format!("- Final plan confidence: {}\n", ctx.last_confidence));

        if self.limit_hit {
            md.push_str("\n## Outcome\n\nStopped at an iteration limit before convergence.\n");
        } else if self.config.run_mode.plan_only {
            md.push_str("\n## Outcome\n\nPlan converged; execution was skipped (plan-only run).\n");
        } else {
            md.push_str("\n## Outcome\n\nConverged: the gap audit reported no remaining gaps.\n");
        }
        if let Some(error) = &ctx.last_error {
            md.push_str(&format!("\n**Last error** ({}): {}\n", error.kind, error.message));
        }
        md
    }

    fn write_lock(&self) -> Result<(), OrchestratorError> {
        let path = self.config.paths.run_directory.join(naming::LOCK_FILE);
        self.store.write_text(&path, &std::process::id().to_string())?;
        Ok(())
    }

    fn release_lock(&self) {
        let path = self.config.paths.run_directory.join(naming::LOCK_FILE);
        if self.store.exists(&path)
            && let Err(e) = self.store.remove_file(&path)
        {
            self.logger.warn(&format!("could not remove lock file: {e}"));
        }
    }
}

/// The lock is also dropped when the orchestrator itself is dropped after
/// an abort, so a cleanly-exiting process never leaves a stale lock.
impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.release_lock();
    }
}
