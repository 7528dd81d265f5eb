//! Durable run state: `execution-state.json` is the sole source of truth
//! for crash resume.
//!
//! The file carries the orchestration context, the effective config
//! snapshot and a `lastSaved` stamp. Writes go through the atomic-rename
//! contract, so a resuming process only ever observes a fully committed
//! state.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::artifacts::naming;
use crate::config::EffectiveConfig;
use crate::error::{OrchestratorError, ValidationError};
use crate::ports::filesystem::{FileSystem, WriteOptions};

use super::context::OrchestrationContext;
use super::machine::State;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunState {
    pub context: OrchestrationContext,
    pub config: EffectiveConfig,
    pub last_saved: String,
}

/// A run directory that can be picked up again.
#[derive(Debug, Clone)]
pub struct ResumableRun {
    pub run_dir: PathBuf,
    pub state: RunState,
}

/// Persist the run state atomically into `run_dir`.
pub fn save_run_state(
    fs: &dyn FileSystem,
    run_dir: &Path,
    state: &RunState,
) -> Result<(), OrchestratorError> {
    let text = serde_json::to_string_pretty(state).map_err(|e| {
        OrchestratorError::Unexpected(format!("cannot serialize execution state: {e}"))
    })?;
    fs.write(
        &run_dir.join(naming::STATE_FILE),
        &text,
        WriteOptions::with_parents(),
    )?;
    Ok(())
}

/// Load and migrate the run state from `run_dir`.
///
/// Accepts the legacy lowercase phase aliases for `currentState` and
/// rewrites them to the canonical uppercase names on load.
pub fn load_run_state(fs: &dyn FileSystem, run_dir: &Path) -> Result<RunState, OrchestratorError> {
    let path = run_dir.join(naming::STATE_FILE);
    let text = fs.read_to_string(&path)?;
    let mut value: Value = serde_json::from_str(&text).map_err(|e| {
        ValidationError::single(naming::STATE_FILE, "$", format!("invalid JSON: {e}"))
    })?;

    let legacy = value
        .pointer("/context/currentState")
        .and_then(|v| v.as_str())
        .and_then(State::from_legacy_phase);
    if let Some(canonical) = legacy {
        let canonical = serde_json::to_value(canonical).unwrap_or(Value::Null);
        if let Some(slot) = value.pointer_mut("/context/currentState") {
            *slot = canonical;
        }
    }

    let state: RunState = serde_json::from_value(value).map_err(|e| {
        ValidationError::single(naming::STATE_FILE, "$", format!("schema mismatch: {e}"))
    })?;
    Ok(state)
}

/// Find the most recently modified run directory whose persisted state is
/// resumable. Directories without a state file, or with unreadable or
/// invalid JSON, are skipped with a warning; a live advisory lock means
/// another orchestrator owns the directory.
pub fn find_latest_resumable_run(
    fs: &dyn FileSystem,
    base_dir: &Path,
) -> Result<Option<ResumableRun>, OrchestratorError> {
    let entries = match fs.list(base_dir, None) {
        Ok(entries) => entries,
        Err(e) if e.is_not_found() => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let mut candidates: Vec<(u64, PathBuf)> = Vec::new();
    for entry in entries {
        if let Ok(stat) = fs.stat(&entry)
            && stat.is_dir
        {
            candidates.push((stat.modified_millis, entry));
        }
    }
    candidates.sort_by(|a, b| b.0.cmp(&a.0));

    for (_, run_dir) in candidates {
        if !fs.exists(&run_dir.join(naming::STATE_FILE)) {
            continue;
        }
        if fs.exists(&run_dir.join(naming::LOCK_FILE)) {
            tracing::warn!(
                "skipping {}: locked by another orchestrator",
                run_dir.display()
            );
            continue;
        }
        match load_run_state(fs, &run_dir) {
            Ok(state) if state.context.current_state.is_resumable() => {
                return Ok(Some(ResumableRun { run_dir, state }));
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("skipping {}: {e}", run_dir.display());
            }
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TenaciousConfig;
    use crate::ports::StdFileSystem;
    use tempfile::tempdir;

    fn sample_state(state: State) -> RunState {
        let mut context = OrchestrationContext::new("2026-08-01T00:00:00.000Z".to_string());
        context.current_state = state;
        if !matches!(state, State::Idle | State::PlanGeneration | State::PlanRevision) {
            context.exec_iteration_count = 1;
        }
        RunState {
            context,
            config: EffectiveConfig::resolve(
                "task".to_string(),
                "run-1".to_string(),
                "2026-08-01T00:00:00.000Z".to_string(),
                PathBuf::from("/work"),
                TenaciousConfig::default(),
            ),
            last_saved: "2026-08-01T00:00:01.000Z".to_string(),
        }
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempdir().unwrap();
        let fs = StdFileSystem;
        let state = sample_state(State::Execution);

        save_run_state(&fs, dir.path(), &state).unwrap();
        let loaded = load_run_state(&fs, dir.path()).unwrap();
        assert_eq!(loaded, state);
    }

    #[test]
    fn test_load_migrates_legacy_phase_names() {
        let dir = tempdir().unwrap();
        let fs = StdFileSystem;
        let state = sample_state(State::FollowUps);

        save_run_state(&fs, dir.path(), &state).unwrap();
        let path = dir.path().join(naming::STATE_FILE);
        let patched = std::fs::read_to_string(&path)
            .unwrap()
            .replace("\"FOLLOW_UPS\"", "\"follow-ups\"");
        std::fs::write(&path, patched).unwrap();

        let loaded = load_run_state(&fs, dir.path()).unwrap();
        assert_eq!(loaded.context.current_state, State::FollowUps);
    }

    #[test]
    fn test_find_latest_skips_invalid_and_complete() {
        let dir = tempdir().unwrap();
        let fs = StdFileSystem;

        // Oldest: resumable
        let old = dir.path().join("run-old");
        save_run_state(&fs, &old, &sample_state(State::Execution)).unwrap();

        // Newer: complete, not resumable
        let done = dir.path().join("run-done");
        save_run_state(&fs, &done, &sample_state(State::Complete)).unwrap();

        // Newest: corrupt state file
        let bad = dir.path().join("run-bad");
        std::fs::create_dir_all(&bad).unwrap();
        std::fs::write(bad.join(naming::STATE_FILE), "{broken").unwrap();

        let found = find_latest_resumable_run(&fs, dir.path())
            .unwrap()
            .expect("the execution run should be found");
        assert_eq!(found.run_dir, old);
        assert_eq!(found.state.context.current_state, State::Execution);
    }

    #[test]
    fn test_find_latest_skips_locked_directories() {
        let dir = tempdir().unwrap();
        let fs = StdFileSystem;

        let locked = dir.path().join("run-locked");
        save_run_state(&fs, &locked, &sample_state(State::Execution)).unwrap();
        std::fs::write(locked.join(naming::LOCK_FILE), "1234").unwrap();

        assert!(find_latest_resumable_run(&fs, dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_find_latest_on_missing_base_is_none() {
        let dir = tempdir().unwrap();
        let fs = StdFileSystem;
        let found = find_latest_resumable_run(&fs, &dir.path().join("never-created")).unwrap();
        assert!(found.is_none());
    }
}
