//! Artifact completeness checks and the crash-resume directory scan.
//!
//! Markdown presence contributes to completeness only; decisions are read
//! exclusively from the metadata JSON.

use std::path::Path;

use serde::Serialize;

use crate::error::{OrchestratorError, SchemaViolation, ValidationError};

use super::naming;
use super::schemas::{
    self, ExecuteMetadata, GapAuditMetadata, PlanMetadata,
};
use super::store::ArtifactStore;

/// Result of a completeness check over one artifact directory.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ArtifactCheck {
    pub valid: bool,
    /// Artifact filenames that should exist but don't.
    pub missing: Vec<String>,
    /// Schema violations in artifacts that do exist.
    pub errors: Vec<SchemaViolation>,
}

impl ArtifactCheck {
    fn finish(mut self) -> Self {
        self.valid = self.missing.is_empty() && self.errors.is_empty();
        self
    }

    /// Convert a failed check into the error that fails the run.
    pub fn into_validation_error(self, context: &str) -> Option<ValidationError> {
        if self.valid {
            return None;
        }
        let mut violations = self.errors;
        for missing in self.missing {
            violations.push(SchemaViolation::new("$", format!("missing artifact {missing}")));
        }
        Some(ValidationError::new(context, violations))
    }
}

fn check_metadata<T>(
    store: &ArtifactStore,
    dir: &Path,
    file_name: &str,
    parse: impl Fn(&str) -> Result<T, ValidationError>,
    check: &mut ArtifactCheck,
) {
    let path = dir.join(file_name);
    if !store.exists(&path) {
        check.missing.push(file_name.to_string());
        return;
    }
    match store.read_text(&path) {
        Ok(text) => {
            if let Err(err) = parse(&text) {
                check.errors.extend(err.violations);
            }
        }
        Err(e) => check
            .errors
            .push(SchemaViolation::new("$", format!("unreadable {file_name}: {e}"))),
    }
}

/// `plan.md` and a parseable `plan-metadata.json` must both exist.
pub fn validate_plan_artifacts(store: &ArtifactStore, plan_dir: &Path) -> ArtifactCheck {
    let mut check = ArtifactCheck::default();
    if !store.exists(&plan_dir.join(naming::PLAN_MD)) {
        check.missing.push(naming::PLAN_MD.to_string());
    }
    check_metadata(
        store,
        plan_dir,
        naming::PLAN_METADATA,
        schemas::parse_plan_metadata,
        &mut check,
    );
    check.finish()
}

/// The iteration's summary markdown and a parseable `execute-metadata.json`
/// must both exist.
pub fn validate_execution_artifacts(
    store: &ArtifactStore,
    exec_dir: &Path,
    iteration: u32,
) -> ArtifactCheck {
    let mut check = ArtifactCheck::default();
    let summary = naming::execution_summary_file(iteration, None);
    if !store.exists(&exec_dir.join(&summary)) {
        check.missing.push(summary);
    }
    check_metadata(
        store,
        exec_dir,
        naming::EXECUTE_METADATA,
        schemas::parse_execute_metadata,
        &mut check,
    );
    check.finish()
}

pub fn validate_gap_audit_artifacts(
    store: &ArtifactStore,
    gap_audit_dir: &Path,
    iteration: u32,
) -> ArtifactCheck {
    let mut check = ArtifactCheck::default();
    let summary = naming::gap_audit_summary_file(iteration);
    if !store.exists(&gap_audit_dir.join(&summary)) {
        check.missing.push(summary);
    }
    check_metadata(
        store,
        gap_audit_dir,
        naming::GAP_AUDIT_METADATA,
        schemas::parse_gap_audit_metadata,
        &mut check,
    );
    check.finish()
}

pub fn validate_gap_plan_artifacts(
    store: &ArtifactStore,
    gap_plan_dir: &Path,
    iteration: u32,
) -> ArtifactCheck {
    let mut check = ArtifactCheck::default();
    let file = naming::gap_plan_file(iteration);
    if !store.exists(&gap_plan_dir.join(&file)) {
        check.missing.push(file);
    }
    check.finish()
}

// ============================================================================
// Execution artifact scan (resume reconstruction)
// ============================================================================

/// What the execution directory proves happened before a crash.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionArtifactScan {
    /// The initial `execution-summary-{n}.md` exists.
    pub initial_done: bool,
    pub last_follow_up_iteration: Option<u32>,
    /// Follow-up iteration 0 (the hard-blocker pass) completed.
    pub has_done_iteration0: bool,
    /// All follow-up indices found, ascending.
    pub all_follow_up_iterations: Vec<u32>,
}

/// Scan `execution-summary-{n}[-followup-{k}].md` files to reconstruct
/// progress from disk alone. A missing directory means nothing happened.
pub fn scan_execution_artifacts(
    store: &ArtifactStore,
    exec_dir: &Path,
    iteration: u32,
) -> Result<ExecutionArtifactScan, OrchestratorError> {
    let mut scan = ExecutionArtifactScan::default();
    if !store.exists(exec_dir) {
        return Ok(scan);
    }

    for entry in store.list(exec_dir, Some("execution-summary-*.md"))? {
        let Some(name) = entry.file_name().map(|n| n.to_string_lossy().to_string()) else {
            continue;
        };
        match naming::parse_execution_summary(&name, iteration) {
            Some(None) => scan.initial_done = true,
            Some(Some(k)) => scan.all_follow_up_iterations.push(k),
            None => {}
        }
    }

    scan.all_follow_up_iterations.sort_unstable();
    scan.all_follow_up_iterations.dedup();
    scan.last_follow_up_iteration = scan.all_follow_up_iterations.last().copied();
    scan.has_done_iteration0 = scan.all_follow_up_iterations.first() == Some(&0);
    Ok(scan)
}

// ============================================================================
// Typed metadata loaders
// ============================================================================

pub fn load_plan_metadata(
    store: &ArtifactStore,
    run_root: &Path,
) -> Result<PlanMetadata, OrchestratorError> {
    let path = naming::plan_dir(run_root).join(naming::PLAN_METADATA);
    let text = store.read_text(&path)?;
    Ok(schemas::parse_plan_metadata(&text)?)
}

pub fn load_execute_metadata(
    store: &ArtifactStore,
    run_root: &Path,
    iteration: u32,
) -> Result<ExecuteMetadata, OrchestratorError> {
    let path = naming::execute_dir(run_root, iteration).join(naming::EXECUTE_METADATA);
    let text = store.read_text(&path)?;
    Ok(schemas::parse_execute_metadata(&text)?)
}

pub fn load_gap_audit_metadata(
    store: &ArtifactStore,
    run_root: &Path,
    iteration: u32,
) -> Result<GapAuditMetadata, OrchestratorError> {
    let path = naming::gap_audit_dir(run_root, iteration).join(naming::GAP_AUDIT_METADATA);
    let text = store.read_text(&path)?;
    Ok(schemas::parse_gap_audit_metadata(&text)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::StdFileSystem;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn store(base: &Path) -> ArtifactStore {
        ArtifactStore::new(Arc::new(StdFileSystem), base.to_path_buf())
    }

    fn valid_plan_json() -> String {
        schemas::to_pretty_json(&PlanMetadata {
            schema_version: schemas::SCHEMA_VERSION.to_string(),
            confidence: 90,
            open_questions: vec![],
            summary: "ship it".to_string(),
        })
        .unwrap()
    }

    #[test]
    fn test_plan_check_reports_missing_files() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let plan_dir = dir.path().join("plan");
        store.create_dir_all(&plan_dir).unwrap();

        let check = validate_plan_artifacts(&store, &plan_dir);
        assert!(!check.valid);
        assert!(check.missing.contains(&"plan.md".to_string()));
        assert!(check.missing.contains(&"plan-metadata.json".to_string()));
    }

    #[test]
    fn test_plan_check_passes_with_both_artifacts() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let plan_dir = dir.path().join("plan");
        store.write_text(&plan_dir.join("plan.md"), "# Plan").unwrap();
        store
            .write_text(&plan_dir.join("plan-metadata.json"), &valid_plan_json())
            .unwrap();

        let check = validate_plan_artifacts(&store, &plan_dir);
        assert!(check.valid, "missing={:?} errors={:?}", check.missing, check.errors);
    }

    #[test]
    fn test_plan_check_surfaces_schema_errors() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let plan_dir = dir.path().join("plan");
        store.write_text(&plan_dir.join("plan.md"), "# Plan").unwrap();
        store
            .write_text(
                &plan_dir.join("plan-metadata.json"),
                r#"{"schemaVersion":"1.0.0","confidence":120,"openQuestions":[],"summary":"x"}"#,
            )
            .unwrap();

        let check = validate_plan_artifacts(&store, &plan_dir);
        assert!(!check.valid);
        assert!(check.errors.iter().any(|v| v.path == "$.confidence"));
    }

    #[test]
    fn test_execution_scan_reconstructs_follow_ups() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let exec_dir = dir.path().join("execute");
        store
            .write_text(&exec_dir.join("execution-summary-1.md"), "initial")
            .unwrap();
        for k in 0..3 {
            store
                .write_text(
                    &exec_dir.join(format!("execution-summary-1-followup-{k}.md")),
                    "follow-up",
                )
                .unwrap();
        }
        // Noise from another iteration must be ignored
        store
            .write_text(&exec_dir.join("execution-summary-2.md"), "other")
            .unwrap();

        let scan = scan_execution_artifacts(&store, &exec_dir, 1).unwrap();
        assert!(scan.initial_done);
        assert!(scan.has_done_iteration0);
        assert_eq!(scan.all_follow_up_iterations, vec![0, 1, 2]);
        assert_eq!(scan.last_follow_up_iteration, Some(2));
    }

    #[test]
    fn test_execution_scan_of_missing_dir_is_empty() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let scan =
            scan_execution_artifacts(&store, &dir.path().join("execute-9"), 9).unwrap();
        assert_eq!(scan, ExecutionArtifactScan::default());
    }

    #[test]
    fn test_into_validation_error_keeps_missing_names() {
        let check = ArtifactCheck {
            valid: false,
            missing: vec!["plan.md".to_string()],
            errors: vec![],
        };
        let err = check.into_validation_error("plan artifacts").unwrap();
        assert!(err.to_string().contains("plan.md"));
    }
}
