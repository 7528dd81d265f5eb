//! Deterministic artifact naming.
//!
//! Run IDs are ISO-8601 UTC timestamps made filesystem-safe (`:` and `.`
//! become `-`, `T` becomes `_`) so run directories sort lexicographically
//! by creation time. Every artifact filename the system ever produces is
//! defined here; nothing else invents paths.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;

pub const PLAN_DIR: &str = "plan";
pub const TRANSCRIPTS_DIR: &str = "transcripts";

pub const PLAN_MD: &str = "plan.md";
pub const PLAN_METADATA: &str = "plan-metadata.json";
pub const EXECUTE_METADATA: &str = "execute-metadata.json";
pub const GAP_AUDIT_METADATA: &str = "gap-audit-metadata.json";
pub const REQUIREMENTS_FILE: &str = "requirements.txt";
pub const EFFECTIVE_CONFIG_FILE: &str = "effective-config.json";
pub const RUN_SUMMARY_FILE: &str = "run-summary.md";
pub const STATE_FILE: &str = "execution-state.json";
pub const LOCK_FILE: &str = ".lock";

static EXECUTION_SUMMARY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^execution-summary-(\d+)(?:-followup-(\d+))?\.md$")
        .expect("invalid execution summary pattern")
});

/// `2026-08-01T12:34:56.789Z` -> `2026-08-01_12-34-56-789Z`
pub fn sanitize_timestamp(iso: &str) -> String {
    iso.replace([':', '.'], "-").replace('T', "_")
}

/// Run IDs are sanitized creation timestamps.
pub fn run_id_from_iso(iso: &str) -> String {
    sanitize_timestamp(iso)
}

pub fn run_dir(base: &Path, run_id: &str) -> PathBuf {
    base.join(run_id)
}

pub fn plan_dir(run_root: &Path) -> PathBuf {
    run_root.join(PLAN_DIR)
}

/// `execute/` for iteration 1, `execute-N/` for N >= 2.
pub fn execute_dir(run_root: &Path, iteration: u32) -> PathBuf {
    if iteration <= 1 {
        run_root.join("execute")
    } else {
        run_root.join(format!("execute-{iteration}"))
    }
}

pub fn gap_audit_dir(run_root: &Path, iteration: u32) -> PathBuf {
    if iteration <= 1 {
        run_root.join("gap-audit")
    } else {
        run_root.join(format!("gap-audit-{iteration}"))
    }
}

pub fn gap_plan_dir(run_root: &Path, iteration: u32) -> PathBuf {
    if iteration <= 1 {
        run_root.join("gap-plan")
    } else {
        run_root.join(format!("gap-plan-{iteration}"))
    }
}

pub fn transcripts_dir(run_root: &Path) -> PathBuf {
    run_root.join(TRANSCRIPTS_DIR)
}

/// `execution-summary-{n}.md` or `execution-summary-{n}-followup-{k}.md`.
pub fn execution_summary_file(iteration: u32, follow_up: Option<u32>) -> String {
    match follow_up {
        Some(k) => format!("execution-summary-{iteration}-followup-{k}.md"),
        None => format!("execution-summary-{iteration}.md"),
    }
}

pub fn gap_audit_summary_file(iteration: u32) -> String {
    format!("gap-audit-summary-{iteration}.md")
}

pub fn gap_plan_file(iteration: u32) -> String {
    format!("gap-plan-{iteration}.md")
}

pub fn transcript_file(engine: &str, stream: &str, stamp: &str) -> String {
    format!("{engine}-{stream}-{stamp}.log")
}

pub fn debug_bundle_file(stamp: &str) -> String {
    format!("debug-bundle-{stamp}.zip")
}

/// Parse an execution summary filename for the given iteration.
///
/// Returns `Some(None)` for the initial summary, `Some(Some(k))` for
/// follow-up `k`, and `None` when the name belongs to another iteration
/// or is not an execution summary at all.
pub fn parse_execution_summary(file_name: &str, iteration: u32) -> Option<Option<u32>> {
    let caps = EXECUTION_SUMMARY_RE.captures(file_name)?;
    let n: u32 = caps.get(1)?.as_str().parse().ok()?;
    if n != iteration {
        return None;
    }
    match caps.get(2) {
        Some(k) => Some(Some(k.as_str().parse().ok()?)),
        None => Some(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_id_is_filesystem_safe_and_sortable() {
        let a = run_id_from_iso("2026-08-01T12:34:56.789Z");
        let b = run_id_from_iso("2026-08-01T12:34:56.790Z");
        assert_eq!(a, "2026-08-01_12-34-56-789Z");
        assert!(a < b, "later timestamps must sort later");
        assert!(!a.contains(':') && !a.contains('.'));
    }

    #[test]
    fn test_iteration_directories() {
        let root = Path::new("/runs/r1");
        assert_eq!(execute_dir(root, 1), root.join("execute"));
        assert_eq!(execute_dir(root, 2), root.join("execute-2"));
        assert_eq!(gap_audit_dir(root, 1), root.join("gap-audit"));
        assert_eq!(gap_audit_dir(root, 3), root.join("gap-audit-3"));
        assert_eq!(gap_plan_dir(root, 2), root.join("gap-plan-2"));
    }

    #[test]
    fn test_execution_summary_round_trip() {
        assert_eq!(
            parse_execution_summary(&execution_summary_file(1, None), 1),
            Some(None)
        );
        assert_eq!(
            parse_execution_summary(&execution_summary_file(2, Some(3)), 2),
            Some(Some(3))
        );
    }

    #[test]
    fn test_execution_summary_rejects_other_iterations() {
        assert_eq!(parse_execution_summary("execution-summary-2.md", 1), None);
        assert_eq!(
            parse_execution_summary("execution-summary-1-followup-0.md", 2),
            None
        );
        assert_eq!(parse_execution_summary("gap-audit-summary-1.md", 1), None);
        assert_eq!(parse_execution_summary("execute-metadata.json", 1), None);
    }

    #[test]
    fn test_transcript_and_bundle_names() {
        assert_eq!(
            transcript_file("codex", "stdout", "2026-08-01_12-00-00-000Z"),
            "codex-stdout-2026-08-01_12-00-00-000Z.log"
        );
        assert!(debug_bundle_file("x").starts_with("debug-bundle-"));
    }
}
