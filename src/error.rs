//! Error taxonomy for the orchestrator core.
//!
//! Expected failures are tagged results; panics are reserved for invariant
//! breaches. The binary boundary maps each class onto a stable exit code.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ToolName;

/// Stable process exit codes.
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_UNEXPECTED: i32 = 1;
pub const EXIT_USAGE: i32 = 2;
pub const EXIT_VALIDATION: i32 = 3;
pub const EXIT_LIMIT: i32 = 4;
pub const EXIT_ENGINE: i32 = 5;

// ============================================================================
// Schema Validation
// ============================================================================

/// A single schema violation, pinned to the JSON path of the offending field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaViolation {
    /// JSON path, e.g. `$.hardBlockers[2].reason`
    pub path: String,
    pub message: String,
}

impl SchemaViolation {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Artifact missing, JSON parse failure, schema violation, or invariant
/// breach. Fatal for the current run (exit code 3).
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    /// What was being validated, e.g. "plan-metadata.json"
    pub context: String,
    pub violations: Vec<SchemaViolation>,
}

impl ValidationError {
    pub fn new(context: impl Into<String>, violations: Vec<SchemaViolation>) -> Self {
        Self {
            context: context.into(),
            violations,
        }
    }

    pub fn single(
        context: impl Into<String>,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(context, vec![SchemaViolation::new(path, message)])
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} failed validation", self.context)?;
        for v in &self.violations {
            write!(f, "; {v}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

// ============================================================================
// Filesystem
// ============================================================================

/// Error kinds surfaced by the `FileSystem` port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FsErrorKind {
    NotFound,
    NotAFile,
    NotADirectory,
    AlreadyExists,
    PermissionDenied,
    /// A resolved path escaped the configured base directory.
    PathTraversal,
    IoError,
}

#[derive(Debug, Clone, Error, PartialEq)]
#[error("{kind:?} at {}: {message}", .path.display())]
pub struct FsError {
    pub kind: FsErrorKind,
    pub path: PathBuf,
    pub message: String,
}

impl FsError {
    pub fn new(kind: FsErrorKind, path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn from_io(path: &Path, err: &std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::NotFound => FsErrorKind::NotFound,
            std::io::ErrorKind::AlreadyExists => FsErrorKind::AlreadyExists,
            std::io::ErrorKind::PermissionDenied => FsErrorKind::PermissionDenied,
            _ => FsErrorKind::IoError,
        };
        Self::new(kind, path, err.to_string())
    }

    /// `NotFound` on a probe call is a signal, not a failure.
    pub fn is_not_found(&self) -> bool {
        self.kind == FsErrorKind::NotFound
    }
}

// ============================================================================
// Engine Invocation
// ============================================================================

/// Failure to launch a subprocess at all. Non-zero exits, timeouts and
/// signals are reported through `SpawnResult` instead.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("failed to spawn `{command}`: {message}")]
pub struct SpawnError {
    pub command: String,
    pub message: String,
}

/// An engine invocation that ran but did not succeed. Retried with the
/// configured fallback tools; exhaustion is fatal (exit code 5).
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EngineInvocationError {
    #[error("{tool} exited with code {code}: {stderr_tail}")]
    NonZeroExit {
        tool: ToolName,
        code: i32,
        stderr_tail: String,
    },
    #[error("{tool} timed out after {timeout_ms}ms")]
    TimedOut { tool: ToolName, timeout_ms: u64 },
    #[error("{tool} was terminated by signal {signal}")]
    Signaled { tool: ToolName, signal: i32 },
    #[error("{tool} was interrupted")]
    Interrupted { tool: ToolName },
    #[error("{tool}: {source}")]
    SpawnFailed {
        tool: ToolName,
        #[source]
        source: SpawnError,
    },
}

impl EngineInvocationError {
    pub fn tool(&self) -> ToolName {
        match self {
            Self::NonZeroExit { tool, .. }
            | Self::TimedOut { tool, .. }
            | Self::Signaled { tool, .. }
            | Self::Interrupted { tool, .. }
            | Self::SpawnFailed { tool, .. } => *tool,
        }
    }
}

// ============================================================================
// Prompter
// ============================================================================

#[derive(Debug, Clone, Error, PartialEq)]
pub enum PrompterError {
    #[error("prompt cancelled by user")]
    Cancelled,
    /// Raised in non-interactive mode when a prompt has no default.
    #[error("prompt requires a terminal and no default was provided")]
    NonInteractive,
    #[error("prompt timed out")]
    Timeout,
    #[error("input validation failed: {0}")]
    ValidationFailed(String),
    #[error("prompt I/O error: {0}")]
    IoError(String),
}

// ============================================================================
// Orchestrator-level error
// ============================================================================

/// Durable record of the error that failed a run; persisted in the context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    pub kind: String,
    pub message: String,
    pub occurred_at: String,
}

impl ErrorRecord {
    pub fn new(
        kind: impl Into<String>,
        message: impl Into<String>,
        occurred_at: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            occurred_at: occurred_at.into(),
        }
    }
}

/// Top-level error for the orchestration core.
#[derive(Debug, Clone, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Engine(#[from] EngineInvocationError),
    /// Not fatal in itself; reported with next-step hints (exit code 4).
    #[error("{message}")]
    LimitReached {
        message: String,
        next_steps: Vec<String>,
    },
    #[error(transparent)]
    FileSystem(#[from] FsError),
    #[error(transparent)]
    Prompter(#[from] PrompterError),
    #[error("run interrupted")]
    Interrupted,
    #[error("{0}")]
    Unexpected(String),
}

impl OrchestratorError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Validation(_) => EXIT_VALIDATION,
            Self::Engine(_) => EXIT_ENGINE,
            Self::LimitReached { .. } => EXIT_LIMIT,
            Self::FileSystem(_) | Self::Prompter(_) | Self::Interrupted | Self::Unexpected(_) => {
                EXIT_UNEXPECTED
            }
        }
    }

    /// Short kind tag for `ErrorRecord` and structured logs.
    pub fn kind_tag(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Engine(_) => "engine-invocation",
            Self::LimitReached { .. } => "limit-reached",
            Self::FileSystem(_) => "filesystem",
            Self::Prompter(_) => "prompter",
            Self::Interrupted => "interrupted",
            Self::Unexpected(_) => "unexpected",
        }
    }

    pub fn to_record(&self, occurred_at: &str) -> ErrorRecord {
        ErrorRecord::new(self.kind_tag(), self.to_string(), occurred_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        let validation = OrchestratorError::Validation(ValidationError::single(
            "plan-metadata.json",
            "$.confidence",
            "out of range",
        ));
        assert_eq!(validation.exit_code(), EXIT_VALIDATION);

        let engine = OrchestratorError::Engine(EngineInvocationError::TimedOut {
            tool: ToolName::Codex,
            timeout_ms: 1000,
        });
        assert_eq!(engine.exit_code(), EXIT_ENGINE);

        let limit = OrchestratorError::LimitReached {
            message: "max execution iterations reached".to_string(),
            next_steps: vec![],
        };
        assert_eq!(limit.exit_code(), EXIT_LIMIT);
    }

    #[test]
    fn test_validation_error_lists_all_paths() {
        let err = ValidationError::new(
            "execute-metadata.json",
            vec![
                SchemaViolation::new("$.hasFollowUps", "missing required field"),
                SchemaViolation::new("$.hardBlockers[0].reason", "must not be empty"),
            ],
        );
        let rendered = err.to_string();
        assert!(rendered.contains("$.hasFollowUps"));
        assert!(rendered.contains("$.hardBlockers[0].reason"));
    }

    #[test]
    fn test_fs_error_from_io() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = FsError::from_io(Path::new("/tmp/x"), &io);
        assert_eq!(err.kind, FsErrorKind::NotFound);
        assert!(err.is_not_found());
    }
}
