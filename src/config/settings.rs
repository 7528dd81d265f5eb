//! Run configuration: the layered CLI/env/file config and the frozen
//! per-run `EffectiveConfig` snapshot.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Sentinel meaning "no limit" for any iteration counter.
pub const UNLIMITED: u32 = u32::MAX;

// ============================================================================
// Tool Names
// ============================================================================

/// External AI coding engines the orchestrator can drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolName {
    Codex,
    Copilot,
    Cursor,
    Claude,
    /// Deterministic in-process engine for hermetic runs and tests.
    Mock,
}

impl ToolName {
    /// Executable name looked up on PATH.
    pub fn command(&self) -> &'static str {
        match self {
            Self::Codex => "codex",
            Self::Copilot => "copilot",
            Self::Cursor => "cursor-agent",
            Self::Claude => "claude",
            Self::Mock => "mock",
        }
    }

    pub fn all() -> &'static [ToolName] {
        &[
            Self::Codex,
            Self::Copilot,
            Self::Cursor,
            Self::Claude,
            Self::Mock,
        ]
    }
}

impl std::fmt::Display for ToolName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Codex => "codex",
            Self::Copilot => "copilot",
            Self::Cursor => "cursor",
            Self::Claude => "claude",
            Self::Mock => "mock",
        };
        write!(f, "{name}")
    }
}

impl std::str::FromStr for ToolName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "codex" => Ok(Self::Codex),
            "copilot" => Ok(Self::Copilot),
            "cursor" => Ok(Self::Cursor),
            "claude" => Ok(Self::Claude),
            "mock" => Ok(Self::Mock),
            _ => Err(format!(
                "Invalid tool: '{s}'. Available: codex, copilot, cursor, claude, mock"
            )),
        }
    }
}

// ============================================================================
// Config sections
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathsConfig {
    /// Directory the engines operate in.
    pub working_directory: PathBuf,
    /// Parent directory holding one subdirectory per run.
    pub artifact_base_dir: PathBuf,
    /// `<artifact_base_dir>/<run_id>` for this run.
    pub run_directory: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LimitsConfig {
    pub max_plan_iterations: u32,
    pub max_exec_iterations: u32,
    pub max_follow_up_iterations: u32,
    pub max_gap_audit_iterations: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_plan_iterations: 5,
            max_exec_iterations: 3,
            max_follow_up_iterations: 5,
            max_gap_audit_iterations: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ThresholdsConfig {
    /// Minimum plan confidence (0-100) for the plan phase to converge.
    pub plan_confidence: u8,
}

impl Default for ThresholdsConfig {
    fn default() -> Self {
        Self {
            plan_confidence: 85,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ToolsConfig {
    pub plan: ToolName,
    pub execute: ToolName,
    pub audit: ToolName,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            plan: ToolName::Claude,
            execute: ToolName::Claude,
            audit: ToolName::Claude,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ModelsConfig {
    pub plan: Option<String>,
    pub execute: Option<String>,
    pub audit: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FallbackConfig {
    /// Tools tried in order when the primary engine keeps failing.
    pub fallback_tools: Vec<ToolName>,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            fallback_tools: Vec::new(),
            max_retries: 2,
            retry_delay_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TimeoutsConfig {
    /// Per-invocation engine timeout.
    pub engine_ms: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            engine_ms: 900_000, // 15 minutes
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RunModeConfig {
    pub resume: bool,
    /// Treat every iteration limit as infinite.
    pub unlimited_iterations: bool,
    /// Route every invocation to the deterministic mock engine.
    pub mock_mode: bool,
    /// Stop once the plan phase converges.
    pub plan_only: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct InteractivityConfig {
    pub interactive: bool,
    pub preview_plan: bool,
}

impl Default for InteractivityConfig {
    fn default() -> Self {
        Self {
            interactive: true,
            preview_plan: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VerbosityConfig {
    pub verbose: bool,
    pub quiet: bool,
}

// ============================================================================
// Layered configuration (file < env < CLI)
// ============================================================================

/// Configuration as loaded from the optional YAML file, before the run
/// identity is attached. CLI arguments are layered on top by `main`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TenaciousConfig {
    pub limits: LimitsConfig,
    pub thresholds: ThresholdsConfig,
    pub tools: ToolsConfig,
    pub models: ModelsConfig,
    pub fallback: FallbackConfig,
    pub timeouts: TimeoutsConfig,
    pub run_mode: RunModeConfig,
    pub interactivity: InteractivityConfig,
    pub verbosity: VerbosityConfig,
    /// Overrides the default artifact location (`~/.tenacious-c/runs`).
    pub artifact_base_dir: Option<PathBuf>,
}

impl TenaciousConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &PathBuf) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: TenaciousConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration, falling back to defaults if the file doesn't exist.
    pub fn load_or_default(path: Option<&PathBuf>) -> anyhow::Result<Self> {
        match path {
            Some(p) if p.exists() => Self::from_file(p),
            _ => Ok(Self::default()),
        }
    }

    /// Apply environment variable overrides.
    ///
    /// Environment variables (TENACIOUS_*) override config file values but
    /// are themselves overridden by CLI arguments.
    pub fn apply_env_overrides(mut self) -> Self {
        if let Ok(val) = std::env::var("TENACIOUS_MAX_PLAN_ITERATIONS")
            && let Ok(max) = val.parse::<u32>()
        {
            self.limits.max_plan_iterations = max;
        }

        if let Ok(val) = std::env::var("TENACIOUS_MAX_EXEC_ITERATIONS")
            && let Ok(max) = val.parse::<u32>()
        {
            self.limits.max_exec_iterations = max;
        }

        if let Ok(val) = std::env::var("TENACIOUS_MAX_FOLLOW_UP_ITERATIONS")
            && let Ok(max) = val.parse::<u32>()
        {
            self.limits.max_follow_up_iterations = max;
        }

        if let Ok(val) = std::env::var("TENACIOUS_PLAN_CONFIDENCE")
            && let Ok(threshold) = val.parse::<u8>()
        {
            self.thresholds.plan_confidence = threshold.min(100);
        }

        if let Ok(val) = std::env::var("TENACIOUS_PLAN_TOOL")
            && let Ok(tool) = val.parse::<ToolName>()
        {
            self.tools.plan = tool;
        }

        if let Ok(val) = std::env::var("TENACIOUS_EXECUTE_TOOL")
            && let Ok(tool) = val.parse::<ToolName>()
        {
            self.tools.execute = tool;
        }

        if let Ok(val) = std::env::var("TENACIOUS_AUDIT_TOOL")
            && let Ok(tool) = val.parse::<ToolName>()
        {
            self.tools.audit = tool;
        }

        if let Ok(val) = std::env::var("TENACIOUS_ARTIFACT_DIR")
            && !val.is_empty()
        {
            self.artifact_base_dir = Some(PathBuf::from(val));
        }

        if let Ok(val) = std::env::var("TENACIOUS_UNLIMITED")
            && !val.is_empty()
        {
            self.run_mode.unlimited_iterations = val == "1" || val.eq_ignore_ascii_case("true");
        }

        self
    }

    /// Load configuration with environment variable overrides applied.
    ///
    /// Priority: CLI args > env vars > config file > defaults
    /// (CLI args are applied separately in main).
    pub fn load_with_env(path: Option<&PathBuf>) -> anyhow::Result<Self> {
        Self::load_or_default(path).map(|c| c.apply_env_overrides())
    }
}

// ============================================================================
// Effective config
// ============================================================================

/// The fully-resolved configuration for one run. Immutable once created;
/// a redacted snapshot is persisted as `effective-config.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectiveConfig {
    /// Verbatim requirement text handed to `start`.
    pub input: String,
    pub run_id: String,
    pub resolved_at: String,
    pub paths: PathsConfig,
    pub limits: LimitsConfig,
    pub thresholds: ThresholdsConfig,
    pub tools: ToolsConfig,
    pub models: ModelsConfig,
    pub fallback: FallbackConfig,
    pub timeouts: TimeoutsConfig,
    pub run_mode: RunModeConfig,
    pub interactivity: InteractivityConfig,
    pub verbosity: VerbosityConfig,
}

impl EffectiveConfig {
    /// Freeze a layered config into the per-run snapshot.
    pub fn resolve(
        input: String,
        run_id: String,
        resolved_at: String,
        working_directory: PathBuf,
        layered: TenaciousConfig,
    ) -> Self {
        let artifact_base_dir = layered
            .artifact_base_dir
            .unwrap_or_else(default_artifact_base_dir);
        let run_directory = artifact_base_dir.join(&run_id);

        Self {
            input,
            run_id,
            resolved_at,
            paths: PathsConfig {
                working_directory,
                artifact_base_dir,
                run_directory,
            },
            limits: layered.limits,
            thresholds: layered.thresholds,
            tools: layered.tools,
            models: layered.models,
            fallback: layered.fallback,
            timeouts: layered.timeouts,
            run_mode: layered.run_mode,
            interactivity: layered.interactivity,
            verbosity: layered.verbosity,
        }
    }

    /// True when the given limit should be treated as infinite.
    pub fn is_unlimited(&self, limit: u32) -> bool {
        self.run_mode.unlimited_iterations || limit == UNLIMITED
    }

    /// Run mode tag carried on every log record.
    pub fn mode_tag(&self) -> &'static str {
        if self.run_mode.mock_mode {
            "mock"
        } else if self.run_mode.plan_only {
            "plan-only"
        } else if self.run_mode.unlimited_iterations {
            "unlimited"
        } else {
            "standard"
        }
    }

    /// JSON snapshot with every string field passed through secret
    /// redaction; this is what `effective-config.json` contains.
    pub fn redacted_value(&self) -> serde_json::Value {
        fn redact_strings(value: &mut serde_json::Value) {
            match value {
                serde_json::Value::String(s) => {
                    *s = crate::logging::redaction::redact(s);
                }
                serde_json::Value::Array(items) => {
                    for item in items {
                        redact_strings(item);
                    }
                }
                serde_json::Value::Object(map) => {
                    for (_, item) in map.iter_mut() {
                        redact_strings(item);
                    }
                }
                _ => {}
            }
        }

        let mut value = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        redact_strings(&mut value);
        value
    }
}

fn default_artifact_base_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".tenacious-c")
        .join("runs")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolved(layered: TenaciousConfig) -> EffectiveConfig {
        EffectiveConfig::resolve(
            "build a widget".to_string(),
            "2026-08-01_12-00-00-000Z".to_string(),
            "2026-08-01T12:00:00.000Z".to_string(),
            PathBuf::from("/work"),
            layered,
        )
    }

    #[test]
    fn test_run_directory_is_under_base() {
        let cfg = resolved(TenaciousConfig {
            artifact_base_dir: Some(PathBuf::from("/tmp/runs")),
            ..Default::default()
        });
        assert_eq!(
            cfg.paths.run_directory,
            PathBuf::from("/tmp/runs/2026-08-01_12-00-00-000Z")
        );
    }

    #[test]
    fn test_unlimited_via_mode_or_sentinel() {
        let mut cfg = resolved(TenaciousConfig::default());
        assert!(!cfg.is_unlimited(cfg.limits.max_plan_iterations));
        assert!(cfg.is_unlimited(UNLIMITED));

        cfg.run_mode.unlimited_iterations = true;
        assert!(cfg.is_unlimited(3));
    }

    #[test]
    fn test_tool_name_round_trip() {
        for tool in ToolName::all() {
            let parsed: ToolName = tool.to_string().parse().expect("parse back");
            assert_eq!(parsed, *tool);
        }
        assert!("emacs".parse::<ToolName>().is_err());
    }

    #[test]
    fn test_yaml_defaults() {
        let cfg: TenaciousConfig = serde_yaml::from_str("limits:\n  maxExecIterations: 7\n")
            .expect("partial yaml should deserialize");
        assert_eq!(cfg.limits.max_exec_iterations, 7);
        assert_eq!(cfg.limits.max_plan_iterations, 5);
        assert_eq!(cfg.thresholds.plan_confidence, 85);
    }

    #[test]
    fn test_redacted_value_scrubs_secrets() {
        let mut cfg = resolved(TenaciousConfig::default());
        cfg.input = "use api_key=sk-1234567890abcdef1234 for the deploy".to_string();
        let value = cfg.redacted_value();
        let rendered = value.to_string();
        assert!(!rendered.contains("sk-1234567890abcdef1234"));
        assert!(rendered.contains("[REDACTED]"));
    }
}
