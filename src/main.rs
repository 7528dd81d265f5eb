use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tenacious_c::artifacts::naming;
use tenacious_c::config::{EffectiveConfig, TenaciousConfig, ToolName};
use tenacious_c::error::{EXIT_UNEXPECTED, EXIT_USAGE};
use tenacious_c::orchestrator::{Dependencies, Orchestrator};
use tenacious_c::ports::clock::{Clock, SystemClock};
use tenacious_c::ports::filesystem::StdFileSystem;
use tenacious_c::ports::process::SubprocessRunner;
use tenacious_c::ports::prompter::{NullPrompter, Prompter, TerminalPrompter};
use tenacious_c::state::persistence::{find_latest_resumable_run, load_run_state};

/// Tenacious-C: drive AI coding engines through a plan-execute-audit loop
#[derive(Parser, Debug)]
#[command(name = "tenacious-c")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the full loop for a requirement
    Run {
        #[command(flatten)]
        args: Box<RunArgs>,
    },

    /// Resume the latest resumable run (or a specific run directory)
    Resume {
        /// Run directory to resume; defaults to the newest resumable one
        #[arg(long)]
        run_dir: Option<PathBuf>,

        /// Artifact base directory to scan
        #[arg(long)]
        artifact_dir: Option<PathBuf>,
    },

    /// List runs and their states
    Runs {
        /// Artifact base directory to scan
        #[arg(long)]
        artifact_dir: Option<PathBuf>,
    },
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Requirement text (or use --file)
    #[arg(short, long)]
    task: Option<String>,

    /// Read the requirement from a file
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Working directory the engines operate in
    #[arg(short, long)]
    working_dir: Option<PathBuf>,

    /// Artifact base directory (default: ~/.tenacious-c/runs)
    #[arg(long)]
    artifact_dir: Option<PathBuf>,

    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Engine for planning phases
    #[arg(long)]
    plan_tool: Option<ToolName>,

    /// Engine for execution phases
    #[arg(long)]
    execute_tool: Option<ToolName>,

    /// Engine for gap audits
    #[arg(long)]
    audit_tool: Option<ToolName>,

    /// Model override for planning phases
    #[arg(long)]
    plan_model: Option<String>,

    /// Model override for execution phases
    #[arg(long)]
    execute_model: Option<String>,

    /// Model override for gap audits
    #[arg(long)]
    audit_model: Option<String>,

    /// Maximum plan revisions
    #[arg(long)]
    max_plan_iterations: Option<u32>,

    /// Maximum execution iterations
    #[arg(long)]
    max_exec_iterations: Option<u32>,

    /// Maximum follow-up iterations per execution iteration
    #[arg(long)]
    max_follow_up_iterations: Option<u32>,

    /// Plan confidence threshold (0-100)
    #[arg(long)]
    confidence_threshold: Option<u8>,

    /// Treat every iteration limit as infinite
    #[arg(long)]
    unlimited: bool,

    /// Route every invocation to the deterministic mock engine
    #[arg(long)]
    mock: bool,

    /// Stop after the plan phase converges
    #[arg(long)]
    plan_only: bool,

    /// Never prompt; fail where a prompt has no default
    #[arg(long)]
    non_interactive: bool,

    /// Engine timeout in seconds
    #[arg(long)]
    engine_timeout_secs: Option<u64>,
}

impl RunArgs {
    /// Layer CLI arguments over the env/file config.
    fn apply_to(&self, mut cfg: TenaciousConfig) -> TenaciousConfig {
        if let Some(tool) = self.plan_tool {
            cfg.tools.plan = tool;
        }
        if let Some(tool) = self.execute_tool {
            cfg.tools.execute = tool;
        }
        if let Some(tool) = self.audit_tool {
            cfg.tools.audit = tool;
        }
        if self.plan_model.is_some() {
            cfg.models.plan = self.plan_model.clone();
        }
        if self.execute_model.is_some() {
            cfg.models.execute = self.execute_model.clone();
        }
        if self.audit_model.is_some() {
            cfg.models.audit = self.audit_model.clone();
        }
        if let Some(max) = self.max_plan_iterations {
            cfg.limits.max_plan_iterations = max;
        }
        if let Some(max) = self.max_exec_iterations {
            cfg.limits.max_exec_iterations = max;
        }
        if let Some(max) = self.max_follow_up_iterations {
            cfg.limits.max_follow_up_iterations = max;
        }
        if let Some(threshold) = self.confidence_threshold {
            cfg.thresholds.plan_confidence = threshold.min(100);
        }
        if let Some(secs) = self.engine_timeout_secs {
            cfg.timeouts.engine_ms = secs.saturating_mul(1_000);
        }
        if self.artifact_dir.is_some() {
            cfg.artifact_base_dir = self.artifact_dir.clone();
        }
        cfg.run_mode.unlimited_iterations |= self.unlimited;
        cfg.run_mode.mock_mode |= self.mock;
        cfg.run_mode.plan_only |= self.plan_only;
        if self.non_interactive {
            cfg.interactivity.interactive = false;
        }
        cfg
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn build_dependencies(interactive: bool, cancel: &CancellationToken) -> Dependencies {
    let prompter: Arc<dyn Prompter> = if interactive {
        Arc::new(TerminalPrompter)
    } else {
        Arc::new(NullPrompter)
    };
    Dependencies {
        fs: Arc::new(StdFileSystem),
        runner: Arc::new(SubprocessRunner::new(cancel.clone())),
        prompter,
        clock: Arc::new(SystemClock),
    }
}

/// Wire Ctrl-C into cooperative cancellation: the running subprocess is
/// terminated, in-flight transcripts flushed, and state persisted before
/// the process exits non-zero.
fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; shutting down");
            cancel.cancel();
        }
    });
}

async fn cmd_run(args: RunArgs) -> Result<i32> {
    let requirements = match (&args.task, &args.file) {
        (Some(task), None) => task.clone(),
        (None, Some(file)) => std::fs::read_to_string(file)
            .with_context(|| format!("cannot read requirement file {}", file.display()))?,
        _ => {
            eprintln!("error: provide exactly one of --task or --file");
            return Ok(EXIT_USAGE);
        }
    };
    if requirements.trim().is_empty() {
        eprintln!("error: the requirement text is empty");
        return Ok(EXIT_USAGE);
    }

    let layered = TenaciousConfig::load_with_env(args.config.as_ref())
        .context("cannot load configuration")?;
    let layered = args.apply_to(layered);

    let working_dir = match &args.working_dir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().context("cannot determine working directory")?,
    };

    let clock = SystemClock;
    let resolved_at = clock.iso_now();
    let run_id = naming::run_id_from_iso(&resolved_at);
    let interactive = layered.interactivity.interactive;
    let config =
        EffectiveConfig::resolve(requirements.clone(), run_id, resolved_at, working_dir, layered);

    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());
    let deps = build_dependencies(interactive, &cancel);

    let mut orchestrator = Orchestrator::new(config, deps, cancel);
    match orchestrator.run(&requirements).await {
        Ok(outcome) => {
            let summary = orchestrator.run_summary();
            eprintln!(
                "run {} finished in {} (plan revisions: {}, execution iterations: {})",
                summary.run_id,
                summary.state,
                summary.plan_revision_count,
                summary.exec_iteration_count
            );
            Ok(outcome.exit_code())
        }
        Err(e) => {
            eprintln!("error: {e}");
            Ok(e.exit_code())
        }
    }
}

async fn cmd_resume(run_dir: Option<PathBuf>, artifact_dir: Option<PathBuf>) -> Result<i32> {
    let fs = StdFileSystem;
    let layered = TenaciousConfig::load_with_env(None)?;
    let base_dir = artifact_dir
        .or(layered.artifact_base_dir.clone())
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".tenacious-c")
                .join("runs")
        });

    let saved = match run_dir {
        Some(dir) => {
            let state = load_run_state(&fs, &dir).context("cannot load execution state")?;
            state
        }
        None => match find_latest_resumable_run(&fs, &base_dir)? {
            Some(found) => {
                eprintln!("resuming {}", found.run_dir.display());
                found.state
            }
            None => {
                eprintln!("no resumable run under {}", base_dir.display());
                return Ok(EXIT_UNEXPECTED);
            }
        },
    };

    if !saved.context.current_state.is_resumable() {
        eprintln!(
            "run {} is in {} and cannot be resumed",
            saved.config.run_id, saved.context.current_state
        );
        return Ok(EXIT_USAGE);
    }

    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());
    let deps = build_dependencies(saved.config.interactivity.interactive, &cancel);

    let mut orchestrator = Orchestrator::new(saved.config.clone(), deps, cancel);
    match orchestrator.resume_and_run(saved).await {
        Ok(outcome) => Ok(outcome.exit_code()),
        Err(e) => {
            eprintln!("error: {e}");
            Ok(e.exit_code())
        }
    }
}

fn cmd_runs(artifact_dir: Option<PathBuf>) -> Result<i32> {
    let fs = StdFileSystem;
    let layered = TenaciousConfig::load_with_env(None)?;
    let base_dir = artifact_dir
        .or(layered.artifact_base_dir)
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".tenacious-c")
                .join("runs")
        });

    let entries = match std::fs::read_dir(&base_dir) {
        Ok(entries) => entries,
        Err(_) => {
            println!("no runs under {}", base_dir.display());
            return Ok(0);
        }
    };

    let mut rows = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        match load_run_state(&fs, &path) {
            Ok(state) => rows.push((
                state.config.run_id,
                state.context.current_state.to_string(),
                state.last_saved,
            )),
            Err(_) => rows.push((
                entry.file_name().to_string_lossy().to_string(),
                "<unreadable>".to_string(),
                String::new(),
            )),
        }
    }
    rows.sort();

    if rows.is_empty() {
        println!("no runs under {}", base_dir.display());
        return Ok(0);
    }
    for (run_id, state, last_saved) in rows {
        println!("{run_id}  {state}  {last_saved}");
    }
    Ok(0)
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let code = match cli.command {
        Command::Run { args } => cmd_run(*args).await?,
        Command::Resume { run_dir, artifact_dir } => cmd_resume(run_dir, artifact_dir).await?,
        Command::Runs { artifact_dir } => cmd_runs(artifact_dir)?,
    };
    std::process::exit(code);
}
