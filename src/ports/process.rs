//! ProcessRunner port: the seam between the orchestrator and external
//! engine subprocesses.
//!
//! Spawns are argv-vector only (no shell interpolation). Stdout and stderr
//! are pumped line-by-line through secret redaction into transcript files,
//! with a bounded tail kept in memory for error reporting.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::error::SpawnError;
use crate::logging::redaction::redact;

/// Default number of tail lines retained per stream.
pub const DEFAULT_TAIL_LINES: usize = 40;

#[derive(Debug, Clone)]
pub struct SpawnOptions {
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub timeout_ms: Option<u64>,
    /// Directory transcripts land in; `None` disables capture.
    pub transcript_dir: Option<PathBuf>,
    /// `<prefix>-stdout-<ts>.log` / `<prefix>-stderr-<ts>.log`
    pub transcript_prefix: String,
    pub capture_transcripts: bool,
    pub tail_lines: usize,
}

impl Default for SpawnOptions {
    fn default() -> Self {
        Self {
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
            timeout_ms: None,
            transcript_dir: None,
            transcript_prefix: "engine".to_string(),
            capture_transcripts: true,
            tail_lines: DEFAULT_TAIL_LINES,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SpawnResult {
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    pub stdout_tail: Vec<String>,
    pub stderr_tail: Vec<String>,
    pub stdout_transcript_path: Option<PathBuf>,
    pub stderr_transcript_path: Option<PathBuf>,
    pub timed_out: bool,
    pub interrupted: bool,
    pub signal: Option<i32>,
}

impl SpawnResult {
    pub fn success(&self) -> bool {
        !self.timed_out && !self.interrupted && self.exit_code == Some(0)
    }
}

#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run `command` to completion. Only a failure to launch is an `Err`;
    /// non-zero exits, timeouts and interruptions are reported in the
    /// result so the caller can decide on retry semantics.
    async fn spawn(&self, command: &str, options: SpawnOptions) -> Result<SpawnResult, SpawnError>;

    /// Cooperatively cancel every process this runner has started.
    async fn kill_all(&self);
}

// ============================================================================
// Subprocess implementation
// ============================================================================

pub struct SubprocessRunner {
    cancel: CancellationToken,
}

impl SubprocessRunner {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    fn transcript_path(options: &SpawnOptions, stream: &str) -> Option<PathBuf> {
        if !options.capture_transcripts {
            return None;
        }
        let dir = options.transcript_dir.as_ref()?;
        let stamp = chrono::Utc::now()
            .format("%Y-%m-%d_%H-%M-%S-%3fZ")
            .to_string();
        Some(dir.join(format!(
            "{}-{}-{}.log",
            options.transcript_prefix, stream, stamp
        )))
    }
}

/// Pump one output stream: redact each line, append it to the transcript,
/// and keep a bounded tail.
async fn pump_lines<R: AsyncRead + Unpin>(
    reader: R,
    transcript: Option<PathBuf>,
    tail_lines: usize,
) -> (Vec<String>, Option<PathBuf>) {
    let mut file = match &transcript {
        Some(path) => tokio::fs::File::create(path).await.ok(),
        None => None,
    };
    let mut lines = BufReader::new(reader).lines();
    let mut tail: VecDeque<String> = VecDeque::with_capacity(tail_lines.min(256));

    while let Ok(Some(line)) = lines.next_line().await {
        let line = redact(&line);
        if let Some(f) = file.as_mut() {
            let _ = f.write_all(line.as_bytes()).await;
            let _ = f.write_all(b"\n").await;
        }
        if tail_lines > 0 {
            if tail.len() == tail_lines {
                tail.pop_front();
            }
            tail.push_back(line);
        }
    }
    if let Some(f) = file.as_mut() {
        let _ = f.flush().await;
    }
    (tail.into_iter().collect(), transcript)
}

#[async_trait]
impl ProcessRunner for SubprocessRunner {
    async fn spawn(&self, command: &str, options: SpawnOptions) -> Result<SpawnResult, SpawnError> {
        if let Some(dir) = &options.transcript_dir
            && options.capture_transcripts
        {
            std::fs::create_dir_all(dir).map_err(|e| SpawnError {
                command: command.to_string(),
                message: format!("cannot create transcript dir: {e}"),
            })?;
        }

        let mut cmd = Command::new(command);
        cmd.args(&options.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &options.cwd {
            cmd.current_dir(cwd);
        }
        for (key, value) in &options.env {
            cmd.env(key, value);
        }

        let started = Instant::now();
        let mut child = cmd.spawn().map_err(|e| SpawnError {
            command: command.to_string(),
            message: e.to_string(),
        })?;

        let stdout_path = Self::transcript_path(&options, "stdout");
        let stderr_path = Self::transcript_path(&options, "stderr");
        let stdout_task = child.stdout.take().map(|out| {
            tokio::spawn(pump_lines(out, stdout_path.clone(), options.tail_lines))
        });
        let stderr_task = child.stderr.take().map(|err| {
            tokio::spawn(pump_lines(err, stderr_path.clone(), options.tail_lines))
        });

        let timeout = options.timeout_ms.map(Duration::from_millis);
        let deadline = async {
            match timeout {
                Some(t) => tokio::time::sleep(t).await,
                None => std::future::pending::<()>().await,
            }
        };

        let mut timed_out = false;
        let mut interrupted = false;
        let mut status = None;
        tokio::select! {
            s = child.wait() => {
                status = s.ok();
            }
            _ = deadline => {
                timed_out = true;
            }
            _ = self.cancel.cancelled() => {
                interrupted = true;
            }
        }

        if status.is_none() {
            // Kill and reap so the child never outlives the orchestrator.
            let _ = child.start_kill();
            status = child.wait().await.ok();
            if timed_out || interrupted {
                status = None;
            }
        }

        let ((stdout_tail, stdout_transcript_path), (stderr_tail, stderr_transcript_path)) =
            futures::future::join(
                async {
                    match stdout_task {
                        Some(task) => task.await.unwrap_or_else(|_| (Vec::new(), None)),
                        None => (Vec::new(), None),
                    }
                },
                async {
                    match stderr_task {
                        Some(task) => task.await.unwrap_or_else(|_| (Vec::new(), None)),
                        None => (Vec::new(), None),
                    }
                },
            )
            .await;

        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.as_ref().and_then(|s| s.signal())
        };
        #[cfg(not(unix))]
        let signal = None;

        Ok(SpawnResult {
            exit_code: status.as_ref().and_then(|s| s.code()),
            duration_ms: started.elapsed().as_millis() as u64,
            stdout_tail,
            stderr_tail,
            stdout_transcript_path,
            stderr_transcript_path,
            timed_out,
            interrupted,
            signal,
        })
    }

    async fn kill_all(&self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn runner() -> SubprocessRunner {
        SubprocessRunner::new(CancellationToken::new())
    }

    #[tokio::test]
    async fn test_spawn_captures_exit_and_tail() {
        let result = runner()
            .spawn(
                "sh",
                SpawnOptions {
                    args: vec!["-c".to_string(), "echo hello-orchestrator".to_string()],
                    capture_transcripts: false,
                    ..Default::default()
                },
            )
            .await
            .expect("sh should spawn");

        assert!(result.success());
        assert_eq!(result.exit_code, Some(0));
        assert_eq!(result.stdout_tail, vec!["hello-orchestrator".to_string()]);
    }

    #[tokio::test]
    async fn test_spawn_writes_redacted_transcript() {
        let dir = tempdir().unwrap();
        let result = runner()
            .spawn(
                "sh",
                SpawnOptions {
                    args: vec![
                        "-c".to_string(),
                        "echo token=verysecretvalue99".to_string(),
                    ],
                    transcript_dir: Some(dir.path().to_path_buf()),
                    transcript_prefix: "mockengine".to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let path = result.stdout_transcript_path.expect("transcript expected");
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(!contents.contains("verysecretvalue99"));
        assert!(contents.contains("[REDACTED]"));
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("mockengine-stdout-"));
        assert!(name.ends_with(".log"));
    }

    #[tokio::test]
    async fn test_timeout_kills_process() {
        let result = runner()
            .spawn(
                "sh",
                SpawnOptions {
                    args: vec!["-c".to_string(), "sleep 30".to_string()],
                    timeout_ms: Some(100),
                    capture_transcripts: false,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert!(result.timed_out);
        assert!(!result.success());
        assert_eq!(result.exit_code, None);
    }

    #[tokio::test]
    async fn test_cancellation_interrupts() {
        let token = CancellationToken::new();
        let runner = SubprocessRunner::new(token.clone());
        token.cancel();

        let result = runner
            .spawn(
                "sh",
                SpawnOptions {
                    args: vec!["-c".to_string(), "sleep 30".to_string()],
                    capture_transcripts: false,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert!(result.interrupted);
        assert!(!result.success());
    }

    #[tokio::test]
    async fn test_spawn_missing_binary_is_spawn_error() {
        let err = runner()
            .spawn("definitely-not-a-real-binary-42", SpawnOptions::default())
            .await
            .unwrap_err();
        assert!(err.command.contains("definitely-not-a-real-binary-42"));
    }
}
