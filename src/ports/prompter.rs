//! Prompter port. The core never talks to a terminal directly; it asks
//! through this trait so non-interactive runs degrade deterministically:
//! a prompt with a default answers itself, one without fails with
//! `NonInteractive`.

use std::io::{BufRead, IsTerminal, Write};

use async_trait::async_trait;

use crate::error::PrompterError;

/// Input validator: `Ok(())` accepts the answer, `Err(reason)` re-prompts
/// (or fails with `ValidationFailed` when re-prompting is impossible).
pub type Validator = dyn Fn(&str) -> Result<(), String> + Send + Sync;

/// One choice in a `select`/`multi_select` prompt.
#[derive(Debug, Clone)]
pub struct SelectOption {
    pub value: String,
    pub label: String,
}

impl SelectOption {
    pub fn new(value: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            label: label.into(),
        }
    }
}

#[async_trait]
pub trait Prompter: Send + Sync {
    fn is_interactive(&self) -> bool;

    async fn confirm(&self, message: &str, default: Option<bool>) -> Result<bool, PrompterError>;

    async fn input(
        &self,
        message: &str,
        default: Option<&str>,
        validator: Option<&Validator>,
    ) -> Result<String, PrompterError>;

    async fn select(
        &self,
        message: &str,
        options: &[SelectOption],
        default: Option<&str>,
    ) -> Result<String, PrompterError>;

    async fn multi_select(
        &self,
        message: &str,
        options: &[SelectOption],
    ) -> Result<Vec<String>, PrompterError>;

    /// Free-form multi-line input; terminal implementations may shell out
    /// to `$EDITOR`.
    async fn editor(&self, message: &str, initial: &str) -> Result<String, PrompterError>;
}

// ============================================================================
// Terminal implementation
// ============================================================================

/// Line-oriented prompter over stdin/stderr. Falls back to defaults (or
/// `NonInteractive`) when stdin is not a TTY.
#[derive(Debug, Clone, Default)]
pub struct TerminalPrompter;

impl TerminalPrompter {
    fn read_line(&self, message: &str) -> Result<String, PrompterError> {
        let mut stderr = std::io::stderr();
        write!(stderr, "{message} ").map_err(|e| PrompterError::IoError(e.to_string()))?;
        stderr
            .flush()
            .map_err(|e| PrompterError::IoError(e.to_string()))?;

        let mut line = String::new();
        std::io::stdin()
            .lock()
            .read_line(&mut line)
            .map_err(|e| PrompterError::IoError(e.to_string()))?;
        if line.is_empty() {
            // EOF on stdin is a cancellation, not an answer.
            return Err(PrompterError::Cancelled);
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }
}

#[async_trait]
impl Prompter for TerminalPrompter {
    fn is_interactive(&self) -> bool {
        std::io::stdin().is_terminal()
    }

    async fn confirm(&self, message: &str, default: Option<bool>) -> Result<bool, PrompterError> {
        if !self.is_interactive() {
            return default.ok_or(PrompterError::NonInteractive);
        }
        let hint = match default {
            Some(true) => "[Y/n]",
            Some(false) => "[y/N]",
            None => "[y/n]",
        };
        loop {
            let answer = self.read_line(&format!("{message} {hint}"))?;
            match answer.to_lowercase().as_str() {
                "" => {
                    if let Some(d) = default {
                        return Ok(d);
                    }
                }
                "y" | "yes" => return Ok(true),
                "n" | "no" => return Ok(false),
                _ => {}
            }
        }
    }

    async fn input(
        &self,
        message: &str,
        default: Option<&str>,
        validator: Option<&Validator>,
    ) -> Result<String, PrompterError> {
        if !self.is_interactive() {
            let answer = default
                .map(String::from)
                .ok_or(PrompterError::NonInteractive)?;
            if let Some(validate) = validator
                && let Err(reason) = validate(&answer)
            {
                return Err(PrompterError::ValidationFailed(reason));
            }
            return Ok(answer);
        }
        let prompt = match default {
            Some(d) => format!("{message} [{d}]"),
            None => message.to_string(),
        };
        loop {
            let answer = self.read_line(&prompt)?;
            let answer = if answer.is_empty() {
                match default {
                    Some(d) => d.to_string(),
                    None => continue,
                }
            } else {
                answer
            };
            match validator {
                Some(validate) => match validate(&answer) {
                    Ok(()) => return Ok(answer),
                    Err(reason) => {
                        let _ = writeln!(std::io::stderr(), "invalid input: {reason}");
                    }
                },
                None => return Ok(answer),
            }
        }
    }

    async fn select(
        &self,
        message: &str,
        options: &[SelectOption],
        default: Option<&str>,
    ) -> Result<String, PrompterError> {
        if options.is_empty() {
            return Err(PrompterError::ValidationFailed(
                "no options to select from".to_string(),
            ));
        }
        if !self.is_interactive() {
            return default
                .map(String::from)
                .ok_or(PrompterError::NonInteractive);
        }
        let mut stderr = std::io::stderr();
        for (i, opt) in options.iter().enumerate() {
            let _ = writeln!(stderr, "  {}) {}", i + 1, opt.label);
        }
        loop {
            let answer = self.read_line(message)?;
            if answer.is_empty()
                && let Some(d) = default
            {
                return Ok(d.to_string());
            }
            if let Ok(index) = answer.parse::<usize>()
                && index >= 1
                && index <= options.len()
            {
                return Ok(options[index - 1].value.clone());
            }
        }
    }

    async fn multi_select(
        &self,
        message: &str,
        options: &[SelectOption],
    ) -> Result<Vec<String>, PrompterError> {
        if !self.is_interactive() {
            return Err(PrompterError::NonInteractive);
        }
        let mut stderr = std::io::stderr();
        for (i, opt) in options.iter().enumerate() {
            let _ = writeln!(stderr, "  {}) {}", i + 1, opt.label);
        }
        let answer = self.read_line(&format!("{message} (comma-separated numbers)"))?;
        let mut picked = Vec::new();
        for token in answer.split(',') {
            if let Ok(index) = token.trim().parse::<usize>()
                && index >= 1
                && index <= options.len()
            {
                picked.push(options[index - 1].value.clone());
            }
        }
        Ok(picked)
    }

    async fn editor(&self, message: &str, initial: &str) -> Result<String, PrompterError> {
        // Multi-line input terminated by a lone "." line; a real $EDITOR
        // integration belongs to the interactive frontend, not the core.
        if !self.is_interactive() {
            return Err(PrompterError::NonInteractive);
        }
        let mut stderr = std::io::stderr();
        let _ = writeln!(stderr, "{message} (finish with a single '.' line)");
        let mut collected = String::from(initial);
        loop {
            let line = self.read_line("")?;
            if line == "." {
                break;
            }
            collected.push_str(&line);
            collected.push('\n');
        }
        Ok(collected)
    }
}

// ============================================================================
// Non-interactive implementation
// ============================================================================

/// Prompter that never blocks: answers with the provided default or fails
/// with `NonInteractive`. Used for `--non-interactive` runs and tests.
#[derive(Debug, Clone, Default)]
pub struct NullPrompter;

#[async_trait]
impl Prompter for NullPrompter {
    fn is_interactive(&self) -> bool {
        false
    }

    async fn confirm(&self, _message: &str, default: Option<bool>) -> Result<bool, PrompterError> {
        default.ok_or(PrompterError::NonInteractive)
    }

    async fn input(
        &self,
        _message: &str,
        default: Option<&str>,
        validator: Option<&Validator>,
    ) -> Result<String, PrompterError> {
        let answer = default
            .map(String::from)
            .ok_or(PrompterError::NonInteractive)?;
        if let Some(validate) = validator
            && let Err(reason) = validate(&answer)
        {
            return Err(PrompterError::ValidationFailed(reason));
        }
        Ok(answer)
    }

    async fn select(
        &self,
        _message: &str,
        _options: &[SelectOption],
        default: Option<&str>,
    ) -> Result<String, PrompterError> {
        default
            .map(String::from)
            .ok_or(PrompterError::NonInteractive)
    }

    async fn multi_select(
        &self,
        _message: &str,
        _options: &[SelectOption],
    ) -> Result<Vec<String>, PrompterError> {
        Err(PrompterError::NonInteractive)
    }

    async fn editor(&self, _message: &str, _initial: &str) -> Result<String, PrompterError> {
        Err(PrompterError::NonInteractive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_null_prompter_uses_defaults() {
        let prompter = NullPrompter;
        assert!(!prompter.is_interactive());
        assert!(prompter.confirm("continue?", Some(true)).await.unwrap());
        assert_eq!(
            prompter.input("name?", Some("fallback"), None).await.unwrap(),
            "fallback"
        );
    }

    #[tokio::test]
    async fn test_null_prompter_runs_validator_on_default() {
        let prompter = NullPrompter;
        let validator = |answer: &str| {
            if answer.len() >= 3 {
                Ok(())
            } else {
                Err("too short".to_string())
            }
        };
        assert_eq!(
            prompter
                .input("name?", Some("abc"), Some(&validator))
                .await
                .unwrap(),
            "abc"
        );
        assert_eq!(
            prompter
                .input("name?", Some("x"), Some(&validator))
                .await
                .unwrap_err(),
            PrompterError::ValidationFailed("too short".to_string())
        );
    }

    #[tokio::test]
    async fn test_null_prompter_fails_without_default() {
        let prompter = NullPrompter;
        assert_eq!(
            prompter.confirm("continue?", None).await.unwrap_err(),
            PrompterError::NonInteractive
        );
        assert_eq!(
            prompter.select("pick", &[], None).await.unwrap_err(),
            PrompterError::NonInteractive
        );
    }
}
