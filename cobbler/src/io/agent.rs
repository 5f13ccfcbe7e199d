//! Agent abstraction.
//!
//! The [`Agent`] trait decouples task execution from the agent backend
//! (any CLI that reads a prompt on stdin and streams JSON events on stdout).
//! Tests use scripted agents that return predetermined runs without spawning
//! processes.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::core::transcript::parse_usage;
use crate::core::types::TokenUsage;
use crate::io::config::AgentConfig;
use crate::io::process::run_command;

/// Parameters for one agent invocation.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    /// Working directory for the agent process.
    pub workdir: PathBuf,
    /// Prompt text fed on stdin.
    pub prompt: String,
    /// Arguments appended after the agent's own.
    pub extra_args: Vec<String>,
    pub timeout: Duration,
    /// Truncate captured output beyond this many bytes.
    pub output_limit_bytes: usize,
    /// Stream stdout lines here while the agent runs.
    pub transcript_path: Option<PathBuf>,
}

impl AgentRequest {
    pub fn new(workdir: impl Into<PathBuf>, prompt: impl Into<String>, cfg: &AgentConfig) -> Self {
        Self {
            workdir: workdir.into(),
            prompt: prompt.into(),
            extra_args: cfg.extra_args.clone(),
            timeout: Duration::from_secs(cfg.timeout_secs),
            output_limit_bytes: cfg.output_limit_bytes,
            transcript_path: None,
        }
    }

    pub fn with_transcript(mut self, path: Option<PathBuf>) -> Self {
        self.transcript_path = path;
        self
    }
}

/// How an agent process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentExit {
    Completed,
    /// Non-zero exit; `None` when killed by a signal.
    Failed { code: Option<i32> },
    TimedOut,
}

/// Result of an agent process that was started.
#[derive(Debug, Clone)]
pub struct AgentRun {
    pub exit: AgentExit,
    pub transcript: String,
    pub stderr: String,
    pub usage: TokenUsage,
    pub duration: Duration,
}

impl AgentRun {
    pub fn succeeded(&self) -> bool {
        self.exit == AgentExit::Completed
    }
}

/// Abstraction over agent backends.
pub trait Agent {
    /// Run the agent to completion.
    ///
    /// `Err` means the agent could not be started; timeouts and non-zero exits
    /// are reported through [`AgentRun::exit`].
    fn invoke(&self, request: &AgentRequest) -> Result<AgentRun>;
}

/// Agent that spawns the configured command.
#[derive(Debug, Clone)]
pub struct CommandAgent {
    command: String,
    args: Vec<String>,
}

impl CommandAgent {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }

    pub fn from_config(cfg: &AgentConfig) -> Self {
        Self::new(cfg.command.clone(), cfg.args.clone())
    }
}

impl Agent for CommandAgent {
    #[instrument(skip_all, fields(command = %self.command, timeout_secs = request.timeout.as_secs()))]
    fn invoke(&self, request: &AgentRequest) -> Result<AgentRun> {
        info!(workdir = %request.workdir.display(), "starting agent");
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .args(&request.extra_args)
            .current_dir(&request.workdir);

        let output = run_command(
            cmd,
            Some(request.prompt.as_bytes()),
            request.timeout,
            request.output_limit_bytes,
            request.transcript_path.as_deref(),
        )
        .with_context(|| format!("run agent {}", self.command))?;

        let exit = if output.timed_out {
            warn!(timeout_secs = request.timeout.as_secs(), "agent timed out");
            AgentExit::TimedOut
        } else if output.status.success() {
            AgentExit::Completed
        } else {
            warn!(exit_code = ?output.status.code(), "agent failed");
            AgentExit::Failed {
                code: output.status.code(),
            }
        };

        let transcript = output.stdout_lossy();
        let usage = parse_usage(&transcript);
        debug!(
            total_tokens = usage.total_tokens(),
            elapsed_ms = output.elapsed.as_millis() as u64,
            "agent finished"
        );
        Ok(AgentRun {
            exit,
            transcript,
            stderr: output.stderr_lossy(),
            usage,
            duration: output.elapsed,
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn request(dir: &std::path::Path, timeout: Duration) -> AgentRequest {
        AgentRequest {
            workdir: dir.to_path_buf(),
            prompt: "do the thing".to_string(),
            extra_args: Vec::new(),
            timeout,
            output_limit_bytes: 10_000,
            transcript_path: None,
        }
    }

    #[test]
    fn completed_run_parses_usage_from_transcript() {
        let temp = tempfile::tempdir().expect("tempdir");
        let script = r#"cat > prompt.txt; echo '{"type":"result","usage":{"input_tokens":7,"output_tokens":3},"total_cost_usd":0.5}'"#;
        let agent = CommandAgent::new("sh", vec!["-c".to_string(), script.to_string()]);

        let run = agent
            .invoke(&request(temp.path(), Duration::from_secs(10)))
            .expect("invoke");

        assert!(run.succeeded());
        assert_eq!(run.usage.input_tokens, 7);
        assert_eq!(run.usage.output_tokens, 3);
        assert_eq!(
            std::fs::read_to_string(temp.path().join("prompt.txt")).expect("prompt"),
            "do the thing"
        );
    }

    #[test]
    fn large_prompt_to_an_agent_that_ignores_stdin_times_out() {
        let temp = tempfile::tempdir().expect("tempdir");
        let agent = CommandAgent::new("sh", vec!["-c".to_string(), "exec sleep 4".to_string()]);
        let mut req = request(temp.path(), Duration::from_millis(300));
        req.prompt = "x".repeat(200_000);

        let run = agent.invoke(&req).expect("invoke");

        assert_eq!(run.exit, AgentExit::TimedOut);
        assert!(run.duration < Duration::from_secs(3), "{:?}", run.duration);
    }

    #[test]
    fn reports_timeout_and_exit_code() {
        let temp = tempfile::tempdir().expect("tempdir");
        let slow = CommandAgent::new("sh", vec!["-c".to_string(), "exec sleep 5".to_string()]);
        let run = slow
            .invoke(&request(temp.path(), Duration::from_millis(200)))
            .expect("invoke");
        assert_eq!(run.exit, AgentExit::TimedOut);

        let failing = CommandAgent::new(
            "sh",
            vec!["-c".to_string(), "cat >/dev/null; exit 3".to_string()],
        );
        let run = failing
            .invoke(&request(temp.path(), Duration::from_secs(10)))
            .expect("invoke");
        assert_eq!(run.exit, AgentExit::Failed { code: Some(3) });
    }

    #[test]
    fn missing_command_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let agent = CommandAgent::new("cobbler-no-such-agent", Vec::new());
        assert!(
            agent
                .invoke(&request(temp.path(), Duration::from_secs(1)))
                .is_err()
        );
    }
}
