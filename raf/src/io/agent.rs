//! Execution agent abstraction.
//!
//! The [`ExecutionAgent`] trait decouples the orchestrator from the agent
//! backend. [`CommandAgent`] spawns the configured command and feeds the
//! prompt on stdin; tests use scripted agents that return canned runs.

use std::fs;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::core::types::AgentRun;
use crate::io::config::AgentConfig;
use crate::io::context::ExecContext;
use crate::io::process::{CommandOutput, run_command_with_timeout};

/// Parameters for one agent attempt.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub prompt: String,
    /// Wall-clock budget of this attempt.
    pub timeout: Duration,
    /// Working directory of the agent process.
    pub workdir: PathBuf,
    /// Where to write the raw attempt output, if anywhere.
    pub log_path: Option<PathBuf>,
}

pub trait ExecutionAgent {
    /// Run one attempt. `Err` means the agent could not be run at all.
    fn run(&self, request: &AgentRequest, ctx: &ExecContext) -> Result<AgentRun>;
}

/// Agent backed by an external command.
#[derive(Debug, Clone)]
pub struct CommandAgent {
    command: Vec<String>,
    overflow_patterns: Vec<String>,
    output_limit_bytes: usize,
}

impl CommandAgent {
    pub fn new(config: &AgentConfig, output_limit_bytes: usize) -> Self {
        Self {
            command: config.command.clone(),
            overflow_patterns: config
                .context_overflow_patterns
                .iter()
                .map(|p| p.to_lowercase())
                .collect(),
            output_limit_bytes,
        }
    }

    fn build_command(&self, request: &AgentRequest) -> Result<Command> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| anyhow!("agent command is empty"))?;
        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(&request.workdir);
        Ok(cmd)
    }
}

impl ExecutionAgent for CommandAgent {
    #[instrument(skip_all, fields(program = %self.command.first().map(String::as_str).unwrap_or(""), timeout_secs = request.timeout.as_secs()))]
    fn run(&self, request: &AgentRequest, ctx: &ExecContext) -> Result<AgentRun> {
        info!(workdir = %request.workdir.display(), "starting agent");
        let cmd = self.build_command(request)?;
        let output = run_command_with_timeout(
            cmd,
            Some(request.prompt.as_bytes()),
            request.timeout,
            self.output_limit_bytes,
            ctx,
        )
        .context("run agent command")?;

        let combined = combined_output(&output);
        if let Some(path) = &request.log_path {
            write_agent_log(path, &combined)?;
        }

        let context_overflow = detects_overflow(&combined, &self.overflow_patterns);
        if context_overflow {
            warn!("agent reported a context window overflow");
        }
        if output.timed_out {
            warn!(
                timeout_secs = request.timeout.as_secs(),
                "agent attempt timed out"
            );
        } else if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "agent exited unsuccessfully");
        }
        debug!(output_bytes = combined.len(), "agent attempt finished");

        Ok(AgentRun {
            output: combined,
            exit_code: output.status.code(),
            // A cancelled attempt is reported like a timeout; the caller sees
            // the shutdown flag and stops retrying.
            timed_out: output.timed_out || output.cancelled,
            context_overflow,
        })
    }
}

/// stdout, then stderr when non-empty.
fn combined_output(output: &CommandOutput) -> String {
    let mut text = output.stdout_truncated_notice("agent");
    text.push_str(&String::from_utf8_lossy(&output.stdout));
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.trim().is_empty() {
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(&output.stderr_truncated_notice("agent"));
        text.push_str(&stderr);
    }
    text
}

fn detects_overflow(output: &str, patterns: &[String]) -> bool {
    if patterns.is_empty() {
        return false;
    }
    let lowered = output.to_lowercase();
    patterns
        .iter()
        .any(|p| !p.is_empty() && lowered.contains(p.as_str()))
}

fn write_agent_log(path: &std::path::Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create log dir {}", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("write agent log {}", path.display()))
}
