//! Orchestrator configuration stored as TOML (`~/.raf/config.toml`).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Environment variable that overrides the config file location.
pub const CONFIG_ENV: &str = "RAF_CONFIG";

/// Orchestrator configuration (TOML).
///
/// This file is intended to be edited by humans. Missing fields default to
/// the values below; CLI flags override individual fields per run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RafConfig {
    /// Attempts per task within one run.
    pub max_retries: u32,

    /// Wall-clock budget of every single attempt, in minutes.
    pub timeout_minutes: u64,

    /// Commit task changes and outcome files.
    pub auto_commit: bool,

    /// Where worktrees live; defaults to `~/.raf/worktrees`.
    pub worktree_root: Option<PathBuf>,

    /// Base branch for worktree merges; detected from the repository when unset.
    pub main_branch: Option<String>,

    /// Pull the base branch before creating a worktree and push after merging.
    pub sync_main_branch: bool,

    /// Keep at most this many bytes of agent output per stream.
    pub output_limit_bytes: usize,

    /// Keep at most this many bytes of agent output in an outcome summary.
    pub summary_limit_bytes: usize,

    pub agent: AgentConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Command that runs the agent; the prompt is written to its stdin.
    pub command: Vec<String>,

    /// Case-insensitive output fragments that signal a context-window overflow.
    pub context_overflow_patterns: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "claude".to_string(),
                "-p".to_string(),
                "--dangerously-skip-permissions".to_string(),
            ],
            context_overflow_patterns: vec![
                "prompt is too long".to_string(),
                "context length exceeded".to_string(),
                "context_length_exceeded".to_string(),
                "maximum context length".to_string(),
            ],
        }
    }
}

impl Default for RafConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            timeout_minutes: 60,
            auto_commit: true,
            worktree_root: None,
            main_branch: None,
            sync_main_branch: true,
            output_limit_bytes: 1_000_000,
            summary_limit_bytes: 4_000,
            agent: AgentConfig::default(),
        }
    }
}

impl RafConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_retries == 0 {
            return Err(anyhow!("max_retries must be > 0"));
        }
        if self.timeout_minutes == 0 {
            return Err(anyhow!("timeout_minutes must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.agent.command.is_empty() || self.agent.command[0].trim().is_empty() {
            return Err(anyhow!("agent.command must be a non-empty array"));
        }
        Ok(())
    }

    /// Per-attempt timeout.
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_minutes * 60)
    }

    /// Configured worktree root, else `~/.raf/worktrees`.
    pub fn resolved_worktree_root(&self) -> Result<PathBuf> {
        if let Some(root) = &self.worktree_root {
            return Ok(root.clone());
        }
        raf_home().map(|home| home.join("worktrees"))
    }
}

/// `~/.raf`
pub fn raf_home() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(".raf"))
        .ok_or_else(|| anyhow!("cannot determine home directory"))
}

/// Config path: `$RAF_CONFIG` if set, else `~/.raf/config.toml`.
pub fn default_config_path() -> Result<PathBuf> {
    if let Some(path) = std::env::var_os(CONFIG_ENV) {
        return Ok(PathBuf::from(path));
    }
    raf_home().map(|home| home.join("config.toml"))
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `RafConfig::default()`.
pub fn load_config(path: &Path) -> Result<RafConfig> {
    if !path.exists() {
        debug!(path = %path.display(), "config missing, using defaults");
        let cfg = RafConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: RafConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &RafConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, RafConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        let cfg = RafConfig {
            worktree_root: Some(temp.path().join("wt")),
            main_branch: Some("trunk".to_string()),
            ..RafConfig::default()
        };
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "max_retries = 5\n[agent]\ncommand = [\"codex\", \"exec\"]\n")
            .expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.max_retries, 5);
        assert_eq!(cfg.timeout_minutes, 60);
        assert_eq!(cfg.agent.command, vec!["codex", "exec"]);
        assert!(!cfg.agent.context_overflow_patterns.is_empty());
    }

    #[test]
    fn zero_retries_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "max_retries = 0\n").expect("write");
        let err = load_config(&path).unwrap_err();
        assert!(format!("{err:#}").contains("max_retries"));
    }
}
