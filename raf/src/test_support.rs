//! Test-only helpers: throwaway git repositories, project fixtures and a
//! scripted execution agent.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, anyhow};
use tempfile::TempDir;

use crate::core::types::AgentRun;
use crate::io::agent::{AgentRequest, ExecutionAgent};
use crate::io::context::ExecContext;

/// Folder holding projects inside a [`TestRepo`], matching the CLI default.
pub const PROJECTS_DIR: &str = "RAF";

/// A git repository in a temp directory, with one initial commit on `main`.
///
/// Layout: `<tmp>/repo` is the repository, `<tmp>/worktrees` is free for
/// worktree tests. Both disappear when the value is dropped.
pub struct TestRepo {
    _dir: TempDir,
    root: PathBuf,
    worktree_root: PathBuf,
}

impl TestRepo {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir().context("create temp dir")?;
        let base = fs::canonicalize(dir.path()).context("canonicalize temp dir")?;
        let root = base.join("repo");
        fs::create_dir_all(&root).context("create repo dir")?;

        let repo = Self {
            _dir: dir,
            root,
            worktree_root: base.join("worktrees"),
        };
        repo.git(&["init", "--quiet"])?;
        repo.git(&["symbolic-ref", "HEAD", "refs/heads/main"])?;
        repo.git(&["config", "user.email", "test@example.com"])?;
        repo.git(&["config", "user.name", "test"])?;
        repo.git(&["config", "commit.gpgsign", "false"])?;
        fs::write(repo.root.join("init.txt"), "init\n").context("write init file")?;
        repo.commit_all("chore: init")?;
        Ok(repo)
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Worktree root for this repository's tests (not created yet).
    pub fn worktree_root(&self) -> PathBuf {
        self.worktree_root.clone()
    }

    /// Project fixture at `RAF/<folder>`.
    pub fn project(&self, folder: &str) -> TestProject {
        TestProject {
            dir: self.root.join(PROJECTS_DIR).join(folder),
        }
    }

    /// Run git in the repository; fails on a non-zero exit.
    pub fn git(&self, args: &[&str]) -> Result<String> {
        run_git(&self.root, args)
    }

    pub fn commit_all(&self, message: &str) -> Result<()> {
        self.git(&["add", "-A"])?;
        self.git(&["commit", "--quiet", "-m", message])?;
        Ok(())
    }

    /// Newest-first subjects of the last `n` commits.
    pub fn log_subjects(&self, n: usize) -> Result<Vec<String>> {
        let out = self.git(&["log", &format!("-{n}"), "--format=%s"])?;
        Ok(out.lines().map(str::to_string).collect())
    }

    /// `git status --porcelain` lines, untracked files listed individually.
    pub fn status_lines(&self) -> Result<Vec<String>> {
        let out = self.git(&["status", "--porcelain=v1", "-uall"])?;
        Ok(out
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Paths touched by commit `rev`.
    pub fn files_in_commit(&self, rev: &str) -> Result<Vec<String>> {
        let out = self.git(&["show", "--name-only", "--format=", rev])?;
        Ok(out
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(str::to_string)
            .collect())
    }

    pub fn current_branch(&self) -> Result<String> {
        Ok(self
            .git(&["rev-parse", "--abbrev-ref", "HEAD"])?
            .trim()
            .to_string())
    }
}

/// Run git in `dir`; fails on a non-zero exit.
pub fn run_git(dir: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .with_context(|| format!("spawn git {}", args.join(" ")))?;
    if !output.status.success() {
        return Err(anyhow!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Files of one project folder.
#[derive(Debug, Clone)]
pub struct TestProject {
    dir: PathBuf,
}

impl TestProject {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn write_plan(&self, file_name: &str, text: &str) -> Result<PathBuf> {
        write_file(&self.dir.join("plans").join(file_name), text)
    }

    pub fn write_outcome(&self, file_name: &str, text: &str) -> Result<PathBuf> {
        write_file(&self.dir.join("outcomes").join(file_name), text)
    }

    pub fn write_input(&self, text: &str) -> Result<PathBuf> {
        write_file(&self.dir.join("input.md"), text)
    }
}

fn write_file(path: &Path, text: &str) -> Result<PathBuf> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    fs::write(path, text).with_context(|| format!("write {}", path.display()))?;
    Ok(path.to_path_buf())
}

type Effect = Box<dyn Fn(&AgentRequest)>;

/// Agent returning queued runs in order and recording every request.
///
/// An optional effect runs before each reply, e.g. to write files the way a
/// real agent would.
pub struct ScriptedAgent {
    runs: RefCell<VecDeque<AgentRun>>,
    requests: RefCell<Vec<AgentRequest>>,
    effect: Option<Effect>,
}

impl ScriptedAgent {
    pub fn new(runs: Vec<AgentRun>) -> Self {
        Self {
            runs: RefCell::new(runs.into()),
            requests: RefCell::new(Vec::new()),
            effect: None,
        }
    }

    pub fn with_effect(mut self, effect: impl Fn(&AgentRequest) + 'static) -> Self {
        self.effect = Some(Box::new(effect));
        self
    }

    pub fn requests(&self) -> Vec<AgentRequest> {
        self.requests.borrow().clone()
    }
}

impl ExecutionAgent for ScriptedAgent {
    fn run(&self, request: &AgentRequest, _ctx: &ExecContext) -> Result<AgentRun> {
        self.requests.borrow_mut().push(request.clone());
        if let Some(effect) = &self.effect {
            effect(request);
        }
        self.runs
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("scripted agent has no more runs"))
    }
}

/// Agent output ending in `<promise>COMPLETE</promise>`.
pub fn complete_run(summary: &str) -> AgentRun {
    AgentRun {
        output: format!("{summary}\n<promise>COMPLETE</promise>\n"),
        exit_code: Some(0),
        ..AgentRun::default()
    }
}

/// Agent output ending in `<promise>FAILED</promise>`, optionally non-retryable.
pub fn failed_run(summary: &str, retryable: bool) -> AgentRun {
    let flag = if retryable { "" } else { "Retryable: no\n" };
    AgentRun {
        output: format!("{summary}\n{flag}<promise>FAILED</promise>\n"),
        exit_code: Some(0),
        ..AgentRun::default()
    }
}

/// An attempt killed by its timeout.
pub fn timed_out_run(partial: &str) -> AgentRun {
    AgentRun {
        output: partial.to_string(),
        timed_out: true,
        ..AgentRun::default()
    }
}
