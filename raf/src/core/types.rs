//! Shared deterministic types for the derivation engine.
//!
//! Nothing here is persisted. Every value is recomputed from plan and outcome
//! files on each read, so these types carry no I/O and compare by value.

use std::fmt;
use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

static TASK_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9a-z]{2}$").expect("task id regex"));

/// Two-character base-36 task id (`01`, `0a`, `z9`).
///
/// Ordering is lexicographic, which matches numeric order for fixed-width
/// base-36 codes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Parse a token as a task id, returning `None` when it does not match.
    pub fn parse(token: &str) -> Option<Self> {
        let lowered = token.trim().to_ascii_lowercase();
        TASK_ID_RE.is_match(&lowered).then_some(Self(lowered))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derived status of a single task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Blocked,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Blocked => "blocked",
        }
    }

    /// True for statuses that make dependents unreachable.
    pub fn blocks_dependents(self) -> bool {
        matches!(self, TaskStatus::Failed | TaskStatus::Blocked)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate status of a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    /// No plan files exist yet.
    Planning,
    /// Every task is pending.
    Ready,
    /// Some work happened but the project is neither complete nor failed.
    Executing,
    Completed,
    Failed,
}

impl ProjectStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ProjectStatus::Planning => "planning",
            ProjectStatus::Ready => "ready",
            ProjectStatus::Executing => "executing",
            ProjectStatus::Completed => "completed",
            ProjectStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A task as seen by one derivation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Task {
    pub id: TaskId,
    /// Slug portion of the plan file name (`01-setup-db.md` -> `setup-db`).
    pub name: String,
    pub plan_file: PathBuf,
    pub outcome_file: Option<PathBuf>,
    pub dependencies: Vec<TaskId>,
    pub status: TaskStatus,
}

impl Task {
    /// Human description used in commit messages: the name with dashes
    /// turned into spaces.
    pub fn description(&self) -> String {
        if self.name.is_empty() {
            return format!("task {}", self.id);
        }
        self.name.replace('-', " ")
    }
}

/// Snapshot of the whole project, ordered by task id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectState {
    pub status: ProjectStatus,
    pub tasks: Vec<Task>,
}

impl ProjectState {
    pub fn task(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.iter().find(|task| &task.id == id)
    }
}

/// Per-status counts for a set of tasks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DerivedStats {
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
    pub blocked: usize,
    pub total: usize,
}

/// Result of one execution-agent invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentRun {
    /// Everything the agent printed, including output produced before a kill.
    pub output: String,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub context_overflow: bool,
}
