//! Task execution loop for `raf do`.
//!
//! Each iteration re-derives the project state from disk, picks the next
//! executable task and drives it through `in_progress` to `completed` or
//! `failed`. Task status is never stored anywhere but in outcome files.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{debug, info, info_span, warn};

use crate::core::classifier::{AttemptVerdict, classify_attempt};
use crate::core::naming::{
    ProjectRef, failed_stash_name, outcome_commit_message, task_commit_message,
};
use crate::core::outcome::{Marker, OutcomeRecord, render_outcome, strip_markers, tail_bytes};
use crate::core::selector::{has_project_failed, is_project_complete, next_executable_task_excluding};
use crate::core::types::{ProjectStatus, Task, TaskId, TaskStatus};
use crate::io::agent::{AgentRequest, ExecutionAgent};
use crate::io::config::RafConfig;
use crate::io::context::ExecContext;
use crate::io::git::Git;
use crate::io::project::{ProjectPaths, derive_project_state, read_optional, write_outcome_file};
use crate::io::prompt::{OutcomeExcerpt, PromptBuilder, PromptInputs, TaskContext};
use crate::io::tracker::ChangeTracker;

/// Per-run execution settings.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Attempts per task; values below 1 count as 1.
    pub max_retries: u32,
    /// Budget of every single attempt.
    pub attempt_timeout: Duration,
    pub auto_commit: bool,
    pub summary_limit_bytes: usize,
    /// Directory for raw attempt logs; `None` disables them.
    pub log_dir: Option<PathBuf>,
}

impl RunConfig {
    pub fn from_config(config: &RafConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            attempt_timeout: config.attempt_timeout(),
            auto_commit: config.auto_commit,
            summary_limit_bytes: config.summary_limit_bytes,
            log_dir: None,
        }
    }
}

/// Result of one executed task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskReport {
    pub task_id: TaskId,
    pub name: String,
    /// `Completed` or `Failed`.
    pub status: TaskStatus,
    pub attempts: u32,
    pub elapsed: Duration,
    pub commit: Option<String>,
    pub outcome_commit: Option<String>,
    pub stash: Option<String>,
    pub reason: Option<String>,
    pub outcome_file: PathBuf,
}

/// Summary of a `run_project` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub status: ProjectStatus,
    pub reports: Vec<TaskReport>,
    /// The loop stopped because a shutdown was requested.
    pub interrupted: bool,
}

/// Progress notifications for the CLI.
#[derive(Debug)]
pub enum RunEvent<'a> {
    TaskStarted { task: &'a Task },
    AttemptFinished {
        task: &'a Task,
        attempt: u32,
        max_attempts: u32,
        verdict: &'a AttemptVerdict,
    },
    TaskFinished(&'a TaskReport),
}

/// Execute tasks of the project at `project_dir` until none is executable.
///
/// `repo_root` is the working tree the agent runs in and the changes are
/// committed to (the main checkout, or the project worktree). A task whose
/// attempt budget was spent is not selected again in the same run. Errors
/// are runner failures (git, filesystem, an agent that cannot start); task
/// failures are reported in the outcome.
pub fn run_project<A, P, F>(
    ctx: &ExecContext,
    repo_root: &Path,
    project_dir: &Path,
    agent: &A,
    prompts: &P,
    config: &RunConfig,
    mut on_event: F,
) -> Result<RunOutcome>
where
    A: ExecutionAgent,
    P: PromptBuilder,
    F: FnMut(&RunEvent<'_>),
{
    let project = ProjectRef::from_dir(project_dir)?;
    let span = info_span!(parent: ctx.span(), "run", project = %project);
    let _entered = span.enter();

    let git = Git::new(repo_root);
    let mut attempted: Vec<TaskId> = Vec::new();
    let mut reports = Vec::new();
    let mut interrupted = false;

    loop {
        if ctx.is_shutdown_requested() {
            info!("shutdown requested; not starting another task");
            interrupted = true;
            break;
        }
        let state = derive_project_state(project_dir)?;
        let Some(task) = next_executable_task_excluding(&state, &attempted) else {
            debug!("no executable task left");
            break;
        };
        attempted.push(task.id.clone());

        let runner = TaskRunner {
            ctx,
            git: &git,
            project: &project,
            paths: ProjectPaths::new(project_dir),
            repo_root,
            config,
        };
        let report = runner.execute(&state.tasks, task, agent, prompts, &mut on_event)?;
        if report.reason.as_deref() == Some(INTERRUPTED) {
            interrupted = true;
        }
        on_event(&RunEvent::TaskFinished(&report));
        reports.push(report);
    }

    let state = derive_project_state(project_dir)?;
    let status = if is_project_complete(&state) && !state.tasks.is_empty() {
        ProjectStatus::Completed
    } else if has_project_failed(&state) {
        ProjectStatus::Failed
    } else {
        state.status
    };
    info!(status = status.as_str(), tasks_run = reports.len(), "run finished");
    Ok(RunOutcome {
        status,
        reports,
        interrupted,
    })
}

const INTERRUPTED: &str = "interrupted";

/// How the attempt loop ended.
enum Resolution {
    Success { output: String },
    Failure { reason: String, output: String },
}

struct TaskRunner<'a> {
    ctx: &'a ExecContext,
    git: &'a Git,
    project: &'a ProjectRef,
    paths: ProjectPaths,
    repo_root: &'a Path,
    config: &'a RunConfig,
}

impl TaskRunner<'_> {
    fn execute<A, P, F>(
        &self,
        tasks: &[Task],
        task: &Task,
        agent: &A,
        prompts: &P,
        on_event: &mut F,
    ) -> Result<TaskReport>
    where
        A: ExecutionAgent,
        P: PromptBuilder,
        F: FnMut(&RunEvent<'_>),
    {
        let span = info_span!("task", id = %task.id);
        let _entered = span.enter();
        let started = Instant::now();

        let tracker = ChangeTracker::new(self.git);
        let baseline = tracker.snapshot_baseline();
        info!(name = %task.name, from = task.status.as_str(), "task in progress");
        on_event(&RunEvent::TaskStarted { task });

        let outcome_file = self.paths.outcome_path_for(task);
        let prompt = prompts.build(&self.prompt_inputs(tasks, task, &outcome_file)?)?;
        let (attempts, resolution) = self.attempt_loop(task, &prompt, agent, on_event)?;

        let mut report = TaskReport {
            task_id: task.id.clone(),
            name: task.name.clone(),
            status: TaskStatus::Completed,
            attempts,
            elapsed: Duration::ZERO,
            commit: None,
            outcome_commit: None,
            stash: None,
            reason: None,
            outcome_file: outcome_file.clone(),
        };

        let (marker, output) = match resolution {
            Resolution::Success { output } => {
                if self.config.auto_commit {
                    let message = task_commit_message(self.project, &task.id, &task.description());
                    report.commit = tracker
                        .commit_task_changes(&message, baseline.as_deref())
                        .context("commit task changes")?;
                }
                (Marker::Complete, output)
            }
            Resolution::Failure { reason, output } => {
                let stash_name = failed_stash_name(self.project, &task.id);
                match tracker.stash_leftovers(&stash_name) {
                    Ok(stash) => report.stash = stash,
                    Err(err) => warn!(err = %format!("{err:#}"), "failed to stash leftover changes"),
                }
                report.status = TaskStatus::Failed;
                report.reason = Some(reason);
                (Marker::Failed, output)
            }
        };
        report.elapsed = started.elapsed();

        let record = OutcomeRecord {
            task_id: task.id.to_string(),
            task_name: task.description(),
            marker,
            attempts,
            elapsed: report.elapsed,
            commit: report.commit.clone(),
            stash: report.stash.clone(),
            reason: report.reason.clone(),
            summary: tail_bytes(&strip_markers(&output), self.config.summary_limit_bytes)
                .to_string(),
            finished_at: Some(chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)),
        };
        write_outcome_file(&outcome_file, &render_outcome(&record))?;

        if self.config.auto_commit {
            let message = outcome_commit_message(self.project, &task.id, marker.as_str());
            report.outcome_commit = tracker
                .commit_paths(&message, &[self.git_path(&outcome_file)])
                .context("commit outcome file")?;
        }

        match report.status {
            TaskStatus::Completed => info!(attempts, "task completed"),
            _ => warn!(attempts, reason = report.reason.as_deref().unwrap_or(""), "task failed"),
        }
        Ok(report)
    }

    /// Run attempts until one succeeds, one fails terminally, the budget is
    /// spent, or a shutdown is requested. Every attempt gets the full timeout.
    fn attempt_loop<A, F>(
        &self,
        task: &Task,
        prompt: &str,
        agent: &A,
        on_event: &mut F,
    ) -> Result<(u32, Resolution)>
    where
        A: ExecutionAgent,
        F: FnMut(&RunEvent<'_>),
    {
        let max_attempts = self.config.max_retries.max(1);
        let mut last_reason = String::new();
        let mut last_output = String::new();

        for attempt in 1..=max_attempts {
            let request = AgentRequest {
                prompt: prompt.to_string(),
                timeout: self.config.attempt_timeout,
                workdir: self.repo_root.to_path_buf(),
                log_path: self
                    .config
                    .log_dir
                    .as_ref()
                    .map(|dir| dir.join(format!("{}-attempt-{attempt}.log", task.id))),
            };
            debug!(attempt, max_attempts, "starting attempt");
            let run = agent
                .run(&request, self.ctx)
                .with_context(|| format!("run agent for task {}", task.id))?;
            let verdict = classify_attempt(&run);
            on_event(&RunEvent::AttemptFinished {
                task,
                attempt,
                max_attempts,
                verdict: &verdict,
            });
            last_output = run.output;

            match verdict {
                AttemptVerdict::Success => {
                    return Ok((attempt, Resolution::Success { output: last_output }));
                }
                AttemptVerdict::Terminal { reason } => {
                    return Ok((
                        attempt,
                        Resolution::Failure {
                            reason,
                            output: last_output,
                        },
                    ));
                }
                AttemptVerdict::Retry { reason } => {
                    info!(attempt, max_attempts, reason = %reason, "attempt did not complete");
                    if self.ctx.is_shutdown_requested() {
                        return Ok((
                            attempt,
                            Resolution::Failure {
                                reason: INTERRUPTED.to_string(),
                                output: last_output,
                            },
                        ));
                    }
                    last_reason = reason;
                }
            }
        }

        Ok((
            max_attempts,
            Resolution::Failure {
                reason: format!("{last_reason} (gave up after {max_attempts} attempts)"),
                output: last_output,
            },
        ))
    }

    fn prompt_inputs(&self, tasks: &[Task], task: &Task, outcome_file: &Path) -> Result<PromptInputs> {
        let plan_text = std::fs::read_to_string(&task.plan_file)
            .with_context(|| format!("read plan {}", task.plan_file.display()))?;

        let mut prior_outcomes = Vec::new();
        let mut dependency_outcomes = Vec::new();
        for other in tasks.iter().filter(|t| t.id != task.id) {
            let Some(path) = &other.outcome_file else {
                continue;
            };
            let is_dependency = task.dependencies.contains(&other.id);
            if other.status != TaskStatus::Completed && !is_dependency {
                continue;
            }
            let Some(text) = read_optional(path)? else {
                continue;
            };
            let excerpt = OutcomeExcerpt {
                task_id: other.id.clone(),
                text: text.trim().to_string(),
            };
            if is_dependency {
                dependency_outcomes.push(excerpt.clone());
            }
            if other.status == TaskStatus::Completed {
                prior_outcomes.push(excerpt);
            }
        }

        Ok(PromptInputs {
            project: self.project.folder.clone(),
            task: TaskContext {
                id: task.id.clone(),
                name: task.name.clone(),
            },
            plan_text,
            input_text: read_optional(&self.paths.input_path)?,
            prior_outcomes,
            dependency_outcomes,
            outcome_path: self.git_path(outcome_file),
        })
    }

    /// Path as passed to git: relative to the repository when possible.
    fn git_path(&self, path: &Path) -> String {
        path.strip_prefix(self.repo_root)
            .unwrap_or(path)
            .to_string_lossy()
            .into_owned()
    }
}
