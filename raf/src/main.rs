//! `raf` command line.
//!
//! Projects live in a projects directory (`RAF/` by default) as
//! `<projectId>-<slug>/` folders with numbered plan files. `raf do` executes
//! their tasks one by one; `raf status` shows the derived state.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info_span;

use raf::core::classifier::AttemptVerdict;
use raf::core::derive::lint_dependencies;
use raf::core::naming::ProjectRef;
use raf::core::outcome::format_elapsed;
use raf::core::selector::{derived_stats, next_executable_task};
use raf::core::types::{DerivedStats, ProjectStatus, TaskStatus};
use raf::execute::{RunConfig, RunEvent, RunOutcome, run_project};
use raf::exit_codes;
use raf::io::agent::CommandAgent;
use raf::io::config::{RafConfig, default_config_path, load_config, raf_home, write_config};
use raf::io::context::ExecContext;
use raf::io::git::Git;
use raf::io::project::{derive_project_state, list_projects, resolve_project};
use raf::io::prompt::{DEFAULT_PROMPT_BUDGET_BYTES, TemplatePromptBuilder};
use raf::io::worktree::{MergeConflictError, MergeOutcome, SyncOutcome, WorktreeManager};
use raf::start::{self, Workspace};

#[derive(Parser, Debug)]
#[command(name = "raf", version, about = "Run planned project tasks with an execution agent")]
struct Cli {
    /// Directory containing project folders.
    #[arg(long, global = true, default_value = "RAF")]
    projects_dir: PathBuf,
    /// Config file (default: $RAF_CONFIG or ~/.raf/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Enable debug logging for raf.
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the derived state of a project.
    Status {
        /// Project folder name, id, or slug.
        project: String,
        /// Read the project from its worktree.
        #[arg(long)]
        worktree: bool,
        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },
    /// Execute the project's pending and failed tasks.
    Do {
        /// Project folder name, id, or slug.
        project: String,
        /// Run inside the project's worktree on its own branch.
        #[arg(long)]
        worktree: bool,
        /// Merge the project branch into the base branch once complete.
        #[arg(long, requires = "worktree")]
        merge: bool,
        /// Attempts per task.
        #[arg(long)]
        max_retries: Option<u32>,
        /// Timeout per attempt, in minutes.
        #[arg(long, value_name = "MIN")]
        timeout: Option<u64>,
        /// Do not commit task changes or outcome files.
        #[arg(long)]
        no_commit: bool,
    },
    /// Merge a project's worktree branch into the base branch.
    Merge {
        /// Project folder name, id, or slug.
        project: String,
        /// Remove the worktree after a successful merge.
        #[arg(long)]
        remove: bool,
    },
    /// List project worktrees of this repository.
    Worktrees,
    /// List projects and their status.
    List,
    /// Print the effective configuration, or write the defaults with `--init`.
    Config {
        #[arg(long)]
        init: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    raf::logging::init(cli.verbose);
    let code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            exit_code_for(&err)
        }
    };
    std::process::exit(code);
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    if err.downcast_ref::<MergeConflictError>().is_some() {
        exit_codes::CONFLICT
    } else {
        exit_codes::INVALID
    }
}

fn run(cli: Cli) -> Result<i32> {
    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => default_config_path()?,
    };
    let load = || load_config(&config_path);
    match cli.command {
        Command::Status {
            project,
            worktree,
            json,
        } => cmd_status(&cli.projects_dir, &load()?, &project, worktree, json),
        Command::Do {
            project,
            worktree,
            merge,
            max_retries,
            timeout,
            no_commit,
        } => {
            let mut config = load()?;
            if let Some(retries) = max_retries {
                config.max_retries = retries;
            }
            if let Some(minutes) = timeout {
                config.timeout_minutes = minutes;
            }
            if no_commit {
                config.auto_commit = false;
            }
            config.validate().context("invalid command line overrides")?;
            cmd_do(&cli.projects_dir, &config, &project, worktree, merge)
        }
        Command::Merge { project, remove } => {
            cmd_merge(&cli.projects_dir, &load()?, &project, remove)
        }
        Command::Worktrees => cmd_worktrees(&load()?),
        Command::List => cmd_list(&cli.projects_dir),
        Command::Config { init } => cmd_config(&config_path, init),
    }
}

#[derive(Serialize)]
struct StatusReport<'a> {
    project: &'a str,
    status: ProjectStatus,
    stats: DerivedStats,
    next: Option<String>,
    tasks: Vec<TaskLine>,
    warnings: Vec<String>,
}

#[derive(Serialize)]
struct TaskLine {
    id: String,
    name: String,
    status: TaskStatus,
    dependencies: Vec<String>,
}

fn cmd_status(
    projects_dir: &Path,
    config: &RafConfig,
    query: &str,
    worktree: bool,
    json: bool,
) -> Result<i32> {
    let mut project_dir = resolve_project(projects_dir, query)?;
    if worktree {
        let manager = open_manager(config, ExecContext::detached())?;
        let project = ProjectRef::from_dir(&project_dir)?;
        let rel = relative_to_repo(manager.repo_root(), &project_dir)?;
        project_dir = manager.compute_path(&project).join(rel);
        if !project_dir.is_dir() {
            return Err(anyhow!("no worktree copy of {project} at {}", project_dir.display()));
        }
    }
    let project = ProjectRef::from_dir(&project_dir)?;
    let state = derive_project_state(&project_dir)?;
    let report = StatusReport {
        project: &project.folder,
        status: state.status,
        stats: derived_stats(&state),
        next: next_executable_task(&state).map(|t| t.id.to_string()),
        tasks: state
            .tasks
            .iter()
            .map(|task| TaskLine {
                id: task.id.to_string(),
                name: task.name.clone(),
                status: task.status,
                dependencies: task.dependencies.iter().map(ToString::to_string).collect(),
            })
            .collect(),
        warnings: lint_dependencies(&state),
    };

    if json {
        let payload = serde_json::to_string_pretty(&report).context("serialize status json")?;
        println!("{payload}");
        return Ok(exit_codes::OK);
    }

    println!("{}: {}", report.project, report.status);
    for task in &report.tasks {
        let deps = if task.dependencies.is_empty() {
            String::new()
        } else {
            format!("  (depends on {})", task.dependencies.join(", "))
        };
        println!("  {} {:<24} {}{deps}", task.id, task.name, task.status);
    }
    let s = report.stats;
    println!(
        "{} tasks: {} completed, {} pending, {} failed, {} blocked",
        s.total, s.completed, s.pending, s.failed, s.blocked
    );
    if let Some(next) = &report.next {
        println!("next: {next}");
    }
    for warning in &report.warnings {
        println!("warning: {warning}");
    }
    Ok(exit_codes::OK)
}

fn cmd_do(
    projects_dir: &Path,
    config: &RafConfig,
    query: &str,
    worktree: bool,
    merge: bool,
) -> Result<i32> {
    let project_dir = resolve_project(projects_dir, query)?;
    let ctx = ExecContext::new(info_span!("raf"));
    ctx.install_signal_handler()?;

    let manager = if worktree {
        Some(open_manager(config, ctx.clone())?)
    } else {
        None
    };
    let base_branch = match &manager {
        Some(manager) => Some(base_branch(manager, config)?),
        None => None,
    };

    let workspace: Workspace = match (&manager, &base_branch) {
        (Some(manager), Some(base)) => {
            if config.sync_main_branch {
                report_sync("pull", base, manager.pull_main_branch(base)?);
            }
            start::in_worktree(manager, &project_dir)?
        }
        _ => start::in_place(&project_dir)?,
    };
    println!("project {} in {}", workspace.project, workspace.repo_root.display());

    let mut run_config = RunConfig::from_config(config);
    run_config.log_dir = Some(raf_home()?.join("logs").join(&workspace.project.folder));
    let agent = CommandAgent::new(&config.agent, config.output_limit_bytes);
    let prompts = TemplatePromptBuilder::new(DEFAULT_PROMPT_BUDGET_BYTES)?;

    let outcome = run_project(
        &ctx,
        &workspace.repo_root,
        &workspace.project_dir,
        &agent,
        &prompts,
        &run_config,
        print_event,
    )?;
    print_summary(&outcome);

    if outcome.interrupted {
        return Ok(exit_codes::INTERRUPTED);
    }
    if let (true, Some(manager), Some(base)) = (merge, &manager, &base_branch) {
        if outcome.status != ProjectStatus::Completed {
            println!("not merging: project is {}", outcome.status);
        } else {
            merge_and_push(manager, config, workspace.project.branch(), base)?;
            remove_project_worktree(manager, &workspace.project)?;
        }
    }
    if outcome.status == ProjectStatus::Failed {
        return Ok(exit_codes::FAILED);
    }
    Ok(exit_codes::OK)
}

fn cmd_merge(projects_dir: &Path, config: &RafConfig, query: &str, remove: bool) -> Result<i32> {
    let ctx = ExecContext::new(info_span!("raf"));
    let manager = open_manager(config, ctx)?;
    let project = match resolve_project(projects_dir, query) {
        Ok(dir) => ProjectRef::from_dir(&dir)?,
        Err(err) => manager
            .list_worktree_projects()?
            .into_iter()
            .find(|wt| wt.folder == query || wt.folder.split('-').next() == Some(query))
            .map(|wt| ProjectRef::parse(&wt.folder))
            .transpose()?
            .ok_or(err)?,
    };
    let base = base_branch(&manager, config)?;
    merge_and_push(&manager, config, project.branch(), &base)?;
    if remove {
        remove_project_worktree(&manager, &project)?;
    }
    Ok(exit_codes::OK)
}

fn cmd_worktrees(config: &RafConfig) -> Result<i32> {
    let manager = open_manager(config, ExecContext::detached())?;
    let projects = manager.list_worktree_projects()?;
    if projects.is_empty() {
        println!("no project worktrees under {}", manager.repo_worktree_dir().display());
    }
    for wt in projects {
        let branch = wt.branch.as_deref().unwrap_or("(detached)");
        println!("{}  {}  {}", wt.folder, branch, wt.path.display());
    }
    Ok(exit_codes::OK)
}

fn cmd_list(projects_dir: &Path) -> Result<i32> {
    let projects = list_projects(projects_dir)?;
    if projects.is_empty() {
        println!("no projects in {}", projects_dir.display());
    }
    for project in projects {
        let state = derive_project_state(&projects_dir.join(&project.folder))?;
        let stats = derived_stats(&state);
        println!(
            "{:<32} {:<10} {}/{} completed",
            project.folder, state.status, stats.completed, stats.total
        );
    }
    Ok(exit_codes::OK)
}

fn cmd_config(path: &Path, init: bool) -> Result<i32> {
    if init {
        if path.exists() {
            return Err(anyhow!("config already exists: {}", path.display()));
        }
        write_config(path, &RafConfig::default())?;
        println!("wrote {}", path.display());
        return Ok(exit_codes::OK);
    }
    let config = load_config(path)?;
    let rendered = toml::to_string_pretty(&config).context("serialize config toml")?;
    print!("{rendered}");
    Ok(exit_codes::OK)
}

fn open_manager(config: &RafConfig, ctx: ExecContext) -> Result<WorktreeManager<Git>> {
    let cwd = std::env::current_dir().context("read current directory")?;
    WorktreeManager::open(&cwd, config.resolved_worktree_root()?, ctx)
}

fn base_branch(manager: &WorktreeManager<Git>, config: &RafConfig) -> Result<String> {
    match &config.main_branch {
        Some(branch) => Ok(branch.clone()),
        None => manager.detect_main_branch(),
    }
}

fn relative_to_repo(repo_root: &Path, project_dir: &Path) -> Result<PathBuf> {
    let repo = std::fs::canonicalize(repo_root)
        .with_context(|| format!("resolve {}", repo_root.display()))?;
    let dir = std::fs::canonicalize(project_dir)
        .with_context(|| format!("resolve {}", project_dir.display()))?;
    dir.strip_prefix(&repo)
        .map(Path::to_path_buf)
        .map_err(|_| anyhow!("{} is not inside {}", dir.display(), repo.display()))
}

fn merge_and_push(
    manager: &WorktreeManager<Git>,
    config: &RafConfig,
    branch: &str,
    base: &str,
) -> Result<()> {
    let merged = manager.merge_worktree_branch(branch, base)?;
    match merged {
        MergeOutcome::FastForward => println!("merged {branch} into {base} (fast-forward)"),
        MergeOutcome::MergeCommit => println!("merged {branch} into {base} (merge commit)"),
    }
    if config.sync_main_branch {
        report_sync("push", base, manager.push_main_branch(base)?);
    }
    Ok(())
}

/// Drop the project's worktree; its branch stays.
fn remove_project_worktree(manager: &WorktreeManager<Git>, project: &ProjectRef) -> Result<()> {
    let path = manager.compute_path(project);
    manager.remove_worktree(&path)?;
    println!("removed worktree {}", path.display());
    Ok(())
}

fn report_sync(action: &str, branch: &str, outcome: SyncOutcome) {
    match outcome {
        SyncOutcome::UpToDate => println!("{branch} already up to date with origin"),
        SyncOutcome::FastForwarded | SyncOutcome::Pushed => println!("{action} {branch}: done"),
        SyncOutcome::NoRemote => println!("no origin remote; skipped {action}"),
    }
}

fn print_event(event: &RunEvent<'_>) {
    match event {
        RunEvent::TaskStarted { task } => {
            println!("[{}] {}: running", task.id, task.description());
        }
        RunEvent::AttemptFinished {
            task,
            attempt,
            max_attempts,
            verdict,
        } => {
            let detail = match verdict {
                AttemptVerdict::Success => "complete".to_string(),
                AttemptVerdict::Retry { reason } => format!("retry ({reason})"),
                AttemptVerdict::Terminal { reason } => format!("failed ({reason})"),
            };
            println!("[{}] attempt {attempt}/{max_attempts}: {detail}", task.id);
        }
        RunEvent::TaskFinished(report) => {
            let mut line = format!(
                "[{}] {} after {} attempt(s) in {}",
                report.task_id,
                report.status,
                report.attempts,
                format_elapsed(report.elapsed)
            );
            if let Some(commit) = &report.commit {
                line.push_str(&format!(", commit {}", short_sha(commit)));
            }
            if let Some(stash) = &report.stash {
                line.push_str(&format!(", changes stashed as {stash}"));
            }
            println!("{line}");
        }
    }
}

fn print_summary(outcome: &RunOutcome) {
    let failed = outcome
        .reports
        .iter()
        .filter(|r| r.status == TaskStatus::Failed)
        .count();
    println!(
        "{} task(s) run, {} failed; project {}{}",
        outcome.reports.len(),
        failed,
        outcome.status,
        if outcome.interrupted { " (interrupted)" } else { "" }
    );
}

fn short_sha(sha: &str) -> &str {
    sha.get(..7).unwrap_or(sha)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_do_with_overrides() {
        let cli = Cli::parse_from([
            "raf",
            "do",
            "a1b2c3",
            "--worktree",
            "--merge",
            "--max-retries",
            "5",
            "--timeout",
            "10",
            "--no-commit",
        ]);
        match cli.command {
            Command::Do {
                project,
                worktree,
                merge,
                max_retries,
                timeout,
                no_commit,
            } => {
                assert_eq!(project, "a1b2c3");
                assert!(worktree && merge && no_commit);
                assert_eq!(max_retries, Some(5));
                assert_eq!(timeout, Some(10));
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert_eq!(cli.projects_dir, PathBuf::from("RAF"));
    }

    #[test]
    fn merge_flag_requires_worktree() {
        assert!(Cli::try_parse_from(["raf", "do", "a1b2c3", "--merge"]).is_err());
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::parse_from(["raf", "status", "auth", "--json", "--projects-dir", "plans", "-v"]);
        assert!(cli.verbose);
        assert_eq!(cli.projects_dir, PathBuf::from("plans"));
        assert!(matches!(cli.command, Command::Status { json: true, .. }));
    }

    #[test]
    fn merge_conflict_maps_to_conflict_code() {
        let err: anyhow::Error = MergeConflictError {
            branch: "a1b2c3-x".into(),
            target: "main".into(),
            files: vec!["f.txt".into()],
        }
        .into();
        assert_eq!(exit_code_for(&err), exit_codes::CONFLICT);
        assert_eq!(exit_code_for(&anyhow!("other")), exit_codes::INVALID);
    }

    #[test]
    fn short_sha_handles_short_input() {
        assert_eq!(short_sha("0123456789"), "0123456");
        assert_eq!(short_sha("abc"), "abc");
    }
}
