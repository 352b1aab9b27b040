//! Orchestration for preparing where `raf do` runs.
//!
//! A project runs either in place (the checkout that contains it) or in a
//! dedicated worktree on a branch named after the project folder. Starting in
//! worktree mode creates or reuses that worktree, seeds it with the planning
//! files when the branch does not carry them yet, commits them, and validates
//! the result before any task is executed.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, warn};

use crate::core::naming::{PlanningKind, ProjectRef, planning_commit_message};
use crate::io::git::{Git, VersionControl};
use crate::io::project::ProjectPaths;
use crate::io::tracker::commit_planning_artifacts;
use crate::io::worktree::{WorktreeAction, WorktreeInvalidError, WorktreeManager};

/// Where a project's tasks are executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    pub project: ProjectRef,
    /// Working tree the agent runs in and commits land in.
    pub repo_root: PathBuf,
    /// Project folder inside `repo_root`.
    pub project_dir: PathBuf,
    /// Set in worktree mode.
    pub worktree: Option<WorktreeAction>,
}

/// Run the project in the checkout that contains `project_dir`.
pub fn in_place(project_dir: &Path) -> Result<Workspace> {
    let project_dir = fs::canonicalize(project_dir)
        .with_context(|| format!("resolve project dir {}", project_dir.display()))?;
    let project = ProjectRef::from_dir(&project_dir)?;
    let repo_root = Git::new(&project_dir)
        .toplevel()
        .with_context(|| format!("{} is not inside a git repository", project_dir.display()))?;
    Ok(Workspace {
        project,
        repo_root,
        project_dir,
        worktree: None,
    })
}

/// Run the project in its worktree, creating and seeding it as needed.
///
/// `project_dir` is the project folder in the main checkout. A worktree with
/// no `plans/` for the project is seeded with all planning files (a `Plan`
/// commit); otherwise only plan files it lacks are copied (an `Amend`
/// commit). Files already in the worktree are never overwritten.
pub fn in_worktree(manager: &WorktreeManager<Git>, project_dir: &Path) -> Result<Workspace> {
    let source = fs::canonicalize(project_dir)
        .with_context(|| format!("resolve project dir {}", project_dir.display()))?;
    let project = ProjectRef::from_dir(&source)?;
    let main_root = fs::canonicalize(manager.repo_root())
        .with_context(|| format!("resolve repository {}", manager.repo_root().display()))?;
    let project_rel = source
        .strip_prefix(&main_root)
        .map_err(|_| {
            anyhow!(
                "project {} is not inside repository {}",
                source.display(),
                main_root.display()
            )
        })?
        .to_path_buf();

    let (path, action) = manager.ensure_worktree(&project)?;
    info!(project = %project, path = %path.display(), action = ?action, "worktree ready");
    let target = path.join(&project_rel);

    let git = Git::new(&path);
    if !ProjectPaths::new(&target).plans_dir.is_dir() {
        let copied = copy_planning_files(&source, &target)?;
        debug!(files = copied.len(), "seeded worktree with planning files");
        commit_plans(&git, &project, PlanningKind::Plan, &target, &copied)?;
    } else {
        let added = copy_missing_plans(&source, &target)?;
        if !added.is_empty() {
            info!(files = added.len(), "worktree picked up new plan files");
            commit_plans(&git, &project, PlanningKind::Amend, &target, &added)?;
        }
    }

    let validation = manager.validate_worktree(&path, &project_rel)?;
    if !validation.is_valid() {
        return Err(WorktreeInvalidError { path, validation }.into());
    }
    Ok(Workspace {
        project,
        repo_root: path,
        project_dir: target,
        worktree: Some(action),
    })
}

fn commit_plans(
    git: &Git,
    project: &ProjectRef,
    kind: PlanningKind,
    project_dir: &Path,
    plan_files: &[PathBuf],
) -> Result<()> {
    let extra: Vec<&Path> = plan_files.iter().map(PathBuf::as_path).collect();
    let message = planning_commit_message(project, kind, &project.display_name());
    match commit_planning_artifacts(git, project_dir, &message, &extra, Some(git.workdir()))? {
        Some(sha) => info!(commit = %sha, "planning files committed"),
        None => warn!("planning files produced no commit"),
    }
    Ok(())
}

/// Copy `plans/*.md` from `from` into `to`, plus `input.md` and
/// `decisions.md` when present. Returns the copied plan files.
pub fn copy_planning_files(from: &Path, to: &Path) -> Result<Vec<PathBuf>> {
    let source = ProjectPaths::new(from);
    let target = ProjectPaths::new(to);
    fs::create_dir_all(&target.plans_dir)
        .with_context(|| format!("create {}", target.plans_dir.display()))?;

    let mut copied = Vec::new();
    for plan in plan_files(&source.plans_dir)? {
        copied.push(copy_plan(&plan, &target.plans_dir)?);
    }

    for (src, dest) in [
        (&source.input_path, &target.input_path),
        (&source.decisions_path, &target.decisions_path),
    ] {
        if src.is_file() {
            fs::copy(src, dest)
                .with_context(|| format!("copy {} to {}", src.display(), dest.display()))?;
        }
    }
    Ok(copied)
}

/// Copy plan files of `from` that `to` does not have yet. Existing plans in
/// `to` are never overwritten.
pub fn copy_missing_plans(from: &Path, to: &Path) -> Result<Vec<PathBuf>> {
    let target = ProjectPaths::new(to);
    let mut copied = Vec::new();
    for plan in plan_files(&ProjectPaths::new(from).plans_dir)? {
        let exists = plan
            .file_name()
            .is_some_and(|name| target.plans_dir.join(name).exists());
        if !exists {
            copied.push(copy_plan(&plan, &target.plans_dir)?);
        }
    }
    Ok(copied)
}

/// `*.md` files directly in `dir`, sorted. A missing directory is empty.
fn plan_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("read dir {}", dir.display()))? {
        let path = entry.context("read plans entry")?.path();
        if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some("md") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn copy_plan(plan: &Path, plans_dir: &Path) -> Result<PathBuf> {
    let name = plan
        .file_name()
        .ok_or_else(|| anyhow!("plan path has no file name: {}", plan.display()))?;
    let dest = plans_dir.join(name);
    fs::copy(plan, &dest)
        .with_context(|| format!("copy {} to {}", plan.display(), dest.display()))?;
    Ok(dest)
}
