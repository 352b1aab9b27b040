//! Worktree lifecycle: create, validate, merge back, remove.
//!
//! Each project gets a linked worktree at
//! `<worktree_root>/<repo_basename>/<project_folder>` on a branch named after
//! the folder. Every operation runs against the main repository, never from
//! inside a project worktree.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::core::naming::{ProjectRef, compute_worktree_path};
use crate::io::context::ExecContext;
use crate::io::git::{Git, MergeMode, VersionControl};

const REMOTE: &str = "origin";

/// Merging a project branch hit conflicts. The merge was aborted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "merging '{branch}' into '{target}' conflicts in {} file(s):\n{}the merge was aborted; run `git merge {branch}` on '{target}', resolve the conflicts and commit",
    .files.len(),
    file_list(.files)
)]
pub struct MergeConflictError {
    pub branch: String,
    pub target: String,
    pub files: Vec<String>,
}

fn file_list(files: &[String]) -> String {
    files.iter().map(|file| format!("  {file}\n")).collect()
}

/// Local and remote base branch both have commits the other lacks.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("branch '{branch}' has diverged from origin/{branch} ({ahead} ahead, {behind} behind); reconcile it manually")]
pub struct DivergedBranchError {
    pub branch: String,
    pub ahead: u32,
    pub behind: u32,
}

/// Outcome of [`WorktreeManager::validate_worktree`]. Checks stop at the
/// first failing stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorktreeValidation {
    Valid,
    MissingDirectory,
    NotRegistered,
    MissingProjectFolder,
    MissingPlans,
}

impl WorktreeValidation {
    pub fn is_valid(self) -> bool {
        self == WorktreeValidation::Valid
    }

    pub fn describe(self) -> &'static str {
        match self {
            WorktreeValidation::Valid => "valid",
            WorktreeValidation::MissingDirectory => "worktree directory does not exist",
            WorktreeValidation::NotRegistered => "directory is not a registered git worktree",
            WorktreeValidation::MissingProjectFolder => "worktree does not contain the project folder",
            WorktreeValidation::MissingPlans => "project folder has no plans/ directory",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid worktree {}: {}", .path.display(), .validation.describe())]
pub struct WorktreeInvalidError {
    pub path: PathBuf,
    pub validation: WorktreeValidation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    FastForward,
    MergeCommit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    UpToDate,
    FastForwarded,
    Pushed,
    /// No `origin` remote; nothing was synced.
    NoRemote,
}

/// How [`WorktreeManager::ensure_worktree`] obtained the worktree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorktreeAction {
    Reused,
    /// Re-attached to the existing project branch.
    Recreated,
    Created,
}

/// A live worktree belonging to this repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorktreeProject {
    pub folder: String,
    pub path: PathBuf,
    pub branch: Option<String>,
}

pub struct WorktreeManager<V: VersionControl> {
    vcs: V,
    repo_basename: String,
    worktree_root: PathBuf,
    ctx: ExecContext,
}

impl WorktreeManager<Git> {
    /// Manager for the main repository containing `repo`.
    pub fn open(repo: &Path, worktree_root: PathBuf, ctx: ExecContext) -> Result<Self> {
        let main = Git::new(repo)
            .main_toplevel()
            .with_context(|| format!("locate main repository from {}", repo.display()))?;
        Self::new(Git::new(main), worktree_root, ctx)
    }
}

impl<V: VersionControl> WorktreeManager<V> {
    /// `vcs` must operate on the main repository's top level.
    pub fn new(vcs: V, worktree_root: PathBuf, ctx: ExecContext) -> Result<Self> {
        let repo_basename = vcs
            .workdir()
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .ok_or_else(|| anyhow!("repository path has no name: {}", vcs.workdir().display()))?;
        Ok(Self {
            vcs,
            repo_basename,
            worktree_root,
            ctx,
        })
    }

    pub fn repo_root(&self) -> &Path {
        self.vcs.workdir()
    }

    pub fn vcs(&self) -> &V {
        &self.vcs
    }

    /// `<worktree_root>/<repo_basename>`
    pub fn repo_worktree_dir(&self) -> PathBuf {
        self.worktree_root.join(&self.repo_basename)
    }

    pub fn compute_path(&self, project: &ProjectRef) -> PathBuf {
        compute_worktree_path(&self.worktree_root, &self.repo_basename, &project.folder)
    }

    /// New worktree on a new branch named after the project folder.
    pub fn create_worktree(&self, project: &ProjectRef) -> Result<PathBuf> {
        self.add_worktree(project, true)
    }

    /// New worktree attached to the existing project branch.
    pub fn create_worktree_from_branch(&self, project: &ProjectRef) -> Result<PathBuf> {
        self.add_worktree(project, false)
    }

    fn add_worktree(&self, project: &ProjectRef, create_branch: bool) -> Result<PathBuf> {
        let _entered = self.ctx.span().enter();
        let path = self.compute_path(project);
        if path.exists() {
            return Err(anyhow!("worktree path already exists: {}", path.display()));
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create worktree parent {}", parent.display()))?;
        }
        self.vcs
            .worktree_add(&path, project.branch(), create_branch)
            .with_context(|| format!("create worktree for {project}"))?;
        info!(path = %path.display(), branch = project.branch(), create_branch, "worktree created");
        Ok(path)
    }

    /// Reuse the project's worktree, re-attach it to its branch, or create it.
    ///
    /// Only the worktree itself is ensured; the project folder inside it is
    /// checked separately with [`Self::validate_worktree`].
    pub fn ensure_worktree(&self, project: &ProjectRef) -> Result<(PathBuf, WorktreeAction)> {
        let path = self.compute_path(project);
        match self.check_registration(&path)? {
            WorktreeValidation::Valid => {
                debug!(path = %path.display(), "reusing worktree");
                Ok((path, WorktreeAction::Reused))
            }
            WorktreeValidation::MissingDirectory => {
                // A directory deleted outside git stays registered until pruned.
                self.vcs.worktree_prune()?;
                if self.vcs.branch_exists(project.branch())? {
                    let path = self.create_worktree_from_branch(project)?;
                    Ok((path, WorktreeAction::Recreated))
                } else {
                    let path = self.create_worktree(project)?;
                    Ok((path, WorktreeAction::Created))
                }
            }
            validation => Err(WorktreeInvalidError { path, validation }.into()),
        }
    }

    /// Check a worktree stage by stage: directory, registration, project
    /// folder, `plans/`.
    pub fn validate_worktree(&self, path: &Path, project_rel: &Path) -> Result<WorktreeValidation> {
        let registration = self.check_registration(path)?;
        if !registration.is_valid() {
            return Ok(registration);
        }
        let project_dir = path.join(project_rel);
        if !project_dir.is_dir() {
            return Ok(WorktreeValidation::MissingProjectFolder);
        }
        if !project_dir.join("plans").is_dir() {
            return Ok(WorktreeValidation::MissingPlans);
        }
        Ok(WorktreeValidation::Valid)
    }

    fn check_registration(&self, path: &Path) -> Result<WorktreeValidation> {
        if !path.is_dir() {
            return Ok(WorktreeValidation::MissingDirectory);
        }
        let wanted = canonical(path);
        let registered = self
            .vcs
            .worktree_list()?
            .iter()
            .any(|entry| canonical(&entry.path) == wanted);
        if registered {
            Ok(WorktreeValidation::Valid)
        } else {
            Ok(WorktreeValidation::NotRegistered)
        }
    }

    /// Merge `branch` into `target` in the main repository.
    ///
    /// Tries a fast-forward first, then a regular merge. On conflict the merge
    /// is aborted, the previously checked-out branch restored, and a
    /// [`MergeConflictError`] returned.
    pub fn merge_worktree_branch(&self, branch: &str, target: &str) -> Result<MergeOutcome> {
        let _entered = self.ctx.span().enter();
        self.refuse_inside_worktrees()?;

        let original = self.vcs.current_branch()?;
        if original != target {
            self.vcs
                .checkout(target)
                .with_context(|| format!("checkout {target} before merge"))?;
        }

        if self.vcs.merge(branch, MergeMode::FastForwardOnly)? {
            info!(branch, target, "fast-forward merge");
            return Ok(MergeOutcome::FastForward);
        }
        if self.vcs.merge(branch, MergeMode::ThreeWay)? {
            info!(branch, target, "merge commit created");
            return Ok(MergeOutcome::MergeCommit);
        }

        let files = match self.vcs.conflicted_files() {
            Ok(files) => files,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "could not list conflicted files");
                Vec::new()
            }
        };
        warn!(branch, target, conflicts = files.len(), "merge failed, aborting");
        // Fails harmlessly when git refused before starting the merge.
        if let Err(err) = self.vcs.merge_abort() {
            debug!(err = %format!("{err:#}"), "merge --abort failed");
        }
        if original != target
            && let Err(err) = self.vcs.checkout(&original)
        {
            warn!(branch = %original, err = %format!("{err:#}"), "failed to restore branch");
        }
        if files.is_empty() {
            return Err(anyhow!(
                "git refused to merge '{branch}' into '{target}'; check `git status` in {}",
                self.vcs.workdir().display()
            ));
        }
        Err(MergeConflictError {
            branch: branch.to_string(),
            target: target.to_string(),
            files,
        }
        .into())
    }

    /// `git worktree remove`; the branch is kept.
    pub fn remove_worktree(&self, path: &Path) -> Result<()> {
        let _entered = self.ctx.span().enter();
        self.refuse_inside_worktrees()?;
        self.vcs
            .worktree_remove(path)
            .with_context(|| format!("remove worktree {}", path.display()))?;
        info!(path = %path.display(), "worktree removed");
        Ok(())
    }

    /// Worktrees of this repository living under the worktree directory.
    pub fn list_worktree_projects(&self) -> Result<Vec<WorktreeProject>> {
        let dir = canonical(&self.repo_worktree_dir());
        let mut projects: Vec<WorktreeProject> = self
            .vcs
            .worktree_list()?
            .into_iter()
            .filter_map(|entry| {
                let path = canonical(&entry.path);
                if path.parent() != Some(dir.as_path()) {
                    return None;
                }
                let folder = path.file_name()?.to_str()?.to_string();
                Some(WorktreeProject {
                    folder,
                    path,
                    branch: entry.branch,
                })
            })
            .collect();
        projects.sort_by(|a, b| a.folder.cmp(&b.folder));
        Ok(projects)
    }

    /// Fast-forward the local base branch to `origin/<branch>`.
    ///
    /// Fails on divergence or when the branch is checked out with local changes.
    pub fn pull_main_branch(&self, branch: &str) -> Result<SyncOutcome> {
        let _entered = self.ctx.span().enter();
        if !self.vcs.has_remote(REMOTE)? {
            info!("no {REMOTE} remote; skipping pull");
            return Ok(SyncOutcome::NoRemote);
        }
        self.vcs.fetch(REMOTE, branch)?;
        let upstream = format!("{REMOTE}/{branch}");
        let (ahead, behind) = self.vcs.ahead_behind(branch, &upstream)?;
        if behind == 0 {
            debug!(branch, ahead, "base branch up to date");
            return Ok(SyncOutcome::UpToDate);
        }
        if ahead > 0 {
            return Err(DivergedBranchError {
                branch: branch.to_string(),
                ahead,
                behind,
            }
            .into());
        }
        if self.vcs.current_branch().ok().as_deref() == Some(branch) {
            let dirty = self.vcs.status()?;
            if !dirty.is_empty() {
                return Err(anyhow!(
                    "cannot fast-forward '{branch}': {} uncommitted change(s) in {}; commit or stash them first",
                    dirty.len(),
                    self.vcs.workdir().display()
                ));
            }
        }
        self.vcs.fast_forward_branch(branch, &upstream)?;
        info!(branch, behind, "base branch fast-forwarded");
        Ok(SyncOutcome::FastForwarded)
    }

    /// Push the base branch to `origin` when it is strictly ahead.
    pub fn push_main_branch(&self, branch: &str) -> Result<SyncOutcome> {
        let _entered = self.ctx.span().enter();
        if !self.vcs.has_remote(REMOTE)? {
            info!("no {REMOTE} remote; skipping push");
            return Ok(SyncOutcome::NoRemote);
        }
        self.vcs.fetch(REMOTE, branch)?;
        let upstream = format!("{REMOTE}/{branch}");
        let (ahead, behind) = self.vcs.ahead_behind(branch, &upstream)?;
        if behind > 0 {
            return Err(DivergedBranchError {
                branch: branch.to_string(),
                ahead,
                behind,
            }
            .into());
        }
        if ahead == 0 {
            return Ok(SyncOutcome::UpToDate);
        }
        self.vcs.push(REMOTE, branch)?;
        info!(branch, ahead, "base branch pushed");
        Ok(SyncOutcome::Pushed)
    }

    /// Base branch: `origin/HEAD`'s target, else `main` or `master`, else the
    /// current branch.
    pub fn detect_main_branch(&self) -> Result<String> {
        if let Some(branch) = self.vcs.remote_head_branch(REMOTE)? {
            debug!(branch = %branch, "base branch from {REMOTE}/HEAD");
            return Ok(branch);
        }
        for candidate in ["main", "master"] {
            if self.vcs.branch_exists(candidate)? {
                return Ok(candidate.to_string());
            }
        }
        self.vcs.current_branch()
    }

    fn refuse_inside_worktrees(&self) -> Result<()> {
        let dir = canonical(&self.repo_worktree_dir());
        let repo = canonical(self.vcs.workdir());
        let cwd = std::env::current_dir().map(|p| canonical(&p)).ok();
        let inside = |p: &Path| p.starts_with(&dir);
        if inside(&repo) || cwd.as_deref().is_some_and(inside) {
            return Err(anyhow!(
                "refusing to operate from inside a project worktree ({}); run from the main repository",
                dir.display()
            ));
        }
        Ok(())
    }
}

fn canonical(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
