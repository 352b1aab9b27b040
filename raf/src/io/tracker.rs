//! Attribution of working-tree changes to tasks, and the commits that record them.
//!
//! A baseline of dirty files is taken before a task starts. Only files that
//! became dirty afterwards are staged and committed for the task; everything
//! else stays untouched in the working tree.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::core::attribution::files_to_commit;
use crate::io::git::VersionControl;
use crate::io::project::ProjectPaths;

/// Task-scoped view over a [`VersionControl`] implementation.
pub struct ChangeTracker<'a, V: VersionControl> {
    vcs: &'a V,
}

impl<'a, V: VersionControl> ChangeTracker<'a, V> {
    pub fn new(vcs: &'a V) -> Self {
        Self { vcs }
    }

    /// Paths with uncommitted changes, untracked files included.
    pub fn changed_files(&self) -> Result<Vec<String>> {
        let entries = self.vcs.status().context("list changed files")?;
        Ok(entries.into_iter().map(|e| e.path).collect())
    }

    /// Changed files before a task runs. `None` when the snapshot failed.
    pub fn snapshot_baseline(&self) -> Option<Vec<String>> {
        match self.changed_files() {
            Ok(files) => {
                debug!(files = files.len(), "baseline snapshot");
                Some(files)
            }
            Err(err) => {
                warn!(err = %format!("{err:#}"), "baseline snapshot failed; task will commit every change");
                None
            }
        }
    }

    /// Stage and commit the changes made since `baseline`.
    ///
    /// Returns the new commit hash, or `None` when nothing was committed.
    #[instrument(skip_all, fields(message))]
    pub fn commit_task_changes(
        &self,
        message: &str,
        baseline: Option<&[String]>,
    ) -> Result<Option<String>> {
        let current = self.changed_files()?;
        if baseline.is_none() {
            warn!(
                files = current.len(),
                "no baseline; committing every changed file"
            );
        }
        let delta = files_to_commit(baseline, &current);
        self.commit_paths(message, &delta)
    }

    /// Stage `paths` one by one and commit the ones that staged.
    pub fn commit_paths(&self, message: &str, paths: &[String]) -> Result<Option<String>> {
        if paths.is_empty() {
            debug!("nothing to commit");
            return Ok(None);
        }
        let mut staged = Vec::with_capacity(paths.len());
        for path in paths {
            match self.vcs.stage(path) {
                Ok(()) => staged.push(path.clone()),
                Err(err) => warn!(path = %path, err = %format!("{err:#}"), "failed to stage file"),
            }
        }
        if staged.is_empty() {
            warn!("no file could be staged");
            return Ok(None);
        }
        let sha = self.vcs.commit(message, &staged)?;
        if let Some(sha) = &sha {
            info!(sha = %sha, files = staged.len(), "committed");
        }
        Ok(sha)
    }

    /// Stash every uncommitted change, untracked files included, under
    /// `name`. Returns the name when something was stashed.
    #[instrument(skip_all, fields(name))]
    pub fn stash_leftovers(&self, name: &str) -> Result<Option<String>> {
        let changed = self.changed_files()?;
        if changed.is_empty() {
            debug!("no leftover changes");
            return Ok(None);
        }
        if self.vcs.stash_push(name, &[])? {
            info!(files = changed.len(), "stashed leftover changes");
            Ok(Some(name.to_string()))
        } else {
            warn!("changes were reported but nothing was stashed");
            Ok(None)
        }
    }
}

/// Commit the planning files of a project (`input.md`, `decisions.md`, plus
/// `extra_files`).
///
/// With `workdir` set (worktree mode) paths are made relative to it; otherwise
/// they are passed to git as absolute paths.
pub fn commit_planning_artifacts<V: VersionControl>(
    vcs: &V,
    project_dir: &Path,
    message: &str,
    extra_files: &[&Path],
    workdir: Option<&Path>,
) -> Result<Option<String>> {
    let paths = ProjectPaths::new(project_dir);
    let candidates = [paths.input_path.as_path(), paths.decisions_path.as_path()]
        .into_iter()
        .filter(|p| p.exists())
        .chain(extra_files.iter().copied());

    let mut files = Vec::new();
    for path in candidates {
        let path = match workdir {
            Some(root) => path.strip_prefix(root).unwrap_or(path),
            None => path,
        };
        files.push(path.to_string_lossy().into_owned());
    }
    ChangeTracker::new(vcs).commit_paths(message, &files)
}
