//! Naming conventions shared with git history and the worktree layout.

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};

use crate::core::types::TaskId;

/// Identity of a project folder (`<projectId>-<slug>`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectRef {
    /// Folder name, also used as the worktree branch name.
    pub folder: String,
    /// Prefix before the first `-`, e.g. `a1b2c3`.
    pub id: String,
    /// Remaining slug, e.g. `user-auth`.
    pub slug: String,
}

impl ProjectRef {
    /// Parse a project folder name.
    pub fn parse(folder: &str) -> Result<Self> {
        let (id, slug) = folder.split_once('-').unwrap_or((folder, ""));
        let valid_id = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_digit() || c.is_ascii_lowercase());
        if !valid_id {
            return Err(anyhow!(
                "invalid project folder '{folder}' (expected <id>-<slug> with a lowercase base-36 id)"
            ));
        }
        Ok(Self {
            folder: folder.to_string(),
            id: id.to_string(),
            slug: slug.to_string(),
        })
    }

    /// Parse the final component of `dir`.
    pub fn from_dir(dir: &Path) -> Result<Self> {
        let name = dir
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| anyhow!("project path has no folder name: {}", dir.display()))?;
        Self::parse(name)
    }

    /// Branch bound to this project's worktree.
    pub fn branch(&self) -> &str {
        &self.folder
    }

    /// Human name used in planning commits.
    pub fn display_name(&self) -> String {
        if self.slug.is_empty() {
            self.folder.clone()
        } else {
            self.slug.replace('-', " ")
        }
    }
}

impl fmt::Display for ProjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.folder)
    }
}

/// `RAF[<projectId>:<taskId>] <description>`
pub fn task_commit_message(project: &ProjectRef, task: &TaskId, description: &str) -> String {
    format!("RAF[{}:{}] {}", project.id, task, description.trim())
}

/// `RAF[<projectId>:<taskId>] Outcome: <MARKER>`
pub fn outcome_commit_message(project: &ProjectRef, task: &TaskId, marker: &str) -> String {
    format!("RAF[{}:{}] Outcome: {}", project.id, task, marker)
}

/// Kind of planning commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanningKind {
    Plan,
    Amend,
}

/// `RAF[<projectId>] Plan: <name>` or `RAF[<projectId>] Amend: <name>`
pub fn planning_commit_message(project: &ProjectRef, kind: PlanningKind, name: &str) -> String {
    let label = match kind {
        PlanningKind::Plan => "Plan",
        PlanningKind::Amend => "Amend",
    };
    format!("RAF[{}] {}: {}", project.id, label, name.trim())
}

/// `raf-<projectNumber>-task-<taskId>-failed`
pub fn failed_stash_name(project: &ProjectRef, task: &TaskId) -> String {
    format!("raf-{}-task-{}-failed", project.id, task)
}

/// `<worktreeRoot>/<repoBasename>/<projectFolder>`; pure, checks nothing.
pub fn compute_worktree_path(worktree_root: &Path, repo_basename: &str, folder: &str) -> PathBuf {
    worktree_root.join(repo_basename).join(folder)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_project_folder() {
        let project = ProjectRef::parse("a1b2c3-user-auth").expect("parse");
        assert_eq!(project.id, "a1b2c3");
        assert_eq!(project.slug, "user-auth");
        assert_eq!(project.branch(), "a1b2c3-user-auth");
        assert_eq!(project.display_name(), "user auth");
    }

    #[test]
    fn rejects_uppercase_or_empty_id() {
        assert!(ProjectRef::parse("-slug").is_err());
        assert!(ProjectRef::parse("ABC-slug").is_err());
        assert!(ProjectRef::parse("a_b-slug").is_err());
    }

    #[test]
    fn formats_conventions() {
        let project = ProjectRef::parse("00k2xz-billing").expect("parse");
        let task = TaskId::parse("0c").expect("id");
        assert_eq!(
            task_commit_message(&project, &task, "add invoices "),
            "RAF[00k2xz:0c] add invoices"
        );
        assert_eq!(
            outcome_commit_message(&project, &task, "FAILED"),
            "RAF[00k2xz:0c] Outcome: FAILED"
        );
        assert_eq!(
            planning_commit_message(&project, PlanningKind::Amend, "billing"),
            "RAF[00k2xz] Amend: billing"
        );
        assert_eq!(
            failed_stash_name(&project, &task),
            "raf-00k2xz-task-0c-failed"
        );
        assert_eq!(
            compute_worktree_path(Path::new("/wt"), "repo", "00k2xz-billing"),
            PathBuf::from("/wt/repo/00k2xz-billing")
        );
    }
}
