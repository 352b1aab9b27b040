//! Git adapter for the orchestrator.
//!
//! Orchestration logic talks to a narrow [`VersionControl`] trait so it can be
//! tested with in-memory fakes; [`Git`] implements it with `git` subprocess
//! calls in a fixed working directory.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};

/// Parsed `git status --porcelain` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// 2-letter XY code, or "??" for untracked. Leading spaces are significant.
    pub code: String,
    /// Repository-relative path; the new path for renames and copies.
    pub path: String,
}

/// One entry of `git worktree list --porcelain`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorktreeEntry {
    pub path: PathBuf,
    /// Short branch name, `None` for detached or bare entries.
    pub branch: Option<String>,
}

/// Merge strategy for [`VersionControl::merge`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    FastForwardOnly,
    /// Regular merge, creating a merge commit when needed.
    ThreeWay,
}

/// The git operations the orchestrator and worktree manager rely on.
pub trait VersionControl {
    fn workdir(&self) -> &Path;
    /// Changed files including untracked ones.
    fn status(&self) -> Result<Vec<StatusEntry>>;
    /// Stage a single path (additions, modifications and deletions).
    fn stage(&self, path: &str) -> Result<()>;
    /// Commit staged changes limited to `paths` (everything staged when empty).
    /// `Ok(None)` when nothing was staged.
    fn commit(&self, message: &str, paths: &[String]) -> Result<Option<String>>;
    /// Stash changes to `paths` (all changes when empty), untracked included.
    /// `Ok(false)` when nothing was stashed.
    fn stash_push(&self, message: &str, paths: &[String]) -> Result<bool>;
    fn head_sha(&self) -> Result<String>;
    fn current_branch(&self) -> Result<String>;
    fn branch_exists(&self, branch: &str) -> Result<bool>;
    fn checkout(&self, branch: &str) -> Result<()>;
    /// Merge `branch` into the checked-out branch. `Ok(false)` when git refused.
    fn merge(&self, branch: &str, mode: MergeMode) -> Result<bool>;
    fn merge_abort(&self) -> Result<()>;
    fn conflicted_files(&self) -> Result<Vec<String>>;
    fn worktree_add(&self, path: &Path, branch: &str, create_branch: bool) -> Result<()>;
    fn worktree_remove(&self, path: &Path) -> Result<()>;
    fn worktree_list(&self) -> Result<Vec<WorktreeEntry>>;
    /// Drop registrations of worktrees whose directory is gone.
    fn worktree_prune(&self) -> Result<()>;
    fn has_remote(&self, remote: &str) -> Result<bool>;
    fn fetch(&self, remote: &str, branch: &str) -> Result<()>;
    /// Commits only in `local` and only in `upstream`.
    fn ahead_behind(&self, local: &str, upstream: &str) -> Result<(u32, u32)>;
    /// Move local `branch` to `upstream` when it is a fast-forward.
    fn fast_forward_branch(&self, branch: &str, upstream: &str) -> Result<()>;
    fn push(&self, remote: &str, branch: &str) -> Result<()>;
    /// Branch that `refs/remotes/<remote>/HEAD` points to, if set.
    fn remote_head_branch(&self, remote: &str) -> Result<Option<String>>;
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    /// Absolute path of the repository (or worktree) top level.
    pub fn toplevel(&self) -> Result<PathBuf> {
        let out = self.run_capture(&["rev-parse", "--show-toplevel"])?;
        Ok(PathBuf::from(out.trim()))
    }

    /// Top level of the main repository, even when `workdir` is a linked worktree.
    pub fn main_toplevel(&self) -> Result<PathBuf> {
        let out = self.run_capture(&["rev-parse", "--path-format=absolute", "--git-common-dir"])?;
        let common = PathBuf::from(out.trim());
        match common.file_name().and_then(|n| n.to_str()) {
            Some(".git") => common
                .parent()
                .map(Path::to_path_buf)
                .ok_or_else(|| anyhow!("git common dir has no parent: {}", common.display())),
            _ => self.toplevel(),
        }
    }

    /// Ensure there are no uncommitted changes (untracked files included).
    #[instrument(skip_all)]
    pub fn ensure_clean(&self) -> Result<()> {
        let entries = self.status()?;
        if entries.is_empty() {
            debug!("worktree is clean");
            return Ok(());
        }
        warn!(changed = entries.len(), "worktree not clean");
        let mut msg = String::from("working tree not clean:\n");
        for entry in entries {
            msg.push_str(&format!("{} {}\n", entry.code, entry.path));
        }
        Err(anyhow!(msg.trim_end().to_string()))
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

impl VersionControl for Git {
    fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn status(&self) -> Result<Vec<StatusEntry>> {
        let out = self.run_capture(&["status", "--porcelain=v1", "-uall"])?;
        let mut entries = Vec::new();
        for line in out.lines() {
            if line.trim().is_empty() {
                continue;
            }
            entries.push(parse_status_line(line)?);
        }
        Ok(entries)
    }

    fn stage(&self, path: &str) -> Result<()> {
        self.run_checked(&["add", "-A", "--", path])?;
        Ok(())
    }

    #[instrument(skip_all)]
    fn commit(&self, message: &str, paths: &[String]) -> Result<Option<String>> {
        let pathspec: Vec<&str> = if paths.is_empty() {
            Vec::new()
        } else {
            std::iter::once("--")
                .chain(paths.iter().map(String::as_str))
                .collect()
        };

        let mut diff_args = vec!["diff", "--cached", "--name-only"];
        diff_args.extend(&pathspec);
        let staged = self.run(&diff_args)?;
        if String::from_utf8_lossy(&staged.stdout).trim().is_empty() {
            debug!("nothing to commit");
            return Ok(None);
        }

        let mut commit_args = vec!["commit", "-m", message];
        commit_args.extend(&pathspec);
        let output = self.run(&commit_args)?;
        if !output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout);
            if stdout.contains("nothing to commit") {
                debug!("nothing to commit");
                return Ok(None);
            }
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git commit failed: {}", stderr.trim()));
        }
        let sha = self.head_sha()?;
        debug!(sha = %sha, "committed");
        Ok(Some(sha))
    }

    #[instrument(skip_all, fields(message))]
    fn stash_push(&self, message: &str, paths: &[String]) -> Result<bool> {
        if self.status()?.is_empty() {
            debug!("nothing to stash");
            return Ok(false);
        }
        let mut args = vec!["stash", "push", "--include-untracked", "-m", message];
        if !paths.is_empty() {
            args.push("--");
            args.extend(paths.iter().map(String::as_str));
        }
        let out = self.run_capture(&args)?;
        Ok(!out.contains("No local changes to save"))
    }

    fn head_sha(&self) -> Result<String> {
        let out = self.run_capture(&["rev-parse", "HEAD"])?;
        Ok(out.trim().to_string())
    }

    #[instrument(skip_all)]
    fn current_branch(&self) -> Result<String> {
        let out = self.run_capture(&["rev-parse", "--abbrev-ref", "HEAD"])?;
        let name = out.trim().to_string();
        if name == "HEAD" {
            warn!("detached HEAD detected");
            return Err(anyhow!("detached HEAD (refuse to run)"));
        }
        debug!(branch = %name, "current branch");
        Ok(name)
    }

    fn branch_exists(&self, branch: &str) -> Result<bool> {
        let status = self
            .run(&[
                "show-ref",
                "--verify",
                "--quiet",
                &format!("refs/heads/{branch}"),
            ])?
            .status;
        Ok(status.success())
    }

    #[instrument(skip_all, fields(branch))]
    fn checkout(&self, branch: &str) -> Result<()> {
        debug!(branch, "checking out branch");
        self.run_checked(&["checkout", branch])?;
        Ok(())
    }

    #[instrument(skip_all, fields(branch, mode = ?mode))]
    fn merge(&self, branch: &str, mode: MergeMode) -> Result<bool> {
        let args: &[&str] = match mode {
            MergeMode::FastForwardOnly => &["merge", "--ff-only", branch],
            MergeMode::ThreeWay => &["merge", "--no-edit", branch],
        };
        let output = self.run(args)?;
        if !output.status.success() {
            debug!(
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "merge refused"
            );
        }
        Ok(output.status.success())
    }

    fn merge_abort(&self) -> Result<()> {
        self.run_checked(&["merge", "--abort"])?;
        Ok(())
    }

    fn conflicted_files(&self) -> Result<Vec<String>> {
        let out = self.run_capture(&["diff", "--name-only", "--diff-filter=U"])?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }

    #[instrument(skip_all, fields(path = %path.display(), branch, create_branch))]
    fn worktree_add(&self, path: &Path, branch: &str, create_branch: bool) -> Result<()> {
        let path_str = path.to_string_lossy();
        if create_branch {
            self.run_checked(&["worktree", "add", &path_str, "-b", branch])?;
        } else {
            self.run_checked(&["worktree", "add", &path_str, branch])?;
        }
        Ok(())
    }

    fn worktree_remove(&self, path: &Path) -> Result<()> {
        self.run_checked(&["worktree", "remove", &path.to_string_lossy()])?;
        Ok(())
    }

    fn worktree_list(&self) -> Result<Vec<WorktreeEntry>> {
        let out = self.run_capture(&["worktree", "list", "--porcelain"])?;
        Ok(parse_worktree_list(&out))
    }

    fn worktree_prune(&self) -> Result<()> {
        self.run_checked(&["worktree", "prune"])?;
        Ok(())
    }

    fn has_remote(&self, remote: &str) -> Result<bool> {
        let out = self.run_capture(&["remote"])?;
        Ok(out.lines().any(|l| l.trim() == remote))
    }

    fn fetch(&self, remote: &str, branch: &str) -> Result<()> {
        self.run_checked(&["fetch", remote, branch])?;
        Ok(())
    }

    fn ahead_behind(&self, local: &str, upstream: &str) -> Result<(u32, u32)> {
        let range = format!("{local}...{upstream}");
        let out = self.run_capture(&["rev-list", "--left-right", "--count", &range])?;
        let mut parts = out.split_whitespace().map(str::parse::<u32>);
        match (parts.next(), parts.next()) {
            (Some(Ok(ahead)), Some(Ok(behind))) => Ok((ahead, behind)),
            _ => Err(anyhow!("unexpected rev-list output: '{}'", out.trim())),
        }
    }

    fn fast_forward_branch(&self, branch: &str, upstream: &str) -> Result<()> {
        if self.current_branch().ok().as_deref() == Some(branch) {
            self.run_checked(&["merge", "--ff-only", upstream])?;
        } else {
            let head = self.run_capture(&["rev-parse", upstream])?;
            let refname = format!("refs/heads/{branch}");
            self.run_checked(&["merge-base", "--is-ancestor", &refname, head.trim()])?;
            self.run_checked(&["update-ref", &refname, head.trim()])?;
        }
        Ok(())
    }

    fn push(&self, remote: &str, branch: &str) -> Result<()> {
        self.run_checked(&["push", remote, branch])?;
        Ok(())
    }

    fn remote_head_branch(&self, remote: &str) -> Result<Option<String>> {
        let refname = format!("refs/remotes/{remote}/HEAD");
        let output = self.run(&["symbolic-ref", "--short", &refname])?;
        if !output.status.success() {
            return Ok(None);
        }
        let name = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let prefix = format!("{remote}/");
        Ok(Some(name.strip_prefix(&prefix).unwrap_or(&name).to_string()))
    }
}

fn parse_status_line(line: &str) -> Result<StatusEntry> {
    if line.len() < 4 || !line.is_char_boundary(2) {
        return Err(anyhow!("unexpected porcelain line: '{line}'"));
    }
    let code = line[..2].to_string();
    let rest = &line[3..];
    if !code.contains(['R', 'C']) {
        return Ok(StatusEntry {
            code,
            path: take_path(rest, false).0,
        });
    }
    let (old, remainder) = take_path(rest, true);
    let path = match remainder.strip_prefix(" -> ") {
        Some(new) => take_path(new, false).0,
        None => old,
    };
    Ok(StatusEntry { code, path })
}

/// Read one path token (quoted or bare) and return it with the unread rest.
///
/// Bare tokens end at ` -> ` only when `split_arrow` is set (rename entries).
fn take_path(s: &str, split_arrow: bool) -> (String, &str) {
    if let Some(body) = s.strip_prefix('"') {
        let bytes = body.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            match bytes[i] {
                b'\\' => i += 2,
                b'"' => return (unquote(&body[..i]), &body[i + 1..]),
                _ => i += 1,
            }
        }
        return (unquote(body), "");
    }
    match s.find(" -> ").filter(|_| split_arrow) {
        Some(idx) => (s[..idx].to_string(), &s[idx..]),
        None => (s.to_string(), ""),
    }
}

/// Undo git's C-style path quoting (`core.quotePath`).
fn unquote(body: &str) -> String {
    let bytes = body.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'\\' || i + 1 >= bytes.len() {
            out.push(bytes[i]);
            i += 1;
            continue;
        }
        let next = bytes[i + 1];
        match next {
            b'n' => out.push(b'\n'),
            b't' => out.push(b'\t'),
            b'r' => out.push(b'\r'),
            b'"' => out.push(b'"'),
            b'\\' => out.push(b'\\'),
            b'0'..=b'7' => {
                let digits: Vec<u8> = bytes[i + 1..]
                    .iter()
                    .take(3)
                    .take_while(|b| (b'0'..=b'7').contains(*b))
                    .copied()
                    .collect();
                let value = digits
                    .iter()
                    .fold(0u32, |acc, d| acc * 8 + u32::from(d - b'0'));
                match u8::try_from(value) {
                    Ok(byte) => out.push(byte),
                    Err(_) => {
                        out.push(b'\\');
                        out.extend_from_slice(&digits);
                    }
                }
                i += 1 + digits.len();
                continue;
            }
            other => {
                out.push(b'\\');
                out.push(other);
            }
        }
        i += 2;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn parse_worktree_list(out: &str) -> Vec<WorktreeEntry> {
    let mut entries = Vec::new();
    let mut current: Option<WorktreeEntry> = None;
    for line in out.lines() {
        if let Some(path) = line.strip_prefix("worktree ") {
            if let Some(done) = current.take() {
                entries.push(done);
            }
            current = Some(WorktreeEntry {
                path: PathBuf::from(path),
                branch: None,
            });
        } else if let Some(branch) = line.strip_prefix("branch ")
            && let Some(entry) = current.as_mut()
        {
            entry.branch = Some(
                branch
                    .strip_prefix("refs/heads/")
                    .unwrap_or(branch)
                    .to_string(),
            );
        }
    }
    if let Some(done) = current {
        entries.push(done);
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_untracked_line() {
        let e = parse_status_line("?? foo.txt").expect("parse");
        assert_eq!(
            e,
            StatusEntry {
                code: "??".to_string(),
                path: "foo.txt".to_string()
            }
        );
    }

    #[test]
    fn parses_modified_line_keeping_leading_space() {
        let e = parse_status_line(" M src/main.rs").expect("parse");
        assert_eq!(
            e,
            StatusEntry {
                code: " M".to_string(),
                path: "src/main.rs".to_string()
            }
        );
    }

    #[test]
    fn parses_rename_line_uses_new_path() {
        let e = parse_status_line("R  old.txt -> new.txt").expect("parse");
        assert_eq!(e.path, "new.txt");
    }

    #[test]
    fn arrow_in_plain_modified_path_is_kept() {
        let e = parse_status_line(" M a -> b.txt").expect("parse");
        assert_eq!(e.path, "a -> b.txt");
    }

    #[test]
    fn unquotes_quoted_paths() {
        let e = parse_status_line("?? \"with space\\tand \\\"quote\\\".txt\"").expect("parse");
        assert_eq!(e.path, "with space\tand \"quote\".txt");

        let e = parse_status_line("R  \"old name.txt\" -> \"caf\\303\\251.txt\"").expect("parse");
        assert_eq!(e.path, "café.txt");
    }

    #[test]
    fn out_of_range_octal_escape_is_kept_verbatim() {
        assert_eq!(unquote("a\\777b"), "a\\777b");
        assert_eq!(unquote("\\101\\400"), "A\\400");
    }

    #[test]
    fn rejects_short_lines() {
        assert!(parse_status_line("M").is_err());
    }

    #[test]
    fn parses_worktree_porcelain() {
        let out = "worktree /repo\nHEAD abc\nbranch refs/heads/main\n\nworktree /wt/repo/a1-x\nHEAD def\nbranch refs/heads/a1-x\n\nworktree /wt/detached\nHEAD 123\ndetached\n";
        let entries = parse_worktree_list(out);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[1].path, PathBuf::from("/wt/repo/a1-x"));
        assert_eq!(entries[1].branch.as_deref(), Some("a1-x"));
        assert_eq!(entries[2].branch, None);
    }
}
