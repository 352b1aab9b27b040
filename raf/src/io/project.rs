//! Project folder layout and filesystem-backed state derivation.
//!
//! A project lives in `<projects_dir>/<projectId>-<slug>/` with `plans/`,
//! `outcomes/`, `input.md` and `decisions.md`. Nothing about task state is
//! stored elsewhere: [`derive_project_state`] recomputes it from the files.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument};

use crate::core::derive::{OutcomeInput, PlanInput, derive_state};
use crate::core::naming::ProjectRef;
use crate::core::types::{ProjectState, Task, TaskId};

/// Summary file kept in `outcomes/` that never counts as a task outcome.
pub const SUMMARY_FILE: &str = "SUMMARY.md";

/// All canonical paths of one project folder.
#[derive(Debug, Clone)]
pub struct ProjectPaths {
    pub root: PathBuf,
    pub plans_dir: PathBuf,
    pub outcomes_dir: PathBuf,
    pub input_path: PathBuf,
    pub decisions_path: PathBuf,
}

impl ProjectPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            plans_dir: root.join("plans"),
            outcomes_dir: root.join("outcomes"),
            input_path: root.join("input.md"),
            decisions_path: root.join("decisions.md"),
            root,
        }
    }

    /// Outcome file for `task`: an existing one, else named after its plan.
    pub fn outcome_path_for(&self, task: &Task) -> PathBuf {
        if let Some(existing) = &task.outcome_file {
            return existing.clone();
        }
        match task.plan_file.file_name() {
            Some(name) => self.outcomes_dir.join(name),
            None => self.outcomes_dir.join(format!("{}.md", task.id)),
        }
    }
}

/// Split `<id>-<slug>.md` into id and slug. `None` for anything else.
pub fn parse_task_file_name(file_name: &str) -> Option<(TaskId, String)> {
    let stem = file_name.strip_suffix(".md")?;
    let id = TaskId::parse(stem.get(..2)?)?;
    match stem.get(2..)? {
        "" => Some((id, String::new())),
        rest => rest.strip_prefix('-').map(|slug| (id, slug.to_string())),
    }
}

/// Markdown files in `dir` sorted by name. A missing directory is empty.
fn markdown_files(dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("read dir {}", dir.display()))? {
        let entry = entry.with_context(|| format!("read dir entry in {}", dir.display()))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            debug!(path = %path.display(), "skipping non-utf8 file name");
            continue;
        };
        if name.ends_with(".md") {
            files.push((name, path));
        }
    }
    files.sort();
    Ok(files)
}

pub fn list_plans(paths: &ProjectPaths) -> Result<Vec<PlanInput>> {
    let mut plans = Vec::new();
    for (name, path) in markdown_files(&paths.plans_dir)? {
        let Some((id, slug)) = parse_task_file_name(&name) else {
            debug!(file = %name, "ignoring plan file without a task id");
            continue;
        };
        let text =
            fs::read_to_string(&path).with_context(|| format!("read plan {}", path.display()))?;
        plans.push(PlanInput {
            id,
            name: slug,
            path,
            text,
        });
    }
    Ok(plans)
}

pub fn list_outcomes(paths: &ProjectPaths) -> Result<Vec<OutcomeInput>> {
    let mut outcomes = Vec::new();
    for (name, path) in markdown_files(&paths.outcomes_dir)? {
        if name.eq_ignore_ascii_case(SUMMARY_FILE) {
            continue;
        }
        let Some((id, _)) = parse_task_file_name(&name) else {
            debug!(file = %name, "ignoring outcome file without a task id");
            continue;
        };
        let text = fs::read_to_string(&path)
            .with_context(|| format!("read outcome {}", path.display()))?;
        outcomes.push(OutcomeInput { id, path, text });
    }
    Ok(outcomes)
}

/// Recompute the full project state from plan and outcome files.
#[instrument(skip_all, fields(project = %project_dir.display()))]
pub fn derive_project_state(project_dir: &Path) -> Result<ProjectState> {
    let paths = ProjectPaths::new(project_dir);
    let plans = list_plans(&paths)?;
    let outcomes = list_outcomes(&paths)?;
    let state = derive_state(plans, outcomes);
    debug!(status = state.status.as_str(), tasks = state.tasks.len(), "derived state");
    Ok(state)
}

/// Read a file if it exists.
pub fn read_optional(path: &Path) -> Result<Option<String>> {
    if !path.exists() {
        return Ok(None);
    }
    fs::read_to_string(path)
        .map(Some)
        .with_context(|| format!("read {}", path.display()))
}

/// Write an outcome file (temp file + rename).
pub fn write_outcome_file(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow!("outcome path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("md.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp outcome {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace outcome {}", path.display()))?;
    Ok(())
}

/// Project folders directly under `projects_dir`, sorted by name.
pub fn list_projects(projects_dir: &Path) -> Result<Vec<ProjectRef>> {
    if !projects_dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut projects = Vec::new();
    for entry in fs::read_dir(projects_dir)
        .with_context(|| format!("read projects dir {}", projects_dir.display()))?
    {
        let entry = entry.context("read projects dir entry")?;
        if !entry.path().is_dir() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str()
            && let Ok(project) = ProjectRef::parse(name)
        {
            projects.push(project);
        }
    }
    projects.sort_by(|a, b| a.folder.cmp(&b.folder));
    Ok(projects)
}

/// Find a project by folder name, id, or slug.
///
/// A query that names an existing directory is taken as the project path.
pub fn resolve_project(projects_dir: &Path, query: &str) -> Result<PathBuf> {
    let as_path = Path::new(query);
    if as_path.components().count() > 1 && as_path.is_dir() {
        ProjectRef::from_dir(as_path)?;
        return Ok(as_path.to_path_buf());
    }

    let projects = list_projects(projects_dir)?;
    let lowered = query.to_ascii_lowercase();
    if let Some(exact) = projects.iter().find(|p| p.folder == query) {
        return Ok(projects_dir.join(&exact.folder));
    }
    let by_id: Vec<&ProjectRef> = projects.iter().filter(|p| p.id == lowered).collect();
    let candidates = if by_id.is_empty() {
        projects.iter().filter(|p| p.slug == lowered).collect()
    } else {
        by_id
    };
    match candidates.as_slice() {
        [] => {}
        [only] => return Ok(projects_dir.join(&only.folder)),
        many => {
            let names: Vec<&str> = many.iter().map(|p| p.folder.as_str()).collect();
            return Err(anyhow!(
                "project '{query}' is ambiguous: {}",
                names.join(", ")
            ));
        }
    }
    Err(anyhow!(
        "no project matching '{query}' in {}",
        projects_dir.display()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{ProjectStatus, TaskStatus};

    fn write(path: &Path, contents: &str) {
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(path, contents).expect("write");
    }

    fn id(s: &str) -> TaskId {
        TaskId::parse(s).expect("task id")
    }

    #[test]
    fn parses_task_file_names() {
        assert_eq!(
            parse_task_file_name("01-setup-db.md"),
            Some((id("01"), "setup-db".to_string()))
        );
        assert_eq!(parse_task_file_name("0a.md"), Some((id("0a"), String::new())));
        assert_eq!(parse_task_file_name("notes.md"), None);
        assert_eq!(parse_task_file_name("012-x.md"), None);
        assert_eq!(parse_task_file_name("01-x.txt"), None);
    }

    #[test]
    fn missing_plans_dir_is_planning() {
        let temp = tempfile::tempdir().expect("tempdir");
        let state = derive_project_state(temp.path()).expect("derive");
        assert!(state.tasks.is_empty());
        assert_eq!(state.status, ProjectStatus::Planning);
    }

    #[test]
    fn derives_from_files_and_skips_summary() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        write(&root.join("plans/01-first.md"), "# First\n");
        write(
            &root.join("plans/02-second.md"),
            "# Second\n\n## Dependencies\n01\n",
        );
        write(&root.join("plans/README.md"), "not a task\n");
        write(
            &root.join("outcomes/01-first.md"),
            "done\n<promise>FAILED</promise>\n",
        );
        write(
            &root.join("outcomes/SUMMARY.md"),
            "<promise>COMPLETE</promise>\n",
        );

        let state = derive_project_state(root).expect("derive");
        let statuses: Vec<TaskStatus> = state.tasks.iter().map(|t| t.status).collect();
        assert_eq!(statuses, vec![TaskStatus::Failed, TaskStatus::Blocked]);
        assert_eq!(state.tasks[0].name, "first");
        assert_eq!(state.status, ProjectStatus::Failed);
    }

    #[test]
    fn outcome_path_follows_plan_name() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        write(&root.join("plans/03-wire-api.md"), "# Wire\n");
        let state = derive_project_state(root).expect("derive");
        let paths = ProjectPaths::new(root);
        assert_eq!(
            paths.outcome_path_for(&state.tasks[0]),
            root.join("outcomes/03-wire-api.md")
        );
    }

    #[test]
    fn write_outcome_creates_directory() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("outcomes/01-a.md");
        write_outcome_file(&path, "x\n<promise>COMPLETE</promise>\n").expect("write");
        assert_eq!(
            read_optional(&path).expect("read").as_deref(),
            Some("x\n<promise>COMPLETE</promise>\n")
        );
        assert!(!path.with_extension("md.tmp").exists());
    }

    #[test]
    fn resolves_by_folder_id_and_slug() {
        let temp = tempfile::tempdir().expect("tempdir");
        let projects = temp.path();
        fs::create_dir_all(projects.join("a1b2c3-auth-flow")).expect("mkdir");
        fs::create_dir_all(projects.join("d4e5f6-billing")).expect("mkdir");
        fs::create_dir_all(projects.join("Not A Project")).expect("mkdir");

        let expected = projects.join("a1b2c3-auth-flow");
        assert_eq!(resolve_project(projects, "a1b2c3-auth-flow").expect("folder"), expected);
        assert_eq!(resolve_project(projects, "a1b2c3").expect("id"), expected);
        assert_eq!(resolve_project(projects, "auth-flow").expect("slug"), expected);
        assert!(resolve_project(projects, "nope").is_err());
        assert_eq!(list_projects(projects).expect("list").len(), 2);
    }

    #[test]
    fn ambiguous_slug_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(temp.path().join("aa0001-api")).expect("mkdir");
        fs::create_dir_all(temp.path().join("aa0002-api")).expect("mkdir");
        let err = resolve_project(temp.path(), "api").unwrap_err();
        assert!(err.to_string().contains("ambiguous"));
    }
}
