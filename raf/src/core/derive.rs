//! Pure task-graph derivation.
//!
//! Callers hand in plan and outcome file contents; this module never touches
//! the filesystem. Blocking is resolved with one ascending sweep over an
//! id-ordered arena, so malformed references (self, forward, unknown ids) can
//! never loop and simply never block.

use std::collections::HashMap;
use std::path::PathBuf;

use tracing::warn;

use crate::core::dependencies::parse_dependencies;
use crate::core::outcome::parse_outcome_status;
use crate::core::types::{ProjectState, ProjectStatus, Task, TaskId, TaskStatus};

/// One plan file as read from disk.
#[derive(Debug, Clone)]
pub struct PlanInput {
    pub id: TaskId,
    pub name: String,
    pub path: PathBuf,
    pub text: String,
}

/// One outcome file as read from disk.
#[derive(Debug, Clone)]
pub struct OutcomeInput {
    pub id: TaskId,
    pub path: PathBuf,
    pub text: String,
}

/// Build the project state from plan and outcome contents.
pub fn derive_state(mut plans: Vec<PlanInput>, outcomes: Vec<OutcomeInput>) -> ProjectState {
    plans.sort_by(|a, b| a.id.cmp(&b.id).then_with(|| a.path.cmp(&b.path)));
    plans.dedup_by(|later, first| {
        let duplicate = later.id == first.id;
        if duplicate {
            warn!(
                id = %later.id,
                kept = %first.path.display(),
                ignored = %later.path.display(),
                "duplicate task id in plans"
            );
        }
        duplicate
    });

    let mut resolved: HashMap<TaskId, (TaskStatus, PathBuf)> = HashMap::new();
    for outcome in outcomes {
        match parse_outcome_status(&outcome.text) {
            Some(status) => {
                resolved.insert(outcome.id, (status, outcome.path));
            }
            None => {
                resolved.entry(outcome.id).or_insert((TaskStatus::Pending, outcome.path));
            }
        }
    }

    let mut tasks: Vec<Task> = plans
        .into_iter()
        .map(|plan| {
            let (status, outcome_file) = match resolved.remove(&plan.id) {
                Some((status, path)) => (status, Some(path)),
                None => (TaskStatus::Pending, None),
            };
            Task {
                dependencies: parse_dependencies(&plan.text),
                id: plan.id,
                name: plan.name,
                plan_file: plan.path,
                outcome_file,
                status,
            }
        })
        .collect();

    propagate_blocking(&mut tasks);
    let status = project_status(&tasks);
    ProjectState { status, tasks }
}

/// Mark pending tasks blocked when an already-resolved dependency failed or is
/// blocked. `tasks` must be sorted by id.
fn propagate_blocking(tasks: &mut [Task]) {
    let index: HashMap<TaskId, usize> = tasks
        .iter()
        .enumerate()
        .map(|(i, task)| (task.id.clone(), i))
        .collect();

    for i in 0..tasks.len() {
        if tasks[i].status != TaskStatus::Pending {
            continue;
        }
        let blocked = tasks[i].dependencies.iter().any(|dep| {
            index
                .get(dep)
                .is_some_and(|&j| j < i && tasks[j].status.blocks_dependents())
        });
        if blocked {
            tasks[i].status = TaskStatus::Blocked;
        }
    }
}

fn project_status(tasks: &[Task]) -> ProjectStatus {
    if tasks.is_empty() {
        return ProjectStatus::Planning;
    }
    if tasks.iter().all(|t| t.status == TaskStatus::Completed) {
        return ProjectStatus::Completed;
    }
    if tasks.iter().any(|t| t.status == TaskStatus::Failed) {
        return ProjectStatus::Failed;
    }
    if tasks.iter().all(|t| t.status == TaskStatus::Pending) {
        return ProjectStatus::Ready;
    }
    ProjectStatus::Executing
}

/// Describe dependency references that can never block.
///
/// Derivation tolerates these; the list only exists so plan authors can be
/// told about them.
pub fn lint_dependencies(state: &ProjectState) -> Vec<String> {
    let mut warnings = Vec::new();
    for task in &state.tasks {
        for dep in &task.dependencies {
            if dep == &task.id {
                warnings.push(format!("task {} depends on itself", task.id));
            } else if state.task(dep).is_none() {
                warnings.push(format!("task {} depends on unknown task {dep}", task.id));
            } else if dep > &task.id {
                warnings.push(format!(
                    "task {} depends on later task {dep} (never blocks)",
                    task.id
                ));
            }
        }
    }
    warnings
}
