//! Deterministic task selection and project predicates.

use crate::core::types::{DerivedStats, ProjectState, Task, TaskId, TaskStatus};

/// First pending task in id order, else the first failed task (retry).
///
/// Blocked, completed and in-progress tasks are never returned.
pub fn next_executable_task(state: &ProjectState) -> Option<&Task> {
    next_executable_task_excluding(state, &[])
}

/// Same as [`next_executable_task`], skipping ids in `exclude`.
///
/// The orchestrator uses this so a task whose attempt budget was spent in the
/// current run is not picked up again by the same run.
pub fn next_executable_task_excluding<'a>(
    state: &'a ProjectState,
    exclude: &[TaskId],
) -> Option<&'a Task> {
    let eligible = |task: &&Task, status: TaskStatus| {
        task.status == status && !exclude.contains(&task.id)
    };
    state
        .tasks
        .iter()
        .find(|task| eligible(task, TaskStatus::Pending))
        .or_else(|| {
            state
                .tasks
                .iter()
                .find(|task| eligible(task, TaskStatus::Failed))
        })
}

/// Status counts over every task.
pub fn derived_stats(state: &ProjectState) -> DerivedStats {
    count(state.tasks.iter())
}

/// Status counts over the tasks named in `ids`; unknown ids are not counted.
pub fn derived_stats_for_tasks(state: &ProjectState, ids: &[TaskId]) -> DerivedStats {
    count(state.tasks.iter().filter(|task| ids.contains(&task.id)))
}

fn count<'a>(tasks: impl Iterator<Item = &'a Task>) -> DerivedStats {
    let mut stats = DerivedStats::default();
    for task in tasks {
        match task.status {
            TaskStatus::Pending => stats.pending += 1,
            TaskStatus::InProgress => stats.in_progress += 1,
            TaskStatus::Completed => stats.completed += 1,
            TaskStatus::Failed => stats.failed += 1,
            TaskStatus::Blocked => stats.blocked += 1,
        }
        stats.total += 1;
    }
    stats
}

/// True when every task completed (vacuously true without tasks).
pub fn is_project_complete(state: &ProjectState) -> bool {
    state
        .tasks
        .iter()
        .all(|task| task.status == TaskStatus::Completed)
}

/// True when any task failed. Blocked tasks alone do not count.
pub fn has_project_failed(state: &ProjectState) -> bool {
    state
        .tasks
        .iter()
        .any(|task| task.status == TaskStatus::Failed)
}
