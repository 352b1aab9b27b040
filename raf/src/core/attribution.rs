//! Attribution of changed files to the task that produced them.

use std::collections::HashSet;

/// Files a task may commit: `current - baseline`, in `current` order.
///
/// A file that was already dirty before the task started stays out of the
/// delta even if the task edited it again. Files missing from `current` are
/// never returned.
pub fn task_delta(baseline: &[String], current: &[String]) -> Vec<String> {
    let before: HashSet<&str> = baseline.iter().map(String::as_str).collect();
    let mut seen = HashSet::new();
    current
        .iter()
        .filter(|path| !before.contains(path.as_str()))
        .filter(|path| seen.insert(path.as_str()))
        .cloned()
        .collect()
}

/// Files to commit given an optional baseline.
///
/// Without a baseline every current change is attributed to the task.
pub fn files_to_commit(baseline: Option<&[String]>, current: &[String]) -> Vec<String> {
    match baseline {
        Some(baseline) => task_delta(baseline, current),
        None => task_delta(&[], current),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn delta_excludes_baseline_files() {
        let delta = task_delta(&paths(&["a.txt"]), &paths(&["a.txt", "b.txt"]));
        assert_eq!(delta, paths(&["b.txt"]));
    }

    #[test]
    fn baseline_files_missing_from_current_are_ignored() {
        let delta = task_delta(&paths(&["gone.txt", "a.txt"]), &paths(&["c.txt"]));
        assert_eq!(delta, paths(&["c.txt"]));
    }

    #[test]
    fn missing_baseline_commits_everything() {
        let current = paths(&["a.txt", "b.txt", "a.txt"]);
        assert_eq!(files_to_commit(None, &current), paths(&["a.txt", "b.txt"]));
        let baseline = paths(&["a.txt"]);
        assert_eq!(
            files_to_commit(Some(baseline.as_slice()), &current),
            paths(&["b.txt"])
        );
    }
}
