//! Dependency declarations inside plan files.

use crate::core::types::TaskId;

/// Extract dependency ids from the `## Dependencies` section of a plan.
///
/// Only the first non-empty line of the section is read. Tokens are comma
/// separated; anything that is not a valid task id is dropped silently.
pub fn parse_dependencies(plan_text: &str) -> Vec<TaskId> {
    let mut lines = plan_text.lines();
    let found = lines.by_ref().any(is_dependencies_heading);
    if !found {
        return Vec::new();
    }

    let Some(first) = lines.map(str::trim).find(|line| !line.is_empty()) else {
        return Vec::new();
    };
    if first.starts_with('#') {
        return Vec::new();
    }

    let mut deps = Vec::new();
    for token in first.split(',') {
        let token = token.trim().trim_start_matches(['-', '*']).trim();
        let token = token.trim_matches('`');
        if let Some(id) = TaskId::parse(token)
            && !deps.contains(&id)
        {
            deps.push(id);
        }
    }
    deps
}

fn is_dependencies_heading(line: &str) -> bool {
    let Some(rest) = line.trim().strip_prefix("## ") else {
        return false;
    };
    rest.trim().eq_ignore_ascii_case("dependencies")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(deps: &[TaskId]) -> Vec<&str> {
        deps.iter().map(TaskId::as_str).collect()
    }

    #[test]
    fn reads_comma_separated_ids() {
        let plan = "# Task\n\n## Dependencies\n01, 02 ,0a\n\n## Steps\n- do it\n";
        assert_eq!(ids(&parse_dependencies(plan)), vec!["01", "02", "0a"]);
    }

    #[test]
    fn skips_blank_lines_before_first_content_line() {
        let plan = "## Dependencies\n\n\n03\n04\n";
        assert_eq!(ids(&parse_dependencies(plan)), vec!["03"]);
    }

    #[test]
    fn missing_section_has_no_dependencies() {
        assert!(parse_dependencies("# Task\n## Steps\n01, 02\n").is_empty());
    }

    #[test]
    fn invalid_tokens_are_dropped() {
        let plan = "## Dependencies\n01, task-two, 3, `02`, none, 001\n";
        assert_eq!(ids(&parse_dependencies(plan)), vec!["01", "02"]);
    }

    #[test]
    fn none_or_next_heading_means_no_dependencies() {
        assert!(parse_dependencies("## Dependencies\nNone\n").is_empty());
        assert!(parse_dependencies("## Dependencies\n\n## Steps\n01\n").is_empty());
    }

    #[test]
    fn heading_is_case_insensitive() {
        let plan = "## dependencies\n01\n";
        assert_eq!(ids(&parse_dependencies(plan)), vec!["01"]);
    }
}
