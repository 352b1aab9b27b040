//! Execution prompt builder.
//!
//! Prompts are rendered from an embedded minijinja template whose sections
//! carry `<!-- section:KEY required|droppable -->` markers. When the rendered
//! prompt exceeds its byte budget, droppable sections go first.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::core::types::TaskId;

const TASK_TEMPLATE: &str = include_str!("prompts/task.md");

/// Prompts larger than this lose their droppable sections.
pub const DEFAULT_PROMPT_BUDGET_BYTES: usize = 200_000;

/// Outcome text of another task.
#[derive(Debug, Clone, Serialize)]
pub struct OutcomeExcerpt {
    pub task_id: TaskId,
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskContext {
    pub id: TaskId,
    pub name: String,
}

/// Everything the execution prompt is built from.
#[derive(Debug, Clone)]
pub struct PromptInputs {
    /// Project folder name, e.g. `a1b2c3-auth-flow`.
    pub project: String,
    pub task: TaskContext,
    pub plan_text: String,
    /// Project `input.md`, when present.
    pub input_text: Option<String>,
    /// Outcomes of every completed task, in id order.
    pub prior_outcomes: Vec<OutcomeExcerpt>,
    /// Outcomes of the task's direct dependencies.
    pub dependency_outcomes: Vec<OutcomeExcerpt>,
    /// Path of the outcome file, relative to the repository.
    pub outcome_path: String,
}

pub trait PromptBuilder {
    fn build(&self, inputs: &PromptInputs) -> Result<String>;
}

/// Default builder rendering the embedded task template.
#[derive(Debug)]
pub struct TemplatePromptBuilder {
    env: Environment<'static>,
    budget_bytes: usize,
}

impl TemplatePromptBuilder {
    pub fn new(budget_bytes: usize) -> Result<Self> {
        let mut env = Environment::new();
        env.add_template("task", TASK_TEMPLATE)
            .context("load task prompt template")?;
        Ok(Self { env, budget_bytes })
    }
}

impl PromptBuilder for TemplatePromptBuilder {
    fn build(&self, inputs: &PromptInputs) -> Result<String> {
        let template = self.env.get_template("task")?;
        let rendered = template
            .render(context! {
                project => &inputs.project,
                task => &inputs.task,
                plan => inputs.plan_text.trim(),
                input => inputs.input_text.as_deref().map(str::trim).filter(|s| !s.is_empty()),
                prior_outcomes => &inputs.prior_outcomes,
                dependency_outcomes => &inputs.dependency_outcomes,
                outcome_path => &inputs.outcome_path,
            })
            .context("render task prompt")?;

        let mut sections = parse_sections(&rendered);
        apply_budget(&mut sections, self.budget_bytes);
        Ok(render_sections(&sections))
    }
}

#[derive(Debug, Clone)]
struct Section {
    key: String,
    required: bool,
    content: String,
}

static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->").expect("valid regex")
});

fn parse_sections(rendered: &str) -> Vec<Section> {
    let markers: Vec<_> = SECTION_RE.captures_iter(rendered).collect();
    let mut sections = Vec::with_capacity(markers.len());

    for (i, caps) in markers.iter().enumerate() {
        let (Some(whole), Some(key), Some(kind)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let end = markers
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(rendered.len(), |m| m.start());
        let content = rendered[whole.end()..end].trim().to_string();
        let required = kind.as_str() == "required";
        if !content.is_empty() || required {
            sections.push(Section {
                key: key.as_str().to_string(),
                required,
                content,
            });
        }
    }
    sections
}

/// Drop order: completed-task history, project input, dependency outcomes.
fn apply_budget(sections: &mut Vec<Section>, budget: usize) {
    let total = |secs: &[Section]| -> usize { secs.iter().map(|s| s.content.len()).sum() };

    for key in ["history", "input", "dependencies"] {
        if total(sections) <= budget {
            return;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == key && !s.required) {
            debug!(
                section = key,
                bytes_dropped = sections[idx].content.len(),
                "dropped prompt section for budget"
            );
            sections.remove(idx);
        }
    }
    if total(sections) > budget {
        debug!(
            bytes = total(sections),
            budget, "prompt still over budget after dropping optional sections"
        );
    }
}

fn render_sections(sections: &[Section]) -> String {
    let mut out = sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    out.push('\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> TaskId {
        TaskId::parse(s).expect("task id")
    }

    fn inputs() -> PromptInputs {
        PromptInputs {
            project: "a1b2c3-auth".to_string(),
            task: TaskContext {
                id: id("03"),
                name: "wire-login".to_string(),
            },
            plan_text: "Add the login route.\n".to_string(),
            input_text: Some("Build auth.".to_string()),
            prior_outcomes: vec![OutcomeExcerpt {
                task_id: id("01"),
                text: "made the user table".to_string(),
            }],
            dependency_outcomes: vec![OutcomeExcerpt {
                task_id: id("02"),
                text: "added sessions".to_string(),
            }],
            outcome_path: "RAF/a1b2c3-auth/outcomes/03-wire-login.md".to_string(),
        }
    }

    #[test]
    fn renders_sections_in_order() {
        let builder = TemplatePromptBuilder::new(DEFAULT_PROMPT_BUDGET_BYTES).expect("builder");
        let prompt = builder.build(&inputs()).expect("build");

        let contract = prompt.find("### Task Contract").expect("contract");
        let plan = prompt.find("### Plan: 03 wire-login").expect("plan");
        let deps = prompt.find("### Dependency Outcomes").expect("deps");
        let input = prompt.find("### Project Input").expect("input");
        let history = prompt.find("### Completed Tasks").expect("history");
        assert!(contract < plan && plan < deps && deps < input && input < history);
        assert!(prompt.contains("<promise>COMPLETE</promise>"));
        assert!(prompt.contains("RAF/a1b2c3-auth/outcomes/03-wire-login.md"));
        assert!(prompt.contains("<outcome task=\"02\">"));
        assert!(!prompt.contains("section:"));
    }

    #[test]
    fn empty_optional_sections_are_omitted() {
        let builder = TemplatePromptBuilder::new(DEFAULT_PROMPT_BUDGET_BYTES).expect("builder");
        let mut bare = inputs();
        bare.input_text = None;
        bare.prior_outcomes.clear();
        bare.dependency_outcomes.clear();
        let prompt = builder.build(&bare).expect("build");
        assert!(!prompt.contains("### Completed Tasks"));
        assert!(!prompt.contains("### Project Input"));
        assert!(!prompt.contains("### Dependency Outcomes"));
        assert!(prompt.contains("Add the login route."));
    }

    #[test]
    fn tight_budget_drops_history_before_dependencies() {
        let mut big = inputs();
        big.prior_outcomes[0].text = "history ".repeat(500);
        let full = TemplatePromptBuilder::new(DEFAULT_PROMPT_BUDGET_BYTES)
            .expect("builder")
            .build(&big)
            .expect("build");
        let budget = full.len() - 1000;
        let prompt = TemplatePromptBuilder::new(budget)
            .expect("builder")
            .build(&big)
            .expect("build");
        assert!(!prompt.contains("### Completed Tasks"));
        assert!(prompt.contains("### Project Input"));
        assert!(prompt.contains("### Dependency Outcomes"));
        assert!(prompt.contains("### Task Contract"));
    }
}
