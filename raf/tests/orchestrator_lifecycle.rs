//! Run-level tests for the task orchestrator against a real git repository.
//!
//! Each test drives `run_project` with a scripted agent and checks the
//! resulting outcome files, commits, and stashes.

use std::cell::Cell;
use std::fs;
use std::time::Duration;

use raf::core::selector::next_executable_task;
use raf::core::types::{ProjectStatus, TaskStatus};
use raf::execute::{RunConfig, run_project};
use raf::io::context::ExecContext;
use raf::io::project::derive_project_state;
use raf::io::prompt::{DEFAULT_PROMPT_BUDGET_BYTES, TemplatePromptBuilder};
use raf::test_support::{ScriptedAgent, TestProject, TestRepo, complete_run, failed_run};

const FOLDER: &str = "a1b2c3-demo";
const PROJECT_REL: &str = "RAF/a1b2c3-demo";

fn run_config() -> RunConfig {
    RunConfig {
        max_retries: 3,
        attempt_timeout: Duration::from_secs(60),
        auto_commit: true,
        summary_limit_bytes: 2_000,
        log_dir: None,
    }
}

/// Three tasks: `01`, `02` (after `01`), `03` (after `01` and `02`).
fn chain_project(repo: &TestRepo) -> TestProject {
    let project = repo.project(FOLDER);
    project.write_input("Build a small service.\n").expect("input");
    project
        .write_plan("01-setup-db.md", "# Set up the database\n")
        .expect("plan 01");
    project
        .write_plan("02-add-api.md", "# Add the API\n\n## Dependencies\n01\n")
        .expect("plan 02");
    project
        .write_plan("03-wire-ui.md", "# Wire the UI\n\n## Dependencies\n01, 02\n")
        .expect("plan 03");
    repo.commit_all("chore: plan demo").expect("commit plans");
    project
}

/// Each agent call writes `work/<n>.txt` into the working directory.
fn writing_agent(runs: Vec<raf::core::types::AgentRun>) -> ScriptedAgent {
    let calls = Cell::new(0usize);
    ScriptedAgent::new(runs).with_effect(move |request| {
        let n = calls.get();
        calls.set(n + 1);
        let dir = request.workdir.join("work");
        fs::create_dir_all(&dir).expect("work dir");
        fs::write(dir.join(format!("{n}.txt")), format!("call {n}\n")).expect("work file");
    })
}

/// Full lifecycle: a retried first task, then two dependents, ending complete.
///
/// Execution sequence:
/// 1. `01` reports a retryable FAILED, then COMPLETE on attempt 2
/// 2. `02` completes on attempt 1
/// 3. `03` completes on attempt 1
///
/// Every task produces a change commit followed by an outcome commit.
#[test]
fn chain_completes_with_task_and_outcome_commits() {
    let repo = TestRepo::new().expect("repo");
    let project = chain_project(&repo);
    let agent = writing_agent(vec![
        failed_run("tests failed", true),
        complete_run("database ready"),
        complete_run("api added"),
        complete_run("ui wired"),
    ]);
    let prompts = TemplatePromptBuilder::new(DEFAULT_PROMPT_BUDGET_BYTES).expect("prompts");

    let outcome = run_project(
        &ExecContext::detached(),
        repo.path(),
        project.dir(),
        &agent,
        &prompts,
        &run_config(),
        |_| {},
    )
    .expect("run");

    assert_eq!(outcome.status, ProjectStatus::Completed);
    assert!(!outcome.interrupted);
    let attempts: Vec<u32> = outcome.reports.iter().map(|r| r.attempts).collect();
    assert_eq!(attempts, vec![2, 1, 1]);

    assert_eq!(
        repo.log_subjects(6).expect("log"),
        vec![
            "RAF[a1b2c3:03] Outcome: COMPLETE",
            "RAF[a1b2c3:03] wire ui",
            "RAF[a1b2c3:02] Outcome: COMPLETE",
            "RAF[a1b2c3:02] add api",
            "RAF[a1b2c3:01] Outcome: COMPLETE",
            "RAF[a1b2c3:01] setup db",
        ]
    );
    assert_eq!(
        repo.files_in_commit("HEAD").expect("files"),
        vec![format!("{PROJECT_REL}/outcomes/03-wire-ui.md")]
    );
    // Both attempts of task 01 wrote a file; the task commit carries both.
    assert_eq!(
        repo.files_in_commit("HEAD~5").expect("files"),
        vec!["work/0.txt".to_string(), "work/1.txt".to_string()]
    );
    assert!(repo.status_lines().expect("status").is_empty());

    let outcome_text =
        fs::read_to_string(project.dir().join("outcomes/01-setup-db.md")).expect("outcome");
    assert!(outcome_text.contains("database ready"));
    assert!(outcome_text.trim_end().ends_with("<promise>COMPLETE</promise>"));

    let state = derive_project_state(project.dir()).expect("derive");
    assert!(state.tasks.iter().all(|t| t.status == TaskStatus::Completed));
    assert!(next_executable_task(&state).is_none());
}

/// A terminal failure stashes the task's leftovers and blocks dependents;
/// the next run picks the failed task up again and finishes the project.
#[test]
fn failed_task_blocks_dependents_until_next_run() {
    let repo = TestRepo::new().expect("repo");
    let project = chain_project(&repo);
    let prompts = TemplatePromptBuilder::new(DEFAULT_PROMPT_BUDGET_BYTES).expect("prompts");

    let first = writing_agent(vec![failed_run("database is unreachable", false)]);
    let outcome = run_project(
        &ExecContext::detached(),
        repo.path(),
        project.dir(),
        &first,
        &prompts,
        &run_config(),
        |_| {},
    )
    .expect("first run");

    assert_eq!(outcome.status, ProjectStatus::Failed);
    assert_eq!(outcome.reports.len(), 1);
    let report = &outcome.reports[0];
    assert_eq!(report.status, TaskStatus::Failed);
    assert_eq!(report.stash.as_deref(), Some("raf-a1b2c3-task-01-failed"));
    assert!(
        repo.git(&["stash", "list"])
            .expect("stash list")
            .contains("raf-a1b2c3-task-01-failed")
    );
    assert_eq!(
        repo.log_subjects(1).expect("log"),
        vec!["RAF[a1b2c3:01] Outcome: FAILED"]
    );
    assert!(repo.status_lines().expect("status").is_empty());

    let state = derive_project_state(project.dir()).expect("derive");
    let statuses: Vec<TaskStatus> = state.tasks.iter().map(|t| t.status).collect();
    assert_eq!(
        statuses,
        vec![TaskStatus::Failed, TaskStatus::Blocked, TaskStatus::Blocked]
    );

    let second = writing_agent(vec![
        complete_run("database ready"),
        complete_run("api added"),
        complete_run("ui wired"),
    ]);
    let outcome = run_project(
        &ExecContext::detached(),
        repo.path(),
        project.dir(),
        &second,
        &prompts,
        &run_config(),
        |_| {},
    )
    .expect("second run");

    assert_eq!(outcome.status, ProjectStatus::Completed);
    assert_eq!(outcome.reports.len(), 3);
    let outcome_text =
        fs::read_to_string(project.dir().join("outcomes/01-setup-db.md")).expect("outcome");
    assert!(outcome_text.trim_end().ends_with("<promise>COMPLETE</promise>"));
}

#[test]
fn user_changes_present_before_the_run_stay_uncommitted() {
    let repo = TestRepo::new().expect("repo");
    let project = repo.project(FOLDER);
    project.write_plan("01-only.md", "# Only task\n").expect("plan");
    repo.commit_all("chore: plan").expect("commit");
    fs::write(repo.path().join("notes.txt"), "mine\n").expect("user file");

    let agent = writing_agent(vec![complete_run("done")]);
    let prompts = TemplatePromptBuilder::new(DEFAULT_PROMPT_BUDGET_BYTES).expect("prompts");
    run_project(
        &ExecContext::detached(),
        repo.path(),
        project.dir(),
        &agent,
        &prompts,
        &run_config(),
        |_| {},
    )
    .expect("run");

    assert_eq!(
        repo.files_in_commit("HEAD~1").expect("files"),
        vec!["work/0.txt".to_string()]
    );
    assert_eq!(repo.status_lines().expect("status"), vec!["?? notes.txt"]);
}

#[test]
fn derivation_scenarios_from_outcome_files() {
    let repo = TestRepo::new().expect("repo");
    let project = chain_project(&repo);

    project
        .write_outcome("01-setup-db.md", "no luck\n<promise>FAILED</promise>\n")
        .expect("outcome 01");
    let state = derive_project_state(project.dir()).expect("derive");
    let statuses: Vec<TaskStatus> = state.tasks.iter().map(|t| t.status).collect();
    assert_eq!(
        statuses,
        vec![TaskStatus::Failed, TaskStatus::Blocked, TaskStatus::Blocked]
    );
    assert_eq!(
        next_executable_task(&state).map(|t| t.id.to_string()),
        Some("01".to_string())
    );

    project
        .write_outcome("01-setup-db.md", "done\n<promise>COMPLETE</promise>\n")
        .expect("outcome 01");
    project
        .write_outcome("02-add-api.md", "done\n<promise>COMPLETE</promise>\n")
        .expect("outcome 02");
    let state = derive_project_state(project.dir()).expect("derive");
    let statuses: Vec<TaskStatus> = state.tasks.iter().map(|t| t.status).collect();
    assert_eq!(
        statuses,
        vec![TaskStatus::Completed, TaskStatus::Completed, TaskStatus::Pending]
    );
    assert_eq!(
        next_executable_task(&state).map(|t| t.id.to_string()),
        Some("03".to_string())
    );
    assert_eq!(state, derive_project_state(project.dir()).expect("derive again"));
}
