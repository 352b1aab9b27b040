//! CLI tests for `raf status`, `raf list`, and `raf do`.
//!
//! Spawns the raf binary inside a throwaway repository with an isolated
//! `HOME` and config file, and checks output and exit codes.

use std::path::Path;
use std::process::{Command, Output};

use raf::exit_codes;
use raf::io::config::{AgentConfig, RafConfig, write_config};
use raf::test_support::{TestRepo, TestProject};
use serde_json::Value;

const FOLDER: &str = "a1b2c3-demo";

fn raf(repo: &TestRepo, home: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_raf"))
        .current_dir(repo.path())
        .env("HOME", home)
        .env("RAF_CONFIG", home.join("config.toml"))
        .env_remove("RUST_LOG")
        .args(args)
        .output()
        .expect("spawn raf")
}

fn two_task_project(repo: &TestRepo) -> TestProject {
    let project = repo.project(FOLDER);
    project.write_plan("01-first.md", "# First\n").expect("plan 01");
    project
        .write_plan("02-second.md", "# Second\n\n## Dependencies\n01, 07\n")
        .expect("plan 02");
    repo.commit_all("chore: plan demo").expect("commit");
    project
}

/// Config whose agent is a shell script; the prompt arrives on stdin.
fn write_agent_config(home: &Path, script: &str) {
    let config = RafConfig {
        max_retries: 2,
        timeout_minutes: 1,
        agent: AgentConfig {
            command: vec!["sh".into(), "-c".into(), script.into()],
            ..AgentConfig::default()
        },
        ..RafConfig::default()
    };
    write_config(&home.join("config.toml"), &config).expect("write config");
}

#[test]
fn status_json_reports_derived_state() {
    let repo = TestRepo::new().expect("repo");
    let home = tempfile::tempdir().expect("home");
    let project = two_task_project(&repo);
    project
        .write_outcome("01-first.md", "done\n<promise>COMPLETE</promise>\n")
        .expect("outcome");

    let output = raf(&repo, home.path(), &["status", "a1b2c3", "--json"]);

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let report: Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(report["project"], FOLDER);
    assert_eq!(report["status"], "executing");
    assert_eq!(report["next"], "02");
    assert_eq!(report["tasks"][0]["status"], "completed");
    assert_eq!(report["tasks"][1]["status"], "pending");
    assert_eq!(report["stats"]["completed"], 1);
    assert_eq!(report["stats"]["total"], 2);
    let warnings = report["warnings"].as_array().expect("warnings");
    assert_eq!(warnings.len(), 1);
    assert!(
        warnings[0]
            .as_str()
            .is_some_and(|w| w.contains("unknown task 07"))
    );
}

#[test]
fn status_text_resolves_by_slug() {
    let repo = TestRepo::new().expect("repo");
    let home = tempfile::tempdir().expect("home");
    two_task_project(&repo);

    let output = raf(&repo, home.path(), &["status", "demo"]);

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("a1b2c3-demo: ready"));
    assert!(stdout.contains("next: 01"));
}

#[test]
fn unknown_project_is_invalid() {
    let repo = TestRepo::new().expect("repo");
    let home = tempfile::tempdir().expect("home");

    let output = raf(&repo, home.path(), &["status", "nope"]);

    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&output.stderr).contains("no project matching 'nope'"));
}

#[test]
fn do_completes_project_with_command_agent() {
    let repo = TestRepo::new().expect("repo");
    let home = tempfile::tempdir().expect("home");
    let project = two_task_project(&repo);
    write_agent_config(
        home.path(),
        "cat >/dev/null; echo work >> work.txt; echo finished; echo '<promise>COMPLETE</promise>'",
    );

    let output = raf(&repo, home.path(), &["do", "a1b2c3"]);

    assert_eq!(
        output.status.code(),
        Some(exit_codes::OK),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(project.dir().join("outcomes/01-first.md").is_file());
    assert!(project.dir().join("outcomes/02-second.md").is_file());
    assert_eq!(
        repo.log_subjects(4).expect("log"),
        vec![
            "RAF[a1b2c3:02] Outcome: COMPLETE",
            "RAF[a1b2c3:02] second",
            "RAF[a1b2c3:01] Outcome: COMPLETE",
            "RAF[a1b2c3:01] first",
        ]
    );
    assert!(home.path().join(".raf/logs").join(FOLDER).is_dir());
}

#[test]
fn do_exits_with_failed_code_on_terminal_failure() {
    let repo = TestRepo::new().expect("repo");
    let home = tempfile::tempdir().expect("home");
    let project = two_task_project(&repo);
    write_agent_config(
        home.path(),
        "cat >/dev/null; echo 'Retryable: no'; echo '<promise>FAILED</promise>'",
    );

    let output = raf(&repo, home.path(), &["do", "a1b2c3"]);

    assert_eq!(output.status.code(), Some(exit_codes::FAILED));
    let outcome =
        std::fs::read_to_string(project.dir().join("outcomes/01-first.md")).expect("outcome");
    assert!(outcome.trim_end().ends_with("<promise>FAILED</promise>"));
    assert!(!project.dir().join("outcomes/02-second.md").exists());
}

#[test]
fn do_worktree_merge_removes_the_worktree_and_keeps_the_branch() {
    let repo = TestRepo::new().expect("repo");
    let home = tempfile::tempdir().expect("home");
    two_task_project(&repo);
    let config = RafConfig {
        max_retries: 1,
        timeout_minutes: 1,
        worktree_root: Some(repo.worktree_root()),
        main_branch: Some("main".to_string()),
        sync_main_branch: false,
        agent: AgentConfig {
            command: vec![
                "sh".into(),
                "-c".into(),
                "cat >/dev/null; echo work >> work.txt; echo '<promise>COMPLETE</promise>'".into(),
            ],
            ..AgentConfig::default()
        },
        ..RafConfig::default()
    };
    write_config(&home.path().join("config.toml"), &config).expect("write config");

    let output = raf(&repo, home.path(), &["do", "a1b2c3", "--worktree", "--merge"]);

    assert_eq!(
        output.status.code(),
        Some(exit_codes::OK),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let worktree = repo.worktree_root().join("repo").join(FOLDER);
    assert!(!worktree.exists());
    assert!(String::from_utf8_lossy(&output.stdout).contains("removed worktree"));
    assert!(repo.path().join("work.txt").is_file());
    let branches = repo.git(&["branch", "--list", FOLDER]).expect("branches");
    assert!(branches.contains(FOLDER));
    let worktrees = repo.git(&["worktree", "list"]).expect("worktree list");
    assert_eq!(worktrees.lines().count(), 1);
}

#[test]
fn list_shows_projects() {
    let repo = TestRepo::new().expect("repo");
    let home = tempfile::tempdir().expect("home");
    two_task_project(&repo);

    let output = raf(&repo, home.path(), &["list"]);

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains(FOLDER));
    assert!(stdout.contains("0/2 completed"));
}
