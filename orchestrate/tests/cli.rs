//! CLI tests: spawn the binary inside a fresh workspace and check output and
//! exit codes.

use std::path::Path;
use std::process::{Command, Output};

use orchestrate::exit_codes;
use orchestrate::test_support::TestRemote;

fn orchestrate(cwd: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_orchestrate"))
        .current_dir(cwd)
        .args(args)
        .output()
        .expect("spawn orchestrate")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

#[test]
fn next_on_empty_queue_exits_with_no_task_code() {
    let remote = TestRemote::new();
    let workspace = remote.workspace("alpha");

    let output = orchestrate(workspace.root(), &["next"]);
    assert_eq!(output.status.code(), Some(exit_codes::NO_TASK));
    assert_eq!(stdout(&output), "No eligible tasks to claim.");
}

#[test]
fn add_and_list_from_a_subdirectory() {
    let remote = TestRemote::new();
    let workspace = remote.workspace("alpha");
    let nested = workspace.root().join(".orchestrate").join("logs");

    let output = orchestrate(&nested, &["task", "add", "Write docs", "--priority", "3"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert_eq!(stdout(&output), "Added task 1");

    let output = orchestrate(&nested, &["task", "add", "Publish", "--deps", "1"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));

    let output = orchestrate(workspace.root(), &["list"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert_eq!(
        stdout(&output),
        "[1] todo p3 Write docs ready\n[2] todo p0 Publish waiting deps:1"
    );
}

#[test]
fn outside_a_workspace_fails_with_invalid_code() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = orchestrate(temp.path(), &["list"]);
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    assert!(!output.stderr.is_empty());
}

#[test]
fn unknown_status_is_rejected_by_the_parser() {
    let remote = TestRemote::new();
    let workspace = remote.workspace("alpha");
    let output = orchestrate(workspace.root(), &["task", "status", "1", "finished"]);
    assert_ne!(output.status.code(), Some(exit_codes::OK));
}
