//! Git-backed state store tests against real temporary remotes.
//!
//! Each test builds a bare `origin.git` seeded with a `main` commit and one or
//! more workspaces cloned from it.

use std::sync::{Arc, Barrier};
use std::thread;

use orchestrate::core::mutations::add_task;
use orchestrate::core::types::NewTask;
use orchestrate::error::OrchestrateError;
use orchestrate::io::state_store::{MAX_UPDATE_ATTEMPTS, StateStore};
use orchestrate::tasks;
use orchestrate::test_support::{TEST_TIME, TestRemote, git};

fn new_task(title: &str, deps: &[u64]) -> NewTask {
    NewTask {
        title: title.to_string(),
        deps: deps.to_vec(),
        ..NewTask::default()
    }
}

#[test]
fn init_creates_state_branch_with_plan_and_tasks() {
    let remote = TestRemote::new();
    let workspace = remote.workspace("alpha");

    let files = git(
        remote.path().join("origin.git").as_path(),
        &["ls-tree", "--name-only", "refs/heads/orchestrate/state"],
    );
    let mut names: Vec<&str> = files.lines().collect();
    names.sort_unstable();
    assert_eq!(names, vec!["Plan.md", "tasks.json"]);
    assert_eq!(remote.commit_count("orchestrate/state"), 1);

    let state = workspace.store().read().expect("read state");
    assert!(state.tasks.tasks.is_empty());
    assert_eq!(state.tasks.last_id, 0);
    assert!(!state.plan.trim().is_empty());
    assert_eq!(workspace.config.default_branch, "main");
}

#[test]
fn update_without_changes_does_not_commit() {
    let remote = TestRemote::new();
    let workspace = remote.workspace("alpha");
    let before = remote.rev("orchestrate/state");

    let outcome = workspace
        .store()
        .update("Nothing", Ok)
        .expect("no-op update");

    assert!(!outcome.changed);
    assert_eq!(outcome.attempts, 1);
    assert_eq!(remote.rev("orchestrate/state"), before);
}

#[test]
fn updates_from_another_workspace_are_visible_after_fetch() {
    let remote = TestRemote::new();
    let alpha = remote.workspace("alpha");
    let beta = remote.workspace("beta");

    assert!(beta.store().read_fresh().expect("initial read").tasks.tasks.is_empty());
    tasks::add(&alpha.store(), &new_task("From alpha", &[])).expect("add");

    let state = beta.store().read_fresh().expect("read fresh");
    assert_eq!(state.tasks.tasks.len(), 1);
    assert_eq!(state.tasks.tasks[0].title, "From alpha");
    assert_eq!(remote.commit_count("orchestrate/state"), 2);

    tasks::add(&alpha.store(), &new_task("Second from alpha", &[])).expect("add again");
    let state = beta.store().read_fresh().expect("read fresh again");
    assert_eq!(state.tasks.tasks.len(), 2);
    assert_eq!(beta.store().read().expect("local read").tasks.tasks.len(), 2);
}

#[test]
fn concurrent_updates_converge_through_retry() {
    let remote = TestRemote::new();
    let workspaces = [remote.workspace("alpha"), remote.workspace("beta")];
    let barrier = Arc::new(Barrier::new(2));

    let handles: Vec<_> = workspaces
        .iter()
        .map(|workspace| {
            let store = workspace.store();
            let barrier = Arc::clone(&barrier);
            let title = format!("Task from {}", workspace.root().display());
            thread::spawn(move || {
                let mut first = true;
                store
                    .update("Add task", |mut state| {
                        if first {
                            first = false;
                            barrier.wait();
                        }
                        add_task(&mut state.tasks, &new_task(&title, &[]), TEST_TIME)?;
                        Ok(state)
                    })
                    .expect("update converges")
            })
        })
        .collect();
    let outcomes: Vec<_> = handles
        .into_iter()
        .map(|handle| handle.join().expect("join"))
        .collect();

    let attempts: u32 = outcomes.iter().map(|o| o.attempts).sum();
    assert_eq!(attempts, 3);
    assert!(outcomes.iter().all(|o| o.changed));

    let state = workspaces[0].store().read_fresh().expect("read fresh");
    assert_eq!(state.tasks.last_id, 2);
    let mut ids: Vec<u64> = state.tasks.tasks.iter().map(|t| t.id).collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![1, 2]);
    assert_eq!(remote.commit_count("orchestrate/state"), 3);
}

#[test]
fn failed_mutation_leaves_remote_untouched() {
    let remote = TestRemote::new();
    let workspace = remote.workspace("alpha");
    let store = workspace.store();

    tasks::add(&store, &new_task("Base", &[])).expect("add base");
    tasks::add(&store, &new_task("After base", &[1])).expect("add dependent");
    let before = remote.rev("orchestrate/state");

    let err = tasks::delete(&store, &workspace.paths, 1).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<OrchestrateError>(),
        Some(OrchestrateError::DependencyInUse { id: 1, .. })
    ));

    let err = tasks::add(&store, &new_task("Dangling", &[42])).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<OrchestrateError>(),
        Some(OrchestrateError::UnknownDependencies { .. })
    ));

    assert_eq!(remote.rev("orchestrate/state"), before);
    assert_eq!(store.read_fresh().expect("read").tasks.tasks.len(), 2);
}

#[test]
fn persistent_rejection_exhausts_retries() {
    let remote = TestRemote::new();
    let workspace = remote.workspace("alpha");
    remote.install_hook(
        "pre-receive",
        "#!/bin/sh\necho 'rejected: non-fast-forward' >&2\nexit 1\n",
    );
    let before = remote.rev("orchestrate/state");

    let mut calls = 0;
    let err = workspace
        .store()
        .update("Add task", |mut state| {
            calls += 1;
            add_task(&mut state.tasks, &new_task("Never lands", &[]), TEST_TIME)?;
            Ok(state)
        })
        .unwrap_err();

    assert!(matches!(
        err.downcast_ref::<OrchestrateError>(),
        Some(OrchestrateError::UpdateRetriesExhausted { attempts: 5, .. })
    ));
    assert_eq!(calls, MAX_UPDATE_ATTEMPTS);
    assert_eq!(remote.rev("orchestrate/state"), before);
}

#[test]
fn other_push_failures_are_fatal_without_retry() {
    let remote = TestRemote::new();
    let workspace = remote.workspace("alpha");
    remote.install_hook(
        "pre-receive",
        "#!/bin/sh\necho 'policy forbids state writes' >&2\nexit 1\n",
    );
    let before = remote.rev("orchestrate/state");

    let mut calls = 0;
    let err = workspace
        .store()
        .update("Add task", |mut state| {
            calls += 1;
            add_task(&mut state.tasks, &new_task("Never lands", &[]), TEST_TIME)?;
            Ok(state)
        })
        .unwrap_err();

    assert!(err.downcast_ref::<OrchestrateError>().is_none());
    assert!(format!("{err:#}").contains("policy forbids state writes"));
    assert_eq!(calls, 1);
    assert_eq!(remote.rev("orchestrate/state"), before);
}

#[test]
fn update_commits_only_the_files_it_changed() {
    let remote = TestRemote::new();
    let workspace = remote.workspace("alpha");

    tasks::add(&workspace.store(), &new_task("Only tasks change", &[])).expect("add");

    let changed = git(
        remote.path().join("origin.git").as_path(),
        &[
            "diff-tree",
            "--no-commit-id",
            "--name-only",
            "-r",
            "refs/heads/orchestrate/state",
        ],
    );
    assert_eq!(changed, "tasks.json");
}
