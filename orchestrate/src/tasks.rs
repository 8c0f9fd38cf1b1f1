//! Task queue commands: add, delete, remove worktree, set status, list.

use anyhow::Result;
use tracing::{info, warn};

use crate::core::mutations::{add_task, clear_worktree, delete_task, set_status};
use crate::core::scheduler::{is_ready, sort_for_display};
use crate::core::types::{NewTask, Task, TaskStatus, TasksFile};
use crate::error::OrchestrateError;
use crate::io::clock::now_rfc3339;
use crate::io::git::Git;
use crate::io::paths::ProjectPaths;
use crate::io::state_store::StateStore;

/// Add a task; returns its id.
pub fn add<S: StateStore>(store: &S, input: &NewTask) -> Result<u64> {
    let mut added = 0;
    store.update("Add task", |mut state| {
        added = add_task(&mut state.tasks, input, &now_rfc3339())?;
        Ok(state)
    })?;
    info!(task_id = added, "task added");
    Ok(added)
}

/// Delete a task nobody depends on, removing its worktree if it has one.
pub fn delete<S: StateStore>(store: &S, paths: &ProjectPaths, id: u64) -> Result<Task> {
    let mut removed = None;
    store.update("Delete task", |mut state| {
        removed = Some(delete_task(&mut state.tasks, id)?);
        Ok(state)
    })?;
    let removed = removed.ok_or(OrchestrateError::TaskNotFound { id })?;
    if let Some(worktree) = &removed.worktree {
        remove_worktree_dir(paths, worktree)?;
    }
    Ok(removed)
}

/// Forget a task's worktree (the branch stays) and delete the directory.
pub fn remove_worktree<S: StateStore>(store: &S, paths: &ProjectPaths, id: u64) -> Result<String> {
    let mut cleared = String::new();
    store.update("Remove task worktree", |mut state| {
        cleared = clear_worktree(&mut state.tasks, id, &now_rfc3339())?;
        Ok(state)
    })?;
    remove_worktree_dir(paths, &cleared)?;
    Ok(cleared)
}

/// Move a task to `status`.
pub fn update_status<S: StateStore>(store: &S, id: u64, status: TaskStatus) -> Result<bool> {
    let outcome = store.update("Set task status", |mut state| {
        set_status(&mut state.tasks, id, status, &now_rfc3339())?;
        Ok(state)
    })?;
    Ok(outcome.changed)
}

fn remove_worktree_dir(paths: &ProjectPaths, worktree: &str) -> Result<()> {
    let path = paths.worktree_path(worktree)?;
    if !path.exists() {
        warn!(path = %path.display(), "worktree directory already gone");
        return Git::bare(&paths.bare_dir).worktree_prune();
    }
    Git::bare(&paths.bare_dir).worktree_remove(&path)
}

/// One line per task in display order, or `No tasks yet.`.
pub fn format_task_list(file: &TasksFile) -> String {
    if file.tasks.is_empty() {
        return "No tasks yet.".to_string();
    }
    sort_for_display(file)
        .into_iter()
        .map(|task| format_task_line(task, file))
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_task_line(task: &Task, file: &TasksFile) -> String {
    let mut line = format!("[{}] {} p{} {}", task.id, task.status, task.priority, task.title);
    if task.status == TaskStatus::Todo {
        line.push_str(if is_ready(task, file) { " ready" } else { " waiting" });
    }
    if !task.deps.is_empty() {
        let deps: Vec<String> = task.deps.iter().map(u64::to_string).collect();
        line.push_str(&format!(" deps:{}", deps.join(",")));
    }
    if let Some(owner) = &task.owner {
        line.push_str(&format!(" owner:{owner}"));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MemoryStateStore, task, task_with_deps, tasks_file};

    #[test]
    fn add_then_delete_round_trip() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = ProjectPaths::new(temp.path());
        let store = MemoryStateStore::new(TasksFile::default());

        let first = add(
            &store,
            &NewTask {
                title: "First".to_string(),
                ..NewTask::default()
            },
        )
        .expect("add first");
        let second = add(
            &store,
            &NewTask {
                title: "Second".to_string(),
                deps: vec![first],
                ..NewTask::default()
            },
        )
        .expect("add second");
        assert_eq!((first, second), (1, 2));

        let err = delete(&store, &paths, 1).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<OrchestrateError>(),
            Some(OrchestrateError::DependencyInUse { id: 1, .. })
        ));
        assert_eq!(store.snapshot().tasks.tasks.len(), 2);
        assert_eq!(store.commits(), 2);

        delete(&store, &paths, 2).expect("delete dependent");
        delete(&store, &paths, 1).expect("delete dependency");
        let state = store.snapshot();
        assert!(state.tasks.tasks.is_empty());
        assert_eq!(state.tasks.last_id, 2);
    }

    #[test]
    fn status_update_reports_change() {
        let store = MemoryStateStore::new(tasks_file(vec![task(1, "A", 0)]));
        assert!(update_status(&store, 1, TaskStatus::Done).expect("done"));
        assert!(!update_status(&store, 1, TaskStatus::Done).expect("again"));
        let err = update_status(&store, 9, TaskStatus::Done).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<OrchestrateError>(),
            Some(OrchestrateError::TaskNotFound { id: 9 })
        ));
    }

    #[test]
    fn list_shows_readiness_deps_and_owner() {
        let mut claimed = task(3, "Claimed", 0);
        claimed.status = TaskStatus::InProgress;
        claimed.owner = Some("dev@host".to_string());
        let file = tasks_file(vec![
            task(1, "Base", 2),
            task_with_deps(2, "After base", &[1]),
            claimed,
        ]);

        assert_eq!(
            format_task_list(&file),
            "[3] in_progress p0 Claimed owner:dev@host\n\
             [1] todo p2 Base ready\n\
             [2] todo p0 After base waiting deps:1"
        );
        assert_eq!(format_task_list(&TasksFile::default()), "No tasks yet.");
    }
}
