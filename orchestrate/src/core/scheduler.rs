//! Deterministic task selection and ordering.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::{Task, TaskStatus, TasksFile};

const SLUG_MAX_CHARS: usize = 48;

static NON_ALNUM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("[^a-z0-9]+").expect("slug pattern should be valid"));

/// A task is ready when it is `todo` and every dependency is `done`.
///
/// Unknown dependency ids count as not done.
pub fn is_ready(task: &Task, file: &TasksFile) -> bool {
    if task.status != TaskStatus::Todo {
        return false;
    }
    if task.deps.is_empty() {
        return true;
    }
    let by_id = index_by_id(file);
    deps_done(task, &by_id)
}

/// Pick the ready task with the highest priority, breaking ties by lowest id.
pub fn select_next(file: &TasksFile) -> Option<&Task> {
    let by_id = index_by_id(file);
    file.tasks
        .iter()
        .filter(|task| task.status == TaskStatus::Todo && deps_done(task, &by_id))
        .min_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)))
}

/// Order tasks for listing: in_progress, todo (ready before waiting), blocked, done.
///
/// Remaining ties break by descending priority, then ascending id.
pub fn sort_for_display(file: &TasksFile) -> Vec<&Task> {
    let by_id = index_by_id(file);
    let mut tasks: Vec<&Task> = file.tasks.iter().collect();
    tasks.sort_by(|a, b| display_order(a, b, &by_id));
    tasks
}

/// Human-readable slug for branch names.
pub fn slugify(title: &str) -> String {
    let lowered = title.to_lowercase();
    let collapsed = NON_ALNUM.replace_all(&lowered, "-");
    let slug: String = collapsed
        .trim_matches('-')
        .chars()
        .take(SLUG_MAX_CHARS)
        .collect();
    if slug.is_empty() {
        "task".to_string()
    } else {
        slug
    }
}

/// Work branch allocated when a task is claimed.
pub fn branch_name(task: &Task) -> String {
    format!("task/{}-{}", task.id, slugify(&task.title))
}

/// Worktree directory allocated when a task is claimed.
pub fn worktree_name(id: u64) -> String {
    format!("task-{id}")
}

fn index_by_id(file: &TasksFile) -> HashMap<u64, &Task> {
    file.tasks.iter().map(|task| (task.id, task)).collect()
}

fn deps_done(task: &Task, by_id: &HashMap<u64, &Task>) -> bool {
    task.deps.iter().all(|dep| {
        by_id
            .get(dep)
            .is_some_and(|found| found.status == TaskStatus::Done)
    })
}

fn display_order(a: &Task, b: &Task, by_id: &HashMap<u64, &Task>) -> Ordering {
    a.status
        .display_rank()
        .cmp(&b.status.display_rank())
        .then_with(|| {
            if a.status == TaskStatus::Todo && b.status == TaskStatus::Todo {
                // `true` (waiting) sorts after `false` (ready).
                let waiting_a = !deps_done(a, by_id);
                let waiting_b = !deps_done(b, by_id);
                waiting_a.cmp(&waiting_b)
            } else {
                Ordering::Equal
            }
        })
        .then_with(|| b.priority.cmp(&a.priority))
        .then_with(|| a.id.cmp(&b.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{task, task_with_deps, tasks_file};

    #[test]
    fn no_deps_ready_only_when_todo() {
        for (status, expected) in [
            (TaskStatus::Todo, true),
            (TaskStatus::InProgress, false),
            (TaskStatus::Done, false),
            (TaskStatus::Blocked, false),
        ] {
            let mut t = task(1, "A", 0);
            t.status = status;
            let file = tasks_file(vec![t.clone()]);
            assert_eq!(is_ready(&t, &file), expected, "status {status}");
        }
    }

    #[test]
    fn dependency_must_be_done() {
        for (dep_status, expected) in [
            (TaskStatus::Done, true),
            (TaskStatus::Todo, false),
            (TaskStatus::InProgress, false),
            (TaskStatus::Blocked, false),
        ] {
            let mut dep = task(1, "dep", 0);
            dep.status = dep_status;
            let child = task_with_deps(2, "child", &[1]);
            let file = tasks_file(vec![dep, child.clone()]);
            assert_eq!(is_ready(&child, &file), expected, "dep status {dep_status}");
        }
    }

    #[test]
    fn missing_dependency_is_not_done() {
        let child = task_with_deps(2, "child", &[1]);
        let file = tasks_file(vec![child.clone()]);
        assert!(!is_ready(&child, &file));
    }

    #[test]
    fn select_prefers_priority_then_lowest_id() {
        let file = tasks_file(vec![task(1, "low", 0), task(2, "high", 5)]);
        assert_eq!(select_next(&file).map(|t| t.id), Some(2));

        let file = tasks_file(vec![task(3, "b", 1), task(2, "a", 1)]);
        assert_eq!(select_next(&file).map(|t| t.id), Some(2));
    }

    #[test]
    fn select_skips_waiting_tasks() {
        let mut dep = task(1, "dep", 0);
        dep.status = TaskStatus::InProgress;
        let mut waiting = task_with_deps(2, "waiting", &[1]);
        waiting.priority = 10;
        let file = tasks_file(vec![dep, waiting]);
        assert!(select_next(&file).is_none());
    }

    #[test]
    fn display_order_groups_by_status_and_readiness() {
        let mut done = task(1, "done", 9);
        done.status = TaskStatus::Done;
        let mut blocked = task(2, "blocked", 9);
        blocked.status = TaskStatus::Blocked;
        let mut active = task(3, "active", 0);
        active.status = TaskStatus::InProgress;
        let mut waiting = task_with_deps(4, "waiting", &[3]);
        waiting.priority = 100;
        let ready_low = task(5, "ready-low", 1);
        let ready_high = task(6, "ready-high", 2);

        let file = tasks_file(vec![done, blocked, active, waiting, ready_low, ready_high]);
        let ids: Vec<u64> = sort_for_display(&file).iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![3, 6, 5, 4, 2, 1]);
    }

    #[test]
    fn slugify_collapses_and_trims() {
        assert_eq!(slugify("  Fix: the Login Bug!! "), "fix-the-login-bug");
        assert_eq!(slugify("***"), "task");
        assert_eq!(slugify(""), "task");
        let long = "a".repeat(60);
        assert_eq!(slugify(&long).len(), 48);
    }

    #[test]
    fn derived_names_use_id_and_slug() {
        let t = task(7, "Add OAuth flow", 0);
        assert_eq!(branch_name(&t), "task/7-add-oauth-flow");
        assert_eq!(worktree_name(7), "task-7");
    }
}
