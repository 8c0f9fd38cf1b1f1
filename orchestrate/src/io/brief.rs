//! `TASK.md` brief written into each claimed worktree.

use anyhow::Result;
use minijinja::{Environment, context};
use serde::Serialize;

use crate::core::types::{Task, TasksFile};

const TASK_TEMPLATE: &str = include_str!("templates/task.md");

/// Plan written to the state branch at init.
pub const DEFAULT_PLAN: &str = include_str!("templates/plan.md");

pub const BRIEF_FILE: &str = "TASK.md";

#[derive(Debug, Serialize)]
struct DependencyContext {
    id: u64,
    title: Option<String>,
    status: String,
}

/// Render the brief for `task` with the current plan appended.
pub fn render_task_brief(task: &Task, plan: &str, file: &TasksFile) -> Result<String> {
    let deps: Vec<DependencyContext> = task
        .deps
        .iter()
        .map(|id| {
            let dep = file.get(*id);
            DependencyContext {
                id: *id,
                title: dep.map(|d| d.title.clone()),
                status: dep.map_or_else(|| "unknown".to_string(), |d| d.status.to_string()),
            }
        })
        .collect();
    let objective = task
        .description
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .unwrap_or("No description provided.");

    let mut env = Environment::new();
    env.add_template("task", TASK_TEMPLATE)?;
    let rendered = env.get_template("task")?.render(context! {
        id => task.id,
        title => &task.title,
        objective => objective,
        deps => deps,
        plan => plan.trim(),
    })?;

    let mut brief = rendered.trim_end().to_string();
    brief.push('\n');
    Ok(brief)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::TaskStatus;
    use crate::test_support::{task, task_with_deps, tasks_file};

    #[test]
    fn brief_lists_dependencies_and_plan() {
        let mut dep = task(1, "Schema", 0);
        dep.status = TaskStatus::Done;
        let mut current = task_with_deps(2, "Migrate", &[1, 9]);
        current.description = Some("  Move the data.  ".to_string());
        let file = tasks_file(vec![dep, current.clone()]);

        let brief = render_task_brief(&current, "\n# Plan\nbe careful\n\n", &file).expect("render");
        assert!(brief.starts_with("# Task 2: Migrate\n\n## Objective\nMove the data.\n"));
        assert!(brief.contains("## Dependencies\n- 1: Schema (done)\n- 9 (unknown)\n\n## Acceptance"));
        assert!(brief.contains("`orchestrate task status 2 done`"));
        assert!(brief.ends_with("---\n\n# Plan\nbe careful\n"));
    }

    #[test]
    fn brief_without_deps_or_description() {
        let current = task(5, "Solo", 0);
        let file = tasks_file(vec![current.clone()]);
        let brief = render_task_brief(&current, DEFAULT_PLAN, &file).expect("render");
        assert!(brief.contains("## Objective\nNo description provided.\n"));
        assert!(brief.contains("## Dependencies\n- none\n\n## Acceptance"));
        assert!(brief.ends_with("- Keep changes scoped to the assigned task.\n"));
    }
}
