//! Read-only views over tasks and agent runs, plus `agent start`.

use std::path::Path;

use anyhow::{Result, anyhow};
use serde::Serialize;

use crate::core::types::{Task, TaskStatus, TasksFile};
use crate::error::OrchestrateError;
use crate::io::clock::now_rfc3339;
use crate::io::config::OrchestrateConfig;
use crate::io::paths::ProjectPaths;
use crate::io::run_registry::{AgentRunRecord, AgentRunStatus, latest_for_task, read_log_tail};
use crate::io::supervisor::AgentLauncher;
use crate::launch::start_background_run;

pub const OVERVIEW_DEFAULT_LINES: usize = 120;
const OVERVIEW_MIN_LINES: usize = 10;
const OVERVIEW_MAX_LINES: usize = 300;

/// Runs newest first, one line each.
pub fn format_run_list(runs: &[AgentRunStatus], file: &TasksFile) -> String {
    if runs.is_empty() {
        return "No agent runs recorded.".to_string();
    }
    let mut sorted: Vec<&AgentRunStatus> = runs.iter().collect();
    sorted.sort_by(|a, b| b.record.started_at.cmp(&a.record.started_at));
    sorted
        .into_iter()
        .map(|run| {
            let title = file
                .get(run.record.task_id)
                .map_or("(deleted task)", |task| task.title.as_str());
            format!(
                "[{}] {} {} pid:{} started:{} {} log:{}",
                run.record.task_id,
                if run.running { "running" } else { "stopped" },
                run.record.agent,
                run.record.pid,
                run.record.started_at,
                title,
                run.record.log_path,
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Tail of the latest run's log for `task_id`, or a short notice.
pub fn task_log_report(runs: &[AgentRunStatus], task_id: u64, lines: usize) -> Result<String> {
    let Some(run) = latest_for_task(runs, task_id) else {
        return Ok(format!("No runs found for task {task_id}."));
    };
    let tail = read_log_tail(Path::new(&run.record.log_path), lines)?;
    if tail.is_empty() {
        return Ok("No log output yet.".to_string());
    }
    Ok(tail)
}

/// Start `agent` in the background for a task that already has a worktree.
pub fn start_agent<L: AgentLauncher>(
    paths: &ProjectPaths,
    config: &OrchestrateConfig,
    launcher: &L,
    file: &TasksFile,
    task_id: u64,
    agent: &str,
) -> Result<AgentRunRecord> {
    let task = file
        .get(task_id)
        .ok_or(OrchestrateError::TaskNotFound { id: task_id })?;
    let worktree = task
        .worktree
        .as_deref()
        .ok_or(OrchestrateError::NoWorktree { id: task_id })?;
    let worktree_path = paths.worktree_path(worktree)?;
    if !worktree_path.is_dir() {
        return Err(anyhow!(
            "worktree for task {task_id} is missing: {}",
            worktree_path.display()
        ));
    }
    start_background_run(paths, config, launcher, task, agent, &worktree_path)
}

/// JSON payload describing in-progress work.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Overview {
    pub workspace: String,
    pub generated_at: String,
    pub tasks: Vec<OverviewTask>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OverviewTask {
    pub task: Task,
    pub run: Option<OverviewRun>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverviewRun {
    #[serde(flatten)]
    pub status: AgentRunStatus,
    pub log_tail: String,
}

/// Clamp a requested overview tail length to `10..=300`.
pub fn overview_lines(requested: Option<usize>) -> usize {
    requested
        .unwrap_or(OVERVIEW_DEFAULT_LINES)
        .clamp(OVERVIEW_MIN_LINES, OVERVIEW_MAX_LINES)
}

/// Every `in_progress` task with its latest run and log tail.
pub fn build_overview(
    paths: &ProjectPaths,
    file: &TasksFile,
    runs: &[AgentRunStatus],
    lines: usize,
) -> Result<Overview> {
    let mut tasks = Vec::new();
    for task in file.tasks.iter().filter(|t| t.status == TaskStatus::InProgress) {
        let run = match latest_for_task(runs, task.id) {
            Some(status) => Some(OverviewRun {
                log_tail: read_log_tail(Path::new(&status.record.log_path), lines)?,
                status: status.clone(),
            }),
            None => None,
        };
        tasks.push(OverviewTask {
            task: task.clone(),
            run,
        });
    }
    Ok(Overview {
        workspace: paths.root.display().to_string(),
        generated_at: now_rfc3339(),
        tasks,
    })
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::test_support::{task, tasks_file};

    fn status(task_id: u64, started_at: &str, log_path: &Path) -> AgentRunStatus {
        AgentRunStatus {
            record: AgentRunRecord {
                id: format!("run-{task_id}-{started_at}"),
                task_id,
                agent: "codex".to_string(),
                pid: 0,
                started_at: started_at.to_string(),
                worktree_path: format!("/w/task-{task_id}"),
                task_path: format!("/w/task-{task_id}/TASK.md"),
                log_path: log_path.display().to_string(),
                command: "codex".to_string(),
                args: Vec::new(),
                cwd: format!("/w/task-{task_id}"),
            },
            running: false,
        }
    }

    #[test]
    fn run_list_is_newest_first() {
        let file = tasks_file(vec![task(1, "Alpha", 0)]);
        let runs = vec![
            status(1, "2024-01-01T00:00:00.000Z", Path::new("/l/a.log")),
            status(2, "2024-01-02T00:00:00.000Z", Path::new("/l/b.log")),
        ];
        assert_eq!(
            format_run_list(&runs, &file),
            "[2] stopped codex pid:0 started:2024-01-02T00:00:00.000Z (deleted task) log:/l/b.log\n\
             [1] stopped codex pid:0 started:2024-01-01T00:00:00.000Z Alpha log:/l/a.log"
        );
        assert_eq!(format_run_list(&[], &file), "No agent runs recorded.");
    }

    #[test]
    fn log_report_covers_missing_runs_and_empty_logs() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = temp.path().join("run.log");
        let runs = vec![status(1, "t1", &log)];

        assert_eq!(task_log_report(&runs, 2, 10).expect("report"), "No runs found for task 2.");
        assert_eq!(task_log_report(&runs, 1, 10).expect("report"), "No log output yet.");
        fs::write(&log, "a\nb\nc\n").expect("write log");
        assert_eq!(task_log_report(&runs, 1, 2).expect("report"), "b\nc");
    }

    #[test]
    fn overview_includes_only_in_progress_tasks() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = ProjectPaths::new(temp.path());
        let log = temp.path().join("run.log");
        fs::write(&log, "working\n").expect("write log");

        let mut active = task(1, "Active", 0);
        active.status = TaskStatus::InProgress;
        let mut idle = task(2, "Idle", 0);
        idle.status = TaskStatus::InProgress;
        let file = tasks_file(vec![active, idle, task(3, "Queued", 0)]);
        let runs = vec![status(1, "t1", &log)];

        let overview = build_overview(&paths, &file, &runs, overview_lines(None)).expect("overview");
        let value = serde_json::to_value(&overview).expect("serialize");
        let tasks = value["tasks"].as_array().expect("tasks array");
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0]["task"]["id"], 1);
        assert_eq!(tasks[0]["run"]["logTail"], "working");
        assert_eq!(tasks[0]["run"]["running"], false);
        assert_eq!(tasks[0]["run"]["taskId"], 1);
        assert!(tasks[1]["run"].is_null());
        assert!(value["generatedAt"].is_string());
    }

    #[test]
    fn overview_lines_are_clamped() {
        assert_eq!(overview_lines(None), 120);
        assert_eq!(overview_lines(Some(1)), 10);
        assert_eq!(overview_lines(Some(1000)), 300);
    }

    #[test]
    fn start_requires_existing_worktree() {
        use crate::io::supervisor::ProcessLauncher;

        let temp = tempfile::tempdir().expect("tempdir");
        let paths = ProjectPaths::new(temp.path());
        let config = OrchestrateConfig::new("/srv/repo.git", "main");
        let mut claimed = task(1, "Claimed", 0);
        claimed.worktree = Some("task-1".to_string());
        let file = tasks_file(vec![claimed, task(2, "Unclaimed", 0)]);

        let err = start_agent(&paths, &config, &ProcessLauncher, &file, 2, "codex").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<OrchestrateError>(),
            Some(OrchestrateError::NoWorktree { id: 2 })
        ));
        let err = start_agent(&paths, &config, &ProcessLauncher, &file, 1, "codex").unwrap_err();
        assert!(err.to_string().contains("missing"));
    }
}
