//! Launching agents for claimed tasks.

use std::path::Path;

use anyhow::Result;
use tracing::info;

use crate::core::types::Task;
use crate::io::brief::BRIEF_FILE;
use crate::io::clock::now_millis;
use crate::io::config::OrchestrateConfig;
use crate::io::paths::ProjectPaths;
use crate::io::run_registry::{self, AgentRunRecord, create_run_id};
use crate::io::supervisor::{AgentLauncher, build_invocation, default_prompt_for};

/// Run `agent` on `task` attached to the terminal.
pub fn run_foreground<L: AgentLauncher>(
    config: &OrchestrateConfig,
    launcher: &L,
    task: &Task,
    agent: &str,
    worktree_path: &Path,
) -> Result<()> {
    let task_path = worktree_path.join(BRIEF_FILE);
    let invocation = build_invocation(
        agent,
        worktree_path,
        &task_path,
        config,
        Some(task),
        default_prompt_for(agent),
    );
    launcher.run_foreground(&invocation)
}

/// Start `agent` on `task` in the background and record the run.
pub fn start_background_run<L: AgentLauncher>(
    paths: &ProjectPaths,
    config: &OrchestrateConfig,
    launcher: &L,
    task: &Task,
    agent: &str,
    worktree_path: &Path,
) -> Result<AgentRunRecord> {
    let task_path = worktree_path.join(BRIEF_FILE);
    let invocation = build_invocation(
        agent,
        worktree_path,
        &task_path,
        config,
        Some(task),
        default_prompt_for(agent),
    );
    let run_id = create_run_id(task.id, now_millis());
    let log_path = paths.run_log_path(&run_id);
    let start = launcher.start_background(&invocation, &run_id, &log_path)?;

    let record = AgentRunRecord {
        id: start.run_id,
        task_id: task.id,
        agent: agent.to_string(),
        pid: i64::from(start.pid),
        started_at: start.started_at,
        worktree_path: worktree_path.display().to_string(),
        task_path: task_path.display().to_string(),
        log_path: start.log_path.display().to_string(),
        command: start.command,
        args: start.args,
        cwd: start.cwd.display().to_string(),
    };
    run_registry::register(paths, &record)?;
    info!(run_id = %record.id, pid = record.pid, "background agent started");
    Ok(record)
}
