//! Claiming the next task: state transition, worktree, setup and launch.
//!
//! The claim itself is one state store update. Branch and worktree names are
//! checked for collisions inside that update so a collision leaves the task
//! untouched, and checked again right before the worktree is created.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use tracing::{info, instrument};

use crate::core::mutations::{ClaimNames, apply_claim, next_claim_names};
use crate::core::types::Task;
use crate::error::{CollisionKind, OrchestrateError};
use crate::io::brief::{BRIEF_FILE, render_task_brief};
use crate::io::clock::now_rfc3339;
use crate::io::config::OrchestrateConfig;
use crate::io::git::Git;
use crate::io::init::default_start_point;
use crate::io::paths::ProjectPaths;
use crate::io::run_registry::AgentRunRecord;
use crate::io::setup::run_setup;
use crate::io::state_store::StateStore;
use crate::io::supervisor::AgentLauncher;
use crate::launch::{run_foreground, start_background_run};

const FETCH_ATTEMPTS: u32 = 3;
const FETCH_BACKOFF: Duration = Duration::from_millis(500);

/// What to do with the agent once the worktree is ready.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LaunchMode {
    #[default]
    None,
    Foreground,
    Background,
}

/// Input for [`claim_next`].
#[derive(Debug, Clone, Default)]
pub struct ClaimRequest {
    /// Recorded as the task owner (`user@host`).
    pub owner: String,
    pub agent: Option<String>,
    pub launch: LaunchMode,
}

/// A task that was claimed and provisioned.
#[derive(Debug, Clone)]
pub struct ClaimedTask {
    pub task: Task,
    pub worktree_path: PathBuf,
    pub task_path: PathBuf,
    /// Present when the agent was started in the background.
    pub run: Option<AgentRunRecord>,
}

#[derive(Debug, Clone)]
pub enum ClaimOutcome {
    /// Nothing is ready to claim.
    NoTask,
    Claimed(Box<ClaimedTask>),
}

/// Claim the next ready task and prepare its worktree.
#[instrument(skip_all, fields(owner = %request.owner))]
pub fn claim_next<S: StateStore, L: AgentLauncher>(
    store: &S,
    paths: &ProjectPaths,
    config: &OrchestrateConfig,
    launcher: &L,
    request: &ClaimRequest,
) -> Result<ClaimOutcome> {
    let agent = match (request.launch, request.agent.as_deref()) {
        (LaunchMode::None, agent) => agent,
        (_, Some(agent)) => Some(agent),
        (_, None) => bail!("use --agent with --run or --background to launch an agent"),
    };

    let git = Git::bare(&paths.bare_dir);
    let mut claimed: Option<ClaimNames> = None;
    let outcome = store.update("Claim task", |mut state| {
        claimed = None;
        let Some(names) = next_claim_names(&state.tasks) else {
            return Ok(state);
        };
        check_collisions(paths, &git, &names)?;
        apply_claim(&mut state.tasks, &names, &request.owner, &now_rfc3339())?;
        claimed = Some(names);
        Ok(state)
    })?;

    if !outcome.changed {
        return Ok(ClaimOutcome::NoTask);
    }
    let names = claimed.ok_or_else(|| anyhow!("claim committed without a selected task"))?;
    let task = outcome
        .state
        .tasks
        .get(names.id)
        .cloned()
        .ok_or(OrchestrateError::TaskNotFound { id: names.id })?;
    info!(task_id = task.id, branch = %names.branch, "task claimed");

    check_collisions(paths, &git, &names)?;
    let worktree_path = paths.worktree_path(&names.worktree)?;

    let default_branch = config
        .default_branch
        .strip_prefix("origin/")
        .unwrap_or(&config.default_branch);
    git.fetch_with_retry(
        "origin",
        &format!("+refs/heads/{default_branch}:refs/remotes/origin/{default_branch}"),
        FETCH_ATTEMPTS,
        FETCH_BACKOFF,
    )
    .with_context(|| format!("fetch {default_branch}"))?;
    let start_point = default_start_point(&git, default_branch)?;
    git.worktree_add_branch(&worktree_path, &names.branch, &start_point)?;

    let task_path = worktree_path.join(BRIEF_FILE);
    let brief = render_task_brief(&task, &outcome.state.plan, &outcome.state.tasks)?;
    fs::write(&task_path, brief).with_context(|| format!("write {}", task_path.display()))?;

    if let Some(setup) = &config.setup {
        run_setup(setup, &worktree_path, &paths.task_log_path(task.id))?;
    }

    let run = match (request.launch, agent) {
        (LaunchMode::Foreground, Some(agent)) => {
            run_foreground(config, launcher, &task, agent, &worktree_path)?;
            None
        }
        (LaunchMode::Background, Some(agent)) => Some(start_background_run(
            paths,
            config,
            launcher,
            &task,
            agent,
            &worktree_path,
        )?),
        _ => None,
    };

    Ok(ClaimOutcome::Claimed(Box::new(ClaimedTask {
        task,
        worktree_path,
        task_path,
        run,
    })))
}

fn check_collisions(paths: &ProjectPaths, git: &Git, names: &ClaimNames) -> Result<()> {
    let worktree_path = paths.worktree_path(&names.worktree)?;
    if worktree_path.exists() {
        return Err(OrchestrateError::ResourceCollision {
            kind: CollisionKind::Worktree,
            target: worktree_path.display().to_string(),
        }
        .into());
    }
    if git.branch_exists(&names.branch)? {
        return Err(OrchestrateError::ResourceCollision {
            kind: CollisionKind::Branch,
            target: names.branch.clone(),
        }
        .into());
    }
    Ok(())
}

/// `$USER@hostname`, with `unknown` for whatever cannot be determined.
pub fn default_owner() -> String {
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .ok()
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| "unknown".to_string());
    format!("{user}@{}", hostname())
}

fn hostname() -> String {
    if let Ok(name) = std::env::var("HOSTNAME")
        && !name.trim().is_empty()
    {
        return name.trim().to_string();
    }
    ["/proc/sys/kernel/hostname", "/etc/hostname"]
        .iter()
        .filter_map(|path| fs::read_to_string(path).ok())
        .map(|name| name.trim().to_string())
        .find(|name| !name.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}
