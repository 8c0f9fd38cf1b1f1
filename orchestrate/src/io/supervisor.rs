//! Agent launching: attached to the terminal or detached into a log file.

use std::collections::BTreeMap;
use std::io::Write;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::core::interpolate::{Replacements, interpolate};
use crate::core::types::Task;
use crate::error::OrchestrateError;
use crate::io::clock::now_rfc3339;
use crate::io::config::OrchestrateConfig;
use crate::io::process::open_append;

pub const CODEX_DEFAULT_PROMPT: &str =
    "Look into {taskFile}, please complete it and mark the status as done when completed.";

/// Built-in prompt for agents that take their instructions as one argument.
pub fn default_prompt_for(agent: &str) -> Option<&'static str> {
    (agent == "codex").then_some(CODEX_DEFAULT_PROMPT)
}

/// Fully resolved agent command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentInvocation {
    pub agent: String,
    pub command: String,
    pub args: Vec<String>,
    /// Added on top of the inherited environment.
    pub env: BTreeMap<String, String>,
    pub cwd: PathBuf,
    pub worktree_path: PathBuf,
    pub shell: bool,
}

impl AgentInvocation {
    fn to_command(&self) -> Command {
        let mut cmd = if self.shell {
            let mut line = self.command.clone();
            for arg in &self.args {
                line.push(' ');
                line.push_str(arg);
            }
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(line);
            cmd
        } else {
            let mut cmd = Command::new(&self.command);
            cmd.args(&self.args);
            cmd
        };
        cmd.current_dir(&self.cwd).envs(&self.env);
        cmd
    }

    fn display_line(&self) -> String {
        let mut line = self.command.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// Resolve how to run `agent_name` for a task.
///
/// Unconfigured agents run as a command of the same name.
pub fn build_invocation(
    agent_name: &str,
    worktree_path: &Path,
    task_path: &Path,
    config: &OrchestrateConfig,
    task: Option<&Task>,
    default_prompt: Option<&str>,
) -> AgentInvocation {
    let agent = config.agents.get(agent_name);
    let values = replacements(worktree_path, task_path, task);

    let prompt = agent.and_then(|a| a.prompt.as_deref()).or(default_prompt);
    let args = match (agent.and_then(|a| a.args.as_ref()), prompt) {
        (Some(args), _) => args.iter().map(|arg| interpolate(arg, &values)).collect(),
        (None, Some(prompt)) => vec![interpolate(prompt, &values)],
        (None, None) => Vec::new(),
    };

    let mut env = BTreeMap::new();
    env.insert(
        "ORCHESTRATE_TASK_PATH".to_string(),
        task_path.display().to_string(),
    );
    if let Some(agent) = agent {
        for (key, value) in &agent.env {
            env.insert(key.clone(), interpolate(value, &values));
        }
    }

    let cwd = match agent.and_then(|a| a.cwd.as_deref()) {
        Some(dir) => worktree_path.join(interpolate(dir, &values)),
        None => worktree_path.to_path_buf(),
    };

    AgentInvocation {
        agent: agent_name.to_string(),
        command: agent.map_or_else(|| agent_name.to_string(), |a| a.command.clone()),
        args,
        env,
        cwd,
        worktree_path: worktree_path.to_path_buf(),
        shell: agent.is_some_and(|a| a.shell),
    }
}

fn replacements(worktree_path: &Path, task_path: &Path, task: Option<&Task>) -> Replacements {
    let mut values = Replacements::new();
    values.insert("taskPath", task_path.display().to_string());
    values.insert(
        "taskFile",
        task_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default(),
    );
    values.insert("worktreePath", worktree_path.display().to_string());
    values.insert("taskId", task.map(|t| t.id.to_string()).unwrap_or_default());
    values.insert("taskTitle", task.map(|t| t.title.clone()).unwrap_or_default());
    values.insert(
        "taskBranch",
        task.and_then(|t| t.branch.clone()).unwrap_or_default(),
    );
    values
}

/// A detached launch that has been spawned but not registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackgroundStart {
    pub run_id: String,
    pub pid: u32,
    pub started_at: String,
    pub log_path: PathBuf,
    pub command: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
}

/// Runs agent invocations.
pub trait AgentLauncher {
    /// Run attached to the current terminal until the agent exits.
    fn run_foreground(&self, invocation: &AgentInvocation) -> Result<()>;

    /// Spawn detached with output appended to `log_path`; returns immediately.
    fn start_background(
        &self,
        invocation: &AgentInvocation,
        run_id: &str,
        log_path: &Path,
    ) -> Result<BackgroundStart>;
}

/// [`AgentLauncher`] backed by real child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessLauncher;

impl AgentLauncher for ProcessLauncher {
    #[instrument(skip_all, fields(agent = %invocation.agent, command = %invocation.command))]
    fn run_foreground(&self, invocation: &AgentInvocation) -> Result<()> {
        info!("running agent in foreground");
        let status = invocation
            .to_command()
            .status()
            .with_context(|| format!("spawn {}", invocation.command))?;
        if !status.success() {
            return Err(anyhow!("agent {} exited with {status}", invocation.command));
        }
        Ok(())
    }

    #[instrument(skip_all, fields(agent = %invocation.agent, run_id = %run_id))]
    fn start_background(
        &self,
        invocation: &AgentInvocation,
        run_id: &str,
        log_path: &Path,
    ) -> Result<BackgroundStart> {
        let started_at = now_rfc3339();
        let mut log = open_append(log_path)?;
        writeln!(log, "[{started_at}] start {}", invocation.display_line())
            .with_context(|| format!("write {}", log_path.display()))?;
        let stderr = log
            .try_clone()
            .with_context(|| format!("clone log handle {}", log_path.display()))?;

        let mut cmd = invocation.to_command();
        cmd.env("ORCHESTRATE_RUN_ID", run_id)
            .env("ORCHESTRATE_LOG_PATH", log_path)
            .env("ORCHESTRATE_AGENT_NAME", &invocation.agent)
            .env("ORCHESTRATE_WORKTREE_PATH", &invocation.worktree_path)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(stderr))
            .process_group(0);

        let mut child = cmd.spawn().map_err(|source| OrchestrateError::SpawnFailed {
            command: invocation.command.clone(),
            source,
        })?;
        let pid = child.id();
        // Reap the agent when it exits so the pid stops answering signal 0.
        thread::Builder::new()
            .name(format!("reap-{pid}"))
            .spawn(move || {
                if let Err(err) = child.wait() {
                    warn!(pid, %err, "failed to reap background agent");
                }
            })
            .context("spawn agent reaper thread")?;
        debug!(pid, "agent detached");

        Ok(BackgroundStart {
            run_id: run_id.to_string(),
            pid,
            started_at,
            log_path: log_path.to_path_buf(),
            command: invocation.command.clone(),
            args: invocation.args.clone(),
            cwd: invocation.cwd.clone(),
        })
    }
}
