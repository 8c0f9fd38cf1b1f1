//! Per-worktree setup commands run right after a claim.

use std::io::Write;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, instrument};

use crate::error::OrchestrateError;
use crate::io::config::SetupConfig;
use crate::io::process::{command_for_line, open_append, run_to_log};

/// Run every configured setup command in order inside `worktree`.
///
/// Each command is echoed as `$ <command>` to `log_path` followed by its
/// output. The first failure stops the sequence.
#[instrument(skip_all, fields(worktree = %worktree.display()))]
pub fn run_setup(setup: &SetupConfig, worktree: &Path, log_path: &Path) -> Result<()> {
    let cwd = match &setup.cwd {
        Some(dir) => worktree.join(dir),
        None => worktree.to_path_buf(),
    };
    let timeout = setup.timeout_secs.map(Duration::from_secs);

    for line in setup.command.commands() {
        {
            let mut log = open_append(log_path)?;
            writeln!(log, "\n$ {line}").with_context(|| format!("write {}", log_path.display()))?;
        }
        let Some(mut cmd) = command_for_line(line, setup.shell) else {
            continue;
        };
        cmd.current_dir(&cwd).envs(&setup.env);

        info!(command = line, "running setup");
        let exit = run_to_log(cmd, log_path, timeout)
            .with_context(|| format!("run setup command {line}"))?;
        if exit.timed_out {
            return Err(OrchestrateError::SetupTimedOut {
                command: line.to_string(),
                timeout_secs: setup.timeout_secs.unwrap_or_default(),
            }
            .into());
        }
        if !exit.status.success() {
            return Err(OrchestrateError::SetupFailed {
                command: line.to_string(),
                code: exit.status.code(),
            }
            .into());
        }
    }
    Ok(())
}
