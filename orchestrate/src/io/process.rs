//! Helpers for running child processes with their output sent to a log file.

use std::fs::{self, File, OpenOptions};
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// How a logged child finished.
#[derive(Debug)]
pub struct LoggedExit {
    pub status: ExitStatus,
    pub timed_out: bool,
}

/// Open `path` for appending, creating it and its parent directory.
pub fn open_append(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open log {}", path.display()))
}

/// Build a command that runs `line` through `sh -c`, or split on whitespace.
///
/// Returns `None` for a blank line.
pub fn command_for_line(line: &str, shell: bool) -> Option<Command> {
    if shell {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(line);
        return Some(cmd);
    }
    let mut parts = line.split_whitespace();
    let program = parts.next()?;
    let mut cmd = Command::new(program);
    cmd.args(parts);
    Some(cmd)
}

/// Run `cmd` to completion with stdout/stderr appended to `log_path`.
///
/// With a timeout, a child still running at the deadline is killed and
/// reported with `timed_out: true`.
#[instrument(skip_all, fields(log = %log_path.display(), timeout_secs = timeout.map(|t| t.as_secs())))]
pub fn run_to_log(mut cmd: Command, log_path: &Path, timeout: Option<Duration>) -> Result<LoggedExit> {
    let stdout = open_append(log_path)?;
    let stderr = stdout
        .try_clone()
        .with_context(|| format!("clone log handle {}", log_path.display()))?;
    cmd.stdin(Stdio::null())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr));

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    let Some(timeout) = timeout else {
        let status = child.wait().context("wait for command")?;
        debug!(exit_code = ?status.code(), "command finished");
        return Ok(LoggedExit {
            status,
            timed_out: false,
        });
    };

    let (status, timed_out) = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => (status, false),
        None => {
            warn!(timeout_secs = timeout.as_secs(), "command timed out, killing");
            child.kill().context("kill command")?;
            (child.wait().context("wait command after kill")?, true)
        }
    };
    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(LoggedExit { status, timed_out })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_output_to_log() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = temp.path().join("logs").join("out.log");
        fs::create_dir_all(log.parent().expect("parent")).expect("dir");
        fs::write(&log, "before\n").expect("seed log");

        let cmd = command_for_line("echo hello; echo oops >&2", true).expect("command");
        let exit = run_to_log(cmd, &log, None).expect("run");
        assert!(exit.status.success());
        assert!(!exit.timed_out);
        let contents = fs::read_to_string(&log).expect("read log");
        assert!(contents.starts_with("before\n"));
        assert!(contents.contains("hello\n"));
        assert!(contents.contains("oops\n"));
    }

    #[test]
    fn kills_on_timeout() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = temp.path().join("out.log");
        let cmd = command_for_line("sleep 5", false).expect("command");
        let exit = run_to_log(cmd, &log, Some(Duration::from_millis(100))).expect("run");
        assert!(exit.timed_out);
        assert!(!exit.status.success());
    }

    #[test]
    fn blank_line_has_no_command() {
        assert!(command_for_line("   ", false).is_none());
    }
}
