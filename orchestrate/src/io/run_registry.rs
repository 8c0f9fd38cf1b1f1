//! Registry of background agent launches (`.orchestrate/agent-runs.json`).
//!
//! Records are appended under a lock and never rewritten. Whether a run is
//! still alive is checked from its pid each time the registry is listed.

use std::fs;
use std::io::{self, ErrorKind};
use std::path::Path;

use anyhow::{Context, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::io::lock::{LockOptions, with_lock};
use crate::io::paths::ProjectPaths;

pub const DEFAULT_TAIL_LINES: usize = 120;
pub const MAX_TAIL_LINES: usize = 500;

/// One background launch. Immutable once registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRunRecord {
    pub id: String,
    pub task_id: u64,
    pub agent: String,
    pub pid: i64,
    pub started_at: String,
    pub worktree_path: String,
    pub task_path: String,
    pub log_path: String,
    pub command: String,
    pub args: Vec<String>,
    pub cwd: String,
}

/// A record plus liveness observed at read time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRunStatus {
    #[serde(flatten)]
    pub record: AgentRunRecord,
    pub running: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RunsFile {
    runs: Vec<AgentRunRecord>,
}

/// `run-{taskId}-{base36 millis}{4 random base36 chars}`.
pub fn create_run_id(task_id: u64, now_millis: u64) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..4)
        .map(|_| base36_digit(rng.gen_range(0..36)))
        .collect();
    format!("run-{task_id}-{}{suffix}", to_base36(now_millis))
}

fn base36_digit(value: u32) -> char {
    char::from_digit(value, 36).unwrap_or('0')
}

fn to_base36(mut value: u64) -> String {
    if value == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while value > 0 {
        digits.push(base36_digit((value % 36) as u32));
        value /= 36;
    }
    digits.iter().rev().collect()
}

/// Append `run` to the registry.
#[instrument(skip_all, fields(run_id = %run.id, task_id = run.task_id))]
pub fn register(paths: &ProjectPaths, run: &AgentRunRecord) -> Result<()> {
    with_lock(&paths.runs_lock_path, LockOptions::default(), || {
        let mut runs = read_runs(&paths.runs_path)?;
        runs.push(run.clone());
        let mut buf = serde_json::to_string_pretty(&RunsFile { runs }).context("serialize runs")?;
        buf.push('\n');
        write_atomic(&paths.runs_path, &buf)?;
        debug!("run registered");
        Ok(())
    })
}

/// All records, in registration order, with their current liveness.
pub fn list(paths: &ProjectPaths) -> Result<Vec<AgentRunStatus>> {
    let runs = read_runs(&paths.runs_path)?;
    Ok(runs
        .into_iter()
        .map(|record| {
            let running = is_pid_running(record.pid);
            AgentRunStatus { record, running }
        })
        .collect())
}

/// Most recently started run for `task_id`.
pub fn latest_for_task(runs: &[AgentRunStatus], task_id: u64) -> Option<&AgentRunStatus> {
    runs.iter()
        .filter(|run| run.record.task_id == task_id)
        .max_by(|a, b| a.record.started_at.cmp(&b.record.started_at))
}

fn read_runs(path: &Path) -> Result<Vec<AgentRunRecord>> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err).with_context(|| format!("read {}", path.display())),
    };
    let value: Value =
        serde_json::from_str(&raw).with_context(|| format!("parse {}", path.display()))?;
    match value.get("runs") {
        Some(runs @ Value::Array(_)) => serde_json::from_value(runs.clone())
            .with_context(|| format!("parse runs in {}", path.display())),
        _ => Ok(Vec::new()),
    }
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("registry path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp registry {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace registry {}", path.display()))?;
    Ok(())
}

/// Check `pid` with signal 0. Permission errors still mean the process exists.
pub fn is_pid_running(pid: i64) -> bool {
    if pid <= 0 {
        return false;
    }
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    // SAFETY: signal 0 performs only the existence and permission checks; no
    // signal is delivered. `pid` is positive, so this never targets a group.
    #[allow(unsafe_code)]
    let result = unsafe { libc::kill(pid, 0) };
    if result == 0 {
        return true;
    }
    io::Error::last_os_error().raw_os_error() != Some(libc::ESRCH)
}

/// Last `max_lines` lines of a log, trailing whitespace trimmed.
///
/// `max_lines` is clamped to `1..=500`. A missing file reads as empty.
pub fn read_log_tail(path: &Path, max_lines: usize) -> Result<String> {
    let lines = max_lines.clamp(1, MAX_TAIL_LINES);
    let content = match fs::read(path) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(String::new()),
        Err(err) => return Err(err).with_context(|| format!("read log {}", path.display())),
    };
    let all: Vec<&str> = content.trim_end().split('\n').collect();
    let start = all.len().saturating_sub(lines);
    Ok(all[start..].join("\n"))
}
