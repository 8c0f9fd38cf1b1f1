//! Shared deterministic types for the task queue.
//!
//! These types are the wire format of `tasks.json` on the state branch. Field
//! names are camelCase and optional fields are omitted when absent, so the
//! serialized bytes stay stable across round-trips.

use std::fmt;
use std::str::FromStr;

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Todo,
    InProgress,
    Done,
    Blocked,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Todo => "todo",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Done => "done",
            TaskStatus::Blocked => "blocked",
        }
    }

    /// Rank used for display ordering (lower sorts first).
    pub fn display_rank(self) -> u8 {
        match self {
            TaskStatus::InProgress => 0,
            TaskStatus::Todo => 1,
            TaskStatus::Blocked => 2,
            TaskStatus::Done => 3,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "todo" => Ok(TaskStatus::Todo),
            "in_progress" => Ok(TaskStatus::InProgress),
            "done" => Ok(TaskStatus::Done),
            "blocked" => Ok(TaskStatus::Blocked),
            other => Err(anyhow!(
                "unknown task status '{other}' (expected todo, in_progress, done or blocked)"
            )),
        }
    }
}

/// One unit of work in the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: u64,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Ids that must be `done` before this task is eligible.
    #[serde(default)]
    pub deps: Vec<u64>,
    /// Higher runs first.
    #[serde(default)]
    pub priority: i64,
    pub status: TaskStatus,
    /// Claimant identity (`user@host`), set on claim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    /// Work branch allocated on claim. Persists after the worktree is removed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    /// Worktree directory name (relative to the workspace root).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worktree: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
}

/// Contents of `tasks.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TasksFile {
    /// High-water mark for id assignment; always >= the largest id present.
    pub last_id: u64,
    pub tasks: Vec<Task>,
}

impl TasksFile {
    pub fn get(&self, id: u64) -> Option<&Task> {
        self.tasks.iter().find(|task| task.id == id)
    }

    pub fn get_mut(&mut self, id: u64) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|task| task.id == id)
    }
}

/// Full payload synchronized through the state branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct State {
    pub plan: String,
    pub tasks: TasksFile,
}

/// Input for creating a task.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewTask {
    pub title: String,
    pub description: Option<String>,
    pub deps: Vec<u64>,
    pub priority: i64,
}
