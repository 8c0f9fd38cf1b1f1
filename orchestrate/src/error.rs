//! Typed failures surfaced by orchestrate components.
//!
//! Functions return `anyhow::Result`; these variants are raised with `?` and
//! stay downcastable (`err.downcast_ref::<OrchestrateError>()`) so callers and
//! tests can tell the failure classes apart.

use std::path::PathBuf;

use thiserror::Error;

/// Which exclusive resource collided during a claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollisionKind {
    Worktree,
    Branch,
}

impl std::fmt::Display for CollisionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CollisionKind::Worktree => f.write_str("worktree"),
            CollisionKind::Branch => f.write_str("branch"),
        }
    }
}

#[derive(Debug, Error)]
pub enum OrchestrateError {
    #[error("timed out acquiring lock {} after {attempts} attempts", path.display())]
    LockTimeout { path: PathBuf, attempts: u32 },

    #[error("failed to update state branch {branch} after {attempts} attempts")]
    UpdateRetriesExhausted { branch: String, attempts: u32 },

    #[error("invalid {source_name}: {details}")]
    SchemaInvalid { source_name: String, details: String },

    #[error("{kind} already exists: {target}")]
    ResourceCollision { kind: CollisionKind, target: String },

    #[error("failed to start {command}")]
    SpawnFailed {
        command: String,
        source: std::io::Error,
    },

    #[error("setup command failed ({}): {command}", exit_label(*code))]
    SetupFailed { command: String, code: Option<i32> },

    #[error("setup command timed out after {timeout_secs}s: {command}")]
    SetupTimedOut { command: String, timeout_secs: u64 },

    #[error("state branch {branch} not found on origin")]
    StateBranchMissing { branch: String },

    #[error("no orchestrate workspace found from {}", start.display())]
    WorkspaceNotFound { start: PathBuf },

    #[error("task {id} not found")]
    TaskNotFound { id: u64 },

    #[error("unknown dependency task ids: {}", join_ids(ids))]
    UnknownDependencies { ids: Vec<u64> },

    #[error("task {id} is required by tasks: {}", join_ids(dependents))]
    DependencyInUse { id: u64, dependents: Vec<u64> },

    #[error("task {id} has no worktree to remove")]
    NoWorktree { id: u64 },
}

fn exit_label(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("exit {code}"),
        None => "terminated by signal".to_string(),
    }
}

fn join_ids(ids: &[u64]) -> String {
    ids.iter()
        .map(u64::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_offending_ids() {
        let err = OrchestrateError::DependencyInUse {
            id: 1,
            dependents: vec![2, 5],
        };
        assert_eq!(err.to_string(), "task 1 is required by tasks: 2, 5");

        let err = OrchestrateError::ResourceCollision {
            kind: CollisionKind::Branch,
            target: "task/1-a".to_string(),
        };
        assert_eq!(err.to_string(), "branch already exists: task/1-a");
    }

    #[test]
    fn typed_errors_survive_anyhow_context() {
        let err = anyhow::Error::from(OrchestrateError::TaskNotFound { id: 9 })
            .context("delete task");
        assert!(matches!(
            err.downcast_ref::<OrchestrateError>(),
            Some(OrchestrateError::TaskNotFound { id: 9 })
        ));
    }
}
