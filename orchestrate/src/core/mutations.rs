//! Pure state transitions applied inside state store updates.
//!
//! Every function validates before touching `file`, so an `Err` leaves the
//! tasks file exactly as it was.

use anyhow::Result;

use crate::core::scheduler::{branch_name, select_next, worktree_name};
use crate::core::types::{NewTask, Task, TaskStatus, TasksFile};
use crate::error::OrchestrateError;

/// Names allocated to a claimed task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimNames {
    pub id: u64,
    pub branch: String,
    pub worktree: String,
}

/// Append a new `todo` task with id `lastId + 1`. Returns the new id.
pub fn add_task(file: &mut TasksFile, input: &NewTask, now: &str) -> Result<u64> {
    let missing: Vec<u64> = input
        .deps
        .iter()
        .copied()
        .filter(|dep| file.get(*dep).is_none())
        .collect();
    if !missing.is_empty() {
        return Err(OrchestrateError::UnknownDependencies { ids: missing }.into());
    }

    let id = file.last_id + 1;
    file.tasks.push(Task {
        id,
        title: input.title.clone(),
        description: input.description.clone(),
        deps: input.deps.clone(),
        priority: input.priority,
        status: TaskStatus::Todo,
        owner: None,
        branch: None,
        worktree: None,
        created_at: now.to_string(),
        updated_at: now.to_string(),
        started_at: None,
        completed_at: None,
    });
    file.last_id = id;
    Ok(id)
}

/// Remove a task nobody depends on. Returns the removed task.
pub fn delete_task(file: &mut TasksFile, id: u64) -> Result<Task> {
    let index = file
        .tasks
        .iter()
        .position(|task| task.id == id)
        .ok_or(OrchestrateError::TaskNotFound { id })?;
    let dependents: Vec<u64> = file
        .tasks
        .iter()
        .filter(|task| task.deps.contains(&id))
        .map(|task| task.id)
        .collect();
    if !dependents.is_empty() {
        return Err(OrchestrateError::DependencyInUse { id, dependents }.into());
    }
    Ok(file.tasks.remove(index))
}

/// Forget a task's worktree while keeping its branch. Returns the worktree name.
pub fn clear_worktree(file: &mut TasksFile, id: u64, now: &str) -> Result<String> {
    let task = file
        .get_mut(id)
        .ok_or(OrchestrateError::TaskNotFound { id })?;
    let worktree = task
        .worktree
        .take()
        .ok_or(OrchestrateError::NoWorktree { id })?;
    task.updated_at = now.to_string();
    Ok(worktree)
}

/// Move a task to `status`. Setting the current status again is a no-op.
pub fn set_status(file: &mut TasksFile, id: u64, status: TaskStatus, now: &str) -> Result<()> {
    let task = file
        .get_mut(id)
        .ok_or(OrchestrateError::TaskNotFound { id })?;
    if task.status == status {
        return Ok(());
    }
    task.status = status;
    task.updated_at = now.to_string();
    task.completed_at = (status == TaskStatus::Done).then(|| now.to_string());
    Ok(())
}

/// Names the next claim would allocate, without changing anything.
pub fn next_claim_names(file: &TasksFile) -> Option<ClaimNames> {
    select_next(file).map(|task| ClaimNames {
        id: task.id,
        branch: branch_name(task),
        worktree: worktree_name(task.id),
    })
}

/// Mark the task named by `names` as claimed by `owner`.
pub fn apply_claim(file: &mut TasksFile, names: &ClaimNames, owner: &str, now: &str) -> Result<()> {
    let task = file
        .get_mut(names.id)
        .ok_or(OrchestrateError::TaskNotFound { id: names.id })?;
    task.status = TaskStatus::InProgress;
    task.owner = Some(owner.to_string());
    task.branch = Some(names.branch.clone());
    task.worktree = Some(names.worktree.clone());
    task.updated_at = now.to_string();
    task.started_at = Some(now.to_string());
    Ok(())
}
