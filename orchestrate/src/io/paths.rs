//! Canonical paths of an orchestrate workspace.

use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use crate::error::OrchestrateError;

pub const ORCHESTRATE_DIR: &str = ".orchestrate";
pub const BARE_DIR: &str = ".bare";

/// All canonical paths for a workspace root.
#[derive(Debug, Clone)]
pub struct ProjectPaths {
    pub root: PathBuf,
    pub bare_dir: PathBuf,
    pub orchestrate_dir: PathBuf,
    pub config_path: PathBuf,
    pub lock_path: PathBuf,
    pub runs_path: PathBuf,
    pub runs_lock_path: PathBuf,
    pub tmp_dir: PathBuf,
    pub logs_dir: PathBuf,
}

impl ProjectPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let orchestrate_dir = root.join(ORCHESTRATE_DIR);
        Self {
            bare_dir: root.join(BARE_DIR),
            config_path: orchestrate_dir.join("config.toml"),
            lock_path: orchestrate_dir.join("lock"),
            runs_path: orchestrate_dir.join("agent-runs.json"),
            runs_lock_path: orchestrate_dir.join("agent-runs.lock"),
            tmp_dir: orchestrate_dir.join("tmp"),
            logs_dir: orchestrate_dir.join("logs"),
            orchestrate_dir,
            root,
        }
    }

    /// Setup log for a claimed task.
    pub fn task_log_path(&self, task_id: u64) -> PathBuf {
        self.logs_dir.join(format!("task-{task_id}.log"))
    }

    /// Output log for a background agent run.
    pub fn run_log_path(&self, run_id: &str) -> PathBuf {
        self.logs_dir.join(format!("{run_id}.log"))
    }

    /// Resolve a task's worktree directory, refusing names that escape the root.
    pub fn worktree_path(&self, worktree: &str) -> Result<PathBuf> {
        let relative = Path::new(worktree);
        let escapes = relative.as_os_str().is_empty()
            || relative
                .components()
                .any(|part| !matches!(part, Component::Normal(_)));
        if escapes {
            return Err(anyhow!(
                "refusing worktree path outside workspace: {worktree}"
            ));
        }
        Ok(self.root.join(relative))
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [&self.orchestrate_dir, &self.tmp_dir, &self.logs_dir] {
            fs::create_dir_all(dir)
                .with_context(|| format!("create directory {}", dir.display()))?;
        }
        Ok(())
    }
}

/// Walk up from `start` to the first directory holding `.orchestrate/` and `.bare/`.
pub fn find_project_root(start: &Path) -> Result<PathBuf> {
    let mut current = Some(start);
    while let Some(dir) = current {
        if dir.join(ORCHESTRATE_DIR).is_dir() && dir.join(BARE_DIR).is_dir() {
            return Ok(dir.to_path_buf());
        }
        current = dir.parent();
    }
    Err(OrchestrateError::WorkspaceNotFound {
        start: start.to_path_buf(),
    }
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_stable() {
        let paths = ProjectPaths::new("/work/repo");
        assert_eq!(paths.bare_dir, Path::new("/work/repo/.bare"));
        assert_eq!(paths.config_path, Path::new("/work/repo/.orchestrate/config.toml"));
        assert_eq!(paths.lock_path, Path::new("/work/repo/.orchestrate/lock"));
        assert_eq!(
            paths.task_log_path(3),
            Path::new("/work/repo/.orchestrate/logs/task-3.log")
        );
    }

    #[test]
    fn worktree_path_refuses_escapes() {
        let paths = ProjectPaths::new("/work/repo");
        assert_eq!(
            paths.worktree_path("task-1").expect("inside"),
            Path::new("/work/repo/task-1")
        );
        assert!(paths.worktree_path("../elsewhere").is_err());
        assert!(paths.worktree_path("/etc").is_err());
        assert!(paths.worktree_path("").is_err());
        assert!(paths.worktree_path(".").is_err());
    }

    #[test]
    fn finds_root_from_nested_directory() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        fs::create_dir_all(root.join(ORCHESTRATE_DIR)).expect("orchestrate dir");
        fs::create_dir_all(root.join(BARE_DIR)).expect("bare dir");
        let nested = root.join("task-1").join("src");
        fs::create_dir_all(&nested).expect("nested");

        assert_eq!(find_project_root(&nested).expect("found"), root);
    }

    #[test]
    fn missing_workspace_is_typed_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = find_project_root(temp.path()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<OrchestrateError>(),
            Some(OrchestrateError::WorkspaceNotFound { .. })
        ));
    }
}
