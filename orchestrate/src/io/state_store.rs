//! Shared `{plan, tasks}` state stored on a remote git branch.
//!
//! The state branch holds `Plan.md` and `tasks.json` at its root. Writers
//! fetch the branch tip, apply a mutation in a disposable worktree, commit and
//! push. A push only lands if nobody else pushed first, so the remote tip acts
//! as a compare-and-swap cell; a rejected writer starts over from the new tip.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use jsonschema::validator_for;
use serde_json::Value;
use tempfile::TempDir;
use tracing::{debug, info, instrument, warn};

use crate::core::invariants::validate_invariants;
use crate::core::types::{State, TasksFile};
use crate::error::OrchestrateError;
use crate::io::git::{Git, PushOutcome};
use crate::io::lock::{LockOptions, with_lock};
use crate::io::paths::ProjectPaths;

pub const PLAN_FILE: &str = "Plan.md";
pub const TASKS_FILE: &str = "tasks.json";
pub const MAX_UPDATE_ATTEMPTS: u32 = 5;

const REMOTE: &str = "origin";
const TASKS_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/schemas/tasks.schema.json"
));

/// Result of [`StateStore::update`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateOutcome {
    /// State after the mutation (as committed when `changed`).
    pub state: State,
    /// False when the mutation produced byte-identical files; nothing was committed.
    pub changed: bool,
    /// Attempts used, 1 when the first push landed.
    pub attempts: u32,
}

/// Read and mutate the shared state.
pub trait StateStore {
    fn read(&self) -> Result<State>;

    /// Apply `mutate` to the latest state and publish the result.
    ///
    /// `mutate` may run more than once when another writer wins a round; it
    /// must derive its result from the state it is handed. Returning `Err`
    /// aborts the update without committing anything.
    fn update<F>(&self, message: &str, mutate: F) -> Result<UpdateOutcome>
    where
        F: FnMut(State) -> Result<State>;
}

/// [`StateStore`] over the workspace's bare clone.
#[derive(Debug, Clone)]
pub struct GitStateStore {
    paths: ProjectPaths,
    branch: String,
    lock_options: LockOptions,
}

impl GitStateStore {
    pub fn new(paths: ProjectPaths, branch: impl Into<String>) -> Self {
        Self {
            paths,
            branch: branch.into(),
            lock_options: LockOptions::default(),
        }
    }

    /// Fetch the state branch and read the remote tip.
    ///
    /// A failed fetch falls back to the local copy with a warning.
    pub fn read_fresh(&self) -> Result<State> {
        match self.fetch() {
            Ok(()) => self.sync_local_branch()?,
            Err(err) => {
                warn!(branch = %self.branch, err = %format!("{err:#}"), "state fetch failed; using local copy");
            }
        }
        self.read()
    }

    /// Point the local state branch at the fetched remote tip.
    ///
    /// The local branch only moves after a push has landed, so it is never
    /// ahead of the remote and resetting it loses nothing.
    fn sync_local_branch(&self) -> Result<()> {
        let git = self.git();
        if !git.ref_exists(&self.remote_ref())? {
            return Err(OrchestrateError::StateBranchMissing {
                branch: self.branch.clone(),
            }
            .into());
        }
        git.update_ref(&self.local_ref(), &self.remote_ref())
    }

    fn git(&self) -> Git {
        Git::bare(&self.paths.bare_dir)
    }

    fn local_ref(&self) -> String {
        format!("refs/heads/{}", self.branch)
    }

    fn remote_ref(&self) -> String {
        format!("refs/remotes/{REMOTE}/{}", self.branch)
    }

    fn fetch(&self) -> Result<()> {
        let refspec = format!("+{}:{}", self.local_ref(), self.remote_ref());
        self.git()
            .fetch(REMOTE, &refspec)
            .with_context(|| format!("fetch state branch {}", self.branch))
    }

    fn ensure_local_branch(&self) -> Result<()> {
        let git = self.git();
        if git.ref_exists(&self.local_ref())? {
            return Ok(());
        }
        if !git.ref_exists(&self.remote_ref())? {
            return Err(OrchestrateError::StateBranchMissing {
                branch: self.branch.clone(),
            }
            .into());
        }
        debug!(branch = %self.branch, "creating local state branch from origin");
        git.update_ref(&self.local_ref(), &self.remote_ref())
    }

    fn checkout(&self, commitish: &str) -> Result<StateWorktree> {
        StateWorktree::create(&self.paths, commitish)
    }

    fn attempt<F>(&self, message: &str, mutate: &mut F) -> Result<Attempt>
    where
        F: FnMut(State) -> Result<State>,
    {
        let git = self.git();
        self.fetch()?;
        self.sync_local_branch()?;

        let worktree = self.checkout(&self.local_ref())?;
        let current = read_state_dir(worktree.path())?;
        let next = mutate(current)?;
        write_state_dir(worktree.path(), &next)?;

        let wt_git = Git::new(worktree.path());
        let changes = wt_git.status_porcelain()?;
        if changes.is_empty() {
            debug!("mutation produced no change");
            return Ok(Attempt::Unchanged(next));
        }
        debug!(?changes, "state files changed");

        let changed: Vec<&str> = changes.iter().map(|entry| entry.path.as_str()).collect();
        wt_git.add(&changed)?;
        wt_git.commit(message)?;
        match wt_git.push(REMOTE, "HEAD", &self.branch)? {
            PushOutcome::Pushed => {
                let head = wt_git.rev_parse("HEAD")?;
                git.update_ref(&self.local_ref(), &head)?;
                git.update_ref(&self.remote_ref(), &head)?;
                Ok(Attempt::Pushed(next))
            }
            PushOutcome::RemoteAdvanced => Ok(Attempt::Conflict),
        }
    }
}

enum Attempt {
    Unchanged(State),
    Pushed(State),
    Conflict,
}

impl StateStore for GitStateStore {
    #[instrument(skip_all, fields(branch = %self.branch))]
    fn read(&self) -> Result<State> {
        self.ensure_local_branch()?;
        let worktree = self.checkout(&self.local_ref())?;
        read_state_dir(worktree.path())
    }

    #[instrument(skip_all, fields(branch = %self.branch, message = %message))]
    fn update<F>(&self, message: &str, mut mutate: F) -> Result<UpdateOutcome>
    where
        F: FnMut(State) -> Result<State>,
    {
        with_lock(&self.paths.lock_path, self.lock_options, || {
            for attempt in 1..=MAX_UPDATE_ATTEMPTS {
                match self.attempt(message, &mut mutate)? {
                    Attempt::Unchanged(state) => {
                        return Ok(UpdateOutcome {
                            state,
                            changed: false,
                            attempts: attempt,
                        });
                    }
                    Attempt::Pushed(state) => {
                        info!(attempt, "state updated");
                        return Ok(UpdateOutcome {
                            state,
                            changed: true,
                            attempts: attempt,
                        });
                    }
                    Attempt::Conflict => {
                        warn!(attempt, "state branch moved; retrying");
                    }
                }
            }
            Err(OrchestrateError::UpdateRetriesExhausted {
                branch: self.branch.clone(),
                attempts: MAX_UPDATE_ATTEMPTS,
            }
            .into())
        })
    }
}

/// Detached worktree in a temp directory, removed on drop.
pub(crate) struct StateWorktree {
    git: Git,
    dir: TempDir,
}

impl StateWorktree {
    pub(crate) fn create(paths: &ProjectPaths, commitish: &str) -> Result<Self> {
        fs::create_dir_all(&paths.tmp_dir)
            .with_context(|| format!("create directory {}", paths.tmp_dir.display()))?;
        let dir = tempfile::Builder::new()
            .prefix("state-")
            .tempdir_in(&paths.tmp_dir)
            .context("create state worktree directory")?;
        let git = Git::bare(&paths.bare_dir);
        git.worktree_add_detached(dir.path(), commitish)?;
        Ok(Self { git, dir })
    }

    pub(crate) fn path(&self) -> &Path {
        self.dir.path()
    }
}

impl Drop for StateWorktree {
    fn drop(&mut self) {
        if let Err(err) = self.git.worktree_remove(self.dir.path()) {
            warn!(path = %self.dir.path().display(), err = %format!("{err:#}"), "failed to remove state worktree");
            let _ = self.git.worktree_prune();
        }
    }
}

/// Read `Plan.md` and `tasks.json` from a checked-out state branch.
pub fn read_state_dir(dir: &Path) -> Result<State> {
    let plan_path = dir.join(PLAN_FILE);
    let tasks_path: PathBuf = dir.join(TASKS_FILE);
    let plan = fs::read_to_string(&plan_path)
        .with_context(|| format!("read {}", plan_path.display()))?;
    let raw = fs::read_to_string(&tasks_path)
        .with_context(|| format!("read {}", tasks_path.display()))?;
    let tasks = parse_tasks(&raw)?;
    Ok(State { plan, tasks })
}

/// Write `Plan.md` verbatim and `tasks.json` as two-space JSON with a trailing newline.
pub fn write_state_dir(dir: &Path, state: &State) -> Result<()> {
    let plan_path = dir.join(PLAN_FILE);
    let tasks_path = dir.join(TASKS_FILE);
    fs::write(&plan_path, &state.plan)
        .with_context(|| format!("write {}", plan_path.display()))?;
    fs::write(&tasks_path, render_tasks(&state.tasks)?)
        .with_context(|| format!("write {}", tasks_path.display()))?;
    Ok(())
}

pub fn render_tasks(tasks: &TasksFile) -> Result<String> {
    let mut buf = serde_json::to_string_pretty(tasks).context("serialize tasks")?;
    buf.push('\n');
    Ok(buf)
}

/// Parse `tasks.json`, checking the schema and then the semantic invariants.
pub fn parse_tasks(raw: &str) -> Result<TasksFile> {
    let invalid = |details: String| -> anyhow::Error {
        OrchestrateError::SchemaInvalid {
            source_name: TASKS_FILE.to_string(),
            details,
        }
        .into()
    };

    let value: Value = serde_json::from_str(raw).map_err(|err| invalid(err.to_string()))?;
    let schema: Value = serde_json::from_str(TASKS_SCHEMA).context("parse embedded tasks schema")?;
    let compiled = validator_for(&schema).map_err(|err| anyhow!("invalid tasks schema: {err}"))?;
    let messages: Vec<String> = compiled
        .iter_errors(&value)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        return Err(invalid(messages.join("; ")));
    }

    let file: TasksFile = serde_json::from_value(value).map_err(|err| invalid(err.to_string()))?;
    let errors = validate_invariants(&file);
    if !errors.is_empty() {
        return Err(invalid(errors.join("; ")));
    }
    Ok(file)
}
