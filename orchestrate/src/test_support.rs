//! Test-only helpers: task builders, an in-memory state store, and throwaway
//! git remotes with initialized workspaces.

use std::cell::{Cell, RefCell};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::Result;
use tempfile::TempDir;

use crate::core::types::{State, Task, TaskStatus, TasksFile};
use crate::io::brief::DEFAULT_PLAN;
use crate::io::config::{OrchestrateConfig, load_config};
use crate::io::init::{InitOptions, init_workspace};
use crate::io::paths::ProjectPaths;
use crate::io::state_store::{GitStateStore, StateStore, UpdateOutcome};

pub const TEST_TIME: &str = "2024-01-01T00:00:00.000Z";

/// Create a deterministic `todo` task without deps.
pub fn task(id: u64, title: &str, priority: i64) -> Task {
    Task {
        id,
        title: title.to_string(),
        description: None,
        deps: Vec::new(),
        priority,
        status: TaskStatus::Todo,
        owner: None,
        branch: None,
        worktree: None,
        created_at: TEST_TIME.to_string(),
        updated_at: TEST_TIME.to_string(),
        started_at: None,
        completed_at: None,
    }
}

/// Create a `todo` task depending on `deps`.
pub fn task_with_deps(id: u64, title: &str, deps: &[u64]) -> Task {
    Task {
        deps: deps.to_vec(),
        ..task(id, title, 0)
    }
}

/// Wrap tasks in a file whose `lastId` is the largest id present.
pub fn tasks_file(tasks: Vec<Task>) -> TasksFile {
    let last_id = tasks.iter().map(|t| t.id).max().unwrap_or(0);
    TasksFile { last_id, tasks }
}

/// [`StateStore`] kept in memory; counts the updates that changed something.
#[derive(Debug)]
pub struct MemoryStateStore {
    state: RefCell<State>,
    commits: Cell<u32>,
}

impl MemoryStateStore {
    pub fn new(tasks: TasksFile) -> Self {
        Self {
            state: RefCell::new(State {
                plan: DEFAULT_PLAN.to_string(),
                tasks,
            }),
            commits: Cell::new(0),
        }
    }

    pub fn snapshot(&self) -> State {
        self.state.borrow().clone()
    }

    pub fn commits(&self) -> u32 {
        self.commits.get()
    }
}

impl StateStore for MemoryStateStore {
    fn read(&self) -> Result<State> {
        Ok(self.snapshot())
    }

    fn update<F>(&self, _message: &str, mut mutate: F) -> Result<UpdateOutcome>
    where
        F: FnMut(State) -> Result<State>,
    {
        let current = self.snapshot();
        let next = mutate(current.clone())?;
        let changed = next != current;
        if changed {
            *self.state.borrow_mut() = next.clone();
            self.commits.set(self.commits.get() + 1);
        }
        Ok(UpdateOutcome {
            state: next,
            changed,
            attempts: 1,
        })
    }
}

/// `git clone -c` settings giving test repositories a commit identity.
pub fn identity_config() -> Vec<String> {
    vec![
        "user.name=Orchestrate Test".to_string(),
        "user.email=orchestrate@example.com".to_string(),
    ]
}

/// Run git in `dir`, panicking with stderr on failure.
pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .current_dir(dir)
        .args(args)
        .output()
        .expect("spawn git");
    assert!(
        output.status.success(),
        "git {} failed: {}",
        args.join(" "),
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// A bare `origin.git` with one commit on `main`, inside a temp directory.
pub struct TestRemote {
    dir: TempDir,
    origin: PathBuf,
}

impl TestRemote {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let origin = dir.path().join("origin.git");
        let seed = dir.path().join("seed");
        git(dir.path(), &["init", "--bare", "-b", "main", "origin.git"]);
        git(dir.path(), &["init", "-b", "main", "seed"]);
        fs::write(seed.join("README.md"), "# Demo\n").expect("write readme");
        git(&seed, &["add", "README.md"]);
        git(
            &seed,
            &[
                "-c",
                "user.name=Seed",
                "-c",
                "user.email=seed@example.com",
                "commit",
                "-m",
                "Initial commit",
            ],
        );
        let origin_arg = origin.display().to_string();
        git(&seed, &["push", &origin_arg, "main"]);
        Self { dir, origin }
    }

    pub fn url(&self) -> String {
        self.origin.display().to_string()
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Commit id of `branch` on the remote.
    pub fn rev(&self, branch: &str) -> String {
        git(&self.origin, &["rev-parse", &format!("refs/heads/{branch}")])
    }

    /// Number of commits reachable from `branch` on the remote.
    pub fn commit_count(&self, branch: &str) -> usize {
        git(&self.origin, &["rev-list", "--count", &format!("refs/heads/{branch}")])
            .parse()
            .expect("commit count")
    }

    /// Install an executable hook script (e.g. `pre-receive`) in the remote.
    pub fn install_hook(&self, name: &str, script: &str) {
        use std::os::unix::fs::PermissionsExt;

        let hooks = self.origin.join("hooks");
        fs::create_dir_all(&hooks).expect("create hooks dir");
        let path = hooks.join(name);
        fs::write(&path, script).expect("write hook");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod hook");
    }

    /// Initialize a workspace named `name` next to the remote.
    pub fn workspace(&self, name: &str) -> TestWorkspace {
        let options = InitOptions {
            repo: self.url(),
            dir: Some(PathBuf::from(name)),
            clone_config: identity_config(),
            ..InitOptions::default()
        };
        let report = init_workspace(self.dir.path(), &options).expect("init workspace");
        TestWorkspace::open(report.root)
    }
}

impl Default for TestRemote {
    fn default() -> Self {
        Self::new()
    }
}

/// An initialized workspace (lives as long as its [`TestRemote`]).
pub struct TestWorkspace {
    pub paths: ProjectPaths,
    pub config: OrchestrateConfig,
}

impl TestWorkspace {
    pub fn open(root: PathBuf) -> Self {
        let paths = ProjectPaths::new(root);
        let config = load_config(&paths.config_path).expect("load config");
        Self { paths, config }
    }

    pub fn root(&self) -> &Path {
        &self.paths.root
    }

    pub fn store(&self) -> GitStateStore {
        GitStateStore::new(self.paths.clone(), self.config.state_branch.clone())
    }
}
