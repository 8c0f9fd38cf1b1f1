//! `orchestrate init`: bare clone, state branch and config scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use tracing::{debug, info, instrument};

use crate::core::types::{State, TasksFile};
use crate::io::brief::DEFAULT_PLAN;
use crate::io::config::{CommandList, OrchestrateConfig, SetupConfig, write_config};
use crate::io::git::{Git, PushOutcome};
use crate::io::paths::ProjectPaths;
use crate::io::state_store::{PLAN_FILE, StateWorktree, TASKS_FILE, write_state_dir};

const DEFAULT_SETUP_COMMAND: &str = "npm install";

/// Options for [`init_workspace`].
#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    /// Repository URL or path to clone.
    pub repo: String,
    /// Target directory; defaults to the repository name.
    pub dir: Option<PathBuf>,
    /// Allow setup commands to be written to the config.
    pub trust: bool,
    /// Custom setup command (requires `trust`).
    pub setup: Option<String>,
    /// `key=value` settings applied to the bare clone (`git clone -c`).
    pub clone_config: Vec<String>,
}

/// What `init` created.
#[derive(Debug, Clone)]
pub struct InitReport {
    pub root: PathBuf,
    pub default_branch: String,
    pub state_branch: String,
}

/// Create a workspace for `options.repo` under `cwd`.
#[instrument(skip_all, fields(repo = %options.repo))]
pub fn init_workspace(cwd: &Path, options: &InitOptions) -> Result<InitReport> {
    if options.setup.is_some() && !options.trust {
        bail!("use --trust to enable setup commands");
    }

    let dir = options
        .dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(default_dir_from_repo(&options.repo)));
    let root = cwd.join(dir);
    ensure_empty_dir(&root)?;

    let paths = ProjectPaths::new(&root);
    paths.ensure_dirs()?;

    let git = Git::clone_bare(&options.repo, &paths.bare_dir, &options.clone_config)?;
    git.config_set("remote.origin.fetch", "+refs/heads/*:refs/remotes/origin/*")?;
    git.fetch_all("origin")?;

    let default_branch = detect_default_branch(&git)?;
    debug!(default_branch = %default_branch, "default branch detected");

    let mut config = OrchestrateConfig::new(options.repo.clone(), default_branch.clone());
    init_state_branch(&paths, &git, &config.state_branch, &default_branch)?;

    let setup_command = options
        .setup
        .clone()
        .or_else(|| options.trust.then(|| DEFAULT_SETUP_COMMAND.to_string()));
    config.setup = setup_command.map(|command| SetupConfig {
        command: CommandList::One(command),
        shell: true,
        cwd: Some(".".to_string()),
        timeout_secs: None,
        env: Default::default(),
    });
    write_config(&paths.config_path, &config)?;

    info!(root = %root.display(), "workspace initialized");
    Ok(InitReport {
        root,
        default_branch,
        state_branch: config.state_branch,
    })
}

/// Repository basename without `.git`, or `project`.
pub fn default_dir_from_repo(repo: &str) -> String {
    let trimmed = repo.trim_end_matches('/');
    let base = trimmed
        .rsplit(['/', ':'])
        .next()
        .unwrap_or_default();
    let base = base
        .strip_suffix(".git")
        .or_else(|| base.strip_suffix(".GIT"))
        .unwrap_or(base);
    if base.is_empty() {
        "project".to_string()
    } else {
        base.to_string()
    }
}

fn ensure_empty_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        fs::create_dir_all(dir).with_context(|| format!("create directory {}", dir.display()))?;
        return Ok(());
    }
    let mut entries = fs::read_dir(dir).with_context(|| format!("read directory {}", dir.display()))?;
    if entries.next().is_some() {
        return Err(anyhow!("target directory is not empty: {}", dir.display()));
    }
    Ok(())
}

/// Pick the branch task worktrees start from.
pub fn detect_default_branch(git: &Git) -> Result<String> {
    for candidate in ["main", "master"] {
        if git.branch_exists(candidate)? {
            return Ok(candidate.to_string());
        }
    }
    if let Some(target) = git.symbolic_ref("refs/remotes/origin/HEAD")?
        && let Some(branch) = target.rsplit('/').next()
        && !branch.is_empty()
    {
        return Ok(branch.to_string());
    }
    for candidate in ["main", "master"] {
        if git.ref_exists(&format!("refs/remotes/origin/{candidate}"))? {
            return Ok(candidate.to_string());
        }
    }
    if let Some(first) = git.list_refs("refs/heads", 2)?.into_iter().next() {
        return Ok(first);
    }
    if let Some(first) = git
        .list_refs("refs/remotes/origin", 3)?
        .into_iter()
        .find(|name| name != "HEAD")
    {
        return Ok(first);
    }
    Ok("main".to_string())
}

/// Resolve the start point for new worktrees, preferring the remote tip.
pub fn default_start_point(git: &Git, default_branch: &str) -> Result<String> {
    let branch = default_branch
        .strip_prefix("origin/")
        .unwrap_or(default_branch);
    if git.ref_exists(&format!("refs/remotes/origin/{branch}"))? {
        return Ok(format!("origin/{branch}"));
    }
    if git.branch_exists(branch)? {
        return Ok(branch.to_string());
    }
    Err(anyhow!("default branch {branch} not found locally or on origin"))
}

/// Ensure the state branch exists locally, creating and pushing it if needed.
fn init_state_branch(
    paths: &ProjectPaths,
    git: &Git,
    state_branch: &str,
    default_branch: &str,
) -> Result<()> {
    let local_ref = format!("refs/heads/{state_branch}");
    let remote_ref = format!("refs/remotes/origin/{state_branch}");
    if git.ref_exists(&local_ref)? {
        return Ok(());
    }
    if git.ref_exists(&remote_ref)? {
        return git.update_ref(&local_ref, &remote_ref);
    }

    let start = default_start_point(git, default_branch)?;
    let worktree = StateWorktree::create(paths, &start)?;
    let wt_git = Git::new(worktree.path());
    wt_git.checkout_orphan(state_branch)?;
    wt_git.clear_worktree()?;
    let state = State {
        plan: DEFAULT_PLAN.to_string(),
        tasks: TasksFile::default(),
    };
    write_state_dir(worktree.path(), &state)?;
    wt_git.add(&[PLAN_FILE, TASKS_FILE])?;
    wt_git.commit("Initialize orchestrate state")?;
    if wt_git.push("origin", "HEAD", state_branch)? == PushOutcome::RemoteAdvanced {
        bail!("state branch {state_branch} was created on origin concurrently; run init again");
    }

    // The orphan commit already created the local branch.
    let head = wt_git.rev_parse("HEAD")?;
    git.update_ref(&remote_ref, &head)?;
    info!(branch = state_branch, "state branch created");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_dir_strips_git_suffix() {
        assert_eq!(default_dir_from_repo("git@example.com:team/repo.git"), "repo");
        assert_eq!(default_dir_from_repo("https://example.com/team/app/"), "app");
        assert_eq!(default_dir_from_repo("/srv/git/tool.git"), "tool");
        assert_eq!(default_dir_from_repo(".git"), "project");
    }

    #[test]
    fn refuses_non_empty_target() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("README.md"), "hi").expect("write");
        let err = ensure_empty_dir(temp.path()).unwrap_err();
        assert!(err.to_string().contains("not empty"));
    }

    #[test]
    fn setup_requires_trust() {
        let temp = tempfile::tempdir().expect("tempdir");
        let options = InitOptions {
            repo: "/nowhere/repo.git".to_string(),
            setup: Some("make".to_string()),
            ..InitOptions::default()
        };
        let err = init_workspace(temp.path(), &options).unwrap_err();
        assert!(err.to_string().contains("--trust"));
        assert!(!temp.path().join("repo").exists());
    }
}
