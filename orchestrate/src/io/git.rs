//! Git adapter for orchestrate.
//!
//! All repository access goes through `git` subprocesses. A [`Git`] either runs
//! inside a working directory (a worktree) or against the workspace's bare
//! clone via `--git-dir`.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};

/// Parsed `git status --porcelain` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// 2-letter XY code, or "??" for untracked.
    pub code: String,
    /// Path for the changed file.
    pub path: String,
}

/// Result of pushing to a remote branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    Pushed,
    /// The remote branch moved past our base; the push was refused.
    RemoteAdvanced,
}

#[derive(Debug, Clone)]
enum Location {
    Workdir(PathBuf),
    GitDir(PathBuf),
}

/// Wrapper for executing git commands.
#[derive(Debug, Clone)]
pub struct Git {
    location: Location,
}

impl Git {
    /// Run commands inside a working tree.
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            location: Location::Workdir(workdir.into()),
        }
    }

    /// Run commands against a bare repository.
    pub fn bare(git_dir: impl Into<PathBuf>) -> Self {
        Self {
            location: Location::GitDir(git_dir.into()),
        }
    }

    /// `git clone --bare` with optional `-c key=value` settings for the new repo.
    #[instrument(skip_all, fields(remote = %remote, dest = %dest.display()))]
    pub fn clone_bare(remote: &str, dest: &Path, config: &[String]) -> Result<Self> {
        let mut cmd = Command::new("git");
        cmd.arg("clone").arg("--bare");
        for entry in config {
            cmd.arg("-c").arg(entry);
        }
        cmd.arg(remote).arg(dest);
        let output = cmd
            .output()
            .with_context(|| format!("spawn git clone --bare {remote}"))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git clone --bare {remote} failed: {}", stderr.trim()));
        }
        debug!("bare clone created");
        Ok(Self::bare(dest))
    }

    /// True if `refname` (fully qualified) exists.
    pub fn ref_exists(&self, refname: &str) -> Result<bool> {
        let args = ["show-ref", "--verify", "--quiet", refname];
        let output = self.run(&args)?;
        match output.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(command_error(&args, &output)),
        }
    }

    /// Check whether a local branch exists.
    pub fn branch_exists(&self, branch: &str) -> Result<bool> {
        self.ref_exists(&format!("refs/heads/{branch}"))
    }

    /// Point `refname` at `target` unconditionally.
    pub fn update_ref(&self, refname: &str, target: &str) -> Result<()> {
        self.run_checked(&["update-ref", refname, target])?;
        Ok(())
    }

    pub fn rev_parse(&self, rev: &str) -> Result<String> {
        let out = self.run_capture(&["rev-parse", "--verify", rev])?;
        Ok(out.trim().to_string())
    }

    pub fn config_set(&self, key: &str, value: &str) -> Result<()> {
        self.run_checked(&["config", key, value])?;
        Ok(())
    }

    /// Fetch `refspec` from `remote`.
    #[instrument(skip_all, fields(remote = %remote, refspec = %refspec))]
    pub fn fetch(&self, remote: &str, refspec: &str) -> Result<()> {
        debug!("fetching");
        self.run_checked(&["fetch", remote, refspec])?;
        Ok(())
    }

    /// [`Git::fetch`] with up to `attempts` tries and a linear backoff of
    /// `backoff * attempt` between them.
    pub fn fetch_with_retry(
        &self,
        remote: &str,
        refspec: &str,
        attempts: u32,
        backoff: Duration,
    ) -> Result<()> {
        let mut attempt = 1;
        loop {
            match self.fetch(remote, refspec) {
                Ok(()) => return Ok(()),
                Err(err) if attempt < attempts => {
                    warn!(attempt, err = %format!("{err:#}"), "fetch failed; retrying");
                    thread::sleep(backoff * attempt);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Fetch every branch into `refs/remotes/<remote>/*`.
    pub fn fetch_all(&self, remote: &str) -> Result<()> {
        self.run_checked(&["fetch", "--prune", remote])?;
        Ok(())
    }

    /// Target of a symbolic ref such as `refs/remotes/origin/HEAD`, if set.
    pub fn symbolic_ref(&self, refname: &str) -> Result<Option<String>> {
        let output = self.run(&["symbolic-ref", "--quiet", refname])?;
        if !output.status.success() {
            return Ok(None);
        }
        let target = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok((!target.is_empty()).then_some(target))
    }

    /// Short names of refs under `prefix` (e.g. `refs/heads`).
    pub fn list_refs(&self, prefix: &str, strip: u32) -> Result<Vec<String>> {
        let format = format!("--format=%(refname:strip={strip})");
        let out = self.run_capture(&["for-each-ref", &format, prefix])?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Check out `commitish` with a detached HEAD into a new worktree at `path`.
    #[instrument(skip_all, fields(path = %path.display(), commitish = %commitish))]
    pub fn worktree_add_detached(&self, path: &Path, commitish: &str) -> Result<()> {
        self.run_checked(&[
            OsStr::new("worktree"),
            OsStr::new("add"),
            OsStr::new("--detach"),
            path.as_os_str(),
            OsStr::new(commitish),
        ])?;
        Ok(())
    }

    /// Create `branch` at `start_point` and check it out into a new worktree.
    #[instrument(skip_all, fields(path = %path.display(), branch = %branch, start_point = %start_point))]
    pub fn worktree_add_branch(&self, path: &Path, branch: &str, start_point: &str) -> Result<()> {
        debug!("adding worktree");
        self.run_checked(&[
            OsStr::new("worktree"),
            OsStr::new("add"),
            OsStr::new("-b"),
            OsStr::new(branch),
            path.as_os_str(),
            OsStr::new(start_point),
        ])?;
        Ok(())
    }

    /// Start an orphan branch in this worktree.
    pub fn checkout_orphan(&self, branch: &str) -> Result<()> {
        self.run_checked(&["checkout", "--orphan", branch])?;
        Ok(())
    }

    /// Empty this worktree: unstage and delete every file, tracked or not.
    pub fn clear_worktree(&self) -> Result<()> {
        self.run_checked(&["rm", "-r", "-f", "-q", "--ignore-unmatch", "."])?;
        self.run_checked(&["clean", "-fdx"])?;
        Ok(())
    }

    /// Force-remove the worktree at `path`.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn worktree_remove(&self, path: &Path) -> Result<()> {
        self.run_checked(&[
            OsStr::new("worktree"),
            OsStr::new("remove"),
            OsStr::new("--force"),
            path.as_os_str(),
        ])?;
        Ok(())
    }

    /// Drop administrative entries for worktrees whose directories are gone.
    pub fn worktree_prune(&self) -> Result<()> {
        self.run_checked(&["worktree", "prune"])?;
        Ok(())
    }

    /// Get status entries (including untracked) in porcelain format.
    pub fn status_porcelain(&self) -> Result<Vec<StatusEntry>> {
        let out = self.run_capture(&["status", "--porcelain=v1", "-uall"])?;
        let mut entries = Vec::new();
        for line in out.lines() {
            if line.trim().is_empty() {
                continue;
            }
            entries.push(parse_status_line(line)?);
        }
        Ok(entries)
    }

    /// Stage the given paths.
    pub fn add(&self, paths: &[&str]) -> Result<()> {
        let mut args = vec!["add", "--"];
        args.extend_from_slice(paths);
        self.run_checked(&args)?;
        Ok(())
    }

    /// Commit staged changes with a message.
    #[instrument(skip_all)]
    pub fn commit(&self, message: &str) -> Result<()> {
        debug!("committing staged changes");
        self.run_checked(&["commit", "-m", message])?;
        Ok(())
    }

    /// Push `src` to `refs/heads/<branch>` on `remote`.
    ///
    /// A rejection caused by the remote moving ahead is reported as
    /// [`PushOutcome::RemoteAdvanced`]; every other failure is an error.
    #[instrument(skip_all, fields(remote = %remote, branch = %branch))]
    pub fn push(&self, remote: &str, src: &str, branch: &str) -> Result<PushOutcome> {
        let refspec = format!("{src}:refs/heads/{branch}");
        let args = ["push", remote, refspec.as_str()];
        let output = self.run(&args)?;
        if output.status.success() {
            debug!("push accepted");
            return Ok(PushOutcome::Pushed);
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if is_remote_advanced(&stderr) {
            warn!("push rejected: remote advanced");
            return Ok(PushOutcome::RemoteAdvanced);
        }
        Err(command_error(&args, &output))
    }

    fn run_capture<S: AsRef<OsStr>>(&self, args: &[S]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked<S: AsRef<OsStr>>(&self, args: &[S]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            return Err(command_error(args, &output));
        }
        Ok(output)
    }

    fn run<S: AsRef<OsStr>>(&self, args: &[S]) -> Result<Output> {
        let mut cmd = Command::new("git");
        match &self.location {
            Location::Workdir(dir) => {
                cmd.current_dir(dir);
            }
            Location::GitDir(dir) => {
                cmd.arg("--git-dir").arg(dir);
            }
        }
        cmd.args(args)
            .output()
            .with_context(|| format!("spawn git {}", render_args(args)))
    }
}

/// True when push stderr says the remote ref moved past our base.
pub fn is_remote_advanced(stderr: &str) -> bool {
    const MARKERS: [&str; 4] = [
        "non-fast-forward",
        "(fetch first)",
        "but expected",
        "incorrect old value provided",
    ];
    MARKERS.iter().any(|marker| stderr.contains(marker))
}

fn command_error<S: AsRef<OsStr>>(args: &[S], output: &Output) -> anyhow::Error {
    let stderr = String::from_utf8_lossy(&output.stderr);
    anyhow!("git {} failed: {}", render_args(args), stderr.trim())
}

fn render_args<S: AsRef<OsStr>>(args: &[S]) -> String {
    args.iter()
        .map(|arg| arg.as_ref().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

fn parse_status_line(line: &str) -> Result<StatusEntry> {
    if let Some(path) = line.strip_prefix("?? ") {
        return Ok(StatusEntry {
            code: "??".to_string(),
            path: path.trim().to_string(),
        });
    }
    if line.len() < 4 {
        return Err(anyhow!("unexpected porcelain line: '{line}'"));
    }
    let code = line[..2].to_string();
    let mut path = line[3..].trim().to_string();
    if let Some((_, new)) = path.split_once("->") {
        path = new.trim().to_string();
    }
    Ok(StatusEntry { code, path })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_untracked_line() {
        let e = parse_status_line("?? tasks.json").expect("parse");
        assert_eq!(
            e,
            StatusEntry {
                code: "??".to_string(),
                path: "tasks.json".to_string()
            }
        );
    }

    #[test]
    fn parses_modified_line() {
        let e = parse_status_line(" M Plan.md").expect("parse");
        assert_eq!(e.code, " M");
        assert_eq!(e.path, "Plan.md");
    }

    #[test]
    fn classifies_push_rejections() {
        let stale = " ! [rejected]        HEAD -> orchestrate/state (non-fast-forward)\n";
        let fetch_first = " ! [rejected]        HEAD -> orchestrate/state (fetch first)\n";
        let race = "error: cannot lock ref 'refs/heads/orchestrate/state': is at 1a2b but expected 3c4d\n";
        let denied = "remote: permission denied\nfatal: unable to access\n";

        assert!(is_remote_advanced(stale));
        assert!(is_remote_advanced(fetch_first));
        assert!(is_remote_advanced(race));
        assert!(!is_remote_advanced(denied));
    }
}
