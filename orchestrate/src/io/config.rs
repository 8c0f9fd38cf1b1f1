//! Workspace configuration stored under `.orchestrate/config.toml`.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::OrchestrateError;

pub const DEFAULT_STATE_BRANCH: &str = "orchestrate/state";

/// Workspace configuration (TOML).
///
/// Written once by `init` and afterwards edited by hand, mostly to add agents.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrchestrateConfig {
    /// Remote the bare clone was created from.
    pub remote: String,

    /// Branch new task worktrees start from.
    #[serde(default = "default_branch")]
    pub default_branch: String,

    /// Remote branch holding `Plan.md` and `tasks.json`.
    #[serde(default = "state_branch")]
    pub state_branch: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setup: Option<SetupConfig>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub agents: BTreeMap<String, AgentConfig>,
}

/// Commands run in every fresh worktree after a claim.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SetupConfig {
    pub command: CommandList,

    /// Run through `sh -c` instead of splitting on whitespace.
    #[serde(default)]
    pub shell: bool,

    /// Directory relative to the worktree.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

/// One command line or a sequence of them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum CommandList {
    One(String),
    Many(Vec<String>),
}

impl CommandList {
    pub fn commands(&self) -> Vec<&str> {
        match self {
            CommandList::One(command) => vec![command.as_str()],
            CommandList::Many(commands) => commands.iter().map(String::as_str).collect(),
        }
    }
}

/// How to launch a named agent. Placeholders like `{taskFile}` are expanded
/// in `args`, `prompt`, `cwd` and `env` values.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentConfig {
    pub command: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,

    /// Passed as the single argument when `args` is absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,

    #[serde(default)]
    pub shell: bool,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

fn default_branch() -> String {
    "main".to_string()
}

fn state_branch() -> String {
    DEFAULT_STATE_BRANCH.to_string()
}

impl OrchestrateConfig {
    pub fn new(remote: impl Into<String>, default_branch: impl Into<String>) -> Self {
        Self {
            remote: remote.into(),
            default_branch: default_branch.into(),
            state_branch: state_branch(),
            setup: None,
            agents: BTreeMap::new(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |details: String| -> anyhow::Error {
            OrchestrateError::SchemaInvalid {
                source_name: "config".to_string(),
                details,
            }
            .into()
        };

        if self.remote.trim().is_empty() {
            return Err(invalid("remote must be non-empty".to_string()));
        }
        if self.default_branch.trim().is_empty() {
            return Err(invalid("default_branch must be non-empty".to_string()));
        }
        if self.state_branch.trim().is_empty() {
            return Err(invalid("state_branch must be non-empty".to_string()));
        }
        if self.state_branch == self.default_branch {
            return Err(invalid(
                "state_branch must differ from default_branch".to_string(),
            ));
        }
        if let Some(setup) = &self.setup {
            let commands = setup.command.commands();
            if commands.is_empty() || commands.iter().any(|c| c.trim().is_empty()) {
                return Err(invalid(
                    "setup.command must be a non-empty string or array of non-empty strings"
                        .to_string(),
                ));
            }
            if setup.timeout_secs == Some(0) {
                return Err(invalid("setup.timeout_secs must be > 0".to_string()));
            }
        }
        for (name, agent) in &self.agents {
            if agent.command.trim().is_empty() {
                return Err(invalid(format!("agents.{name}.command must be non-empty")));
            }
        }
        Ok(())
    }
}

/// Load and validate config from a TOML file.
pub fn load_config(path: &Path) -> Result<OrchestrateConfig> {
    debug!(path = %path.display(), "loading config");
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: OrchestrateConfig = toml::from_str(&contents).map_err(|err| {
        OrchestrateError::SchemaInvalid {
            source_name: path.display().to_string(),
            details: err.message().to_string(),
        }
    })?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &OrchestrateConfig) -> Result<()> {
    cfg.validate()?;
    let buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
