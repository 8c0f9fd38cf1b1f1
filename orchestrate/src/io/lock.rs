//! Cross-process mutex backed by an exclusively created lock file.
//!
//! A holder that crashes leaves its lock file behind; nothing reclaims it.
//! Remove the file by hand after confirming the recorded pid is gone.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, instrument, warn};

use crate::error::OrchestrateError;
use crate::io::clock::now_rfc3339;

/// Retry policy for lock acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockOptions {
    /// Attempts after the first one before giving up.
    pub retries: u32,
    /// Fixed delay between attempts.
    pub delay: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            retries: 50,
            delay: Duration::from_millis(200),
        }
    }
}

/// Held lock; the file is removed on drop, including during unwinding.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    _file: File,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path)
            && err.kind() != ErrorKind::NotFound
        {
            warn!(path = %self.path.display(), err = %err, "failed to release lock");
        }
    }
}

/// Acquire the lock at `path`, retrying while another holder owns it.
#[instrument(skip_all, fields(path = %path.display()))]
pub fn acquire(path: &Path, options: LockOptions) -> Result<LockGuard> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create lock directory {}", parent.display()))?;
    }

    for attempt in 0..=options.retries {
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(mut file) => {
                writeln!(file, "{}\n{}", std::process::id(), now_rfc3339())
                    .with_context(|| format!("write lock {}", path.display()))?;
                debug!(attempt, "lock acquired");
                return Ok(LockGuard {
                    path: path.to_path_buf(),
                    _file: file,
                });
            }
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                if attempt < options.retries {
                    thread::sleep(options.delay);
                }
            }
            Err(err) => {
                return Err(err).with_context(|| format!("create lock {}", path.display()));
            }
        }
    }

    warn!(attempts = options.retries + 1, "lock acquisition timed out");
    Err(OrchestrateError::LockTimeout {
        path: path.to_path_buf(),
        attempts: options.retries + 1,
    }
    .into())
}

/// Run `body` while holding the lock at `path`.
pub fn with_lock<T>(path: &Path, options: LockOptions, body: impl FnOnce() -> Result<T>) -> Result<T> {
    let _guard = acquire(path, options)?;
    body()
}
