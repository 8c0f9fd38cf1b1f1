//! Stable exit codes for orchestrate CLI commands.

/// Command succeeded.
pub const OK: i32 = 0;
/// Command failed: invalid input, workspace, state, or a git/process error.
pub const INVALID: i32 = 1;
/// `orchestrate next` found no eligible task to claim.
pub const NO_TASK: i32 = 2;
