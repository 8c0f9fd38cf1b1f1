//! Multi-agent task orchestration over a shared git repository.
//!
//! Tasks live in `tasks.json` on a dedicated state branch of the remote. Every
//! mutation is an optimistic fetch/modify/commit/push cycle, so several
//! workspaces on different machines can share one queue. Claimed tasks get
//! their own branch and worktree, and agents run inside them.
//!
//! - **[`core`]**: Pure, deterministic logic (scheduling, mutations, invariants).
//!   No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (filesystem, git, processes, locks).
//!
//! Command modules ([`tasks`], [`claim`], [`launch`], [`monitor`]) coordinate
//! core logic with I/O to implement CLI commands.

pub mod claim;
pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod launch;
pub mod logging;
pub mod monitor;
pub mod tasks;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
