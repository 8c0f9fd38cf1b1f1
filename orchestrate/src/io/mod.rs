//! I/O helpers for orchestrate commands.

pub mod brief;
pub mod clock;
pub mod config;
pub mod git;
pub mod init;
pub mod lock;
pub mod paths;
pub mod process;
pub mod run_registry;
pub mod setup;
pub mod state_store;
pub mod supervisor;
