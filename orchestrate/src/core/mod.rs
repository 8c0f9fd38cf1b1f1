//! Deterministic, pure logic for the task queue.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod interpolate;
pub mod invariants;
pub mod mutations;
pub mod scheduler;
pub mod types;
