//! Deterministic, pure logic shared by the cobbler engine.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod advisory;
pub mod budget;
pub mod diffstat;
pub mod lifecycle;
pub mod naming;
pub mod task_state;
pub mod transcript;
pub mod types;
