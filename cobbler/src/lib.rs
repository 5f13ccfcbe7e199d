//! Generation lifecycle manager and task execution engine for agent-driven
//! development.
//!
//! A generation is a branch where an agent rebuilds generated source from
//! specifications. Work on it is split into tracker tasks; each task is run
//! by an agent in its own git worktree and merged back when it succeeds.
//!
//! - **[`core`]**: pure logic (naming, lifecycle states, budgets, transcript
//!   parsing). No I/O.
//! - **[`io`]**: side effects (git, tracker CLI, agent process, history,
//!   prompt rendering, config).
//!
//! Orchestration modules ([`stitch`], [`measure`], [`recovery`], [`cycle`],
//! [`generation`]) combine the two behind a [`session::Session`].

pub mod core;
pub mod cycle;
pub mod error;
pub mod exit_codes;
pub mod generation;
pub mod io;
pub mod logging;
pub mod measure;
pub mod recovery;
pub mod session;
pub mod stitch;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
