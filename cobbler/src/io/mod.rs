//! Side-effecting adapters: git, issue tracker, agent processes and files.

pub mod agent;
pub mod config;
pub mod context;
pub mod git;
pub mod history;
pub mod process;
pub mod prompt;
pub mod tracker;
pub mod workspace;
