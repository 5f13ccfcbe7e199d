//! Fatal conditions callers need to tell apart.
//!
//! Everything else travels as `anyhow::Error`; the CLI downcasts to
//! [`CobblerError`] to pick an exit code.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CobblerError {
    /// Uncommitted changes block a lifecycle transition.
    #[error("working tree at {path} has uncommitted changes; commit or stash them first")]
    DirtyWorktree { path: String },

    /// More than one generation branch and no configured choice.
    #[error(
        "multiple generation branches found ({}); set generation.branch in the config to pick one",
        candidates.join(", ")
    )]
    AmbiguousGeneration { candidates: Vec<String> },

    #[error("no generation branch found; start one with `cobbler generation start`")]
    NoGeneration,

    #[error("generation {name} already exists ({reference})")]
    GenerationExists { name: String, reference: String },

    #[error(
        "current branch {branch} is not a generation branch; check one out or run `cobbler generation resume`"
    )]
    NotOnGeneration { branch: String },

    /// Generation branch named in config does not exist.
    #[error("configured generation branch {branch} does not exist; fix generation.branch")]
    MissingGeneration { branch: String },

    #[error("could not create worktree {path} for {branch}: {message}")]
    WorktreeCreate {
        branch: String,
        path: String,
        message: String,
    },

    /// `git merge` of a generation into its base stopped on conflicts.
    #[error("merging {generation} into {base} failed: {message}")]
    MergeConflict {
        generation: String,
        base: String,
        message: String,
    },
}

/// Find a [`CobblerError`] anywhere in an error chain.
pub fn find_cobbler_error(err: &anyhow::Error) -> Option<&CobblerError> {
    err.chain().find_map(|cause| cause.downcast_ref::<CobblerError>())
}
