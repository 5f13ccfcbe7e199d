//! Generation lifecycle manager.
//!
//! A generation is a branch named `<prefix><timestamp>` plus its lifecycle
//! tags. The branch that is checked out is the pointer to the active
//! generation; tags record how far each generation got.

use std::collections::BTreeSet;

use anyhow::Result;

use crate::core::naming::{BASE_BRANCH_MARKER, DEFAULT_BASE_BRANCH, parse_tag};
use crate::error::CobblerError;
use crate::io::git::Git;
use crate::io::workspace::parse_base_marker;
use crate::session::Session;

mod list;
mod reset;
mod run;
mod start;
mod stop;

pub use list::{GenerationInfo, list_generations};
pub use reset::{ResetReport, reset_generations};
pub use run::{ResumeReport, SavedState, resume_generation, run_generation};
pub use start::{StartReport, start_generation, start_generation_named};
pub use stop::{StopReport, stop_generation};

/// Fail with [`CobblerError::DirtyWorktree`] unless the main checkout is clean.
fn ensure_clean(git: &Git) -> Result<()> {
    if git.is_clean()? {
        return Ok(());
    }
    Err(CobblerError::DirtyWorktree {
        path: git.workdir().display().to_string(),
    }
    .into())
}

/// Generation that resume and stop act on.
///
/// `generation.branch` from config wins (and must exist); otherwise exactly
/// one generation branch must exist.
pub fn resolve_target(session: &Session<'_>) -> Result<String> {
    if let Some(branch) = session.config.branch_override() {
        if !session.git().branch_exists(branch)? {
            return Err(CobblerError::MissingGeneration {
                branch: branch.to_string(),
            }
            .into());
        }
        return Ok(branch.to_string());
    }
    let mut candidates = session.generation_branches()?;
    match candidates.len() {
        0 => Err(CobblerError::NoGeneration.into()),
        1 => Ok(candidates.swap_remove(0)),
        _ => Err(CobblerError::AmbiguousGeneration { candidates }.into()),
    }
}

/// Base branch of `generation`: config override, then the committed marker,
/// then `main`.
fn recorded_base(session: &Session<'_>, generation: &str) -> Result<String> {
    if let Some(base) = session.config.base_branch_override() {
        return Ok(base.to_string());
    }
    let marker = session.git().show_file(generation, BASE_BRANCH_MARKER)?;
    Ok(marker
        .as_deref()
        .and_then(parse_base_marker)
        .unwrap_or_else(|| DEFAULT_BASE_BRANCH.to_string()))
}

/// Every generation name known from lifecycle tags or branches.
fn known_generations(session: &Session<'_>) -> Result<BTreeSet<String>> {
    let tags = session
        .git()
        .list_tags(&format!("{}*", session.prefix()))?;
    let mut names: BTreeSet<String> = tags
        .iter()
        .filter_map(|tag| parse_tag(tag))
        .map(|(name, _)| name)
        .filter(|name| session.is_generation(name))
        .map(str::to_string)
        .collect();
    names.extend(session.generation_branches()?);
    Ok(names)
}
