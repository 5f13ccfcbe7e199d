use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use tracing::{info, warn};

use crate::core::naming::{TagKind, revision, tag_name, version_tag};
use crate::error::CobblerError;
use crate::io::workspace::{remove_base_marker, remove_source_dirs};
use crate::session::Session;

use super::{ensure_clean, known_generations, recorded_base, resolve_target};

#[derive(Debug, Clone, Serialize)]
pub struct StopReport {
    pub generation: String,
    pub base: String,
    pub merged_tag: String,
    pub version_tag: String,
    pub revision: usize,
    /// Source files brought back from the start tag after the merge.
    pub restored: Vec<String>,
}

/// Finish a generation: tag it, merge it into its base, version-tag the
/// result and return the base to specification-only state.
pub fn stop_generation(session: &mut Session<'_>, name: Option<&str>) -> Result<StopReport> {
    let generation = match name {
        Some(name) => name.to_string(),
        None => resolve_target(session)?,
    };
    let git = session.git();
    if !git.branch_exists(&generation)? {
        return Err(anyhow!("generation branch {generation} does not exist"));
    }
    ensure_clean(&git)?;
    session.set_generation(generation.clone());
    let span = session.span();
    let _entered = span.enter();

    let base = recorded_base(session, &generation)?;
    info!(base = %base, "stopping generation");

    let finished_tag = tag_name(&generation, TagKind::Finished);
    if !git.tag_exists(&finished_tag)? {
        git.create_tag_at(&finished_tag, &generation)?;
    }
    git.checkout_branch(&base)
        .with_context(|| format!("check out base branch {base}"))?;

    let source_dirs = &session.config.generation.source_dirs;
    if remove_source_dirs(session.root(), source_dirs)? {
        git.commit_all(&format!("Remove generated source before merging {generation}"))?;
    }

    if let Err(err) = git.merge_no_ff(&generation, &format!("Merge generation {generation}")) {
        if let Err(abort_err) = git.merge_abort() {
            warn!(err = %format!("{abort_err:#}"), "merge abort failed");
        }
        return Err(CobblerError::MergeConflict {
            generation: generation.clone(),
            base: base.clone(),
            message: format!("{err:#}"),
        }
        .into());
    }

    let restored = restore_start_files(session, &generation)?;

    let merged_tag = tag_name(&generation, TagKind::Merged);
    git.create_tag(&merged_tag)?;
    let known = known_generations(session)?;
    let revision = revision(&generation, known.iter().map(String::as_str))?;
    let version = version_tag(&generation, revision)?;
    git.create_tag(&version)?;
    info!(tag = %version, "generation merged");

    let mut reset = remove_source_dirs(session.root(), source_dirs)?;
    reset |= remove_base_marker(session.root())?;
    if reset {
        git.commit_all(&format!("Reset {base} to specification-only state"))?;
    }
    git.delete_branch(&generation, true)?;

    Ok(StopReport {
        generation,
        base,
        merged_tag,
        version_tag: version,
        revision,
        restored,
    })
}

/// Restore source files present at the start tag but missing after the merge.
fn restore_start_files(session: &Session<'_>, generation: &str) -> Result<Vec<String>> {
    let git = session.git();
    let start_tag = tag_name(generation, TagKind::Start);
    if !git.tag_exists(&start_tag)? {
        return Ok(Vec::new());
    }
    let at_start = git.list_files_at(&start_tag, &session.config.generation.source_dirs)?;
    let missing: Vec<String> = at_start
        .into_iter()
        .filter(|file| !exists_in(session.root(), file))
        .collect();
    if missing.is_empty() {
        return Ok(missing);
    }
    info!(files = missing.len(), "restoring source files from start tag");
    git.checkout_paths_from(&start_tag, &missing)?;
    git.commit_all(&format!("Restore source files from {start_tag}"))?;
    Ok(missing)
}

fn exists_in(root: &Path, file: &str) -> bool {
    root.join(file).exists()
}
