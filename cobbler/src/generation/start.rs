use anyhow::{Context, Result, anyhow};
use chrono::Local;
use serde::Serialize;
use tracing::info;

use crate::core::naming::{TagKind, generation_name, tag_name};
use crate::error::CobblerError;
use crate::io::workspace::{remove_source_dirs, write_base_marker, write_seed_files};
use crate::session::Session;

use super::ensure_clean;

#[derive(Debug, Clone, Serialize)]
pub struct StartReport {
    pub generation: String,
    pub base: String,
    pub start_tag: String,
}

/// Start a generation named after the current local time.
pub fn start_generation(session: &mut Session<'_>) -> Result<StartReport> {
    let name = generation_name(session.prefix(), Local::now().naive_local());
    start_generation_named(session, &name)
}

/// Start generation `name` from the current branch.
///
/// Nothing is tagged or branched unless the working tree is clean.
pub fn start_generation_named(session: &mut Session<'_>, name: &str) -> Result<StartReport> {
    if !session.is_generation(name) {
        return Err(anyhow!(
            "{name} is not a generation name for prefix {}",
            session.prefix()
        ));
    }
    let git = session.git();
    ensure_clean(&git)?;
    let base = git.current_branch()?;
    if session.is_generation(&base) {
        return Err(anyhow!(
            "already on generation {base}; stop it before starting another"
        ));
    }

    let start_tag = tag_name(name, TagKind::Start);
    if git.branch_exists(name)? {
        return Err(CobblerError::GenerationExists {
            name: name.to_string(),
            reference: format!("branch {name}"),
        }
        .into());
    }
    if git.tag_exists(&start_tag)? {
        return Err(CobblerError::GenerationExists {
            name: name.to_string(),
            reference: format!("tag {start_tag}"),
        }
        .into());
    }

    git.create_tag(&start_tag)?;
    git.checkout_new_branch(name)?;
    session.set_generation(name);
    let span = session.span();
    let _entered = span.enter();
    info!(base = %base, "starting generation");

    write_base_marker(session.root(), &base)?;
    session.tracker.reset().context("reset tracker")?;
    session.tracker.init(name).context("initialise tracker")?;
    let generation = &session.config.generation;
    remove_source_dirs(session.root(), &generation.source_dirs)?;
    write_seed_files(session.root(), &generation.seed_files)?;

    git.add_all()?;
    git.commit_allow_empty(&format!("Start generation {name}"))?;

    Ok(StartReport {
        generation: name.to_string(),
        base,
        start_tag,
    })
}
