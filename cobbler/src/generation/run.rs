use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use crate::core::budget::cycle_quota;
use crate::cycle::{CycleReport, CycleSummary, run_cycles};
use crate::error::CobblerError;
use crate::recovery::{RecoveryReport, recover};
use crate::session::Session;
use crate::stitch::{StitchReport, stitch_on};

use super::resolve_target;

/// Run the cycle scheduler on the generation that is checked out.
pub fn run_generation<F: FnMut(&CycleSummary)>(
    session: &mut Session<'_>,
    on_cycle: F,
) -> Result<CycleReport> {
    let current = session.git().current_branch()?;
    if !session.is_generation(&current) {
        return Err(CobblerError::NotOnGeneration { branch: current }.into());
    }
    session.set_generation(current);
    let span = session.span();
    let _entered = span.enter();
    info!("running generation");
    run_cycles(session, 0, on_cycle)
}

/// What resume did with uncommitted changes on the branch it left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SavedState {
    Clean,
    /// Committed as WIP on the generation branch itself.
    Committed,
    /// Stashed before switching away from another branch.
    Stashed,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResumeReport {
    pub generation: String,
    pub saved: SavedState,
    pub recovery: RecoveryReport,
    /// Stitch pass over tasks that were already ready.
    pub drain: StitchReport,
    pub cycles: CycleReport,
}

/// Switch to the target generation, repair it and continue working.
pub fn resume_generation<F: FnMut(&CycleSummary)>(
    session: &mut Session<'_>,
    on_cycle: F,
) -> Result<ResumeReport> {
    let target = resolve_target(session)?;
    let git = session.git();
    let current = git.current_branch()?;

    let saved = if current == target {
        if git.commit_all("WIP: save state before resume")? {
            SavedState::Committed
        } else {
            SavedState::Clean
        }
    } else if git.stash(&format!("cobbler: save {current} before resuming {target}"))? {
        SavedState::Stashed
    } else {
        SavedState::Clean
    };
    if current != target {
        git.checkout_branch(&target)
            .with_context(|| format!("check out generation {target}"))?;
    }

    session.set_generation(target.clone());
    let span = session.span();
    let _entered = span.enter();
    info!(saved = ?saved, "resuming generation");

    let recovery = recover(session, &target);
    let limits = &session.config.cycle;
    let drain = match cycle_quota(0, limits.stitch_total, 0) {
        Some(limit) => stitch_on(session, &target, limit, recovery.clone())?,
        None => StitchReport::default(),
    };
    let cycles = run_cycles(session, drain.attempted(), on_cycle)?;

    Ok(ResumeReport {
        generation: target,
        saved,
        recovery,
        drain,
        cycles,
    })
}
