use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use crate::core::advisory::{Advisories, Degradation};
use crate::core::lifecycle::group_tags;
use crate::core::naming::{BASE_BRANCH_MARKER, DEFAULT_BASE_BRANCH, TagKind, tag_name};
use crate::io::git::Git;
use crate::io::workspace::{parse_base_marker, remove_base_marker, remove_source_dirs};
use crate::recovery::{owned_task_branches, remove_worktree};
use crate::session::Session;

#[derive(Debug, Clone, Default, Serialize)]
pub struct ResetReport {
    pub base: String,
    pub removed_branches: Vec<String>,
    /// Generations relabelled with an `-abandoned` tag.
    pub abandoned: Vec<String>,
    pub committed: bool,
    pub degraded: Vec<Degradation>,
}

/// Destructive development reset: drop every generation branch and task
/// branch, mark unmerged generations abandoned and wipe generated source on
/// the base branch.
pub fn reset_generations(session: &Session<'_>) -> Result<ResetReport> {
    let git = session.git();
    let current = git.current_branch()?;
    let base = reset_base(session, &current)?;
    info!(base = %base, "resetting generations");
    if current != base {
        git.checkout_branch(&base)
            .with_context(|| format!("check out base branch {base}"))?;
    }

    let mut advisories = Advisories::new();
    let mut report = ResetReport {
        base: base.clone(),
        ..ResetReport::default()
    };
    let worktrees = advisories
        .absorb("list-worktrees", git.worktree_list())
        .unwrap_or_default();
    let generations = session.generation_branches()?;

    for owner in generations.iter().chain(std::iter::once(&base)) {
        let task_branches = advisories
            .absorb("list-task-branches", owned_task_branches(&git, owner))
            .unwrap_or_default();
        for branch in task_branches {
            remove_worktree(session, &worktrees, &branch, &mut advisories);
            if advisories
                .absorb("delete-branch", git.delete_branch(&branch, true))
                .is_some()
            {
                report.removed_branches.push(branch);
            }
        }
    }
    advisories.absorb("worktree-prune", git.worktree_prune());
    for generation in &generations {
        if advisories
            .absorb("delete-branch", git.delete_branch(generation, true))
            .is_some()
        {
            report.removed_branches.push(generation.clone());
        }
    }

    report.abandoned = abandon_unmerged(session, &git, &mut advisories)?;

    let source_dirs = &session.config.generation.source_dirs;
    let mut changed = remove_source_dirs(session.root(), source_dirs)?;
    changed |= remove_base_marker(session.root())?;
    advisories.absorb("tracker-reset", session.tracker.reset());
    if changed || !git.is_clean()? {
        report.committed = git.commit_all(&format!("Reset {base} to specification-only state"))?;
    }
    report.degraded = advisories.into_vec();
    Ok(report)
}

/// Base for reset: config override, the marker of the current generation,
/// the current branch if it is not a generation, else `main`.
fn reset_base(session: &Session<'_>, current: &str) -> Result<String> {
    if let Some(base) = session.config.base_branch_override() {
        return Ok(base.to_string());
    }
    if !session.is_generation(current) {
        return Ok(current.to_string());
    }
    let marker = session.git().show_file(current, BASE_BRANCH_MARKER)?;
    Ok(marker
        .as_deref()
        .and_then(parse_base_marker)
        .unwrap_or_else(|| DEFAULT_BASE_BRANCH.to_string()))
}

/// Collapse the tags of every never-merged generation into one `-abandoned` tag.
///
/// The abandoned tag points at the start commit, or the finished commit when
/// the start tag is gone.
fn abandon_unmerged(
    session: &Session<'_>,
    git: &Git,
    advisories: &mut Advisories,
) -> Result<Vec<String>> {
    let tags = git.list_tags(&format!("{}*", session.prefix()))?;
    let mut abandoned = Vec::new();
    for (generation, kinds) in group_tags(tags.iter().map(String::as_str)) {
        if !session.is_generation(&generation) || kinds.contains(&TagKind::Merged) {
            continue;
        }
        let start = tag_name(&generation, TagKind::Start);
        let finished = tag_name(&generation, TagKind::Finished);
        let has_start = kinds.contains(&TagKind::Start);
        let has_finished = kinds.contains(&TagKind::Finished);

        if !kinds.contains(&TagKind::Abandoned) {
            let anchor = if has_start { &start } else { &finished };
            if !has_start && !has_finished {
                continue;
            }
            let abandoned_tag = tag_name(&generation, TagKind::Abandoned);
            if advisories
                .absorb("abandon-tag", git.create_tag_at(&abandoned_tag, anchor))
                .is_none()
            {
                continue;
            }
            warn!(generation = %generation, "generation abandoned");
            abandoned.push(generation.clone());
        }
        if has_start {
            advisories.absorb("delete-tag", git.delete_tag(&start));
        }
        if has_finished {
            advisories.absorb("delete-tag", git.delete_tag(&finished));
        }
    }
    Ok(abandoned)
}
