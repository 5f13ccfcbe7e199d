//! Crash recovery run at the start of every stitch run.
//!
//! Two sweeps repair state left behind by a killed engine:
//!
//! 1. **Stale branches**: every `task/<base>-*` branch is removed together with
//!    its worktree, and its task goes back to `open`. Branches of a longer
//!    base such as `main-feature` are not touched when recovering `main`.
//! 2. **Orphaned tasks**: every `in_progress` task without a task branch goes
//!    back to `open`.
//!
//! Every step is best-effort. Running recovery on consistent state changes
//! nothing and commits nothing.

use std::path::PathBuf;

use anyhow::Result;
use serde::Serialize;
use tracing::{info, instrument};

use crate::core::advisory::{Advisories, Degradation};
use crate::core::naming::{is_task_branch, task_branch, task_branch_owner, task_id_from_branch};
use crate::core::types::TaskStatus;
use crate::io::git::{Git, WorktreeEntry};
use crate::io::workspace::remove_stale_dir;
use crate::session::Session;

#[derive(Debug, Clone, Default, Serialize)]
pub struct RecoveryReport {
    pub base: String,
    /// Task branches deleted by the stale branch sweep.
    pub removed_branches: Vec<String>,
    /// Task ids reset to `open` by either sweep.
    pub reset_tasks: Vec<String>,
    pub committed: bool,
    pub degraded: Vec<Degradation>,
}

impl RecoveryReport {
    pub fn changed(&self) -> bool {
        !self.removed_branches.is_empty() || !self.reset_tasks.is_empty()
    }
}

/// Run both sweeps for `base` and record one recovery commit if anything changed.
#[instrument(skip_all, fields(base))]
pub fn recover(session: &Session<'_>, base: &str) -> RecoveryReport {
    let git = session.git();
    let mut advisories = Advisories::new();
    advisories.absorb("worktree-prune", git.worktree_prune());

    let mut report = RecoveryReport {
        base: base.to_string(),
        ..RecoveryReport::default()
    };
    let (removed, mut reset) = sweep_stale_branches(session, base, &mut advisories);
    report.removed_branches = removed;
    for id in sweep_orphaned_tasks(session, base, &mut advisories) {
        if !reset.contains(&id) {
            reset.push(id);
        }
    }
    report.reset_tasks = reset;

    if report.changed() {
        info!(
            branches = report.removed_branches.len(),
            tasks = report.reset_tasks.len(),
            "recovered stale state"
        );
        let message = format!(
            "Recover: removed {} stale task branch(es), reset {} task(s)",
            report.removed_branches.len(),
            report.reset_tasks.len()
        );
        let committed = advisories.absorb("add", git.add_all()).is_some()
            && advisories
                .absorb("commit", git.commit_allow_empty(&message))
                .is_some();
        report.committed = committed;
    }
    report.degraded = advisories.into_vec();
    report
}

/// Remove every task branch of `base` with its worktree and reopen its task.
///
/// Returns the deleted branches and the reopened task ids. Tasks that are
/// already closed stay closed.
pub fn sweep_stale_branches(
    session: &Session<'_>,
    base: &str,
    advisories: &mut Advisories,
) -> (Vec<String>, Vec<String>) {
    let git = session.git();
    let Some(branches) = advisories.absorb("list-task-branches", owned_task_branches(&git, base))
    else {
        return (Vec::new(), Vec::new());
    };
    let worktrees = advisories
        .absorb("list-worktrees", git.worktree_list())
        .unwrap_or_default();

    let mut removed = Vec::new();
    let mut reset = Vec::new();
    for branch in branches {
        let Some(task_id) = task_id_from_branch(base, &branch) else {
            continue;
        };
        info!(branch = %branch, "removing stale task branch");
        remove_worktree(session, &worktrees, &branch, advisories);
        if advisories
            .absorb("delete-branch", git.delete_branch(&branch, true))
            .is_some()
        {
            removed.push(branch.clone());
        }

        let closed = matches!(
            session.tracker.show(task_id),
            Ok(Some(task)) if task.status == TaskStatus::Closed
        );
        if !closed
            && advisories
                .absorb(
                    "reopen-task",
                    session.tracker.update_status(task_id, TaskStatus::Open),
                )
                .is_some()
        {
            reset.push(task_id.to_string());
        }
    }
    (removed, reset)
}

/// Task branches created from `base`.
///
/// Every other local branch that is not itself a task branch is a candidate
/// owner, so `task/main-feature-t-1` stays with `main-feature` while that
/// branch exists.
pub(crate) fn owned_task_branches(git: &Git, base: &str) -> Result<Vec<String>> {
    let locals = git.local_branches()?;
    let bases: Vec<&str> = locals
        .iter()
        .map(String::as_str)
        .filter(|name| !is_task_branch(name))
        .chain(std::iter::once(base))
        .collect();
    Ok(locals
        .iter()
        .filter(|name| task_branch_owner(name, bases.iter().copied()) == Some(base))
        .cloned()
        .collect())
}

/// Reopen every `in_progress` task whose task branch does not exist.
pub fn sweep_orphaned_tasks(
    session: &Session<'_>,
    base: &str,
    advisories: &mut Advisories,
) -> Vec<String> {
    let git = session.git();
    let Some(in_progress) =
        advisories.absorb("list-in-progress", session.tracker.list_in_progress())
    else {
        return Vec::new();
    };

    let mut reset = Vec::new();
    for task in in_progress {
        let branch = task_branch(base, &task.id);
        match git.branch_exists(&branch) {
            Ok(true) => continue,
            Ok(false) => {}
            Err(err) => {
                advisories.absorb::<()>("branch-exists", Err(err));
                continue;
            }
        }
        info!(task = %task.id, "reopening orphaned task");
        if advisories
            .absorb(
                "reopen-task",
                session.tracker.update_status(&task.id, TaskStatus::Open),
            )
            .is_some()
        {
            reset.push(task.id);
        }
    }
    reset
}

/// Remove the worktree bound to `branch`, if any, falling back to the
/// deterministic path.
pub(crate) fn remove_worktree(
    session: &Session<'_>,
    worktrees: &[WorktreeEntry],
    branch: &str,
    advisories: &mut Advisories,
) {
    let path: PathBuf = worktrees
        .iter()
        .find(|w| w.branch.as_deref() == Some(branch))
        .map(|w| w.path.clone())
        .unwrap_or_else(|| session.worktree_path(branch));
    if !path.exists() {
        return;
    }
    let git = session.git();
    if git.worktree_remove(&path).is_err() {
        advisories.absorb("remove-worktree", remove_stale_dir(&path));
        advisories.absorb("worktree-prune", git.worktree_prune());
    }
}

/// Recovery on the current branch, for the `recover` command.
pub fn recover_current(session: &Session<'_>) -> Result<RecoveryReport> {
    let base = session.git().current_branch()?;
    Ok(recover(session, &base))
}
