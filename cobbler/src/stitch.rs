//! Task execution engine.
//!
//! Each ready task walks `Ready → Claimed → WorktreeReady → AgentInvoked →
//! Committed → Merged → Closed` in its own branch and worktree. A failure
//! after claiming resets the task (status `open`, worktree and branch removed)
//! and the engine moves on to the next task. Only worktree creation and
//! infrastructure errors (tracker listing, base resolution) abort the run.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::core::advisory::{Advisories, Degradation};
use crate::core::budget::limit_reached;
use crate::core::diffstat::{DiffStat, parse_diff};
use crate::core::naming::task_branch;
use crate::core::task_state::{ResetReason, TaskPhase};
use crate::core::types::{OutcomeRecord, Task, TaskStatus, TokenUsage};
use crate::error::CobblerError;
use crate::io::agent::{AgentExit, AgentRequest, AgentRun};
use crate::io::context::project_context;
use crate::io::git::Git;
use crate::io::history::{HistoryEntry, InvocationStats};
use crate::io::prompt::{PromptBuilder, StitchPrompt};
use crate::io::tracker::ready_stitch_tasks;
use crate::io::workspace::remove_stale_dir;
use crate::recovery::{RecoveryReport, recover, remove_worktree};
use crate::session::Session;

const PHASE: &str = "stitch";

/// What happened to one task during a stitch run.
#[derive(Debug, Clone, Serialize)]
pub struct TaskOutcome {
    pub task_id: String,
    pub title: String,
    pub branch: String,
    /// Last phase reached; `Closed` on success.
    pub phase: TaskPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset: Option<ResetReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<OutcomeRecord>,
}

impl TaskOutcome {
    pub fn closed(&self) -> bool {
        self.phase == TaskPhase::Closed && self.reset.is_none()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StitchReport {
    pub base: String,
    pub recovery: RecoveryReport,
    pub tasks: Vec<TaskOutcome>,
    pub degraded: Vec<Degradation>,
}

impl StitchReport {
    /// Tasks claimed in this run, whatever their outcome.
    pub fn attempted(&self) -> u32 {
        self.tasks.len() as u32
    }

    pub fn closed(&self) -> usize {
        self.tasks.iter().filter(|t| t.closed()).count()
    }

    pub fn reset(&self) -> usize {
        self.tasks.iter().filter(|t| t.reset.is_some()).count()
    }
}

/// Branch stitch works on.
///
/// Order: `generation.branch` from config, the current branch if it is a
/// generation, the only generation branch if there is exactly one, else the
/// current branch. Several generation branches without config is fatal.
pub fn resolve_base(session: &Session<'_>) -> Result<String> {
    let git = session.git();
    if let Some(branch) = session.config.branch_override() {
        if !git.branch_exists(branch)? {
            return Err(CobblerError::MissingGeneration {
                branch: branch.to_string(),
            }
            .into());
        }
        return Ok(branch.to_string());
    }
    let current = git.current_branch()?;
    if session.is_generation(&current) {
        return Ok(current);
    }
    let mut candidates = session.generation_branches()?;
    match candidates.len() {
        0 => Ok(current),
        1 => Ok(candidates.swap_remove(0)),
        _ => Err(CobblerError::AmbiguousGeneration { candidates }.into()),
    }
}

/// Resolve the base, run recovery, then execute up to `limit` ready tasks
/// (`0` = until no ready task is left).
pub fn stitch(session: &Session<'_>, limit: u32) -> Result<StitchReport> {
    let base = resolve_base(session)?;
    let span = session.span();
    let _entered = span.enter();
    let git = session.git();
    if git.current_branch()? != base {
        git.checkout_branch(&base)
            .with_context(|| format!("check out base branch {base}"))?;
    }
    let recovery = recover(session, &base);
    stitch_on(session, &base, limit, recovery)
}

/// Execute ready tasks on `base`, which must be checked out in the main worktree.
#[instrument(skip_all, fields(base, limit))]
pub fn stitch_on(
    session: &Session<'_>,
    base: &str,
    limit: u32,
    recovery: RecoveryReport,
) -> Result<StitchReport> {
    let prompts = PromptBuilder::new(session.config.agent.prompt_budget_bytes)?;
    let mut advisories = Advisories::new();
    let mut tasks = Vec::new();
    let mut attempted = HashSet::new();

    loop {
        if limit_reached(limit, tasks.len() as u32) {
            info!(limit, "stitch limit reached");
            break;
        }
        let ready = ready_stitch_tasks(session.tracker).context("list ready tasks")?;
        let Some(task) = ready.into_iter().find(|t| !attempted.contains(&t.id)) else {
            info!("no ready tasks left");
            break;
        };
        attempted.insert(task.id.clone());
        let outcome = run_task(session, &prompts, base, &task, &mut advisories)?;
        tasks.push(outcome);
    }

    let report = StitchReport {
        base: base.to_string(),
        recovery,
        tasks,
        degraded: advisories.into_vec(),
    };
    info!(
        attempted = report.attempted(),
        closed = report.closed(),
        reset = report.reset(),
        "stitch finished"
    );
    Ok(report)
}

/// Per-task paths and history entry.
struct TaskRun<'t> {
    task: &'t Task,
    base: &'t str,
    branch: String,
    worktree: PathBuf,
    history: HistoryEntry,
}

impl TaskRun<'_> {
    fn outcome(&self, phase: TaskPhase) -> TaskOutcome {
        TaskOutcome {
            task_id: self.task.id.clone(),
            title: self.task.title.clone(),
            branch: self.branch.clone(),
            phase,
            reset: None,
            record: None,
        }
    }
}

#[instrument(skip_all, fields(task = %task.id))]
fn run_task(
    session: &Session<'_>,
    prompts: &PromptBuilder,
    base: &str,
    task: &Task,
    advisories: &mut Advisories,
) -> Result<TaskOutcome> {
    let branch = task_branch(base, &task.id);
    let run = TaskRun {
        task,
        base,
        worktree: session.worktree_path(&branch),
        history: session.history.entry(&format!("{PHASE}-{}", task.id)),
        branch,
    };
    let context = project_context(
        session.root(),
        &session.config.paths.context_files,
        advisories,
    );
    let prompt = prompts.stitch(&StitchPrompt {
        task,
        branch: &run.branch,
        base,
        project_context: &context,
    })?;

    info!(title = %task.title, "claiming task");
    advisories.absorb(
        "claim",
        session.tracker.update_status(&task.id, TaskStatus::InProgress),
    );

    prepare_worktree(session, &run.branch, base, &run.worktree)?;

    advisories.absorb("history-prompt", run.history.write_prompt(&prompt));
    let request = AgentRequest::new(&run.worktree, prompt, &session.config.agent)
        .with_transcript(run.history.transcript_path());
    let agent_run = match session.agent.invoke(&request) {
        Ok(agent_run) => agent_run,
        Err(err) => {
            let reason = ResetReason::AgentSpawn {
                message: format!("{err:#}"),
            };
            return Ok(reset_task(
                session,
                &run,
                TaskPhase::WorktreeReady,
                reason,
                None,
                advisories,
            ));
        }
    };
    advisories.absorb(
        "history-transcript",
        run.history.write_transcript(&agent_run.transcript),
    );
    advisories.absorb("history-stderr", run.history.write_stderr(&agent_run.stderr));
    if let Some(reason) = failure_reason(&agent_run, &request) {
        return Ok(reset_task(
            session,
            &run,
            TaskPhase::AgentInvoked,
            reason,
            Some(&agent_run),
            advisories,
        ));
    }

    let worktree_git = Git::new(&run.worktree);
    if let Err(err) = worktree_git.commit_all(&format!("Task {}: {}", task.id, task.title)) {
        let reason = ResetReason::Commit {
            message: format!("{err:#}"),
        };
        return Ok(reset_task(
            session,
            &run,
            TaskPhase::AgentInvoked,
            reason,
            Some(&agent_run),
            advisories,
        ));
    }

    // The merge makes base contain the branch, so measure the diff first.
    let git = session.git();
    let diff = advisories
        .absorb("diffstat", diffstat(&git, base, &run.branch))
        .unwrap_or_default();

    if let Err(err) = git.merge_no_ff(
        &run.branch,
        &format!("Merge task {}: {}", task.id, task.title),
    ) {
        advisories.absorb("merge-abort", git.merge_abort());
        let reason = ResetReason::Merge {
            message: format!("{err:#}"),
        };
        return Ok(reset_task(
            session,
            &run,
            TaskPhase::Committed,
            reason,
            Some(&agent_run),
            advisories,
        ));
    }

    Ok(close_task(session, &run, &agent_run, diff, advisories))
}

fn prepare_worktree(session: &Session<'_>, branch: &str, base: &str, path: &Path) -> Result<()> {
    let git = session.git();
    let created = (|| -> Result<()> {
        if !git.branch_exists(branch)? {
            git.create_branch(branch, base)?;
        }
        remove_stale_dir(path)?;
        git.worktree_prune()?;
        git.worktree_add(path, branch)
    })();
    created.map_err(|err| {
        anyhow::Error::from(CobblerError::WorktreeCreate {
            branch: branch.to_string(),
            path: path.display().to_string(),
            message: format!("{err:#}"),
        })
    })
}

fn failure_reason(run: &AgentRun, request: &AgentRequest) -> Option<ResetReason> {
    match run.exit {
        AgentExit::Completed => None,
        AgentExit::TimedOut => Some(ResetReason::AgentTimeout {
            timeout_secs: request.timeout.as_secs(),
        }),
        AgentExit::Failed { code } => Some(ResetReason::AgentExit { code }),
    }
}

fn diffstat(git: &Git, base: &str, branch: &str) -> Result<DiffStat> {
    let name_status = git.diff_name_status(base, branch)?;
    let numstat = git.diff_numstat(base, branch)?;
    Ok(parse_diff(&name_status, &numstat))
}

fn close_task(
    session: &Session<'_>,
    run: &TaskRun<'_>,
    agent_run: &AgentRun,
    diff: DiffStat,
    advisories: &mut Advisories,
) -> TaskOutcome {
    let task = run.task;
    let duration_ms = agent_run.duration.as_millis() as u64;
    let record = OutcomeRecord {
        task_id: task.id.clone(),
        branch: run.branch.clone(),
        usage: agent_run.usage,
        loc_delta: diff.loc_delta(),
        diff,
        duration_ms,
    };

    if let Some(comment) = advisories.absorb(
        "outcome-record",
        record.to_comment().context("render outcome record"),
    ) {
        advisories.absorb("comment", session.tracker.comment(&task.id, &comment));
    }
    advisories.absorb(
        "close",
        session
            .tracker
            .close(&task.id, &format!("merged into {}", run.base)),
    );
    remove_worktree(session, &[], &run.branch, advisories);
    let git = session.git();
    advisories.absorb("delete-branch", git.delete_branch(&run.branch, true));
    advisories.absorb(
        "history-stats",
        run.history.write_stats(&InvocationStats::success(
            PHASE,
            Some(&task.id),
            agent_run.usage,
            duration_ms,
        )),
    );
    advisories.absorb("history-report", run.history.write_report(&record));
    advisories.absorb(
        "bookkeeping-commit",
        git.commit_all(&format!("Close task {}: {}", task.id, task.title)),
    );

    info!(
        loc_delta = record.loc_delta,
        files = record.diff.files_changed,
        "task closed"
    );
    TaskOutcome {
        record: Some(record),
        ..run.outcome(TaskPhase::Closed)
    }
}

/// Return a claimed task to `open` and remove its worktree and branch.
fn reset_task(
    session: &Session<'_>,
    run: &TaskRun<'_>,
    phase: TaskPhase,
    reason: ResetReason,
    agent_run: Option<&AgentRun>,
    advisories: &mut Advisories,
) -> TaskOutcome {
    let task = run.task;
    warn!(phase = %phase, reason = %reason, "resetting task");
    advisories.absorb(
        "reopen",
        session.tracker.update_status(&task.id, TaskStatus::Open),
    );
    remove_worktree(session, &[], &run.branch, advisories);
    let git = session.git();
    match git.branch_exists(&run.branch) {
        Ok(true) => {
            advisories.absorb("delete-branch", git.delete_branch(&run.branch, true));
        }
        Ok(false) => {}
        Err(err) => {
            advisories.absorb::<()>("delete-branch", Err(err));
        }
    }

    let (usage, duration_ms) = agent_run
        .map(|r| (r.usage, r.duration.as_millis() as u64))
        .unwrap_or((TokenUsage::default(), 0));
    advisories.absorb(
        "history-stats",
        run.history.write_stats(
            &InvocationStats::failed(PHASE, Some(&task.id), reason.to_string())
                .with_usage(usage, duration_ms),
        ),
    );
    let message = format!("Reset task {}: {}", task.id, reason);
    let committed = git
        .add_all()
        .and_then(|()| git.commit_allow_empty(&message));
    advisories.absorb("bookkeeping-commit", committed);

    TaskOutcome {
        reset: Some(reason),
        ..run.outcome(phase)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MemoryTracker, ScriptedAgent, TestRepo};

    #[test]
    fn base_is_current_branch_without_generations() {
        let repo = TestRepo::new().expect("repo");
        let tracker = MemoryTracker::new();
        let agent = ScriptedAgent::new();
        let session = repo.session(&tracker, &agent);
        assert_eq!(resolve_base(&session).expect("base"), "main");
    }

    #[test]
    fn two_generation_branches_are_ambiguous() {
        let repo = TestRepo::new().expect("repo");
        let git = repo.git();
        git.create_branch("generation-2026-01-01-00-00-00", "main")
            .expect("branch");
        git.create_branch("generation-2026-01-02-00-00-00", "main")
            .expect("branch");
        let tracker = MemoryTracker::new();
        let agent = ScriptedAgent::new();
        let session = repo.session(&tracker, &agent);

        let err = resolve_base(&session).expect_err("ambiguous");
        assert!(matches!(
            crate::error::find_cobbler_error(&err),
            Some(CobblerError::AmbiguousGeneration { candidates }) if candidates.len() == 2
        ));
    }

    #[test]
    fn current_generation_branch_wins_over_others() {
        let repo = TestRepo::new().expect("repo");
        let git = repo.git();
        git.create_branch("generation-2026-01-01-00-00-00", "main")
            .expect("branch");
        git.checkout_new_branch("generation-2026-01-02-00-00-00")
            .expect("checkout");
        let tracker = MemoryTracker::new();
        let agent = ScriptedAgent::new();
        let session = repo.session(&tracker, &agent);
        assert_eq!(
            resolve_base(&session).expect("base"),
            "generation-2026-01-02-00-00-00"
        );
    }

    #[test]
    fn limit_counts_attempts() {
        let repo = TestRepo::new().expect("repo");
        let tracker = MemoryTracker::new();
        tracker.insert_task("g-1", "one", "task", TaskStatus::Open);
        tracker.insert_task("g-2", "two", "task", TaskStatus::Open);
        let agent = ScriptedAgent::new();
        agent.push_failure(Some(1));
        let session = repo.session(&tracker, &agent);

        let report = stitch(&session, 1).expect("stitch");

        assert_eq!(report.attempted(), 1);
        assert_eq!(report.reset(), 1);
        assert_eq!(tracker.status("g-1"), Some(TaskStatus::Open));
        assert_eq!(tracker.status("g-2"), Some(TaskStatus::Open));
    }
}
