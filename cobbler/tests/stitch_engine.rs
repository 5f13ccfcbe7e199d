//! End-to-end tests for the task execution engine.
//!
//! Each test runs `stitch` against a scratch repository with an in-memory
//! tracker and a scripted agent, then inspects git, tracker and history.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use cobbler::core::task_state::{ResetReason, TaskPhase};
use cobbler::core::types::{OutcomeRecord, TaskStatus, TokenUsage};
use cobbler::io::agent::{Agent, AgentExit, AgentRequest, AgentRun};
use cobbler::io::git::Git;
use cobbler::stitch::stitch;
use cobbler::test_support::{MemoryTracker, ScriptedAgent, TestRepo};

fn stats_files(repo: &TestRepo) -> Vec<String> {
    let Ok(entries) = fs::read_dir(repo.history_dir()) else {
        return Vec::new();
    };
    let mut stats: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.to_string_lossy().ends_with("-stats.json"))
        .map(|path| fs::read_to_string(path).expect("read stats"))
        .collect();
    stats.sort();
    stats
}

fn completed_run(stderr: &str) -> AgentRun {
    AgentRun {
        exit: AgentExit::Completed,
        transcript: String::new(),
        stderr: stderr.to_string(),
        usage: TokenUsage::default(),
        duration: Duration::from_millis(10),
    }
}

/// Edits `README.md` in the task worktree while a conflicting edit lands on
/// the base checkout.
struct ConflictingAgent {
    root: PathBuf,
}

impl Agent for ConflictingAgent {
    fn invoke(&self, request: &AgentRequest) -> anyhow::Result<AgentRun> {
        fs::write(request.workdir.join("README.md"), "task edit\n")?;
        fs::write(self.root.join("README.md"), "base edit\n")?;
        Git::new(&self.root).commit_all("Edit README on base")?;
        Ok(completed_run(""))
    }
}

/// Leaves the worktree index locked, so staging the agent's work fails.
struct LockedIndexAgent;

impl Agent for LockedIndexAgent {
    fn invoke(&self, request: &AgentRequest) -> anyhow::Result<AgentRun> {
        fs::write(request.workdir.join("notes.md"), "done\n")?;
        let git_dir = Git::new(&request.workdir).git_dir()?;
        fs::write(git_dir.join("index.lock"), "")?;
        Ok(completed_run("left the index locked\n"))
    }
}

#[test]
fn successful_task_is_merged_and_closed() {
    let repo = TestRepo::new().expect("repo");
    let tracker = MemoryTracker::new();
    tracker.insert_task("g-1", "add feature", "task", TaskStatus::Open);
    let agent = ScriptedAgent::new();
    agent.push_success(&[("src/feature.rs", "pub fn feature() {}\n")]);
    let session = repo.session(&tracker, &agent);

    let report = stitch(&session, 0).expect("stitch");

    assert_eq!(report.base, "main");
    assert_eq!(report.attempted(), 1);
    assert_eq!(report.closed(), 1);
    let outcome = &report.tasks[0];
    assert_eq!(outcome.phase, TaskPhase::Closed);
    assert_eq!(outcome.branch, "task/main-g-1");

    assert_eq!(tracker.status("g-1"), Some(TaskStatus::Closed));
    assert!(repo.root().join("src/feature.rs").exists());
    assert_eq!(
        repo.head_message().expect("head"),
        "Merge task g-1: add feature"
    );
    let git = repo.git();
    assert!(!git.branch_exists("task/main-g-1").expect("branch"));
    assert!(!repo.worktree_dir().join("task-main-g-1").exists());

    let comments = tracker.comments("g-1");
    let record = comments
        .iter()
        .find_map(|c| OutcomeRecord::from_comment(c))
        .expect("outcome record");
    assert_eq!(record.diff.files_changed, 1);
    assert_eq!(record.loc_delta, 1);
    assert_eq!(record.usage.input_tokens, 100);

    let stats = stats_files(&repo);
    assert_eq!(stats.len(), 1);
    assert!(stats[0].contains(r#""status": "success""#));
}

#[test]
fn timed_out_agent_leaves_task_open_and_no_branch() {
    let repo = TestRepo::new().expect("repo");
    let tracker = MemoryTracker::new();
    tracker.insert_task("g-1", "slow work", "task", TaskStatus::Open);
    let agent = ScriptedAgent::new();
    agent.push_timeout();
    let session = repo.session(&tracker, &agent);

    let report = stitch(&session, 0).expect("stitch");

    assert_eq!(report.attempted(), 1);
    assert_eq!(report.reset(), 1);
    assert!(matches!(
        report.tasks[0].reset,
        Some(ResetReason::AgentTimeout { .. })
    ));
    assert_eq!(tracker.status("g-1"), Some(TaskStatus::Open));
    assert!(!repo.git().branch_exists("task/main-g-1").expect("branch"));
    assert!(!repo.worktree_dir().join("task-main-g-1").exists());
    assert!(!repo.root().join("partial.txt").exists());
    assert!(
        repo.head_message()
            .expect("head")
            .starts_with("Reset task g-1:")
    );

    let stats = stats_files(&repo);
    assert_eq!(stats.len(), 1);
    assert!(stats[0].contains(r#""status": "failed""#));
}

#[test]
fn agent_that_cannot_start_resets_before_invocation_phase() {
    let repo = TestRepo::new().expect("repo");
    let tracker = MemoryTracker::new();
    tracker.insert_task("g-1", "work", "task", TaskStatus::Open);
    let agent = ScriptedAgent::new();
    agent.push_spawn_error("agent binary not found");
    let session = repo.session(&tracker, &agent);

    let report = stitch(&session, 0).expect("stitch");

    let outcome = &report.tasks[0];
    assert_eq!(outcome.phase, TaskPhase::WorktreeReady);
    assert!(matches!(
        &outcome.reset,
        Some(ResetReason::AgentSpawn { message }) if message.contains("not found")
    ));
    assert_eq!(tracker.status("g-1"), Some(TaskStatus::Open));
    assert!(!repo.git().branch_exists("task/main-g-1").expect("branch"));
}

#[test]
fn failed_task_is_not_retried_in_the_same_run() {
    let repo = TestRepo::new().expect("repo");
    let tracker = MemoryTracker::new();
    tracker.insert_task("g-1", "flaky", "task", TaskStatus::Open);
    let agent = ScriptedAgent::new();
    agent.push_failure(Some(2));
    let session = repo.session(&tracker, &agent);

    let report = stitch(&session, 0).expect("stitch");

    assert_eq!(report.attempted(), 1);
    assert_eq!(agent.requests().len(), 1);
    assert!(matches!(
        report.tasks[0].reset,
        Some(ResetReason::AgentExit { code: Some(2) })
    ));
}

#[test]
fn tasks_run_in_tracker_order_and_dependents_wait() {
    let repo = TestRepo::new().expect("repo");
    let tracker = MemoryTracker::new();
    tracker.insert_task("g-1", "first", "task", TaskStatus::Open);
    tracker.insert_task("g-2", "second", "task", TaskStatus::Open);
    tracker.insert_task("g-epic", "umbrella", "epic", TaskStatus::Open);
    cobbler::io::tracker::Tracker::add_dependency(&tracker, "g-2", "g-1").expect("dep");
    let agent = ScriptedAgent::new();
    agent.push_success(&[("src/a.rs", "// a\n")]);
    agent.push_success(&[("src/b.rs", "// b\n")]);
    let session = repo.session(&tracker, &agent);

    let report = stitch(&session, 0).expect("stitch");

    let ids: Vec<&str> = report.tasks.iter().map(|t| t.task_id.as_str()).collect();
    assert_eq!(ids, vec!["g-1", "g-2"]);
    assert_eq!(tracker.status("g-epic"), Some(TaskStatus::Open));
    assert!(repo.root().join("src/a.rs").exists());
    assert!(repo.root().join("src/b.rs").exists());
}

#[test]
fn agent_runs_inside_the_task_worktree() {
    let repo = TestRepo::new().expect("repo");
    let tracker = MemoryTracker::new();
    tracker.insert_task("g-1", "work", "task", TaskStatus::Open);
    let agent = ScriptedAgent::new();
    agent.push_success(&[("notes.md", "done\n")]);
    let session = repo.session(&tracker, &agent);

    stitch(&session, 1).expect("stitch");

    let requests = agent.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(
        requests[0].workdir,
        repo.worktree_dir().join("task-main-g-1")
    );
    assert!(requests[0].prompt.contains("### Task g-1"));
}

#[test]
fn merge_conflict_resets_task_and_leaves_base_clean() {
    let repo = TestRepo::new().expect("repo");
    let tracker = MemoryTracker::new();
    tracker.insert_task("g-1", "edit readme", "task", TaskStatus::Open);
    let agent = ConflictingAgent {
        root: repo.root().to_path_buf(),
    };
    let session = repo.session(&tracker, &agent);

    let report = stitch(&session, 0).expect("stitch");

    let outcome = &report.tasks[0];
    assert_eq!(outcome.phase, TaskPhase::Committed);
    assert!(matches!(
        &outcome.reset,
        Some(ResetReason::Merge { message }) if message.contains("CONFLICT")
    ));
    assert_eq!(tracker.status("g-1"), Some(TaskStatus::Open));
    let git = repo.git();
    assert!(!git.branch_exists("task/main-g-1").expect("branch"));
    assert!(!repo.worktree_dir().join("task-main-g-1").exists());
    assert_eq!(git.current_branch().expect("branch"), "main");
    assert!(git.is_clean().expect("clean"));
    assert!(!repo.root().join(".git/MERGE_HEAD").exists());
    assert_eq!(
        fs::read_to_string(repo.root().join("README.md")).expect("readme"),
        "base edit\n"
    );
    assert!(
        repo.head_message()
            .expect("head")
            .starts_with("Reset task g-1:")
    );
}

#[test]
fn commit_failure_resets_task_after_agent_phase() {
    let repo = TestRepo::new().expect("repo");
    let tracker = MemoryTracker::new();
    tracker.insert_task("g-1", "write notes", "task", TaskStatus::Open);
    let agent = LockedIndexAgent;
    let session = repo.session(&tracker, &agent);
    let before = repo.git().rev_parse("HEAD").expect("head");

    let report = stitch(&session, 0).expect("stitch");

    let outcome = &report.tasks[0];
    assert_eq!(outcome.phase, TaskPhase::AgentInvoked);
    assert!(matches!(
        &outcome.reset,
        Some(ResetReason::Commit { message }) if message.contains("index.lock")
    ));
    assert_eq!(tracker.status("g-1"), Some(TaskStatus::Open));
    let git = repo.git();
    assert!(!git.branch_exists("task/main-g-1").expect("branch"));
    assert!(!repo.worktree_dir().join("task-main-g-1").exists());
    assert!(!repo.root().join("notes.md").exists());
    assert!(git.is_clean().expect("clean"));
    assert_ne!(git.rev_parse("HEAD").expect("head"), before);
    assert!(
        repo.head_message()
            .expect("head")
            .starts_with("Reset task g-1:")
    );

    let stats = stats_files(&repo);
    assert_eq!(stats.len(), 1);
    assert!(stats[0].contains(r#""status": "failed""#));
    let stderr_log = fs::read_dir(repo.history_dir())
        .expect("history")
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .find(|path| path.to_string_lossy().ends_with("-stderr.log"))
        .expect("stderr log");
    assert_eq!(
        fs::read_to_string(stderr_log).expect("read"),
        "left the index locked\n"
    );
}
