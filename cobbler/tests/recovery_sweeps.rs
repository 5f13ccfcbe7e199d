//! Recovery tests: simulate a killed engine, then check both sweeps.

use std::fs;

use cobbler::core::advisory::Advisories;
use cobbler::core::types::TaskStatus;
use cobbler::recovery::{recover, sweep_orphaned_tasks};
use cobbler::test_support::{MemoryTracker, ScriptedAgent, TestRepo};

#[test]
fn interrupted_task_is_reset_and_worktree_removed() {
    let repo = TestRepo::new().expect("repo");
    let tracker = MemoryTracker::new();
    tracker.insert_task("g-1", "half done", "task", TaskStatus::InProgress);
    let agent = ScriptedAgent::new();
    let session = repo.session(&tracker, &agent);

    // Engine died after creating the worktree and before the agent finished.
    let git = repo.git();
    git.create_branch("task/main-g-1", "main").expect("branch");
    let worktree = repo.worktree_dir().join("task-main-g-1");
    git.worktree_add(&worktree, "task/main-g-1")
        .expect("worktree");
    fs::write(worktree.join("partial.rs"), "// wip\n").expect("partial edit");

    let report = recover(&session, "main");

    assert_eq!(report.removed_branches, vec!["task/main-g-1".to_string()]);
    assert_eq!(report.reset_tasks, vec!["g-1".to_string()]);
    assert!(report.committed);
    assert!(report.degraded.is_empty(), "{:?}", report.degraded);
    assert_eq!(tracker.status("g-1"), Some(TaskStatus::Open));
    assert!(!git.branch_exists("task/main-g-1").expect("branch"));
    assert!(!worktree.exists());
    assert!(
        repo.head_message()
            .expect("head")
            .starts_with("Recover: removed 1 stale task branch(es), reset 1 task(s)")
    );
}

#[test]
fn in_progress_task_without_branch_is_reopened() {
    let repo = TestRepo::new().expect("repo");
    let tracker = MemoryTracker::new();
    tracker.insert_task("g-1", "claimed", "task", TaskStatus::InProgress);
    tracker.insert_task("g-2", "waiting", "task", TaskStatus::Open);
    let agent = ScriptedAgent::new();
    let session = repo.session(&tracker, &agent);

    let report = recover(&session, "main");

    assert!(report.removed_branches.is_empty());
    assert_eq!(report.reset_tasks, vec!["g-1".to_string()]);
    assert_eq!(tracker.status("g-1"), Some(TaskStatus::Open));
    assert_eq!(tracker.status("g-2"), Some(TaskStatus::Open));
}

#[test]
fn second_recovery_is_a_no_op() {
    let repo = TestRepo::new().expect("repo");
    let tracker = MemoryTracker::new();
    tracker.insert_task("g-1", "half done", "task", TaskStatus::InProgress);
    let agent = ScriptedAgent::new();
    let session = repo.session(&tracker, &agent);
    repo.git()
        .create_branch("task/main-g-1", "main")
        .expect("branch");

    let first = recover(&session, "main");
    assert!(first.changed());
    let head = repo.git().rev_parse("HEAD").expect("head");
    let commits = repo.commit_count().expect("count");

    let second = recover(&session, "main");

    assert!(!second.changed());
    assert!(!second.committed);
    assert_eq!(repo.git().rev_parse("HEAD").expect("head"), head);
    assert_eq!(repo.commit_count().expect("count"), commits);
}

#[test]
fn branches_of_other_bases_are_left_alone() {
    let repo = TestRepo::new().expect("repo");
    let tracker = MemoryTracker::new();
    let agent = ScriptedAgent::new();
    let session = repo.session(&tracker, &agent);
    let git = repo.git();
    git.create_branch("task/generation-2026-01-01-00-00-00-g-1", "main")
        .expect("branch");

    let report = recover(&session, "main");

    assert!(!report.changed());
    assert!(
        git.branch_exists("task/generation-2026-01-01-00-00-00-g-1")
            .expect("branch")
    );
}

#[test]
fn orphan_sweep_skips_tasks_that_still_have_a_branch() {
    let repo = TestRepo::new().expect("repo");
    let tracker = MemoryTracker::new();
    tracker.insert_task("g-1", "has branch", "task", TaskStatus::InProgress);
    tracker.insert_task("g-2", "no branch", "task", TaskStatus::InProgress);
    let agent = ScriptedAgent::new();
    let session = repo.session(&tracker, &agent);
    repo.git()
        .create_branch("task/main-g-1", "main")
        .expect("branch");

    let mut advisories = Advisories::new();
    let reset = sweep_orphaned_tasks(&session, "main", &mut advisories);

    assert_eq!(reset, vec!["g-2".to_string()]);
    assert_eq!(tracker.status("g-1"), Some(TaskStatus::InProgress));
    assert_eq!(tracker.status("g-2"), Some(TaskStatus::Open));
    assert!(advisories.is_empty());
}

#[test]
fn task_branches_of_a_longer_base_are_left_alone() {
    let repo = TestRepo::new().expect("repo");
    let tracker = MemoryTracker::new();
    tracker.insert_task("g-1", "feature work", "task", TaskStatus::InProgress);
    tracker.insert_task("g-2", "main work", "task", TaskStatus::InProgress);
    let agent = ScriptedAgent::new();
    let session = repo.session(&tracker, &agent);
    let git = repo.git();
    git.create_branch("main-feature", "main").expect("branch");
    git.create_branch("task/main-feature-g-1", "main-feature")
        .expect("branch");
    git.create_branch("task/main-g-2", "main").expect("branch");

    let report = recover(&session, "main");

    assert_eq!(report.removed_branches, vec!["task/main-g-2".to_string()]);
    assert!(git.branch_exists("task/main-feature-g-1").expect("branch"));
    assert!(!git.branch_exists("task/main-g-2").expect("branch"));
    assert_eq!(tracker.status("g-2"), Some(TaskStatus::Open));
}
