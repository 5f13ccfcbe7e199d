//! Per-task state machine of the execution engine.

use std::fmt;

use serde::Serialize;

/// Phase a task has reached during one stitch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPhase {
    Ready,
    Claimed,
    WorktreeReady,
    AgentInvoked,
    Committed,
    Merged,
    Closed,
}

impl TaskPhase {
    /// Next phase on the success path. `Closed` is terminal.
    pub fn next(self) -> Option<TaskPhase> {
        match self {
            TaskPhase::Ready => Some(TaskPhase::Claimed),
            TaskPhase::Claimed => Some(TaskPhase::WorktreeReady),
            TaskPhase::WorktreeReady => Some(TaskPhase::AgentInvoked),
            TaskPhase::AgentInvoked => Some(TaskPhase::Committed),
            TaskPhase::Committed => Some(TaskPhase::Merged),
            TaskPhase::Merged => Some(TaskPhase::Closed),
            TaskPhase::Closed => None,
        }
    }

    /// A failure in this phase resets the task (everything after claiming).
    pub fn resets_on_failure(self) -> bool {
        self >= TaskPhase::Claimed && self != TaskPhase::Closed
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskPhase::Ready => "ready",
            TaskPhase::Claimed => "claimed",
            TaskPhase::WorktreeReady => "worktree_ready",
            TaskPhase::AgentInvoked => "agent_invoked",
            TaskPhase::Committed => "committed",
            TaskPhase::Merged => "merged",
            TaskPhase::Closed => "closed",
        }
    }
}

impl fmt::Display for TaskPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a claimed task was reset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResetReason {
    AgentSpawn { message: String },
    AgentTimeout { timeout_secs: u64 },
    AgentExit { code: Option<i32> },
    Commit { message: String },
    Merge { message: String },
}

impl fmt::Display for ResetReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResetReason::AgentSpawn { message } => write!(f, "agent failed to start: {message}"),
            ResetReason::AgentTimeout { timeout_secs } => {
                write!(f, "agent timed out after {timeout_secs}s")
            }
            ResetReason::AgentExit { code: Some(code) } => {
                write!(f, "agent exited with status {code}")
            }
            ResetReason::AgentExit { code: None } => write!(f, "agent killed by signal"),
            ResetReason::Commit { message } => write!(f, "worktree commit failed: {message}"),
            ResetReason::Merge { message } => write!(f, "merge failed: {message}"),
        }
    }
}
