//! Shared deterministic types for cobbler core logic.
//!
//! These types define stable contracts between the engine, the tracker adapter
//! and the history sink. They do not depend on external state.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::diffstat::DiffStat;

/// Issue type that the execution engine picks up.
pub const STITCH_TASK_TYPE: &str = "task";

/// Tracker-side status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Open,
    InProgress,
    Closed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Open => "open",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Closed => "closed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of work owned by the issue tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub status: TaskStatus,
    #[serde(default = "default_task_type", alias = "issue_type")]
    pub kind: String,
}

fn default_task_type() -> String {
    STITCH_TASK_TYPE.to_string()
}

/// Request to file a new task in the tracker.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NewTask {
    pub title: String,
    pub description: String,
    pub kind: String,
}

/// Token accounting parsed from an agent transcript.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_tokens: u64,
    pub cache_read_tokens: u64,
    pub cost_usd: f64,
}

impl TokenUsage {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens + self.cache_creation_tokens + self.cache_read_tokens
    }
}

/// Immutable post-hoc annotation attached to a closed task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub task_id: String,
    pub branch: String,
    pub usage: TokenUsage,
    pub loc_delta: i64,
    pub diff: DiffStat,
    pub duration_ms: u64,
}

/// Prefix identifying outcome records among tracker comments.
pub const OUTCOME_COMMENT_PREFIX: &str = "cobbler-outcome: ";

impl OutcomeRecord {
    /// Render as a single tracker comment line.
    pub fn to_comment(&self) -> serde_json::Result<String> {
        Ok(format!(
            "{OUTCOME_COMMENT_PREFIX}{}",
            serde_json::to_string(self)?
        ))
    }

    /// Parse a comment produced by [`OutcomeRecord::to_comment`].
    pub fn from_comment(comment: &str) -> Option<Self> {
        let body = comment.strip_prefix(OUTCOME_COMMENT_PREFIX)?;
        serde_json::from_str(body).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_parses_tracker_json_with_issue_type() {
        let raw = r#"{"id":"gen-1","title":"Add parser","status":"in_progress","issue_type":"task"}"#;
        let task: Task = serde_json::from_str(raw).expect("parse");
        assert_eq!(task.status, TaskStatus::InProgress);
        assert_eq!(task.kind, "task");
        assert_eq!(task.description, "");
    }

    #[test]
    fn outcome_comment_is_recognisable() {
        let record = OutcomeRecord {
            task_id: "gen-7".to_string(),
            branch: "task/main-gen-7".to_string(),
            usage: TokenUsage {
                input_tokens: 10,
                output_tokens: 5,
                ..TokenUsage::default()
            },
            loc_delta: 42,
            diff: DiffStat::default(),
            duration_ms: 1200,
        };
        let comment = record.to_comment().expect("render");
        assert!(comment.starts_with(OUTCOME_COMMENT_PREFIX));
        assert_eq!(OutcomeRecord::from_comment(&comment), Some(record));
        assert_eq!(OutcomeRecord::from_comment("free text"), None);
    }
}
