//! Issue tracker abstraction.
//!
//! The [`Tracker`] trait decouples the engine from the tracker backend
//! (currently the `bd` CLI). Tests use an in-memory tracker instead.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::core::types::{NewTask, STITCH_TASK_TYPE, Task, TaskStatus};

/// Operations the engine needs from an issue tracker.
///
/// `list_ready` must only return open tasks whose dependencies are all closed.
pub trait Tracker {
    /// Initialise a fresh namespace whose ids start with `prefix`.
    fn init(&self, prefix: &str) -> Result<()>;
    /// Destroy all tracker state.
    fn reset(&self) -> Result<()>;
    /// File a task and return its id.
    fn create(&self, task: &NewTask) -> Result<String>;
    /// Record that `id` cannot start before `depends_on` is closed.
    fn add_dependency(&self, id: &str, depends_on: &str) -> Result<()>;
    /// Ready tasks of any type, in tracker priority order.
    fn list_ready(&self) -> Result<Vec<Task>>;
    fn list_in_progress(&self) -> Result<Vec<Task>>;
    fn update_status(&self, id: &str, status: TaskStatus) -> Result<()>;
    fn close(&self, id: &str, reason: &str) -> Result<()>;
    fn comment(&self, id: &str, text: &str) -> Result<()>;
    fn show(&self, id: &str) -> Result<Option<Task>>;
}

/// Ready tasks the execution engine may pick up.
pub fn ready_stitch_tasks(tracker: &dyn Tracker) -> Result<Vec<Task>> {
    Ok(tracker
        .list_ready()?
        .into_iter()
        .filter(|t| t.kind == STITCH_TASK_TYPE)
        .collect())
}

/// True if any stitchable task is ready or any task is in progress.
pub fn has_open_work(tracker: &dyn Tracker) -> Result<bool> {
    Ok(!ready_stitch_tasks(tracker)?.is_empty() || !tracker.list_in_progress()?.is_empty())
}

/// Tracker backed by the `bd` command-line client.
///
/// State lives in `<root>/.beads/`, so tracker changes are committed together
/// with the engine's bookkeeping commits.
#[derive(Debug, Clone)]
pub struct BdTracker {
    root: PathBuf,
}

#[derive(Debug, Deserialize)]
struct CreatedIssue {
    id: String,
}

impl BdTracker {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn data_dir(&self) -> PathBuf {
        self.root.join(".beads")
    }

    fn run_json(&self, args: &[&str]) -> Result<Value> {
        let mut full: Vec<&str> = args.to_vec();
        full.push("--json");
        let output = self.run_checked(&full)?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.trim().is_empty() {
            return Ok(Value::Array(Vec::new()));
        }
        serde_json::from_str(stdout.trim())
            .with_context(|| format!("parse bd {} output", args.join(" ")))
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        debug!(args = %args.join(" "), "bd");
        let output = Command::new("bd")
            .args(args)
            .current_dir(&self.root)
            .output()
            .with_context(|| format!("spawn bd {}", args.join(" ")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("bd {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn list(&self, args: &[&str]) -> Result<Vec<Task>> {
        parse_task_list(self.run_json(args)?)
    }
}

impl Tracker for BdTracker {
    #[instrument(skip(self))]
    fn init(&self, prefix: &str) -> Result<()> {
        self.run_checked(&["init", "--prefix", prefix, "--quiet"])?;
        Ok(())
    }

    fn reset(&self) -> Result<()> {
        remove_dir_if_exists(&self.data_dir())
    }

    fn create(&self, task: &NewTask) -> Result<String> {
        let kind = if task.kind.is_empty() {
            STITCH_TASK_TYPE
        } else {
            task.kind.as_str()
        };
        let value = self.run_json(&[
            "create",
            &task.title,
            "--description",
            &task.description,
            "--type",
            kind,
        ])?;
        let created: CreatedIssue = match value {
            Value::Array(mut items) if !items.is_empty() => {
                serde_json::from_value(items.swap_remove(0))?
            }
            other => serde_json::from_value(other)?,
        };
        Ok(created.id)
    }

    fn add_dependency(&self, id: &str, depends_on: &str) -> Result<()> {
        self.run_checked(&["dep", "add", id, depends_on])?;
        Ok(())
    }

    fn list_ready(&self) -> Result<Vec<Task>> {
        self.list(&["ready"])
    }

    fn list_in_progress(&self) -> Result<Vec<Task>> {
        self.list(&["list", "--status", TaskStatus::InProgress.as_str()])
    }

    fn update_status(&self, id: &str, status: TaskStatus) -> Result<()> {
        self.run_checked(&["update", id, "--status", status.as_str()])?;
        Ok(())
    }

    fn close(&self, id: &str, reason: &str) -> Result<()> {
        self.run_checked(&["close", id, "--reason", reason])?;
        Ok(())
    }

    fn comment(&self, id: &str, text: &str) -> Result<()> {
        self.run_checked(&["comments", "add", id, text])?;
        Ok(())
    }

    fn show(&self, id: &str) -> Result<Option<Task>> {
        let value = match self.run_json(&["show", id]) {
            Ok(value) => value,
            Err(err) if err.to_string().contains("not found") => return Ok(None),
            Err(err) => return Err(err),
        };
        Ok(parse_task_list(value)?.into_iter().next())
    }
}

/// Accept either a JSON array of issues or a single issue object.
fn parse_task_list(value: Value) -> Result<Vec<Task>> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .map(|item| serde_json::from_value(item).context("parse bd issue"))
            .collect(),
        Value::Null => Ok(Vec::new()),
        single => Ok(vec![
            serde_json::from_value(single).context("parse bd issue")?,
        ]),
    }
}

fn remove_dir_if_exists(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_dir_all(path).with_context(|| format!("remove {}", path.display()))?;
    }
    Ok(())
}
