//! Test-only helpers: scratch git repositories, an in-memory tracker and a
//! scripted agent.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use regex::Regex;
use tempfile::TempDir;

use crate::core::transcript::parse_usage;
use crate::core::types::{NewTask, STITCH_TASK_TYPE, Task, TaskStatus};
use crate::io::agent::{Agent, AgentExit, AgentRequest, AgentRun};
use crate::io::config::CobblerConfig;
use crate::io::git::Git;
use crate::io::tracker::Tracker;
use crate::session::Session;

/// Scratch repository on branch `main` with one commit (`README.md`).
///
/// Layout inside the temp dir: `repo/` (the checkout), `worktrees/` and
/// `history/` as siblings so they never show up in `git status`.
pub struct TestRepo {
    _temp: TempDir,
    root: PathBuf,
    worktrees: PathBuf,
    history: PathBuf,
}

impl TestRepo {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir().context("create tempdir")?;
        let root = temp.path().join("repo");
        fs::create_dir_all(&root).context("create repo dir")?;
        git_cmd(&root, &["init", "--quiet"])?;
        git_cmd(&root, &["symbolic-ref", "HEAD", "refs/heads/main"])?;
        git_cmd(&root, &["config", "user.email", "cobbler@example.com"])?;
        git_cmd(&root, &["config", "user.name", "Cobbler Test"])?;
        git_cmd(&root, &["config", "commit.gpgsign", "false"])?;
        git_cmd(&root, &["config", "tag.gpgsign", "false"])?;
        fs::write(root.join("README.md"), "hi\n").context("write README")?;
        git_cmd(&root, &["add", "README.md"])?;
        git_cmd(&root, &["commit", "--quiet", "-m", "initial"])?;

        Ok(Self {
            worktrees: temp.path().join("worktrees"),
            history: temp.path().join("history"),
            root,
            _temp: temp,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn git(&self) -> Git {
        Git::new(&self.root)
    }

    pub fn worktree_dir(&self) -> &Path {
        &self.worktrees
    }

    pub fn history_dir(&self) -> &Path {
        &self.history
    }

    /// Default config with worktrees and history next to the repository.
    pub fn config(&self) -> CobblerConfig {
        let mut config = CobblerConfig::default();
        config.paths.worktree_dir = self.worktrees.display().to_string();
        config.paths.history_dir = self.history.display().to_string();
        config
    }

    pub fn session<'a>(&self, tracker: &'a dyn Tracker, agent: &'a dyn Agent) -> Session<'a> {
        self.session_with(self.config(), tracker, agent)
    }

    pub fn session_with<'a>(
        &self,
        config: CobblerConfig,
        tracker: &'a dyn Tracker,
        agent: &'a dyn Agent,
    ) -> Session<'a> {
        Session::new(self.root.clone(), config, tracker, agent)
    }

    pub fn write_file(&self, rel: &str, contents: &str) -> Result<()> {
        let path = self.root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))
    }

    pub fn commit_file(&self, rel: &str, contents: &str, message: &str) -> Result<()> {
        self.write_file(rel, contents)?;
        self.git().commit_all(message)?;
        Ok(())
    }

    /// Subject line of the commit at HEAD.
    pub fn head_message(&self) -> Result<String> {
        git_output(&self.root, &["log", "-1", "--format=%s"])
    }

    pub fn commit_count(&self) -> Result<usize> {
        Ok(git_output(&self.root, &["rev-list", "--count", "HEAD"])?
            .trim()
            .parse()?)
    }
}

fn git_cmd(root: &Path, args: &[&str]) -> Result<()> {
    git_output(root, args).map(|_| ())
}

fn git_output(root: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(root)
        .output()
        .with_context(|| format!("spawn git {}", args.join(" ")))?;
    if !output.status.success() {
        return Err(anyhow!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

#[derive(Debug, Default)]
struct TrackerState {
    prefix: String,
    next_id: u32,
    tasks: Vec<Task>,
    /// `(task, depends_on)` edges.
    deps: Vec<(String, String)>,
    comments: Vec<(String, String)>,
    resets: u32,
}

/// In-memory tracker. Tasks keep insertion order; the ready list honours
/// dependency edges.
#[derive(Debug, Default)]
pub struct MemoryTracker {
    state: RefCell<TrackerState>,
}

impl MemoryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_task(&self, id: &str, title: &str, kind: &str, status: TaskStatus) {
        self.state.borrow_mut().tasks.push(Task {
            id: id.to_string(),
            title: title.to_string(),
            description: format!("{title} description"),
            status,
            kind: kind.to_string(),
        });
    }

    pub fn status(&self, id: &str) -> Option<TaskStatus> {
        self.state
            .borrow()
            .tasks
            .iter()
            .find(|t| t.id == id)
            .map(|t| t.status)
    }

    pub fn tasks(&self) -> Vec<Task> {
        self.state.borrow().tasks.clone()
    }

    pub fn comments(&self, id: &str) -> Vec<String> {
        self.state
            .borrow()
            .comments
            .iter()
            .filter(|(task, _)| task == id)
            .map(|(_, text)| text.clone())
            .collect()
    }

    pub fn dependencies(&self) -> Vec<(String, String)> {
        self.state.borrow().deps.clone()
    }

    pub fn prefix(&self) -> String {
        self.state.borrow().prefix.clone()
    }

    pub fn reset_count(&self) -> u32 {
        self.state.borrow().resets
    }

    fn with_task<T>(&self, id: &str, f: impl FnOnce(&mut Task) -> T) -> Result<T> {
        let mut state = self.state.borrow_mut();
        let task = state
            .tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| anyhow!("task {id} not found"))?;
        Ok(f(task))
    }
}

impl Tracker for MemoryTracker {
    fn init(&self, prefix: &str) -> Result<()> {
        self.state.borrow_mut().prefix = prefix.to_string();
        Ok(())
    }

    fn reset(&self) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let resets = state.resets + 1;
        *state = TrackerState {
            resets,
            ..TrackerState::default()
        };
        Ok(())
    }

    fn create(&self, task: &NewTask) -> Result<String> {
        let mut state = self.state.borrow_mut();
        state.next_id += 1;
        let prefix = if state.prefix.is_empty() {
            "t".to_string()
        } else {
            state.prefix.clone()
        };
        let id = format!("{prefix}-{}", state.next_id);
        let kind = if task.kind.is_empty() {
            STITCH_TASK_TYPE.to_string()
        } else {
            task.kind.clone()
        };
        state.tasks.push(Task {
            id: id.clone(),
            title: task.title.clone(),
            description: task.description.clone(),
            status: TaskStatus::Open,
            kind,
        });
        Ok(id)
    }

    fn add_dependency(&self, id: &str, depends_on: &str) -> Result<()> {
        self.state
            .borrow_mut()
            .deps
            .push((id.to_string(), depends_on.to_string()));
        Ok(())
    }

    fn list_ready(&self) -> Result<Vec<Task>> {
        let state = self.state.borrow();
        let closed = |id: &str| {
            state
                .tasks
                .iter()
                .any(|t| t.id == id && t.status == TaskStatus::Closed)
        };
        Ok(state
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Open)
            .filter(|t| {
                state
                    .deps
                    .iter()
                    .filter(|(task, _)| *task == t.id)
                    .all(|(_, dep)| closed(dep))
            })
            .cloned()
            .collect())
    }

    fn list_in_progress(&self) -> Result<Vec<Task>> {
        Ok(self
            .state
            .borrow()
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::InProgress)
            .cloned()
            .collect())
    }

    fn update_status(&self, id: &str, status: TaskStatus) -> Result<()> {
        self.with_task(id, |t| t.status = status)
    }

    fn close(&self, id: &str, _reason: &str) -> Result<()> {
        self.with_task(id, |t| t.status = TaskStatus::Closed)
    }

    fn comment(&self, id: &str, text: &str) -> Result<()> {
        self.with_task(id, |_| ())?;
        self.state
            .borrow_mut()
            .comments
            .push((id.to_string(), text.to_string()));
        Ok(())
    }

    fn show(&self, id: &str) -> Result<Option<Task>> {
        Ok(self
            .state
            .borrow()
            .tasks
            .iter()
            .find(|t| t.id == id)
            .cloned())
    }
}

/// Transcript of a successful scripted run.
pub const SUCCESS_TRANSCRIPT: &str = concat!(
    r#"{"type":"system","subtype":"init"}"#,
    "\n",
    r#"{"type":"result","result":"done","#,
    r#""usage":{"input_tokens":100,"output_tokens":20},"total_cost_usd":0.01}"#,
    "\n"
);

#[derive(Debug, Clone)]
enum ScriptedRun {
    Exit {
        exit: AgentExit,
        files: Vec<(String, String)>,
    },
    SpawnError(String),
    /// Write this JSON to the output path named in a planning prompt.
    Plan(String),
}

/// Agent returning queued results in order. An empty queue is a spawn error.
#[derive(Debug, Default)]
pub struct ScriptedAgent {
    queue: RefCell<VecDeque<ScriptedRun>>,
    requests: RefCell<Vec<AgentRequest>>,
}

impl ScriptedAgent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Succeed after writing `files` (relative to the workdir).
    pub fn push_success(&self, files: &[(&str, &str)]) {
        self.queue.borrow_mut().push_back(ScriptedRun::Exit {
            exit: AgentExit::Completed,
            files: files
                .iter()
                .map(|(p, c)| (p.to_string(), c.to_string()))
                .collect(),
        });
    }

    pub fn push_failure(&self, code: Option<i32>) {
        self.queue.borrow_mut().push_back(ScriptedRun::Exit {
            exit: AgentExit::Failed { code },
            files: Vec::new(),
        });
    }

    /// Time out after leaving a partial edit behind.
    pub fn push_timeout(&self) {
        self.queue.borrow_mut().push_back(ScriptedRun::Exit {
            exit: AgentExit::TimedOut,
            files: vec![("partial.txt".to_string(), "half done\n".to_string())],
        });
    }

    pub fn push_spawn_error(&self, message: &str) {
        self.queue
            .borrow_mut()
            .push_back(ScriptedRun::SpawnError(message.to_string()));
    }

    pub fn push_plan(&self, json: &str) {
        self.queue
            .borrow_mut()
            .push_back(ScriptedRun::Plan(json.to_string()));
    }

    pub fn requests(&self) -> Vec<AgentRequest> {
        self.requests.borrow().clone()
    }

    pub fn remaining(&self) -> usize {
        self.queue.borrow().len()
    }
}

impl Agent for ScriptedAgent {
    fn invoke(&self, request: &AgentRequest) -> Result<AgentRun> {
        self.requests.borrow_mut().push(request.clone());
        let next = self
            .queue
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("no scripted agent run left"))?;
        let exit = match next {
            ScriptedRun::SpawnError(message) => return Err(anyhow!(message)),
            ScriptedRun::Plan(json) => {
                let path = plan_output_path(&request.prompt)
                    .ok_or_else(|| anyhow!("planning prompt names no output path"))?;
                fs::write(&path, json).with_context(|| format!("write {}", path.display()))?;
                AgentExit::Completed
            }
            ScriptedRun::Exit { exit, files } => {
                for (rel, contents) in files {
                    let path = request.workdir.join(rel);
                    if let Some(parent) = path.parent() {
                        fs::create_dir_all(parent)?;
                    }
                    fs::write(&path, contents)?;
                }
                exit
            }
        };

        let transcript = if exit == AgentExit::Completed {
            SUCCESS_TRANSCRIPT.to_string()
        } else {
            String::new()
        };
        if let Some(path) = &request.transcript_path {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, &transcript)?;
        }
        Ok(AgentRun {
            exit,
            usage: parse_usage(&transcript),
            transcript,
            stderr: String::new(),
            duration: Duration::from_millis(10),
        })
    }
}

fn plan_output_path(prompt: &str) -> Option<PathBuf> {
    static OUTPUT_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"`([^`]*measure-[^`]*\.json)`").expect("output path regex")
    });
    OUTPUT_RE
        .captures(prompt)
        .map(|caps| PathBuf::from(&caps[1]))
}
