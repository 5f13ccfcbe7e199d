//! Planning pass: ask the agent for new tasks and file them in the tracker.
//!
//! The agent writes a JSON array of proposals to a file under
//! `<git-dir>/cobbler/`. Proposals may depend on earlier proposals by index.
//! A failed or unreadable planning pass files nothing and is not an error.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use chrono::Local;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::core::advisory::{Advisories, Degradation};
use crate::core::types::{NewTask, STITCH_TASK_TYPE, Task};
use crate::io::agent::{AgentExit, AgentRequest};
use crate::io::context::project_context;
use crate::io::history::InvocationStats;
use crate::io::prompt::{MeasurePrompt, PromptBuilder};
use crate::session::Session;

const PHASE: &str = "measure";

/// One task proposed by the planning agent.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProposedTask {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    /// Indices of earlier proposals in the same batch.
    #[serde(default)]
    pub depends_on: Vec<usize>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MeasureReport {
    /// Number of proposals the agent returned, before truncation.
    pub proposed: usize,
    /// Tracker ids of the filed tasks, in proposal order.
    pub created: Vec<String>,
    /// Why the pass produced nothing, if it failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    pub degraded: Vec<Degradation>,
}

/// Run one planning pass filing at most `limit` tasks (`0` = `cycle.measure_batch`).
#[instrument(skip_all, fields(limit))]
pub fn measure(session: &Session<'_>, limit: u32) -> Result<MeasureReport> {
    let limit = if limit == 0 {
        session.config.cycle.measure_batch
    } else {
        limit
    };
    let span = session.span();
    let _entered = span.enter();
    let mut advisories = Advisories::new();

    let output_dir = session.git().git_dir()?.join("cobbler");
    fs::create_dir_all(&output_dir)
        .with_context(|| format!("create {}", output_dir.display()))?;
    let output_path = output_dir.join(format!(
        "measure-{}.json",
        Local::now().format("%Y%m%dT%H%M%S%.3f")
    ));

    let mut open_tasks: Vec<Task> = advisories
        .absorb("list-in-progress", session.tracker.list_in_progress())
        .unwrap_or_default();
    open_tasks.extend(
        advisories
            .absorb("list-ready", session.tracker.list_ready())
            .unwrap_or_default(),
    );
    let context = project_context(
        session.root(),
        &session.config.paths.context_files,
        &mut advisories,
    );
    let prompt = PromptBuilder::new(session.config.agent.prompt_budget_bytes)?.measure(
        &MeasurePrompt {
            open_tasks: &open_tasks,
            limit,
            output_path: &output_path.display().to_string(),
            project_context: &context,
        },
    )?;

    let history = session.history.entry(PHASE);
    advisories.absorb("history-prompt", history.write_prompt(&prompt));
    let request = AgentRequest::new(session.root(), prompt, &session.config.agent)
        .with_transcript(history.transcript_path());

    let mut report = MeasureReport::default();
    let outcome = session
        .agent
        .invoke(&request)
        .and_then(|run| {
            advisories.absorb(
                "history-transcript",
                history.write_transcript(&run.transcript),
            );
            advisories.absorb("history-stderr", history.write_stderr(&run.stderr));
            match run.exit {
                AgentExit::Completed => Ok(run),
                AgentExit::TimedOut => Err(anyhow!(
                    "planning agent timed out after {}s",
                    request.timeout.as_secs()
                )),
                AgentExit::Failed { code } => {
                    Err(anyhow!("planning agent exited with status {code:?}"))
                }
            }
        })
        .and_then(|run| read_proposals(&output_path).map(|proposals| (run, proposals)));

    match outcome {
        Ok((run, mut proposals)) => {
            report.proposed = proposals.len();
            proposals.truncate(limit as usize);
            report.created = file_proposals(session, &proposals, &mut advisories);
            advisories.absorb(
                "history-stats",
                history.write_stats(&InvocationStats::success(
                    PHASE,
                    None,
                    run.usage,
                    run.duration.as_millis() as u64,
                )),
            );
        }
        Err(err) => {
            let reason = format!("{err:#}");
            warn!(reason = %reason, "planning pass failed");
            advisories.absorb(
                "history-stats",
                history.write_stats(&InvocationStats::failed(PHASE, None, reason.clone())),
            );
            report.failure = Some(reason);
        }
    }

    if !report.created.is_empty() {
        let message = format!("Measure: add {} task(s)", report.created.len());
        advisories.absorb("bookkeeping-commit", session.git().commit_all(&message));
    }
    info!(
        proposed = report.proposed,
        created = report.created.len(),
        "planning pass finished"
    );
    advisories.absorb("history-report", history.write_report(&report));
    report.degraded = advisories.into_vec();
    Ok(report)
}

/// Parse the agent's proposal file.
pub fn read_proposals(path: &Path) -> Result<Vec<ProposedTask>> {
    if !path.exists() {
        return Err(anyhow!("planning agent wrote no task list to {}", path.display()));
    }
    let contents =
        fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}

/// Create tasks in order and wire dependencies by index.
fn file_proposals(
    session: &Session<'_>,
    proposals: &[ProposedTask],
    advisories: &mut Advisories,
) -> Vec<String> {
    let mut ids: Vec<Option<String>> = Vec::with_capacity(proposals.len());
    for proposal in proposals {
        let new_task = NewTask {
            title: proposal.title.clone(),
            description: proposal.description.clone(),
            kind: proposal
                .kind
                .clone()
                .unwrap_or_else(|| STITCH_TASK_TYPE.to_string()),
        };
        ids.push(advisories.absorb("create-task", session.tracker.create(&new_task)));
    }

    for (index, proposal) in proposals.iter().enumerate() {
        let Some(id) = &ids[index] else {
            continue;
        };
        for &dep in &proposal.depends_on {
            if dep >= index {
                advisories.absorb::<()>(
                    "add-dependency",
                    Err(anyhow!(
                        "task {id} depends on proposal {dep}, which is not earlier"
                    )),
                );
                continue;
            }
            if let Some(dep_id) = &ids[dep] {
                advisories.absorb(
                    "add-dependency",
                    session.tracker.add_dependency(id, dep_id),
                );
            }
        }
    }
    ids.into_iter().flatten().collect()
}
