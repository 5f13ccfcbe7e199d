//! History sink for agent invocations.
//!
//! Each invocation gets a file family in the history directory:
//! `<timestamp>-<phase>-{prompt.md,transcript.jsonl,stderr.log,stats.json,report.json}`.
//! A sink without a directory accepts every call and writes nothing.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use serde::Serialize;

use crate::core::types::TokenUsage;

const STAMP_FORMAT: &str = "%Y%m%dT%H%M%S%.3f";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InvocationStatus {
    Success,
    Failed,
}

/// Outcome summary written to `stats.json`.
#[derive(Debug, Clone, Serialize)]
pub struct InvocationStats {
    pub phase: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub status: InvocationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub usage: TokenUsage,
    pub duration_ms: u64,
    pub recorded_at: String,
}

impl InvocationStats {
    pub fn success(
        phase: &str,
        task_id: Option<&str>,
        usage: TokenUsage,
        duration_ms: u64,
    ) -> Self {
        Self {
            phase: phase.to_string(),
            task_id: task_id.map(str::to_string),
            status: InvocationStatus::Success,
            reason: None,
            usage,
            duration_ms,
            recorded_at: Local::now().to_rfc3339(),
        }
    }

    pub fn failed(phase: &str, task_id: Option<&str>, reason: impl Into<String>) -> Self {
        Self {
            phase: phase.to_string(),
            task_id: task_id.map(str::to_string),
            status: InvocationStatus::Failed,
            reason: Some(reason.into()),
            usage: TokenUsage::default(),
            duration_ms: 0,
            recorded_at: Local::now().to_rfc3339(),
        }
    }

    pub fn with_usage(mut self, usage: TokenUsage, duration_ms: u64) -> Self {
        self.usage = usage;
        self.duration_ms = duration_ms;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct History {
    dir: Option<PathBuf>,
}

impl History {
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self { dir }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    /// Reserve a file family for one invocation of `phase`.
    pub fn entry(&self, phase: &str) -> HistoryEntry {
        let Some(dir) = &self.dir else {
            return HistoryEntry { stem: None };
        };
        let base = format!("{}-{}", Local::now().format(STAMP_FORMAT), sanitize(phase));
        let mut stem = dir.join(&base);
        let mut n = 1;
        while dir.join(format!("{}-prompt.md", stem_name(&stem))).exists() {
            stem = dir.join(format!("{base}-{n}"));
            n += 1;
        }
        HistoryEntry { stem: Some(stem) }
    }
}

/// File family for one invocation.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    stem: Option<PathBuf>,
}

impl HistoryEntry {
    fn path(&self, suffix: &str) -> Option<PathBuf> {
        self.stem
            .as_ref()
            .map(|stem| stem.with_file_name(format!("{}-{suffix}", stem_name(stem))))
    }

    pub fn prompt_path(&self) -> Option<PathBuf> {
        self.path("prompt.md")
    }

    pub fn transcript_path(&self) -> Option<PathBuf> {
        self.path("transcript.jsonl")
    }

    pub fn stderr_path(&self) -> Option<PathBuf> {
        self.path("stderr.log")
    }

    pub fn stats_path(&self) -> Option<PathBuf> {
        self.path("stats.json")
    }

    pub fn report_path(&self) -> Option<PathBuf> {
        self.path("report.json")
    }

    pub fn write_prompt(&self, prompt: &str) -> Result<()> {
        match self.prompt_path() {
            Some(path) => write_text(&path, prompt),
            None => Ok(()),
        }
    }

    /// Write the transcript unless the agent already streamed it to disk.
    pub fn write_transcript(&self, transcript: &str) -> Result<()> {
        match self.transcript_path() {
            Some(path) if !path.exists() => write_text(&path, transcript),
            _ => Ok(()),
        }
    }

    /// Keep the agent's stderr next to its transcript. Empty output writes no file.
    pub fn write_stderr(&self, stderr: &str) -> Result<()> {
        match self.stderr_path() {
            Some(path) if !stderr.is_empty() => write_text(&path, stderr),
            _ => Ok(()),
        }
    }

    pub fn write_stats(&self, stats: &InvocationStats) -> Result<()> {
        match self.stats_path() {
            Some(path) => write_json(&path, stats),
            None => Ok(()),
        }
    }

    pub fn write_report<T: Serialize>(&self, report: &T) -> Result<()> {
        match self.report_path() {
            Some(path) => write_json(&path, report),
            None => Ok(()),
        }
    }
}

fn stem_name(stem: &Path) -> String {
    stem.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn sanitize(phase: &str) -> String {
    phase
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect()
}

fn write_text(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create history dir {}", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    write_text(path, &buf)
}
