//! Deterministic names for generations, lifecycle tags and task branches.
//!
//! Everything cobbler persists lives in git refs, so these functions are the
//! schema of the durable store. They must stay stable across releases.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use anyhow::{Result, anyhow};
use chrono::NaiveDateTime;
use regex::Regex;

/// `strftime` layout of the timestamp that follows the generation prefix.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d-%H-%M-%S";

/// Committed marker recording the branch a generation was started from.
pub const BASE_BRANCH_MARKER: &str = ".cobbler/base-branch";

/// Base branch used when no marker or override exists.
pub const DEFAULT_BASE_BRANCH: &str = "main";

const TASK_BRANCH_ROOT: &str = "task/";

static GENERATION_SUFFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d{4})-(\d{2})-(\d{2})-\d{2}-\d{2}-\d{2}$").expect("valid generation regex")
});

/// Lifecycle tag kinds, in the order a generation normally moves through them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TagKind {
    Start,
    Finished,
    Merged,
    Abandoned,
}

impl TagKind {
    pub const ALL: [TagKind; 4] = [
        TagKind::Start,
        TagKind::Finished,
        TagKind::Merged,
        TagKind::Abandoned,
    ];

    pub fn suffix(self) -> &'static str {
        match self {
            TagKind::Start => "-start",
            TagKind::Finished => "-finished",
            TagKind::Merged => "-merged",
            TagKind::Abandoned => "-abandoned",
        }
    }
}

/// Build a generation name from a prefix and a timestamp.
pub fn generation_name(prefix: &str, at: NaiveDateTime) -> String {
    format!("{prefix}{}", at.format(TIMESTAMP_FORMAT))
}

/// True if `name` looks like a generation created with `prefix`.
pub fn is_generation(prefix: &str, name: &str) -> bool {
    name.strip_prefix(prefix).is_some_and(|rest| {
        GENERATION_SUFFIX_RE
            .find(rest)
            .is_some_and(|m| m.start() == 0)
    })
}

/// Calendar date of a generation as `YYYYMMDD`.
pub fn generation_date(name: &str) -> Option<String> {
    let caps = GENERATION_SUFFIX_RE.captures(name)?;
    Some(format!("{}{}{}", &caps[1], &caps[2], &caps[3]))
}

pub fn tag_name(generation: &str, kind: TagKind) -> String {
    format!("{generation}{}", kind.suffix())
}

/// Split a lifecycle tag into `(generation, kind)`.
pub fn parse_tag(tag: &str) -> Option<(&str, TagKind)> {
    TagKind::ALL.iter().find_map(|kind| {
        tag.strip_suffix(kind.suffix())
            .filter(|name| !name.is_empty())
            .map(|name| (name, *kind))
    })
}

/// Human-facing release tag for a merged generation.
pub fn version_tag(generation: &str, revision: usize) -> Result<String> {
    let date = generation_date(generation)
        .ok_or_else(|| anyhow!("generation name '{generation}' has no timestamp"))?;
    Ok(format!("v1.{date}.{revision}"))
}

/// Ordinal of `target` among generations started on the same date.
///
/// `known` is the union of tag-derived and branch-derived names. Names are
/// deduplicated and sorted so the result is identical in every process.
pub fn revision<'a>(target: &str, known: impl IntoIterator<Item = &'a str>) -> Result<usize> {
    let date = generation_date(target)
        .ok_or_else(|| anyhow!("generation name '{target}' has no timestamp"))?;
    let mut same_day: BTreeSet<&str> = known
        .into_iter()
        .filter(|name| generation_date(name).as_deref() == Some(date.as_str()))
        .collect();
    same_day.insert(target);
    same_day
        .iter()
        .position(|name| *name == target)
        .ok_or_else(|| anyhow!("generation '{target}' missing from revision set"))
}

/// Branch that holds the work for `task_id` while it is in progress.
pub fn task_branch(base: &str, task_id: &str) -> String {
    format!("{TASK_BRANCH_ROOT}{base}-{task_id}")
}

pub fn is_task_branch(name: &str) -> bool {
    name.starts_with(TASK_BRANCH_ROOT)
}

/// The base `branch` was created from: the longest of `bases` it parses under.
///
/// `task/main-feature-t-1` belongs to `main-feature` when that is one of
/// `bases`, and to `main` otherwise.
pub fn task_branch_owner<'a>(
    branch: &str,
    bases: impl IntoIterator<Item = &'a str>,
) -> Option<&'a str> {
    bases
        .into_iter()
        .filter(|base| task_id_from_branch(base, branch).is_some())
        .max_by_key(|base| base.len())
}

/// Inverse of [`task_branch`].
pub fn task_id_from_branch<'a>(base: &str, branch: &'a str) -> Option<&'a str> {
    branch
        .strip_prefix(TASK_BRANCH_ROOT)?
        .strip_prefix(base)?
        .strip_prefix('-')
        .filter(|id| !id.is_empty())
}

/// Directory name for a worktree bound to `branch`.
pub fn worktree_dir_name(branch: &str) -> String {
    branch.replace(['/', '\\', ':'], "-")
}

/// Validate a generation prefix for use in branch and tag names.
pub fn validate_prefix(prefix: &str) -> Result<()> {
    if prefix.is_empty() {
        return Err(anyhow!("generation prefix must not be empty"));
    }
    if prefix
        .chars()
        .any(|c| !(c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-'))
    {
        return Err(anyhow!(
            "generation prefix must be [A-Za-z0-9._-] only (got '{prefix}')"
        ));
    }
    Ok(())
}
