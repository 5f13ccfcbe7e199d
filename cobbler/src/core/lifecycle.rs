//! Generation lifecycle state resolved from lifecycle tags.
//!
//! Tags are the durable store; this module is the single place that turns a
//! set of tag names into a state value.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::core::naming::{TagKind, parse_tag};

/// Resolved lifecycle state of one generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationState {
    /// Branch exists without a start tag (manual branch or interrupted start).
    Orphaned,
    /// Start tag exists but the branch is gone and nothing else was recorded.
    Started,
    /// Start tag and branch both exist: work in progress.
    Active,
    /// Final commit tagged; merge has not completed.
    Finished,
    /// Merged into its base branch and version-tagged.
    Merged,
    /// Relabelled by reset; never merged.
    Abandoned,
}

impl GenerationState {
    pub fn as_str(self) -> &'static str {
        match self {
            GenerationState::Orphaned => "orphaned",
            GenerationState::Started => "started",
            GenerationState::Active => "active",
            GenerationState::Finished => "finished",
            GenerationState::Merged => "merged",
            GenerationState::Abandoned => "abandoned",
        }
    }

    /// True if the generation's code reached its base branch.
    pub fn is_merged(self) -> bool {
        self == GenerationState::Merged
    }
}

impl fmt::Display for GenerationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolve the state of `generation` from its tags and branch existence.
///
/// Precedence: `abandoned > merged > finished > active > started > orphaned`.
/// Returns `None` if neither a tag nor a branch references the generation.
pub fn resolve_state(
    kinds: &[TagKind],
    branch_exists: bool,
) -> Option<GenerationState> {
    let has = |kind: TagKind| kinds.contains(&kind);
    let state = if has(TagKind::Abandoned) {
        GenerationState::Abandoned
    } else if has(TagKind::Merged) {
        GenerationState::Merged
    } else if has(TagKind::Finished) {
        GenerationState::Finished
    } else if has(TagKind::Start) && branch_exists {
        GenerationState::Active
    } else if has(TagKind::Start) {
        GenerationState::Started
    } else if branch_exists {
        GenerationState::Orphaned
    } else {
        return None;
    };
    Some(state)
}

/// Group lifecycle tags by generation name. Non-lifecycle tags are ignored.
pub fn group_tags<'a>(tags: impl IntoIterator<Item = &'a str>) -> BTreeMap<String, Vec<TagKind>> {
    let mut grouped: BTreeMap<String, Vec<TagKind>> = BTreeMap::new();
    for tag in tags {
        if let Some((name, kind)) = parse_tag(tag) {
            let kinds = grouped.entry(name.to_string()).or_default();
            if !kinds.contains(&kind) {
                kinds.push(kind);
            }
        }
    }
    for kinds in grouped.values_mut() {
        kinds.sort();
    }
    grouped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precedence_prefers_terminal_tags() {
        let all = [
            TagKind::Start,
            TagKind::Finished,
            TagKind::Merged,
            TagKind::Abandoned,
        ];
        assert_eq!(resolve_state(&all, true), Some(GenerationState::Abandoned));
        assert_eq!(
            resolve_state(&[TagKind::Start, TagKind::Finished, TagKind::Merged], false),
            Some(GenerationState::Merged)
        );
        assert_eq!(
            resolve_state(&[TagKind::Start, TagKind::Finished], true),
            Some(GenerationState::Finished)
        );
    }

    #[test]
    fn branch_presence_distinguishes_active_from_started() {
        assert_eq!(
            resolve_state(&[TagKind::Start], true),
            Some(GenerationState::Active)
        );
        assert_eq!(
            resolve_state(&[TagKind::Start], false),
            Some(GenerationState::Started)
        );
        assert_eq!(resolve_state(&[], true), Some(GenerationState::Orphaned));
        assert_eq!(resolve_state(&[], false), None);
    }

    #[test]
    fn groups_tags_by_generation() {
        let grouped = group_tags([
            "gen-2026-01-01-00-00-00-start",
            "gen-2026-01-01-00-00-00-merged",
            "gen-2026-01-02-00-00-00-start",
            "v1.20260101.0",
        ]);
        assert_eq!(grouped.len(), 2);
        assert_eq!(
            grouped["gen-2026-01-01-00-00-00"],
            vec![TagKind::Start, TagKind::Merged]
        );
    }
}
