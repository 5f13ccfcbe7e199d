use anyhow::Result;
use serde::Serialize;

use crate::core::lifecycle::{GenerationState, group_tags, resolve_state};
use crate::core::naming::revision;
use crate::session::Session;

use super::known_generations;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerationInfo {
    pub name: String,
    pub state: GenerationState,
    /// Ordinal among generations started on the same date.
    pub revision: usize,
    pub branch: bool,
}

/// Every generation known from tags or branches, sorted by name.
pub fn list_generations(session: &Session<'_>) -> Result<Vec<GenerationInfo>> {
    let git = session.git();
    let tags = git.list_tags(&format!("{}*", session.prefix()))?;
    let grouped = group_tags(tags.iter().map(String::as_str));
    let branches = session.generation_branches()?;
    let known = known_generations(session)?;

    let mut infos = Vec::new();
    for name in &known {
        let branch = branches.contains(name);
        let kinds = grouped.get(name).map(Vec::as_slice).unwrap_or_default();
        let Some(state) = resolve_state(kinds, branch) else {
            continue;
        };
        infos.push(GenerationInfo {
            name: name.clone(),
            state,
            revision: revision(name, known.iter().map(String::as_str))?,
            branch,
        });
    }
    Ok(infos)
}
