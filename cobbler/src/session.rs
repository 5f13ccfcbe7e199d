//! Per-invocation context shared by the engine and the lifecycle manager.

use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::{Span, info_span};

use crate::core::naming::{is_generation, worktree_dir_name};
use crate::io::agent::Agent;
use crate::io::config::CobblerConfig;
use crate::io::git::Git;
use crate::io::history::History;
use crate::io::tracker::Tracker;

/// Repository, configuration and collaborators for one cobbler command.
///
/// The active generation is explicit state on the session; nothing is global.
pub struct Session<'a> {
    root: PathBuf,
    pub config: CobblerConfig,
    pub tracker: &'a dyn Tracker,
    pub agent: &'a dyn Agent,
    pub history: History,
    pub generation: Option<String>,
}

impl<'a> Session<'a> {
    pub fn new(
        root: impl Into<PathBuf>,
        config: CobblerConfig,
        tracker: &'a dyn Tracker,
        agent: &'a dyn Agent,
    ) -> Self {
        let root = root.into();
        let history = History::new(config.history_dir(&root));
        Self {
            root,
            config,
            tracker,
            agent,
            history,
            generation: None,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Git client for the main checkout.
    pub fn git(&self) -> Git {
        Git::new(&self.root)
    }

    pub fn prefix(&self) -> &str {
        &self.config.generation.prefix
    }

    pub fn is_generation(&self, branch: &str) -> bool {
        is_generation(self.prefix(), branch)
    }

    /// Local generation branches, sorted by name.
    pub fn generation_branches(&self) -> Result<Vec<String>> {
        let mut branches: Vec<String> = self
            .git()
            .list_branches(&format!("{}*", self.prefix()))?
            .into_iter()
            .filter(|b| self.is_generation(b))
            .collect();
        branches.sort();
        Ok(branches)
    }

    /// Deterministic worktree location for a task branch.
    pub fn worktree_path(&self, branch: &str) -> PathBuf {
        self.config
            .worktree_dir(&self.root)
            .join(worktree_dir_name(branch))
    }

    pub fn set_generation(&mut self, name: impl Into<String>) {
        self.generation = Some(name.into());
    }

    /// Span tagging log lines with the active generation, if any.
    pub fn span(&self) -> Span {
        match &self.generation {
            Some(name) => info_span!("generation", name = %name),
            None => Span::none(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MemoryTracker, ScriptedAgent};

    #[test]
    fn worktree_paths_are_flat_and_deterministic() {
        let tracker = MemoryTracker::new();
        let agent = ScriptedAgent::new();
        let mut config = CobblerConfig::default();
        config.paths.worktree_dir = "/tmp/wt".to_string();
        let session = Session::new("/work/repo", config, &tracker, &agent);

        assert_eq!(
            session.worktree_path("task/main-g-1"),
            PathBuf::from("/tmp/wt/task-main-g-1")
        );
        assert!(session.is_generation("generation-2026-01-01-00-00-00"));
        assert!(!session.is_generation("main"));
    }
}
