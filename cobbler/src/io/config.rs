//! Cobbler configuration stored under `.cobbler/config.toml`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::naming::validate_prefix;

/// Default config location relative to the repository root.
pub const DEFAULT_CONFIG_PATH: &str = ".cobbler/config.toml";

/// Cobbler configuration (TOML).
///
/// Intended to be edited by humans. Missing fields default to the values
/// below; a limit of `0` means unlimited.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CobblerConfig {
    pub generation: GenerationConfig,
    pub cycle: CycleConfig,
    pub agent: AgentConfig,
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GenerationConfig {
    /// Prefix for generation branch names.
    pub prefix: String,
    /// Explicit generation branch for resume/stop; empty means auto-detect.
    pub branch: String,
    /// Base branch override for stop/reset; empty means use the recorded marker.
    pub base_branch: String,
    /// Directories holding generated source, wiped at start, stop and reset.
    pub source_dirs: Vec<String>,
    /// Placeholder files written after the wipe at start.
    pub seed_files: BTreeMap<String, String>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        let mut seed_files = BTreeMap::new();
        seed_files.insert(
            "src/lib.rs".to_string(),
            "//! Generated crate. Tasks fill this in.\n".to_string(),
        );
        Self {
            prefix: "generation-".to_string(),
            branch: String::new(),
            base_branch: String::new(),
            source_dirs: vec!["src".to_string()],
            seed_files,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CycleConfig {
    /// Maximum scheduler cycles per run.
    pub max_cycles: u32,
    /// Tasks stitched per cycle.
    pub stitch_per_cycle: u32,
    /// Lifetime stitch budget for one run.
    pub stitch_total: u32,
    /// Maximum new tasks per planning pass.
    pub measure_batch: u32,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            max_cycles: 10,
            stitch_per_cycle: 5,
            stitch_total: 0,
            measure_batch: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Agent executable.
    pub command: String,
    /// Arguments always passed to the agent.
    pub args: Vec<String>,
    /// Extra arguments appended after `args`.
    pub extra_args: Vec<String>,
    /// Hard wall-clock limit per invocation.
    pub timeout_secs: u64,
    /// Truncate captured agent output beyond this many bytes.
    pub output_limit_bytes: usize,
    /// Prompt size above which optional sections are dropped.
    pub prompt_budget_bytes: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: "claude".to_string(),
            args: [
                "-p",
                "--output-format",
                "stream-json",
                "--verbose",
                "--dangerously-skip-permissions",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            extra_args: Vec::new(),
            timeout_secs: 60 * 60,
            output_limit_bytes: 2_000_000,
            prompt_budget_bytes: 200_000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    /// Directory for per-invocation history files; empty disables history.
    pub history_dir: String,
    /// Parent directory for task worktrees; empty uses the system temp dir.
    pub worktree_dir: String,
    /// Project documents included in agent prompts.
    pub context_files: Vec<String>,
}

impl CobblerConfig {
    pub fn validate(&self) -> Result<()> {
        validate_prefix(&self.generation.prefix)?;
        if self.agent.command.trim().is_empty() {
            return Err(anyhow!("agent.command must not be empty"));
        }
        if self.agent.timeout_secs == 0 {
            return Err(anyhow!("agent.timeout_secs must be > 0"));
        }
        if self.agent.output_limit_bytes == 0 {
            return Err(anyhow!("agent.output_limit_bytes must be > 0"));
        }
        if self.agent.prompt_budget_bytes == 0 {
            return Err(anyhow!("agent.prompt_budget_bytes must be > 0"));
        }
        if self.cycle.measure_batch == 0 {
            return Err(anyhow!("cycle.measure_batch must be > 0"));
        }
        if self
            .generation
            .source_dirs
            .iter()
            .any(|d| d.trim().is_empty() || d.starts_with('/') || d.contains(".."))
        {
            return Err(anyhow!(
                "generation.source_dirs must be relative paths inside the repository"
            ));
        }
        Ok(())
    }

    /// History directory resolved against `root`, if configured.
    pub fn history_dir(&self, root: &Path) -> Option<PathBuf> {
        non_empty_path(root, &self.paths.history_dir)
    }

    /// Directory that holds task worktrees for the repository at `root`.
    pub fn worktree_dir(&self, root: &Path) -> PathBuf {
        if let Some(dir) = non_empty_path(root, &self.paths.worktree_dir) {
            return dir;
        }
        let repo_name = root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "repo".to_string());
        std::env::temp_dir()
            .join("cobbler-worktrees")
            .join(repo_name)
    }

    /// Generation branch override, if set.
    pub fn branch_override(&self) -> Option<&str> {
        Some(self.generation.branch.trim()).filter(|b| !b.is_empty())
    }

    /// Base branch override, if set.
    pub fn base_branch_override(&self) -> Option<&str> {
        Some(self.generation.base_branch.trim()).filter(|b| !b.is_empty())
    }
}

fn non_empty_path(root: &Path, raw: &str) -> Option<PathBuf> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let path = Path::new(raw);
    Some(if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    })
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `CobblerConfig::default()`.
pub fn load_config(path: &Path) -> Result<CobblerConfig> {
    if !path.exists() {
        let cfg = CobblerConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: CobblerConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &CobblerConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, CobblerConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        let mut cfg = CobblerConfig::default();
        cfg.cycle.stitch_total = 20;
        cfg.paths.history_dir = "history".to_string();
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "[cycle]\nmax_cycles = 3\n").expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.cycle.max_cycles, 3);
        assert_eq!(cfg.cycle.measure_batch, 5);
        assert_eq!(cfg.generation.prefix, "generation-");
    }

    #[test]
    fn rejects_zero_timeout_and_escaping_source_dirs() {
        let mut cfg = CobblerConfig::default();
        cfg.agent.timeout_secs = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = CobblerConfig::default();
        cfg.generation.source_dirs = vec!["../elsewhere".to_string()];
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn resolves_relative_paths_against_root() {
        let mut cfg = CobblerConfig::default();
        let root = Path::new("/work/repo");
        assert_eq!(cfg.history_dir(root), None);
        cfg.paths.history_dir = ".cobbler/history".to_string();
        assert_eq!(
            cfg.history_dir(root),
            Some(PathBuf::from("/work/repo/.cobbler/history"))
        );
        assert!(cfg.worktree_dir(root).ends_with("cobbler-worktrees/repo"));
        assert_eq!(cfg.branch_override(), None);
    }
}
