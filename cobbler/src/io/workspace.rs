//! Working-tree file operations for the generation lifecycle.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::debug;

use crate::core::naming::BASE_BRANCH_MARKER;

/// Delete the configured source directories. Returns true if anything was removed.
pub fn remove_source_dirs(root: &Path, dirs: &[String]) -> Result<bool> {
    let mut removed = false;
    for dir in dirs {
        let path = contained(root, dir)?;
        if path.exists() {
            debug!(dir = %path.display(), "removing source dir");
            fs::remove_dir_all(&path).with_context(|| format!("remove {}", path.display()))?;
            removed = true;
        }
    }
    Ok(removed)
}

/// Write placeholder files, creating parent directories as needed.
pub fn write_seed_files(root: &Path, files: &BTreeMap<String, String>) -> Result<()> {
    for (rel, contents) in files {
        let path = contained(root, rel)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        fs::write(&path, contents).with_context(|| format!("write seed {}", path.display()))?;
    }
    Ok(())
}

/// Record the branch a generation was started from.
pub fn write_base_marker(root: &Path, base: &str) -> Result<()> {
    let path = root.join(BASE_BRANCH_MARKER);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    fs::write(&path, format!("{base}\n")).with_context(|| format!("write {}", path.display()))
}

/// Parse marker file contents; blank markers count as absent.
pub fn parse_base_marker(contents: &str) -> Option<String> {
    Some(contents.trim())
        .filter(|b| !b.is_empty())
        .map(str::to_string)
}

pub fn remove_base_marker(root: &Path) -> Result<bool> {
    let path = root.join(BASE_BRANCH_MARKER);
    if !path.exists() {
        return Ok(false);
    }
    fs::remove_file(&path).with_context(|| format!("remove {}", path.display()))?;
    Ok(true)
}

/// Remove a directory left behind at a worktree path.
pub fn remove_stale_dir(path: &Path) -> Result<()> {
    if path.exists() {
        debug!(path = %path.display(), "removing leftover directory");
        fs::remove_dir_all(path).with_context(|| format!("remove {}", path.display()))?;
    }
    Ok(())
}

fn contained(root: &Path, rel: &str) -> Result<PathBuf> {
    let rel_path = Path::new(rel);
    if rel_path
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return Err(anyhow!("path {rel} must stay inside the repository"));
    }
    Ok(root.join(rel_path))
}
