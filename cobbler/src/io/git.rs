//! Git adapter for cobbler operations.
//!
//! Every durable fact cobbler relies on lives in git refs, so we keep a small,
//! explicit wrapper around `git` subprocess calls. Calls have no timeout; a hung
//! git blocks the engine and recovery repairs state on the next run.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};

/// Parsed `git status --porcelain` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// 2-letter XY code, or "??" for untracked.
    pub code: String,
    /// Path for the changed file.
    pub path: String,
}

/// One entry of `git worktree list --porcelain`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorktreeEntry {
    pub path: PathBuf,
    /// Short branch name, `None` for detached or bare worktrees.
    pub branch: Option<String>,
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Return the current branch name (errors on detached HEAD).
    #[instrument(skip_all)]
    pub fn current_branch(&self) -> Result<String> {
        let out = self.run_capture(&["rev-parse", "--abbrev-ref", "HEAD"])?;
        let name = out.trim().to_string();
        if name == "HEAD" {
            warn!("detached HEAD detected");
            return Err(anyhow!(
                "detached HEAD in {} (check out a branch first)",
                self.workdir.display()
            ));
        }
        debug!(branch = %name, "current branch");
        Ok(name)
    }

    /// Resolve a revision to a full object id.
    pub fn rev_parse(&self, rev: &str) -> Result<String> {
        let out = self.run_capture(&["rev-parse", "--verify", &format!("{rev}^{{commit}}")])?;
        Ok(out.trim().to_string())
    }

    /// Absolute path of the repository's git directory.
    pub fn git_dir(&self) -> Result<PathBuf> {
        let out = self.run_capture(&["rev-parse", "--absolute-git-dir"])?;
        Ok(PathBuf::from(out.trim()))
    }

    /// Get status entries (including untracked) in porcelain format.
    pub fn status_porcelain(&self) -> Result<Vec<StatusEntry>> {
        let out = self.run_capture(&["status", "--porcelain=v1", "-uall"])?;
        let mut entries = Vec::new();
        for line in out.lines() {
            if line.trim().is_empty() {
                continue;
            }
            entries.push(parse_status_line(line)?);
        }
        Ok(entries)
    }

    /// True if there are no uncommitted changes (including untracked files).
    pub fn is_clean(&self) -> Result<bool> {
        Ok(self.status_porcelain()?.is_empty())
    }

    /// Check whether a local branch exists.
    pub fn branch_exists(&self, branch: &str) -> Result<bool> {
        self.ref_exists(&format!("refs/heads/{branch}"))
    }

    /// Check whether a tag exists.
    pub fn tag_exists(&self, tag: &str) -> Result<bool> {
        self.ref_exists(&format!("refs/tags/{tag}"))
    }

    fn ref_exists(&self, full_ref: &str) -> Result<bool> {
        let status = self
            .run(&["show-ref", "--verify", "--quiet", full_ref])?
            .status;
        Ok(status.success())
    }

    /// List local branches matching a `for-each-ref` glob (relative to `refs/heads/`).
    pub fn list_branches(&self, pattern: &str) -> Result<Vec<String>> {
        let out = self.run_capture(&[
            "for-each-ref",
            "--format=%(refname:short)",
            &format!("refs/heads/{pattern}"),
        ])?;
        Ok(non_empty_lines(&out))
    }

    /// Every local branch.
    pub fn local_branches(&self) -> Result<Vec<String>> {
        let out = self.run_capture(&["for-each-ref", "--format=%(refname:short)", "refs/heads"])?;
        Ok(non_empty_lines(&out))
    }

    /// Create and checkout a new branch at current HEAD.
    #[instrument(skip_all, fields(branch))]
    pub fn checkout_new_branch(&self, branch: &str) -> Result<()> {
        debug!(branch, "creating and checking out new branch");
        self.run_checked(&["checkout", "-b", branch])?;
        Ok(())
    }

    /// Checkout an existing branch.
    #[instrument(skip_all, fields(branch))]
    pub fn checkout_branch(&self, branch: &str) -> Result<()> {
        debug!(branch, "checking out branch");
        self.run_checked(&["checkout", branch])?;
        Ok(())
    }

    /// Create a branch at `start` without checking it out.
    pub fn create_branch(&self, branch: &str, start: &str) -> Result<()> {
        debug!(branch, start, "creating branch");
        self.run_checked(&["branch", branch, start])?;
        Ok(())
    }

    /// Delete a local branch; `force` allows deleting unmerged work.
    pub fn delete_branch(&self, branch: &str, force: bool) -> Result<()> {
        debug!(branch, force, "deleting branch");
        let flag = if force { "-D" } else { "-d" };
        self.run_checked(&["branch", flag, branch])?;
        Ok(())
    }

    /// List tags matching a glob.
    pub fn list_tags(&self, pattern: &str) -> Result<Vec<String>> {
        let out = self.run_capture(&["tag", "--list", pattern])?;
        Ok(non_empty_lines(&out))
    }

    /// Tag the current HEAD.
    pub fn create_tag(&self, tag: &str) -> Result<()> {
        self.create_tag_at(tag, "HEAD")
    }

    /// Create a lightweight tag pointing at `rev`.
    pub fn create_tag_at(&self, tag: &str, rev: &str) -> Result<()> {
        debug!(tag, rev, "creating tag");
        self.run_checked(&["tag", tag, rev])?;
        Ok(())
    }

    pub fn delete_tag(&self, tag: &str) -> Result<()> {
        debug!(tag, "deleting tag");
        self.run_checked(&["tag", "-d", tag])?;
        Ok(())
    }

    /// Move a tag to a new name, keeping its target.
    pub fn rename_tag(&self, from: &str, to: &str) -> Result<()> {
        self.create_tag_at(to, from)?;
        self.delete_tag(from)
    }

    /// Add a worktree at `path` checking out the existing `branch`.
    #[instrument(skip_all, fields(branch))]
    pub fn worktree_add(&self, path: &Path, branch: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create worktree parent {}", parent.display()))?;
        }
        let path_str = path_arg(path)?;
        debug!(path = %path.display(), branch, "adding worktree");
        self.run_checked(&["worktree", "add", path_str, branch])?;
        Ok(())
    }

    /// Forcefully remove the worktree at `path`.
    pub fn worktree_remove(&self, path: &Path) -> Result<()> {
        let path_str = path_arg(path)?;
        debug!(path = %path.display(), "removing worktree");
        self.run_checked(&["worktree", "remove", "--force", path_str])?;
        Ok(())
    }

    /// Drop administrative data for worktrees whose directories are gone.
    pub fn worktree_prune(&self) -> Result<()> {
        self.run_checked(&["worktree", "prune"])?;
        Ok(())
    }

    /// List registered worktrees.
    pub fn worktree_list(&self) -> Result<Vec<WorktreeEntry>> {
        let out = self.run_capture(&["worktree", "list", "--porcelain"])?;
        Ok(parse_worktree_list(&out))
    }

    /// Stage all changes (respects .gitignore).
    pub fn add_all(&self) -> Result<()> {
        self.run_checked(&["add", "-A"])?;
        Ok(())
    }

    /// True if there is anything staged for commit.
    pub fn has_staged_changes(&self) -> Result<bool> {
        let out = self.run(&["diff", "--cached", "--name-only"])?;
        Ok(!String::from_utf8_lossy(&out.stdout).trim().is_empty())
    }

    /// Commit staged changes with a message.
    ///
    /// If there are no staged changes, this returns Ok(false) and does nothing.
    #[instrument(skip_all)]
    pub fn commit_staged(&self, message: &str) -> Result<bool> {
        if !self.has_staged_changes()? {
            debug!("no staged changes, skipping commit");
            return Ok(false);
        }
        debug!("committing staged changes");
        self.run_checked(&["commit", "--no-verify", "-m", message])?;
        Ok(true)
    }

    /// Commit whatever is staged, creating an empty commit if nothing is.
    pub fn commit_allow_empty(&self, message: &str) -> Result<()> {
        debug!("committing (allow empty)");
        self.run_checked(&["commit", "--no-verify", "--allow-empty", "-m", message])?;
        Ok(())
    }

    /// Stage everything and commit it; returns whether a commit was made.
    pub fn commit_all(&self, message: &str) -> Result<bool> {
        self.add_all()?;
        self.commit_staged(message)
    }

    /// Stash uncommitted changes including untracked files. Returns false if clean.
    pub fn stash(&self, message: &str) -> Result<bool> {
        if self.is_clean()? {
            return Ok(false);
        }
        self.run_checked(&["stash", "push", "--include-untracked", "-m", message])?;
        Ok(true)
    }

    /// Merge `branch` into the current branch with a merge commit.
    #[instrument(skip_all, fields(branch))]
    pub fn merge_no_ff(&self, branch: &str, message: &str) -> Result<()> {
        debug!(branch, "merging");
        self.run_checked(&["merge", "--no-ff", "--no-edit", "-m", message, branch])?;
        Ok(())
    }

    /// Abort an in-progress merge.
    pub fn merge_abort(&self) -> Result<()> {
        self.run_checked(&["merge", "--abort"])?;
        Ok(())
    }

    /// `git diff --name-status` between the merge base of `base` and `head`.
    pub fn diff_name_status(&self, base: &str, head: &str) -> Result<String> {
        self.run_capture(&["diff", "--name-status", &format!("{base}...{head}")])
    }

    /// `git diff --numstat` between the merge base of `base` and `head`.
    pub fn diff_numstat(&self, base: &str, head: &str) -> Result<String> {
        self.run_capture(&["diff", "--numstat", &format!("{base}...{head}")])
    }

    /// Read a file as of `rev`. Returns `None` if the path does not exist there.
    pub fn show_file(&self, rev: &str, path: &str) -> Result<Option<String>> {
        let out = self.run(&["show", &format!("{rev}:{path}")])?;
        if !out.status.success() {
            debug!(rev, path, "file not present at revision");
            return Ok(None);
        }
        Ok(Some(String::from_utf8_lossy(&out.stdout).to_string()))
    }

    /// Files tracked at `rev` under any of `paths`.
    pub fn list_files_at(&self, rev: &str, paths: &[String]) -> Result<Vec<String>> {
        let mut args = vec!["ls-tree", "-r", "--name-only", rev, "--"];
        args.extend(paths.iter().map(String::as_str));
        let out = self.run_capture(&args)?;
        Ok(non_empty_lines(&out))
    }

    /// Restore `paths` in the working tree and index from `rev`.
    pub fn checkout_paths_from(&self, rev: &str, paths: &[String]) -> Result<()> {
        if paths.is_empty() {
            return Ok(());
        }
        let mut args = vec!["checkout", rev, "--"];
        args.extend(paths.iter().map(String::as_str));
        self.run_checked(&args)?;
        Ok(())
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            // Merge and commit report conflicts and hook output on stdout.
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = match stderr.trim() {
                "" => String::from_utf8_lossy(&output.stdout).trim().to_string(),
                trimmed => trimmed.to_string(),
            };
            return Err(anyhow!("git {} failed: {}", args.join(" "), detail));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

fn path_arg(path: &Path) -> Result<&str> {
    path.to_str()
        .ok_or_else(|| anyhow!("non-UTF-8 path {}", path.display()))
}

fn non_empty_lines(out: &str) -> Vec<String> {
    out.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect()
}

fn parse_status_line(line: &str) -> Result<StatusEntry> {
    if let Some(path) = line.strip_prefix("?? ") {
        return Ok(StatusEntry {
            code: "??".to_string(),
            path: path.trim().to_string(),
        });
    }
    if line.len() < 4 {
        return Err(anyhow!("unexpected porcelain line: '{line}'"));
    }
    let code = line[..2].to_string();
    let mut path = line[3..].trim().to_string();
    if let Some((_, new)) = path.split_once("->") {
        path = new.trim().to_string();
    }
    Ok(StatusEntry { code, path })
}

fn parse_worktree_list(out: &str) -> Vec<WorktreeEntry> {
    let mut entries = Vec::new();
    let mut current: Option<WorktreeEntry> = None;
    for line in out.lines() {
        if let Some(path) = line.strip_prefix("worktree ") {
            if let Some(entry) = current.take() {
                entries.push(entry);
            }
            current = Some(WorktreeEntry {
                path: PathBuf::from(path),
                branch: None,
            });
        } else if let Some(branch) = line.strip_prefix("branch ")
            && let Some(entry) = current.as_mut()
        {
            entry.branch = Some(
                branch
                    .strip_prefix("refs/heads/")
                    .unwrap_or(branch)
                    .to_string(),
            );
        }
    }
    if let Some(entry) = current {
        entries.push(entry);
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_untracked_line() {
        let e = parse_status_line("?? foo.txt").expect("parse");
        assert_eq!(
            e,
            StatusEntry {
                code: "??".to_string(),
                path: "foo.txt".to_string()
            }
        );
    }

    #[test]
    fn parses_modified_line() {
        let e = parse_status_line(" M src/main.rs").expect("parse");
        assert_eq!(e.code, " M");
        assert_eq!(e.path, "src/main.rs");
    }

    #[test]
    fn parses_rename_line_uses_new_path() {
        let e = parse_status_line("R  old.txt -> new.txt").expect("parse");
        assert_eq!(e.path, "new.txt");
    }

    #[test]
    fn parses_worktree_porcelain() {
        let out = "worktree /repo\nHEAD abc\nbranch refs/heads/main\n\n\
                   worktree /tmp/wt/task-main-t-1\nHEAD def\nbranch refs/heads/task/main-t-1\n\n\
                   worktree /tmp/wt/detached\nHEAD 123\ndetached\n";
        let entries = parse_worktree_list(out);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].branch.as_deref(), Some("main"));
        assert_eq!(entries[1].path, PathBuf::from("/tmp/wt/task-main-t-1"));
        assert_eq!(entries[1].branch.as_deref(), Some("task/main-t-1"));
        assert_eq!(entries[2].branch, None);
    }

    #[test]
    fn branch_and_tag_helpers_work_on_scratch_repo() {
        let repo = crate::test_support::TestRepo::new().expect("repo");
        let git = Git::new(repo.root());

        git.create_branch("task/main-t-1", "main").expect("branch");
        assert!(git.branch_exists("task/main-t-1").expect("exists"));
        assert_eq!(
            git.list_branches("task/main-*").expect("list"),
            vec!["task/main-t-1".to_string()]
        );
        git.delete_branch("task/main-t-1", true).expect("delete");
        assert!(!git.branch_exists("task/main-t-1").expect("exists"));

        git.create_tag("gen-start").expect("tag");
        git.rename_tag("gen-start", "gen-abandoned").expect("rename");
        assert!(!git.tag_exists("gen-start").expect("exists"));
        assert!(git.tag_exists("gen-abandoned").expect("exists"));

        assert_eq!(
            git.show_file("HEAD", "README.md").expect("show").as_deref(),
            Some("hi\n")
        );
        assert_eq!(git.show_file("HEAD", "missing.txt").expect("show"), None);
    }

    #[test]
    fn failed_merge_error_carries_conflict_report() {
        let repo = crate::test_support::TestRepo::new().expect("repo");
        let git = Git::new(repo.root());
        git.checkout_new_branch("side").expect("side");
        repo.commit_file("README.md", "side\n", "side edit")
            .expect("commit");
        git.checkout_branch("main").expect("main");
        repo.commit_file("README.md", "main\n", "main edit")
            .expect("commit");

        let err = git.merge_no_ff("side", "merge side").expect_err("conflict");

        let message = format!("{err:#}");
        assert!(message.contains("CONFLICT"), "{message}");
        git.merge_abort().expect("abort");
        assert!(git.is_clean().expect("clean"));
    }
}
