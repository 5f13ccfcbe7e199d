//! Parsing for `git diff --numstat` and `git diff --name-status` output.

use serde::{Deserialize, Serialize};

/// One changed path with its change kind and line counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    /// Single-letter git status (`A`, `M`, `D`, `R`, ...).
    pub status: String,
    pub path: String,
    pub insertions: u64,
    pub deletions: u64,
}

/// Aggregated diff between a task branch and its base.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffStat {
    pub files_changed: usize,
    pub insertions: u64,
    pub deletions: u64,
    pub files: Vec<FileChange>,
}

impl DiffStat {
    /// Net line change (insertions minus deletions).
    pub fn loc_delta(&self) -> i64 {
        self.insertions as i64 - self.deletions as i64
    }
}

/// Combine `--name-status` and `--numstat` output into a [`DiffStat`].
///
/// Binary files (`-\t-\t<path>`) count as changed with zero lines. Paths seen
/// in numstat but not in name-status are reported with status `M`.
pub fn parse_diff(name_status: &str, numstat: &str) -> DiffStat {
    let mut files: Vec<FileChange> = Vec::new();
    for line in name_status.lines() {
        let mut parts = line.split('\t');
        let Some(code) = parts.next().map(str::trim).filter(|c| !c.is_empty()) else {
            continue;
        };
        // Renames and copies list old and new path; keep the new one.
        let Some(path) = parts.last() else {
            continue;
        };
        files.push(FileChange {
            status: code[..1].to_string(),
            path: path.to_string(),
            insertions: 0,
            deletions: 0,
        });
    }

    for line in numstat.lines() {
        let mut parts = line.splitn(3, '\t');
        let (Some(ins), Some(del), Some(path)) = (parts.next(), parts.next(), parts.next()) else {
            continue;
        };
        let path = numstat_path(path);
        let insertions = ins.parse().unwrap_or(0);
        let deletions = del.parse().unwrap_or(0);
        match files.iter_mut().find(|f| f.path == path) {
            Some(file) => {
                file.insertions = insertions;
                file.deletions = deletions;
            }
            None => files.push(FileChange {
                status: "M".to_string(),
                path,
                insertions,
                deletions,
            }),
        }
    }

    DiffStat {
        files_changed: files.len(),
        insertions: files.iter().map(|f| f.insertions).sum(),
        deletions: files.iter().map(|f| f.deletions).sum(),
        files,
    }
}

/// Numstat renders renames as `old => new` or `dir/{old => new}/file`.
fn numstat_path(raw: &str) -> String {
    let raw = raw.trim();
    if let (Some(open), Some(close)) = (raw.find('{'), raw.find('}'))
        && open < close
    {
        let inner = &raw[open + 1..close];
        if let Some((_, new)) = inner.split_once(" => ") {
            let joined = format!("{}{}{}", &raw[..open], new, &raw[close + 1..]);
            return joined.replace("//", "/");
        }
    }
    match raw.split_once(" => ") {
        Some((_, new)) => new.to_string(),
        None => raw.to_string(),
    }
}
