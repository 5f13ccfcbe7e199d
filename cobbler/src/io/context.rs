//! Project context assembled from configured documents.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use tracing::debug;

use crate::core::advisory::Advisories;

/// Concatenate `files` (relative to `root`) with path headers.
///
/// Missing or unreadable files are recorded as degradations and skipped.
pub fn project_context(root: &Path, files: &[String], advisories: &mut Advisories) -> String {
    let mut sections = Vec::new();
    for file in files {
        if let Some(body) = advisories.absorb("read-context", read_document(root, file)) {
            sections.push(render_document(file, &body));
        }
    }
    debug!(documents = sections.len(), "project context assembled");
    sections.join("\n\n")
}

fn read_document(root: &Path, file: &str) -> Result<String> {
    let path = root.join(file);
    if !path.is_file() {
        return Err(anyhow!("context file {} not found", path.display()));
    }
    fs::read_to_string(&path).with_context(|| format!("read context file {}", path.display()))
}

fn render_document(file: &str, body: &str) -> String {
    format!("## {}\n\n{}\n", file, body.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_documents_and_skips_missing() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(temp.path().join("docs")).expect("mkdir");
        fs::write(temp.path().join("docs/vision.md"), "Build a parser.\n").expect("write");
        fs::write(temp.path().join("README.md"), "hi\n").expect("write");

        let mut advisories = Advisories::new();
        let context = project_context(
            temp.path(),
            &[
                "docs/vision.md".to_string(),
                "missing.md".to_string(),
                "README.md".to_string(),
            ],
            &mut advisories,
        );

        assert_eq!(context, "## docs/vision.md\n\nBuild a parser.\n\n\n## README.md\n\nhi\n");
        let degraded = advisories.into_vec();
        assert_eq!(degraded.len(), 1);
        assert!(degraded[0].message.contains("missing.md"));
    }
}
