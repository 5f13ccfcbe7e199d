//! Prompt rendering for agent invocations.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use regex::Regex;
use tracing::debug;

use crate::core::types::Task;

const STITCH_TEMPLATE: &str = include_str!("prompts/stitch.md");
const MEASURE_TEMPLATE: &str = include_str!("prompts/measure.md");

/// Inputs for the task execution prompt.
#[derive(Debug, Clone)]
pub struct StitchPrompt<'a> {
    pub task: &'a Task,
    pub branch: &'a str,
    pub base: &'a str,
    pub project_context: &'a str,
}

/// Inputs for the planning prompt.
#[derive(Debug, Clone)]
pub struct MeasurePrompt<'a> {
    pub open_tasks: &'a [Task],
    pub limit: u32,
    pub output_path: &'a str,
    pub project_context: &'a str,
}

/// Renders prompts within a byte budget, dropping optional sections first.
#[derive(Debug)]
pub struct PromptBuilder {
    env: Environment<'static>,
    budget_bytes: usize,
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize) -> Result<Self> {
        let mut env = Environment::new();
        env.add_template("stitch", STITCH_TEMPLATE)
            .context("load stitch template")?;
        env.add_template("measure", MEASURE_TEMPLATE)
            .context("load measure template")?;
        Ok(Self { env, budget_bytes })
    }

    pub fn stitch(&self, input: &StitchPrompt<'_>) -> Result<String> {
        let rendered = self
            .env
            .get_template("stitch")?
            .render(context! {
                task => input.task,
                branch => input.branch,
                base => input.base,
                project_context => non_empty(input.project_context),
            })
            .context("render stitch prompt")?;
        Ok(self.fit(&rendered, &["context"]))
    }

    pub fn measure(&self, input: &MeasurePrompt<'_>) -> Result<String> {
        let rendered = self
            .env
            .get_template("measure")?
            .render(context! {
                open_tasks => input.open_tasks,
                limit => input.limit,
                output_path => input.output_path,
                project_context => non_empty(input.project_context),
            })
            .context("render measure prompt")?;
        Ok(self.fit(&rendered, &["open_tasks", "context"]))
    }

    fn fit(&self, rendered: &str, drop_order: &[&str]) -> String {
        let mut sections = parse_sections(rendered);
        apply_budget(&mut sections, self.budget_bytes, drop_order);
        sections
            .iter()
            .map(|s| s.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

fn non_empty(text: &str) -> Option<&str> {
    Some(text.trim()).filter(|t| !t.is_empty())
}

#[derive(Debug, Clone)]
struct Section {
    key: String,
    required: bool,
    content: String,
}

/// Split rendered output on `<!-- section:KEY required|droppable -->` markers.
fn parse_sections(rendered: &str) -> Vec<Section> {
    static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->")
            .expect("section marker regex")
    });

    let markers: Vec<_> = SECTION_RE.captures_iter(rendered).collect();
    let mut sections = Vec::new();
    for (i, caps) in markers.iter().enumerate() {
        let (Some(whole), Some(key), Some(kind)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let end = markers
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(rendered.len(), |m| m.start());
        let content = rendered[whole.end()..end].trim().to_string();
        let required = kind.as_str() == "required";
        if !content.is_empty() || required {
            sections.push(Section {
                key: key.as_str().to_string(),
                required,
                content,
            });
        }
    }
    sections
}

fn apply_budget(sections: &mut Vec<Section>, budget: usize, drop_order: &[&str]) {
    let total = |secs: &[Section]| -> usize { secs.iter().map(|s| s.content.len()).sum() };
    for key in drop_order {
        if total(sections) <= budget {
            return;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == *key && !s.required) {
            debug!(
                section = key,
                bytes_dropped = sections[idx].content.len(),
                "dropped prompt section for budget"
            );
            sections.remove(idx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::TaskStatus;

    fn task() -> Task {
        Task {
            id: "gen-7".to_string(),
            title: "Add tokenizer".to_string(),
            description: "Split input on whitespace.".to_string(),
            status: TaskStatus::Open,
            kind: "task".to_string(),
        }
    }

    #[test]
    fn stitch_prompt_names_task_and_branch() {
        let task = task();
        let prompt = PromptBuilder::new(10_000)
            .expect("builder")
            .stitch(&StitchPrompt {
                task: &task,
                branch: "task/main-gen-7",
                base: "main",
                project_context: "## docs/vision.md\n\nA parser.",
            })
            .expect("render");

        let contract = prompt.find("### Task Contract").expect("contract");
        let body = prompt.find("### Task gen-7").expect("task");
        let context = prompt.find("### Project Context").expect("context");
        assert!(contract < body && body < context);
        assert!(prompt.contains("task/main-gen-7"));
        assert!(prompt.contains("Split input on whitespace."));
        assert!(!prompt.contains("section:"));
    }

    #[test]
    fn empty_context_section_is_omitted() {
        let task = task();
        let prompt = PromptBuilder::new(10_000)
            .expect("builder")
            .stitch(&StitchPrompt {
                task: &task,
                branch: "task/main-gen-7",
                base: "main",
                project_context: "   ",
            })
            .expect("render");
        assert!(!prompt.contains("### Project Context"));
    }

    #[test]
    fn measure_prompt_drops_open_tasks_before_context() {
        let open: Vec<Task> = (0..50)
            .map(|i| Task {
                id: format!("gen-{i}"),
                ..task()
            })
            .collect();
        let builder = PromptBuilder::new(1_200).expect("builder");
        let prompt = builder
            .measure(&MeasurePrompt {
                open_tasks: &open,
                limit: 3,
                output_path: "/repo/.git/cobbler/measure.json",
                project_context: "Small context.",
            })
            .expect("render");

        assert!(prompt.contains("at most 3 new tasks"));
        assert!(prompt.contains("/repo/.git/cobbler/measure.json"));
        assert!(!prompt.contains("### Open Tasks"));
        assert!(prompt.contains("Small context."));
    }

    #[test]
    fn measure_prompt_lists_open_tasks_with_status() {
        let mut in_progress = task();
        in_progress.status = TaskStatus::InProgress;
        let open = vec![in_progress];
        let prompt = PromptBuilder::new(10_000)
            .expect("builder")
            .measure(&MeasurePrompt {
                open_tasks: &open,
                limit: 5,
                output_path: "out.json",
                project_context: "",
            })
            .expect("render");
        assert!(prompt.contains("- gen-7 [in_progress] Add tokenizer"));
    }
}
