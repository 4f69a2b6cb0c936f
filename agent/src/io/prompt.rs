//! System prompt rendering.

use anyhow::Result;
use minijinja::{Environment, context};

const SYSTEM_TEMPLATE: &str = include_str!("prompts/system.md");

/// Opening user message of every run.
pub const KICKOFF_MESSAGE: &str = "Begin diagnosis and fix.";

/// Inputs for the system prompt.
#[derive(Debug, Clone)]
pub struct PromptInputs<'a> {
    pub repo: &'a str,
    pub title: &'a str,
    pub description: &'a str,
    pub branch: &'a str,
}

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("system", SYSTEM_TEMPLATE)
            .expect("system template should be valid");
        Self { env }
    }

    pub fn render_system(&self, input: &PromptInputs<'_>) -> Result<String> {
        let template = self.env.get_template("system")?;
        let rendered = template.render(context! {
            repo => input.repo,
            title => input.title.trim(),
            description => (!input.description.trim().is_empty()).then(|| input.description.trim()),
            branch => input.branch,
        })?;
        Ok(rendered)
    }
}

impl Default for PromptEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs<'a>(description: &'a str) -> PromptInputs<'a> {
        PromptInputs {
            repo: "acme/widgets",
            title: "Fix bug",
            description,
            branch: "agent/fix-fix-bug",
        }
    }

    #[test]
    fn renders_run_context() {
        let prompt = PromptEngine::new()
            .render_system(&inputs("Crash when the list is empty."))
            .expect("render");
        assert!(prompt.contains("`acme/widgets`"));
        assert!(prompt.contains("\"Fix bug\""));
        assert!(prompt.contains("Crash when the list is empty."));
        assert!(prompt.contains("branch: \"agent/fix-fix-bug\""));
        assert!(prompt.contains("do not call any tools"));
    }

    #[test]
    fn omits_empty_description_section() {
        let prompt = PromptEngine::new().render_system(&inputs("  ")).expect("render");
        assert!(!prompt.contains("## Issue description"));
    }
}
