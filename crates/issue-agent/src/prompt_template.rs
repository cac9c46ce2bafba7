use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tera::{Context, Error as TeraError, Tera};
use thiserror::Error;

const DEFAULT_PROMPTS: &str = include_str!("prompts/default_prompts.yml");

pub fn load_prompt<T: Serialize>(template: &str, context_data: &T) -> Result<String, TeraError> {
    let mut tera = Tera::default();
    tera.add_raw_template("inline_template", template)?;
    let context = Context::from_serialize(context_data)?;
    let rendered = tera.render("inline_template", &context)?;
    Ok(rendered)
}

#[derive(Error, Debug)]
pub enum PromptError {
    #[error("failed to read prompt file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse prompt file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("prompt template for agent {0} is not found")]
    NotFound(String),

    #[error("failed to render prompt template {name}: {source}")]
    Render {
        name: String,
        #[source]
        source: TeraError,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentPrompt {
    pub name: String,
    pub system_template: String,
    pub user_template: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptTemplates {
    pub agents: Vec<AgentPrompt>,
}

/// A system and user prompt pair, ready to be sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPrompt {
    pub system: String,
    pub user: String,
}

impl PromptTemplates {
    /// The templates shipped with the library
    pub fn embedded() -> Result<Self, PromptError> {
        Self::parse(DEFAULT_PROMPTS)
    }

    pub fn parse(yaml: &str) -> Result<Self, PromptError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, PromptError> {
        Self::parse(&fs::read_to_string(path)?)
    }

    /// Templates from `path` when given, otherwise the embedded ones
    pub fn load(path: Option<&Path>) -> Result<Self, PromptError> {
        match path {
            Some(path) => Self::from_file(path),
            None => Self::embedded(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&AgentPrompt> {
        self.agents.iter().find(|a| a.name == name)
    }

    pub fn render<T: Serialize>(&self, name: &str, context: &T) -> Result<RenderedPrompt, PromptError> {
        let prompt = self
            .get(name)
            .ok_or_else(|| PromptError::NotFound(name.to_string()))?;
        let render = |template: &str| {
            load_prompt(template, context).map_err(|source| PromptError::Render {
                name: name.to_string(),
                source,
            })
        };
        Ok(RenderedPrompt {
            system: render(&prompt.system_template)?,
            user: render(&prompt.user_template)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn test_load_prompt_renders_loops() {
        let template = "Files in #{{ number }}:{% for f in files %} {{ f }}{% endfor %}";
        let result = load_prompt(template, &json!({"number": 7, "files": ["a.rs", "b.rs"]})).unwrap();
        assert_eq!(result, "Files in #7: a.rs b.rs");
    }

    #[test]
    fn test_load_prompt_rejects_unknown_variable() {
        let mut context = HashMap::new();
        context.insert("number", "7");
        assert!(load_prompt("{{ number }} on {{ base_branch }}", &context).is_err());
    }

    #[test]
    fn test_embedded_templates_render() {
        let templates = PromptTemplates::embedded().unwrap();
        for name in ["planner", "developer", "review-manager", "reviewer", "comment-reactor"] {
            assert!(templates.get(name).is_some(), "missing {}", name);
        }

        let context = json!({
            "language": "English",
            "repository": "octo/demo",
            "base_branch": "main",
            "issue": "# Title:\nFix the bug",
            "instruction": "1. change lib.rs",
            "no_submit": false,
            "review_agents": 2,
            "pull_request_number": 12,
            "changed_files": ["src/lib.rs"],
            "agent_name": "security",
            "review_prompt": "check input validation",
        });
        let developer = templates.render("developer", &context).unwrap();
        assert!(developer.system.contains("call submit_files"));
        assert!(developer.user.contains("1. change lib.rs"));

        let manager = templates.render("review-manager", &context).unwrap();
        assert!(manager.user.contains("- src/lib.rs"));

        let reactor = templates
            .render(
                "comment-reactor",
                &json!({
                    "language": "English",
                    "repository": "demo",
                    "pull_request_number": "12",
                    "working_branch": "agent/issue-1",
                    "no_submit": false,
                    "comment": "rename the helper",
                    "pull_request": "<pr-number>\n12\n</pr-number>",
                }),
            )
            .unwrap();
        assert!(reactor.system.contains("The working branch is agent/issue-1"));
        assert!(reactor.system.contains("call submit_revision"));
        assert!(reactor.user.contains("<comment>\nrename the helper\n</comment>"));
    }

    #[test]
    fn test_custom_file_and_missing_agent() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("prompts.yml");
        fs::write(
            &path,
            "agents:\n  - name: planner\n    system_template: plan in {{ language }}\n    user_template: \"{{ issue }}\"\n",
        )
        .unwrap();

        let templates = PromptTemplates::load(Some(&path)).unwrap();
        let rendered = templates
            .render("planner", &json!({"language": "Japanese", "issue": "bug"}))
            .unwrap();
        assert_eq!(
            rendered,
            RenderedPrompt {
                system: "plan in Japanese".into(),
                user: "bug".into(),
            }
        );

        let err = templates.render("reviewer", &json!({})).unwrap_err();
        assert_eq!(
            err.to_string(),
            "prompt template for agent reviewer is not found"
        );
    }
}
