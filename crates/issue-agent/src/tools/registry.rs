use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;

use crate::errors::{AgentError, AgentResult};
use crate::models::tool::Tool;

lazy_static! {
    static ref TOOL_NAME: Regex = Regex::new(r"^[a-zA-Z0-9_-]+$").unwrap();
}

/// Something the agent can execute on behalf of the model
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Run the tool with the model's raw argument JSON
    async fn call(&self, arguments: &str) -> AgentResult<String>;
}

/// A tool with a typed argument record.
///
/// Wrap it in [`Typed`] to register it: the wrapper decodes the argument JSON first and only
/// calls [`TypedTool::run`] when decoding succeeded.
#[async_trait]
pub trait TypedTool: Send + Sync {
    type Input: DeserializeOwned + Send;

    async fn run(&self, input: Self::Input) -> AgentResult<String>;
}

pub struct Typed<T>(pub T);

#[async_trait]
impl<T: TypedTool> ToolHandler for Typed<T> {
    async fn call(&self, arguments: &str) -> AgentResult<String> {
        let input = decode_arguments::<T::Input>(arguments)?;
        self.0.run(input).await
    }
}

/// Decode the model's argument text; an empty text is an empty object
pub fn decode_arguments<I: DeserializeOwned>(arguments: &str) -> AgentResult<I> {
    let raw = if arguments.trim().is_empty() {
        "{}"
    } else {
        arguments
    };
    serde_json::from_str(raw).map_err(|e| {
        AgentError::InvalidParameters(format!("failed to unmarshal args: {}", e))
    })
}

#[derive(Clone)]
pub struct RegisteredTool {
    pub tool: Tool,
    handler: Arc<dyn ToolHandler>,
}

impl RegisteredTool {
    pub async fn call(&self, arguments: &str) -> AgentResult<String> {
        self.handler.call(arguments).await
    }
}

/// Run-scoped catalog of the tools one agent may use
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Tool, handler: Arc<dyn ToolHandler>) -> AgentResult<()> {
        if !TOOL_NAME.is_match(&tool.name) {
            return Err(AgentError::Internal(format!(
                "The tool name '{}' has invalid characters, it must match [a-zA-Z0-9_-]+",
                tool.name
            )));
        }
        if self.index.contains_key(&tool.name) {
            return Err(AgentError::Internal(format!(
                "Duplicate tool name: {}",
                tool.name
            )));
        }

        self.index.insert(tool.name.clone(), self.tools.len());
        self.tools.push(RegisteredTool { tool, handler });
        Ok(())
    }

    pub fn by_name(&self, name: &str) -> Option<&RegisteredTool> {
        self.index.get(name).map(|&i| &self.tools[i])
    }

    /// Look the tool up and run it
    pub async fn dispatch(&self, name: &str, arguments: &str) -> AgentResult<String> {
        let registered = self
            .by_name(name)
            .ok_or_else(|| AgentError::ToolNotFound(name.to_string()))?;
        registered.call(arguments).await
    }

    /// Schemas in registration order
    pub fn tools(&self) -> Vec<Tool> {
        self.tools.iter().map(|t| t.tool.clone()).collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.tool.name.as_str()).collect()
    }

    /// A registry holding only the named tools that are present here
    pub fn subset(&self, names: &[&str]) -> ToolRegistry {
        let mut subset = ToolRegistry::new();
        for registered in &self.tools {
            if names.contains(&registered.tool.name.as_str()) {
                subset
                    .index
                    .insert(registered.tool.name.clone(), subset.tools.len());
                subset.tools.push(registered.clone());
            }
        }
        subset
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
