use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::registry::{ToolRegistry, TypedTool};
use super::FunctionName;
use crate::agent::AgentInvoker;
use crate::errors::{AgentError, AgentResult};
use crate::models::tool::Tool;

const NAME_LENGTH: std::ops::RangeInclusive<usize> = 3..=20;

#[derive(Debug, Deserialize)]
pub struct InvokeAgentInput {
    pub name: String,
    pub system_prompt: String,
    pub first_user_prompt: String,
}

/// Lets a model start another agent and read back its final answer
pub struct InvokeAgent {
    invoker: AgentInvoker,
    tools: ToolRegistry,
}

impl InvokeAgent {
    /// Agents started through this tool work with `tools`
    pub fn new(invoker: AgentInvoker, tools: ToolRegistry) -> Self {
        Self { invoker, tools }
    }

    pub fn tool() -> Tool {
        Tool::object(
            FunctionName::InvokeAgent.as_ref(),
            "Run an AI Agent powered by LLM with your system prompt and first user prompt. \
             AI Agents require relevant context to function properly. While the Git environment is shared, \
             other contextual information must be provided externally through mechanisms such as system prompts \
             and first user prompts. This includes information such as the current branch, Pull Request number \
             and issue number. When completing work, it is essential to output what was accomplished so that \
             other AI agents can understand what was done.",
            json!({
                "name": {
                    "type": "string",
                    "description": "The name of the agent.",
                    "minLength": NAME_LENGTH.start(),
                    "maxLength": NAME_LENGTH.end()
                },
                "system_prompt": {
                    "type": "string",
                    "description": "System prompt is an instruction given to AI systems that define their behavior parameters, \
                                    including role, response style, and functional limitations, set invisibly before conversations begin."
                },
                "first_user_prompt": {
                    "type": "string",
                    "description": "The first user prompt is the initial question or command given to the AI agent."
                }
            }),
            &["name", "system_prompt", "first_user_prompt"],
        )
    }
}

#[async_trait]
impl TypedTool for InvokeAgent {
    type Input = InvokeAgentInput;

    async fn run(&self, input: InvokeAgentInput) -> AgentResult<String> {
        let length = input.name.chars().count();
        if !NAME_LENGTH.contains(&length) {
            return Err(AgentError::InvalidParameters(format!(
                "name must be {} to {} characters, got {}",
                NAME_LENGTH.start(),
                NAME_LENGTH.end(),
                length
            )));
        }

        self.invoker
            .invoke(
                &input.name,
                &input.system_prompt,
                &input.first_user_prompt,
                self.tools.clone(),
            )
            .await
            .map_err(|err| AgentError::ExecutionError(format!("failed to run agent: {:#}", err)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::message::{FinishReason, Message};
    use crate::providers::mock::MockForwarder;
    use crate::tools::registry::{ToolHandler, Typed};
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn stop(text: &str) -> Message {
        Message::assistant()
            .with_text(text)
            .with_finish_reason(FinishReason::Stop)
    }

    #[tokio::test]
    async fn test_sub_agent_answer_is_the_result() {
        let forwarder = Arc::new(MockForwarder::new(vec![stop("renamed the helper")]));
        let invoker = AgentInvoker::new("gpt-4o", 5, forwarder.clone());
        let tool = Typed(InvokeAgent::new(invoker, ToolRegistry::new()));

        let out = tool
            .call(r#"{"name":"renamer","system_prompt":"You rename code.","first_user_prompt":"Rename foo to bar"}"#)
            .await
            .unwrap();
        assert_eq!(out, "renamed the helper");

        let requests = forwarder.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0][0].text, "Rename foo to bar");
    }

    #[tokio::test]
    async fn test_name_length_is_checked_before_running() {
        let forwarder = Arc::new(MockForwarder::new(vec![stop("unused")]));
        let invoker = AgentInvoker::new("gpt-4o", 5, forwarder.clone());
        let tool = Typed(InvokeAgent::new(invoker, ToolRegistry::new()));

        let err = tool
            .call(r#"{"name":"ab","system_prompt":"s","first_user_prompt":"u"}"#)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            AgentError::InvalidParameters("name must be 3 to 20 characters, got 2".into())
        );
        assert!(forwarder.requests().is_empty());
    }

    #[tokio::test]
    async fn test_sub_agent_failure_is_a_tool_error() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let forwarder = Arc::new(MockForwarder::new(vec![stop("unused")]));
        let invoker = AgentInvoker::new("gpt-4o", 5, forwarder).with_cancellation(cancel);
        let tool = Typed(InvokeAgent::new(invoker, ToolRegistry::new()));

        let err = tool
            .call(r#"{"name":"writer","system_prompt":"s","first_user_prompt":"u"}"#)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            AgentError::ExecutionError("failed to run agent: agent work cancelled".into())
        );
    }
}
