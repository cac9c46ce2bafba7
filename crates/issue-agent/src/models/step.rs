use serde::{Deserialize, Serialize};

use super::message::ToolCall;
use crate::tools::registry::ToolRegistry;

/// A tool call resolved against the registry, ready to be executed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionContext {
    pub caller_id: String,
    pub tool_name: String,
    pub arguments: String,
}

/// The outcome of one tool call, to be sent back to the model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnContext {
    pub caller_id: String,
    pub tool_name: String,
    pub content: String,
}

impl From<&FunctionContext> for ToolCall {
    fn from(ctx: &FunctionContext) -> Self {
        ToolCall::new(&ctx.caller_id, &ctx.tool_name, &ctx.arguments)
    }
}

/// What the agent loop must do next
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Execute these tool calls in order; never empty
    Exec(Vec<FunctionContext>),
    /// Send these tool results back to the model
    ReturnToLlm(Vec<ReturnContext>),
    /// The model produced its final answer
    WaitingInstruction(String),
    Unrecoverable(String),
    Unknown,
}

impl Step {
    /// Resolve the model's tool calls against the registry.
    ///
    /// Yields `Unrecoverable` when there is nothing to run or a name is not registered.
    pub fn exec(calls: &[ToolCall], registry: &ToolRegistry) -> Step {
        if calls.is_empty() {
            return Step::Unrecoverable("finish reason is tool calls but no tool was called".into());
        }

        let mut contexts = Vec::with_capacity(calls.len());
        for call in calls {
            if registry.by_name(&call.tool_name).is_none() {
                return Step::Unrecoverable(format!("function not found {}", call.tool_name));
            }
            contexts.push(FunctionContext {
                caller_id: call.caller_id.clone(),
                tool_name: call.tool_name.clone(),
                arguments: call.arguments.clone(),
            });
        }
        Step::Exec(contexts)
    }

    pub fn return_to_llm(contexts: Vec<ReturnContext>) -> Step {
        Step::ReturnToLlm(contexts)
    }

    pub fn waiting_instruction<S: Into<String>>(content: S) -> Step {
        Step::WaitingInstruction(content.into())
    }

    pub fn name(&self) -> &'static str {
        match self {
            Step::Exec(_) => "exec",
            Step::ReturnToLlm(_) => "return_to_llm",
            Step::WaitingInstruction(_) => "waiting_instruction",
            Step::Unrecoverable(_) => "unrecoverable",
            Step::Unknown => "unknown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AgentResult;
    use crate::models::tool::Tool;
    use crate::tools::registry::ToolHandler;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Arc;

    struct Noop;

    #[async_trait]
    impl ToolHandler for Noop {
        async fn call(&self, _arguments: &str) -> AgentResult<String> {
            Ok(String::new())
        }
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        for name in ["open_file", "list_files"] {
            registry
                .register(Tool::object(name, name, json!({}), &[]), Arc::new(Noop))
                .unwrap();
        }
        registry
    }

    #[test]
    fn test_exec_preserves_order_and_count() {
        let calls = vec![
            ToolCall::new("1", "open_file", "{}"),
            ToolCall::new("2", "list_files", "{}"),
            ToolCall::new("3", "open_file", r#"{"path":"b"}"#),
        ];

        match Step::exec(&calls, &registry()) {
            Step::Exec(contexts) => {
                assert_eq!(contexts.len(), 3);
                let ids: Vec<_> = contexts.iter().map(|c| c.caller_id.as_str()).collect();
                assert_eq!(ids, vec!["1", "2", "3"]);
                assert_eq!(contexts[2].arguments, r#"{"path":"b"}"#);
            }
            other => panic!("expected exec, got {:?}", other),
        }
    }

    #[test]
    fn test_exec_unknown_tool_is_unrecoverable() {
        let calls = vec![
            ToolCall::new("1", "open_file", "{}"),
            ToolCall::new("2", "rm_rf", "{}"),
        ];
        assert_eq!(
            Step::exec(&calls, &registry()),
            Step::Unrecoverable("function not found rm_rf".into())
        );
    }

    #[test]
    fn test_exec_without_calls_is_unrecoverable() {
        assert!(matches!(
            Step::exec(&[], &registry()),
            Step::Unrecoverable(_)
        ));
    }

    #[test]
    fn test_return_to_llm_keeps_contexts() {
        let contexts = vec![
            ReturnContext {
                caller_id: "1".into(),
                tool_name: "open_file".into(),
                content: "a".into(),
            },
            ReturnContext {
                caller_id: "2".into(),
                tool_name: "list_files".into(),
                content: "b".into(),
            },
        ];
        assert_eq!(
            Step::return_to_llm(contexts.clone()),
            Step::ReturnToLlm(contexts)
        );
    }
}
