use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::ProviderError;
use crate::models::message::{truncate_lines, FinishReason, Message, ToolCall};
use crate::models::step::{ReturnContext, Step};
use crate::models::tool::Tool;
use crate::tools::registry::ToolRegistry;

/// Everything a forwarder needs to start a conversation
#[derive(Debug, Clone)]
pub struct ForwardInput {
    pub model: String,
    pub system_prompt: String,
    pub user_prompt: String,
    pub tools: Vec<Tool>,
}

/// Base trait for LLM vendors (OpenAI, Anthropic, Bedrock).
///
/// A forwarder only has to translate one request: [`Forwarder::complete`] sends the whole
/// history in the vendor's wire shape and decodes the reply. Starting a conversation, feeding
/// tool results back and deriving the next [`Step`] are shared.
#[async_trait]
pub trait Forwarder: Send + Sync {
    /// Send the history and return the decoded assistant message
    async fn complete(
        &self,
        input: &ForwardInput,
        history: &[Message],
        cancel: &CancellationToken,
    ) -> Result<Message, ProviderError>;

    /// Open the conversation with the user prompt
    async fn start_forward(
        &self,
        input: &ForwardInput,
        cancel: &CancellationToken,
    ) -> Result<Vec<Message>, ProviderError> {
        debug!(system = %input.system_prompt, user = %input.user_prompt, "start forward");
        let mut history = vec![Message::user().with_text(&input.user_prompt)];
        let reply = self.complete(input, &history, cancel).await?;
        log_assistant_message(&reply);
        history.push(reply);
        Ok(history)
    }

    /// Append one tool message per result, then ask the model for its next turn
    async fn forward_llm(
        &self,
        input: &ForwardInput,
        returns: &[ReturnContext],
        history: Vec<Message>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Message>, ProviderError> {
        let mut history = history;
        let requested: Vec<ToolCall> = history
            .last()
            .map(|m| m.tool_calls.clone())
            .unwrap_or_default();

        for ret in returns {
            if ret.caller_id.is_empty() {
                history.push(Message::user().with_text(&ret.content));
                continue;
            }
            let call = requested
                .iter()
                .find(|c| c.caller_id == ret.caller_id)
                .cloned()
                .unwrap_or_else(|| ToolCall::new(&ret.caller_id, &ret.tool_name, ""));
            history.push(Message::tool_result(call, &ret.content));
        }

        info!(messages = history.len(), "forwarding tool results to llm");
        let reply = self.complete(input, &history, cancel).await?;
        log_assistant_message(&reply);
        history.push(reply);
        Ok(history)
    }

    /// Derive the next step from the newest message
    fn forward_step(&self, history: &[Message], registry: &ToolRegistry) -> Step {
        step_from_history(history, registry)
    }
}

pub fn step_from_history(history: &[Message], registry: &ToolRegistry) -> Step {
    let Some(last) = history.last() else {
        return Step::Unknown;
    };

    match &last.finish_reason {
        Some(FinishReason::Stop) => Step::waiting_instruction(&last.text),
        Some(FinishReason::ToolCalls) => Step::exec(&last.tool_calls, registry),
        Some(FinishReason::LengthExceeded) => {
            Step::Unrecoverable("chat completion length error".to_string())
        }
        Some(FinishReason::Unknown(raw)) => {
            warn!(finish_reason = %raw, "unmapped finish reason");
            Step::Unknown
        }
        None => Step::Unknown,
    }
}

pub fn log_assistant_message(message: &Message) {
    info!(
        finish_reason = ?message.finish_reason,
        tool_calls = message.tool_calls.len(),
        input_tokens = message.usage.total_input(),
        output_tokens = message.usage.total_output(),
        "received message"
    );
    if !message.text.is_empty() {
        debug!("{}", truncate_lines(&message.text, 3, 2, "..."));
    }
    for call in &message.tool_calls {
        debug!(tool = %call.tool_name, id = %call.caller_id, "tool call requested");
    }
}
