use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::base::{ForwardInput, Forwarder};
use super::configs::AnthropicProviderConfig;
use super::retry::RetryPolicy;
use super::utils::{
    arguments_to_document, claude_max_output_tokens, document_to_arguments, get_u64, send_json,
};
use crate::errors::ProviderError;
use crate::models::message::{FinishReason, Message, Role, ToolCall, Usage, VendorNative};
use crate::models::tool::Tool;

pub const ANTHROPIC_API_VERSION: &str = "2023-06-01";

pub struct AnthropicForwarder {
    client: Client,
    config: AnthropicProviderConfig,
    retry: RetryPolicy,
}

impl AnthropicForwarder {
    pub fn new(config: AnthropicProviderConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600)) // 10 minutes timeout
            .build()?;

        Ok(Self {
            client,
            config,
            retry: RetryPolicy::none(),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn post(&self, payload: &Value, cancel: &CancellationToken) -> Result<Value, ProviderError> {
        let url = format!("{}/v1/messages", self.config.host.trim_end_matches('/'));

        self.retry
            .run(cancel, || {
                let request = self
                    .client
                    .post(&url)
                    .header("x-api-key", &self.config.api_key)
                    .header("anthropic-version", ANTHROPIC_API_VERSION)
                    .json(payload);
                send_json(request, cancel)
            })
            .await
            .map_err(|err| match err {
                ProviderError::RequestFailed { body, .. } if body.contains("prompt is too long") => {
                    ProviderError::ContextLengthExceeded(body)
                }
                other => other,
            })
    }
}

fn ephemeral() -> Value {
    json!({"type": "ephemeral"})
}

pub fn tools_to_anthropic_spec(tools: &[Tool]) -> Vec<Value> {
    tools
        .iter()
        .map(|tool| {
            json!({
                "name": tool.name,
                "description": tool.description,
                "input_schema": tool.parameters,
            })
        })
        .collect()
}

pub fn system_to_anthropic_spec(system: &str) -> Vec<Value> {
    if system.is_empty() {
        return Vec::new();
    }
    vec![json!({
        "type": "text",
        "text": system,
        "cache_control": ephemeral(),
    })]
}

fn assistant_blocks(message: &Message) -> Result<Vec<Value>, ProviderError> {
    if let Some(VendorNative::Anthropic(blocks)) = &message.native {
        return Ok(blocks.clone());
    }

    let mut blocks = Vec::new();
    if !message.text.is_empty() {
        blocks.push(json!({"type": "text", "text": message.text}));
    }
    for call in &message.tool_calls {
        blocks.push(json!({
            "type": "tool_use",
            "id": call.caller_id,
            "name": call.tool_name,
            "input": arguments_to_document(&call.arguments)?,
        }));
    }
    Ok(blocks)
}

fn tool_result_block(message: &Message) -> Value {
    let id = message
        .responding_tool_call
        .as_ref()
        .map(|c| c.caller_id.as_str())
        .unwrap_or_default();
    let mut block = json!({"type": "tool_result", "tool_use_id": id});
    if !message.text.is_empty() {
        block["content"] = json!(message.text);
    }
    block
}

/// Convert the history to the messages API shape.
///
/// Consecutive tool results travel together in one user message. The first user block and
/// the final block of the conversation are marked for prompt caching.
pub fn messages_to_anthropic_spec(messages: &[Message]) -> Result<Vec<Value>, ProviderError> {
    let mut spec: Vec<Value> = Vec::new();
    let mut pending_results: Vec<Value> = Vec::new();

    let flush = |spec: &mut Vec<Value>, pending: &mut Vec<Value>| {
        if !pending.is_empty() {
            spec.push(json!({"role": "user", "content": std::mem::take(pending)}));
        }
    };

    for message in messages {
        match message.role {
            Role::Tool if message.responding_tool_call.is_some() => {
                pending_results.push(tool_result_block(message));
            }
            Role::Assistant => {
                flush(&mut spec, &mut pending_results);
                spec.push(json!({"role": "assistant", "content": assistant_blocks(message)?}));
            }
            // System text never travels in the message list; everything else is user text
            Role::System => continue,
            Role::User | Role::Tool => {
                flush(&mut spec, &mut pending_results);
                spec.push(json!({
                    "role": "user",
                    "content": [{"type": "text", "text": message.text}],
                }));
            }
        }
    }
    flush(&mut spec, &mut pending_results);

    if let Some(first_user) = spec.iter_mut().find(|m| m["role"] == "user") {
        if let Some(block) = first_user["content"].get_mut(0) {
            block["cache_control"] = ephemeral();
        }
    }
    if let Some(last) = spec.last_mut() {
        if let Some(block) = last["content"].as_array_mut().and_then(|b| b.last_mut()) {
            block["cache_control"] = ephemeral();
        }
    }

    Ok(spec)
}

fn blocks_to_assistant(blocks: &[Value]) -> Message {
    let mut message = Message::assistant();
    let mut text = String::new();
    for block in blocks {
        match block.get("type").and_then(Value::as_str) {
            Some("text") => text.push_str(block["text"].as_str().unwrap_or_default()),
            Some("tool_use") => {
                message = message.with_tool_call(ToolCall::new(
                    block["id"].as_str().unwrap_or_default(),
                    block["name"].as_str().unwrap_or_default(),
                    document_to_arguments(&block["input"]),
                ));
            }
            _ => {}
        }
    }
    message
        .with_text(text)
        .with_native(VendorNative::Anthropic(blocks.to_vec()))
}

/// Convert messages API messages back to the internal history
pub fn anthropic_spec_to_messages(spec: &[Value]) -> Result<Vec<Message>, ProviderError> {
    let mut calls: HashMap<String, ToolCall> = HashMap::new();
    let mut messages = Vec::new();

    for value in spec {
        let blocks = value
            .get("content")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        match value.get("role").and_then(Value::as_str) {
            Some("assistant") => {
                let message = blocks_to_assistant(&blocks);
                for call in &message.tool_calls {
                    calls.insert(call.caller_id.clone(), call.clone());
                }
                messages.push(message);
            }
            Some("user") => {
                let mut text = String::new();
                for block in &blocks {
                    match block.get("type").and_then(Value::as_str) {
                        Some("tool_result") => {
                            let id = block["tool_use_id"].as_str().unwrap_or_default();
                            let call = calls
                                .get(id)
                                .cloned()
                                .unwrap_or_else(|| ToolCall::new(id, "", ""));
                            let content = block["content"].as_str().unwrap_or_default();
                            messages.push(Message::tool_result(call, content));
                        }
                        Some("text") => text.push_str(block["text"].as_str().unwrap_or_default()),
                        _ => {}
                    }
                }
                if !text.is_empty() {
                    messages.push(Message::user().with_text(text));
                }
            }
            other => {
                return Err(ProviderError::InvalidResponse(format!(
                    "unexpected message role {:?}",
                    other
                )))
            }
        }
    }
    Ok(messages)
}

pub fn anthropic_stop_reason(reason: &str) -> FinishReason {
    match reason {
        "end_turn" | "stop_sequence" => FinishReason::Stop,
        "tool_use" => FinishReason::ToolCalls,
        "max_tokens" => FinishReason::LengthExceeded,
        other => FinishReason::Unknown(other.to_string()),
    }
}

fn get_usage(data: &Value) -> Usage {
    let usage = &data["usage"];
    Usage::new(
        get_u64(usage, "input_tokens"),
        get_u64(usage, "output_tokens"),
    )
    .with_cache(
        get_u64(usage, "cache_creation_input_tokens"),
        get_u64(usage, "cache_read_input_tokens"),
    )
}

pub fn anthropic_response_to_message(response: &Value) -> Result<Message, ProviderError> {
    let blocks = response
        .get("content")
        .and_then(Value::as_array)
        .ok_or_else(|| ProviderError::InvalidResponse("response has no content".into()))?;
    let reason = response
        .get("stop_reason")
        .and_then(Value::as_str)
        .unwrap_or_default();

    Ok(blocks_to_assistant(blocks)
        .with_finish_reason(anthropic_stop_reason(reason))
        .with_usage(get_usage(response)))
}

#[async_trait]
impl Forwarder for AnthropicForwarder {
    async fn complete(
        &self,
        input: &ForwardInput,
        history: &[Message],
        cancel: &CancellationToken,
    ) -> Result<Message, ProviderError> {
        let mut payload = json!({
            "model": input.model,
            "max_tokens": claude_max_output_tokens(&input.model),
            "temperature": 0,
            "system": system_to_anthropic_spec(&input.system_prompt),
            "messages": messages_to_anthropic_spec(history)?,
        });
        if !input.tools.is_empty() {
            payload["tools"] = json!(tools_to_anthropic_spec(&input.tools));
            payload["tool_choice"] = json!({"type": "auto", "disable_parallel_tool_use": true});
        }

        let response = self.post(&payload, cancel).await?;
        anthropic_response_to_message(&response)
    }
}
