use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::base::{ForwardInput, Forwarder};
use super::configs::BedrockProviderConfig;
use super::retry::RetryPolicy;
use super::utils::{
    arguments_to_document, claude_max_output_tokens, document_to_arguments, get_u64, send_json,
};
use crate::errors::ProviderError;
use crate::models::message::{FinishReason, Message, Role, ToolCall, Usage, VendorNative};
use crate::models::tool::Tool;

/// Bedrock throttles per account and region; waiting out the window is the only remedy
pub const RATE_LIMIT_COOLDOWN: Duration = Duration::from_secs(60);
pub const RATE_LIMIT_ATTEMPTS: u32 = 3;

const INVALID_MODEL_MARKER: &str = "provided model identifier is invalid";

pub struct BedrockForwarder {
    client: Client,
    config: BedrockProviderConfig,
    retry: RetryPolicy,
}

impl BedrockForwarder {
    pub fn new(config: BedrockProviderConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600)) // 10 minutes timeout
            .build()?;

        Ok(Self {
            client,
            config,
            retry: RetryPolicy::rate_limit_cooldown(RATE_LIMIT_COOLDOWN, RATE_LIMIT_ATTEMPTS),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn converse_url(&self, model: &str) -> String {
        format!(
            "{}/model/{}/converse",
            self.config.endpoint.trim_end_matches('/'),
            urlencoding::encode(model)
        )
    }

    async fn post(
        &self,
        model: &str,
        payload: &Value,
        cancel: &CancellationToken,
    ) -> Result<Value, ProviderError> {
        let url = self.converse_url(model);

        self.retry
            .run(cancel, || {
                let request = self
                    .client
                    .post(&url)
                    .bearer_auth(&self.config.api_key)
                    .json(payload);
                send_json(request, cancel)
            })
            .await
            .map_err(|err| match err {
                ProviderError::RequestFailed { status, body } if body.contains(INVALID_MODEL_MARKER) => {
                    ProviderError::RequestFailed {
                        status,
                        body: format!(
                            "{}\ncheck whether the model {} is enabled in the AWS region {}",
                            body, model, self.config.region
                        ),
                    }
                }
                ProviderError::RequestFailed { body, .. } if body.contains("Input is too long") => {
                    ProviderError::ContextLengthExceeded(body)
                }
                other => other,
            })
    }
}

pub fn tools_to_bedrock_spec(tools: &[Tool]) -> Value {
    let specs: Vec<Value> = tools
        .iter()
        .map(|tool| {
            json!({
                "toolSpec": {
                    "name": tool.name,
                    "description": tool.description,
                    "inputSchema": {"json": tool.parameters},
                }
            })
        })
        .collect();
    json!({"tools": specs})
}

fn assistant_to_bedrock_spec(message: &Message) -> Result<Value, ProviderError> {
    if let Some(VendorNative::Bedrock(raw)) = &message.native {
        return Ok(raw.clone());
    }

    let mut content = Vec::new();
    if !message.text.is_empty() {
        content.push(json!({"text": message.text}));
    }
    for call in &message.tool_calls {
        content.push(json!({
            "toolUse": {
                "toolUseId": call.caller_id,
                "name": call.tool_name,
                "input": arguments_to_document(&call.arguments)?,
            }
        }));
    }
    Ok(json!({"role": "assistant", "content": content}))
}

fn tool_result_block(message: &Message) -> Value {
    let id = message
        .responding_tool_call
        .as_ref()
        .map(|c| c.caller_id.as_str())
        .unwrap_or_default();
    let mut result = json!({"toolUseId": id});
    if !message.text.is_empty() {
        result["content"] = json!([{"text": message.text}]);
    }
    json!({"toolResult": result})
}

/// Convert the history to converse messages; consecutive tool results share one user message
pub fn messages_to_bedrock_spec(messages: &[Message]) -> Result<Vec<Value>, ProviderError> {
    let mut spec: Vec<Value> = Vec::new();
    let mut pending: Vec<Value> = Vec::new();

    for message in messages {
        if message.role == Role::Tool && message.responding_tool_call.is_some() {
            pending.push(tool_result_block(message));
            continue;
        }
        if !pending.is_empty() {
            spec.push(json!({"role": "user", "content": std::mem::take(&mut pending)}));
        }
        match message.role {
            Role::Assistant => spec.push(assistant_to_bedrock_spec(message)?),
            Role::System => continue,
            Role::User | Role::Tool => spec.push(json!({
                "role": "user",
                "content": [{"text": message.text}],
            })),
        }
    }
    if !pending.is_empty() {
        spec.push(json!({"role": "user", "content": pending}));
    }
    Ok(spec)
}

fn bedrock_message_to_assistant(raw: &Value) -> Message {
    let mut message = Message::assistant();
    let mut text = String::new();
    for block in raw["content"].as_array().into_iter().flatten() {
        if let Some(t) = block.get("text").and_then(Value::as_str) {
            text.push_str(t);
        } else if let Some(tool_use) = block.get("toolUse") {
            message = message.with_tool_call(ToolCall::new(
                tool_use["toolUseId"].as_str().unwrap_or_default(),
                tool_use["name"].as_str().unwrap_or_default(),
                document_to_arguments(&tool_use["input"]),
            ));
        }
    }
    message
        .with_text(text)
        .with_native(VendorNative::Bedrock(raw.clone()))
}

/// Convert converse messages back to the internal history
pub fn bedrock_spec_to_messages(spec: &[Value]) -> Result<Vec<Message>, ProviderError> {
    let mut calls: HashMap<String, ToolCall> = HashMap::new();
    let mut messages = Vec::new();

    for value in spec {
        match value.get("role").and_then(Value::as_str) {
            Some("assistant") => {
                let message = bedrock_message_to_assistant(value);
                for call in &message.tool_calls {
                    calls.insert(call.caller_id.clone(), call.clone());
                }
                messages.push(message);
            }
            Some("user") => {
                let mut text = String::new();
                for block in value["content"].as_array().into_iter().flatten() {
                    if let Some(result) = block.get("toolResult") {
                        let id = result["toolUseId"].as_str().unwrap_or_default();
                        let call = calls
                            .get(id)
                            .cloned()
                            .unwrap_or_else(|| ToolCall::new(id, "", ""));
                        let content: String = result["content"]
                            .as_array()
                            .into_iter()
                            .flatten()
                            .filter_map(|c| c.get("text").and_then(Value::as_str))
                            .collect();
                        messages.push(Message::tool_result(call, content));
                    } else if let Some(t) = block.get("text").and_then(Value::as_str) {
                        text.push_str(t);
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

pub fn bedrock_stop_reason(reason: &str) -> FinishReason {
    match reason {
        "end_turn" | "stop_sequence" => FinishReason::Stop,
        "tool_use" => FinishReason::ToolCalls,
        "max_tokens" | "model_context_window_exceeded" => FinishReason::LengthExceeded,
        other => FinishReason::Unknown(other.to_string()),
    }
}

fn get_usage(data: &Value) -> Usage {
    let usage = &data["usage"];
    Usage::new(get_u64(usage, "inputTokens"), get_u64(usage, "outputTokens")).with_cache(
        get_u64(usage, "cacheWriteInputTokens"),
        get_u64(usage, "cacheReadInputTokens"),
    )
}

pub fn bedrock_response_to_message(response: &Value) -> Result<Message, ProviderError> {
    let raw = response
        .get("output")
        .and_then(|o| o.get("message"))
        .ok_or_else(|| ProviderError::InvalidResponse("response has no output message".into()))?;
    let reason = response
        .get("stopReason")
        .and_then(Value::as_str)
        .unwrap_or_default();

    Ok(bedrock_message_to_assistant(raw)
        .with_finish_reason(bedrock_stop_reason(reason))
        .with_usage(get_usage(response)))
}

#[async_trait]
impl Forwarder for BedrockForwarder {
    async fn complete(
        &self,
        input: &ForwardInput,
        history: &[Message],
        cancel: &CancellationToken,
    ) -> Result<Message, ProviderError> {
        let mut payload = json!({
            "messages": messages_to_bedrock_spec(history)?,
            "inferenceConfig": {
                "maxTokens": claude_max_output_tokens(&input.model),
                "temperature": 0,
            },
        });
        if !input.system_prompt.is_empty() {
            payload["system"] = json!([{"text": input.system_prompt}]);
        }
        if !input.tools.is_empty() {
            payload["toolConfig"] = tools_to_bedrock_spec(&input.tools);
        }

        let response = self.post(&input.model, &payload, cancel).await?;
        bedrock_response_to_message(&response)
    }
}
