use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::base::{ForwardInput, Forwarder};
use super::configs::OpenAiProviderConfig;
use super::retry::RetryPolicy;
use super::utils::{check_openai_context_length_error, get_u64, send_json};
use crate::errors::ProviderError;
use crate::models::message::{FinishReason, Message, Role, ToolCall, Usage, VendorNative};
use crate::models::tool::Tool;

pub struct OpenAiForwarder {
    client: Client,
    config: OpenAiProviderConfig,
    retry: RetryPolicy,
}

impl OpenAiForwarder {
    pub fn new(config: OpenAiProviderConfig) -> Result<Self, ProviderError> {
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
        let url = format!(
            "{}/v1/chat/completions",
            self.config.host.trim_end_matches('/')
        );

        self.retry
            .run(cancel, || {
                let request = self
                    .client
                    .post(&url)
                    .header("Authorization", format!("Bearer {}", self.config.api_key))
                    .json(payload);
                send_json(request, cancel)
            })
            .await
            .map_err(|err| match err {
                ProviderError::RequestFailed { body, .. } if is_context_length_body(&body) => {
                    ProviderError::ContextLengthExceeded(body)
                }
                other => other,
            })
    }
}

fn is_context_length_body(body: &str) -> bool {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(check_openai_context_length_error))
        .is_some()
}

/// Convert tools to OpenAI's function calling specification
pub fn tools_to_openai_spec(tools: &[Tool]) -> Vec<Value> {
    tools
        .iter()
        .map(|tool| {
            json!({
                "type": "function",
                "function": {
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": tool.parameters,
                }
            })
        })
        .collect()
}

fn assistant_to_openai_spec(message: &Message) -> Value {
    if let Some(VendorNative::OpenAi(raw)) = &message.native {
        return raw.clone();
    }

    let mut converted = json!({
        "role": "assistant",
        "content": if message.text.is_empty() { Value::Null } else { json!(message.text) },
    });
    if message.has_tool_calls() {
        let calls: Vec<Value> = message
            .tool_calls
            .iter()
            .map(|call| {
                json!({
                    "id": call.caller_id,
                    "type": "function",
                    "function": {"name": call.tool_name, "arguments": call.arguments},
                })
            })
            .collect();
        converted["tool_calls"] = json!(calls);
    }
    converted
}

/// Convert the history to chat completion messages, prefixed by the system prompt
pub fn messages_to_openai_spec(system: &str, messages: &[Message]) -> Vec<Value> {
    let mut spec = Vec::with_capacity(messages.len() + 1);
    if !system.is_empty() {
        spec.push(json!({"role": "system", "content": system}));
    }

    for message in messages {
        let converted = match message.role {
            Role::System => json!({"role": "system", "content": message.text}),
            Role::User => json!({"role": "user", "content": message.text}),
            Role::Assistant => assistant_to_openai_spec(message),
            Role::Tool => match &message.responding_tool_call {
                Some(call) => json!({
                    "role": "tool",
                    "tool_call_id": call.caller_id,
                    "content": message.text,
                }),
                None => json!({"role": "user", "content": message.text}),
            },
        };
        spec.push(converted);
    }
    spec
}

fn openai_message_to_assistant(raw: &Value) -> Message {
    let mut message = Message::assistant()
        .with_text(raw.get("content").and_then(Value::as_str).unwrap_or_default())
        .with_native(VendorNative::OpenAi(raw.clone()));

    if let Some(calls) = raw.get("tool_calls").and_then(Value::as_array) {
        for call in calls {
            message = message.with_tool_call(ToolCall::new(
                call["id"].as_str().unwrap_or_default(),
                call["function"]["name"].as_str().unwrap_or_default(),
                call["function"]["arguments"].as_str().unwrap_or_default(),
            ));
        }
    }
    message
}

/// Convert chat completion messages back to the internal history.
///
/// System messages are skipped; tool messages are matched with the call they answer.
pub fn openai_spec_to_messages(spec: &[Value]) -> Result<Vec<Message>, ProviderError> {
    let mut calls: HashMap<String, ToolCall> = HashMap::new();
    let mut messages = Vec::new();

    for value in spec {
        let text = value.get("content").and_then(Value::as_str).unwrap_or_default();
        match value.get("role").and_then(Value::as_str) {
            Some("system") => continue,
            Some("user") => messages.push(Message::user().with_text(text)),
            Some("assistant") => {
                let message = openai_message_to_assistant(value);
                for call in &message.tool_calls {
                    calls.insert(call.caller_id.clone(), call.clone());
                }
                messages.push(message);
            }
            Some("tool") => {
                let id = value["tool_call_id"].as_str().unwrap_or_default();
                let call = calls
                    .get(id)
                    .cloned()
                    .unwrap_or_else(|| ToolCall::new(id, "", ""));
                messages.push(Message::tool_result(call, text));
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

pub fn openai_finish_reason(reason: &str) -> FinishReason {
    match reason {
        "stop" => FinishReason::Stop,
        "tool_calls" => FinishReason::ToolCalls,
        "length" => FinishReason::LengthExceeded,
        other => FinishReason::Unknown(other.to_string()),
    }
}

fn get_usage(data: &Value) -> Usage {
    let usage = &data["usage"];
    let cached = usage
        .get("prompt_tokens_details")
        .map(|d| get_u64(d, "cached_tokens"))
        .unwrap_or(0);
    let prompt = get_u64(usage, "prompt_tokens");
    // prompt_tokens already includes the cached part
    Usage::new(prompt.saturating_sub(cached), get_u64(usage, "completion_tokens"))
        .with_cache(0, cached)
}

/// Convert a chat completion response to an assistant message
pub fn openai_response_to_message(response: &Value) -> Result<Message, ProviderError> {
    if let Some(error) = response.get("error") {
        if let Some(err) = check_openai_context_length_error(error) {
            return Err(err);
        }
        return Err(ProviderError::InvalidResponse(format!(
            "OpenAI API error: {}",
            error
        )));
    }

    let choice = response
        .get("choices")
        .and_then(|c| c.get(0))
        .ok_or_else(|| ProviderError::InvalidResponse("response has no choices".into()))?;

    let reason = choice
        .get("finish_reason")
        .and_then(Value::as_str)
        .unwrap_or_default();

    Ok(openai_message_to_assistant(&choice["message"])
        .with_finish_reason(openai_finish_reason(reason))
        .with_usage(get_usage(response)))
}

#[async_trait]
impl Forwarder for OpenAiForwarder {
    async fn complete(
        &self,
        input: &ForwardInput,
        history: &[Message],
        cancel: &CancellationToken,
    ) -> Result<Message, ProviderError> {
        let mut payload = json!({
            "model": input.model,
            "messages": messages_to_openai_spec(&input.system_prompt, history),
            "temperature": 0,
        });
        if !input.tools.is_empty() {
            payload["tools"] = json!(tools_to_openai_spec(&input.tools));
        }

        let response = self.post(&payload, cancel).await?;
        openai_response_to_message(&response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn setup_mock_server(response_body: Value) -> (MockServer, OpenAiForwarder) {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("Authorization", "Bearer test_api_key"))
            .and(body_partial_json(json!({"temperature": 0})))
            .respond_with(ResponseTemplate::new(200).set_body_json(response_body))
            .mount(&mock_server)
            .await;

        let config = OpenAiProviderConfig {
            host: mock_server.uri(),
            api_key: "test_api_key".to_string(),
        };

        let forwarder = OpenAiForwarder::new(config).unwrap();
        (mock_server, forwarder)
    }

    fn input() -> ForwardInput {
        ForwardInput {
            model: "gpt-4o".into(),
            system_prompt: "You are a developer.".into(),
            user_prompt: "Fix the issue".into(),
            tools: vec![Tool::object(
                "open_file",
                "Open the file full content",
                json!({"path": {"type": "string"}}),
                &["path"],
            )],
        }
    }

    #[tokio::test]
    async fn test_start_forward_with_tool_calls() {
        let response_body = json!({
            "id": "chatcmpl-1",
            "choices": [{
                "index": 0,
                "finish_reason": "tool_calls",
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "open_file", "arguments": "{\"path\":\"README.md\"}"}
                    }]
                }
            }],
            "usage": {
                "prompt_tokens": 120,
                "completion_tokens": 15,
                "total_tokens": 135,
                "prompt_tokens_details": {"cached_tokens": 100}
            }
        });
        let (_server, forwarder) = setup_mock_server(response_body).await;

        let history = forwarder
            .start_forward(&input(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[0].text, "Fix the issue");

        let reply = &history[1];
        assert_eq!(reply.finish_reason, Some(FinishReason::ToolCalls));
        assert_eq!(
            reply.tool_calls,
            vec![ToolCall::new("call_1", "open_file", r#"{"path":"README.md"}"#)]
        );
        assert_eq!(reply.usage.input_tokens, 20);
        assert_eq!(reply.usage.cache_read_tokens, 100);
        assert_eq!(reply.usage.total_input(), 120);
        assert!(matches!(reply.native, Some(VendorNative::OpenAi(_))));
    }

    #[tokio::test]
    async fn test_context_length_error_body() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": {"code": "context_length_exceeded", "message": "too many tokens"}
            })))
            .mount(&mock_server)
            .await;
        let forwarder = OpenAiForwarder::new(OpenAiProviderConfig {
            host: mock_server.uri(),
            api_key: "k".into(),
        })
        .unwrap();

        let err = forwarder
            .start_forward(&input(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::ContextLengthExceeded(_)));
    }

    #[test]
    fn test_history_round_trip() {
        let call = ToolCall::new("call_1", "open_file", r#"{"path":"a.txt"}"#);
        let history = vec![
            Message::user().with_text("Fix the issue"),
            Message::assistant()
                .with_text("Looking")
                .with_tool_call(call.clone())
                .with_finish_reason(FinishReason::ToolCalls),
            Message::tool_result(call.clone(), "file body"),
            Message::assistant()
                .with_text("Done")
                .with_finish_reason(FinishReason::Stop),
        ];

        let spec = messages_to_openai_spec("system prompt", &history);
        assert_eq!(spec.len(), 5);
        assert_eq!(spec[0]["role"], "system");
        assert_eq!(spec[3]["role"], "tool");
        assert_eq!(spec[3]["tool_call_id"], "call_1");

        let back = openai_spec_to_messages(&spec).unwrap();
        assert_eq!(back.len(), history.len());
        for (original, decoded) in history.iter().zip(&back) {
            assert_eq!(original.role, decoded.role);
            assert_eq!(original.text, decoded.text);
            assert_eq!(original.tool_calls, decoded.tool_calls);
            assert_eq!(original.responding_tool_call, decoded.responding_tool_call);
        }
    }

    #[test]
    fn test_native_payload_is_replayed() {
        let raw = json!({"role": "assistant", "content": "hi", "refusal": null});
        let message = Message::assistant()
            .with_text("hi")
            .with_native(VendorNative::OpenAi(raw.clone()));
        assert_eq!(messages_to_openai_spec("", &[message]), vec![raw]);
    }

    #[test]
    fn test_finish_reason_mapping() {
        assert_eq!(openai_finish_reason("stop"), FinishReason::Stop);
        assert_eq!(openai_finish_reason("tool_calls"), FinishReason::ToolCalls);
        assert_eq!(openai_finish_reason("length"), FinishReason::LengthExceeded);
        assert_eq!(
            openai_finish_reason("content_filter"),
            FinishReason::Unknown("content_filter".into())
        );
    }
}
