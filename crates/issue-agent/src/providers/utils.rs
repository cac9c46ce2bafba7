use reqwest::{RequestBuilder, StatusCode};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::errors::ProviderError;

/// Output token budgets of the Claude families, matched by model-name substring
const CLAUDE_MAX_OUTPUT_TOKENS: &[(&str, u32)] = &[
    ("claude-3-7-sonnet", 64000),
    ("claude-sonnet-4", 64000),
    ("claude-opus-4", 32000),
];

pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 8192;

pub fn claude_max_output_tokens(model: &str) -> u32 {
    CLAUDE_MAX_OUTPUT_TOKENS
        .iter()
        .find(|(family, _)| model.contains(family))
        .map(|(_, tokens)| *tokens)
        .unwrap_or(DEFAULT_MAX_OUTPUT_TOKENS)
}

/// Send a JSON request and classify the response by status code.
///
/// Cancellation while waiting on the network surfaces as [`ProviderError::Cancelled`].
pub async fn send_json(
    request: RequestBuilder,
    cancel: &CancellationToken,
) -> Result<Value, ProviderError> {
    let response = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
        response = request.send() => response?,
    };

    let status = response.status();
    let body = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
        body = response.text() => body?,
    };

    match status {
        StatusCode::OK => serde_json::from_str(&body)
            .map_err(|e| ProviderError::InvalidResponse(format!("{}: {}", e, body))),
        StatusCode::TOO_MANY_REQUESTS => Err(ProviderError::RateLimited(body)),
        status if status.is_server_error() => Err(ProviderError::ServerError {
            status: status.as_u16(),
            body,
        }),
        status => Err(ProviderError::RequestFailed {
            status: status.as_u16(),
            body,
        }),
    }
}

/// Parse the model's argument text into a JSON document; empty text is an empty object
pub fn arguments_to_document(arguments: &str) -> Result<Value, ProviderError> {
    if arguments.trim().is_empty() {
        return Ok(json!({}));
    }
    serde_json::from_str(arguments).map_err(|e| {
        ProviderError::InvalidResponse(format!(
            "tool arguments are not valid JSON ({}): {}",
            e, arguments
        ))
    })
}

pub fn document_to_arguments(document: &Value) -> String {
    match document {
        Value::Null => "{}".to_string(),
        other => other.to_string(),
    }
}

pub fn get_u64(value: &Value, key: &str) -> u64 {
    value.get(key).and_then(Value::as_u64).unwrap_or(0)
}

pub fn check_openai_context_length_error(error: &Value) -> Option<ProviderError> {
    let code = error.get("code")?.as_str()?;
    if code == "context_length_exceeded" || code == "string_above_max_length" {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("Unknown error")
            .to_string();
        Some(ProviderError::ContextLengthExceeded(message))
    } else {
        None
    }
}
