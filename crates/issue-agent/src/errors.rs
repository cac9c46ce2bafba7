use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by tools. The agent turns these into corrective text for the model.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum AgentError {
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Tool execution failed: {0}")]
    ExecutionError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type AgentResult<T> = Result<T, AgentError>;

/// Errors talking to an LLM vendor. These are fatal for the agent that hit them.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Server error: {status} - {body}")]
    ServerError { status: u16, body: String },

    #[error("Request failed: {status} - {body}")]
    RequestFailed { status: u16, body: String },

    #[error("Context length exceeded. Message: {0}")]
    ContextLengthExceeded(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<ProviderError>,
    },
}

impl ProviderError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ProviderError::RateLimited(_))
    }
}

/// Errors that end an agent's work loop
#[derive(Error, Debug)]
pub enum WorkError {
    #[error("llm forward error: {0}")]
    Forward(#[from] ProviderError),

    #[error("unrecoverable error: {0}")]
    Unrecoverable(String),

    #[error("unknown step type")]
    UnknownStep,

    #[error("agent work cancelled")]
    Cancelled,
}
