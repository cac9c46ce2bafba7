use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// Why the model stopped generating, normalized across vendors
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FinishReason {
    Stop,
    ToolCalls,
    LengthExceeded,
    /// A vendor value we have no mapping for, kept verbatim for diagnostics
    Unknown(String),
}

impl fmt::Display for FinishReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FinishReason::Stop => write!(f, "stop"),
            FinishReason::ToolCalls => write!(f, "tool_calls"),
            FinishReason::LengthExceeded => write!(f, "length_exceeded"),
            FinishReason::Unknown(raw) => write!(f, "unknown({})", raw),
        }
    }
}

/// A tool invocation requested by the model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Vendor-assigned id correlating the call with its result
    pub caller_id: String,
    pub tool_name: String,
    /// Raw argument JSON text
    pub arguments: String,
}

impl ToolCall {
    pub fn new<I, N, A>(caller_id: I, tool_name: N, arguments: A) -> Self
    where
        I: Into<String>,
        N: Into<String>,
        A: Into<String>,
    {
        Self {
            caller_id: caller_id.into(),
            tool_name: tool_name.into(),
            arguments: arguments.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_tokens: u64,
    pub cache_read_tokens: u64,
}

impl Usage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            ..Default::default()
        }
    }

    pub fn with_cache(mut self, cache_creation_tokens: u64, cache_read_tokens: u64) -> Self {
        self.cache_creation_tokens = cache_creation_tokens;
        self.cache_read_tokens = cache_read_tokens;
        self
    }

    /// Fresh prompt tokens plus those served from the prompt cache
    pub fn total_input(&self) -> u64 {
        self.input_tokens + self.cache_read_tokens
    }

    /// Generated tokens plus those written into the prompt cache
    pub fn total_output(&self) -> u64 {
        self.output_tokens + self.cache_creation_tokens
    }
}

/// The vendor's own representation of an assistant turn.
///
/// Forwarders replay this verbatim when it carries their own variant, and otherwise rebuild
/// the native shape from the generic message fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum VendorNative {
    /// The `choices[0].message` object of a chat completion
    OpenAi(Value),
    /// The `content` blocks of a messages response
    Anthropic(Vec<Value>),
    /// The `output.message` object of a converse response
    Bedrock(Value),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// A message to or from an LLM
pub struct Message {
    pub role: Role,
    pub text: String,
    pub finish_reason: Option<FinishReason>,
    /// Set on tool messages: the call this message answers
    pub responding_tool_call: Option<ToolCall>,
    /// Set on assistant messages that request tools
    pub tool_calls: Vec<ToolCall>,
    pub usage: Usage,
    pub native: Option<VendorNative>,
}

impl Message {
    pub fn new(role: Role) -> Self {
        Message {
            role,
            text: String::new(),
            finish_reason: None,
            responding_tool_call: None,
            tool_calls: Vec::new(),
            usage: Usage::default(),
            native: None,
        }
    }

    pub fn system() -> Self {
        Self::new(Role::System)
    }

    pub fn user() -> Self {
        Self::new(Role::User)
    }

    pub fn assistant() -> Self {
        Self::new(Role::Assistant)
    }

    /// A tool message answering the given call
    pub fn tool_result<S: Into<String>>(call: ToolCall, content: S) -> Self {
        Self::new(Role::Tool)
            .with_text(content)
            .with_responding_tool_call(call)
    }

    pub fn with_text<S: Into<String>>(mut self, text: S) -> Self {
        self.text = text.into();
        self
    }

    pub fn with_tool_call(mut self, call: ToolCall) -> Self {
        self.tool_calls.push(call);
        self
    }

    pub fn with_responding_tool_call(mut self, call: ToolCall) -> Self {
        self.responding_tool_call = Some(call);
        self
    }

    pub fn with_finish_reason(mut self, reason: FinishReason) -> Self {
        self.finish_reason = Some(reason);
        self
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = usage;
        self
    }

    pub fn with_native(mut self, native: VendorNative) -> Self {
        self.native = Some(native);
        self
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Shorten a long text for logging, keeping the first and last lines.
pub fn truncate_lines(text: &str, keep_start: usize, keep_end: usize, placeholder: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    if lines.len() <= keep_start + keep_end {
        return text.to_string();
    }

    let mut kept: Vec<&str> = Vec::with_capacity(keep_start + keep_end + 1);
    kept.extend_from_slice(&lines[..keep_start]);
    kept.push(placeholder);
    kept.extend_from_slice(&lines[lines.len() - keep_end..]);
    kept.join("\n")
}
