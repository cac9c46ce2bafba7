//! Pull structured JSON out of free-form model output.
use lazy_static::lazy_static;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

lazy_static! {
    static ref JSON_FENCE: Regex = Regex::new(r"(?s)```json\s*(.*?)```").unwrap();
}

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("no JSON array found in output")]
    NoArray,

    #[error("failed to decode JSON array: {0}")]
    Decode(#[from] serde_json::Error),
}

/// One review assignment produced by the review manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationTarget {
    pub agent_name: String,
    pub prompt: String,
}

/// One comment a reviewer wants on the pull request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewFinding {
    pub review_file_path: String,
    pub review_start_line: u32,
    pub review_end_line: u32,
    pub review_comment: String,
    #[serde(default)]
    pub suggestion: String,
}

/// Decode a JSON array embedded in model output.
///
/// Tries the whole text, then a ```` ```json ```` fence, then the span from the first `[` to
/// the last `]`.
pub fn extract_json_array<T: DeserializeOwned>(text: &str) -> Result<Vec<T>, ExtractError> {
    if let Ok(items) = serde_json::from_str::<Vec<T>>(text.trim()) {
        return Ok(items);
    }

    if let Some(fenced) = JSON_FENCE.captures(text).and_then(|c| c.get(1)) {
        if let Ok(items) = serde_json::from_str::<Vec<T>>(fenced.as_str().trim()) {
            return Ok(items);
        }
    }

    let start = text.find('[').ok_or(ExtractError::NoArray)?;
    let end = text.rfind(']').ok_or(ExtractError::NoArray)?;
    if end < start {
        return Err(ExtractError::NoArray);
    }
    Ok(serde_json::from_str(&text[start..=end])?)
}
