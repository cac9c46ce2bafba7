use std::sync::Arc;
use strum_macros::{Display, EnumIter};

use super::{
    anthropic::AnthropicForwarder,
    base::Forwarder,
    bedrock::BedrockForwarder,
    configs::{AnthropicProviderConfig, BedrockProviderConfig, OpenAiProviderConfig},
    openai::OpenAiForwarder,
};
use crate::errors::ProviderError;

#[derive(EnumIter, Display, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwarderType {
    OpenAi,
    Anthropic,
    Bedrock,
}

const OPENAI_PREFIXES: &[&str] = &["gpt", "o1", "o3", "o4"];

/// Decide which vendor serves the model.
///
/// Bedrock model ids embed the Claude name (`us.anthropic.claude-...`), so they are checked
/// before the plain `claude` prefix.
pub fn forwarder_type(model: &str) -> Result<ForwarderType, ProviderError> {
    if model.is_empty() {
        return Err(ProviderError::Configuration(
            "model is not specified".to_string(),
        ));
    }
    if model.contains("anthropic.claude-") {
        return Ok(ForwarderType::Bedrock);
    }
    if OPENAI_PREFIXES.iter().any(|p| model.starts_with(p)) {
        return Ok(ForwarderType::OpenAi);
    }
    if model.starts_with("claude") {
        return Ok(ForwarderType::Anthropic);
    }
    Err(ProviderError::Configuration(format!(
        "unsupported model: {}",
        model
    )))
}

/// Build the forwarder for the model, reading vendor credentials from the environment
pub fn select_forwarder(model: &str) -> Result<Arc<dyn Forwarder>, ProviderError> {
    match forwarder_type(model)? {
        ForwarderType::OpenAi => Ok(Arc::new(OpenAiForwarder::new(
            OpenAiProviderConfig::from_env()?,
        )?)),
        ForwarderType::Anthropic => Ok(Arc::new(AnthropicForwarder::new(
            AnthropicProviderConfig::from_env()?,
        )?)),
        ForwarderType::Bedrock => Ok(Arc::new(BedrockForwarder::new(
            BedrockProviderConfig::from_env()?,
        )?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    #[test]
    fn test_forwarder_type() {
        assert_eq!(forwarder_type("gpt-4o").unwrap(), ForwarderType::OpenAi);
        assert_eq!(forwarder_type("o3-mini").unwrap(), ForwarderType::OpenAi);
        assert_eq!(forwarder_type("o4-mini").unwrap(), ForwarderType::OpenAi);
        assert_eq!(
            forwarder_type("claude-3-5-sonnet-latest").unwrap(),
            ForwarderType::Anthropic
        );
        assert_eq!(
            forwarder_type("us.anthropic.claude-3-7-sonnet-20250219-v1:0").unwrap(),
            ForwarderType::Bedrock
        );
        assert_eq!(
            forwarder_type("anthropic.claude-3-haiku-20240307-v1:0").unwrap(),
            ForwarderType::Bedrock
        );
    }

    #[test]
    fn test_rejected_models() {
        let err = forwarder_type("").unwrap_err();
        assert!(err.to_string().contains("model is not specified"));

        let err = forwarder_type("llama3").unwrap_err();
        assert!(err.to_string().contains("unsupported model: llama3"));
    }

    #[test]
    #[serial]
    fn test_select_forwarder_needs_credentials() {
        env::remove_var("ANTHROPIC_API_KEY");
        assert!(matches!(
            select_forwarder("claude-3-5-sonnet-latest"),
            Err(ProviderError::Configuration(_))
        ));

        env::set_var("ANTHROPIC_API_KEY", "key");
        assert!(select_forwarder("claude-3-5-sonnet-latest").is_ok());
        env::remove_var("ANTHROPIC_API_KEY");
    }
}
