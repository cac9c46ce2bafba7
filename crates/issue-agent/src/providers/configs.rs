use std::env;

use crate::errors::ProviderError;

pub const OPENAI_DEFAULT_HOST: &str = "https://api.openai.com";
pub const ANTHROPIC_DEFAULT_HOST: &str = "https://api.anthropic.com";
pub const BEDROCK_DEFAULT_REGION: &str = "us-east-1";

fn required_env(key: &str) -> Result<String, ProviderError> {
    env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ProviderError::Configuration(format!("{} is not set", key)))
}

fn optional_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

#[derive(Debug, Clone)]
pub struct OpenAiProviderConfig {
    pub host: String,
    pub api_key: String,
}

impl OpenAiProviderConfig {
    pub fn from_env() -> Result<Self, ProviderError> {
        Ok(Self {
            host: optional_env("OPENAI_HOST").unwrap_or_else(|| OPENAI_DEFAULT_HOST.to_string()),
            api_key: required_env("OPENAI_API_KEY")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct AnthropicProviderConfig {
    pub host: String,
    pub api_key: String,
}

impl AnthropicProviderConfig {
    pub fn from_env() -> Result<Self, ProviderError> {
        Ok(Self {
            host: optional_env("ANTHROPIC_HOST")
                .unwrap_or_else(|| ANTHROPIC_DEFAULT_HOST.to_string()),
            api_key: required_env("ANTHROPIC_API_KEY")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct BedrockProviderConfig {
    pub region: String,
    /// Full endpoint URL; derived from the region unless overridden
    pub endpoint: String,
    pub api_key: String,
}

impl BedrockProviderConfig {
    pub fn from_env() -> Result<Self, ProviderError> {
        let region = optional_env("AWS_REGION")
            .or_else(|| optional_env("AWS_DEFAULT_REGION"))
            .unwrap_or_else(|| BEDROCK_DEFAULT_REGION.to_string());
        let endpoint = optional_env("BEDROCK_ENDPOINT")
            .unwrap_or_else(|| format!("https://bedrock-runtime.{}.amazonaws.com", region));
        Ok(Self {
            region,
            endpoint,
            api_key: required_env("AWS_BEARER_TOKEN_BEDROCK")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_bedrock_endpoint_follows_region() {
        env::remove_var("BEDROCK_ENDPOINT");
        env::remove_var("AWS_DEFAULT_REGION");
        env::set_var("AWS_REGION", "eu-west-1");
        env::set_var("AWS_BEARER_TOKEN_BEDROCK", "token");

        let config = BedrockProviderConfig::from_env().unwrap();
        assert_eq!(config.region, "eu-west-1");
        assert_eq!(
            config.endpoint,
            "https://bedrock-runtime.eu-west-1.amazonaws.com"
        );

        env::remove_var("AWS_REGION");
        env::remove_var("AWS_BEARER_TOKEN_BEDROCK");
    }

    #[test]
    #[serial]
    fn test_missing_key_is_configuration_error() {
        env::remove_var("OPENAI_API_KEY");
        let err = OpenAiProviderConfig::from_env().unwrap_err();
        assert!(matches!(err, ProviderError::Configuration(m) if m.contains("OPENAI_API_KEY")));
    }
}
