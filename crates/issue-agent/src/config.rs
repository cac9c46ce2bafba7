use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use strum_macros::{AsRefStr, Display, EnumString};
use thiserror::Error;

use crate::tools::FunctionName;

pub const ENV_PREFIX: &str = "ISSUE_AGENT";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {env_var}")]
    MissingEnvVar { env_var: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Configuration error: {0}")]
    Other(#[from] config::ConfigError),
}

/// The environment variable that sets a dotted settings key
pub fn to_env_var(field: &str) -> String {
    format!("{}__{}", ENV_PREFIX, field.replace('.', "__").to_uppercase())
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GitSettings {
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub user_email: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GitHubSettings {
    #[serde(default)]
    pub owner: String,
    /// Do everything but push and open the pull request
    #[serde(default)]
    pub no_submit: bool,
    #[serde(default)]
    pub clone_repository: bool,
    #[serde(default)]
    pub pr_labels: Vec<String>,
    /// Member logins requested to review the opened pull request
    #[serde(default)]
    pub reviewers: Vec<String>,
    /// Team slugs requested to review the opened pull request
    #[serde(default)]
    pub team_reviewers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    pub model: String,
    pub max_steps: usize,
    /// Number of reviewers; zero skips the review stage
    pub review_agents: usize,
    #[serde(default)]
    pub prompt_path: Option<PathBuf>,
    #[serde(default = "default_allow_functions")]
    pub allow_functions: Vec<String>,
    #[serde(default)]
    pub git: GitSettings,
    #[serde(default)]
    pub github: GitHubSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub language: String,
    pub workdir: PathBuf,
    pub log_level: LogLevel,
    pub agent: AgentSettings,
}

/// Values given on the command line, which win over file and environment
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub model: Option<String>,
    pub language: Option<String>,
    pub log_level: Option<String>,
    pub github_owner: Option<String>,
    pub reviewers: Option<Vec<String>>,
    pub team_reviewers: Option<Vec<String>>,
}

impl Settings {
    /// `~/.config/issue-agent/config.yml` on Linux, the platform equivalent elsewhere
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("issue-agent").join("config.yml"))
    }

    /// Load defaults, then the YAML file when given, then `ISSUE_AGENT__*` variables
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("language", default_language())?
            .set_default("workdir", ".")?
            .set_default("log_level", "info")?
            .set_default("agent.model", default_model())?
            .set_default("agent.max_steps", 70)?
            .set_default("agent.review_agents", 0)?;

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Yaml).required(true));
        }

        let config = builder
            // Layer on the environment variables
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("agent.allow_functions")
                    .with_list_parse_key("agent.github.pr_labels")
                    .with_list_parse_key("agent.github.reviewers")
                    .with_list_parse_key("agent.github.team_reviewers"),
            )
            .build()?;

        let settings: Settings = config.try_deserialize().map_err(|err| {
            tracing::debug!("Configuration error: {:?}", &err);
            match &err {
                config::ConfigError::NotFound(field) => ConfigError::MissingEnvVar {
                    env_var: to_env_var(field),
                },
                _ => ConfigError::Other(err),
            }
        })?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agent.model.trim().is_empty() {
            return Err(ConfigError::Invalid("model is not specified".to_string()));
        }
        self.allowed_functions()?;
        Ok(())
    }

    pub fn apply(&mut self, overrides: Overrides) -> Result<(), ConfigError> {
        if let Some(model) = overrides.model {
            self.agent.model = model;
        }
        if let Some(language) = overrides.language {
            self.language = language;
        }
        if let Some(level) = overrides.log_level {
            self.log_level = LogLevel::from_str(&level)
                .map_err(|_| ConfigError::Invalid(format!("unknown log level: {}", level)))?;
        }
        if let Some(owner) = overrides.github_owner {
            self.agent.github.owner = owner;
        }
        if let Some(reviewers) = overrides.reviewers {
            self.agent.github.reviewers = reviewers;
        }
        if let Some(teams) = overrides.team_reviewers {
            self.agent.github.team_reviewers = teams;
        }
        self.validate()
    }

    pub fn allowed_functions(&self) -> Result<Vec<FunctionName>, ConfigError> {
        self.agent
            .allow_functions
            .iter()
            .map(|name| {
                FunctionName::from_str(name)
                    .map_err(|_| ConfigError::Invalid(format!("unknown function: {}", name)))
            })
            .collect()
    }

    /// Pushing needs a commit identity
    pub fn require_git_identity(&self) -> Result<(), ConfigError> {
        if self.agent.git.user_name.is_empty() {
            return Err(ConfigError::MissingEnvVar {
                env_var: to_env_var("agent.git.user_name"),
            });
        }
        if self.agent.git.user_email.is_empty() {
            return Err(ConfigError::MissingEnvVar {
                env_var: to_env_var("agent.git.user_email"),
            });
        }
        Ok(())
    }
}

fn default_language() -> String {
    "English".to_string()
}

fn default_model() -> String {
    "claude-3-5-sonnet-latest".to_string()
}

fn default_allow_functions() -> Vec<String> {
    FunctionName::all()
        .iter()
        .map(|name| name.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;
    use std::fs;

    fn clean_env() {
        for (key, _) in env::vars() {
            if key.starts_with("ISSUE_AGENT_") {
                env::remove_var(&key);
            }
        }
    }

    #[test]
    #[serial]
    fn test_default_settings() {
        clean_env();

        let settings = Settings::load(None).unwrap();
        assert_eq!(settings.language, "English");
        assert_eq!(settings.workdir, PathBuf::from("."));
        assert_eq!(settings.log_level, LogLevel::Info);
        assert_eq!(settings.agent.model, "claude-3-5-sonnet-latest");
        assert_eq!(settings.agent.max_steps, 70);
        assert_eq!(settings.agent.review_agents, 0);
        assert!(settings.agent.prompt_path.is_none());
        assert!(!settings.agent.github.no_submit);
        assert_eq!(
            settings.allowed_functions().unwrap().len(),
            FunctionName::all().len()
        );
    }

    #[test]
    #[serial]
    fn test_file_then_environment() {
        clean_env();
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("config.yml");
        fs::write(
            &path,
            "language: Japanese\nlog_level: debug\nagent:\n  model: gpt-4o\n  max_steps: 10\n  allow_functions: [open_file, list_files]\n  github:\n    owner: octo\n    pr_labels: [bot]\n",
        )
        .unwrap();
        env::set_var("ISSUE_AGENT__AGENT__MAX_STEPS", "25");
        env::set_var("ISSUE_AGENT__AGENT__GITHUB__NO_SUBMIT", "true");
        env::set_var("ISSUE_AGENT__AGENT__GITHUB__TEAM_REVIEWERS", "core,docs");

        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.language, "Japanese");
        assert_eq!(settings.log_level, LogLevel::Debug);
        assert_eq!(settings.agent.model, "gpt-4o");
        assert_eq!(settings.agent.max_steps, 25);
        assert!(settings.agent.github.no_submit);
        assert_eq!(settings.agent.github.owner, "octo");
        assert_eq!(settings.agent.github.pr_labels, vec!["bot".to_string()]);
        assert!(settings.agent.github.reviewers.is_empty());
        assert_eq!(
            settings.agent.github.team_reviewers,
            vec!["core".to_string(), "docs".to_string()]
        );
        assert_eq!(
            settings.allowed_functions().unwrap(),
            vec![FunctionName::OpenFile, FunctionName::ListFiles]
        );

        clean_env();
    }

    #[test]
    #[serial]
    fn test_invalid_values_are_rejected() {
        clean_env();
        env::set_var("ISSUE_AGENT__AGENT__ALLOW_FUNCTIONS", "open_file,rm_rf");
        let err = Settings::load(None).unwrap_err();
        assert_eq!(err.to_string(), "Invalid configuration: unknown function: rm_rf");

        env::set_var("ISSUE_AGENT__AGENT__ALLOW_FUNCTIONS", "open_file");
        env::set_var("ISSUE_AGENT__LOG_LEVEL", "verbose");
        assert!(matches!(Settings::load(None), Err(ConfigError::Other(_))));

        clean_env();
    }

    #[test]
    #[serial]
    fn test_overrides() {
        clean_env();
        let mut settings = Settings::load(None).unwrap();
        settings
            .apply(Overrides {
                model: Some("o3-mini".into()),
                language: None,
                log_level: Some("WARN".into()),
                github_owner: Some("octo".into()),
                reviewers: Some(vec!["octocat".into()]),
                team_reviewers: None,
            })
            .unwrap();
        assert_eq!(settings.agent.model, "o3-mini");
        assert_eq!(settings.language, "English");
        assert_eq!(settings.log_level, LogLevel::Warn);
        assert_eq!(settings.agent.github.owner, "octo");
        assert_eq!(settings.agent.github.reviewers, vec!["octocat".to_string()]);
        assert!(settings.agent.github.team_reviewers.is_empty());

        let err = settings
            .apply(Overrides {
                model: Some(String::new()),
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid configuration: model is not specified");
    }

    #[test]
    fn test_git_identity_names_the_variable() {
        let mut settings = Settings {
            language: default_language(),
            workdir: PathBuf::from("."),
            log_level: LogLevel::Info,
            agent: AgentSettings {
                model: default_model(),
                max_steps: 70,
                review_agents: 0,
                prompt_path: None,
                allow_functions: default_allow_functions(),
                git: GitSettings::default(),
                github: GitHubSettings::default(),
            },
        };
        match settings.require_git_identity() {
            Err(ConfigError::MissingEnvVar { env_var }) => {
                assert_eq!(env_var, "ISSUE_AGENT__AGENT__GIT__USER_NAME")
            }
            other => panic!("unexpected result: {:?}", other),
        }

        settings.agent.git.user_name = "bot".into();
        settings.agent.git.user_email = "bot@example.com".into();
        assert!(settings.require_git_identity().is_ok());
    }
}
