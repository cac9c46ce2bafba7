use anyhow::{anyhow, Context, Result};
use clap::Args;
use console::style;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use issue_agent::config::{Overrides, Settings};
use issue_agent::git::clone_repository;

use crate::logging;

/// Flags every agent-running command takes
#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    /// YAML configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub model: Option<String>,

    #[arg(long)]
    pub language: Option<String>,

    /// debug, info, warn or error
    #[arg(long)]
    pub log_level: Option<String>,

    #[arg(long)]
    pub github_owner: Option<String>,

    /// Print the run report as JSON
    #[arg(long)]
    pub json: bool,
}

/// The explicit file, else the per-user file when it exists
pub fn config_path(explicit: Option<PathBuf>, default: Option<PathBuf>) -> Option<PathBuf> {
    explicit.or_else(|| default.filter(|p| p.exists()))
}

/// Load settings, apply the command line on top and start logging
pub fn load_settings(common: &CommonArgs, mut overrides: Overrides) -> Result<Settings> {
    let path = config_path(common.config.clone(), Settings::default_path());
    let mut settings = Settings::load(path.as_deref()).context("failed to load configuration")?;
    overrides.model = common.model.clone();
    overrides.language = common.language.clone();
    overrides.log_level = common.log_level.clone();
    overrides.github_owner = common.github_owner.clone();
    settings.apply(overrides)?;
    logging::init(settings.log_level);
    Ok(settings)
}

/// A token cancelled by Ctrl-C
pub fn interrupt_token() -> Result<CancellationToken> {
    let cancel = CancellationToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || {
        eprintln!("{}", style("interrupted, stopping the agents").yellow());
        handler_token.cancel();
    })
    .context("failed to install the interrupt handler")?;
    Ok(cancel)
}

/// The directory the agents work in, cloned first when configured to
pub async fn prepare_workdir(
    settings: &Settings,
    owner: &str,
    repository: &str,
    token: &str,
    branch: Option<&str>,
    cancel: &CancellationToken,
) -> Result<PathBuf> {
    if !settings.agent.github.clone_repository {
        return Ok(settings.workdir.clone());
    }

    let dest = settings.workdir.join(repository);
    if dest.exists() {
        warn!(dest = %dest.display(), "clone destination exists, using it as is");
        return Ok(dest);
    }
    clone_repository(owner, repository, token, &dest, branch, cancel).await?;
    Ok(dest)
}

pub fn check_workdir(path: &Path) -> Result<()> {
    if !path.is_dir() {
        return Err(anyhow!("working directory {} does not exist", path.display()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_path_prefers_explicit_then_existing_default() {
        let dir = tempfile::tempdir().unwrap();
        let existing = dir.path().join("config.yml");
        std::fs::write(&existing, "language: English\n").unwrap();
        let missing = dir.path().join("missing.yml");

        assert_eq!(
            config_path(Some(missing.clone()), Some(existing.clone())),
            Some(missing.clone())
        );
        assert_eq!(config_path(None, Some(existing.clone())), Some(existing));
        assert_eq!(config_path(None, Some(missing)), None);
    }

    #[test]
    fn test_check_workdir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(check_workdir(dir.path()).is_ok());
        assert!(check_workdir(&dir.path().join("nope")).is_err());
    }
}
