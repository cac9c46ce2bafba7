use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agent::cancellable;
use crate::github::GitHubClient;
use crate::services::{
    BranchService, RepositoryService, SubmitFilesInput, SubmitFilesOutput, SubmitFilesService,
    SubmitRevisionInput, SubmitRevisionOutput, SubmitRevisionService,
};

const REDACTED: &str = "***";

/// Where and as whom the agent commits
#[derive(Debug, Clone)]
pub struct GitWorkspaceConfig {
    pub workdir: PathBuf,
    pub user_name: String,
    pub user_email: String,
    pub base_branch: String,
    pub issue_number: String,
    pub pr_labels: Vec<String>,
    pub reviewers: Vec<String>,
    pub team_reviewers: Vec<String>,
}

fn redact(text: &str, secrets: &[&str]) -> String {
    secrets
        .iter()
        .filter(|secret| !secret.is_empty())
        .fold(text.to_string(), |text, secret| text.replace(secret, REDACTED))
}

async fn run_git(workdir: &Path, args: &[&str], cancel: &CancellationToken) -> Result<String> {
    run_git_with_secrets(workdir, args, &[], cancel).await
}

/// Run git, scrubbing `secrets` from the log line and the error text
async fn run_git_with_secrets(
    workdir: &Path,
    args: &[&str],
    secrets: &[&str],
    cancel: &CancellationToken,
) -> Result<String> {
    let subcommand = args.first().copied().unwrap_or_default();
    debug!(args = %redact(&args.join(" "), secrets), "git");

    let mut command = Command::new("git");
    command
        .args(args)
        .current_dir(workdir)
        .env("GIT_TERMINAL_PROMPT", "0")
        .kill_on_drop(true);

    let output = tokio::select! {
        biased;
        _ = cancel.cancelled() => bail!("git {} cancelled", subcommand),
        output = command.output() => output.context("failed to run git")?,
    };

    if !output.status.success() {
        bail!(
            "git {} failed: {}",
            subcommand,
            redact(String::from_utf8_lossy(&output.stderr).trim(), secrets)
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// `http.extraheader` value authenticating as the token's installation
fn auth_header(token: &str) -> String {
    let basic = BASE64.encode(format!("x-access-token:{}", token));
    format!("http.extraheader=AUTHORIZATION: basic {}", basic)
}

/// Clone arguments. The credential travels as a config value kept in the clone's
/// `.git/config`, so the remote URL stays clean and later pushes authenticate too.
fn clone_args(url: &str, header: &str, target: &str, branch: Option<&str>) -> Vec<String> {
    let mut args: Vec<String> = vec!["clone".into(), "--depth".into(), "1".into()];
    if let Some(branch) = branch {
        args.extend(["--branch".into(), branch.to_string()]);
    }
    args.extend([
        "--config".into(),
        header.to_string(),
        url.to_string(),
        target.to_string(),
    ]);
    args
}

/// Clone `owner/repository` into `dest`, checking out `branch` when given
pub async fn clone_repository(
    owner: &str,
    repository: &str,
    token: &str,
    dest: &Path,
    branch: Option<&str>,
    cancel: &CancellationToken,
) -> Result<()> {
    let parent = dest
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let target = dest
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow!("invalid clone destination {}", dest.display()))?;
    let url = format!("https://github.com/{}/{}.git", owner, repository);
    let header = auth_header(token);
    let args = clone_args(&url, &header, target, branch);
    let args: Vec<&str> = args.iter().map(String::as_str).collect();

    info!(%owner, %repository, dest = %dest.display(), "cloning repository");
    run_git_with_secrets(parent, &args, &[token, &header], cancel)
        .await
        .with_context(|| format!("failed to clone {}/{}", owner, repository))?;
    Ok(())
}

/// The local checkout the agent edits, pushing through git and opening pull requests on GitHub
pub struct GitWorkspace {
    config: GitWorkspaceConfig,
    github: Arc<GitHubClient>,
    cancel: CancellationToken,
}

impl GitWorkspace {
    pub fn new(config: GitWorkspaceConfig, github: Arc<GitHubClient>) -> Self {
        Self {
            config,
            github,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn work_branch(&self) -> String {
        format!("issue-agent/issue-{}", self.config.issue_number)
    }

    fn check_identity(&self) -> Result<()> {
        if self.config.user_name.is_empty() || self.config.user_email.is_empty() {
            bail!("git user name and email must be configured before submitting");
        }
        Ok(())
    }

    fn check_not_base(&self, branch: &str) -> Result<()> {
        if branch == self.config.base_branch {
            bail!("refusing to push to the base branch {}", branch);
        }
        Ok(())
    }

    async fn git(&self, args: &[&str]) -> Result<String> {
        run_git(&self.config.workdir, args, &self.cancel).await
    }

    /// A rejected reviewer request leaves the pull request open
    async fn request_reviewers(&self, number: u64) {
        let (reviewers, teams) = (&self.config.reviewers, &self.config.team_reviewers);
        if reviewers.is_empty() && teams.is_empty() {
            return;
        }
        let request = self.github.request_reviewers(number, reviewers, teams);
        if let Err(err) = cancellable(&self.cancel, request).await {
            warn!(number, error = %format!("{:#}", err), "failed to request reviewers");
        }
    }

    async fn commit_all(&self, short: &str, detail: &str) -> Result<()> {
        self.git(&["add", "--all"]).await?;
        let name = format!("user.name={}", self.config.user_name);
        let email = format!("user.email={}", self.config.user_email);
        let mut args = vec!["-c", name.as_str(), "-c", email.as_str(), "commit", "-m", short];
        if !detail.is_empty() {
            args.extend(["-m", detail]);
        }
        self.git(&args).await?;
        Ok(())
    }

    async fn current_branch(&self) -> Result<String> {
        self.git(&["rev-parse", "--abbrev-ref", "HEAD"]).await
    }
}

#[async_trait]
impl SubmitFilesService for GitWorkspace {
    async fn submit_files(&self, input: &SubmitFilesInput) -> Result<SubmitFilesOutput> {
        self.check_identity()?;
        let branch = self.work_branch();
        self.check_not_base(&branch)?;

        self.git(&["checkout", "-b", &branch]).await?;
        self.commit_all(&input.commit_message_short, &input.commit_message_detail)
            .await?;
        self.git(&["push", "--set-upstream", "origin", &branch])
            .await?;

        let body = format!(
            "{}\n\nResolves #{}",
            input.pull_request_content, self.config.issue_number
        );
        let number = cancellable(
            &self.cancel,
            self.github.create_pull_request(
                &branch,
                &self.config.base_branch,
                &input.commit_message_short,
                &body,
            ),
        )
        .await?;
        cancellable(&self.cancel, self.github.add_labels(number, &self.config.pr_labels)).await?;
        self.request_reviewers(number).await;
        self.git(&["checkout", &self.config.base_branch]).await?;

        Ok(SubmitFilesOutput {
            message: format!("opened pull request #{}", number),
            pushed_branch: branch,
            pull_request_number: number,
        })
    }
}

#[async_trait]
impl SubmitRevisionService for GitWorkspace {
    async fn submit_revision(&self, input: &SubmitRevisionInput) -> Result<SubmitRevisionOutput> {
        self.check_identity()?;
        let branch = self.current_branch().await?;
        self.check_not_base(&branch)?;

        self.commit_all(&input.commit_message_short, &input.commit_message_detail)
            .await?;
        self.git(&["push", "origin", &branch]).await?;

        Ok(SubmitRevisionOutput {
            message: format!("pushed revision to {}", branch),
        })
    }
}

#[async_trait]
impl BranchService for GitWorkspace {
    async fn switch_branch(&self, name: &str) -> Result<String> {
        self.git(&["fetch", "origin", name]).await?;
        self.git(&["checkout", name]).await?;
        Ok(format!("switched to branch {}", name))
    }
}
