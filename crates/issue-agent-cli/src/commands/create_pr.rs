use anyhow::{bail, Result};
use clap::Args;
use console::style;
use std::sync::Arc;
use tracing::info;

use issue_agent::agent::AgentInvoker;
use issue_agent::config::Overrides;
use issue_agent::git::{GitWorkspace, GitWorkspaceConfig};
use issue_agent::github::{GitHubClient, GitHubConfig};
use issue_agent::orchestrator::{Orchestrator, RunOptions, RunReport};
use issue_agent::prompt_template::PromptTemplates;
use issue_agent::providers::factory::select_forwarder;
use issue_agent::services::{BranchService, RepositoryService, SubmitFilesService, SubmitRevisionService};
use issue_agent::store::Store;
use issue_agent::tools::{Collaborators, RegistryOptions};

use super::common::{check_workdir, interrupt_token, load_settings, prepare_workdir, CommonArgs};

#[derive(Args, Debug)]
pub struct CreatePrArgs {
    /// Issue to resolve: <owner>/<repo>/issues/<number>, or <repo>/issues/<number> with a configured owner
    pub issue: String,

    /// Branch the pull request targets
    #[arg(long)]
    pub base_branch: String,

    /// Member logins to request reviews from, comma separated
    #[arg(long, value_delimiter = ',')]
    pub reviewers: Vec<String>,

    /// Team slugs to request reviews from, comma separated
    #[arg(long, value_delimiter = ',')]
    pub team_reviewers: Vec<String>,

    #[command(flatten)]
    pub common: CommonArgs,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueLocation {
    pub owner: String,
    pub repository: String,
    pub number: String,
}

impl IssueLocation {
    pub fn parse(value: &str, default_owner: &str) -> Result<Self> {
        let parts: Vec<&str> = value.trim_matches('/').split('/').collect();
        let (owner, rest) = match parts.as_slice() {
            [owner, repository, "issues", number] => (owner.to_string(), (*repository, *number)),
            [repository, "issues", number] if !default_owner.is_empty() => {
                (default_owner.to_string(), (*repository, *number))
            }
            _ => bail!(
                "invalid issue {}, expected <owner>/<repo>/issues/<number>",
                value
            ),
        };
        let (repository, number) = rest;
        if number.parse::<u64>().is_err() {
            bail!("invalid issue number {}", number);
        }
        Ok(Self {
            owner,
            repository: repository.to_string(),
            number: number.to_string(),
        })
    }
}

fn non_empty(values: Vec<String>) -> Option<Vec<String>> {
    (!values.is_empty()).then_some(values)
}

pub async fn execute(args: CreatePrArgs) -> Result<()> {
    let settings = load_settings(
        &args.common,
        Overrides {
            reviewers: non_empty(args.reviewers),
            team_reviewers: non_empty(args.team_reviewers),
            ..Default::default()
        },
    )?;

    let location = IssueLocation::parse(&args.issue, &settings.agent.github.owner)?;
    let no_submit = settings.agent.github.no_submit;
    if !no_submit {
        settings.require_git_identity()?;
    }
    let cancel = interrupt_token()?;

    let github_config = GitHubConfig::from_env(&location.owner, &location.repository)?;
    let token = github_config.token.clone();
    let github = Arc::new(GitHubClient::new(github_config)?);

    let workdir = prepare_workdir(
        &settings,
        &location.owner,
        &location.repository,
        &token,
        None,
        &cancel,
    )
    .await?;
    check_workdir(&workdir)?;
    info!(workdir = %workdir.display(), "working directory");

    let github_settings = &settings.agent.github;
    let workspace = Arc::new(
        GitWorkspace::new(
            GitWorkspaceConfig {
                workdir: workdir.clone(),
                user_name: settings.agent.git.user_name.clone(),
                user_email: settings.agent.git.user_email.clone(),
                base_branch: args.base_branch.clone(),
                issue_number: location.number.clone(),
                pr_labels: github_settings.pr_labels.clone(),
                reviewers: github_settings.reviewers.clone(),
                team_reviewers: github_settings.team_reviewers.clone(),
            },
            Arc::clone(&github),
        )
        .with_cancellation(cancel.clone()),
    );
    let collaborators = Collaborators {
        repository: github as Arc<dyn RepositoryService>,
        submit_files: Arc::clone(&workspace) as Arc<dyn SubmitFilesService>,
        submit_revision: Arc::clone(&workspace) as Arc<dyn SubmitRevisionService>,
        branches: workspace as Arc<dyn BranchService>,
    };

    let forwarder = select_forwarder(&settings.agent.model)?;
    let invoker = AgentInvoker::new(&settings.agent.model, settings.agent.max_steps, forwarder)
        .with_cancellation(cancel);
    let prompts = PromptTemplates::load(settings.agent.prompt_path.as_deref())?;

    let orchestrator = Orchestrator::new(
        invoker,
        collaborators,
        Arc::new(Store::new()),
        prompts,
        RunOptions {
            repository: location.repository.clone(),
            issue_number: location.number.clone(),
            base_branch: args.base_branch,
            language: settings.language.clone(),
            review_agents: settings.agent.review_agents,
            registry: RegistryOptions {
                allow_functions: settings.allowed_functions()?,
                no_submit,
                workdir,
            },
        },
    );

    let report = orchestrator.run().await?;
    if args.common.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&location, &report);
    }
    Ok(())
}

fn print_report(location: &IssueLocation, report: &RunReport) {
    println!(
        "{} {}/{}#{}",
        style("resolved").bold().green(),
        location.owner,
        location.repository,
        location.number
    );
    match report.pull_request_number {
        Some(number) => println!("  pull request: #{}", style(number).bold()),
        None => println!("  pull request: {}", style("not submitted").dim()),
    }
    println!("  changed files: {}", report.changed_files.len());
    for file in &report.changed_files {
        println!("    {}", file);
    }
    if report.reviews_submitted > 0 || report.review_failures > 0 {
        println!(
            "  reviews: {} submitted, {} failed",
            report.reviews_submitted, report.review_failures
        );
    }
}
