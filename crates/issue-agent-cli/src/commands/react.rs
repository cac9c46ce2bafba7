use anyhow::{bail, Result};
use clap::Args;
use console::style;
use std::sync::Arc;
use tracing::info;

use issue_agent::agent::AgentInvoker;
use issue_agent::config::Overrides;
use issue_agent::git::{GitWorkspace, GitWorkspaceConfig};
use issue_agent::github::{GitHubClient, GitHubConfig};
use issue_agent::prompt_template::PromptTemplates;
use issue_agent::providers::factory::select_forwarder;
use issue_agent::reactor::{fetch_comment, CommentReactor, CommentTarget, ReactOptions, ReactReport};
use issue_agent::services::{BranchService, RepositoryService, SubmitFilesService, SubmitRevisionService};
use issue_agent::store::Store;
use issue_agent::tools::{Collaborators, RegistryOptions};

use super::common::{check_workdir, interrupt_token, load_settings, prepare_workdir, CommonArgs};

#[derive(Args, Debug)]
pub struct ReactArgs {
    /// Comment to follow: <owner>/<repo>/issues/comments/<id> or <owner>/<repo>/pulls/comments/<id>
    pub comment: String,

    #[command(flatten)]
    pub common: CommonArgs,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentLocation {
    pub owner: String,
    pub repository: String,
    pub target: CommentTarget,
}

impl CommentLocation {
    pub fn parse(value: &str) -> Result<Self> {
        let parts: Vec<&str> = value.trim_matches('/').split('/').collect();
        let (owner, repository, target) = match parts.as_slice() {
            [owner, repository, "issues", "comments", id] => {
                (owner, repository, CommentTarget::Issue(id.to_string()))
            }
            [owner, repository, "pulls", "comments", id] => {
                (owner, repository, CommentTarget::Review(id.to_string()))
            }
            _ => bail!(
                "invalid comment {}, expected <owner>/<repo>/issues/comments/<id> or <owner>/<repo>/pulls/comments/<id>",
                value
            ),
        };
        let id = match &target {
            CommentTarget::Issue(id) | CommentTarget::Review(id) => id,
        };
        if id.parse::<u64>().is_err() {
            bail!("invalid comment id {}", id);
        }
        Ok(Self {
            owner: owner.to_string(),
            repository: repository.to_string(),
            target,
        })
    }
}

pub async fn execute(args: ReactArgs) -> Result<()> {
    let location = CommentLocation::parse(&args.comment)?;
    let settings = load_settings(&args.common, Overrides::default())?;
    let no_submit = settings.agent.github.no_submit;
    if !no_submit {
        settings.require_git_identity()?;
    }
    let cancel = interrupt_token()?;

    let github_config = GitHubConfig::from_env(&location.owner, &location.repository)?;
    let token = github_config.token.clone();
    let github = Arc::new(GitHubClient::new(github_config)?);

    let (comment, pr) = fetch_comment(&*github, &location.target, &cancel).await?;
    if pr.merges_into_itself() {
        println!(
            "{} base and head are both {}",
            style("skipped").yellow(),
            pr.head
        );
        return Ok(());
    }

    let workdir = prepare_workdir(
        &settings,
        &location.owner,
        &location.repository,
        &token,
        Some(&pr.head),
        &cancel,
    )
    .await?;
    check_workdir(&workdir)?;
    info!(workdir = %workdir.display(), branch = %pr.head, "working directory");

    let workspace = Arc::new(
        GitWorkspace::new(
            GitWorkspaceConfig {
                workdir: workdir.clone(),
                user_name: settings.agent.git.user_name.clone(),
                user_email: settings.agent.git.user_email.clone(),
                base_branch: pr.base.clone(),
                issue_number: pr.number.clone(),
                pr_labels: Vec::new(),
                reviewers: Vec::new(),
                team_reviewers: Vec::new(),
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

    let reactor = CommentReactor::new(
        invoker,
        collaborators,
        Arc::new(Store::new()),
        prompts,
        ReactOptions {
            repository: location.repository.clone(),
            language: settings.language.clone(),
            registry: RegistryOptions {
                allow_functions: settings.allowed_functions()?,
                no_submit,
                workdir,
            },
        },
    );

    let report = reactor.run(&comment, &pr).await?;
    if args.common.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&location, &report);
    }
    Ok(())
}

fn print_report(location: &CommentLocation, report: &ReactReport) {
    println!(
        "{} {}/{}#{} on {}",
        style("reacted").bold().green(),
        location.owner,
        location.repository,
        report.pull_request_number,
        style(&report.branch).bold()
    );
    println!("  changed files: {}", report.changed_files.len());
    for file in &report.changed_files {
        println!("    {}", file);
    }
}
