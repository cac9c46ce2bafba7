//! The pull-request comment pipeline: one agent follows what a comment asks for.
use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, Instrument};

use crate::agent::{cancellable, AgentInvoker};
use crate::prompt_template::PromptTemplates;
use crate::services::{Comment, PullRequest, RepositoryService};
use crate::store::Store;
use crate::tools::{build_registry, react_registry, register_invoke_agent, Collaborators, RegistryOptions};

pub const COMMENT_REACTOR: &str = "comment-reactor";

/// The comment to react to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommentTarget {
    /// A conversation comment on the pull request
    Issue(String),
    /// A comment on lines of a pull request file
    Review(String),
}

#[derive(Debug, Clone)]
pub struct ReactOptions {
    pub repository: String,
    pub language: String,
    pub registry: RegistryOptions,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReactReport {
    pub pull_request_number: String,
    pub branch: String,
    /// Set when the pull request merges a branch into itself and nothing ran
    pub skipped: bool,
    pub output: String,
    pub changed_files: Vec<String>,
}

/// Fetch the comment and the pull request it belongs to
pub async fn fetch_comment(
    repository: &dyn RepositoryService,
    target: &CommentTarget,
    cancel: &CancellationToken,
) -> Result<(Comment, PullRequest)> {
    let comment = match target {
        CommentTarget::Issue(id) => cancellable(cancel, repository.get_comment(id))
            .await
            .context("failed to get comment")?,
        CommentTarget::Review(id) => cancellable(cancel, repository.get_review_comment(id))
            .await
            .context("failed to get review comment")?
            .into_comment(),
    };
    let pr = cancellable(cancel, repository.get_pull_request(&comment.issue_number))
        .await
        .context("failed to get pull request")?;
    Ok((comment, pr))
}

pub struct CommentReactor {
    invoker: AgentInvoker,
    collaborators: Collaborators,
    store: Arc<Store>,
    prompts: PromptTemplates,
    options: ReactOptions,
}

impl CommentReactor {
    pub fn new(
        invoker: AgentInvoker,
        collaborators: Collaborators,
        store: Arc<Store>,
        prompts: PromptTemplates,
        options: ReactOptions,
    ) -> Self {
        Self {
            invoker,
            collaborators,
            store,
            prompts,
            options,
        }
    }

    /// React to `comment` on `pr`
    pub async fn run(&self, comment: &Comment, pr: &PullRequest) -> Result<ReactReport> {
        let span = info_span!("reactor", pr = %pr.number);
        self.react(comment, pr).instrument(span).await
    }

    async fn react(&self, comment: &Comment, pr: &PullRequest) -> Result<ReactReport> {
        let cancel = self.invoker.cancellation();
        let mut report = ReactReport {
            pull_request_number: pr.number.clone(),
            branch: pr.head.clone(),
            skipped: false,
            output: String::new(),
            changed_files: Vec::new(),
        };
        if pr.merges_into_itself() {
            info!(base = %pr.base, head = %pr.head, "base and head are the same, nothing to do");
            report.skipped = true;
            return Ok(report);
        }

        cancellable(cancel, self.collaborators.branches.switch_branch(&pr.head))
            .await
            .with_context(|| format!("failed to check out {}", pr.head))?;

        let run_registry =
            build_registry(&self.options.registry, &self.collaborators, Arc::clone(&self.store))?;
        let mut registry = react_registry(&run_registry);
        let sub_agent_tools = registry.clone();
        register_invoke_agent(
            &mut registry,
            &self.options.registry.allow_functions,
            self.invoker.clone(),
            sub_agent_tools,
        )?;
        info!(tools = ?registry.names(), branch = %pr.head, "reacting to comment");

        let context = json!({
            "language": self.options.language,
            "repository": self.options.repository,
            "pull_request_number": &pr.number,
            "working_branch": &pr.head,
            "no_submit": self.options.registry.no_submit,
            "comment": &comment.content,
            "pull_request": pr.to_llm_string(),
        });
        let prompt = self.prompts.render(COMMENT_REACTOR, &context)?;
        report.output = self
            .invoker
            .invoke(COMMENT_REACTOR, &prompt.system, &prompt.user, registry)
            .await
            .with_context(|| format!("agent {} failed", COMMENT_REACTOR))?;

        for file in self.store.changed_files() {
            if !report.changed_files.contains(&file.path) {
                report.changed_files.push(file.path);
            }
        }
        info!(files = report.changed_files.len(), "agents finished work");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::message::{FinishReason, Message, ToolCall};
    use crate::providers::mock::MockForwarder;
    use crate::services::mock::FakeServices;
    use tempfile::TempDir;

    fn stop(text: &str) -> Message {
        Message::assistant()
            .with_text(text)
            .with_finish_reason(FinishReason::Stop)
    }

    fn reactor(
        collaborators: Collaborators,
        forwarder: Arc<MockForwarder>,
        store: Arc<Store>,
        dir: &TempDir,
    ) -> CommentReactor {
        CommentReactor::new(
            AgentInvoker::new("gpt-4o", 10, forwarder),
            collaborators,
            store,
            PromptTemplates::embedded().unwrap(),
            ReactOptions {
                repository: "demo".into(),
                language: "English".into(),
                registry: RegistryOptions::allow_all(dir.path()),
            },
        )
    }

    #[tokio::test]
    async fn test_review_comment_drives_one_agent_on_the_head_branch() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeServices::default());
        let store = Arc::new(Store::new());
        let write = Message::assistant()
            .with_tool_call(ToolCall::new(
                "c1",
                "put_file",
                r#"{"path":"src/lib.rs","content_text":"fn bar() {}\n"}"#,
            ))
            .with_finish_reason(FinishReason::ToolCalls);
        let forwarder = Arc::new(MockForwarder::new(vec![write, stop("inlined it")]));

        let cancel = CancellationToken::new();
        let (comment, pr) = fetch_comment(&*fake, &CommentTarget::Review("55".into()), &cancel)
            .await
            .unwrap();
        let report = reactor(fake.collaborators(), forwarder.clone(), store, &dir)
            .run(&comment, &pr)
            .await
            .unwrap();

        assert_eq!(
            report,
            ReactReport {
                pull_request_number: "12".into(),
                branch: "agent/issue-1".into(),
                skipped: false,
                output: "inlined it".into(),
                changed_files: vec!["src/lib.rs".into()],
            }
        );
        assert_eq!(fake.switched_branches(), vec!["agent/issue-1".to_string()]);

        let requests = forwarder.requests();
        let first = &requests[0][0].text;
        assert!(first.contains("* Review file path: src/lib.rs"));
        assert!(first.contains("inline this"));
        assert!(first.contains("<pull-request-diff>\n+fixed"));
    }

    #[tokio::test]
    async fn test_same_base_and_head_runs_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeServices::default());
        let forwarder = Arc::new(MockForwarder::new(vec![stop("unused")]));
        let (comment, mut pr) = fetch_comment(
            &*fake,
            &CommentTarget::Issue("991".into()),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(comment.content, "comment 991: rename the helper");
        pr.head = pr.base.clone();

        let report = reactor(fake.collaborators(), forwarder.clone(), Arc::new(Store::new()), &dir)
            .run(&comment, &pr)
            .await
            .unwrap();

        assert!(report.skipped);
        assert_eq!(report.branch, "main");
        assert!(forwarder.requests().is_empty());
        assert!(fake.switched_branches().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_fetch_fails() {
        let fake = FakeServices::default();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = fetch_comment(&fake, &CommentTarget::Issue("991".into()), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "failed to get comment");
    }
}
