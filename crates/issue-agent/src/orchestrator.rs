//! The issue-to-pull-request pipeline: plan, implement, then review.
use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, info_span, warn, Instrument};

use crate::agent::{cancellable, AgentInvoker};
use crate::extract::{extract_json_array, DelegationTarget, ReviewFinding};
use crate::prompt_template::PromptTemplates;
use crate::services::{DraftReviewComment, Issue};
use crate::store::{Store, LAST_SUBMISSION_KEY};
use crate::tools::registry::ToolRegistry;
use crate::tools::{
    build_registry, read_only_registry, register_invoke_agent, Collaborators, RegistryOptions,
};

pub const PLANNER: &str = "planner";
pub const DEVELOPER: &str = "developer";
pub const REVIEW_MANAGER: &str = "review-manager";
pub const REVIEWER: &str = "reviewer";

/// What one run works on
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub repository: String,
    pub issue_number: String,
    pub base_branch: String,
    pub language: String,
    pub review_agents: usize,
    pub registry: RegistryOptions,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct RunReport {
    /// None when submission is disabled
    pub pull_request_number: Option<u64>,
    pub changed_files: Vec<String>,
    pub reviews_submitted: usize,
    pub review_failures: usize,
}

/// Turn a reviewer's findings into comments for one batched review
pub fn build_review_comments(agent_name: &str, findings: &[ReviewFinding]) -> Vec<DraftReviewComment> {
    findings
        .iter()
        .map(|finding| {
            let start = finding.review_start_line.max(1);
            let end = finding.review_end_line.max(start);

            let mut body = format!("from {}\n{}", agent_name, finding.review_comment);
            if !finding.suggestion.is_empty() {
                body.push_str(&format!("\n\n```suggestion\n{}\n```\n", finding.suggestion));
            }

            DraftReviewComment {
                path: finding.review_file_path.clone(),
                body,
                start_line: (start != end).then_some(start),
                line: end,
                side: "RIGHT".to_string(),
            }
        })
        .collect()
}

pub struct Orchestrator {
    invoker: AgentInvoker,
    collaborators: Collaborators,
    store: Arc<Store>,
    prompts: PromptTemplates,
    options: RunOptions,
}

impl Orchestrator {
    pub fn new(
        invoker: AgentInvoker,
        collaborators: Collaborators,
        store: Arc<Store>,
        prompts: PromptTemplates,
        options: RunOptions,
    ) -> Self {
        Self {
            invoker,
            collaborators,
            store,
            prompts,
            options,
        }
    }

    fn base_context(&self, issue: &Issue) -> Value {
        json!({
            "language": self.options.language,
            "repository": self.options.repository,
            "base_branch": self.options.base_branch,
            "issue": issue.to_llm_string(),
            "no_submit": self.options.registry.no_submit,
            "review_agents": self.options.review_agents,
        })
    }

    async fn invoke(&self, agent_name: &str, template: &str, context: &Value, registry: ToolRegistry) -> Result<String> {
        let prompt = self.prompts.render(template, context)?;
        self.invoker
            .invoke(agent_name, &prompt.system, &prompt.user, registry)
            .await
            .with_context(|| format!("agent {} failed", agent_name))
    }

    fn changed_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = Vec::new();
        for file in self.store.changed_files() {
            if !paths.contains(&file.path) {
                paths.push(file.path);
            }
        }
        paths
    }

    /// Run the whole pipeline for the configured issue
    pub async fn run(&self) -> Result<RunReport> {
        let span = info_span!("orchestrator", issue = %self.options.issue_number);
        self.run_pipeline().instrument(span).await
    }

    async fn run_pipeline(&self) -> Result<RunReport> {
        let repository = &self.collaborators.repository;
        let cancel = self.invoker.cancellation();
        let issue = cancellable(
            cancel,
            repository.get_issue(&self.options.repository, &self.options.issue_number),
        )
        .await
        .context("failed to get issue")?;
        cancellable(cancel, repository.get_branch(&self.options.base_branch))
            .await
            .with_context(|| format!("base branch {} is not available", self.options.base_branch))?;

        let mut registry =
            build_registry(&self.options.registry, &self.collaborators, Arc::clone(&self.store))?;
        let sub_agent_tools = registry.clone();
        register_invoke_agent(
            &mut registry,
            &self.options.registry.allow_functions,
            self.invoker.clone(),
            sub_agent_tools,
        )?;
        let read_only = read_only_registry(&registry);
        let mut context = self.base_context(&issue);

        info!(title = %issue.title, "planning");
        let plan = self.invoke(PLANNER, PLANNER, &context, read_only.clone()).await?;

        info!("implementing");
        context["instruction"] = json!(plan);
        self.invoke(DEVELOPER, DEVELOPER, &context, registry).await?;

        let mut report = RunReport {
            changed_files: self.changed_paths(),
            ..Default::default()
        };
        if self.options.registry.no_submit {
            info!(files = report.changed_files.len(), "submission disabled, run finished");
            return Ok(report);
        }

        let submission = self
            .store
            .get_submission(LAST_SUBMISSION_KEY)
            .ok_or_else(|| anyhow!("submission is not found"))?;
        report.pull_request_number = Some(submission.pr_number);
        info!(pr_number = submission.pr_number, branch = %submission.branch, "submitted");

        if self.options.review_agents == 0 {
            return Ok(report);
        }

        context["pull_request_number"] = json!(submission.pr_number);
        context["changed_files"] = json!(report.changed_files);
        let assignment = self
            .invoke(REVIEW_MANAGER, REVIEW_MANAGER, &context, read_only.clone())
            .await?;
        let targets: Vec<DelegationTarget> =
            extract_json_array(&assignment).context("failed to parse review manager output")?;
        info!(reviewers = targets.len(), "reviews delegated");

        for target in targets {
            context["agent_name"] = json!(target.agent_name);
            context["review_prompt"] = json!(target.prompt);
            let output = self
                .invoke(&target.agent_name, REVIEWER, &context, read_only.clone())
                .await?;
            let findings: Vec<ReviewFinding> = extract_json_array(&output)
                .with_context(|| format!("failed to parse output of reviewer {}", target.agent_name))?;

            let comments = build_review_comments(&target.agent_name, &findings);
            if comments.is_empty() {
                info!(reviewer = %target.agent_name, "no findings");
                continue;
            }
            match cancellable(cancel, repository.create_review(submission.pr_number, &comments)).await {
                Err(err) if cancel.is_cancelled() => return Err(err),
                Ok(()) => {
                    info!(reviewer = %target.agent_name, comments = comments.len(), "review submitted");
                    report.reviews_submitted += 1;
                }
                Err(err) => {
                    warn!(reviewer = %target.agent_name, error = %err, "failed to submit review");
                    report.review_failures += 1;
                }
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::message::{FinishReason, Message, ToolCall};
    use crate::providers::mock::MockForwarder;
    use crate::errors::WorkError;
    use crate::models::message::Role;
    use crate::services::mock::FakeServices;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    fn stop(text: &str) -> Message {
        Message::assistant()
            .with_text(text)
            .with_finish_reason(FinishReason::Stop)
    }

    fn submit_turn() -> Message {
        Message::assistant()
            .with_tool_call(ToolCall::new(
                "c1",
                "submit_files",
                r#"{"commit_message_short":"Fix the bug","pull_request_content":"Fixes #1"}"#,
            ))
            .with_finish_reason(FinishReason::ToolCalls)
    }

    fn finding(path: &str, start: u32, end: u32, suggestion: &str) -> ReviewFinding {
        ReviewFinding {
            review_file_path: path.into(),
            review_start_line: start,
            review_end_line: end,
            review_comment: "Validate input".into(),
            suggestion: suggestion.into(),
        }
    }

    struct Harness {
        orchestrator: Orchestrator,
        fake: Arc<FakeServices>,
        forwarder: Arc<MockForwarder>,
        _dir: TempDir,
    }

    fn harness(replies: Vec<Message>, review_agents: usize, no_submit: bool) -> Harness {
        harness_with_cancellation(replies, review_agents, no_submit, CancellationToken::new())
    }

    fn harness_with_cancellation(
        replies: Vec<Message>,
        review_agents: usize,
        no_submit: bool,
        cancel: CancellationToken,
    ) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeServices::default());
        let forwarder = Arc::new(MockForwarder::new(replies));
        let mut registry = RegistryOptions::allow_all(dir.path());
        registry.no_submit = no_submit;

        let orchestrator = Orchestrator::new(
            AgentInvoker::new("claude-3-5-sonnet-latest", 10, forwarder.clone())
                .with_cancellation(cancel),
            fake.collaborators(),
            Arc::new(Store::new()),
            PromptTemplates::embedded().unwrap(),
            RunOptions {
                repository: "demo".into(),
                issue_number: "1".into(),
                base_branch: "main".into(),
                language: "English".into(),
                review_agents,
                registry,
            },
        );
        Harness {
            orchestrator,
            fake,
            forwarder,
            _dir: dir,
        }
    }

    #[test]
    fn test_build_review_comments() {
        let comments = build_review_comments(
            "security",
            &[
                finding("src/lib.rs", 0, 3, "check(x)?;"),
                finding("src/main.rs", 5, 5, ""),
            ],
        );

        assert_eq!(comments[0].start_line, Some(1));
        assert_eq!(comments[0].line, 3);
        assert_eq!(comments[0].side, "RIGHT");
        assert_eq!(
            comments[0].body,
            "from security\nValidate input\n\n```suggestion\ncheck(x)?;\n```\n"
        );

        assert_eq!(comments[1].start_line, None);
        assert_eq!(comments[1].line, 5);
        assert_eq!(comments[1].body, "from security\nValidate input");
    }

    #[tokio::test]
    async fn test_full_pipeline_with_review() {
        let h = harness(
            vec![
                stop("1. edit src/lib.rs"),
                submit_turn(),
                stop("submitted"),
                stop(r#"Plan: [{"agent_name":"security","prompt":"check input"}]"#),
                stop(
                    r#"[{"review_file_path":"src/lib.rs","review_start_line":2,"review_end_line":4,"review_comment":"Validate input","suggestion":""}]"#,
                ),
            ],
            1,
            false,
        );

        let report = h.orchestrator.run().await.unwrap();

        assert_eq!(report.pull_request_number, Some(12));
        assert_eq!(report.reviews_submitted, 1);
        assert_eq!(report.review_failures, 0);

        let reviews = h.fake.reviews();
        assert_eq!(reviews.len(), 1);
        assert_eq!(reviews[0].0, 12);
        assert_eq!(reviews[0].1[0].start_line, Some(2));
        assert_eq!(reviews[0].1[0].body, "from security\nValidate input");

        // planner, developer twice, manager, reviewer
        let requests = h.forwarder.requests();
        assert_eq!(requests.len(), 5);
        assert!(requests[1][0].text.contains("1. edit src/lib.rs"));
        assert!(requests[4][0].text.contains("check input"));
    }

    #[tokio::test]
    async fn test_review_failure_does_not_stop_other_reviewers() {
        let review = r#"[{"review_file_path":"a.rs","review_start_line":1,"review_end_line":1,"review_comment":"x"}]"#;
        let h = harness(
            vec![
                stop("plan"),
                submit_turn(),
                stop("submitted"),
                stop(r#"[{"agent_name":"a","prompt":"p"},{"agent_name":"b","prompt":"q"}]"#),
                stop(review),
                stop(review),
            ],
            2,
            false,
        );
        h.fake.fail_next_reviews(1);

        let report = h.orchestrator.run().await.unwrap();
        assert_eq!(report.reviews_submitted, 1);
        assert_eq!(report.review_failures, 1);
        assert_eq!(h.fake.reviews()[0].1[0].body, "from b\nx");
    }

    #[tokio::test]
    async fn test_missing_submission_is_fatal() {
        let h = harness(vec![stop("plan"), stop("I changed nothing")], 1, false);
        let err = h.orchestrator.run().await.unwrap_err();
        assert_eq!(err.to_string(), "submission is not found");
    }

    #[tokio::test]
    async fn test_no_submit_ends_after_developer() {
        let h = harness(vec![stop("plan"), stop("done")], 3, true);
        let report = h.orchestrator.run().await.unwrap();

        assert_eq!(report.pull_request_number, None);
        assert_eq!(h.forwarder.requests().len(), 2);
        assert!(h.fake.reviews().is_empty());
    }

    #[tokio::test]
    async fn test_zero_reviewers_skip_review_stage() {
        let h = harness(vec![stop("plan"), submit_turn(), stop("submitted")], 0, false);
        let report = h.orchestrator.run().await.unwrap();

        assert_eq!(report.pull_request_number, Some(12));
        assert_eq!(h.forwarder.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_unparseable_delegation_is_fatal() {
        let h = harness(
            vec![
                stop("plan"),
                submit_turn(),
                stop("submitted"),
                stop("I could not decide"),
            ],
            1,
            false,
        );
        let err = h.orchestrator.run().await.unwrap_err();
        assert_eq!(err.to_string(), "failed to parse review manager output");
    }

    #[tokio::test]
    async fn test_cancelled_run_stops_before_any_agent() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let h = harness_with_cancellation(vec![stop("plan")], 1, false, cancel);

        let err = h.orchestrator.run().await.unwrap_err();
        assert!(matches!(
            err.root_cause().downcast_ref::<WorkError>(),
            Some(WorkError::Cancelled)
        ));
        assert!(h.forwarder.requests().is_empty());
    }

    #[tokio::test]
    async fn test_developer_can_start_helper_agents() {
        let invoke = Message::assistant()
            .with_tool_call(ToolCall::new(
                "c1",
                "invoke_agent",
                r#"{"name":"tester","system_prompt":"You write tests.","first_user_prompt":"Add a test for lib.rs"}"#,
            ))
            .with_finish_reason(FinishReason::ToolCalls);
        let h = harness(
            vec![stop("plan"), invoke, stop("added tests"), stop("done")],
            0,
            true,
        );

        h.orchestrator.run().await.unwrap();

        // planner, developer, helper, developer again
        let requests = h.forwarder.requests();
        assert_eq!(requests.len(), 4);
        assert_eq!(requests[2][0].text, "Add a test for lib.rs");
        let result = requests[3].last().unwrap();
        assert_eq!(result.role, Role::Tool);
        assert_eq!(result.text, "added tests");
    }
}
