use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use super::registry::TypedTool;
use super::FunctionName;
use crate::errors::{AgentError, AgentResult};
use crate::models::tool::Tool;
use crate::services::{RepositoryService, ReviewCommentInput};

pub(crate) fn service_error(err: anyhow::Error) -> AgentError {
    AgentError::ExecutionError(format!("{:#}", err))
}

#[derive(Debug, Deserialize)]
pub struct GetIssueInput {
    pub repository_name: String,
    pub issue_number: String,
}

pub struct GetIssue {
    service: Arc<dyn RepositoryService>,
}

impl GetIssue {
    pub fn new(service: Arc<dyn RepositoryService>) -> Self {
        Self { service }
    }

    pub fn tool() -> Tool {
        Tool::object(
            FunctionName::GetIssue.as_ref(),
            "Get a GitHub issue from the repository owner passed as CLI input.",
            json!({
                "repository_name": {
                    "type": "string",
                    "description": "GitHub repository name to get the issue from. The `repo` part of the `owner/repo` format."
                },
                "issue_number": {"type": "string", "description": "GitHub Issue Number to get"}
            }),
            &["repository_name", "issue_number"],
        )
    }
}

#[async_trait]
impl TypedTool for GetIssue {
    type Input = GetIssueInput;

    async fn run(&self, input: GetIssueInput) -> AgentResult<String> {
        let issue = self
            .service
            .get_issue(&input.repository_name, &input.issue_number)
            .await
            .map_err(service_error)?;
        Ok(issue.to_llm_string())
    }
}

#[derive(Debug, Deserialize)]
pub struct GetPullRequestInput {
    pub pr_number: String,
}

pub struct GetPullRequest {
    service: Arc<dyn RepositoryService>,
}

impl GetPullRequest {
    pub fn new(service: Arc<dyn RepositoryService>) -> Self {
        Self { service }
    }

    pub fn tool() -> Tool {
        Tool::object(
            FunctionName::GetPullRequest.as_ref(),
            "Get a GitHub Pull Request with its diff",
            json!({
                "pr_number": {"type": "string", "description": "Pull Request Number to get"}
            }),
            &["pr_number"],
        )
    }
}

#[async_trait]
impl TypedTool for GetPullRequest {
    type Input = GetPullRequestInput;

    async fn run(&self, input: GetPullRequestInput) -> AgentResult<String> {
        let pr = self
            .service
            .get_pull_request(&input.pr_number)
            .await
            .map_err(service_error)?;
        Ok(pr.to_llm_string())
    }
}

#[derive(Debug, Deserialize)]
pub struct GetRepositoryContentInput {
    pub repository_name: String,
    pub path: String,
}

pub struct GetRepositoryContent {
    service: Arc<dyn RepositoryService>,
}

impl GetRepositoryContent {
    pub fn new(service: Arc<dyn RepositoryService>) -> Self {
        Self { service }
    }

    pub fn tool() -> Tool {
        Tool::object(
            FunctionName::GetRepositoryContent.as_ref(),
            "Get contents of a file or directory in a GitHub repository.",
            json!({
                "repository_name": {
                    "type": "string",
                    "description": "GitHub repository name to get the content. This is `repo` part of the `owner/repo` format."
                },
                "path": {"type": "string", "description": "File path from repository root."}
            }),
            &["repository_name", "path"],
        )
    }
}

#[async_trait]
impl TypedTool for GetRepositoryContent {
    type Input = GetRepositoryContentInput;

    async fn run(&self, input: GetRepositoryContentInput) -> AgentResult<String> {
        self.service
            .get_repository_content(&input.repository_name, &input.path)
            .await
            .map_err(service_error)
    }
}

#[derive(Debug, Deserialize)]
pub struct CreatePullRequestCommentInput {
    pub pr_number: String,
    pub comment: String,
}

pub struct CreatePullRequestComment {
    service: Arc<dyn RepositoryService>,
}

impl CreatePullRequestComment {
    pub fn new(service: Arc<dyn RepositoryService>) -> Self {
        Self { service }
    }

    pub fn tool() -> Tool {
        Tool::object(
            FunctionName::CreatePullRequestComment.as_ref(),
            "Create a comment on a GitHub pull request.",
            json!({
                "pr_number": {
                    "type": "string",
                    "description": "GitHub Pull Request Number to create comment to"
                },
                "comment": {"type": "string", "description": "Comment body in markdown"}
            }),
            &["pr_number", "comment"],
        )
    }
}

#[async_trait]
impl TypedTool for CreatePullRequestComment {
    type Input = CreatePullRequestCommentInput;

    async fn run(&self, input: CreatePullRequestCommentInput) -> AgentResult<String> {
        self.service
            .create_issue_comment(&input.pr_number, &input.comment)
            .await
            .map_err(service_error)?;
        Ok("success creating pull request comment.".to_string())
    }
}

#[derive(Debug, Deserialize)]
pub struct CreatePullRequestReviewCommentInput {
    pub pr_number: String,
    pub review_file_path: String,
    pub review_start_line: u32,
    pub review_end_line: u32,
    pub review_comment: String,
}

pub struct CreatePullRequestReviewComment {
    service: Arc<dyn RepositoryService>,
}

impl CreatePullRequestReviewComment {
    pub fn new(service: Arc<dyn RepositoryService>) -> Self {
        Self { service }
    }

    pub fn tool() -> Tool {
        Tool::object(
            FunctionName::CreatePullRequestReviewComment.as_ref(),
            "Create a review comment on a GitHub pull request for a specific file and line range.",
            json!({
                "pr_number": {
                    "type": "string",
                    "description": "GitHub Pull Request Number to create comment to"
                },
                "review_file_path": {
                    "type": "string",
                    "description": "File path from repository root for review"
                },
                "review_start_line": {
                    "type": "number",
                    "description": "Review start line number on file",
                    "minimum": 1
                },
                "review_end_line": {
                    "type": "number",
                    "description": "Review end line number on file",
                    "minimum": 1
                },
                "review_comment": {
                    "type": "string",
                    "description": "Comment to be added to the pull request review"
                }
            }),
            &[
                "pr_number",
                "review_file_path",
                "review_start_line",
                "review_end_line",
                "review_comment",
            ],
        )
    }
}

#[async_trait]
impl TypedTool for CreatePullRequestReviewComment {
    type Input = CreatePullRequestReviewCommentInput;

    async fn run(&self, input: CreatePullRequestReviewCommentInput) -> AgentResult<String> {
        if input.review_end_line < input.review_start_line {
            return Err(AgentError::InvalidParameters(format!(
                "review_end_line {} is before review_start_line {}",
                input.review_end_line, input.review_start_line
            )));
        }

        self.service
            .create_review_comment(&ReviewCommentInput {
                pr_number: input.pr_number,
                path: input.review_file_path,
                start_line: input.review_start_line.max(1),
                end_line: input.review_end_line.max(1),
                body: input.review_comment,
            })
            .await
            .map_err(service_error)?;
        Ok("success creating pull request review comment.".to_string())
    }
}

#[derive(Debug, Deserialize)]
pub struct RequestReviewersInput {
    pub pr_number: u64,
    #[serde(default)]
    pub member_reviewers: Vec<String>,
    #[serde(default)]
    pub team_reviewers: Vec<String>,
}

pub struct RequestReviewers {
    service: Arc<dyn RepositoryService>,
}

impl RequestReviewers {
    pub fn new(service: Arc<dyn RepositoryService>) -> Self {
        Self { service }
    }

    pub fn tool() -> Tool {
        Tool::object(
            FunctionName::RequestReviewers.as_ref(),
            "Request reviewers for a GitHub pull request.",
            json!({
                "pr_number": {
                    "type": "number",
                    "description": "GitHub Pull Request Number to request reviewers for."
                },
                "member_reviewers": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "List of member `login`s to request on the pull request."
                },
                "team_reviewers": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "List of team `slug`s to request on the pull request."
                }
            }),
            &["pr_number"],
        )
    }
}

#[async_trait]
impl TypedTool for RequestReviewers {
    type Input = RequestReviewersInput;

    async fn run(&self, input: RequestReviewersInput) -> AgentResult<String> {
        if input.member_reviewers.is_empty() && input.team_reviewers.is_empty() {
            return Err(AgentError::InvalidParameters(
                "at least one of member_reviewers or team_reviewers is required".to_string(),
            ));
        }
        self.service
            .request_reviewers(input.pr_number, &input.member_reviewers, &input.team_reviewers)
            .await
            .map_err(service_error)?;
        Ok("success requesting reviewers for pull request.".to_string())
    }
}
