use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::{json, Value};
use std::env;
use std::time::Duration;
use tracing::{debug, info};

use crate::services::{
    Comment, DraftReviewComment, Issue, PullRequest, RepositoryService, ReviewComment,
    ReviewCommentInput,
};

pub const GITHUB_DEFAULT_API_URL: &str = "https://api.github.com";
const GITHUB_API_VERSION: &str = "2022-11-28";
const JSON_MEDIA_TYPE: &str = "application/vnd.github+json";

#[derive(Debug, Clone)]
pub struct GitHubConfig {
    pub api_url: String,
    pub token: String,
    pub owner: String,
    pub repository: String,
}

impl GitHubConfig {
    /// Read `GITHUB_TOKEN` and the optional `GITHUB_API_URL`
    pub fn from_env(owner: &str, repository: &str) -> Result<Self> {
        let token = env::var("GITHUB_TOKEN")
            .ok()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| anyhow!("GITHUB_TOKEN is not set"))?;
        Ok(Self {
            api_url: env::var("GITHUB_API_URL").unwrap_or_else(|_| GITHUB_DEFAULT_API_URL.into()),
            token,
            owner: owner.to_string(),
            repository: repository.to_string(),
        })
    }
}

#[derive(Deserialize)]
struct GitRef {
    #[serde(rename = "ref")]
    name: String,
    sha: String,
}

#[derive(Deserialize)]
struct PullRequestResponse {
    number: u64,
    title: String,
    body: Option<String>,
    head: GitRef,
    base: GitRef,
}

#[derive(Deserialize)]
struct IssueResponse {
    number: u64,
    title: String,
    body: Option<String>,
}

#[derive(Deserialize)]
struct IssueCommentResponse {
    issue_url: String,
    body: Option<String>,
}

#[derive(Deserialize)]
struct ReviewCommentResponse {
    pull_request_url: String,
    path: String,
    original_start_line: Option<u32>,
    original_line: Option<u32>,
    body: Option<String>,
}

/// The number at the end of an issue or pull request API URL
fn trailing_number(url: &str) -> Result<String> {
    url.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
        .map(str::to_string)
        .ok_or_else(|| anyhow!("no issue number in {}", url))
}

fn parse_id(id: &str) -> Result<u64> {
    id.parse()
        .map_err(|_| anyhow!("invalid comment id {}", id))
}

/// REST client for one GitHub repository
pub struct GitHubClient {
    client: Client,
    config: GitHubConfig,
}

impl GitHubClient {
    pub fn new(config: GitHubConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600)) // 10 minutes timeout
            .user_agent("issue-agent")
            .build()?;

        Ok(Self { client, config })
    }

    pub fn owner(&self) -> &str {
        &self.config.owner
    }

    pub fn repository(&self) -> &str {
        &self.config.repository
    }

    fn repo_url(&self, repository: &str, path: &str) -> String {
        format!(
            "{}/repos/{}/{}/{}",
            self.config.api_url.trim_end_matches('/'),
            self.config.owner,
            repository,
            path
        )
    }

    fn request(&self, method: reqwest::Method, url: &str, accept: &str) -> RequestBuilder {
        self.client
            .request(method, url)
            .bearer_auth(&self.config.token)
            .header("Accept", accept)
            .header("X-GitHub-Api-Version", GITHUB_API_VERSION)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(anyhow!("GitHub API error {}: {}", status, body))
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: &str) -> Result<T> {
        let response = self.send(self.request(reqwest::Method::GET, url, JSON_MEDIA_TYPE)).await?;
        Ok(response.json().await?)
    }

    async fn post_json(&self, url: &str, payload: &Value) -> Result<Value> {
        debug!(%url, "github post");
        let response = self
            .send(self.request(reqwest::Method::POST, url, JSON_MEDIA_TYPE).json(payload))
            .await?;
        Ok(response.json().await?)
    }

    async fn fetch_pull_request(&self, number: &str) -> Result<PullRequestResponse> {
        let url = self.repo_url(&self.config.repository, &format!("pulls/{}", number));
        self.get_json(&url)
            .await
            .with_context(|| format!("failed to get pull request #{}", number))
    }

    /// Open a pull request and return its number
    pub async fn create_pull_request(
        &self,
        head: &str,
        base: &str,
        title: &str,
        body: &str,
    ) -> Result<u64> {
        let url = self.repo_url(&self.config.repository, "pulls");
        let created = self
            .post_json(
                &url,
                &json!({"title": title, "head": head, "base": base, "body": body}),
            )
            .await
            .context("failed to create pull request")?;
        let number = created["number"]
            .as_u64()
            .ok_or_else(|| anyhow!("pull request response has no number"))?;
        info!(number, %head, %base, "pull request created");
        Ok(number)
    }

    pub async fn add_labels(&self, number: u64, labels: &[String]) -> Result<()> {
        if labels.is_empty() {
            return Ok(());
        }
        let url = self.repo_url(&self.config.repository, &format!("issues/{}/labels", number));
        self.post_json(&url, &json!({ "labels": labels }))
            .await
            .context("failed to add labels")?;
        Ok(())
    }
}

#[async_trait]
impl RepositoryService for GitHubClient {
    async fn get_issue(&self, repository: &str, number: &str) -> Result<Issue> {
        let url = self.repo_url(repository, &format!("issues/{}", number));
        let issue: IssueResponse = self
            .get_json(&url)
            .await
            .with_context(|| format!("failed to get issue #{}", number))?;
        Ok(Issue {
            number: issue.number.to_string(),
            title: issue.title,
            content: issue.body.unwrap_or_default(),
        })
    }

    async fn get_pull_request(&self, number: &str) -> Result<PullRequest> {
        let pr = self.fetch_pull_request(number).await?;

        let url = self.repo_url(&self.config.repository, &format!("pulls/{}", number));
        let diff = self
            .send(
                self.request(reqwest::Method::GET, &url, "application/vnd.github.diff"),
            )
            .await?
            .text()
            .await?;

        Ok(PullRequest {
            number: pr.number.to_string(),
            head: pr.head.name,
            base: pr.base.name,
            title: pr.title,
            content: pr.body.unwrap_or_default(),
            raw_diff: diff,
        })
    }

    async fn get_repository_content(&self, repository: &str, path: &str) -> Result<String> {
        let url = self.repo_url(repository, &format!("contents/{}", path.trim_start_matches('/')));
        let response = self
            .send(
                self.request(reqwest::Method::GET, &url, "application/vnd.github.raw+json"),
            )
            .await
            .with_context(|| format!("failed to get {} from {}", path, repository))?;
        Ok(response.text().await?)
    }

    async fn create_issue_comment(&self, number: &str, body: &str) -> Result<()> {
        let url = self.repo_url(&self.config.repository, &format!("issues/{}/comments", number));
        self.post_json(&url, &json!({ "body": body }))
            .await
            .context("failed to create comment")?;
        Ok(())
    }

    async fn create_review_comment(&self, input: &ReviewCommentInput) -> Result<()> {
        let pr = self.fetch_pull_request(&input.pr_number).await?;
        let mut payload = json!({
            "body": input.body,
            "commit_id": pr.head.sha,
            "path": input.path,
            "line": input.end_line,
            "side": "RIGHT",
        });
        if input.start_line < input.end_line {
            payload["start_line"] = json!(input.start_line);
            payload["start_side"] = json!("RIGHT");
        }

        let url = self.repo_url(
            &self.config.repository,
            &format!("pulls/{}/comments", input.pr_number),
        );
        self.post_json(&url, &payload)
            .await
            .context("failed to create review comment")?;
        Ok(())
    }

    async fn create_review(&self, pr_number: u64, comments: &[DraftReviewComment]) -> Result<()> {
        let url = self.repo_url(&self.config.repository, &format!("pulls/{}/reviews", pr_number));
        self.post_json(&url, &json!({"event": "COMMENT", "comments": comments}))
            .await
            .with_context(|| format!("failed to submit review on #{}", pr_number))?;
        Ok(())
    }

    async fn get_branch(&self, name: &str) -> Result<()> {
        let url = self.repo_url(&self.config.repository, &format!("branches/{}", name));
        self.get_json::<Value>(&url)
            .await
            .with_context(|| format!("branch {} is not found", name))?;
        Ok(())
    }

    async fn get_comment(&self, id: &str) -> Result<Comment> {
        let url = self.repo_url(&self.config.repository, &format!("issues/comments/{}", parse_id(id)?));
        let comment: IssueCommentResponse = self
            .get_json(&url)
            .await
            .with_context(|| format!("failed to get comment {}", id))?;
        Ok(Comment {
            issue_number: trailing_number(&comment.issue_url)?,
            content: comment.body.unwrap_or_default(),
        })
    }

    async fn get_review_comment(&self, id: &str) -> Result<ReviewComment> {
        let url = self.repo_url(&self.config.repository, &format!("pulls/comments/{}", parse_id(id)?));
        let comment: ReviewCommentResponse = self
            .get_json(&url)
            .await
            .with_context(|| format!("failed to get review comment {}", id))?;

        let end_line = comment.original_line.unwrap_or_default();
        Ok(ReviewComment {
            pr_number: trailing_number(&comment.pull_request_url)?,
            path: comment.path,
            start_line: comment.original_start_line.unwrap_or(end_line),
            end_line,
            content: comment.body.unwrap_or_default(),
        })
    }

    async fn request_reviewers(
        &self,
        pr_number: u64,
        reviewers: &[String],
        team_reviewers: &[String],
    ) -> Result<()> {
        let url = self.repo_url(
            &self.config.repository,
            &format!("pulls/{}/requested_reviewers", pr_number),
        );
        self.post_json(
            &url,
            &json!({"reviewers": reviewers, "team_reviewers": team_reviewers}),
        )
        .await
        .with_context(|| {
            format!(
                "failed to request reviewers={:?}, team_reviewers={:?} on #{}",
                reviewers, team_reviewers, pr_number
            )
        })?;
        info!(pr_number, ?reviewers, ?team_reviewers, "reviewers requested");
        Ok(())
    }
}
