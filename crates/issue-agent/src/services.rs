//! Interfaces of the external collaborators the tools and the orchestrator call into.
//!
//! Concrete implementations live in [`crate::github`] and [`crate::git`]; tests substitute
//! in-memory fakes.
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub number: String,
    pub title: String,
    pub content: String,
}

impl Issue {
    pub fn to_llm_string(&self) -> String {
        format!(
            "# Issue Number\n{}\n\n# Title:\n{}\n\n# Content:\n{}\n",
            self.number, self.title, self.content
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: String,
    pub head: String,
    pub base: String,
    pub title: String,
    pub content: String,
    pub raw_diff: String,
}

impl PullRequest {
    /// Head and base are the same branch, so there is nothing to push to
    pub fn merges_into_itself(&self) -> bool {
        self.head == self.base
    }

    pub fn to_llm_string(&self) -> String {
        format!(
            "<pr-number>\n{}\n</pr-number>\n\n\
             <pull-request-title>\n{}\n</pull-request-title>\n\n\
             <pull-request-description>\n{}\n</pull-request-description>\n\n\
             <pull-request-diff>\n{}\n</pull-request-diff>\n",
            self.number, self.title, self.content, self.raw_diff
        )
    }
}

/// A conversation comment on an issue or pull request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    /// For comments on a pull request this is the pull request number
    pub issue_number: String,
    pub content: String,
}

/// A review comment anchored to lines of a pull request file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewComment {
    pub pr_number: String,
    pub path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub content: String,
}

impl ReviewComment {
    pub fn to_llm_string(&self) -> String {
        format!(
            "The following file information received a code review.\n\n\
             # Review information\n\
             * Review file path: {}\n\
             * Review start line number: {}\n\
             * Review end line number: {}\n\n\
             # Review content\n{}\n",
            self.path, self.start_line, self.end_line, self.content
        )
    }

    /// Seen as a plain comment on its pull request
    pub fn into_comment(self) -> Comment {
        Comment {
            content: self.to_llm_string(),
            issue_number: self.pr_number,
        }
    }
}

/// A single line-anchored comment on a pull request file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewCommentInput {
    pub pr_number: String,
    pub path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub body: String,
}

/// One comment of a batched review, already shaped for the review platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftReviewComment {
    pub path: String,
    pub body: String,
    /// Omitted for single-line comments
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_line: Option<u32>,
    pub line: u32,
    pub side: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitFilesInput {
    pub commit_message_short: String,
    pub commit_message_detail: String,
    pub pull_request_content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitFilesOutput {
    pub message: String,
    pub pushed_branch: String,
    pub pull_request_number: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitRevisionInput {
    pub commit_message_short: String,
    pub commit_message_detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitRevisionOutput {
    pub message: String,
}

/// The code hosting platform: issues, pull requests, repository content and reviews
#[async_trait]
pub trait RepositoryService: Send + Sync {
    async fn get_issue(&self, repository: &str, number: &str) -> Result<Issue>;

    async fn get_pull_request(&self, number: &str) -> Result<PullRequest>;

    async fn get_repository_content(&self, repository: &str, path: &str) -> Result<String>;

    async fn create_issue_comment(&self, number: &str, body: &str) -> Result<()>;

    async fn create_review_comment(&self, input: &ReviewCommentInput) -> Result<()>;

    /// Submit a batch of comments as one review with the `COMMENT` event
    async fn create_review(&self, pr_number: u64, comments: &[DraftReviewComment]) -> Result<()>;

    /// Fails when the branch does not exist
    async fn get_branch(&self, name: &str) -> Result<()>;

    async fn get_comment(&self, id: &str) -> Result<Comment>;

    async fn get_review_comment(&self, id: &str) -> Result<ReviewComment>;

    /// Ask members (by login) and teams (by slug) to review a pull request
    async fn request_reviewers(
        &self,
        pr_number: u64,
        reviewers: &[String],
        team_reviewers: &[String],
    ) -> Result<()>;
}

/// Commits the working tree, pushes it and opens a pull request
#[async_trait]
pub trait SubmitFilesService: Send + Sync {
    async fn submit_files(&self, input: &SubmitFilesInput) -> Result<SubmitFilesOutput>;
}

/// Commits the working tree and pushes it to the branch already checked out
#[async_trait]
pub trait SubmitRevisionService: Send + Sync {
    async fn submit_revision(&self, input: &SubmitRevisionInput) -> Result<SubmitRevisionOutput>;
}

#[async_trait]
pub trait BranchService: Send + Sync {
    /// Check out the branch, returning the tool's report
    async fn switch_branch(&self, name: &str) -> Result<String>;
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_to_llm_string() {
        let issue = Issue {
            number: "7".into(),
            title: "Crash on start".into(),
            content: "It crashes.".into(),
        };
        assert_eq!(
            issue.to_llm_string(),
            "# Issue Number\n7\n\n# Title:\nCrash on start\n\n# Content:\nIt crashes.\n"
        );
    }

    #[test]
    fn test_review_comment_becomes_plain_comment() {
        let comment = ReviewComment {
            pr_number: "12".into(),
            path: "src/lib.rs".into(),
            start_line: 3,
            end_line: 5,
            content: "inline this".into(),
        }
        .into_comment();
        assert_eq!(comment.issue_number, "12");
        assert_eq!(
            comment.content,
            "The following file information received a code review.\n\n\
             # Review information\n\
             * Review file path: src/lib.rs\n\
             * Review start line number: 3\n\
             * Review end line number: 5\n\n\
             # Review content\ninline this\n"
        );
    }

    #[test]
    fn test_single_line_comment_omits_start_line() {
        let comment = DraftReviewComment {
            path: "src/lib.rs".into(),
            body: "nit".into(),
            start_line: None,
            line: 3,
            side: "RIGHT".into(),
        };
        let value = serde_json::to_value(&comment).unwrap();
        assert!(value.get("start_line").is_none());
        assert_eq!(value["line"], 3);
    }
}
