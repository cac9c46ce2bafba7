use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use super::registry::TypedTool;
use super::repository::service_error;
use super::{FunctionName, SUCCESS};
use crate::errors::AgentResult;
use crate::models::tool::Tool;
use crate::services::{
    BranchService, SubmitFilesInput, SubmitFilesService, SubmitRevisionInput,
    SubmitRevisionService,
};
use crate::store::{Store, SubmittedWork, LAST_SUBMISSION_KEY};

#[derive(Debug, Deserialize)]
pub struct SubmitFilesArgs {
    pub commit_message_short: String,
    #[serde(default)]
    pub commit_message_detail: String,
    pub pull_request_content: String,
}

pub struct SubmitFiles {
    service: Arc<dyn SubmitFilesService>,
    store: Arc<Store>,
}

impl SubmitFiles {
    pub fn new(service: Arc<dyn SubmitFilesService>, store: Arc<Store>) -> Self {
        Self { service, store }
    }

    pub fn tool() -> Tool {
        Tool::object(
            FunctionName::SubmitFiles.as_ref(),
            "Submit the modified files by creating a GitHub Pull Request",
            json!({
                "commit_message_short": {
                    "type": "string",
                    "description": "Short commit message indicating purpose to change the file"
                },
                "commit_message_detail": {
                    "type": "string",
                    "description": "Detail commit message indicating changes to the file"
                },
                "pull_request_content": {"type": "string", "description": "Pull Request Content"}
            }),
            &["commit_message_short", "pull_request_content"],
        )
    }
}

#[async_trait]
impl TypedTool for SubmitFiles {
    type Input = SubmitFilesArgs;

    async fn run(&self, input: SubmitFilesArgs) -> AgentResult<String> {
        let out = self
            .service
            .submit_files(&SubmitFilesInput {
                commit_message_short: input.commit_message_short,
                commit_message_detail: input.commit_message_detail,
                pull_request_content: input.pull_request_content,
            })
            .await
            .map_err(service_error)?;

        info!(
            branch = %out.pushed_branch,
            pr_number = out.pull_request_number,
            "submitted files"
        );
        self.store.put_submission(
            LAST_SUBMISSION_KEY,
            SubmittedWork {
                branch: out.pushed_branch,
                pr_number: out.pull_request_number,
            },
        );

        Ok(format!("{}\n{}\n", SUCCESS, out.message))
    }
}

#[derive(Debug, Deserialize)]
pub struct SubmitRevisionArgs {
    pub commit_message_short: String,
    #[serde(default)]
    pub commit_message_detail: String,
}

pub struct SubmitRevision {
    service: Arc<dyn SubmitRevisionService>,
}

impl SubmitRevision {
    pub fn new(service: Arc<dyn SubmitRevisionService>) -> Self {
        Self { service }
    }

    pub fn tool() -> Tool {
        Tool::object(
            FunctionName::SubmitRevision.as_ref(),
            "Submit revision commits changed files using git add and git commit, finally git push on working branch.",
            json!({
                "commit_message_short": {
                    "type": "string",
                    "description": "Short commit message indicating purpose to resubmit"
                },
                "commit_message_detail": {
                    "type": "string",
                    "description": "Detail commit message indicating resubmitting content"
                }
            }),
            &["commit_message_short"],
        )
    }
}

#[async_trait]
impl TypedTool for SubmitRevision {
    type Input = SubmitRevisionArgs;

    async fn run(&self, input: SubmitRevisionArgs) -> AgentResult<String> {
        let out = self
            .service
            .submit_revision(&SubmitRevisionInput {
                commit_message_short: input.commit_message_short,
                commit_message_detail: input.commit_message_detail,
            })
            .await
            .map_err(service_error)?;
        Ok(out.message)
    }
}

#[derive(Debug, Deserialize)]
pub struct SwitchBranchArgs {
    pub branch_name: String,
}

pub struct SwitchBranch {
    service: Arc<dyn BranchService>,
}

impl SwitchBranch {
    pub fn new(service: Arc<dyn BranchService>) -> Self {
        Self { service }
    }

    pub fn tool() -> Tool {
        Tool::object(
            FunctionName::SwitchBranch.as_ref(),
            "Switch to the git branch, creating it when it does not exist",
            json!({
                "branch_name": {"type": "string", "description": "Name of the branch to switch to"}
            }),
            &["branch_name"],
        )
    }
}

#[async_trait]
impl TypedTool for SwitchBranch {
    type Input = SwitchBranchArgs;

    async fn run(&self, input: SwitchBranchArgs) -> AgentResult<String> {
        let report = self
            .service
            .switch_branch(&input.branch_name)
            .await
            .map_err(service_error)?;
        Ok(format!("{}\n{}\n", SUCCESS, report))
    }
}
