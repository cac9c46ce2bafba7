//! Built-in tools and the run-scoped registry that exposes them to agents.
pub mod files;
pub mod guard;
pub mod invoke;
pub mod registry;
pub mod repository;
pub mod submit;

use std::path::PathBuf;
use std::sync::Arc;
use strum::IntoEnumIterator;
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};

use self::files::{ListFiles, ModifyFile, OpenFile, PutFile, RemoveFile, SearchFiles};
use self::guard::Workdir;
use self::invoke::InvokeAgent;
use self::registry::{ToolHandler, ToolRegistry, Typed};
use self::repository::{
    CreatePullRequestComment, CreatePullRequestReviewComment, GetIssue, GetPullRequest,
    GetRepositoryContent, RequestReviewers,
};
use crate::agent::AgentInvoker;
use self::submit::{SubmitFiles, SubmitRevision, SwitchBranch};
use crate::errors::AgentResult;
use crate::models::tool::Tool;
use crate::services::{BranchService, RepositoryService, SubmitFilesService, SubmitRevisionService};
use crate::store::Store;

/// Result text of a tool that succeeded without output of its own
pub const SUCCESS: &str = "tool use succeeded.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, AsRefStr, Display, EnumIter, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum FunctionName {
    OpenFile,
    ListFiles,
    PutFile,
    ModifyFile,
    RemoveFile,
    SearchFiles,
    SwitchBranch,
    SubmitFiles,
    SubmitRevision,
    GetIssue,
    GetPullRequest,
    GetRepositoryContent,
    CreatePullRequestComment,
    CreatePullRequestReviewComment,
    RequestReviewers,
    InvokeAgent,
}

impl FunctionName {
    pub fn all() -> Vec<FunctionName> {
        FunctionName::iter().collect()
    }

    /// Tools that only read, offered to the planner
    pub fn read_only() -> &'static [FunctionName] {
        &[
            FunctionName::OpenFile,
            FunctionName::ListFiles,
            FunctionName::SearchFiles,
            FunctionName::GetIssue,
            FunctionName::GetPullRequest,
            FunctionName::GetRepositoryContent,
        ]
    }

    /// Tools for reacting to a pull request comment, also given to the agents it starts
    pub fn react() -> &'static [FunctionName] {
        &[
            FunctionName::OpenFile,
            FunctionName::PutFile,
            FunctionName::ListFiles,
            FunctionName::RemoveFile,
            FunctionName::SearchFiles,
            FunctionName::GetPullRequest,
            FunctionName::SubmitRevision,
            FunctionName::GetIssue,
            FunctionName::CreatePullRequestComment,
            FunctionName::CreatePullRequestReviewComment,
            FunctionName::GetRepositoryContent,
        ]
    }

    /// Tools that push to the remote, dropped in no-submit mode
    pub fn pushes_to_remote(&self) -> bool {
        matches!(self, FunctionName::SubmitFiles | FunctionName::SubmitRevision)
    }

    pub fn tool(&self) -> Tool {
        match self {
            FunctionName::OpenFile => OpenFile::tool(),
            FunctionName::ListFiles => ListFiles::tool(),
            FunctionName::PutFile => PutFile::tool(),
            FunctionName::ModifyFile => ModifyFile::tool(),
            FunctionName::RemoveFile => RemoveFile::tool(),
            FunctionName::SearchFiles => SearchFiles::tool(),
            FunctionName::SwitchBranch => SwitchBranch::tool(),
            FunctionName::SubmitFiles => SubmitFiles::tool(),
            FunctionName::SubmitRevision => SubmitRevision::tool(),
            FunctionName::GetIssue => GetIssue::tool(),
            FunctionName::GetPullRequest => GetPullRequest::tool(),
            FunctionName::GetRepositoryContent => GetRepositoryContent::tool(),
            FunctionName::CreatePullRequestComment => CreatePullRequestComment::tool(),
            FunctionName::CreatePullRequestReviewComment => CreatePullRequestReviewComment::tool(),
            FunctionName::RequestReviewers => RequestReviewers::tool(),
            FunctionName::InvokeAgent => InvokeAgent::tool(),
        }
    }
}

/// The services tool handlers call into
#[derive(Clone)]
pub struct Collaborators {
    pub repository: Arc<dyn RepositoryService>,
    pub submit_files: Arc<dyn SubmitFilesService>,
    pub submit_revision: Arc<dyn SubmitRevisionService>,
    pub branches: Arc<dyn BranchService>,
}

#[derive(Debug, Clone)]
pub struct RegistryOptions {
    pub allow_functions: Vec<FunctionName>,
    pub no_submit: bool,
    pub workdir: PathBuf,
}

impl RegistryOptions {
    pub fn allow_all<P: Into<PathBuf>>(workdir: P) -> Self {
        Self {
            allow_functions: FunctionName::all(),
            no_submit: false,
            workdir: workdir.into(),
        }
    }
}

/// Build the registry for one run from the allow-list.
///
/// `invoke_agent` is left out: it needs the finished registry, see [`register_invoke_agent`].
pub fn build_registry(
    options: &RegistryOptions,
    collaborators: &Collaborators,
    store: Arc<Store>,
) -> AgentResult<ToolRegistry> {
    let workdir = Workdir::new(&options.workdir);
    let mut registry = ToolRegistry::new();

    for name in FunctionName::iter() {
        if !options.allow_functions.contains(&name) {
            continue;
        }
        if options.no_submit && name.pushes_to_remote() {
            continue;
        }

        let handler: Arc<dyn ToolHandler> = match name {
            FunctionName::OpenFile => Arc::new(Typed(OpenFile::new(workdir.clone()))),
            FunctionName::ListFiles => Arc::new(Typed(ListFiles::new(workdir.clone()))),
            FunctionName::PutFile => {
                Arc::new(Typed(PutFile::new(workdir.clone(), Arc::clone(&store))))
            }
            FunctionName::ModifyFile => {
                Arc::new(Typed(ModifyFile::new(workdir.clone(), Arc::clone(&store))))
            }
            FunctionName::RemoveFile => Arc::new(Typed(RemoveFile::new(workdir.clone()))),
            FunctionName::SearchFiles => Arc::new(Typed(SearchFiles::new(workdir.clone()))),
            FunctionName::SwitchBranch => Arc::new(Typed(SwitchBranch::new(Arc::clone(
                &collaborators.branches,
            )))),
            FunctionName::SubmitFiles => Arc::new(Typed(SubmitFiles::new(
                Arc::clone(&collaborators.submit_files),
                Arc::clone(&store),
            ))),
            FunctionName::SubmitRevision => Arc::new(Typed(SubmitRevision::new(Arc::clone(
                &collaborators.submit_revision,
            )))),
            FunctionName::GetIssue => Arc::new(Typed(GetIssue::new(Arc::clone(
                &collaborators.repository,
            )))),
            FunctionName::GetPullRequest => Arc::new(Typed(GetPullRequest::new(Arc::clone(
                &collaborators.repository,
            )))),
            FunctionName::GetRepositoryContent => Arc::new(Typed(GetRepositoryContent::new(
                Arc::clone(&collaborators.repository),
            ))),
            FunctionName::CreatePullRequestComment => Arc::new(Typed(
                CreatePullRequestComment::new(Arc::clone(&collaborators.repository)),
            )),
            FunctionName::CreatePullRequestReviewComment => Arc::new(Typed(
                CreatePullRequestReviewComment::new(Arc::clone(&collaborators.repository)),
            )),
            FunctionName::RequestReviewers => Arc::new(Typed(RequestReviewers::new(Arc::clone(
                &collaborators.repository,
            )))),
            FunctionName::InvokeAgent => continue,
        };
        registry.register(name.tool(), handler)?;
    }

    Ok(registry)
}

/// Add `invoke_agent` when the allow-list has it; started agents get `sub_agent_tools`
pub fn register_invoke_agent(
    registry: &mut ToolRegistry,
    allow_functions: &[FunctionName],
    invoker: AgentInvoker,
    sub_agent_tools: ToolRegistry,
) -> AgentResult<()> {
    if !allow_functions.contains(&FunctionName::InvokeAgent) {
        return Ok(());
    }
    registry.register(
        InvokeAgent::tool(),
        Arc::new(Typed(InvokeAgent::new(invoker, sub_agent_tools))),
    )
}

fn subset_of(registry: &ToolRegistry, names: &[FunctionName]) -> ToolRegistry {
    let names: Vec<&str> = names.iter().map(|name| name.as_ref()).collect();
    registry.subset(&names)
}

/// The comment reactor's catalog: the react part of a run registry
pub fn react_registry(registry: &ToolRegistry) -> ToolRegistry {
    subset_of(registry, FunctionName::react())
}

/// The planner's catalog: the read-only part of a run registry
pub fn read_only_registry(registry: &ToolRegistry) -> ToolRegistry {
    subset_of(registry, FunctionName::read_only())
}
