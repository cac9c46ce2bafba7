use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

use super::guard::Workdir;
use super::registry::TypedTool;
use super::{FunctionName, SUCCESS};
use crate::errors::{AgentError, AgentResult};
use crate::models::tool::Tool;
use crate::store::{File, Store};

const DEFAULT_LIST_DEPTH: u32 = 2;
const MAX_LIST_DEPTH: u32 = 3;

fn execution_error<E: std::fmt::Display>(
    context: &'static str,
    path: &str,
) -> impl FnOnce(E) -> AgentError {
    let path = path.to_string();
    move |e| AgentError::ExecutionError(format!("{} {}: {}", context, path, e))
}

#[derive(Debug, Deserialize)]
pub struct PathInput {
    pub path: String,
}

pub struct OpenFile {
    workdir: Workdir,
}

impl OpenFile {
    pub fn new(workdir: Workdir) -> Self {
        Self { workdir }
    }

    pub fn tool() -> Tool {
        Tool::object(
            FunctionName::OpenFile.as_ref(),
            "Open the file full content",
            json!({
                "path": {"type": "string", "description": "The path of the file to open"}
            }),
            &["path"],
        )
    }
}

#[async_trait]
impl TypedTool for OpenFile {
    type Input = PathInput;

    async fn run(&self, input: PathInput) -> AgentResult<String> {
        let path = self.workdir.resolve(&input.path)?;
        tokio::fs::read_to_string(&path)
            .await
            .map_err(execution_error("failed to open", &input.path))
    }
}

#[derive(Debug, Deserialize)]
pub struct ListFilesInput {
    pub path: String,
    #[serde(default)]
    pub depth: Option<u32>,
}

pub struct ListFiles {
    workdir: Workdir,
}

impl ListFiles {
    pub fn new(workdir: Workdir) -> Self {
        Self { workdir }
    }

    pub fn tool() -> Tool {
        Tool::object(
            FunctionName::ListFiles.as_ref(),
            "List the files within the directory like Unix ls command. \
             Each line contains the file kind, byte size, and name. \
             If you want to list subdirectories recursively, use the depth option.",
            json!({
                "path": {
                    "type": "string",
                    "description": "The valid path to list within its directory"
                },
                "depth": {
                    "type": "number",
                    "description": "The depth of the directory to list subdirectory recursively. Default is 2",
                    "minimum": 1,
                    "default": DEFAULT_LIST_DEPTH,
                    "maximum": MAX_LIST_DEPTH
                }
            }),
            &["path"],
        )
    }
}

fn list_recursive(dir: &Path, depth: u32, max_depth: u32, prefix: &str) -> std::io::Result<Vec<String>> {
    let mut entries: Vec<_> = fs::read_dir(dir)?.collect::<Result<_, _>>()?;
    entries.sort_by_key(|e| e.file_name());

    let mut lines = Vec::new();
    for entry in entries {
        let name = entry.file_name().to_string_lossy().to_string();
        if name == ".git" {
            continue;
        }
        let full_name = if prefix.is_empty() {
            name
        } else {
            format!("{}/{}", prefix, name)
        };

        // symlink_metadata so links are reported as links and never followed
        let metadata = fs::symlink_metadata(entry.path())?;
        let file_type = metadata.file_type();
        let kind = if file_type.is_symlink() {
            "symlink"
        } else if file_type.is_dir() {
            "dir"
        } else {
            "file"
        };
        lines.push(format!("{} {} {}", kind, metadata.len(), full_name));

        if file_type.is_dir() && depth < max_depth {
            lines.extend(list_recursive(&entry.path(), depth + 1, max_depth, &full_name)?);
        }
    }
    Ok(lines)
}

#[async_trait]
impl TypedTool for ListFiles {
    type Input = ListFilesInput;

    async fn run(&self, input: ListFilesInput) -> AgentResult<String> {
        let dir = self.workdir.resolve(&input.path)?;
        if !dir.exists() {
            return Err(AgentError::ExecutionError(format!(
                "{} does not exist",
                input.path
            )));
        }

        let depth = input
            .depth
            .unwrap_or(DEFAULT_LIST_DEPTH)
            .clamp(1, MAX_LIST_DEPTH);
        let lines = tokio::task::spawn_blocking(move || list_recursive(&dir, 1, depth, ""))
            .await
            .map_err(|e| AgentError::Internal(format!("directory listing panicked: {}", e)))?
            .map_err(execution_error("can't read directory at", &input.path))?;
        Ok(lines.join("\n"))
    }
}

#[derive(Debug, Deserialize)]
pub struct PutFileInput {
    pub path: String,
    pub content_text: String,
}

pub struct PutFile {
    workdir: Workdir,
    store: Arc<Store>,
}

impl PutFile {
    pub fn new(workdir: Workdir, store: Arc<Store>) -> Self {
        Self { workdir, store }
    }

    pub fn tool() -> Tool {
        Tool::object(
            FunctionName::PutFile.as_ref(),
            "Put new file content to path",
            json!({
                "path": {
                    "type": "string",
                    "description": "Path of the file to be changed to the new content"
                },
                "content_text": {
                    "type": "string",
                    "description": "The new content of the file"
                }
            }),
            &["path", "content_text"],
        )
    }
}

#[async_trait]
impl TypedTool for PutFile {
    type Input = PutFileInput;

    async fn run(&self, input: PutFileInput) -> AgentResult<String> {
        let path = self.workdir.resolve(&input.path)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(execution_error("mkdir all error for", &input.path))?;
        }

        let mut content = input.content_text;
        if !content.is_empty() && !content.ends_with('\n') {
            content.push('\n');
        }

        tokio::fs::write(&path, &content)
            .await
            .map_err(execution_error("putting", &input.path))?;

        self.store.add_changed_file(File {
            path: input.path,
            content,
        });
        Ok(SUCCESS.to_string())
    }
}

#[derive(Debug, Deserialize)]
pub struct ModifyFileInput {
    pub path: String,
    pub original_text: String,
    pub new_text: String,
}

pub struct ModifyFile {
    workdir: Workdir,
    store: Arc<Store>,
}

impl ModifyFile {
    pub fn new(workdir: Workdir, store: Arc<Store>) -> Self {
        Self { workdir, store }
    }

    pub fn tool() -> Tool {
        Tool::object(
            FunctionName::ModifyFile.as_ref(),
            "Replace a unique piece of text in an existing file. \
             original_text must appear exactly once in the file.",
            json!({
                "path": {"type": "string", "description": "Path of the file to modify"},
                "original_text": {
                    "type": "string",
                    "description": "The exact text to replace, including whitespace"
                },
                "new_text": {"type": "string", "description": "The replacement text"}
            }),
            &["path", "original_text", "new_text"],
        )
    }
}

#[async_trait]
impl TypedTool for ModifyFile {
    type Input = ModifyFileInput;

    async fn run(&self, input: ModifyFileInput) -> AgentResult<String> {
        let path = self.workdir.resolve(&input.path)?;
        let current = tokio::fs::read_to_string(&path)
            .await
            .map_err(execution_error("failed to open", &input.path))?;

        if input.original_text.is_empty() {
            return Err(AgentError::InvalidParameters(
                "original_text must not be empty".into(),
            ));
        }
        match current.matches(&input.original_text).count() {
            0 => {
                return Err(AgentError::ExecutionError(format!(
                    "original_text was not found in {}",
                    input.path
                )))
            }
            1 => {}
            n => {
                return Err(AgentError::ExecutionError(format!(
                    "original_text appears {} times in {}, it must be unique",
                    n, input.path
                )))
            }
        }

        let content = current.replacen(&input.original_text, &input.new_text, 1);
        tokio::fs::write(&path, &content)
            .await
            .map_err(execution_error("writing", &input.path))?;

        self.store.add_changed_file(File {
            path: input.path,
            content,
        });
        Ok(SUCCESS.to_string())
    }
}

pub struct RemoveFile {
    workdir: Workdir,
}

impl RemoveFile {
    pub fn new(workdir: Workdir) -> Self {
        Self { workdir }
    }

    pub fn tool() -> Tool {
        Tool::object(
            FunctionName::RemoveFile.as_ref(),
            "Remove a file specified by the path",
            json!({
                "path": {"type": "string", "description": "The path of the file to remove"}
            }),
            &["path"],
        )
    }
}

#[async_trait]
impl TypedTool for RemoveFile {
    type Input = PathInput;

    async fn run(&self, input: PathInput) -> AgentResult<String> {
        let path = self.workdir.resolve(&input.path)?;
        tokio::fs::remove_file(&path)
            .await
            .map_err(execution_error("failed to remove", &input.path))?;
        Ok(SUCCESS.to_string())
    }
}

#[derive(Debug, Deserialize)]
pub struct SearchFilesInput {
    pub keyword: String,
    pub path: String,
}

pub struct SearchFiles {
    workdir: Workdir,
}

impl SearchFiles {
    pub fn new(workdir: Workdir) -> Self {
        Self { workdir }
    }

    pub fn tool() -> Tool {
        Tool::object(
            FunctionName::SearchFiles.as_ref(),
            "Search for files containing specific keyword (e.g., \"xxx\") within a directory path recursively",
            json!({
                "keyword": {"type": "string", "description": "The keyword to search for."},
                "path": {"type": "string", "description": "The path to search within its directory"}
            }),
            &["keyword", "path"],
        )
    }
}

/// Entries that cannot be read are logged and skipped; only an unreadable `dir` itself fails
fn search_recursive(dir: &Path, root: &Path, keyword: &str, found: &mut Vec<String>) -> std::io::Result<()> {
    let mut entries: Vec<_> = fs::read_dir(dir)?.collect::<Result<_, _>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let path = entry.path();
        let metadata = match fs::metadata(&path) {
            Ok(metadata) => metadata,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "skipping unreadable entry");
                continue;
            }
        };

        if metadata.is_dir() {
            if entry.file_name().to_string_lossy().starts_with('.') {
                continue;
            }
            if let Err(err) = search_recursive(&path, root, keyword, found) {
                warn!(path = %path.display(), error = %err, "skipping unreadable directory");
            }
        } else if metadata.is_file() {
            let bytes = match fs::read(&path) {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "skipping unreadable file");
                    continue;
                }
            };
            let text = String::from_utf8_lossy(&bytes);
            if text.lines().any(|line| line.contains(keyword)) {
                let relative = path.strip_prefix(root).unwrap_or(&path);
                found.push(relative.to_string_lossy().to_string());
            }
        }
    }
    Ok(())
}

#[async_trait]
impl TypedTool for SearchFiles {
    type Input = SearchFilesInput;

    async fn run(&self, input: SearchFilesInput) -> AgentResult<String> {
        let dir = self.workdir.resolve(&input.path)?;
        if !dir.exists() {
            return Err(AgentError::ExecutionError(format!(
                "{} does not exist",
                input.path
            )));
        }

        let root = self.workdir.root().to_path_buf();
        let keyword = input.keyword;
        let found = tokio::task::spawn_blocking(move || {
            let mut found = Vec::new();
            search_recursive(&dir, &root, &keyword, &mut found).map(|_| found)
        })
        .await
        .map_err(|e| AgentError::Internal(format!("file search panicked: {}", e)))?
        .map_err(execution_error("failed to walk directory", &input.path))?;
        Ok(found.join("\n"))
    }
}
