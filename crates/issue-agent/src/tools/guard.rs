use std::path::{Component, Path, PathBuf};

use crate::errors::{AgentError, AgentResult};

/// Reject any path that could leave the working directory
pub fn guard_path(path: &str) -> AgentResult<()> {
    let invalid = |reason: &str| {
        Err(AgentError::InvalidParameters(format!(
            "path {} {}",
            path, reason
        )))
    };

    if path.contains("..") {
        return invalid("contains not allowed '..'");
    }
    if path.contains('~') {
        return invalid("contains not allowed '~'");
    }
    if path.contains("//") {
        return invalid("contains not allowed '//'");
    }
    if path.starts_with('/') {
        return invalid("starts with '/', not allowed");
    }

    let local = Path::new(path)
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if !local {
        return invalid("is not a local path");
    }

    Ok(())
}

/// The directory the file tools operate in
#[derive(Debug, Clone)]
pub struct Workdir {
    root: PathBuf,
}

impl Workdir {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Guard the model-supplied path and resolve it under the root
    pub fn resolve(&self, path: &str) -> AgentResult<PathBuf> {
        guard_path(path)?;
        Ok(self.root.join(path))
    }
}
