use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

/// Key under which the developer's pull request submission is recorded
pub const LAST_SUBMISSION_KEY: &str = "last_submission";

/// A file written by an agent during the run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct File {
    pub path: String,
    pub content: String,
}

/// A branch pushed and the pull request opened for it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmittedWork {
    pub branch: String,
    pub pr_number: u64,
}

#[derive(Debug, Default)]
struct StoreInner {
    changed_files: Vec<File>,
    submitted_works: HashMap<String, SubmittedWork>,
}

/// Run-scoped state shared by every agent and tool of one orchestration.
///
/// Insert-only: entries are never removed during a run.
#[derive(Debug, Default)]
pub struct Store {
    inner: Mutex<StoreInner>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_changed_file(&self, file: File) {
        self.lock().changed_files.push(file);
    }

    /// Changed files in the order they were written
    pub fn changed_files(&self) -> Vec<File> {
        self.lock().changed_files.clone()
    }

    pub fn put_submission<K: Into<String>>(&self, key: K, work: SubmittedWork) {
        self.lock().submitted_works.insert(key.into(), work);
    }

    pub fn get_submission(&self, key: &str) -> Option<SubmittedWork> {
        self.lock().submitted_works.get(key).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
