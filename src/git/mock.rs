use crate::error::{ReleaseError, Result};
use crate::git::{Author, CommitMeta, WorkingCopy};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// A commit made through [WorkingCopy::commit_paths]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCommit {
    pub branch: String,
    pub paths: Vec<PathBuf>,
    pub message: String,
    pub author: Author,
}

#[derive(Debug, Default)]
struct MockState {
    head: String,
    current_branch: String,
    history: Vec<CommitMeta>,
    remote_branches: HashSet<String>,
    created_branches: Vec<String>,
    commits: Vec<RecordedCommit>,
    pushed: Vec<String>,
    exported: Vec<String>,
    syncs: usize,
    reject_push: bool,
}

/// Mock working copy for testing without actual git operations
///
/// Clones share state, so a test can keep a handle while the pipeline owns
/// the other one.
#[derive(Debug, Clone)]
pub struct MockWorkingCopy {
    root: PathBuf,
    state: Arc<Mutex<MockState>>,
}

impl MockWorkingCopy {
    /// Create a new mock whose synced tip is `head`
    pub fn new(head: impl Into<String>) -> Self {
        let state = MockState {
            head: head.into(),
            current_branch: "main".to_string(),
            ..MockState::default()
        };
        MockWorkingCopy {
            root: PathBuf::from("/mock/checkout"),
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add a commit to the history since the latest tag
    pub fn add_commit(&self, commit: CommitMeta) {
        self.state().history.push(commit);
    }

    /// Mark a branch as present on the remote
    pub fn add_remote_branch(&self, branch: impl Into<String>) {
        self.state().remote_branches.insert(branch.into());
    }

    /// Make every following push fail as rejected
    pub fn reject_pushes(&self) {
        self.state().reject_push = true;
    }

    pub fn created_branches(&self) -> Vec<String> {
        self.state().created_branches.clone()
    }

    pub fn commits(&self) -> Vec<RecordedCommit> {
        self.state().commits.clone()
    }

    pub fn pushed(&self) -> Vec<String> {
        self.state().pushed.clone()
    }

    pub fn exported(&self) -> Vec<String> {
        self.state().exported.clone()
    }

    pub fn sync_count(&self) -> usize {
        self.state().syncs
    }
}

impl Default for MockWorkingCopy {
    fn default() -> Self {
        Self::new("0000000")
    }
}

impl WorkingCopy for MockWorkingCopy {
    fn root(&self) -> &Path {
        &self.root
    }

    fn sync(&self, _remote: &str, branch: &str) -> Result<String> {
        let mut state = self.state();
        state.syncs += 1;
        state.current_branch = branch.to_string();
        Ok(state.head.clone())
    }

    fn commits_since(&self, _tag: Option<&str>) -> Result<Vec<CommitMeta>> {
        Ok(self.state().history.clone())
    }

    fn remote_branch_exists(&self, _remote: &str, branch: &str) -> Result<bool> {
        Ok(self.state().remote_branches.contains(branch))
    }

    fn create_branch(&self, name: &str) -> Result<()> {
        let mut state = self.state();
        state.created_branches.push(name.to_string());
        state.current_branch = name.to_string();
        Ok(())
    }

    fn commit_paths(&self, paths: &[PathBuf], message: &str, author: &Author) -> Result<String> {
        let mut state = self.state();
        let commit = RecordedCommit {
            branch: state.current_branch.clone(),
            paths: paths.to_vec(),
            message: message.to_string(),
            author: author.clone(),
        };
        state.commits.push(commit);
        Ok(format!("mock{:04}", state.commits.len()))
    }

    fn push_branch(&self, _remote: &str, branch: &str) -> Result<()> {
        let mut state = self.state();
        if state.reject_push {
            return Err(ReleaseError::merge_conflict(format!(
                "push of {} rejected",
                branch
            )));
        }
        state.pushed.push(branch.to_string());
        state.remote_branches.insert(branch.to_string());
        Ok(())
    }

    fn export_ref(&self, rev: &str, _dest: &Path) -> Result<()> {
        self.state().exported.push(rev.to_string());
        Ok(())
    }
}
