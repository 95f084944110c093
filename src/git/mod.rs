//! Working-copy abstraction layer
//!
//! The pipeline mutates a single checkout of the monitored repository. This
//! module provides a trait over the git operations it needs, so the pipeline
//! can run against a real repository or a recording mock.
//!
//! - [repository::Git2WorkingCopy]: real implementation using the `git2` crate
//! - [mock::MockWorkingCopy]: in-memory implementation for testing
//!
//! File contents of the checkout are read and written through [FileStore],
//! which is kept separate so tests can run the full pipeline in memory.

pub mod files;
pub mod mock;
pub mod repository;

pub use files::{FileStore, MemoryFiles, WorktreeFiles};
pub use mock::MockWorkingCopy;
pub use repository::Git2WorkingCopy;

use crate::error::Result;
use std::path::{Path, PathBuf};

/// Commit information used for changelog derivation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitMeta {
    /// The commit hash
    pub id: String,
    /// The full commit message
    pub message: String,
    /// The commit author
    pub author: String,
    /// Number of parents; more than one means a merge commit
    pub parent_count: usize,
}

impl CommitMeta {
    pub fn new(
        id: impl Into<String>,
        message: impl Into<String>,
        author: impl Into<String>,
        parent_count: usize,
    ) -> Self {
        CommitMeta {
            id: id.into(),
            message: message.into(),
            author: author.into(),
            parent_count,
        }
    }

    /// First line of the message, trimmed
    pub fn summary(&self) -> &str {
        self.message.lines().next().unwrap_or_default().trim()
    }

    pub fn is_merge(&self) -> bool {
        self.parent_count > 1
    }
}

/// Identity used for commits the bot makes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Author {
    pub name: String,
    pub email: String,
}

impl Default for Author {
    fn default() -> Self {
        Author {
            name: "Release bot".to_string(),
            email: "bot@releasebot.bot".to_string(),
        }
    }
}

/// Git operations the release pipeline performs on its checkout
///
/// Implementors must be `Send` so a pipeline can be moved behind the
/// per-repository mutex of the driver.
pub trait WorkingCopy: Send {
    /// Root directory of the working tree
    fn root(&self) -> &Path;

    /// Fetch `remote` and hard-reset the local `branch` to the remote tip
    ///
    /// # Returns
    /// * `Ok(String)` - the commit id the working tree now points at
    fn sync(&self, remote: &str, branch: &str) -> Result<String>;

    /// Commits reachable from HEAD but not from `tag`, oldest first
    ///
    /// With no tag, the whole history of HEAD is returned.
    fn commits_since(&self, tag: Option<&str>) -> Result<Vec<CommitMeta>>;

    /// Whether `remote` had `branch` at the last sync
    fn remote_branch_exists(&self, remote: &str, branch: &str) -> Result<bool>;

    /// Create `name` at HEAD and check it out
    fn create_branch(&self, name: &str) -> Result<()>;

    /// Stage `paths` (relative to the root) and commit them on the current branch
    fn commit_paths(&self, paths: &[PathBuf], message: &str, author: &Author) -> Result<String>;

    /// Push the local `branch` to the same name on `remote`
    fn push_branch(&self, remote: &str, branch: &str) -> Result<()>;

    /// Write the tree of `rev` into `dest` without touching the working tree
    fn export_ref(&self, rev: &str, dest: &Path) -> Result<()>;
}
