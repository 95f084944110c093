//! Hosting-platform collaborator
//!
//! The pipeline never speaks the platform protocol itself. It talks to a
//! [Platform], which is bound to one repository at construction.

pub mod gh;
pub mod mock;

pub use gh::GhCliPlatform;
pub use mock::MockPlatform;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::SemVer;
use crate::error::Result;

/// Pull request as seen by the bot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub title: String,
    pub author: String,
    pub head_branch: String,
    pub merge_commit_sha: Option<String>,
    pub merged_at: Option<DateTime<Utc>>,
    pub url: String,
}

/// Issue as seen by the bot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub number: u64,
    pub title: String,
    pub author: String,
    pub url: String,
}

/// Something labels and comments can be attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Issue(u64),
    PullRequest(u64),
}

impl Target {
    /// Issues and pull requests share one number space on the platform
    pub fn number(&self) -> u64 {
        match self {
            Target::Issue(n) | Target::PullRequest(n) => *n,
        }
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Target::Issue(n) => write!(f, "issue #{}", n),
            Target::PullRequest(n) => write!(f, "pull request #{}", n),
        }
    }
}

/// Operations on the hosting platform
///
/// Implementations block; the pipeline wraps every call in a bounded
/// deadline, so they must be shareable across threads.
pub trait Platform: Send + Sync {
    /// Highest version among the repository's tags, per the bot's tag pattern
    fn latest_tag(&self) -> Result<Option<SemVer>>;

    /// Pull requests merged at or after `cursor`, oldest first
    fn merged_prs_since(&self, cursor: Option<DateTime<Utc>>) -> Result<Vec<PullRequest>>;

    fn open_issues(&self) -> Result<Vec<Issue>>;

    fn open_prs(&self) -> Result<Vec<PullRequest>>;

    /// Open a pull request from `branch` into the default branch
    fn create_pr(&self, branch: &str, title: &str, body: &str) -> Result<PullRequest>;

    /// Create annotated tag `name` pointing at commit `rev`
    fn create_tag(&self, rev: &str, name: &str) -> Result<()>;

    fn tag_exists(&self, name: &str) -> Result<bool>;

    /// Create a release for `tag`
    ///
    /// # Returns
    /// * `Ok(true)` - a release for the tag already existed; nothing was created
    /// * `Ok(false)` - the release was created
    fn create_release(&self, tag: &str, notes: &str) -> Result<bool>;

    fn release_exists(&self, tag: &str) -> Result<bool>;

    fn set_labels(&self, target: Target, labels: &[String]) -> Result<()>;

    fn comment(&self, target: Target, body: &str) -> Result<()>;
}
