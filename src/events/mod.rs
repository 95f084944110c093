//! Sources of repository activity
//!
//! Polling and webhook delivery both normalize into [RepositoryEvent], so the
//! pipeline never knows which one fed it.

pub mod poll;
pub mod webhook;

pub use poll::PollingSource;
pub use webhook::{parse_payload, WebhookDelivery, WebhookSource};

use std::fmt;

use crate::error::Result;
use crate::platform::{Issue, PullRequest};

/// Normalized repository activity the bot reacts to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepositoryEvent {
    PullRequestMerged(PullRequest),
    IssueOpened(Issue),
}

impl RepositoryEvent {
    pub fn title(&self) -> &str {
        match self {
            RepositoryEvent::PullRequestMerged(pr) => &pr.title,
            RepositoryEvent::IssueOpened(issue) => &issue.title,
        }
    }
}

impl fmt::Display for RepositoryEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepositoryEvent::PullRequestMerged(pr) => {
                write!(f, "merged pull request #{} '{}'", pr.number, pr.title)
            }
            RepositoryEvent::IssueOpened(issue) => {
                write!(f, "issue #{} '{}'", issue.number, issue.title)
            }
        }
    }
}

/// Supplies batches of events to the driver
///
/// An event that is not acknowledged must be delivered again by a later
/// batch; an acknowledged one must not.
pub trait EventSource: Send {
    fn next_batch(&mut self) -> Result<Vec<RepositoryEvent>>;

    fn acknowledge(&mut self, event: &RepositoryEvent) -> Result<()>;
}
