//! Release-intent recognition for issue and pull-request titles

use regex::Regex;

use crate::domain::{BumpKind, ReleaseIntent, SemVer};
use crate::error::{ReleaseError, Result};
use crate::events::RepositoryEvent;

/// Where a release request came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseSource {
    Issue(u64),
    PullRequest(u64),
}

impl std::fmt::Display for ReleaseSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReleaseSource::Issue(n) => write!(f, "issue #{}", n),
            ReleaseSource::PullRequest(n) => write!(f, "pull request #{}", n),
        }
    }
}

/// A recognized request to cut a release
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseRequest {
    pub requested_version: ReleaseIntent,
    pub source: ReleaseSource,
    pub title: String,
    pub origin_actor: String,
}

impl ReleaseRequest {
    /// Classify the event's title. `Ok(None)` when the event is not a release request.
    pub fn from_event(event: &RepositoryEvent) -> Result<Option<Self>> {
        let (title, source, actor) = match event {
            RepositoryEvent::PullRequestMerged(pr) => {
                (&pr.title, ReleaseSource::PullRequest(pr.number), &pr.author)
            }
            RepositoryEvent::IssueOpened(issue) => {
                (&issue.title, ReleaseSource::Issue(issue.number), &issue.author)
            }
        };

        Ok(classify(title)?.map(|intent| ReleaseRequest {
            requested_version: intent,
            source,
            title: title.clone(),
            origin_actor: actor.clone(),
        }))
    }
}

/// Classify a title into a release intent
///
/// Recognized (case-insensitive, whole title): `X.Y.Z release`,
/// `new major release`, `new minor release`, `new patch release`.
/// A version-looking keyword that is not a valid triple is `MalformedVersion`.
pub fn classify(title: &str) -> Result<Option<ReleaseIntent>> {
    let re = Regex::new(r"(?i)^\s*(.+?)\s+release\s*$")
        .map_err(|e| ReleaseError::config(format!("release title matcher: {}", e)))?;

    let keyword = match re.captures(title).and_then(|c| c.get(1)) {
        Some(m) => m.as_str().to_lowercase(),
        None => return Ok(None),
    };
    let keyword = keyword.split_whitespace().collect::<Vec<_>>().join(" ");

    let intent = match keyword.as_str() {
        "new major" => BumpKind::Major,
        "new minor" => BumpKind::Minor,
        "new patch" => BumpKind::Patch,
        other if looks_like_version(other) => BumpKind::Explicit(SemVer::parse(other)?),
        _ => return Ok(None),
    };

    Ok(Some(intent))
}

fn looks_like_version(keyword: &str) -> bool {
    let digits = keyword.strip_prefix('v').unwrap_or(keyword);
    !keyword.contains(' ') && digits.starts_with(|c: char| c.is_ascii_digit())
}

/// Title of the release pull request the bot opens for `version`
pub fn release_title(version: &SemVer) -> String {
    format!("{} release", version)
}

/// Branch the bot pushes the release changes to
pub fn release_branch(version: &SemVer) -> String {
    format!("{}-release", version)
}
