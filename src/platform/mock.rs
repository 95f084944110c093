use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::domain::{SemVer, TagPattern};
use crate::error::{ReleaseError, Result};
use crate::platform::{Issue, Platform, PullRequest, Target};

#[derive(Debug, Default)]
struct PlatformState {
    tags: BTreeMap<String, String>,
    releases: HashMap<String, String>,
    merged: Vec<PullRequest>,
    open_prs: Vec<PullRequest>,
    issues: Vec<Issue>,
    labels: Vec<(Target, Vec<String>)>,
    comments: Vec<(Target, String)>,
    created_tags: Vec<(String, String)>,
    created_releases: Vec<(String, String)>,
    created_prs: Vec<PullRequest>,
    pr_bodies: HashMap<u64, String>,
    next_number: u64,
    failing: HashMap<String, String>,
    delay: Option<Duration>,
}

/// Mock platform for testing without network access
///
/// Clones share state. Mutating calls are recorded and can be inspected.
#[derive(Debug, Clone)]
pub struct MockPlatform {
    tag_pattern: TagPattern,
    state: Arc<Mutex<PlatformState>>,
}

impl Default for MockPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPlatform {
    pub fn new() -> Self {
        MockPlatform {
            tag_pattern: TagPattern::default(),
            state: Arc::new(Mutex::new(PlatformState {
                next_number: 100,
                ..PlatformState::default()
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, PlatformState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add an upstream tag
    pub fn add_tag(&self, name: impl Into<String>, rev: impl Into<String>) {
        self.state().tags.insert(name.into(), rev.into());
    }

    /// Add an upstream release for an existing tag
    pub fn add_release(&self, tag: impl Into<String>, notes: impl Into<String>) {
        self.state().releases.insert(tag.into(), notes.into());
    }

    pub fn add_merged_pr(&self, pr: PullRequest) {
        self.state().merged.push(pr);
    }

    pub fn add_open_pr(&self, pr: PullRequest) {
        self.state().open_prs.push(pr);
    }

    pub fn add_issue(&self, issue: Issue) {
        self.state().issues.push(issue);
    }

    pub fn close_issue(&self, number: u64) {
        self.state().issues.retain(|issue| issue.number != number);
    }

    /// Make every call to `operation` fail with a transport error
    pub fn fail_on(&self, operation: &str, message: &str) {
        self.state()
            .failing
            .insert(operation.to_string(), message.to_string());
    }

    pub fn clear_failures(&self) {
        self.state().failing.clear();
    }

    /// Make every call block for `delay` first
    pub fn set_delay(&self, delay: Duration) {
        self.state().delay = Some(delay);
    }

    /// Simulate a merge of a pull request the bot opened
    pub fn merge_pr(
        &self,
        number: u64,
        merge_commit_sha: &str,
        merged_at: DateTime<Utc>,
    ) -> Option<PullRequest> {
        let mut state = self.state();
        let index = state.open_prs.iter().position(|pr| pr.number == number)?;
        let mut pr = state.open_prs.remove(index);
        pr.merge_commit_sha = Some(merge_commit_sha.to_string());
        pr.merged_at = Some(merged_at);
        state.merged.push(pr.clone());
        Some(pr)
    }

    pub fn created_tags(&self) -> Vec<(String, String)> {
        self.state().created_tags.clone()
    }

    pub fn created_releases(&self) -> Vec<(String, String)> {
        self.state().created_releases.clone()
    }

    pub fn created_prs(&self) -> Vec<PullRequest> {
        self.state().created_prs.clone()
    }

    pub fn pr_body(&self, number: u64) -> Option<String> {
        self.state().pr_bodies.get(&number).cloned()
    }

    pub fn labels(&self) -> Vec<(Target, Vec<String>)> {
        self.state().labels.clone()
    }

    pub fn comments(&self) -> Vec<(Target, String)> {
        self.state().comments.clone()
    }

    fn enter(&self, operation: &str) -> Result<()> {
        let (delay, failure) = {
            let state = self.state();
            (state.delay, state.failing.get(operation).cloned())
        };
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        match failure {
            Some(message) => Err(ReleaseError::transport(format!("{}: {}", operation, message))),
            None => Ok(()),
        }
    }
}

impl Platform for MockPlatform {
    fn latest_tag(&self) -> Result<Option<SemVer>> {
        self.enter("latest_tag")?;
        let state = self.state();
        Ok(self.tag_pattern.latest(state.tags.keys().map(|t| t.as_str())))
    }

    fn merged_prs_since(&self, cursor: Option<DateTime<Utc>>) -> Result<Vec<PullRequest>> {
        self.enter("merged_prs_since")?;
        let mut merged: Vec<PullRequest> = self
            .state()
            .merged
            .iter()
            .filter(|pr| match (pr.merged_at, cursor) {
                (Some(at), Some(cursor)) => at >= cursor,
                (Some(_), None) => true,
                (None, _) => false,
            })
            .cloned()
            .collect();
        merged.sort_by_key(|pr| pr.merged_at);
        Ok(merged)
    }

    fn open_issues(&self) -> Result<Vec<Issue>> {
        self.enter("open_issues")?;
        Ok(self.state().issues.clone())
    }

    fn open_prs(&self) -> Result<Vec<PullRequest>> {
        self.enter("open_prs")?;
        Ok(self.state().open_prs.clone())
    }

    fn create_pr(&self, branch: &str, title: &str, body: &str) -> Result<PullRequest> {
        self.enter("create_pr")?;
        let mut state = self.state();
        if state.open_prs.iter().any(|pr| pr.head_branch == branch) {
            return Err(ReleaseError::merge_conflict(format!(
                "a pull request from {} is already open",
                branch
            )));
        }
        state.next_number += 1;
        let pr = PullRequest {
            number: state.next_number,
            title: title.to_string(),
            author: "release-bot".to_string(),
            head_branch: branch.to_string(),
            merge_commit_sha: None,
            merged_at: None,
            url: format!("https://example.invalid/pull/{}", state.next_number),
        };
        state.pr_bodies.insert(pr.number, body.to_string());
        state.open_prs.push(pr.clone());
        state.created_prs.push(pr.clone());
        Ok(pr)
    }

    fn create_tag(&self, rev: &str, name: &str) -> Result<()> {
        self.enter("create_tag")?;
        let mut state = self.state();
        if state.tags.contains_key(name) {
            return Err(ReleaseError::transport(format!("tag {} already exists", name)));
        }
        state.tags.insert(name.to_string(), rev.to_string());
        state.created_tags.push((name.to_string(), rev.to_string()));
        Ok(())
    }

    fn tag_exists(&self, name: &str) -> Result<bool> {
        self.enter("tag_exists")?;
        Ok(self.state().tags.contains_key(name))
    }

    fn create_release(&self, tag: &str, notes: &str) -> Result<bool> {
        self.enter("create_release")?;
        let mut state = self.state();
        if state.releases.contains_key(tag) {
            return Ok(true);
        }
        state.releases.insert(tag.to_string(), notes.to_string());
        state
            .created_releases
            .push((tag.to_string(), notes.to_string()));
        Ok(false)
    }

    fn release_exists(&self, tag: &str) -> Result<bool> {
        self.enter("release_exists")?;
        Ok(self.state().releases.contains_key(tag))
    }

    fn set_labels(&self, target: Target, labels: &[String]) -> Result<()> {
        self.enter("set_labels")?;
        self.state().labels.push((target, labels.to_vec()));
        Ok(())
    }

    fn comment(&self, target: Target, body: &str) -> Result<()> {
        self.enter("comment")?;
        self.state().comments.push((target, body.to_string()));
        Ok(())
    }
}
