use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::process::Command;
use tracing::debug;

use crate::domain::{SemVer, TagPattern};
use crate::error::{ReleaseError, Result};
use crate::platform::{Issue, Platform, PullRequest, Target};

/// Platform client that delegates the GitHub protocol to the `gh` CLI
///
/// Authentication is whatever `gh` is logged in with (or `GH_TOKEN`).
pub struct GhCliPlatform {
    program: String,
    repo: String,
    default_branch: String,
    tag_pattern: TagPattern,
}

/// Why a `gh api` call failed
#[derive(Debug)]
enum GhFailure {
    NotFound,
    Unprocessable(String),
    Other(String),
}

#[derive(Debug, Deserialize)]
pub(crate) struct GhUser {
    login: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GhRef {
    #[serde(rename = "ref")]
    name: String,
}

/// Pull request object shared by the REST API and webhook payloads
#[derive(Debug, Deserialize)]
pub(crate) struct GhPull {
    number: u64,
    title: String,
    user: GhUser,
    head: GhRef,
    merge_commit_sha: Option<String>,
    merged_at: Option<DateTime<Utc>>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
    html_url: String,
}

/// Issue object shared by the REST API and webhook payloads
#[derive(Debug, Deserialize)]
pub(crate) struct GhIssue {
    number: u64,
    title: String,
    user: GhUser,
    html_url: String,
    #[serde(default)]
    pull_request: Option<serde_json::Value>,
}

impl GhIssue {
    pub(crate) fn is_pull_request(&self) -> bool {
        self.pull_request.is_some()
    }
}

impl From<GhIssue> for Issue {
    fn from(issue: GhIssue) -> Self {
        Issue {
            number: issue.number,
            title: issue.title,
            author: issue.user.login,
            url: issue.html_url,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GhSha {
    sha: String,
}

impl From<GhPull> for PullRequest {
    fn from(pull: GhPull) -> Self {
        PullRequest {
            number: pull.number,
            title: pull.title,
            author: pull.user.login,
            head_branch: pull.head.name,
            merge_commit_sha: pull.merge_commit_sha,
            merged_at: pull.merged_at,
            url: pull.html_url,
        }
    }
}

const PAGE_SIZE: usize = 100;

fn parse_page<T: DeserializeOwned>(kind: &str, json: &str) -> Result<Vec<T>> {
    serde_json::from_str(json)
        .map_err(|e| ReleaseError::transport(format!("unexpected {} payload: {}", kind, e)))
}

fn pulls(pulls: Vec<GhPull>) -> Vec<PullRequest> {
    pulls.into_iter().map(PullRequest::from).collect()
}

/// Issues list results include pull requests; drop them
fn issues(issues: Vec<GhIssue>) -> Vec<Issue> {
    issues
        .into_iter()
        .filter(|i| !i.is_pull_request())
        .map(Issue::from)
        .collect()
}

/// Fetch numbered pages until a short page or until `more` declines
fn collect_pages<T>(
    mut fetch: impl FnMut(u32) -> Result<Vec<T>>,
    mut more: impl FnMut(&[T]) -> bool,
) -> Result<Vec<T>> {
    let mut items = Vec::new();
    for page in 1.. {
        let batch = fetch(page)?;
        let last = batch.len() < PAGE_SIZE || !more(&batch);
        items.extend(batch);
        if last {
            break;
        }
    }
    Ok(items)
}

/// Closed pulls come newest-updated first; a merge is also an update, so
/// once a page ends before the cursor no later page can hold a newer merge
fn passed_cursor(page: &[GhPull], cursor: Option<DateTime<Utc>>) -> bool {
    match (cursor, page.last().and_then(|pull| pull.updated_at)) {
        (Some(cursor), Some(updated_at)) => updated_at < cursor,
        _ => false,
    }
}

impl GhCliPlatform {
    pub fn new(
        owner: &str,
        name: &str,
        default_branch: impl Into<String>,
        tag_pattern: TagPattern,
    ) -> Self {
        GhCliPlatform {
            program: "gh".to_string(),
            repo: format!("{}/{}", owner, name),
            default_branch: default_branch.into(),
            tag_pattern,
        }
    }

    /// Use a different executable than `gh` from PATH
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn endpoint(&self, path: &str) -> String {
        format!("repos/{}/{}", self.repo, path)
    }

    /// All pages of a list endpoint; `query` must already hold a `?`
    fn list<T: DeserializeOwned>(
        &self,
        kind: &str,
        query: &str,
        more: impl FnMut(&[T]) -> bool,
    ) -> Result<Vec<T>> {
        collect_pages(
            |page| {
                let path = format!("{}&per_page={}&page={}", query, PAGE_SIZE, page);
                parse_page(kind, &self.call(vec![self.endpoint(&path)])?)
            },
            more,
        )
    }

    fn api(&self, args: &[String]) -> std::result::Result<String, GhFailure> {
        debug!("{} api {}", self.program, args.join(" "));
        let output = Command::new(&self.program)
            .arg("api")
            .args(args)
            .output()
            .map_err(|e| GhFailure::Other(format!("failed to run {}: {}", self.program, e)))?;

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if stderr.contains("HTTP 404") {
            Err(GhFailure::NotFound)
        } else if stderr.contains("HTTP 422") {
            Err(GhFailure::Unprocessable(stderr))
        } else {
            Err(GhFailure::Other(format!(
                "{} api exited with code {}: {}",
                self.program,
                output.status.code().unwrap_or(-1),
                stderr.trim()
            )))
        }
    }

    /// Run a call where any failure is a transport error
    fn call(&self, args: Vec<String>) -> Result<String> {
        self.api(&args).map_err(|failure| match failure {
            GhFailure::NotFound => ReleaseError::transport(format!("{} not found", args[0])),
            GhFailure::Unprocessable(msg) | GhFailure::Other(msg) => ReleaseError::transport(msg),
        })
    }

    /// GET that maps 404 to `false`
    fn exists(&self, path: String) -> Result<bool> {
        match self.api(&[path]) {
            Ok(_) => Ok(true),
            Err(GhFailure::NotFound) => Ok(false),
            Err(GhFailure::Unprocessable(msg)) | Err(GhFailure::Other(msg)) => {
                Err(ReleaseError::transport(msg))
            }
        }
    }
}

fn field(key: &str, value: &str) -> [String; 2] {
    ["-f".to_string(), format!("{}={}", key, value)]
}

impl Platform for GhCliPlatform {
    fn latest_tag(&self) -> Result<Option<SemVer>> {
        let names = self.call(vec![
            self.endpoint("tags?per_page=100"),
            "--paginate".to_string(),
            "--jq".to_string(),
            ".[].name".to_string(),
        ])?;
        Ok(self.tag_pattern.latest(names.lines()))
    }

    fn merged_prs_since(&self, cursor: Option<DateTime<Utc>>) -> Result<Vec<PullRequest>> {
        let closed: Vec<GhPull> = self.list(
            "pulls",
            "pulls?state=closed&sort=updated&direction=desc",
            |page| !passed_cursor(page, cursor),
        )?;
        let mut merged: Vec<PullRequest> = pulls(closed)
            .into_iter()
            .filter(|pr| match (pr.merged_at, cursor) {
                (Some(merged_at), Some(cursor)) => merged_at >= cursor,
                (Some(_), None) => true,
                (None, _) => false,
            })
            .collect();
        merged.sort_by_key(|pr| pr.merged_at);
        Ok(merged)
    }

    fn open_issues(&self) -> Result<Vec<Issue>> {
        Ok(issues(self.list("issues", "issues?state=open", |_| true)?))
    }

    fn open_prs(&self) -> Result<Vec<PullRequest>> {
        Ok(pulls(self.list("pulls", "pulls?state=open", |_| true)?))
    }

    fn create_pr(&self, branch: &str, title: &str, body: &str) -> Result<PullRequest> {
        let mut args = vec!["-X".to_string(), "POST".to_string(), self.endpoint("pulls")];
        args.extend(field("title", title));
        args.extend(field("head", branch));
        args.extend(field("base", &self.default_branch));
        args.extend(field("body", body));

        match self.api(&args) {
            Ok(json) => {
                let pull: GhPull = serde_json::from_str(&json).map_err(|e| {
                    ReleaseError::transport(format!("unexpected pull payload: {}", e))
                })?;
                Ok(pull.into())
            }
            Err(GhFailure::Unprocessable(msg)) => Err(ReleaseError::merge_conflict(format!(
                "cannot open pull request from {}: {}",
                branch,
                msg.trim()
            ))),
            Err(GhFailure::NotFound) => Err(ReleaseError::transport("pulls endpoint not found")),
            Err(GhFailure::Other(msg)) => Err(ReleaseError::transport(msg)),
        }
    }

    fn create_tag(&self, rev: &str, name: &str) -> Result<()> {
        let mut args = vec!["-X".to_string(), "POST".to_string(), self.endpoint("git/tags")];
        args.extend(field("tag", name));
        args.extend(field("message", &format!("{} release", name)));
        args.extend(field("object", rev));
        args.extend(field("type", "commit"));
        let json = self.call(args)?;
        let tag: GhSha = serde_json::from_str(&json)
            .map_err(|e| ReleaseError::transport(format!("unexpected tag payload: {}", e)))?;

        let mut args = vec!["-X".to_string(), "POST".to_string(), self.endpoint("git/refs")];
        args.extend(field("ref", &format!("refs/tags/{}", name)));
        args.extend(field("sha", &tag.sha));
        self.call(args)?;
        Ok(())
    }

    fn tag_exists(&self, name: &str) -> Result<bool> {
        self.exists(self.endpoint(&format!("git/ref/tags/{}", name)))
    }

    fn create_release(&self, tag: &str, notes: &str) -> Result<bool> {
        let mut args = vec!["-X".to_string(), "POST".to_string(), self.endpoint("releases")];
        args.extend(field("tag_name", tag));
        args.extend(field("name", tag));
        args.extend(field("body", notes));

        match self.api(&args) {
            Ok(_) => Ok(false),
            Err(GhFailure::Unprocessable(msg)) if msg.contains("already_exists") => Ok(true),
            Err(GhFailure::Unprocessable(msg)) | Err(GhFailure::Other(msg)) => {
                Err(ReleaseError::transport(msg))
            }
            Err(GhFailure::NotFound) => Err(ReleaseError::transport("releases endpoint not found")),
        }
    }

    fn release_exists(&self, tag: &str) -> Result<bool> {
        self.exists(self.endpoint(&format!("releases/tags/{}", tag)))
    }

    fn set_labels(&self, target: Target, labels: &[String]) -> Result<()> {
        if labels.is_empty() {
            return Ok(());
        }
        let mut args = vec![
            "-X".to_string(),
            "POST".to_string(),
            self.endpoint(&format!("issues/{}/labels", target.number())),
        ];
        for label in labels {
            args.extend(field("labels[]", label));
        }
        self.call(args)?;
        Ok(())
    }

    fn comment(&self, target: Target, body: &str) -> Result<()> {
        let mut args = vec![
            "-X".to_string(),
            "POST".to_string(),
            self.endpoint(&format!("issues/{}/comments", target.number())),
        ];
        args.extend(field("body", body));
        self.call(args)?;
        Ok(())
    }
}
