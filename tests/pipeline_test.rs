// tests/pipeline_test.rs
use chrono::{TimeZone, Utc};
use std::path::Path;
use std::sync::Arc;

use release_bot::config::BotConfig;
use release_bot::domain::SemVer;
use release_bot::error::ReleaseError;
use release_bot::events::RepositoryEvent;
use release_bot::git::{CommitMeta, FileStore, MemoryFiles, MockWorkingCopy};
use release_bot::pipeline::{Collaborators, Phase, PipelineState, PipelineWarning, ReleasePipeline};
use release_bot::platform::{Issue, MockPlatform, PullRequest, Target};
use release_bot::publish::MockPackageIndex;
use release_bot::state::StateTracker;
use tempfile::TempDir;

struct Harness {
    copy: MockWorkingCopy,
    files: MemoryFiles,
    platform: MockPlatform,
    index: MockPackageIndex,
}

impl Harness {
    fn new(release_conf: &str) -> Self {
        Harness {
            copy: MockWorkingCopy::new("0123abc"),
            files: MemoryFiles::new().with_file("release-conf.toml", release_conf),
            platform: MockPlatform::new(),
            index: MockPackageIndex::new(),
        }
    }

    fn config(dry_run: bool) -> BotConfig {
        BotConfig {
            repository_owner: "acme".to_string(),
            repository_name: "widget".to_string(),
            github_username: Some("release-bot".to_string()),
            dry_run,
            ..BotConfig::default()
        }
    }

    fn pipeline_with(&self, dry_run: bool, state: StateTracker) -> ReleasePipeline {
        let collaborators = Collaborators {
            working_copy: Box::new(self.copy.clone()),
            files: Box::new(self.files.clone()),
            platform: Arc::new(self.platform.clone()),
            index: Arc::new(self.index.clone()),
        };
        ReleasePipeline::new(Self::config(dry_run), collaborators, state).unwrap()
    }

    fn pipeline(&self) -> ReleasePipeline {
        self.pipeline_with(false, StateTracker::in_memory())
    }
}

fn merged_pr(number: u64, title: &str, sha: &str) -> RepositoryEvent {
    RepositoryEvent::PullRequestMerged(PullRequest {
        number,
        title: title.to_string(),
        author: "maintainer".to_string(),
        head_branch: "release".to_string(),
        merge_commit_sha: Some(sha.to_string()),
        merged_at: Some(Utc.with_ymd_and_hms(2024, 4, 2, 10, 30, 0).unwrap()),
        url: format!("https://github.com/acme/widget/pull/{}", number),
    })
}

#[test]
fn test_minor_release_from_merged_pr() {
    let harness = Harness::new("pypi_project = \"acme-widget\"\n");
    harness.platform.add_tag("v1.0.0", "0000aaa");
    harness
        .copy
        .add_commit(CommitMeta::new("c1", "Support TOML input", "dev", 1));
    let mut pipeline = harness.pipeline();

    let outcome = pipeline.on_event(&merged_pr(12, "new minor release", "feed123"));

    assert_eq!(outcome.state, PipelineState::At(Phase::PackagePublished));
    assert_eq!(outcome.version, Some(SemVer::new(1, 1, 0)));
    assert!(outcome.error.is_none());
    assert_eq!(
        harness.platform.created_tags(),
        vec![("v1.1.0".to_string(), "feed123".to_string())]
    );
    let releases = harness.platform.created_releases();
    assert_eq!(releases.len(), 1);
    assert_eq!(releases[0].0, "v1.1.0");
    assert_eq!(releases[0].1, "* Support TOML input");

    let uploads = harness.index.uploads();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].1, "acme-widget");
    assert_eq!(harness.copy.exported(), vec!["feed123".to_string()]);

    let record = pipeline.status().unwrap();
    assert_eq!(record.version, SemVer::new(1, 1, 0));
    assert_eq!(record.tag_ref, "v1.1.0");
    assert!(record.pypi_published);
    assert!(!record.dry_run);
    assert!(pipeline.state().has_released(SemVer::new(1, 1, 0)));

    let comments = harness.platform.comments();
    assert_eq!(comments.len(), 1);
    assert_eq!(comments[0].0, Target::PullRequest(12));
    assert!(comments[0].1.contains("v1.1.0"));
}

#[test]
fn test_issue_opens_release_pr_and_merge_releases() {
    let harness = Harness::new(
        "trigger_on_issue = true\nlabels = [\"release\"]\npypi_project = \"widget\"\n",
    );
    harness
        .files
        .write(Path::new("widget/__init__.py"), "__version__ = '0.0.1'\n")
        .unwrap();
    harness
        .copy
        .add_commit(CommitMeta::new("c1", "Add widget API", "dev", 1));
    let mut pipeline = harness.pipeline();

    let issue = Issue {
        number: 4,
        title: "0.1.0 release".to_string(),
        author: "maintainer".to_string(),
        url: "https://github.com/acme/widget/issues/4".to_string(),
    };
    let outcome = pipeline.on_event(&RepositoryEvent::IssueOpened(issue));

    assert_eq!(outcome.state, PipelineState::At(Phase::AwaitingMerge));
    assert_eq!(outcome.version, Some(SemVer::new(0, 1, 0)));
    assert!(harness.platform.created_tags().is_empty());
    assert!(harness.index.uploads().is_empty());

    let prs = harness.platform.created_prs();
    assert_eq!(prs.len(), 1);
    assert_eq!(prs[0].title, "0.1.0 release");
    assert_eq!(prs[0].head_branch, "0.1.0-release");
    assert!(harness
        .platform
        .pr_body(prs[0].number)
        .unwrap()
        .contains("#4"));

    assert_eq!(harness.copy.created_branches(), vec!["0.1.0-release"]);
    assert_eq!(harness.copy.pushed(), vec!["0.1.0-release"]);
    let commits = harness.copy.commits();
    assert_eq!(commits.len(), 1);
    assert_eq!(commits[0].message, "0.1.0 release");
    assert_eq!(commits[0].paths.len(), 2);

    assert_eq!(
        harness.files.get("widget/__init__.py").unwrap(),
        "__version__ = '0.1.0'\n"
    );
    assert!(harness
        .files
        .get("CHANGELOG.md")
        .unwrap()
        .starts_with("# 0.1.0\n\n* Add widget API\n"));

    let labels = harness.platform.labels();
    assert!(labels.contains(&(Target::Issue(4), vec!["release".to_string()])));
    assert!(labels.contains(&(Target::PullRequest(prs[0].number), vec!["release".to_string()])));
    assert_eq!(pipeline.state().pending().len(), 1);

    // The same issue seen again while the pull request is open
    let again = pipeline.on_event(&RepositoryEvent::IssueOpened(Issue {
        number: 4,
        title: "0.1.0 release".to_string(),
        ..Issue::default()
    }));
    assert!(again
        .warnings
        .iter()
        .any(|w| matches!(w, PipelineWarning::ReleasePrOpen { .. })));
    assert_eq!(harness.platform.created_prs().len(), 1);

    let merged = harness
        .platform
        .merge_pr(prs[0].number, "merged01", Utc::now())
        .unwrap();
    let released = pipeline.on_event(&RepositoryEvent::PullRequestMerged(merged));

    assert_eq!(released.state, PipelineState::At(Phase::PackagePublished));
    assert_eq!(
        harness.platform.created_tags(),
        vec![("v0.1.0".to_string(), "merged01".to_string())]
    );
    assert_eq!(harness.platform.created_releases()[0].1, "* Add widget API");
    assert_eq!(harness.index.uploads().len(), 1);
    assert!(pipeline.state().pending().is_empty());
    assert!(harness
        .platform
        .comments()
        .iter()
        .any(|(target, body)| *target == Target::Issue(4) && body.contains("v0.1.0")));
}

#[test]
fn test_older_explicit_version_is_rejected() {
    let harness = Harness::new("");
    harness.platform.add_tag("v1.0.0", "0000aaa");
    let mut pipeline = harness.pipeline();

    let outcome = pipeline.on_event(&merged_pr(20, "0.9.0 release", "beef"));

    assert!(matches!(
        outcome.error,
        Some(ReleaseError::VersionNotMonotonic { requested, latest })
            if requested == SemVer::new(0, 9, 0) && latest == SemVer::new(1, 0, 0)
    ));
    assert!(matches!(
        outcome.state,
        PipelineState::Failed {
            phase: Phase::VersionComputed,
            ..
        }
    ));
    assert!(outcome.is_settled());
    assert!(harness.platform.created_tags().is_empty());
    assert!(pipeline.status().is_none());
}

#[test]
fn test_existing_release_is_success_with_warning() {
    let harness = Harness::new("");
    harness.platform.add_tag("v1.0.0", "0000aaa");
    harness.platform.add_release("v1.1.0", "published by hand");
    harness.index.mark_published("widget", SemVer::new(1, 1, 0));
    let mut pipeline = harness.pipeline();

    let outcome = pipeline.on_event(&merged_pr(21, "new minor release", "cafe"));

    assert!(!outcome.is_failed());
    assert_eq!(outcome.state, PipelineState::At(Phase::PackagePublished));
    assert!(outcome.warnings.contains(&PipelineWarning::DuplicateRelease {
        tag: "v1.1.0".to_string()
    }));
    assert!(outcome.warnings.contains(&PipelineWarning::AlreadyPublished {
        project: "widget".to_string(),
        version: SemVer::new(1, 1, 0)
    }));
    assert!(harness.platform.created_releases().is_empty());
    assert!(harness.index.uploads().is_empty());
    assert!(pipeline.state().has_released(SemVer::new(1, 1, 0)));
}

#[test]
fn test_dry_run_changes_nothing_upstream() {
    let dir = TempDir::new().unwrap();
    let ledger = dir.path().join("state.json");
    let harness = Harness::new("");
    harness.platform.add_tag("v1.0.0", "0000aaa");
    let event = merged_pr(30, "new minor release", "d00d");

    let mut dry = harness.pipeline_with(true, StateTracker::open(&ledger).unwrap());
    let outcome = dry.on_event(&event);

    assert_eq!(outcome.state, PipelineState::At(Phase::PackagePublished));
    assert!(harness.platform.created_tags().is_empty());
    assert!(harness.platform.created_releases().is_empty());
    assert!(harness.index.uploads().is_empty());
    assert!(harness.platform.comments().is_empty());
    let record = dry.status().unwrap();
    assert!(record.dry_run);
    assert!(!dry.state().has_released(SemVer::new(1, 1, 0)));
    drop(dry);

    // A real run afterwards is not deduplicated by the dry-run record
    let mut real = harness.pipeline_with(false, StateTracker::open(&ledger).unwrap());
    let outcome = real.on_event(&event);
    assert_eq!(outcome.state, PipelineState::At(Phase::PackagePublished));
    assert_eq!(harness.platform.created_tags().len(), 1);
    assert_eq!(real.state().records().len(), 2);
}

#[test]
fn test_dry_run_issue_opens_nothing() {
    let harness = Harness::new("trigger_on_issue = true\n");
    let mut pipeline = harness.pipeline_with(true, StateTracker::in_memory());

    let outcome = pipeline.on_event(&RepositoryEvent::IssueOpened(Issue {
        number: 9,
        title: "1.0.0 release".to_string(),
        ..Issue::default()
    }));

    assert_eq!(outcome.state, PipelineState::At(Phase::AwaitingMerge));
    assert!(outcome.warnings.contains(&PipelineWarning::NoVersionFile));
    assert!(harness.platform.created_prs().is_empty());
    assert!(harness.copy.pushed().is_empty());
    assert!(harness.files.get("CHANGELOG.md").is_none());
    assert!(pipeline.state().pending().is_empty());
}

#[test]
fn test_replayed_event_is_idempotent() {
    let harness = Harness::new("pypi = false\n");
    harness.platform.add_tag("v2.3.4", "0000aaa");
    let mut pipeline = harness.pipeline();
    let event = merged_pr(40, "new patch release", "f00f");

    let first = pipeline.on_event(&event);
    assert_eq!(first.state, PipelineState::At(Phase::PlatformReleased));
    assert_eq!(first.version, Some(SemVer::new(2, 3, 5)));

    let second = pipeline.on_event(&event);
    assert!(!second.is_failed());
    assert_eq!(
        second.warnings,
        vec![PipelineWarning::AlreadyReleased {
            version: SemVer::new(2, 3, 5)
        }]
    );
    assert_eq!(harness.platform.created_tags().len(), 1);
    assert_eq!(harness.platform.created_releases().len(), 1);
    assert_eq!(pipeline.state().records().len(), 1);
}

#[test]
fn test_failed_upload_is_retryable_and_resumes() {
    let harness = Harness::new("");
    harness.platform.add_tag("v0.4.0", "0000aaa");
    harness.index.fail_uploads(true);
    let mut pipeline = harness.pipeline();
    let event = merged_pr(50, "0.5.0 release", "abad1dea");

    let failed = pipeline.on_event(&event);
    assert!(matches!(
        failed.state,
        PipelineState::Failed {
            phase: Phase::PackagePublished,
            ..
        }
    ));
    assert!(!failed.is_settled());
    assert!(pipeline.status().is_none());

    harness.index.fail_uploads(false);
    let retried = pipeline.on_event(&event);
    assert_eq!(retried.state, PipelineState::At(Phase::PackagePublished));
    assert_eq!(harness.platform.created_tags().len(), 1);
    assert_eq!(harness.platform.created_releases().len(), 1);
    assert!(retried
        .warnings
        .contains(&PipelineWarning::DuplicateRelease {
            tag: "v0.5.0".to_string()
        }));
    assert_eq!(harness.index.uploads().len(), 1);
}
