// tests/bot_test.rs
use chrono::{TimeZone, Utc};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use release_bot::config::BotConfig;
use release_bot::domain::SemVer;
use release_bot::error::ReleaseError;
use release_bot::events::{EventSource, PollingSource, RepositoryEvent};
use release_bot::git::{MemoryFiles, MockWorkingCopy};
use release_bot::pipeline::{Phase, PipelineState, PipelineWarning};
use release_bot::platform::{Issue, MockPlatform, PullRequest};
use release_bot::publish::MockPackageIndex;
use release_bot::state::{ReleaseRecord, StateTracker};
use release_bot::{Collaborators, ReleaseBot, ReleasePipeline};

const RELEASE_CONF: &str = "pypi = false\ntrigger_on_issue = true\n";

fn pipeline(platform: &MockPlatform, dry_run: bool, state: StateTracker) -> ReleasePipeline {
    let config = BotConfig {
        repository_owner: "acme".to_string(),
        repository_name: "widget".to_string(),
        github_username: Some("release-bot".to_string()),
        dry_run,
        ..BotConfig::default()
    };
    let collaborators = Collaborators {
        working_copy: Box::new(MockWorkingCopy::new("head")),
        files: Box::new(MemoryFiles::new().with_file("release-conf.toml", RELEASE_CONF)),
        platform: Arc::new(platform.clone()),
        index: Arc::new(MockPackageIndex::new()),
    };
    ReleasePipeline::new(config, collaborators, state).unwrap()
}

fn merged(number: u64, title: &str) -> RepositoryEvent {
    RepositoryEvent::PullRequestMerged(PullRequest {
        number,
        title: title.to_string(),
        author: "maintainer".to_string(),
        merge_commit_sha: Some(format!("sha{}", number)),
        merged_at: Some(Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap()),
        ..PullRequest::default()
    })
}

#[test]
fn test_try_on_event_is_busy_while_a_run_is_in_flight() {
    let platform = MockPlatform::new();
    platform.set_delay(Duration::from_millis(400));
    let bot = Arc::new(ReleaseBot::new(pipeline(
        &platform,
        false,
        StateTracker::in_memory(),
    )));

    let worker = {
        let bot = Arc::clone(&bot);
        thread::spawn(move || bot.on_event(&merged(1, "0.1.0 release")))
    };
    thread::sleep(Duration::from_millis(100));

    let rejected = bot.try_on_event(&merged(2, "0.2.0 release"));
    assert!(matches!(rejected.error, Some(ReleaseError::Busy(_))));
    assert!(!rejected.is_settled());

    let outcome = worker.join().unwrap();
    assert_eq!(outcome.state, PipelineState::At(Phase::PlatformReleased));
    assert_eq!(platform.created_tags().len(), 1);
}

#[test]
fn test_concurrent_deliveries_release_once() {
    let platform = MockPlatform::new();
    platform.set_delay(Duration::from_millis(20));
    let bot = Arc::new(ReleaseBot::new(pipeline(
        &platform,
        false,
        StateTracker::in_memory(),
    )));

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let bot = Arc::clone(&bot);
            thread::spawn(move || bot.on_event(&merged(3, "1.0.0 release")))
        })
        .collect();
    let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert!(outcomes.iter().all(|o| !o.is_failed()));
    assert_eq!(
        outcomes
            .iter()
            .filter(|o| o
                .warnings
                .contains(&PipelineWarning::AlreadyReleased {
                    version: SemVer::new(1, 0, 0)
                }))
            .count(),
        1
    );
    assert_eq!(
        platform.created_tags(),
        vec![("v1.0.0".to_string(), "sha3".to_string())]
    );
    assert_eq!(platform.created_releases().len(), 1);
}

#[test]
fn test_state_corruption_halts_processing() {
    let platform = MockPlatform::new();
    let mut state = StateTracker::in_memory();
    state
        .record(ReleaseRecord {
            version: SemVer::new(1, 1, 0),
            tag_ref: "other-1.1.0".to_string(),
            created_at: Utc::now(),
            pypi_published: false,
            dry_run: true,
            source_pr: Some(1),
        })
        .unwrap();
    let bot = ReleaseBot::new(pipeline(&platform, true, state));

    let outcome = bot.on_event(&merged(8, "1.1.0 release"));
    assert!(matches!(outcome.error, Some(ReleaseError::StateCorruption(_))));
    assert!(bot.halted().is_some());

    let after = bot.on_event(&merged(9, "1.2.0 release"));
    assert!(matches!(after.error, Some(ReleaseError::StateCorruption(_))));
    assert_eq!(after.state.phase(), Phase::Idle);

    let mut source = PollingSource::new(
        Arc::new(platform.clone()),
        Duration::from_secs(5),
        None,
    );
    assert!(bot.run_once(&mut source).is_err());
    let stop = AtomicBool::new(false);
    assert!(bot.run(&mut source, &stop).is_err());
}

#[test]
fn test_polling_from_issue_to_release() {
    let platform = MockPlatform::new();
    platform.add_tag("v0.1.0", "base");
    platform.add_issue(Issue {
        number: 11,
        title: "new minor release".to_string(),
        author: "maintainer".to_string(),
        url: "https://github.com/acme/widget/issues/11".to_string(),
    });
    let bot = ReleaseBot::new(pipeline(&platform, false, StateTracker::in_memory()));
    let mut source = PollingSource::new(
        Arc::new(platform.clone()),
        Duration::from_secs(5),
        None,
    );

    let first = bot.run_once(&mut source).unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].state, PipelineState::At(Phase::AwaitingMerge));
    let prs = platform.created_prs();
    assert_eq!(prs.len(), 1);
    assert_eq!(prs[0].title, "0.2.0 release");

    let merged_at = Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap();
    platform.merge_pr(prs[0].number, "m0020", merged_at).unwrap();

    let second = bot.run_once(&mut source).unwrap();
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].state, PipelineState::At(Phase::PlatformReleased));
    assert_eq!(second[0].version, Some(SemVer::new(0, 2, 0)));
    assert_eq!(
        platform.created_tags(),
        vec![("v0.2.0".to_string(), "m0020".to_string())]
    );
    assert_eq!(bot.cursor(), Some(merged_at));
    assert_eq!(bot.status().map(|r| r.version), Some(SemVer::new(0, 2, 0)));

    assert!(bot.run_once(&mut source).unwrap().is_empty());
    assert!(source.next_batch().unwrap().is_empty());
}
