use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::deadline::bounded;
use crate::error::Result;
use crate::events::{EventSource, RepositoryEvent};
use crate::platform::Platform;

/// Event source that snapshots the platform on every batch
///
/// Merged pull requests are read from a `merged_at` cursor which only moves
/// on acknowledge. Open issues are emitted until acknowledged. Acknowledged
/// numbers are forgotten once no snapshot can return them again.
pub struct PollingSource {
    platform: Arc<dyn Platform>,
    timeout: Duration,
    cursor: Option<DateTime<Utc>>,
    /// Acknowledged pull requests and their merge time
    acknowledged_prs: HashMap<u64, Option<DateTime<Utc>>>,
    acknowledged_issues: HashSet<u64>,
    watch_issues: bool,
}

impl PollingSource {
    pub fn new(platform: Arc<dyn Platform>, timeout: Duration, cursor: Option<DateTime<Utc>>) -> Self {
        PollingSource {
            platform,
            timeout,
            cursor,
            acknowledged_prs: HashMap::new(),
            acknowledged_issues: HashSet::new(),
            watch_issues: true,
        }
    }

    /// Skip the open-issue snapshot (projects without issue triggers)
    pub fn without_issues(mut self) -> Self {
        self.watch_issues = false;
        self
    }

    pub fn cursor(&self) -> Option<DateTime<Utc>> {
        self.cursor
    }
}

impl EventSource for PollingSource {
    fn next_batch(&mut self) -> Result<Vec<RepositoryEvent>> {
        let platform = Arc::clone(&self.platform);
        let cursor = self.cursor;
        let merged = bounded("merged_prs_since", self.timeout, move || {
            platform.merged_prs_since(cursor)
        })?;

        let mut events: Vec<RepositoryEvent> = merged
            .into_iter()
            .filter(|pr| !self.acknowledged_prs.contains_key(&pr.number))
            .map(RepositoryEvent::PullRequestMerged)
            .collect();

        if self.watch_issues {
            let platform = Arc::clone(&self.platform);
            let issues = bounded("open_issues", self.timeout, move || platform.open_issues())?;
            let open: HashSet<u64> = issues.iter().map(|issue| issue.number).collect();
            self.acknowledged_issues.retain(|number| open.contains(number));
            events.extend(
                issues
                    .into_iter()
                    .filter(|issue| !self.acknowledged_issues.contains(&issue.number))
                    .map(RepositoryEvent::IssueOpened),
            );
        }

        debug!("poll produced {} events", events.len());
        Ok(events)
    }

    fn acknowledge(&mut self, event: &RepositoryEvent) -> Result<()> {
        match event {
            RepositoryEvent::PullRequestMerged(pr) => {
                self.acknowledged_prs.insert(pr.number, pr.merged_at);
                if let Some(merged_at) = pr.merged_at {
                    if self.cursor.map_or(true, |c| merged_at > c) {
                        self.cursor = Some(merged_at);
                    }
                }
                // The cursor is inclusive: only merges at or after it come back
                if let Some(cursor) = self.cursor {
                    self.acknowledged_prs
                        .retain(|_, merged_at| merged_at.map_or(true, |at| at >= cursor));
                }
            }
            RepositoryEvent::IssueOpened(issue) => {
                self.acknowledged_issues.insert(issue.number);
            }
        }
        Ok(())
    }
}
