use serde::Deserialize;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{ReleaseError, Result};
use crate::events::{EventSource, RepositoryEvent};
use crate::platform::gh::{GhIssue, GhPull};
use crate::platform::{Issue, PullRequest};

/// A raw delivery: the `X-GitHub-Event` header value (if known) and the body
#[derive(Debug, Clone)]
pub struct WebhookDelivery {
    pub event_type: Option<String>,
    pub body: String,
}

#[derive(Debug, Deserialize)]
struct Payload {
    #[serde(default)]
    action: String,
    #[serde(default)]
    issue: Option<GhIssue>,
    #[serde(default)]
    pull_request: Option<serde_json::Value>,
}

/// Map a GitHub webhook payload onto a repository event
///
/// Only `issues`/`opened` and `pull_request`/`closed` with `merged: true`
/// produce events; every other delivery is `Ok(None)`. Without an explicit
/// event type it is inferred from the payload shape.
pub fn parse_payload(event_type: Option<&str>, body: &str) -> Result<Option<RepositoryEvent>> {
    let payload: Payload = serde_json::from_str(body)
        .map_err(|e| ReleaseError::transport(format!("malformed webhook payload: {}", e)))?;

    let event_type = match event_type {
        Some(kind) => kind,
        None if payload.pull_request.is_some() => "pull_request",
        None if payload.issue.is_some() => "issues",
        None => return Ok(None),
    };

    match (event_type, payload.action.as_str()) {
        ("issues", "opened") => {
            let issue = payload
                .issue
                .ok_or_else(|| ReleaseError::transport("issues payload without issue"))?;
            if issue.is_pull_request() {
                return Ok(None);
            }
            Ok(Some(RepositoryEvent::IssueOpened(Issue::from(issue))))
        }
        ("pull_request", "closed") => {
            let value = payload.pull_request.ok_or_else(|| {
                ReleaseError::transport("pull_request payload without pull_request")
            })?;
            let merged = value
                .get("merged")
                .and_then(|m| m.as_bool())
                .unwrap_or(false);
            if !merged {
                return Ok(None);
            }
            let pull: GhPull = serde_json::from_value(value)
                .map_err(|e| ReleaseError::transport(format!("malformed pull_request: {}", e)))?;
            Ok(Some(RepositoryEvent::PullRequestMerged(PullRequest::from(pull))))
        }
        (kind, action) => {
            debug!("ignoring webhook {}/{}", kind, action);
            Ok(None)
        }
    }
}

/// Event source fed by a webhook listener over a channel
pub struct WebhookSource {
    deliveries: Receiver<WebhookDelivery>,
    wait: Duration,
}

impl WebhookSource {
    /// `wait` bounds how long one batch blocks for the first delivery
    pub fn new(deliveries: Receiver<WebhookDelivery>, wait: Duration) -> Self {
        WebhookSource { deliveries, wait }
    }

    fn decode(&self, delivery: WebhookDelivery, events: &mut Vec<RepositoryEvent>) {
        match parse_payload(delivery.event_type.as_deref(), &delivery.body) {
            Ok(Some(event)) => events.push(event),
            Ok(None) => {}
            Err(e) => warn!("dropping webhook delivery: {}", e),
        }
    }
}

impl EventSource for WebhookSource {
    fn next_batch(&mut self) -> Result<Vec<RepositoryEvent>> {
        let mut events = Vec::new();
        match self.deliveries.recv_timeout(self.wait) {
            Ok(delivery) => self.decode(delivery, &mut events),
            Err(RecvTimeoutError::Timeout) => return Ok(events),
            Err(RecvTimeoutError::Disconnected) => {
                return Err(ReleaseError::transport("webhook listener has shut down"))
            }
        }
        while let Ok(delivery) = self.deliveries.try_recv() {
            self.decode(delivery, &mut events);
        }
        Ok(events)
    }

    /// Deliveries are consumed on receipt; GitHub redelivery covers failures
    fn acknowledge(&mut self, _event: &RepositoryEvent) -> Result<()> {
        Ok(())
    }
}
