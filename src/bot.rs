//! Driver that feeds events to the pipeline of one repository
//!
//! The pipeline sits behind a mutex, so at most one release decision runs
//! at a time no matter how many producers deliver events.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, TryLockError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::error::{ReleaseError, Result};
use crate::events::{EventSource, RepositoryEvent};
use crate::lease::CheckoutLease;
use crate::pipeline::{Phase, PipelineOutcome, PipelineState, ReleasePipeline};
use crate::state::ReleaseRecord;

const STOP_POLL: Duration = Duration::from_millis(200);

/// Serializes release decisions for one repository
pub struct ReleaseBot {
    pipeline: Mutex<ReleasePipeline>,
    halted: Mutex<Option<String>>,
    refresh_interval: Duration,
    _lease: Option<CheckoutLease>,
}

impl ReleaseBot {
    pub fn new(pipeline: ReleasePipeline) -> Self {
        let refresh_interval = pipeline.config().refresh_interval();
        ReleaseBot {
            pipeline: Mutex::new(pipeline),
            halted: Mutex::new(None),
            refresh_interval,
            _lease: None,
        }
    }

    /// Hold `lease` for as long as the bot lives
    pub fn with_lease(mut self, lease: CheckoutLease) -> Self {
        self._lease = Some(lease);
        self
    }

    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    fn pipeline(&self) -> MutexGuard<'_, ReleasePipeline> {
        self.pipeline.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Why the bot stopped processing, if it did
    pub fn halted(&self) -> Option<String> {
        self.halted.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn halted_outcome(&self) -> Option<PipelineOutcome> {
        let reason = self.halted()?;
        Some(rejected(ReleaseError::corruption(reason)))
    }

    fn dispatch(&self, pipeline: &mut ReleasePipeline, event: &RepositoryEvent) -> PipelineOutcome {
        let outcome = pipeline.on_event(event);
        if let Some(e) = outcome.error.as_ref().filter(|e| e.is_fatal()) {
            error!("halting release processing: {}", e);
            *self.halted.lock().unwrap_or_else(|e| e.into_inner()) = Some(e.to_string());
        }
        outcome
    }

    /// Handle `event`, waiting for any run already in flight
    pub fn on_event(&self, event: &RepositoryEvent) -> PipelineOutcome {
        if let Some(outcome) = self.halted_outcome() {
            return outcome;
        }
        let mut pipeline = self.pipeline();
        self.dispatch(&mut pipeline, event)
    }

    /// Handle `event` only if no other run is in flight; otherwise `Busy`
    pub fn try_on_event(&self, event: &RepositoryEvent) -> PipelineOutcome {
        if let Some(outcome) = self.halted_outcome() {
            return outcome;
        }
        let mut pipeline = match self.pipeline.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                debug!("rejecting {}: a release run is in flight", event);
                return rejected(ReleaseError::Busy(format!(
                    "a release run is in flight, {} was not handled",
                    event
                )));
            }
        };
        self.dispatch(&mut pipeline, event)
    }

    /// Last recorded release
    pub fn status(&self) -> Option<ReleaseRecord> {
        self.pipeline().status().cloned()
    }

    /// Polling cursor the ledger resumes from
    pub fn cursor(&self) -> Option<DateTime<Utc>> {
        self.pipeline().cursor()
    }

    /// Handle one batch from `source`
    ///
    /// Settled events are acknowledged. The batch stops at the first event
    /// that failed retryably, leaving it and everything after it for the next
    /// batch so events are handled in order.
    pub fn run_once(&self, source: &mut dyn EventSource) -> Result<Vec<PipelineOutcome>> {
        if let Some(reason) = self.halted() {
            return Err(ReleaseError::corruption(reason));
        }
        let events = source.next_batch()?;
        let mut outcomes = Vec::with_capacity(events.len());

        for event in events {
            let outcome = self.on_event(&event);
            if let Some(reason) = self.halted() {
                return Err(ReleaseError::corruption(reason));
            }
            if !outcome.is_settled() {
                warn!("{} will be retried on the next batch", event);
                outcomes.push(outcome);
                break;
            }
            source.acknowledge(&event)?;
            self.pipeline().checkpoint(&event)?;
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    /// Poll `source` every refresh interval until `stop` is set
    ///
    /// Transport failures of the source itself are logged and retried; only
    /// a halt ends the loop early.
    pub fn run(&self, source: &mut dyn EventSource, stop: &AtomicBool) -> Result<()> {
        info!(
            "watching for release requests every {}s",
            self.refresh_interval.as_secs()
        );
        while !stop.load(Ordering::SeqCst) {
            match self.run_once(source) {
                Ok(outcomes) => debug!("batch handled {} events", outcomes.len()),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => warn!("fetching events failed: {}", e),
            }

            let deadline = Instant::now() + self.refresh_interval;
            while !stop.load(Ordering::SeqCst) && Instant::now() < deadline {
                thread::sleep(STOP_POLL.min(self.refresh_interval));
            }
        }
        info!("stopped");
        Ok(())
    }
}

fn rejected(error: ReleaseError) -> PipelineOutcome {
    PipelineOutcome {
        state: PipelineState::Failed {
            phase: Phase::Idle,
            reason: error.to_string(),
        },
        version: None,
        error: Some(error),
        warnings: Vec::new(),
    }
}
