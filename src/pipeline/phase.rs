use std::fmt;

use crate::domain::SemVer;
use crate::error::{ReleaseError, Result};
use crate::pipeline::PipelineWarning;

/// Progress of one release attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Idle,
    TriggerDetected,
    BranchPrepared,
    VersionComputed,
    ChangelogBuilt,
    PrOpened,
    AwaitingMerge,
    Tagged,
    PlatformReleased,
    PackagePublished,
}

impl Phase {
    /// Whether the pipeline may move from `self` straight to `next`
    ///
    /// Issue-origin runs leave `ChangelogBuilt` for `PrOpened`; merged pull
    /// requests leave it for `Tagged`.
    pub fn can_advance_to(self, next: Phase) -> bool {
        use Phase::*;
        matches!(
            (self, next),
            (Idle, TriggerDetected)
                | (TriggerDetected, BranchPrepared)
                | (BranchPrepared, VersionComputed)
                | (VersionComputed, ChangelogBuilt)
                | (ChangelogBuilt, PrOpened)
                | (PrOpened, AwaitingMerge)
                | (ChangelogBuilt, Tagged)
                | (Tagged, PlatformReleased)
                | (PlatformReleased, PackagePublished)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "IDLE",
            Phase::TriggerDetected => "TRIGGER_DETECTED",
            Phase::BranchPrepared => "BRANCH_PREPARED",
            Phase::VersionComputed => "VERSION_COMPUTED",
            Phase::ChangelogBuilt => "CHANGELOG_BUILT",
            Phase::PrOpened => "PR_OPENED",
            Phase::AwaitingMerge => "AWAITING_MERGE",
            Phase::Tagged => "TAGGED",
            Phase::PlatformReleased => "PLATFORM_RELEASED",
            Phase::PackagePublished => "PACKAGE_PUBLISHED",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a run stands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineState {
    At(Phase),
    /// `phase` is the phase the run was working towards when it failed
    Failed { phase: Phase, reason: String },
}

impl PipelineState {
    pub fn phase(&self) -> Phase {
        match self {
            PipelineState::At(phase) | PipelineState::Failed { phase, .. } => *phase,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, PipelineState::Failed { .. })
    }

    /// Move to `next`, refusing transitions the state machine does not have
    pub fn advance(&mut self, next: Phase) -> Result<()> {
        match self {
            PipelineState::At(current) if current.can_advance_to(next) => {
                *current = next;
                Ok(())
            }
            other => Err(ReleaseError::corruption(format!(
                "illegal pipeline transition {} -> {}",
                other, next
            ))),
        }
    }
}

impl Default for PipelineState {
    fn default() -> Self {
        PipelineState::At(Phase::Idle)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::At(phase) => write!(f, "{}", phase),
            PipelineState::Failed { phase, reason } => write!(f, "FAILED({}, {})", phase, reason),
        }
    }
}

/// Result of handing one event to the pipeline
#[derive(Debug)]
pub struct PipelineOutcome {
    pub state: PipelineState,
    pub version: Option<SemVer>,
    pub error: Option<ReleaseError>,
    pub warnings: Vec<PipelineWarning>,
}

impl PipelineOutcome {
    /// The event was not a release request (or was already handled)
    pub fn ignored() -> Self {
        PipelineOutcome {
            state: PipelineState::At(Phase::Idle),
            version: None,
            error: None,
            warnings: Vec::new(),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.state.is_failed()
    }

    /// Nothing was attempted for this event
    pub fn is_ignored(&self) -> bool {
        self.state == PipelineState::At(Phase::Idle)
    }

    /// The event may be acknowledged: success, skip, or a failure that
    /// re-delivery cannot fix
    pub fn is_settled(&self) -> bool {
        match &self.error {
            Some(error) => !error.is_retryable(),
            None => !self.is_failed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merged_pr_path_is_legal() {
        let mut state = PipelineState::default();
        for phase in [
            Phase::TriggerDetected,
            Phase::BranchPrepared,
            Phase::VersionComputed,
            Phase::ChangelogBuilt,
            Phase::Tagged,
            Phase::PlatformReleased,
            Phase::PackagePublished,
        ] {
            state.advance(phase).unwrap();
        }
        assert_eq!(state, PipelineState::At(Phase::PackagePublished));
    }

    #[test]
    fn test_issue_path_halts_awaiting_merge() {
        let mut state = PipelineState::At(Phase::ChangelogBuilt);
        state.advance(Phase::PrOpened).unwrap();
        state.advance(Phase::AwaitingMerge).unwrap();
        assert!(state.advance(Phase::Tagged).is_err());
    }

    #[test]
    fn test_skipping_phases_is_rejected() {
        let mut state = PipelineState::At(Phase::VersionComputed);
        assert!(matches!(
            state.advance(Phase::Tagged),
            Err(ReleaseError::StateCorruption(_))
        ));

        let mut failed = PipelineState::Failed {
            phase: Phase::Tagged,
            reason: "timeout".to_string(),
        };
        assert!(failed.advance(Phase::PlatformReleased).is_err());
        assert_eq!(failed.to_string(), "FAILED(TAGGED, timeout)");
    }

    #[test]
    fn test_outcome_settlement() {
        let mut outcome = PipelineOutcome::ignored();
        assert!(outcome.is_ignored());
        assert!(outcome.is_settled());

        outcome.state = PipelineState::Failed {
            phase: Phase::Tagged,
            reason: "timeout".to_string(),
        };
        outcome.error = Some(ReleaseError::transport("timeout"));
        assert!(!outcome.is_settled());

        outcome.error = Some(ReleaseError::malformed("1.x"));
        assert!(outcome.is_settled());
    }
}
