use thiserror::Error;

use crate::domain::SemVer;

/// Unified error type for release-bot operations
#[derive(Error, Debug)]
pub enum ReleaseError {
    #[error("Malformed version: {0}")]
    MalformedVersion(String),

    #[error("Version {requested} is not newer than the latest release {latest}")]
    VersionNotMonotonic { requested: SemVer, latest: SemVer },

    #[error("No base version to apply '{0}' to; release an explicit version first")]
    NoBaseVersion(String),

    #[error("Changelog has no section for version {0}")]
    VersionHeadingNotFound(SemVer),

    #[error("Release already exists for tag {0}")]
    DuplicateRelease(String),

    #[error("Merge conflict: {0}")]
    MergeConflict(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("State corruption: {0}")]
    StateCorruption(String),

    #[error("Repository busy: {0}")]
    Busy(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Git operation failed: {0}")]
    Git(#[from] git2::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience type alias for Results in release-bot
pub type Result<T> = std::result::Result<T, ReleaseError>;

impl ReleaseError {
    /// Create a malformed version error with context
    pub fn malformed(msg: impl Into<String>) -> Self {
        ReleaseError::MalformedVersion(msg.into())
    }

    /// Create a merge conflict error with context
    pub fn merge_conflict(msg: impl Into<String>) -> Self {
        ReleaseError::MergeConflict(msg.into())
    }

    /// Create a transport error with context
    pub fn transport(msg: impl Into<String>) -> Self {
        ReleaseError::Transport(msg.into())
    }

    /// Create a state corruption error with context
    pub fn corruption(msg: impl Into<String>) -> Self {
        ReleaseError::StateCorruption(msg.into())
    }

    /// Create a configuration error with context
    pub fn config(msg: impl Into<String>) -> Self {
        ReleaseError::Config(msg.into())
    }

    /// Parsing and computation failures. These are detected before any
    /// external call, so the trigger is dropped with nothing to undo.
    pub fn is_computation(&self) -> bool {
        matches!(
            self,
            ReleaseError::MalformedVersion(_)
                | ReleaseError::VersionNotMonotonic { .. }
                | ReleaseError::NoBaseVersion(_)
                | ReleaseError::VersionHeadingNotFound(_)
        )
    }

    /// Failures after which re-invoking the pipeline for the same trigger is
    /// expected to make progress.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ReleaseError::Transport(_)
                | ReleaseError::MergeConflict(_)
                | ReleaseError::Busy(_)
                | ReleaseError::Git(_)
                | ReleaseError::Io(_)
        )
    }

    /// Failures that must stop all processing for the repository.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ReleaseError::StateCorruption(_))
    }
}
