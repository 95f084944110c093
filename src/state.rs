//! Durable record of completed releases
//!
//! The ledger is a JSON document rewritten atomically on every change. It
//! holds the append-only release records, the release pull requests the bot
//! opened and is waiting on, and the polling cursor.

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::domain::SemVer;
use crate::error::{ReleaseError, Result};

/// One completed version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseRecord {
    pub version: SemVer,
    pub tag_ref: String,
    pub created_at: DateTime<Utc>,
    pub pypi_published: bool,
    pub dry_run: bool,
    /// Merged release pull request the version was cut from
    #[serde(default)]
    pub source_pr: Option<u64>,
}

/// A release pull request opened by the bot and not merged yet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRelease {
    pub version: SemVer,
    pub pr_number: u64,
    pub branch: String,
    pub issue_number: Option<u64>,
    pub opened_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Ledger {
    #[serde(default)]
    records: Vec<ReleaseRecord>,
    #[serde(default)]
    pending: Vec<PendingRelease>,
    #[serde(default)]
    cursor: Option<DateTime<Utc>>,
}

impl Ledger {
    fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for record in &self.records {
            if !seen.insert((record.version, record.dry_run)) {
                return Err(ReleaseError::corruption(format!(
                    "ledger holds two {} records for version {}",
                    if record.dry_run { "dry-run" } else { "release" },
                    record.version
                )));
            }
        }
        Ok(())
    }
}

/// Tracks released versions and enforces at-most-once release per version
///
/// Single writer: the pipeline owning the tracker is the only mutator. Every
/// change is written to disk before it becomes visible in memory.
#[derive(Debug)]
pub struct StateTracker {
    path: Option<PathBuf>,
    ledger: Ledger,
}

impl StateTracker {
    /// Open (or start) the ledger at `path`
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let ledger = if path.exists() {
            let content = fs::read_to_string(&path)?;
            if content.trim().is_empty() {
                Ledger::default()
            } else {
                serde_json::from_str(&content).map_err(|e| {
                    ReleaseError::corruption(format!("cannot parse {}: {}", path.display(), e))
                })?
            }
        } else {
            Ledger::default()
        };
        ledger.validate()?;

        debug!(
            "loaded {} release records from {}",
            ledger.records.len(),
            path.display()
        );
        Ok(StateTracker {
            path: Some(path),
            ledger,
        })
    }

    /// A tracker that never touches disk
    pub fn in_memory() -> Self {
        StateTracker {
            path: None,
            ledger: Ledger::default(),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Whether a real (non-dry-run) release of `version` completed
    pub fn has_released(&self, version: SemVer) -> bool {
        self.ledger
            .records
            .iter()
            .any(|r| r.version == version && !r.dry_run)
    }

    /// Whether a real release was already cut from pull request `pr_number`
    pub fn released_from_pr(&self, pr_number: u64) -> Option<&ReleaseRecord> {
        self.ledger
            .records
            .iter()
            .find(|r| !r.dry_run && r.source_pr == Some(pr_number))
    }

    /// Append a record
    ///
    /// Recording the same version again is a no-op returning `Ok(false)`.
    /// Recording it with a different tag means the ledger no longer describes
    /// upstream and is `StateCorruption`.
    pub fn record(&mut self, record: ReleaseRecord) -> Result<bool> {
        if let Some(existing) = self
            .ledger
            .records
            .iter()
            .find(|r| r.version == record.version && r.dry_run == record.dry_run)
        {
            if existing.tag_ref != record.tag_ref {
                return Err(ReleaseError::corruption(format!(
                    "version {} already recorded as {}, refusing {}",
                    record.version, existing.tag_ref, record.tag_ref
                )));
            }
            debug!("version {} already recorded", record.version);
            return Ok(false);
        }

        info!(
            "recording {}release {} ({})",
            if record.dry_run { "dry-run " } else { "" },
            record.version,
            record.tag_ref
        );
        let mut next = self.ledger.clone();
        next.records.push(record);
        self.commit(next)?;
        Ok(true)
    }

    /// Highest real release, dry-runs excluded
    pub fn latest_release(&self) -> Option<SemVer> {
        self.ledger
            .records
            .iter()
            .filter(|r| !r.dry_run)
            .map(|r| r.version)
            .max()
    }

    /// The most recently appended record
    pub fn status(&self) -> Option<&ReleaseRecord> {
        self.ledger.records.last()
    }

    pub fn records(&self) -> &[ReleaseRecord] {
        &self.ledger.records
    }

    pub fn add_pending(&mut self, pending: PendingRelease) -> Result<()> {
        let mut next = self.ledger.clone();
        next.pending.retain(|p| p.version != pending.version);
        next.pending.push(pending);
        self.commit(next)
    }

    pub fn pending(&self) -> &[PendingRelease] {
        &self.ledger.pending
    }

    pub fn pending_for_pr(&self, pr_number: u64) -> Option<&PendingRelease> {
        self.ledger.pending.iter().find(|p| p.pr_number == pr_number)
    }

    pub fn pending_for_version(&self, version: SemVer) -> Option<&PendingRelease> {
        self.ledger.pending.iter().find(|p| p.version == version)
    }

    pub fn remove_pending(&mut self, version: SemVer) -> Result<()> {
        if self.pending_for_version(version).is_none() {
            return Ok(());
        }
        let mut next = self.ledger.clone();
        next.pending.retain(|p| p.version != version);
        self.commit(next)
    }

    pub fn cursor(&self) -> Option<DateTime<Utc>> {
        self.ledger.cursor
    }

    /// Move the polling cursor forward; it never moves back
    pub fn advance_cursor(&mut self, to: DateTime<Utc>) -> Result<()> {
        if self.ledger.cursor.is_some_and(|c| c >= to) {
            return Ok(());
        }
        let mut next = self.ledger.clone();
        next.cursor = Some(to);
        self.commit(next)
    }

    /// Persist `next`, then adopt it; on failure the old ledger stays current
    fn commit(&mut self, next: Ledger) -> Result<()> {
        if let Some(path) = &self.path {
            save(path, &next)?;
        }
        self.ledger = next;
        Ok(())
    }
}

fn save(path: &Path, ledger: &Ledger) -> Result<()> {
    let data = serde_json::to_vec_pretty(ledger)
        .map_err(|e| ReleaseError::corruption(format!("cannot encode ledger: {}", e)))?;
    fs::create_dir_all(parent_dir(path))?;

    let lock_path = path.with_extension("lock");
    let lock = OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(&lock_path)?;
    lock.lock_exclusive()?;

    let result = write_atomic(path, &data);
    lock.unlock()?;
    result
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let mut tmp = tempfile::NamedTempFile::new_in(parent_dir(path))?;
    tmp.write_all(data)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| ReleaseError::Io(e.error))?;
    Ok(())
}
