//! Release decision and orchestration
//!
//! [ReleasePipeline] turns one [RepositoryEvent] into at most one release.
//! Merged release pull requests go through tagging, the platform release and
//! package publishing; release-request issues get a release pull request and
//! stop at [Phase::AwaitingMerge] until that pull request is merged.
//!
//! Every mutating platform or package-index call is preceded by a read that
//! detects an earlier attempt, so re-running a failed event is safe.

mod phase;
mod warning;

pub use phase::{Phase, PipelineOutcome, PipelineState};
pub use warning::PipelineWarning;

use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::changelog::{self, ChangelogBuilder, ChangelogEntry};
use crate::config::{BotConfig, ReleaseConf};
use crate::deadline::bounded;
use crate::domain::{BumpKind, ReleaseIntent, SemVer, TagPattern};
use crate::error::{ReleaseError, Result};
use crate::events::RepositoryEvent;
use crate::git::{FileStore, WorkingCopy};
use crate::platform::{Issue, Platform, PullRequest, Target};
use crate::publish::PackageIndex;
use crate::resolver;
use crate::state::{PendingRelease, ReleaseRecord, StateTracker};
use crate::trigger::{self, ReleaseRequest};
use crate::version_marker::{self, MarkerUpdate};

/// External systems the pipeline acts on
pub struct Collaborators {
    pub working_copy: Box<dyn WorkingCopy>,
    pub files: Box<dyn FileStore>,
    pub platform: Arc<dyn Platform>,
    pub index: Arc<dyn PackageIndex>,
}

/// Release state machine for one monitored repository
///
/// Not reentrant: callers serialize `on_event` (see [crate::bot::ReleaseBot]).
pub struct ReleasePipeline {
    config: BotConfig,
    tag_pattern: TagPattern,
    working_copy: Box<dyn WorkingCopy>,
    files: Box<dyn FileStore>,
    platform: Arc<dyn Platform>,
    index: Arc<dyn PackageIndex>,
    state: StateTracker,
}

/// The version a run works on
struct Computed {
    version: SemVer,
    /// Release the changelog is derived from
    previous: Option<SemVer>,
}

/// Bookkeeping for one `on_event` call
struct Run {
    state: PipelineState,
    target: Phase,
    version: Option<SemVer>,
    warnings: Vec<PipelineWarning>,
}

impl Run {
    fn new() -> Self {
        Run {
            state: PipelineState::default(),
            target: Phase::TriggerDetected,
            version: None,
            warnings: Vec::new(),
        }
    }

    /// Name the phase the following work belongs to
    fn begin(&mut self, phase: Phase) {
        self.target = phase;
    }

    fn reach(&mut self, phase: Phase) -> Result<()> {
        self.target = phase;
        self.state.advance(phase)
    }

    fn warn(&mut self, warning: PipelineWarning) {
        self.warnings.push(warning);
    }

    fn finish(self, result: Result<()>) -> PipelineOutcome {
        match result {
            Ok(()) => PipelineOutcome {
                state: self.state,
                version: self.version,
                error: None,
                warnings: self.warnings,
            },
            Err(e) => PipelineOutcome {
                state: PipelineState::Failed {
                    phase: self.target,
                    reason: e.to_string(),
                },
                version: self.version,
                error: Some(e),
                warnings: self.warnings,
            },
        }
    }
}

impl ReleasePipeline {
    pub fn new(config: BotConfig, collaborators: Collaborators, state: StateTracker) -> Result<Self> {
        config.validate()?;
        let tag_pattern = config.tag_pattern()?;
        Ok(ReleasePipeline {
            config,
            tag_pattern,
            working_copy: collaborators.working_copy,
            files: collaborators.files,
            platform: collaborators.platform,
            index: collaborators.index,
            state,
        })
    }

    pub fn config(&self) -> &BotConfig {
        &self.config
    }

    pub fn state(&self) -> &StateTracker {
        &self.state
    }

    /// The most recently recorded release
    pub fn status(&self) -> Option<&ReleaseRecord> {
        self.state.status()
    }

    /// Persist that `event` was handled, so a restart resumes after it
    pub fn checkpoint(&mut self, event: &RepositoryEvent) -> Result<()> {
        if let RepositoryEvent::PullRequestMerged(PullRequest {
            merged_at: Some(merged_at),
            ..
        }) = event
        {
            self.state.advance_cursor(*merged_at)?;
        }
        Ok(())
    }

    /// Polling cursor persisted by earlier runs
    pub fn cursor(&self) -> Option<DateTime<Utc>> {
        self.state.cursor()
    }

    /// Handle one repository event to completion, skip, or failure
    pub fn on_event(&mut self, event: &RepositoryEvent) -> PipelineOutcome {
        let request = match ReleaseRequest::from_event(event) {
            Ok(Some(request)) => request,
            Ok(None) => {
                debug!("{} is not a release request", event);
                return PipelineOutcome::ignored();
            }
            Err(e) => {
                warn!("dropping {}: {}", event, e);
                return Run::new().finish(Err(e));
            }
        };
        info!(
            "{} by {} requests {}",
            request.source, request.origin_actor, request.requested_version
        );

        let mut run = Run::new();
        let result = self.handle(&mut run, &request, event);
        let outcome = run.finish(result);

        match &outcome.error {
            Some(e) if e.is_fatal() => error!("{}: {}; halting", event, e),
            Some(e) if e.is_computation() => warn!("dropping {}: {}", event, e),
            Some(e) => warn!("{} failed at {}: {}", event, outcome.state.phase(), e),
            None => info!("{} finished at {}", event, outcome.state),
        }
        for warning in &outcome.warnings {
            warn!("{}", warning);
        }
        outcome
    }

    fn handle(&mut self, run: &mut Run, request: &ReleaseRequest, event: &RepositoryEvent) -> Result<()> {
        run.reach(Phase::TriggerDetected)?;
        match event {
            RepositoryEvent::PullRequestMerged(pr) => self.release_merged(run, request, pr),
            RepositoryEvent::IssueOpened(issue) => self.open_release_pr(run, request, issue),
        }
    }

    /// Run a platform call under the call deadline
    fn call<T, F>(&self, label: &str, f: F) -> Result<T>
    where
        F: FnOnce(&dyn Platform) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let platform = Arc::clone(&self.platform);
        bounded(label, self.config.call_timeout(), move || f(platform.as_ref()))
    }

    /// Bookkeeping call whose failure does not fail the release
    fn notify<F>(&self, label: &str, f: F)
    where
        F: FnOnce(&dyn Platform) -> Result<()> + Send + 'static,
    {
        if self.config.dry_run {
            debug!("dry run: skipping {}", label);
            return;
        }
        if let Err(e) = self.call(label, f) {
            warn!("{} failed: {}", label, e);
        }
    }

    fn sync(&self) -> Result<String> {
        self.working_copy
            .sync(&self.config.remote, &self.config.default_branch)
    }

    fn tag_exists(&self, tag: &str) -> Result<bool> {
        let tag = tag.to_string();
        self.call("tag_exists", move |p| p.tag_exists(&tag))
    }

    /// Resolve the intent against recorded releases and upstream tags
    ///
    /// `Ok(None)` means the version was already released. `resuming` is set
    /// when a pending checkpoint shows an earlier attempt on the same release.
    fn compute_version(
        &self,
        run: &mut Run,
        intent: ReleaseIntent,
        resuming: bool,
    ) -> Result<Option<Computed>> {
        if let BumpKind::Explicit(version) = intent {
            if self.state.has_released(version) {
                run.version = Some(version);
                run.warn(PipelineWarning::AlreadyReleased { version });
                return Ok(None);
            }
        }

        let latest_tag = self.call("latest_tag", |p| p.latest_tag())?;
        let recorded = self.state.latest_release();

        let version = match resolver::resolve(recorded.or(latest_tag), intent) {
            Ok(version) => version,
            // The checkpointed attempt stopped after tagging
            Err(ReleaseError::VersionNotMonotonic { requested, .. })
                if resuming && recorded.is_none() && Some(requested) == latest_tag =>
            {
                requested
            }
            Err(e) => return Err(e),
        };
        run.version = Some(version);

        if let Some(latest) = latest_tag {
            if version < latest {
                return Err(ReleaseError::VersionNotMonotonic {
                    requested: version,
                    latest,
                });
            }
        }

        let previous = if latest_tag == Some(version) {
            recorded
        } else {
            latest_tag.max(recorded)
        };
        info!("{} resolves to {}", intent, version);
        Ok(Some(Computed { version, previous }))
    }

    fn build_changelog(&self, target: &Computed, conf: &ReleaseConf) -> Result<ChangelogEntry> {
        let previous_tag = target.previous.map(|v| self.tag_pattern.format(&v));
        let commits = self.working_copy.commits_since(previous_tag.as_deref())?;
        let builder = match conf.generator() {
            Some(generator) => ChangelogBuilder::with_generator(generator),
            None => ChangelogBuilder::new(),
        };
        Ok(builder.build(target.version, &commits, Some(conf.changelog.as_slice())))
    }

    /// Release notes for a merged release: the section the pull request wrote,
    /// or derived ones when the file has none
    fn changelog_for_merge(
        &self,
        run: &mut Run,
        target: &Computed,
        conf: &ReleaseConf,
    ) -> Result<ChangelogEntry> {
        let file = &self.config.changelog_file;
        if let Some(contents) = self.files.read_optional(file)? {
            match changelog::extract(&contents, target.version) {
                Ok(entry) if !entry.items.is_empty() => {
                    debug!("release notes taken from {}", file.display());
                    return Ok(entry);
                }
                Ok(_) | Err(ReleaseError::VersionHeadingNotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        run.warn(PipelineWarning::MissingChangelogSection {
            version: target.version,
            file: file.clone(),
        });
        self.build_changelog(target, conf)
    }

    fn release_merged(&mut self, run: &mut Run, request: &ReleaseRequest, pr: &PullRequest) -> Result<()> {
        if let Some(record) = self.state.released_from_pr(pr.number) {
            run.version = Some(record.version);
            run.warn(PipelineWarning::AlreadyReleased {
                version: record.version,
            });
            return Ok(());
        }
        // A retry of a bump request must not bump again
        let pending = self.state.pending_for_pr(pr.number).cloned();
        let intent = match &pending {
            Some(pending) => BumpKind::Explicit(pending.version),
            None => request.requested_version,
        };

        run.begin(Phase::BranchPrepared);
        let head = self.sync()?;
        let conf = ReleaseConf::load(self.files.as_ref(), &self.config)?;
        run.reach(Phase::BranchPrepared)?;

        run.begin(Phase::VersionComputed);
        let Some(target) = self.compute_version(run, intent, pending.is_some())? else {
            return Ok(());
        };
        run.reach(Phase::VersionComputed)?;
        let version = target.version;

        run.begin(Phase::ChangelogBuilt);
        let entry = self.changelog_for_merge(run, &target, &conf)?;
        run.reach(Phase::ChangelogBuilt)?;

        let tag = self.tag_pattern.format(&version);
        let rev = pr.merge_commit_sha.clone().unwrap_or(head);
        if !self.config.dry_run && pending.is_none() {
            self.state.add_pending(PendingRelease {
                version,
                pr_number: pr.number,
                branch: pr.head_branch.clone(),
                issue_number: None,
                opened_at: Utc::now(),
            })?;
        }

        run.begin(Phase::Tagged);
        self.create_tag(run, &tag, &rev)?;
        run.reach(Phase::Tagged)?;

        run.begin(Phase::PlatformReleased);
        self.create_release(run, &tag, &entry)?;
        run.reach(Phase::PlatformReleased)?;

        let mut published = false;
        if conf.pypi {
            run.begin(Phase::PackagePublished);
            published = self.publish(run, &conf, version, &rev)?;
            run.reach(Phase::PackagePublished)?;
        }

        self.state.record(ReleaseRecord {
            version,
            tag_ref: tag.clone(),
            created_at: Utc::now(),
            pypi_published: published,
            dry_run: self.config.dry_run,
            source_pr: Some(pr.number),
        })?;
        if self.config.dry_run {
            return Ok(());
        }

        let mut message = format!("Released {} as `{}`.", version, tag);
        if published {
            message.push_str(&format!(
                " {} {} is on PyPI.",
                conf.pypi_project(),
                version
            ));
        }
        let number = pr.number;
        self.notify("comment", move |p| p.comment(Target::PullRequest(number), &message));

        if let Some(issue) = pending.and_then(|p| p.issue_number) {
            let message = format!("{} has been released as `{}`.", version, tag);
            self.notify("comment", move |p| p.comment(Target::Issue(issue), &message));
        }
        self.state.remove_pending(version)?;
        Ok(())
    }

    fn create_tag(&self, run: &mut Run, tag: &str, rev: &str) -> Result<()> {
        if self.tag_exists(tag)? {
            run.warn(PipelineWarning::AlreadyTagged {
                tag: tag.to_string(),
            });
            return Ok(());
        }
        if self.config.dry_run {
            info!("dry run: would tag {} as {}", rev, tag);
            return Ok(());
        }
        let (name, target) = (tag.to_string(), rev.to_string());
        self.call("create_tag", move |p| p.create_tag(&target, &name))?;
        info!("tagged {} as {}", rev, tag);
        Ok(())
    }

    fn create_release(&self, run: &mut Run, tag: &str, entry: &ChangelogEntry) -> Result<()> {
        let name = tag.to_string();
        if self.call("release_exists", move |p| p.release_exists(&name))? {
            run.warn(PipelineWarning::DuplicateRelease {
                tag: tag.to_string(),
            });
            return Ok(());
        }
        if self.config.dry_run {
            info!("dry run: would release {}", tag);
            return Ok(());
        }
        let (name, notes) = (tag.to_string(), entry.notes());
        let conflict = self.call("create_release", move |p| p.create_release(&name, &notes))?;
        if conflict {
            run.warn(PipelineWarning::DuplicateRelease {
                tag: tag.to_string(),
            });
        } else {
            info!("created release {}", tag);
        }
        Ok(())
    }

    /// Build and upload from a clean export of `rev`
    ///
    /// # Returns
    /// * `Ok(true)` - the version is on the index
    /// * `Ok(false)` - dry run, nothing was uploaded
    fn publish(&self, run: &mut Run, conf: &ReleaseConf, version: SemVer, rev: &str) -> Result<bool> {
        let project = conf.pypi_project().to_string();

        let index = Arc::clone(&self.index);
        let name = project.clone();
        let on_index = bounded("is_published", self.config.call_timeout(), move || {
            index.is_published(&name, &version)
        })?;
        if on_index {
            run.warn(PipelineWarning::AlreadyPublished { project, version });
            return Ok(true);
        }
        if self.config.dry_run {
            info!("dry run: would publish {} {}", project, version);
            return Ok(false);
        }

        let build_dir = tempfile::Builder::new()
            .prefix("release-bot-build")
            .tempdir()?;
        self.working_copy.export_ref(rev, build_dir.path())?;

        let index = Arc::clone(&self.index);
        let name = project.clone();
        bounded("build_and_upload", self.config.publish_timeout(), move || {
            let result = index.build_and_upload(build_dir.path(), &name);
            drop(build_dir);
            result
        })?;
        info!("published {} {}", project, version);
        Ok(true)
    }

    fn open_release_pr(&mut self, run: &mut Run, request: &ReleaseRequest, issue: &Issue) -> Result<()> {
        run.begin(Phase::BranchPrepared);
        self.sync()?;
        let conf = ReleaseConf::load(self.files.as_ref(), &self.config)?;
        if !conf.trigger_on_issue {
            run.warn(PipelineWarning::IssueTriggersDisabled {
                issue_number: issue.number,
            });
            return Ok(());
        }
        run.reach(Phase::BranchPrepared)?;

        run.begin(Phase::VersionComputed);
        let Some(target) = self.compute_version(run, request.requested_version, false)? else {
            return Ok(());
        };
        run.reach(Phase::VersionComputed)?;
        let version = target.version;

        let tag = self.tag_pattern.format(&version);
        if self.tag_exists(&tag)? {
            run.warn(PipelineWarning::AlreadyTagged { tag });
            return Ok(());
        }
        let title = trigger::release_title(&version);
        let open = self.call("open_prs", |p| p.open_prs())?;
        if let Some(pr) = open.iter().find(|pr| pr.title == title) {
            run.warn(PipelineWarning::ReleasePrOpen {
                version,
                pr_number: Some(pr.number),
            });
            return Ok(());
        }

        run.begin(Phase::ChangelogBuilt);
        let entry = self.build_changelog(&target, &conf)?;
        run.reach(Phase::ChangelogBuilt)?;

        run.begin(Phase::PrOpened);
        let branch = trigger::release_branch(&version);
        if self
            .working_copy
            .remote_branch_exists(&self.config.remote, &branch)?
        {
            info!("{} was pushed by an earlier attempt, reusing it", branch);
        } else {
            self.prepare_branch(run, &branch, &entry, &conf)?;
        }

        if self.config.dry_run {
            info!("dry run: would open '{}' from {}", title, branch);
            run.reach(Phase::PrOpened)?;
            return run.reach(Phase::AwaitingMerge);
        }

        let body = release_pr_body(&entry, issue.number);
        let (head, pr_title) = (branch.clone(), title.clone());
        let pr = self.call("create_pr", move |p| p.create_pr(&head, &pr_title, &body))?;
        info!("opened pull request #{} {}", pr.number, pr.url);
        run.reach(Phase::PrOpened)?;

        self.state.add_pending(PendingRelease {
            version,
            pr_number: pr.number,
            branch,
            issue_number: Some(issue.number),
            opened_at: Utc::now(),
        })?;

        if !conf.labels.is_empty() {
            let (labels, number) = (conf.labels.clone(), issue.number);
            self.notify("set_labels", move |p| p.set_labels(Target::Issue(number), &labels));
            let (labels, number) = (conf.labels.clone(), pr.number);
            self.notify("set_labels", move |p| {
                p.set_labels(Target::PullRequest(number), &labels)
            });
        }
        let message = format!("I've opened {} to release {}.", pr.url, version);
        let number = issue.number;
        self.notify("comment", move |p| p.comment(Target::Issue(number), &message));

        run.reach(Phase::AwaitingMerge)
    }

    /// Create the release branch with the version marker and changelog
    /// updated, and push it
    fn prepare_branch(
        &self,
        run: &mut Run,
        branch: &str,
        entry: &ChangelogEntry,
        conf: &ReleaseConf,
    ) -> Result<()> {
        if self.config.dry_run {
            let markers = version_marker::find_markers(self.files.as_ref())?;
            match markers.len() {
                0 => run.warn(PipelineWarning::NoVersionFile),
                1 => {}
                _ => run.warn(PipelineWarning::AmbiguousVersionFiles {
                    paths: markers.into_iter().map(|m| m.path).collect(),
                }),
            }
            debug!("dry run: not creating {}", branch);
            return Ok(());
        }

        self.working_copy.create_branch(branch)?;
        let mut changed: Vec<PathBuf> = Vec::new();
        match version_marker::update_markers(self.files.as_ref(), &entry.version)? {
            MarkerUpdate::Updated(path) => changed.push(path),
            MarkerUpdate::Ambiguous(paths) => {
                run.warn(PipelineWarning::AmbiguousVersionFiles { paths })
            }
            MarkerUpdate::NotFound => run.warn(PipelineWarning::NoVersionFile),
        }

        let file = &self.config.changelog_file;
        let existing = self.files.read_optional(file)?.unwrap_or_default();
        match changelog::insert_section(&existing, entry) {
            Some(updated) => {
                self.files.write(file, &updated)?;
                changed.push(file.clone());
            }
            None => debug!("{} already has a {} section", file.display(), entry.version),
        }

        let message = trigger::release_title(&entry.version);
        self.working_copy
            .commit_paths(&changed, &message, &conf.author())?;
        self.working_copy.push_branch(&self.config.remote, branch)?;
        info!("pushed {}", branch);
        Ok(())
    }
}

fn release_pr_body(entry: &ChangelogEntry, issue_number: u64) -> String {
    format!(
        "Fixes #{}\n\nMerging this pull request releases {}.\n\n{}\n",
        issue_number,
        entry.version,
        entry.notes()
    )
}
