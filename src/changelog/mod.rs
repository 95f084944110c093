//! Changelog assembly and extraction
//!
//! Sections are written in the file convention used by release PRs:
//!
//! ```text
//! # 1.1.0
//!
//! * first change
//! * second change
//! ```

pub mod generator;

use regex::Regex;
use tracing::debug;

use crate::domain::SemVer;
use crate::error::{ReleaseError, Result};
use crate::git::CommitMeta;

pub use generator::{CommitLogGenerator, ConventionalGenerator};

/// Release notes for one target version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangelogEntry {
    pub version: SemVer,
    pub items: Vec<String>,
}

impl ChangelogEntry {
    pub fn new(version: SemVer, items: Vec<String>) -> Self {
        ChangelogEntry { version, items }
    }

    /// The single line used when nothing else is available
    pub fn default_for(version: SemVer) -> Self {
        ChangelogEntry {
            version,
            items: vec![format!("{} release", version)],
        }
    }

    /// Items as release notes body (no heading)
    pub fn notes(&self) -> String {
        self.items.join("\n")
    }
}

/// Builds changelog entries from configuration, a generator, or history
#[derive(Default)]
pub struct ChangelogBuilder {
    generator: Option<Box<dyn CommitLogGenerator>>,
}

impl ChangelogBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_generator(generator: Box<dyn CommitLogGenerator>) -> Self {
        ChangelogBuilder {
            generator: Some(generator),
        }
    }

    /// Assemble the entry for `version`
    ///
    /// Priority: explicit entries, then the configured generator, then one
    /// line per qualifying commit, then the default line.
    pub fn build(
        &self,
        version: SemVer,
        commits_since_last_tag: &[CommitMeta],
        explicit_entries: Option<&[String]>,
    ) -> ChangelogEntry {
        let explicit: Vec<String> = explicit_entries
            .unwrap_or_default()
            .iter()
            .map(|e| e.trim_end().to_string())
            .filter(|e| !e.trim().is_empty())
            .collect();
        if !explicit.is_empty() {
            debug!("using {} explicit changelog entries", explicit.len());
            return ChangelogEntry::new(version, explicit);
        }

        let qualifying: Vec<&CommitMeta> = commits_since_last_tag
            .iter()
            .filter(|c| !c.is_merge() && !c.summary().is_empty())
            .collect();

        if let Some(generator) = &self.generator {
            let lines = generator.generate(&qualifying);
            if lines.iter().any(|l| !l.trim().is_empty()) {
                debug!("changelog generated by {}", generator.name());
                return ChangelogEntry::new(version, trim_blank_edges(lines));
            }
        }

        if qualifying.is_empty() {
            return ChangelogEntry::default_for(version);
        }

        let items = qualifying
            .iter()
            .map(|c| format!("* {}", c.summary()))
            .collect();
        ChangelogEntry::new(version, items)
    }
}

/// Render an entry as a changelog file section
pub fn render(entry: &ChangelogEntry) -> String {
    let mut out = format!("# {}\n\n", entry.version);
    for item in &entry.items {
        out.push_str(item);
        out.push('\n');
    }
    out
}

fn heading_regex() -> Result<Regex> {
    Regex::new(r"^(#+)\s+[vV]?(\d+\.\d+\.\d+)\s*$")
        .map_err(|e| ReleaseError::config(format!("changelog heading matcher: {}", e)))
}

/// Parse a line as a version heading: (level, version)
fn version_heading(re: &Regex, line: &str) -> Option<(usize, SemVer)> {
    let captures = re.captures(line.trim_end())?;
    let level = captures.get(1)?.as_str().len();
    let version = SemVer::parse(captures.get(2)?.as_str()).ok()?;
    Some((level, version))
}

/// Read the section for `version` back out of changelog file contents
///
/// Returns every line after the heading up to the next version heading of the
/// same (or a shallower) level. Leading and trailing blank lines are dropped.
pub fn extract(file_contents: &str, version: SemVer) -> Result<ChangelogEntry> {
    let re = heading_regex()?;
    let mut lines = file_contents.lines();

    let level = loop {
        match lines.next() {
            Some(line) => {
                if let Some((level, v)) = version_heading(&re, line) {
                    if v == version {
                        break level;
                    }
                }
            }
            None => return Err(ReleaseError::VersionHeadingNotFound(version)),
        }
    };

    let body: Vec<String> = lines
        .take_while(|line| !matches!(version_heading(&re, line), Some((l, _)) if l <= level))
        .map(|line| line.trim_end_matches('\r').to_string())
        .collect();

    Ok(ChangelogEntry::new(version, trim_blank_edges(body)))
}

/// Whether the file already has a heading for `version`
pub fn has_section(file_contents: &str, version: SemVer) -> bool {
    match heading_regex() {
        Ok(re) => file_contents
            .lines()
            .any(|line| matches!(version_heading(&re, line), Some((_, v)) if v == version)),
        Err(_) => false,
    }
}

/// Prepend the rendered entry to an existing changelog
///
/// Returns `None` when the file already has a section for the version.
pub fn insert_section(existing: &str, entry: &ChangelogEntry) -> Option<String> {
    if has_section(existing, entry.version) {
        return None;
    }
    let mut out = render(entry);
    if !existing.trim().is_empty() {
        out.push('\n');
        out.push_str(existing);
    }
    Some(out)
}

fn trim_blank_edges(mut lines: Vec<String>) -> Vec<String> {
    while lines.last().is_some_and(|l| l.trim().is_empty()) {
        lines.pop();
    }
    let start = lines
        .iter()
        .position(|l| !l.trim().is_empty())
        .unwrap_or(lines.len());
    lines.split_off(start)
}
