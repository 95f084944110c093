//! Pure formatting functions for CLI output.
//!
//! `format_*` build the text and are tested; `display_*` print it.

use console::style;

use crate::changelog::ChangelogEntry;
use crate::domain::{ReleaseIntent, SemVer};
use crate::pipeline::{PipelineOutcome, PipelineState, PipelineWarning};
use crate::state::ReleaseRecord;

/// Format and print an error message in red.
pub fn display_error(message: &str) {
    eprintln!("{} {}", style("ERROR:").red(), message);
}

/// Format and print a success message with green checkmark.
pub fn display_success(message: &str) {
    println!("{} {}", style("✓").green(), message);
}

/// Format and print a status message with yellow arrow.
pub fn display_status(message: &str) {
    println!("{} {}", style("→").yellow(), message);
}

pub fn display_warning(warning: &PipelineWarning) {
    eprintln!("{} {}", style("⚠ WARNING:").yellow(), warning);
}

/// One-line summary of a pipeline run
pub fn format_outcome(outcome: &PipelineOutcome) -> String {
    let version = outcome
        .version
        .map(|v| v.to_string())
        .unwrap_or_else(|| "-".to_string());
    match &outcome.state {
        PipelineState::At(phase) if outcome.is_ignored() => {
            format!("not a release request ({})", phase)
        }
        PipelineState::At(phase) => format!("{} reached {}", version, phase),
        PipelineState::Failed { phase, reason } => {
            format!("{} failed at {}: {}", version, phase, reason)
        }
    }
}

/// Print the outcome line and its warnings.
pub fn display_outcome(outcome: &PipelineOutcome) {
    let line = format_outcome(outcome);
    if outcome.is_failed() {
        display_error(&line);
    } else if outcome.is_ignored() {
        display_status(&line);
    } else {
        display_success(&line);
    }
    for warning in &outcome.warnings {
        display_warning(warning);
    }
}

pub fn format_record(record: &ReleaseRecord) -> String {
    let mut line = format!(
        "{} ({}) released {}",
        record.version,
        record.tag_ref,
        record.created_at.format("%Y-%m-%d %H:%M UTC")
    );
    if record.pypi_published {
        line.push_str(", on PyPI");
    }
    if let Some(pr) = record.source_pr {
        line.push_str(&format!(", from #{}", pr));
    }
    if record.dry_run {
        line.push_str(" [dry run]");
    }
    line
}

/// Display the last release record, if any.
pub fn display_record(record: Option<&ReleaseRecord>) {
    match record {
        Some(record) => {
            println!("{}", style("Last release:").bold());
            println!("  {}", format_record(record));
        }
        None => display_status("No release recorded yet"),
    }
}

/// Display how a title was classified and what it resolves to.
///
/// # Arguments
/// * `title` - The classified title
/// * `intent` - Decoded intent (None when the title is not a release request)
/// * `resolved` - Version the intent resolves to, when a base was available
pub fn display_intent(title: &str, intent: Option<&ReleaseIntent>, resolved: Option<SemVer>) {
    match intent {
        Some(intent) => {
            println!("{} '{}'", style("Release request:").bold(), title);
            println!("  Intent:  {}", style(intent).cyan());
            if let Some(version) = resolved {
                println!("  Version: {}", style(version).green());
            }
        }
        None => display_status(&format!("'{}' is not a release request", title)),
    }
}

/// Display a changelog section the way it would appear in release notes.
pub fn display_changelog(entry: &ChangelogEntry) {
    println!("{}", style(format!("# {}", entry.version)).bold());
    println!();
    for item in &entry.items {
        println!("{}", item);
    }
}
