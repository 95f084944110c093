use std::collections::BTreeMap;

use crate::domain::{ChangeSection, ParsedCommit};
use crate::git::CommitMeta;

/// Structured commit-log generator plugged into the changelog builder
pub trait CommitLogGenerator: Send + Sync {
    fn name(&self) -> &str;

    /// Produce changelog lines for qualifying (non-merge) commits
    fn generate(&self, commits: &[&CommitMeta]) -> Vec<String>;
}

/// Groups conventional commits into titled sections
#[derive(Debug, Clone, Copy, Default)]
pub struct ConventionalGenerator;

impl CommitLogGenerator for ConventionalGenerator {
    fn name(&self) -> &str {
        "conventional"
    }

    fn generate(&self, commits: &[&CommitMeta]) -> Vec<String> {
        let mut sections: BTreeMap<ChangeSection, Vec<String>> = BTreeMap::new();
        for commit in commits {
            let parsed = ParsedCommit::parse(&commit.message);
            if parsed.description.is_empty() {
                continue;
            }
            sections
                .entry(parsed.section())
                .or_default()
                .push(format!("* {}", parsed.summary()));
        }

        let mut lines = Vec::new();
        for (section, items) in sections {
            if !lines.is_empty() {
                lines.push(String::new());
            }
            lines.push(format!("### {}", section.title()));
            lines.push(String::new());
            lines.extend(items);
        }
        lines
    }
}

/// Look up a generator by its configured name
pub fn by_name(name: &str) -> Option<Box<dyn CommitLogGenerator>> {
    match name {
        "conventional" => Some(Box::new(ConventionalGenerator)),
        _ => None,
    }
}
