use crate::domain::SemVer;
use crate::error::{ReleaseError, Result};
use regex::Regex;

/// Tag naming pattern (e.g., "v{version}", "release-{version}")
#[derive(Debug, Clone)]
pub struct TagPattern {
    pattern: String,
}

impl TagPattern {
    /// Create a new tag pattern
    ///
    /// The pattern must contain exactly one `{version}` placeholder.
    pub fn new(pattern: impl Into<String>) -> Result<Self> {
        let pattern = pattern.into();
        if pattern.matches("{version}").count() != 1 {
            return Err(ReleaseError::config(format!(
                "tag pattern '{}' must contain exactly one {{version}} placeholder",
                pattern
            )));
        }

        let tag_pattern = TagPattern { pattern };
        tag_pattern.matcher()?;
        Ok(tag_pattern)
    }

    fn matcher(&self) -> Result<Regex> {
        // Escape everything, then swap the placeholder for a capture group
        let escaped = regex::escape(&self.pattern);
        let regex_pattern = escaped.replace(r"\{version\}", r"(\d+\.\d+\.\d+)");
        Regex::new(&format!("^{}$", regex_pattern)).map_err(|e| {
            ReleaseError::config(format!("invalid tag pattern '{}': {}", self.pattern, e))
        })
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    /// Format a version according to pattern
    /// Example: pattern="v{version}", version=1.2.3 -> "v1.2.3"
    pub fn format(&self, version: &SemVer) -> String {
        self.pattern.replace("{version}", &version.to_string())
    }

    /// Validate if a tag matches this pattern
    pub fn matches(&self, tag: &str) -> bool {
        self.matcher().map(|re| re.is_match(tag)).unwrap_or(false)
    }

    /// Extract the version from a tag produced by this pattern
    pub fn parse(&self, tag: &str) -> Option<SemVer> {
        let matcher = self.matcher().ok()?;
        let captures = matcher.captures(tag)?;
        SemVer::parse(captures.get(1)?.as_str()).ok()
    }

    /// Latest version among a set of tag names; foreign tags are ignored
    pub fn latest<'a>(&self, tags: impl IntoIterator<Item = &'a str>) -> Option<SemVer> {
        let matcher = self.matcher().ok()?;
        tags.into_iter()
            .filter_map(|t| matcher.captures(t))
            .filter_map(|c| c.get(1).and_then(|m| SemVer::parse(m.as_str()).ok()))
            .max()
    }
}

impl Default for TagPattern {
    fn default() -> Self {
        TagPattern {
            pattern: "v{version}".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_format() {
        let pattern = TagPattern::new("v{version}").unwrap();
        assert_eq!(pattern.format(&SemVer::new(1, 2, 3)), "v1.2.3");
    }

    #[test]
    fn test_pattern_format_with_suffix() {
        let pattern = TagPattern::new("release-{version}").unwrap();
        assert_eq!(pattern.format(&SemVer::new(1, 2, 3)), "release-1.2.3");
    }

    #[test]
    fn test_pattern_matches() {
        let pattern = TagPattern::new("v{version}").unwrap();
        assert!(pattern.matches("v1.2.3"));
        assert!(!pattern.matches("release-1.2.3"));
        assert!(!pattern.matches("v1.2.3-rc1"));
    }

    #[test]
    fn test_pattern_requires_placeholder() {
        assert!(TagPattern::new("v").is_err());
        assert!(TagPattern::new("{version}-{version}").is_err());
    }

    #[test]
    fn test_pattern_parse() {
        let pattern = TagPattern::new("release-{version}").unwrap();
        assert_eq!(pattern.parse("release-0.4.1"), Some(SemVer::new(0, 4, 1)));
        assert_eq!(pattern.parse("v0.4.1"), None);
    }

    #[test]
    fn test_latest_ignores_foreign_tags() {
        let pattern = TagPattern::default();
        let tags = ["v0.9.0", "v0.10.0", "nightly", "v0.2.5"];
        assert_eq!(pattern.latest(tags), Some(SemVer::new(0, 10, 0)));
        assert_eq!(pattern.latest(Vec::<&str>::new()), None);
    }

    #[test]
    fn test_default_matches_explicit_construction() {
        let default = TagPattern::default();
        let explicit = TagPattern::new("v{version}").unwrap();
        assert_eq!(default.as_str(), explicit.as_str());
        assert_eq!(default.parse("v3.1.4"), explicit.parse("v3.1.4"));
    }
}
