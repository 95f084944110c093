use regex::Regex;

/// Changelog section a commit is listed under
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ChangeSection {
    Breaking,
    Features,
    Fixes,
    Other,
}

impl ChangeSection {
    pub fn title(&self) -> &'static str {
        match self {
            ChangeSection::Breaking => "Breaking Changes",
            ChangeSection::Features => "Features",
            ChangeSection::Fixes => "Bug Fixes",
            ChangeSection::Other => "Other",
        }
    }
}

/// Parsed representation of a conventional commit message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommit {
    pub r#type: String,
    pub scope: Option<String>,
    pub description: String,
    pub is_breaking_change: bool,
}

impl ParsedCommit {
    /// Parse a commit message according to conventional commits
    /// Supports formats:
    /// - type(scope)!: description
    /// - type(scope): description
    /// - type!: description
    /// - type: description
    /// - non-conventional text
    pub fn parse(message: &str) -> Self {
        let subject = message.lines().next().unwrap_or_default().trim();
        let footer_breaking = message
            .lines()
            .any(|l| l.starts_with("BREAKING CHANGE:") || l.starts_with("BREAKING-CHANGE:"));

        if let Some(captures) = Regex::new(r"^([a-z]+)(?:\(([^)]+)\))?(!?):\s*(.*)$")
            .ok()
            .and_then(|re| re.captures(subject))
        {
            let r#type = captures
                .get(1)
                .map(|m| m.as_str().to_string())
                .unwrap_or_default();
            let scope = captures.get(2).map(|m| m.as_str().to_string());
            let has_exclamation = captures.get(3).map(|m| m.as_str()) == Some("!");
            let description = captures
                .get(4)
                .map(|m| m.as_str().to_string())
                .unwrap_or_default();

            return ParsedCommit {
                r#type,
                scope,
                description,
                is_breaking_change: has_exclamation || footer_breaking,
            };
        }

        // Default: non-conventional commit, listed under "Other"
        ParsedCommit {
            r#type: "chore".to_string(),
            scope: None,
            description: subject.to_string(),
            is_breaking_change: footer_breaking,
        }
    }

    pub fn section(&self) -> ChangeSection {
        if self.is_breaking_change {
            return ChangeSection::Breaking;
        }
        match self.r#type.as_str() {
            "feat" => ChangeSection::Features,
            "fix" => ChangeSection::Fixes,
            _ => ChangeSection::Other,
        }
    }

    /// One-line changelog rendering, e.g. "**auth:** add login"
    pub fn summary(&self) -> String {
        match &self.scope {
            Some(scope) => format!("**{}:** {}", scope, self.description),
            None => self.description.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_scope() {
        let commit = ParsedCommit::parse("feat(auth): add login");
        assert_eq!(commit.r#type, "feat");
        assert_eq!(commit.scope, Some("auth".to_string()));
        assert_eq!(commit.description, "add login");
        assert!(!commit.is_breaking_change);
        assert_eq!(commit.section(), ChangeSection::Features);
    }

    #[test]
    fn test_parse_with_breaking_marker() {
        let commit = ParsedCommit::parse("feat(auth)!: redesign login");
        assert_eq!(commit.r#type, "feat");
        assert!(commit.is_breaking_change);
        assert_eq!(commit.section(), ChangeSection::Breaking);
    }

    #[test]
    fn test_parse_breaking_without_scope() {
        let commit = ParsedCommit::parse("feat!: redesign");
        assert_eq!(commit.scope, None);
        assert!(commit.is_breaking_change);
    }

    #[test]
    fn test_parse_non_conventional() {
        let commit = ParsedCommit::parse("Random commit message\n\nwith body");
        assert_eq!(commit.r#type, "chore");
        assert_eq!(commit.description, "Random commit message");
        assert_eq!(commit.section(), ChangeSection::Other);
    }

    #[test]
    fn test_parse_breaking_change_footer() {
        let commit = ParsedCommit::parse("fix: something\n\nBREAKING CHANGE: desc");
        assert!(commit.is_breaking_change);
        assert_eq!(commit.description, "something");
    }

    #[test]
    fn test_summary_includes_scope() {
        assert_eq!(
            ParsedCommit::parse("fix(cli): handle empty input").summary(),
            "**cli:** handle empty input"
        );
        assert_eq!(ParsedCommit::parse("fix: typo").summary(), "typo");
    }
}
