use crate::error::{ReleaseError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Semantic version representation
///
/// Ordering is lexicographic on (major, minor, patch), which the derived
/// `Ord` gives us from the field order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SemVer {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl SemVer {
    /// Create a new version
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        SemVer {
            major,
            minor,
            patch,
        }
    }

    /// Parse version from a string (e.g., "v1.2.3" -> SemVer(1,2,3))
    pub fn parse(text: &str) -> Result<Self> {
        // Remove 'v' or 'V' prefix
        let clean = text.trim().trim_start_matches('v').trim_start_matches('V');

        let parts: Vec<&str> = clean.split('.').collect();
        if parts.len() != 3 {
            return Err(ReleaseError::malformed(format!(
                "'{}' - expected X.Y.Z",
                text
            )));
        }

        let component = |name: &str, part: &str| {
            // u64::from_str accepts a leading '+', a version component must not
            if part.is_empty() || !part.chars().all(|c| c.is_ascii_digit()) {
                return Err(ReleaseError::malformed(format!(
                    "invalid {} component '{}' in '{}'",
                    name, part, text
                )));
            }
            part.parse::<u64>().map_err(|_| {
                ReleaseError::malformed(format!("{} component '{}' is out of range", name, part))
            })
        };

        Ok(SemVer {
            major: component("major", parts[0])?,
            minor: component("minor", parts[1])?,
            patch: component("patch", parts[2])?,
        })
    }

    /// Bump version according to bump type
    ///
    /// `Explicit` ignores the current version and yields its literal target.
    /// A component already at `u64::MAX` cannot be bumped.
    pub fn bump(&self, bump_type: BumpKind) -> Result<Self> {
        let next = |name: &str, value: u64| {
            value.checked_add(1).ok_or_else(|| {
                ReleaseError::malformed(format!("{} component of {} cannot be bumped", name, self))
            })
        };
        Ok(match bump_type {
            BumpKind::Explicit(target) => target,
            BumpKind::Major => SemVer::new(next("major", self.major)?, 0, 0),
            BumpKind::Minor => SemVer::new(self.major, next("minor", self.minor)?, 0),
            BumpKind::Patch => SemVer::new(self.major, self.minor, next("patch", self.patch)?),
        })
    }
}

impl fmt::Display for SemVer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for SemVer {
    type Err = ReleaseError;

    fn from_str(s: &str) -> Result<Self> {
        SemVer::parse(s)
    }
}

impl TryFrom<String> for SemVer {
    type Error = ReleaseError;

    fn try_from(value: String) -> Result<Self> {
        SemVer::parse(&value)
    }
}

impl From<SemVer> for String {
    fn from(value: SemVer) -> Self {
        value.to_string()
    }
}

/// Instruction for deriving the next version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BumpKind {
    Major,
    Minor,
    Patch,
    /// A literal target version, e.g. from "0.1.0 release"
    Explicit(SemVer),
}

impl BumpKind {
    /// Major/minor/patch need a previous release to apply to
    pub fn is_relative(&self) -> bool {
        !matches!(self, BumpKind::Explicit(_))
    }
}

impl fmt::Display for BumpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BumpKind::Major => write!(f, "new major"),
            BumpKind::Minor => write!(f, "new minor"),
            BumpKind::Patch => write!(f, "new patch"),
            BumpKind::Explicit(version) => write!(f, "{}", version),
        }
    }
}

/// Decoded meaning of a release-request title
pub type ReleaseIntent = BumpKind;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_parse() {
        let v = SemVer::parse("v1.2.3").unwrap();
        assert_eq!(v.major, 1);
        assert_eq!(v.minor, 2);
        assert_eq!(v.patch, 3);
    }

    #[test]
    fn test_version_parse_without_v() {
        assert_eq!(SemVer::parse("1.2.3").unwrap(), SemVer::new(1, 2, 3));
    }

    #[test]
    fn test_version_parse_invalid() {
        assert!(SemVer::parse("1.2").is_err());
        assert!(SemVer::parse("v1.2.3.4").is_err());
        assert!(SemVer::parse("1.-2.3").is_err());
        assert!(SemVer::parse("1.+2.3").is_err());
        assert!(SemVer::parse("1.2.x").is_err());
        assert!(matches!(
            SemVer::parse("1..3"),
            Err(ReleaseError::MalformedVersion(_))
        ));
    }

    #[test]
    fn test_version_ordering_is_lexicographic() {
        assert!(SemVer::new(1, 0, 0) > SemVer::new(0, 99, 99));
        assert!(SemVer::new(1, 2, 0) > SemVer::new(1, 1, 9));
        assert!(SemVer::new(1, 1, 10) > SemVer::new(1, 1, 9));
        assert_eq!(
            [SemVer::new(0, 9, 0), SemVer::new(1, 0, 0), SemVer::new(0, 10, 0)]
                .iter()
                .max(),
            Some(&SemVer::new(1, 0, 0))
        );
    }

    #[test]
    fn test_version_bump() {
        let v = SemVer::new(1, 2, 3);
        assert_eq!(v.bump(BumpKind::Major).unwrap(), SemVer::new(2, 0, 0));
        assert_eq!(v.bump(BumpKind::Minor).unwrap(), SemVer::new(1, 3, 0));
        assert_eq!(v.bump(BumpKind::Patch).unwrap(), SemVer::new(1, 2, 4));
        assert_eq!(
            v.bump(BumpKind::Explicit(SemVer::new(0, 1, 0))).unwrap(),
            SemVer::new(0, 1, 0)
        );
    }

    #[test]
    fn test_version_bump_overflow_is_malformed() {
        let top = SemVer::parse("18446744073709551615.0.0").unwrap();
        assert!(matches!(
            top.bump(BumpKind::Major),
            Err(ReleaseError::MalformedVersion(_))
        ));
        assert_eq!(top.bump(BumpKind::Minor).unwrap(), SemVer::new(u64::MAX, 1, 0));

        let patch_top = SemVer::new(1, 2, u64::MAX);
        assert!(matches!(
            patch_top.bump(BumpKind::Patch),
            Err(ReleaseError::MalformedVersion(_))
        ));
        assert!(matches!(
            SemVer::new(1, u64::MAX, 0).bump(BumpKind::Minor),
            Err(ReleaseError::MalformedVersion(_))
        ));
    }

    #[test]
    fn test_version_serde_as_string() {
        let json = serde_json::to_string(&SemVer::new(0, 1, 0)).unwrap();
        assert_eq!(json, "\"0.1.0\"");
        let back: SemVer = serde_json::from_str(&json).unwrap();
        assert_eq!(back, SemVer::new(0, 1, 0));
        assert!(serde_json::from_str::<SemVer>("\"one\"").is_err());
    }

    #[test]
    fn test_intent_display() {
        assert_eq!(BumpKind::Explicit(SemVer::new(1, 2, 3)).to_string(), "1.2.3");
        assert_eq!(BumpKind::Minor.to_string(), "new minor");
        assert!(BumpKind::Minor.is_relative());
        assert!(!BumpKind::Explicit(SemVer::new(1, 2, 3)).is_relative());
    }
}
