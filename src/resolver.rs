//! Next-version computation

use crate::domain::{ReleaseIntent, SemVer};
use crate::error::{ReleaseError, Result};

/// Compute the version a release intent targets
///
/// Deterministic: identical inputs always resolve to the same version.
pub fn resolve(latest_tag: Option<SemVer>, intent: ReleaseIntent) -> Result<SemVer> {
    match (latest_tag, intent) {
        (Some(latest), ReleaseIntent::Explicit(requested)) if requested <= latest => {
            Err(ReleaseError::VersionNotMonotonic { requested, latest })
        }
        (_, ReleaseIntent::Explicit(requested)) => Ok(requested),
        (None, relative) => Err(ReleaseError::NoBaseVersion(relative.to_string())),
        (Some(latest), relative) => latest.bump(relative),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::BumpKind;

    #[test]
    fn test_resolve_bumps() {
        let latest = Some(SemVer::new(1, 0, 0));
        assert_eq!(resolve(latest, BumpKind::Major).unwrap(), SemVer::new(2, 0, 0));
        assert_eq!(resolve(latest, BumpKind::Minor).unwrap(), SemVer::new(1, 1, 0));
        assert_eq!(resolve(latest, BumpKind::Patch).unwrap(), SemVer::new(1, 0, 1));
    }

    #[test]
    fn test_resolve_strictly_increases() {
        let bases = [
            SemVer::new(0, 0, 0),
            SemVer::new(0, 9, 12),
            SemVer::new(3, 0, 7),
            SemVer::new(10, 10, 10),
        ];
        for base in bases {
            for kind in [BumpKind::Major, BumpKind::Minor, BumpKind::Patch] {
                let next = resolve(Some(base), kind).unwrap();
                assert!(next > base, "{} of {} gave {}", kind, base, next);
            }
        }
    }

    #[test]
    fn test_resolve_bump_past_maximum() {
        let latest = SemVer::parse("18446744073709551615.0.0").ok();
        assert!(matches!(
            resolve(latest, BumpKind::Major),
            Err(ReleaseError::MalformedVersion(_))
        ));
    }

    #[test]
    fn test_resolve_without_base() {
        for kind in [BumpKind::Major, BumpKind::Minor, BumpKind::Patch] {
            assert!(matches!(
                resolve(None, kind),
                Err(ReleaseError::NoBaseVersion(_))
            ));
        }
    }

    #[test]
    fn test_resolve_explicit() {
        let target = SemVer::new(0, 1, 0);
        assert_eq!(resolve(None, BumpKind::Explicit(target)).unwrap(), target);
        assert_eq!(
            resolve(Some(SemVer::new(0, 0, 9)), BumpKind::Explicit(target)).unwrap(),
            target
        );
    }

    #[test]
    fn test_resolve_explicit_not_monotonic() {
        let latest = Some(SemVer::new(1, 0, 0));
        for requested in [SemVer::new(0, 9, 0), SemVer::new(1, 0, 0)] {
            match resolve(latest, BumpKind::Explicit(requested)) {
                Err(ReleaseError::VersionNotMonotonic {
                    requested: r,
                    latest: l,
                }) => {
                    assert_eq!(r, requested);
                    assert_eq!(l, SemVer::new(1, 0, 0));
                }
                other => panic!("unexpected result {:?}", other),
            }
        }
    }
}
