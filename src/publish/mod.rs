//! Package-index collaborator

pub mod mock;
pub mod twine;

pub use mock::MockPackageIndex;
pub use twine::TwineIndex;

use std::path::Path;

use crate::domain::SemVer;
use crate::error::Result;

/// Builds distributables and uploads them to a package index
pub trait PackageIndex: Send + Sync {
    /// Pre-flight: is `version` of `project` already on the index?
    fn is_published(&self, project: &str, version: &SemVer) -> Result<bool>;

    /// Build artifacts from a clean checkout and upload them
    fn build_and_upload(&self, checkout_path: &Path, project: &str) -> Result<()>;
}
