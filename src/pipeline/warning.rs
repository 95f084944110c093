use std::fmt;
use std::path::PathBuf;

use crate::domain::SemVer;

/// Non-fatal conditions met during a pipeline run.
/// The run still succeeds (or is skipped); these are reported to the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineWarning {
    /// The version already has a real release record
    AlreadyReleased { version: SemVer },
    /// The platform already has a release for the tag
    DuplicateRelease { tag: String },
    /// The tag exists upstream, so it is not created again
    AlreadyTagged { tag: String },
    /// The package index already serves the version
    AlreadyPublished { project: String, version: SemVer },
    /// Release notes were derived because the file has no section for the version
    MissingChangelogSection { version: SemVer, file: PathBuf },
    /// Several files carry a version; none was rewritten
    AmbiguousVersionFiles { paths: Vec<PathBuf> },
    NoVersionFile,
    /// A release pull request for the version is already open
    ReleasePrOpen { version: SemVer, pr_number: Option<u64> },
    /// The project does not accept release requests from issues
    IssueTriggersDisabled { issue_number: u64 },
}

impl fmt::Display for PipelineWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineWarning::AlreadyReleased { version } => {
                write!(f, "Version {} was already released", version)
            }
            PipelineWarning::DuplicateRelease { tag } => {
                write!(f, "A release for tag '{}' already exists", tag)
            }
            PipelineWarning::AlreadyTagged { tag } => {
                write!(f, "Tag '{}' already exists", tag)
            }
            PipelineWarning::AlreadyPublished { project, version } => {
                write!(f, "{} {} is already on the package index", project, version)
            }
            PipelineWarning::MissingChangelogSection { version, file } => write!(
                f,
                "No section for {} in {}, release notes were derived from history",
                version,
                file.display()
            ),
            PipelineWarning::AmbiguousVersionFiles { paths } => write!(
                f,
                "Multiple version files found, none updated: {}",
                paths
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            PipelineWarning::NoVersionFile => write!(f, "No version file found"),
            PipelineWarning::ReleasePrOpen { version, pr_number } => match pr_number {
                Some(number) => write!(
                    f,
                    "Release pull request #{} for {} is already open",
                    number, version
                ),
                None => write!(f, "A release branch for {} is already pending", version),
            },
            PipelineWarning::IssueTriggersDisabled { issue_number } => write!(
                f,
                "Issue #{} asks for a release but issue triggers are disabled",
                issue_number
            ),
        }
    }
}
