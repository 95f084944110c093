//! Domain logic - pure release rules independent of git and the hosting platform

pub mod commit;
pub mod tag;
pub mod version;

pub use commit::{ChangeSection, ParsedCommit};
pub use tag::TagPattern;
pub use version::{BumpKind, ReleaseIntent, SemVer};
