pub mod bot;
pub mod changelog;
pub mod config;
pub mod deadline;
pub mod domain;
pub mod error;
pub mod events;
pub mod git;
pub mod lease;
pub mod pipeline;
pub mod platform;
pub mod publish;
pub mod resolver;
pub mod state;
pub mod trigger;
pub mod ui;
pub mod version_marker;

pub use bot::ReleaseBot;
pub use error::{ReleaseError, Result};
pub use pipeline::{Collaborators, PipelineOutcome, ReleasePipeline};
