//! Terminal output for the `release-bot` binary.
//!
//! The library logs through `tracing`; this module only renders results the
//! CLI was asked for.

pub mod formatter;

pub use formatter::{
    display_changelog, display_error, display_intent, display_outcome, display_record,
    display_status, display_success, display_warning,
};
