//! Domain models for Kiln.
//!
//! - `ProjectIdentity` / `ManifestMetadata`: what is being built and published
//! - `DependencyTable`: declared dependencies keyed by `(name, scope)`
//! - `ToolchainSpec`, `ReportFormats`, `PublishTarget`: per-run selections

pub mod dependency;
pub mod error;
pub mod identity;
pub mod options;

pub use dependency::{DependencySpec, DependencyTable, Scope};
pub use error::{KilnError, Result};
pub use identity::{ManifestMetadata, ProjectIdentity};
pub use options::{
    default_test_log_events, EmptySuitePolicy, PublishTarget, ReportFormats, TestLogEvent,
    ToolchainSpec,
};
