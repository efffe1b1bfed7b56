//! shipwright - parallel release orchestrator.
//!
//! Given a declarative project description, shipwright selects subsets of
//! cross-compiled binary targets, packages them into archives (built-in
//! encoders or out-of-process format plugins), computes checksums, and
//! publishes the artifact set to a release backend, retrying transient
//! failures.

pub mod archive;
pub mod build;
pub mod cancel;
pub mod checksum;
pub mod commands;
pub mod config;
pub mod matcher;
pub mod plugin;
pub mod release;
pub mod selection;
pub mod workforce;

pub use cancel::{CancelReason, CancellationToken};
pub use commands::{Core, CoreOpts, PipelineError};
pub use matcher::Matcher;
pub use selection::Selection;
pub use workforce::Workforce;
