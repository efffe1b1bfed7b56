//! The `all` subcommand: build, archive and release in sequence.
//!
//! Stages share one core and run back to back; a failing stage stops the
//! chain, so build failures prevent archiving and archive failures prevent
//! the release.

use std::sync::Arc;

use crate::build::Toolchain;

use super::build::BuildOpts;
use super::{archive, build, release, Core, PipelineError};

pub fn run(core: &Core, toolchain: Arc<dyn Toolchain>, commitish: &str) -> Result<(), PipelineError> {
    build::run(core, toolchain, &BuildOpts::default())?;
    archive::run(core)?;
    release::run(core, commitish)?;
    Ok(())
}
