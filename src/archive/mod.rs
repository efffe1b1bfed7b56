//! Archive construction: the in-process encoders and the plugin routing.
//!
//! Every in-process format satisfies [`Archiver`]; archive settings whose
//! format is `plugin` are delegated to a Ready connection from the plugin
//! registry instead.

mod plain;
mod targz;
mod zip_archiver;

use std::fs::{self, File};
use std::io;
use std::path::PathBuf;

use chrono::Utc;
use shipwright_plugin_api::{ArchiveRequest, PROTOCOL_VERSION};
use uuid::Uuid;

use crate::plugin::{PluginError, PluginRegistry};

pub use plain::PlainArchiver;
pub use targz::TarGzArchiver;
pub use zip_archiver::ZipArchiver;

/// Archive stage errors.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("zip: {0}")]
    Zip(#[from] ::zip::result::ZipError),

    #[error(transparent)]
    Plugin(#[from] PluginError),

    #[error("unsupported archive format {0:?}")]
    UnsupportedFormat(String),

    #[error("archive already finalized")]
    AlreadyFinalized,

    #[error("plain archive accepts exactly one file")]
    TooManyFiles,

    #[error("binary file not found: {}", .0.display())]
    MissingBinary(PathBuf),

    #[error("heartbeat mismatch from plugin {id:?}: expected {expected:?}, got {got:?}")]
    HeartbeatMismatch {
        id: String,
        expected: String,
        got: String,
    },
}

/// The built-in archive formats, plus the out-of-process escape hatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArchiveFormat {
    #[default]
    TarGz,
    Zip,
    /// Copies the single input file verbatim, for publishing raw binaries.
    Plain,
    /// Delegate to an out-of-process plugin.
    Plugin,
}

impl ArchiveFormat {
    pub fn parse(format: &str) -> Result<ArchiveFormat, ArchiveError> {
        match format {
            "tar.gz" | "targz" => Ok(ArchiveFormat::TarGz),
            "zip" => Ok(ArchiveFormat::Zip),
            "plain" => Ok(ArchiveFormat::Plain),
            "plugin" => Ok(ArchiveFormat::Plugin),
            other => Err(ArchiveError::UnsupportedFormat(other.to_string())),
        }
    }
}

/// Contract every in-process encoder satisfies.
pub trait Archiver {
    /// Add a file to the archive, then close the supplied handle.
    fn add_and_close(&mut self, target_path: &str, file: File, mode: u32)
        -> Result<(), ArchiveError>;

    /// Flush and close the underlying output. Must not be called again
    /// afterwards, and no file may be added once it ran.
    fn finalize(&mut self) -> Result<(), ArchiveError>;
}

/// Construct the encoder for an in-process format.
pub fn new_archiver(format: ArchiveFormat, out: File) -> Result<Box<dyn Archiver>, ArchiveError> {
    match format {
        ArchiveFormat::TarGz => Ok(Box::new(TarGzArchiver::new(out))),
        ArchiveFormat::Zip => Ok(Box::new(ZipArchiver::new(out))),
        ArchiveFormat::Plain => Ok(Box::new(PlainArchiver::new(out))),
        ArchiveFormat::Plugin => Err(ArchiveError::UnsupportedFormat(
            "plugin formats are not in-process".to_string(),
        )),
    }
}

/// Build one archive from the given request, routing to an in-process
/// encoder or to the configured plugin.
///
/// In dry-run mode nothing is written; plugin formats still get a
/// heartbeat probe so a dead plugin fails the run early.
pub fn build_archive(
    registry: &PluginRegistry,
    format: ArchiveFormat,
    plugin_id: &str,
    mut request: ArchiveRequest,
    dry_run: bool,
) -> Result<(), ArchiveError> {
    if format == ArchiveFormat::Plugin {
        return build_with_plugin(registry, plugin_id, &mut request, dry_run);
    }

    if dry_run {
        return Ok(());
    }

    for file in &request.files {
        if !file.source_path.is_file() {
            return Err(ArchiveError::MissingBinary(file.source_path.clone()));
        }
    }
    if let Some(parent) = request.out_filename.parent() {
        fs::create_dir_all(parent)?;
    }

    let out = File::create(&request.out_filename)?;
    let mut archiver = new_archiver(format, out)?;
    for file in &request.files {
        let f = File::open(&file.source_path)?;
        archiver.add_and_close(&file.target_path, f, file.mode)?;
    }
    archiver.finalize()
}

fn build_with_plugin(
    registry: &PluginRegistry,
    plugin_id: &str,
    request: &mut ArchiveRequest,
    dry_run: bool,
) -> Result<(), ArchiveError> {
    let client = registry.get(plugin_id).ok_or_else(|| PluginError::NotRegistered {
        id: plugin_id.to_string(),
    })?;

    if dry_run {
        // Probe instead of archiving, so a trial run still proves the
        // plugin is alive and protocol-compatible.
        request.heartbeat = Some(format!(
            "heartbeat-{}-{}",
            Utc::now().timestamp_millis(),
            Uuid::new_v4()
        ));
    }
    request.version = PROTOCOL_VERSION;

    let response = client.execute(request)?;
    if let Some(err) = response.error {
        return Err(PluginError::Plugin {
            id: plugin_id.to_string(),
            message: err.message,
        }
        .into());
    }
    if let Some(expected) = &request.heartbeat {
        let got = response.heartbeat.unwrap_or_default();
        if &got != expected {
            return Err(ArchiveError::HeartbeatMismatch {
                id: plugin_id.to_string(),
                expected: expected.clone(),
                got,
            });
        }
    }
    Ok(())
}
