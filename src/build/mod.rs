//! Build stage plumbing: the compiler-invocation boundary and the
//! universal-binary fuser.
//!
//! The compiler toolchain itself is an external collaborator behind the
//! [`Toolchain`] trait; the orchestrator only decides what to build where,
//! with which environment overrides.

mod universal;

use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use crate::cancel::CancellationToken;
use crate::config::BuildTarget;

pub use universal::{create_universal_binary, UNIVERSAL_ARCH};

/// Environment variables the toolchain receives for cross-compilation.
pub const ENV_TARGET_OS: &str = "TARGET_OS";
pub const ENV_TARGET_ARCH: &str = "TARGET_ARCH";

/// Build stage errors.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("build {path:?}: no compiler command configured")]
    MissingCommand { path: String },

    #[error("build {path:?}: compiler exited with {status}")]
    CompilerExit { path: String, status: String },

    #[error("build {path:?}: cancelled")]
    Cancelled { path: String },

    #[error("universal binary: {0}")]
    Universal(String),
}

/// One unit of compiler work.
#[derive(Debug, Clone)]
pub struct BuildJob {
    pub target: BuildTarget,
    /// The architecture actually handed to the compiler; differs from
    /// `target.arch` for the universal slices.
    pub arch: String,
    pub out_filename: PathBuf,
    pub project_dir: PathBuf,
}

/// The external compiler invocation: given a target and environment
/// overrides, produce a binary at the job's output path or fail.
pub trait Toolchain: Send + Sync {
    fn build(&self, job: &BuildJob, token: &CancellationToken) -> Result<(), BuildError>;
}

/// Runs the configured compiler command with `TARGET_OS`/`TARGET_ARCH` set,
/// the target's extra environment, its flags and `-o <out>`.
pub struct CommandToolchain;

impl Toolchain for CommandToolchain {
    fn build(&self, job: &BuildJob, token: &CancellationToken) -> Result<(), BuildError> {
        let settings = &job.target.settings;
        if settings.command.is_empty() {
            return Err(BuildError::MissingCommand {
                path: job.target.path.clone(),
            });
        }

        let mut command = Command::new(&settings.command);
        command
            .args(&settings.flags)
            .arg("-o")
            .arg(&job.out_filename)
            .current_dir(&job.project_dir)
            .env(ENV_TARGET_OS, &job.target.os)
            .env(ENV_TARGET_ARCH, &job.arch)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        for entry in &settings.env {
            if let Some((key, value)) = entry.split_once('=') {
                command.env(key, value);
            }
        }

        let mut child = command.spawn()?;
        // Poll so a cancelled run does not sit behind a long compile.
        loop {
            if let Some(status) = child.try_wait()? {
                if status.success() {
                    return Ok(());
                }
                return Err(BuildError::CompilerExit {
                    path: job.target.path.clone(),
                    status: status.to_string(),
                });
            }
            if token.is_cancelled() {
                let _ = child.kill();
                let _ = child.wait();
                return Err(BuildError::Cancelled {
                    path: job.target.path.clone(),
                });
            }
            token.sleep(Duration::from_millis(50));
        }
    }
}

/// Build one target into `out_dir`, fusing universal binaries from their
/// per-architecture slices.
pub fn build_target(
    toolchain: &dyn Toolchain,
    target: &BuildTarget,
    out_dir: &Path,
    project_dir: &Path,
    token: &CancellationToken,
) -> Result<(), BuildError> {
    std::fs::create_dir_all(out_dir)?;
    let out_filename = out_dir.join(&target.settings.binary);

    if target.arch == UNIVERSAL_ARCH {
        // Build both slices, then fuse them into one fat binary.
        let mut slices = Vec::new();
        for arch in ["arm64", "amd64"] {
            let slice_out = out_dir.join(format!("{}_{arch}", target.settings.binary));
            toolchain.build(
                &BuildJob {
                    target: target.clone(),
                    arch: arch.to_string(),
                    out_filename: slice_out.clone(),
                    project_dir: project_dir.to_path_buf(),
                },
                token,
            )?;
            slices.push(slice_out);
        }
        create_universal_binary(&out_filename, &slices)?;
        for slice in slices {
            std::fs::remove_file(slice)?;
        }
        return Ok(());
    }

    toolchain.build(
        &BuildJob {
            target: target.clone(),
            arch: target.arch.clone(),
            out_filename,
            project_dir: project_dir.to_path_buf(),
        },
        token,
    )
}

/// Deterministically partition targets into `chunks` slices and return the
/// one at `index`, for splitting a big build across CI jobs.
pub fn chunk_targets(
    targets: Vec<BuildTarget>,
    chunks: usize,
    index: usize,
) -> Vec<BuildTarget> {
    if chunks == 0 {
        return targets;
    }
    let size = targets.len().div_ceil(chunks);
    if size == 0 {
        return Vec::new();
    }
    targets
        .into_iter()
        .skip(index * size)
        .take(size)
        .collect()
}
