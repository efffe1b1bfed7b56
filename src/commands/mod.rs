//! Command plumbing shared by every subcommand.
//!
//! [`Core`] holds the parsed configuration, the compiled selection, the
//! workforce and the plugin registry, and is handed to each stage. Plugins
//! referenced by archive configurations are started (idempotently, once
//! per id) during init, before any task is scheduled.

pub mod all;
pub mod archive;
pub mod build;
pub mod publish;
pub mod release;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::cancel::{CancelReason, CancellationToken};
use crate::checksum::ChecksumError;
use crate::config::{Config, ConfigError};
use crate::plugin::{PluginClientOptions, PluginError, PluginRegistry};
use crate::release::ReleaseError;
use crate::selection::{Selection, SelectionError};
use crate::workforce::{default_num_workers, TaskError, Workforce};

/// Dist tree roots below `dist/<project>/<tag>/`.
pub const DIST_ROOT_BUILDS: &str = "builds";
pub const DIST_ROOT_ARCHIVES: &str = "archives";
pub const DIST_ROOT_RELEASES: &str = "releases";

/// Pipeline errors, mapped to process exit codes.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("error compiling --paths: {0}")]
    Selection(#[from] SelectionError),

    #[error(transparent)]
    Plugin(#[from] PluginError),

    #[error("build failed: {0}")]
    Build(TaskError),

    #[error("archive failed: {0}")]
    Archive(TaskError),

    #[error(transparent)]
    Checksum(#[from] ChecksumError),

    #[error(transparent)]
    Release(#[from] ReleaseError),

    #[error("failed to upload files: {0}")]
    Upload(TaskError),

    #[error("{0}")]
    Validate(String),

    #[error("no releases found matching {0:?}")]
    NoReleasesMatched(String),

    #[error("release {0:?}: no archives matched")]
    NoArchivesMatched(String),

    #[error("global timeout exceeded")]
    Timeout,

    #[error("interrupted")]
    Interrupted,

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

impl PipelineError {
    /// Exit code for the process.
    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineError::Config(_)
            | PipelineError::Selection(_)
            | PipelineError::Validate(_)
            | PipelineError::NoReleasesMatched(_)
            | PipelineError::NoArchivesMatched(_)
            | PipelineError::Io(_) => 1,
            PipelineError::Plugin(_) => 30,
            PipelineError::Build(_) => 40,
            PipelineError::Archive(_) => 50,
            PipelineError::Checksum(_) => 60,
            PipelineError::Release(_) | PipelineError::Upload(_) => 70,
            PipelineError::Timeout => 80,
            PipelineError::Interrupted => 81,
        }
    }
}

/// Options shared by every subcommand.
#[derive(Debug, Clone)]
pub struct CoreOpts {
    /// The release tag, e.g. `v1.2.0`. Required.
    pub tag: String,
    pub config_file: PathBuf,
    pub dist_dir: PathBuf,
    pub project_dir: PathBuf,
    /// Worker count; 0 means the bounded default.
    pub num_workers: usize,
    /// Per-call plugin timeout.
    pub plugin_timeout: Duration,
    /// Trial run: no builds, archives or uploads.
    pub dry_run: bool,
    pub quiet: bool,
    /// `--paths` filters.
    pub paths: Vec<String>,
}

impl Default for CoreOpts {
    fn default() -> Self {
        Self {
            tag: String::new(),
            config_file: PathBuf::from("shipwright.toml"),
            dist_dir: PathBuf::from("dist"),
            project_dir: PathBuf::from("."),
            num_workers: 0,
            plugin_timeout: crate::plugin::DEFAULT_CALL_TIMEOUT,
            dry_run: false,
            quiet: false,
            paths: Vec::new(),
        }
    }
}

/// Shared state for one invocation.
pub struct Core {
    pub config: Config,
    pub selection: Selection,
    pub workforce: Workforce,
    /// Shared with archive task closures, which outlive the borrow of
    /// `Core` inside the worker pool.
    pub registry: Arc<PluginRegistry>,
    pub token: CancellationToken,
    pub opts: CoreOpts,
    pub dist_dir: PathBuf,
}

impl std::fmt::Debug for Core {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Core")
            .field("config", &self.config)
            .field("selection", &self.selection)
            .field("workforce", &self.workforce)
            .field("opts", &self.opts)
            .field("dist_dir", &self.dist_dir)
            .finish_non_exhaustive()
    }
}

impl Core {
    /// Load configuration, compile the selection, start the plugins. All
    /// configuration errors surface here, before any stage runs.
    pub fn init(opts: CoreOpts, token: CancellationToken) -> Result<Core, PipelineError> {
        if opts.tag.is_empty() {
            return Err(PipelineError::Validate("flag --tag is required".to_string()));
        }

        // OS environment wins over the env file.
        crate::config::env::apply_env_file(&opts.project_dir.join("shipwright.env"))?;

        let config_file = if opts.config_file.is_absolute() {
            opts.config_file.clone()
        } else {
            opts.project_dir.join(&opts.config_file)
        };
        let mut config = Config::from_file(&config_file)?;
        config.compile_archive_targets(&opts.tag);

        let selection = Selection::compile(&opts.paths)?;

        let num_workers = if opts.num_workers == 0 {
            default_num_workers()
        } else {
            opts.num_workers
        };
        let workforce = Workforce::new(num_workers);

        let quiet = opts.quiet;
        let registry = Arc::new(PluginRegistry::new(PluginClientOptions {
            timeout: opts.plugin_timeout,
            log: Arc::new(move |id, line| {
                if !quiet {
                    eprintln!("[plugin {id}] {line}");
                }
            }),
        }));

        let dist_dir = if opts.dist_dir.is_absolute() {
            opts.dist_dir.clone()
        } else {
            opts.project_dir.join(&opts.dist_dir)
        };
        std::fs::create_dir_all(&dist_dir)?;

        let core = Core {
            config,
            selection,
            workforce,
            registry,
            token,
            opts,
            dist_dir,
        };
        core.start_plugins()?;
        Ok(core)
    }

    /// Start and register every plugin referenced by an archive
    /// configuration. Idempotent per id; a dead plugin fails the run here,
    /// before any archive task is scheduled.
    fn start_plugins(&self) -> Result<(), PipelineError> {
        for archive in &self.config.archives {
            let descriptor = &archive.archive_settings.plugin;
            if descriptor.is_zero() {
                continue;
            }
            self.registry.start_and_register(descriptor)?;
            self.log(&format!(
                "plugin {:?} started and ready for use",
                descriptor.id
            ));
        }
        Ok(())
    }

    pub fn log(&self, message: &str) {
        if !self.opts.quiet {
            eprintln!("shipwright: {message}");
        }
    }

    pub fn builds_dir(&self) -> PathBuf {
        self.dist_root(DIST_ROOT_BUILDS)
    }

    pub fn archives_dir(&self) -> PathBuf {
        self.dist_root(DIST_ROOT_ARCHIVES)
    }

    pub fn releases_dir(&self) -> PathBuf {
        self.dist_root(DIST_ROOT_RELEASES)
    }

    fn dist_root(&self, root: &str) -> PathBuf {
        self.dist_dir
            .join(&self.config.project)
            .join(&self.opts.tag)
            .join(root)
    }

    /// Close every plugin connection. Safe to call unconditionally at the
    /// end of a run.
    pub fn close(&self) {
        self.registry.close_all();
    }
}

/// Map a finished run's error to the pipeline taxonomy, reporting a global
/// timeout or interrupt distinctly from a task failure.
pub(crate) fn stage_wait(
    run_token: &CancellationToken,
    result: Result<(), TaskError>,
    wrap: impl FnOnce(TaskError) -> PipelineError,
) -> Result<(), PipelineError> {
    match result {
        Ok(()) => Ok(()),
        Err(err) => match run_token.reason() {
            Some(CancelReason::Timeout) => Err(PipelineError::Timeout),
            Some(CancelReason::Interrupted) => Err(PipelineError::Interrupted),
            _ => Err(wrap(err)),
        },
    }
}
