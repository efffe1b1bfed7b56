//! shipwright CLI entry point.

use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use shipwright::build::CommandToolchain;
use shipwright::cancel::{cancel_after, cancel_on_interrupt};
use shipwright::commands::build::BuildOpts;
use shipwright::commands::{all, archive, build, publish, release};
use shipwright::{CancellationToken, Core, CoreOpts, PipelineError};

#[derive(Parser)]
#[command(name = "shipwright")]
#[command(about = "Parallel release orchestrator", version)]
struct Cli {
    #[command(flatten)]
    global: GlobalOpts,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct GlobalOpts {
    /// The release tag, e.g. v1.2.0. Does not need to exist.
    #[arg(long, global = true)]
    tag: Option<String>,

    /// The config file to use.
    #[arg(long, global = true, default_value = "shipwright.toml")]
    config: PathBuf,

    /// Directory to store the built artifacts in.
    #[arg(long, global = true, default_value = "dist")]
    dist: PathBuf,

    /// Number of parallel tasks (default: bounded by CPU count).
    #[arg(long, global = true, default_value_t = 0)]
    workers: usize,

    /// Global timeout in seconds.
    #[arg(long, global = true, default_value_t = 3300)]
    timeout: u64,

    /// Per-call plugin timeout in seconds.
    #[arg(long, global = true, default_value_t = 220)]
    plugin_timeout: u64,

    /// Paths to include, e.g. builds/tools/linux/** (repeatable).
    #[arg(long = "paths", global = true)]
    paths: Vec<String>,

    /// Trial run: no builds, archives or uploads.
    #[arg(long, global = true)]
    dry_run: bool,

    /// Don't log progress to stderr.
    #[arg(long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the configured binaries.
    Build {
        /// Number of chunks to split the build into (for CI sharding).
        #[arg(long)]
        chunks: Option<usize>,

        /// Index of the chunk to build.
        #[arg(long)]
        chunk_index: Option<usize>,
    },

    /// Package built binaries into archives.
    Archive,

    /// Create the remote release and upload archives and checksums.
    Release {
        /// The commitish the release tag is created from.
        #[arg(long)]
        commitish: String,
    },

    /// Publish draft releases and update downstream manifests.
    Publish,

    /// Build, archive and release in one go.
    All {
        /// The commitish the release tag is created from.
        #[arg(long)]
        commitish: String,
    },
}

fn main() {
    let cli = Cli::parse();

    let token = CancellationToken::new();
    if let Err(err) = cancel_on_interrupt(&token) {
        eprintln!("shipwright: error installing signal handler: {err}");
    }
    cancel_after(&token, Duration::from_secs(cli.global.timeout));

    match run(cli, token) {
        Ok(()) => {}
        Err(err) => {
            eprintln!("shipwright: error: {err}");
            process::exit(err.exit_code());
        }
    }
}

fn run(cli: Cli, token: CancellationToken) -> Result<(), PipelineError> {
    let project_dir = std::env::current_dir()?;
    let opts = CoreOpts {
        tag: cli.global.tag.unwrap_or_default(),
        config_file: cli.global.config,
        dist_dir: cli.global.dist,
        project_dir,
        num_workers: cli.global.workers,
        plugin_timeout: Duration::from_secs(cli.global.plugin_timeout),
        dry_run: cli.global.dry_run,
        quiet: cli.global.quiet,
        paths: cli.global.paths,
    };

    let core = Core::init(opts, token)?;
    let toolchain = Arc::new(CommandToolchain);

    let result = match &cli.command {
        Commands::Build {
            chunks,
            chunk_index,
        } => build::run(
            &core,
            toolchain,
            &BuildOpts {
                chunks: *chunks,
                chunk_index: *chunk_index,
            },
        ),
        Commands::Archive => archive::run(&core),
        Commands::Release { commitish } => release::run(&core, commitish),
        Commands::Publish => publish::run(&core),
        Commands::All { commitish } => all::run(&core, toolchain, commitish),
    };

    core.close();
    result
}
