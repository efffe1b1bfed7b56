//! The `build` subcommand: compile every selected target, bounded-parallel.

use std::sync::Arc;

use crate::build::{build_target, Toolchain};

use super::{stage_wait, Core, PipelineError};

/// Build-specific flags.
#[derive(Debug, Clone, Default)]
pub struct BuildOpts {
    /// Split the target list into this many chunks (for CI sharding).
    pub chunks: Option<usize>,
    /// Which chunk to build.
    pub chunk_index: Option<usize>,
}

pub fn run(
    core: &Core,
    toolchain: Arc<dyn Toolchain>,
    opts: &BuildOpts,
) -> Result<(), PipelineError> {
    let mut targets = core.config.find_build_targets(&core.selection.builds);

    if let Some(chunks) = opts.chunks {
        let index = opts.chunk_index.ok_or_else(|| {
            PipelineError::Validate("--chunks requires --chunk-index".to_string())
        })?;
        if index >= chunks {
            return Err(PipelineError::Validate(format!(
                "--chunk-index ({index}) must be less than --chunks ({chunks})"
            )));
        }
        targets = crate::build::chunk_targets(targets, chunks, index);
        core.log(&format!(
            "building {} targets in chunk {} of {chunks}",
            targets.len(),
            index + 1
        ));
    } else {
        core.log(&format!("building {} targets", targets.len()));
    }

    if targets.is_empty() {
        return Ok(());
    }

    let builds_dir = core.builds_dir();
    let project_dir = core.opts.project_dir.clone();
    let dry_run = core.opts.dry_run;

    let (run, run_token) = core.workforce.start(&core.token);
    for target in targets {
        let out_dir = builds_dir.join(&target.path);
        let project_dir = project_dir.clone();
        let toolchain = Arc::clone(&toolchain);
        let token = run_token.clone();
        let quiet = core.opts.quiet;
        run.run(move || {
            if !quiet {
                eprintln!(
                    "shipwright: building {}",
                    out_dir.join(&target.settings.binary).display()
                );
            }
            if dry_run {
                return Ok(());
            }
            build_target(toolchain.as_ref(), &target, &out_dir, &project_dir, &token)?;
            Ok(())
        });
    }

    let result = run.wait();
    stage_wait(&run_token, result, PipelineError::Build)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::build::{BuildError, BuildJob};
    use crate::cancel::CancellationToken;
    use crate::commands::tests::{core_opts, write_sample_project};
    use std::sync::Mutex;

    /// A toolchain that writes a marker binary instead of compiling.
    pub(crate) struct WritingToolchain {
        pub jobs: Mutex<Vec<String>>,
    }

    impl WritingToolchain {
        pub(crate) fn new() -> Self {
            Self {
                jobs: Mutex::new(Vec::new()),
            }
        }
    }

    impl Toolchain for WritingToolchain {
        fn build(&self, job: &BuildJob, _token: &CancellationToken) -> Result<(), BuildError> {
            std::fs::write(
                &job.out_filename,
                format!("binary for {} {}", job.target.os, job.arch),
            )?;
            self.jobs.lock().unwrap().push(job.target.path.clone());
            Ok(())
        }
    }

    fn init_core(dir: &std::path::Path, dry_run: bool) -> Core {
        let mut opts = core_opts(dir);
        opts.dry_run = dry_run;
        Core::init(opts, CancellationToken::new()).unwrap()
    }

    #[test]
    fn test_build_produces_binaries_in_dist_layout() {
        let dir = tempfile::tempdir().unwrap();
        write_sample_project(dir.path());
        let core = init_core(dir.path(), false);

        let toolchain = Arc::new(WritingToolchain::new());
        run(&core, toolchain.clone(), &BuildOpts::default()).unwrap();

        assert_eq!(toolchain.jobs.lock().unwrap().len(), 3);
        assert!(core
            .builds_dir()
            .join("tools/linux/amd64/shipwright")
            .is_file());
        assert!(core
            .builds_dir()
            .join("tools/windows/amd64/shipwright.exe")
            .is_file());
    }

    #[test]
    fn test_dry_run_builds_nothing() {
        let dir = tempfile::tempdir().unwrap();
        write_sample_project(dir.path());
        let core = init_core(dir.path(), true);

        let toolchain = Arc::new(WritingToolchain::new());
        run(&core, toolchain.clone(), &BuildOpts::default()).unwrap();

        assert!(toolchain.jobs.lock().unwrap().is_empty());
        assert!(!core.builds_dir().join("tools/linux/amd64/shipwright").exists());
    }

    #[test]
    fn test_selection_filters_targets() {
        let dir = tempfile::tempdir().unwrap();
        write_sample_project(dir.path());
        let mut opts = core_opts(dir.path());
        opts.paths = vec!["builds/tools/linux/*".to_string()];
        let core = Core::init(opts, CancellationToken::new()).unwrap();

        let toolchain = Arc::new(WritingToolchain::new());
        run(&core, toolchain.clone(), &BuildOpts::default()).unwrap();

        let jobs = toolchain.jobs.lock().unwrap();
        assert_eq!(jobs.len(), 2);
        assert!(jobs.iter().all(|p| p.starts_with("tools/linux/")));
    }

    #[test]
    fn test_chunk_flags_are_validated() {
        let dir = tempfile::tempdir().unwrap();
        write_sample_project(dir.path());
        let core = init_core(dir.path(), true);

        let toolchain = Arc::new(WritingToolchain::new());
        let err = run(
            &core,
            toolchain.clone(),
            &BuildOpts {
                chunks: Some(2),
                chunk_index: None,
            },
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::Validate(_)));

        let err = run(
            &core,
            toolchain,
            &BuildOpts {
                chunks: Some(2),
                chunk_index: Some(2),
            },
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::Validate(_)));
    }

    #[test]
    fn test_failing_build_surfaces_as_build_error() {
        struct FailingToolchain;
        impl Toolchain for FailingToolchain {
            fn build(&self, job: &BuildJob, _: &CancellationToken) -> Result<(), BuildError> {
                Err(BuildError::CompilerExit {
                    path: job.target.path.clone(),
                    status: "exit status: 1".to_string(),
                })
            }
        }

        let dir = tempfile::tempdir().unwrap();
        write_sample_project(dir.path());
        let core = init_core(dir.path(), false);

        let err = run(&core, Arc::new(FailingToolchain), &BuildOpts::default()).unwrap_err();
        assert!(matches!(err, PipelineError::Build(_)));
    }
}
