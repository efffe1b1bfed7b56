//! The `archive` subcommand: package every selected build into archives.

use std::path::Path;

use shipwright_plugin_api::{ArchiveFile, ArchiveRequest, BuildContext};

use crate::archive::build_archive;
use crate::config::ArchiveFileInfo;
use crate::workforce::TaskError;

use super::{stage_wait, Core, PipelineError};

pub fn run(core: &Core) -> Result<(), PipelineError> {
    let archives_dir = core.archives_dir();
    let builds_dir = core.builds_dir();
    let dry_run = core.opts.dry_run;

    let (run, run_token) = core.workforce.start(&core.token);

    for archive in &core.config.archives {
        let settings = &archive.archive_settings;
        for archive_target in &archive.archs_compiled {
            if !core.selection.archives.is_match(&archive_target.target.path) {
                continue;
            }

            let target = archive_target.target.clone();
            let out_filename = archives_dir
                .join(&target.path)
                .join(&archive_target.name);
            let binary_filename = builds_dir.join(target.binary_path());
            let format = settings.format_parsed;
            let plugin_id = settings.plugin.id.clone();
            let binary_dir = settings.binary_dir.clone();
            let custom_settings = settings.custom_settings.clone();
            let extra_files = settings.extra_files.clone();
            let project = core.config.project.clone();
            let tag = core.opts.tag.clone();
            let project_dir = core.opts.project_dir.clone();
            let quiet = core.opts.quiet;

            let registry = std::sync::Arc::clone(&core.registry);

            run.run(move || {
                if !quiet {
                    eprintln!("shipwright: archiving {}", out_filename.display());
                }

                let mut files = vec![ArchiveFile {
                    source_path: binary_filename.clone(),
                    target_path: join_target_path(&binary_dir, &target.settings.binary),
                    mode: 0o755,
                }];
                files.extend(expand_extra_files(&project_dir, &extra_files)?);

                if !dry_run && !binary_filename.is_file() {
                    return Err(TaskError::msg(format!(
                        "binary file not found: {} (run the build stage first)",
                        binary_filename.display()
                    )));
                }

                let request = ArchiveRequest {
                    version: shipwright_plugin_api::PROTOCOL_VERSION,
                    heartbeat: None,
                    build_context: BuildContext {
                        project: project.clone(),
                        tag: tag.clone(),
                        os: target.os.clone(),
                        arch: target.arch.clone(),
                    },
                    settings: custom_settings,
                    files,
                    out_filename,
                };

                build_archive(&registry, format, &plugin_id, request, dry_run)?;
                Ok(())
            });
        }
    }

    let result = run.wait();
    stage_wait(&run_token, result, PipelineError::Archive)
}

fn join_target_path(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{name}", dir.trim_end_matches('/'))
    }
}

/// Expand configured extra files into concrete archive entries. A source
/// directory is walked and every file below it is added under the target
/// path.
fn expand_extra_files(
    project_dir: &Path,
    infos: &[ArchiveFileInfo],
) -> Result<Vec<ArchiveFile>, TaskError> {
    let mut files = Vec::new();
    for info in infos {
        let source = project_dir.join(&info.source_path);
        if source.is_dir() {
            for entry in walkdir::WalkDir::new(&source).sort_by_file_name() {
                let entry = entry.map_err(|e| TaskError::msg(e.to_string()))?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let relative = entry
                    .path()
                    .strip_prefix(&source)
                    .map_err(|e| TaskError::msg(e.to_string()))?;
                files.push(ArchiveFile {
                    source_path: entry.path().to_path_buf(),
                    target_path: join_target_path(
                        &info.target_path,
                        &relative.to_string_lossy(),
                    ),
                    mode: info.mode,
                });
            }
        } else {
            files.push(ArchiveFile {
                source_path: source,
                target_path: info.target_path.clone(),
                mode: info.mode,
            });
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancellationToken;
    use crate::commands::build::tests::WritingToolchain;
    use crate::commands::tests::{core_opts, write_sample_project};
    use crate::commands::{build, Core};
    use std::sync::Arc;

    fn built_core(dir: &Path) -> Core {
        write_sample_project(dir);
        let core = Core::init(core_opts(dir), CancellationToken::new()).unwrap();
        build::run(
            &core,
            Arc::new(WritingToolchain::new()),
            &Default::default(),
        )
        .unwrap();
        core
    }

    #[test]
    fn test_archives_are_written_per_target() {
        let dir = tempfile::tempdir().unwrap();
        let core = built_core(dir.path());

        run(&core).unwrap();

        assert!(core
            .archives_dir()
            .join("tools/linux/amd64/shipwright_v0.1.0_linux_amd64.tar.gz")
            .is_file());
        assert!(core
            .archives_dir()
            .join("tools/linux/arm64/shipwright_v0.1.0_linux_arm64.tar.gz")
            .is_file());
        assert!(core
            .archives_dir()
            .join("tools/windows/amd64/shipwright_v0.1.0_windows_amd64.zip")
            .is_file());
    }

    #[test]
    fn test_missing_binary_fails_the_target() {
        let dir = tempfile::tempdir().unwrap();
        write_sample_project(dir.path());
        let core = Core::init(core_opts(dir.path()), CancellationToken::new()).unwrap();

        // No build stage ran, so every binary is missing.
        let err = run(&core).unwrap_err();
        assert!(matches!(err, PipelineError::Archive(_)));
    }

    #[test]
    fn test_dry_run_writes_no_archives() {
        let dir = tempfile::tempdir().unwrap();
        write_sample_project(dir.path());
        let mut opts = core_opts(dir.path());
        opts.dry_run = true;
        let core = Core::init(opts, CancellationToken::new()).unwrap();

        run(&core).unwrap();
        assert!(!core.archives_dir().exists());
    }

    #[test]
    fn test_join_target_path() {
        assert_eq!(join_target_path("", "tool"), "tool");
        assert_eq!(join_target_path("bin", "tool"), "bin/tool");
        assert_eq!(join_target_path("bin/", "tool"), "bin/tool");
    }

    #[test]
    fn test_expand_extra_files_walks_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("docs/guides")).unwrap();
        std::fs::write(dir.path().join("docs/README.md"), "readme").unwrap();
        std::fs::write(dir.path().join("docs/guides/intro.md"), "intro").unwrap();
        std::fs::write(dir.path().join("LICENSE"), "license").unwrap();

        let infos = vec![
            ArchiveFileInfo {
                source_path: "LICENSE".to_string(),
                target_path: "LICENSE".to_string(),
                mode: 0o644,
            },
            ArchiveFileInfo {
                source_path: "docs".to_string(),
                target_path: "share/docs".to_string(),
                mode: 0o644,
            },
        ];
        let files = expand_extra_files(dir.path(), &infos).unwrap();
        let targets: Vec<&str> = files.iter().map(|f| f.target_path.as_str()).collect();
        assert_eq!(
            targets,
            [
                "LICENSE",
                "share/docs/README.md",
                "share/docs/guides/intro.md"
            ]
        );
    }
}
