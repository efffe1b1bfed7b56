//! The `release` subcommand.
//!
//! Ordering per release: collect the matched archive files, build and
//! persist the checksum manifest, append the manifest to the asset set,
//! create the remote release record (one call, yielding the id every
//! upload is addressed to), then fan out the uploads through the
//! scheduler, each independently retried.

use std::path::PathBuf;
use std::sync::Arc;

use crate::checksum::{checksum_filename, ChecksumManifest};
use crate::release::{
    new_client, upload_assets_file_with_retries, PublishClient, ReleaseError, ReleaseInfo,
};
use crate::config::ReleaseSettings;

use super::{stage_wait, Core, PipelineError};

/// How the backend client is obtained; swapped out in tests.
pub type ClientFactory<'a> =
    dyn Fn(&ReleaseSettings) -> Result<Arc<dyn PublishClient>, ReleaseError> + 'a;

pub fn run(core: &Core, commitish: &str) -> Result<(), PipelineError> {
    let dry_run = core.opts.dry_run;
    run_with(core, commitish, &|settings| new_client(settings, dry_run))
}

pub fn run_with(
    core: &Core,
    commitish: &str,
    factory: &ClientFactory<'_>,
) -> Result<(), PipelineError> {
    if commitish.is_empty() {
        return Err(PipelineError::Validate(
            "flag --commitish is required".to_string(),
        ));
    }
    if core.config.releases.is_empty() {
        return Err(PipelineError::Validate(
            "no releases defined in config".to_string(),
        ));
    }

    let releases = core.config.find_releases(&core.selection.releases);
    if releases.is_empty() {
        return Err(PipelineError::NoReleasesMatched(
            "releases selection".to_string(),
        ));
    }

    for release in releases {
        let release_dir = core.releases_dir().join(&release.path);

        // (1) Collect the archive files this release selects.
        let mut asset_files: Vec<PathBuf> = Vec::new();
        for archive in &core.config.archives {
            for archive_target in &archive.archs_compiled {
                if !release.matcher().is_match(&archive_target.target.path) {
                    continue;
                }
                asset_files.push(
                    core.archives_dir()
                        .join(&archive_target.target.path)
                        .join(&archive_target.name),
                );
            }
        }
        // A release with zero assets is almost always a configuration
        // mistake, so it fails the run rather than silently no-opping.
        if asset_files.is_empty() {
            return Err(PipelineError::NoArchivesMatched(release.path.clone()));
        }

        if core.opts.dry_run {
            core.log(&format!(
                "dry run: release {:?} would upload {} assets and a checksum manifest",
                release.path,
                asset_files.len()
            ));
            continue;
        }

        // Start fresh so stale artifacts from a previous run cannot leak
        // into the uploaded set.
        if release_dir.exists() {
            std::fs::remove_dir_all(&release_dir)?;
        }
        std::fs::create_dir_all(&release_dir)?;

        // (2) Build and persist the checksum manifest.
        let manifest = ChecksumManifest::create(&core.workforce, &core.token, &asset_files)?;
        let manifest_path =
            release_dir.join(checksum_filename(&core.config.project, &core.opts.tag));
        manifest.write_to(&manifest_path)?;

        // (3) The manifest is itself an uploadable asset.
        asset_files.push(manifest_path);

        core.log(&format!(
            "prepared {} files for release {:?}",
            asset_files.len(),
            release.path
        ));

        // (4) Create the remote release record; every upload below is
        // addressed to the returned id.
        let client = factory(&release.release_settings)?;
        let info = ReleaseInfo {
            project: core.config.project.clone(),
            tag: core.opts.tag.clone(),
            commitish: commitish.to_string(),
            settings: release.release_settings.clone(),
        };
        let release_id = client.create_release(&info)?;

        // (5) Fan out the uploads, each retried independently.
        let (run, run_token) = core.workforce.start(&core.token);
        for file in asset_files {
            let client = Arc::clone(&client);
            let info = info.clone();
            let token = run_token.clone();
            let quiet = core.opts.quiet;
            run.run(move || {
                if !quiet {
                    eprintln!("shipwright: uploading release file {}", file.display());
                }
                upload_assets_file_with_retries(&token, client.as_ref(), &info, &file, release_id)?;
                Ok(())
            });
        }
        let result = run.wait();
        stage_wait(&run_token, result, PipelineError::Upload)?;
    }

    Ok(())
}
