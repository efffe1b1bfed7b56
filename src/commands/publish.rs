//! The `publish` subcommand: flip draft releases live and update
//! formula/manifest files in downstream repositories.

use std::sync::Arc;

use crate::checksum::{checksum_filename, ChecksumManifest};
use crate::config::{PublishFormat, Publisher, Release, TapFileSettings};
use crate::release::{new_client, PublishClient, ReleaseError};
use crate::config::ReleaseSettings;

use super::{Core, PipelineError};

/// Built-in tap-file template, used when the publisher configures none.
const DEFAULT_TAP_TEMPLATE: &str = r#"# Generated by shipwright. DO NOT EDIT.
class ${class_name} < Formula
  desc "${description}"
  homepage "${homepage}"
  version "${version}"
  url "${url}"
  sha256 "${sha256}"
end
"#;

pub type ClientFactory<'a> =
    dyn Fn(&ReleaseSettings) -> Result<Arc<dyn PublishClient>, ReleaseError> + 'a;

pub fn run(core: &Core) -> Result<(), PipelineError> {
    let dry_run = core.opts.dry_run;
    run_with(core, &|settings| new_client(settings, dry_run))
}

pub fn run_with(core: &Core, factory: &ClientFactory<'_>) -> Result<(), PipelineError> {
    if core.config.publishers.is_empty() {
        core.log("no publishers configured");
        return Ok(());
    }

    for publisher in &core.config.publishers {
        let releases: Vec<&Release> = core
            .config
            .find_releases(publisher.releases_matcher())
            .into_iter()
            .filter(|r| core.selection.releases.is_match(&r.path))
            .collect();

        for release in releases {
            let client = factory(&release.release_settings)?;
            match publisher.kind_parsed {
                PublishFormat::GitHubRelease => {
                    publish_github_release(core, client.as_ref(), release)?
                }
                PublishFormat::TapFile => {
                    publish_tap_file(core, client.as_ref(), publisher, release)?
                }
            }
        }
    }

    Ok(())
}

fn publish_github_release(
    core: &Core,
    client: &dyn PublishClient,
    release: &Release,
) -> Result<(), PipelineError> {
    let settings = &release.release_settings;
    let (release_id, is_draft) = client.release_by_tag(
        &settings.repository_owner,
        &settings.repository,
        &core.opts.tag,
    )?;

    if is_draft {
        client.publish_release(&settings.repository_owner, &settings.repository, release_id)?;
        core.log(&format!("release {:?} published", release.path));
    } else {
        core.log(&format!("release {:?} is already published", release.path));
    }
    Ok(())
}

fn publish_tap_file(
    core: &Core,
    client: &dyn PublishClient,
    publisher: &Publisher,
    release: &Release,
) -> Result<(), PipelineError> {
    let release_settings = &release.release_settings;
    let mut settings = TapFileSettings::from_map(&publisher.custom_settings)?;
    if settings.repository.is_empty() {
        settings.repository = "homebrew-tap".to_string();
    }
    if settings.name.is_empty() {
        settings.name = core.config.project.clone();
    }
    if settings.path.is_empty() {
        settings.path = format!("Formula/{}.rb", settings.name);
    }

    // The archive whose digest and URL feed the template: the first one the
    // release selects that also matches the publisher's archive filter.
    let archive_target = core
        .config
        .archives
        .iter()
        .flat_map(|a| a.archs_compiled.iter())
        .find(|at| {
            release.matcher().is_match(&at.target.path)
                && publisher.archives_matcher().is_match(&at.target.path)
        })
        .ok_or_else(|| {
            PipelineError::Validate(format!(
                "publishers: no archive matched for release {:?}",
                release.path
            ))
        })?;

    // Digests come from the manifest the release stage persisted.
    let manifest_path = core
        .releases_dir()
        .join(&release.path)
        .join(checksum_filename(&core.config.project, &core.opts.tag));
    if core.opts.dry_run && !manifest_path.is_file() {
        core.log(&format!(
            "dry run: would update {}/{} for release {:?}",
            settings.repository, settings.path, release.path
        ));
        return Ok(());
    }
    let manifest = ChecksumManifest::read_from(&manifest_path)?;
    let sha256 = manifest.digest_of(&archive_target.name).ok_or_else(|| {
        PipelineError::Validate(format!(
            "checksum manifest has no entry for {:?} (run the release stage first)",
            archive_target.name
        ))
    })?;

    let version = core
        .opts
        .tag
        .strip_prefix('v')
        .unwrap_or(&core.opts.tag)
        .to_string();
    let url = format!(
        "https://github.com/{}/{}/releases/download/{}/{}",
        release_settings.repository_owner,
        release_settings.repository,
        core.opts.tag,
        archive_target.name
    );

    let template = if settings.template_filename.is_empty() {
        DEFAULT_TAP_TEMPLATE.to_string()
    } else {
        std::fs::read_to_string(core.opts.project_dir.join(&settings.template_filename))?
    };
    let content = render_template(
        &template,
        &[
            ("name", settings.name.as_str()),
            ("class_name", &class_name(&settings.name)),
            ("project", core.config.project.as_str()),
            ("tag", core.opts.tag.as_str()),
            ("version", version.as_str()),
            ("sha256", sha256),
            ("url", url.as_str()),
            ("file", archive_target.name.as_str()),
            ("description", settings.description.as_str()),
            ("homepage", settings.homepage.as_str()),
        ],
    );

    let message = format!("Update {} to {}", settings.name, core.opts.tag);
    let sha = client.update_file_in_repo(
        &release_settings.repository_owner,
        &settings.repository,
        &settings.path,
        &message,
        content.as_bytes(),
    )?;
    core.log(&format!(
        "updated {}/{} ({sha})",
        settings.repository, settings.path
    ));
    Ok(())
}

/// Substitute `${key}` placeholders.
fn render_template(template: &str, context: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (key, value) in context {
        out = out.replace(&format!("${{{key}}}"), value);
    }
    out
}

/// `my-tool` → `MyTool`, the formula class naming convention.
fn class_name(name: &str) -> String {
    name.split(|c: char| !c.is_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}
