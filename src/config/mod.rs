//! The declarative project description (`shipwright.toml`).
//!
//! Loading expands `${VAR}` environment references over the raw text,
//! decodes the TOML, merges project-level settings down into each node and
//! validates everything, including glob compilation, so configuration
//! mistakes surface before any task is scheduled.

mod archive;
mod build;
pub mod env;
mod publish;
mod release;

use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::matcher::Matcher;

pub use archive::{Archive, ArchiveFileInfo, ArchiveSettings, ArchiveTarget};
pub use build::{find_targets, Build, BuildArch, BuildOs, BuildSettings, BuildTarget};
pub use publish::{PublishFormat, Publisher, TapFileSettings};
pub use release::{Release, ReleaseSettings, ReleaseType};

/// Configuration errors: all fatal, all reported before scheduling.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("error opening config file {path:?}: {source}")]
    Open { path: String, source: io::Error },

    #[error("error decoding config file: {0}")]
    Decode(#[from] toml::de::Error),

    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Project name; part of the dist layout and artifact names.
    pub project: String,

    #[serde(default)]
    pub builds: Vec<Build>,

    #[serde(default)]
    pub archives: Vec<Archive>,

    #[serde(default)]
    pub releases: Vec<Release>,

    #[serde(default)]
    pub publishers: Vec<Publisher>,

    /// Project-level defaults inherited by the respective nodes.
    #[serde(default)]
    pub build_settings: BuildSettings,

    #[serde(default)]
    pub archive_settings: ArchiveSettings,

    #[serde(default)]
    pub release_settings: ReleaseSettings,
}

impl Config {
    /// Parse and validate a configuration from raw TOML text, expanding
    /// `${VAR}` references against the process environment first.
    pub fn from_str(source: &str) -> Result<Config, ConfigError> {
        let expanded = env::expand_env(source, |name| std::env::var(name).ok());
        let mut config: Config = toml::from_str(&expanded)?;
        config.init()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Config, ConfigError> {
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Open {
            path: path.display().to_string(),
            source,
        })?;
        Config::from_str(&source)
    }

    fn init(&mut self) -> Result<(), ConfigError> {
        if self.project.is_empty() {
            return Err(ConfigError::Invalid("project name is required".to_string()));
        }

        // Merge project-level settings down, then validate each node.
        for build in &mut self.builds {
            build.build_settings.inherit_from(&self.build_settings);
            build.init()?;
        }
        let mut seen_paths = std::collections::HashSet::new();
        for build in &self.builds {
            if !seen_paths.insert(build.path.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "builds: duplicate path {:?}",
                    build.path
                )));
            }
        }

        for archive in &mut self.archives {
            archive
                .archive_settings
                .inherit_from(&self.archive_settings);
            archive.init()?;
        }

        let mut seen_releases = std::collections::HashSet::new();
        for release in &mut self.releases {
            release
                .release_settings
                .inherit_from(&self.release_settings);
            release.init()?;
            if !seen_releases.insert(release.path.clone()) {
                return Err(ConfigError::Invalid(format!(
                    "releases: duplicate path {:?}",
                    release.path
                )));
            }
        }

        for publisher in &mut self.publishers {
            publisher.init()?;
        }

        Ok(())
    }

    /// Resolve each archive configuration's target list: the build targets
    /// its paths match, paired with rendered archive names. Run once at
    /// startup, after which the tree is read-only.
    pub fn compile_archive_targets(&mut self, tag: &str) {
        let project = self.project.clone();
        let builds = self.builds.clone();
        let build_settings = self.build_settings.clone();
        for archive in &mut self.archives {
            let targets = find_targets(&builds, &build_settings, archive.matcher());
            archive.archs_compiled = targets
                .into_iter()
                .map(|target| {
                    let name = archive
                        .archive_settings
                        .archive_name(&project, tag, &target);
                    ArchiveTarget { target, name }
                })
                .collect();
        }
    }

    /// The build targets matching a filter, with fully merged settings.
    pub fn find_build_targets(&self, filter: &Matcher) -> Vec<BuildTarget> {
        find_targets(&self.builds, &self.build_settings, filter)
    }

    /// The releases matching a filter.
    pub fn find_releases(&self, filter: &Matcher) -> Vec<&Release> {
        self.releases
            .iter()
            .filter(|r| filter.is_match(&r.path))
            .collect()
    }
}

/// Normalize a configured path element: forward slashes, no leading or
/// trailing separator.
pub(crate) fn normalize_path(path: &str) -> String {
    path.replace('\\', "/")
        .trim_matches('/')
        .to_string()
}

/// Validate a path element used below a dist root.
pub(crate) fn validate_path_element(what: &str, path: &str) -> Result<(), ConfigError> {
    if path.is_empty() {
        return Err(ConfigError::Invalid(format!("{what}: path is empty")));
    }
    if path.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..") {
        return Err(ConfigError::Invalid(format!(
            "{what}: invalid path {path:?}"
        )));
    }
    Ok(())
}
