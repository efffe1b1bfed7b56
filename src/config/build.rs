//! The build target tree: build path → OS → architecture.

use serde::{Deserialize, Serialize};

use crate::build::UNIVERSAL_ARCH;
use crate::matcher::Matcher;

use super::ConfigError;

/// Settings that may appear at any level of the tree. Unset fields inherit
/// from the level above; lists replace rather than append.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildSettings {
    /// Name of the produced binary.
    #[serde(default)]
    pub binary: String,

    /// Compiler executable to invoke.
    #[serde(default)]
    pub command: String,

    /// Extra environment entries, `KEY=VALUE`.
    #[serde(default)]
    pub env: Vec<String>,

    /// Extra compiler flags, passed before `-o <out>`.
    #[serde(default)]
    pub flags: Vec<String>,
}

impl BuildSettings {
    /// Fill unset fields from the parent level.
    pub fn inherit_from(&mut self, parent: &BuildSettings) {
        if self.binary.is_empty() {
            self.binary = parent.binary.clone();
        }
        if self.command.is_empty() {
            self.command = parent.command.clone();
        }
        if self.env.is_empty() {
            self.env = parent.env.clone();
        }
        if self.flags.is_empty() {
            self.flags = parent.flags.clone();
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildArch {
    /// Architecture id, e.g. `amd64`, `arm64` or `universal`.
    pub name: String,

    #[serde(default)]
    pub build_settings: BuildSettings,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildOs {
    /// OS id, e.g. `linux`, `darwin`, `windows`.
    pub name: String,

    #[serde(default)]
    pub archs: Vec<BuildArch>,

    #[serde(default)]
    pub build_settings: BuildSettings,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Build {
    /// Logical path below `builds/`, unique within the configuration.
    pub path: String,

    #[serde(default)]
    pub os: Vec<BuildOs>,

    #[serde(default)]
    pub build_settings: BuildSettings,
}

impl Build {
    pub(super) fn init(&mut self) -> Result<(), ConfigError> {
        self.path = super::normalize_path(&self.path);
        super::validate_path_element("builds", &self.path)?;

        for os in &self.os {
            if os.name.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "builds {:?}: os entry has no name",
                    self.path
                )));
            }
            for arch in &os.archs {
                if arch.name.is_empty() {
                    return Err(ConfigError::Invalid(format!(
                        "builds {:?}: arch entry under {:?} has no name",
                        self.path, os.name
                    )));
                }
                if arch.name == UNIVERSAL_ARCH && os.name != "darwin" {
                    return Err(ConfigError::Invalid(format!(
                        "builds {:?}: universal arch is only supported on darwin",
                        self.path
                    )));
                }
            }
        }
        Ok(())
    }
}

/// One fully resolved (path, os, arch) triple with merged settings.
/// Immutable once derived from the configuration at startup.
#[derive(Debug, Clone)]
pub struct BuildTarget {
    /// `"<build path>/<os>/<arch>"`, the string all matchers run against.
    pub path: String,
    pub build_path: String,
    pub os: String,
    pub arch: String,
    pub settings: BuildSettings,
}

impl BuildTarget {
    /// Relative path of the built binary below the builds dist root.
    pub fn binary_path(&self) -> String {
        format!("{}/{}", self.path, self.settings.binary)
    }
}

/// Walk the build tree and collect the targets matching the filter, with
/// settings merged down project → build → os → arch.
pub fn find_targets(
    builds: &[Build],
    project_settings: &BuildSettings,
    filter: &Matcher,
) -> Vec<BuildTarget> {
    let mut targets = Vec::new();
    for build in builds {
        let mut build_settings = build.build_settings.clone();
        build_settings.inherit_from(project_settings);
        for os in &build.os {
            let mut os_settings = os.build_settings.clone();
            os_settings.inherit_from(&build_settings);
            for arch in &os.archs {
                let path = format!("{}/{}/{}", build.path, os.name, arch.name);
                if !filter.is_match(&path) {
                    continue;
                }
                let mut settings = arch.build_settings.clone();
                settings.inherit_from(&os_settings);
                targets.push(BuildTarget {
                    path,
                    build_path: build.path.clone(),
                    os: os.name.clone(),
                    arch: arch.name.clone(),
                    settings,
                });
            }
        }
    }
    targets
}
