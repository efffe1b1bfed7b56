//! Archive configurations.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::archive::ArchiveFormat;
use crate::matcher::Matcher;
use crate::plugin::PluginDescriptor;
use crate::selection::BUILDS_PREFIX;

use super::build::BuildTarget;
use super::ConfigError;

fn default_mode() -> u32 {
    0o644
}

/// An extra file to place beside the binary. A directory source is walked
/// and added file by file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveFileInfo {
    pub source_path: String,
    pub target_path: String,
    #[serde(default = "default_mode")]
    pub mode: u32,
}

/// Settings for one archive configuration. Unset fields inherit from the
/// project-level `archive_settings`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArchiveSettings {
    /// Archive format: `tar.gz`, `zip`, `plain` or `plugin`.
    #[serde(default)]
    pub format: String,

    /// File extension including the dot, e.g. `.tar.gz`.
    #[serde(default)]
    pub extension: String,

    /// Directory inside the archive the binary is placed in.
    #[serde(default)]
    pub binary_dir: String,

    /// Archive file name template; `${project}`, `${tag}`, `${os}` and
    /// `${arch}` are expanded.
    #[serde(default)]
    pub name_template: String,

    #[serde(default)]
    pub extra_files: Vec<ArchiveFileInfo>,

    /// Token replacements applied to the rendered name, e.g.
    /// `amd64 = "x86_64"`.
    #[serde(default)]
    pub replacements: BTreeMap<String, String>,

    /// The plugin to delegate to when `format = "plugin"`.
    #[serde(default)]
    pub plugin: PluginDescriptor,

    /// Format-specific settings forwarded opaquely to the plugin.
    #[serde(default)]
    pub custom_settings: BTreeMap<String, serde_json::Value>,

    #[serde(skip)]
    pub format_parsed: ArchiveFormat,
}

impl ArchiveSettings {
    /// Fill unset fields from the project level.
    pub fn inherit_from(&mut self, parent: &ArchiveSettings) {
        if self.format.is_empty() {
            self.format = parent.format.clone();
        }
        if self.extension.is_empty() {
            self.extension = parent.extension.clone();
        }
        if self.binary_dir.is_empty() {
            self.binary_dir = parent.binary_dir.clone();
        }
        if self.name_template.is_empty() {
            self.name_template = parent.name_template.clone();
        }
        if self.extra_files.is_empty() {
            self.extra_files = parent.extra_files.clone();
        }
        if self.replacements.is_empty() {
            self.replacements = parent.replacements.clone();
        }
        if self.plugin.is_zero() {
            self.plugin = parent.plugin.clone();
        }
        if self.custom_settings.is_empty() {
            self.custom_settings = parent.custom_settings.clone();
        }
    }

    pub(super) fn init(&mut self) -> Result<(), ConfigError> {
        if self.format.is_empty() {
            return Err(ConfigError::Invalid(
                "archive_settings: has no format".to_string(),
            ));
        }
        if self.extension.is_empty() {
            return Err(ConfigError::Invalid(
                "archive_settings: has no extension".to_string(),
            ));
        }
        if self.name_template.is_empty() {
            self.name_template = "${project}_${tag}_${os}_${arch}".to_string();
        }
        self.format_parsed = ArchiveFormat::parse(&self.format)
            .map_err(|e| ConfigError::Invalid(format!("archive_settings: {e}")))?;
        match self.format_parsed {
            ArchiveFormat::Plugin => {
                self.plugin
                    .validate()
                    .map_err(|e| ConfigError::Invalid(format!("archive_settings: {e}")))?;
            }
            _ => {
                // Not delegated, so the plugin does not need to start.
                self.plugin = PluginDescriptor::default();
            }
        }
        Ok(())
    }

    /// Render the archive file name for one build target.
    pub fn archive_name(&self, project: &str, tag: &str, target: &BuildTarget) -> String {
        let mut name = self
            .name_template
            .replace("${project}", project)
            .replace("${tag}", tag)
            .replace("${os}", &target.os)
            .replace("${arch}", &target.arch);
        for (from, to) in &self.replacements {
            name = name.replace(from.as_str(), to.as_str());
        }
        name + &self.extension
    }
}

/// A build target paired with its rendered archive file name.
#[derive(Debug, Clone)]
pub struct ArchiveTarget {
    pub target: BuildTarget,
    /// Archive file name with extension.
    pub name: String,
}

/// One archive configuration: which builds to archive and how.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Archive {
    /// Globs of build paths to archive, `builds/` prefixed; multiple
    /// patterns are ANDed.
    pub paths: Vec<String>,

    #[serde(default)]
    pub archive_settings: ArchiveSettings,

    #[serde(skip)]
    pub paths_compiled: Option<Matcher>,

    /// Targets matching `paths`, resolved once at startup.
    #[serde(skip)]
    pub archs_compiled: Vec<ArchiveTarget>,
}

impl Archive {
    pub(super) fn init(&mut self) -> Result<(), ConfigError> {
        let what = format!("archives {:?}", self.paths);

        let mut stripped = Vec::with_capacity(self.paths.len());
        for p in &self.paths {
            // Negations keep their `!` in front of the stripped pattern.
            let (negation, rest) = match p.strip_prefix('!') {
                Some(rest) => ("!", rest),
                None => ("", p.as_str()),
            };
            let rest = rest.strip_prefix(BUILDS_PREFIX).ok_or_else(|| {
                ConfigError::Invalid(format!(
                    "{what}: archive paths must start with {BUILDS_PREFIX}"
                ))
            })?;
            stripped.push(format!("{negation}{rest}"));
        }

        let matcher = Matcher::glob(&stripped)
            .map_err(|e| ConfigError::Invalid(format!("{what}: {e}")))?;
        self.paths_compiled = Some(matcher);

        self.archive_settings
            .init()
            .map_err(|e| ConfigError::Invalid(format!("{what}: {e}")))?;
        Ok(())
    }

    pub fn matcher(&self) -> &Matcher {
        self.paths_compiled
            .as_ref()
            .expect("archive initialized at config load")
    }
}
