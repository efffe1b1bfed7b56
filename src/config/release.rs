//! Release configurations.

use serde::{Deserialize, Serialize};

use crate::matcher::Matcher;
use crate::selection::ARCHIVES_PREFIX;

use super::ConfigError;

/// The configured release backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReleaseType {
    #[default]
    GitHub,
    /// No network; the in-process test double.
    Fake,
}

impl ReleaseType {
    pub fn parse(kind: &str) -> Result<ReleaseType, ConfigError> {
        match kind {
            "github" => Ok(ReleaseType::GitHub),
            "fake" => Ok(ReleaseType::Fake),
            other => Err(ConfigError::Invalid(format!(
                "release_settings: unknown type {other:?} (expected github or fake)"
            ))),
        }
    }
}

/// Settings for one release. Unset fields inherit from the project-level
/// `release_settings`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReleaseSettings {
    /// Backend type: `github` or `fake`.
    #[serde(default, rename = "type")]
    pub kind: String,

    /// Display name of the release record.
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub repository: String,

    #[serde(default)]
    pub repository_owner: String,

    #[serde(default)]
    pub draft: bool,

    #[serde(default)]
    pub prerelease: bool,

    /// File whose contents become the release body.
    #[serde(default)]
    pub release_notes_filename: String,

    #[serde(skip)]
    pub type_parsed: ReleaseType,
}

impl ReleaseSettings {
    pub fn inherit_from(&mut self, parent: &ReleaseSettings) {
        if self.kind.is_empty() {
            self.kind = parent.kind.clone();
        }
        if self.name.is_empty() {
            self.name = parent.name.clone();
        }
        if self.repository.is_empty() {
            self.repository = parent.repository.clone();
        }
        if self.repository_owner.is_empty() {
            self.repository_owner = parent.repository_owner.clone();
        }
        if self.release_notes_filename.is_empty() {
            self.release_notes_filename = parent.release_notes_filename.clone();
        }
        // Booleans only override when the parent turns them on.
        self.draft |= parent.draft;
        self.prerelease |= parent.prerelease;
    }

    pub(super) fn init(&mut self) -> Result<(), ConfigError> {
        if self.kind.is_empty() {
            return Err(ConfigError::Invalid(
                "release_settings: release type is not set".to_string(),
            ));
        }
        self.type_parsed = ReleaseType::parse(&self.kind)?;
        Ok(())
    }
}

/// One configured release: a directory under the releases dist root and the
/// archives that go into it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Release {
    /// Directory below the releases dist root; also the string the
    /// `releases/` selection domain matches against. Unique per config.
    pub path: String,

    /// Globs of archive paths to include, `archives/` prefixed; multiple
    /// patterns are ANDed.
    pub paths: Vec<String>,

    #[serde(default)]
    pub release_settings: ReleaseSettings,

    #[serde(skip)]
    pub paths_compiled: Option<Matcher>,
}

impl Release {
    pub(super) fn init(&mut self) -> Result<(), ConfigError> {
        let what = "releases";
        if self.path.is_empty() {
            return Err(ConfigError::Invalid(format!("{what}: path is required")));
        }
        self.path = super::normalize_path(&self.path);
        super::validate_path_element(what, &self.path)?;

        let mut stripped = Vec::with_capacity(self.paths.len());
        for p in &self.paths {
            let (negation, rest) = match p.strip_prefix('!') {
                Some(rest) => ("!", rest),
                None => ("", p.as_str()),
            };
            let rest = rest.strip_prefix(ARCHIVES_PREFIX).ok_or_else(|| {
                ConfigError::Invalid(format!(
                    "{what} {:?}: archive paths must start with {ARCHIVES_PREFIX}",
                    self.path
                ))
            })?;
            stripped.push(format!("{negation}{rest}"));
        }

        let matcher = Matcher::glob(&stripped)
            .map_err(|e| ConfigError::Invalid(format!("{what} {:?}: {e}", self.path)))?;
        self.paths_compiled = Some(matcher);

        self.release_settings
            .init()
            .map_err(|e| ConfigError::Invalid(format!("{what} {:?}: {e}", self.path)))?;
        Ok(())
    }

    pub fn matcher(&self) -> &Matcher {
        self.paths_compiled
            .as_ref()
            .expect("release initialized at config load")
    }
}
