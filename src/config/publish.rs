//! Publisher configurations.
//!
//! Publishers run after a release exists: they flip a draft release to
//! published, or commit a rendered manifest file (a Homebrew-style formula)
//! to a repository, cross-referencing artifact digests from the checksum
//! manifest.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::matcher::Matcher;
use crate::selection::{ARCHIVES_PREFIX, RELEASES_PREFIX};

use super::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PublishFormat {
    /// Publish the draft release created by the release stage.
    #[default]
    GitHubRelease,
    /// Render a template with release info and commit it to a repository.
    TapFile,
}

impl PublishFormat {
    pub fn parse(kind: &str) -> Result<PublishFormat, ConfigError> {
        match kind {
            "github_release" => Ok(PublishFormat::GitHubRelease),
            "tap_file" => Ok(PublishFormat::TapFile),
            other => Err(ConfigError::Invalid(format!(
                "publishers: unknown type {other:?} (expected github_release or tap_file)"
            ))),
        }
    }
}

/// Strongly typed settings for the `tap_file` publisher, decoded from the
/// loose `custom_settings` map at the configuration edge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TapFileSettings {
    /// Repository the file is committed to, e.g. `homebrew-tap`.
    #[serde(default)]
    pub repository: String,

    /// Path of the file inside that repository.
    #[serde(default)]
    pub path: String,

    /// Formula name; defaults to the project name.
    #[serde(default)]
    pub name: String,

    /// Custom template file; a built-in template is used when unset.
    #[serde(default)]
    pub template_filename: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub homepage: String,
}

impl TapFileSettings {
    /// Decode from the loose settings map. Unknown keys are rejected so a
    /// typo in the config fails at load time, not publish time.
    pub fn from_map(
        map: &BTreeMap<String, serde_json::Value>,
    ) -> Result<TapFileSettings, ConfigError> {
        let value = serde_json::Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        );
        serde_json::from_value(value)
            .map_err(|e| ConfigError::Invalid(format!("publishers: tap_file settings: {e}")))
    }
}

/// One configured publisher.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Publisher {
    /// Publisher type: `github_release` or `tap_file`.
    #[serde(rename = "type")]
    pub kind: String,

    /// Globs of release paths this publisher applies to, `releases/`
    /// prefixed. Empty means every release.
    #[serde(default)]
    pub release_paths: Vec<String>,

    /// Globs selecting the archive whose digest/URL feed the template,
    /// `archives/` prefixed. Empty means the first archive of the release.
    #[serde(default)]
    pub archive_paths: Vec<String>,

    #[serde(default)]
    pub custom_settings: BTreeMap<String, serde_json::Value>,

    #[serde(skip)]
    pub kind_parsed: PublishFormat,

    #[serde(skip)]
    pub releases_compiled: Option<Matcher>,

    #[serde(skip)]
    pub archives_compiled: Option<Matcher>,
}

impl Publisher {
    pub(super) fn init(&mut self) -> Result<(), ConfigError> {
        let what = "publishers";
        if self.kind.is_empty() {
            return Err(ConfigError::Invalid(format!("{what}: type is not set")));
        }
        self.kind_parsed = PublishFormat::parse(&self.kind)?;

        self.releases_compiled = Some(compile_prefixed(
            what,
            &self.release_paths,
            RELEASES_PREFIX,
        )?);
        self.archives_compiled = Some(compile_prefixed(
            what,
            &self.archive_paths,
            ARCHIVES_PREFIX,
        )?);

        if self.kind_parsed == PublishFormat::TapFile {
            // Decode now so malformed settings fail before scheduling.
            TapFileSettings::from_map(&self.custom_settings)?;
        }
        Ok(())
    }

    pub fn releases_matcher(&self) -> &Matcher {
        self.releases_compiled
            .as_ref()
            .expect("publisher initialized at config load")
    }

    pub fn archives_matcher(&self) -> &Matcher {
        self.archives_compiled
            .as_ref()
            .expect("publisher initialized at config load")
    }
}

fn compile_prefixed(
    what: &str,
    paths: &[String],
    prefix: &str,
) -> Result<Matcher, ConfigError> {
    if paths.is_empty() {
        return Ok(Matcher::everything());
    }
    let mut stripped = Vec::with_capacity(paths.len());
    for p in paths {
        let (negation, rest) = match p.strip_prefix('!') {
            Some(rest) => ("!", rest),
            None => ("", p.as_str()),
        };
        let rest = rest.strip_prefix(prefix).ok_or_else(|| {
            ConfigError::Invalid(format!("{what}: path {p:?} must start with {prefix}"))
        })?;
        stripped.push(format!("{negation}{rest}"));
    }
    Matcher::glob(&stripped).map_err(|e| ConfigError::Invalid(format!("{what}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publisher_init() {
        let mut publisher = Publisher {
            kind: "github_release".to_string(),
            release_paths: vec!["releases/main".to_string()],
            ..Default::default()
        };
        publisher.init().unwrap();
        assert_eq!(publisher.kind_parsed, PublishFormat::GitHubRelease);
        assert!(publisher.releases_matcher().is_match("main"));
        assert!(!publisher.releases_matcher().is_match("nightly"));
        assert!(publisher.archives_matcher().is_match("anything"));
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let mut publisher = Publisher {
            kind: "npm".to_string(),
            ..Default::default()
        };
        assert!(publisher.init().is_err());
    }

    #[test]
    fn test_tap_file_settings_decode() {
        let mut map = BTreeMap::new();
        map.insert(
            "repository".to_string(),
            serde_json::Value::String("homebrew-tap".to_string()),
        );
        map.insert(
            "path".to_string(),
            serde_json::Value::String("Formula/shipwright.rb".to_string()),
        );

        let settings = TapFileSettings::from_map(&map).unwrap();
        assert_eq!(settings.repository, "homebrew-tap");
        assert_eq!(settings.path, "Formula/shipwright.rb");
        assert!(settings.name.is_empty());
    }

    #[test]
    fn test_tap_file_settings_reject_unknown_keys() {
        let mut map = BTreeMap::new();
        map.insert(
            "repositry".to_string(),
            serde_json::Value::String("typo".to_string()),
        );
        assert!(TapFileSettings::from_map(&map).is_err());
    }
}
