//! Path-based selection of builds, archives and releases.
//!
//! The tool exposes three independent selection domains, each addressed by
//! path strings with a required prefix: `builds/`, `archives/` and
//! `releases/`. A user-supplied pattern list is partitioned by prefix and
//! each partition compiles to one matcher; a domain with no patterns
//! matches everything.

use crate::matcher::{Matcher, MatcherError};

pub const BUILDS_PREFIX: &str = "builds/";
pub const ARCHIVES_PREFIX: &str = "archives/";
pub const RELEASES_PREFIX: &str = "releases/";

/// Errors from compiling the `--paths` flag values.
#[derive(Debug, thiserror::Error)]
pub enum SelectionError {
    #[error("path {0:?} must start with builds/, archives/ or releases/")]
    UnknownPrefix(String),

    #[error("paths must not start with '/': {0:?}")]
    AbsolutePath(String),

    #[error("error compiling path {pattern:?}: {source}")]
    Matcher {
        pattern: String,
        source: MatcherError,
    },
}

/// Compiled matchers for the three selection domains.
#[derive(Debug, Clone)]
pub struct Selection {
    pub builds: Matcher,
    pub archives: Matcher,
    pub releases: Matcher,
}

impl Default for Selection {
    fn default() -> Self {
        Self::everything()
    }
}

impl Selection {
    /// A selection that includes every candidate in every domain.
    pub fn everything() -> Self {
        Self {
            builds: Matcher::everything(),
            archives: Matcher::everything(),
            releases: Matcher::everything(),
        }
    }

    /// Compile user-supplied path patterns into per-domain matchers.
    ///
    /// If the list is empty, or every pattern is the catch-all `**`, the
    /// selection matches everything; a filter of only catch-alls must not
    /// silently match nothing.
    pub fn compile<S: AsRef<str>>(paths: &[S]) -> Result<Selection, SelectionError> {
        let mut match_everything = true;
        for p in paths {
            let p = p.as_ref();
            if p.starts_with('/') {
                return Err(SelectionError::AbsolutePath(p.to_string()));
            }
            if p != "**" {
                match_everything = false;
                break;
            }
        }
        if match_everything {
            return Ok(Selection::everything());
        }

        let mut builds: Option<Matcher> = None;
        let mut archives: Option<Matcher> = None;
        let mut releases: Option<Matcher> = None;

        for p in paths {
            let p = p.as_ref();
            let (target, prefix) = if p.starts_with(BUILDS_PREFIX) {
                (&mut builds, BUILDS_PREFIX)
            } else if p.starts_with(ARCHIVES_PREFIX) {
                (&mut archives, ARCHIVES_PREFIX)
            } else if p.starts_with(RELEASES_PREFIX) {
                (&mut releases, RELEASES_PREFIX)
            } else {
                return Err(SelectionError::UnknownPrefix(p.to_string()));
            };

            // The prefix only routes the pattern to its domain; candidates
            // are matched against prefix-less paths.
            let stripped = &p[prefix.len()..];
            let compiled =
                Matcher::glob(&[stripped]).map_err(|source| SelectionError::Matcher {
                    pattern: p.to_string(),
                    source,
                })?;
            *target = Some(match target.take() {
                Some(existing) => Matcher::all(vec![existing, compiled]),
                None => compiled,
            });
        }

        Ok(Selection {
            builds: builds.unwrap_or_else(Matcher::everything),
            archives: archives.unwrap_or_else(Matcher::everything),
            releases: releases.unwrap_or_else(Matcher::everything),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_paths_match_everything() {
        let s = Selection::compile::<&str>(&[]).unwrap();
        assert!(s.builds.is_match("anything"));
        assert!(s.archives.is_match("anything"));
        assert!(s.releases.is_match("anything"));
    }

    #[test]
    fn test_all_catch_all_patterns_match_everything() {
        let s = Selection::compile(&["**", "**"]).unwrap();
        assert!(s.builds.is_match("tools/linux/amd64"));
        assert!(s.releases.is_match("main"));
    }

    #[test]
    fn test_patterns_are_partitioned_by_domain() {
        let s = Selection::compile(&["builds/tools/linux/*", "releases/main"]).unwrap();
        assert!(s.builds.is_match("tools/linux/amd64"));
        assert!(!s.builds.is_match("tools/darwin/amd64"));
        // No archive pattern was given, so the archive domain is unfiltered.
        assert!(s.archives.is_match("tools/darwin/amd64"));
        assert!(s.releases.is_match("main"));
        assert!(!s.releases.is_match("nightly"));
    }

    #[test]
    fn test_multiple_patterns_in_a_domain_are_anded() {
        let s = Selection::compile(&["builds/**", "builds/!**/arm64"]).unwrap();
        assert!(s.builds.is_match("tools/linux/amd64"));
        assert!(!s.builds.is_match("tools/linux/arm64"));
    }

    #[test]
    fn test_unknown_prefix_is_fatal() {
        assert!(matches!(
            Selection::compile(&["bundles/foo"]),
            Err(SelectionError::UnknownPrefix(_))
        ));
        // A bare ** mixed with prefixed paths is also rejected: it has no
        // domain to attach to.
        assert!(matches!(
            Selection::compile(&["**", "builds/foo"]),
            Err(SelectionError::UnknownPrefix(_))
        ));
    }

    #[test]
    fn test_absolute_path_is_fatal() {
        assert!(matches!(
            Selection::compile(&["/builds/foo"]),
            Err(SelectionError::AbsolutePath(_))
        ));
    }

    #[test]
    fn test_malformed_glob_is_fatal() {
        assert!(matches!(
            Selection::compile(&["builds/a[bad"]),
            Err(SelectionError::Matcher { .. })
        ));
    }
}
