//! Composable path-predicate algebra.
//!
//! Matchers select subsets of build, archive and release paths. They are
//! cheap to clone and never mutated after construction. Compiled glob
//! patterns are cached for the lifetime of the process, keyed by the
//! literal pattern string, so a pattern referenced by many configurations
//! is compiled exactly once.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use globset::{Glob, GlobMatcher};

/// Errors from compiling matcher patterns. These are configuration errors
/// and surface before any work is scheduled.
#[derive(Debug, thiserror::Error)]
pub enum MatcherError {
    #[error("empty pattern list")]
    EmptyPatterns,

    #[error("empty pattern")]
    EmptyPattern,

    #[error("invalid glob pattern {pattern:?}: {source}")]
    Glob {
        pattern: String,
        source: globset::Error,
    },
}

/// A compiled glob, kept behind an `Arc` so cache hits share one
/// compilation.
#[derive(Debug)]
pub struct CompiledGlob {
    pattern: String,
    matcher: GlobMatcher,
}

impl CompiledGlob {
    pub fn pattern(&self) -> &str {
        &self.pattern
    }
}

/// A composable predicate over path strings.
#[derive(Debug, Clone)]
pub enum Matcher {
    /// Matches every input; the identity used when no filter is supplied.
    Everything,
    Glob(Arc<CompiledGlob>),
    Not(Arc<Matcher>),
    /// Matches iff all inner matchers match. Stops at the first non-match.
    All(Arc<[Matcher]>),
    /// Matches iff any inner matcher matches. Stops at the first match.
    Any(Arc<[Matcher]>),
}

impl Matcher {
    pub fn everything() -> Matcher {
        Matcher::Everything
    }

    pub fn all(matchers: Vec<Matcher>) -> Matcher {
        Matcher::All(matchers.into())
    }

    pub fn any(matchers: Vec<Matcher>) -> Matcher {
        Matcher::Any(matchers.into())
    }

    pub fn negate(matcher: Matcher) -> Matcher {
        Matcher::Not(Arc::new(matcher))
    }

    /// Compile the given glob patterns and AND them together. A pattern may
    /// be negated with a leading `!`. An empty pattern list is an error.
    pub fn glob<S: AsRef<str>>(patterns: &[S]) -> Result<Matcher, MatcherError> {
        if patterns.is_empty() {
            return Err(MatcherError::EmptyPatterns);
        }
        if patterns.len() == 1 {
            return glob_one(patterns[0].as_ref());
        }
        let mut matchers = Vec::with_capacity(patterns.len());
        for p in patterns {
            matchers.push(glob_one(p.as_ref())?);
        }
        Ok(Matcher::all(matchers))
    }

    pub fn is_match(&self, path: &str) -> bool {
        match self {
            Matcher::Everything => true,
            Matcher::Glob(g) => g.matcher.is_match(path),
            Matcher::Not(m) => !m.is_match(path),
            Matcher::All(ms) => ms.iter().all(|m| m.is_match(path)),
            Matcher::Any(ms) => ms.iter().any(|m| m.is_match(path)),
        }
    }
}

fn glob_cache() -> &'static RwLock<HashMap<String, Matcher>> {
    static CACHE: OnceLock<RwLock<HashMap<String, Matcher>>> = OnceLock::new();
    CACHE.get_or_init(|| RwLock::new(HashMap::new()))
}

fn glob_one(pattern: &str) -> Result<Matcher, MatcherError> {
    if pattern.is_empty() {
        return Err(MatcherError::EmptyPattern);
    }

    // Fast path for patterns compiled earlier in the run. The lock is
    // read-mostly: after startup almost every call is a hit.
    if let Ok(cache) = glob_cache().read() {
        if let Some(m) = cache.get(pattern) {
            return Ok(m.clone());
        }
    }

    let (negate, raw) = match pattern.strip_prefix('!') {
        Some(rest) => (true, rest),
        None => (false, pattern),
    };
    if raw.is_empty() {
        return Err(MatcherError::EmptyPattern);
    }

    let glob = Glob::new(raw).map_err(|source| MatcherError::Glob {
        pattern: pattern.to_string(),
        source,
    })?;
    let compiled = Matcher::Glob(Arc::new(CompiledGlob {
        pattern: pattern.to_string(),
        matcher: glob.compile_matcher(),
    }));
    let matcher = if negate {
        Matcher::negate(compiled)
    } else {
        compiled
    };

    if let Ok(mut cache) = glob_cache().write() {
        // Another thread may have raced us here; first write wins so every
        // caller observes the same compiled instance.
        return Ok(cache
            .entry(pattern.to_string())
            .or_insert(matcher)
            .clone());
    }

    Ok(matcher)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_matches() {
        let m = Matcher::glob(&["linux/*"]).unwrap();
        assert!(m.is_match("linux/amd64"));
        assert!(!m.is_match("darwin/amd64"));
    }

    #[test]
    fn test_glob_star_crosses_separators() {
        let m = Matcher::glob(&["**"]).unwrap();
        assert!(m.is_match("a/b/c"));
    }

    #[test]
    fn test_glob_negation() {
        let m = Matcher::glob(&["!foo"]).unwrap();
        assert!(!m.is_match("foo"));
        assert!(m.is_match("bar"));
    }

    #[test]
    fn test_glob_multiple_patterns_are_anded() {
        let m = Matcher::glob(&["linux/**", "!linux/arm*"]).unwrap();
        assert!(m.is_match("linux/amd64"));
        assert!(!m.is_match("linux/arm64"));
        assert!(!m.is_match("darwin/amd64"));
    }

    #[test]
    fn test_and_semantics() {
        let a = Matcher::glob(&["a"]).unwrap();
        let b = Matcher::glob(&["b"]).unwrap();
        assert!(Matcher::all(vec![a.clone(), a.clone()]).is_match("a"));
        assert!(!Matcher::all(vec![a, b]).is_match("a"));
    }

    #[test]
    fn test_or_semantics() {
        let a = Matcher::glob(&["a"]).unwrap();
        let b = Matcher::glob(&["b"]).unwrap();
        let m = Matcher::any(vec![a, b]);
        assert!(m.is_match("a"));
        assert!(m.is_match("b"));
        assert!(!m.is_match("c"));
    }

    #[test]
    fn test_everything_matches_all() {
        let m = Matcher::everything();
        assert!(m.is_match(""));
        assert!(m.is_match("anything/at/all"));
    }

    #[test]
    fn test_empty_patterns_is_an_error() {
        let patterns: [&str; 0] = [];
        assert!(matches!(
            Matcher::glob(&patterns),
            Err(MatcherError::EmptyPatterns)
        ));
        assert!(matches!(
            Matcher::glob(&[""]),
            Err(MatcherError::EmptyPattern)
        ));
        assert!(matches!(
            Matcher::glob(&["!"]),
            Err(MatcherError::EmptyPattern)
        ));
    }

    #[test]
    fn test_malformed_glob_is_an_error() {
        assert!(matches!(
            Matcher::glob(&["a[unclosed"]),
            Err(MatcherError::Glob { .. })
        ));
    }

    #[test]
    fn test_same_pattern_is_compiled_once() {
        let a = Matcher::glob(&["cache-probe-*"]).unwrap();
        let b = Matcher::glob(&["cache-probe-*"]).unwrap();
        match (&a, &b) {
            (Matcher::Glob(x), Matcher::Glob(y)) => assert!(Arc::ptr_eq(x, y)),
            other => panic!("expected cached glob matchers, got {other:?}"),
        }
    }

    #[test]
    fn test_negated_pattern_is_cached_by_literal_string() {
        let a = Matcher::glob(&["!cache-neg-*"]).unwrap();
        let b = Matcher::glob(&["!cache-neg-*"]).unwrap();
        match (&a, &b) {
            (Matcher::Not(x), Matcher::Not(y)) => assert!(Arc::ptr_eq(x, y)),
            other => panic!("expected cached negated matchers, got {other:?}"),
        }
    }
}
