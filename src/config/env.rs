//! Environment plumbing for configuration files.

use std::collections::HashMap;
use std::path::Path;

use regex_lite::Regex;

/// Expand `${VAR}` references in the raw configuration text. Unset
/// variables expand to the empty string.
pub fn expand_env(source: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    // The config files are small; a single regex pass is plenty.
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("static pattern compiles");
    let mut out = String::with_capacity(source.len());
    let mut last = 0;
    for caps in re.captures_iter(source) {
        let whole = caps.get(0).expect("group 0 always present");
        let name = caps.get(1).expect("group 1 always present").as_str();
        out.push_str(&source[last..whole.start()]);
        if let Some(value) = lookup(name) {
            out.push_str(&value);
        }
        last = whole.end();
    }
    out.push_str(&source[last..]);
    out
}

/// Load `key=value` pairs from an env file. Empty lines, `#` comments and
/// lines without `=` are ignored. A missing file is not an error.
pub fn load_env_file(path: &Path) -> std::io::Result<HashMap<String, String>> {
    let mut env = HashMap::new();
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(env),
        Err(err) => return Err(err),
    };
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            env.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    Ok(env)
}

/// Apply an env file to the process environment, keeping any variable the
/// caller's environment already sets.
pub fn apply_env_file(path: &Path) -> std::io::Result<()> {
    for (key, value) in load_env_file(path)? {
        if std::env::var_os(&key).is_none() {
            std::env::set_var(key, value);
        }
    }
    Ok(())
}
