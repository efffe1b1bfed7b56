//! Parallel checksum manifest construction.
//!
//! Each file is hashed by its own scheduled task; results are accumulated
//! under a mutex and sorted before the manifest is rendered, so the output
//! is deterministic regardless of completion order.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use sha2::{Digest, Sha256};

use crate::cancel::CancellationToken;
use crate::workforce::{TaskError, Workforce};

/// Errors from building or reading a checksum manifest.
#[derive(Debug, thiserror::Error)]
pub enum ChecksumError {
    #[error("checksum task failed: {0}")]
    Task(TaskError),

    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: io::Error,
    },

    #[error("malformed checksum line {0:?}")]
    MalformedLine(String),
}

/// Manifest file name: `<project>_<version-without-leading-v>_checksums.txt`.
pub fn checksum_filename(project: &str, tag: &str) -> String {
    let version = tag.strip_prefix('v').unwrap_or(tag);
    format!("{project}_{version}_checksums.txt")
}

/// SHA-256 of a single file's full contents, as lowercase hex.
pub fn file_digest(path: &Path) -> io::Result<String> {
    let mut f = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut f, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// A digest record for a set of files, immutable after construction.
#[derive(Debug, Clone)]
pub struct ChecksumManifest {
    lines: Vec<String>,
    digests: HashMap<String, String>,
}

impl ChecksumManifest {
    /// Hash every file in parallel (one task per file, bounded by the
    /// workforce) and build the sorted manifest.
    pub fn create(
        workforce: &Workforce,
        token: &CancellationToken,
        files: &[PathBuf],
    ) -> Result<ChecksumManifest, ChecksumError> {
        let results: Arc<Mutex<Vec<(String, String)>>> =
            Arc::new(Mutex::new(Vec::with_capacity(files.len())));

        let (run, _run_token) = workforce.start(token);
        for file in files {
            let file = file.clone();
            let results = Arc::clone(&results);
            run.run(move || {
                let digest = file_digest(&file)
                    .map_err(|e| TaskError::msg(format!("{}: {e}", file.display())))?;
                let basename = file
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .ok_or_else(|| {
                        TaskError::msg(format!("{}: not a file path", file.display()))
                    })?;
                let mut results = match results.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                results.push((basename, digest));
                Ok(())
            });
        }
        run.wait().map_err(ChecksumError::Task)?;

        let collected = match Arc::try_unwrap(results) {
            Ok(mutex) => match mutex.into_inner() {
                Ok(entries) => entries,
                Err(poisoned) => poisoned.into_inner(),
            },
            Err(arc) => match arc.lock() {
                Ok(guard) => guard.clone(),
                Err(poisoned) => poisoned.into_inner().clone(),
            },
        };
        Ok(Self::from_entries(collected))
    }

    fn from_entries(entries: Vec<(String, String)>) -> ChecksumManifest {
        let mut digests = HashMap::with_capacity(entries.len());
        let mut lines = Vec::with_capacity(entries.len());
        for (basename, digest) in entries {
            lines.push(format!("{digest}  {basename}"));
            digests.insert(basename, digest);
        }
        // Sorting the rendered lines makes the manifest byte-stable no
        // matter which task finished first.
        lines.sort();
        ChecksumManifest { lines, digests }
    }

    /// Parse a previously written manifest file.
    pub fn read_from(path: &Path) -> Result<ChecksumManifest, ChecksumError> {
        let text = std::fs::read_to_string(path).map_err(|source| ChecksumError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut entries = Vec::new();
        for line in text.lines() {
            if line.is_empty() {
                continue;
            }
            let (digest, basename) = line
                .split_once("  ")
                .ok_or_else(|| ChecksumError::MalformedLine(line.to_string()))?;
            entries.push((basename.to_string(), digest.to_string()));
        }
        Ok(Self::from_entries(entries))
    }

    /// The manifest lines, sorted: `"<hex digest>  <basename>"`.
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Look up the digest of one artifact by file name.
    pub fn digest_of(&self, basename: &str) -> Option<&str> {
        self.digests.get(basename).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Render the manifest: one line per file, newline-terminated.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            out.push_str(line);
            out.push('\n');
        }
        out
    }

    /// Write the manifest to a file.
    pub fn write_to(&self, path: &Path) -> Result<(), ChecksumError> {
        let write = || -> io::Result<()> {
            let mut f = File::create(path)?;
            f.write_all(self.render().as_bytes())?;
            f.flush()
        };
        write().map_err(|source| ChecksumError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_files(dir: &Path, count: usize) -> Vec<PathBuf> {
        let mut files = Vec::new();
        for i in 0..count {
            let path = dir.join(format!("file{i}.txt"));
            std::fs::write(&path, format!("hello{i}")).unwrap();
            files.push(path);
        }
        files
    }

    #[test]
    fn test_manifest_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let files = write_files(dir.path(), 10);
        let wf = Workforce::new(4);
        let token = CancellationToken::new();

        let a = ChecksumManifest::create(&wf, &token, &files).unwrap();
        let b = ChecksumManifest::create(&wf, &token, &files).unwrap();

        assert_eq!(a.render(), b.render());
        assert_eq!(a.lines().len(), 10);
    }

    #[test]
    fn test_lines_are_sorted_by_digest() {
        let dir = tempfile::tempdir().unwrap();
        let files = write_files(dir.path(), 10);
        let wf = Workforce::new(4);
        let token = CancellationToken::new();

        let manifest = ChecksumManifest::create(&wf, &token, &files).unwrap();

        let mut sorted = manifest.lines().to_vec();
        sorted.sort();
        assert_eq!(manifest.lines(), sorted.as_slice());

        // hello6 hashes to the smallest digest of hello0..hello9, so its
        // line leads the manifest.
        let expected = format!("{}  file6.txt", sha256_hex(b"hello6"));
        assert_eq!(manifest.lines()[0], expected);
    }

    #[test]
    fn test_digest_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let files = write_files(dir.path(), 3);
        let wf = Workforce::new(2);
        let token = CancellationToken::new();

        let manifest = ChecksumManifest::create(&wf, &token, &files).unwrap();

        assert_eq!(
            manifest.digest_of("file1.txt"),
            Some(sha256_hex(b"hello1").as_str())
        );
        assert_eq!(manifest.digest_of("nope.txt"), None);
    }

    #[test]
    fn test_write_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let files = write_files(dir.path(), 4);
        let wf = Workforce::new(2);
        let token = CancellationToken::new();

        let manifest = ChecksumManifest::create(&wf, &token, &files).unwrap();
        let out = dir.path().join("checksums.txt");
        manifest.write_to(&out).unwrap();

        let text = std::fs::read_to_string(&out).unwrap();
        assert!(text.ends_with('\n'));
        assert_eq!(text.lines().count(), 4);

        let reread = ChecksumManifest::read_from(&out).unwrap();
        assert_eq!(reread.render(), manifest.render());
        assert_eq!(reread.digest_of("file2.txt"), manifest.digest_of("file2.txt"));
    }

    #[test]
    fn test_missing_file_fails_the_manifest() {
        let wf = Workforce::new(2);
        let token = CancellationToken::new();
        let files = vec![PathBuf::from("/no/such/file.bin")];
        assert!(matches!(
            ChecksumManifest::create(&wf, &token, &files),
            Err(ChecksumError::Task(_))
        ));
    }

    #[test]
    fn test_checksum_filename_strips_leading_v() {
        assert_eq!(
            checksum_filename("shipwright", "v1.2.0"),
            "shipwright_1.2.0_checksums.txt"
        );
        assert_eq!(
            checksum_filename("shipwright", "nightly"),
            "shipwright_nightly_checksums.txt"
        );
    }

    fn sha256_hex(data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        hex::encode(hasher.finalize())
    }
}
