//! The no-network release client, used for dry runs and tests.
//!
//! Preserves the call/response shape of a real backend: it hands out a
//! release id and later upload calls are validated against it, so wiring
//! mistakes (uploading before creating, crossing release ids) fail in dry
//! runs the same way they would in production.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rand::Rng;
use sha2::{Digest, Sha256};

use super::{PublishClient, ReleaseClient, ReleaseError, ReleaseInfo, UploadError};

#[derive(Default)]
struct FakeState {
    release_id: Option<i64>,
    uploads: Vec<PathBuf>,
    published: Vec<i64>,
    repo_files: Vec<(String, Vec<u8>)>,
}

/// Test/dry-run double performing no network I/O.
#[derive(Default)]
pub struct FakeClient {
    state: Mutex<FakeState>,
}

impl FakeClient {
    pub fn new() -> FakeClient {
        FakeClient::default()
    }

    /// Files uploaded so far, in upload order.
    pub fn uploads(&self) -> Vec<PathBuf> {
        self.lock().uploads.clone()
    }

    /// Release ids flipped from draft to published.
    pub fn published(&self) -> Vec<i64> {
        self.lock().published.clone()
    }

    /// Repository paths written via `update_file_in_repo`.
    pub fn repo_files(&self) -> Vec<(String, Vec<u8>)> {
        self.lock().repo_files.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl ReleaseClient for FakeClient {
    fn create_release(&self, info: &ReleaseInfo) -> Result<i64, ReleaseError> {
        if !info.settings.release_notes_filename.is_empty()
            && !Path::new(&info.settings.release_notes_filename).is_file()
        {
            return Err(ReleaseError::Validate(format!(
                "release notes file not found: {}",
                info.settings.release_notes_filename
            )));
        }
        let id = rand::thread_rng().gen_range(1..i64::MAX);
        self.lock().release_id = Some(id);
        Ok(id)
    }

    fn upload_assets_file(
        &self,
        _info: &ReleaseInfo,
        file: &Path,
        release_id: i64,
    ) -> Result<(), UploadError> {
        let mut state = self.lock();
        match state.release_id {
            Some(expected) if expected == release_id => {}
            Some(expected) => {
                return Err(UploadError::Permanent(format!(
                    "release id mismatch: {release_id} != {expected}"
                )))
            }
            None => {
                return Err(UploadError::Permanent(
                    "upload before release creation".to_string(),
                ))
            }
        }
        if !file.is_file() {
            return Err(UploadError::Permanent(format!(
                "asset file not found: {}",
                file.display()
            )));
        }
        state.uploads.push(file.to_path_buf());
        Ok(())
    }
}

impl PublishClient for FakeClient {
    fn release_by_tag(
        &self,
        _owner: &str,
        _repo: &str,
        _tag: &str,
    ) -> Result<(i64, bool), ReleaseError> {
        let mut state = self.lock();
        let id = match state.release_id {
            Some(id) => id,
            None => {
                // Simulate an existing remote draft for standalone publish
                // invocations.
                let id = rand::thread_rng().gen_range(1..i64::MAX);
                state.release_id = Some(id);
                id
            }
        };
        let is_draft = !state.published.contains(&id);
        Ok((id, is_draft))
    }

    fn publish_release(
        &self,
        _owner: &str,
        _repo: &str,
        release_id: i64,
    ) -> Result<(), ReleaseError> {
        self.lock().published.push(release_id);
        Ok(())
    }

    fn update_file_in_repo(
        &self,
        _owner: &str,
        repo: &str,
        path: &str,
        _message: &str,
        content: &[u8],
    ) -> Result<String, ReleaseError> {
        let mut state = self.lock();
        state
            .repo_files
            .push((format!("{repo}/{path}"), content.to_vec()));
        // A deterministic stand-in for the commit SHA.
        let mut hasher = Sha256::new();
        hasher.update(content);
        Ok(hex::encode(hasher.finalize()))
    }
}
