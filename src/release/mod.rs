//! Release backends: client contracts, retry machinery and the upload
//! pipeline's error classification.

mod fake;
mod github;
mod retry;

use std::io;
use std::path::Path;

use crate::config::{ReleaseSettings, ReleaseType};

pub use fake::FakeClient;
pub use github::GitHubClient;
pub use retry::with_retries;

/// Environment variable holding the GitHub API token.
pub const GITHUB_TOKEN_ENV: &str = "GITHUB_TOKEN";

/// An upload failure, classified at the client boundary so the retry
/// wrapper knows whether another attempt can help.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    /// Network or server trouble; worth retrying.
    #[error("transient upload failure: {0}")]
    Transient(String),

    /// Client-side validation failure (malformed request, duplicate
    /// asset); retrying would fail identically.
    #[error("permanent upload failure: {0}")]
    Permanent(String),
}

impl UploadError {
    pub fn is_transient(&self) -> bool {
        matches!(self, UploadError::Transient(_))
    }

    /// Classify by HTTP status: validation-type codes are permanent,
    /// everything else is treated as transient (retry when unsure).
    pub fn from_status(status: u16, message: impl Into<String>) -> UploadError {
        if is_temporary_http_status(status) {
            UploadError::Transient(message.into())
        } else {
            UploadError::Permanent(message.into())
        }
    }
}

/// Whether an HTTP status is worth retrying. Returns true when not sure.
pub fn is_temporary_http_status(status: u16) -> bool {
    !matches!(status, 400 | 422)
}

/// Release stage errors.
#[derive(Debug, thiserror::Error)]
pub enum ReleaseError {
    #[error("release: {0}")]
    Validate(String),

    #[error("missing {0} env var")]
    MissingToken(&'static str),

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("http: {0}")]
    Http(String),

    #[error(transparent)]
    Upload(#[from] UploadError),
}

/// Everything a backend needs to create a release record.
#[derive(Debug, Clone)]
pub struct ReleaseInfo {
    pub project: String,
    pub tag: String,
    /// Where the tag is created from if it does not exist yet.
    pub commitish: String,
    pub settings: ReleaseSettings,
}

/// The release backend contract. Implementations live behind this boundary;
/// the orchestration core never sees HTTP.
pub trait ReleaseClient: Send + Sync {
    /// Create the remote release record and return its id. Called once per
    /// release, before any upload.
    fn create_release(&self, info: &ReleaseInfo) -> Result<i64, ReleaseError>;

    /// Upload one asset file to the release with the given id.
    fn upload_assets_file(
        &self,
        info: &ReleaseInfo,
        file: &Path,
        release_id: i64,
    ) -> Result<(), UploadError>;
}

/// Additional operations used by the publish stage.
pub trait PublishClient: ReleaseClient {
    /// Release id and draft status for an existing release.
    fn release_by_tag(&self, owner: &str, repo: &str, tag: &str)
        -> Result<(i64, bool), ReleaseError>;

    /// Flip a draft release to published.
    fn publish_release(&self, owner: &str, repo: &str, release_id: i64)
        -> Result<(), ReleaseError>;

    /// Create or update a file in a repository; returns the commit SHA.
    fn update_file_in_repo(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        message: &str,
        content: &[u8],
    ) -> Result<String, ReleaseError>;
}

/// Build the client for the configured backend. Dry runs always get the
/// fake client, which preserves call/response shape without network I/O.
pub fn new_client(
    settings: &ReleaseSettings,
    dry_run: bool,
) -> Result<std::sync::Arc<dyn PublishClient>, ReleaseError> {
    if dry_run {
        return Ok(std::sync::Arc::new(FakeClient::new()));
    }
    match settings.type_parsed {
        ReleaseType::Fake => Ok(std::sync::Arc::new(FakeClient::new())),
        ReleaseType::GitHub => {
            let token = std::env::var(GITHUB_TOKEN_ENV)
                .map_err(|_| ReleaseError::MissingToken(GITHUB_TOKEN_ENV))?;
            if settings.repository.is_empty() || settings.repository_owner.is_empty() {
                return Err(ReleaseError::Validate(
                    "github release needs repository and repository_owner".to_string(),
                ));
            }
            Ok(std::sync::Arc::new(GitHubClient::new(token)?))
        }
    }
}

/// Upload one asset with retries: transient failures back off and try
/// again up to the attempt budget, permanent failures return immediately.
pub fn upload_assets_file_with_retries<C: ReleaseClient + ?Sized>(
    token: &crate::cancel::CancellationToken,
    client: &C,
    info: &ReleaseInfo,
    file: &Path,
    release_id: i64,
) -> Result<(), ReleaseError> {
    with_retries(token, || {
        match client.upload_assets_file(info, file, release_id) {
            Ok(()) => (Ok(()), false),
            Err(err) => {
                let retryable = err.is_transient();
                (Err(ReleaseError::Upload(err)), retryable)
            }
        }
    })
}
