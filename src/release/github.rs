//! GitHub release backend over the blocking HTTP client.

use std::path::Path;
use std::time::Duration;

use base64::prelude::*;
use serde_json::json;

use super::{PublishClient, ReleaseClient, ReleaseError, ReleaseInfo, UploadError};

const API_BASE: &str = "https://api.github.com";
const UPLOADS_BASE: &str = "https://uploads.github.com";
const USER_AGENT: &str = concat!("shipwright/", env!("CARGO_PKG_VERSION"));

/// Release bodies above this are truncated; the API rejects longer ones.
const MAX_BODY_BYTES: usize = 100_000;

pub struct GitHubClient {
    client: reqwest::blocking::Client,
    token: String,
}

impl GitHubClient {
    pub fn new(token: String) -> Result<GitHubClient, ReleaseError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(120))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ReleaseError::Http(format!("failed to build HTTP client: {e}")))?;
        Ok(GitHubClient { client, token })
    }

    fn get_json(&self, url: &str) -> Result<(u16, serde_json::Value), ReleaseError> {
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .map_err(|e| ReleaseError::Http(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .json()
            .unwrap_or(serde_json::Value::Null);
        Ok((status, body))
    }
}

impl ReleaseClient for GitHubClient {
    fn create_release(&self, info: &ReleaseInfo) -> Result<i64, ReleaseError> {
        let settings = &info.settings;

        let mut body = String::new();
        if !settings.release_notes_filename.is_empty() {
            body = std::fs::read_to_string(&settings.release_notes_filename)?;
            if body.len() > MAX_BODY_BYTES {
                body.truncate(MAX_BODY_BYTES);
            }
        }

        let url = format!(
            "{API_BASE}/repos/{}/{}/releases",
            settings.repository_owner, settings.repository
        );
        let payload = json!({
            "tag_name": info.tag,
            "target_commitish": info.commitish,
            "name": settings.name,
            "body": body,
            "draft": settings.draft,
            "prerelease": settings.prerelease,
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&payload)
            .send()
            .map_err(|e| ReleaseError::Http(e.to_string()))?;

        let status = response.status().as_u16();
        let value: serde_json::Value = response
            .json()
            .map_err(|e| ReleaseError::Http(e.to_string()))?;
        if status != 201 {
            return Err(ReleaseError::Http(format!(
                "github: unexpected status code creating release: {status}: {value}"
            )));
        }
        value
            .get("id")
            .and_then(|id| id.as_i64())
            .ok_or_else(|| ReleaseError::Http("github: release response has no id".to_string()))
    }

    fn upload_assets_file(
        &self,
        info: &ReleaseInfo,
        file: &Path,
        release_id: i64,
    ) -> Result<(), UploadError> {
        let settings = &info.settings;
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let bytes = std::fs::read(file)
            .map_err(|e| UploadError::Permanent(format!("{}: {e}", file.display())))?;

        let url = format!(
            "{UPLOADS_BASE}/repos/{}/{}/releases/{release_id}/assets?name={name}",
            settings.repository_owner, settings.repository
        );
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .header("Content-Type", "application/octet-stream")
            .body(bytes)
            .send()
            // The request never made it to a status line; retry.
            .map_err(|e| UploadError::Transient(e.to_string()))?;

        let status = response.status().as_u16();
        if (200..300).contains(&status) {
            return Ok(());
        }
        let detail = response.text().unwrap_or_default();
        Err(UploadError::from_status(
            status,
            format!("github: uploading {name}: status {status}: {detail}"),
        ))
    }
}

impl PublishClient for GitHubClient {
    fn release_by_tag(
        &self,
        owner: &str,
        repo: &str,
        tag: &str,
    ) -> Result<(i64, bool), ReleaseError> {
        let url = format!("{API_BASE}/repos/{owner}/{repo}/releases/tags/{tag}");
        let (status, value) = self.get_json(&url)?;
        if status != 200 {
            return Err(ReleaseError::Http(format!(
                "github: release for tag {tag:?}: status {status}"
            )));
        }
        let id = value
            .get("id")
            .and_then(|id| id.as_i64())
            .ok_or_else(|| ReleaseError::Http("github: release response has no id".to_string()))?;
        let draft = value.get("draft").and_then(|d| d.as_bool()).unwrap_or(false);
        Ok((id, draft))
    }

    fn publish_release(
        &self,
        owner: &str,
        repo: &str,
        release_id: i64,
    ) -> Result<(), ReleaseError> {
        let url = format!("{API_BASE}/repos/{owner}/{repo}/releases/{release_id}");
        let response = self
            .client
            .patch(&url)
            .bearer_auth(&self.token)
            .json(&json!({"draft": false}))
            .send()
            .map_err(|e| ReleaseError::Http(e.to_string()))?;
        let status = response.status().as_u16();
        if status != 200 {
            return Err(ReleaseError::Http(format!(
                "github: publishing release {release_id}: status {status}"
            )));
        }
        Ok(())
    }

    fn update_file_in_repo(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        message: &str,
        content: &[u8],
    ) -> Result<String, ReleaseError> {
        let url = format!("{API_BASE}/repos/{owner}/{repo}/contents/{path}");

        // An existing file must be updated with its current blob SHA; a 404
        // means we are creating it.
        let (status, existing) = self.get_json(&url)?;
        let sha = if status == 200 {
            existing
                .get("sha")
                .and_then(|s| s.as_str())
                .map(str::to_string)
        } else if status == 404 {
            None
        } else {
            return Err(ReleaseError::Http(format!(
                "github: reading {path}: status {status}"
            )));
        };

        let mut payload = json!({
            "message": message,
            "content": BASE64_STANDARD.encode(content),
        });
        if let Some(sha) = sha {
            payload["sha"] = json!(sha);
        }

        let response = self
            .client
            .put(&url)
            .bearer_auth(&self.token)
            .json(&payload)
            .send()
            .map_err(|e| ReleaseError::Http(e.to_string()))?;
        let status = response.status().as_u16();
        let value: serde_json::Value = response
            .json()
            .map_err(|e| ReleaseError::Http(e.to_string()))?;
        if !(200..300).contains(&status) {
            return Err(ReleaseError::Http(format!(
                "github: updating {path}: status {status}: {value}"
            )));
        }
        value
            .pointer("/commit/sha")
            .and_then(|s| s.as_str())
            .map(str::to_string)
            .ok_or_else(|| ReleaseError::Http("github: update response has no commit sha".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::release::is_temporary_http_status;

    #[test]
    fn test_upload_classification_is_wired_to_http_statuses() {
        // The classification the upload path relies on.
        assert!(!is_temporary_http_status(422));
        assert!(is_temporary_http_status(500));
    }

    #[test]
    fn test_user_agent_carries_version() {
        assert!(USER_AGENT.starts_with("shipwright/"));
    }
}
