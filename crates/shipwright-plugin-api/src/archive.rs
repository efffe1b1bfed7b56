//! Archive request/response types exchanged with plugin subprocesses.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::PROTOCOL_VERSION;

fn default_mode() -> u32 {
    0o644
}

/// Basic information about the build a request belongs to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildContext {
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub os: String,
    #[serde(default)]
    pub arch: String,
}

/// One file to place inside the archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveFile {
    /// Absolute path of the source file on the orchestrator's host.
    pub source_path: PathBuf,

    /// Relative target path inside the archive, including the file name.
    pub target_path: String,

    /// Unix file mode for the archive entry.
    #[serde(default = "default_mode")]
    pub mode: u32,
}

/// What is sent to an archive plugin.
///
/// A request with `heartbeat` set is a handshake probe: the plugin echoes the
/// token together with its protocol version and performs no work.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArchiveRequest {
    /// Protocol version of the client. Validated during the handshake.
    #[serde(default)]
    pub version: u16,

    /// Echo token used to verify the plugin is alive and compatible.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat: Option<String>,

    /// Output file path, including extension.
    #[serde(default)]
    pub out_filename: PathBuf,

    #[serde(default)]
    pub build_context: BuildContext,

    /// Format-specific settings, decoded by the plugin into its own typed
    /// settings struct.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub settings: BTreeMap<String, serde_json::Value>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<ArchiveFile>,
}

impl ArchiveRequest {
    /// Build the handshake reply for this request, if it is a heartbeat
    /// probe. A version mismatch is reported in the reply's error payload.
    pub fn heartbeat_response(&self) -> Option<ArchiveResponse> {
        let token = self.heartbeat.as_ref()?;
        let error = if self.version != PROTOCOL_VERSION {
            Some(PluginErrorPayload {
                message: format!(
                    "protocol version mismatch: client sent {}, plugin is at {}",
                    self.version, PROTOCOL_VERSION
                ),
                plugin_id: None,
            })
        } else {
            None
        };
        Some(ArchiveResponse {
            heartbeat: Some(token.clone()),
            version: Some(PROTOCOL_VERSION),
            error,
        })
    }

    /// Validate a non-heartbeat request before doing any work.
    pub fn validate(&self) -> Result<(), String> {
        if self.heartbeat.is_some() {
            return Ok(());
        }
        if self.out_filename.as_os_str().is_empty() {
            return Err("archive request has no output filename".to_string());
        }
        for f in &self.files {
            if f.source_path.as_os_str().is_empty() {
                return Err("archive request file has no source path".to_string());
            }
            if f.target_path.is_empty() {
                return Err(format!(
                    "archive request file {} has no target path",
                    f.source_path.display()
                ));
            }
        }
        Ok(())
    }
}

/// Structured error payload carried in a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginErrorPayload {
    /// Human-readable, single-line message.
    pub message: String,

    /// Id of the plugin that produced the error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_id: Option<String>,
}

impl std::fmt::Display for PluginErrorPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.plugin_id {
            Some(id) => write!(f, "{}: {}", id, self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// What is sent back from an archive plugin.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArchiveResponse {
    /// Echoed heartbeat token, set only in handshake replies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat: Option<String>,

    /// Protocol version of the plugin, set only in handshake replies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<PluginErrorPayload>,
}

impl ArchiveResponse {
    /// A successful, empty response.
    pub fn ok() -> Self {
        Self::default()
    }

    /// An error response with the given message and originating plugin id.
    pub fn from_error(plugin_id: &str, message: impl Into<String>) -> Self {
        Self {
            heartbeat: None,
            version: None,
            error: Some(PluginErrorPayload {
                message: message.into(),
                plugin_id: Some(plugin_id.to_string()),
            }),
        }
    }

    pub fn into_result(self) -> Result<(), PluginErrorPayload> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
