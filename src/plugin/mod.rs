//! Out-of-process archive plugins: host side.
//!
//! A plugin is started at most once per process run, verified with a
//! heartbeat handshake, and then shared by every archive task that
//! references its id. The registry owns the connections; it is an explicit
//! struct injected into the pipeline, never a global.

mod client;
mod registry;
mod transport;

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use shipwright_plugin_api::{CodecError, WireCodec};

pub use client::{LogSink, PluginClient, PluginClientOptions};
pub use registry::{PluginRegistry, TransportFactory};
pub use transport::{InMemoryTransport, PluginTransport, ProcessTransport, ShutdownOutcome};

/// Default per-call timeout. Generous: a plugin may need to fetch its own
/// dependencies the first time it runs.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(220);

/// Static configuration for one out-of-process archiver.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    /// Unique id; many archive configurations may reference the same id.
    #[serde(default)]
    pub id: String,

    /// Executable to launch.
    #[serde(default)]
    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,

    /// Working directory for the subprocess.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,

    /// Extra environment entries, `KEY=VALUE`.
    #[serde(default)]
    pub env: Vec<String>,

    /// Body encoding on the channel; both ends must agree.
    #[serde(default)]
    pub codec: WireCodec,
}

impl PluginDescriptor {
    /// True for the "no plugin configured" zero value.
    pub fn is_zero(&self) -> bool {
        self.id.is_empty()
    }

    pub fn validate(&self) -> Result<(), PluginError> {
        if self.id.is_empty() {
            return Err(PluginError::InvalidDescriptor {
                reason: "plugin has no id".to_string(),
            });
        }
        if self.command.is_empty() {
            return Err(PluginError::InvalidDescriptor {
                reason: format!("plugin {:?} has no command", self.id),
            });
        }
        Ok(())
    }
}

/// Plugin lifecycle and invocation errors.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("invalid plugin: {reason}")]
    InvalidDescriptor { reason: String },

    #[error("error starting plugin {id:?}: {source}")]
    Start { id: String, source: io::Error },

    #[error("plugin {id:?}: handshake failed: {reason}")]
    Handshake { id: String, reason: String },

    #[error("plugin {id:?}: request timed out after {timeout:?}")]
    Timeout { id: String, timeout: Duration },

    #[error("plugin {id:?}: connection closed")]
    ConnectionClosed { id: String },

    #[error("plugin {id:?}: i/o error: {source}")]
    Io { id: String, source: io::Error },

    #[error("plugin {id:?}: codec error: {source}")]
    Codec { id: String, source: CodecError },

    #[error("plugin {id:?}: {message}")]
    Plugin { id: String, message: String },

    #[error("archive plugin {id:?} not found in registry")]
    NotRegistered { id: String },

    #[error("plugin {id:?} unavailable: {reason}")]
    Unavailable { id: String, reason: String },
}
