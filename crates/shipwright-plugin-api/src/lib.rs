//! Wire protocol for shipwright archive plugins.
//!
//! An archive plugin is an independent subprocess that encodes archives on
//! behalf of the orchestrator. The orchestrator spawns it once, verifies it
//! with a heartbeat handshake and then sends it archive requests over a
//! length-framed message channel on stdin/stdout.
//!
//! This crate holds everything both sides share: the framing, the body
//! codecs, the request/response types and the plugin-side server runtime.

pub mod archive;
pub mod codec;
pub mod frame;
pub mod server;

pub use archive::{ArchiveFile, ArchiveRequest, ArchiveResponse, BuildContext, PluginErrorPayload};
pub use codec::{CodecError, WireCodec};
pub use frame::{
    read_message, write_message, Header, Message, MAX_BODY_BYTES, PROTOCOL_VERSION, STATUS_ERR,
    STATUS_INFO_LOG, STATUS_OK,
};
pub use server::{serve, serve_with_io, Dispatcher};
