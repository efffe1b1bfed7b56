//! Length-framed message channel.
//!
//! Every message on the plugin channel is a fixed 12-byte big-endian header
//! followed by `size` body bytes:
//!
//! ```text
//! | id: u32 | version: u16 | status: u16 | size: u32 | body ... |
//! ```
//!
//! `id` correlates a response with its request. Id 0 is reserved for
//! messages that are not part of any exchange (info-log lines).

use std::io::{self, Read, Write};

/// Status of a successful request or response body.
pub const STATUS_OK: u16 = 0;

/// Status of a protocol-level failure; the body is a UTF-8 error message.
pub const STATUS_ERR: u16 = 1;

/// Reserved status for free-text informational log lines sent from the
/// plugin back to the orchestrator, multiplexed outside request/response
/// correlation.
pub const STATUS_INFO_LOG: u16 = 101;

/// Wire protocol version. Incremented on incompatible changes; verified
/// during the heartbeat handshake on plugin startup.
pub const PROTOCOL_VERSION: u16 = 1;

/// Upper bound on a single message body. Requests carry file manifests and
/// settings, not file contents, so anything near this is a protocol error.
pub const MAX_BODY_BYTES: u32 = 64 * 1024 * 1024;

/// Fixed-size message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Correlation id; 0 for uncorrelated messages.
    pub id: u32,
    /// Protocol version of the sender.
    pub version: u16,
    /// One of the `STATUS_*` constants.
    pub status: u16,
}

/// A single framed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub header: Header,
    pub body: Vec<u8>,
}

impl Message {
    /// Create a message with the current protocol version.
    pub fn new(id: u32, status: u16, body: Vec<u8>) -> Self {
        Self {
            header: Header {
                id,
                version: PROTOCOL_VERSION,
                status,
            },
            body,
        }
    }

    /// Create an uncorrelated info-log message.
    pub fn info_log(line: &str) -> Self {
        Self::new(0, STATUS_INFO_LOG, line.as_bytes().to_vec())
    }
}

/// Write a single framed message and flush the writer.
pub fn write_message<W: Write + ?Sized>(w: &mut W, msg: &Message) -> io::Result<()> {
    if msg.body.len() as u64 > MAX_BODY_BYTES as u64 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("message body of {} bytes exceeds frame limit", msg.body.len()),
        ));
    }
    let mut head = [0u8; 12];
    head[0..4].copy_from_slice(&msg.header.id.to_be_bytes());
    head[4..6].copy_from_slice(&msg.header.version.to_be_bytes());
    head[6..8].copy_from_slice(&msg.header.status.to_be_bytes());
    head[8..12].copy_from_slice(&(msg.body.len() as u32).to_be_bytes());
    w.write_all(&head)?;
    w.write_all(&msg.body)?;
    w.flush()
}

/// Read a single framed message.
///
/// A clean EOF before the first header byte surfaces as
/// `io::ErrorKind::UnexpectedEof`; callers treat that as channel shutdown.
pub fn read_message<R: Read>(r: &mut R) -> io::Result<Message> {
    let mut head = [0u8; 12];
    r.read_exact(&mut head)?;

    let id = u32::from_be_bytes([head[0], head[1], head[2], head[3]]);
    let version = u16::from_be_bytes([head[4], head[5]]);
    let status = u16::from_be_bytes([head[6], head[7]]);
    let size = u32::from_be_bytes([head[8], head[9], head[10], head[11]]);

    if size > MAX_BODY_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {size} bytes exceeds limit of {MAX_BODY_BYTES}"),
        ));
    }

    let mut body = vec![0u8; size as usize];
    r.read_exact(&mut body)?;

    Ok(Message {
        header: Header { id, version, status },
        body,
    })
}
