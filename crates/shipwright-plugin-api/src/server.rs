//! Plugin-side server runtime.
//!
//! A plugin binary calls [`serve`] with its archiver callback and blocks
//! until the orchestrator closes the channel. The runtime handles framing,
//! codec work and heartbeat probes; the callback only sees real archive
//! requests and reports failures in the response payload, never by exiting.

use std::io::{self, Read, Write};

use crate::archive::{ArchiveRequest, ArchiveResponse};
use crate::codec::WireCodec;
use crate::frame::{read_message, write_message, Message, STATUS_ERR, STATUS_OK};

/// Handle for emitting informational log lines back to the orchestrator
/// while a request is being processed.
pub struct Dispatcher<'a> {
    out: &'a mut dyn Write,
}

impl Dispatcher<'_> {
    /// Send a free-text log line. Errors are ignored; logging must never
    /// fail the archive operation.
    pub fn info(&mut self, line: &str) {
        let _ = write_message(self.out, &Message::info_log(line));
    }
}

/// Serve archive requests over stdin/stdout until EOF.
pub fn serve<F>(codec: WireCodec, handler: F) -> io::Result<()>
where
    F: FnMut(&mut Dispatcher<'_>, ArchiveRequest) -> ArchiveResponse,
{
    let stdin = io::stdin();
    let stdout = io::stdout();
    serve_with_io(stdin.lock(), stdout.lock(), codec, handler)
}

/// Serve archive requests over the given channel until EOF. Split out from
/// [`serve`] so the loop can be driven in-process by tests.
pub fn serve_with_io<R, W, F>(
    mut reader: R,
    mut writer: W,
    codec: WireCodec,
    mut handler: F,
) -> io::Result<()>
where
    R: Read,
    W: Write,
    F: FnMut(&mut Dispatcher<'_>, ArchiveRequest) -> ArchiveResponse,
{
    loop {
        let msg = match read_message(&mut reader) {
            Ok(msg) => msg,
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(err) => return Err(err),
        };

        let id = msg.header.id;

        let request: ArchiveRequest = match codec.decode(&msg.body) {
            Ok(req) => req,
            Err(err) => {
                let body = format!("undecodable request: {err}").into_bytes();
                write_message(&mut writer, &Message::new(id, STATUS_ERR, body))?;
                continue;
            }
        };

        let response = match request.heartbeat_response() {
            Some(reply) => reply,
            None => {
                if let Err(reason) = request.validate() {
                    let body = reason.into_bytes();
                    write_message(&mut writer, &Message::new(id, STATUS_ERR, body))?;
                    continue;
                }
                let mut dispatcher = Dispatcher { out: &mut writer };
                handler(&mut dispatcher, request)
            }
        };

        let body = match codec.encode(&response) {
            Ok(body) => body,
            Err(err) => {
                let body = format!("unencodable response: {err}").into_bytes();
                write_message(&mut writer, &Message::new(id, STATUS_ERR, body))?;
                continue;
            }
        };
        write_message(&mut writer, &Message::new(id, STATUS_OK, body))?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{STATUS_INFO_LOG, PROTOCOL_VERSION};

    fn request_frame(codec: WireCodec, id: u32, req: &ArchiveRequest) -> Vec<u8> {
        let mut buf = Vec::new();
        let body = codec.encode(req).unwrap();
        write_message(&mut buf, &Message::new(id, STATUS_OK, body)).unwrap();
        buf
    }

    fn read_all_messages(mut input: &[u8]) -> Vec<Message> {
        let mut out = Vec::new();
        while let Ok(msg) = read_message(&mut input) {
            out.push(msg);
        }
        out
    }

    #[test]
    fn test_heartbeat_is_echoed_without_invoking_handler() {
        let codec = WireCodec::Toml;
        let req = ArchiveRequest {
            version: PROTOCOL_VERSION,
            heartbeat: Some("hb-1".to_string()),
            ..Default::default()
        };
        let input = request_frame(codec, 3, &req);
        let mut output = Vec::new();

        let mut called = false;
        serve_with_io(input.as_slice(), &mut output, codec, |_, _| {
            called = true;
            ArchiveResponse::ok()
        })
        .unwrap();
        assert!(!called);

        let messages = read_all_messages(&output);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].header.id, 3);
        let resp: ArchiveResponse = codec.decode(&messages[0].body).unwrap();
        assert_eq!(resp.heartbeat.as_deref(), Some("hb-1"));
    }

    #[test]
    fn test_handler_response_and_info_log() {
        let codec = WireCodec::Json;
        let req = ArchiveRequest {
            version: PROTOCOL_VERSION,
            out_filename: "/tmp/out.tar.gz".into(),
            ..Default::default()
        };
        let input = request_frame(codec, 9, &req);
        let mut output = Vec::new();

        serve_with_io(input.as_slice(), &mut output, codec, |d, req| {
            d.info(&format!("archiving to {}", req.out_filename.display()));
            ArchiveResponse::ok()
        })
        .unwrap();

        let messages = read_all_messages(&output);
        assert_eq!(messages.len(), 2);
        // The log line is uncorrelated and precedes the response.
        assert_eq!(messages[0].header.status, STATUS_INFO_LOG);
        assert_eq!(messages[0].header.id, 0);
        assert_eq!(messages[1].header.id, 9);
    }

    #[test]
    fn test_invalid_request_yields_protocol_error() {
        let codec = WireCodec::Json;
        // No output filename and no heartbeat: rejected before the handler.
        let req = ArchiveRequest::default();
        let input = request_frame(codec, 4, &req);
        let mut output = Vec::new();

        serve_with_io(input.as_slice(), &mut output, codec, |_, _| {
            panic!("handler must not run")
        })
        .unwrap();

        let messages = read_all_messages(&output);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].header.status, STATUS_ERR);
    }

    #[test]
    fn test_eof_terminates_cleanly() {
        let mut output = Vec::new();
        serve_with_io([].as_slice(), &mut output, WireCodec::Toml, |_, _| {
            ArchiveResponse::ok()
        })
        .unwrap();
        assert!(output.is_empty());
    }
}
