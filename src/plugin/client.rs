//! Plugin connection client: correlation, timeouts, handshake.
//!
//! One client exists per live plugin connection and is shared by every
//! caller. Requests and responses are correlated by frame id, so one slow
//! request does not block unrelated callers; a per-call timeout fails only
//! the affected call.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use chrono::Utc;
use shipwright_plugin_api::{
    ArchiveRequest, ArchiveResponse, Message, WireCodec, PROTOCOL_VERSION, STATUS_ERR,
    STATUS_INFO_LOG, STATUS_OK,
};
use uuid::Uuid;

use super::transport::{PluginTransport, ShutdownOutcome};
use super::{PluginError, DEFAULT_CALL_TIMEOUT};

/// Sink for plugin info-log lines: `(plugin id, line)`.
pub type LogSink = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Per-connection options.
#[derive(Clone)]
pub struct PluginClientOptions {
    /// Per-call timeout.
    pub timeout: Duration,
    pub log: LogSink,
}

impl Default for PluginClientOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_CALL_TIMEOUT,
            log: Arc::new(|_, _| {}),
        }
    }
}

type PendingMap = Arc<Mutex<HashMap<u32, SyncSender<Message>>>>;

/// A live connection to one plugin subprocess.
pub struct PluginClient {
    id: String,
    codec: WireCodec,
    transport: Arc<dyn PluginTransport>,
    next_id: AtomicU32,
    pending: PendingMap,
    timeout: Duration,
    closed: AtomicBool,
}

impl std::fmt::Debug for PluginClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginClient")
            .field("id", &self.id)
            .field("codec", &self.codec)
            .field("timeout", &self.timeout)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl PluginClient {
    /// Wire up a client over the given transport and start its reader
    /// thread. The connection is not verified until [`handshake`] runs.
    ///
    /// [`handshake`]: PluginClient::handshake
    pub fn connect(
        id: impl Into<String>,
        transport: Arc<dyn PluginTransport>,
        codec: WireCodec,
        options: PluginClientOptions,
    ) -> PluginClient {
        let id = id.into();
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));

        let reader_transport = Arc::clone(&transport);
        let reader_pending = Arc::clone(&pending);
        let reader_id = id.clone();
        let log = options.log;
        thread::spawn(move || {
            reader_loop(&reader_id, &reader_transport, &reader_pending, &log);
        });

        PluginClient {
            id,
            codec,
            transport,
            // Id 0 is reserved for uncorrelated info-log frames.
            next_id: AtomicU32::new(1),
            pending,
            timeout: options.timeout,
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Execute one archive request. Safe to call from many threads; calls
    /// are correlated independently.
    pub fn execute(&self, request: &ArchiveRequest) -> Result<ArchiveResponse, PluginError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PluginError::ConnectionClosed {
                id: self.id.clone(),
            });
        }

        let call_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let body = self
            .codec
            .encode(request)
            .map_err(|source| PluginError::Codec {
                id: self.id.clone(),
                source,
            })?;

        let (tx, rx) = mpsc::sync_channel(1);
        {
            let mut pending = lock(&self.pending);
            pending.insert(call_id, tx);
        }

        if let Err(source) = self.transport.send(&Message::new(call_id, STATUS_OK, body)) {
            lock(&self.pending).remove(&call_id);
            return Err(PluginError::Io {
                id: self.id.clone(),
                source,
            });
        }

        let message = match rx.recv_timeout(self.timeout) {
            Ok(message) => message,
            Err(RecvTimeoutError::Timeout) => {
                // Only this call fails; the connection stays usable for
                // other callers unless the subprocess is truly gone.
                lock(&self.pending).remove(&call_id);
                return Err(PluginError::Timeout {
                    id: self.id.clone(),
                    timeout: self.timeout,
                });
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(PluginError::ConnectionClosed {
                    id: self.id.clone(),
                });
            }
        };

        if message.header.status == STATUS_ERR {
            return Err(PluginError::Plugin {
                id: self.id.clone(),
                message: String::from_utf8_lossy(&message.body).into_owned(),
            });
        }

        self.codec
            .decode(&message.body)
            .map_err(|source| PluginError::Codec {
                id: self.id.clone(),
                source,
            })
    }

    /// Verify the connection with a freshly generated heartbeat token. The
    /// plugin must echo the identical token along with a compatible
    /// protocol version.
    pub fn handshake(&self) -> Result<(), PluginError> {
        let token = format!("heartbeat-{}-{}", Utc::now().timestamp_millis(), Uuid::new_v4());
        let request = ArchiveRequest {
            version: PROTOCOL_VERSION,
            heartbeat: Some(token.clone()),
            ..Default::default()
        };

        let response = self.execute(&request)?;

        if let Some(err) = response.error {
            return Err(PluginError::Handshake {
                id: self.id.clone(),
                reason: err.message,
            });
        }
        if response.heartbeat.as_deref() != Some(token.as_str()) {
            return Err(PluginError::Handshake {
                id: self.id.clone(),
                reason: "unexpected heartbeat response".to_string(),
            });
        }
        match response.version {
            Some(version) if version == PROTOCOL_VERSION => Ok(()),
            Some(version) => Err(PluginError::Handshake {
                id: self.id.clone(),
                reason: format!(
                    "protocol version mismatch: client is at {PROTOCOL_VERSION}, plugin at {version}"
                ),
            }),
            None => Err(PluginError::Handshake {
                id: self.id.clone(),
                reason: "handshake response carries no protocol version".to_string(),
            }),
        }
    }

    /// Close the connection. Idempotent; the first call wins.
    pub fn close(&self) -> ShutdownOutcome {
        if self.closed.swap(true, Ordering::SeqCst) {
            return ShutdownOutcome::Clean;
        }
        let outcome = self.transport.shutdown();
        // Wake any caller still waiting on a response.
        lock(&self.pending).clear();
        outcome
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn reader_loop(
    plugin_id: &str,
    transport: &Arc<dyn PluginTransport>,
    pending: &PendingMap,
    log: &LogSink,
) {
    loop {
        let message = match transport.recv() {
            Ok(message) => message,
            Err(_) => {
                // Channel gone: drop every pending sender so waiting calls
                // observe the disconnect instead of their full timeout.
                lock(pending).clear();
                return;
            }
        };

        if message.header.status == STATUS_INFO_LOG {
            log(plugin_id, &String::from_utf8_lossy(&message.body));
            continue;
        }

        let waiter = lock(pending).remove(&message.header.id);
        if let Some(waiter) = waiter {
            let _ = waiter.send(message);
        }
        // A response with no waiter is a timed-out call; discard it.
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::plugin::transport::InMemoryTransport;
    use shipwright_plugin_api::serve_with_io;
    use std::io::{Read, Write};

    /// Adapter exposing the plugin half of an in-memory pair as the
    /// Read/Write channel the server runtime expects.
    struct ServerChannel {
        transport: Arc<InMemoryTransport>,
        incoming: Vec<u8>,
    }

    impl Read for ServerChannel {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            while self.incoming.is_empty() {
                let msg = self.transport.recv()?;
                let mut framed = Vec::new();
                shipwright_plugin_api::write_message(&mut framed, &msg)?;
                self.incoming = framed;
            }
            let n = buf.len().min(self.incoming.len());
            buf[..n].copy_from_slice(&self.incoming[..n]);
            self.incoming.drain(..n);
            Ok(n)
        }
    }

    impl Write for ServerChannel {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            // The server runtime writes exactly one frame per call chain;
            // buffer until a full frame parses.
            self.incoming.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            let mut cursor = self.incoming.as_slice();
            if let Ok(msg) = shipwright_plugin_api::read_message(&mut cursor) {
                let consumed = self.incoming.len() - cursor.len();
                self.incoming.drain(..consumed);
                self.transport
                    .send(&msg)
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::BrokenPipe, e))?;
            }
            Ok(())
        }
    }

    /// Run a real protocol server over the plugin half of an in-memory
    /// pair, in a background thread.
    pub(crate) fn spawn_in_memory_server<F>(
        plugin_half: InMemoryTransport,
        codec: WireCodec,
        handler: F,
    ) where
        F: FnMut(
                &mut shipwright_plugin_api::Dispatcher<'_>,
                ArchiveRequest,
            ) -> ArchiveResponse
            + Send
            + 'static,
    {
        let transport = Arc::new(plugin_half);
        let reader = ServerChannel {
            transport: Arc::clone(&transport),
            incoming: Vec::new(),
        };
        let writer = ServerChannel {
            transport,
            incoming: Vec::new(),
        };
        thread::spawn(move || {
            let _ = serve_with_io(reader, writer, codec, handler);
        });
    }

    /// A minimal plugin stand-in that answers every request through the
    /// given function, without the server runtime's heartbeat handling.
    fn spawn_raw_responder<F>(plugin_half: InMemoryTransport, codec: WireCodec, respond: F)
    where
        F: Fn(ArchiveRequest) -> ArchiveResponse + Send + 'static,
    {
        thread::spawn(move || loop {
            let msg = match plugin_half.recv() {
                Ok(msg) => msg,
                Err(_) => return,
            };
            let request: ArchiveRequest = codec.decode(&msg.body).unwrap();
            let body = codec.encode(&respond(request)).unwrap();
            let _ = plugin_half.send(&Message::new(msg.header.id, STATUS_OK, body));
        });
    }

    fn echo_client(codec: WireCodec) -> PluginClient {
        let (host, plugin) = InMemoryTransport::pair();
        spawn_in_memory_server(plugin, codec, |_, _| ArchiveResponse::ok());
        PluginClient::connect("echo", Arc::new(host), codec, PluginClientOptions::default())
    }

    #[test]
    fn test_handshake_succeeds_against_conforming_server() {
        let client = echo_client(WireCodec::Toml);
        client.handshake().unwrap();
    }

    #[test]
    fn test_handshake_rejects_wrong_heartbeat_echo() {
        let codec = WireCodec::Json;
        let (host, plugin) = InMemoryTransport::pair();
        spawn_raw_responder(plugin, codec, |_| ArchiveResponse {
            heartbeat: Some("not-the-token".to_string()),
            version: Some(PROTOCOL_VERSION),
            error: None,
        });

        let client =
            PluginClient::connect("broken", Arc::new(host), codec, PluginClientOptions::default());
        let err = client.handshake().unwrap_err();
        assert!(matches!(err, PluginError::Handshake { .. }), "{err}");
    }

    #[test]
    fn test_handshake_rejects_protocol_version_mismatch() {
        let codec = WireCodec::Json;
        let (host, plugin) = InMemoryTransport::pair();
        spawn_raw_responder(plugin, codec, |req| ArchiveResponse {
            heartbeat: req.heartbeat,
            version: Some(PROTOCOL_VERSION + 1),
            error: None,
        });

        let client =
            PluginClient::connect("old", Arc::new(host), codec, PluginClientOptions::default());
        let err = client.handshake().unwrap_err();
        assert!(matches!(err, PluginError::Handshake { .. }), "{err}");
    }

    #[test]
    fn test_execute_timeout_fails_only_that_call() {
        let codec = WireCodec::Toml;
        let (host, plugin) = InMemoryTransport::pair();

        // A server that never answers: recv and drop everything.
        thread::spawn(move || loop {
            if plugin.recv().is_err() {
                return;
            }
        });

        let client = PluginClient::connect(
            "silent",
            Arc::new(host),
            codec,
            PluginClientOptions {
                timeout: Duration::from_millis(50),
                ..Default::default()
            },
        );

        let request = ArchiveRequest {
            version: PROTOCOL_VERSION,
            out_filename: "/tmp/never.tar.gz".into(),
            ..Default::default()
        };
        let err = client.execute(&request).unwrap_err();
        assert!(matches!(err, PluginError::Timeout { .. }));

        // The connection is still open for further calls.
        let err = client.execute(&request).unwrap_err();
        assert!(matches!(err, PluginError::Timeout { .. }));
    }

    #[test]
    fn test_info_log_lines_reach_the_sink() {
        let codec = WireCodec::Toml;
        let (host, plugin) = InMemoryTransport::pair();
        spawn_in_memory_server(plugin, codec, |dispatcher, _| {
            dispatcher.info("starting work");
            ArchiveResponse::ok()
        });

        let lines: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink_lines = Arc::clone(&lines);
        let client = PluginClient::connect(
            "chatty",
            Arc::new(host),
            codec,
            PluginClientOptions {
                log: Arc::new(move |id, line| {
                    sink_lines.lock().unwrap().push(format!("{id}: {line}"));
                }),
                ..Default::default()
            },
        );

        let request = ArchiveRequest {
            version: PROTOCOL_VERSION,
            out_filename: "/tmp/logged.tar.gz".into(),
            ..Default::default()
        };
        client.execute(&request).unwrap();

        // The log frame precedes the response on the wire, so it has been
        // routed by the time execute returns.
        let lines = lines.lock().unwrap();
        assert_eq!(lines.as_slice(), ["chatty: starting work"]);
    }

    #[test]
    fn test_execute_after_close_fails() {
        let client = echo_client(WireCodec::Toml);
        client.close();
        let err = client
            .execute(&ArchiveRequest {
                version: PROTOCOL_VERSION,
                out_filename: "/tmp/closed.tar.gz".into(),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, PluginError::ConnectionClosed { .. }));
    }

    #[test]
    fn test_plugin_error_payload_is_surfaced() {
        let codec = WireCodec::Toml;
        let (host, plugin) = InMemoryTransport::pair();
        spawn_in_memory_server(plugin, codec, |_, _| {
            ArchiveResponse::from_error("failing", "disk full")
        });

        let client =
            PluginClient::connect("failing", Arc::new(host), codec, PluginClientOptions::default());
        let response = client
            .execute(&ArchiveRequest {
                version: PROTOCOL_VERSION,
                out_filename: "/tmp/fail.tar.gz".into(),
                ..Default::default()
            })
            .unwrap();
        let err = response.into_result().unwrap_err();
        assert_eq!(err.to_string(), "failing: disk full");
    }
}
