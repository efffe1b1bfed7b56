//! Transport layer for plugin channels.
//!
//! Abstracts the framed message channel so protocol logic (handshake,
//! correlation, timeouts) is testable without spawning processes: one
//! implementation wraps a real subprocess, the other a pair of in-memory
//! channels.

use std::io::{self, BufReader};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::Mutex;

use shipwright_plugin_api::{read_message, write_message, Message};

use super::PluginDescriptor;

/// Result of closing a transport.
#[derive(Debug)]
pub enum ShutdownOutcome {
    /// The channel closed normally.
    Clean,
    /// The subprocess had already exited on its own; not a failure.
    AlreadyExited,
    /// Closing failed; reported as a warning, never fatal.
    Failed(String),
}

/// A bidirectional framed message channel to one plugin.
///
/// `send` may be called concurrently from many request threads; `recv` is
/// only called from the connection's reader thread.
pub trait PluginTransport: Send + Sync {
    fn send(&self, msg: &Message) -> io::Result<()>;
    fn recv(&self) -> io::Result<Message>;
    fn shutdown(&self) -> ShutdownOutcome;
}

/// The real thing: a spawned subprocess with its standard streams wired to
/// the framed channel. Stderr is inherited so plugin diagnostics reach the
/// operator unmodified.
pub struct ProcessTransport {
    child: Mutex<Child>,
    stdin: Mutex<ChildStdin>,
    stdout: Mutex<BufReader<ChildStdout>>,
}

impl ProcessTransport {
    pub fn spawn(descriptor: &PluginDescriptor) -> io::Result<ProcessTransport> {
        let mut command = Command::new(&descriptor.command);
        command
            .args(&descriptor.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        if let Some(dir) = &descriptor.dir {
            command.current_dir(dir);
        }
        for entry in &descriptor.env {
            if let Some((key, value)) = entry.split_once('=') {
                command.env(key, value);
            }
        }

        let mut child = command.spawn()?;
        let stdin = child.stdin.take().ok_or_else(|| {
            io::Error::new(io::ErrorKind::BrokenPipe, "plugin stdin not captured")
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            io::Error::new(io::ErrorKind::BrokenPipe, "plugin stdout not captured")
        })?;

        Ok(ProcessTransport {
            child: Mutex::new(child),
            stdin: Mutex::new(stdin),
            stdout: Mutex::new(BufReader::new(stdout)),
        })
    }
}

impl PluginTransport for ProcessTransport {
    fn send(&self, msg: &Message) -> io::Result<()> {
        let mut stdin = match self.stdin.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        write_message(&mut *stdin, msg)
    }

    fn recv(&self) -> io::Result<Message> {
        let mut stdout = match self.stdout.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        read_message(&mut *stdout)
    }

    fn shutdown(&self) -> ShutdownOutcome {
        let mut child = match self.child.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match child.try_wait() {
            Ok(Some(_status)) => ShutdownOutcome::AlreadyExited,
            Ok(None) => {
                if let Err(err) = child.kill() {
                    return ShutdownOutcome::Failed(err.to_string());
                }
                match child.wait() {
                    Ok(_) => ShutdownOutcome::Clean,
                    Err(err) => ShutdownOutcome::Failed(err.to_string()),
                }
            }
            Err(err) => ShutdownOutcome::Failed(err.to_string()),
        }
    }
}

/// In-memory transport for tests: two paired halves connected by channels.
pub struct InMemoryTransport {
    tx: Mutex<Sender<Message>>,
    rx: Mutex<Receiver<Message>>,
}

impl InMemoryTransport {
    /// Create a connected pair. Frames sent on one half are received by the
    /// other, in order.
    pub fn pair() -> (InMemoryTransport, InMemoryTransport) {
        let (a_tx, b_rx) = std::sync::mpsc::channel();
        let (b_tx, a_rx) = std::sync::mpsc::channel();
        (
            InMemoryTransport {
                tx: Mutex::new(a_tx),
                rx: Mutex::new(a_rx),
            },
            InMemoryTransport {
                tx: Mutex::new(b_tx),
                rx: Mutex::new(b_rx),
            },
        )
    }
}

impl PluginTransport for InMemoryTransport {
    fn send(&self, msg: &Message) -> io::Result<()> {
        let tx = match self.tx.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        tx.send(msg.clone())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "peer closed"))
    }

    fn recv(&self) -> io::Result<Message> {
        let rx = match self.rx.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        rx.recv()
            .map_err(|_| io::Error::new(io::ErrorKind::UnexpectedEof, "peer closed"))
    }

    fn shutdown(&self) -> ShutdownOutcome {
        ShutdownOutcome::Clean
    }
}
