//! Start-once registry of plugin connections.
//!
//! The same plugin id may be referenced by many archive configurations that
//! are processed concurrently on the scheduler's workers, so registration
//! must be idempotent and safe under concurrent calls: the id→connection
//! map uses a double-checked lookup so Ready connections are returned
//! without a write lock, start-up is serialized per id (the first caller
//! starts, the rest block until Ready or failure), and distinct ids start
//! concurrently.

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Condvar, Mutex, RwLock};

use super::client::{PluginClient, PluginClientOptions};
use super::transport::{PluginTransport, ProcessTransport, ShutdownOutcome};
use super::{PluginDescriptor, PluginError};

/// Produces the transport for a descriptor; swapped out in tests.
pub type TransportFactory<'a> =
    dyn FnOnce() -> io::Result<Arc<dyn PluginTransport>> + 'a;

enum SlotState {
    Starting,
    Ready(Arc<PluginClient>),
    Failed(String),
}

struct Slot {
    state: Mutex<SlotState>,
    ready: Condvar,
}

impl Slot {
    fn starting() -> Slot {
        Slot {
            state: Mutex::new(SlotState::Starting),
            ready: Condvar::new(),
        }
    }
}

/// Registry of live plugin connections, keyed by plugin id. Owned by the
/// orchestrator core and injected into the archive stage.
pub struct PluginRegistry {
    slots: RwLock<HashMap<String, Arc<Slot>>>,
    options: PluginClientOptions,
}

impl PluginRegistry {
    pub fn new(options: PluginClientOptions) -> PluginRegistry {
        PluginRegistry {
            slots: RwLock::new(HashMap::new()),
            options,
        }
    }

    /// Start the plugin and register its connection. Idempotent per id:
    /// once a connection is Ready, subsequent calls return it without
    /// spawning anything.
    pub fn start_and_register(
        &self,
        descriptor: &PluginDescriptor,
    ) -> Result<Arc<PluginClient>, PluginError> {
        self.start_with(descriptor, Box::new(|| {
            ProcessTransport::spawn(descriptor).map(|t| Arc::new(t) as Arc<dyn PluginTransport>)
        }))
    }

    /// As [`start_and_register`] but with an explicit transport factory,
    /// used by tests to count spawns and avoid real processes.
    ///
    /// [`start_and_register`]: PluginRegistry::start_and_register
    pub fn start_with(
        &self,
        descriptor: &PluginDescriptor,
        factory: Box<TransportFactory<'_>>,
    ) -> Result<Arc<PluginClient>, PluginError> {
        descriptor.validate()?;
        let id = descriptor.id.as_str();

        // Fast path: already registered (Ready, Starting or Failed).
        let existing = {
            let slots = read_lock(&self.slots);
            slots.get(id).cloned()
        };
        if let Some(slot) = existing {
            return wait_ready(id, &slot);
        }

        // Slow path: race to insert the slot. Whoever inserts it starts the
        // plugin; everyone else waits on the slot. The write lock is held
        // only for the map insert, so other ids keep starting in parallel.
        let (slot, starter) = {
            let mut slots = write_lock(&self.slots);
            match slots.get(id) {
                Some(slot) => (Arc::clone(slot), false),
                None => {
                    let slot = Arc::new(Slot::starting());
                    slots.insert(id.to_string(), Arc::clone(&slot));
                    (slot, true)
                }
            }
        };
        if !starter {
            return wait_ready(id, &slot);
        }

        let result = self.start_client(descriptor, factory);

        {
            let mut state = lock(&slot.state);
            *state = match &result {
                Ok(client) => SlotState::Ready(Arc::clone(client)),
                Err(err) => SlotState::Failed(err.to_string()),
            };
        }
        slot.ready.notify_all();

        result
    }

    fn start_client(
        &self,
        descriptor: &PluginDescriptor,
        factory: Box<TransportFactory<'_>>,
    ) -> Result<Arc<PluginClient>, PluginError> {
        let transport = factory().map_err(|source| PluginError::Start {
            id: descriptor.id.clone(),
            source,
        })?;
        let client = Arc::new(PluginClient::connect(
            descriptor.id.clone(),
            transport,
            descriptor.codec,
            self.options.clone(),
        ));
        client.handshake()?;
        Ok(client)
    }

    /// Look up a Ready connection.
    pub fn get(&self, id: &str) -> Option<Arc<PluginClient>> {
        let slots = read_lock(&self.slots);
        let slot = slots.get(id)?;
        let state = lock(&slot.state);
        match &*state {
            SlotState::Ready(client) => Some(Arc::clone(client)),
            _ => None,
        }
    }

    /// Close every live connection exactly once. A connection whose
    /// subprocess already exited is not an error; any other close failure
    /// is reported through the log sink as a warning.
    pub fn close_all(&self) {
        let clients: Vec<Arc<PluginClient>> = {
            let slots = read_lock(&self.slots);
            slots
                .values()
                .filter_map(|slot| match &*lock(&slot.state) {
                    SlotState::Ready(client) => Some(Arc::clone(client)),
                    _ => None,
                })
                .collect()
        };
        for client in clients {
            match client.close() {
                ShutdownOutcome::Clean | ShutdownOutcome::AlreadyExited => {}
                ShutdownOutcome::Failed(reason) => {
                    (self.options.log)(client.id(), &format!("warning: error closing plugin: {reason}"));
                }
            }
        }
    }
}

fn wait_ready(id: &str, slot: &Slot) -> Result<Arc<PluginClient>, PluginError> {
    let mut state = lock(&slot.state);
    while matches!(&*state, SlotState::Starting) {
        state = match slot.ready.wait(state) {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
    }
    match &*state {
        SlotState::Ready(client) => Ok(Arc::clone(client)),
        SlotState::Failed(reason) => Err(PluginError::Unavailable {
            id: id.to_string(),
            reason: reason.clone(),
        }),
        SlotState::Starting => unreachable!("loop exits only on a terminal state"),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn read_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn write_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
