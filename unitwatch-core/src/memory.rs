//! In-memory daemon.
//!
//! [`InMemoryDaemon`] implements [`UnitDirectory`], [`FacadeFactory`] and
//! [`NotificationChannel`] over a plain table of units. Mutators that mirror a
//! daemon-side change (`add_unit`, `remove_unit`, `set_property`) also emit
//! the signal the real daemon would send; the `insert_*`/`forget_*` variants
//! change state silently, which is how a missed notification looks.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::error::RemoteError;
use crate::remote::{
    FacadeFactory, ManagerSignal, NotificationChannel, SignalReceiver, UnitDirectory, UnitFacade,
};
use crate::types::{ObjectPath, PropertyMap, UnitKind, UnitListing, UnitName};

const DEFAULT_SIGNAL_CAPACITY: usize = 256;

/// A daemon whose units live in memory. Clones share state.
#[derive(Clone)]
pub struct InMemoryDaemon {
    shared: Arc<Shared>,
}

struct Shared {
    state: Mutex<DaemonState>,
    signals: broadcast::Sender<ManagerSignal>,
    list_calls: AtomicUsize,
    create_calls: AtomicUsize,
    subscribe_calls: AtomicUsize,
}

struct DaemonState {
    units: BTreeMap<String, UnitKind>,
    properties: HashMap<String, PropertyMap>,
    reachable: bool,
    /// 1-based numbers of `list_units` calls that fail.
    failing_list_calls: BTreeSet<usize>,
}

impl Default for InMemoryDaemon {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDaemon {
    pub fn new() -> Self {
        Self::with_signal_capacity(DEFAULT_SIGNAL_CAPACITY)
    }

    /// A daemon whose signal buffer holds `capacity` undelivered signals per
    /// receiver before slow receivers start lagging.
    pub fn with_signal_capacity(capacity: usize) -> Self {
        let (signals, _) = broadcast::channel(capacity.max(1));
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(DaemonState {
                    units: BTreeMap::new(),
                    properties: HashMap::new(),
                    reachable: true,
                    failing_list_calls: BTreeSet::new(),
                }),
                signals,
                list_calls: AtomicUsize::new(0),
                create_calls: AtomicUsize::new(0),
                subscribe_calls: AtomicUsize::new(0),
            }),
        }
    }

    /// Builder-style silent insert.
    pub fn with_unit(self, name: &str, kind: UnitKind) -> Self {
        self.insert_unit(name, kind);
        self
    }

    /// Add a unit without emitting `UnitNew`.
    pub fn insert_unit(&self, name: &str, kind: UnitKind) {
        self.shared.state.lock().units.insert(name.to_string(), kind);
    }

    /// Add a unit and emit `UnitNew`.
    pub fn add_unit(&self, name: &str, kind: UnitKind) {
        self.insert_unit(name, kind);
        self.emit(ManagerSignal::UnitNew {
            name: name.to_string(),
            path: path_for(name),
        });
    }

    /// Remove a unit without emitting `UnitRemoved`.
    pub fn forget_unit(&self, name: &str) {
        let mut state = self.shared.state.lock();
        state.units.remove(name);
        state.properties.remove(name);
    }

    /// Remove a unit and emit `UnitRemoved`.
    pub fn remove_unit(&self, name: &str) {
        self.forget_unit(name);
        self.emit(ManagerSignal::UnitRemoved {
            name: name.to_string(),
            path: path_for(name),
        });
    }

    /// Store a property value and emit `PropertiesChanged` carrying only it.
    pub fn set_property(&self, name: &str, key: &str, value: serde_json::Value) {
        self.shared
            .state
            .lock()
            .properties
            .entry(name.to_string())
            .or_default()
            .insert(key.to_string(), value.clone());
        let mut changed = PropertyMap::new();
        changed.insert(key.to_string(), value);
        self.emit(ManagerSignal::PropertiesChanged {
            path: path_for(name),
            changed,
        });
    }

    /// Send a raw signal to every open receiver.
    pub fn emit(&self, signal: ManagerSignal) {
        // No receivers is not an error for a daemon.
        let _ = self.shared.signals.send(signal);
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.shared.state.lock().reachable = reachable;
    }

    /// Make the `call`-th `list_units` call (1-based, counted over the
    /// daemon's lifetime) fail with a protocol error.
    pub fn fail_list_call(&self, call: usize) {
        self.shared.state.lock().failing_list_calls.insert(call);
    }

    pub fn list_calls(&self) -> usize {
        self.shared.list_calls.load(Ordering::SeqCst)
    }

    pub fn create_calls(&self) -> usize {
        self.shared.create_calls.load(Ordering::SeqCst)
    }

    pub fn subscribe_calls(&self) -> usize {
        self.shared.subscribe_calls.load(Ordering::SeqCst)
    }

    /// Number of receivers currently open.
    pub fn receiver_count(&self) -> usize {
        self.shared.signals.receiver_count()
    }
}

/// Object path of `name` as the daemon would report it.
pub fn path_for(name: &str) -> ObjectPath {
    match UnitName::normalize(name) {
        Ok(name) => ObjectPath::for_unit(&name),
        Err(_) => ObjectPath(format!("{}_", ObjectPath::UNIT_PREFIX)),
    }
}

#[async_trait]
impl UnitDirectory for InMemoryDaemon {
    async fn list_units(&self) -> Result<Vec<UnitListing>, RemoteError> {
        let call = self.shared.list_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let state = self.shared.state.lock();
        if !state.reachable {
            return Err(RemoteError::Unreachable("in-memory daemon is offline".into()));
        }
        if state.failing_list_calls.contains(&call) {
            return Err(RemoteError::Protocol(format!(
                "injected failure on list call {call}"
            )));
        }
        Ok(state
            .units
            .iter()
            .map(|(name, kind)| UnitListing::new(name.clone(), *kind))
            .collect())
    }
}

#[async_trait]
impl FacadeFactory for InMemoryDaemon {
    async fn create(
        &self,
        name: &UnitName,
        kind: UnitKind,
    ) -> Result<Arc<dyn UnitFacade>, RemoteError> {
        self.shared.create_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.shared.state.lock();
        if !state.reachable {
            return Err(RemoteError::Unreachable("in-memory daemon is offline".into()));
        }
        if !state.units.contains_key(name.as_str()) {
            return Err(RemoteError::NoSuchUnit(name.to_string()));
        }
        Ok(Arc::new(MemoryUnit {
            name: name.clone(),
            kind,
            path: ObjectPath::for_unit(name),
            shared: Arc::clone(&self.shared),
        }))
    }
}

#[async_trait]
impl NotificationChannel for InMemoryDaemon {
    async fn subscribe(&self) -> Result<SignalReceiver, RemoteError> {
        if !self.shared.state.lock().reachable {
            return Err(RemoteError::Unreachable("in-memory daemon is offline".into()));
        }
        self.shared.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.shared.signals.subscribe())
    }
}

/// Facade over one unit of an [`InMemoryDaemon`].
struct MemoryUnit {
    name: UnitName,
    kind: UnitKind,
    path: ObjectPath,
    shared: Arc<Shared>,
}

#[async_trait]
impl UnitFacade for MemoryUnit {
    fn kind(&self) -> UnitKind {
        self.kind
    }

    fn object_path(&self) -> &ObjectPath {
        &self.path
    }

    async fn properties(&self) -> Result<PropertyMap, RemoteError> {
        let state = self.shared.state.lock();
        if !state.reachable {
            return Err(RemoteError::Unreachable("in-memory daemon is offline".into()));
        }
        if !state.units.contains_key(self.name.as_str()) {
            return Err(RemoteError::NoSuchUnit(self.name.to_string()));
        }
        let mut properties = state
            .properties
            .get(self.name.as_str())
            .cloned()
            .unwrap_or_default();
        properties.insert("Id".to_string(), self.name.as_str().into());
        Ok(properties)
    }
}
