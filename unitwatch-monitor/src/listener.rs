//! Listener traits, monitor events and the listener set.
//!
//! State listeners run on the monitor's dispatch task, once per qualifying
//! property change, in registration order. They should return quickly; a
//! slow listener delays every notification queued behind it.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use unitwatch_core::{PropertyMap, UnitHandle, UnitName};

/// Observer of unit lifecycle changes (active, load or sub state).
pub trait UnitStateListener: Send + Sync {
    /// `changed` is the full changed-property payload, not only the
    /// lifecycle fields.
    fn state_changed(&self, unit: &UnitHandle, changed: &PropertyMap);
}

impl<F> UnitStateListener for F
where
    F: Fn(&UnitHandle, &PropertyMap) + Send + Sync,
{
    fn state_changed(&self, unit: &UnitHandle, changed: &PropertyMap) {
        self(unit, changed)
    }
}

/// Observer of the monitor itself: subscription, polling, reconciliation.
pub trait UnitMonitorListener: Send + Sync {
    fn monitor_event(&self, event: &MonitorEvent);
}

impl<F> UnitMonitorListener for F
where
    F: Fn(&MonitorEvent) + Send + Sync,
{
    fn monitor_event(&self, event: &MonitorEvent) {
        self(event)
    }
}

/// What started a reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefreshTrigger {
    /// A caller invoked `refresh`/`map_units`.
    Explicit,
    /// The selector changed.
    FilterChanged,
    Poll,
    ReloadFinished,
    UnitFilesChanged,
    UnitNew,
    UnitRemoved,
    /// The notification receiver fell behind and dropped signals.
    Lagged,
}

impl RefreshTrigger {
    /// Whether the caller sees the error directly. Internal triggers only
    /// log and report it.
    pub fn is_explicit(self) -> bool {
        matches!(self, RefreshTrigger::Explicit | RefreshTrigger::FilterChanged)
    }
}

impl fmt::Display for RefreshTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RefreshTrigger::Explicit => "explicit",
            RefreshTrigger::FilterChanged => "filter-changed",
            RefreshTrigger::Poll => "poll",
            RefreshTrigger::ReloadFinished => "reload-finished",
            RefreshTrigger::UnitFilesChanged => "unit-files-changed",
            RefreshTrigger::UnitNew => "unit-new",
            RefreshTrigger::UnitRemoved => "unit-removed",
            RefreshTrigger::Lagged => "lagged",
        })
    }
}

/// Monitor lifecycle notification.
///
/// Membership changes are reported here, by name. They never produce a
/// `state_changed` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorEvent {
    Subscribed,
    Unsubscribed,
    PollingStarted {
        delay: Duration,
        period: Duration,
    },
    PollingStopped,
    Reset,
    Refreshed {
        trigger: RefreshTrigger,
        monitored: usize,
        added: Vec<UnitName>,
        removed: Vec<UnitName>,
    },
    RefreshFailed {
        trigger: RefreshTrigger,
        error: String,
    },
}

/// Registration-ordered listeners without duplicates.
pub(crate) struct ListenerSet<L: ?Sized> {
    listeners: RwLock<Vec<Arc<L>>>,
}

impl<L: ?Sized> Default for ListenerSet<L> {
    fn default() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
        }
    }
}

impl<L: ?Sized> ListenerSet<L> {
    /// Returns `false` if this exact listener is already registered.
    pub(crate) fn add(&self, listener: Arc<L>) -> bool {
        let mut listeners = self.listeners.write();
        if listeners.iter().any(|l| same_listener(l, &listener)) {
            return false;
        }
        listeners.push(listener);
        true
    }

    /// Returns `false` if the listener was not registered.
    pub(crate) fn remove(&self, listener: &Arc<L>) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|l| !same_listener(l, listener));
        listeners.len() != before
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.listeners.read().len()
    }

    /// Call every listener in order. The set is snapshotted first so a
    /// listener may (de)register listeners; a panicking listener is logged and
    /// skipped.
    pub(crate) fn notify(&self, call: impl Fn(&L)) {
        let snapshot: Vec<Arc<L>> = self.listeners.read().clone();
        for listener in snapshot {
            if catch_unwind(AssertUnwindSafe(|| call(&listener))).is_err() {
                tracing::error!("listener panicked; continuing with the remaining listeners");
            }
        }
    }
}

// Compare data pointers only; vtable pointers of the same type may differ
// between codegen units.
fn same_listener<L: ?Sized>(a: &Arc<L>, b: &Arc<L>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}
