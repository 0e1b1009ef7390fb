//! The monitor engine.
//!
//! # Tasks
//!
//! ```text
//! NotificationChannel ──signals──▶ dispatcher ──state──▶ UnitStateListener(s)
//!                                      │
//!                                      └─triggers─▶ refresh worker ─▶ reconcile
//! PollTimer ─────────────────────────────────────────────────────────▶ reconcile
//! ```
//!
//! The dispatcher never waits on the daemon: reconciliations it asks for are
//! queued to the refresh worker. Both tasks and the poll timer hold only a
//! weak reference to the monitor and stop once it is dropped.
//!
//! # Locking
//!
//! `state` (registry + selector) is one `RwLock`. A reconciliation fetches the
//! listing and builds the new registry without holding it, then swaps the
//! result in under the write lock, so readers see either the previous or the
//! next complete snapshot. `reconcile` serializes reconciliations and selector
//! changes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use unitwatch_core::remote::SignalReceiver;
use unitwatch_core::{
    property, FacadeFactory, ManagerSignal, NotificationChannel, ObjectPath, PropertyMap,
    UnitDirectory, UnitHandle, UnitName,
};

use crate::error::{ConfigError, MonitorError};
use crate::factory::HandleFactory;
use crate::listener::{
    ListenerSet, MonitorEvent, RefreshTrigger, UnitMonitorListener, UnitStateListener,
};
use crate::polling::{PollSchedule, PollTimer};
use crate::selector::UnitSelector;

pub(crate) const DEFAULT_REFRESH_QUEUE: usize = 64;

/// Registry of monitored units kept in step with the daemon.
///
/// Cloning is cheap and yields another handle to the same monitor.
pub struct UnitMonitor<S: UnitSelector> {
    pub(crate) inner: Arc<Inner<S>>,
}

impl<S: UnitSelector> Clone for UnitMonitor<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

pub(crate) struct Inner<S> {
    directory: Arc<dyn UnitDirectory>,
    channel: Arc<dyn NotificationChannel>,
    factory: HandleFactory,
    pub(crate) state: RwLock<MonitorState<S>>,
    pub(crate) reconcile: Mutex<()>,
    state_listeners: ListenerSet<dyn UnitStateListener>,
    monitor_listeners: ListenerSet<dyn UnitMonitorListener>,
    subscription: Mutex<Option<Subscription>>,
    default_handlers: AtomicBool,
    poll: parking_lot::Mutex<Option<PollTimer>>,
    refresh_queue: usize,
}

pub(crate) struct MonitorState<S> {
    pub(crate) units: HashMap<UnitName, UnitHandle>,
    pub(crate) selector: S,
}

struct Subscription {
    shutdown: broadcast::Sender<()>,
    dispatcher: Option<JoinHandle<()>>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
    }
}

/// Membership change produced by one reconciliation.
struct Delta {
    monitored: usize,
    added: Vec<UnitName>,
    removed: Vec<UnitName>,
}

// ---------------------------------------------------------------------------
// Construction
// ---------------------------------------------------------------------------

/// Builder for [`UnitMonitor`].
pub struct MonitorBuilder<S> {
    selector: S,
    directory: Option<Arc<dyn UnitDirectory>>,
    channel: Option<Arc<dyn NotificationChannel>>,
    factory: Option<HandleFactory>,
    refresh_queue: usize,
}

impl<S: UnitSelector> MonitorBuilder<S> {
    fn new(selector: S) -> Self {
        Self {
            selector,
            directory: None,
            channel: None,
            factory: None,
            refresh_queue: DEFAULT_REFRESH_QUEUE,
        }
    }

    /// Use one object as directory, notification channel and facade factory
    /// for every kind.
    pub fn backend<B>(self, backend: Arc<B>) -> Self
    where
        B: UnitDirectory + NotificationChannel + FacadeFactory + 'static,
    {
        let directory: Arc<dyn UnitDirectory> = backend.clone();
        let channel: Arc<dyn NotificationChannel> = backend.clone();
        self.directory(directory)
            .channel(channel)
            .factory(HandleFactory::uniform(backend))
    }

    pub fn directory(mut self, directory: Arc<dyn UnitDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    pub fn channel(mut self, channel: Arc<dyn NotificationChannel>) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn factory(mut self, factory: HandleFactory) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Capacity of the queue between the dispatcher and the refresh worker.
    pub fn refresh_queue(mut self, capacity: usize) -> Self {
        self.refresh_queue = capacity;
        self
    }

    pub fn build(self) -> Result<UnitMonitor<S>, MonitorError> {
        let directory = self.directory.ok_or(ConfigError::Missing("unit directory"))?;
        let channel = self
            .channel
            .ok_or(ConfigError::Missing("notification channel"))?;
        let factory = self.factory.ok_or(ConfigError::Missing("handle factory"))?;
        if self.refresh_queue == 0 {
            return Err(ConfigError::InvalidQueueCapacity.into());
        }

        Ok(UnitMonitor {
            inner: Arc::new(Inner::new(
                self.selector,
                directory,
                channel,
                factory,
                self.refresh_queue,
            )),
        })
    }
}

impl<S: UnitSelector> UnitMonitor<S> {
    pub fn builder(selector: S) -> MonitorBuilder<S> {
        MonitorBuilder::new(selector)
    }

    /// Monitor backed by a single object implementing every remote trait.
    pub fn with_backend<B>(selector: S, backend: Arc<B>) -> Self
    where
        B: UnitDirectory + NotificationChannel + FacadeFactory + 'static,
    {
        let directory: Arc<dyn UnitDirectory> = backend.clone();
        let channel: Arc<dyn NotificationChannel> = backend.clone();
        Self {
            inner: Arc::new(Inner::new(
                selector,
                directory,
                channel,
                HandleFactory::uniform(backend),
                DEFAULT_REFRESH_QUEUE,
            )),
        }
    }

    // -----------------------------------------------------------------------
    // Listeners
    // -----------------------------------------------------------------------

    /// Register a state listener. Returns `false` if it was already registered.
    pub fn add_listener(&self, listener: Arc<dyn UnitStateListener>) -> bool {
        self.inner.state_listeners.add(listener)
    }

    /// Returns `false` if the listener was not registered.
    pub fn remove_listener(&self, listener: &Arc<dyn UnitStateListener>) -> bool {
        self.inner.state_listeners.remove(listener)
    }

    pub fn add_monitor_listener(&self, listener: Arc<dyn UnitMonitorListener>) -> bool {
        self.inner.monitor_listeners.add(listener)
    }

    pub fn remove_monitor_listener(&self, listener: &Arc<dyn UnitMonitorListener>) -> bool {
        self.inner.monitor_listeners.remove(listener)
    }

    // -----------------------------------------------------------------------
    // Subscription
    // -----------------------------------------------------------------------

    /// Open the notification stream and start dispatching state changes.
    ///
    /// Idempotent. On error nothing is started.
    pub async fn subscribe(&self) -> Result<(), MonitorError> {
        let mut slot = self.inner.subscription.lock().await;
        if slot.is_some() {
            return Ok(());
        }

        let runtime = Handle::try_current().map_err(|e| MonitorError::Runtime(e.to_string()))?;
        let signals = self.inner.channel.subscribe().await?;

        let (shutdown, _) = broadcast::channel::<()>(1);
        let (refresh_tx, refresh_rx) = mpsc::channel(self.inner.refresh_queue);

        let dispatcher = runtime.spawn(dispatch_signals(
            Arc::downgrade(&self.inner),
            signals,
            refresh_tx,
            shutdown.subscribe(),
        ));
        runtime.spawn(refresh_worker(
            Arc::downgrade(&self.inner),
            refresh_rx,
            shutdown.subscribe(),
        ));

        *slot = Some(Subscription {
            shutdown,
            dispatcher: Some(dispatcher),
        });
        drop(slot);

        tracing::info!("unit monitor subscribed");
        self.inner.emit(&MonitorEvent::Subscribed);
        Ok(())
    }

    pub async fn is_subscribed(&self) -> bool {
        self.inner.subscription.lock().await.is_some()
    }

    /// Subscribe and let reload, unit-files-changed (and, when the selector
    /// asks for it, unit-new/unit-removed) notifications trigger
    /// reconciliation. Installing twice is a no-op.
    pub async fn add_default_handlers(&self) -> Result<(), MonitorError> {
        self.subscribe().await?;
        if !self.inner.default_handlers.swap(true, Ordering::SeqCst) {
            tracing::debug!("default notification handlers installed");
        }
        Ok(())
    }

    /// Remove the default handlers and close the subscription.
    ///
    /// After this returns no notification-triggered reconciliation starts and
    /// no further state change is dispatched. A reconciliation already
    /// running is left to finish.
    pub async fn remove_default_handlers(&self) {
        self.inner.default_handlers.store(false, Ordering::SeqCst);

        let subscription = self.inner.subscription.lock().await.take();
        let Some(mut subscription) = subscription else {
            return;
        };
        let _ = subscription.shutdown.send(());
        if let Some(dispatcher) = subscription.dispatcher.take() {
            if let Err(err) = dispatcher.await {
                tracing::warn!(error = %err, "dispatcher task ended abnormally");
            }
        }
        drop(subscription);

        tracing::info!("unit monitor unsubscribed");
        self.inner.emit(&MonitorEvent::Unsubscribed);
    }

    // -----------------------------------------------------------------------
    // Registry
    // -----------------------------------------------------------------------

    /// Empty the registry without contacting the daemon.
    pub async fn reset(&self) {
        self.inner.state.write().await.units.clear();
        tracing::debug!("monitor registry reset");
        self.inner.emit(&MonitorEvent::Reset);
    }

    /// Reconcile the registry with the daemon.
    ///
    /// All-or-nothing: on error the previous registry is kept.
    pub async fn refresh(&self) -> Result<(), MonitorError> {
        self.map_units().await
    }

    /// Rebuild the registry from a full unit listing.
    pub async fn map_units(&self) -> Result<(), MonitorError> {
        self.inner.reconcile(RefreshTrigger::Explicit).await
    }

    pub async fn monitors_unit(&self, name: &str) -> bool {
        match UnitName::normalize(name) {
            Ok(name) => self.inner.state.read().await.units.contains_key(&name),
            Err(_) => false,
        }
    }

    pub async fn monitored_unit(&self, name: &str) -> Option<UnitHandle> {
        let name = UnitName::normalize(name).ok()?;
        self.inner.state.read().await.units.get(&name).cloned()
    }

    /// Snapshot of the registry, sorted by name.
    pub async fn monitored_units(&self) -> Vec<UnitHandle> {
        let mut units: Vec<UnitHandle> =
            self.inner.state.read().await.units.values().cloned().collect();
        units.sort_by(|a, b| a.name().cmp(b.name()));
        units
    }

    pub async fn monitored_count(&self) -> usize {
        self.inner.state.read().await.units.len()
    }

    /// Apply `change` to the selector and reconcile, without another
    /// reconciliation in between.
    pub(crate) async fn update_selector(
        &self,
        change: impl FnOnce(&mut S),
    ) -> Result<(), MonitorError> {
        let _serial = self.inner.reconcile.lock().await;
        change(&mut self.inner.state.write().await.selector);
        self.inner.reconcile_locked(RefreshTrigger::FilterChanged).await
    }

    // -----------------------------------------------------------------------
    // Polling
    // -----------------------------------------------------------------------

    /// Arm the poll timer: reconcile after `delay`, then every `period`.
    ///
    /// Replaces a timer that is already armed. Poll failures are logged and
    /// do not stop later ticks. Must be called inside a Tokio runtime.
    pub fn start_polling(&self, delay: Duration, period: Duration) -> Result<(), MonitorError> {
        self.start_polling_with(PollSchedule::new(delay, period)?)
    }

    pub fn start_polling_with(&self, schedule: PollSchedule) -> Result<(), MonitorError> {
        let runtime = Handle::try_current().map_err(|e| MonitorError::Runtime(e.to_string()))?;

        let first_tick = schedule.first_tick(Instant::now())?;

        let weak = Arc::downgrade(&self.inner);
        let mut slot = self.inner.poll.lock();
        // Disarm the previous timer before the new one exists.
        drop(slot.take());
        *slot = Some(PollTimer::spawn(&runtime, schedule, first_tick, move |armed| {
            let weak = Weak::clone(&weak);
            async move {
                match weak.upgrade() {
                    Some(inner) => {
                        inner
                            .reconcile_reporting(RefreshTrigger::Poll, || armed.is_armed())
                            .await;
                        true
                    }
                    None => false,
                }
            }
        }));
        drop(slot);

        tracing::info!(
            delay = ?schedule.delay(),
            period = ?schedule.period(),
            "polling armed",
        );
        self.inner.emit(&MonitorEvent::PollingStarted {
            delay: schedule.delay(),
            period: schedule.period(),
        });
        Ok(())
    }

    /// Disarm the poll timer. No poll-triggered reconciliation starts after
    /// this returns, including a tick still waiting behind another
    /// reconciliation; one already running finishes.
    pub fn stop_polling(&self) {
        let timer = self.inner.poll.lock().take();
        if let Some(timer) = timer {
            drop(timer);
            tracing::info!("polling disarmed");
            self.inner.emit(&MonitorEvent::PollingStopped);
        }
    }

    pub fn is_polling(&self) -> bool {
        self.inner.poll.lock().is_some()
    }

    /// Current schedule, if armed.
    pub fn polling_schedule(&self) -> Option<PollSchedule> {
        self.inner.poll.lock().as_ref().map(PollTimer::schedule)
    }
}

// ---------------------------------------------------------------------------
// Reconciliation and dispatch
// ---------------------------------------------------------------------------

impl<S: UnitSelector> Inner<S> {
    fn new(
        selector: S,
        directory: Arc<dyn UnitDirectory>,
        channel: Arc<dyn NotificationChannel>,
        factory: HandleFactory,
        refresh_queue: usize,
    ) -> Self {
        Self {
            directory,
            channel,
            factory,
            state: RwLock::new(MonitorState {
                units: HashMap::new(),
                selector,
            }),
            reconcile: Mutex::new(()),
            state_listeners: ListenerSet::default(),
            monitor_listeners: ListenerSet::default(),
            subscription: Mutex::new(None),
            default_handlers: AtomicBool::new(false),
            poll: parking_lot::Mutex::new(None),
            refresh_queue,
        }
    }

    fn emit(&self, event: &MonitorEvent) {
        self.monitor_listeners.notify(|l| l.monitor_event(event));
    }

    async fn reconcile(&self, trigger: RefreshTrigger) -> Result<(), MonitorError> {
        let _serial = self.reconcile.lock().await;
        self.reconcile_locked(trigger).await
    }

    /// Reconcile for an internal trigger: failures are logged and reported
    /// to monitor listeners only.
    ///
    /// `still_wanted` is checked once the reconcile lock is held; a trigger
    /// cancelled while it waited behind another reconciliation never starts.
    async fn reconcile_reporting(&self, trigger: RefreshTrigger, still_wanted: impl Fn() -> bool) {
        let _serial = self.reconcile.lock().await;
        if !still_wanted() {
            tracing::debug!(trigger = %trigger, "trigger cancelled while queued; skipping refresh");
            return;
        }
        if let Err(err) = self.reconcile_locked(trigger).await {
            tracing::error!(trigger = %trigger, error = %err, "error while refreshing monitor state");
        }
    }

    /// Caller holds `self.reconcile`.
    async fn reconcile_locked(&self, trigger: RefreshTrigger) -> Result<(), MonitorError> {
        match self.rebuild().await {
            Ok(delta) => {
                tracing::debug!(
                    trigger = %trigger,
                    monitored = delta.monitored,
                    added = delta.added.len(),
                    removed = delta.removed.len(),
                    "monitor registry rebuilt",
                );
                self.emit(&MonitorEvent::Refreshed {
                    trigger,
                    monitored: delta.monitored,
                    added: delta.added,
                    removed: delta.removed,
                });
                Ok(())
            }
            Err(err) => {
                if trigger.is_explicit() {
                    tracing::debug!(trigger = %trigger, error = %err, "monitor refresh failed");
                }
                self.emit(&MonitorEvent::RefreshFailed {
                    trigger,
                    error: err.to_string(),
                });
                Err(err)
            }
        }
    }

    /// Snapshot-replace: list everything, keep what the selector wants,
    /// build fresh handles, swap.
    async fn rebuild(&self) -> Result<Delta, MonitorError> {
        let listing = self.directory.list_units().await?;

        let selected: Vec<_> = {
            let state = self.state.read().await;
            listing
                .into_iter()
                .filter_map(|entry| match UnitName::with_kind(&entry.name, entry.kind) {
                    Ok(name) => Some((name, entry.kind)),
                    Err(err) => {
                        tracing::warn!(unit = %entry.name, error = %err, "skipping listed unit with invalid name");
                        None
                    }
                })
                .filter(|(name, kind)| state.selector.selects(name, *kind))
                .collect()
        };

        let mut units = HashMap::with_capacity(selected.len());
        for (name, kind) in selected {
            match self.factory.resolve(name.clone(), kind).await? {
                Some(handle) => {
                    units.insert(name, handle);
                }
                None => {
                    tracing::warn!(unit = %name, kind = %kind, "no facade factory registered for kind");
                }
            }
        }

        let mut state = self.state.write().await;
        let mut added: Vec<UnitName> = units
            .keys()
            .filter(|name| !state.units.contains_key(*name))
            .cloned()
            .collect();
        let mut removed: Vec<UnitName> = state
            .units
            .keys()
            .filter(|name| !units.contains_key(*name))
            .cloned()
            .collect();
        added.sort();
        removed.sort();
        state.units = units;

        Ok(Delta {
            monitored: state.units.len(),
            added,
            removed,
        })
    }

    async fn handle_signal(&self, signal: ManagerSignal, refresh_tx: &mpsc::Sender<RefreshTrigger>) {
        tracing::debug!(signal = %signal, "signal received");
        match signal {
            ManagerSignal::PropertiesChanged { path, changed } => {
                self.dispatch_state_change(&path, &changed).await;
            }
            // The daemon is mid-reload; wait for the finished signal.
            ManagerSignal::Reloading { active: true } => {}
            ManagerSignal::Reloading { active: false } => {
                self.request_refresh(refresh_tx, RefreshTrigger::ReloadFinished);
            }
            ManagerSignal::UnitFilesChanged => {
                self.request_refresh(refresh_tx, RefreshTrigger::UnitFilesChanged);
            }
            ManagerSignal::UnitNew { name, path } => {
                tracing::debug!(unit = %name, path = %path, "unit added");
                if self.state.read().await.selector.reconciles_on_unit_churn() {
                    self.request_refresh(refresh_tx, RefreshTrigger::UnitNew);
                }
            }
            ManagerSignal::UnitRemoved { name, path } => {
                tracing::debug!(unit = %name, path = %path, "unit removed");
                if self.state.read().await.selector.reconciles_on_unit_churn() {
                    self.request_refresh(refresh_tx, RefreshTrigger::UnitRemoved);
                }
            }
        }
    }

    async fn dispatch_state_change(&self, path: &ObjectPath, changed: &PropertyMap) {
        if !property::touches_lifecycle(changed) {
            return;
        }
        let Some(name) = path
            .unit_name()
            .and_then(|raw| UnitName::normalize(&raw).ok())
        else {
            tracing::trace!(path = %path, "properties change for a non-unit object");
            return;
        };
        let handle = self.state.read().await.units.get(&name).cloned();
        // Units dropped by a concurrent reconciliation land here too.
        let Some(handle) = handle else {
            tracing::trace!(unit = %name, "properties change for an unmonitored unit");
            return;
        };
        self.state_listeners
            .notify(|l| l.state_changed(&handle, changed));
    }

    fn request_refresh(&self, refresh_tx: &mpsc::Sender<RefreshTrigger>, trigger: RefreshTrigger) {
        if !self.default_handlers.load(Ordering::SeqCst) {
            return;
        }
        match refresh_tx.try_send(trigger) {
            Ok(()) => {}
            Err(TrySendError::Full(trigger)) => {
                tracing::warn!(trigger = %trigger, "refresh queue full; dropping trigger");
            }
            Err(TrySendError::Closed(trigger)) => {
                tracing::warn!(trigger = %trigger, "refresh worker stopped; dropping trigger");
            }
        }
    }
}

async fn dispatch_signals<S: UnitSelector>(
    inner: Weak<Inner<S>>,
    mut signals: SignalReceiver,
    refresh_tx: mpsc::Sender<RefreshTrigger>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        let received = tokio::select! {
            biased;
            _ = shutdown_rx.recv() => break,
            received = signals.recv() => received,
        };
        let Some(monitor) = inner.upgrade() else { break };
        match received {
            Ok(signal) => monitor.handle_signal(signal, &refresh_tx).await,
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "notification receiver lagged; scheduling refresh");
                monitor.request_refresh(&refresh_tx, RefreshTrigger::Lagged);
            }
            Err(RecvError::Closed) => {
                tracing::warn!("notification channel closed");
                break;
            }
        }
    }
}

async fn refresh_worker<S: UnitSelector>(
    inner: Weak<Inner<S>>,
    mut refresh_rx: mpsc::Receiver<RefreshTrigger>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        let trigger = tokio::select! {
            biased;
            _ = shutdown_rx.recv() => break,
            trigger = refresh_rx.recv() => match trigger {
                Some(trigger) => trigger,
                None => break,
            },
        };
        let Some(monitor) = inner.upgrade() else { break };
        if !monitor.default_handlers.load(Ordering::SeqCst) {
            continue;
        }
        monitor
            .reconcile_reporting(trigger, || {
                monitor.default_handlers.load(Ordering::SeqCst)
            })
            .await;
    }
}
