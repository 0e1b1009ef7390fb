#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use unitwatch_core::{PropertyMap, UnitHandle, UnitName};
use unitwatch_monitor::{MonitorEvent, RefreshTrigger, UnitMonitorListener, UnitStateListener};

/// Records every state change and monitor event it receives.
#[derive(Default)]
pub struct Recorder {
    pub changes: Mutex<Vec<(UnitName, PropertyMap)>>,
    pub events: Mutex<Vec<MonitorEvent>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn change_count(&self) -> usize {
        self.changes.lock().len()
    }

    pub fn changed_units(&self) -> Vec<String> {
        self.changes
            .lock()
            .iter()
            .map(|(name, _)| name.to_string())
            .collect()
    }

    pub fn refreshes(&self, trigger: RefreshTrigger) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|event| matches!(event, MonitorEvent::Refreshed { trigger: t, .. } if *t == trigger))
            .count()
    }

    pub fn failures(&self, trigger: RefreshTrigger) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|event| matches!(event, MonitorEvent::RefreshFailed { trigger: t, .. } if *t == trigger))
            .count()
    }
}

impl UnitStateListener for Recorder {
    fn state_changed(&self, unit: &UnitHandle, changed: &PropertyMap) {
        self.changes.lock().push((unit.name().clone(), changed.clone()));
    }
}

impl UnitMonitorListener for Recorder {
    fn monitor_event(&self, event: &MonitorEvent) {
        self.events.lock().push(event.clone());
    }
}

/// Poll `condition` until it holds, yielding to the monitor's tasks in
/// between. Panics after five seconds.
pub async fn wait_until<F, Fut>(what: &str, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        while !condition().await {
            tokio::task::yield_now().await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {what}");
}

/// Give spawned tasks a chance to run everything they have queued.
pub async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}
