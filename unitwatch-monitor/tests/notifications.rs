mod common;

use std::sync::Arc;

use common::{settle, wait_until, Recorder};
use serde_json::json;
use tokio_test::assert_ok;
use unitwatch_core::memory::{path_for, InMemoryDaemon};
use unitwatch_core::{ManagerSignal, PropertyMap, UnitKind};
use unitwatch_monitor::{MonitorEvent, RefreshTrigger, TypedUnitMonitor, UnitStateListener};

struct Fixture {
    daemon: Arc<InMemoryDaemon>,
    monitor: TypedUnitMonitor,
    recorder: Arc<Recorder>,
}

async fn subscribed_fixture() -> Fixture {
    let daemon = Arc::new(
        InMemoryDaemon::new()
            .with_unit("sshd.service", UnitKind::Service)
            .with_unit("home.mount", UnitKind::Mount),
    );
    let monitor = TypedUnitMonitor::typed(daemon.clone());
    let recorder = Recorder::new();
    monitor.add_listener(recorder.clone());
    monitor.add_monitor_listener(recorder.clone());
    assert_ok!(monitor.add_default_handlers().await);
    assert_ok!(monitor.add_monitored_kinds([UnitKind::Service]).await);
    Fixture {
        daemon,
        monitor,
        recorder,
    }
}

fn changed(pairs: &[(&str, &str)]) -> PropertyMap {
    pairs
        .iter()
        .map(|(key, value)| (key.to_string(), json!(value)))
        .collect()
}

#[tokio::test]
async fn lifecycle_change_reaches_listener_with_full_payload() {
    let fx = subscribed_fixture().await;
    let payload = changed(&[("ActiveState", "inactive"), ("MainPID", "0")]);
    fx.daemon.emit(ManagerSignal::PropertiesChanged {
        path: path_for("sshd.service"),
        changed: payload.clone(),
    });

    wait_until("state change", || async { fx.recorder.change_count() == 1 }).await;
    let changes = fx.recorder.changes.lock();
    assert_eq!(changes[0].0.as_str(), "sshd.service");
    assert_eq!(changes[0].1, payload);
}

#[tokio::test]
async fn irrelevant_property_change_is_not_dispatched() {
    let fx = subscribed_fixture().await;
    fx.daemon
        .set_property("sshd.service", "MemoryCurrent", json!(4096));
    // Barrier: a lifecycle change behind it is delivered in order.
    fx.daemon
        .set_property("sshd.service", "SubState", json!("running"));

    wait_until("barrier change", || async { fx.recorder.change_count() == 1 }).await;
    let changes = fx.recorder.changes.lock();
    assert!(changes[0].1.contains_key("SubState"));
    assert!(!changes[0].1.contains_key("MemoryCurrent"));
}

#[tokio::test]
async fn change_for_unmonitored_unit_is_ignored() {
    let fx = subscribed_fixture().await;
    let before = fx.monitor.monitored_count().await;
    fx.daemon
        .set_property("home.mount", "ActiveState", json!("active"));
    fx.daemon
        .set_property("ghost.service", "ActiveState", json!("failed"));
    fx.daemon.emit(ManagerSignal::PropertiesChanged {
        path: "/org/freedesktop/systemd1".into(),
        changed: changed(&[("ActiveState", "active")]),
    });
    fx.daemon
        .set_property("sshd.service", "ActiveState", json!("active"));

    wait_until("barrier change", || async { fx.recorder.change_count() == 1 }).await;
    assert_eq!(fx.recorder.changed_units(), ["sshd.service"]);
    assert_eq!(fx.monitor.monitored_count().await, before);
}

#[tokio::test]
async fn reload_started_does_not_suppress_dispatch() {
    let fx = subscribed_fixture().await;
    let listed = fx.daemon.list_calls();
    fx.daemon.emit(ManagerSignal::Reloading { active: true });
    fx.daemon
        .set_property("sshd.service", "ActiveState", json!("reloading"));

    wait_until("state change", || async { fx.recorder.change_count() == 1 }).await;
    settle().await;
    assert_eq!(fx.daemon.list_calls(), listed, "reload-started must not reconcile");
}

#[tokio::test]
async fn reload_finished_maps_units_exactly_once() {
    let fx = subscribed_fixture().await;
    let listed = fx.daemon.list_calls();
    fx.daemon.emit(ManagerSignal::Reloading { active: false });

    wait_until("reload refresh", || async {
        fx.recorder.refreshes(RefreshTrigger::ReloadFinished) == 1
    })
    .await;
    settle().await;
    assert_eq!(fx.daemon.list_calls(), listed + 1);
    assert_eq!(fx.recorder.refreshes(RefreshTrigger::ReloadFinished), 1);
}

#[tokio::test]
async fn unit_files_changed_and_unit_churn_reconcile() {
    let fx = subscribed_fixture().await;

    fx.daemon.add_unit("cron.service", UnitKind::Service);
    wait_until("unit-new refresh", || async { fx.monitor.monitors_unit("cron").await }).await;

    fx.daemon.remove_unit("sshd.service");
    wait_until("unit-removed refresh", || async {
        !fx.monitor.monitors_unit("sshd").await
    })
    .await;

    fx.daemon.insert_unit("nginx.service", UnitKind::Service);
    fx.daemon.emit(ManagerSignal::UnitFilesChanged);
    wait_until("unit-files-changed refresh", || async {
        fx.monitor.monitors_unit("nginx").await
    })
    .await;

    // Membership changes are reported as events, never as state changes.
    assert_eq!(fx.recorder.change_count(), 0);
    assert_eq!(fx.recorder.refreshes(RefreshTrigger::UnitNew), 1);
    assert_eq!(fx.recorder.refreshes(RefreshTrigger::UnitRemoved), 1);
    assert_eq!(fx.recorder.refreshes(RefreshTrigger::UnitFilesChanged), 1);
}

#[tokio::test]
async fn failed_internal_refresh_is_reported_not_fatal() {
    let fx = subscribed_fixture().await;
    fx.daemon.set_reachable(false);
    fx.daemon.emit(ManagerSignal::Reloading { active: false });
    wait_until("failure event", || async {
        fx.recorder.failures(RefreshTrigger::ReloadFinished) == 1
    })
    .await;
    assert_eq!(fx.monitor.monitored_count().await, 1);

    // Dispatch keeps working after the failure.
    fx.daemon.set_reachable(true);
    fx.daemon
        .set_property("sshd.service", "ActiveState", json!("active"));
    wait_until("state change", || async { fx.recorder.change_count() == 1 }).await;
}

#[tokio::test]
async fn remove_default_handlers_stops_notification_driven_work() {
    let fx = subscribed_fixture().await;
    fx.monitor.remove_default_handlers().await;
    assert!(!fx.monitor.is_subscribed().await);
    assert_eq!(fx.daemon.receiver_count(), 0);
    assert_eq!(
        fx.recorder.events.lock().last(),
        Some(&MonitorEvent::Unsubscribed)
    );

    let listed = fx.daemon.list_calls();
    fx.daemon.emit(ManagerSignal::Reloading { active: false });
    fx.daemon.add_unit("cron.service", UnitKind::Service);
    fx.daemon
        .set_property("sshd.service", "ActiveState", json!("failed"));
    settle().await;
    assert_eq!(fx.daemon.list_calls(), listed);
    assert_eq!(fx.recorder.change_count(), 0);

    // Removing twice is harmless; explicit refresh still works.
    fx.monitor.remove_default_handlers().await;
    assert_ok!(fx.monitor.refresh().await);
    assert!(fx.monitor.monitors_unit("cron").await);
}

#[tokio::test]
async fn installing_twice_does_not_double_dispatch() {
    let fx = subscribed_fixture().await;
    assert_ok!(fx.monitor.add_default_handlers().await);
    assert_ok!(fx.monitor.subscribe().await);
    assert_eq!(fx.daemon.subscribe_calls(), 1);
    assert_eq!(fx.daemon.receiver_count(), 1);

    // The same listener twice is still one listener.
    let again: Arc<dyn UnitStateListener> = fx.recorder.clone();
    assert!(!fx.monitor.add_listener(again));

    let listed = fx.daemon.list_calls();
    fx.daemon.emit(ManagerSignal::Reloading { active: false });
    fx.daemon
        .set_property("sshd.service", "ActiveState", json!("active"));
    wait_until("state change", || async { fx.recorder.change_count() >= 1 }).await;
    wait_until("reload refresh", || async {
        fx.recorder.refreshes(RefreshTrigger::ReloadFinished) >= 1
    })
    .await;
    settle().await;
    assert_eq!(fx.recorder.change_count(), 1);
    assert_eq!(fx.daemon.list_calls(), listed + 1);
}

#[tokio::test]
async fn subscribe_failure_starts_nothing() {
    let daemon = Arc::new(InMemoryDaemon::new());
    daemon.set_reachable(false);
    let monitor = TypedUnitMonitor::typed(daemon.clone());
    assert!(monitor.add_default_handlers().await.is_err());
    assert!(!monitor.is_subscribed().await);
    assert_eq!(daemon.receiver_count(), 0);
}

#[tokio::test]
async fn removed_listener_stops_receiving() {
    let fx = subscribed_fixture().await;
    let listener: Arc<dyn UnitStateListener> = fx.recorder.clone();
    assert!(fx.monitor.remove_listener(&listener));
    assert!(!fx.monitor.remove_listener(&listener));

    let other = Recorder::new();
    fx.monitor.add_listener(other.clone());
    fx.daemon
        .set_property("sshd.service", "LoadState", json!("loaded"));
    wait_until("state change", || async { other.change_count() == 1 }).await;
    assert_eq!(fx.recorder.change_count(), 0);
}

#[tokio::test]
async fn panicking_listener_does_not_stop_dispatch() {
    let fx = subscribed_fixture().await;
    let first = fx.recorder.clone();
    let panicking: Arc<dyn UnitStateListener> = Arc::new(
        |_: &unitwatch_core::UnitHandle, _: &PropertyMap| panic!("listener bug"),
    );
    assert!(fx.monitor.remove_listener(&(first.clone() as Arc<dyn UnitStateListener>)));
    fx.monitor.add_listener(panicking);
    fx.monitor.add_listener(first);

    fx.daemon
        .set_property("sshd.service", "ActiveState", json!("failed"));
    fx.daemon
        .set_property("sshd.service", "ActiveState", json!("active"));
    wait_until("both changes", || async { fx.recorder.change_count() == 2 }).await;
}

#[tokio::test]
async fn lagged_receiver_schedules_a_refresh() {
    let daemon = Arc::new(
        InMemoryDaemon::with_signal_capacity(2).with_unit("sshd.service", UnitKind::Service),
    );
    let monitor = TypedUnitMonitor::typed(daemon.clone());
    let recorder = Recorder::new();
    monitor.add_monitor_listener(recorder.clone());
    assert_ok!(monitor.add_default_handlers().await);
    assert_ok!(monitor.add_monitored_kinds([UnitKind::Service]).await);

    // The dispatcher has not run yet on this single-threaded runtime, so
    // these overflow its receiver.
    for value in 0..6 {
        daemon.set_property("sshd.service", "MemoryCurrent", json!(value));
    }
    daemon.insert_unit("cron.service", UnitKind::Service);

    wait_until("lagged refresh", || async {
        recorder.refreshes(RefreshTrigger::Lagged) == 1
    })
    .await;
    assert!(monitor.monitors_unit("cron").await);
}
