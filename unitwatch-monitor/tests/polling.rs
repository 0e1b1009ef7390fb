mod common;

use std::sync::Arc;
use std::time::Duration;

use common::Recorder;
use serde_json::json;
use tokio::time::sleep;
use tokio_test::{assert_err, assert_ok};
use unitwatch_core::memory::InMemoryDaemon;
use unitwatch_core::UnitKind;
use unitwatch_monitor::{
    ConfigError, MonitorError, MonitorEvent, PollSchedule, RefreshTrigger, TypedUnitMonitor,
};

const PERIOD: Duration = Duration::from_millis(100);

fn typed_monitor(daemon: &Arc<InMemoryDaemon>) -> (TypedUnitMonitor, Arc<Recorder>) {
    let monitor = TypedUnitMonitor::typed(Arc::clone(daemon));
    let recorder = Recorder::new();
    monitor.add_listener(recorder.clone());
    monitor.add_monitor_listener(recorder.clone());
    (monitor, recorder)
}

#[tokio::test(start_paused = true, flavor = "current_thread")]
async fn failed_tick_does_not_stop_the_next_one() {
    let daemon = Arc::new(InMemoryDaemon::new().with_unit("sshd.service", UnitKind::Service));
    let (monitor, recorder) = typed_monitor(&daemon);
    assert_ok!(monitor.add_monitored_kinds([UnitKind::Service]).await);
    monitor.reset().await;

    // List call 1 was the filter change; the first tick is call 2.
    daemon.fail_list_call(2);
    assert_ok!(monitor.start_polling(Duration::ZERO, PERIOD));

    sleep(Duration::from_millis(50)).await;
    assert_eq!(recorder.failures(RefreshTrigger::Poll), 1);
    assert_eq!(monitor.monitored_count().await, 0);

    sleep(PERIOD).await;
    assert_eq!(recorder.refreshes(RefreshTrigger::Poll), 1);
    assert!(monitor.monitors_unit("sshd").await);
    assert_eq!(daemon.list_calls(), 3);
}

#[tokio::test(start_paused = true, flavor = "current_thread")]
async fn first_tick_waits_for_the_delay() {
    let daemon = Arc::new(InMemoryDaemon::new());
    let (monitor, _recorder) = typed_monitor(&daemon);
    assert_ok!(monitor.start_polling(Duration::from_millis(300), PERIOD));

    sleep(Duration::from_millis(250)).await;
    assert_eq!(daemon.list_calls(), 0);
    sleep(Duration::from_millis(100)).await;
    assert_eq!(daemon.list_calls(), 1);
}

#[tokio::test(start_paused = true, flavor = "current_thread")]
async fn rearming_replaces_the_previous_timer() {
    let daemon = Arc::new(InMemoryDaemon::new());
    let (monitor, recorder) = typed_monitor(&daemon);
    assert_ok!(monitor.start_polling(Duration::ZERO, PERIOD));
    assert_ok!(monitor.start_polling(Duration::ZERO, PERIOD));

    // Ticks at 0, 100 and 200 from the second timer only.
    sleep(Duration::from_millis(250)).await;
    assert_eq!(daemon.list_calls(), 3);
    assert_eq!(recorder.refreshes(RefreshTrigger::Poll), 3);

    let started = recorder
        .events
        .lock()
        .iter()
        .filter(|event| matches!(event, MonitorEvent::PollingStarted { .. }))
        .count();
    assert_eq!(started, 2);
}

#[tokio::test(start_paused = true, flavor = "current_thread")]
async fn stop_polling_prevents_further_ticks() {
    let daemon = Arc::new(InMemoryDaemon::new());
    let (monitor, recorder) = typed_monitor(&daemon);
    assert_ok!(monitor.start_polling(Duration::ZERO, PERIOD));
    assert!(monitor.is_polling());
    assert_eq!(
        monitor.polling_schedule(),
        Some(PollSchedule::new(Duration::ZERO, PERIOD).expect("schedule"))
    );

    sleep(Duration::from_millis(150)).await;
    assert_eq!(daemon.list_calls(), 2);

    monitor.stop_polling();
    assert!(!monitor.is_polling());
    sleep(Duration::from_secs(2)).await;
    assert_eq!(daemon.list_calls(), 2);
    assert_eq!(
        recorder.events.lock().last(),
        Some(&MonitorEvent::PollingStopped)
    );

    // Stopping a disarmed timer is a no-op.
    monitor.stop_polling();
    let stopped = recorder
        .events
        .lock()
        .iter()
        .filter(|event| **event == MonitorEvent::PollingStopped)
        .count();
    assert_eq!(stopped, 1);
}

#[tokio::test(start_paused = true, flavor = "current_thread")]
async fn invalid_parameters_are_rejected_before_arming() {
    let daemon = Arc::new(InMemoryDaemon::new());
    let (monitor, _recorder) = typed_monitor(&daemon);

    let err = assert_err!(monitor.start_polling(Duration::from_millis(10), Duration::ZERO));
    assert!(matches!(
        err,
        MonitorError::Config(ConfigError::InvalidPolling(_))
    ));
    assert!(!monitor.is_polling());
    assert!(PollSchedule::from_millis(-1, 100).is_err());

    for (delay, period) in [
        (Duration::MAX, Duration::from_secs(1)),
        (Duration::ZERO, Duration::MAX),
    ] {
        let err = assert_err!(monitor.start_polling(delay, period));
        assert!(matches!(
            err,
            MonitorError::Config(ConfigError::InvalidPolling(_))
        ));
        assert!(!monitor.is_polling());
    }

    sleep(Duration::from_secs(1)).await;
    assert_eq!(daemon.list_calls(), 0);
}

#[tokio::test(start_paused = true, flavor = "current_thread")]
async fn polling_repairs_membership_without_state_changes() {
    let daemon = Arc::new(InMemoryDaemon::new().with_unit("sshd.service", UnitKind::Service));
    let (monitor, recorder) = typed_monitor(&daemon);
    assert_ok!(monitor.add_monitored_kinds([UnitKind::Service]).await);
    assert_ok!(monitor.start_polling(PERIOD, PERIOD));

    // Missed notifications: the daemon changes silently.
    daemon.insert_unit("cron.service", UnitKind::Service);
    daemon.forget_unit("sshd.service");
    sleep(Duration::from_millis(150)).await;

    assert!(monitor.monitors_unit("cron").await);
    assert!(!monitor.monitors_unit("sshd").await);
    assert_eq!(recorder.change_count(), 0);
    let delta = recorder.events.lock().iter().rev().find_map(|event| match event {
        MonitorEvent::Refreshed {
            trigger: RefreshTrigger::Poll,
            added,
            removed,
            ..
        } => Some((added.clone(), removed.clone())),
        _ => None,
    });
    let (added, removed) = delta.expect("poll refresh event");
    assert_eq!(added.len(), 1);
    assert_eq!(added[0].as_str(), "cron.service");
    assert_eq!(removed[0].as_str(), "sshd.service");
}

#[tokio::test(start_paused = true, flavor = "current_thread")]
async fn polling_runs_while_unsubscribed_and_dispatch_needs_subscription() {
    let daemon = Arc::new(InMemoryDaemon::new().with_unit("sshd.service", UnitKind::Service));
    let (monitor, recorder) = typed_monitor(&daemon);
    assert_ok!(monitor.add_monitored_kinds([UnitKind::Service]).await);
    assert_ok!(monitor.start_polling(Duration::ZERO, PERIOD));

    daemon.set_property("sshd.service", "ActiveState", json!("failed"));
    sleep(Duration::from_millis(250)).await;
    assert!(!monitor.is_subscribed().await);
    assert_eq!(recorder.change_count(), 0);
    assert_eq!(recorder.refreshes(RefreshTrigger::Poll), 3);
}

#[tokio::test(start_paused = true, flavor = "current_thread")]
async fn out_of_range_rearm_keeps_the_running_timer() {
    let daemon = Arc::new(InMemoryDaemon::new());
    let (monitor, _recorder) = typed_monitor(&daemon);
    assert_ok!(monitor.start_polling(Duration::ZERO, PERIOD));
    assert_err!(monitor.start_polling(Duration::MAX, PERIOD));

    assert!(monitor.is_polling());
    sleep(Duration::from_millis(150)).await;
    assert_eq!(daemon.list_calls(), 2);
}
