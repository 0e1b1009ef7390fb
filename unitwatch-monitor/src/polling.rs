//! Poll timer.
//!
//! A timer is a spawned task ticking on `delay + n * period`. Dropping the
//! [`PollTimer`] disarms it: no tick starts after the drop, but a tick that
//! is already running finishes.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::error::ConfigError;

/// Validated polling cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSchedule {
    delay: Duration,
    period: Duration,
}

impl PollSchedule {
    pub fn new(delay: Duration, period: Duration) -> Result<Self, ConfigError> {
        if period.is_zero() {
            return Err(ConfigError::InvalidPolling(
                "period must be greater than zero".into(),
            ));
        }
        Ok(Self { delay, period })
    }

    /// Build from signed milliseconds, as found in configuration files.
    pub fn from_millis(delay_ms: i64, period_ms: i64) -> Result<Self, ConfigError> {
        let delay = u64::try_from(delay_ms).map_err(|_| {
            ConfigError::InvalidPolling(format!("delay must not be negative (got {delay_ms} ms)"))
        })?;
        let period = u64::try_from(period_ms).map_err(|_| {
            ConfigError::InvalidPolling(format!(
                "period must not be negative (got {period_ms} ms)"
            ))
        })?;
        Self::new(Duration::from_millis(delay), Duration::from_millis(period))
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// First tick of a timer armed at `now`. Fails when the first or second
    /// tick is not representable as an instant.
    pub(crate) fn first_tick(&self, now: Instant) -> Result<Instant, ConfigError> {
        let first = now.checked_add(self.delay).ok_or_else(|| {
            ConfigError::InvalidPolling(format!("delay of {:?} is out of range", self.delay))
        })?;
        first.checked_add(self.period).ok_or_else(|| {
            ConfigError::InvalidPolling(format!("period of {:?} is out of range", self.period))
        })?;
        Ok(first)
    }
}

/// Armed state of one timer, shared with its ticks.
#[derive(Clone)]
pub(crate) struct Armed(Arc<AtomicBool>);

impl Armed {
    pub(crate) fn is_armed(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// An armed timer. Disarmed on drop.
pub(crate) struct PollTimer {
    armed: Armed,
    shutdown: broadcast::Sender<()>,
    schedule: PollSchedule,
}

impl PollTimer {
    /// Spawn the timer task on `runtime`, first ticking at `first_tick`
    /// (see [`PollSchedule::first_tick`]). `tick` gets the timer's armed state
    /// and returns `false` to end the timer from inside (its owner is gone).
    pub(crate) fn spawn<F, Fut>(
        runtime: &Handle,
        schedule: PollSchedule,
        first_tick: Instant,
        mut tick: F,
    ) -> Self
    where
        F: FnMut(Armed) -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let armed = Armed(Arc::new(AtomicBool::new(true)));
        let (shutdown, mut shutdown_rx) = broadcast::channel::<()>(1);

        let task_armed = armed.clone();
        runtime.spawn(async move {
            let mut interval = interval_at(first_tick, schedule.period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.recv() => break,
                    _ = interval.tick() => {
                        if !task_armed.is_armed() {
                            break;
                        }
                        if !tick(task_armed.clone()).await {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("poll timer task finished");
        });

        Self {
            armed,
            shutdown,
            schedule,
        }
    }

    pub(crate) fn schedule(&self) -> PollSchedule {
        self.schedule
    }
}

impl Drop for PollTimer {
    fn drop(&mut self) {
        self.armed.0.store(false, Ordering::SeqCst);
        let _ = self.shutdown.send(());
    }
}
