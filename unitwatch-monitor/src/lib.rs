//! Unit monitor: keeps a local registry of remote units in step with the
//! daemon through change notifications and a polling fallback.
//!
//! - [`UnitMonitor`]: the engine, generic over a [`UnitSelector`]
//! - [`TypedUnitMonitor`] / [`NamedUnitMonitor`]: kind- and name-filtered monitors
//! - [`HandleFactory`]: kind → facade factory table used during reconciliation
//! - [`MonitorConfig`]: YAML configuration and monitor bootstrap

pub mod config;
mod error;
pub mod factory;
pub mod listener;
mod logging;
mod monitor;
mod named;
pub mod polling;
pub mod selector;
mod typed;

pub use config::{named_monitor_from_config, typed_monitor_from_config, MonitorConfig, PollConfig};
pub use error::{ConfigError, MonitorError};
pub use factory::HandleFactory;
pub use listener::{MonitorEvent, RefreshTrigger, UnitMonitorListener, UnitStateListener};
pub use logging::init_tracing;
pub use monitor::{MonitorBuilder, UnitMonitor};
pub use polling::PollSchedule;
pub use selector::{KindFilter, NameFilter, UnitSelector};

/// Monitor restricted to a set of unit kinds.
pub type TypedUnitMonitor = UnitMonitor<KindFilter>;

/// Monitor restricted to an explicit set of unit names.
pub type NamedUnitMonitor = UnitMonitor<NameFilter>;
