//! YAML configuration and monitor bootstrap.
//!
//! ```yaml
//! kinds: [service, mount]
//! units: [sshd, home.mount]
//! polling:
//!   delay_ms: 0
//!   period_ms: 30000
//! default_handlers: true
//! refresh_queue: 64
//! ```
//!
//! - `load_at(path)` reads an explicit file
//! - `load()` reads `<config_dir>/unitwatch/monitor.yaml`; a missing file
//!   yields the defaults

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use unitwatch_core::{FacadeFactory, NotificationChannel, UnitDirectory, UnitKind};

use crate::error::{io_err, ConfigError, MonitorError};
use crate::factory::HandleFactory;
use crate::monitor::{UnitMonitor, DEFAULT_REFRESH_QUEUE};
use crate::polling::PollSchedule;
use crate::selector::{KindFilter, NameFilter, UnitSelector};

pub const CONFIG_DIR_NAME: &str = "unitwatch";
pub const CONFIG_FILE_NAME: &str = "monitor.yaml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MonitorConfig {
    /// Initial kind filter for typed monitors.
    pub kinds: Vec<UnitKind>,
    /// Initial unit names for named monitors.
    pub units: Vec<String>,
    pub polling: Option<PollConfig>,
    pub default_handlers: bool,
    pub refresh_queue: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            kinds: Vec::new(),
            units: Vec::new(),
            polling: None,
            default_handlers: true,
            refresh_queue: DEFAULT_REFRESH_QUEUE,
        }
    }
}

/// Raw polling parameters, as written in the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PollConfig {
    #[serde(default)]
    pub delay_ms: i64,
    pub period_ms: i64,
}

impl PollConfig {
    pub fn schedule(&self) -> Result<PollSchedule, ConfigError> {
        PollSchedule::from_millis(self.delay_ms, self.period_ms)
    }
}

impl MonitorConfig {
    /// `<config_dir>/unitwatch/monitor.yaml`.
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        let dir = dirs::config_dir().ok_or(ConfigError::ConfigDirNotFound)?;
        Ok(dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Read and validate the default config file. Missing file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path()?;
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no monitor config; using defaults");
            return Ok(Self::default());
        }
        Self::load_at(&path)
    }

    pub fn load_at(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
        let config: Self = serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(polling) = &self.polling {
            polling.schedule()?;
        }
        if self.refresh_queue == 0 {
            return Err(ConfigError::InvalidQueueCapacity);
        }
        Ok(())
    }

    pub fn poll_schedule(&self) -> Result<Option<PollSchedule>, ConfigError> {
        self.polling.as_ref().map(PollConfig::schedule).transpose()
    }
}

/// Build a kind-filtered monitor from `config`: handlers first, then the
/// filter (which reconciles), then polling.
pub async fn typed_monitor_from_config<B>(
    config: &MonitorConfig,
    backend: Arc<B>,
) -> Result<UnitMonitor<KindFilter>, MonitorError>
where
    B: UnitDirectory + NotificationChannel + FacadeFactory + 'static,
{
    let monitor = bootstrap(config, KindFilter::default(), backend).await?;
    if !config.kinds.is_empty() {
        monitor.add_monitored_kinds(config.kinds.iter().copied()).await?;
    }
    arm_polling(config, &monitor)?;
    Ok(monitor)
}

/// Build a name-filtered monitor from `config`.
pub async fn named_monitor_from_config<B>(
    config: &MonitorConfig,
    backend: Arc<B>,
) -> Result<UnitMonitor<NameFilter>, MonitorError>
where
    B: UnitDirectory + NotificationChannel + FacadeFactory + 'static,
{
    let monitor = bootstrap(config, NameFilter::default(), backend).await?;
    if !config.units.is_empty() {
        monitor
            .add_monitored_units(config.units.iter().map(String::as_str))
            .await?;
    }
    arm_polling(config, &monitor)?;
    Ok(monitor)
}

async fn bootstrap<S, B>(
    config: &MonitorConfig,
    selector: S,
    backend: Arc<B>,
) -> Result<UnitMonitor<S>, MonitorError>
where
    S: UnitSelector,
    B: UnitDirectory + NotificationChannel + FacadeFactory + 'static,
{
    config.validate()?;
    let directory: Arc<dyn UnitDirectory> = backend.clone();
    let channel: Arc<dyn NotificationChannel> = backend.clone();
    let monitor = UnitMonitor::builder(selector)
        .directory(directory)
        .channel(channel)
        .factory(HandleFactory::uniform(backend))
        .refresh_queue(config.refresh_queue)
        .build()?;
    if config.default_handlers {
        monitor.add_default_handlers().await?;
    }
    Ok(monitor)
}

fn arm_polling<S: UnitSelector>(
    config: &MonitorConfig,
    monitor: &UnitMonitor<S>,
) -> Result<(), MonitorError> {
    if let Some(schedule) = config.poll_schedule()? {
        monitor.start_polling_with(schedule)?;
    }
    Ok(())
}
