use std::path::PathBuf;

use thiserror::Error;
use unitwatch_core::{NameError, RemoteError};

/// Error surface of the monitor engine.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// The daemon or transport failed; the registry keeps its last snapshot.
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("invalid unit name: {0}")]
    Name(#[from] NameError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Spawning the dispatch or polling task needs a Tokio runtime.
    #[error("no Tokio runtime available: {0}")]
    Runtime(String),
}

/// Configuration and parameter errors. Raised before any task is started.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid polling parameters: {0}")]
    InvalidPolling(String),

    #[error("refresh queue capacity must be greater than zero")]
    InvalidQueueCapacity,

    #[error("monitor builder is missing a {0}")]
    Missing(&'static str),

    #[error("cannot determine config directory; set $XDG_CONFIG_HOME or $HOME")]
    ConfigDirNotFound,
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ConfigError {
    ConfigError::Io {
        path: path.into(),
        source,
    }
}
