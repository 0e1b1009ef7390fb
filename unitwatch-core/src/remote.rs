//! Contracts of the remote collaborators.
//!
//! The monitor never talks to the bus directly. It consumes three seams:
//!
//! - [`UnitDirectory`]: the full `(name, kind)` listing of the daemon
//! - [`FacadeFactory`]: builds the property facade for one unit
//! - [`NotificationChannel`]: the daemon's signal stream
//!
//! Timeouts, reconnection and replay belong to the implementations.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::RemoteError;
use crate::types::{ObjectPath, PropertyMap, UnitKind, UnitListing, UnitName};

/// Complete listing of the units known to the daemon.
#[async_trait]
pub trait UnitDirectory: Send + Sync {
    /// Every unit, regardless of kind or state.
    async fn list_units(&self) -> Result<Vec<UnitListing>, RemoteError>;
}

/// Typed property/method facade of one remote unit.
#[async_trait]
pub trait UnitFacade: Send + Sync {
    fn kind(&self) -> UnitKind;

    fn object_path(&self) -> &ObjectPath;

    /// Fetch every property of the unit's interfaces.
    async fn properties(&self) -> Result<PropertyMap, RemoteError>;

    /// Fetch one property. `Ok(None)` when the unit has no such property.
    async fn property(&self, name: &str) -> Result<Option<serde_json::Value>, RemoteError> {
        Ok(self.properties().await?.remove(name))
    }
}

/// Builds facades for units of one or more kinds.
#[async_trait]
pub trait FacadeFactory: Send + Sync {
    /// Fails with [`RemoteError::NoSuchUnit`] when the daemon has no object
    /// for `name`.
    async fn create(
        &self,
        name: &UnitName,
        kind: UnitKind,
    ) -> Result<Arc<dyn UnitFacade>, RemoteError>;
}

/// Receiving end of a subscription.
pub type SignalReceiver = broadcast::Receiver<ManagerSignal>;

/// The daemon's signal stream.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Ask the daemon to emit unit signals and open a receiver for them.
    ///
    /// Calling it again opens an independent receiver. Signals are delivered
    /// in the order the daemon sent them on each receiver.
    async fn subscribe(&self) -> Result<SignalReceiver, RemoteError>;
}

/// A notification emitted by the daemon.
#[derive(Debug, Clone, PartialEq)]
pub enum ManagerSignal {
    /// Properties of the object at `path` changed.
    PropertiesChanged {
        path: ObjectPath,
        changed: PropertyMap,
    },
    /// A unit was loaded.
    UnitNew { name: String, path: ObjectPath },
    /// A unit was unloaded.
    UnitRemoved { name: String, path: ObjectPath },
    /// Unit files on disk changed.
    UnitFilesChanged,
    /// A daemon reload started (`active = true`) or finished.
    Reloading { active: bool },
}

impl ManagerSignal {
    /// Short name for logs.
    pub fn label(&self) -> &'static str {
        match self {
            ManagerSignal::PropertiesChanged { .. } => "properties-changed",
            ManagerSignal::UnitNew { .. } => "unit-new",
            ManagerSignal::UnitRemoved { .. } => "unit-removed",
            ManagerSignal::UnitFilesChanged => "unit-files-changed",
            ManagerSignal::Reloading { active: true } => "reload-started",
            ManagerSignal::Reloading { active: false } => "reload-finished",
        }
    }
}

impl fmt::Display for ManagerSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManagerSignal::PropertiesChanged { path, changed } => {
                write!(f, "{} {path} ({} properties)", self.label(), changed.len())
            }
            ManagerSignal::UnitNew { name, .. } | ManagerSignal::UnitRemoved { name, .. } => {
                write!(f, "{} {name}", self.label())
            }
            _ => f.write_str(self.label()),
        }
    }
}
