//! Handles to monitored units.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::RemoteError;
use crate::remote::UnitFacade;
use crate::types::{ObjectPath, PropertyMap, UnitKind, UnitLifecycle, UnitName};

/// Reference to one remote unit, owned by the registry that resolved it.
///
/// Properties are not cached; every read goes through the facade.
#[derive(Clone)]
pub struct UnitHandle {
    name: UnitName,
    kind: UnitKind,
    path: ObjectPath,
    resolved_at: DateTime<Utc>,
    facade: Arc<dyn UnitFacade>,
}

impl UnitHandle {
    pub fn new(name: UnitName, kind: UnitKind, facade: Arc<dyn UnitFacade>) -> Self {
        let path = facade.object_path().clone();
        Self {
            name,
            kind,
            path,
            resolved_at: Utc::now(),
            facade,
        }
    }

    pub fn name(&self) -> &UnitName {
        &self.name
    }

    pub fn kind(&self) -> UnitKind {
        self.kind
    }

    pub fn object_path(&self) -> &ObjectPath {
        &self.path
    }

    /// When the registry built this handle.
    pub fn resolved_at(&self) -> DateTime<Utc> {
        self.resolved_at
    }

    pub fn facade(&self) -> &Arc<dyn UnitFacade> {
        &self.facade
    }

    pub async fn properties(&self) -> Result<PropertyMap, RemoteError> {
        self.facade.properties().await
    }

    /// Current active/load/sub state, read through the facade.
    pub async fn lifecycle(&self) -> Result<UnitLifecycle, RemoteError> {
        let properties = self.facade.properties().await?;
        Ok(UnitLifecycle::from_properties(&properties))
    }
}

impl fmt::Debug for UnitHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitHandle")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("path", &self.path)
            .field("resolved_at", &self.resolved_at)
            .finish_non_exhaustive()
    }
}
