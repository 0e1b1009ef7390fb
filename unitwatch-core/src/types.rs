//! Domain types for the unit registry.
//!
//! [`UnitName`] is always normalized: constructing one goes through
//! [`UnitName::normalize`] or [`UnitName::with_kind`], so two names that refer
//! to the same unit compare equal.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::NameError;
use crate::naming;

/// Changed-property payload of a property-change notification.
pub type PropertyMap = BTreeMap<String, serde_json::Value>;

/// Names of the unit properties that define its externally visible phase.
pub mod property {
    pub const ACTIVE_STATE: &str = "ActiveState";
    pub const LOAD_STATE: &str = "LoadState";
    pub const SUB_STATE: &str = "SubState";

    /// The three lifecycle properties, in a fixed order.
    pub const LIFECYCLE: [&str; 3] = [ACTIVE_STATE, LOAD_STATE, SUB_STATE];

    /// `true` when `changed` carries at least one lifecycle property.
    pub fn touches_lifecycle(changed: &super::PropertyMap) -> bool {
        LIFECYCLE.iter().any(|key| changed.contains_key(*key))
    }
}

// ---------------------------------------------------------------------------
// Unit kinds
// ---------------------------------------------------------------------------

/// The kind of a unit, derived from its name suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitKind {
    Automount,
    Busname,
    Device,
    Mount,
    Path,
    Scope,
    Service,
    Slice,
    Snapshot,
    Socket,
    Swap,
    Target,
    Timer,
}

impl UnitKind {
    pub const ALL: [UnitKind; 13] = [
        UnitKind::Automount,
        UnitKind::Busname,
        UnitKind::Device,
        UnitKind::Mount,
        UnitKind::Path,
        UnitKind::Scope,
        UnitKind::Service,
        UnitKind::Slice,
        UnitKind::Snapshot,
        UnitKind::Socket,
        UnitKind::Swap,
        UnitKind::Target,
        UnitKind::Timer,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            UnitKind::Automount => "automount",
            UnitKind::Busname => "busname",
            UnitKind::Device => "device",
            UnitKind::Mount => "mount",
            UnitKind::Path => "path",
            UnitKind::Scope => "scope",
            UnitKind::Service => "service",
            UnitKind::Slice => "slice",
            UnitKind::Snapshot => "snapshot",
            UnitKind::Socket => "socket",
            UnitKind::Swap => "swap",
            UnitKind::Target => "target",
            UnitKind::Timer => "timer",
        }
    }

    /// The name suffix including the dot, e.g. `.service`.
    pub fn suffix(self) -> String {
        format!(".{}", self.as_str())
    }

    /// Kind encoded in a unit name's suffix, if it has a known one.
    pub fn from_unit_name(name: &str) -> Option<UnitKind> {
        let (stem, suffix) = name.rsplit_once('.')?;
        if stem.is_empty() {
            return None;
        }
        suffix.parse().ok()
    }
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UnitKind {
    type Err = NameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        UnitKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == lower)
            .ok_or_else(|| NameError::UnknownKind(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Names and object paths
// ---------------------------------------------------------------------------

/// A normalized unit name, the registry key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct UnitName(String);

impl UnitName {
    /// Normalize `raw`, defaulting to the `service` kind when it carries no
    /// known suffix.
    pub fn normalize(raw: &str) -> Result<Self, NameError> {
        Self::with_kind(raw, UnitKind::Service)
    }

    /// Normalize `raw`: trim, mangle characters that are invalid in unit
    /// names, and append `kind`'s suffix unless a known suffix is present.
    pub fn with_kind(raw: &str, kind: UnitKind) -> Result<Self, NameError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(NameError::Empty);
        }
        let mut name = naming::mangle(trimmed);
        if UnitKind::from_unit_name(&name).is_none() {
            name.push_str(&kind.suffix());
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Kind taken from the suffix. Normalized names always carry one.
    pub fn kind(&self) -> UnitKind {
        UnitKind::from_unit_name(&self.0).unwrap_or(UnitKind::Service)
    }
}

impl fmt::Display for UnitName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for UnitName {
    type Err = NameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::normalize(s)
    }
}

impl<'de> Deserialize<'de> for UnitName {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::normalize(&raw).map_err(serde::de::Error::custom)
    }
}

impl AsRef<str> for UnitName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Locator of a remote unit object on the bus.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectPath(pub String);

impl ObjectPath {
    pub const UNIT_PREFIX: &'static str = "/org/freedesktop/systemd1/unit/";

    /// Object path of a unit: the prefix plus the bus-label-escaped name.
    pub fn for_unit(name: &UnitName) -> Self {
        Self(format!(
            "{}{}",
            Self::UNIT_PREFIX,
            naming::escape_bus_label(name.as_str())
        ))
    }

    /// Unit name encoded in this path, if it is a unit object path.
    pub fn unit_name(&self) -> Option<String> {
        let label = self.0.strip_prefix(Self::UNIT_PREFIX)?;
        if label.is_empty() || label.contains('/') {
            return None;
        }
        naming::unescape_bus_label(label)
    }
}

impl fmt::Display for ObjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for ObjectPath {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// One row of the daemon's unit listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitListing {
    pub name: String,
    pub kind: UnitKind,
}

impl UnitListing {
    pub fn new(name: impl Into<String>, kind: UnitKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

// ---------------------------------------------------------------------------
// Lifecycle states
// ---------------------------------------------------------------------------

/// Value of the `ActiveState` property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActiveState {
    Active,
    Reloading,
    Inactive,
    Failed,
    Activating,
    Deactivating,
    Maintenance,
    Refreshing,
    Other(String),
}

impl From<&str> for ActiveState {
    fn from(s: &str) -> Self {
        match s {
            "active" => ActiveState::Active,
            "reloading" => ActiveState::Reloading,
            "inactive" => ActiveState::Inactive,
            "failed" => ActiveState::Failed,
            "activating" => ActiveState::Activating,
            "deactivating" => ActiveState::Deactivating,
            "maintenance" => ActiveState::Maintenance,
            "refreshing" => ActiveState::Refreshing,
            other => ActiveState::Other(other.to_string()),
        }
    }
}

/// Value of the `LoadState` property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadState {
    Stub,
    Loaded,
    NotFound,
    BadSetting,
    Error,
    Merged,
    Masked,
    Other(String),
}

impl From<&str> for LoadState {
    fn from(s: &str) -> Self {
        match s {
            "stub" => LoadState::Stub,
            "loaded" => LoadState::Loaded,
            "not-found" => LoadState::NotFound,
            "bad-setting" => LoadState::BadSetting,
            "error" => LoadState::Error,
            "merged" => LoadState::Merged,
            "masked" => LoadState::Masked,
            other => LoadState::Other(other.to_string()),
        }
    }
}

/// The lifecycle fields present in a property payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnitLifecycle {
    pub active: Option<ActiveState>,
    pub load: Option<LoadState>,
    pub sub: Option<String>,
}

impl UnitLifecycle {
    /// Pick the lifecycle fields out of a (possibly partial) property map.
    /// Non-string values are ignored.
    pub fn from_properties(properties: &PropertyMap) -> Self {
        let text = |key: &str| properties.get(key).and_then(|v| v.as_str());
        Self {
            active: text(property::ACTIVE_STATE).map(ActiveState::from),
            load: text(property::LOAD_STATE).map(LoadState::from),
            sub: text(property::SUB_STATE).map(str::to_owned),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_none() && self.load.is_none() && self.sub.is_none()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
