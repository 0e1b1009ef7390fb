//! Membership policies for [`crate::UnitMonitor`].
//!
//! A selector decides which listed units belong in the registry. The engine
//! holds the selector under the same lock as the registry, so a selector
//! change and the reconciliation that follows are never interleaved with
//! another reconciliation.

use std::collections::BTreeSet;

use unitwatch_core::{UnitKind, UnitName};

/// Decides registry membership for listed units.
pub trait UnitSelector: Send + Sync + 'static {
    /// `true` if the unit should be monitored.
    fn selects(&self, name: &UnitName, kind: UnitKind) -> bool;

    /// Whether unit-new / unit-removed notifications should trigger a
    /// reconciliation. Reload and unit-files-changed always do.
    fn reconciles_on_unit_churn(&self) -> bool {
        false
    }
}

/// Selects units by kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KindFilter {
    kinds: BTreeSet<UnitKind>,
}

impl KindFilter {
    pub fn new(kinds: impl IntoIterator<Item = UnitKind>) -> Self {
        Self {
            kinds: kinds.into_iter().collect(),
        }
    }

    pub fn insert(&mut self, kinds: impl IntoIterator<Item = UnitKind>) {
        self.kinds.extend(kinds);
    }

    pub fn remove(&mut self, kinds: impl IntoIterator<Item = UnitKind>) {
        for kind in kinds {
            self.kinds.remove(&kind);
        }
    }

    pub fn contains(&self, kind: UnitKind) -> bool {
        self.kinds.contains(&kind)
    }

    pub fn kinds(&self) -> &BTreeSet<UnitKind> {
        &self.kinds
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}

impl UnitSelector for KindFilter {
    fn selects(&self, _name: &UnitName, kind: UnitKind) -> bool {
        self.kinds.contains(&kind)
    }

    fn reconciles_on_unit_churn(&self) -> bool {
        true
    }
}

/// Selects units by normalized name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameFilter {
    names: BTreeSet<UnitName>,
}

impl NameFilter {
    pub fn new(names: impl IntoIterator<Item = UnitName>) -> Self {
        Self {
            names: names.into_iter().collect(),
        }
    }

    pub fn insert(&mut self, names: impl IntoIterator<Item = UnitName>) {
        self.names.extend(names);
    }

    pub fn remove<'a>(&mut self, names: impl IntoIterator<Item = &'a UnitName>) {
        for name in names {
            self.names.remove(name);
        }
    }

    pub fn contains(&self, name: &UnitName) -> bool {
        self.names.contains(name)
    }

    pub fn names(&self) -> &BTreeSet<UnitName> {
        &self.names
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl UnitSelector for NameFilter {
    fn selects(&self, name: &UnitName, _kind: UnitKind) -> bool {
        self.names.contains(name)
    }

    fn reconciles_on_unit_churn(&self) -> bool {
        true
    }
}
