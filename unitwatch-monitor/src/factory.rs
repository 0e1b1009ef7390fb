//! Kind → facade-factory table.
//!
//! Reconciliation looks the listed kind up here instead of branching on it,
//! so supporting a new kind means registering one more factory.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use unitwatch_core::{FacadeFactory, RemoteError, UnitHandle, UnitKind, UnitName};

#[derive(Clone, Default)]
pub struct HandleFactory {
    constructors: HashMap<UnitKind, Arc<dyn FacadeFactory>>,
}

impl HandleFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// One factory serving every kind.
    pub fn uniform<F: FacadeFactory + 'static>(factory: Arc<F>) -> Self {
        let factory: Arc<dyn FacadeFactory> = factory;
        Self {
            constructors: UnitKind::ALL
                .into_iter()
                .map(|kind| (kind, Arc::clone(&factory)))
                .collect(),
        }
    }

    /// Register (or replace) the factory for `kind`.
    pub fn register(mut self, kind: UnitKind, factory: Arc<dyn FacadeFactory>) -> Self {
        self.constructors.insert(kind, factory);
        self
    }

    pub fn supports(&self, kind: UnitKind) -> bool {
        self.constructors.contains_key(&kind)
    }

    /// Build a handle for `name`. `Ok(None)` when no factory is registered
    /// for `kind`.
    pub async fn resolve(
        &self,
        name: UnitName,
        kind: UnitKind,
    ) -> Result<Option<UnitHandle>, RemoteError> {
        let Some(factory) = self.constructors.get(&kind) else {
            return Ok(None);
        };
        let facade = factory.create(&name, kind).await?;
        Ok(Some(UnitHandle::new(name, kind, facade)))
    }
}

impl fmt::Debug for HandleFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.constructors.keys().collect();
        kinds.sort();
        f.debug_struct("HandleFactory").field("kinds", &kinds).finish()
    }
}
