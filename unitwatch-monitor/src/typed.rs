//! Kind-filtered monitor.

use std::collections::BTreeSet;
use std::sync::Arc;

use unitwatch_core::{FacadeFactory, NotificationChannel, UnitDirectory, UnitKind};

use crate::error::MonitorError;
use crate::monitor::UnitMonitor;
use crate::selector::KindFilter;

impl UnitMonitor<KindFilter> {
    /// Monitor with an empty kind filter over a single backend.
    pub fn typed<B>(backend: Arc<B>) -> Self
    where
        B: UnitDirectory + NotificationChannel + FacadeFactory + 'static,
    {
        Self::with_backend(KindFilter::default(), backend)
    }

    /// Add `kinds` to the filter and reconcile before returning.
    ///
    /// If the reconciliation fails the filter keeps the new kinds and the
    /// registry keeps its previous snapshot.
    pub async fn add_monitored_kinds(
        &self,
        kinds: impl IntoIterator<Item = UnitKind>,
    ) -> Result<(), MonitorError> {
        let kinds: Vec<UnitKind> = kinds.into_iter().collect();
        tracing::debug!(?kinds, "adding monitored kinds");
        self.update_selector(|filter| filter.insert(kinds)).await
    }

    /// Remove `kinds` from the filter and reconcile before returning.
    pub async fn remove_monitored_kinds(
        &self,
        kinds: impl IntoIterator<Item = UnitKind>,
    ) -> Result<(), MonitorError> {
        let kinds: Vec<UnitKind> = kinds.into_iter().collect();
        tracing::debug!(?kinds, "removing monitored kinds");
        self.update_selector(|filter| filter.remove(kinds)).await
    }

    pub async fn monitored_kinds(&self) -> BTreeSet<UnitKind> {
        self.inner.state.read().await.selector.kinds().clone()
    }
}
