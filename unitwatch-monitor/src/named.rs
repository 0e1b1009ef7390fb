//! Name-filtered monitor.

use std::collections::BTreeSet;
use std::sync::Arc;

use unitwatch_core::{FacadeFactory, NotificationChannel, UnitDirectory, UnitName};

use crate::error::MonitorError;
use crate::monitor::UnitMonitor;
use crate::selector::NameFilter;

impl UnitMonitor<NameFilter> {
    /// Monitor with an empty name set over a single backend.
    pub fn named<B>(backend: Arc<B>) -> Self
    where
        B: UnitDirectory + NotificationChannel + FacadeFactory + 'static,
    {
        Self::with_backend(NameFilter::default(), backend)
    }

    /// Start monitoring `names` and reconcile before returning.
    ///
    /// Names are normalized first; one invalid name rejects the whole call
    /// and leaves the filter untouched.
    pub async fn add_monitored_units<'a>(
        &self,
        names: impl IntoIterator<Item = &'a str>,
    ) -> Result<(), MonitorError> {
        let names = normalize_all(names)?;
        tracing::debug!(count = names.len(), "adding monitored units");
        self.update_selector(|filter| filter.insert(names)).await
    }

    /// Stop monitoring `names` and reconcile before returning.
    pub async fn remove_monitored_units<'a>(
        &self,
        names: impl IntoIterator<Item = &'a str>,
    ) -> Result<(), MonitorError> {
        let names = normalize_all(names)?;
        tracing::debug!(count = names.len(), "removing monitored units");
        self.update_selector(|filter| filter.remove(&names)).await
    }

    /// The requested names, whether or not the daemon currently lists them.
    pub async fn monitored_names(&self) -> BTreeSet<UnitName> {
        self.inner.state.read().await.selector.names().clone()
    }
}

fn normalize_all<'a>(names: impl IntoIterator<Item = &'a str>) -> Result<Vec<UnitName>, MonitorError> {
    names
        .into_iter()
        .map(|name| UnitName::normalize(name).map_err(MonitorError::from))
        .collect()
}
