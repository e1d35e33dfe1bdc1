//! Capability registry: which per-service fetchers exist for each provider.
//!
//! Fetchers are registered explicitly at startup, then [`CapabilityRegistry::probe`]
//! health-checks each one once. Adapters resolve their fetchers from the
//! registry when they are constructed; nothing is looked up later.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

use super::{InstrumentedFetcher, ResourceFetcher};
use crate::events::EventBus;

type Key = (String, String);

/// Outcome of probing every registered fetcher.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeReport {
    /// `(provider, service)` pairs that passed their health check.
    pub available: Vec<(String, String)>,
    pub unavailable: Vec<(String, String)>,
}

/// Registry of fetchers keyed by provider and service.
#[derive(Default)]
pub struct CapabilityRegistry {
    fetchers: BTreeMap<Key, Arc<dyn ResourceFetcher>>,
    unavailable: BTreeSet<Key>,
    bus: Option<EventBus>,
}

impl fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("fetchers", &self.fetchers.keys().collect::<Vec<_>>())
            .field("unavailable", &self.unavailable)
            .finish()
    }
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap every fetcher registered from now on in an [`InstrumentedFetcher`].
    pub fn with_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Register a fetcher for `provider` under its own service name.
    /// A later registration for the same service replaces the earlier one.
    pub fn register(&mut self, provider: &str, fetcher: Arc<dyn ResourceFetcher>) {
        let provider = provider.to_ascii_lowercase();
        let fetcher: Arc<dyn ResourceFetcher> = match &self.bus {
            Some(bus) => Arc::new(InstrumentedFetcher::new(&provider, fetcher, bus.clone())),
            None => fetcher,
        };
        let key = (provider, fetcher.service().to_string());
        self.unavailable.remove(&key);
        self.fetchers.insert(key, fetcher);
    }

    /// Health-check every registered fetcher. Fetchers that fail are no
    /// longer resolved.
    pub async fn probe(&mut self) -> ProbeReport {
        let checks = self.fetchers.iter().map(|(key, fetcher)| {
            let key = key.clone();
            let fetcher = Arc::clone(fetcher);
            async move { (key, fetcher.health_check().await) }
        });
        let results = futures::future::join_all(checks).await;

        let mut report = ProbeReport::default();
        for (key, healthy) in results {
            if healthy {
                self.unavailable.remove(&key);
                report.available.push(key);
            } else {
                warn!(provider = %key.0, service = %key.1, "Fetcher failed health probe");
                self.unavailable.insert(key.clone());
                report.unavailable.push(key);
            }
        }
        info!(
            available = report.available.len(),
            unavailable = report.unavailable.len(),
            "Capability probe complete"
        );
        report
    }

    /// Resolve the fetcher for a provider's service, if it is usable.
    pub fn resolve(&self, provider: &str, service: &str) -> Option<Arc<dyn ResourceFetcher>> {
        let key = (provider.to_ascii_lowercase(), service.to_string());
        if self.unavailable.contains(&key) {
            return None;
        }
        self.fetchers.get(&key).cloned()
    }

    /// Usable services registered for `provider`.
    pub fn services(&self, provider: &str) -> Vec<String> {
        let provider = provider.to_ascii_lowercase();
        self.fetchers
            .keys()
            .filter(|k| k.0 == provider && !self.unavailable.contains(*k))
            .map(|k| k.1.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.fetchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fetchers.is_empty()
    }
}
