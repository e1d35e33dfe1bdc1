//! Discovery: turning provider list calls into canonical graph batches.
//!
//! Per-service fetchers ([`ResourceFetcher`]) return raw JSON records. The
//! [`GenericDiscoveryAdapter`] is instantiated once per provider account from a
//! [`ProviderProfile`] and turns those records into nodes and edges, with
//! status, cost and workload normalization. Fetch failures are collected as
//! [`DiscoveryError`] values; discovery itself never fails.

pub mod adapter;
pub mod instrument;
pub mod profile;
pub mod providers;
pub mod registry;

pub use adapter::GenericDiscoveryAdapter;
pub use instrument::InstrumentedFetcher;
pub use profile::{CostSource, GLOBAL_REGION, ProviderProfile, ResourceKind, Workload};
pub use registry::{CapabilityRegistry, ProbeReport};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

use crate::config::DiscoveryConfig;
use crate::error::{DiscoveryError, FetchError};
use crate::types::{GraphEdge, GraphNode, ResourceType, ScanScope};

/// Options for one discovery run.
#[derive(Debug, Clone, Default)]
pub struct DiscoverOptions {
    /// Restrict to these resource types. `None` scans every supported type.
    pub resource_types: Option<Vec<ResourceType>>,
    /// Keep only resources carrying all of these tags.
    pub tags: HashMap<String, String>,
    /// Stop after this many nodes.
    pub limit: Option<usize>,
    /// Checked between resources; a cancelled scan returns what it has.
    pub cancel: Option<CancellationToken>,
}

impl DiscoverOptions {
    pub fn with_resource_types(mut self, types: Vec<ResourceType>) -> Self {
        self.resource_types = Some(types);
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|c| c.is_cancelled())
    }
}

impl From<&DiscoveryConfig> for DiscoverOptions {
    fn from(config: &DiscoveryConfig) -> Self {
        Self {
            resource_types: (!config.resource_types.is_empty())
                .then(|| config.resource_types.clone()),
            tags: config.tags.clone(),
            limit: config.limit,
            cancel: None,
        }
    }
}

/// One complete discovery batch from one adapter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryResult {
    pub provider: String,
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    pub errors: Vec<DiscoveryError>,
    pub duration_ms: u64,
    /// Scopes whose full contents were observed. Only these can produce
    /// disappearance and edge-removal changes.
    #[serde(default)]
    pub covered: Vec<ScanScope>,
}

impl DiscoveryResult {
    pub fn empty(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            ..Default::default()
        }
    }

    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }
}

/// A per-provider discovery adapter.
#[async_trait]
pub trait DiscoveryAdapter: Send + Sync {
    /// Lowercase provider name (`aws`, `azure`, `gcp`).
    fn provider(&self) -> &str;

    /// Run a full scan. Never fails; problems are reported in `errors`.
    async fn discover(&self, options: DiscoverOptions) -> DiscoveryResult;

    /// Whether the provider is reachable with the configured credentials.
    async fn health_check(&self) -> bool;

    fn supports_incremental_sync(&self) -> bool {
        false
    }

    fn supported_resource_types(&self) -> Vec<ResourceType>;
}

/// A per-service client that lists raw resource records.
#[async_trait]
pub trait ResourceFetcher: Send + Sync {
    /// Service name matched against [`ResourceKind::service`].
    fn service(&self) -> &str;

    /// List every record of `resource_type` in `region`.
    async fn list(&self, resource_type: &str, region: &str) -> Result<Vec<Value>, FetchError>;

    async fn health_check(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_builders() {
        let token = CancellationToken::new();
        let opts = DiscoverOptions::default()
            .with_resource_types(vec!["compute".into()])
            .with_tag("env", "prod")
            .with_limit(10)
            .with_cancel(token.clone());
        assert_eq!(opts.limit, Some(10));
        assert!(!opts.is_cancelled());
        token.cancel();
        assert!(opts.is_cancelled());
    }

    #[test]
    fn test_options_from_config() {
        let opts = DiscoverOptions::from(&DiscoveryConfig::default());
        assert!(opts.resource_types.is_none());
        assert!(opts.tags.is_empty());
        assert!(opts.limit.is_none());

        let config = DiscoveryConfig {
            resource_types: vec!["compute".into(), "database".into()],
            tags: HashMap::from([("env".to_string(), "prod".to_string())]),
            limit: Some(25),
            ..Default::default()
        };
        let opts = DiscoverOptions::from(&config);
        assert_eq!(
            opts.resource_types,
            Some(vec!["compute".to_string(), "database".to_string()])
        );
        assert_eq!(opts.tags.get("env").map(String::as_str), Some("prod"));
        assert_eq!(opts.limit, Some(25));
        assert!(!opts.is_cancelled());
    }

    #[test]
    fn test_empty_result_is_complete() {
        let result = DiscoveryResult::empty("aws");
        assert!(result.is_complete());
        assert!(result.nodes.is_empty());
    }
}
