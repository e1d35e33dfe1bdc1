//! The generic, profile-driven discovery adapter.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::profile::{GLOBAL_REGION, ProviderProfile, ResourceKind, owner_from_tags};
use super::providers::builtin_profile;
use super::{CapabilityRegistry, DiscoverOptions, DiscoveryAdapter, DiscoveryResult, ResourceFetcher};
use crate::config::{DiscoveryConfig, ProviderConfig};
use crate::error::{ConfigError, DiscoveryError};
use crate::events::{EventBus, GraphEvent};
use crate::relationships::{BatchResource, RelationshipEngine, RelationshipRule, RelationshipRuleDef};
use crate::types::{GraphNode, ResourceType, ScanScope};

/// A raw record that became a node, kept until edges are inferred.
struct Observed {
    node: GraphNode,
    raw: Value,
    aliases: Vec<String>,
}

/// Discovery adapter for one provider account, driven by a [`ProviderProfile`].
pub struct GenericDiscoveryAdapter {
    profile: Arc<ProviderProfile>,
    account: String,
    regions: Vec<String>,
    /// Service name to fetcher, resolved once at construction.
    fetchers: HashMap<String, Arc<dyn ResourceFetcher>>,
    engine: RelationshipEngine,
    bus: Option<EventBus>,
}

impl GenericDiscoveryAdapter {
    /// Build an adapter, resolving one fetcher per service the profile needs.
    pub fn new(
        profile: ProviderProfile,
        account: impl Into<String>,
        regions: Vec<String>,
        registry: &CapabilityRegistry,
    ) -> Self {
        let mut fetchers = HashMap::new();
        for kind in &profile.kinds {
            if fetchers.contains_key(&kind.service) {
                continue;
            }
            if let Some(fetcher) = registry.resolve(&profile.provider, &kind.service) {
                fetchers.insert(kind.service.clone(), fetcher);
            }
        }
        let engine = RelationshipEngine::new(profile.rules.clone());
        Self {
            profile: Arc::new(profile),
            account: account.into(),
            regions,
            fetchers,
            engine,
            bus: None,
        }
    }

    /// Build an adapter for one configured provider account from its
    /// built-in profile plus the configured extra relationship rules.
    pub fn from_config(
        provider: &ProviderConfig,
        extra_rules: &[RelationshipRuleDef],
        registry: &CapabilityRegistry,
    ) -> Result<Self, ConfigError> {
        let profile = builtin_profile(&provider.provider).ok_or_else(|| ConfigError::Invalid {
            message: format!("no built-in profile for provider '{}'", provider.provider),
        })?;
        Ok(Self::new(profile, &provider.account, provider.regions.clone(), registry)
            .with_rules(extra_rules.iter().cloned().map(Into::into)))
    }

    /// One adapter per enabled provider in the `[discovery]` section.
    pub fn all_from_config(
        config: &DiscoveryConfig,
        registry: &CapabilityRegistry,
    ) -> Result<Vec<Self>, ConfigError> {
        config
            .providers
            .iter()
            .filter(|p| p.enabled)
            .map(|p| Self::from_config(p, &config.extra_rules, registry))
            .collect()
    }

    pub fn with_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Append rules to the profile's built-in relationship table.
    pub fn with_rules(mut self, rules: impl IntoIterator<Item = RelationshipRule>) -> Self {
        for rule in rules {
            self.engine.add_rule(rule);
        }
        self
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn regions(&self) -> &[String] {
        &self.regions
    }

    fn regions_for(&self, kind: &ResourceKind) -> Vec<String> {
        if kind.global {
            vec![GLOBAL_REGION.to_string()]
        } else {
            self.regions.clone()
        }
    }

    /// Kinds selected by `options` that have a fetcher and somewhere to look.
    fn collectible_kinds(&self, options: &DiscoverOptions) -> Vec<&ResourceKind> {
        self.profile
            .kinds
            .iter()
            .filter(|k| {
                options
                    .resource_types
                    .as_ref()
                    .is_none_or(|types| types.contains(&k.resource_type))
            })
            .filter(|k| self.fetchers.contains_key(&k.service))
            .filter(|k| k.global || !self.regions.is_empty())
            .collect()
    }

    /// Normalize one raw record into a node. `None` if it has no id.
    fn normalize(&self, kind: &ResourceKind, region: &str, raw: &Value) -> Option<GraphNode> {
        let native_id = kind.native_id(raw)?;
        let tags = kind.tag_map(raw);
        let name = kind
            .display_name(raw, &tags)
            .unwrap_or_else(|| native_id.clone());
        let status = self.profile.normalize_status(kind.raw_status(raw).as_deref());
        let size = kind.size_key(raw);

        let mut node = GraphNode::new(
            &self.profile.provider,
            &self.account,
            region,
            &kind.resource_type,
            native_id,
        )
        .with_name(name)
        .with_status(status)
        .with_metadata("service", kind.service.as_str());
        node.created_at = kind.created_at_value(raw);
        node.owner = owner_from_tags(&tags);
        node.tags = tags;

        if let Some(size) = &size {
            node.metadata.insert("size".into(), Value::from(size.as_str()));
        }
        if let Some((cost, source)) = self
            .profile
            .estimate_cost(&kind.resource_type, size.as_deref())
        {
            node.cost_monthly = Some(cost);
            node.metadata
                .insert("costSource".into(), Value::from(source.as_str()));
        }
        if let Some(workload) = self.profile.classify_workload(kind, raw, size.as_deref()) {
            node.metadata
                .insert("workload".into(), Value::from(workload.as_str()));
        }
        Some(node)
    }

    fn finish(&self, mut result: DiscoveryResult, start: Instant) -> DiscoveryResult {
        result.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            provider = %result.provider,
            account = %self.account,
            nodes = result.nodes.len(),
            edges = result.edges.len(),
            errors = result.errors.len(),
            duration_ms = result.duration_ms,
            "Discovery completed"
        );
        if let Some(bus) = &self.bus {
            bus.publish(GraphEvent::DiscoveryCompleted {
                provider: result.provider.clone(),
                nodes: result.nodes.len(),
                edges: result.edges.len(),
                errors: result.errors.len(),
                duration_ms: result.duration_ms,
            });
        }
        result
    }
}

#[async_trait]
impl DiscoveryAdapter for GenericDiscoveryAdapter {
    fn provider(&self) -> &str {
        &self.profile.provider
    }

    async fn discover(&self, options: DiscoverOptions) -> DiscoveryResult {
        let start = Instant::now();
        let provider = self.profile.provider.clone();
        let mut result = DiscoveryResult::empty(&provider);

        let kinds = self.collectible_kinds(&options);
        if kinds.is_empty() {
            warn!(provider = %provider, "No collectible resource types; adapter unavailable");
            result.errors.push(DiscoveryError::adapter_unavailable(
                &provider,
                "no usable client for any requested resource type",
            ));
            return self.finish(result, start);
        }

        // A tag-filtered scan does not see everything in a scope.
        let can_cover = options.tags.is_empty();
        let at_limit = |n: usize| options.limit.is_some_and(|limit| n >= limit);
        let mut observed: Vec<Observed> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();

        for kind in kinds {
            if options.is_cancelled() {
                result
                    .errors
                    .push(DiscoveryError::cancelled(&provider, None));
                break;
            }
            if at_limit(observed.len()) {
                break;
            }
            let Some(fetcher) = self.fetchers.get(&kind.service) else {
                continue;
            };

            let calls = self.regions_for(kind).into_iter().map(|region| {
                let fetcher = Arc::clone(fetcher);
                let resource_type = kind.resource_type.clone();
                async move {
                    let outcome = fetcher.list(&resource_type, &region).await;
                    (region, outcome)
                }
            });
            let outcomes = futures::future::join_all(calls).await;

            let mut failed_regions = Vec::new();
            let mut messages = Vec::new();
            let mut cancelled = false;
            for (region, outcome) in outcomes {
                let items = match outcome {
                    Ok(items) => items,
                    Err(e) => {
                        warn!(
                            provider = %provider,
                            resource_type = %kind.resource_type,
                            region = %region,
                            error = %e,
                            "Resource type fetch failed; continuing scan"
                        );
                        failed_regions.push(region);
                        messages.push(e.to_string());
                        continue;
                    }
                };

                let mut complete = true;
                for raw in items {
                    if options.is_cancelled() {
                        cancelled = true;
                        complete = false;
                        break;
                    }
                    if at_limit(observed.len()) {
                        complete = false;
                        break;
                    }
                    let Some(node) = self.normalize(kind, &region, &raw) else {
                        debug!(
                            provider = %provider,
                            resource_type = %kind.resource_type,
                            "Skipping record without an id"
                        );
                        continue;
                    };
                    if !options
                        .tags
                        .iter()
                        .all(|(k, v)| node.tags.get(k) == Some(v))
                    {
                        continue;
                    }
                    let aliases = kind.aliases(&raw);
                    let entry = Observed { node, raw, aliases };
                    match positions.get(&entry.node.id) {
                        Some(&pos) => observed[pos] = entry,
                        None => {
                            positions.insert(entry.node.id.clone(), observed.len());
                            observed.push(entry);
                        }
                    }
                }
                if complete && can_cover {
                    result.covered.push(ScanScope::new(
                        &provider,
                        &self.account,
                        &region,
                        &kind.resource_type,
                    ));
                }
                if cancelled {
                    break;
                }
            }

            if !failed_regions.is_empty() {
                result.errors.push(DiscoveryError::fetch_failed(
                    &provider,
                    &kind.resource_type,
                    failed_regions,
                    messages.join("; "),
                ));
            }
            if cancelled {
                result.errors.push(DiscoveryError::cancelled(
                    &provider,
                    Some(kind.resource_type.clone()),
                ));
                break;
            }
        }

        let batch: Vec<BatchResource<'_>> = observed
            .iter()
            .map(|o| BatchResource {
                node_id: &o.node.id,
                resource_type: &o.node.resource_type,
                native_id: &o.node.native_id,
                aliases: &o.aliases,
                raw: &o.raw,
            })
            .collect();
        result.edges = self.engine.infer(&batch);
        result.nodes = observed.into_iter().map(|o| o.node).collect();

        self.finish(result, start)
    }

    async fn health_check(&self) -> bool {
        if self.fetchers.is_empty() {
            return false;
        }
        let checks = self.fetchers.values().map(|f| f.health_check());
        futures::future::join_all(checks).await.into_iter().any(|ok| ok)
    }

    fn supported_resource_types(&self) -> Vec<ResourceType> {
        self.profile
            .kinds
            .iter()
            .filter(|k| self.fetchers.contains_key(&k.service))
            .map(|k| k.resource_type.clone())
            .collect()
    }
}
