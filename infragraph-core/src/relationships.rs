//! Relationship rule engine: table-driven edge inference.
//!
//! Every provider adapter feeds its batch of raw resources through the same
//! engine. A rule names a source resource type and a field path; each value
//! found at that path is canonicalized with [`extract_resource_id`] and looked
//! up among the nodes of the *current* batch. Unmatched targets are dropped,
//! so the engine never produces a dangling edge.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::resolver::{FieldPath, scalar_to_string};
use crate::types::{DiscoveredVia, GraphEdge};

/// Canonicalize a provider identifier to its bare resource id.
///
/// - ARN `arn:aws:ec2:region:acct:instance/i-abc` → `i-abc`
/// - IAM `arn:aws:iam::acct:role/path/name` → `name`
/// - ARN with `:`-separated resource (`...:function:fn`) → `fn`
/// - URL or path style (`https://.../instances/vm-1`, `/subscriptions/.../vnet1`) → last segment
/// - anything else passes through unchanged
pub fn extract_resource_id(identifier: &str) -> String {
    let trimmed = identifier.trim();
    if let Some(rest) = trimmed.strip_prefix("arn:") {
        // arn:partition:service:region:account:resource
        let resource = rest.splitn(5, ':').nth(4).unwrap_or(rest);
        if let Some(last) = resource.rsplit('/').find(|s| !s.is_empty())
            && resource.contains('/')
        {
            return last.to_string();
        }
        if let Some(last) = resource.rsplit(':').find(|s| !s.is_empty()) {
            return last.to_string();
        }
        return resource.to_string();
    }
    if trimmed.contains("://") || trimmed.starts_with('/') {
        let without_query = trimmed.split(['?', '#']).next().unwrap_or(trimmed);
        if let Some(last) = without_query.rsplit('/').find(|s| !s.is_empty()) {
            return last.to_string();
        }
    }
    trimmed.to_string()
}

fn default_confidence() -> f64 {
    0.95
}

fn default_discovered_via() -> DiscoveredVia {
    DiscoveredVia::ApiField
}

/// Serializable definition of a relationship rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipRuleDef {
    pub source_resource_type: String,
    pub field: String,
    pub relationship_type: String,
    #[serde(default)]
    pub is_array: bool,
    #[serde(default)]
    pub bidirectional: bool,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default = "default_discovered_via")]
    pub discovered_via: DiscoveredVia,
}

/// A relationship rule with its field path parsed once.
#[derive(Debug, Clone)]
pub struct RelationshipRule {
    pub source_resource_type: String,
    pub field: FieldPath,
    pub relationship_type: String,
    /// When false only the first resolved value is used.
    pub is_array: bool,
    pub bidirectional: bool,
    pub confidence: f64,
    pub discovered_via: DiscoveredVia,
}

impl RelationshipRule {
    pub fn new(source_resource_type: &str, field: &str, relationship_type: &str) -> Self {
        Self {
            source_resource_type: source_resource_type.to_string(),
            field: FieldPath::parse(field),
            relationship_type: relationship_type.to_string(),
            is_array: false,
            bidirectional: false,
            confidence: default_confidence(),
            discovered_via: default_discovered_via(),
        }
    }

    pub fn array(mut self) -> Self {
        self.is_array = true;
        self
    }

    pub fn bidirectional(mut self) -> Self {
        self.bidirectional = true;
        self
    }

    pub fn via(mut self, discovered_via: DiscoveredVia) -> Self {
        self.discovered_via = discovered_via;
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }
}

impl From<RelationshipRuleDef> for RelationshipRule {
    fn from(def: RelationshipRuleDef) -> Self {
        Self {
            source_resource_type: def.source_resource_type,
            field: FieldPath::parse(&def.field),
            relationship_type: def.relationship_type,
            is_array: def.is_array,
            bidirectional: def.bidirectional,
            confidence: def.confidence.clamp(0.0, 1.0),
            discovered_via: def.discovered_via,
        }
    }
}

/// A raw resource after it has been assigned a node id.
#[derive(Debug, Clone)]
pub struct BatchResource<'a> {
    pub node_id: &'a str,
    pub resource_type: &'a str,
    pub native_id: &'a str,
    /// Extra raw identifiers (ARN, self link, ...) that refer to this node.
    pub aliases: &'a [String],
    pub raw: &'a Value,
}

/// Lookup from raw provider identifier to assigned node id.
#[derive(Debug, Default)]
pub struct NodeIndex {
    by_identifier: HashMap<String, String>,
}

impl NodeIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every identifier form a node can be referenced by.
    pub fn insert(&mut self, node_id: &str, native_id: &str, aliases: &[String]) {
        for ident in std::iter::once(native_id).chain(aliases.iter().map(String::as_str)) {
            if ident.is_empty() {
                continue;
            }
            self.by_identifier
                .entry(ident.to_string())
                .or_insert_with(|| node_id.to_string());
            self.by_identifier
                .entry(extract_resource_id(ident))
                .or_insert_with(|| node_id.to_string());
        }
    }

    /// Resolve a raw reference to a node id in this batch.
    pub fn resolve(&self, reference: &str) -> Option<&str> {
        self.by_identifier
            .get(reference)
            .or_else(|| self.by_identifier.get(&extract_resource_id(reference)))
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_identifier.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_identifier.is_empty()
    }
}

/// Infers edges for a discovery batch from a rule table.
#[derive(Debug, Clone, Default)]
pub struct RelationshipEngine {
    rules: Vec<RelationshipRule>,
}

impl RelationshipEngine {
    pub fn new(rules: Vec<RelationshipRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[RelationshipRule] {
        &self.rules
    }

    pub fn add_rule(&mut self, rule: RelationshipRule) {
        self.rules.push(rule);
    }

    /// Infer edges for one raw resource against the batch index.
    pub fn infer_for(&self, resource: &BatchResource<'_>, index: &NodeIndex) -> Vec<GraphEdge> {
        let mut edges = Vec::new();
        for rule in self
            .rules
            .iter()
            .filter(|r| r.source_resource_type == resource.resource_type)
        {
            let values = rule.field.resolve(resource.raw);
            let take = if rule.is_array { values.len() } else { 1 };
            for value in values.iter().take(take) {
                let Some(reference) = scalar_to_string(value) else {
                    continue;
                };
                let Some(target) = index.resolve(&reference) else {
                    debug!(
                        source = resource.node_id,
                        reference = %reference,
                        rule = %rule.field,
                        "Dropping relationship to node outside batch"
                    );
                    continue;
                };
                if target == resource.node_id {
                    continue;
                }
                edges.push(GraphEdge::new(
                    resource.node_id,
                    &rule.relationship_type,
                    target,
                    rule.confidence,
                    rule.discovered_via,
                ));
                if rule.bidirectional {
                    edges.push(GraphEdge::new(
                        target,
                        &rule.relationship_type,
                        resource.node_id,
                        rule.confidence,
                        rule.discovered_via,
                    ));
                }
            }
        }
        edges
    }

    /// Infer all edges for a batch, deduplicated by edge id.
    pub fn infer(&self, batch: &[BatchResource<'_>]) -> Vec<GraphEdge> {
        let mut index = NodeIndex::new();
        for resource in batch {
            index.insert(resource.node_id, resource.native_id, resource.aliases);
        }
        let mut seen = HashSet::new();
        batch
            .iter()
            .flat_map(|resource| self.infer_for(resource, &index))
            .filter(|edge| seen.insert(edge.id.clone()))
            .collect()
    }
}
