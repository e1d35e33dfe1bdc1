//! Graph storage: the persistence contract for nodes, edges, changes, and
//! sync records.
//!
//! Nodes and edges are upserted by deterministic id (last write wins), changes
//! and sync records are append-only. Every backend must answer "since
//! timestamp" queries and one aggregate-stats query cheap enough to run on
//! every monitor cycle.

pub mod memory;
pub mod snapshot;

pub use memory::InMemoryGraphStorage;
pub use snapshot::GraphSnapshot;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::error::StorageError;
use crate::types::{GraphChange, GraphEdge, GraphNode, GraphStats, NodeStatus, SyncRecord};

/// Result type for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Optional filters for [`GraphStorage::list_nodes`]. Unset fields match all.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeFilter {
    pub provider: Option<String>,
    pub account: Option<String>,
    pub region: Option<String>,
    pub resource_type: Option<String>,
    pub native_id: Option<String>,
    pub status: Option<NodeStatus>,
    /// Exclude disappeared nodes.
    #[serde(default)]
    pub live_only: bool,
    /// All listed tags must match exactly.
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

impl NodeFilter {
    pub fn provider(provider: impl Into<String>) -> Self {
        Self {
            provider: Some(provider.into()),
            ..Default::default()
        }
    }

    pub fn live() -> Self {
        Self {
            live_only: true,
            ..Default::default()
        }
    }

    pub fn matches(&self, node: &GraphNode) -> bool {
        fn eq(want: &Option<String>, have: &str) -> bool {
            want.as_deref().is_none_or(|w| w == have)
        }
        eq(&self.provider, &node.provider)
            && eq(&self.account, &node.account)
            && eq(&self.region, &node.region)
            && eq(&self.resource_type, &node.resource_type)
            && eq(&self.native_id, &node.native_id)
            && self.status.is_none_or(|s| s == node.status)
            && (!self.live_only || node.is_live())
            && self
                .tags
                .iter()
                .all(|(k, v)| node.tags.get(k).is_some_and(|have| have == v))
    }
}

/// Optional filters for [`GraphStorage::list_edges`]. Unset fields match all.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EdgeFilter {
    pub source_node_id: Option<String>,
    pub target_node_id: Option<String>,
    pub relationship_type: Option<String>,
    /// Edges touching this node on either end.
    pub node_id: Option<String>,
}

impl EdgeFilter {
    pub fn touching(node_id: impl Into<String>) -> Self {
        Self {
            node_id: Some(node_id.into()),
            ..Default::default()
        }
    }

    pub fn matches(&self, edge: &GraphEdge) -> bool {
        self.source_node_id
            .as_deref()
            .is_none_or(|s| s == edge.source_node_id)
            && self
                .target_node_id
                .as_deref()
                .is_none_or(|t| t == edge.target_node_id)
            && self
                .relationship_type
                .as_deref()
                .is_none_or(|r| r == edge.relationship_type)
            && self
                .node_id
                .as_deref()
                .is_none_or(|n| n == edge.source_node_id || n == edge.target_node_id)
    }
}

/// Persistence contract for the graph.
///
/// Implementations must be safe under concurrent writers: every write is
/// keyed by a deterministic id and resolves last-write-wins.
#[async_trait]
pub trait GraphStorage: Send + Sync {
    /// Insert or replace a node by id.
    async fn upsert_node(&self, node: GraphNode) -> StorageResult<()>;

    /// Insert or replace a batch of nodes.
    async fn upsert_nodes(&self, nodes: Vec<GraphNode>) -> StorageResult<()> {
        for node in nodes {
            self.upsert_node(node).await?;
        }
        Ok(())
    }

    async fn get_node(&self, id: &str) -> StorageResult<Option<GraphNode>>;

    async fn list_nodes(&self, filter: &NodeFilter) -> StorageResult<Vec<GraphNode>>;

    /// Insert or replace an edge by id.
    async fn upsert_edge(&self, edge: GraphEdge) -> StorageResult<()>;

    async fn get_edge(&self, id: &str) -> StorageResult<Option<GraphEdge>>;

    async fn list_edges(&self, filter: &EdgeFilter) -> StorageResult<Vec<GraphEdge>>;

    /// Remove an edge. Returns whether it existed.
    async fn delete_edge(&self, id: &str) -> StorageResult<bool>;

    /// Append an immutable change. Re-appending an existing id is an error.
    async fn append_change(&self, change: GraphChange) -> StorageResult<()>;

    /// Changes detected at or after `since`, ordered by detection time.
    async fn list_changes_since(&self, since: DateTime<Utc>) -> StorageResult<Vec<GraphChange>>;

    /// Every change recorded against one node or edge id, oldest first.
    async fn list_changes_for_target(&self, target_id: &str) -> StorageResult<Vec<GraphChange>>;

    /// Save a sync record. Each id is written exactly once.
    async fn save_sync_record(&self, record: SyncRecord) -> StorageResult<()>;

    /// Sync records started at or after `since`, oldest first.
    async fn list_sync_records(&self, since: DateTime<Utc>) -> StorageResult<Vec<SyncRecord>>;

    /// Aggregate snapshot of the whole graph.
    async fn get_stats(&self) -> StorageResult<GraphStats>;
}

/// Compute [`GraphStats`] from in-memory collections.
///
/// Shared by backends that hold the full graph in memory.
pub fn compute_stats<'a>(
    nodes: impl IntoIterator<Item = &'a GraphNode>,
    edges: impl IntoIterator<Item = &'a GraphEdge>,
    changes: &[GraphChange],
    sync_records: &[SyncRecord],
) -> GraphStats {
    let mut stats = GraphStats::default();
    for node in nodes {
        if !node.is_live() {
            stats.disappeared_nodes += 1;
            continue;
        }
        stats.total_nodes += 1;
        *stats.nodes_by_provider.entry(node.provider.clone()).or_default() += 1;
        *stats
            .nodes_by_resource_type
            .entry(node.resource_type.clone())
            .or_default() += 1;
        stats.total_cost_monthly += node.cost_monthly.unwrap_or(0.0);
    }
    let mut by_rel: BTreeMap<String, usize> = BTreeMap::new();
    for edge in edges {
        stats.total_edges += 1;
        *by_rel.entry(edge.relationship_type.clone()).or_default() += 1;
    }
    stats.edges_by_relationship_type = by_rel;
    stats.total_changes = changes.len();
    stats.oldest_change = changes.iter().map(|c| c.detected_at).min();
    stats.newest_change = changes.iter().map(|c| c.detected_at).max();
    stats.last_sync_at = sync_records.iter().map(|r| r.completed_at).max();
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DiscoveredVia;

    #[test]
    fn test_node_filter_matches() {
        let node = GraphNode::new("aws", "1", "us-east-1", "compute", "i-1").with_tag("env", "prod");
        assert!(NodeFilter::default().matches(&node));
        assert!(NodeFilter::provider("aws").matches(&node));
        assert!(!NodeFilter::provider("gcp").matches(&node));

        let mut tagged = NodeFilter::default();
        tagged.tags.insert("env".into(), "prod".into());
        assert!(tagged.matches(&node));
        tagged.tags.insert("team".into(), "core".into());
        assert!(!tagged.matches(&node));
    }

    #[test]
    fn test_live_filter_excludes_disappeared() {
        let node = GraphNode::new("aws", "1", "r", "compute", "i-1").with_status(NodeStatus::Disappeared);
        assert!(!NodeFilter::live().matches(&node));
        assert!(NodeFilter::default().matches(&node));
    }

    #[test]
    fn test_edge_filter_touching() {
        let edge = GraphEdge::new("a", "uses", "b", 1.0, DiscoveredVia::ApiField);
        assert!(EdgeFilter::touching("a").matches(&edge));
        assert!(EdgeFilter::touching("b").matches(&edge));
        assert!(!EdgeFilter::touching("c").matches(&edge));
    }

    #[test]
    fn test_compute_stats_skips_disappeared_cost() {
        let live = GraphNode::new("aws", "1", "r", "compute", "a").with_cost(100.0);
        let gone = GraphNode::new("aws", "1", "r", "compute", "b")
            .with_cost(50.0)
            .with_status(NodeStatus::Disappeared);
        let edge = GraphEdge::new(&live.id, "uses", &gone.id, 1.0, DiscoveredVia::ApiField);
        let stats = compute_stats([&live, &gone], [&edge], &[], &[]);
        assert_eq!(stats.total_nodes, 1);
        assert_eq!(stats.disappeared_nodes, 1);
        assert_eq!(stats.total_cost_monthly, 100.0);
        assert_eq!(stats.edges_by_relationship_type.get("uses"), Some(&1));
        assert!(stats.last_sync_at.is_none());
    }
}
