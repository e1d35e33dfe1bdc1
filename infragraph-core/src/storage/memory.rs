//! In-memory graph storage with optional JSON snapshots.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::debug;

use super::snapshot::{GraphSnapshot, SNAPSHOT_VERSION};
use super::{EdgeFilter, GraphStorage, NodeFilter, StorageResult, compute_stats};
use crate::config::StorageConfig;
use crate::error::StorageError;
use crate::types::{GraphChange, GraphEdge, GraphNode, GraphStats, SyncRecord};

#[derive(Debug, Default)]
struct Inner {
    nodes: HashMap<String, GraphNode>,
    edges: HashMap<String, GraphEdge>,
    changes: Vec<GraphChange>,
    change_ids: HashSet<String>,
    sync_records: Vec<SyncRecord>,
}

impl From<GraphSnapshot> for Inner {
    fn from(snapshot: GraphSnapshot) -> Self {
        Self {
            nodes: snapshot.nodes.into_iter().map(|n| (n.id.clone(), n)).collect(),
            edges: snapshot.edges.into_iter().map(|e| (e.id.clone(), e)).collect(),
            change_ids: snapshot.changes.iter().map(|c| c.id.clone()).collect(),
            changes: snapshot.changes,
            sync_records: snapshot.sync_records,
        }
    }
}

/// Graph storage held entirely in process memory.
#[derive(Debug, Default)]
pub struct InMemoryGraphStorage {
    inner: RwLock<Inner>,
    snapshot_path: Option<PathBuf>,
}

impl InMemoryGraphStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that can be flushed to (and was loaded from) `path`.
    pub fn with_snapshot_path(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let inner = match GraphSnapshot::load(&path)? {
            Some(snapshot) => Inner::from(snapshot),
            None => Inner::default(),
        };
        Ok(Self {
            inner: RwLock::new(inner),
            snapshot_path: Some(path),
        })
    }

    /// Build the store described by the `[storage]` config section.
    pub fn from_config(config: &StorageConfig) -> Result<Self, StorageError> {
        match &config.snapshot_path {
            Some(path) => Self::with_snapshot_path(path.clone()),
            None => Ok(Self::new()),
        }
    }

    pub fn snapshot_path(&self) -> Option<&Path> {
        self.snapshot_path.as_deref()
    }

    /// Capture the full contents of the store.
    pub async fn snapshot(&self) -> GraphSnapshot {
        let inner = self.inner.read().await;
        let mut nodes: Vec<GraphNode> = inner.nodes.values().cloned().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        let mut edges: Vec<GraphEdge> = inner.edges.values().cloned().collect();
        edges.sort_by(|a, b| a.id.cmp(&b.id));
        GraphSnapshot {
            version: SNAPSHOT_VERSION,
            nodes,
            edges,
            changes: inner.changes.clone(),
            sync_records: inner.sync_records.clone(),
        }
    }

    /// Write the store to its snapshot path. No-op without a path.
    pub async fn flush(&self) -> Result<(), StorageError> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };
        let snapshot = self.snapshot().await;
        snapshot.save(path)?;
        debug!(path = %path.display(), nodes = snapshot.nodes.len(), "Flushed graph snapshot");
        Ok(())
    }
}

#[async_trait]
impl GraphStorage for InMemoryGraphStorage {
    async fn upsert_node(&self, node: GraphNode) -> StorageResult<()> {
        self.inner.write().await.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    async fn upsert_nodes(&self, nodes: Vec<GraphNode>) -> StorageResult<()> {
        let mut inner = self.inner.write().await;
        for node in nodes {
            inner.nodes.insert(node.id.clone(), node);
        }
        Ok(())
    }

    async fn get_node(&self, id: &str) -> StorageResult<Option<GraphNode>> {
        Ok(self.inner.read().await.nodes.get(id).cloned())
    }

    async fn list_nodes(&self, filter: &NodeFilter) -> StorageResult<Vec<GraphNode>> {
        let inner = self.inner.read().await;
        let mut nodes: Vec<GraphNode> = inner
            .nodes
            .values()
            .filter(|n| filter.matches(n))
            .cloned()
            .collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(nodes)
    }

    async fn upsert_edge(&self, edge: GraphEdge) -> StorageResult<()> {
        self.inner.write().await.edges.insert(edge.id.clone(), edge);
        Ok(())
    }

    async fn get_edge(&self, id: &str) -> StorageResult<Option<GraphEdge>> {
        Ok(self.inner.read().await.edges.get(id).cloned())
    }

    async fn list_edges(&self, filter: &EdgeFilter) -> StorageResult<Vec<GraphEdge>> {
        let inner = self.inner.read().await;
        let mut edges: Vec<GraphEdge> = inner
            .edges
            .values()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        edges.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(edges)
    }

    async fn delete_edge(&self, id: &str) -> StorageResult<bool> {
        Ok(self.inner.write().await.edges.remove(id).is_some())
    }

    async fn append_change(&self, change: GraphChange) -> StorageResult<()> {
        let mut inner = self.inner.write().await;
        if !inner.change_ids.insert(change.id.clone()) {
            return Err(StorageError::DuplicateChange { id: change.id });
        }
        // Keep the log ordered by detection time even if writers interleave.
        let pos = inner
            .changes
            .partition_point(|c| c.detected_at <= change.detected_at);
        inner.changes.insert(pos, change);
        Ok(())
    }

    async fn list_changes_since(&self, since: DateTime<Utc>) -> StorageResult<Vec<GraphChange>> {
        let inner = self.inner.read().await;
        let start = inner.changes.partition_point(|c| c.detected_at < since);
        Ok(inner.changes[start..].to_vec())
    }

    async fn list_changes_for_target(&self, target_id: &str) -> StorageResult<Vec<GraphChange>> {
        Ok(self
            .inner
            .read()
            .await
            .changes
            .iter()
            .filter(|c| c.target_id == target_id)
            .cloned()
            .collect())
    }

    async fn save_sync_record(&self, record: SyncRecord) -> StorageResult<()> {
        let mut inner = self.inner.write().await;
        if inner.sync_records.iter().any(|r| r.id == record.id) {
            return Err(StorageError::DuplicateSyncRecord { id: record.id });
        }
        inner.sync_records.push(record);
        Ok(())
    }

    async fn list_sync_records(&self, since: DateTime<Utc>) -> StorageResult<Vec<SyncRecord>> {
        let inner = self.inner.read().await;
        let mut records: Vec<SyncRecord> = inner
            .sync_records
            .iter()
            .filter(|r| r.started_at >= since)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.started_at);
        Ok(records)
    }

    async fn get_stats(&self) -> StorageResult<GraphStats> {
        let inner = self.inner.read().await;
        Ok(compute_stats(
            inner.nodes.values(),
            inner.edges.values(),
            &inner.changes,
            &inner.sync_records,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChangeType, DiscoveredVia, SyncStatus};
    use chrono::Duration;
    use tempfile::TempDir;

    fn sync_record(id: &str, started_at: DateTime<Utc>) -> SyncRecord {
        SyncRecord {
            id: id.into(),
            provider: "aws".into(),
            status: SyncStatus::Completed,
            started_at,
            completed_at: started_at,
            nodes_discovered: 0,
            nodes_created: 0,
            nodes_updated: 0,
            nodes_disappeared: 0,
            edges_discovered: 0,
            edges_created: 0,
            edges_removed: 0,
            changes_recorded: 0,
            errors: Vec::new(),
            duration_ms: 0,
            total_cost_monthly: None,
        }
    }

    #[tokio::test]
    async fn test_upsert_node_is_idempotent() {
        let store = InMemoryGraphStorage::new();
        let node = GraphNode::new("aws", "1", "us-east-1", "compute", "i-1");
        store.upsert_node(node.clone()).await.unwrap();
        store.upsert_node(node.clone().with_name("renamed")).await.unwrap();
        let nodes = store.list_nodes(&NodeFilter::default()).await.unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].name, "renamed");
    }

    #[tokio::test]
    async fn test_append_change_rejects_duplicates() {
        let store = InMemoryGraphStorage::new();
        let change = GraphChange::detected("n1", ChangeType::NodeCreated);
        store.append_change(change.clone()).await.unwrap();
        let err = store.append_change(change).await.unwrap_err();
        assert!(matches!(err, StorageError::DuplicateChange { .. }));
        assert_eq!(store.get_stats().await.unwrap().total_changes, 1);
    }

    #[tokio::test]
    async fn test_list_changes_since_is_ordered() {
        let store = InMemoryGraphStorage::new();
        let now = Utc::now();
        let mut late = GraphChange::detected("b", ChangeType::NodeCreated);
        late.detected_at = now;
        let mut early = GraphChange::detected("a", ChangeType::NodeCreated);
        early.detected_at = now - Duration::minutes(10);
        store.append_change(late).await.unwrap();
        store.append_change(early).await.unwrap();

        let all = store.list_changes_since(now - Duration::hours(1)).await.unwrap();
        assert_eq!(all.iter().map(|c| c.target_id.as_str()).collect::<Vec<_>>(), ["a", "b"]);

        let recent = store.list_changes_since(now - Duration::minutes(1)).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].target_id, "b");
    }

    #[tokio::test]
    async fn test_delete_edge() {
        let store = InMemoryGraphStorage::new();
        let edge = GraphEdge::new("a", "uses", "b", 0.9, DiscoveredVia::ApiField);
        store.upsert_edge(edge.clone()).await.unwrap();
        assert!(store.delete_edge(&edge.id).await.unwrap());
        assert!(!store.delete_edge(&edge.id).await.unwrap());
        assert!(store.get_edge(&edge.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sync_records_written_once() {
        let store = InMemoryGraphStorage::new();
        let now = Utc::now();
        store.save_sync_record(sync_record("s1", now)).await.unwrap();
        assert!(store.save_sync_record(sync_record("s1", now)).await.is_err());
        store
            .save_sync_record(sync_record("s0", now - Duration::hours(2)))
            .await
            .unwrap();
        let recent = store.list_sync_records(now - Duration::hours(1)).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(store.get_stats().await.unwrap().last_sync_at, Some(now));
    }

    #[tokio::test]
    async fn test_flush_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("graph.json");
        let store = InMemoryGraphStorage::with_snapshot_path(&path).unwrap();
        store
            .upsert_node(GraphNode::new("aws", "1", "r", "compute", "i-1").with_cost(10.0))
            .await
            .unwrap();
        store
            .append_change(GraphChange::detected("x", ChangeType::NodeCreated))
            .await
            .unwrap();
        store.flush().await.unwrap();

        let reloaded = InMemoryGraphStorage::with_snapshot_path(&path).unwrap();
        let stats = reloaded.get_stats().await.unwrap();
        assert_eq!(stats.total_nodes, 1);
        assert_eq!(stats.total_changes, 1);
        assert_eq!(stats.total_cost_monthly, 10.0);
    }

    #[tokio::test]
    async fn test_from_config() {
        let store = InMemoryGraphStorage::from_config(&StorageConfig::default()).unwrap();
        assert!(store.snapshot_path().is_none());

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("graph.json");
        let config = StorageConfig {
            snapshot_path: Some(path.clone()),
        };
        let store = InMemoryGraphStorage::from_config(&config).unwrap();
        assert_eq!(store.snapshot_path(), Some(path.as_path()));
        store
            .upsert_node(GraphNode::new("aws", "1", "r", "vpc", "vpc-1"))
            .await
            .unwrap();
        store.flush().await.unwrap();

        let reloaded = InMemoryGraphStorage::from_config(&config).unwrap();
        assert_eq!(reloaded.get_stats().await.unwrap().total_nodes, 1);
    }
}
