//! Fundamental graph types: nodes, edges, changes, sync records, and stats.
//!
//! Node and edge ids are pure functions of their identifying fields, so
//! re-discovering the same resource always lands on the same record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

/// Canonical, provider-independent resource kind (`compute`, `database`, ...).
pub type ResourceType = String;

/// Build the deterministic id of a node.
///
/// The id only depends on its inputs, never on call order or wall-clock time.
pub fn build_node_id(
    provider: &str,
    account: &str,
    region: &str,
    resource_type: &str,
    native_id: &str,
) -> String {
    format!(
        "{}:{}:{}:{}:{}",
        provider.to_ascii_lowercase(),
        account,
        region,
        resource_type,
        native_id
    )
}

/// Build the deterministic id of an edge.
pub fn build_edge_id(source_node_id: &str, relationship_type: &str, target_node_id: &str) -> String {
    format!("{source_node_id}--{relationship_type}--{target_node_id}")
}

/// Lifecycle status of a node.
///
/// Adapters normalize provider vocabulary into the first five states (or
/// `Unknown`); `Disappeared` is only ever set by the change recorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeStatus {
    Running,
    Stopped,
    Creating,
    Deleting,
    Error,
    Unknown,
    Disappeared,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Running => "running",
            NodeStatus::Stopped => "stopped",
            NodeStatus::Creating => "creating",
            NodeStatus::Deleting => "deleting",
            NodeStatus::Error => "error",
            NodeStatus::Unknown => "unknown",
            NodeStatus::Disappeared => "disappeared",
        }
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical representation of one cloud resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphNode {
    pub id: String,
    pub provider: String,
    pub resource_type: ResourceType,
    pub native_id: String,
    pub name: String,
    pub region: String,
    pub account: String,
    pub status: NodeStatus,
    #[serde(default)]
    pub tags: HashMap<String, String>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    #[serde(default)]
    pub cost_monthly: Option<f64>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    /// First time this id was observed by any sync.
    pub discovered_at: DateTime<Utc>,
    /// Last time a sync or event re-observed this id.
    pub last_seen_at: DateTime<Utc>,
}

impl GraphNode {
    /// Create a running node with a deterministic id and empty attributes.
    pub fn new(
        provider: impl Into<String>,
        account: impl Into<String>,
        region: impl Into<String>,
        resource_type: impl Into<String>,
        native_id: impl Into<String>,
    ) -> Self {
        let provider = provider.into();
        let account = account.into();
        let region = region.into();
        let resource_type = resource_type.into();
        let native_id = native_id.into();
        let now = Utc::now();
        Self {
            id: build_node_id(&provider, &account, &region, &resource_type, &native_id),
            name: native_id.clone(),
            provider,
            resource_type,
            native_id,
            region,
            account,
            status: NodeStatus::Running,
            tags: HashMap::new(),
            metadata: HashMap::new(),
            cost_monthly: None,
            owner: None,
            created_at: None,
            discovered_at: now,
            last_seen_at: now,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_status(mut self, status: NodeStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_cost(mut self, cost_monthly: f64) -> Self {
        self.cost_monthly = Some(cost_monthly);
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Whether this node is still considered present in the cloud.
    pub fn is_live(&self) -> bool {
        self.status != NodeStatus::Disappeared
    }

    /// The scan scope this node belongs to.
    pub fn scope(&self) -> ScanScope {
        ScanScope::new(&self.provider, &self.account, &self.region, &self.resource_type)
    }
}

/// How an edge was discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiscoveredVia {
    ConfigScan,
    ApiField,
    RuntimeTrace,
    EventStream,
    IdHierarchy,
    ParentChild,
}

/// Inferred or observed relationship between two nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphEdge {
    pub id: String,
    pub source_node_id: String,
    pub target_node_id: String,
    pub relationship_type: String,
    /// Always within `[0, 1]`.
    pub confidence: f64,
    pub discovered_via: DiscoveredVia,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl GraphEdge {
    pub fn new(
        source_node_id: impl Into<String>,
        relationship_type: impl Into<String>,
        target_node_id: impl Into<String>,
        confidence: f64,
        discovered_via: DiscoveredVia,
    ) -> Self {
        let source_node_id = source_node_id.into();
        let relationship_type = relationship_type.into();
        let target_node_id = target_node_id.into();
        Self {
            id: build_edge_id(&source_node_id, &relationship_type, &target_node_id),
            source_node_id,
            target_node_id,
            relationship_type,
            confidence: confidence.clamp(0.0, 1.0),
            discovered_via,
            metadata: HashMap::new(),
        }
    }
}

/// Kind of a recorded change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChangeType {
    NodeCreated,
    NodeUpdated,
    NodeDeleted,
    NodeDisappeared,
    NodeDrifted,
    EdgeCreated,
    EdgeRemoved,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::NodeCreated => "node-created",
            ChangeType::NodeUpdated => "node-updated",
            ChangeType::NodeDeleted => "node-deleted",
            ChangeType::NodeDisappeared => "node-disappeared",
            ChangeType::NodeDrifted => "node-drifted",
            ChangeType::EdgeCreated => "edge-created",
            ChangeType::EdgeRemoved => "edge-removed",
        }
    }

    pub fn is_edge_change(&self) -> bool {
        matches!(self, ChangeType::EdgeCreated | ChangeType::EdgeRemoved)
    }
}

impl std::fmt::Display for ChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a change was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DetectedVia {
    Sync,
    EventStream,
}

/// Who made a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InitiatorType {
    Human,
    Agent,
    System,
}

/// One immutable entry in the change log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphChange {
    pub id: String,
    /// Node id or edge id, depending on `change_type`.
    pub target_id: String,
    pub change_type: ChangeType,
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub previous_value: Option<Value>,
    #[serde(default)]
    pub new_value: Option<Value>,
    pub detected_at: DateTime<Utc>,
    pub detected_via: DetectedVia,
    /// Presence marks an approved or tracked change.
    #[serde(default)]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub initiator: Option<String>,
    pub initiator_type: InitiatorType,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl GraphChange {
    /// A sync-detected change attributed to the system, timestamped now.
    pub fn detected(target_id: impl Into<String>, change_type: ChangeType) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            target_id: target_id.into(),
            change_type,
            field: None,
            previous_value: None,
            new_value: None,
            detected_at: Utc::now(),
            detected_via: DetectedVia::Sync,
            correlation_id: None,
            initiator: None,
            initiator_type: InitiatorType::System,
            metadata: HashMap::new(),
        }
    }

    pub fn with_field(
        mut self,
        field: impl Into<String>,
        previous_value: Option<Value>,
        new_value: Option<Value>,
    ) -> Self {
        self.field = Some(field.into());
        self.previous_value = previous_value;
        self.new_value = new_value;
        self
    }

    pub fn with_initiator(mut self, initiator: impl Into<String>, kind: InitiatorType) -> Self {
        self.initiator = Some(initiator.into());
        self.initiator_type = kind;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Outcome of a sync cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Completed,
    Failed,
}

/// One record per discovery cycle per provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRecord {
    pub id: String,
    pub provider: String,
    pub status: SyncStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub nodes_discovered: usize,
    pub nodes_created: usize,
    pub nodes_updated: usize,
    pub nodes_disappeared: usize,
    pub edges_discovered: usize,
    pub edges_created: usize,
    pub edges_removed: usize,
    pub changes_recorded: usize,
    #[serde(default)]
    pub errors: Vec<String>,
    pub duration_ms: u64,
    /// Monthly cost of this provider's live nodes once the sync was applied.
    #[serde(default)]
    pub total_cost_monthly: Option<f64>,
}

/// The `(provider, account, region, resource_type)` slice a scan fully covered.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanScope {
    pub provider: String,
    pub account: String,
    pub region: String,
    pub resource_type: ResourceType,
}

impl ScanScope {
    pub fn new(provider: &str, account: &str, region: &str, resource_type: &str) -> Self {
        Self {
            provider: provider.to_ascii_lowercase(),
            account: account.to_string(),
            region: region.to_string(),
            resource_type: resource_type.to_string(),
        }
    }
}

/// Aggregate snapshot of the graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphStats {
    /// Live (not disappeared) nodes.
    pub total_nodes: usize,
    pub total_edges: usize,
    pub total_changes: usize,
    pub disappeared_nodes: usize,
    pub nodes_by_provider: BTreeMap<String, usize>,
    pub nodes_by_resource_type: BTreeMap<String, usize>,
    pub edges_by_relationship_type: BTreeMap<String, usize>,
    pub total_cost_monthly: f64,
    #[serde(default)]
    pub last_sync_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub oldest_change: Option<DateTime<Utc>>,
    #[serde(default)]
    pub newest_change: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_build_node_id_is_stable() {
        let a = build_node_id("aws", "123", "us-east-1", "compute", "i-abc");
        let b = build_node_id("aws", "123", "us-east-1", "compute", "i-abc");
        assert_eq!(a, b);
        assert_eq!(a, "aws:123:us-east-1:compute:i-abc");
    }

    #[test]
    fn test_build_node_id_normalizes_provider_case() {
        assert_eq!(
            build_node_id("AWS", "1", "r", "t", "x"),
            build_node_id("aws", "1", "r", "t", "x")
        );
    }

    #[test]
    fn test_node_new_uses_deterministic_id() {
        let node = GraphNode::new("gcp", "proj", "us-central1", "compute", "vm-1");
        assert_eq!(node.id, build_node_id("gcp", "proj", "us-central1", "compute", "vm-1"));
        assert_eq!(node.name, "vm-1");
        assert!(node.is_live());
    }

    #[test]
    fn test_edge_confidence_is_clamped() {
        let edge = GraphEdge::new("a", "runs-in", "b", 1.7, DiscoveredVia::ApiField);
        assert_eq!(edge.confidence, 1.0);
        assert_eq!(edge.id, "a--runs-in--b");
    }

    #[test]
    fn test_change_type_wire_names() {
        let json = serde_json::to_string(&ChangeType::NodeDisappeared).unwrap();
        assert_eq!(json, "\"node-disappeared\"");
        assert_eq!(ChangeType::EdgeRemoved.to_string(), "edge-removed");
    }

    #[test]
    fn test_node_status_serialization() {
        let json = serde_json::to_string(&NodeStatus::Disappeared).unwrap();
        assert_eq!(json, "\"disappeared\"");
        let back: NodeStatus = serde_json::from_str("\"creating\"").unwrap();
        assert_eq!(back, NodeStatus::Creating);
    }

    #[test]
    fn test_detected_change_defaults() {
        let change = GraphChange::detected("n1", ChangeType::NodeCreated);
        assert_eq!(change.detected_via, DetectedVia::Sync);
        assert_eq!(change.initiator_type, InitiatorType::System);
        assert!(change.correlation_id.is_none());
    }
}
