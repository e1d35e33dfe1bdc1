//! Alert rules and the snapshot they evaluate.
//!
//! Rules are pure: everything they look at is loaded into a [`RuleContext`]
//! before evaluation, so a rule never touches storage and evaluating the
//! same context twice yields the same alerts (up to ids and timestamps).

pub mod builtin;

pub use builtin::{
    CostAnomalyRule, DisappearedRule, OrphanRule, SpofRule, UnauthorizedChangeRule, builtin_rules,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

use infragraph_core::storage::{EdgeFilter, GraphStorage, NodeFilter};
use infragraph_core::{GraphChange, GraphEdge, GraphNode, GraphStats, StorageError, SyncRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AlertCategory {
    Orphan,
    SinglePointOfFailure,
    CostAnomaly,
    UnauthorizedChange,
    Disappeared,
}

/// One fired alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertInstance {
    pub id: String,
    pub rule_id: String,
    pub category: AlertCategory,
    pub severity: AlertSeverity,
    pub affected_node_ids: Vec<String>,
    /// Monthly cost at stake, when the rule can estimate it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_impact: Option<f64>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

impl AlertInstance {
    pub fn new(
        rule_id: impl Into<String>,
        category: AlertCategory,
        severity: AlertSeverity,
        message: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            rule_id: rule_id.into(),
            category,
            severity,
            affected_node_ids: Vec::new(),
            cost_impact: None,
            message: message.into(),
            timestamp,
            metadata: HashMap::new(),
        }
    }

    pub fn with_nodes(mut self, node_ids: impl IntoIterator<Item = String>) -> Self {
        self.affected_node_ids.extend(node_ids);
        self
    }

    pub fn with_cost_impact(mut self, cost: f64) -> Self {
        self.cost_impact = Some(cost);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Dedup key: the rule plus the affected node set, order-insensitive.
    pub fn cooldown_key(&self) -> String {
        let mut ids: Vec<&str> = self.affected_node_ids.iter().map(String::as_str).collect();
        ids.sort_unstable();
        ids.dedup();
        format!("{}|{}", self.rule_id, ids.join(","))
    }
}

/// Read-only view of the graph at evaluation time.
#[derive(Debug, Clone, Default)]
pub struct RuleContext {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    /// Changes detected inside the evaluation window.
    pub changes: Vec<GraphChange>,
    /// Sync records started inside the evaluation window.
    pub sync_records: Vec<SyncRecord>,
    /// Stats before this cycle; `None` before the first sync.
    pub previous_stats: Option<GraphStats>,
    pub current_stats: GraphStats,
    pub window_start: DateTime<Utc>,
    pub now: DateTime<Utc>,
    degree: HashMap<String, usize>,
}

impl RuleContext {
    pub fn new(
        nodes: Vec<GraphNode>,
        edges: Vec<GraphEdge>,
        window_start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut degree: HashMap<String, usize> = HashMap::new();
        for edge in &edges {
            *degree.entry(edge.source_node_id.clone()).or_default() += 1;
            *degree.entry(edge.target_node_id.clone()).or_default() += 1;
        }
        Self {
            nodes,
            edges,
            window_start,
            now,
            degree,
            ..Default::default()
        }
    }

    pub fn with_changes(mut self, changes: Vec<GraphChange>) -> Self {
        self.changes = changes;
        self
    }

    pub fn with_sync_records(mut self, records: Vec<SyncRecord>) -> Self {
        self.sync_records = records;
        self
    }

    pub fn with_stats(mut self, previous: Option<GraphStats>, current: GraphStats) -> Self {
        self.previous_stats = previous;
        self.current_stats = current;
        self
    }

    /// Snapshot storage for an evaluation window starting at `window_start`.
    pub async fn load(
        storage: &dyn GraphStorage,
        previous_stats: Option<GraphStats>,
        window_start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Self, StorageError> {
        let nodes = storage.list_nodes(&NodeFilter::live()).await?;
        let edges = storage.list_edges(&EdgeFilter::default()).await?;
        let changes = storage.list_changes_since(window_start).await?;
        let sync_records = storage.list_sync_records(window_start).await?;
        let current = storage.get_stats().await?;
        Ok(Self::new(nodes, edges, window_start, now)
            .with_changes(changes)
            .with_sync_records(sync_records)
            .with_stats(previous_stats, current))
    }

    /// Number of edges touching `node_id`, in either direction.
    pub fn degree(&self, node_id: &str) -> usize {
        self.degree.get(node_id).copied().unwrap_or(0)
    }

    pub fn node(&self, node_id: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.id == node_id)
    }
}

/// A monitoring rule evaluated once per cycle.
pub trait AlertRule: Send + Sync {
    /// Stable id, used for cooldown keys and `disabled_rules`.
    fn id(&self) -> &str;

    fn category(&self) -> AlertCategory;

    fn evaluate(&self, ctx: &RuleContext) -> Vec<AlertInstance>;
}
