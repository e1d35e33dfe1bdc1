//! Read-side helpers over the change log: summaries, per-node timelines,
//! graph diffs between two instants, and cost trends from sync history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::error::StorageError;
use crate::storage::{EdgeFilter, GraphStorage};
use crate::types::{ChangeType, GraphChange, GraphNode, InitiatorType};

/// Aggregate view of a set of changes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeSummary {
    pub total: usize,
    pub by_type: BTreeMap<ChangeType, usize>,
    pub by_initiator_type: BTreeMap<String, usize>,
    /// Changes carrying a correlation id.
    pub correlated: usize,
    pub first_at: Option<DateTime<Utc>>,
    pub last_at: Option<DateTime<Utc>>,
    /// Targets with the most changes, most first (at most ten).
    pub most_changed: Vec<(String, usize)>,
}

fn initiator_key(kind: InitiatorType) -> &'static str {
    match kind {
        InitiatorType::Human => "human",
        InitiatorType::Agent => "agent",
        InitiatorType::System => "system",
    }
}

pub fn summarize_changes(changes: &[GraphChange]) -> ChangeSummary {
    let mut summary = ChangeSummary {
        total: changes.len(),
        ..Default::default()
    };
    let mut per_target: HashMap<&str, usize> = HashMap::new();
    for change in changes {
        *summary.by_type.entry(change.change_type).or_default() += 1;
        *summary
            .by_initiator_type
            .entry(initiator_key(change.initiator_type).to_string())
            .or_default() += 1;
        if change.correlation_id.is_some() {
            summary.correlated += 1;
        }
        *per_target.entry(change.target_id.as_str()).or_default() += 1;
    }
    summary.first_at = changes.iter().map(|c| c.detected_at).min();
    summary.last_at = changes.iter().map(|c| c.detected_at).max();

    let mut ranked: Vec<(String, usize)> = per_target
        .into_iter()
        .map(|(id, n)| (id.to_string(), n))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.truncate(10);
    summary.most_changed = ranked;
    summary
}

/// Everything recorded about one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeTimeline {
    pub node: Option<GraphNode>,
    /// Changes to the node itself and to edges currently touching it,
    /// oldest first.
    pub changes: Vec<GraphChange>,
}

pub async fn node_timeline(
    storage: &dyn GraphStorage,
    node_id: &str,
) -> Result<NodeTimeline, StorageError> {
    let node = storage.get_node(node_id).await?;
    let mut changes = storage.list_changes_for_target(node_id).await?;
    for edge in storage.list_edges(&EdgeFilter::touching(node_id)).await? {
        changes.extend(storage.list_changes_for_target(&edge.id).await?);
    }
    changes.sort_by_key(|c| c.detected_at);
    Ok(NodeTimeline { node, changes })
}

/// Net structural difference between two instants.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphDiff {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub nodes_created: Vec<String>,
    /// Updated or drifted, and still present at `to`.
    pub nodes_modified: Vec<String>,
    /// Deleted or disappeared.
    pub nodes_removed: Vec<String>,
    pub edges_created: Vec<String>,
    pub edges_removed: Vec<String>,
    pub change_count: usize,
}

/// Diff the graph between `from` (inclusive) and `to` (inclusive) using the
/// change log. A node created and removed inside the window is reported as
/// removed only.
pub async fn diff_graph(
    storage: &dyn GraphStorage,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<GraphDiff, StorageError> {
    let changes: Vec<GraphChange> = storage
        .list_changes_since(from)
        .await?
        .into_iter()
        .filter(|c| c.detected_at <= to)
        .collect();

    let mut created = BTreeSet::new();
    let mut modified = BTreeSet::new();
    let mut removed = BTreeSet::new();
    let mut edges_created = BTreeSet::new();
    let mut edges_removed = BTreeSet::new();
    for change in &changes {
        let id = change.target_id.clone();
        match change.change_type {
            ChangeType::NodeCreated => {
                removed.remove(&id);
                created.insert(id);
            }
            ChangeType::NodeUpdated | ChangeType::NodeDrifted => {
                modified.insert(id);
            }
            ChangeType::NodeDeleted | ChangeType::NodeDisappeared => {
                created.remove(&id);
                removed.insert(id);
            }
            ChangeType::EdgeCreated => {
                edges_removed.remove(&id);
                edges_created.insert(id);
            }
            ChangeType::EdgeRemoved => {
                edges_created.remove(&id);
                edges_removed.insert(id);
            }
        }
    }
    modified.retain(|id| !created.contains(id) && !removed.contains(id));

    Ok(GraphDiff {
        from,
        to,
        nodes_created: created.into_iter().collect(),
        nodes_modified: modified.into_iter().collect(),
        nodes_removed: removed.into_iter().collect(),
        edges_created: edges_created.into_iter().collect(),
        edges_removed: edges_removed.into_iter().collect(),
        change_count: changes.len(),
    })
}

/// Monthly cost observed at the end of one sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostPoint {
    pub at: DateTime<Utc>,
    pub provider: String,
    pub total_cost_monthly: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostTrend {
    pub points: Vec<CostPoint>,
    /// Last minus first, per provider, summed.
    pub delta: f64,
    /// `delta` relative to the first total; `None` when that is zero.
    pub delta_ratio: Option<f64>,
}

/// Cost history since `since`, optionally for one provider.
pub async fn cost_trend(
    storage: &dyn GraphStorage,
    since: DateTime<Utc>,
    provider: Option<&str>,
) -> Result<CostTrend, StorageError> {
    let points: Vec<CostPoint> = storage
        .list_sync_records(since)
        .await?
        .into_iter()
        .filter(|r| provider.is_none_or(|p| r.provider.eq_ignore_ascii_case(p)))
        .filter_map(|r| {
            r.total_cost_monthly.map(|cost| CostPoint {
                at: r.completed_at,
                provider: r.provider,
                total_cost_monthly: cost,
            })
        })
        .collect();

    let mut first: BTreeMap<&str, f64> = BTreeMap::new();
    let mut last: BTreeMap<&str, f64> = BTreeMap::new();
    for point in &points {
        first
            .entry(point.provider.as_str())
            .or_insert(point.total_cost_monthly);
        last.insert(point.provider.as_str(), point.total_cost_monthly);
    }
    let start: f64 = first.values().sum();
    let end: f64 = last.values().sum();
    let delta = end - start;
    let delta_ratio = (start > 0.0).then(|| delta / start);

    Ok(CostTrend {
        points,
        delta,
        delta_ratio,
    })
}
