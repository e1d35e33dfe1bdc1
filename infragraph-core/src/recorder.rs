//! Change and sync recording.
//!
//! [`ChangeRecorder::record_sync`] diffs one discovery batch against what
//! storage already holds and appends one immutable [`GraphChange`] per
//! observed difference, then writes exactly one [`SyncRecord`] for the batch.
//! [`ChangeRecorder::record_events`] does the same for audit events, which
//! only ever add changes and never touch node state.
//!
//! Every change is appended on its own; no transaction spans a sync.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::DriftConfig;
use crate::discovery::DiscoveryResult;
use crate::error::StorageError;
use crate::events::{EventBus, GraphEvent};
use crate::relationships::extract_resource_id;
use crate::sources::CloudEvent;
use crate::storage::{EdgeFilter, GraphStorage, NodeFilter};
use crate::types::{
    ChangeType, DetectedVia, GraphChange, GraphNode, NodeStatus, ScanScope, SyncRecord, SyncStatus,
};

/// Decides whether a changed field is configuration drift rather than an
/// ordinary update.
pub trait DriftPolicy: Send + Sync {
    fn is_drift(&self, node: &GraphNode, field: &str) -> bool;
}

impl<F> DriftPolicy for F
where
    F: Fn(&GraphNode, &str) -> bool + Send + Sync,
{
    fn is_drift(&self, node: &GraphNode, field: &str) -> bool {
        self(node, field)
    }
}

/// Never classifies anything as drift.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDrift;

impl DriftPolicy for NoDrift {
    fn is_drift(&self, _node: &GraphNode, _field: &str) -> bool {
        false
    }
}

/// Drift when the field is listed, or starts with a listed prefix ending in `.`.
#[derive(Debug, Clone, Default)]
pub struct FieldListDrift {
    fields: Vec<String>,
}

impl FieldListDrift {
    pub fn new(fields: Vec<String>) -> Self {
        Self { fields }
    }
}

impl From<&DriftConfig> for FieldListDrift {
    fn from(config: &DriftConfig) -> Self {
        Self::new(config.sensitive_fields.clone())
    }
}

impl DriftPolicy for FieldListDrift {
    fn is_drift(&self, _node: &GraphNode, field: &str) -> bool {
        self.fields
            .iter()
            .any(|f| f == field || (f.ends_with('.') && field.starts_with(f.as_str())))
    }
}

/// Maps an audit event to the change-ticket / deployment id that approved it.
pub trait CorrelationResolver: Send + Sync {
    fn correlate(&self, event: &CloudEvent) -> Option<String>;
}

impl<F> CorrelationResolver for F
where
    F: Fn(&CloudEvent) -> Option<String> + Send + Sync,
{
    fn correlate(&self, event: &CloudEvent) -> Option<String> {
        self(event)
    }
}

/// One field-level difference between two versions of a node.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDiff {
    pub field: String,
    pub previous: Option<Value>,
    pub current: Option<Value>,
}

fn opt_json<T: serde::Serialize>(value: &Option<T>) -> Option<Value> {
    value.as_ref().and_then(|v| serde_json::to_value(v).ok())
}

/// Diff the tracked fields of two versions of the same node.
///
/// Bookkeeping timestamps are ignored. Tags are compared as a whole map;
/// metadata only for keys present on `current`.
pub fn diff_nodes(previous: &GraphNode, current: &GraphNode) -> Vec<FieldDiff> {
    let mut diffs = Vec::new();
    let mut push = |field: &str, prev: Option<Value>, cur: Option<Value>| {
        if prev != cur {
            diffs.push(FieldDiff {
                field: field.to_string(),
                previous: prev,
                current: cur,
            });
        }
    };

    push("name", Some(Value::from(previous.name.as_str())), Some(Value::from(current.name.as_str())));
    push(
        "status",
        Some(Value::from(previous.status.as_str())),
        Some(Value::from(current.status.as_str())),
    );
    push("region", Some(Value::from(previous.region.as_str())), Some(Value::from(current.region.as_str())));
    push("account", Some(Value::from(previous.account.as_str())), Some(Value::from(current.account.as_str())));
    push("owner", opt_json(&previous.owner), opt_json(&current.owner));
    push("costMonthly", opt_json(&previous.cost_monthly), opt_json(&current.cost_monthly));

    let keys: BTreeMap<&String, ()> = previous
        .tags
        .keys()
        .chain(current.tags.keys())
        .map(|k| (k, ()))
        .collect();
    for key in keys.keys() {
        push(
            format!("tags.{key}").as_str(),
            previous.tags.get(*key).map(|v| Value::from(v.as_str())),
            current.tags.get(*key).map(|v| Value::from(v.as_str())),
        );
    }

    let mut meta_keys: Vec<&String> = current.metadata.keys().collect();
    meta_keys.sort();
    for key in meta_keys {
        push(
            format!("metadata.{key}").as_str(),
            previous.metadata.get(key).cloned(),
            current.metadata.get(key).cloned(),
        );
    }
    diffs
}

/// Merge a re-observed node onto its stored version.
fn merge_node(previous: &GraphNode, mut current: GraphNode) -> GraphNode {
    current.discovered_at = previous.discovered_at;
    if current.created_at.is_none() {
        current.created_at = previous.created_at;
    }
    let mut metadata = previous.metadata.clone();
    metadata.extend(current.metadata);
    current.metadata = metadata;
    current
}

/// Turns discovery batches and audit events into stored changes.
pub struct ChangeRecorder {
    drift: Arc<dyn DriftPolicy>,
    correlation: Option<Arc<dyn CorrelationResolver>>,
    bus: Option<EventBus>,
}

impl Default for ChangeRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeRecorder {
    pub fn new() -> Self {
        Self {
            drift: Arc::new(NoDrift),
            correlation: None,
            bus: None,
        }
    }

    pub fn with_drift_policy(mut self, policy: impl DriftPolicy + 'static) -> Self {
        self.drift = Arc::new(policy);
        self
    }

    pub fn with_correlation(mut self, resolver: impl CorrelationResolver + 'static) -> Self {
        self.correlation = Some(Arc::new(resolver));
        self
    }

    pub fn with_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Persist a discovery batch and record what changed.
    ///
    /// Returns the saved sync record. A storage failure aborts the sync
    /// midway; changes appended before the failure stay recorded.
    pub async fn record_sync(
        &self,
        storage: &dyn GraphStorage,
        result: &DiscoveryResult,
        started_at: DateTime<Utc>,
    ) -> Result<SyncRecord, StorageError> {
        let provider = result.provider.to_ascii_lowercase();
        let mut record = SyncRecord {
            id: Uuid::new_v4().to_string(),
            provider: provider.clone(),
            status: SyncStatus::Completed,
            started_at,
            completed_at: started_at,
            nodes_discovered: result.nodes.len(),
            nodes_created: 0,
            nodes_updated: 0,
            nodes_disappeared: 0,
            edges_discovered: result.edges.len(),
            edges_created: 0,
            edges_removed: 0,
            changes_recorded: 0,
            errors: result.errors.iter().map(ToString::to_string).collect(),
            duration_ms: 0,
            total_cost_monthly: None,
        };

        for node in &result.nodes {
            match storage.get_node(&node.id).await? {
                None => {
                    let change = GraphChange::detected(&node.id, ChangeType::NodeCreated)
                        .with_metadata("resourceType", node.resource_type.as_str());
                    storage.upsert_node(node.clone()).await?;
                    storage.append_change(change).await?;
                    record.nodes_created += 1;
                    record.changes_recorded += 1;
                }
                Some(previous) => {
                    let diffs = diff_nodes(&previous, node);
                    if !diffs.is_empty() {
                        record.nodes_updated += 1;
                    }
                    storage.upsert_node(merge_node(&previous, node.clone())).await?;
                    for diff in diffs {
                        let change_type = if self.drift.is_drift(node, &diff.field) {
                            ChangeType::NodeDrifted
                        } else {
                            ChangeType::NodeUpdated
                        };
                        let change = GraphChange::detected(&node.id, change_type).with_field(
                            diff.field,
                            diff.previous,
                            diff.current,
                        );
                        storage.append_change(change).await?;
                        record.changes_recorded += 1;
                    }
                }
            }
        }

        let mut seen_edges = HashSet::new();
        for edge in &result.edges {
            seen_edges.insert(edge.id.as_str());
            if storage.get_edge(&edge.id).await?.is_none() {
                let change = GraphChange::detected(&edge.id, ChangeType::EdgeCreated)
                    .with_metadata("relationshipType", edge.relationship_type.as_str());
                storage.upsert_edge(edge.clone()).await?;
                storage.append_change(change).await?;
                record.edges_created += 1;
                record.changes_recorded += 1;
            } else {
                storage.upsert_edge(edge.clone()).await?;
            }
        }

        if !result.covered.is_empty() {
            let covered: HashSet<&ScanScope> = result.covered.iter().collect();
            let seen_nodes: HashSet<&str> = result.nodes.iter().map(|n| n.id.as_str()).collect();
            let stored = storage.list_nodes(&NodeFilter::provider(&provider)).await?;

            for node in stored.iter().filter(|n| n.is_live()) {
                if seen_nodes.contains(node.id.as_str()) || !covered.contains(&node.scope()) {
                    continue;
                }
                let mut gone = node.clone();
                gone.status = NodeStatus::Disappeared;
                storage.upsert_node(gone).await?;
                let mut change = GraphChange::detected(&node.id, ChangeType::NodeDisappeared)
                    .with_field(
                        "status",
                        Some(Value::from(node.status.as_str())),
                        Some(Value::from(NodeStatus::Disappeared.as_str())),
                    );
                if let Some(cost) = node.cost_monthly {
                    change = change.with_metadata("costMonthly", cost);
                }
                storage.append_change(change).await?;
                record.nodes_disappeared += 1;
                record.changes_recorded += 1;
            }

            let scopes: HashMap<&str, ScanScope> =
                stored.iter().map(|n| (n.id.as_str(), n.scope())).collect();
            let is_covered = |id: &str| scopes.get(id).is_some_and(|scope| covered.contains(scope));
            for edge in storage.list_edges(&EdgeFilter::default()).await? {
                if seen_edges.contains(edge.id.as_str()) {
                    continue;
                }
                let source = edge.source_node_id.as_str();
                let target = edge.target_node_id.as_str();
                // Inference needs both endpoints in the batch, so an edge is only
                // known to be gone when its source vanished or its target was
                // scanned too.
                let removable = is_covered(source)
                    && (!seen_nodes.contains(source)
                        || seen_nodes.contains(target)
                        || is_covered(target));
                if !removable {
                    continue;
                }
                if storage.delete_edge(&edge.id).await? {
                    let change = GraphChange::detected(&edge.id, ChangeType::EdgeRemoved)
                        .with_metadata("relationshipType", edge.relationship_type.as_str());
                    storage.append_change(change).await?;
                    record.edges_removed += 1;
                    record.changes_recorded += 1;
                }
            }
        }

        let live = storage
            .list_nodes(&NodeFilter {
                provider: Some(provider.clone()),
                live_only: true,
                ..Default::default()
            })
            .await?;
        record.total_cost_monthly = Some(live.iter().filter_map(|n| n.cost_monthly).sum());

        if !result.errors.is_empty() && result.covered.is_empty() {
            record.status = SyncStatus::Failed;
        }
        record.completed_at = Utc::now();
        record.duration_ms = (record.completed_at - started_at).num_milliseconds().max(0) as u64;
        storage.save_sync_record(record.clone()).await?;

        info!(
            provider = %provider,
            sync_id = %record.id,
            created = record.nodes_created,
            updated = record.nodes_updated,
            disappeared = record.nodes_disappeared,
            edges_created = record.edges_created,
            edges_removed = record.edges_removed,
            errors = record.errors.len(),
            "Sync recorded"
        );
        if let Some(bus) = &self.bus {
            bus.publish(GraphEvent::SyncRecorded {
                provider,
                sync_id: record.id.clone(),
                changes: record.changes_recorded,
            });
        }
        Ok(record)
    }

    /// Record changes for mutating, successful audit events on known nodes.
    ///
    /// An event already recorded (same provider and event id) is skipped, so
    /// overlapping polls are harmless.
    pub async fn record_events(
        &self,
        storage: &dyn GraphStorage,
        events: &[CloudEvent],
    ) -> Result<Vec<GraphChange>, StorageError> {
        let mut nodes_by_provider: HashMap<String, Vec<GraphNode>> = HashMap::new();
        let mut per_provider: BTreeMap<String, (usize, usize)> = BTreeMap::new();
        let mut recorded = Vec::new();

        for event in events {
            per_provider.entry(event.provider.clone()).or_default().0 += 1;
            if !event.is_mutation() {
                continue;
            }
            let Some(resource_id) = event.resource_id.as_deref() else {
                continue;
            };
            if !nodes_by_provider.contains_key(&event.provider) {
                let nodes = storage
                    .list_nodes(&NodeFilter::provider(&event.provider))
                    .await?;
                nodes_by_provider.insert(event.provider.clone(), nodes);
            }
            let nodes = nodes_by_provider
                .get(&event.provider)
                .map(Vec::as_slice)
                .unwrap_or_default();
            let Some(node) = match_node(nodes, resource_id) else {
                debug!(
                    provider = %event.provider,
                    resource = resource_id,
                    event = %event.event_type,
                    "Audit event for unknown resource"
                );
                continue;
            };

            let existing = storage.list_changes_for_target(&node.id).await?;
            let duplicate = existing.iter().any(|c| {
                c.detected_via == DetectedVia::EventStream
                    && c.metadata.get("eventId").and_then(Value::as_str) == Some(event.event_id.as_str())
            });
            if duplicate {
                continue;
            }

            let change_type = if event.is_delete() {
                ChangeType::NodeDeleted
            } else {
                ChangeType::NodeUpdated
            };
            let mut change = GraphChange::detected(&node.id, change_type)
                .with_metadata("eventId", event.event_id.as_str())
                .with_metadata("eventType", event.event_type.as_str())
                .with_metadata("eventTime", event.timestamp.to_rfc3339());
            change.detected_via = DetectedVia::EventStream;
            change.initiator_type = event.actor_type;
            change.initiator = event.actor.clone();
            change.correlation_id = self.correlation.as_ref().and_then(|r| r.correlate(event));
            if let Some(region) = &event.region {
                change = change.with_metadata("region", region.as_str());
            }

            storage.append_change(change.clone()).await?;
            per_provider.entry(event.provider.clone()).or_default().1 += 1;
            recorded.push(change);
        }

        for (provider, (events, changes)) in per_provider {
            debug!(provider = %provider, events, changes, "Audit events recorded");
            if let Some(bus) = &self.bus {
                bus.publish(GraphEvent::EventsRecorded {
                    provider,
                    events,
                    changes,
                });
            }
        }
        Ok(recorded)
    }
}

/// Find the node an audit resource id refers to.
fn match_node<'a>(nodes: &'a [GraphNode], resource_id: &str) -> Option<&'a GraphNode> {
    nodes
        .iter()
        .find(|n| n.native_id.eq_ignore_ascii_case(resource_id))
        .or_else(|| {
            let short = extract_resource_id(resource_id);
            nodes
                .iter()
                .find(|n| n.native_id == short || extract_resource_id(&n.native_id) == short)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryGraphStorage;
    use crate::types::{DiscoveredVia, GraphEdge, InitiatorType};
    use pretty_assertions::assert_eq;

    fn node(native: &str) -> GraphNode {
        GraphNode::new("aws", "123", "us-east-1", "compute", native)
    }

    fn batch(nodes: Vec<GraphNode>, edges: Vec<GraphEdge>) -> DiscoveryResult {
        DiscoveryResult {
            provider: "aws".into(),
            nodes,
            edges,
            covered: vec![ScanScope::new("aws", "123", "us-east-1", "compute")],
            ..Default::default()
        }
    }

    #[test]
    fn test_diff_nodes_ignores_bookkeeping() {
        let a = node("i-1").with_tag("env", "prod");
        let mut b = a.clone();
        b.last_seen_at = Utc::now() + chrono::Duration::hours(1);
        assert!(diff_nodes(&a, &b).is_empty());

        let mut c = b.clone().with_name("web").with_cost(12.0);
        c.tags.clear();
        let fields: Vec<String> = diff_nodes(&a, &c).into_iter().map(|d| d.field).collect();
        assert_eq!(fields, vec!["name", "costMonthly", "tags.env"]);
    }

    #[test]
    fn test_field_list_drift() {
        let policy = FieldListDrift::new(vec!["status".into(), "metadata.".into()]);
        let n = node("i-1");
        assert!(policy.is_drift(&n, "status"));
        assert!(policy.is_drift(&n, "metadata.size"));
        assert!(!policy.is_drift(&n, "name"));
        assert!(!NoDrift.is_drift(&n, "status"));
    }

    #[tokio::test]
    async fn test_first_sync_creates_then_idempotent() {
        let store = InMemoryGraphStorage::new();
        let recorder = ChangeRecorder::new();
        let a = node("i-1");
        let b = node("i-2");
        let edge = GraphEdge::new(&a.id, "depends-on", &b.id, 0.9, DiscoveredVia::ApiField);
        let result = batch(vec![a, b], vec![edge]);

        let first = recorder.record_sync(&store, &result, Utc::now()).await.unwrap();
        assert_eq!(first.nodes_created, 2);
        assert_eq!(first.edges_created, 1);
        assert_eq!(first.changes_recorded, 3);
        assert_eq!(first.status, SyncStatus::Completed);

        let second = recorder.record_sync(&store, &result, Utc::now()).await.unwrap();
        assert_eq!(second.changes_recorded, 0);
        assert_eq!(store.get_stats().await.unwrap().total_changes, 3);
    }

    #[tokio::test]
    async fn test_updates_drift_and_disappearance() {
        let store = InMemoryGraphStorage::new();
        let recorder = ChangeRecorder::new()
            .with_drift_policy(|_: &GraphNode, field: &str| field.starts_with("tags."));
        let a = node("i-1");
        let b = node("i-2");
        let c = node("i-3");
        recorder
            .record_sync(&store, &batch(vec![a.clone(), b.clone(), c], vec![]), Utc::now())
            .await
            .unwrap();

        let renamed = a.clone().with_name("api").with_tag("env", "prod");
        let record = recorder
            .record_sync(&store, &batch(vec![renamed, b], vec![]), Utc::now())
            .await
            .unwrap();
        assert_eq!(record.nodes_updated, 1);
        assert_eq!(record.nodes_disappeared, 1);

        let changes = store.list_changes_for_target(&a.id).await.unwrap();
        let kinds: Vec<ChangeType> = changes.iter().map(|c| c.change_type).collect();
        assert!(kinds.contains(&ChangeType::NodeUpdated));
        assert!(kinds.contains(&ChangeType::NodeDrifted));

        let gone = store.get_node("aws:123:us-east-1:compute:i-3").await.unwrap().unwrap();
        assert_eq!(gone.status, NodeStatus::Disappeared);
    }

    #[tokio::test]
    async fn test_uncovered_scope_never_disappears() {
        let store = InMemoryGraphStorage::new();
        let recorder = ChangeRecorder::new();
        recorder
            .record_sync(&store, &batch(vec![node("i-1")], vec![]), Utc::now())
            .await
            .unwrap();
        let mut partial = batch(vec![], vec![]);
        partial.covered.clear();
        partial
            .errors
            .push(crate::error::DiscoveryError::fetch_failed("aws", "compute", vec![], "boom"));
        let record = recorder.record_sync(&store, &partial, Utc::now()).await.unwrap();
        assert_eq!(record.nodes_disappeared, 0);
        assert_eq!(record.status, SyncStatus::Failed);
        assert_eq!(record.errors.len(), 1);
    }

    #[tokio::test]
    async fn test_edge_removed_when_not_reobserved() {
        let store = InMemoryGraphStorage::new();
        let recorder = ChangeRecorder::new();
        let a = node("i-1");
        let b = node("i-2");
        let edge = GraphEdge::new(&a.id, "depends-on", &b.id, 0.9, DiscoveredVia::ApiField);
        recorder
            .record_sync(&store, &batch(vec![a.clone(), b.clone()], vec![edge.clone()]), Utc::now())
            .await
            .unwrap();
        let record = recorder
            .record_sync(&store, &batch(vec![a, b], vec![]), Utc::now())
            .await
            .unwrap();
        assert_eq!(record.edges_removed, 1);
        assert!(store.get_edge(&edge.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_edge_kept_when_target_scope_unscanned() {
        let store = InMemoryGraphStorage::new();
        let recorder = ChangeRecorder::new();
        let vm = node("i-1");
        let vpc = GraphNode::new("aws", "123", "us-east-1", "vpc", "vpc-1");
        let edge = GraphEdge::new(&vm.id, "runs-in", &vpc.id, 1.0, DiscoveredVia::ApiField);
        let mut full = batch(vec![vm.clone(), vpc.clone()], vec![edge.clone()]);
        full.covered
            .push(ScanScope::new("aws", "123", "us-east-1", "vpc"));
        recorder.record_sync(&store, &full, Utc::now()).await.unwrap();

        // Only compute was listed; the vpc type failed.
        let record = recorder
            .record_sync(&store, &batch(vec![vm.clone()], vec![]), Utc::now())
            .await
            .unwrap();
        assert_eq!(record.edges_removed, 0);
        assert_eq!(record.nodes_disappeared, 0);
        assert!(store.get_edge(&edge.id).await.unwrap().is_some());

        // Once the source itself vanishes the edge goes with it.
        let record = recorder
            .record_sync(&store, &batch(vec![], vec![]), Utc::now())
            .await
            .unwrap();
        assert_eq!(record.nodes_disappeared, 1);
        assert_eq!(record.edges_removed, 1);
    }

    #[tokio::test]
    async fn test_record_events() {
        let store = InMemoryGraphStorage::new();
        store.upsert_node(node("i-1")).await.unwrap();
        let recorder = ChangeRecorder::new().with_correlation(|e: &CloudEvent| {
            (e.event_type == "StopInstances").then(|| "CHG-42".to_string())
        });
        let event = |id: &str, kind: &str, success: bool| CloudEvent {
            provider: "aws".into(),
            event_id: id.into(),
            event_type: kind.into(),
            actor: Some("deploy-bot".into()),
            actor_type: InitiatorType::Agent,
            resource_id: Some("arn:aws:ec2:us-east-1:123:instance/i-1".into()),
            region: Some("us-east-1".into()),
            timestamp: Utc::now(),
            read_only: false,
            success,
        };
        let events = vec![
            event("e1", "StopInstances", true),
            event("e2", "TerminateInstances", true),
            event("e3", "ModifyInstanceAttribute", false),
        ];
        let changes = recorder.record_events(&store, &events).await.unwrap();
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].change_type, ChangeType::NodeUpdated);
        assert_eq!(changes[0].correlation_id.as_deref(), Some("CHG-42"));
        assert_eq!(changes[1].change_type, ChangeType::NodeDeleted);
        assert_eq!(changes[1].detected_via, DetectedVia::EventStream);
        assert_eq!(changes[1].initiator.as_deref(), Some("deploy-bot"));

        let again = recorder.record_events(&store, &events).await.unwrap();
        assert!(again.is_empty());
    }
}
