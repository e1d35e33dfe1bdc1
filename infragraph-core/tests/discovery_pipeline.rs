//! End-to-end tests for the discovery pipeline.
//!
//! Fake per-service fetchers feed the AWS profile through the generic
//! adapter, the change recorder, and in-memory storage.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use infragraph_core::discovery::providers;
use infragraph_core::error::{DiscoveryErrorKind, FetchError};
use infragraph_core::timeline::{diff_graph, node_timeline};
use infragraph_core::{
    CapabilityRegistry, ChangeRecorder, ChangeType, DiscoverOptions, DiscoveryAdapter,
    EdgeFilter, EventBus, GenericDiscoveryAdapter, GraphEvent, GraphStorage,
    InMemoryGraphStorage, NodeStatus, ResourceFetcher, SyncStatus, build_node_id,
};

/// A fetcher whose records and failures can be changed between scans.
struct Scripted {
    service: &'static str,
    records: Mutex<HashMap<String, Vec<Value>>>,
    failing: Mutex<HashSet<String>>,
}

impl Scripted {
    fn new(service: &'static str) -> Arc<Self> {
        Arc::new(Self {
            service,
            records: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
        })
    }

    fn set(&self, resource_type: &str, records: Vec<Value>) {
        self.records
            .lock()
            .unwrap()
            .insert(resource_type.to_string(), records);
    }

    fn fail(&self, resource_type: &str, failing: bool) {
        let mut set = self.failing.lock().unwrap();
        if failing {
            set.insert(resource_type.to_string());
        } else {
            set.remove(resource_type);
        }
    }
}

#[async_trait]
impl ResourceFetcher for Scripted {
    fn service(&self) -> &str {
        self.service
    }

    async fn list(&self, resource_type: &str, _region: &str) -> Result<Vec<Value>, FetchError> {
        if self.failing.lock().unwrap().contains(resource_type) {
            return Err(FetchError::AccessDenied {
                message: format!("not authorized to list {resource_type}"),
            });
        }
        Ok(self
            .records
            .lock()
            .unwrap()
            .get(resource_type)
            .cloned()
            .unwrap_or_default())
    }
}

fn instance(id: &str, instance_type: &str) -> Value {
    json!({
        "InstanceId": id,
        "InstanceType": instance_type,
        "State": {"Name": "running"},
        "VpcId": "vpc-1",
        "Tags": [{"Key": "Name", "Value": format!("web-{id}")}, {"Key": "owner", "Value": "platform"}]
    })
}

struct Harness {
    ec2: Arc<Scripted>,
    rds: Arc<Scripted>,
    adapter: GenericDiscoveryAdapter,
    recorder: ChangeRecorder,
    storage: InMemoryGraphStorage,
    bus: EventBus,
}

fn harness() -> Harness {
    let bus = EventBus::new(64);
    let ec2 = Scripted::new("ec2");
    let rds = Scripted::new("rds");
    ec2.set("vpc", vec![json!({"VpcId": "vpc-1", "State": "available"})]);
    ec2.set(
        "compute",
        vec![instance("i-1", "m5.large"), instance("i-2", "t3.micro")],
    );
    rds.set(
        "database",
        vec![json!({"DBInstanceIdentifier": "orders", "DBInstanceStatus": "available", "DBInstanceClass": "db.t3.micro"})],
    );

    let mut registry = CapabilityRegistry::new().with_bus(bus.clone());
    registry.register("aws", ec2.clone());
    registry.register("aws", rds.clone());
    let adapter = GenericDiscoveryAdapter::new(
        providers::aws(),
        "123456789012",
        vec!["us-east-1".into()],
        &registry,
    )
    .with_bus(bus.clone());

    Harness {
        ec2,
        rds,
        adapter,
        recorder: ChangeRecorder::new().with_bus(bus.clone()),
        storage: InMemoryGraphStorage::new(),
        bus,
    }
}

fn node_id(resource_type: &str, native_id: &str) -> String {
    build_node_id("aws", "123456789012", "us-east-1", resource_type, native_id)
}

#[tokio::test]
async fn test_first_scan_creates_nodes_and_edges() {
    let h = harness();
    let mut rx = h.bus.subscribe();

    let result = h.adapter.discover(DiscoverOptions::default()).await;
    assert!(result.is_complete());
    let record = h
        .recorder
        .record_sync(&h.storage, &result, Utc::now())
        .await
        .unwrap();

    assert_eq!(record.status, SyncStatus::Completed);
    assert_eq!(record.nodes_created, 4);
    assert_eq!(record.edges_created, 2);
    assert_eq!(record.changes_recorded, 6);

    let vm = h
        .storage
        .get_node(&node_id("compute", "i-1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(vm.name, "web-i-1");
    assert_eq!(vm.owner.as_deref(), Some("platform"));
    assert_eq!(vm.cost_monthly, Some(70.08));

    let vpc_edges = h
        .storage
        .list_edges(&EdgeFilter::touching(node_id("vpc", "vpc-1")))
        .await
        .unwrap();
    assert_eq!(vpc_edges.len(), 2);
    assert!(vpc_edges.iter().all(|e| e.relationship_type == "runs-in"));

    let mut names = Vec::new();
    while let Ok(event) = rx.try_recv() {
        names.push(event.event_name());
    }
    assert!(names.contains(&"fetch_completed"));
    assert!(names.contains(&"discovery_completed"));
    assert!(names.contains(&"sync_recorded"));
}

#[tokio::test]
async fn test_rescan_is_idempotent() {
    let h = harness();
    for _ in 0..2 {
        let result = h.adapter.discover(DiscoverOptions::default()).await;
        h.recorder
            .record_sync(&h.storage, &result, Utc::now())
            .await
            .unwrap();
    }
    let result = h.adapter.discover(DiscoverOptions::default()).await;
    let record = h
        .recorder
        .record_sync(&h.storage, &result, Utc::now())
        .await
        .unwrap();
    assert_eq!(record.changes_recorded, 0);
    assert_eq!(record.nodes_updated, 0);

    let stats = h.storage.get_stats().await.unwrap();
    assert_eq!(stats.total_nodes, 4);
    assert_eq!(stats.total_changes, 6);
}

#[tokio::test]
async fn test_failed_type_does_not_mark_nodes_disappeared() {
    let h = harness();
    let start = Utc::now() - Duration::seconds(1);
    let first = h.adapter.discover(DiscoverOptions::default()).await;
    h.recorder
        .record_sync(&h.storage, &first, Utc::now())
        .await
        .unwrap();

    // i-2 is gone and the database listing is now denied.
    h.ec2.set("compute", vec![instance("i-1", "m5.large")]);
    h.rds.fail("database", true);

    let second = h.adapter.discover(DiscoverOptions::default()).await;
    assert_eq!(second.errors.len(), 1);
    assert_eq!(second.errors[0].kind, DiscoveryErrorKind::FetchFailed);
    assert_eq!(second.errors[0].resource_type.as_deref(), Some("database"));

    let record = h
        .recorder
        .record_sync(&h.storage, &second, Utc::now())
        .await
        .unwrap();
    assert_eq!(record.status, SyncStatus::Completed);
    assert_eq!(record.nodes_disappeared, 1);
    assert_eq!(record.edges_removed, 1);
    assert_eq!(record.errors.len(), 1);

    let gone = h
        .storage
        .get_node(&node_id("compute", "i-2"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(gone.status, NodeStatus::Disappeared);
    let db = h
        .storage
        .get_node(&node_id("database", "orders"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(db.status, NodeStatus::Running);

    // m5.large plus db.t3.micro; the vanished t3.micro no longer counts.
    let total = record.total_cost_monthly.unwrap();
    assert!((total - (70.08 + 12.41)).abs() < 1e-9);

    let diff = diff_graph(&h.storage, start, Utc::now()).await.unwrap();
    assert!(diff.nodes_removed.contains(&node_id("compute", "i-2")));

    let timeline = node_timeline(&h.storage, &node_id("compute", "i-2"))
        .await
        .unwrap();
    let kinds: Vec<ChangeType> = timeline.changes.iter().map(|c| c.change_type).collect();
    assert!(kinds.contains(&ChangeType::NodeCreated));
    assert!(kinds.contains(&ChangeType::NodeDisappeared));
}

#[tokio::test]
async fn test_failed_target_type_keeps_edges() {
    let h = harness();
    let first = h.adapter.discover(DiscoverOptions::default()).await;
    h.recorder
        .record_sync(&h.storage, &first, Utc::now())
        .await
        .unwrap();

    h.ec2.fail("vpc", true);
    let second = h.adapter.discover(DiscoverOptions::default()).await;
    assert_eq!(second.errors.len(), 1);
    let record = h
        .recorder
        .record_sync(&h.storage, &second, Utc::now())
        .await
        .unwrap();
    assert_eq!(record.edges_removed, 0);
    assert_eq!(record.nodes_disappeared, 0);

    let vpc = h
        .storage
        .get_node(&node_id("vpc", "vpc-1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(vpc.status, NodeStatus::Running);
    let vpc_edges = h
        .storage
        .list_edges(&EdgeFilter::touching(node_id("vpc", "vpc-1")))
        .await
        .unwrap();
    assert_eq!(vpc_edges.len(), 2);
}

#[tokio::test]
async fn test_status_change_records_update() {
    let h = harness();
    let first = h.adapter.discover(DiscoverOptions::default()).await;
    h.recorder
        .record_sync(&h.storage, &first, Utc::now())
        .await
        .unwrap();

    let mut stopped = instance("i-1", "m5.large");
    stopped["State"]["Name"] = json!("stopped");
    h.ec2.set("compute", vec![stopped, instance("i-2", "t3.micro")]);

    let second = h.adapter.discover(DiscoverOptions::default()).await;
    let record = h
        .recorder
        .record_sync(&h.storage, &second, Utc::now())
        .await
        .unwrap();
    assert_eq!(record.nodes_updated, 1);

    let changes = h
        .storage
        .list_changes_for_target(&node_id("compute", "i-1"))
        .await
        .unwrap();
    let update = changes
        .iter()
        .find(|c| c.change_type == ChangeType::NodeUpdated)
        .unwrap();
    assert_eq!(update.field.as_deref(), Some("status"));
    assert_eq!(update.previous_value, Some(json!("running")));
    assert_eq!(update.new_value, Some(json!("stopped")));
}

#[tokio::test]
async fn test_every_type_failing_marks_sync_failed() {
    let h = harness();
    for t in ["vpc", "subnet", "security-group", "compute"] {
        h.ec2.fail(t, true);
    }
    h.rds.fail("database", true);

    let result = h.adapter.discover(DiscoverOptions::default()).await;
    assert!(result.nodes.is_empty());
    assert!(result.covered.is_empty());
    let record = h
        .recorder
        .record_sync(&h.storage, &result, Utc::now())
        .await
        .unwrap();
    assert_eq!(record.status, SyncStatus::Failed);
    assert_eq!(record.errors.len(), 5);
}

#[tokio::test]
async fn test_fetch_events_carry_service_name() {
    let h = harness();
    let mut rx = h.bus.subscribe();
    h.adapter
        .discover(DiscoverOptions::default().with_resource_types(vec!["database".into()]))
        .await;
    let mut services = HashSet::new();
    while let Ok(event) = rx.try_recv() {
        if let GraphEvent::FetchCompleted { service, .. } = event {
            services.insert(service);
        }
    }
    assert_eq!(services, HashSet::from(["rds".to_string()]));
}
