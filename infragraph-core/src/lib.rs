//! # InfraGraph Core
//!
//! Core library for the InfraGraph multi-cloud resource graph.
//! Provides the graph model and storage contract, field-path resolution,
//! relationship inference, the generic discovery adapter, audit event
//! normalization, change recording, timeline queries, configuration,
//! and tracing setup.

pub mod config;
pub mod discovery;
pub mod error;
pub mod events;
pub mod recorder;
pub mod relationships;
pub mod resolver;
pub mod sources;
pub mod storage;
pub mod telemetry;
pub mod timeline;
pub mod types;

// Re-export commonly used types at the crate root.
pub use config::{InfraGraphConfig, MonitorConfig, load_config};
pub use discovery::{
    CapabilityRegistry, DiscoverOptions, DiscoveryAdapter, DiscoveryResult,
    GenericDiscoveryAdapter, ProviderProfile, ResourceFetcher,
};
pub use error::{
    ConfigError, DiscoveryError, DispatchError, EventSourceError, FetchError, InfraGraphError,
    MonitorError, Result, StorageError,
};
pub use events::{EventBus, GraphEvent};
pub use recorder::ChangeRecorder;
pub use relationships::{RelationshipEngine, RelationshipRule, extract_resource_id};
pub use resolver::{FieldPath, resolve_field_path};
pub use sources::{AuditEventSource, AuditFormat, CloudEvent, EventSource};
pub use storage::{EdgeFilter, GraphStorage, InMemoryGraphStorage, NodeFilter};
pub use types::{
    ChangeType, DetectedVia, DiscoveredVia, GraphChange, GraphEdge, GraphNode, GraphStats,
    InitiatorType, NodeStatus, ResourceType, ScanScope, SyncRecord, SyncStatus, build_edge_id,
    build_node_id,
};
