//! Provider profiles: the table-driven description of one cloud's resources.
//!
//! A profile tells the generic adapter where to find ids, names, statuses,
//! tags and sizes in each raw record, how to normalize provider status
//! vocabulary, what it costs, and which relationship rules apply.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;

use crate::relationships::{RelationshipRule, extract_resource_id};
use crate::resolver::{FieldPath, scalar_to_string};
use crate::types::{NodeStatus, ResourceType};

/// Region label for resources that are not regional.
pub const GLOBAL_REGION: &str = "global";

/// Tag keys that name a resource's owner, in preference order.
const OWNER_TAG_KEYS: &[&str] = &["owner", "Owner", "created-by", "CreatedBy", "team"];

/// How to read one resource type out of a service's raw records.
#[derive(Debug, Clone)]
pub struct ResourceKind {
    pub resource_type: ResourceType,
    /// Service whose fetcher lists this type.
    pub service: String,
    pub id_path: FieldPath,
    pub name_path: Option<FieldPath>,
    pub status_path: Option<FieldPath>,
    /// Field holding tags or labels, as a map or a `[{Key, Value}]` list.
    pub tags_path: Option<FieldPath>,
    pub created_at_path: Option<FieldPath>,
    /// Instance type / SKU used for exact price lookup and GPU detection.
    pub size_path: Option<FieldPath>,
    /// Attached accelerators. Any value marks the resource as GPU compute.
    pub accelerator_path: Option<FieldPath>,
    /// Other identifiers (ARNs, self links) relationship fields may use.
    pub alias_paths: Vec<FieldPath>,
    /// Listed once under [`GLOBAL_REGION`] instead of per region.
    pub global: bool,
}

impl ResourceKind {
    pub fn new(resource_type: &str, service: &str, id_path: &str) -> Self {
        Self {
            resource_type: resource_type.to_string(),
            service: service.to_string(),
            id_path: FieldPath::parse(id_path),
            name_path: None,
            status_path: None,
            tags_path: None,
            created_at_path: None,
            size_path: None,
            accelerator_path: None,
            alias_paths: Vec::new(),
            global: false,
        }
    }

    pub fn name(mut self, path: &str) -> Self {
        self.name_path = Some(FieldPath::parse(path));
        self
    }

    pub fn status(mut self, path: &str) -> Self {
        self.status_path = Some(FieldPath::parse(path));
        self
    }

    pub fn tags(mut self, path: &str) -> Self {
        self.tags_path = Some(FieldPath::parse(path));
        self
    }

    pub fn created_at(mut self, path: &str) -> Self {
        self.created_at_path = Some(FieldPath::parse(path));
        self
    }

    pub fn size(mut self, path: &str) -> Self {
        self.size_path = Some(FieldPath::parse(path));
        self
    }

    pub fn accelerators(mut self, path: &str) -> Self {
        self.accelerator_path = Some(FieldPath::parse(path));
        self
    }

    pub fn alias(mut self, path: &str) -> Self {
        self.alias_paths.push(FieldPath::parse(path));
        self
    }

    pub fn global(mut self) -> Self {
        self.global = true;
        self
    }

    pub fn native_id(&self, raw: &Value) -> Option<String> {
        self.id_path.resolve_first_string(raw)
    }

    pub fn display_name(&self, raw: &Value, tags: &HashMap<String, String>) -> Option<String> {
        self.name_path
            .as_ref()
            .and_then(|p| p.resolve_first_string(raw))
            .or_else(|| tags.get("Name").cloned())
    }

    pub fn raw_status(&self, raw: &Value) -> Option<String> {
        self.status_path.as_ref()?.resolve_first_string(raw)
    }

    pub fn size_key(&self, raw: &Value) -> Option<String> {
        let size = self.size_path.as_ref()?.resolve_first_string(raw)?;
        Some(extract_resource_id(&size))
    }

    pub fn created_at_value(&self, raw: &Value) -> Option<DateTime<Utc>> {
        let text = self.created_at_path.as_ref()?.resolve_first_string(raw)?;
        DateTime::parse_from_rfc3339(&text)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }

    pub fn tag_map(&self, raw: &Value) -> HashMap<String, String> {
        self.tags_path
            .as_ref()
            .and_then(|p| p.resolve_raw(raw).into_iter().next())
            .map(extract_tags)
            .unwrap_or_default()
    }

    pub fn aliases(&self, raw: &Value) -> Vec<String> {
        self.alias_paths
            .iter()
            .flat_map(|p| p.resolve_strings(raw))
            .collect()
    }

    pub fn has_accelerators(&self, raw: &Value) -> bool {
        self.accelerator_path.as_ref().is_some_and(|p| {
            p.resolve_raw(raw)
                .iter()
                .any(|v| !matches!(v, Value::Array(items) if items.is_empty()))
        })
    }
}

/// Read tags from either a `{key: value}` map or a list of key/value pairs.
pub fn extract_tags(value: &Value) -> HashMap<String, String> {
    let mut tags = HashMap::new();
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                if let Some(v) = scalar_to_string(v) {
                    tags.insert(k.clone(), v);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                let key = item.get("Key").or_else(|| item.get("key"));
                let val = item.get("Value").or_else(|| item.get("value"));
                if let (Some(k), Some(v)) = (key.and_then(scalar_to_string), val) {
                    tags.insert(k, scalar_to_string(v).unwrap_or_default());
                }
            }
        }
        _ => {}
    }
    tags
}

/// Pick an owner from well-known tag keys.
pub fn owner_from_tags(tags: &HashMap<String, String>) -> Option<String> {
    OWNER_TAG_KEYS
        .iter()
        .find_map(|k| tags.get(*k).filter(|v| !v.is_empty()).cloned())
}

/// Where a cost figure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CostSource {
    SkuLookup,
    StaticEstimate,
}

impl CostSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CostSource::SkuLookup => "sku-lookup",
            CostSource::StaticEstimate => "static-estimate",
        }
    }
}

/// Which kind of AI/ML workload a resource runs, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Workload {
    GpuCompute,
    ManagedAi,
}

impl Workload {
    pub fn as_str(&self) -> &'static str {
        match self {
            Workload::GpuCompute => "gpu-compute",
            Workload::ManagedAi => "managed-ai",
        }
    }
}

/// Everything the generic adapter needs to know about one provider.
#[derive(Debug, Clone)]
pub struct ProviderProfile {
    pub provider: String,
    pub kinds: Vec<ResourceKind>,
    /// Lowercased provider status string to normalized status.
    pub status_vocabulary: HashMap<String, NodeStatus>,
    pub rules: Vec<RelationshipRule>,
    /// Monthly price by exact instance type / SKU.
    pub sku_prices: HashMap<String, f64>,
    /// Flat monthly estimate by resource type.
    pub static_costs: HashMap<ResourceType, f64>,
    /// Size prefixes that identify GPU or accelerator instances.
    pub gpu_size_prefixes: Vec<String>,
    /// Resource types that are managed AI services.
    pub ai_resource_types: Vec<ResourceType>,
}

impl ProviderProfile {
    pub fn new(provider: &str) -> Self {
        Self {
            provider: provider.to_ascii_lowercase(),
            kinds: Vec::new(),
            status_vocabulary: HashMap::new(),
            rules: Vec::new(),
            sku_prices: HashMap::new(),
            static_costs: HashMap::new(),
            gpu_size_prefixes: Vec::new(),
            ai_resource_types: Vec::new(),
        }
    }

    pub fn kind(&self, resource_type: &str) -> Option<&ResourceKind> {
        self.kinds.iter().find(|k| k.resource_type == resource_type)
    }

    pub fn resource_types(&self) -> Vec<ResourceType> {
        self.kinds.iter().map(|k| k.resource_type.clone()).collect()
    }

    /// Map a provider status string into [`NodeStatus`].
    ///
    /// A resource without a status field is treated as running; a status
    /// outside the vocabulary is `Unknown`.
    pub fn normalize_status(&self, raw: Option<&str>) -> NodeStatus {
        match raw {
            None => NodeStatus::Running,
            Some(s) => self
                .status_vocabulary
                .get(&s.to_ascii_lowercase())
                .copied()
                .unwrap_or(NodeStatus::Unknown),
        }
    }

    /// Monthly cost: exact SKU price first, then the per-type estimate.
    pub fn estimate_cost(
        &self,
        resource_type: &str,
        size: Option<&str>,
    ) -> Option<(f64, CostSource)> {
        if let Some(price) = size.and_then(|s| self.sku_prices.get(s)) {
            return Some((*price, CostSource::SkuLookup));
        }
        self.static_costs
            .get(resource_type)
            .map(|c| (*c, CostSource::StaticEstimate))
    }

    pub fn classify_workload(
        &self,
        kind: &ResourceKind,
        raw: &Value,
        size: Option<&str>,
    ) -> Option<Workload> {
        if self.ai_resource_types.contains(&kind.resource_type) {
            return Some(Workload::ManagedAi);
        }
        let gpu_size = size.is_some_and(|s| {
            self.gpu_size_prefixes
                .iter()
                .any(|p| s.starts_with(p.as_str()))
        });
        if gpu_size || kind.has_accelerators(raw) {
            return Some(Workload::GpuCompute);
        }
        None
    }
}
