//! Error types for the InfraGraph core library.
//!
//! Uses `thiserror` for public API error types with structured variants
//! covering storage, provider fetches, event sources, alert dispatch,
//! configuration, and the monitor scheduler.
//!
//! Discovery failures are deliberately *not* an error path: a failing
//! resource type is reported as a [`DiscoveryError`] value inside the
//! discovery result and the scan continues.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level error type for the InfraGraph core library.
#[derive(Debug, thiserror::Error)]
pub enum InfraGraphError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Event source error: {0}")]
    EventSource(#[from] EventSourceError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Monitor error: {0}")]
    Monitor(#[from] MonitorError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from a graph storage backend.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Backend failure: {message}")]
    Backend { message: String },

    #[error("Change {id} already recorded; changes are append-only")]
    DuplicateChange { id: String },

    #[error("Sync record {id} already saved")]
    DuplicateSyncRecord { id: String },

    #[error("Snapshot error at {path}: {message}")]
    Snapshot { path: PathBuf, message: String },
}

/// Errors returned by a per-service resource fetcher.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    #[error("Throttled by provider, retry after {retry_after_secs}s")]
    Throttled { retry_after_secs: u64 },

    #[error("Access denied: {message}")]
    AccessDenied { message: String },

    #[error("Credentials missing for {provider}")]
    MissingCredentials { provider: String },

    #[error("API call failed: {message}")]
    Api { message: String },

    #[error("Unsupported resource type: {resource_type}")]
    UnsupportedResourceType { resource_type: String },
}

/// Errors from an audit/activity event source.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EventSourceError {
    #[error("Audit log query failed for {provider}: {message}")]
    Query { provider: String, message: String },

    #[error("Malformed audit record: {message}")]
    Malformed { message: String },
}

/// Errors from delivering alerts to a destination.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DispatchError {
    #[error("Delivery to '{destination}' failed: {message}")]
    Delivery {
        destination: String,
        message: String,
    },

    #[error("Delivery to '{destination}' timed out after {timeout_ms}ms")]
    Timeout { destination: String, timeout_ms: u64 },

    #[error("Destination '{destination}' is closed")]
    Closed { destination: String },
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },
}

/// Errors from the monitor scheduler.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("Monitor timer is already running")]
    AlreadyStarted,

    #[error("Monitor timer is not running")]
    NotStarted,

    #[error("Duplicate alert rule id: {id}")]
    DuplicateRule { id: String },
}

/// Why a discovery error was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiscoveryErrorKind {
    /// One resource type's fetch failed; other types were still scanned.
    FetchFailed,
    /// No usable provider client at all; the result carries no nodes.
    AdapterUnavailable,
    /// The scan was cancelled before this resource type completed.
    Cancelled,
}

/// A non-fatal failure collected into a discovery result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{provider} discovery failed{}: {message}", .resource_type.as_deref().map(|t| format!(" for {t}")).unwrap_or_default())]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryError {
    pub provider: String,
    /// `None` for top-level failures that are not tied to one resource type.
    pub resource_type: Option<String>,
    /// Regions in which the fetch failed.
    #[serde(default)]
    pub regions: Vec<String>,
    pub kind: DiscoveryErrorKind,
    pub message: String,
}

impl DiscoveryError {
    /// A per-resource-type fetch failure.
    pub fn fetch_failed(
        provider: impl Into<String>,
        resource_type: impl Into<String>,
        regions: Vec<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            provider: provider.into(),
            resource_type: Some(resource_type.into()),
            regions,
            kind: DiscoveryErrorKind::FetchFailed,
            message: message.into(),
        }
    }

    /// The scan was cancelled while `resource_type` (if any) was in progress.
    pub fn cancelled(provider: impl Into<String>, resource_type: Option<String>) -> Self {
        Self {
            provider: provider.into(),
            resource_type,
            regions: Vec::new(),
            kind: DiscoveryErrorKind::Cancelled,
            message: "discovery cancelled".to_string(),
        }
    }

    /// A top-level "no usable client" failure.
    pub fn adapter_unavailable(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            resource_type: None,
            regions: Vec::new(),
            kind: DiscoveryErrorKind::AdapterUnavailable,
            message: message.into(),
        }
    }
}

/// A type alias for results using the top-level `InfraGraphError`.
pub type Result<T> = std::result::Result<T, InfraGraphError>;
