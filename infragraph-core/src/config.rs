//! Configuration system for InfraGraph.
//!
//! Uses `figment` for layered configuration: defaults -> user config file ->
//! explicit config file -> environment -> programmatic overrides. The user
//! config lives at `<config dir>/infragraph/config.toml`.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::relationships::RelationshipRuleDef;
use crate::types::ChangeType;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InfraGraphConfig {
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub drift: DriftConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Scheduler, alert rule, and dispatch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Delay between the end of one cycle and the start of the next.
    pub interval_ms: u64,
    /// Window in which a repeated `(rule, affected nodes)` alert is suppressed.
    pub alert_cooldown_ms: u64,
    pub max_alerts_per_cycle: usize,
    /// Rule ids that are never evaluated.
    #[serde(default)]
    pub disabled_rules: Vec<String>,
    /// Orphan alerts above this monthly cost are critical.
    pub orphan_critical_cost: f64,
    /// A hub needs strictly more than this many exclusive dependents.
    pub spof_min_dependents: usize,
    pub cost_anomaly_warning: f64,
    pub cost_anomaly_critical: f64,
    /// Change types the unauthorized-change rule inspects.
    pub unauthorized_change_types: Vec<ChangeType>,
    /// Per-destination dispatch timeout. Unset means no timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dispatch_timeout_ms: Option<u64>,
    /// How far back the first event-source poll reaches.
    pub event_lookback_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_ms: 5 * 60 * 1000,
            alert_cooldown_ms: 60 * 60 * 1000,
            max_alerts_per_cycle: 50,
            disabled_rules: Vec::new(),
            orphan_critical_cost: 1000.0,
            spof_min_dependents: 5,
            cost_anomaly_warning: 0.20,
            cost_anomaly_critical: 0.50,
            unauthorized_change_types: vec![
                ChangeType::NodeUpdated,
                ChangeType::NodeDrifted,
                ChangeType::NodeDeleted,
            ],
            dispatch_timeout_ms: None,
            event_lookback_ms: 15 * 60 * 1000,
        }
    }
}

/// One provider account to scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// `aws`, `azure`, or `gcp`.
    pub provider: String,
    /// Account, subscription, or project id.
    pub account: String,
    #[serde(default)]
    pub regions: Vec<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

/// What to discover and how.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    /// Restrict scans to these resource types. Empty means every supported type.
    #[serde(default)]
    pub resource_types: Vec<String>,
    /// Only keep resources carrying all of these tags.
    #[serde(default)]
    pub tags: HashMap<String, String>,
    /// Maximum nodes returned per scan.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    /// Relationship rules appended to every provider profile's built-ins.
    #[serde(default)]
    pub extra_rules: Vec<RelationshipRuleDef>,
}

/// Where the graph is kept.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// JSON snapshot path for the in-memory store. Unset keeps the graph in memory only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_path: Option<PathBuf>,
}

/// Fields whose changes are recorded as drift instead of ordinary updates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DriftConfig {
    /// Exact change field names (`status`, `tags.env`) or prefixes ending in
    /// `.` (`metadata.`).
    #[serde(default)]
    pub sensitive_fields: Vec<String>,
}

/// Tracing output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default `EnvFilter` directive when `RUST_LOG` is unset.
    pub level: String,
    /// Also write JSON logs to a daily-rotated file under `log_dir`.
    #[serde(default)]
    pub json: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            log_dir: None,
        }
    }
}

impl InfraGraphConfig {
    /// Load the layered configuration and validate it.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path
            && !path.exists()
        {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let config = load_config(path, None).map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that can never produce a working monitor.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: String| Err(ConfigError::Invalid { message });
        let m = &self.monitor;
        if m.interval_ms == 0 {
            return invalid("monitor.interval_ms must be greater than zero".into());
        }
        if m.max_alerts_per_cycle == 0 {
            return invalid("monitor.max_alerts_per_cycle must be greater than zero".into());
        }
        if m.cost_anomaly_warning <= 0.0 || m.cost_anomaly_critical < m.cost_anomaly_warning {
            return invalid(format!(
                "cost anomaly thresholds must satisfy 0 < warning ({}) <= critical ({})",
                m.cost_anomaly_warning, m.cost_anomaly_critical
            ));
        }
        if m.orphan_critical_cost < 0.0 {
            return invalid("monitor.orphan_critical_cost must not be negative".into());
        }
        for rule in &self.discovery.extra_rules {
            if !(0.0..=1.0).contains(&rule.confidence) {
                return invalid(format!(
                    "relationship rule {}.{} has confidence {} outside [0, 1]",
                    rule.source_resource_type, rule.field, rule.confidence
                ));
            }
        }
        for provider in &self.discovery.providers {
            if provider.provider.trim().is_empty() || provider.account.trim().is_empty() {
                return invalid("discovery providers need both a provider and an account".into());
            }
        }
        Ok(())
    }
}

/// Load configuration by merging defaults, config files, environment
/// variables (`INFRAGRAPH_MONITOR__INTERVAL_MS`, ...), and overrides.
pub fn load_config(
    path: Option<&Path>,
    overrides: Option<&InfraGraphConfig>,
) -> Result<InfraGraphConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(InfraGraphConfig::default()));

    if let Some(dirs) = directories::ProjectDirs::from("dev", "infragraph", "infragraph") {
        let user_config = dirs.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(path) = path {
        figment = figment.merge(Toml::file(path));
    }

    figment = figment.merge(Env::prefixed("INFRAGRAPH_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}
