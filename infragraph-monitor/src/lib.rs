//! # InfraGraph Monitor
//!
//! Continuous monitoring over the InfraGraph resource graph: the
//! [`InfraMonitor`] scheduler, the built-in alert rules, cooldown tracking,
//! and alert destinations.

pub mod cooldown;
pub mod destinations;
pub mod monitor;
pub mod rules;

pub use cooldown::CooldownTracker;
pub use destinations::{AlertDestination, CallbackDestination, ChannelDestination, WebhookDestination};
pub use monitor::{CycleReport, InfraMonitor, MonitorState, MonitorStatus};
pub use rules::{AlertCategory, AlertInstance, AlertRule, AlertSeverity, RuleContext, builtin_rules};
