//! Event sources: provider audit and activity logs as one canonical stream.
//!
//! Each provider's raw records (CloudTrail, Azure Activity Log, GCP Cloud
//! Audit Logs) are normalized into [`CloudEvent`]s. Read-only operations are
//! dropped unless asked for; failed or denied operations are kept but flagged
//! so the recorder can ignore them.

pub mod aws;
pub mod azure;
pub mod gcp;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::EventSourceError;
use crate::types::InitiatorType;

/// A normalized audit event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudEvent {
    pub provider: String,
    pub event_id: String,
    /// Provider operation name (`TerminateInstances`, `Microsoft.Compute/virtualMachines/write`).
    pub event_type: String,
    /// Human-readable identity when available, otherwise a principal id.
    pub actor: Option<String>,
    pub actor_type: InitiatorType,
    pub resource_id: Option<String>,
    pub region: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub read_only: bool,
    pub success: bool,
}

impl CloudEvent {
    /// Whether the operation removed the resource.
    pub fn is_delete(&self) -> bool {
        let op = self.event_type.to_ascii_lowercase();
        let verb = op.rsplit(['/', '.']).next().unwrap_or(op.as_str());
        ["delete", "terminate", "remove", "destroy"]
            .iter()
            .any(|v| verb.starts_with(v))
    }

    /// Whether this event can describe a change to the graph.
    pub fn is_mutation(&self) -> bool {
        !self.read_only && self.success && self.resource_id.is_some()
    }
}

/// A stream of normalized events from one provider.
#[async_trait]
pub trait EventSource: Send + Sync {
    fn provider(&self) -> &str;

    /// Events at or after `since`, oldest first.
    async fn fetch_events(&self, since: DateTime<Utc>) -> Result<Vec<CloudEvent>, EventSourceError>;

    async fn health_check(&self) -> bool;
}

/// Raw audit-log access for one provider.
#[async_trait]
pub trait AuditLogClient: Send + Sync {
    async fn query(&self, since: DateTime<Utc>) -> Result<Vec<Value>, EventSourceError>;

    async fn health_check(&self) -> bool {
        true
    }
}

/// Which provider record format a client returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuditFormat {
    CloudTrail,
    AzureActivity,
    GcpAudit,
}

impl AuditFormat {
    pub fn provider(&self) -> &'static str {
        match self {
            AuditFormat::CloudTrail => "aws",
            AuditFormat::AzureActivity => "azure",
            AuditFormat::GcpAudit => "gcp",
        }
    }

    pub fn parse(&self, record: &Value) -> Result<CloudEvent, EventSourceError> {
        match self {
            AuditFormat::CloudTrail => aws::parse_cloudtrail(record),
            AuditFormat::AzureActivity => azure::parse_activity(record),
            AuditFormat::GcpAudit => gcp::parse_audit_entry(record),
        }
    }
}

/// An [`EventSource`] over an [`AuditLogClient`] and a record format.
pub struct AuditEventSource {
    format: AuditFormat,
    client: Arc<dyn AuditLogClient>,
    include_read_only: bool,
}

impl AuditEventSource {
    pub fn new(format: AuditFormat, client: Arc<dyn AuditLogClient>) -> Self {
        Self {
            format,
            client,
            include_read_only: false,
        }
    }

    /// Keep read-only operations in the stream.
    pub fn with_read_only(mut self, include: bool) -> Self {
        self.include_read_only = include;
        self
    }
}

#[async_trait]
impl EventSource for AuditEventSource {
    fn provider(&self) -> &str {
        self.format.provider()
    }

    async fn fetch_events(&self, since: DateTime<Utc>) -> Result<Vec<CloudEvent>, EventSourceError> {
        let records = self.client.query(since).await?;
        let total = records.len();
        let mut events: Vec<CloudEvent> = records
            .iter()
            .filter_map(|record| match self.format.parse(record) {
                Ok(event) => Some(event),
                Err(e) => {
                    warn!(provider = self.format.provider(), error = %e, "Skipping malformed audit record");
                    None
                }
            })
            .filter(|e| e.timestamp >= since)
            .filter(|e| self.include_read_only || !e.read_only)
            .collect();
        events.sort_by_key(|e| e.timestamp);
        debug!(
            provider = self.format.provider(),
            records = total,
            events = events.len(),
            "Fetched audit events"
        );
        Ok(events)
    }

    async fn health_check(&self) -> bool {
        self.client.health_check().await
    }
}

/// Parse an RFC 3339 timestamp field.
pub(crate) fn parse_timestamp(value: Option<&Value>) -> Result<DateTime<Utc>, EventSourceError> {
    let text = value
        .and_then(Value::as_str)
        .ok_or_else(|| EventSourceError::Malformed {
            message: "missing timestamp".into(),
        })?;
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| EventSourceError::Malformed {
            message: format!("bad timestamp '{text}': {e}"),
        })
}

/// First non-empty string among `candidates`.
pub(crate) fn first_str(candidates: &[Option<&Value>]) -> Option<String> {
    candidates
        .iter()
        .filter_map(|v| v.and_then(Value::as_str))
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    struct Fixed(Vec<Value>);

    #[async_trait]
    impl AuditLogClient for Fixed {
        async fn query(&self, _since: DateTime<Utc>) -> Result<Vec<Value>, EventSourceError> {
            Ok(self.0.clone())
        }
    }

    fn trail(id: &str, name: &str, read_only: bool, at: DateTime<Utc>) -> Value {
        json!({
            "eventID": id,
            "eventName": name,
            "eventTime": at.to_rfc3339(),
            "awsRegion": "us-east-1",
            "readOnly": read_only,
            "userIdentity": {"type": "IAMUser", "userName": "alice"},
            "requestParameters": {"instanceId": "i-1"}
        })
    }

    #[tokio::test]
    async fn test_read_only_excluded_by_default() {
        let now = Utc::now();
        let client = Arc::new(Fixed(vec![
            trail("2", "StopInstances", false, now),
            trail("1", "DescribeInstances", true, now - Duration::seconds(5)),
            json!({"garbage": true}),
        ]));
        let since = now - Duration::minutes(1);

        let source = AuditEventSource::new(AuditFormat::CloudTrail, client.clone());
        let events = source.fetch_events(since).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "StopInstances");

        let all = AuditEventSource::new(AuditFormat::CloudTrail, client)
            .with_read_only(true)
            .fetch_events(since)
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].event_id, "1");
    }

    #[test]
    fn test_is_delete() {
        let mut event = aws::parse_cloudtrail(&trail("1", "TerminateInstances", false, Utc::now())).unwrap();
        assert!(event.is_delete());
        assert!(event.is_mutation());
        event.event_type = "Microsoft.Compute/virtualMachines/delete".into();
        assert!(event.is_delete());
        event.event_type = "v1.compute.instances.insert".into();
        assert!(!event.is_delete());
        event.success = false;
        assert!(!event.is_mutation());
    }
}
