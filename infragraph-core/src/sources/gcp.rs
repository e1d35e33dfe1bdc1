//! GCP Cloud Audit Log entry normalization.

use serde_json::Value;

use super::{CloudEvent, first_str, parse_timestamp};
use crate::error::EventSourceError;
use crate::types::InitiatorType;

const READ_VERBS: &[&str] = &["get", "list", "search", "aggregatedlist", "testiampermissions"];

pub fn parse_audit_entry(entry: &Value) -> Result<CloudEvent, EventSourceError> {
    let event_id = first_str(&[entry.get("insertId")]).ok_or_else(|| EventSourceError::Malformed {
        message: "audit log entry without insertId".into(),
    })?;
    let payload = entry
        .get("protoPayload")
        .ok_or_else(|| EventSourceError::Malformed {
            message: format!("audit log entry {event_id} without protoPayload"),
        })?;
    let event_type = first_str(&[payload.get("methodName")]).ok_or_else(|| {
        EventSourceError::Malformed {
            message: format!("audit log entry {event_id} without methodName"),
        }
    })?;
    let timestamp = parse_timestamp(entry.get("timestamp"))?;

    let data_access = entry
        .get("logName")
        .and_then(Value::as_str)
        .is_some_and(|n| n.contains("data_access"));
    let verb = event_type
        .rsplit('.')
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();
    let read_only = data_access || READ_VERBS.iter().any(|v| verb.starts_with(v));

    let success = payload
        .pointer("/status/code")
        .and_then(Value::as_i64)
        .is_none_or(|code| code == 0);

    let auth = payload.get("authenticationInfo");
    let actor = first_str(&[
        auth.and_then(|a| a.get("principalEmail")),
        auth.and_then(|a| a.get("principalSubject")),
    ]);
    let actor_type = match actor.as_deref() {
        Some(a) if a.ends_with(".gserviceaccount.com") => InitiatorType::Agent,
        Some(a) if a.contains('@') => InitiatorType::Human,
        Some(a) if a.starts_with("serviceAccount:") => InitiatorType::Agent,
        _ => InitiatorType::System,
    };

    let labels = entry.pointer("/resource/labels");
    let region = first_str(&[
        labels.and_then(|l| l.get("region")),
        labels.and_then(|l| l.get("location")),
        labels.and_then(|l| l.get("zone")),
    ]);

    Ok(CloudEvent {
        provider: "gcp".into(),
        event_id,
        event_type,
        actor,
        actor_type,
        resource_id: first_str(&[payload.get("resourceName")]),
        region,
        timestamp,
        read_only,
        success,
    })
}
