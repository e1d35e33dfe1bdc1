//! Azure Activity Log normalization.

use serde_json::Value;

use super::{CloudEvent, first_str, parse_timestamp};
use crate::error::EventSourceError;
use crate::types::InitiatorType;

const UPN_CLAIM: &str = "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/upn";
const NAME_CLAIM: &str = "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/name";

/// Value of a field that is either a string or `{ "value": "..." }`.
fn localized(record: &Value, key: &str) -> Option<String> {
    match record.get(key)? {
        Value::String(s) => Some(s.clone()),
        other => first_str(&[other.get("value")]),
    }
}

pub fn parse_activity(record: &Value) -> Result<CloudEvent, EventSourceError> {
    let event_id = first_str(&[record.get("eventDataId"), record.get("id")]).ok_or_else(|| {
        EventSourceError::Malformed {
            message: "activity log entry without eventDataId".into(),
        }
    })?;
    let event_type = localized(record, "operationName").ok_or_else(|| EventSourceError::Malformed {
        message: format!("activity log entry {event_id} without operationName"),
    })?;
    let timestamp = parse_timestamp(record.get("eventTimestamp"))?;

    let lower = event_type.to_ascii_lowercase();
    let read_only = lower.ends_with("/read") || lower.ends_with("/listkeys/action");
    let success = localized(record, "status").is_some_and(|s| s.eq_ignore_ascii_case("succeeded"));

    let claims = record.get("claims");
    let actor = first_str(&[
        claims.and_then(|c| c.get("name")),
        claims.and_then(|c| c.get(UPN_CLAIM)),
        claims.and_then(|c| c.get(NAME_CLAIM)),
        record.get("caller"),
    ]);
    let caller = first_str(&[record.get("caller")]).unwrap_or_default();
    let app = claims
        .and_then(|c| c.get("idtyp"))
        .and_then(Value::as_str)
        .is_some_and(|t| t == "app");
    let actor_type = if caller.contains('@') && !app {
        InitiatorType::Human
    } else if app || is_guid(&caller) {
        InitiatorType::Agent
    } else {
        InitiatorType::System
    };

    Ok(CloudEvent {
        provider: "azure".into(),
        event_id,
        event_type,
        actor,
        actor_type,
        resource_id: first_str(&[record.get("resourceId")]),
        region: first_str(&[record.get("resourceLocation"), record.get("location")]),
        timestamp,
        read_only,
        success,
    })
}

fn is_guid(s: &str) -> bool {
    let parts: Vec<&str> = s.split('-').collect();
    parts.len() == 5
        && parts
            .iter()
            .zip([8, 4, 4, 4, 12])
            .all(|(p, len)| p.len() == len && p.chars().all(|c| c.is_ascii_hexdigit()))
}
