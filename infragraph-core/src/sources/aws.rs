//! CloudTrail record normalization.
//!
//! Accepts both raw CloudTrail records and `LookupEvents` entries, whose
//! `CloudTrailEvent` field carries the raw record as a JSON string.

use serde_json::Value;

use super::{CloudEvent, first_str, parse_timestamp};
use crate::error::EventSourceError;
use crate::types::InitiatorType;

const READ_ONLY_PREFIXES: &[&str] = &["Describe", "List", "Get", "Head", "Lookup", "Search"];

/// `requestParameters` keys that name the target resource.
const RESOURCE_PARAMS: &[&str] = &[
    "instanceId",
    "dBInstanceIdentifier",
    "functionName",
    "bucketName",
    "roleName",
    "groupId",
    "vpcId",
    "subnetId",
    "loadBalancerArn",
    "endpointName",
];

pub fn parse_cloudtrail(record: &Value) -> Result<CloudEvent, EventSourceError> {
    if let Some(inner) = record.get("CloudTrailEvent").and_then(Value::as_str) {
        let parsed: Value = serde_json::from_str(inner).map_err(|e| EventSourceError::Malformed {
            message: format!("CloudTrailEvent is not JSON: {e}"),
        })?;
        return parse_cloudtrail(&parsed);
    }

    let event_id = first_str(&[record.get("eventID")]).ok_or_else(|| EventSourceError::Malformed {
        message: "CloudTrail record without eventID".into(),
    })?;
    let event_type = first_str(&[record.get("eventName")]).ok_or_else(|| {
        EventSourceError::Malformed {
            message: format!("CloudTrail record {event_id} without eventName"),
        }
    })?;
    let timestamp = parse_timestamp(record.get("eventTime"))?;

    let read_only = match record.get("readOnly") {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => READ_ONLY_PREFIXES.iter().any(|p| event_type.starts_with(p)),
    };
    let success = record.get("errorCode").is_none_or(Value::is_null);

    let identity = record.get("userIdentity");
    let (actor, actor_type) = resolve_actor(identity);

    Ok(CloudEvent {
        provider: "aws".into(),
        event_id,
        event_type,
        actor,
        actor_type,
        resource_id: resolve_resource(record),
        region: first_str(&[record.get("awsRegion")]),
        timestamp,
        read_only,
        success,
    })
}

fn resolve_actor(identity: Option<&Value>) -> (Option<String>, InitiatorType) {
    let Some(identity) = identity else {
        return (None, InitiatorType::System);
    };
    let issuer = identity.pointer("/sessionContext/sessionIssuer/userName");
    let actor = first_str(&[
        identity.get("userName"),
        issuer,
        identity.get("arn"),
        identity.get("principalId"),
        identity.get("invokedBy"),
    ]);

    let kind = identity.get("type").and_then(Value::as_str).unwrap_or_default();
    let actor_type = match kind {
        "IAMUser" | "Root" | "SAMLUser" | "IdentityCenterUser" => InitiatorType::Human,
        "AssumedRole" => {
            let sso = issuer
                .and_then(Value::as_str)
                .is_some_and(|n| n.starts_with("AWSReservedSSO_"));
            if sso {
                InitiatorType::Human
            } else {
                InitiatorType::Agent
            }
        }
        "WebIdentityUser" | "FederatedUser" => InitiatorType::Agent,
        _ => InitiatorType::System,
    };
    (actor, actor_type)
}

fn resolve_resource(record: &Value) -> Option<String> {
    if let Some(resources) = record.get("resources").and_then(Value::as_array)
        && let Some(first) = resources.first()
    {
        let id = first_str(&[first.get("ARN"), first.get("resourceName")]);
        if id.is_some() {
            return id;
        }
    }
    if let Some(resources) = record.get("Resources").and_then(Value::as_array)
        && let Some(id) = resources.first().and_then(|r| first_str(&[r.get("ResourceName")]))
    {
        return Some(id);
    }
    let params = record.get("requestParameters")?;
    if let Some(id) = params
        .pointer("/instancesSet/items/0/instanceId")
        .and_then(Value::as_str)
    {
        return Some(id.to_string());
    }
    RESOURCE_PARAMS
        .iter()
        .find_map(|key| first_str(&[params.get(*key)]))
}
