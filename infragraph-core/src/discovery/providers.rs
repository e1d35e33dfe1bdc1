//! Built-in provider profiles for AWS, Azure and GCP.
//!
//! Prices are on-demand monthly figures (730 hours) for common sizes; any
//! other size falls back to the per-type static estimate.

use crate::relationships::RelationshipRule;
use crate::types::{DiscoveredVia, NodeStatus};

use super::profile::{ProviderProfile, ResourceKind};

/// Look up a built-in profile by provider name.
pub fn builtin_profile(provider: &str) -> Option<ProviderProfile> {
    match provider.to_ascii_lowercase().as_str() {
        "aws" => Some(aws()),
        "azure" => Some(azure()),
        "gcp" => Some(gcp()),
        _ => None,
    }
}

fn vocabulary(profile: &mut ProviderProfile, status: NodeStatus, words: &[&str]) {
    for word in words {
        profile.status_vocabulary.insert(word.to_string(), status);
    }
}

fn prices(profile: &mut ProviderProfile, table: &[(&str, f64)]) {
    for (sku, price) in table {
        profile.sku_prices.insert(sku.to_string(), *price);
    }
}

fn static_costs(profile: &mut ProviderProfile, table: &[(&str, f64)]) {
    for (resource_type, cost) in table {
        profile.static_costs.insert(resource_type.to_string(), *cost);
    }
}

pub fn aws() -> ProviderProfile {
    let mut p = ProviderProfile::new("aws");
    p.kinds = vec![
        ResourceKind::new("compute", "ec2", "InstanceId")
            .status("State.Name")
            .tags("Tags")
            .created_at("LaunchTime")
            .size("InstanceType")
            .accelerators("ElasticGpuAssociations[]"),
        ResourceKind::new("vpc", "ec2", "VpcId").tags("Tags").status("State"),
        ResourceKind::new("subnet", "ec2", "SubnetId")
            .tags("Tags")
            .status("State")
            .alias("SubnetArn"),
        ResourceKind::new("security-group", "ec2", "GroupId")
            .name("GroupName")
            .tags("Tags"),
        ResourceKind::new("load-balancer", "elbv2", "LoadBalancerArn")
            .name("LoadBalancerName")
            .status("State.Code")
            .created_at("CreatedTime"),
        ResourceKind::new("database", "rds", "DBInstanceIdentifier")
            .status("DBInstanceStatus")
            .tags("TagList")
            .created_at("InstanceCreateTime")
            .size("DBInstanceClass")
            .alias("DBInstanceArn"),
        ResourceKind::new("storage", "s3", "Name")
            .created_at("CreationDate")
            .global(),
        ResourceKind::new("function", "lambda", "FunctionName")
            .status("State")
            .tags("Tags")
            .alias("FunctionArn"),
        ResourceKind::new("iam-role", "iam", "RoleName")
            .tags("Tags")
            .created_at("CreateDate")
            .alias("Arn")
            .global(),
        ResourceKind::new("ml-endpoint", "sagemaker", "EndpointName")
            .status("EndpointStatus")
            .created_at("CreationTime")
            .alias("EndpointArn"),
    ];

    vocabulary(&mut p, NodeStatus::Running, &["running", "available", "active", "inservice", "in-use"]);
    vocabulary(&mut p, NodeStatus::Stopped, &["stopped", "stopping", "inactive", "outofservice"]);
    vocabulary(&mut p, NodeStatus::Creating, &["pending", "creating", "provisioning", "updating", "backing-up", "modifying"]);
    vocabulary(&mut p, NodeStatus::Deleting, &["shutting-down", "terminated", "deleting", "deleted"]);
    vocabulary(&mut p, NodeStatus::Error, &["failed", "error", "impaired", "incompatible-parameters"]);

    p.rules = vec![
        RelationshipRule::new("compute", "VpcId", "runs-in"),
        RelationshipRule::new("compute", "SubnetId", "runs-in"),
        RelationshipRule::new("compute", "SecurityGroups[].GroupId", "secured-by").array(),
        RelationshipRule::new("compute", "IamInstanceProfile.Arn", "uses").with_confidence(0.8),
        RelationshipRule::new("subnet", "VpcId", "part-of").via(DiscoveredVia::ParentChild),
        RelationshipRule::new("security-group", "VpcId", "part-of").via(DiscoveredVia::ParentChild),
        RelationshipRule::new("load-balancer", "VpcId", "runs-in"),
        RelationshipRule::new("load-balancer", "SecurityGroups", "secured-by").array(),
        RelationshipRule::new("load-balancer", "AvailabilityZones[].SubnetId", "runs-in").array(),
        RelationshipRule::new("database", "VpcSecurityGroups[].VpcSecurityGroupId", "secured-by").array(),
        RelationshipRule::new("database", "DBSubnetGroup.Subnets[].SubnetIdentifier", "runs-in").array(),
        RelationshipRule::new("function", "Role", "uses"),
        RelationshipRule::new("function", "VpcConfig.SubnetIds", "runs-in").array(),
        RelationshipRule::new("function", "VpcConfig.SecurityGroupIds", "secured-by").array(),
    ];

    prices(
        &mut p,
        &[
            ("t3.micro", 7.59),
            ("t3.small", 15.18),
            ("t3.medium", 30.37),
            ("t3.large", 60.74),
            ("m5.large", 70.08),
            ("m5.xlarge", 140.16),
            ("c5.large", 62.05),
            ("r5.large", 91.98),
            ("g4dn.xlarge", 383.98),
            ("g5.xlarge", 734.38),
            ("p3.2xlarge", 2233.80),
            ("p4d.24xlarge", 23922.10),
            ("db.t3.micro", 12.41),
            ("db.t3.medium", 49.64),
            ("db.m5.large", 124.83),
        ],
    );
    static_costs(
        &mut p,
        &[
            ("compute", 70.0),
            ("database", 125.0),
            ("load-balancer", 16.43),
            ("storage", 2.30),
            ("function", 5.0),
            ("ml-endpoint", 250.0),
        ],
    );
    p.gpu_size_prefixes = ["p2.", "p3.", "p4d.", "p5.", "g4dn.", "g5.", "g6.", "inf1.", "inf2.", "trn1.", "dl1."]
        .iter()
        .map(|s| s.to_string())
        .collect();
    p.ai_resource_types = vec!["ml-endpoint".to_string()];
    p
}

pub fn azure() -> ProviderProfile {
    let mut p = ProviderProfile::new("azure");
    p.kinds = vec![
        ResourceKind::new("compute", "compute", "id")
            .name("name")
            .status("properties.provisioningState")
            .tags("tags")
            .created_at("properties.timeCreated")
            .size("properties.hardwareProfile.vmSize"),
        ResourceKind::new("network-interface", "network", "id")
            .name("name")
            .status("properties.provisioningState")
            .tags("tags"),
        ResourceKind::new("vpc", "network", "id")
            .name("name")
            .status("properties.provisioningState")
            .tags("tags"),
        ResourceKind::new("subnet", "network", "id")
            .name("name")
            .status("properties.provisioningState"),
        ResourceKind::new("security-group", "network", "id")
            .name("name")
            .status("properties.provisioningState")
            .tags("tags"),
        ResourceKind::new("load-balancer", "network", "id")
            .name("name")
            .status("properties.provisioningState")
            .tags("tags"),
        ResourceKind::new("database", "sql", "id")
            .name("name")
            .status("properties.status")
            .tags("tags")
            .size("sku.name"),
        ResourceKind::new("storage", "storage", "id")
            .name("name")
            .status("properties.provisioningState")
            .tags("tags")
            .created_at("properties.creationTime"),
        ResourceKind::new("function", "web", "id")
            .name("name")
            .status("properties.state")
            .tags("tags"),
        ResourceKind::new("ml-workspace", "ml", "id")
            .name("name")
            .status("properties.provisioningState")
            .tags("tags"),
        ResourceKind::new("ml-endpoint", "cognitive", "id")
            .name("name")
            .status("properties.provisioningState")
            .tags("tags")
            .size("sku.name"),
    ];

    vocabulary(&mut p, NodeStatus::Running, &["succeeded", "running", "online", "ready", "available"]);
    vocabulary(&mut p, NodeStatus::Stopped, &["stopped", "deallocated", "paused", "offline", "disabled"]);
    vocabulary(&mut p, NodeStatus::Creating, &["creating", "updating", "accepted", "provisioning", "resolvingdns"]);
    vocabulary(&mut p, NodeStatus::Deleting, &["deleting", "deleted"]);
    vocabulary(&mut p, NodeStatus::Error, &["failed", "canceled", "error"]);

    p.rules = vec![
        RelationshipRule::new(
            "compute",
            "properties.networkProfile.networkInterfaces[].id",
            "attached-to",
        )
        .array(),
        RelationshipRule::new(
            "network-interface",
            "properties.ipConfigurations[].properties.subnet.id",
            "runs-in",
        )
        .array(),
        RelationshipRule::new(
            "network-interface",
            "properties.networkSecurityGroup.id",
            "secured-by",
        ),
        RelationshipRule::new("vpc", "properties.subnets[].id", "contains")
            .array()
            .via(DiscoveredVia::ParentChild),
        RelationshipRule::new("subnet", "properties.networkSecurityGroup.id", "secured-by"),
        RelationshipRule::new(
            "load-balancer",
            "properties.frontendIPConfigurations[].properties.subnet.id",
            "runs-in",
        )
        .array(),
        RelationshipRule::new(
            "function",
            "properties.virtualNetworkSubnetId",
            "runs-in",
        ),
        RelationshipRule::new(
            "ml-workspace",
            "properties.storageAccount",
            "uses",
        )
        .via(DiscoveredVia::IdHierarchy),
    ];

    prices(
        &mut p,
        &[
            ("Standard_B1s", 7.59),
            ("Standard_B2s", 30.37),
            ("Standard_D2s_v3", 70.08),
            ("Standard_D4s_v3", 140.16),
            ("Standard_E2s_v3", 91.98),
            ("Standard_NC6s_v3", 2233.80),
            ("Standard_NC24ads_A100_v4", 2681.67),
            ("Standard_ND40rs_v2", 16070.08),
            ("Standard_NV6", 832.20),
        ],
    );
    static_costs(
        &mut p,
        &[
            ("compute", 70.0),
            ("database", 150.0),
            ("load-balancer", 18.25),
            ("storage", 20.0),
            ("function", 10.0),
            ("ml-workspace", 0.0),
            ("ml-endpoint", 200.0),
        ],
    );
    p.gpu_size_prefixes = ["Standard_NC", "Standard_ND", "Standard_NV"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    p.ai_resource_types = vec!["ml-workspace".to_string(), "ml-endpoint".to_string()];
    p
}

pub fn gcp() -> ProviderProfile {
    let mut p = ProviderProfile::new("gcp");
    p.kinds = vec![
        ResourceKind::new("compute", "compute", "name")
            .status("status")
            .tags("labels")
            .created_at("creationTimestamp")
            .size("machineType")
            .accelerators("guestAccelerators[]")
            .alias("selfLink")
            .alias("id"),
        ResourceKind::new("vpc", "compute", "name")
            .alias("selfLink")
            .global(),
        ResourceKind::new("subnet", "compute", "name").alias("selfLink"),
        ResourceKind::new("security-group", "compute", "name")
            .alias("selfLink")
            .global(),
        ResourceKind::new("database", "sqladmin", "name")
            .status("state")
            .tags("settings.userLabels")
            .size("settings.tier")
            .alias("selfLink"),
        ResourceKind::new("storage", "storage", "name")
            .tags("labels")
            .created_at("timeCreated")
            .global(),
        ResourceKind::new("function", "cloudfunctions", "name")
            .status("state")
            .tags("labels")
            .alias("serviceConfig.service"),
        ResourceKind::new("ml-endpoint", "aiplatform", "name")
            .name("displayName")
            .tags("labels")
            .created_at("createTime"),
    ];

    vocabulary(&mut p, NodeStatus::Running, &["running", "runnable", "ready", "active"]);
    vocabulary(&mut p, NodeStatus::Stopped, &["terminated", "stopped", "stopping", "suspended", "suspending"]);
    vocabulary(&mut p, NodeStatus::Creating, &["staging", "provisioning", "pending_create", "deploying", "repairing"]);
    vocabulary(&mut p, NodeStatus::Deleting, &["deleting", "pending_delete"]);
    vocabulary(&mut p, NodeStatus::Error, &["failed", "error", "maintenance", "unknown_state"]);

    p.rules = vec![
        RelationshipRule::new("compute", "networkInterfaces[].subnetwork", "runs-in").array(),
        RelationshipRule::new("compute", "networkInterfaces[].network", "runs-in").array(),
        RelationshipRule::new("subnet", "network", "part-of").via(DiscoveredVia::ParentChild),
        RelationshipRule::new("security-group", "network", "protects")
            .via(DiscoveredVia::ConfigScan),
        RelationshipRule::new("database", "settings.ipConfiguration.privateNetwork", "runs-in"),
        RelationshipRule::new("function", "serviceConfig.vpcConnector", "runs-in").with_confidence(0.7),
    ];

    prices(
        &mut p,
        &[
            ("e2-micro", 6.11),
            ("e2-small", 12.23),
            ("e2-medium", 24.46),
            ("n1-standard-1", 24.27),
            ("n1-standard-4", 97.09),
            ("n2-standard-2", 56.72),
            ("n2-standard-4", 113.44),
            ("a2-highgpu-1g", 2680.95),
            ("g2-standard-4", 516.87),
            ("db-f1-micro", 7.67),
            ("db-n1-standard-1", 49.93),
        ],
    );
    static_costs(
        &mut p,
        &[
            ("compute", 50.0),
            ("database", 100.0),
            ("storage", 2.0),
            ("function", 5.0),
            ("ml-endpoint", 250.0),
        ],
    );
    p.gpu_size_prefixes = ["a2-", "a3-", "g2-"].iter().map(|s| s.to_string()).collect();
    p.ai_resource_types = vec!["ml-endpoint".to_string()];
    p
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::profile::Workload;
    use serde_json::json;

    #[test]
    fn test_builtin_lookup() {
        assert!(builtin_profile("AWS").is_some());
        assert!(builtin_profile("azure").is_some());
        assert!(builtin_profile("gcp").is_some());
        assert!(builtin_profile("oracle").is_none());
    }

    #[test]
    fn test_every_rule_targets_a_known_kind() {
        for profile in [aws(), azure(), gcp()] {
            for rule in &profile.rules {
                assert!(
                    profile.kind(&rule.source_resource_type).is_some(),
                    "{} rule for unknown type {}",
                    profile.provider,
                    rule.source_resource_type
                );
            }
        }
    }

    #[test]
    fn test_gcp_accelerators_mark_gpu() {
        let p = gcp();
        let kind = p.kind("compute").unwrap();
        let with = json!({"name": "vm", "guestAccelerators": [{"acceleratorCount": 1}]});
        let without = json!({"name": "vm", "guestAccelerators": []});
        assert_eq!(p.classify_workload(kind, &with, Some("n1-standard-4")), Some(Workload::GpuCompute));
        assert_eq!(p.classify_workload(kind, &without, Some("n1-standard-4")), None);
    }

    #[test]
    fn test_status_vocabularies() {
        assert_eq!(aws().normalize_status(Some("shutting-down")), NodeStatus::Deleting);
        assert_eq!(azure().normalize_status(Some("Succeeded")), NodeStatus::Running);
        assert_eq!(gcp().normalize_status(Some("TERMINATED")), NodeStatus::Stopped);
    }
}
