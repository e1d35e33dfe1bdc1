//! The five built-in rules.

use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use infragraph_core::{ChangeType, InitiatorType, MonitorConfig};

use super::{AlertCategory, AlertInstance, AlertRule, AlertSeverity, RuleContext};

/// Built-in rules in evaluation order, tuned from `config`.
pub fn builtin_rules(config: &MonitorConfig) -> Vec<Box<dyn AlertRule>> {
    vec![
        Box::new(UnauthorizedChangeRule::new(
            config.unauthorized_change_types.clone(),
        )),
        Box::new(SpofRule::new(config.spof_min_dependents)),
        Box::new(CostAnomalyRule::new(
            config.cost_anomaly_warning,
            config.cost_anomaly_critical,
        )),
        Box::new(DisappearedRule),
        Box::new(OrphanRule::new(config.orphan_critical_cost)),
    ]
}

/// Live nodes with no edges at all.
#[derive(Debug, Clone)]
pub struct OrphanRule {
    critical_cost: f64,
}

impl OrphanRule {
    pub fn new(critical_cost: f64) -> Self {
        Self { critical_cost }
    }
}

impl AlertRule for OrphanRule {
    fn id(&self) -> &str {
        "orphan"
    }

    fn category(&self) -> AlertCategory {
        AlertCategory::Orphan
    }

    fn evaluate(&self, ctx: &RuleContext) -> Vec<AlertInstance> {
        ctx.nodes
            .iter()
            .filter(|n| n.is_live() && ctx.degree(&n.id) == 0)
            .map(|node| {
                let cost = node.cost_monthly.unwrap_or(0.0);
                let severity = if cost > self.critical_cost {
                    AlertSeverity::Critical
                } else {
                    AlertSeverity::Warning
                };
                let mut alert = AlertInstance::new(
                    self.id(),
                    self.category(),
                    severity,
                    format!(
                        "{} {} '{}' has no relationships (${cost:.2}/month)",
                        node.provider, node.resource_type, node.name
                    ),
                    ctx.now,
                )
                .with_nodes([node.id.clone()]);
                if let Some(cost) = node.cost_monthly {
                    alert = alert.with_cost_impact(cost);
                }
                alert
            })
            .collect()
    }
}

/// Hubs whose removal would strand many nodes that reach the graph only
/// through them.
#[derive(Debug, Clone)]
pub struct SpofRule {
    min_dependents: usize,
}

impl SpofRule {
    pub fn new(min_dependents: usize) -> Self {
        Self { min_dependents }
    }
}

impl AlertRule for SpofRule {
    fn id(&self) -> &str {
        "spof"
    }

    fn category(&self) -> AlertCategory {
        AlertCategory::SinglePointOfFailure
    }

    fn evaluate(&self, ctx: &RuleContext) -> Vec<AlertInstance> {
        let live: HashSet<&str> = ctx
            .nodes
            .iter()
            .filter(|n| n.is_live())
            .map(|n| n.id.as_str())
            .collect();
        let mut neighbors: HashMap<&str, BTreeSet<&str>> = HashMap::new();
        for edge in &ctx.edges {
            let (s, t) = (edge.source_node_id.as_str(), edge.target_node_id.as_str());
            if s == t || !live.contains(s) || !live.contains(t) {
                continue;
            }
            neighbors.entry(s).or_default().insert(t);
            neighbors.entry(t).or_default().insert(s);
        }

        let mut hubs: Vec<(&str, Vec<&str>)> = neighbors
            .iter()
            .filter_map(|(hub, adjacent)| {
                let exclusive: Vec<&str> = adjacent
                    .iter()
                    .copied()
                    .filter(|n| neighbors.get(n).is_some_and(|a| a.len() == 1))
                    .collect();
                (exclusive.len() > self.min_dependents).then_some((*hub, exclusive))
            })
            .collect();
        hubs.sort_by(|a, b| a.0.cmp(b.0));

        hubs.into_iter()
            .map(|(hub, dependents)| {
                let name = ctx.node(hub).map_or(hub, |n| n.name.as_str());
                let at_risk: f64 = dependents
                    .iter()
                    .filter_map(|id| ctx.node(id).and_then(|n| n.cost_monthly))
                    .sum();
                AlertInstance::new(
                    self.id(),
                    self.category(),
                    AlertSeverity::Critical,
                    format!(
                        "'{name}' is the only link for {} resources",
                        dependents.len()
                    ),
                    ctx.now,
                )
                .with_nodes([hub.to_string()])
                .with_cost_impact(at_risk)
                .with_metadata(
                    "dependents",
                    Value::from(dependents.iter().map(|d| d.to_string()).collect::<Vec<_>>()),
                )
            })
            .collect()
    }
}

/// Total monthly cost jumped between the previous and current stats.
#[derive(Debug, Clone)]
pub struct CostAnomalyRule {
    warning_ratio: f64,
    critical_ratio: f64,
}

impl CostAnomalyRule {
    pub fn new(warning_ratio: f64, critical_ratio: f64) -> Self {
        Self {
            warning_ratio,
            critical_ratio,
        }
    }
}

impl AlertRule for CostAnomalyRule {
    fn id(&self) -> &str {
        "cost-anomaly"
    }

    fn category(&self) -> AlertCategory {
        AlertCategory::CostAnomaly
    }

    fn evaluate(&self, ctx: &RuleContext) -> Vec<AlertInstance> {
        let Some(previous) = &ctx.previous_stats else {
            return Vec::new();
        };
        let before = previous.total_cost_monthly;
        let after = ctx.current_stats.total_cost_monthly;
        if before <= 0.0 {
            return Vec::new();
        }
        let ratio = (after - before) / before;
        if ratio <= self.warning_ratio {
            return Vec::new();
        }
        let severity = if ratio > self.critical_ratio {
            AlertSeverity::Critical
        } else {
            AlertSeverity::Warning
        };
        vec![
            AlertInstance::new(
                self.id(),
                self.category(),
                severity,
                format!(
                    "Monthly cost rose {:.0}% (${before:.2} -> ${after:.2})",
                    ratio * 100.0
                ),
                ctx.now,
            )
            .with_cost_impact(after - before)
            .with_metadata("previousCost", before)
            .with_metadata("currentCost", after)
            .with_metadata("ratio", ratio),
        ]
    }
}

/// Changes nobody approved: no human initiator and no correlation id.
#[derive(Debug, Clone)]
pub struct UnauthorizedChangeRule {
    change_types: Vec<ChangeType>,
}

impl UnauthorizedChangeRule {
    pub fn new(change_types: Vec<ChangeType>) -> Self {
        Self { change_types }
    }
}

impl AlertRule for UnauthorizedChangeRule {
    fn id(&self) -> &str {
        "unauthorized-change"
    }

    fn category(&self) -> AlertCategory {
        AlertCategory::UnauthorizedChange
    }

    fn evaluate(&self, ctx: &RuleContext) -> Vec<AlertInstance> {
        ctx.changes
            .iter()
            .filter(|c| c.detected_at >= ctx.window_start)
            .filter(|c| self.change_types.contains(&c.change_type))
            .filter(|c| c.initiator_type != InitiatorType::Human && c.correlation_id.is_none())
            .map(|change| {
                let who = change.initiator.as_deref().unwrap_or("unknown initiator");
                let what = change
                    .field
                    .as_deref()
                    .map(|f| format!(" ({f})"))
                    .unwrap_or_default();
                let mut alert = AlertInstance::new(
                    self.id(),
                    self.category(),
                    AlertSeverity::Critical,
                    format!(
                        "{} on {}{what} by {who} without a tracked change",
                        change.change_type.as_str(),
                        change.target_id
                    ),
                    ctx.now,
                )
                .with_nodes([change.target_id.clone()])
                .with_metadata("changeId", change.id.as_str());
                if let Some(cost) = ctx.node(&change.target_id).and_then(|n| n.cost_monthly) {
                    alert = alert.with_cost_impact(cost);
                }
                alert
            })
            .collect()
    }
}

/// Nodes that vanished during a sync in the window.
#[derive(Debug, Clone, Default)]
pub struct DisappearedRule;

impl AlertRule for DisappearedRule {
    fn id(&self) -> &str {
        "disappeared"
    }

    fn category(&self) -> AlertCategory {
        AlertCategory::Disappeared
    }

    fn evaluate(&self, ctx: &RuleContext) -> Vec<AlertInstance> {
        let reported: usize = ctx.sync_records.iter().map(|r| r.nodes_disappeared).sum();
        if reported == 0 {
            return Vec::new();
        }
        let gone: BTreeMap<&str, Option<f64>> = ctx
            .changes
            .iter()
            .filter(|c| c.change_type == ChangeType::NodeDisappeared)
            .filter(|c| c.detected_at >= ctx.window_start)
            .map(|c| {
                let cost = c.metadata.get("costMonthly").and_then(Value::as_f64);
                (c.target_id.as_str(), cost)
            })
            .collect();
        if gone.is_empty() {
            return Vec::new();
        }
        let cost: f64 = gone.values().flatten().sum();
        let mut alert = AlertInstance::new(
            self.id(),
            self.category(),
            AlertSeverity::Warning,
            format!("{} resources disappeared since the last sync", gone.len()),
            ctx.now,
        )
        .with_nodes(gone.keys().map(|id| id.to_string()));
        if cost > 0.0 {
            alert = alert.with_cost_impact(cost);
        }
        vec![alert]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use infragraph_core::{DiscoveredVia, GraphChange, GraphEdge, GraphNode, GraphStats, SyncRecord, SyncStatus};
    use pretty_assertions::assert_eq;

    fn node(id: &str, cost: Option<f64>) -> GraphNode {
        let mut n = GraphNode::new("aws", "1", "us-east-1", "compute", id);
        n.cost_monthly = cost;
        n
    }

    fn edge(a: &GraphNode, b: &GraphNode) -> GraphEdge {
        GraphEdge::new(&a.id, "runs-in", &b.id, 1.0, DiscoveredVia::ApiField)
    }

    fn ctx(nodes: Vec<GraphNode>, edges: Vec<GraphEdge>) -> RuleContext {
        let now = Utc::now();
        RuleContext::new(nodes, edges, now - Duration::minutes(5), now)
    }

    fn stats(cost: f64) -> GraphStats {
        GraphStats {
            total_cost_monthly: cost,
            ..Default::default()
        }
    }

    #[test]
    fn test_orphan_severity_by_cost() {
        let expensive = node("big", Some(1500.0));
        let cheap = node("small", Some(10.0));
        let alerts = OrphanRule::new(1000.0).evaluate(&ctx(vec![expensive.clone(), cheap], vec![]));
        assert_eq!(alerts.len(), 2);
        let big = alerts.iter().find(|a| a.affected_node_ids == vec![expensive.id.clone()]).unwrap();
        assert_eq!(big.severity, AlertSeverity::Critical);
        assert_eq!(big.cost_impact, Some(1500.0));
        assert!(alerts.iter().any(|a| a.severity == AlertSeverity::Warning));
    }

    #[test]
    fn test_orphan_with_edge_is_quiet() {
        let a = node("a", Some(1500.0));
        let b = node("b", None);
        let e = edge(&a, &b);
        assert!(OrphanRule::new(1000.0).evaluate(&ctx(vec![a, b], vec![e])).is_empty());
    }

    #[test]
    fn test_spof_star() {
        let hub = node("vpc", None);
        let leaves: Vec<GraphNode> = (0..6).map(|i| node(&format!("vm-{i}"), Some(10.0))).collect();
        let edges: Vec<GraphEdge> = leaves.iter().map(|l| edge(l, &hub)).collect();
        let mut nodes = leaves.clone();
        nodes.push(hub.clone());

        let alerts = SpofRule::new(5).evaluate(&ctx(nodes.clone(), edges.clone()));
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].affected_node_ids, vec![hub.id.clone()]);
        assert_eq!(alerts[0].severity, AlertSeverity::Critical);
        assert_eq!(alerts[0].cost_impact, Some(60.0));

        // A second path out of one leaf drops the star below the threshold.
        let other = node("sg", None);
        let mut more = edges;
        more.push(edge(&leaves[0], &other));
        nodes.push(other);
        assert!(SpofRule::new(5).evaluate(&ctx(nodes, more)).is_empty());
    }

    #[test]
    fn test_cost_anomaly_thresholds() {
        let rule = CostAnomalyRule::new(0.20, 0.50);
        let warn = rule.evaluate(&ctx(vec![], vec![]).with_stats(Some(stats(1000.0)), stats(1500.0)));
        assert_eq!(warn.len(), 1);
        assert_eq!(warn[0].severity, AlertSeverity::Warning);
        assert_eq!(warn[0].cost_impact, Some(500.0));

        let crit = rule.evaluate(&ctx(vec![], vec![]).with_stats(Some(stats(1000.0)), stats(2000.0)));
        assert_eq!(crit[0].severity, AlertSeverity::Critical);

        assert!(rule.evaluate(&ctx(vec![], vec![]).with_stats(None, stats(5000.0))).is_empty());
        assert!(rule.evaluate(&ctx(vec![], vec![]).with_stats(Some(stats(1000.0)), stats(1100.0))).is_empty());
        assert!(rule.evaluate(&ctx(vec![], vec![]).with_stats(Some(stats(0.0)), stats(100.0))).is_empty());
    }

    #[test]
    fn test_unauthorized_change_filters() {
        let rule = UnauthorizedChangeRule::new(vec![ChangeType::NodeUpdated, ChangeType::NodeDeleted]);
        let silent = GraphChange::detected("a", ChangeType::NodeUpdated);
        let human = GraphChange::detected("b", ChangeType::NodeUpdated).with_initiator("alice", InitiatorType::Human);
        let mut tracked = GraphChange::detected("c", ChangeType::NodeDeleted);
        tracked.correlation_id = Some("CHG-42".into());
        let created = GraphChange::detected("d", ChangeType::NodeCreated);

        let alerts = rule.evaluate(&ctx(vec![], vec![]).with_changes(vec![silent, human, tracked, created]));
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].affected_node_ids, vec!["a".to_string()]);
        assert_eq!(alerts[0].severity, AlertSeverity::Critical);
    }

    #[test]
    fn test_disappeared_aggregates() {
        let record = SyncRecord {
            id: "s".into(),
            provider: "aws".into(),
            status: SyncStatus::Completed,
            started_at: Utc::now(),
            completed_at: Utc::now(),
            nodes_discovered: 0,
            nodes_created: 0,
            nodes_updated: 0,
            nodes_disappeared: 3,
            edges_discovered: 0,
            edges_created: 0,
            edges_removed: 0,
            changes_recorded: 3,
            errors: vec![],
            duration_ms: 0,
            total_cost_monthly: None,
        };
        let changes = ["x", "y", "z"]
            .iter()
            .map(|id| GraphChange::detected(*id, ChangeType::NodeDisappeared))
            .collect();
        let alerts = DisappearedRule.evaluate(
            &ctx(vec![], vec![])
                .with_changes(changes)
                .with_sync_records(vec![record]),
        );
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].affected_node_ids, vec!["x", "y", "z"]);
        assert!(DisappearedRule.evaluate(&ctx(vec![], vec![])).is_empty());
    }

    #[test]
    fn test_disappeared_cost_only_counts_window() {
        let record = SyncRecord {
            id: "s".into(),
            provider: "aws".into(),
            status: SyncStatus::Completed,
            started_at: Utc::now(),
            completed_at: Utc::now(),
            nodes_discovered: 0,
            nodes_created: 0,
            nodes_updated: 0,
            nodes_disappeared: 1,
            edges_discovered: 0,
            edges_created: 0,
            edges_removed: 0,
            changes_recorded: 1,
            errors: vec![],
            duration_ms: 0,
            total_cost_monthly: None,
        };
        let mut old = GraphChange::detected("old", ChangeType::NodeDisappeared)
            .with_metadata("costMonthly", 500.0);
        old.detected_at = Utc::now() - Duration::hours(1);
        let fresh = GraphChange::detected("new", ChangeType::NodeDisappeared)
            .with_metadata("costMonthly", 30.0);

        let alerts = DisappearedRule.evaluate(
            &ctx(vec![], vec![])
                .with_changes(vec![old, fresh])
                .with_sync_records(vec![record]),
        );
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].affected_node_ids, vec!["new"]);
        assert_eq!(alerts[0].cost_impact, Some(30.0));
    }

    #[test]
    fn test_builtin_rule_ids_are_unique() {
        let rules = builtin_rules(&MonitorConfig::default());
        let ids: HashSet<&str> = rules.iter().map(|r| r.id()).collect();
        assert_eq!(ids.len(), 5);
    }
}
