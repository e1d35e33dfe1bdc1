//! Alert cooldown tracking.

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};

use crate::rules::AlertInstance;

/// Remembers when each `(rule, affected nodes)` pair last fired.
#[derive(Debug, Clone)]
pub struct CooldownTracker {
    cooldown: Duration,
    /// Last fire time per cooldown key.
    last_fired: HashMap<String, DateTime<Utc>>,
}

impl CooldownTracker {
    pub fn new(cooldown_ms: u64) -> Self {
        Self {
            cooldown: Duration::milliseconds(i64::try_from(cooldown_ms).unwrap_or(i64::MAX)),
            last_fired: HashMap::new(),
        }
    }

    /// Whether `key` fired less than one cooldown before `now`.
    pub fn is_cooling(&self, key: &str, now: DateTime<Utc>) -> bool {
        self.last_fired
            .get(key)
            .is_some_and(|last| now.signed_duration_since(*last) < self.cooldown)
    }

    pub fn mark(&mut self, key: impl Into<String>, now: DateTime<Utc>) {
        self.last_fired.insert(key.into(), now);
    }

    /// Split `alerts` into those allowed to fire and the count suppressed.
    ///
    /// Duplicate keys within the batch count as suppressed too. Nothing is
    /// marked; call [`mark`](Self::mark) for alerts actually emitted.
    pub fn admit(&self, alerts: Vec<AlertInstance>, now: DateTime<Utc>) -> (Vec<AlertInstance>, usize) {
        let mut seen = HashSet::new();
        let mut admitted = Vec::with_capacity(alerts.len());
        let mut suppressed = 0;
        for alert in alerts {
            let key = alert.cooldown_key();
            if self.is_cooling(&key, now) || !seen.insert(key) {
                suppressed += 1;
            } else {
                admitted.push(alert);
            }
        }
        (admitted, suppressed)
    }

    /// Forget keys whose cooldown has elapsed.
    pub fn prune(&mut self, now: DateTime<Utc>) {
        let cooldown = self.cooldown;
        self.last_fired
            .retain(|_, last| now.signed_duration_since(*last) < cooldown);
    }

    pub fn len(&self) -> usize {
        self.last_fired.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_fired.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{AlertCategory, AlertSeverity};

    fn orphan(node: &str, now: DateTime<Utc>) -> AlertInstance {
        AlertInstance::new("orphan", AlertCategory::Orphan, AlertSeverity::Warning, "orphan", now)
            .with_nodes([node.to_string()])
    }

    #[test]
    fn test_cooldown_window() {
        let now = Utc::now();
        let mut tracker = CooldownTracker::new(60_000);
        let key = orphan("a", now).cooldown_key();
        assert!(!tracker.is_cooling(&key, now));

        tracker.mark(key.clone(), now);
        assert!(tracker.is_cooling(&key, now + Duration::seconds(59)));
        assert!(!tracker.is_cooling(&key, now + Duration::seconds(60)));
    }

    #[test]
    fn test_admit_suppresses_cooling_and_duplicates() {
        let now = Utc::now();
        let mut tracker = CooldownTracker::new(60_000);
        tracker.mark(orphan("a", now).cooldown_key(), now);

        let (admitted, suppressed) =
            tracker.admit(vec![orphan("a", now), orphan("b", now), orphan("b", now)], now);
        assert_eq!(admitted.len(), 1);
        assert_eq!(admitted[0].affected_node_ids, vec!["b".to_string()]);
        assert_eq!(suppressed, 2);
    }

    #[test]
    fn test_prune_drops_expired() {
        let now = Utc::now();
        let mut tracker = CooldownTracker::new(1_000);
        tracker.mark("old", now - Duration::seconds(5));
        tracker.mark("fresh", now);
        tracker.prune(now);
        assert_eq!(tracker.len(), 1);
        assert!(tracker.is_cooling("fresh", now));
    }

    #[test]
    fn test_zero_cooldown_never_suppresses() {
        let now = Utc::now();
        let mut tracker = CooldownTracker::new(0);
        tracker.mark("k", now);
        assert!(!tracker.is_cooling("k", now));
    }
}
