//! The InfraMonitor scheduler.
//!
//! A cycle discovers every provider, records the batches, polls audit
//! events, evaluates the alert rules against a fresh snapshot, applies
//! cooldown and the per-cycle cap, and dispatches what is left. Cycles
//! never overlap: a call made while one is in flight is skipped.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use infragraph_core::{
    ChangeRecorder, DiscoverOptions, DiscoveryAdapter, DispatchError, EventBus, EventSource,
    GraphEvent, GraphStorage, InfraGraphError, MonitorConfig, MonitorError, SyncRecord,
};

use crate::cooldown::CooldownTracker;
use crate::destinations::AlertDestination;
use crate::rules::{AlertInstance, AlertRule, RuleContext, builtin_rules};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MonitorState {
    Idle,
    Running,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorStatus {
    pub state: MonitorState,
    /// Whether the repeating timer is armed.
    pub scheduled: bool,
    pub cycles_completed: u64,
    pub cycles_skipped: u64,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub alert_history_len: usize,
}

/// What one completed cycle did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    pub cycle: u64,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub sync_records: Vec<SyncRecord>,
    pub discovery_errors: usize,
    pub event_changes: usize,
    /// Alerts emitted this cycle, after cooldown and the per-cycle cap.
    pub alerts: Vec<AlertInstance>,
    pub suppressed: usize,
    pub truncated: usize,
    /// Destinations that failed, with the error.
    pub dispatch_failures: Vec<(String, String)>,
}

/// Clears the running flag when a cycle ends, however it ends.
struct CycleGuard<'a>(&'a AtomicBool);

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct InfraMonitor {
    config: MonitorConfig,
    storage: Arc<dyn GraphStorage>,
    adapters: Vec<Arc<dyn DiscoveryAdapter>>,
    event_sources: Vec<Arc<dyn EventSource>>,
    recorder: ChangeRecorder,
    rules: Vec<Box<dyn AlertRule>>,
    destinations: Vec<Arc<dyn AlertDestination>>,
    discover_options: DiscoverOptions,
    bus: Option<EventBus>,

    running: AtomicBool,
    cycles_started: AtomicU64,
    cycles_completed: AtomicU64,
    cycles_skipped: AtomicU64,
    last_cycle_at: Mutex<Option<DateTime<Utc>>>,
    last_poll: Mutex<HashMap<String, DateTime<Utc>>>,
    cooldown: Mutex<CooldownTracker>,
    history: RwLock<Vec<AlertInstance>>,
    timer: Mutex<Option<CancellationToken>>,
}

/// Lock a std mutex, recovering the data if a previous holder panicked.
fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl InfraMonitor {
    /// A monitor over `storage` with the built-in rules and no adapters.
    pub fn new(storage: Arc<dyn GraphStorage>, config: MonitorConfig) -> Self {
        Self {
            rules: builtin_rules(&config),
            cooldown: Mutex::new(CooldownTracker::new(config.alert_cooldown_ms)),
            config,
            storage,
            adapters: Vec::new(),
            event_sources: Vec::new(),
            recorder: ChangeRecorder::new(),
            destinations: Vec::new(),
            discover_options: DiscoverOptions::default(),
            bus: None,
            running: AtomicBool::new(false),
            cycles_started: AtomicU64::new(0),
            cycles_completed: AtomicU64::new(0),
            cycles_skipped: AtomicU64::new(0),
            last_cycle_at: Mutex::new(None),
            last_poll: Mutex::new(HashMap::new()),
            history: RwLock::new(Vec::new()),
            timer: Mutex::new(None),
        }
    }

    pub fn with_adapter(mut self, adapter: Arc<dyn DiscoveryAdapter>) -> Self {
        self.adapters.push(adapter);
        self
    }

    pub fn with_event_source(mut self, source: Arc<dyn EventSource>) -> Self {
        self.event_sources.push(source);
        self
    }

    pub fn with_recorder(mut self, recorder: ChangeRecorder) -> Self {
        self.recorder = recorder;
        self
    }

    pub fn with_destination(mut self, destination: Arc<dyn AlertDestination>) -> Self {
        self.destinations.push(destination);
        self
    }

    pub fn with_discover_options(mut self, options: DiscoverOptions) -> Self {
        self.discover_options = options;
        self
    }

    pub fn with_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Replace the rule set. Rules run in the given order.
    pub fn with_rules(mut self, rules: Vec<Box<dyn AlertRule>>) -> Result<Self, MonitorError> {
        self.rules.clear();
        for rule in rules {
            self.add_rule(rule)?;
        }
        Ok(self)
    }

    /// Append a rule after the existing ones.
    pub fn add_rule(&mut self, rule: Box<dyn AlertRule>) -> Result<(), MonitorError> {
        if self.rules.iter().any(|r| r.id() == rule.id()) {
            return Err(MonitorError::DuplicateRule {
                id: rule.id().to_string(),
            });
        }
        self.rules.push(rule);
        Ok(())
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    fn publish(&self, event: GraphEvent) {
        if let Some(bus) = &self.bus {
            bus.publish(event);
        }
    }

    /// Run one cycle now. Returns `Ok(None)` if a cycle is already running.
    pub async fn run_cycle(&self) -> Result<Option<CycleReport>, InfraGraphError> {
        self.run_cycle_with(self.discover_options.clone()).await
    }

    async fn run_cycle_with(
        &self,
        options: DiscoverOptions,
    ) -> Result<Option<CycleReport>, InfraGraphError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.cycles_skipped.fetch_add(1, Ordering::Relaxed);
            warn!("Monitor cycle still in progress; skipping");
            self.publish(GraphEvent::CycleSkipped {
                reason: "previous cycle still running".into(),
            });
            return Ok(None);
        }
        let _guard = CycleGuard(&self.running);

        let cycle = self.cycles_started.fetch_add(1, Ordering::Relaxed) + 1;
        let started_at = Utc::now();
        let clock = Instant::now();
        self.publish(GraphEvent::CycleStarted {
            cycle,
            at: started_at,
        });

        match self.execute(cycle, started_at, options).await {
            Ok(report) => {
                self.cycles_completed.fetch_add(1, Ordering::Relaxed);
                *lock(&self.last_cycle_at) = Some(report.completed_at);
                let duration_ms = clock.elapsed().as_millis() as u64;
                info!(
                    cycle,
                    alerts = report.alerts.len(),
                    suppressed = report.suppressed,
                    truncated = report.truncated,
                    duration_ms,
                    "Monitor cycle completed"
                );
                self.publish(GraphEvent::CycleCompleted {
                    cycle,
                    alerts: report.alerts.len(),
                    duration_ms,
                });
                Ok(Some(report))
            }
            Err(e) => {
                error!(cycle, error = %e, "Monitor cycle failed");
                self.publish(GraphEvent::CycleFailed {
                    cycle,
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        cycle: u64,
        started_at: DateTime<Utc>,
        options: DiscoverOptions,
    ) -> Result<CycleReport, InfraGraphError> {
        let storage = self.storage.as_ref();
        let before = storage.get_stats().await?;
        let previous_stats = before.last_sync_at.is_some().then_some(before);

        let scans = self.adapters.iter().map(|adapter| {
            let options = options.clone();
            async move { adapter.discover(options).await }
        });
        let results = futures::future::join_all(scans).await;

        let mut sync_records = Vec::with_capacity(results.len());
        let mut discovery_errors = 0;
        for result in &results {
            discovery_errors += result.errors.len();
            sync_records.push(self.recorder.record_sync(storage, result, started_at).await?);
        }

        let event_changes = self.poll_events().await?;

        let now = Utc::now();
        let ctx = RuleContext::load(storage, previous_stats, started_at, now).await?;
        let mut candidates = Vec::new();
        for rule in &self.rules {
            if self.config.disabled_rules.iter().any(|d| d == rule.id()) {
                continue;
            }
            let fired = rule.evaluate(&ctx);
            debug!(rule = rule.id(), alerts = fired.len(), "Rule evaluated");
            candidates.extend(fired);
        }

        let (alerts, suppressed, truncated) = {
            let mut cooldown = lock(&self.cooldown);
            cooldown.prune(now);
            let (mut admitted, suppressed) = cooldown.admit(candidates, now);
            let admitted_len = admitted.len();
            admitted.truncate(self.config.max_alerts_per_cycle);
            for alert in &admitted {
                cooldown.mark(alert.cooldown_key(), now);
            }
            let truncated = admitted_len - admitted.len();
            (admitted, suppressed, truncated)
        };

        self.history.write().await.extend(alerts.iter().cloned());
        let dispatch_failures = self.dispatch(&alerts).await;

        Ok(CycleReport {
            cycle,
            started_at,
            completed_at: Utc::now(),
            sync_records,
            discovery_errors,
            event_changes,
            alerts,
            suppressed,
            truncated,
            dispatch_failures,
        })
    }

    /// Poll every event source since its last poll and record the changes.
    /// A failing source is logged and retried from the same point next time.
    async fn poll_events(&self) -> Result<usize, InfraGraphError> {
        let lookback = ChronoDuration::milliseconds(
            i64::try_from(self.config.event_lookback_ms).unwrap_or(i64::MAX),
        );
        let mut recorded = 0;
        for source in &self.event_sources {
            let provider = source.provider().to_string();
            let polled_at = Utc::now();
            let since = lock(&self.last_poll)
                .get(&provider)
                .copied()
                .unwrap_or(polled_at - lookback);
            match source.fetch_events(since).await {
                Ok(events) => {
                    let changes = self.recorder.record_events(self.storage.as_ref(), &events).await?;
                    recorded += changes.len();
                    lock(&self.last_poll).insert(provider, polled_at);
                }
                Err(e) => {
                    warn!(provider = %provider, error = %e, "Event source poll failed");
                }
            }
        }
        Ok(recorded)
    }

    /// Deliver to every destination concurrently. Returns the failures.
    async fn dispatch(&self, alerts: &[AlertInstance]) -> Vec<(String, String)> {
        if alerts.is_empty() || self.destinations.is_empty() {
            return Vec::new();
        }
        let timeout = self.config.dispatch_timeout_ms.map(Duration::from_millis);
        let deliveries = self.destinations.iter().map(|dest| async move {
            let outcome = match timeout {
                Some(limit) => match tokio::time::timeout(limit, dest.deliver(alerts)).await {
                    Ok(result) => result,
                    Err(_) => Err(DispatchError::Timeout {
                        destination: dest.name().to_string(),
                        timeout_ms: limit.as_millis() as u64,
                    }),
                },
                None => dest.deliver(alerts).await,
            };
            (dest.name().to_string(), outcome)
        });

        let mut failures = Vec::new();
        for (name, outcome) in futures::future::join_all(deliveries).await {
            match outcome {
                Ok(()) => {
                    debug!(destination = %name, alerts = alerts.len(), "Alerts dispatched");
                    self.publish(GraphEvent::AlertsDispatched {
                        destination: name,
                        alerts: alerts.len(),
                    });
                }
                Err(e) => {
                    warn!(destination = %name, error = %e, "Alert destination failed");
                    self.publish(GraphEvent::DestinationFailed {
                        destination: name.clone(),
                        error: e.to_string(),
                    });
                    failures.push((name, e.to_string()));
                }
            }
        }
        failures
    }

    /// Arm the repeating timer. Each cycle starts `interval_ms` after the
    /// previous one finished.
    pub fn start(self: &Arc<Self>) -> Result<(), MonitorError> {
        let mut timer = lock(&self.timer);
        if timer.is_some() {
            return Err(MonitorError::AlreadyStarted);
        }
        let token = CancellationToken::new();
        *timer = Some(token.clone());
        drop(timer);

        let monitor = Arc::clone(self);
        let interval = Duration::from_millis(self.config.interval_ms);
        info!(interval_ms = self.config.interval_ms, "Monitor timer started");
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                let options = monitor
                    .discover_options
                    .clone()
                    .with_cancel(token.child_token());
                if let Err(e) = monitor.run_cycle_with(options).await {
                    warn!(error = %e, "Scheduled cycle failed; re-arming");
                }
            }
            info!("Monitor timer stopped");
        });
        Ok(())
    }

    /// Cancel the timer. An in-flight cycle sees the cancel between resources.
    pub fn stop(&self) -> Result<(), MonitorError> {
        match lock(&self.timer).take() {
            Some(token) => {
                token.cancel();
                Ok(())
            }
            None => Err(MonitorError::NotStarted),
        }
    }

    pub fn is_scheduled(&self) -> bool {
        lock(&self.timer).is_some()
    }

    pub async fn status(&self) -> MonitorStatus {
        let last_cycle_at = *lock(&self.last_cycle_at);
        let alert_history_len = self.history.read().await.len();
        MonitorStatus {
            state: if self.running.load(Ordering::Acquire) {
                MonitorState::Running
            } else {
                MonitorState::Idle
            },
            scheduled: self.is_scheduled(),
            cycles_completed: self.cycles_completed.load(Ordering::Relaxed),
            cycles_skipped: self.cycles_skipped.load(Ordering::Relaxed),
            last_cycle_at,
            alert_history_len,
        }
    }

    /// Every alert emitted so far, oldest first.
    pub async fn alert_history(&self) -> Vec<AlertInstance> {
        self.history.read().await.clone()
    }
}
