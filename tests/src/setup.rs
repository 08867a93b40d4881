//! Common test setup functions.

use api::SessionApi;
use chrono::{DateTime, Duration, TimeZone, Utc};
use guard_core::{
    AuditEventKind, ManualClock, PolicyTable, RiskConfig, RiskScorer, SessionId,
    TimeoutPolicyResolver, UserIdentity,
};
use registry::SessionRegistry;
use std::sync::Arc;
use worker::{
    AnomalyConfig, AnomalyDetector, DeliveryConfig, MonitorConfig, Reporter, TickReport,
    TimeoutMonitor,
};

use crate::fixtures;
use crate::mocks::{RecordingAlertDispatcher, RecordingAuditSink};

/// Friday 1 March 2024, 09:00 UTC.
pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
}

/// Every component wired together around a manual clock and recording
/// collaborators.
///
/// Exercises the same code paths as the binary; only time and the
/// collaborator transports are substituted.
pub struct TestContext {
    pub clock: Arc<ManualClock>,
    pub registry: Arc<SessionRegistry>,
    pub resolver: Arc<TimeoutPolicyResolver>,
    pub scorer: Arc<RiskScorer>,
    pub audit: RecordingAuditSink,
    pub alerts: RecordingAlertDispatcher,
    pub api: SessionApi,
    pub monitor: Arc<TimeoutMonitor>,
}

impl TestContext {
    /// Context over the standard policy table.
    pub fn new() -> Self {
        Self::with_policies(fixtures::standard_table())
    }

    pub fn with_policies(table: PolicyTable) -> Self {
        Self::build(table, RiskConfig::default(), AnomalyConfig::default())
    }

    pub fn build(table: PolicyTable, risk: RiskConfig, anomaly: AnomalyConfig) -> Self {
        let clock = Arc::new(ManualClock::new(start_time()));
        let registry = Arc::new(SessionRegistry::new(clock.clone()));
        let resolver =
            Arc::new(TimeoutPolicyResolver::new(table).expect("Failed to build policy resolver"));
        let scorer = Arc::new(RiskScorer::new(risk));

        let audit = RecordingAuditSink::new();
        let alerts = RecordingAlertDispatcher::new();
        let delivery = DeliveryConfig {
            timeout_ms: 200,
            retry_backoff_ms: 1,
        };
        let reporter = Reporter::new(
            Arc::new(audit.clone()),
            Arc::new(alerts.clone()),
            &delivery,
        );

        let api = SessionApi::new(
            registry.clone(),
            resolver.clone(),
            scorer.clone(),
            reporter.clone(),
        );
        let monitor = Arc::new(TimeoutMonitor::new(
            registry.clone(),
            resolver.clone(),
            scorer.clone(),
            AnomalyDetector::new(anomaly),
            reporter,
            MonitorConfig {
                tick_interval_secs: 1,
                delivery_timeout_ms: delivery.timeout_ms,
                retry_backoff_ms: delivery.retry_backoff_ms,
                ..MonitorConfig::default()
            },
        ));

        Self {
            clock,
            registry,
            resolver,
            scorer,
            audit,
            alerts,
            api,
            monitor,
        }
    }

    pub fn advance_minutes(&self, minutes: i64) {
        self.clock.advance(Duration::minutes(minutes));
    }

    pub fn advance_secs(&self, secs: i64) {
        self.clock.advance(Duration::seconds(secs));
    }

    /// One monitor tick, then wait for the audit records and alerts it
    /// dispatched.
    pub async fn tick(&self) -> TickReport {
        let report = self.monitor.tick().await;
        self.monitor.flush_deliveries().await;
        report
    }

    /// Tick until idle sessions have warned and then expired.
    pub async fn tick_through_expiry(&self) -> TickReport {
        let warned = self.tick().await;
        let expired = self.tick().await;
        TickReport {
            warned: warned.warned + expired.warned,
            expired: warned.expired + expired.expired,
            ..expired
        }
    }

    /// Create a desktop session from `origin`.
    pub async fn login(&self, user: UserIdentity, origin: &str) -> SessionId {
        self.api
            .create_session(user, fixtures::signals(origin))
            .await
            .expect("Failed to create session")
    }

    pub fn audit_count(&self, kind: AuditEventKind) -> usize {
        self.audit.count(kind)
    }

    /// Clear captured audit events and alerts.
    pub fn clear_captured(&self) {
        self.audit.clear();
        self.alerts.clear();
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}
