//! Timeout monitor: the background loop that renews, warns, and expires
//! sessions, then runs anomaly detection over what is left.
//!
//! State changes happen inline; audit records and alerts are dispatched in
//! the background so a slow collaborator never stretches a tick.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

use guard_core::limits::SHORT_TIMEOUT_ALERT_SECS;
use guard_core::{
    Alert, AnomalySignal, AuditEvent, AuditEventKind, Error, Result, RiskScorer, Session,
    SessionState, TimeoutPolicy, TimeoutPolicyResolver,
};
use registry::SessionRegistry;
use telemetry::metrics;

use crate::anomaly::AnomalyDetector;
use crate::delivery::{DeliveryConfig, Reporter};

/// Monitor loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Seconds between ticks
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    /// Deadline for a single audit/alert call, in milliseconds
    #[serde(default = "default_delivery_timeout_ms")]
    pub delivery_timeout_ms: u64,
    /// Pause before retrying a failed audit/alert call, in milliseconds
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Expiries under policies at or below this timeout are alerted
    #[serde(default = "default_short_timeout_alert_secs")]
    pub short_timeout_alert_secs: u64,
}

fn default_tick_interval_secs() -> u64 {
    60
}

fn default_delivery_timeout_ms() -> u64 {
    DeliveryConfig::default().timeout_ms
}

fn default_retry_backoff_ms() -> u64 {
    DeliveryConfig::default().retry_backoff_ms
}

fn default_short_timeout_alert_secs() -> u64 {
    SHORT_TIMEOUT_ALERT_SECS
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval_secs(),
            delivery_timeout_ms: default_delivery_timeout_ms(),
            retry_backoff_ms: default_retry_backoff_ms(),
            short_timeout_alert_secs: default_short_timeout_alert_secs(),
        }
    }
}

impl MonitorConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs.max(1))
    }

    pub fn delivery(&self) -> DeliveryConfig {
        DeliveryConfig {
            timeout_ms: self.delivery_timeout_ms,
            retry_backoff_ms: self.retry_backoff_ms,
        }
    }
}

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub evaluated: usize,
    pub renewed: usize,
    pub warned: usize,
    pub expired: usize,
    /// Sessions another writer changed first
    pub lost_races: usize,
    pub errors: usize,
    pub anomalies: usize,
    pub risk_escalations: usize,
}

impl TickReport {
    fn changed_anything(&self) -> bool {
        self.renewed + self.warned + self.expired + self.anomalies + self.risk_escalations > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Unchanged,
    Renewed,
    Warned,
    Expired,
}

/// The timeout monitor.
pub struct TimeoutMonitor {
    registry: Arc<SessionRegistry>,
    resolver: Arc<TimeoutPolicyResolver>,
    scorer: Arc<RiskScorer>,
    detector: AnomalyDetector,
    reporter: Reporter,
    config: MonitorConfig,
}

impl TimeoutMonitor {
    pub fn new(
        registry: Arc<SessionRegistry>,
        resolver: Arc<TimeoutPolicyResolver>,
        scorer: Arc<RiskScorer>,
        detector: AnomalyDetector,
        reporter: Reporter,
        config: MonitorConfig,
    ) -> Self {
        Self {
            registry,
            resolver,
            scorer,
            detector,
            reporter,
            config,
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Waits for audit records and alerts dispatched by earlier ticks.
    pub async fn flush_deliveries(&self) {
        self.reporter.flush().await;
    }

    /// Runs one pass over a snapshot of the live sessions.
    ///
    /// Never fails as a whole: per-session errors are logged and counted.
    pub async fn tick(&self) -> TickReport {
        let started = Instant::now();
        let now = self.registry.now();

        let sessions = self.registry.snapshot_live();
        metrics().active_sessions.set(sessions.len() as u64);

        let mut report = TickReport {
            evaluated: sessions.len(),
            ..TickReport::default()
        };

        for session in &sessions {
            match self.process_session(session, now) {
                Ok(Outcome::Unchanged) => {}
                Ok(Outcome::Renewed) => report.renewed += 1,
                Ok(Outcome::Warned) => report.warned += 1,
                Ok(Outcome::Expired) => report.expired += 1,
                Err(e) if e.is_benign() => {
                    report.lost_races += 1;
                    metrics().transitions_lost.inc();
                    debug!(session_id = %session.id, error = %e, "Session changed concurrently, skipped");
                }
                Err(e) => {
                    report.errors += 1;
                    metrics().session_errors.inc();
                    error!(session_id = %session.id, error = %e, "Failed to process session");
                }
            }
        }

        let live = self.registry.snapshot_live();
        for signal in self.detector.scan(&live, now) {
            report.anomalies += 1;
            metrics().anomalies_raised.inc();
            report.risk_escalations += self.rescore(&signal);
            self.reporter.dispatch_alert(Alert::Anomaly { signal });
        }

        metrics().ticks_completed.inc();
        metrics()
            .tick_latency_ms
            .observe(started.elapsed().as_millis() as u64);

        if report.changed_anything() || report.errors > 0 {
            info!(
                evaluated = report.evaluated,
                renewed = report.renewed,
                warned = report.warned,
                expired = report.expired,
                lost_races = report.lost_races,
                errors = report.errors,
                anomalies = report.anomalies,
                "Monitor tick completed"
            );
        } else {
            debug!(evaluated = report.evaluated, "Monitor tick completed");
        }

        report
    }

    /// Active sessions renew (auto-renew policies) or warn; only warned
    /// sessions expire, so every expiry is preceded by a warning.
    fn process_session(&self, session: &Session, now: DateTime<Utc>) -> Result<Outcome> {
        let policy = self.resolver.resolve_for(session);
        let idle = session.idle(now);

        match session.state {
            SessionState::Active if policy.auto_renew && idle >= policy.renew_at() => {
                self.renew(session, policy)
            }
            SessionState::Active if idle >= policy.warn_at() => self.warn(session, policy, now),
            SessionState::Warned if idle >= policy.expire_at() => {
                self.expire(session, policy, now)
            }
            _ => Ok(Outcome::Unchanged),
        }
    }

    fn renew(&self, session: &Session, policy: &TimeoutPolicy) -> Result<Outcome> {
        let last_activity = self.registry.renew(session)?;
        metrics().sessions_renewed.inc();
        debug!(
            session_id = %session.id,
            policy = %policy.name,
            last_activity = %last_activity,
            "Session renewed"
        );
        Ok(Outcome::Renewed)
    }

    fn warn(&self, session: &Session, policy: &TimeoutPolicy, now: DateTime<Utc>) -> Result<Outcome> {
        let warned = self
            .registry
            .transition_observed(session, SessionState::Warned)?;
        metrics().sessions_warned.inc();

        let expires_at = policy.expires_at(warned.last_activity);
        self.reporter
            .dispatch_audit(AuditEvent::for_session(
                AuditEventKind::SessionWarned,
                &warned,
                now,
                serde_json::json!({
                    "policy": policy.name,
                    "idle_secs": warned.idle(now).num_seconds(),
                    "expires_at": expires_at,
                }),
            ));
        self.reporter.dispatch_alert(Alert::SessionExpiring {
            session_id: warned.id.clone(),
            user_id: warned.user.user_id.clone(),
            expires_at,
        });

        Ok(Outcome::Warned)
    }

    fn expire(&self, session: &Session, policy: &TimeoutPolicy, now: DateTime<Utc>) -> Result<Outcome> {
        let expired = self
            .registry
            .transition_observed(session, SessionState::Expired)?;
        metrics().sessions_expired.inc();

        let duration_secs = expired.active_duration_secs.unwrap_or_default();
        self.reporter
            .dispatch_audit(AuditEvent::for_session(
                AuditEventKind::SessionExpired,
                &expired,
                now,
                serde_json::json!({
                    "policy": policy.name,
                    "idle_secs": session.idle(now).num_seconds(),
                    "duration_secs": duration_secs,
                    "action_count": expired.action_count,
                    "risk": expired.risk,
                    "recoverable": expired.recoverable,
                }),
            ));

        if policy.timeout_secs <= self.config.short_timeout_alert_secs {
            self.reporter.dispatch_alert(Alert::ShortTimeoutExpiry {
                session_id: expired.id.clone(),
                user_id: expired.user.user_id.clone(),
                policy: policy.name.clone(),
                timeout_secs: policy.timeout_secs,
                duration_secs,
                action_count: expired.action_count,
                risk: expired.risk,
            });
        }

        Ok(Outcome::Expired)
    }

    /// Re-scores the live sessions named by a signal. Returns how many
    /// were escalated.
    fn rescore(&self, signal: &AnomalySignal) -> usize {
        let mut escalated = 0;

        for id in &signal.session_ids {
            let session = match self.registry.get(id) {
                Ok(session) if session.is_live() => session,
                _ => continue,
            };

            let history = self.registry.sessions_for_user(session.user_id());
            let assessment = self.scorer.assess(&session, &history);

            let change = match self.registry.set_risk(id, assessment.level, false) {
                Ok(change) => change,
                Err(e) => {
                    debug!(session_id = %id, error = %e, "Risk update skipped");
                    continue;
                }
            };
            if !change.changed() {
                continue;
            }

            escalated += 1;
            metrics().risk_escalations.inc();
            self.reporter.dispatch_audit(AuditEvent::for_session(
                AuditEventKind::RiskChanged,
                &session,
                self.registry.now(),
                serde_json::json!({
                    "previous": change.previous,
                    "current": change.current,
                    "score": assessment.score,
                    "factors": assessment.factors,
                    "trigger": signal.kind,
                }),
            ));
        }

        escalated
    }

    /// Starts the tick loop on the current runtime.
    pub fn start(self: Arc<Self>) -> MonitorHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let period = self.config.tick_interval();

        let task = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {
                        // A panicking tick must not take the loop down with it.
                        let monitor = Arc::clone(&self);
                        if let Err(e) = tokio::spawn(async move { monitor.tick().await }).await {
                            metrics().session_errors.inc();
                            error!(error = %e, "Monitor tick aborted, retrying next interval");
                        }
                    }
                }
            }

            self.flush_deliveries().await;
            info!("Timeout monitor stopped");
        });

        info!(interval_secs = period.as_secs(), "Timeout monitor started");
        MonitorHandle {
            shutdown: shutdown_tx,
            task,
        }
    }
}

/// Owner handle for a running monitor loop.
pub struct MonitorHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Signals shutdown and waits for the in-flight tick and its pending
    /// deliveries to finish.
    pub async fn stop(self) -> Result<()> {
        // The loop may already be gone; that is fine.
        let _ = self.shutdown.send(true);
        self.task
            .await
            .map_err(|e| Error::internal(format!("monitor task failed: {}", e)))
    }
}
