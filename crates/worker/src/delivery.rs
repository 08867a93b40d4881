//! Bounded delivery of audit records and alerts.
//!
//! Every call runs under a short deadline and is retried at most once after
//! a backoff. Failures are logged, counted, and reflected in collaborator
//! health, but never returned: reporting a state change must not undo or
//! block it.
//!
//! `audit`/`alert` await the bounded call. `dispatch_audit`/`dispatch_alert`
//! hand it to a tracked background task instead; `flush` waits for those.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, warn};

use guard_core::{Alert, AlertDispatcher, AuditEvent, AuditSink, Result};
use telemetry::{health, metrics, ComponentHealth, Counter};

/// Delivery deadlines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Deadline for a single collaborator call, in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Pause before the single retry, in milliseconds
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_timeout_ms() -> u64 {
    2000
}

fn default_retry_backoff_ms() -> u64 {
    250
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

/// Forwards events to the audit sink and alert dispatcher.
#[derive(Clone)]
pub struct Reporter {
    audit: Arc<dyn AuditSink>,
    alerts: Arc<dyn AlertDispatcher>,
    timeout: Duration,
    backoff: Duration,
    pending: Arc<Mutex<JoinSet<()>>>,
}

impl Reporter {
    pub fn new(
        audit: Arc<dyn AuditSink>,
        alerts: Arc<dyn AlertDispatcher>,
        config: &DeliveryConfig,
    ) -> Self {
        Self {
            audit,
            alerts,
            timeout: Duration::from_millis(config.timeout_ms),
            backoff: Duration::from_millis(config.retry_backoff_ms),
            pending: Arc::new(Mutex::new(JoinSet::new())),
        }
    }

    /// Record an audit event in the background.
    pub fn dispatch_audit(&self, event: AuditEvent) {
        let reporter = self.clone();
        self.spawn(async move {
            reporter.audit(event).await;
        });
    }

    /// Dispatch an alert in the background.
    pub fn dispatch_alert(&self, alert: Alert) {
        let reporter = self.clone();
        self.spawn(async move {
            reporter.alert(alert).await;
        });
    }

    /// Deliveries started by `dispatch_*` that have not been flushed yet.
    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    /// Waits for every background delivery started so far.
    pub async fn flush(&self) {
        let mut pending = std::mem::take(&mut *self.pending.lock());
        while let Some(joined) = pending.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Delivery task failed");
            }
        }
    }

    fn spawn(&self, delivery: impl Future<Output = ()> + Send + 'static) {
        let mut pending = self.pending.lock();
        // Reap finished deliveries so the set only holds live ones.
        while let Some(joined) = pending.try_join_next() {
            if let Err(e) = joined {
                error!(error = %e, "Delivery task failed");
            }
        }
        pending.spawn(delivery);
        debug!(pending = pending.len(), "Delivery dispatched");
    }

    /// Record an audit event. Returns whether it was delivered.
    pub async fn audit(&self, event: AuditEvent) -> bool {
        let sink = &self.audit;
        let event = &event;
        let delivered = self
            .deliver(&health().audit_sink, &metrics().audit_failures, move || {
                sink.record(event)
            })
            .await;

        if !delivered {
            error!(
                kind = event.kind.as_str(),
                session_id = ?event.session_id,
                "Dropped audit event"
            );
        }
        delivered
    }

    /// Dispatch an alert. Returns whether it was delivered.
    pub async fn alert(&self, alert: Alert) -> bool {
        let dispatcher = &self.alerts;
        let alert = &alert;
        let delivered = self
            .deliver(
                &health().alert_dispatcher,
                &metrics().alert_failures,
                move || dispatcher.notify(alert),
            )
            .await;

        if !delivered {
            error!(kind = alert.kind(), "Dropped alert");
        }
        delivered
    }

    async fn deliver<F, Fut>(&self, component: &ComponentHealth, failures: &Counter, call: F) -> bool
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let mut last_error = String::new();

        for attempt in 0..2 {
            match timeout(self.timeout, call()).await {
                Ok(Ok(())) => {
                    component.set_healthy();
                    return true;
                }
                Ok(Err(e)) => last_error = e.to_string(),
                Err(_) => last_error = format!("timed out after {}ms", self.timeout.as_millis()),
            }

            if attempt == 0 {
                warn!(
                    collaborator = component.name(),
                    error = %last_error,
                    "Collaborator call failed, retrying once"
                );
                sleep(self.backoff).await;
            }
        }

        component.set_unhealthy(last_error.clone());
        failures.inc();
        error!(
            collaborator = component.name(),
            error = %last_error,
            "Collaborator unavailable"
        );
        false
    }
}
