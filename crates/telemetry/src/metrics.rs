//! Internal metrics collection.
//!
//! Lock-free counters updated from request handlers and the monitor loop.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// A counter metric.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_by(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// A gauge metric (can go up or down).
#[derive(Debug, Default)]
pub struct Gauge(AtomicU64);

impl Gauge {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn set(&self, val: u64) {
        self.0.store(val, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Histogram for latency tracking.
#[derive(Debug)]
pub struct Histogram {
    /// Buckets: 1ms, 5ms, 10ms, 25ms, 50ms, 100ms, 250ms, 500ms, 1s, 5s, 10s
    buckets: [AtomicU64; 11],
    sum: AtomicU64,
    count: AtomicU64,
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

impl Histogram {
    const BUCKET_BOUNDS: [u64; 11] = [1, 5, 10, 25, 50, 100, 250, 500, 1000, 5000, 10000];

    pub fn new() -> Self {
        Self {
            buckets: Default::default(),
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Records a value in milliseconds.
    pub fn observe(&self, ms: u64) {
        self.sum.fetch_add(ms, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);

        let idx = Self::BUCKET_BOUNDS
            .iter()
            .position(|&bound| ms <= bound)
            .unwrap_or(Self::BUCKET_BOUNDS.len() - 1);
        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn mean(&self) -> f64 {
        let count = self.count();
        if count == 0 {
            0.0
        } else {
            self.sum.load(Ordering::Relaxed) as f64 / count as f64
        }
    }

    /// Returns bucket counts.
    pub fn buckets(&self) -> Vec<(u64, u64)> {
        Self::BUCKET_BOUNDS
            .iter()
            .zip(self.buckets.iter())
            .map(|(&bound, count)| (bound, count.load(Ordering::Relaxed)))
            .collect()
    }
}

/// Collected metrics for the session guard.
#[derive(Debug, Default)]
pub struct Metrics {
    // Lifecycle
    pub sessions_created: Counter,
    pub sessions_renewed: Counter,
    pub sessions_warned: Counter,
    pub sessions_expired: Counter,
    pub sessions_terminated: Counter,
    pub transitions_lost: Counter,

    // Risk and anomalies
    pub risk_escalations: Counter,
    pub anomalies_raised: Counter,

    // Collaborators
    pub audit_failures: Counter,
    pub alert_failures: Counter,

    // Monitor
    pub ticks_completed: Counter,
    pub session_errors: Counter,
    pub tick_latency_ms: Histogram,

    // Gauges
    pub active_sessions: Gauge,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }
}

/// A snapshot of metrics at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub sessions_created: u64,
    pub sessions_renewed: u64,
    pub sessions_warned: u64,
    pub sessions_expired: u64,
    pub sessions_terminated: u64,
    pub transitions_lost: u64,
    pub risk_escalations: u64,
    pub anomalies_raised: u64,
    pub audit_failures: u64,
    pub alert_failures: u64,
    pub ticks_completed: u64,
    pub session_errors: u64,
    pub tick_latency_mean_ms: f64,
    pub active_sessions: u64,
}

impl Metrics {
    /// Takes a snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            timestamp: Utc::now(),
            sessions_created: self.sessions_created.get(),
            sessions_renewed: self.sessions_renewed.get(),
            sessions_warned: self.sessions_warned.get(),
            sessions_expired: self.sessions_expired.get(),
            sessions_terminated: self.sessions_terminated.get(),
            transitions_lost: self.transitions_lost.get(),
            risk_escalations: self.risk_escalations.get(),
            anomalies_raised: self.anomalies_raised.get(),
            audit_failures: self.audit_failures.get(),
            alert_failures: self.alert_failures.get(),
            ticks_completed: self.ticks_completed.get(),
            session_errors: self.session_errors.get(),
            tick_latency_mean_ms: self.tick_latency_ms.mean(),
            active_sessions: self.active_sessions.get(),
        }
    }
}

/// Global metrics registry.
pub static METRICS: std::sync::LazyLock<Metrics> = std::sync::LazyLock::new(Metrics::new);

/// Get the global metrics instance.
pub fn metrics() -> &'static Metrics {
    &METRICS
}
