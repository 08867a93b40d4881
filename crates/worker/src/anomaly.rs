//! Anomaly detection over the live session set.
//!
//! Two rules run on every tick:
//! - Critical-risk sweep: a session at critical risk raises `risk-session`.
//! - Origin fan-out: more than `origin_threshold` live sessions active from
//!   one network origin inside the sliding window raise `multi-session-origin`.
//!
//! Each subject (session or origin) is signaled at most once per cool-down.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, warn};

use guard_core::{AnomalySignal, AnomalySubject, RiskLevel, Session};

/// Anomaly detection thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyConfig {
    /// Quiet period after a risk-session signal, in seconds
    #[serde(default = "default_cooldown_secs")]
    pub critical_cooldown_secs: u64,
    /// Sessions per origin tolerated inside the window
    #[serde(default = "default_origin_threshold")]
    pub origin_threshold: usize,
    /// Sliding window for origin fan-out, in seconds
    #[serde(default = "default_cooldown_secs")]
    pub origin_window_secs: u64,
    /// Quiet period after an origin signal, in seconds
    #[serde(default = "default_cooldown_secs")]
    pub origin_cooldown_secs: u64,
}

fn default_cooldown_secs() -> u64 {
    3600
}

fn default_origin_threshold() -> usize {
    5
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            critical_cooldown_secs: default_cooldown_secs(),
            origin_threshold: default_origin_threshold(),
            origin_window_secs: default_cooldown_secs(),
            origin_cooldown_secs: default_cooldown_secs(),
        }
    }
}

impl AnomalyConfig {
    fn critical_cooldown(&self) -> Duration {
        Duration::seconds(self.critical_cooldown_secs as i64)
    }

    fn origin_window(&self) -> Duration {
        Duration::seconds(self.origin_window_secs as i64)
    }

    fn origin_cooldown(&self) -> Duration {
        Duration::seconds(self.origin_cooldown_secs as i64)
    }
}

/// Scans sessions for abuse patterns. Read-only with respect to sessions.
pub struct AnomalyDetector {
    config: AnomalyConfig,
    /// Last signal time per subject
    last_signaled: Mutex<HashMap<AnomalySubject, DateTime<Utc>>>,
}

impl AnomalyDetector {
    pub fn new(config: AnomalyConfig) -> Self {
        Self {
            config,
            last_signaled: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &AnomalyConfig {
        &self.config
    }

    /// Run both rules over `sessions` as of `now`.
    pub fn scan(&self, sessions: &[Session], now: DateTime<Utc>) -> Vec<AnomalySignal> {
        let mut last_signaled = self.last_signaled.lock();

        let horizon = self.config.critical_cooldown().max(self.config.origin_cooldown());
        last_signaled.retain(|_, at| now - *at < horizon);

        let mut signals = Vec::new();

        for session in sessions
            .iter()
            .filter(|s| s.is_live() && s.risk == RiskLevel::Critical)
        {
            let subject = AnomalySubject::Session(session.id.clone());
            if !claim(&mut last_signaled, subject, now, self.config.critical_cooldown()) {
                continue;
            }

            warn!(
                session_id = %session.id,
                user_id = %session.user.user_id,
                "Critical-risk session detected"
            );
            signals.push(AnomalySignal::risk_session(
                session.id.clone(),
                session.user.user_id.clone(),
                session.risk,
                now,
            ));
        }

        let window_start = now - self.config.origin_window();
        let mut by_origin: BTreeMap<&str, Vec<&Session>> = BTreeMap::new();
        for session in sessions
            .iter()
            .filter(|s| s.is_live() && s.last_activity >= window_start)
        {
            by_origin
                .entry(session.signals.origin.as_str())
                .or_default()
                .push(session);
        }

        for (origin, group) in by_origin {
            if group.len() <= self.config.origin_threshold {
                continue;
            }

            let subject = AnomalySubject::Origin(origin.to_string());
            if !claim(&mut last_signaled, subject, now, self.config.origin_cooldown()) {
                debug!(origin = origin, sessions = group.len(), "Origin fan-out in cool-down");
                continue;
            }

            let mut session_ids: Vec<_> = group.iter().map(|s| s.id.clone()).collect();
            session_ids.sort();
            let user_ids: Vec<String> = group
                .iter()
                .map(|s| s.user.user_id.clone())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();

            warn!(
                origin = origin,
                sessions = session_ids.len(),
                users = user_ids.len(),
                "Origin fan-out detected"
            );
            signals.push(AnomalySignal::multi_session_origin(
                origin.to_string(),
                session_ids,
                user_ids,
                now,
            ));
        }

        signals
    }
}

/// Records a signal for `subject` unless one was raised within `cooldown`.
fn claim(
    last_signaled: &mut HashMap<AnomalySubject, DateTime<Utc>>,
    subject: AnomalySubject,
    now: DateTime<Utc>,
    cooldown: Duration,
) -> bool {
    match last_signaled.get(&subject) {
        Some(at) if now - *at < cooldown => false,
        _ => {
            last_signaled.insert(subject, now);
            true
        }
    }
}
