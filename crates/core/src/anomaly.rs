//! Anomaly signals describing detected abuse patterns.
//!
//! Signals are immutable once raised. They never mutate session state;
//! the monitor forwards them to the alert dispatcher.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::session::{RiskLevel, SessionId};

/// Signal severity shares the risk scale.
pub type Severity = RiskLevel;

/// Anomaly signal kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnomalyKind {
    /// A session holding critical risk
    RiskSession,
    /// Too many sessions from one network origin
    MultiSessionOrigin,
}

impl AnomalyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RiskSession => "risk-session",
            Self::MultiSessionOrigin => "multi-session-origin",
        }
    }
}

/// What a signal is about; also the cool-down key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", content = "key", rename_all = "snake_case")]
pub enum AnomalySubject {
    Session(SessionId),
    Origin(String),
}

impl fmt::Display for AnomalySubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Session(id) => write!(f, "session:{}", id),
            Self::Origin(origin) => write!(f, "origin:{}", origin),
        }
    }
}

/// A detected abuse pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnomalySignal {
    pub kind: AnomalyKind,
    pub severity: Severity,
    pub subject: AnomalySubject,
    /// Sessions involved
    pub session_ids: Vec<SessionId>,
    /// Distinct users involved
    pub user_ids: Vec<String>,
    pub raised_at: DateTime<Utc>,
}

impl AnomalySignal {
    pub fn risk_session(
        session_id: SessionId,
        user_id: String,
        severity: Severity,
        raised_at: DateTime<Utc>,
    ) -> Self {
        Self {
            kind: AnomalyKind::RiskSession,
            severity,
            subject: AnomalySubject::Session(session_id.clone()),
            session_ids: vec![session_id],
            user_ids: vec![user_id],
            raised_at,
        }
    }

    pub fn multi_session_origin(
        origin: String,
        session_ids: Vec<SessionId>,
        user_ids: Vec<String>,
        raised_at: DateTime<Utc>,
    ) -> Self {
        Self {
            kind: AnomalyKind::MultiSessionOrigin,
            severity: RiskLevel::Medium,
            subject: AnomalySubject::Origin(origin),
            session_ids,
            user_ids,
            raised_at,
        }
    }
}
