//! Audit and alert events, and the collaborator traits that receive them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::anomaly::AnomalySignal;
use crate::error::Result;
use crate::session::{RiskLevel, Session, SessionId};

/// Audit log actions recorded for sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEventKind {
    /// Session opened after a successful login
    SessionCreated,
    /// User logged out
    SessionLoggedOut,
    /// Idle warning issued
    SessionWarned,
    /// Session expired by inactivity
    SessionExpired,
    /// Session terminated by an administrator or policy
    SessionTerminated,
    /// All sessions of a user invalidated at once
    SessionsInvalidated,
    /// Risk level raised or explicitly reset
    RiskChanged,
}

impl AuditEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SessionCreated => "SESSION_CREATED",
            Self::SessionLoggedOut => "SESSION_LOGGED_OUT",
            Self::SessionWarned => "SESSION_WARNED",
            Self::SessionExpired => "SESSION_EXPIRED",
            Self::SessionTerminated => "SESSION_TERMINATED",
            Self::SessionsInvalidated => "SESSIONS_INVALIDATED",
            Self::RiskChanged => "RISK_CHANGED",
        }
    }
}

/// A structured audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub kind: AuditEventKind,
    pub session_id: Option<SessionId>,
    pub user_id: Option<String>,
    pub origin: Option<String>,
    pub user_agent: Option<String>,
    pub recorded_at: DateTime<Utc>,
    pub details: serde_json::Value,
}

impl AuditEvent {
    /// An event about one session.
    pub fn for_session(
        kind: AuditEventKind,
        session: &Session,
        recorded_at: DateTime<Utc>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            kind,
            session_id: Some(session.id.clone()),
            user_id: Some(session.user.user_id.clone()),
            origin: Some(session.signals.origin.clone()),
            user_agent: session.signals.user_agent.clone(),
            recorded_at,
            details,
        }
    }

    /// An event about a user rather than a single session.
    pub fn for_user(
        kind: AuditEventKind,
        user_id: impl Into<String>,
        recorded_at: DateTime<Utc>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            kind,
            session_id: None,
            user_id: Some(user_id.into()),
            origin: None,
            user_agent: None,
            recorded_at,
            details,
        }
    }
}

/// Admin- and user-facing alerts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Alert {
    /// Idle warning for the session owner
    SessionExpiring {
        session_id: SessionId,
        user_id: String,
        expires_at: DateTime<Utc>,
    },
    /// Anomaly raised by the detector
    Anomaly { signal: AnomalySignal },
    /// A short-timeout session expired
    ShortTimeoutExpiry {
        session_id: SessionId,
        user_id: String,
        policy: String,
        timeout_secs: u64,
        duration_secs: i64,
        action_count: u64,
        risk: RiskLevel,
    },
}

impl Alert {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SessionExpiring { .. } => "session_expiring",
            Self::Anomaly { signal } => signal.kind.as_str(),
            Self::ShortTimeoutExpiry { .. } => "short_timeout_expiry",
        }
    }
}

/// Receives audit records. Calls should be short; failures are non-fatal.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: &AuditEvent) -> Result<()>;
}

/// Delivers alerts. Calls should be short; failures are non-fatal.
#[async_trait]
pub trait AlertDispatcher: Send + Sync {
    async fn notify(&self, alert: &Alert) -> Result<()>;
}
