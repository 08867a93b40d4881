//! Session records and their state machine.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

use crate::signals::{DeviceClass, SessionSignals};

/// Opaque session identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Generates a fresh random identity.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The authenticated principal that owns a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub user_id: String,
    /// Role names used by policy role filters
    #[serde(default)]
    pub roles: BTreeSet<String>,
}

impl UserIdentity {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            roles: BTreeSet::new(),
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.insert(role.into());
        self
    }
}

/// Session lifecycle state.
///
/// Transitions only move forward: active -> warned -> expired, or
/// active/warned -> terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Active,
    Warned,
    Expired,
    Terminated,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Warned => "warned",
            Self::Expired => "expired",
            Self::Terminated => "terminated",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Expired | Self::Terminated)
    }

    /// Whether `self -> to` is a permitted edge.
    pub fn can_transition_to(&self, to: SessionState) -> bool {
        matches!(
            (self, to),
            (Self::Active, Self::Warned)
                | (Self::Warned, Self::Expired)
                | (Self::Active, Self::Terminated)
                | (Self::Warned, Self::Terminated)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse risk classification, ordered by severity.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a session was explicitly terminated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TerminationReason {
    /// The user logged out
    Logout,
    /// An administrator forced the logout
    AdminForced { by: String },
    /// Bulk invalidation of a user's sessions
    Invalidated,
    /// Terminated in response to a risk finding
    RiskPolicy,
}

impl TerminationReason {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Logout => "logout",
            Self::AdminForced { .. } => "admin_forced",
            Self::Invalidated => "invalidated",
            Self::RiskPolicy => "risk_policy",
        }
    }
}

/// An authenticated session tracked by the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub user: UserIdentity,
    pub signals: SessionSignals,
    /// Device class resolved at creation
    pub device_class: DeviceClass,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    /// Set iff the state is terminal
    pub ended_at: Option<DateTime<Utc>>,
    /// Seconds between creation and last activity, accumulated when the session ends
    pub active_duration_secs: Option<i64>,
    pub state: SessionState,
    pub risk: RiskLevel,
    /// Pages/actions observed while active
    pub action_count: u64,
    pub termination_reason: Option<TerminationReason>,
    /// Opaque client state that may be restored after an expiry
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery_state: Option<Vec<u8>>,
    pub recoverable: bool,
    /// Bumped on every mutation; checked by snapshot-based transitions
    pub version: u64,
}

impl Session {
    /// Creates a new active session.
    pub fn new(
        id: SessionId,
        user: UserIdentity,
        signals: SessionSignals,
        now: DateTime<Utc>,
    ) -> Self {
        let device_class = signals.resolved_device_class();
        Self {
            id,
            user,
            signals,
            device_class,
            created_at: now,
            last_activity: now,
            ended_at: None,
            active_duration_secs: None,
            state: SessionState::Active,
            risk: RiskLevel::Low,
            action_count: 0,
            termination_reason: None,
            recovery_state: None,
            recoverable: false,
            version: 0,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user.user_id
    }

    pub fn is_live(&self) -> bool {
        !self.state.is_terminal()
    }

    /// Idle time as of `now`.
    pub fn idle(&self, now: DateTime<Utc>) -> Duration {
        (now - self.last_activity).max(Duration::zero())
    }

    /// Time between creation and last activity.
    pub fn duration(&self) -> Duration {
        self.last_activity - self.created_at
    }

    /// Records activity. Monotonic: a `now` older than the last activity
    /// leaves the timestamp untouched.
    pub fn record_activity(&mut self, now: DateTime<Utc>, actions: u64) {
        if now > self.last_activity {
            self.last_activity = now;
        }
        self.action_count += actions;
        self.version += 1;
    }

    /// Moves into a terminal state, stamping end time and duration.
    pub(crate) fn end(&mut self, state: SessionState, now: DateTime<Utc>) {
        let ended_at = now.max(self.last_activity);
        self.state = state;
        self.ended_at = Some(ended_at);
        self.active_duration_secs = Some(self.duration().num_seconds());
        self.recoverable = state == SessionState::Expired && self.recovery_state.is_some();
        if state == SessionState::Terminated {
            self.recovery_state = None;
        }
    }

    /// Applies a forward state transition.
    ///
    /// Callers must have checked `can_transition_to`.
    pub fn apply_transition(&mut self, to: SessionState, now: DateTime<Utc>) {
        if to.is_terminal() {
            self.end(to, now);
        } else {
            self.state = to;
        }
        self.version += 1;
    }
}

/// Read-only projection of a session handed to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionView {
    pub session_id: SessionId,
    pub user_id: String,
    pub state: SessionState,
    pub risk: RiskLevel,
    pub device_class: DeviceClass,
    pub origin: String,
    pub country: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub active_duration_secs: Option<i64>,
    pub action_count: u64,
    pub recoverable: bool,
    /// Name of the timeout policy in force
    pub policy: Option<String>,
    /// Hard expiry instant under the policy in force
    pub expires_at: Option<DateTime<Utc>>,
}

impl From<&Session> for SessionView {
    fn from(session: &Session) -> Self {
        Self {
            session_id: session.id.clone(),
            user_id: session.user.user_id.clone(),
            state: session.state,
            risk: session.risk,
            device_class: session.device_class,
            origin: session.signals.origin.clone(),
            country: session.signals.country().map(str::to_string),
            created_at: session.created_at,
            last_activity: session.last_activity,
            ended_at: session.ended_at,
            active_duration_secs: session.active_duration_secs,
            action_count: session.action_count,
            recoverable: session.recoverable,
            policy: None,
            expires_at: None,
        }
    }
}
