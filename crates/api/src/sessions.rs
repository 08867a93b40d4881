//! Session operations.
//!
//! Every mutation goes through the registry first; audit delivery happens
//! afterwards and never rolls a mutation back.

use serde_json::json;
use telemetry::metrics;
use tracing::{debug, info, warn};

use guard_core::{
    AuditEvent, AuditEventKind, Error, Result, RiskLevel, Session, SessionId, SessionSignals,
    SessionView, TerminationReason, UserIdentity,
};
use registry::{RiskChange, TouchOutcome};

use crate::state::SessionApi;

/// Reports a missing session the way callers expect: `Unknown`.
fn as_unknown(e: Error) -> Error {
    match e {
        Error::NotFound(id) => Error::Unknown(id),
        other => other,
    }
}

impl SessionApi {
    /// Registers a session for an authenticated user and scores its risk.
    pub async fn create_session(
        &self,
        user: UserIdentity,
        signals: SessionSignals,
    ) -> Result<SessionId> {
        self.create_session_with_id(SessionId::generate(), user, signals)
            .await
    }

    /// Like [`create_session`](Self::create_session) with a caller-chosen
    /// identity. Fails with `DuplicateSessionKey` on collision.
    pub async fn create_session_with_id(
        &self,
        id: SessionId,
        user: UserIdentity,
        signals: SessionSignals,
    ) -> Result<SessionId> {
        let session = self.registry.create_with_id(id, user, signals)?;

        let history = self.registry.sessions_for_user(session.user_id());
        let assessment = self.scorer.assess(&session, &history);
        let change = self
            .registry
            .set_risk(&session.id, assessment.level, false)?;

        metrics().sessions_created.inc();
        if change.changed() {
            metrics().risk_escalations.inc();
        }

        let policy = self.resolver.resolve_for(&session);
        info!(
            session_id = %session.id,
            user_id = %session.user.user_id,
            device_class = %session.device_class,
            risk = %change.current,
            score = assessment.score,
            policy = %policy.name,
            "Session created"
        );

        self.reporter
            .audit(AuditEvent::for_session(
                AuditEventKind::SessionCreated,
                &session,
                session.created_at,
                json!({
                    "device_class": session.device_class,
                    "country": session.signals.country(),
                    "risk": change.current,
                    "score": assessment.score,
                    "factors": assessment.factors,
                    "policy": policy.name,
                }),
            ))
            .await;

        Ok(session.id)
    }

    /// Records one user action. Ended or missing sessions are `Unknown`,
    /// which tells the caller to re-authenticate.
    pub fn record_activity(&self, id: &SessionId) -> Result<()> {
        match self.registry.touch(id, 1).map_err(as_unknown)? {
            TouchOutcome::Touched { .. } => Ok(()),
            TouchOutcome::Terminal(state) => {
                debug!(session_id = %id, state = %state, "Activity on ended session");
                Err(Error::Unknown(id.clone()))
            }
        }
    }

    /// Ends a live session. A lost race with the monitor surfaces as
    /// `InvalidTransition`.
    pub async fn terminate(&self, id: &SessionId, reason: TerminationReason) -> Result<()> {
        let current = self.registry.get(id).map_err(as_unknown)?;
        if current.state.is_terminal() {
            return Err(Error::Unknown(id.clone()));
        }

        let ended = self
            .registry
            .terminate(id, current.state, reason.clone())?;
        metrics().sessions_terminated.inc();

        let kind = match reason {
            TerminationReason::Logout => AuditEventKind::SessionLoggedOut,
            _ => AuditEventKind::SessionTerminated,
        };
        self.reporter
            .audit(AuditEvent::for_session(
                kind,
                &ended,
                self.registry.now(),
                json!({
                    "reason": reason,
                    "duration_secs": ended.active_duration_secs,
                    "action_count": ended.action_count,
                }),
            ))
            .await;

        Ok(())
    }

    /// Terminates every live session of a user. Sessions that end
    /// concurrently are skipped. Returns how many were terminated.
    pub async fn terminate_all_for_user(
        &self,
        user_id: &str,
        reason: TerminationReason,
    ) -> Result<usize> {
        let mut ended = Vec::new();

        for session in self.registry.list_active(user_id) {
            match self
                .registry
                .terminate(&session.id, session.state, reason.clone())
            {
                Ok(_) => ended.push(session.id),
                Err(e) if e.is_benign() => {
                    debug!(session_id = %session.id, error = %e, "Session ended concurrently");
                }
                Err(e) => return Err(e),
            }
        }

        metrics().sessions_terminated.inc_by(ended.len() as u64);
        if ended.is_empty() {
            return Ok(0);
        }

        warn!(
            user_id = user_id,
            sessions = ended.len(),
            reason = reason.label(),
            "User sessions invalidated"
        );
        self.reporter
            .audit(AuditEvent::for_user(
                AuditEventKind::SessionsInvalidated,
                user_id,
                self.registry.now(),
                json!({
                    "reason": reason,
                    "session_ids": ended,
                }),
            ))
            .await;

        Ok(ended.len())
    }

    /// Current view of a session, with the policy in force and, while
    /// live, its hard expiry.
    pub fn get_session_info(&self, id: &SessionId) -> Result<SessionView> {
        let session = self.registry.get(id)?;
        Ok(self.view(&session))
    }

    /// Live sessions of a user, oldest first.
    pub fn list_active(&self, user_id: &str) -> Vec<SessionView> {
        self.registry
            .list_active(user_id)
            .iter()
            .map(|s| self.view(s))
            .collect()
    }

    /// Sets the risk level unconditionally. The only way to lower it.
    pub async fn reset_risk(&self, id: &SessionId, level: RiskLevel) -> Result<RiskChange> {
        let change = self.registry.set_risk(id, level, true)?;
        if !change.changed() {
            return Ok(change);
        }

        let session = self.registry.get(id)?;
        self.reporter
            .audit(AuditEvent::for_session(
                AuditEventKind::RiskChanged,
                &session,
                self.registry.now(),
                json!({
                    "previous": change.previous,
                    "current": change.current,
                    "reset": true,
                }),
            ))
            .await;

        Ok(change)
    }

    /// Stores client state to hand back if the session times out.
    pub fn save_recovery_state(&self, id: &SessionId, state: Vec<u8>) -> Result<()> {
        self.registry
            .save_recovery_state(id, state)
            .map_err(as_unknown)
    }

    /// Returns the saved state of an expired session, once.
    pub fn take_recovery_state(&self, id: &SessionId) -> Result<Option<Vec<u8>>> {
        self.registry.take_recovery_state(id)
    }

    fn view(&self, session: &Session) -> SessionView {
        let policy = self.resolver.resolve_for(session);
        let mut view = SessionView::from(session);
        view.policy = Some(policy.name.clone());
        if session.is_live() {
            view.expires_at = Some(policy.expires_at(session.last_activity));
        }
        view
    }
}
