//! Authoritative session store.
//!
//! Each session lives in its own slot behind a mutex. The map lock is held
//! only to insert or look up a slot, so mutations of independent sessions
//! never contend. State changes are compare-and-swap on the current state:
//! a writer that read a stale state loses with `InvalidTransition`.
//! Writers acting on a snapshot compare its version instead, so any change
//! since the read (activity included) makes them lose with `StaleSession`.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use guard_core::limits::MAX_RECOVERY_STATE_BYTES;
use guard_core::{
    Clock, Error, Result, RiskLevel, Session, SessionId, SessionSignals, SessionState,
    TerminationReason, UserIdentity,
};

type Slot = Arc<Mutex<Session>>;

/// Outcome of recording activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TouchOutcome {
    /// Activity recorded
    Touched { last_activity: DateTime<Utc> },
    /// Session already ended; nothing changed
    Terminal(SessionState),
}

/// Outcome of a risk update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RiskChange {
    pub previous: RiskLevel,
    pub current: RiskLevel,
}

impl RiskChange {
    pub fn changed(&self) -> bool {
        self.previous != self.current
    }
}

/// The single source of truth for session records.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Slot>>,
    clock: Arc<dyn Clock>,
}

impl SessionRegistry {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            clock,
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Registers a new session under a freshly generated identity.
    pub fn create(&self, user: UserIdentity, signals: SessionSignals) -> Result<Session> {
        self.create_with_id(SessionId::generate(), user, signals)
    }

    /// Registers a new session under a caller-chosen identity.
    pub fn create_with_id(
        &self,
        id: SessionId,
        user: UserIdentity,
        signals: SessionSignals,
    ) -> Result<Session> {
        signals.check()?;
        if user.user_id.is_empty() || user.user_id.len() > guard_core::limits::MAX_USER_ID_LEN {
            return Err(Error::validation("user id must be 1-128 chars"));
        }

        let session = Session::new(id, user, signals, self.clock.now());
        self.insert(session)
    }

    /// Inserts a prepared session record.
    pub fn insert(&self, session: Session) -> Result<Session> {
        let mut sessions = self.sessions.write();
        if sessions.contains_key(&session.id) {
            return Err(Error::DuplicateSessionKey(session.id));
        }

        debug!(
            session_id = %session.id,
            user_id = %session.user.user_id,
            device_class = %session.device_class,
            "Session registered"
        );
        sessions.insert(session.id.clone(), Arc::new(Mutex::new(session.clone())));
        Ok(session)
    }

    fn slot(&self, id: &SessionId) -> Result<Slot> {
        self.sessions
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(id.clone()))
    }

    /// Current copy of a session.
    pub fn get(&self, id: &SessionId) -> Result<Session> {
        Ok(self.slot(id)?.lock().clone())
    }

    /// Copies of every session matching `filter`.
    ///
    /// Iterates a copy of the slot list, so concurrent inserts are picked up
    /// by the next call rather than disturbing this one.
    fn collect_where(&self, filter: impl Fn(&Session) -> bool) -> Vec<Session> {
        let slots: Vec<Slot> = self.sessions.read().values().cloned().collect();
        let mut found: Vec<Session> = slots
            .iter()
            .filter_map(|slot| {
                let session = slot.lock();
                filter(&session).then(|| session.clone())
            })
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        found
    }

    /// Non-terminal sessions of one user, oldest first.
    pub fn list_active(&self, user_id: &str) -> Vec<Session> {
        self.collect_where(|s| s.is_live() && s.user.user_id == user_id)
    }

    /// Every session of one user, including ended ones, oldest first.
    pub fn sessions_for_user(&self, user_id: &str) -> Vec<Session> {
        self.collect_where(|s| s.user.user_id == user_id)
    }

    /// Snapshot of all active and warned sessions.
    pub fn snapshot_live(&self) -> Vec<Session> {
        self.collect_where(Session::is_live)
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records activity: sets `last_activity = now` and adds `actions`.
    ///
    /// Terminal sessions are left untouched and reported, not rejected.
    pub fn touch(&self, id: &SessionId, actions: u64) -> Result<TouchOutcome> {
        let slot = self.slot(id)?;
        let mut session = slot.lock();

        if session.state.is_terminal() {
            return Ok(TouchOutcome::Terminal(session.state));
        }

        session.record_activity(self.clock.now(), actions);
        Ok(TouchOutcome::Touched {
            last_activity: session.last_activity,
        })
    }

    /// Compare-and-swap the session state from `from` to `to`.
    pub fn transition(&self, id: &SessionId, from: SessionState, to: SessionState) -> Result<Session> {
        self.transition_with(id, from, None, to, |_| {})
    }

    /// Moves a session to `to` only if it is unchanged since `observed`
    /// was read.
    pub fn transition_observed(&self, observed: &Session, to: SessionState) -> Result<Session> {
        self.transition_with(&observed.id, observed.state, Some(observed.version), to, |_| {})
    }

    /// Silent renewal: resets idle time of an active session, provided it
    /// is unchanged since `observed` was read.
    pub fn renew(&self, observed: &Session) -> Result<DateTime<Utc>> {
        let slot = self.slot(&observed.id)?;
        let mut session = slot.lock();

        check_version(&session, observed.version)?;
        if session.state != SessionState::Active {
            return Err(Error::InvalidTransition {
                id: observed.id.clone(),
                expected: SessionState::Active,
                actual: session.state,
            });
        }

        session.record_activity(self.clock.now(), 0);
        Ok(session.last_activity)
    }

    /// Terminates a session observed in state `from`.
    pub fn terminate(
        &self,
        id: &SessionId,
        from: SessionState,
        reason: TerminationReason,
    ) -> Result<Session> {
        self.transition_with(id, from, None, SessionState::Terminated, move |session| {
            session.termination_reason = Some(reason);
        })
    }

    fn transition_with(
        &self,
        id: &SessionId,
        from: SessionState,
        expected_version: Option<u64>,
        to: SessionState,
        annotate: impl FnOnce(&mut Session),
    ) -> Result<Session> {
        if !from.can_transition_to(to) {
            return Err(Error::ForbiddenTransition {
                id: id.clone(),
                from,
                to,
            });
        }

        let slot = self.slot(id)?;
        let mut session = slot.lock();

        if let Some(version) = expected_version {
            check_version(&session, version)?;
        }
        if session.state != from {
            return Err(Error::InvalidTransition {
                id: id.clone(),
                expected: from,
                actual: session.state,
            });
        }

        annotate(&mut session);
        session.apply_transition(to, self.clock.now());

        info!(
            session_id = %id,
            user_id = %session.user.user_id,
            from = %from,
            to = %to,
            "Session state changed"
        );
        Ok(session.clone())
    }

    /// Proposes a risk level.
    ///
    /// Without `reset` the level only ever rises; a lower proposal is
    /// ignored. `reset` replaces the level unconditionally.
    pub fn set_risk(&self, id: &SessionId, level: RiskLevel, reset: bool) -> Result<RiskChange> {
        let slot = self.slot(id)?;
        let mut session = slot.lock();

        let previous = session.risk;
        if reset || level > previous {
            session.risk = level;
            session.version += 1;
        }

        if session.risk != previous {
            info!(
                session_id = %id,
                previous = %previous,
                current = %session.risk,
                reset = reset,
                "Session risk changed"
            );
        }

        Ok(RiskChange {
            previous,
            current: session.risk,
        })
    }

    /// Stores an opaque state blob for a live session.
    pub fn save_recovery_state(&self, id: &SessionId, state: Vec<u8>) -> Result<()> {
        if state.len() > MAX_RECOVERY_STATE_BYTES {
            return Err(Error::validation(format!(
                "recovery state exceeds {} bytes",
                MAX_RECOVERY_STATE_BYTES
            )));
        }

        let slot = self.slot(id)?;
        let mut session = slot.lock();
        if session.state.is_terminal() {
            return Err(Error::Unknown(id.clone()));
        }

        session.recovery_state = Some(state);
        session.version += 1;
        Ok(())
    }

    /// Hands out the state blob of an expired, recoverable session once.
    pub fn take_recovery_state(&self, id: &SessionId) -> Result<Option<Vec<u8>>> {
        let slot = self.slot(id)?;
        let mut session = slot.lock();
        if !session.recoverable {
            return Ok(None);
        }

        session.recoverable = false;
        session.version += 1;
        Ok(session.recovery_state.take())
    }
}

fn check_version(session: &Session, expected: u64) -> Result<()> {
    if session.version != expected {
        return Err(Error::StaleSession {
            id: session.id.clone(),
            expected,
            actual: session.version,
        });
    }
    Ok(())
}
