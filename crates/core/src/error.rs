//! Unified error types for the session guard.
//!
//! Error codes:
//! - SESSION_001-003: Session registry errors
//! - POLICY_001-002: Timeout policy errors
//! - COLLAB_001: External collaborator errors

use thiserror::Error;

use crate::session::{SessionId, SessionState};

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Session error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionErrorCode {
    /// SESSION_001: Session identity already registered
    DuplicateKey,
    /// SESSION_002: Compare-and-swap on session state lost
    InvalidTransition,
    /// SESSION_003: Session unknown or already terminal
    Unknown,
}

impl SessionErrorCode {
    /// Get the error code string.
    pub fn code(&self) -> &'static str {
        match self {
            Self::DuplicateKey => "SESSION_001",
            Self::InvalidTransition => "SESSION_002",
            Self::Unknown => "SESSION_003",
        }
    }

    /// Get the HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::DuplicateKey => 409,
            Self::InvalidTransition => 409,
            Self::Unknown => 404,
        }
    }
}

/// Policy error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyErrorCode {
    /// POLICY_001: No policy matched
    NotFound,
    /// POLICY_002: Policy violates its duration invariants
    Invalid,
}

impl PolicyErrorCode {
    /// Get the error code string.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound => "POLICY_001",
            Self::Invalid => "POLICY_002",
        }
    }
}

/// Unified error type for the session guard.
#[derive(Debug, Error)]
pub enum Error {
    #[error("[SESSION_001] session {0} already exists")]
    DuplicateSessionKey(SessionId),

    #[error("[SESSION_002] session {id}: expected state {expected}, found {actual}")]
    InvalidTransition {
        id: SessionId,
        expected: SessionState,
        actual: SessionState,
    },

    #[error("[SESSION_002] session {id} changed since it was read (version {expected}, now {actual})")]
    StaleSession {
        id: SessionId,
        expected: u64,
        actual: u64,
    },

    #[error("[SESSION_002] session {id}: {from} -> {to} is not a permitted transition")]
    ForbiddenTransition {
        id: SessionId,
        from: SessionState,
        to: SessionState,
    },

    #[error("[SESSION_003] session {0} not found")]
    NotFound(SessionId),

    #[error("[SESSION_003] session {0} is no longer active")]
    Unknown(SessionId),

    #[error("[POLICY_001] no timeout policy matched {0}")]
    PolicyNotFound(String),

    #[error("[POLICY_002] invalid timeout policy {name}: {message}")]
    InvalidPolicy { name: String, message: String },

    #[error("[COLLAB_001] {collaborator} unavailable: {message}")]
    CollaboratorUnavailable {
        collaborator: &'static str,
        message: String,
    },

    #[error("validation error: {0}")]
    Validation(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn invalid_policy(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::InvalidPolicy {
            name: name.into(),
            message: msg.into(),
        }
    }

    pub fn collaborator(collaborator: &'static str, msg: impl Into<String>) -> Self {
        Self::CollaboratorUnavailable {
            collaborator,
            message: msg.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Get the error code if this is a coded error.
    pub fn error_code(&self) -> Option<&'static str> {
        match self {
            Self::DuplicateSessionKey(_) => Some(SessionErrorCode::DuplicateKey.code()),
            Self::InvalidTransition { .. }
            | Self::StaleSession { .. }
            | Self::ForbiddenTransition { .. } => Some(SessionErrorCode::InvalidTransition.code()),
            Self::NotFound(_) | Self::Unknown(_) => Some(SessionErrorCode::Unknown.code()),
            Self::PolicyNotFound(_) => Some(PolicyErrorCode::NotFound.code()),
            Self::InvalidPolicy { .. } => Some(PolicyErrorCode::Invalid.code()),
            Self::CollaboratorUnavailable { .. } => Some("COLLAB_001"),
            _ => None,
        }
    }

    /// Get the HTTP status code for this error.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::DuplicateSessionKey(_) => SessionErrorCode::DuplicateKey.http_status(),
            Self::InvalidTransition { .. }
            | Self::StaleSession { .. }
            | Self::ForbiddenTransition { .. } => SessionErrorCode::InvalidTransition.http_status(),
            Self::NotFound(_) | Self::Unknown(_) => SessionErrorCode::Unknown.http_status(),
            Self::PolicyNotFound(_) => 404,
            Self::InvalidPolicy { .. } => 400,
            Self::CollaboratorUnavailable { .. } => 503,
            Self::Validation(_) => 400,
            Self::Serialization(_) => 400,
            Self::Internal(_) => 500,
        }
    }

    /// Whether the monitor may treat this error as a no-op.
    ///
    /// A lost compare-and-swap or a session that vanished between snapshot
    /// and mutation means another writer got there first.
    pub fn is_benign(&self) -> bool {
        matches!(
            self,
            Self::InvalidTransition { .. }
                | Self::StaleSession { .. }
                | Self::NotFound(_)
                | Self::Unknown(_)
        )
    }
}
