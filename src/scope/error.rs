use thiserror::Error;

use super::config::ConfigError;
use super::context::SessionId;
use crate::modules::{Identifier, LoadError};

/// Something found wrong while a scope was being restored.
///
/// Restoration always completes; anomalies are reported alongside.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RestoreAnomaly {
    /// Environment variables changed outside the scope protocol.
    #[error("environment of {session} changed out of band: {}", .keys.join(", "))]
    EnvDrift { session: SessionId, keys: Vec<String> },

    /// The search path changed outside the scope protocol.
    #[error("search path of {session} changed out of band")]
    PathDrift { session: SessionId },

    /// An inner scope was still open when an outer one exited.
    #[error("{inner} was still active when {outer} exited and was closed first")]
    OutOfOrder { outer: SessionId, inner: SessionId },

    /// The scope was no longer on the stack when it exited.
    #[error("{session} exited but was no longer active")]
    NotActive { session: SessionId },
}

/// Errors from the session API.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// `enter` on a session whose scope is open.
    #[error("{0} is already active")]
    AlreadyActive(SessionId),

    /// `reload` on a unit never produced inside a session.
    #[error("unit '{0}' is not session-managed")]
    Unmanaged(Identifier),

    /// `reload` through a session that does not own the unit.
    #[error("unit '{ident}' belongs to {owner}, not {session}")]
    NotOwned {
        ident: Identifier,
        owner: SessionId,
        session: SessionId,
    },

    #[error(transparent)]
    Load(#[from] LoadError),

    /// Restoration anomalies reported by an explicit close.
    #[error("scope restoration reported {} anomalies", .0.len())]
    Restore(Vec<RestoreAnomaly>),
}

impl SessionError {
    /// The unit's own execution error, if loading failed while executing.
    pub fn exec_error(&self) -> Option<&crate::modules::ExecError> {
        match self {
            SessionError::Load(err) => err.exec_error(),
            _ => None,
        }
    }
}
