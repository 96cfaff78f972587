//! Error taxonomy for state-mutating handlers.
//!
//! Handlers validate before mutating, so an `Err` always means nothing
//! changed. The simulation turns errors into a targeted `ServerEvent::Error`
//! for the offending connection only; they are never broadcast.

use shared::{ErrorCode, ServerEvent};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GameError {
    /// Malformed or out-of-state event.
    #[error("{message}")]
    Protocol { code: ErrorCode, message: String },
    #[error("not authorized: {0}")]
    Authorization(String),
    /// Party full, inventory full, server full.
    #[error("{message}")]
    Capacity { code: ErrorCode, message: String },
    #[error("persistence failure: {0}")]
    Persistence(String),
}

pub type GameResult<T> = Result<T, GameError>;

impl GameError {
    pub fn protocol(code: ErrorCode, message: impl Into<String>) -> Self {
        GameError::Protocol {
            code,
            message: message.into(),
        }
    }

    pub fn capacity(code: ErrorCode, message: impl Into<String>) -> Self {
        GameError::Capacity {
            code,
            message: message.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        GameError::Authorization(message.into())
    }

    pub fn not_joined() -> Self {
        Self::protocol(ErrorCode::NotJoined, "join the world first")
    }

    pub fn unknown_target(what: impl Into<String>) -> Self {
        Self::protocol(ErrorCode::UnknownTarget, what)
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::protocol(ErrorCode::InvalidState, message)
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            GameError::Protocol { code, .. } | GameError::Capacity { code, .. } => *code,
            GameError::Authorization(_) => ErrorCode::NotAuthorized,
            GameError::Persistence(_) => ErrorCode::PersistenceFailed,
        }
    }

    pub fn to_event(&self) -> ServerEvent {
        ServerEvent::Error {
            code: self.code(),
            message: self.to_string(),
        }
    }
}
