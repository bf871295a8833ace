//! Domain-specific error types for the Daisy control plane.
//!
//! All fallible operations return `Result<T, DaisyError>`.
//! Adaptation decisions never surface here: a degraded quality is a
//! normal outcome, not a failure.

use std::time::Duration;
use thiserror::Error;

use crate::model::{ClientId, SessionId, SessionState};

/// The canonical error type for the Daisy control plane.
#[derive(Debug, Error)]
pub enum DaisyError {
    // ── Lifecycle Errors ─────────────────────────────────────────
    /// An event was applied to a session in a state that has no edge for it.
    #[error("invalid transition for session {session}: {event} not allowed from {from}")]
    InvalidTransition {
        session: SessionId,
        from: SessionState,
        event: &'static str,
    },

    /// The referenced session or client does not exist.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// The client already owns a non-terminal session.
    #[error("client {0} already has an active session")]
    DuplicateClient(ClientId),

    // ── Pairing Errors ───────────────────────────────────────────
    /// The pairing gate refused the request or token.
    #[error("pairing denied: {0}")]
    Denied(DenyReason),

    // ── Collaborator Errors ──────────────────────────────────────
    /// A dependency health probe failed or timed out.
    #[error("dependency unreachable: {0}")]
    DependencyUnreachable(String),

    /// The transport or media pipeline reported a failure.
    #[error("transport failure: {0}")]
    TransportFailure(String),

    /// An operation exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// An mpsc channel was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,

    // ── Data Errors ──────────────────────────────────────────────
    /// A resolution string was not of the form `WIDTHxHEIGHT`.
    #[error("invalid resolution: {0}")]
    InvalidResolution(String),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

impl DaisyError {
    pub(crate) fn session_not_found(id: &SessionId) -> Self {
        Self::NotFound {
            kind: "session",
            id: id.to_string(),
        }
    }

    pub(crate) fn client_not_found(id: &ClientId) -> Self {
        Self::NotFound {
            kind: "client",
            id: id.to_string(),
        }
    }

    /// Returns `true` for `NotFound`.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

// ── DenyReason ───────────────────────────────────────────────────

/// Why the pairing gate refused a code or token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// Code, device id or device name was empty.
    MalformedRequest,
    /// The code was never issued.
    UnknownCode,
    /// The code was issued but its lifetime elapsed.
    CodeExpired,
    /// The code was already redeemed by an earlier request.
    CodeAlreadyUsed,
    /// The session token is unknown or already consumed.
    InvalidToken,
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MalformedRequest => write!(f, "malformed pairing request"),
            Self::UnknownCode => write!(f, "unknown pairing code"),
            Self::CodeExpired => write!(f, "pairing code expired"),
            Self::CodeAlreadyUsed => write!(f, "pairing code already used"),
            Self::InvalidToken => write!(f, "invalid or consumed token"),
        }
    }
}

// ── TaskError ─────────────────────────────────────────────────────

/// Typed error for spawned session tasks.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The task exceeded its deadline and was aborted.
    #[error("task timed out after {0:?}")]
    Timeout(Duration),

    /// The task was explicitly cancelled via its `CancellationToken`.
    #[error("task was cancelled")]
    Cancelled,

    /// Generic task failure with a human-readable message.
    #[error("task failed: {0}")]
    Failed(String),
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for DaisyError {
    fn from(s: String) -> Self {
        DaisyError::Other(s)
    }
}

impl From<&str> for DaisyError {
    fn from(s: &str) -> Self {
        DaisyError::Other(s.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for DaisyError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        DaisyError::ChannelClosed
    }
}
