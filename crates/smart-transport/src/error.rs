//! Error taxonomy for the request/response protocol.
//!
//! Every error that crosses the wire, whether one of the built-in kinds below
//! or an application error produced by a handler, has the same shape:
//!
//! ```json
//! {"code":"NOHANDLER","message":"no handler registered for that request"}
//! ```
//!
//! [`ProtocolError`] is that shape.  [`ErrorKind`] names the five kinds the
//! session itself produces; application code is free to invent its own codes.
//!
//! The remaining types ([`SendError`], [`SessionError`], [`CallError`]) are
//! local to this process and are never transmitted.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ── Built-in kinds ────────────────────────────────────────────────────────────

/// The fixed set of error kinds produced by the session itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A command envelope's `data` is missing, not an object, or does not
    /// have the shape its command requires.
    BadMessage,
    /// An inbound request names a handler that is not registered.
    NoHandler,
    /// An inbound response correlates to no pending request.
    UnexpectedResponse,
    /// A pending request was resolved because the session was detached.
    Detached,
    /// A pending request was resolved (or rejected up front) because the
    /// session is closed.
    Closed,
}

impl ErrorKind {
    /// All built-in kinds, in declaration order.
    pub const ALL: [ErrorKind; 5] = [
        ErrorKind::BadMessage,
        ErrorKind::NoHandler,
        ErrorKind::UnexpectedResponse,
        ErrorKind::Detached,
        ErrorKind::Closed,
    ];

    /// The wire code for this kind.
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::BadMessage => "BADMESSAGE",
            ErrorKind::NoHandler => "NOHANDLER",
            ErrorKind::UnexpectedResponse => "UNEXPECTEDRESPONSE",
            ErrorKind::Detached => "DETACHED",
            ErrorKind::Closed => "CLOSED",
        }
    }

    /// The fixed human-readable message for this kind.
    pub fn message(self) -> &'static str {
        match self {
            ErrorKind::BadMessage => "bad message",
            ErrorKind::NoHandler => "no handler registered for that request",
            ErrorKind::UnexpectedResponse => "got response for no request",
            ErrorKind::Detached => "transport detached",
            ErrorKind::Closed => "transport closed",
        }
    }

    /// Looks up the built-in kind for a wire code, if there is one.
    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.code() == code)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

// ── Wire error ────────────────────────────────────────────────────────────────

/// A serializable protocol error: exactly `{code, message}` on the wire.
///
/// Built-in errors are created with `ProtocolError::from(ErrorKind::Closed)`
/// (or the shorthand constructors); handlers create application errors with
/// [`ProtocolError::new`].  A received error is reconstructed without loss
/// of either field, so `code` and `message` survive a round trip verbatim.
///
/// # Example
///
/// ```rust
/// use smart_transport::{ErrorKind, ProtocolError};
///
/// let err = ProtocolError::from(ErrorKind::NoHandler);
/// let json = serde_json::to_value(&err).unwrap();
/// assert_eq!(json["code"], "NOHANDLER");
///
/// let back: ProtocolError = serde_json::from_value(json).unwrap();
/// assert!(back.is(ErrorKind::NoHandler));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Error)]
#[error("{code}: {message}")]
pub struct ProtocolError {
    /// Machine-readable error code.
    #[serde(default)]
    pub code: String,
    /// Human-readable description.
    #[serde(default)]
    pub message: String,
}

impl ProtocolError {
    /// Creates an application-level error with an arbitrary code.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Returns the built-in kind this error carries, if its code is one.
    pub fn kind(&self) -> Option<ErrorKind> {
        ErrorKind::from_code(&self.code)
    }

    /// Returns `true` if this error has the code of `kind`.
    pub fn is(&self, kind: ErrorKind) -> bool {
        self.code == kind.code()
    }

    pub fn bad_message() -> Self {
        ErrorKind::BadMessage.into()
    }

    pub fn no_handler() -> Self {
        ErrorKind::NoHandler.into()
    }

    pub fn unexpected_response() -> Self {
        ErrorKind::UnexpectedResponse.into()
    }

    pub fn detached() -> Self {
        ErrorKind::Detached.into()
    }

    pub fn closed() -> Self {
        ErrorKind::Closed.into()
    }
}

impl From<ErrorKind> for ProtocolError {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind.code(), kind.message())
    }
}

// ── Local errors ──────────────────────────────────────────────────────────────

/// Failure reported by a transport to a send acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    /// The transport has already been closed.
    #[error("transport closed")]
    Closed,

    /// The underlying channel rejected the message.
    #[error("send failed: {0}")]
    Failed(String),
}

/// Local misuse of a session handle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The session has handed its transport back via `detach()`.
    #[error("session {0} is detached from its transport")]
    Detached(uuid::Uuid),
}

/// Outcome of the future-based call API when it does not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    /// The peer (or the session lifecycle) resolved the request with an error.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// No response arrived before the caller-chosen deadline.
    #[error("no response within {0:?}")]
    TimedOut(Duration),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
