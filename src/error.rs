//! # Authentication Error Types
//!
//! This module defines the error type shared by the library's public API and
//! its internal workers. Public calls surface these errors directly; errors
//! that occur inside a running protocol worker are translated into a terminal
//! session status instead and reported through the status callback.

use thiserror::Error;

/// Errors produced by the authentication library.
///
/// The variants map to the distinct failure classes of the protocol stack:
/// caller mistakes (`InvalidParam`), resource exhaustion (`NoResource`),
/// failures of the crypto primitives (`Crypto`), lower-transport failures
/// (`Transport`), and the protocol-level outcomes (`Timeout`, `AuthFailure`,
/// `Canceled`).
#[derive(Debug, Error)]
pub enum AuthError {
    /// A caller-supplied argument or flag combination was rejected.
    #[error("invalid parameter: {0}")]
    InvalidParam(&'static str),

    /// A bounded resource (transport instance pool, queue slot) is exhausted.
    #[error("no resource available: {0}")]
    NoResource(&'static str),

    /// The hash or random primitive reported a failure.
    #[error("crypto failure: {0}")]
    Crypto(String),

    /// The lower transport failed to move bytes for a non-timeout reason.
    #[error("transport failure: {0}")]
    Transport(String),

    /// A receive window elapsed with no bytes available.
    ///
    /// This is an internal, retryable condition: protocol workers loop back
    /// into another receive while their cancellation flag is clear.
    #[error("receive timed out")]
    Timeout,

    /// The handshake completed with a mismatched response or a peer-reported
    /// failure result.
    #[error("authentication failed")]
    AuthFailure,

    /// The session's cancellation flag was observed.
    #[error("authentication canceled")]
    Canceled,
}

impl From<std::io::Error> for AuthError {
    fn from(err: std::io::Error) -> Self {
        AuthError::Transport(err.to_string())
    }
}
