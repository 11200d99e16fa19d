//! Error definitions for the session module

use thiserror::Error;

use crate::transport::TransportError;

/// Failures reported by [`SessionManager`](super::SessionManager) operations.
///
/// None of these are fatal: each one stays local to the operation that
/// produced it and is surfaced as advisory text or a log line.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    /// Operation attempted outside the `Connected` state, nothing was sent
    #[error("not connected to the broker")]
    NotConnected,

    /// `connect` called while already connected (advisory)
    #[error("already connected to the broker")]
    AlreadyConnected,

    /// The underlying transport request failed
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),

    /// The broker connection dropped without being asked to
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// An inbound payload could not be decoded for display
    #[error("malformed message on '{topic}': {reason}")]
    MalformedMessage { topic: String, reason: String },
}

impl SessionError {
    /// Advisory outcomes are reported to the caller but are not failures.
    pub fn is_advisory(&self) -> bool {
        matches!(self, SessionError::AlreadyConnected)
    }
}
