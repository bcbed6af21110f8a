//! # Link Errors
//!
//! One enum covers configuration problems, transport failures and sequencing
//! mistakes in the embedding code. Transport-originated variants are also
//! handed to lifecycle observers, so the type is `Clone`.

use thiserror::Error;

use crate::connections::connection::ConnectionState;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, LinkError>;

/// Every failure the link can report.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LinkError {
    /// Missing or invalid startup configuration. Never retried.
    #[error("invalid configuration for `{field}`: {reason}")]
    Configuration {
        /// Name of the offending field.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },

    /// The remote service refused or failed the handshake.
    #[error("handshake failed: {0}")]
    HandshakeFailure(String),

    /// The link was used before `initialize`, or after the current
    /// connection was cleared by a disconnect.
    #[error("connection not initialized")]
    NotInitialized,

    /// `wait_until_ready` ran out of checks.
    #[error("connection not ready after {checks} checks")]
    ConnectionTimeout {
        /// How many readiness checks were made before giving up.
        checks: u32,
    },

    /// The transport reported that the session ended.
    #[error("transport disconnected: {0}")]
    TransportDisconnect(String),

    /// The connection exists but can no longer become Active.
    #[error("connection unavailable in state {state:?}")]
    ConnectionUnavailable {
        /// State observed when the request was rejected.
        state: ConnectionState,
    },

    /// A wait was aborted through its cancellation token.
    #[error("operation cancelled")]
    Cancelled,

    /// Any other transport-level failure (I/O, framing).
    #[error("transport error: {0}")]
    Transport(String),
}

impl LinkError {
    /// Shorthand for a [`LinkError::Configuration`].
    pub fn configuration(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Configuration {
            field,
            reason: reason.into(),
        }
    }
}
