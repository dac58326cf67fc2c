//! Error types for the Ruby-TI bridge.
//!
//! Errors are organized by subsystem: the connection collaborator (spawning,
//! handshake, transport) and the bridge itself (caller contract, scope
//! validation, teardown).

use serde::Serialize;
use thiserror::Error;

use crate::bridge::BridgeState;

/// Coarse classification of a connection failure.
///
/// Carried in diagnostic records so tooling can tell a missing executable
/// apart from a server that crashed during the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The process could not be spawned.
    Launch,
    /// The process started but never completed the initialize exchange.
    Handshake,
    /// The channel to the process was lost.
    Transport,
    /// The attempt was abandoned because a stop was requested.
    Cancelled,
    /// The connection was used outside its contract.
    Misuse,
}

/// Errors reported by a connection to the external language server.
///
/// The three failure variants display as their bare reason so that the
/// bridge can embed them in user-facing status text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    /// The language server process could not be spawned.
    #[error("{0}")]
    Launch(String),

    /// The process started but did not complete the protocol handshake.
    #[error("{0}")]
    Handshake(String),

    /// The channel to the process was lost.
    #[error("{0}")]
    Transport(String),

    /// A stop request arrived before the connection became ready.
    #[error("connection was stopped before the server became ready")]
    Stopped,

    /// `start` was called on a handle that was already started.
    #[error("connection handle cannot be started twice")]
    Reused,

    /// An event was delivered to a connection that is not running.
    #[error("connection is not running")]
    NotRunning,
}

impl ConnectionError {
    /// Returns the failure classification for diagnostic records.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Launch(_) => FailureKind::Launch,
            Self::Handshake(_) => FailureKind::Handshake,
            Self::Transport(_) => FailureKind::Transport,
            Self::Stopped => FailureKind::Cancelled,
            Self::Reused | Self::NotRunning => FailureKind::Misuse,
        }
    }
}

/// Errors raised by the bridge itself.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// `activate` was called while a previous activation is still held.
    #[error("server bridge is already active (state: {0})")]
    AlreadyActive(BridgeState),

    /// A watch glob in the scope descriptor could not be compiled.
    #[error("invalid watch glob '{pattern}': {message}")]
    InvalidGlob {
        /// The offending pattern.
        pattern: String,
        /// Why it was rejected.
        message: String,
    },

    /// Stopping the connection reported a failure.
    #[error("failed to stop server: {0}")]
    Stop(#[source] ConnectionError),

    /// Delivering an editor event to the connection failed.
    #[error("failed to forward event: {0}")]
    Forward(#[source] ConnectionError),

    /// The background stop task panicked or was cancelled.
    #[error("teardown task failed: {0}")]
    Teardown(String),
}

/// A unified error type for the entire crate.
#[derive(Debug, Error)]
pub enum Error {
    /// Bridge-level error.
    #[error("bridge error: {0}")]
    Bridge(#[from] BridgeError),

    /// Connection-level error.
    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// A path could not be expressed as a document URI.
    #[error("invalid document path: {0}")]
    InvalidPath(String),

    /// Generic IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized Result type for bridge operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_display_is_bare_reason() {
        let err = ConnectionError::Launch("ENOENT".to_string());
        assert_eq!(err.to_string(), "ENOENT");
        assert_eq!(format!("Failed to start server: {err}"), "Failed to start server: ENOENT");
    }

    #[test]
    fn test_failure_kind() {
        assert_eq!(
            ConnectionError::Handshake("exited".into()).kind(),
            FailureKind::Handshake
        );
        assert_eq!(ConnectionError::Stopped.kind(), FailureKind::Cancelled);
        assert_eq!(ConnectionError::NotRunning.kind(), FailureKind::Misuse);
    }

    #[test]
    fn test_error_conversion() {
        let err: Error = ConnectionError::Reused.into();
        assert!(matches!(err, Error::Connection(ConnectionError::Reused)));

        let err: Error = BridgeError::AlreadyActive(BridgeState::Ready).into();
        assert_eq!(
            err.to_string(),
            "bridge error: server bridge is already active (state: ready)"
        );
    }
}
