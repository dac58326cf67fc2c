//! Human-facing status surface.
//!
//! The bridge reports progress as short status messages (informational or
//! error) and, on failure, a structured [`DiagnosticRecord`] for post-mortem
//! inspection. Hosts decide where both go by implementing [`StatusSink`].

use std::fmt;

use serde::Serialize;
use tracing::{error, info};

use crate::error::{ConnectionError, FailureKind};

/// Display name used to prefix rendered status messages.
pub const CLIENT_NAME: &str = "Ruby-TI LSP";

/// Severity of a status message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational progress.
    Info,
    /// Failure the user should notice.
    Error,
}

/// One message for the editor's notification surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    /// Message severity.
    pub severity: Severity,
    /// Message text, without the client-name prefix.
    pub text: String,
}

impl StatusMessage {
    /// Creates an informational message.
    pub fn info(text: impl Into<String>) -> Self {
        Self {
            severity: Severity::Info,
            text: text.into(),
        }
    }

    /// Creates an error message.
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            text: text.into(),
        }
    }
}

impl fmt::Display for StatusMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{CLIENT_NAME}: {}", self.text)
    }
}

/// Structured failure detail emitted alongside an error status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiagnosticRecord {
    /// Client display name.
    pub client: String,
    /// Command the bridge tried to launch.
    pub command: String,
    /// Failure classification.
    pub kind: FailureKind,
    /// Human-readable reason.
    pub reason: String,
}

impl DiagnosticRecord {
    /// Builds a record for a failed start of `command`.
    pub fn start_failure(command: &str, err: &ConnectionError) -> Self {
        Self {
            client: CLIENT_NAME.to_string(),
            command: command.to_string(),
            kind: err.kind(),
            reason: err.to_string(),
        }
    }
}

/// Destination for status messages and diagnostic records.
pub trait StatusSink: Send + Sync {
    /// Shows a message to the user.
    fn show(&self, message: StatusMessage);

    /// Records failure detail for tooling and logs.
    fn record(&self, record: &DiagnosticRecord);
}

/// Status sink that writes everything to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingStatus;

impl StatusSink for TracingStatus {
    fn show(&self, message: StatusMessage) {
        match message.severity {
            Severity::Info => info!("{message}"),
            Severity::Error => error!("{message}"),
        }
    }

    fn record(&self, record: &DiagnosticRecord) {
        match serde_json::to_string(record) {
            Ok(json) => error!(target: "ruby_ti_bridge::diagnostic", record = %json, "{CLIENT_NAME} error"),
            Err(e) => error!(target: "ruby_ti_bridge::diagnostic", ?record, "failed to serialize record: {e}"),
        }
    }
}
