//! Client-side lifecycle bridge for the Ruby-TI language server.
//!
//! The bridge decides when the external server is started, what it is told
//! it is responsible for, how start failures are surfaced, and how shutdown
//! is sequenced. It never analyses documents itself.
//!
//! # Architecture
//!
//! - `launch`: how the server process is started
//! - `scope`: which documents and file events the server receives
//! - `status`: messages and diagnostic records for the user and tooling
//! - `connection`: the capability set the bridge needs from a connection
//! - `server`: the [`ServerBridge`] state machine
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use ruby_ti_bridge::bridge::{ScopeDescriptor, ServerBridge, TracingStatus};
//! use ruby_ti_bridge::config::Settings;
//! use ruby_ti_bridge::lsp::LspConnectionFactory;
//!
//! let mut bridge = ServerBridge::new(LspConnectionFactory::default(), Arc::new(TracingStatus));
//! bridge.activate(&Settings::new(), ScopeDescriptor::ruby())?;
//! // ... editor session ...
//! bridge.deactivate().await?;
//! ```

pub mod connection;
pub mod launch;
pub mod scope;
pub mod server;
pub mod status;

pub use connection::{Connection, ConnectionFactory, ConnectionResult, EditorEvent};
pub use launch::{DEFAULT_SERVER_COMMAND, LaunchDescriptor, resolve_server_command};
pub use scope::{DocumentSelector, FILE_SCHEME, Language, ScopeDescriptor, WatchMatcher};
pub use server::{BridgeState, Delivery, ServerBridge, Teardown};
pub use status::{CLIENT_NAME, DiagnosticRecord, Severity, StatusMessage, StatusSink, TracingStatus};
