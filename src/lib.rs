//! Ruby-TI Bridge
//!
//! A client-side bridge that lets an editing environment hand Ruby language
//! intelligence (diagnostics, completion, navigation) to the external
//! Ruby-TI language server.
//!
//! # Overview
//!
//! This library provides:
//! - A session-scoped [`ServerBridge`](bridge::ServerBridge) that decides when
//!   the server starts, what it is responsible for, how start failures are
//!   surfaced and how shutdown is sequenced
//! - An LSP connection that spawns the server and speaks the protocol to it
//! - Settings lookup for the server path
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐  activate / deactivate  ┌─────────────────┐
//! │   Editor Host   │────────────────────────►│  ServerBridge   │
//! │                 │◄────────────────────────│                 │
//! └─────────────────┘     status messages     └────────┬────────┘
//!                                                      │
//!                                               ┌──────▼────────┐
//!                                               │ LspConnection │
//!                                               └──────┬────────┘
//!                                                      │ JSON-RPC
//!                                               ┌──────▼──────┐
//!                                               │   ti-lsp    │
//!                                               └─────────────┘
//! ```
//!
//! # Modules
//!
//! - [`error`] - Error types for the entire crate
//! - [`config`] - Settings sources
//! - [`bridge`] - The lifecycle bridge and its collaborator traits
//! - [`lsp`] - LSP connection implementation
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use ruby_ti_bridge::bridge::{ScopeDescriptor, ServerBridge, TracingStatus};
//! use ruby_ti_bridge::config::Settings;
//! use ruby_ti_bridge::lsp::LspConnectionFactory;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let factory = LspConnectionFactory::builder().workspace_root(".").build();
//!     let mut bridge = ServerBridge::new(factory, Arc::new(TracingStatus));
//!
//!     bridge.activate(&Settings::load("settings.json".as_ref())?, ScopeDescriptor::ruby())?;
//!     // ... editor session ...
//!     bridge.deactivate().await?;
//!     Ok(())
//! }
//! ```

// Enforce documentation and other quality attributes
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Allow some pedantic lints that are too strict
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod bridge;
pub mod config;
pub mod error;
pub mod lsp;

// Re-export commonly used types at the crate root
pub use error::{Error, Result};
