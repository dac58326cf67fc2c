//! LSP (Language Server Protocol) connection module.
//!
//! This module implements the bridge's connection collaborator on top of
//! `async-lsp`: it spawns the Ruby-TI server, performs the initialize
//! handshake, forwards editor events as notifications, and runs the
//! shutdown sequence.
//!
//! # Architecture
//!
//! The LSP module is organized into:
//! - `client`: the connection and its factory
//! - `types`: conversions from host paths and events to LSP types

pub mod client;
pub mod types;

pub use client::{LspConnection, LspConnectionBuilder, LspConnectionConfig, LspConnectionFactory};
pub use types::{PathToUri, file_event, language_for_path, load_document, path_to_url};
