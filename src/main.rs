//! Ruby-TI Bridge - Reference Host
//!
//! Runs one editor session without an editor: activates the bridge, opens
//! the requested documents once the server is ready, and tears the session
//! down on Ctrl-C.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::{Level, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use ruby_ti_bridge::bridge::{
    BridgeState, Delivery, EditorEvent, ScopeDescriptor, ServerBridge, TracingStatus,
};
use ruby_ti_bridge::config::{SERVER_PATH_KEY, Settings};
use ruby_ti_bridge::lsp::{LspConnectionFactory, load_document};

/// Headless host for the Ruby-TI language server bridge.
#[derive(Parser, Debug)]
#[command(name = "ruby-ti-bridge")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Workspace root directory.
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// JSON settings file (VS Code style).
    #[arg(short, long)]
    settings: Option<PathBuf>,

    /// Server executable; overrides the settings file.
    #[arg(long)]
    server_path: Option<String>,

    /// Also hand JSON type definition files to the server.
    #[arg(long)]
    json: bool,

    /// Documents to open once the server is ready. Repeated paths are opened
    /// once; unreadable or out-of-scope files are skipped with a warning.
    #[arg(long)]
    open: Vec<PathBuf>,

    /// Log level: trace, debug, info, warn, error.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines.
    #[arg(long)]
    log_json: bool,
}

impl Args {
    /// Parses the log level string into a tracing Level.
    fn parse_log_level(&self) -> Result<Level> {
        match self.log_level.to_lowercase().as_str() {
            "trace" => Ok(Level::TRACE),
            "debug" => Ok(Level::DEBUG),
            "info" => Ok(Level::INFO),
            "warn" => Ok(Level::WARN),
            "error" => Ok(Level::ERROR),
            other => bail!("invalid log level: {}", other),
        }
    }

    /// Loads the settings file, if any, and applies command-line overrides.
    fn load_settings(&self) -> Result<Settings> {
        let mut settings = match &self.settings {
            Some(path) => Settings::load(path)
                .with_context(|| format!("failed to load settings from {}", path.display()))?,
            None => Settings::new(),
        };
        if let Some(server_path) = &self.server_path {
            settings.set(SERVER_PATH_KEY, server_path.as_str());
        }
        Ok(settings)
    }

    /// Requested documents in order, without repeats.
    fn documents(&self) -> Vec<&Path> {
        let mut seen = HashSet::new();
        self.open
            .iter()
            .map(PathBuf::as_path)
            .filter(|path| seen.insert(*path))
            .collect()
    }

    fn scope(&self) -> ScopeDescriptor {
        if self.json {
            ScopeDescriptor::ruby_and_json()
        } else {
            ScopeDescriptor::ruby()
        }
    }
}

/// Initializes the tracing subscriber for logging.
fn init_tracing(level: Level, json: bool) -> Result<()> {
    // Respect RUST_LOG but fall back to the requested level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("ruby_ti_bridge={level},async_lsp={level}"))
    });

    let registry = tracing_subscriber::registry().with(filter);
    let initialized = if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false),
            )
            .try_init()
    };
    initialized.context("failed to initialize tracing subscriber")?;

    Ok(())
}

/// Reads a file and forwards it to the server as an opened document.
async fn open_document(bridge: &mut ServerBridge<LspConnectionFactory>, path: &Path) {
    let item = match load_document(path).await {
        Ok(item) => item,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "skipping document");
            return;
        }
    };

    match bridge.forward(EditorEvent::Opened(item)).await {
        Ok(Delivery::Sent) => info!(path = %path.display(), "opened document"),
        Ok(delivery) => warn!(path = %path.display(), ?delivery, "document not forwarded"),
        Err(e) => warn!(path = %path.display(), error = %e, "failed to open document"),
    }
}

/// Main entry point.
#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.parse_log_level()?, args.log_json)?;

    let workspace = args.workspace.canonicalize().with_context(|| {
        format!(
            "failed to canonicalize workspace path: {}",
            args.workspace.display()
        )
    })?;
    let settings = args.load_settings()?;

    let factory = LspConnectionFactory::builder()
        .workspace_root(&workspace)
        .build();
    let mut bridge = ServerBridge::new(factory, Arc::new(TracingStatus));

    bridge
        .activate(&settings, args.scope())
        .context("failed to activate server bridge")?;

    let outcome = bridge
        .subscribe()
        .wait_for(|state| *state != BridgeState::Starting)
        .await
        .context("bridge state channel closed")?
        .clone();

    if outcome == BridgeState::Ready {
        for path in args.documents() {
            open_document(&mut bridge, path).await;
        }
        info!(workspace = %workspace.display(), "server running, press Ctrl-C to stop");
        tokio::signal::ctrl_c()
            .await
            .context("failed to listen for Ctrl-C")?;
    }

    bridge.deactivate().await.context("failed to stop server")?;

    if let BridgeState::Failed(reason) = outcome {
        bail!("server failed to start: {reason}");
    }
    info!("session ended");
    Ok(())
}
