//! LSP connection implementation.
//!
//! This module provides the connection that spawns the language server and
//! speaks the Language Server Protocol to it through `async-lsp`.
//!
//! # Example
//!
//! ```ignore
//! use ruby_ti_bridge::bridge::{Connection, ConnectionFactory, LaunchDescriptor, ScopeDescriptor};
//! use ruby_ti_bridge::lsp::LspConnectionFactory;
//!
//! let factory = LspConnectionFactory::builder()
//!     .workspace_root("/path/to/project")
//!     .build();
//!
//! let connection = factory.create(&LaunchDescriptor::new("ti-lsp"), &ScopeDescriptor::ruby());
//! connection.start().await?;
//! connection.stop().await?;
//! ```

use std::fmt;
use std::ops::ControlFlow;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_lsp::concurrency::ConcurrencyLayer;
use async_lsp::panic::CatchUnwindLayer;
use async_lsp::router::Router;
use async_lsp::tracing::TracingLayer;
use async_lsp::{LanguageServer, ServerSocket};
use futures::FutureExt;
use futures::future::BoxFuture;
use lsp_types::{
    ClientCapabilities, ClientInfo, CodeActionClientCapabilities, CompletionClientCapabilities,
    CompletionItemCapability, DidChangeTextDocumentParams, DidChangeWatchedFilesClientCapabilities,
    DidChangeWatchedFilesParams, DidCloseTextDocumentParams, DidOpenTextDocumentParams,
    DidSaveTextDocumentParams, DynamicRegistrationClientCapabilities, GotoCapability,
    HoverClientCapabilities, InitializeParams, InitializedParams, MarkupKind, MessageType,
    PublishDiagnosticsClientCapabilities, TextDocumentClientCapabilities,
    TextDocumentContentChangeEvent, TextDocumentIdentifier, TextDocumentSyncClientCapabilities,
    TraceValue, Url, VersionedTextDocumentIdentifier, WindowClientCapabilities,
    WorkspaceClientCapabilities, WorkspaceFolder, notification, request,
};
use tokio::sync::{Mutex, Notify, watch};
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tracing::{debug, error, info, warn};

use crate::bridge::{
    Connection, ConnectionFactory, ConnectionResult, EditorEvent, LaunchDescriptor,
    ScopeDescriptor,
};
use crate::error::ConnectionError;

use super::types::notification_method;

/// How long a server that dropped the channel is given to report its exit.
const EXIT_GRACE: Duration = Duration::from_millis(500);

/// State for handling notifications from the language server.
#[derive(Debug, Clone)]
struct ClientState {
    /// Command the server was launched with, for log context.
    server: String,
}

/// Configuration shared by every connection a factory creates.
#[derive(Debug, Clone)]
pub struct LspConnectionConfig {
    /// Root directory of the workspace.
    pub workspace_root: PathBuf,
    /// Timeout for the initialize exchange.
    pub init_timeout: Duration,
    /// Timeout for the shutdown request and for the process to exit.
    pub shutdown_timeout: Duration,
}

impl Default for LspConnectionConfig {
    fn default() -> Self {
        Self {
            workspace_root: PathBuf::from("."),
            init_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

/// Builder for an [`LspConnectionFactory`].
#[derive(Debug, Default)]
pub struct LspConnectionBuilder {
    config: LspConnectionConfig,
}

impl LspConnectionBuilder {
    /// Creates a new builder with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the workspace root.
    #[must_use]
    pub fn workspace_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.workspace_root = path.into();
        self
    }

    /// Sets the initialization timeout.
    #[must_use]
    pub fn init_timeout(mut self, timeout: Duration) -> Self {
        self.config.init_timeout = timeout;
        self
    }

    /// Sets the shutdown timeout.
    #[must_use]
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.config.shutdown_timeout = timeout;
        self
    }

    /// Builds the factory.
    pub fn build(self) -> LspConnectionFactory {
        LspConnectionFactory {
            config: Arc::new(self.config),
        }
    }
}

/// Creates [`LspConnection`]s for bridge activations.
#[derive(Debug, Clone, Default)]
pub struct LspConnectionFactory {
    config: Arc<LspConnectionConfig>,
}

impl LspConnectionFactory {
    /// Creates a new builder.
    pub fn builder() -> LspConnectionBuilder {
        LspConnectionBuilder::new()
    }

    /// Configuration applied to created connections.
    pub fn config(&self) -> &LspConnectionConfig {
        &self.config
    }
}

impl ConnectionFactory for LspConnectionFactory {
    type Connection = LspConnection;

    fn create(&self, launch: &LaunchDescriptor, scope: &ScopeDescriptor) -> LspConnection {
        LspConnection::new(launch.clone(), scope.clone(), Arc::clone(&self.config))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Starting,
    Running,
    /// Stopped, or failed to start.
    Closed,
    /// Stopped before `start` was ever called.
    Cancelled,
}

/// A live channel to the server process.
struct Link {
    server: ServerSocket,
    child: async_process::Child,
    mainloop: JoinHandle<()>,
}

impl Link {
    /// Sends one editor event as the matching notification.
    fn deliver(&mut self, event: EditorEvent) -> ConnectionResult<()> {
        let method = notification_method(&event);
        let sent = match event {
            EditorEvent::Opened(text_document) => {
                self.server.did_open(DidOpenTextDocumentParams { text_document })
            }
            EditorEvent::Changed { uri, version, text } => {
                self.server.did_change(DidChangeTextDocumentParams {
                    text_document: VersionedTextDocumentIdentifier { uri, version },
                    content_changes: vec![TextDocumentContentChangeEvent {
                        range: None,
                        range_length: None,
                        text,
                    }],
                })
            }
            EditorEvent::Saved { uri, text } => self.server.did_save(DidSaveTextDocumentParams {
                text_document: TextDocumentIdentifier { uri },
                text,
            }),
            EditorEvent::Closed { uri } => self.server.did_close(DidCloseTextDocumentParams {
                text_document: TextDocumentIdentifier { uri },
            }),
            EditorEvent::FilesChanged(changes) => self
                .server
                .did_change_watched_files(DidChangeWatchedFilesParams { changes }),
        };
        sent.map_err(|e| ConnectionError::Transport(format!("{method} notification failed: {e}")))
    }

    /// Runs the shutdown sequence and reaps the process.
    async fn close(mut self, timeout: Duration) -> ConnectionResult<()> {
        let mut failure = None;
        match tokio::time::timeout(timeout, self.server.shutdown(())).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                failure = Some(ConnectionError::Transport(format!(
                    "shutdown request failed: {e}"
                )));
            }
            Err(_) => {
                failure = Some(ConnectionError::Transport(format!(
                    "no shutdown response within {timeout:?}"
                )));
            }
        }

        if let Err(e) = self.server.exit(()) {
            debug!(error = %e, "exit notification not delivered");
        }

        match tokio::time::timeout(timeout, self.child.status()).await {
            Ok(Ok(status)) => debug!(%status, "language server exited"),
            Ok(Err(e)) => warn!(error = %e, "failed to wait for language server"),
            Err(_) => {
                warn!("language server still running after shutdown, killing it");
                if let Err(e) = self.child.kill() {
                    warn!(error = %e, "failed to kill language server");
                }
            }
        }

        self.mainloop.abort();
        failure.map_or(Ok(()), Err)
    }
}

struct Shared {
    phase: watch::Sender<Phase>,
    link: Mutex<Option<Link>>,
    abort: Notify,
}

/// Connection to one language server process.
///
/// Single use: after `stop`, or after `start` has failed, the handle cannot
/// be started again. The process is killed if the handle is dropped while
/// running.
pub struct LspConnection {
    launch: Arc<LaunchDescriptor>,
    scope: Arc<ScopeDescriptor>,
    config: Arc<LspConnectionConfig>,
    shared: Arc<Shared>,
}

impl fmt::Debug for LspConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LspConnection")
            .field("command", &self.launch.command())
            .field("phase", &*self.shared.phase.borrow())
            .finish_non_exhaustive()
    }
}

impl LspConnection {
    fn new(
        launch: LaunchDescriptor,
        scope: ScopeDescriptor,
        config: Arc<LspConnectionConfig>,
    ) -> Self {
        let (phase, _) = watch::channel(Phase::Idle);
        Self {
            launch: Arc::new(launch),
            scope: Arc::new(scope),
            config,
            shared: Arc::new(Shared {
                phase,
                link: Mutex::new(None),
                abort: Notify::new(),
            }),
        }
    }

    /// Whether the handshake completed and the connection has not been stopped.
    pub fn is_running(&self) -> bool {
        *self.shared.phase.borrow() == Phase::Running
    }
}

impl Connection for LspConnection {
    fn start(&self) -> BoxFuture<'static, ConnectionResult<()>> {
        let launch = Arc::clone(&self.launch);
        let scope = Arc::clone(&self.scope);
        let config = Arc::clone(&self.config);
        let shared = Arc::clone(&self.shared);
        async move { establish(&launch, &scope, &config, &shared).await }.boxed()
    }

    fn stop(&self) -> BoxFuture<'static, ConnectionResult<()>> {
        let shared = Arc::clone(&self.shared);
        let timeout = self.config.shutdown_timeout;
        async move { teardown(&shared, timeout).await }.boxed()
    }

    fn notify(&self, event: EditorEvent) -> BoxFuture<'static, ConnectionResult<()>> {
        let shared = Arc::clone(&self.shared);
        async move {
            let mut link = shared.link.lock().await;
            let Some(link) = link.as_mut() else {
                return Err(ConnectionError::NotRunning);
            };
            link.deliver(event)
        }
        .boxed()
    }
}

async fn establish(
    launch: &LaunchDescriptor,
    scope: &ScopeDescriptor,
    config: &LspConnectionConfig,
    shared: &Shared,
) -> ConnectionResult<()> {
    let mut refused = None;
    shared.phase.send_if_modified(|phase| match phase {
        Phase::Idle => {
            *phase = Phase::Starting;
            true
        }
        Phase::Cancelled => {
            refused = Some(ConnectionError::Stopped);
            false
        }
        Phase::Starting | Phase::Running | Phase::Closed => {
            refused = Some(ConnectionError::Reused);
            false
        }
    });
    if let Some(err) = refused {
        return Err(err);
    }

    let _pending = PendingStart {
        phase: &shared.phase,
    };

    info!(
        command = %launch.command(),
        args = ?launch.arguments(),
        selectors = ?scope.selectors(),
        watch_globs = ?scope.watch_globs(),
        "starting language server"
    );

    let outcome = tokio::select! {
        outcome = handshake(launch, config) => outcome,
        () = shared.abort.notified() => Err(ConnectionError::Stopped),
    };

    match outcome {
        Ok(link) => {
            *shared.link.lock().await = Some(link);
            shared.phase.send_replace(Phase::Running);
            Ok(())
        }
        Err(e) => {
            debug!(command = %launch.command(), error = %e, "language server failed to start");
            shared.phase.send_replace(Phase::Closed);
            Err(e)
        }
    }
}

/// Closes the connection if a start attempt is dropped mid-handshake, so a
/// `stop` waiting for the phase to leave `Starting` is released.
struct PendingStart<'a> {
    phase: &'a watch::Sender<Phase>,
}

impl Drop for PendingStart<'_> {
    fn drop(&mut self) {
        self.phase.send_if_modified(|phase| {
            if *phase == Phase::Starting {
                debug!("start attempt dropped during handshake");
                *phase = Phase::Closed;
                true
            } else {
                false
            }
        });
    }
}

async fn teardown(shared: &Shared, timeout: Duration) -> ConnectionResult<()> {
    let mut phase = shared.phase.subscribe();
    loop {
        let current = *phase.borrow_and_update();
        match current {
            Phase::Idle => {
                let cancelled = shared.phase.send_if_modified(|p| {
                    if *p == Phase::Idle {
                        *p = Phase::Cancelled;
                        true
                    } else {
                        false
                    }
                });
                if cancelled {
                    return Ok(());
                }
            }
            Phase::Starting => {
                debug!("stop requested while starting, aborting handshake");
                shared.abort.notify_one();
                if phase.wait_for(|p| *p != Phase::Starting).await.is_err() {
                    return Ok(());
                }
            }
            Phase::Running => break,
            Phase::Closed | Phase::Cancelled => return Ok(()),
        }
    }

    let link = shared.link.lock().await.take();
    shared.phase.send_replace(Phase::Closed);
    match link {
        Some(link) => {
            info!("shutting down language server");
            link.close(timeout).await
        }
        None => Ok(()),
    }
}

/// Spawns the server and completes the initialize exchange.
async fn handshake(
    launch: &LaunchDescriptor,
    config: &LspConnectionConfig,
) -> ConnectionResult<Link> {
    let workspace_root = config.workspace_root.canonicalize().map_err(|e| {
        ConnectionError::Launch(format!(
            "failed to canonicalize workspace root '{}': {e}",
            config.workspace_root.display()
        ))
    })?;

    // Spawn the language server process
    let mut cmd = async_process::Command::new(launch.command());
    cmd.args(launch.arguments())
        .env_clear()
        .envs(launch.environment())
        .current_dir(&workspace_root)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|e| {
        ConnectionError::Launch(format!("failed to spawn '{}': {e}", launch.command()))
    })?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| ConnectionError::Launch("failed to capture stdout".to_string()))?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| ConnectionError::Launch("failed to capture stdin".to_string()))?;

    let label = launch.command().to_string();
    let (mainloop, mut server) = async_lsp::MainLoop::new_client(|_client| {
        let mut router = Router::new(ClientState { server: label });

        router.notification::<notification::Progress>(|_this, _prog| ControlFlow::Continue(()));

        router.notification::<notification::PublishDiagnostics>(|this, params| {
            debug!(
                server = %this.server,
                uri = %params.uri,
                count = params.diagnostics.len(),
                "diagnostics published"
            );
            ControlFlow::Continue(())
        });

        router.notification::<notification::LogMessage>(|this, params| {
            log_server_message(&this.server, params.typ, &params.message);
            ControlFlow::Continue(())
        });

        router.notification::<notification::ShowMessage>(|this, params| {
            log_server_message(&this.server, params.typ, &params.message);
            ControlFlow::Continue(())
        });

        router.notification::<notification::TelemetryEvent>(|_this, _event| {
            ControlFlow::Continue(())
        });

        router.request::<request::WorkDoneProgressCreate, _>(|_this, _params| async { Ok(()) });

        router.request::<request::RegisterCapability, _>(|_this, _params| async { Ok(()) });

        ServiceBuilder::new()
            .layer(TracingLayer::default())
            .layer(CatchUnwindLayer::default())
            .layer(ConcurrencyLayer::default())
            .service(router)
    });

    let mainloop = tokio::spawn(async move {
        if let Err(e) = mainloop.run_buffered(stdout, stdin).await {
            debug!(error = %e, "language server main loop ended");
        }
    });

    let init_params = initialize_params(&workspace_root)?;
    let init_result =
        match tokio::time::timeout(config.init_timeout, server.initialize(init_params)).await {
            Ok(Ok(result)) => result,
            Ok(Err(async_lsp::Error::Response(err))) => {
                return Err(ConnectionError::Handshake(format!(
                    "initialize request rejected: {err}"
                )));
            }
            Ok(Err(e)) => return Err(connection_lost(&mut child, &e).await),
            Err(_) => {
                return Err(ConnectionError::Handshake(format!(
                    "no initialize response within {:?}",
                    config.init_timeout
                )));
            }
        };

    server.initialized(InitializedParams {}).map_err(|e| {
        ConnectionError::Transport(format!("initialized notification failed: {e}"))
    })?;

    info!(
        command = %launch.command(),
        server_name = ?init_result.server_info.as_ref().map(|info| &info.name),
        server_version = ?init_result.server_info.as_ref().and_then(|info| info.version.as_ref()),
        "language server initialized"
    );
    debug!(capabilities = ?init_result.capabilities, "server capabilities");

    Ok(Link {
        server,
        child,
        mainloop,
    })
}

/// Classifies a channel failure during the handshake.
///
/// A process that has already exited never got through the handshake;
/// anything else is a transport failure.
async fn connection_lost(
    child: &mut async_process::Child,
    err: &async_lsp::Error,
) -> ConnectionError {
    match tokio::time::timeout(EXIT_GRACE, child.status()).await {
        Ok(Ok(status)) => ConnectionError::Handshake(format!(
            "server exited before completing the handshake ({status})"
        )),
        _ => ConnectionError::Transport(format!("connection lost during handshake: {err}")),
    }
}

#[allow(deprecated)]
fn initialize_params(workspace_root: &std::path::Path) -> ConnectionResult<InitializeParams> {
    let workspace_uri = Url::from_file_path(workspace_root).map_err(|()| {
        ConnectionError::Launch(format!(
            "invalid workspace root path: {}",
            workspace_root.display()
        ))
    })?;

    Ok(InitializeParams {
        process_id: Some(std::process::id()),
        root_uri: Some(workspace_uri.clone()),
        workspace_folders: Some(vec![WorkspaceFolder {
            uri: workspace_uri,
            name: workspace_root
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("workspace")
                .to_string(),
        }]),
        capabilities: client_capabilities(),
        trace: Some(TraceValue::Off),
        client_info: Some(ClientInfo {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: Some(env!("CARGO_PKG_VERSION").to_string()),
        }),
        ..Default::default()
    })
}

/// Capabilities matching what the Ruby-TI server offers: full document
/// sync with save, completion, hover, definition, code lens, code actions
/// and diagnostics, plus watched-file notifications.
fn client_capabilities() -> ClientCapabilities {
    ClientCapabilities {
        workspace: Some(WorkspaceClientCapabilities {
            did_change_watched_files: Some(DidChangeWatchedFilesClientCapabilities {
                dynamic_registration: Some(false),
                relative_pattern_support: None,
            }),
            workspace_folders: Some(true),
            ..Default::default()
        }),
        text_document: Some(TextDocumentClientCapabilities {
            synchronization: Some(TextDocumentSyncClientCapabilities {
                dynamic_registration: Some(false),
                will_save: Some(false),
                will_save_wait_until: Some(false),
                did_save: Some(true),
            }),
            completion: Some(CompletionClientCapabilities {
                dynamic_registration: Some(false),
                completion_item: Some(CompletionItemCapability {
                    snippet_support: Some(false),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            hover: Some(HoverClientCapabilities {
                dynamic_registration: Some(false),
                content_format: Some(vec![MarkupKind::Markdown, MarkupKind::PlainText]),
            }),
            definition: Some(GotoCapability {
                dynamic_registration: Some(false),
                link_support: Some(false),
            }),
            code_lens: Some(DynamicRegistrationClientCapabilities {
                dynamic_registration: Some(false),
            }),
            code_action: Some(CodeActionClientCapabilities {
                dynamic_registration: Some(false),
                ..Default::default()
            }),
            publish_diagnostics: Some(PublishDiagnosticsClientCapabilities::default()),
            ..Default::default()
        }),
        window: Some(WindowClientCapabilities {
            work_done_progress: Some(true),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn log_server_message(server: &str, typ: MessageType, message: &str) {
    match typ {
        MessageType::ERROR => error!(server = %server, "{message}"),
        MessageType::WARNING => warn!(server = %server, "{message}"),
        MessageType::INFO => info!(server = %server, "{message}"),
        _ => debug!(server = %server, "{message}"),
    }
}
