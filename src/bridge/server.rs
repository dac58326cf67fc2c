//! The server bridge: owns one connection for one editor session.
//!
//! # Lifecycle
//!
//! ```text
//!            activate                 start ok
//!   Idle ─────────────► Starting ─────────────► Ready
//!    ▲                     │                      │
//!    │                     │ start err            │
//!    │                     ▼                      │
//!    │                  Failed                    │
//!    │                     │                      │
//!    └───── deactivate ────┴──────────────────────┘
//! ```
//!
//! `activate` returns as soon as the start attempt is issued; the outcome is
//! observed on a background task that emits the matching status and moves
//! the state. `deactivate` issues the stop request immediately and hands back
//! a [`Teardown`] future that resolves once the stop has completed.

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, ready};

use futures::future::BoxFuture;
use lsp_types::{FileEvent, Url};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::SettingsSource;
use crate::error::BridgeError;

use super::connection::{Connection, ConnectionFactory, ConnectionResult, EditorEvent};
use super::launch::LaunchDescriptor;
use super::scope::{ScopeDescriptor, WatchMatcher};
use super::status::{DiagnosticRecord, StatusMessage, StatusSink};

/// Observable state of the bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeState {
    /// No connection held.
    Idle,
    /// The start attempt is in flight.
    Starting,
    /// The server completed its handshake.
    Ready,
    /// The start attempt failed with the given reason.
    Failed(String),
}

impl fmt::Display for BridgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Starting => f.write_str("starting"),
            Self::Ready => f.write_str("ready"),
            Self::Failed(_) => f.write_str("failed"),
        }
    }
}

/// Outcome of forwarding an editor event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The event was handed to the connection.
    Sent,
    /// The event concerns a document or file outside the scope.
    OutOfScope,
    /// The document is already open on the server.
    AlreadyOpen,
    /// The server is not ready; the event was dropped.
    NotReady,
}

/// Everything held for one activation.
struct Session<C> {
    connection: Arc<C>,
    launch: LaunchDescriptor,
    scope: ScopeDescriptor,
    watch: WatchMatcher,
    /// In-scope documents the server has been told are open.
    open_documents: HashSet<Url>,
}

impl<C> Session<C> {
    /// Filters an event against the scope. File events are narrowed to the
    /// paths matching the watch globs; an open of a document the server
    /// already has is refused.
    fn admit(&self, event: EditorEvent) -> Result<EditorEvent, Delivery> {
        match event {
            EditorEvent::FilesChanged(changes) => {
                let kept: Vec<FileEvent> = changes
                    .into_iter()
                    .filter(|change| {
                        change
                            .uri
                            .to_file_path()
                            .is_ok_and(|path| self.watch.is_match(&path))
                    })
                    .collect();
                if kept.is_empty() {
                    Err(Delivery::OutOfScope)
                } else {
                    Ok(EditorEvent::FilesChanged(kept))
                }
            }
            EditorEvent::Opened(item) => {
                if !self.scope.selects(item.uri.scheme(), &item.language_id) {
                    Err(Delivery::OutOfScope)
                } else if self.open_documents.contains(&item.uri) {
                    Err(Delivery::AlreadyOpen)
                } else {
                    Ok(EditorEvent::Opened(item))
                }
            }
            other => {
                let tracked = other
                    .document_uri()
                    .is_some_and(|uri| self.open_documents.contains(uri));
                if tracked {
                    Ok(other)
                } else {
                    Err(Delivery::OutOfScope)
                }
            }
        }
    }
}

/// Bridge between an editor session and one external language server.
///
/// There is exactly one bridge per editor session. The host calls
/// [`activate`](Self::activate) once at session start and
/// [`deactivate`](Self::deactivate) at session end; activating again requires
/// a deactivation first.
pub struct ServerBridge<F: ConnectionFactory> {
    factory: F,
    status: Arc<dyn StatusSink>,
    state: Arc<watch::Sender<BridgeState>>,
    /// Incremented on every activation so late start outcomes from a
    /// torn-down session are ignored.
    epoch: Arc<AtomicU64>,
    /// Held while a start outcome is announced and published, and while the
    /// bridge is (de)activated, so the two never interleave.
    transition: Arc<Mutex<()>>,
    session: Option<Session<F::Connection>>,
}

impl<F: ConnectionFactory> fmt::Debug for ServerBridge<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerBridge")
            .field("state", &*self.state.borrow())
            .field("launch", &self.launch())
            .field("scope", &self.scope())
            .finish_non_exhaustive()
    }
}

impl<F: ConnectionFactory> ServerBridge<F> {
    /// Creates an idle bridge.
    pub fn new(factory: F, status: Arc<dyn StatusSink>) -> Self {
        let (state, _) = watch::channel(BridgeState::Idle);
        Self {
            factory,
            status,
            state: Arc::new(state),
            epoch: Arc::new(AtomicU64::new(0)),
            transition: Arc::new(Mutex::new(())),
            session: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> BridgeState {
        self.state.borrow().clone()
    }

    /// Subscribes to state transitions.
    pub fn subscribe(&self) -> watch::Receiver<BridgeState> {
        self.state.subscribe()
    }

    /// Whether a connection is currently held.
    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    /// Launch descriptor of the current activation.
    pub fn launch(&self) -> Option<&LaunchDescriptor> {
        self.session.as_ref().map(|s| &s.launch)
    }

    /// Scope descriptor of the current activation.
    pub fn scope(&self) -> Option<&ScopeDescriptor> {
        self.session.as_ref().map(|s| &s.scope)
    }

    /// Starts the language server for this session.
    ///
    /// Resolves the launch command from `settings`, announces it, creates a
    /// connection and issues its start request. Returns without waiting for
    /// the server; the outcome arrives as a status message and a transition
    /// to [`BridgeState::Ready`] or [`BridgeState::Failed`]. Start failures
    /// never surface as an `Err` here.
    ///
    /// Must be called from within a Tokio runtime.
    /// ## Errors
    /// [`BridgeError::AlreadyActive`] if a connection is already held, and
    /// [`BridgeError::InvalidGlob`] if the scope's watch globs do not compile.
    /// Neither emits a status message.
    pub fn activate<S: SettingsSource + ?Sized>(
        &mut self,
        settings: &S,
        scope: ScopeDescriptor,
    ) -> Result<(), BridgeError> {
        if self.session.is_some() {
            return Err(BridgeError::AlreadyActive(self.state()));
        }
        let watch = scope.watch_matcher()?;
        let launch = LaunchDescriptor::from_settings(settings);

        self.status.show(StatusMessage::info(format!(
            "Starting server at {}",
            launch.command()
        )));
        info!(
            command = %launch.command(),
            selectors = ?scope.selectors(),
            watch_globs = ?scope.watch_globs(),
            "activating server bridge"
        );

        let connection = Arc::new(self.factory.create(&launch, &scope));
        let epoch = {
            let _gate = lock(&self.transition);
            let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
            self.state.send_replace(BridgeState::Starting);
            epoch
        };

        let watcher = StartWatcher {
            epoch,
            command: launch.command().to_string(),
            status: Arc::clone(&self.status),
            state: Arc::clone(&self.state),
            current_epoch: Arc::clone(&self.epoch),
            transition: Arc::clone(&self.transition),
        };
        tokio::spawn(watcher.settle(connection.start()));

        self.session = Some(Session {
            connection,
            launch,
            scope,
            watch,
            open_documents: HashSet::new(),
        });
        Ok(())
    }

    /// Tears the session down.
    ///
    /// With no connection held this is a no-op whose [`Teardown`] is already
    /// complete. Otherwise the stop request is issued before returning, the
    /// state returns to [`BridgeState::Idle`], and the returned [`Teardown`]
    /// resolves once the stop has completed. Dropping the [`Teardown`] does
    /// not cancel the stop.
    ///
    /// Must be called from within a Tokio runtime when a connection is held.
    pub fn deactivate(&mut self) -> Teardown {
        let Some(session) = self.session.take() else {
            debug!("deactivate called without an active connection");
            return Teardown::complete();
        };

        info!(command = %session.launch.command(), state = %self.state(), "deactivating server bridge");
        {
            let _gate = lock(&self.transition);
            self.state.send_replace(BridgeState::Idle);
        }

        let stop = session.connection.stop();
        let handle = tokio::spawn(async move {
            let result = stop.await;
            match &result {
                Ok(()) => debug!(command = %session.launch.command(), "server stopped"),
                Err(e) => warn!(command = %session.launch.command(), error = %e, "server stop reported a failure"),
            }
            drop(session);
            result
        });
        Teardown { stop: Some(handle) }
    }

    /// Forwards an editor event to the server.
    ///
    /// Only delivered while [`BridgeState::Ready`]. Open events are delivered
    /// when a document selector matches and the document is not already
    /// open; change, save and close events only for documents opened
    /// through the bridge. File events are narrowed to
    /// paths matching the watch globs.
    /// ## Errors
    /// [`BridgeError::Forward`] if the connection rejects the event.
    pub async fn forward(&mut self, event: EditorEvent) -> Result<Delivery, BridgeError> {
        let ready = matches!(*self.state.borrow(), BridgeState::Ready);
        let Some(session) = self.session.as_mut().filter(|_| ready) else {
            return Ok(Delivery::NotReady);
        };
        let event = match session.admit(event) {
            Ok(event) => event,
            Err(refused) => return Ok(refused),
        };

        let (opened, closed) = match &event {
            EditorEvent::Opened(item) => (Some(item.uri.clone()), None),
            EditorEvent::Closed { uri } => (None, Some(uri.clone())),
            _ => (None, None),
        };

        session
            .connection
            .notify(event)
            .await
            .map_err(BridgeError::Forward)?;

        if let Some(uri) = opened {
            session.open_documents.insert(uri);
        }
        if let Some(uri) = closed {
            session.open_documents.remove(&uri);
        }
        Ok(Delivery::Sent)
    }
}

/// Observes one start attempt and publishes its outcome.
struct StartWatcher {
    epoch: u64,
    command: String,
    status: Arc<dyn StatusSink>,
    state: Arc<watch::Sender<BridgeState>>,
    current_epoch: Arc<AtomicU64>,
    transition: Arc<Mutex<()>>,
}

impl StartWatcher {
    fn is_current(&self) -> bool {
        self.current_epoch.load(Ordering::SeqCst) == self.epoch
            && *self.state.borrow() == BridgeState::Starting
    }

    async fn settle(self, start: BoxFuture<'static, ConnectionResult<()>>) {
        let result = start.await;

        // Check, announce and publish under one gate so a concurrent
        // deactivate either lands before (outcome ignored) or after.
        let _gate = lock(&self.transition);
        if !self.is_current() {
            debug!(
                command = %self.command,
                ok = result.is_ok(),
                "ignoring start outcome of a deactivated session"
            );
            return;
        }

        // Status first, so observers of the new state see both messages.
        let next = match result {
            Ok(()) => {
                self.status
                    .show(StatusMessage::info("Server started successfully"));
                BridgeState::Ready
            }
            Err(err) => {
                self.status
                    .show(StatusMessage::error(format!("Failed to start server: {err}")));
                self.status
                    .record(&DiagnosticRecord::start_failure(&self.command, &err));
                BridgeState::Failed(err.to_string())
            }
        };

        self.state.send_replace(next);
    }
}

fn lock(gate: &Mutex<()>) -> MutexGuard<'_, ()> {
    gate.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Completion signal of [`ServerBridge::deactivate`].
#[must_use = "await the teardown to know when the server has stopped"]
#[derive(Debug)]
pub struct Teardown {
    stop: Option<JoinHandle<ConnectionResult<()>>>,
}

impl Teardown {
    fn complete() -> Self {
        Self { stop: None }
    }

    /// Whether there was nothing to tear down.
    pub fn is_noop(&self) -> bool {
        self.stop.is_none()
    }
}

impl Future for Teardown {
    type Output = Result<(), BridgeError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let Some(handle) = self.stop.as_mut() else {
            return Poll::Ready(Ok(()));
        };
        let joined = ready!(Pin::new(handle).poll(cx));
        self.stop = None;
        Poll::Ready(match joined {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(BridgeError::Stop(e)),
            Err(e) => Err(BridgeError::Teardown(e.to_string())),
        })
    }
}
