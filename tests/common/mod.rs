//! Common test helpers: a scripted connection factory, a recording status
//! sink, and a stub language server for exercising real connections.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use ruby_ti_bridge::bridge::{
    BridgeState, Connection, ConnectionFactory, ConnectionResult, DiagnosticRecord, EditorEvent,
    LaunchDescriptor, ScopeDescriptor, ServerBridge, StatusMessage, StatusSink,
};
use ruby_ti_bridge::config::SERVER_PATH_KEY;
use ruby_ti_bridge::error::ConnectionError;
use tempfile::TempDir;
use tokio::sync::oneshot;

/// How a scripted connection's `start` resolves.
#[derive(Debug, Clone)]
pub enum StartPlan {
    /// Resolves successfully as soon as it is awaited.
    Succeed,
    /// Fails with the given error as soon as it is awaited.
    Fail(ConnectionError),
    /// Stays pending until [`Observations::resolve_start`] is called.
    Manual,
}

/// How a scripted connection's `stop` resolves.
#[derive(Debug, Clone)]
pub enum StopPlan {
    /// Resolves successfully right away.
    Immediate,
    /// Fails with the given error right away.
    Fail(ConnectionError),
    /// Stays pending until [`Observations::release_stop`] is called.
    Manual,
}

/// Everything the scripted connections observed, plus the controls for
/// manual plans.
#[derive(Default)]
pub struct Observations {
    launches: Mutex<Vec<LaunchDescriptor>>,
    scopes: Mutex<Vec<ScopeDescriptor>>,
    start_calls: AtomicUsize,
    stop_calls: AtomicUsize,
    events: Mutex<Vec<EditorEvent>>,
    start_tx: Mutex<Option<oneshot::Sender<ConnectionResult<()>>>>,
    stop_tx: Mutex<Option<oneshot::Sender<ConnectionResult<()>>>>,
}

impl Observations {
    /// Resolves the pending manual start.
    /// ## Panics
    /// If no manual start is pending.
    pub fn resolve_start(&self, result: ConnectionResult<()>) {
        let tx = self
            .start_tx
            .lock()
            .unwrap()
            .take()
            .expect("no manual start pending");
        let _ = tx.send(result);
    }

    /// Resolves the pending manual stop.
    /// ## Panics
    /// If no manual stop is pending.
    pub fn release_stop(&self, result: ConnectionResult<()>) {
        let tx = self
            .stop_tx
            .lock()
            .unwrap()
            .take()
            .expect("no manual stop pending");
        let _ = tx.send(result);
    }

    pub fn launches(&self) -> Vec<LaunchDescriptor> {
        self.launches.lock().unwrap().clone()
    }

    pub fn scopes(&self) -> Vec<ScopeDescriptor> {
        self.scopes.lock().unwrap().clone()
    }

    pub fn start_calls(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> Vec<EditorEvent> {
        self.events.lock().unwrap().clone()
    }
}

/// Factory producing scripted connections.
pub struct ScriptedFactory {
    seen: Arc<Observations>,
    start: StartPlan,
    stop: StopPlan,
}

impl ScriptedFactory {
    /// Creates a factory and the observations of its connections.
    pub fn new(start: StartPlan, stop: StopPlan) -> (Self, Arc<Observations>) {
        let seen = Arc::new(Observations::default());
        let factory = Self {
            seen: Arc::clone(&seen),
            start,
            stop,
        };
        (factory, seen)
    }
}

impl ConnectionFactory for ScriptedFactory {
    type Connection = ScriptedConnection;

    fn create(&self, launch: &LaunchDescriptor, scope: &ScopeDescriptor) -> ScriptedConnection {
        self.seen.launches.lock().unwrap().push(launch.clone());
        self.seen.scopes.lock().unwrap().push(scope.clone());

        let (tx, rx) = oneshot::channel();
        match &self.start {
            StartPlan::Succeed => {
                let _ = tx.send(Ok(()));
            }
            StartPlan::Fail(err) => {
                let _ = tx.send(Err(err.clone()));
            }
            StartPlan::Manual => {
                *self.seen.start_tx.lock().unwrap() = Some(tx);
            }
        }

        ScriptedConnection {
            seen: Arc::clone(&self.seen),
            start_rx: Mutex::new(Some(rx)),
            stop: self.stop.clone(),
        }
    }
}

/// Connection whose outcomes are dictated by the test.
pub struct ScriptedConnection {
    seen: Arc<Observations>,
    start_rx: Mutex<Option<oneshot::Receiver<ConnectionResult<()>>>>,
    stop: StopPlan,
}

impl Connection for ScriptedConnection {
    fn start(&self) -> BoxFuture<'static, ConnectionResult<()>> {
        self.seen.start_calls.fetch_add(1, Ordering::SeqCst);
        let rx = self.start_rx.lock().unwrap().take();
        async move {
            match rx {
                Some(rx) => rx.await.unwrap_or_else(|_| {
                    Err(ConnectionError::Transport("start abandoned".to_string()))
                }),
                None => Err(ConnectionError::Reused),
            }
        }
        .boxed()
    }

    fn stop(&self) -> BoxFuture<'static, ConnectionResult<()>> {
        self.seen.stop_calls.fetch_add(1, Ordering::SeqCst);
        match &self.stop {
            StopPlan::Immediate => futures::future::ready(Ok(())).boxed(),
            StopPlan::Fail(err) => futures::future::ready(Err(err.clone())).boxed(),
            StopPlan::Manual => {
                let (tx, rx) = oneshot::channel();
                *self.seen.stop_tx.lock().unwrap() = Some(tx);
                async move { rx.await.unwrap_or(Ok(())) }.boxed()
            }
        }
    }

    fn notify(&self, event: EditorEvent) -> BoxFuture<'static, ConnectionResult<()>> {
        self.seen.events.lock().unwrap().push(event);
        futures::future::ready(Ok(())).boxed()
    }
}

/// Status sink that keeps everything it receives.
#[derive(Default)]
pub struct RecordingStatus {
    messages: Mutex<Vec<StatusMessage>>,
    records: Mutex<Vec<DiagnosticRecord>>,
}

impl RecordingStatus {
    pub fn messages(&self) -> Vec<StatusMessage> {
        self.messages.lock().unwrap().clone()
    }

    pub fn records(&self) -> Vec<DiagnosticRecord> {
        self.records.lock().unwrap().clone()
    }
}

impl StatusSink for RecordingStatus {
    fn show(&self, message: StatusMessage) {
        self.messages.lock().unwrap().push(message);
    }

    fn record(&self, record: &DiagnosticRecord) {
        self.records.lock().unwrap().push(record.clone());
    }
}

/// Settings holding only a server path.
pub fn server_path(path: &str) -> std::collections::HashMap<String, String> {
    std::collections::HashMap::from([(SERVER_PATH_KEY.to_string(), path.to_string())])
}

/// Waits until the bridge leaves `Starting`.
/// ## Panics
/// If the bridge does not settle within five seconds.
pub async fn settled<F: ConnectionFactory>(bridge: &ServerBridge<F>) -> BridgeState {
    let mut state = bridge.subscribe();
    tokio::time::timeout(
        Duration::from_secs(5),
        state.wait_for(|s| *s != BridgeState::Starting),
    )
    .await
    .expect("bridge did not settle")
    .expect("state channel closed")
    .clone()
}

/// How the stub language server treats the shutdown sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StubBehavior {
    /// Answers `shutdown` and exits on `exit`.
    Cooperative,
    /// Never answers `shutdown` and keeps running after `exit`.
    Unresponsive,
}

/// POSIX shell language server speaking Content-Length framed JSON-RPC on
/// stdio. Every received method is appended to `__LOG__`, one per line.
const STUB_SERVER: &str = r##"#!/bin/sh
log='__LOG__'
behavior='__BEHAVIOR__'
send() { printf 'Content-Length: %d\r\n\r\n%s' "${#1}" "$1"; }
while :; do
  len=
  while IFS= read -r line; do
    line=$(printf '%s' "$line" | tr -d '\r')
    [ -z "$line" ] && break
    case "$line" in
      Content-Length:*) len=$(printf '%s' "${line#Content-Length:}" | tr -d ' ') ;;
    esac
  done
  [ -n "$len" ] || exit 0
  body=$(dd bs=1 count="$len" 2>/dev/null)
  method=$(printf '%s' "$body" | sed -n 's/.*"method":"\([^"]*\)".*/\1/p')
  id=$(printf '%s' "$body" | sed -n 's/.*"id":\([0-9][0-9]*\).*/\1/p')
  printf '%s\n' "$method" >> "$log"
  case "$method" in
    initialize)
      send '{"jsonrpc":"2.0","id":'"$id"',"result":{"capabilities":{"textDocumentSync":1},"serverInfo":{"name":"stub-ti-lsp"}}}' ;;
    shutdown)
      [ "$behavior" = unresponsive ] || send '{"jsonrpc":"2.0","id":'"$id"',"result":null}' ;;
    exit)
      [ "$behavior" = unresponsive ] && exec sleep 30
      exit 0 ;;
  esac
done
"##;

/// An installed stub language server and the log of what it received.
pub struct StubServer {
    /// Executable to configure as the server path.
    pub executable: PathBuf,
    log: PathBuf,
    _dir: TempDir,
}

impl StubServer {
    /// Writes the stub server into a fresh directory and makes it executable.
    /// ## Panics
    /// If the directory or script cannot be created.
    #[cfg(unix)]
    pub fn install(behavior: StubBehavior) -> Self {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().expect("failed to create stub server directory");
        let executable = dir.path().join("stub-ti-lsp");
        let log = dir.path().join("methods.log");
        let behavior = match behavior {
            StubBehavior::Cooperative => "cooperative",
            StubBehavior::Unresponsive => "unresponsive",
        };
        let script = STUB_SERVER
            .replace("__LOG__", &log.display().to_string())
            .replace("__BEHAVIOR__", behavior);

        std::fs::write(&executable, script).expect("failed to write stub server");
        std::fs::set_permissions(&executable, std::fs::Permissions::from_mode(0o755))
            .expect("failed to make stub server executable");

        Self {
            executable,
            log,
            _dir: dir,
        }
    }

    /// Executable path as a settings value.
    pub fn command(&self) -> String {
        self.executable.display().to_string()
    }

    /// Methods received so far, in arrival order.
    pub fn methods(&self) -> Vec<String> {
        std::fs::read_to_string(&self.log)
            .unwrap_or_default()
            .lines()
            .map(ToString::to_string)
            .collect()
    }
}
