//! The connection capability set the bridge drives.
//!
//! A connection wraps one external language server: it can be started
//! (resolving once the server is ready, or failing with a reason), asked to
//! stop, and handed editor events. Framing, serialization and process
//! plumbing live behind this boundary; see [`crate::lsp::client`] for the
//! implementation over `async-lsp`.

use futures::future::BoxFuture;
use lsp_types::{FileEvent, TextDocumentItem, Url};

use crate::error::ConnectionError;

use super::launch::LaunchDescriptor;
use super::scope::ScopeDescriptor;

/// Result type for connection operations.
pub type ConnectionResult<T> = std::result::Result<T, ConnectionError>;

/// Editor lifecycle events forwarded to the server.
#[derive(Debug, Clone, PartialEq)]
pub enum EditorEvent {
    /// A document was opened.
    Opened(TextDocumentItem),
    /// A document's full text changed.
    Changed {
        /// Document URI.
        uri: Url,
        /// New document version.
        version: i32,
        /// Full text after the change.
        text: String,
    },
    /// A document was saved.
    Saved {
        /// Document URI.
        uri: Url,
        /// Saved text, when the host includes it.
        text: Option<String>,
    },
    /// A document was closed.
    Closed {
        /// Document URI.
        uri: Url,
    },
    /// Files on disk were created, changed or deleted.
    FilesChanged(Vec<FileEvent>),
}

impl EditorEvent {
    /// URI of the document this event concerns, if it is a document event.
    pub fn document_uri(&self) -> Option<&Url> {
        match self {
            Self::Opened(item) => Some(&item.uri),
            Self::Changed { uri, .. } | Self::Saved { uri, .. } | Self::Closed { uri } => {
                Some(uri)
            }
            Self::FilesChanged(_) => None,
        }
    }
}

/// A live (or about-to-be-live) channel to one language server.
///
/// Handles are single use: once stopped, a new handle must be created.
/// `stop` may be called while `start` is still pending, in which case the
/// implementation aborts the attempt or stops once ready.
pub trait Connection: Send + Sync + 'static {
    /// Launches the server and completes the handshake.
    fn start(&self) -> BoxFuture<'static, ConnectionResult<()>>;

    /// Requests an orderly stop.
    fn stop(&self) -> BoxFuture<'static, ConnectionResult<()>>;

    /// Delivers one editor event to a ready server.
    fn notify(&self, event: EditorEvent) -> BoxFuture<'static, ConnectionResult<()>>;
}

/// Creates connections for activations.
pub trait ConnectionFactory: Send + Sync {
    /// Connection type produced.
    type Connection: Connection;

    /// Creates an unstarted connection for one activation.
    fn create(&self, launch: &LaunchDescriptor, scope: &ScopeDescriptor) -> Self::Connection;
}

impl<F, C> ConnectionFactory for F
where
    F: Fn(&LaunchDescriptor, &ScopeDescriptor) -> C + Send + Sync,
    C: Connection,
{
    type Connection = C;

    fn create(&self, launch: &LaunchDescriptor, scope: &ScopeDescriptor) -> C {
        self(launch, scope)
    }
}
