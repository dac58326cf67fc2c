//! Helpers for turning host-side paths and events into LSP types.

use std::path::Path;

use lsp_types::notification::{
    DidChangeTextDocument, DidChangeWatchedFiles, DidCloseTextDocument, DidOpenTextDocument,
    DidSaveTextDocument, Notification,
};
use lsp_types::{FileChangeType, FileEvent, TextDocumentItem, Url};

use crate::bridge::{EditorEvent, Language};
use crate::error::{Error, Result};

/// Language id used for files outside the supported set.
const PLAINTEXT: &str = "plaintext";

/// Converts a path to an LSP file:// URI.
///
/// Relative paths are resolved against the current directory and symlinks
/// are resolved, so the path must exist.
/// ## Errors
/// Returns [`Error::InvalidPath`] if the path does not exist.
pub fn path_to_url(path: &Path) -> Result<Url> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };

    let canonical = absolute.canonicalize().map_err(|e| {
        Error::InvalidPath(format!("failed to canonicalize '{}': {e}", path.display()))
    })?;

    Url::from_file_path(&canonical)
        .map_err(|()| Error::InvalidPath(canonical.display().to_string()))
}

/// Extension trait for converting paths to LSP URIs.
pub trait PathToUri {
    /// Converts a path to an LSP URI.
    /// ## Errors
    /// Returns an error if the path cannot be resolved.
    fn to_lsp_uri(&self) -> Result<Url>;
}

impl PathToUri for Path {
    fn to_lsp_uri(&self) -> Result<Url> {
        path_to_url(self)
    }
}

/// Determines the supported language of a file from its extension.
pub fn language_for_path(path: &Path) -> Option<Language> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .and_then(Language::from_extension)
}

/// Reads a file into a document item ready for `textDocument/didOpen`.
/// ## Errors
/// Returns an error if the file cannot be read or resolved to a URI.
pub async fn load_document(path: &Path) -> Result<TextDocumentItem> {
    let uri = path_to_url(path)?;
    let text = tokio::fs::read_to_string(path).await?;
    let language_id = language_for_path(path).map_or(PLAINTEXT, Language::id);

    Ok(TextDocumentItem {
        uri,
        language_id: language_id.to_string(),
        version: 0,
        text,
    })
}

/// Builds a watched-file event for `path`.
///
/// Deleted files no longer exist, so the path is not canonicalized; it must
/// be absolute.
/// ## Errors
/// Returns [`Error::InvalidPath`] for a relative path.
pub fn file_event(path: &Path, typ: FileChangeType) -> Result<FileEvent> {
    let uri = Url::from_file_path(path)
        .map_err(|()| Error::InvalidPath(format!("not an absolute path: {}", path.display())))?;
    Ok(FileEvent { uri, typ })
}

/// LSP notification method an editor event is delivered as.
pub fn notification_method(event: &EditorEvent) -> &'static str {
    match event {
        EditorEvent::Opened(_) => DidOpenTextDocument::METHOD,
        EditorEvent::Changed { .. } => DidChangeTextDocument::METHOD,
        EditorEvent::Saved { .. } => DidSaveTextDocument::METHOD,
        EditorEvent::Closed { .. } => DidCloseTextDocument::METHOD,
        EditorEvent::FilesChanged(_) => DidChangeWatchedFiles::METHOD,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_language_for_path() {
        assert_eq!(language_for_path(Path::new("lib/app.rb")), Some(Language::Ruby));
        assert_eq!(language_for_path(Path::new("types.json")), Some(Language::Json));
        assert_eq!(language_for_path(Path::new("Gemfile")), None);
    }

    #[tokio::test]
    async fn test_load_document() {
        let dir = tempfile::tempdir().unwrap();
        let ruby = dir.path().join("app.rb");
        std::fs::write(&ruby, "puts 1\n").unwrap();
        let notes = dir.path().join("notes.txt");
        std::fs::write(&notes, "todo").unwrap();

        let item = load_document(&ruby).await.unwrap();
        assert_eq!(item.language_id, "ruby");
        assert_eq!(item.text, "puts 1\n");
        assert!(item.uri.as_str().starts_with("file://"));
        assert!(item.uri.as_str().ends_with("/app.rb"));
        assert_eq!(ruby.to_lsp_uri().unwrap(), item.uri);

        let item = load_document(&notes).await.unwrap();
        assert_eq!(item.language_id, "plaintext");
    }

    #[tokio::test]
    async fn test_load_missing_document() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_document(&dir.path().join("gone.rb")).await.unwrap_err();
        assert!(matches!(err, Error::InvalidPath(_)));
    }

    #[test]
    fn test_file_event() {
        let dir = tempfile::tempdir().unwrap();
        let event = file_event(&dir.path().join("deleted.rb"), FileChangeType::DELETED).unwrap();
        assert_eq!(event.typ, FileChangeType::DELETED);
        assert!(event.uri.as_str().ends_with("/deleted.rb"));

        assert!(file_event(&PathBuf::from("relative.rb"), FileChangeType::CREATED).is_err());
    }

    #[test]
    fn test_notification_method() {
        let uri = Url::parse("file:///app.rb").unwrap();
        assert_eq!(
            notification_method(&EditorEvent::Closed { uri }),
            "textDocument/didClose"
        );
        assert_eq!(
            notification_method(&EditorEvent::FilesChanged(Vec::new())),
            "workspace/didChangeWatchedFiles"
        );
    }
}
