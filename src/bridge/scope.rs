//! Scope descriptor: which documents and file events the server receives.
//!
//! Selectors and watch globs are derived together from the set of supported
//! languages so that every selected language has its extension watched and
//! vice versa.

use std::fmt;
use std::path::Path;

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};

use crate::error::BridgeError;

/// URI scheme of on-disk documents.
pub const FILE_SCHEME: &str = "file";

/// A language the bridge can hand to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    /// Ruby sources (`.rb`).
    Ruby,
    /// JSON files (`.json`), used by Ruby-TI for type definitions.
    Json,
}

impl Language {
    /// Editor language identifier.
    pub fn id(self) -> &'static str {
        match self {
            Self::Ruby => "ruby",
            Self::Json => "json",
        }
    }

    /// File extension without the leading dot.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Ruby => "rb",
            Self::Json => "json",
        }
    }

    /// Looks up a language by file extension.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "rb" => Some(Self::Ruby),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// A (scheme, language identifier) pair selecting open documents.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentSelector {
    /// URI scheme, e.g. `file`.
    pub scheme: String,
    /// Editor language identifier, e.g. `ruby`.
    pub language: String,
}

impl DocumentSelector {
    /// Creates a selector.
    pub fn new(scheme: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            language: language.into(),
        }
    }

    /// Whether a document with this scheme and language id is selected.
    pub fn matches(&self, scheme: &str, language: &str) -> bool {
        self.scheme == scheme && self.language == language
    }
}

/// What the external process is responsible for during one activation.
///
/// Both collections behave as sets: duplicates are dropped and order only
/// affects readability. Empty collections are legal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeDescriptor {
    selectors: Vec<DocumentSelector>,
    watch_globs: Vec<String>,
}

impl ScopeDescriptor {
    /// Creates a descriptor from explicit selectors and globs.
    pub fn new(
        selectors: impl IntoIterator<Item = DocumentSelector>,
        watch_globs: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        let mut scope = Self::default();
        for selector in selectors {
            if !scope.selectors.contains(&selector) {
                scope.selectors.push(selector);
            }
        }
        for glob in watch_globs {
            let glob = glob.into();
            if !scope.watch_globs.contains(&glob) {
                scope.watch_globs.push(glob);
            }
        }
        scope
    }

    /// Scope covering Ruby sources only.
    pub fn ruby() -> Self {
        Self::for_languages(&[Language::Ruby])
    }

    /// Scope covering Ruby sources and JSON type definitions.
    pub fn ruby_and_json() -> Self {
        Self::for_languages(&[Language::Ruby, Language::Json])
    }

    /// Derives selectors and a single watch glob from a language set.
    ///
    /// One language yields `**/*.<ext>`; several yield one brace pattern
    /// `**/*.{a,b}` rather than a glob per extension.
    pub fn for_languages(languages: &[Language]) -> Self {
        let mut unique: Vec<Language> = Vec::with_capacity(languages.len());
        for language in languages {
            if !unique.contains(language) {
                unique.push(*language);
            }
        }

        let selectors = unique
            .iter()
            .map(|language| DocumentSelector::new(FILE_SCHEME, language.id()));

        let glob = match unique.as_slice() {
            [] => None,
            [single] => Some(format!("**/*.{}", single.extension())),
            many => {
                let exts: Vec<&str> = many.iter().map(|l| l.extension()).collect();
                Some(format!("**/*.{{{}}}", exts.join(",")))
            }
        };

        Self::new(selectors, glob)
    }

    /// Document selectors.
    pub fn selectors(&self) -> &[DocumentSelector] {
        &self.selectors
    }

    /// Watch glob patterns.
    pub fn watch_globs(&self) -> &[String] {
        &self.watch_globs
    }

    /// Whether a document with this scheme and language id is in scope.
    pub fn selects(&self, scheme: &str, language: &str) -> bool {
        self.selectors.iter().any(|s| s.matches(scheme, language))
    }

    /// Compiles the watch globs into a path matcher.
    /// ## Errors
    /// Returns [`BridgeError::InvalidGlob`] for a pattern globset rejects.
    pub fn watch_matcher(&self) -> Result<WatchMatcher, BridgeError> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &self.watch_globs {
            let mut glob = GlobBuilder::new(pattern);
            if cfg!(windows) {
                glob.case_insensitive(true);
            }
            let glob = glob.build().map_err(|e| BridgeError::InvalidGlob {
                pattern: pattern.clone(),
                message: e.to_string(),
            })?;
            builder.add(glob);
        }
        let set = builder.build().map_err(|e| BridgeError::InvalidGlob {
            pattern: self.watch_globs.join(" "),
            message: e.to_string(),
        })?;
        Ok(WatchMatcher { set })
    }
}

/// Compiled watch globs.
#[derive(Debug, Clone)]
pub struct WatchMatcher {
    set: GlobSet,
}

impl WatchMatcher {
    /// Whether a change to `path` should be reported to the server.
    pub fn is_match(&self, path: &Path) -> bool {
        self.set.is_match(path)
    }
}
