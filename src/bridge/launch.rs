//! Launch descriptor: how the external language server process is started.

use std::collections::BTreeMap;
use std::ffi::OsString;

use crate::config::{SERVER_PATH_KEY, SettingsSource};

/// Executable used when no server path is configured.
pub const DEFAULT_SERVER_COMMAND: &str = "ti-lsp";

/// Resolves the launch command from settings.
///
/// A configured, non-empty value is used verbatim; an absent or empty value
/// falls back to [`DEFAULT_SERVER_COMMAND`]. The command is never checked for
/// existence here.
pub fn resolve_server_command<S: SettingsSource + ?Sized>(settings: &S) -> String {
    settings
        .get_string(SERVER_PATH_KEY)
        .filter(|path| !path.is_empty())
        .unwrap_or_else(|| DEFAULT_SERVER_COMMAND.to_string())
}

/// Immutable description of the process to launch.
///
/// The environment is a snapshot taken at construction, so later changes to
/// the host's environment never reach an already-described process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchDescriptor {
    command: String,
    arguments: Vec<String>,
    environment: BTreeMap<OsString, OsString>,
}

impl LaunchDescriptor {
    /// Creates a descriptor for `command` with no arguments and the current
    /// process environment.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            arguments: Vec::new(),
            environment: std::env::vars_os().collect(),
        }
    }

    /// Builds the descriptor for an activation from the host's settings.
    pub fn from_settings<S: SettingsSource + ?Sized>(settings: &S) -> Self {
        Self::new(resolve_server_command(settings))
    }

    /// Replaces the argument list.
    #[must_use]
    pub fn with_arguments(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.arguments = args.into_iter().map(Into::into).collect();
        self
    }

    /// Replaces the environment snapshot.
    #[must_use]
    pub fn with_environment(
        mut self,
        env: impl IntoIterator<Item = (impl Into<OsString>, impl Into<OsString>)>,
    ) -> Self {
        self.environment = env
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self
    }

    /// Executable name or path.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Arguments passed to the executable.
    pub fn arguments(&self) -> &[String] {
        &self.arguments
    }

    /// Environment the process is launched with.
    pub fn environment(&self) -> &BTreeMap<OsString, OsString> {
        &self.environment
    }
}
