//! Editor settings consumed by the bridge.
//!
//! The bridge reads a single string-valued setting, the server path. Hosts
//! supply settings through [`SettingsSource`]; [`Settings`] is a JSON-backed
//! implementation that understands VS Code style settings files, where a key
//! may be written flat (`"rubyTiLsp.serverPath"`) or nested under its section
//! (`{"rubyTiLsp": {"serverPath": ...}}`).

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Settings section owned by the bridge.
pub const SETTINGS_SECTION: &str = "rubyTiLsp";

/// Key of the executable name/path used to launch the language server.
pub const SERVER_PATH_KEY: &str = "rubyTiLsp.serverPath";

/// Read-only view of the host's configuration.
pub trait SettingsSource {
    /// Returns the string value stored under `key`, if any.
    ///
    /// Values of other types are reported as absent.
    fn get_string(&self, key: &str) -> Option<String>;
}

impl SettingsSource for HashMap<String, String> {
    fn get_string(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

/// JSON-backed settings store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Settings {
    values: Map<String, Value>,
}

impl Settings {
    /// Creates an empty settings store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads settings from a JSON file.
    /// ## Errors
    /// Returns an error if the file cannot be read or does not hold a JSON object.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content).map_err(|e| match e {
            Error::Config(message) => Error::Config(format!("{}: {message}", path.display())),
            other => other,
        })
    }

    /// Parses settings from JSON text.
    /// ## Errors
    /// Returns an error for invalid JSON or a non-object root.
    pub fn from_json(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| Error::Config(format!("invalid settings JSON: {e}")))?;
        match value {
            Value::Object(values) => Ok(Self { values }),
            other => Err(Error::Config(format!(
                "settings root must be an object, found {}",
                json_type_name(&other)
            ))),
        }
    }

    /// Stores `value` under the flat `key`, replacing any previous value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    fn lookup(&self, key: &str) -> Option<&Value> {
        if let Some(value) = self.values.get(key) {
            return Some(value);
        }
        let (section, rest) = key.split_once('.')?;
        rest.split('.')
            .try_fold(self.values.get(section)?, |node, part| node.get(part))
    }
}

impl SettingsSource for Settings {
    fn get_string(&self, key: &str) -> Option<String> {
        self.lookup(key)
            .and_then(Value::as_str)
            .map(ToString::to_string)
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
