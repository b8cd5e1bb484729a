// Configuration management for Trellis

pub mod env;
pub mod error;
pub mod loader;

pub use env::EnvLoader;
pub use error::{ConfigError, Result};
pub use loader::{ConfigLoader, FileFormat};

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;
use trellis_core::Provider;

/// Layered configuration store.
///
/// Values live in one JSON tree; keys are dotted paths (`dispatch.fault_status`).
/// Later loads override earlier ones key by key.
#[derive(Clone, Default)]
pub struct ConfigManager {
    root: Arc<RwLock<Map<String, Value>>>,
    env_prefix: Option<String>,
}

impl ConfigManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with environment variable prefix
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            env_prefix: Some(prefix.into()),
            ..Self::default()
        }
    }

    /// Load configuration from environment variables
    pub fn load_env(&self) -> Result<()> {
        let vars = EnvLoader::new(self.env_prefix.clone()).load()?;
        let count = vars.len();
        let mut root = self.root.write();
        for (key, raw) in vars {
            insert_path(&mut root, &key, scalar(&raw));
        }
        debug!(count, "Loaded configuration from environment");
        Ok(())
    }

    /// Load a `.env` file into the process environment, then the environment
    pub fn load_dotenv(&self, path: Option<&str>) -> Result<()> {
        match path {
            Some(path) => {
                dotenvy::from_path(path).map_err(|e| ConfigError::LoadError(e.to_string()))?;
            }
            None => {
                // A missing .env file is fine
                dotenvy::dotenv().ok();
            }
        }
        self.load_env()
    }

    /// Load configuration from a JSON, TOML or env file (format by extension)
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let data = ConfigLoader::auto(path)?.load_file(path)?;
        self.merge_value(data);
        debug!(path = %path.display(), "Loaded configuration file");
        Ok(())
    }

    /// Parse configuration text in the given format and merge it
    pub fn load_str(&self, content: &str, format: FileFormat) -> Result<()> {
        let data = ConfigLoader::new(format).parse(content)?;
        self.merge_value(data);
        Ok(())
    }

    /// Set a configuration value
    pub fn set<T: serde::Serialize>(&self, key: &str, value: T) -> Result<()> {
        let json_value = serde_json::to_value(value)
            .map_err(|e| ConfigError::SerializationError(e.to_string()))?;

        insert_path(&mut self.root.write(), key, json_value);
        Ok(())
    }

    /// Get a configuration value
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let value = self
            .lookup(key)
            .ok_or_else(|| ConfigError::KeyNotFound(key.to_string()))?;

        serde_json::from_value(value)
            .map_err(|e| ConfigError::DeserializationError(format!("{}: {}", key, e)))
    }

    /// Get a configuration value with default
    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.get(key).unwrap_or(default)
    }

    /// Check if a key exists
    pub fn has(&self, key: &str) -> bool {
        self.lookup(key).is_some()
    }

    /// Top-level configuration keys
    pub fn keys(&self) -> Vec<String> {
        self.root.read().keys().cloned().collect()
    }

    /// Merge configuration from another manager
    pub fn merge(&self, other: &ConfigManager) {
        let other_root = other.root.read().clone();
        self.merge_value(Value::Object(other_root));
    }

    fn merge_value(&self, data: Value) {
        if let Value::Object(map) = data {
            let mut root = self.root.write();
            for (key, value) in map {
                merge_into(&mut root, key, value);
            }
        }
    }

    fn lookup(&self, key: &str) -> Option<Value> {
        let root = self.root.read();
        let mut parts = key.split('.');
        let mut current = root.get(parts.next()?)?;
        for part in parts {
            current = current.get(part)?;
        }
        Some(current.clone())
    }
}

impl Provider for ConfigManager {}

/// Interpret an environment string as a JSON scalar when it looks like one
fn scalar(raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(value @ (Value::Number(_) | Value::Bool(_) | Value::Array(_))) => value,
        _ => Value::String(raw.to_string()),
    }
}

fn insert_path(root: &mut Map<String, Value>, key: &str, value: Value) {
    match key.split_once('.') {
        None => {
            root.insert(key.to_string(), value);
        }
        Some((head, rest)) => {
            let child = root
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !child.is_object() {
                *child = Value::Object(Map::new());
            }
            if let Value::Object(map) = child {
                insert_path(map, rest, value);
            }
        }
    }
}

fn merge_into(root: &mut Map<String, Value>, key: String, value: Value) {
    match value {
        Value::Object(incoming) => {
            if let Some(Value::Object(existing)) = root.get_mut(&key) {
                for (k, v) in incoming {
                    merge_into(existing, k, v);
                }
                return;
            }
            root.insert(key, Value::Object(incoming));
        }
        other => {
            root.insert(key, other);
        }
    }
}
