// Config file parsing

use crate::{ConfigError, Result};
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;

/// Formats a config file may be written in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Json,
    Toml,
    /// `KEY=value` lines, as in a `.env` file
    Env,
}

impl FileFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "json" => Some(FileFormat::Json),
            "toml" => Some(FileFormat::Toml),
            "env" => Some(FileFormat::Env),
            _ => None,
        }
    }

    /// Detect from the extension, treating a bare `.env` file name as `Env`
    pub fn from_path(path: &Path) -> Option<Self> {
        if path.file_name().and_then(|name| name.to_str()) == Some(".env") {
            return Some(FileFormat::Env);
        }
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }
}

/// Parses config text of one format into a JSON tree
pub struct ConfigLoader {
    format: FileFormat,
}

impl ConfigLoader {
    pub fn new(format: FileFormat) -> Self {
        Self { format }
    }

    /// Loader for the format implied by `path`
    pub fn auto(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        FileFormat::from_path(path).map(Self::new).ok_or_else(|| {
            ConfigError::LoadError(format!("Cannot tell the format of {}", path.display()))
        })
    }

    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<Value> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| ConfigError::LoadError(format!("{}: {}", path.display(), e)))?;
        self.parse(&content)
    }

    pub fn parse(&self, content: &str) -> Result<Value> {
        match self.format {
            FileFormat::Json => serde_json::from_str(content)
                .map_err(|e| ConfigError::ParseError(format!("JSON: {}", e))),
            FileFormat::Toml => {
                let table: toml::Table = toml::from_str(content)
                    .map_err(|e| ConfigError::ParseError(format!("TOML: {}", e)))?;
                serde_json::to_value(table)
                    .map_err(|e| ConfigError::SerializationError(e.to_string()))
            }
            FileFormat::Env => parse_env(content),
        }
    }
}

fn parse_env(content: &str) -> Result<Value> {
    let mut map = Map::new();
    for entry in dotenvy::from_read_iter(content.as_bytes()) {
        let (key, value) = entry.map_err(|e| ConfigError::ParseError(format!("env: {}", e)))?;
        map.insert(key, Value::String(value));
    }
    Ok(Value::Object(map))
}
