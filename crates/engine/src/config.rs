use std::path::Path;

use serde::Deserialize;

use crate::error::EngineError;
use crate::undo::UndoMode;

const DEFAULT_BUSY_TIMEOUT_MS: u32 = 5000;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub database: DatabaseConfig,
    pub undo: UndoConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// `None` keeps the database in memory.
    pub path: Option<String>,
    pub busy_timeout_ms: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct UndoConfig {
    pub default_mode: UndoMode,
    /// Re-read undo markers and overlaps inside the apply transaction and
    /// fail if either changed since the scan.
    pub recheck_in_transaction: bool,
}

impl EngineConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, EngineError> {
        toml::from_str(source).map_err(|e| EngineError::Config(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&source)
    }
}
