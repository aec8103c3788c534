//! Runtime configuration: JSON file, then environment / CLI overrides.

use crate::domain::SchemaShape;
use crate::error::AppError;
use crate::infra::DbLocation;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite file, or `:memory:`.
    pub database: String,
    /// Directory holding one JSON file per revision.
    pub migrations_dir: PathBuf,
    /// Desired schema shape used to autogenerate revisions.
    pub model_path: Option<PathBuf>,
    pub step_timeout_secs: Option<u64>,
    pub busy_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: "database.db".to_string(),
            migrations_dir: PathBuf::from("migrations/versions"),
            model_path: None,
            step_timeout_secs: None,
            busy_timeout_ms: 5000,
        }
    }
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, AppError> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read {:?}: {}", path, e)))?;
        serde_json::from_str(&json)
            .map_err(|e| AppError::Config(format!("Invalid config {:?}: {}", path, e)))
    }

    pub fn location(&self) -> DbLocation {
        DbLocation::parse(&self.database)
    }

    pub fn step_timeout(&self) -> Option<Duration> {
        self.step_timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// Load the model file, if one is configured.
    pub fn load_model(&self) -> Result<Option<SchemaShape>, AppError> {
        let Some(path) = &self.model_path else {
            return Ok(None);
        };
        let json = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read model {:?}: {}", path, e)))?;
        SchemaShape::from_json(&json).map(Some)
    }
}
