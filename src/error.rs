//! Stable error codes for operators.

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Db(String),

    #[error("I/O failed: {0}")]
    Io(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unknown revision: {0}")]
    UnknownRevision(String),

    #[error("Cannot go back {requested} step(s), only {available} available")]
    InsufficientHistory { requested: usize, available: usize },

    #[error("Revision {revision} failed during {direction}: {cause}")]
    Migration {
        revision: String,
        direction: &'static str,
        cause: String,
    },

    #[error("Another migration holds the lock on {0}")]
    LockContention(String),

    #[error("Migration aborted, applied state left at {at}")]
    Aborted { at: String },
}

impl AppError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Db(_) => "DB_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Conflict(_) => "CONFLICT",
            Self::UnknownRevision(_) => "UNKNOWN_REVISION",
            Self::InsufficientHistory { .. } => "INSUFFICIENT_HISTORY",
            Self::Migration { .. } => "MIGRATION_ERROR",
            Self::LockContention(_) => "LOCK_CONTENTION",
            Self::Aborted { .. } => "ABORTED",
        }
    }

    /// Process exit code for the operator CLI.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::UnknownRevision(_) => 2,
            Self::InsufficientHistory { .. } => 3,
            Self::Migration { .. } => 4,
            Self::LockContention(_) => 5,
            Self::Aborted { .. } => 6,
            _ => 1,
        }
    }

    /// Only lock contention and aborts leave nothing half-done.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LockContention(_) | Self::Aborted { .. })
    }

    /// Revision the error is about, if any.
    pub fn revision(&self) -> Option<&str> {
        match self {
            Self::UnknownRevision(id) => Some(id),
            Self::Migration { revision, .. } => Some(revision),
            Self::Aborted { at } => Some(at),
            _ => None,
        }
    }

    pub fn to_serde(&self) -> AppErrorDto {
        let details = self.revision().map(|rev| {
            serde_json::json!({
                "revision": rev,
                "retryable": self.is_retryable(),
            })
        });
        AppErrorDto {
            code: self.code().to_string(),
            message: self.to_string(),
            details,
        }
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(e: rusqlite::Error) -> Self {
        AppError::Db(e.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        AppError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::Validation(format!("Invalid JSON: {}", e))
    }
}

impl serde::Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.to_serde().serialize(serializer)
    }
}

#[derive(Debug, Serialize)]
pub struct AppErrorDto {
    pub code: String,
    pub message: String,
    pub details: Option<serde_json::Value>,
}
