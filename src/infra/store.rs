//! Authored revisions on disk, one JSON file per revision.

use crate::domain::{History, Revision};
use crate::error::AppError;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

pub struct RevisionStore {
    dir: PathBuf,
}

impl RevisionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Load and validate the whole history. A missing directory is an empty history.
    pub fn load(&self) -> Result<History, AppError> {
        if !self.dir.exists() {
            log::debug!("Versions dir {:?} does not exist yet", self.dir);
            return Ok(History::empty());
        }

        let mut paths: Vec<PathBuf> = fs::read_dir(&self.dir)
            .map_err(|e| AppError::Io(format!("Failed to read {:?}: {}", self.dir, e)))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();

        let mut revisions = Vec::with_capacity(paths.len());
        for path in paths {
            let json = fs::read_to_string(&path)
                .map_err(|e| AppError::Io(format!("Failed to read {:?}: {}", path, e)))?;
            let revision: Revision = serde_json::from_str(&json).map_err(|e| {
                AppError::Validation(format!("Invalid revision file {:?}: {}", path, e))
            })?;
            if !revision.verify() {
                return Err(AppError::Validation(format!(
                    "Revision file {:?} was edited after authoring (id {} no longer matches)",
                    path, revision.id
                )));
            }
            revisions.push(revision);
        }

        let history = History::from_revisions(revisions)?;
        log::debug!("Loaded {} revision(s) from {:?}", history.len(), self.dir);
        Ok(history)
    }

    /// Write a new revision file. Existing files are never overwritten.
    pub fn write(&self, revision: &Revision) -> Result<PathBuf, AppError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(revision.file_name());
        let json = serde_json::to_string_pretty(revision)?;
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| AppError::Io(format!("Failed to create {:?}: {}", path, e)))?;
        file.write_all(json.as_bytes())?;
        file.write_all(b"\n")?;
        log::info!("Wrote revision {} to {:?}", revision.id, path);
        Ok(path)
    }
}
