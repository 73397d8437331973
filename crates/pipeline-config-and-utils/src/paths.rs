//! File system paths for the pipeline.

use crate::{CoreError, CoreResult};
use std::path::PathBuf;

/// Directory under the home directory holding pipeline state.
const BASE_DIR_NAME: &str = ".telemetry-pipeline";

/// Manages file system paths for the pipeline.
#[derive(Debug, Clone)]
pub struct Paths {
    base_dir: PathBuf,
}

impl Paths {
    /// Paths rooted at `~/.telemetry-pipeline`.
    pub fn new() -> CoreResult<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| CoreError::Path("Could not determine home directory".to_string()))?;

        Ok(Self {
            base_dir: home.join(BASE_DIR_NAME),
        })
    }

    /// Create a new Paths instance with a custom base directory.
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    /// `<base>/config.json`
    pub fn config_file(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    /// `<base>/events.sqlite`
    pub fn database_file(&self) -> PathBuf {
        self.base_dir.join("events.sqlite")
    }

    /// `<base>/logs`
    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }

    /// `<base>/logs/pipeline.jsonl`
    pub fn log_file(&self) -> PathBuf {
        self.logs_dir().join("pipeline.jsonl")
    }

    /// Ensure all required directories exist.
    pub fn ensure_dirs(&self) -> CoreResult<()> {
        std::fs::create_dir_all(&self.base_dir)?;
        std::fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }
}
