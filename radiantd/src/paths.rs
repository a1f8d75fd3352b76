//! Cross-platform application paths

use std::fs;
use std::path::{Path, PathBuf};

use radiant::SimulationConfig;

use crate::DaemonError;

#[derive(Debug, Clone)]
pub struct AppPaths {
    data_dir: PathBuf,
}

impl AppPaths {
    pub fn new() -> Result<Self, DaemonError> {
        let base = dirs::data_dir().ok_or(DaemonError::NoDataDir)?;
        Self::at(base.join("radiant"))
    }

    pub fn at(data_dir: PathBuf) -> Result<Self, DaemonError> {
        // Ensure directory exists
        fs::create_dir_all(&data_dir).map_err(|e| DaemonError::Io {
            path: data_dir.clone(),
            source: e,
        })?;
        Ok(Self { data_dir })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn config_file(&self) -> PathBuf {
        self.data_dir.join("config.json")
    }

    /// Load `config.json` if present; defaults otherwise.
    pub fn load_config(&self) -> Result<Option<SimulationConfig>, DaemonError> {
        let path = self.config_file();
        if !path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(&path).map_err(|e| DaemonError::Io {
            path: path.clone(),
            source: e,
        })?;
        let cfg: SimulationConfig =
            serde_json::from_str(&text).map_err(|e| DaemonError::Config { path, source: e })?;
        Ok(Some(cfg))
    }
}
