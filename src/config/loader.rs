// Configuration file loading

use super::{ConfigMerger, HubConfig, PartialConfig};
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Loads the global and explicit config files and merges CLI overrides
pub struct ConfigLoader {
    global_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            global_path: dirs::config_dir().map(|d| d.join("agent-hub").join(CONFIG_FILE_NAME)),
        }
    }

    /// Use a specific global config path (or none)
    pub fn with_global_path(mut self, path: Option<PathBuf>) -> Self {
        self.global_path = path;
        self
    }

    pub fn global_path(&self) -> Option<&Path> {
        self.global_path.as_deref()
    }

    /// Parse one TOML config file
    pub fn load_file(path: &Path) -> Result<HubConfig> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file {:?}", path))
    }

    fn load_global(&self) -> Result<Option<HubConfig>> {
        match &self.global_path {
            Some(path) if path.exists() => {
                log::info!("Loading global config from {:?}", path);
                Self::load_file(path).map(Some)
            }
            _ => Ok(None),
        }
    }

    /// Defaults, then the global file, then `explicit`, then `cli`.
    /// A missing global file is fine; a missing explicit file is an error.
    pub fn load(&self, explicit: Option<&Path>, cli: Option<PartialConfig>) -> Result<HubConfig> {
        let global = self.load_global()?;
        let explicit = match explicit {
            Some(path) => {
                log::info!("Loading config from {:?}", path);
                Some(Self::load_file(path)?)
            }
            None => None,
        };

        Ok(ConfigMerger::new()
            .with_global(global)
            .with_explicit(explicit)
            .with_cli(cli)
            .merge())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
