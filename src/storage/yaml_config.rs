//! Agent definitions stored as one YAML file per agent
//!
//! The agent name comes from `agentName` in the file, falling back to the
//! file stem. When a file carries no `updatedAt`, its modification time is
//! used so the change poller can tell edited files apart.

use super::ConfigStore;
use crate::error::{HubError, HubResult};
use crate::models::AgentConfig;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};

pub struct YamlConfigStore {
    dir: PathBuf,
}

impl YamlConfigStore {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn load_all(&self) -> HubResult<Vec<AgentConfig>> {
        if !self.dir.exists() {
            log::warn!("[ConfigStore] Agents directory {:?} does not exist", self.dir);
            return Ok(Vec::new());
        }

        let entries = fs::read_dir(&self.dir).map_err(|e| {
            HubError::Storage(format!("Failed to read agents dir {:?}: {}", self.dir, e))
        })?;

        let mut paths: Vec<PathBuf> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| is_yaml(p))
            .collect();
        paths.sort();

        let mut configs = Vec::new();
        for path in paths {
            // One malformed file must not hide every other agent
            match load_file(&path) {
                Ok(config) => configs.push(config),
                Err(e) => log::error!("[ConfigStore] Skipping {:?}: {}", path, e),
            }
        }
        Ok(configs)
    }
}

fn is_yaml(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .map_or(false, |ext| ext == "yaml" || ext == "yml")
}

fn load_file(path: &Path) -> Result<AgentConfig, String> {
    let content =
        fs::read_to_string(path).map_err(|e| format!("Failed to read {:?}: {}", path, e))?;
    let mut value: serde_yaml::Value =
        serde_yaml::from_str(&content).map_err(|e| format!("Invalid YAML: {}", e))?;

    if let serde_yaml::Value::Mapping(map) = &mut value {
        let key = serde_yaml::Value::String("agentName".to_string());
        if !map.contains_key(&key) {
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                map.insert(key, serde_yaml::Value::String(stem.to_string()));
            }
        }
    }

    let mut config: AgentConfig =
        serde_yaml::from_value(value).map_err(|e| format!("Invalid agent definition: {}", e))?;

    if config.updated_at.is_none() {
        config.updated_at = fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .map(DateTime::<Utc>::from);
    }
    Ok(config)
}

#[async_trait]
impl ConfigStore for YamlConfigStore {
    async fn list_enabled(&self) -> HubResult<Vec<AgentConfig>> {
        Ok(self.load_all()?.into_iter().filter(|c| c.enabled).collect())
    }

    async fn find_by_name(&self, name: &str) -> HubResult<Option<AgentConfig>> {
        Ok(self
            .load_all()?
            .into_iter()
            .find(|c| c.agent_name == name))
    }
}
