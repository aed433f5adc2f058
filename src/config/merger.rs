// Configuration merging with priority

use super::{HubConfig, ModelConfig, ServerConfig, StorageBackend, StorageConfig};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Partial configuration for merging
/// Uses Option<T> for all fields to support partial overrides
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PartialConfig {
    #[serde(default)]
    pub server: Option<PartialServerConfig>,
    #[serde(default)]
    pub storage: Option<PartialStorageConfig>,
    #[serde(default)]
    pub model: Option<PartialModelConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PartialServerConfig {
    pub port: Option<u16>,
    pub bind: Option<String>,
    pub cors_origins: Option<Vec<String>>,
    pub token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PartialStorageConfig {
    pub backend: Option<StorageBackend>,
    pub data_dir: Option<PathBuf>,
    pub agents_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PartialModelConfig {
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,
}

/// Configuration merger
/// Priority order: CLI -> Explicit file -> Global -> Defaults
pub struct ConfigMerger {
    defaults: HubConfig,
    global: Option<HubConfig>,
    explicit: Option<HubConfig>,
    cli: Option<PartialConfig>,
}

impl ConfigMerger {
    pub fn new() -> Self {
        Self {
            defaults: HubConfig::default(),
            global: None,
            explicit: None,
            cli: None,
        }
    }

    pub fn with_global(mut self, config: Option<HubConfig>) -> Self {
        self.global = config;
        self
    }

    /// Config given with `--config`
    pub fn with_explicit(mut self, config: Option<HubConfig>) -> Self {
        self.explicit = config;
        self
    }

    pub fn with_cli(mut self, config: Option<PartialConfig>) -> Self {
        self.cli = config;
        self
    }

    /// Merge all configs with priority
    pub fn merge(&self) -> HubConfig {
        let mut result = self.defaults.clone();

        if let Some(ref global) = self.global {
            result = self.merge_full(&result, global);
        }

        // Explicit file overrides global
        if let Some(ref explicit) = self.explicit {
            result = self.merge_full(&result, explicit);
        }

        // CLI overrides (highest priority)
        if let Some(ref cli) = self.cli {
            result = self.merge_partial(&result, cli);
        }

        result
    }

    /// Full configs replace plain values; optional values fall back to the base
    fn merge_full(&self, base: &HubConfig, over: &HubConfig) -> HubConfig {
        HubConfig {
            server: ServerConfig {
                token: over.server.token.clone().or_else(|| base.server.token.clone()),
                ..over.server.clone()
            },
            storage: StorageConfig {
                backend: over.storage.backend,
                data_dir: over
                    .storage
                    .data_dir
                    .clone()
                    .or_else(|| base.storage.data_dir.clone()),
                agents_dir: over
                    .storage
                    .agents_dir
                    .clone()
                    .or_else(|| base.storage.agents_dir.clone()),
            },
            model: ModelConfig {
                api_key: over.model.api_key.clone().or_else(|| base.model.api_key.clone()),
                temperature: over.model.temperature.or(base.model.temperature),
                ..over.model.clone()
            },
            registry: over.registry.clone(),
            poller: over.poller.clone(),
            delivery: over.delivery.clone(),
            capabilities: over.capabilities.clone(),
            sessions: over.sessions.clone(),
        }
    }

    fn merge_partial(&self, base: &HubConfig, partial: &PartialConfig) -> HubConfig {
        HubConfig {
            server: partial
                .server
                .as_ref()
                .map(|p| self.merge_partial_server(&base.server, p))
                .unwrap_or_else(|| base.server.clone()),
            storage: partial
                .storage
                .as_ref()
                .map(|p| self.merge_partial_storage(&base.storage, p))
                .unwrap_or_else(|| base.storage.clone()),
            model: partial
                .model
                .as_ref()
                .map(|p| self.merge_partial_model(&base.model, p))
                .unwrap_or_else(|| base.model.clone()),
            ..base.clone()
        }
    }

    fn merge_partial_server(&self, base: &ServerConfig, partial: &PartialServerConfig) -> ServerConfig {
        ServerConfig {
            port: partial.port.unwrap_or(base.port),
            bind: partial.bind.clone().unwrap_or_else(|| base.bind.clone()),
            cors_origins: partial
                .cors_origins
                .clone()
                .unwrap_or_else(|| base.cors_origins.clone()),
            token: partial.token.clone().or_else(|| base.token.clone()),
        }
    }

    fn merge_partial_storage(
        &self,
        base: &StorageConfig,
        partial: &PartialStorageConfig,
    ) -> StorageConfig {
        StorageConfig {
            backend: partial.backend.unwrap_or(base.backend),
            data_dir: partial.data_dir.clone().or_else(|| base.data_dir.clone()),
            agents_dir: partial.agents_dir.clone().or_else(|| base.agents_dir.clone()),
        }
    }

    fn merge_partial_model(&self, base: &ModelConfig, partial: &PartialModelConfig) -> ModelConfig {
        ModelConfig {
            api_key: partial.api_key.clone().or_else(|| base.api_key.clone()),
            model: partial.model.clone().unwrap_or_else(|| base.model.clone()),
            base_url: partial
                .base_url
                .clone()
                .unwrap_or_else(|| base.base_url.clone()),
            ..base.clone()
        }
    }
}

impl Default for ConfigMerger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_defaults_only() {
        let merged = ConfigMerger::new().merge();
        assert_eq!(merged, HubConfig::default());
    }

    #[test]
    fn test_explicit_overrides_global() {
        let mut global = HubConfig::default();
        global.server.port = 4000;
        global.model.api_key = Some("global-key".into());

        let mut explicit = HubConfig::default();
        explicit.server.port = 5000;

        let merged = ConfigMerger::new()
            .with_global(Some(global))
            .with_explicit(Some(explicit))
            .merge();
        assert_eq!(merged.server.port, 5000);
        // Optional values survive when the higher layer leaves them unset
        assert_eq!(merged.model.api_key.as_deref(), Some("global-key"));
    }

    #[test]
    fn test_cli_overrides_everything() {
        let mut explicit = HubConfig::default();
        explicit.server.port = 5000;
        explicit.storage.data_dir = Some(PathBuf::from("/from/file"));

        let cli = PartialConfig {
            server: Some(PartialServerConfig {
                port: Some(6000),
                ..Default::default()
            }),
            storage: Some(PartialStorageConfig {
                backend: Some(StorageBackend::Memory),
                ..Default::default()
            }),
            model: None,
        };

        let merged = ConfigMerger::new()
            .with_explicit(Some(explicit))
            .with_cli(Some(cli))
            .merge();
        assert_eq!(merged.server.port, 6000);
        assert_eq!(merged.storage.backend, StorageBackend::Memory);
        assert_eq!(merged.storage.data_dir, Some(PathBuf::from("/from/file")));
    }
}
