// Hub configuration: TOML sections with defaults for every field

pub mod loader;
pub mod merger;

pub use loader::ConfigLoader;
pub use merger::{ConfigMerger, PartialConfig};

use crate::agents::ChangeDetection;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct HubConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub registry: RegistryConfig,
    pub poller: PollerConfig,
    pub delivery: DeliveryConfig,
    pub capabilities: CapabilityConfig,
    pub sessions: SessionConfig,
    pub model: ModelConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub bind: String,
    pub cors_origins: Vec<String>,
    /// Fixed auth token; a random one is generated when absent
    pub token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3420,
            bind: "0.0.0.0".to_string(),
            cors_origins: Vec::new(),
            token: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    File,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Messages, sessions and memory; defaults to the platform data dir
    pub data_dir: Option<PathBuf>,
    /// Agent YAML definitions; defaults to `<data_dir>/agents`
    pub agents_dir: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::File,
            data_dir: None,
            agents_dir: None,
        }
    }
}

impl StorageConfig {
    pub fn resolved_data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("agent-hub")
        })
    }

    pub fn resolved_agents_dir(&self) -> PathBuf {
        self.agents_dir
            .clone()
            .unwrap_or_else(|| self.resolved_data_dir().join("agents"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RegistryConfig {
    pub drain_timeout_ms: u64,
    pub drain_poll_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            drain_timeout_ms: 30_000,
            drain_poll_ms: 100,
        }
    }
}

impl RegistryConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn drain_poll(&self) -> Duration {
        Duration::from_millis(self.drain_poll_ms.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PollerConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    pub change_detection: ChangeDetection,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 30,
            change_detection: ChangeDetection::Timestamp,
        }
    }
}

impl PollerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeliveryConfig {
    pub connection_timeout_secs: u64,
    pub retry_delay_ms: u64,
    pub safety_timeout_secs: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            connection_timeout_secs: 300,
            retry_delay_ms: 50,
            safety_timeout_secs: 300,
        }
    }
}

impl DeliveryConfig {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn safety_timeout(&self) -> Duration {
        Duration::from_secs(self.safety_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CapabilityConfig {
    pub resolve_attempts: u32,
    pub initial_backoff_ms: u64,
}

impl Default for CapabilityConfig {
    fn default() -> Self {
        Self {
            resolve_attempts: 3,
            initial_backoff_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    pub cleanup_interval_secs: u64,
    pub expiry_days: i64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cleanup_interval_secs: 3600,
            expiry_days: 365,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ModelProvider {
    #[default]
    Openai,
    Echo,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelConfig {
    pub provider: ModelProvider,
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub temperature: Option<f32>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: ModelProvider::Openai,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            temperature: None,
        }
    }
}
