use super::builder::AgentBuilder;
use super::instance::AgentInstance;
use super::task_counter::TaskCounter;
use crate::error::{HubError, HubResult};
use crate::models::AgentConfig;
use crate::storage::ConfigStore;
use crate::utils::{read_lock, write_lock};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// How long a reload waits for in-flight calls before swapping anyway
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Result of reloading one agent
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReloadOutcome {
    pub agent_name: String,
    pub success: bool,
    pub message: String,
}

/// Active call count for one agent
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentTaskCount {
    pub agent_name: String,
    pub active: usize,
}

/// Both maps live under one lock so a reader never sees an instance
/// paired with another version's config.
#[derive(Default)]
struct RegistryMaps {
    instances: HashMap<String, Arc<AgentInstance>>,
    configs: HashMap<String, Arc<AgentConfig>>,
}

/// Live name -> instance table with hot reload
pub struct AgentRegistry {
    maps: RwLock<RegistryMaps>,
    // Serializes reload/unregister per name across their drain waits
    name_locks: DashMap<String, Arc<Mutex<()>>>,
    builder: AgentBuilder,
    store: Arc<dyn ConfigStore>,
    counter: Arc<TaskCounter>,
    drain_timeout: Duration,
}

impl AgentRegistry {
    pub fn new(builder: AgentBuilder, store: Arc<dyn ConfigStore>, counter: Arc<TaskCounter>) -> Self {
        Self {
            maps: RwLock::new(RegistryMaps::default()),
            name_locks: DashMap::new(),
            builder,
            store,
            counter,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    pub fn counter(&self) -> &Arc<TaskCounter> {
        &self.counter
    }

    pub fn store(&self) -> &Arc<dyn ConfigStore> {
        &self.store
    }

    /// Build every enabled agent. One bad definition does not stop the rest.
    /// Returns how many agents were registered.
    pub async fn initialize(&self) -> HubResult<usize> {
        let configs = self.store.list_enabled().await?;
        log::info!("[Registry] Initializing {} agent(s)", configs.len());

        let mut registered = 0;
        for config in configs {
            let name = config.agent_name.clone();
            match self.register(config) {
                Ok(_) => registered += 1,
                Err(e) => log::error!("[Registry] Failed to initialize agent [{}]: {}", name, e),
            }
        }
        Ok(registered)
    }

    pub fn get(&self, name: &str) -> Option<Arc<AgentInstance>> {
        read_lock(&self.maps).instances.get(name).cloned()
    }

    pub fn get_config(&self, name: &str) -> Option<Arc<AgentConfig>> {
        read_lock(&self.maps).configs.get(name).cloned()
    }

    /// Instance and config read under one lock acquisition
    pub fn get_entry(&self, name: &str) -> Option<(Arc<AgentInstance>, Arc<AgentConfig>)> {
        let maps = read_lock(&self.maps);
        let instance = maps.instances.get(name)?.clone();
        let config = maps.configs.get(name)?.clone();
        Some((instance, config))
    }

    pub fn contains(&self, name: &str) -> bool {
        read_lock(&self.maps).instances.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = read_lock(&self.maps).instances.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        read_lock(&self.maps).instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Build and insert `config` unless the name is already registered.
    /// Returns the live instance either way.
    pub fn register(&self, config: AgentConfig) -> HubResult<Arc<AgentInstance>> {
        if !config.enabled {
            return Err(HubError::InvalidConfig(format!(
                "agent '{}' is disabled",
                config.agent_name
            )));
        }
        if let Some(existing) = self.get(&config.agent_name) {
            return Ok(existing);
        }

        // Build outside the lock
        let instance = self.builder.build(config)?;
        let name = instance.name().to_string();

        let mut maps = write_lock(&self.maps);
        if let Some(existing) = maps.instances.get(&name) {
            return Ok(existing.clone());
        }
        maps.configs.insert(name.clone(), instance.config().clone());
        maps.instances.insert(name.clone(), instance.clone());
        log::info!("[Registry] Registered agent [{}]", name);
        Ok(instance)
    }

    /// Rebuild `name` from the latest stored config and swap it in.
    ///
    /// The new instance is built while the old one keeps serving. Returns
    /// `Ok(None)` when the agent is no longer stored or is disabled, leaving
    /// the live entry as it is. On construction failure the previous
    /// instance stays live.
    pub async fn reload(&self, name: &str) -> HubResult<Option<Arc<AgentInstance>>> {
        let _name_guard = self.lock_name(name).await;
        let config = match self.store.find_by_name(name).await? {
            Some(config) if config.enabled => config,
            Some(_) => {
                log::info!("[Registry] Agent [{}] is disabled, not reloading", name);
                return Ok(None);
            }
            None => {
                log::warn!("[Registry] Agent [{}] not found in config store", name);
                return Ok(None);
            }
        };

        let instance = self.builder.build(config)?;
        self.wait_for_drain(name, "reloading").await;
        {
            let mut maps = write_lock(&self.maps);
            maps.configs.insert(name.to_string(), instance.config().clone());
            maps.instances.insert(name.to_string(), instance.clone());
        }
        log::info!(
            "[Registry] Reloaded agent [{}] (generation {})",
            name,
            instance.generation()
        );
        Ok(Some(instance))
    }

    /// Reload every registered agent, reporting each outcome
    pub async fn reload_all(&self) -> Vec<ReloadOutcome> {
        let mut outcomes = Vec::new();
        for name in self.names() {
            let outcome = match self.reload(&name).await {
                Ok(Some(_)) => ReloadOutcome {
                    agent_name: name.clone(),
                    success: true,
                    message: "reloaded".to_string(),
                },
                Ok(None) => ReloadOutcome {
                    agent_name: name.clone(),
                    success: false,
                    message: "not found or disabled".to_string(),
                },
                Err(e) => ReloadOutcome {
                    agent_name: name.clone(),
                    success: false,
                    message: e.to_string(),
                },
            };
            outcomes.push(outcome);
        }
        outcomes
    }

    /// Drain `name`, then remove it from both maps. Returns whether it was registered.
    pub async fn unregister(&self, name: &str) -> bool {
        let _name_guard = self.lock_name(name).await;
        if !self.contains(name) {
            return false;
        }
        self.wait_for_drain(name, "removing").await;
        let mut maps = write_lock(&self.maps);
        maps.configs.remove(name);
        let removed = maps.instances.remove(name).is_some();
        if removed {
            log::info!("[Registry] Unregistered agent [{}]", name);
        }
        removed
    }

    async fn lock_name(&self, name: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .name_locks
            .entry(name.to_string())
            .or_default()
            .clone();
        lock.lock_owned().await
    }

    /// Wait out in-flight calls on `name`; a timeout is logged, never fatal
    async fn wait_for_drain(&self, name: &str, action: &str) {
        let active = self.counter.active_count(name);
        if active > 0 {
            log::info!(
                "[Registry] Agent [{}] has {} active call(s), draining",
                name,
                active
            );
        }
        if !self.counter.drain(name, self.drain_timeout).await {
            log::warn!(
                "[Registry] Agent [{}] still busy after {:?}, {} anyway",
                name,
                self.drain_timeout,
                action
            );
        }
    }

    pub fn task_counts(&self) -> Vec<AgentTaskCount> {
        self.names()
            .into_iter()
            .map(|name| AgentTaskCount {
                active: self.counter.active_count(&name),
                agent_name: name,
            })
            .collect()
    }

    /// Wait for every registered agent to go idle. Returns the names that
    /// were still busy when `timeout` ran out.
    pub async fn drain_all(&self, timeout: Duration) -> Vec<String> {
        let mut busy = Vec::new();
        for name in self.names() {
            if !self.counter.drain(&name, timeout).await {
                busy.push(name);
            }
        }
        busy
    }
}
