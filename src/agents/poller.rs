//! Periodic config change detection
//!
//! Each pass lists the enabled configs, reloads every agent whose stored
//! version differs from the cached one, then purges names that are no
//! longer enabled. All registry mutation goes through `reload`/`unregister`.

use super::registry::AgentRegistry;
use crate::error::HubResult;
use crate::storage::ConfigStore;
use crate::utils::lock_mutex;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// How a pass decides that an agent changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeDetection {
    /// Reload when the stored `updated_at` differs from the cached one
    #[default]
    Timestamp,
    /// Reload every enabled agent on every pass
    Always,
}

/// What one pass did
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PollReport {
    pub reloaded: Vec<String>,
    pub failed: Vec<String>,
    pub purged: Vec<String>,
    pub unchanged: usize,
}

pub struct ConfigChangePoller {
    registry: Arc<AgentRegistry>,
    store: Arc<dyn ConfigStore>,
    detection: ChangeDetection,
    interval: Duration,
    versions: Mutex<HashMap<String, Option<DateTime<Utc>>>>,
    // One pass at a time, whether timer-driven or manual
    pass: tokio::sync::Mutex<()>,
}

impl ConfigChangePoller {
    pub fn new(registry: Arc<AgentRegistry>, store: Arc<dyn ConfigStore>) -> Self {
        Self {
            registry,
            store,
            detection: ChangeDetection::default(),
            interval: DEFAULT_POLL_INTERVAL,
            versions: Mutex::new(HashMap::new()),
            pass: tokio::sync::Mutex::new(()),
        }
    }

    pub fn with_detection(mut self, detection: ChangeDetection) -> Self {
        self.detection = detection;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn cached_names(&self) -> Vec<String> {
        let mut names: Vec<String> = lock_mutex(&self.versions).keys().cloned().collect();
        names.sort();
        names
    }

    fn is_changed(&self, name: &str, updated_at: Option<DateTime<Utc>>) -> bool {
        match lock_mutex(&self.versions).get(name) {
            None => true,
            Some(_) if self.detection == ChangeDetection::Always => true,
            Some(cached) => *cached != updated_at,
        }
    }

    /// Run one full pass
    pub async fn check_changes(&self) -> HubResult<PollReport> {
        let _pass = self.pass.lock().await;
        let configs = self.store.list_enabled().await?;
        let mut report = PollReport::default();
        let mut enabled = BTreeSet::new();

        for config in configs {
            let name = config.agent_name.clone();
            enabled.insert(name.clone());

            if !self.is_changed(&name, config.updated_at) {
                report.unchanged += 1;
                continue;
            }

            match self.registry.reload(&name).await {
                Ok(Some(_)) => {
                    lock_mutex(&self.versions).insert(name.clone(), config.updated_at);
                    report.reloaded.push(name);
                }
                Ok(None) => {
                    // Disabled or removed between listing and reload
                    lock_mutex(&self.versions).remove(&name);
                    enabled.remove(&name);
                }
                Err(e) => {
                    log::error!("[Poller] Failed to reload agent [{}]: {}", name, e);
                    report.failed.push(name);
                }
            }
        }

        let mut stale: BTreeSet<String> = lock_mutex(&self.versions)
            .keys()
            .filter(|name| !enabled.contains(*name))
            .cloned()
            .collect();
        stale.extend(
            self.registry
                .names()
                .into_iter()
                .filter(|name| !enabled.contains(name)),
        );

        for name in stale {
            lock_mutex(&self.versions).remove(&name);
            self.registry.unregister(&name).await;
            report.purged.push(name);
        }

        if !report.reloaded.is_empty() || !report.failed.is_empty() || !report.purged.is_empty() {
            log::info!(
                "[Poller] Pass complete: {} reloaded, {} failed, {} purged, {} unchanged",
                report.reloaded.len(),
                report.failed.len(),
                report.purged.len(),
                report.unchanged
            );
        }
        Ok(report)
    }

    /// Run passes every interval until the returned handle is stopped or dropped
    pub fn start(self: Arc<Self>) -> PollerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let period = self.interval;
        log::info!(
            "[Poller] Checking config changes every {:?} ({:?} detection)",
            period,
            self.detection
        );

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.check_changes().await {
                            log::error!("[Poller] Config check failed: {}", e);
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        log::debug!("[Poller] Stopping");
                        break;
                    }
                }
            }
        });

        PollerHandle {
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        }
    }
}

/// Owner of the background poll task
pub struct PollerHandle {
    shutdown_tx: Option<mpsc::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl PollerHandle {
    /// Signal the loop and wait for the current pass to finish
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.try_send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::builder::AgentBuilder;
    use crate::agents::capability::CapabilityRegistry;
    use crate::agents::task_counter::TaskCounter;
    use crate::llm::EchoModel;
    use crate::models::AgentConfig;
    use crate::storage::InMemoryStore;

    fn setup(detection: ChangeDetection) -> (Arc<InMemoryStore>, Arc<AgentRegistry>, ConfigChangePoller) {
        let store = Arc::new(InMemoryStore::new());
        let builder = AgentBuilder::new(
            Arc::new(EchoModel),
            Arc::new(CapabilityRegistry::with_builtins()),
            store.clone(),
        );
        let registry = Arc::new(AgentRegistry::new(
            builder,
            store.clone(),
            Arc::new(TaskCounter::new()),
        ));
        let poller = ConfigChangePoller::new(registry.clone(), store.clone()).with_detection(detection);
        (store, registry, poller)
    }

    #[tokio::test]
    async fn test_first_sight_reloads_then_unchanged() {
        let (store, registry, poller) = setup(ChangeDetection::Timestamp);
        store.upsert_config(AgentConfig::new("a", "x"));

        let first = poller.check_changes().await.unwrap();
        assert_eq!(first.reloaded, vec!["a"]);
        assert!(registry.contains("a"));

        let second = poller.check_changes().await.unwrap();
        assert!(second.reloaded.is_empty());
        assert_eq!(second.unchanged, 1);
    }

    #[tokio::test]
    async fn test_newer_timestamp_triggers_reload() {
        let (store, registry, poller) = setup(ChangeDetection::Timestamp);
        let mut config = AgentConfig::new("a", "x");
        store.upsert_config(config.clone());
        poller.check_changes().await.unwrap();
        let before = registry.get("a").unwrap().generation();

        config.updated_at = Some(Utc::now() + chrono::Duration::seconds(5));
        store.upsert_config(config);
        let report = poller.check_changes().await.unwrap();
        assert_eq!(report.reloaded, vec!["a"]);
        assert!(registry.get("a").unwrap().generation() > before);
    }

    #[tokio::test]
    async fn test_always_mode_reloads_every_pass() {
        let (store, _registry, poller) = setup(ChangeDetection::Always);
        store.upsert_config(AgentConfig::new("a", "x"));
        poller.check_changes().await.unwrap();
        let report = poller.check_changes().await.unwrap();
        assert_eq!(report.reloaded, vec!["a"]);
    }

    #[tokio::test]
    async fn test_disabled_agent_is_purged() {
        let (store, registry, poller) = setup(ChangeDetection::Timestamp);
        store.upsert_config(AgentConfig::new("a", "x"));
        store.upsert_config(AgentConfig::new("b", "x"));
        poller.check_changes().await.unwrap();

        store.upsert_config(AgentConfig::new("b", "x").disabled());
        let report = poller.check_changes().await.unwrap();
        assert_eq!(report.purged, vec!["b"]);
        assert!(registry.get("b").is_none());
        assert_eq!(poller.cached_names(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_bad_config_does_not_stop_pass() {
        let (store, registry, poller) = setup(ChangeDetection::Timestamp);
        store.upsert_config(AgentConfig::new("a", "x").with_agent_type("bogus"));
        store.upsert_config(AgentConfig::new("b", "x"));

        let report = poller.check_changes().await.unwrap();
        assert_eq!(report.failed, vec!["a"]);
        assert_eq!(report.reloaded, vec!["b"]);
        assert!(registry.contains("b"));
    }

    #[tokio::test]
    async fn test_handle_stops_loop() {
        let (_store, _registry, poller) = setup(ChangeDetection::Timestamp);
        let handle = Arc::new(poller.with_interval(Duration::from_millis(10))).start();
        tokio::time::sleep(Duration::from_millis(30)).await;
        handle.stop().await;
    }
}
