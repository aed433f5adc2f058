//! Per-agent in-flight request counter
//!
//! Gives the registry a "safe to swap now" signal. Every call into an agent
//! instance goes through a [`TaskGuard`] so the count is released on every
//! exit path, including panics and early returns.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Default interval between drain polls
pub const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug)]
pub struct TaskCounter {
    counts: DashMap<String, usize>,
    poll_interval: Duration,
}

impl TaskCounter {
    pub fn new() -> Self {
        Self::with_poll_interval(DRAIN_POLL_INTERVAL)
    }

    pub fn with_poll_interval(poll_interval: Duration) -> Self {
        Self {
            counts: DashMap::new(),
            poll_interval,
        }
    }

    /// Increment the count for `name`
    pub fn enter(&self, name: &str) {
        let mut count = self.counts.entry(name.to_string()).or_insert(0);
        *count += 1;
        log::debug!("[TaskCounter] enter {} -> {}", name, *count);
    }

    /// Decrement the count for `name`, removing the entry at zero.
    ///
    /// A `leave` without a matching `enter` is logged and ignored so the
    /// count can never go negative.
    pub fn leave(&self, name: &str) {
        match self.counts.entry(name.to_string()) {
            Entry::Occupied(mut entry) => {
                let remaining = entry.get().saturating_sub(1);
                if remaining == 0 {
                    entry.remove();
                } else {
                    *entry.get_mut() = remaining;
                }
                log::debug!("[TaskCounter] leave {} -> {}", name, remaining);
            }
            Entry::Vacant(_) => {
                log::warn!("[TaskCounter] leave for {} without matching enter", name);
            }
        }
    }

    pub fn active_count(&self, name: &str) -> usize {
        self.counts.get(name).map(|c| *c).unwrap_or(0)
    }

    /// Snapshot of every name with work in flight
    pub fn snapshot(&self) -> Vec<(String, usize)> {
        let mut counts: Vec<(String, usize)> = self
            .counts
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        counts.sort();
        counts
    }

    /// Number of names currently tracked
    pub fn tracked_names(&self) -> usize {
        self.counts.len()
    }

    /// Poll until `name` has no work in flight or `timeout` elapses.
    /// Returns whether the count reached zero.
    pub async fn drain(&self, name: &str, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let active = self.active_count(name);
            if active == 0 {
                return true;
            }
            if Instant::now() >= deadline {
                log::debug!(
                    "[TaskCounter] drain of {} gave up with {} task(s) active",
                    name,
                    active
                );
                return false;
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Enter `name` and return a guard that leaves when dropped
    pub fn guard(self: &Arc<Self>, name: &str) -> TaskGuard {
        self.enter(name);
        TaskGuard {
            counter: Arc::clone(self),
            name: name.to_string(),
        }
    }
}

impl Default for TaskCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Scoped acquisition of one task slot. Leaves on drop.
#[derive(Debug)]
pub struct TaskGuard {
    counter: Arc<TaskCounter>,
    name: String,
}

impl TaskGuard {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.counter.leave(&self.name);
    }
}
